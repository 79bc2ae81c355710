//! Contains types related to writing new entity rows into a [World](super::world::World).

use super::storage::{
    chunk::Chunk,
    component::{Component, ComponentKind, ComponentMeta, ComponentTypeId},
    registry::TypeRegistry,
};
use bit_set::BitSet;
use itertools::Itertools;
use smallvec::SmallVec;

/// The component metadata of a [`ComponentSet`].
pub type ComponentMetas = SmallVec<[ComponentMeta; 8]>;

/// Writes the data components of a single new row.
///
/// Every component of the row's archetype which is not supplied by another source must be written
/// exactly once.
pub struct RowWriter<'a> {
    chunk: &'a mut Chunk,
    row: usize,
    claimed: BitSet,
}

impl<'a> RowWriter<'a> {
    pub(crate) fn new(chunk: &'a mut Chunk, row: usize) -> Self {
        let claimed = BitSet::with_capacity(chunk.schema().fields().len());
        Self {
            chunk,
            row,
            claimed,
        }
    }

    /// Writes a component into the row.
    ///
    /// # Panics
    ///
    /// Panics if the row's archetype does not store `T` as a data column, or if `T` has already
    /// been written.
    pub fn write<T: Component>(&mut self, value: T) {
        let type_id = ComponentTypeId::of::<T>();
        let field = match self.chunk.schema().field_index(type_id) {
            Some(field) => field,
            None => panic!("archetype does not contain component {}", type_id),
        };
        assert!(
            self.chunk.schema().fields()[field].meta().kind() == ComponentKind::Data,
            "component {} is not stored as a data column",
            type_id
        );

        assert!(self.claimed.insert(field), "component type already claimed");

        // safety: the field's type is T and the new row's value is uninitialized
        unsafe { self.chunk.write(field, self.row, value) };
    }
}

/// A set of data components attached to an entity when it is inserted.
///
/// Implemented for tuples of up to 8 components (26 with the `extended-tuple-impls` feature) and
/// for `()`. This trait is not meant to be implemented manually.
pub trait ComponentSet: Send + Sync + 'static {
    /// Appends the metadata of every component in the set, registering unknown types as plain
    /// data components.
    ///
    /// # Panics
    ///
    /// Panics if a type is registered as a shared or buffer component.
    fn component_metas(registry: &mut TypeRegistry, metas: &mut ComponentMetas);

    /// Writes every component of the set into a row.
    fn write_row(self, writer: &mut RowWriter);
}

/// Returns the data component metadata of `T`, registering `T` if it is unknown.
pub(crate) fn data_meta<T: Component>(registry: &mut TypeRegistry) -> ComponentMeta {
    let type_id = ComponentTypeId::of::<T>();
    registry.get_or_register::<T>();
    match registry.meta(type_id) {
        Some(meta) if meta.kind() == ComponentKind::Data => *meta,
        _ => panic!("component {} is not registered as a data component", type_id),
    }
}

/// Asserts that no component type appears twice in a set.
pub(crate) fn assert_distinct(metas: &[ComponentMeta]) {
    let duplicate = metas
        .iter()
        .map(|meta| meta.type_id())
        .sorted()
        .tuple_windows()
        .find(|(a, b)| a == b);
    if let Some((type_id, _)) = duplicate {
        panic!("component {} appears more than once in the component set", type_id);
    }
}

impl ComponentSet for () {
    fn component_metas(_: &mut TypeRegistry, _: &mut ComponentMetas) {}

    fn write_row(self, _: &mut RowWriter) {}
}

macro_rules! component_set {
    ($head_ty:ident) => {
        impl_component_set!($head_ty);
    };
    ($head_ty:ident, $( $tail_ty:ident ),*) => (
        impl_component_set!($head_ty, $( $tail_ty ),*);
        component_set!($( $tail_ty ),*);
    );
}

macro_rules! impl_component_set {
    ( $( $ty: ident ),* ) => {
        impl<$( $ty: Component ),*> ComponentSet for ($( $ty, )*) {
            fn component_metas(registry: &mut TypeRegistry, metas: &mut ComponentMetas) {
                $(
                    metas.push(data_meta::<$ty>(registry));
                )*
            }

            fn write_row(self, writer: &mut RowWriter) {
                #![allow(non_snake_case)]

                let ($( $ty, )*) = self;
                $(
                    writer.write($ty);
                )*
            }
        }
    };
}

#[cfg(feature = "extended-tuple-impls")]
component_set!(A, B, C, D, E, F, G, H, I, J, K, L, M, N, O, P, Q, R, S, T, U, V, W, X, Y, Z);

#[cfg(not(feature = "extended-tuple-impls"))]
component_set!(A, B, C, D, E, F, G, H);

#[cfg(test)]
mod test {
    use super::*;

    use crate::internals::{
        entity::Entity,
        storage::{archetype::ArchetypeIndex, archetype::ArchetypeSchema, ChunkId},
    };
    use std::sync::Arc;

    #[derive(Clone, Copy)]
    struct Wide<const N: usize>(u8);

    macro_rules! with_wide_types {
        ($mac:ident) => {
            $mac!(
            0 1 2 3 4 5 6 7 8 9 10 11 12 13 14 15 16 17 18 19 20 21 22 23 24 25 26 27 28 29 30
            31 32 33 34 35 36 37 38 39 40 41 42 43 44 45 46 47 48 49 50 51 52 53 54 55 56 57 58
            59 60 61 62 63 64 65 66 67 68 69 70 71 72 73 74 75 76 77 78 79 80 81 82 83 84 85 86
            87 88 89 90 91 92 93 94 95 96 97 98 99 100 101 102 103 104 105 106 107 108 109 110
            111 112 113 114 115 116 117 118 119 120 121 122 123 124 125 126 127 128 129 130 131
            132 133 134 135 136 137 138 139
            )
        };
    }

    fn wide_chunk() -> Chunk {
        macro_rules! metas {
            ($($n:literal)*) => { vec![$(ComponentMeta::of::<Wide<$n>>()),*] };
        }
        let metas = with_wide_types!(metas);
        let schema = Arc::new(ArchetypeSchema::new(&metas, 16 * 1024, 128));
        Chunk::new(
            ChunkId::new(0, 0),
            ArchetypeIndex(0),
            schema,
            SmallVec::new(),
            1,
        )
    }

    #[test]
    fn rows_with_more_than_128_fields() {
        let mut chunk = wide_chunk();
        assert_eq!(chunk.schema().fields().len(), 140);

        // safety: every column of the row is written below
        let row = unsafe { chunk.push_entity(Entity::new(0, 0)) };
        let mut writer = RowWriter::new(&mut chunk, row);
        macro_rules! write_all {
            ($($n:literal)*) => { $(writer.write(Wide::<$n>($n as u8));)* };
        }
        with_wide_types!(write_all);
        assert_eq!(writer.claimed.len(), 140);
    }

    #[test]
    #[should_panic(expected = "already claimed")]
    fn writing_a_component_twice_panics() {
        let mut chunk = wide_chunk();
        let row = unsafe { chunk.push_entity(Entity::new(0, 0)) };
        let mut writer = RowWriter::new(&mut chunk, row);
        writer.write(Wide::<139>(1));
        writer.write(Wide::<139>(2));
    }

    #[test]
    fn tuple_metas_are_in_tuple_order() {
        let mut registry = TypeRegistry::new();
        let mut metas = ComponentMetas::new();
        <(u32, f64, bool)>::component_metas(&mut registry, &mut metas);
        let types: Vec<_> = metas.iter().map(|m| m.type_id()).collect();
        assert_eq!(
            types,
            vec![
                ComponentTypeId::of::<u32>(),
                ComponentTypeId::of::<f64>(),
                ComponentTypeId::of::<bool>()
            ]
        );
        assert!(registry.index_of(ComponentTypeId::of::<f64>()).is_some());
    }

    #[test]
    fn enableable_registration_is_kept() {
        let mut registry = TypeRegistry::new();
        registry.register_enableable::<u32>().unwrap();
        let mut metas = ComponentMetas::new();
        <(u32,)>::component_metas(&mut registry, &mut metas);
        assert!(metas[0].is_enableable());
    }

    #[test]
    #[should_panic(expected = "appears more than once")]
    fn duplicate_types_are_rejected() {
        let mut registry = TypeRegistry::new();
        let mut metas = ComponentMetas::new();
        <(u32, u8, u32)>::component_metas(&mut registry, &mut metas);
        assert_distinct(&metas);
    }

    #[test]
    #[should_panic(expected = "not registered as a data component")]
    fn shared_types_cannot_be_written_as_data() {
        let mut registry = TypeRegistry::new();
        registry.register_shared::<u16>().unwrap();
        let mut metas = ComponentMetas::new();
        <(u16,)>::component_metas(&mut registry, &mut metas);
    }
}
