//! Typed access to the columns of a chunk matched by a [query](super::Query).

use super::descriptor::{MatchingArchetype, QueryDescriptor};
use crate::internals::{
    borrow::{Exclusive, Ref, RefMut, Shared},
    entity::Entity,
    storage::{
        archetype::ArchetypeIndex,
        chunk::{is_newer, Chunk, Version},
        component::{BufferElement, Component, ComponentKind, ComponentTypeId, SharedComponent},
        enable::EnabledColumn,
        shared::SharedValues,
        ChunkId,
    },
    world::World,
};
use std::ops::Range;

pub mod buffer;

pub use buffer::{BufferColumn, BufferColumnMut};

/// A view of one chunk yielded by a query.
///
/// Column accessors always cover every row of the chunk. [`range`](Self::range) gives the rows
/// which passed the query's enable bits; for queries without enableable components it is the
/// whole chunk.
#[derive(Clone)]
pub struct ChunkView<'a> {
    chunk: &'a Chunk,
    matching: &'a MatchingArchetype,
    descriptor: &'a QueryDescriptor,
    shared: &'a SharedValues,
    version: Version,
    range: Range<usize>,
}

impl<'a> ChunkView<'a> {
    pub(crate) fn new(
        chunk: &'a Chunk,
        matching: &'a MatchingArchetype,
        descriptor: &'a QueryDescriptor,
        world: &'a World,
        range: Range<usize>,
    ) -> Self {
        Self {
            chunk,
            matching,
            descriptor,
            shared: world.shared_values(),
            version: world.version(),
            range,
        }
    }

    pub(crate) fn with_range(&self, range: Range<usize>) -> Self {
        Self {
            range,
            ..self.clone()
        }
    }

    /// Returns the underlying chunk.
    pub fn chunk(&self) -> &'a Chunk {
        self.chunk
    }

    /// Returns the query's match record for the chunk's archetype.
    pub fn matching(&self) -> &'a MatchingArchetype {
        self.matching
    }

    /// Returns the chunk's handle.
    pub fn id(&self) -> ChunkId {
        self.chunk.id()
    }

    /// Returns the chunk's archetype.
    pub fn archetype(&self) -> ArchetypeIndex {
        self.chunk.archetype()
    }

    /// Returns the number of rows in the chunk.
    pub fn len(&self) -> usize {
        self.chunk.len()
    }

    /// Returns `true` if the chunk has no rows.
    pub fn is_empty(&self) -> bool {
        self.chunk.is_empty()
    }

    /// Returns the rows which passed the query.
    pub fn range(&self) -> Range<usize> {
        self.range.clone()
    }

    /// Returns the entities of every row.
    pub fn entities(&self) -> &'a [Entity] {
        self.chunk.entities()
    }

    /// Returns the version at which rows were last added to or removed from the chunk.
    pub fn order_version(&self) -> Version {
        self.chunk.order_version()
    }

    fn data_field<T: Component>(&self) -> Option<usize> {
        let type_id = ComponentTypeId::of::<T>();
        let index = self.chunk.schema().field_index(type_id)?;
        let kind = self.chunk.schema().fields()[index].meta().kind();
        assert!(
            kind == ComponentKind::Data,
            "component {} is not stored as a data column",
            type_id
        );
        Some(index)
    }

    fn assert_writable(&self, type_id: ComponentTypeId) {
        assert!(
            self.descriptor.permissions().allows_write(&type_id),
            "query does not have write access to component {}",
            type_id
        );
    }

    /// Borrows the `T` column.
    ///
    /// Returns an empty slice if the archetype does not contain `T`.
    ///
    /// # Panics
    ///
    /// Panics if the column is mutably borrowed.
    pub fn column<T: Component>(&self) -> Ref<'a, [T]> {
        match self.data_field::<T>() {
            Some(field) => {
                let borrow = self.chunk.borrow_flag(field).shared();
                // safety: the field's type is T and the column is borrowed
                Ref::new(borrow, unsafe { self.chunk.column::<T>(field) })
            }
            None => Ref::new(Shared::untracked(), &[]),
        }
    }

    /// Mutably borrows the `T` column and marks it as changed at the world's current version.
    ///
    /// Returns an empty slice if the archetype does not contain `T`.
    ///
    /// # Panics
    ///
    /// Panics if the query does not write `T` or the column is already borrowed.
    pub fn column_mut<T: Component>(&self) -> RefMut<'a, [T]> {
        self.assert_writable(ComponentTypeId::of::<T>());
        match self.data_field::<T>() {
            Some(field) => {
                let borrow = self.chunk.borrow_flag(field).exclusive();
                self.chunk.set_version(field, self.version);
                // safety: the field's type is T and the column is exclusively borrowed
                RefMut::new(borrow, unsafe { self.chunk.column_mut::<T>(field) })
            }
            None => RefMut::new(Exclusive::untracked(), &mut []),
        }
    }

    /// Returns the chunk's value of the shared component `S`.
    pub fn shared<S: SharedComponent>(&self) -> Option<&'a S> {
        let slot = self
            .chunk
            .schema()
            .field(ComponentTypeId::of::<S>())?
            .shared_slot()?;
        self.shared.get::<S>(self.chunk.shared_values()[slot])
    }

    /// Borrows the buffers of element type `T`.
    ///
    /// Returns an empty column if the archetype does not contain `T`.
    pub fn buffers<T: BufferElement>(&self) -> BufferColumn<'a, T> {
        match self.chunk.schema().field_index(ComponentTypeId::of::<T>()) {
            Some(field) => BufferColumn::new(self.chunk, field),
            None => BufferColumn::empty(),
        }
    }

    /// Mutably borrows the buffers of element type `T` and marks them as changed.
    ///
    /// # Panics
    ///
    /// Panics if the query does not write `T` or the column is already borrowed.
    pub fn buffers_mut<T: BufferElement>(&self) -> BufferColumnMut<'a, T> {
        self.assert_writable(ComponentTypeId::of::<T>());
        match self.chunk.schema().field_index(ComponentTypeId::of::<T>()) {
            Some(field) => {
                let column = BufferColumnMut::new(self.chunk, field);
                self.chunk.set_version(field, self.version);
                column
            }
            None => BufferColumnMut::empty(),
        }
    }

    /// Returns the enable bits of `T`, if `T` is an enableable component of the chunk.
    pub fn enabled<T: Component>(&self) -> Option<EnabledColumn<'a>> {
        let field = self.chunk.schema().field_index(ComponentTypeId::of::<T>())?;
        let bits = self.chunk.field_enable_bits(field)?;
        Some(EnabledColumn::new(bits, self.chunk.len(), false))
    }

    /// Returns the enable bits of `T` with permission to toggle them.
    ///
    /// # Panics
    ///
    /// Panics if the query does not write `T`.
    pub fn enabled_mut<T: Component>(&self) -> Option<EnabledColumn<'a>> {
        self.assert_writable(ComponentTypeId::of::<T>());
        let field = self.chunk.schema().field_index(ComponentTypeId::of::<T>())?;
        let bits = self.chunk.field_enable_bits(field)?;
        Some(EnabledColumn::new(bits, self.chunk.len(), true))
    }

    /// Returns `true` if the `T` column was written after `since`.
    pub fn did_change<T: Component>(&self, since: Version) -> bool {
        self.chunk
            .schema()
            .field_index(ComponentTypeId::of::<T>())
            .map(|field| is_newer(self.chunk.version(field), since))
            .unwrap_or(false)
    }
}

impl<'a> std::fmt::Debug for ChunkView<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkView")
            .field("chunk", &self.chunk.id())
            .field("archetype", &self.chunk.archetype())
            .field("range", &self.range)
            .finish()
    }
}
