//! Random access to the components of individual entities.
//!
//! A lookup resolves an entity through the world's identity table to its chunk and row, then
//! resolves the component type to a column. The column index is cached for the last archetype
//! seen, so consecutive lookups of entities in the same archetype skip the schema search.

use super::{
    borrow::{Exclusive, Ref, RefMut},
    entity::{Entity, EntityTable},
    storage::{
        archetype::ArchetypeIndex,
        buffer::{BufferMut, BufferRef},
        chunk::Chunk,
        component::{BufferElement, Component, ComponentKind, ComponentTypeId},
    },
    world::{EntityAccessError, World},
};
use derivative::Derivative;
use std::{cell::Cell, marker::PhantomData};

/// Caches the column of one component type for the last archetype seen.
#[derive(Debug)]
struct ColumnCache {
    type_id: ComponentTypeId,
    last: Cell<Option<(ArchetypeIndex, Option<usize>)>>,
}

impl ColumnCache {
    fn new(type_id: ComponentTypeId) -> Self {
        Self {
            type_id,
            last: Cell::new(None),
        }
    }

    /// Resolves an entity to its chunk, row and the cached column of the component, if the
    /// entity's archetype has one.
    fn resolve<'a>(
        &self,
        world: &'a World,
        entity: Entity,
    ) -> Result<(&'a Chunk, usize, Option<usize>), EntityAccessError> {
        let location = world
            .entities()
            .resolve(entity)
            .ok_or(EntityAccessError::EntityNotFound)?;
        let chunk = world
            .storage()
            .chunk(location.chunk())
            .ok_or(EntityAccessError::EntityNotFound)?;

        let field = match self.last.get() {
            Some((archetype, field)) if archetype == chunk.archetype() => field,
            _ => {
                let field = chunk.schema().field_index(self.type_id);
                self.last.set(Some((chunk.archetype(), field)));
                field
            }
        };

        Ok((chunk, location.row(), field))
    }

    fn resolve_field<'a>(
        &self,
        world: &'a World,
        entity: Entity,
    ) -> Result<(&'a Chunk, usize, usize), EntityAccessError> {
        let (chunk, row, field) = self.resolve(world, entity)?;
        let field = field.ok_or(EntityAccessError::ComponentNotFound)?;
        Ok((chunk, row, field))
    }

    fn cached_archetype(&self) -> Option<ArchetypeIndex> {
        self.last.get().map(|(archetype, _)| archetype)
    }
}

fn assert_kind(chunk: &Chunk, field: usize, data: bool) {
    let meta = chunk.schema().fields()[field].meta();
    let is_data = meta.kind() == ComponentKind::Data;
    if is_data != data {
        panic!(
            "component {} is not stored as a {} column",
            meta.type_id(),
            if data { "data" } else { "buffer" }
        );
    }
}

fn is_enabled(chunk: &Chunk, row: usize, field: usize) -> bool {
    chunk
        .field_enable_bits(field)
        .map(|bits| bits.get(row))
        .unwrap_or(true)
}

/// Reads the `T` component of arbitrary entities.
///
/// ```
/// # use tessera::*;
/// let mut world = World::default();
/// let a = world.spawn((1u32,));
/// let b = world.spawn((2u32, 0.5f32));
///
/// let lookup = world.lookup::<u32>();
/// assert_eq!(*lookup.get(a).unwrap(), 1);
/// assert_eq!(*lookup.get(b).unwrap(), 2);
/// ```
#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
pub struct ComponentLookup<'a, T: Component> {
    #[derivative(Debug = "ignore")]
    world: &'a World,
    cache: ColumnCache,
    #[derivative(Debug = "ignore")]
    _phantom: PhantomData<fn() -> T>,
}

impl<'a, T: Component> ComponentLookup<'a, T> {
    pub(crate) fn new(world: &'a World) -> Self {
        Self {
            world,
            cache: ColumnCache::new(ComponentTypeId::of::<T>()),
            _phantom: PhantomData,
        }
    }

    /// Returns the archetype whose column is currently cached.
    pub fn cached_archetype(&self) -> Option<ArchetypeIndex> {
        self.cache.cached_archetype()
    }

    /// Borrows the entity's component.
    ///
    /// # Panics
    ///
    /// Panics if the component's column is mutably borrowed.
    pub fn get(&self, entity: Entity) -> Result<Ref<'a, T>, EntityAccessError> {
        let (chunk, row, field) = self.cache.resolve_field(self.world, entity)?;
        assert_kind(chunk, field, true);
        let borrow = chunk.borrow_flag(field).shared();
        // safety: the field's type is T and the column is borrowed
        let column = unsafe { chunk.column::<T>(field) };
        Ok(Ref::new(borrow, &column[row]))
    }

    /// Returns `true` if the entity exists and has the component.
    pub fn has(&self, entity: Entity) -> bool {
        matches!(self.cache.resolve(self.world, entity), Ok((_, _, Some(_))))
    }

    /// Returns `true` if the entity's component is enabled. Components which are not enableable
    /// are always enabled.
    pub fn is_enabled(&self, entity: Entity) -> Result<bool, EntityAccessError> {
        let (chunk, row, field) = self.cache.resolve_field(self.world, entity)?;
        Ok(is_enabled(chunk, row, field))
    }
}

/// Reads and writes the `T` component of arbitrary entities.
///
/// Writes mark the entity's whole column as changed at the world's current version.
#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
pub struct ComponentLookupMut<'a, T: Component> {
    #[derivative(Debug = "ignore")]
    world: &'a World,
    cache: ColumnCache,
    #[derivative(Debug = "ignore")]
    _phantom: PhantomData<fn() -> T>,
}

impl<'a, T: Component> ComponentLookupMut<'a, T> {
    pub(crate) fn new(world: &'a World) -> Self {
        Self {
            world,
            cache: ColumnCache::new(ComponentTypeId::of::<T>()),
            _phantom: PhantomData,
        }
    }

    /// Returns the archetype whose column is currently cached.
    pub fn cached_archetype(&self) -> Option<ArchetypeIndex> {
        self.cache.cached_archetype()
    }

    /// Borrows the entity's component.
    ///
    /// # Panics
    ///
    /// Panics if the component's column is mutably borrowed.
    pub fn get(&self, entity: Entity) -> Result<Ref<'a, T>, EntityAccessError> {
        let (chunk, row, field) = self.cache.resolve_field(self.world, entity)?;
        assert_kind(chunk, field, true);
        let borrow = chunk.borrow_flag(field).shared();
        // safety: the field's type is T and the column is borrowed
        let column = unsafe { chunk.column::<T>(field) };
        Ok(Ref::new(borrow, &column[row]))
    }

    /// Mutably borrows the entity's component.
    ///
    /// # Panics
    ///
    /// Panics if the component's column is already borrowed.
    pub fn get_mut(&self, entity: Entity) -> Result<RefMut<'a, T>, EntityAccessError> {
        let (chunk, row, field) = self.cache.resolve_field(self.world, entity)?;
        assert_kind(chunk, field, true);
        let borrow = chunk.borrow_flag(field).exclusive();
        chunk.set_version(field, self.world.version());
        // safety: the field's type is T and the column is exclusively borrowed
        let column = unsafe { chunk.column_mut::<T>(field) };
        Ok(RefMut::new(borrow, &mut column[row]))
    }

    /// Returns `true` if the entity exists and has the component.
    pub fn has(&self, entity: Entity) -> bool {
        matches!(self.cache.resolve(self.world, entity), Ok((_, _, Some(_))))
    }

    /// Returns `true` if the entity's component is enabled. Components which are not enableable
    /// are always enabled.
    pub fn is_enabled(&self, entity: Entity) -> Result<bool, EntityAccessError> {
        let (chunk, row, field) = self.cache.resolve_field(self.world, entity)?;
        Ok(is_enabled(chunk, row, field))
    }

    /// Enables or disables the entity's component. Returns `true` if the state changed.
    ///
    /// # Panics
    ///
    /// Panics if the component is not enableable.
    pub fn set_enabled(&self, entity: Entity, enabled: bool) -> Result<bool, EntityAccessError> {
        let (chunk, row, field) = self.cache.resolve_field(self.world, entity)?;
        match chunk.field_enable_bits(field) {
            Some(bits) => Ok(bits.set(row, enabled)),
            None => panic!(
                "component {} is not enableable",
                ComponentTypeId::of::<T>()
            ),
        }
    }
}

/// Reads and writes the `T` buffers of arbitrary entities.
#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
pub struct BufferLookup<'a, T: BufferElement> {
    #[derivative(Debug = "ignore")]
    world: &'a World,
    cache: ColumnCache,
    #[derivative(Debug = "ignore")]
    _phantom: PhantomData<fn() -> T>,
}

impl<'a, T: BufferElement> BufferLookup<'a, T> {
    pub(crate) fn new(world: &'a World) -> Self {
        Self {
            world,
            cache: ColumnCache::new(ComponentTypeId::of::<T>()),
            _phantom: PhantomData,
        }
    }

    /// Returns the archetype whose column is currently cached.
    pub fn cached_archetype(&self) -> Option<ArchetypeIndex> {
        self.cache.cached_archetype()
    }

    /// Borrows the entity's buffer.
    ///
    /// # Panics
    ///
    /// Panics if the buffer column is mutably borrowed.
    pub fn get(&self, entity: Entity) -> Result<BufferRef<'a, T>, EntityAccessError> {
        let (chunk, row, field) = self.cache.resolve_field(self.world, entity)?;
        assert_kind(chunk, field, false);
        let borrow = chunk.borrow_flag(field).shared();
        let ptr = chunk.row_ptr(&chunk.schema().fields()[field], row);
        // safety: the row holds an initialized buffer of T and the column is borrowed
        Ok(unsafe { BufferRef::from_row(ptr, borrow) })
    }

    /// Mutably borrows the entity's buffer.
    ///
    /// # Panics
    ///
    /// Panics if the buffer column is already borrowed.
    pub fn get_mut(&self, entity: Entity) -> Result<BufferMut<'a, T>, EntityAccessError> {
        let (chunk, row, field) = self.cache.resolve_field(self.world, entity)?;
        assert_kind(chunk, field, false);
        let inline_capacity = chunk.schema().fields()[field]
            .meta()
            .buffer_capacity()
            .unwrap_or(0);
        let borrow: Exclusive<'a> = chunk.borrow_flag(field).exclusive();
        chunk.set_version(field, self.world.version());
        let ptr = chunk.row_ptr(&chunk.schema().fields()[field], row);
        // safety: the row holds an initialized buffer of T and the column is exclusively borrowed
        Ok(unsafe { BufferMut::from_row(ptr, inline_capacity, borrow) })
    }

    /// Returns `true` if the entity exists and has the buffer.
    pub fn has(&self, entity: Entity) -> bool {
        matches!(self.cache.resolve(self.world, entity), Ok((_, _, Some(_))))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Health(u32);
    struct Tag;

    #[test]
    fn column_cache_follows_archetype() {
        let _ = tracing_subscriber::fmt::try_init();

        let mut world = World::default();
        let a = world.spawn((Health(1),));
        let b = world.spawn((Tag, Health(2)));
        let c = world.spawn((Tag,));

        let lookup = world.lookup::<Health>();
        assert_eq!(lookup.cached_archetype(), None);
        assert_eq!(*lookup.get(a).unwrap(), Health(1));
        let first = lookup.cached_archetype();
        assert_eq!(*lookup.get(b).unwrap(), Health(2));
        assert_ne!(lookup.cached_archetype(), first);
        assert_eq!(
            lookup.get(c).unwrap_err(),
            EntityAccessError::ComponentNotFound
        );
        assert_eq!(*lookup.get(a).unwrap(), Health(1));
        assert_eq!(lookup.cached_archetype(), first);
    }

    #[test]
    fn stale_entities_are_not_found() {
        let mut world = World::default();
        let a = world.spawn((Health(1),));
        world.despawn(a);
        let b = world.spawn((Health(2),));
        assert_eq!(a.index(), b.index());

        let lookup = world.lookup::<Health>();
        assert_eq!(lookup.get(a).unwrap_err(), EntityAccessError::EntityNotFound);
        assert!(!lookup.has(a));
        assert_eq!(*lookup.get(b).unwrap(), Health(2));
    }

    #[test]
    fn writes_bump_versions() {
        let mut world = World::default();
        let a = world.spawn((Health(1),));
        let version = world.increment_version();

        let lookup = world.lookup_mut::<Health>();
        lookup.get_mut(a).unwrap().0 = 10;
        let location = world.location(a).unwrap();
        let chunk = world.storage().chunk(location.chunk()).unwrap();
        assert_eq!(chunk.version(0), version);
        assert_eq!(*lookup.get(a).unwrap(), Health(10));
    }

    #[test]
    #[should_panic(expected = "already borrowed")]
    fn overlapping_write_borrows_panic() {
        let mut world = World::default();
        let a = world.spawn((Health(1),));
        let lookup = world.lookup_mut::<Health>();
        let _first = lookup.get_mut(a).unwrap();
        let _second = lookup.get(a).unwrap();
    }
}
