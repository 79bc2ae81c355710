//! Contains types related to the [`World`] entity collection.

use super::{
    borrow::Ref,
    entity::{Entities, Entity, EntityLocation, EntityTable},
    insert::{assert_distinct, data_meta, ComponentMetas, ComponentSet, RowWriter},
    lookup::{BufferLookup, ComponentLookup, ComponentLookupMut},
    query::{
        descriptor::{DescriptorCache, QueryDescriptor},
        Query, QueryDesc, QueryError,
    },
    storage::{
        archetype::{ArchetypeIndex, ArchetypeSchema},
        buffer::BufferMut,
        chunk::{Chunk, Version},
        component::{
            BufferElement, Component, ComponentKind, ComponentMeta, ComponentTypeId,
            SharedComponent,
        },
        enable::MAX_CHUNK_CAPACITY,
        registry::TypeRegistry,
        shared::{SharedValueIndex, SharedValues},
        ChunkId, Storage,
    },
};
use crate::internals::borrow::Exclusive;
use smallvec::SmallVec;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

/// The inline capacity given to buffer element types which are first used without having been
/// registered.
pub const DEFAULT_BUFFER_CAPACITY: usize = 8;

/// Error type representing a failure to access entity data.
#[derive(thiserror::Error, Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum EntityAccessError {
    /// Attempted to access an entity which does not exist.
    #[error("the entity does not exist")]
    EntityNotFound,
    /// Attempted to access a component which the entity does not have.
    #[error("the entity does not have the requested component")]
    ComponentNotFound,
}

/// Unique identifier for a [`World`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorldId(u64);
static WORLD_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

impl WorldId {
    fn next() -> Self {
        WorldId(WORLD_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for WorldId {
    fn default() -> Self {
        Self::next()
    }
}

/// Describes configuration options for the creation of a new [`World`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorldOptions {
    /// The number of bytes of component data each chunk is sized for.
    pub chunk_size: usize,
    /// The maximum number of rows a chunk may hold. Values above 128 are clamped.
    pub max_chunk_capacity: usize,
}

impl Default for WorldOptions {
    fn default() -> Self {
        Self {
            chunk_size: 16 * 1024,
            max_chunk_capacity: MAX_CHUNK_CAPACITY,
        }
    }
}

type SharedList = SmallVec<[SharedValueIndex; 2]>;

/// A container of entities.
///
/// Each entity stored inside a world is uniquely identified by an [`Entity`] ID and may have an
/// arbitrary collection of [`Component`]s attached. Entities with the same set of component types
/// share an archetype and are stored together in fixed capacity chunks.
///
/// The entities in a world may be efficiently searched and iterated via [queries](crate::query).
/// Structural changes (anything which adds, removes or moves rows) panic while a chunk iterator
/// or chunk list of the world is alive.
#[derive(Debug)]
pub struct World {
    id: WorldId,
    options: WorldOptions,
    registry: TypeRegistry,
    storage: Storage,
    entities: Entities,
    shared: SharedValues,
    descriptors: DescriptorCache,
    version: Version,
    allocation_buffer: Vec<Entity>,
}

impl Default for World {
    fn default() -> Self {
        Self::new(WorldOptions::default())
    }
}

fn live_chunk(storage: &mut Storage, id: ChunkId) -> &mut Chunk {
    match storage.chunk_mut(id) {
        Some(chunk) => chunk,
        None => panic!("attempted to access a released chunk"),
    }
}

/// A row which has been appended to a chunk but not yet handed to the entity table.
///
/// Dropping it uncommitted removes the row and frees its entity, so a component set which panics
/// half way through writing leaves no uninitialized row behind.
struct PendingRow<'a> {
    chunk: &'a mut Chunk,
    entities: &'a mut Entities,
    entity: Entity,
    row: usize,
    committed: bool,
}

impl<'a> PendingRow<'a> {
    fn push(chunk: &'a mut Chunk, entities: &'a mut Entities, entity: Entity) -> Self {
        // safety: the row is removed on drop unless every data column was written
        let row = unsafe { chunk.push_entity(entity) };
        Self {
            chunk,
            entities,
            entity,
            row,
            committed: false,
        }
    }

    fn commit(mut self, chunk_id: ChunkId) {
        self.entities
            .set(self.entity, EntityLocation::new(chunk_id, self.row));
        self.committed = true;
    }
}

impl<'a> Drop for PendingRow<'a> {
    fn drop(&mut self) {
        if !self.committed {
            self.chunk.abandon_last_row(self.row);
            self.entities.free(self.entity);
        }
    }
}

impl World {
    /// Creates a new world with the given options.
    pub fn new(options: WorldOptions) -> Self {
        Self {
            id: WorldId::next(),
            options,
            registry: TypeRegistry::new(),
            storage: Storage::default(),
            entities: Entities::default(),
            shared: SharedValues::default(),
            descriptors: DescriptorCache::default(),
            version: 1,
            allocation_buffer: Vec::new(),
        }
    }

    /// Returns the world's unique ID.
    pub fn id(&self) -> WorldId {
        self.id
    }

    /// Returns the options the world was created with.
    pub fn options(&self) -> &WorldOptions {
        &self.options
    }

    /// Returns the number of entities in the world.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns `true` if the world contains no entities.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the component type registry.
    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Returns the component type registry mutably.
    ///
    /// Write groups declared after a query has been compiled do not affect that query.
    pub fn registry_mut(&mut self) -> &mut TypeRegistry {
        &mut self.registry
    }

    /// Returns the archetype and chunk storage.
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Returns the entity identity table.
    pub fn entities(&self) -> &Entities {
        &self.entities
    }

    /// Returns the world's interned shared component values.
    pub fn shared_values(&self) -> &SharedValues {
        &self.shared
    }

    /// Returns the world's interned query descriptors.
    pub fn descriptors(&self) -> &DescriptorCache {
        &self.descriptors
    }

    /// Returns the current version. Column writes are stamped with this version.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Advances the current version, returning the new version.
    ///
    /// Versions wrap, skipping zero.
    pub fn increment_version(&mut self) -> Version {
        self.version = match self.version.wrapping_add(1) {
            0 => 1,
            version => version,
        };
        self.version
    }

    /// Compiles a query description against this world.
    ///
    /// Equivalent descriptions (the same lists in any order, with the same options) share one
    /// interned descriptor and chunk cache.
    ///
    /// # Examples
    ///
    /// ```
    /// # use tessera::*;
    /// struct Position(f32);
    /// struct Velocity(f32);
    ///
    /// let mut world = World::default();
    /// world.extend((0..10).map(|i| (Position(i as f32), Velocity(1.0))));
    ///
    /// let query = world
    ///     .compile_query(&QueryDesc::new().write::<Position>().read::<Velocity>())
    ///     .unwrap();
    /// for chunk in query.iter_chunks(&world) {
    ///     let mut positions = chunk.column_mut::<Position>();
    ///     let velocities = chunk.column::<Velocity>();
    ///     for row in chunk.range() {
    ///         positions[row].0 += velocities[row].0;
    ///     }
    /// }
    /// ```
    pub fn compile_query(&mut self, desc: &QueryDesc) -> Result<Query, QueryError> {
        let descriptor = QueryDescriptor::compile(desc, &self.registry)?;
        let (id, descriptor) = self.descriptors.get_or_insert(descriptor, &self.storage);
        Ok(Query::new(self.id, id, descriptor))
    }

    /// Matches a descriptor against every archetype with a full rescan of the layout index.
    pub fn search_archetypes(&self, descriptor: &QueryDescriptor) -> Vec<ArchetypeIndex> {
        self.storage.layout_index().search(descriptor).collect()
    }

    /// Returns `true` if the world contains an entity with the given ID.
    pub fn exists(&self, entity: Entity) -> bool {
        self.entities.exists(entity)
    }

    /// Returns the storage location of an entity.
    pub fn location(&self, entity: Entity) -> Option<EntityLocation> {
        self.entities.resolve(entity)
    }

    fn archetype_for(&mut self, metas: &[ComponentMeta]) -> ArchetypeIndex {
        let mut types: SmallVec<[ComponentTypeId; 8]> =
            metas.iter().map(|meta| meta.type_id()).collect();
        types.sort();
        if let Some(index) = self.storage.find_archetype(&types) {
            return index;
        }

        for type_id in &types {
            self.registry.mark_in_use(*type_id);
        }
        let schema = ArchetypeSchema::new(
            metas,
            self.options.chunk_size,
            self.options.max_chunk_capacity,
        );
        let index = self.storage.push_archetype(schema);
        self.descriptors.update(&self.storage);
        index
    }

    fn shared_meta<S: SharedComponent>(&mut self) -> ComponentMeta {
        let type_id = ComponentTypeId::of::<S>();
        if self.registry.meta(type_id).is_none() {
            self.registry
                .register_shared::<S>()
                .unwrap_or_else(|err| panic!("{}", err));
        }
        match self.registry.meta(type_id) {
            Some(meta) if meta.kind() == ComponentKind::Shared => *meta,
            _ => panic!("component {} is not registered as a shared component", type_id),
        }
    }

    fn buffer_meta<T: BufferElement>(&mut self) -> ComponentMeta {
        let type_id = ComponentTypeId::of::<T>();
        if self.registry.meta(type_id).is_none() {
            self.registry
                .register_buffer::<T>(DEFAULT_BUFFER_CAPACITY)
                .unwrap_or_else(|err| panic!("{}", err));
        }
        match self.registry.meta(type_id) {
            Some(meta) if meta.buffer_capacity().is_some() => *meta,
            _ => panic!("component {} is not registered as a buffer component", type_id),
        }
    }

    /// Appends a new entity to the world. Returns the ID of the new entity.
    /// `components` should be a tuple of components to attach to the entity.
    ///
    /// # Panics
    ///
    /// Panics if a chunk iterator of the world is open.
    ///
    /// # Examples
    ///
    /// ```
    /// # use tessera::*;
    /// let mut world = World::default();
    /// let entity = world.spawn((1usize, false, 5.3f32));
    /// assert!(world.exists(entity));
    /// ```
    pub fn spawn<T: ComponentSet>(&mut self, components: T) -> Entity {
        self.extend(Some(components))[0]
    }

    /// Appends a collection of entities to the world. Returns the IDs of the new entities.
    ///
    /// # Panics
    ///
    /// Panics if a chunk iterator of the world is open.
    pub fn extend<T, I>(&mut self, components: I) -> &[Entity]
    where
        T: ComponentSet,
        I: IntoIterator<Item = T>,
    {
        self.storage.assert_structural_change_allowed();
        let mut metas = ComponentMetas::new();
        T::component_metas(&mut self.registry, &mut metas);
        assert_distinct(&metas);

        let archetype = self.archetype_for(&metas);
        self.insert_rows(archetype, &SharedList::new(), components);
        &self.allocation_buffer
    }

    /// Appends a collection of entities which all share the same value of the shared component
    /// `S`. Returns the IDs of the new entities.
    ///
    /// # Panics
    ///
    /// Panics if a chunk iterator of the world is open, or if `S` is registered as a non-shared
    /// component.
    pub fn extend_shared<S, T, I>(&mut self, shared: S, components: I) -> &[Entity]
    where
        S: SharedComponent,
        T: ComponentSet,
        I: IntoIterator<Item = T>,
    {
        self.storage.assert_structural_change_allowed();
        let mut metas = ComponentMetas::new();
        T::component_metas(&mut self.registry, &mut metas);
        metas.push(self.shared_meta::<S>());
        assert_distinct(&metas);

        let archetype = self.archetype_for(&metas);
        let mut values = SharedList::new();
        values.push(self.shared.intern(shared));
        self.insert_rows(archetype, &values, components);
        &self.allocation_buffer
    }

    fn insert_rows<T, I>(
        &mut self,
        archetype: ArchetypeIndex,
        shared: &[SharedValueIndex],
        rows: I,
    ) where
        T: ComponentSet,
        I: IntoIterator<Item = T>,
    {
        self.allocation_buffer.clear();
        let version = self.version;
        for components in rows {
            let chunk_id = self.storage.chunk_for_insert(archetype, shared, version);
            let entity = self.entities.allocate();
            let chunk = live_chunk(&mut self.storage, chunk_id);

            let mut pending = PendingRow::push(chunk, &mut self.entities, entity);
            components.write_row(&mut RowWriter::new(&mut *pending.chunk, pending.row));
            pending.chunk.stamp(version);
            pending.commit(chunk_id);

            // counted per row, the source iterator may panic between rows
            self.storage.archetype_mut(archetype).add_entities(1);
            self.allocation_buffer.push(entity);
        }

        trace!(
            archetype = archetype.0,
            count = self.allocation_buffer.len(),
            "Inserted entities"
        );
    }

    /// Removes the specified entity from the world. Returns `true` if an entity was removed.
    ///
    /// # Panics
    ///
    /// Panics if a chunk iterator of the world is open.
    pub fn despawn(&mut self, entity: Entity) -> bool {
        self.storage.assert_structural_change_allowed();
        match self.entities.free(entity) {
            Some(location) => {
                self.remove_row(location);
                true
            }
            None => false,
        }
    }

    fn remove_row(&mut self, location: EntityLocation) {
        let version = self.version;
        let chunk = live_chunk(&mut self.storage, location.chunk());
        let archetype = chunk.archetype();
        let moved = chunk.swap_remove(location.row(), true);
        chunk.stamp(version);
        let empty = chunk.is_empty();

        if let Some(moved) = moved {
            self.entities.set(moved, location);
        }
        self.storage.archetype_mut(archetype).remove_entities(1);
        if empty {
            self.storage.release_chunk(location.chunk());
        }
    }

    /// Resolves the shared values of a target archetype, taking each from `overrides` or from
    /// the entity's current chunk.
    fn shared_values_for(
        &self,
        target: ArchetypeIndex,
        source: &Chunk,
        overrides: &[(ComponentTypeId, SharedValueIndex)],
    ) -> SharedList {
        let schema = self.storage.archetypes()[target].schema();
        schema
            .fields()
            .iter()
            .filter(|field| field.shared_slot().is_some())
            .map(|field| {
                let type_id = field.type_id();
                if let Some((_, value)) = overrides.iter().find(|(t, _)| *t == type_id) {
                    return *value;
                }
                match source.schema().field(type_id).and_then(|f| f.shared_slot()) {
                    Some(slot) => source.shared_values()[slot],
                    None => panic!("no value for shared component {}", type_id),
                }
            })
            .collect()
    }

    fn chunk_of(&self, location: EntityLocation) -> &Chunk {
        match self.storage.chunk(location.chunk()) {
            Some(chunk) => chunk,
            None => panic!("attempted to access a released chunk"),
        }
    }

    /// Moves an entity into a chunk of another archetype (or of the same archetype with
    /// different shared values). `init` is called with the destination chunk and row to write the
    /// data columns the source does not have.
    fn move_entity<F>(
        &mut self,
        entity: Entity,
        location: EntityLocation,
        target: ArchetypeIndex,
        shared: &[SharedValueIndex],
        init: F,
    ) where
        F: FnOnce(&mut Chunk, usize),
    {
        let version = self.version;
        let dst_id = self.storage.chunk_for_insert(target, shared, version);
        let (src, dst) = self.storage.chunk_pair_mut(location.chunk(), dst_id);
        let src_archetype = src.archetype();

        // safety: `init` writes the data columns new to the destination
        let (dst_row, moved) = unsafe { src.move_row(location.row(), dst) };
        init(dst, dst_row);
        src.stamp(version);
        dst.stamp(version);
        let src_empty = src.is_empty();

        if let Some(moved) = moved {
            self.entities.set(moved, location);
        }
        self.entities.set(entity, EntityLocation::new(dst_id, dst_row));
        self.storage.archetype_mut(src_archetype).remove_entities(1);
        self.storage.archetype_mut(target).add_entities(1);
        if src_empty {
            self.storage.release_chunk(location.chunk());
        }
    }

    fn resolve(&self, entity: Entity) -> Result<EntityLocation, EntityAccessError> {
        self.entities
            .resolve(entity)
            .ok_or(EntityAccessError::EntityNotFound)
    }

    /// Adds a component to an entity, moving it to a new archetype. If the entity already has a
    /// `T`, the value is replaced in place.
    ///
    /// # Panics
    ///
    /// Panics if a chunk iterator of the world is open.
    pub fn add_component<T: Component>(
        &mut self,
        entity: Entity,
        component: T,
    ) -> Result<(), EntityAccessError> {
        self.storage.assert_structural_change_allowed();
        let location = self.resolve(entity)?;
        let meta = data_meta::<T>(&mut self.registry);
        let version = self.version;

        let chunk = live_chunk(&mut self.storage, location.chunk());
        if let Some(field) = chunk.schema().field_index(meta.type_id()) {
            // safety: the field's type is T and the row is initialized
            unsafe { chunk.replace(field, location.row(), component) };
            chunk.set_version(field, version);
            return Ok(());
        }

        let mut metas: ComponentMetas = chunk
            .schema()
            .fields()
            .iter()
            .map(|field| *field.meta())
            .collect();
        metas.push(meta);
        let target = self.archetype_for(&metas);
        let shared = self.shared_values_for(target, self.chunk_of(location), &[]);

        self.move_entity(entity, location, target, &shared, move |chunk, row| {
            let mut writer = RowWriter::new(chunk, row);
            writer.write(component);
        });
        Ok(())
    }

    /// Removes a component from an entity, moving it to a new archetype.
    ///
    /// # Panics
    ///
    /// Panics if a chunk iterator of the world is open.
    pub fn remove_component<T: Component>(
        &mut self,
        entity: Entity,
    ) -> Result<(), EntityAccessError> {
        self.storage.assert_structural_change_allowed();
        let location = self.resolve(entity)?;
        let type_id = ComponentTypeId::of::<T>();

        let chunk = self.chunk_of(location);
        if !chunk.schema().contains(type_id) {
            return Err(EntityAccessError::ComponentNotFound);
        }

        let metas: ComponentMetas = chunk
            .schema()
            .fields()
            .iter()
            .filter(|field| field.type_id() != type_id)
            .map(|field| *field.meta())
            .collect();
        let target = self.archetype_for(&metas);
        let shared = self.shared_values_for(target, self.chunk_of(location), &[]);
        self.move_entity(entity, location, target, &shared, |_, _| {});
        Ok(())
    }

    /// Sets the value of a shared component on an entity, moving it to a chunk holding that
    /// value.
    ///
    /// # Panics
    ///
    /// Panics if a chunk iterator of the world is open, or if `S` is registered as a non-shared
    /// component.
    pub fn set_shared<S: SharedComponent>(
        &mut self,
        entity: Entity,
        value: S,
    ) -> Result<(), EntityAccessError> {
        self.storage.assert_structural_change_allowed();
        let location = self.resolve(entity)?;
        let meta = self.shared_meta::<S>();
        let index = self.shared.intern(value);

        let chunk = self.chunk_of(location);
        let target = match chunk.schema().field(meta.type_id()) {
            Some(field) => {
                let slot = field.shared_slot().unwrap_or(0);
                if chunk.shared_values()[slot] == index {
                    return Ok(());
                }
                chunk.archetype()
            }
            None => {
                let mut metas: ComponentMetas = chunk
                    .schema()
                    .fields()
                    .iter()
                    .map(|field| *field.meta())
                    .collect();
                metas.push(meta);
                self.archetype_for(&metas)
            }
        };

        let overrides = [(meta.type_id(), index)];
        let shared = self.shared_values_for(target, self.chunk_of(location), &overrides);
        self.move_entity(entity, location, target, &shared, |_, _| {});
        Ok(())
    }

    /// Attaches a buffer of `T` elements to an entity, replacing the contents of an existing
    /// buffer.
    ///
    /// `T` is registered with an inline capacity of [`DEFAULT_BUFFER_CAPACITY`] if it has not
    /// been registered.
    ///
    /// # Panics
    ///
    /// Panics if a chunk iterator of the world is open, or if `T` is registered as a non-buffer
    /// component.
    pub fn add_buffer<T: BufferElement>(
        &mut self,
        entity: Entity,
        elements: &[T],
    ) -> Result<(), EntityAccessError> {
        self.storage.assert_structural_change_allowed();
        let location = self.resolve(entity)?;
        let meta = self.buffer_meta::<T>();
        let inline_capacity = meta.buffer_capacity().unwrap_or(0);
        let version = self.version;

        let fill = move |chunk: &mut Chunk, row: usize| {
            let field = match chunk.schema().field_index(ComponentTypeId::of::<T>()) {
                Some(field) => field,
                None => return,
            };
            let ptr = chunk.row_ptr(&chunk.schema().fields()[field], row);
            // safety: the row holds an initialized buffer of T and the chunk is mutably borrowed
            let mut buffer =
                unsafe { BufferMut::<T>::from_row(ptr, inline_capacity, Exclusive::untracked()) };
            buffer.clear();
            buffer.extend_from_slice(elements);
            chunk.set_version(field, version);
        };

        let chunk = live_chunk(&mut self.storage, location.chunk());
        if chunk.schema().contains(meta.type_id()) {
            fill(chunk, location.row());
            return Ok(());
        }

        let mut metas: ComponentMetas = chunk
            .schema()
            .fields()
            .iter()
            .map(|field| *field.meta())
            .collect();
        metas.push(meta);
        let target = self.archetype_for(&metas);
        let shared = self.shared_values_for(target, self.chunk_of(location), &[]);
        self.move_entity(entity, location, target, &shared, fill);
        Ok(())
    }

    /// Returns a random-access lookup for the `T` components of entities.
    pub fn lookup<T: Component>(&self) -> ComponentLookup<'_, T> {
        ComponentLookup::new(self)
    }

    /// Returns a random-access lookup for reading and writing the `T` components of entities.
    pub fn lookup_mut<T: Component>(&self) -> ComponentLookupMut<'_, T> {
        ComponentLookupMut::new(self)
    }

    /// Returns a random-access lookup for the `T` buffers of entities.
    pub fn buffer_lookup<T: BufferElement>(&self) -> BufferLookup<'_, T> {
        BufferLookup::new(self)
    }

    /// Borrows the `T` component of an entity.
    pub fn get<T: Component>(&self, entity: Entity) -> Result<Ref<'_, T>, EntityAccessError> {
        ComponentLookup::new(self).get(entity)
    }

    /// Returns the value of the shared component `S` of an entity.
    pub fn get_shared<S: SharedComponent>(&self, entity: Entity) -> Result<&S, EntityAccessError> {
        let location = self.resolve(entity)?;
        let chunk = self
            .storage
            .chunk(location.chunk())
            .ok_or(EntityAccessError::EntityNotFound)?;
        let slot = chunk
            .schema()
            .field(ComponentTypeId::of::<S>())
            .and_then(|field| field.shared_slot())
            .ok_or(EntityAccessError::ComponentNotFound)?;
        self.shared
            .get::<S>(chunk.shared_values()[slot])
            .ok_or(EntityAccessError::ComponentNotFound)
    }

    /// Returns `true` if the entity's `T` component is enabled. Components which are not
    /// enableable are always enabled.
    pub fn is_enabled<T: Component>(&self, entity: Entity) -> Result<bool, EntityAccessError> {
        ComponentLookup::<T>::new(self).is_enabled(entity)
    }

    /// Enables or disables the entity's `T` component. Returns `true` if the state changed.
    ///
    /// # Panics
    ///
    /// Panics if `T` is not an enableable component.
    pub fn set_enabled<T: Component>(
        &mut self,
        entity: Entity,
        enabled: bool,
    ) -> Result<bool, EntityAccessError> {
        ComponentLookupMut::<T>::new(self).set_enabled(entity, enabled)
    }
}

impl Drop for World {
    fn drop(&mut self) {
        debug!(
            world = self.id.0,
            entities = self.entities.len(),
            archetypes = self.storage.archetypes().len(),
            "Dropping world"
        );
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Clone, Copy, Debug, PartialEq)]
    struct Pos(f32, f32);
    #[derive(Clone, Copy, Debug, PartialEq)]
    struct Rot(f32);
    #[derive(Clone, Debug, PartialEq, Eq, Hash)]
    struct Team(u8);

    #[test]
    fn spawn_and_get() {
        let _ = tracing_subscriber::fmt::try_init();

        let mut world = World::default();
        let entity = world.spawn((Pos(1., 2.), Rot(3.)));
        assert_eq!(world.len(), 1);
        assert_eq!(*world.get::<Pos>(entity).unwrap(), Pos(1., 2.));
        assert_eq!(*world.get::<Rot>(entity).unwrap(), Rot(3.));
        assert_eq!(
            world.get::<u32>(entity).unwrap_err(),
            EntityAccessError::ComponentNotFound
        );
    }

    #[test]
    fn despawn_moves_last_row() {
        let mut world = World::default();
        let entities = world.extend((0..3).map(|i| (Pos(i as f32, 0.),))).to_vec();
        assert!(world.despawn(entities[0]));
        assert!(!world.despawn(entities[0]));
        assert!(!world.exists(entities[0]));

        assert_eq!(world.location(entities[2]).unwrap().row(), 0);
        assert_eq!(*world.get::<Pos>(entities[2]).unwrap(), Pos(2., 0.));
        assert_eq!(*world.get::<Pos>(entities[1]).unwrap(), Pos(1., 0.));
    }

    #[test]
    fn empty_chunks_are_released() {
        let mut world = World::default();
        let entity = world.spawn((Pos(0., 0.),));
        let generation = world.storage().generation();
        assert_eq!(world.storage().chunk_count(), 1);

        world.despawn(entity);
        assert_eq!(world.storage().chunk_count(), 0);
        assert!(world.storage().generation() > generation);
    }

    #[test]
    fn add_and_remove_component() {
        let mut world = World::default();
        let entity = world.spawn((Pos(1., 1.),));
        world.add_component(entity, Rot(0.5)).unwrap();
        assert_eq!(*world.get::<Pos>(entity).unwrap(), Pos(1., 1.));
        assert_eq!(*world.get::<Rot>(entity).unwrap(), Rot(0.5));

        world.add_component(entity, Rot(0.7)).unwrap();
        assert_eq!(*world.get::<Rot>(entity).unwrap(), Rot(0.7));

        world.remove_component::<Pos>(entity).unwrap();
        assert_eq!(
            world.get::<Pos>(entity).unwrap_err(),
            EntityAccessError::ComponentNotFound
        );
        assert_eq!(
            world.remove_component::<Pos>(entity).unwrap_err(),
            EntityAccessError::ComponentNotFound
        );
        assert_eq!(*world.get::<Rot>(entity).unwrap(), Rot(0.7));
    }

    #[test]
    fn shared_values_split_chunks() {
        let mut world = World::default();
        let red = world.extend_shared(Team(0), (0..3).map(|_| (Pos(0., 0.),))).to_vec();
        world.extend_shared(Team(1), (0..3).map(|_| (Pos(0., 0.),)));
        assert_eq!(world.storage().archetypes().len(), 1);
        assert_eq!(world.storage().chunk_count(), 2);
        assert_eq!(world.get_shared::<Team>(red[0]).unwrap(), &Team(0));

        world.set_shared(red[0], Team(1)).unwrap();
        assert_eq!(world.get_shared::<Team>(red[0]).unwrap(), &Team(1));
        assert_eq!(world.storage().chunk_count(), 2);
        assert_eq!(world.shared_values().len(), 2);
    }

    #[test]
    fn versions_wrap_past_zero() {
        let mut world = World::default();
        world.version = Version::MAX;
        assert_eq!(world.increment_version(), 1);
    }

    #[test]
    fn removed_components_are_dropped() {
        use std::sync::Arc;

        let mut world = World::default();
        let counter = Arc::new(());
        let entity = world.spawn((counter.clone(), Pos(0., 0.)));
        assert_eq!(Arc::strong_count(&counter), 2);

        world.remove_component::<Arc<()>>(entity).unwrap();
        assert_eq!(Arc::strong_count(&counter), 1);

        world.add_component(entity, counter.clone()).unwrap();
        assert_eq!(Arc::strong_count(&counter), 2);
        drop(world);
        assert_eq!(Arc::strong_count(&counter), 1);
    }

    struct HalfWritten(Pos);

    impl ComponentSet for HalfWritten {
        fn component_metas(registry: &mut TypeRegistry, metas: &mut ComponentMetas) {
            metas.push(data_meta::<Pos>(registry));
            metas.push(data_meta::<Rot>(registry));
        }

        fn write_row(self, writer: &mut RowWriter) {
            writer.write(self.0);
            panic!("failed to produce Rot");
        }
    }

    #[test]
    fn panicking_row_writes_are_rolled_back() {
        use std::panic::{catch_unwind, AssertUnwindSafe};

        let _ = tracing_subscriber::fmt::try_init();

        let mut world = World::default();
        let kept = world.spawn((Pos(1., 1.), Rot(1.)));
        let result = catch_unwind(AssertUnwindSafe(|| {
            world.spawn(HalfWritten(Pos(2., 2.)));
        }));
        assert!(result.is_err());

        assert_eq!(world.len(), 1);
        let chunk = world
            .storage()
            .chunk(world.location(kept).unwrap().chunk())
            .unwrap();
        assert_eq!(chunk.entities(), &[kept]);
        let archetype = &world.storage().archetypes()[chunk.archetype()];
        assert_eq!(archetype.entity_count(), 1);

        // the abandoned row's slot is reused
        let next = world.spawn((Pos(3., 3.), Rot(3.)));
        assert_eq!(world.location(next).unwrap().row(), 1);
        assert_eq!(*world.get::<Pos>(next).unwrap(), Pos(3., 3.));
        assert!(world.despawn(kept));
        assert!(world.despawn(next));
        assert_eq!(world.storage().chunk_count(), 0);
    }
}
