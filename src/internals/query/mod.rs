//! Queries match archetypes by component predicates and iterate their chunks.
//!
//! A [`QueryDesc`] is compiled by [`World::compile_query`] into a [`Query`]. The query holds
//! the world's interned [`QueryDescriptor`] plus a per-execution [`Filter`], and can then walk
//! the matched chunks either as a stream of [`ChunkView`]s or as a prebuilt [`ChunkList`].

use crate::internals::{
    entity::Entity,
    storage::{
        chunk::{Chunk, Version},
        component::{Component, ComponentKind, ComponentTypeId, SharedComponent},
        IterationToken,
    },
    world::{World, WorldId},
};
use cache::{build_chunk_list, has_enabled_rows, CachedChunk, ChunkCache};
use descriptor::{
    Access, ComponentAccess, DescriptorId, MatchingArchetype, QueryDescriptor, QueryOptions,
};
use filter::{Filter, SharedFilter, MAX_CHANGED_FILTERS, MAX_SHARED_FILTERS};
use iter::ChunkIter;
use std::{slice::Iter, sync::Arc};
use view::ChunkView;

pub mod cache;
pub mod descriptor;
pub mod filter;
pub mod iter;
pub mod view;

/// Error type representing a malformed query or filter.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryError {
    /// Exclude access was requested outside of the `none` list.
    #[error("component {0} requests exclude access outside of the none list")]
    SubtractiveAccess(ComponentTypeId),
    /// A component type appears more than once across the query's lists.
    #[error("component {0} appears more than once in the query")]
    DuplicateComponent(ComponentTypeId),
    /// Too many shared value requirements.
    #[error("a query filter may require at most {0} shared component values")]
    TooManySharedFilters(usize),
    /// Too many change checks.
    #[error("a query filter may check at most {0} components for changes")]
    TooManyChangeFilters(usize),
    /// A shared value was required for a component which is not a shared component of the
    /// query's `all` list.
    #[error("component {0} is not a shared component required by the query")]
    NotSharedComponent(ComponentTypeId),
    /// A change check was requested for a component which the query does not access.
    #[error("component {0} is not accessed by the query")]
    ComponentNotInQuery(ComponentTypeId),
}

/// Describes which archetypes a query matches and how it accesses their components.
///
/// ```
/// # use tessera::*;
/// struct Position(f32);
/// struct Velocity(f32);
/// struct Frozen;
///
/// let desc = QueryDesc::new()
///     .write::<Position>()
///     .read::<Velocity>()
///     .none::<Frozen>();
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryDesc {
    pub(crate) all: Vec<ComponentAccess>,
    pub(crate) any: Vec<ComponentAccess>,
    pub(crate) none: Vec<ComponentAccess>,
    pub(crate) options: QueryOptions,
}

impl QueryDesc {
    /// Constructs an empty query description, which matches every untagged archetype.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires `T` and reads it.
    pub fn read<T: Component>(self) -> Self {
        self.all_of(ComponentTypeId::of::<T>(), Access::Read)
    }

    /// Requires `T` and writes it.
    pub fn write<T: Component>(self) -> Self {
        self.all_of(ComponentTypeId::of::<T>(), Access::Write)
    }

    /// Adds `T` to the components of which at least one must be present, reading it.
    pub fn any_read<T: Component>(self) -> Self {
        self.any_of(ComponentTypeId::of::<T>(), Access::Read)
    }

    /// Adds `T` to the components of which at least one must be present, writing it.
    pub fn any_write<T: Component>(self) -> Self {
        self.any_of(ComponentTypeId::of::<T>(), Access::Write)
    }

    /// Requires `T` to be absent.
    pub fn none<T: Component>(self) -> Self {
        self.none_of(ComponentTypeId::of::<T>(), Access::Exclude)
    }

    /// Adds an entry to the `all` list.
    pub fn all_of(mut self, type_id: ComponentTypeId, access: Access) -> Self {
        self.all.push(ComponentAccess::new(type_id, access));
        self
    }

    /// Adds an entry to the `any` list.
    pub fn any_of(mut self, type_id: ComponentTypeId, access: Access) -> Self {
        self.any.push(ComponentAccess::new(type_id, access));
        self
    }

    /// Adds an entry to the `none` list.
    pub fn none_of(mut self, type_id: ComponentTypeId, access: Access) -> Self {
        self.none.push(ComponentAccess::new(type_id, access));
        self
    }

    /// Sets the query options.
    pub fn with_options(mut self, options: QueryOptions) -> Self {
        self.options = options;
        self
    }
}

/// A compiled query bound to the world it was compiled for.
#[derive(Debug, Clone)]
pub struct Query {
    world: WorldId,
    id: DescriptorId,
    descriptor: Arc<QueryDescriptor>,
    filter: Filter,
}

impl Query {
    pub(crate) fn new(world: WorldId, id: DescriptorId, descriptor: Arc<QueryDescriptor>) -> Self {
        Self {
            world,
            id,
            descriptor,
            filter: Filter::default(),
        }
    }

    /// Returns the interned descriptor. Equivalent queries compiled on the same world share it.
    pub fn descriptor(&self) -> &Arc<QueryDescriptor> {
        &self.descriptor
    }

    /// Returns the descriptor's handle in its world.
    pub fn id(&self) -> DescriptorId {
        self.id
    }

    /// Returns the run-time filter.
    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    fn validate_world(&self, world: &World) {
        assert!(
            self.world == world.id(),
            "query was compiled for a different world"
        );
    }

    /// Requires the chunk's `S` value to equal `value`.
    ///
    /// `S` must be a shared component in the query's `all` list. Setting a second value for the
    /// same component replaces the first.
    pub fn set_shared_filter<S: SharedComponent>(
        &mut self,
        world: &World,
        value: &S,
    ) -> Result<(), QueryError> {
        self.validate_world(world);
        let type_id = ComponentTypeId::of::<S>();
        let is_shared = world
            .registry()
            .meta(type_id)
            .map(|meta| meta.kind() == ComponentKind::Shared)
            .unwrap_or(false);
        let required = self.descriptor.all().iter().any(|e| e.type_id == type_id);
        if !is_shared || !required {
            return Err(QueryError::NotSharedComponent(type_id));
        }

        let filter = SharedFilter {
            type_id,
            value: world.shared_values().find(value),
        };
        match self.filter.shared.iter().position(|f| f.type_id == type_id) {
            Some(i) => self.filter.shared[i] = filter,
            None if self.filter.shared.len() < MAX_SHARED_FILTERS => {
                self.filter.shared.push(filter)
            }
            None => return Err(QueryError::TooManySharedFilters(MAX_SHARED_FILTERS)),
        }
        Ok(())
    }

    /// Only passes chunks in which `T` (or another checked component) was written after `since`.
    ///
    /// All change checks of a query share the same `since` version.
    pub fn set_changed_filter<T: Component>(&mut self, since: Version) -> Result<(), QueryError> {
        let type_id = ComponentTypeId::of::<T>();
        if self.descriptor.column_position(type_id).is_none() {
            return Err(QueryError::ComponentNotInQuery(type_id));
        }

        if !self.filter.changed.contains(&type_id) {
            if self.filter.changed.len() >= MAX_CHANGED_FILTERS {
                return Err(QueryError::TooManyChangeFilters(MAX_CHANGED_FILTERS));
            }
            self.filter.changed.push(type_id);
        }
        self.filter.since = since;
        Ok(())
    }

    /// Also passes chunks whose rows were added or removed after `since`.
    pub fn set_order_filter(&mut self, since: Version) {
        self.filter.order_dependent = true;
        self.filter.since = since;
    }

    /// Removes all run-time filtering.
    pub fn reset_filter(&mut self) {
        self.filter = Filter::default();
    }

    /// Returns the archetypes matched by the query, in archetype creation order.
    pub fn matches<'a>(&self, world: &'a World) -> &'a [MatchingArchetype] {
        self.validate_world(world);
        world.descriptors().matches(self.id)
    }

    pub(crate) fn cached_chunks(&self, world: &World) -> Arc<[CachedChunk]> {
        let state = world.descriptors().state(self.id);
        ChunkCache::entries(&state.cache, &state.matches, world.storage())
    }

    /// Iterates through every matching chunk, yielding one view per contiguous run of rows which
    /// pass the query's enable bits.
    ///
    /// Structural changes to the world panic while the iterator is alive.
    pub fn iter_chunks<'a>(&'a self, world: &'a World) -> ChunkIter<'a> {
        self.validate_world(world);
        ChunkIter::new(self, world, self.cached_chunks(world))
    }

    /// Builds a dense list of every matching chunk which passes the filter and has at least one
    /// enabled row.
    ///
    /// Structural changes to the world panic while the list is alive.
    pub fn chunk_list(&self, world: &World) -> ChunkList {
        self.validate_world(world);
        let token = world.storage().iteration_token();
        let matches = world.descriptors().matches(self.id);
        let filtered = self.filter.is_active() || matches.iter().any(|m| m.has_enable_bits());

        let chunks = if filtered {
            let filter = &self.filter;
            let predicate = move |chunk: &Chunk, matching: &MatchingArchetype| {
                filter.matches_chunk(chunk) && has_enabled_rows(chunk, matching)
            };
            build_chunk_list(matches, world.storage(), Some(&predicate))
        } else {
            build_chunk_list(matches, world.storage(), None)
        };

        ChunkList {
            world: self.world,
            chunks,
            _token: token,
        }
    }

    /// Returns a view over every row of a listed chunk.
    ///
    /// Returns `None` if the chunk no longer exists or is not matched by the query.
    pub fn chunk<'a>(&'a self, world: &'a World, entry: &CachedChunk) -> Option<ChunkView<'a>> {
        self.validate_world(world);
        let chunk = world.storage().chunk(entry.chunk())?;
        let matching = world
            .descriptors()
            .state(self.id)
            .matching(chunk.archetype())?;
        Some(ChunkView::new(
            chunk,
            matching,
            &self.descriptor,
            world,
            0..chunk.len(),
        ))
    }

    /// Counts the rows which pass the query.
    pub fn count(&self, world: &World) -> usize {
        self.iter_chunks(world).map(|view| view.range().len()).sum()
    }

    /// Returns `true` if no rows pass the query.
    pub fn is_empty(&self, world: &World) -> bool {
        self.iter_chunks(world).next().is_none()
    }

    /// Collects the entities of every row which passes the query, in iteration order.
    pub fn to_entities(&self, world: &World) -> Vec<Entity> {
        let mut entities = Vec::new();
        for view in self.iter_chunks(world) {
            entities.extend_from_slice(&view.entities()[view.range()]);
        }
        entities
    }

    /// Calls `f` with every view yielded by [`iter_chunks`](Self::iter_chunks).
    pub fn for_each_chunk<'a, Body>(&'a self, world: &'a World, mut f: Body)
    where
        Body: FnMut(ChunkView<'a>),
    {
        for view in self.iter_chunks(world) {
            f(view);
        }
    }

    /// Calls `f` in parallel with a view for every contiguous run of passing rows.
    ///
    /// Views of different chunks are processed concurrently; column borrows are still checked.
    #[cfg(feature = "parallel")]
    pub fn par_for_each_chunk<'a, Body>(&'a self, world: &'a World, f: Body)
    where
        Body: Fn(ChunkView<'a>) + Send + Sync,
    {
        use crate::internals::storage::enable::EnabledRanges;
        use descriptor::RowSelection;
        use rayon::prelude::*;

        let list = self.chunk_list(world);
        list.chunks.par_iter().for_each(|entry| {
            let view = match self.chunk(world, entry) {
                Some(view) => view,
                None => return,
            };
            if !view.matching().has_enable_bits() {
                return f(view);
            }
            match view.matching().select_rows(view.chunk()) {
                RowSelection::All => f(view),
                RowSelection::Empty => {}
                RowSelection::Mask(mask) => {
                    for range in EnabledRanges::new(mask) {
                        f(view.with_range(range));
                    }
                }
            }
        });
    }
}

/// A dense, ordered list of the chunks matched by a query.
///
/// The world refuses structural changes while the list is alive.
#[derive(Debug)]
pub struct ChunkList {
    world: WorldId,
    chunks: Vec<CachedChunk>,
    _token: IterationToken,
}

impl ChunkList {
    /// Returns the world the list was built from.
    pub fn world(&self) -> WorldId {
        self.world
    }

    /// Returns the number of chunks.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Returns `true` if no chunks matched.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Returns the listed chunks.
    pub fn as_slice(&self) -> &[CachedChunk] {
        &self.chunks
    }

    /// Iterates over the listed chunks.
    pub fn iter(&self) -> Iter<'_, CachedChunk> {
        self.chunks.iter()
    }
}

impl<'a> IntoIterator for &'a ChunkList {
    type Item = &'a CachedChunk;
    type IntoIter = Iter<'a, CachedChunk>;

    fn into_iter(self) -> Self::IntoIter {
        self.chunks.iter()
    }
}
