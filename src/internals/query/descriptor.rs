//! Canonical, content-addressed query descriptors and their archetype matches.
//!
//! A [`QueryDesc`](super::QueryDesc) is compiled into a [`QueryDescriptor`]: the predicate with
//! write groups expanded and every list sorted. Descriptors are interned per world by content,
//! so permuted but equivalent queries share one descriptor, one set of archetype matches and one
//! chunk cache.

use super::{cache::ChunkCache, filter::FilterResult, filter::LayoutFilter, QueryDesc, QueryError};
use crate::internals::{
    hash::U64BuildHasher,
    permissions::Permissions,
    storage::{
        archetype::{Archetype, ArchetypeIndex},
        chunk::Chunk,
        component::{ChunkHeader, ComponentTypeId, Disabled, Prefab},
        enable::row_mask,
        registry::TypeRegistry,
        Storage,
    },
};
use bit_set::BitSet;
use parking_lot::RwLock;
use smallvec::SmallVec;
use std::{
    collections::{hash_map::DefaultHasher, HashMap},
    hash::{Hash, Hasher},
    sync::Arc,
};
use tracing::debug;

/// How a query accesses a component type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Access {
    /// The component is read.
    Read,
    /// The component is read and written.
    Write,
    /// The component must be absent. Only valid in the `none` list.
    Exclude,
}

/// A component type paired with the access a query requests for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentAccess {
    /// The component type.
    pub type_id: ComponentTypeId,
    /// The requested access.
    pub access: Access,
}

impl ComponentAccess {
    /// Constructs a new component access.
    pub fn new(type_id: ComponentTypeId, access: Access) -> Self {
        Self { type_id, access }
    }
}

/// Options which alter how a query matches archetypes and rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct QueryOptions {
    /// Excludes archetypes holding write-group dependents of the written components.
    pub filter_write_group: bool,
    /// Matches archetypes carrying the [`Disabled`] tag.
    pub include_disabled: bool,
    /// Matches archetypes carrying the [`Prefab`] tag.
    pub include_prefab: bool,
    /// Ignores per-row enable bits.
    pub ignore_enabled_state: bool,
}

type AccessList = SmallVec<[ComponentAccess; 4]>;

/// A compiled, canonical query predicate.
#[derive(Debug)]
pub struct QueryDescriptor {
    all: AccessList,
    any: AccessList,
    none: AccessList,
    implied: SmallVec<[ComponentTypeId; 4]>,
    options: QueryOptions,
    permissions: Permissions<ComponentTypeId>,
    columns: SmallVec<[ComponentTypeId; 8]>,
    hash: u64,
}

impl QueryDescriptor {
    /// Validates and canonicalizes a query description.
    pub fn compile(desc: &QueryDesc, registry: &TypeRegistry) -> Result<Self, QueryError> {
        let mut seen = SmallVec::<[ComponentTypeId; 8]>::new();
        for entry in desc.all.iter().chain(desc.any.iter()) {
            if entry.access == Access::Exclude {
                return Err(QueryError::SubtractiveAccess(entry.type_id));
            }
        }
        for entry in desc.all.iter().chain(desc.any.iter()).chain(desc.none.iter()) {
            if seen.contains(&entry.type_id) {
                return Err(QueryError::DuplicateComponent(entry.type_id));
            }
            seen.push(entry.type_id);
        }

        let all: AccessList = desc.all.iter().copied().collect();
        let any: AccessList = desc.any.iter().copied().collect();
        let mut none: AccessList = desc
            .none
            .iter()
            .map(|entry| ComponentAccess::new(entry.type_id, Access::Read))
            .collect();

        let mut implied = SmallVec::<[ComponentTypeId; 4]>::new();
        if desc.options.filter_write_group {
            let explicit = |type_id: ComponentTypeId,
                            none: &AccessList,
                            implied: &SmallVec<[ComponentTypeId; 4]>| {
                seen.contains(&type_id)
                    || none.iter().any(|entry| entry.type_id == type_id)
                    || implied.contains(&type_id)
            };

            // readers see through write groups: dependents of read components are allowed
            let mut visited = BitSet::new();
            let mut stack: SmallVec<[ComponentTypeId; 8]> = all
                .iter()
                .chain(any.iter())
                .filter(|entry| entry.access == Access::Read)
                .map(|entry| entry.type_id)
                .collect();
            while let Some(type_id) = stack.pop() {
                let index = match registry.index_of(type_id) {
                    Some(index) => index,
                    None => continue,
                };
                if !visited.insert(index) {
                    continue;
                }
                for dependent in registry.write_group(type_id) {
                    if !explicit(dependent, &none, &implied) {
                        implied.push(dependent);
                    }
                    stack.push(dependent);
                }
            }

            // writers are overridden by their write group dependents
            for entry in all.iter().chain(any.iter()) {
                if entry.access != Access::Write {
                    continue;
                }
                for dependent in registry.write_group(entry.type_id) {
                    if !explicit(dependent, &none, &implied) {
                        none.push(ComponentAccess::new(dependent, Access::Read));
                    }
                }
            }
        }

        Ok(Self::from_parts(all, any, none, implied, desc.options))
    }

    fn from_parts(
        mut all: AccessList,
        mut any: AccessList,
        mut none: AccessList,
        mut implied: SmallVec<[ComponentTypeId; 4]>,
        options: QueryOptions,
    ) -> Self {
        all.sort();
        any.sort();
        none.sort();
        implied.sort();

        let mut permissions = Permissions::new();
        for entry in all.iter().chain(any.iter()) {
            match entry.access {
                Access::Write => permissions.push_write(entry.type_id),
                _ => permissions.push_read(entry.type_id),
            }
        }
        for type_id in &implied {
            permissions.push_read(*type_id);
        }

        let columns = all
            .iter()
            .chain(any.iter())
            .map(|entry| entry.type_id)
            .collect();

        let mut hasher = DefaultHasher::new();
        all.hash(&mut hasher);
        any.hash(&mut hasher);
        none.hash(&mut hasher);
        implied.hash(&mut hasher);
        options.hash(&mut hasher);

        Self {
            all,
            any,
            none,
            implied,
            options,
            permissions,
            columns,
            hash: hasher.finish(),
        }
    }

    /// Returns the sorted components which must all be present.
    pub fn all(&self) -> &[ComponentAccess] {
        &self.all
    }

    /// Returns the sorted components of which at least one must be present.
    pub fn any(&self) -> &[ComponentAccess] {
        &self.any
    }

    /// Returns the sorted components which must be absent.
    pub fn none(&self) -> &[ComponentAccess] {
        &self.none
    }

    /// Returns the write-group dependents of read components, which are exempt from exclusion.
    pub fn implied(&self) -> &[ComponentTypeId] {
        &self.implied
    }

    /// Returns the query options.
    pub fn options(&self) -> QueryOptions {
        self.options
    }

    /// Returns the components the query reads and writes.
    pub fn permissions(&self) -> &Permissions<ComponentTypeId> {
        &self.permissions
    }

    /// Returns the components of `all` followed by those of `any`.
    pub fn columns(&self) -> &[ComponentTypeId] {
        &self.columns
    }

    /// Returns the position of a component in [`columns`](Self::columns).
    pub fn column_position(&self, type_id: ComponentTypeId) -> Option<usize> {
        self.columns.iter().position(|t| *t == type_id)
    }

    /// Returns the content hash of the descriptor.
    pub fn content_hash(&self) -> u64 {
        self.hash
    }

    /// Returns `true` if both descriptors describe the same canonical predicate.
    pub fn is_equivalent(&self, other: &Self) -> bool {
        self.all == other.all
            && self.any == other.any
            && self.none == other.none
            && self.implied == other.implied
            && self.options == other.options
    }

    fn tag_allowed(
        &self,
        components: &[ComponentTypeId],
        tag: ComponentTypeId,
        option: bool,
    ) -> bool {
        option
            || !components.contains(&tag)
            || self.all.iter().any(|entry| entry.type_id == tag)
    }
}

impl LayoutFilter for QueryDescriptor {
    fn matches_layout(&self, components: &[ComponentTypeId]) -> FilterResult {
        let has = |entry: &ComponentAccess| components.contains(&entry.type_id);

        let matches = self.all.iter().all(has)
            && !self.none.iter().any(has)
            && (self.any.is_empty() || self.any.iter().any(has))
            && self.tag_allowed(
                components,
                ComponentTypeId::of::<Disabled>(),
                self.options.include_disabled,
            )
            && self.tag_allowed(
                components,
                ComponentTypeId::of::<Prefab>(),
                self.options.include_prefab,
            )
            && self.tag_allowed(components, ComponentTypeId::of::<ChunkHeader>(), false);

        FilterResult::Match(matches)
    }
}

/// Which rows of a chunk pass the enable bits of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowSelection {
    /// Every row passes.
    All,
    /// No row passes.
    Empty,
    /// Only the rows whose bits are set pass.
    Mask(u128),
}

/// The result of matching a descriptor against one archetype.
#[derive(Debug, Clone)]
pub struct MatchingArchetype {
    archetype: ArchetypeIndex,
    columns: SmallVec<[Option<usize>; 8]>,
    enable_all: SmallVec<[usize; 2]>,
    enable_any: SmallVec<[usize; 2]>,
    any_always: bool,
}

impl MatchingArchetype {
    fn new(descriptor: &QueryDescriptor, archetype: &Archetype) -> Self {
        let schema = archetype.schema();
        let columns = descriptor
            .columns
            .iter()
            .map(|type_id| schema.field_index(*type_id))
            .collect();

        let ignore = descriptor.options.ignore_enabled_state;
        let enable_slot = |entry: &ComponentAccess| {
            if ignore {
                None
            } else {
                schema.field(entry.type_id).and_then(|field| field.enable_slot())
            }
        };

        let enable_all = descriptor.all.iter().filter_map(enable_slot).collect();
        let enable_any: SmallVec<[usize; 2]> =
            descriptor.any.iter().filter_map(enable_slot).collect();

        // a present, non-enableable any component satisfies the any clause for every row
        let any_always = ignore
            || descriptor.any.iter().any(|entry| {
                schema
                    .field(entry.type_id)
                    .map(|field| field.enable_slot().is_none())
                    .unwrap_or(false)
            });

        Self {
            archetype: archetype.index(),
            columns,
            enable_all,
            enable_any,
            any_always,
        }
    }

    /// Returns the matched archetype.
    pub fn archetype(&self) -> ArchetypeIndex {
        self.archetype
    }

    /// Returns the archetype field index of each descriptor column, `None` where the archetype
    /// lacks the component.
    pub fn columns(&self) -> &[Option<usize>] {
        &self.columns
    }

    /// Returns `true` if rows of the archetype are filtered by enable bits.
    pub fn has_enable_bits(&self) -> bool {
        !self.enable_all.is_empty() || (!self.any_always && !self.enable_any.is_empty())
    }

    /// Computes which rows of a chunk of this archetype pass the enable bits.
    ///
    /// The mask is the intersection of the enable bits of every enableable `all` column, further
    /// intersected with the union of the enableable `any` columns when no other `any` component
    /// is present.
    pub fn select_rows(&self, chunk: &Chunk) -> RowSelection {
        let count = chunk.len();
        if count == 0 {
            return RowSelection::Empty;
        }

        let full = row_mask(count);
        let mut mask = full;
        for slot in &self.enable_all {
            let bits = chunk.enable_bits(*slot);
            match bits.disabled_count() {
                0 => continue,
                disabled if disabled >= count => return RowSelection::Empty,
                _ => mask &= bits.mask(),
            }
        }

        if !self.any_always && !self.enable_any.is_empty() {
            let mut any_mask = 0;
            for slot in &self.enable_any {
                let bits = chunk.enable_bits(*slot);
                if bits.disabled_count() == 0 {
                    any_mask = full;
                    break;
                }
                any_mask |= bits.mask();
            }
            mask &= any_mask;
        }

        mask &= full;
        if mask == full {
            RowSelection::All
        } else if mask == 0 {
            RowSelection::Empty
        } else {
            RowSelection::Mask(mask)
        }
    }
}

/// A handle to a descriptor interned in a world's [`DescriptorCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorId(pub(crate) u32);

pub(crate) struct DescriptorState {
    pub(crate) descriptor: Arc<QueryDescriptor>,
    pub(crate) matches: Vec<MatchingArchetype>,
    pub(crate) cache: RwLock<ChunkCache>,
    seen: usize,
}

/// Interns query descriptors and keeps their archetype matches current.
#[derive(Default)]
pub struct DescriptorCache {
    states: Vec<DescriptorState>,
    lookup: HashMap<u64, SmallVec<[DescriptorId; 1]>, U64BuildHasher>,
}

impl DescriptorCache {
    /// Returns the number of interned descriptors.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Returns `true` if no descriptors have been interned.
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Returns the interned descriptor equivalent to `descriptor`, interning it and matching it
    /// against every archetype if it is new.
    pub(crate) fn get_or_insert(
        &mut self,
        descriptor: QueryDescriptor,
        storage: &Storage,
    ) -> (DescriptorId, Arc<QueryDescriptor>) {
        let candidates = self.lookup.entry(descriptor.hash).or_default();
        for id in candidates.iter() {
            let existing = &self.states[id.0 as usize].descriptor;
            if existing.is_equivalent(&descriptor) {
                return (*id, existing.clone());
            }
        }

        let id = DescriptorId(self.states.len() as u32);
        candidates.push(id);

        let descriptor = Arc::new(descriptor);
        let mut state = DescriptorState {
            descriptor: descriptor.clone(),
            matches: Vec::new(),
            cache: RwLock::new(ChunkCache::default()),
            seen: 0,
        };
        state.update(storage);

        debug!(
            descriptor = id.0,
            all = descriptor.all.len(),
            any = descriptor.any.len(),
            none = descriptor.none.len(),
            matched = state.matches.len(),
            "Compiled query descriptor"
        );

        self.states.push(state);
        (id, descriptor)
    }

    /// Offers every archetype created since the last call to every descriptor.
    pub(crate) fn update(&mut self, storage: &Storage) {
        for state in &mut self.states {
            state.update(storage);
        }
    }

    /// Returns the descriptor with the given handle.
    pub fn descriptor(&self, id: DescriptorId) -> &Arc<QueryDescriptor> {
        &self.states[id.0 as usize].descriptor
    }

    /// Returns the archetypes matched by a descriptor, in archetype creation order.
    pub fn matches(&self, id: DescriptorId) -> &[MatchingArchetype] {
        &self.states[id.0 as usize].matches
    }

    pub(crate) fn state(&self, id: DescriptorId) -> &DescriptorState {
        &self.states[id.0 as usize]
    }
}

impl std::fmt::Debug for DescriptorCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorCache")
            .field("descriptors", &self.states.len())
            .finish()
    }
}

impl DescriptorState {
    fn update(&mut self, storage: &Storage) {
        let archetypes = storage.archetypes();
        for index in storage
            .layout_index()
            .search_from(&*self.descriptor, self.seen)
        {
            self.matches
                .push(MatchingArchetype::new(&self.descriptor, &archetypes[index]));
        }
        self.seen = archetypes.len();
    }

    /// Finds the match record of an archetype.
    pub(crate) fn matching(&self, archetype: ArchetypeIndex) -> Option<&MatchingArchetype> {
        self.matches
            .binary_search_by_key(&archetype, |m| m.archetype)
            .ok()
            .map(|i| &self.matches[i])
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::internals::storage::{archetype::ArchetypeSchema, component::ComponentMeta};

    struct A;
    struct B;
    struct C;
    struct Translation;
    struct LocalToWorld;
    struct Parent;

    fn id<T: 'static + Send + Sync>() -> ComponentTypeId {
        ComponentTypeId::of::<T>()
    }

    fn compile(desc: &QueryDesc, registry: &TypeRegistry) -> QueryDescriptor {
        QueryDescriptor::compile(desc, registry).unwrap()
    }

    #[test]
    fn exclude_outside_none_is_rejected() {
        let registry = TypeRegistry::new();
        let desc = QueryDesc::new().all_of(id::<A>(), Access::Exclude);
        assert_eq!(
            QueryDescriptor::compile(&desc, &registry).unwrap_err(),
            QueryError::SubtractiveAccess(id::<A>())
        );
    }

    #[test]
    fn duplicate_component_is_rejected() {
        let registry = TypeRegistry::new();
        let desc = QueryDesc::new().read::<A>().none::<A>();
        assert_eq!(
            QueryDescriptor::compile(&desc, &registry).unwrap_err(),
            QueryError::DuplicateComponent(id::<A>())
        );
    }

    #[test]
    fn none_is_forced_to_read() {
        let registry = TypeRegistry::new();
        let desc = QueryDesc::new()
            .read::<A>()
            .none_of(id::<B>(), Access::Write);
        let descriptor = compile(&desc, &registry);
        assert_eq!(descriptor.none()[0].access, Access::Read);
        assert!(!descriptor.permissions().allows_read(&id::<B>()));
    }

    #[test]
    fn permuted_lists_are_equivalent() {
        let registry = TypeRegistry::new();
        let a = compile(&QueryDesc::new().read::<A>().write::<B>().none::<C>(), &registry);
        let b = compile(&QueryDesc::new().write::<B>().none::<C>().read::<A>(), &registry);
        assert!(a.is_equivalent(&b));
        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn write_group_writer_excludes_dependents() {
        let mut registry = TypeRegistry::new();
        registry
            .add_write_group_of::<Translation, LocalToWorld>()
            .unwrap();

        let desc = QueryDesc::new().write::<LocalToWorld>().with_options(QueryOptions {
            filter_write_group: true,
            ..Default::default()
        });
        let descriptor = compile(&desc, &registry);
        assert_eq!(
            descriptor.none(),
            &[ComponentAccess::new(id::<Translation>(), Access::Read)]
        );

        // naming the dependent explicitly keeps it out of the exclusion
        let desc = QueryDesc::new()
            .write::<LocalToWorld>()
            .read::<Translation>()
            .with_options(QueryOptions {
                filter_write_group: true,
                ..Default::default()
            });
        assert!(compile(&desc, &registry).none().is_empty());

        // without the option write groups are ignored
        let desc = QueryDesc::new().write::<LocalToWorld>();
        assert!(compile(&desc, &registry).none().is_empty());
    }

    #[test]
    fn write_group_reader_implies_dependents_recursively() {
        let mut registry = TypeRegistry::new();
        registry
            .add_write_group_of::<Translation, LocalToWorld>()
            .unwrap();
        registry.add_write_group_of::<Parent, Translation>().unwrap();

        let desc = QueryDesc::new().read::<LocalToWorld>().with_options(QueryOptions {
            filter_write_group: true,
            ..Default::default()
        });
        let descriptor = compile(&desc, &registry);
        let mut expected = vec![id::<Translation>(), id::<Parent>()];
        expected.sort();
        assert_eq!(descriptor.implied(), expected.as_slice());
        assert!(descriptor.none().is_empty());
        assert!(descriptor.permissions().allows_read(&id::<Parent>()));
    }

    #[test]
    fn match_rule() {
        let registry = TypeRegistry::new();
        let descriptor = compile(&QueryDesc::new().read::<A>().none::<B>(), &registry);
        let mut ab = vec![id::<A>(), id::<B>()];
        ab.sort();
        let mut ac = vec![id::<A>(), id::<C>()];
        ac.sort();

        assert!(descriptor.matches_layout(&[id::<A>()]).is_pass());
        assert!(!descriptor.matches_layout(&ab).is_pass());
        assert!(descriptor.matches_layout(&ac).is_pass());

        let any = compile(&QueryDesc::new().any_read::<B>().any_read::<C>(), &registry);
        assert!(!any.matches_layout(&[id::<A>()]).is_pass());
        assert!(any.matches_layout(&ac).is_pass());
    }

    #[test]
    fn system_tags_require_opt_in() {
        let registry = TypeRegistry::new();
        let mut layout = vec![id::<A>(), id::<Disabled>()];
        layout.sort();

        let plain = compile(&QueryDesc::new().read::<A>(), &registry);
        assert!(!plain.matches_layout(&layout).is_pass());

        let explicit = compile(&QueryDesc::new().read::<A>().read::<Disabled>(), &registry);
        assert!(explicit.matches_layout(&layout).is_pass());

        let option = compile(
            &QueryDesc::new().read::<A>().with_options(QueryOptions {
                include_disabled: true,
                ..Default::default()
            }),
            &registry,
        );
        assert!(option.matches_layout(&layout).is_pass());

        let mut header = vec![id::<A>(), id::<ChunkHeader>()];
        header.sort();
        assert!(!option.matches_layout(&header).is_pass());
    }

    #[test]
    fn hash_collision_falls_back_to_comparison() {
        let registry = TypeRegistry::new();
        let storage = Storage::default();
        let mut cache = DescriptorCache::default();

        let a = compile(&QueryDesc::new().read::<A>(), &registry);
        let mut b = compile(&QueryDesc::new().read::<B>(), &registry);
        b.hash = a.hash;

        let (a_id, a_desc) = cache.get_or_insert(a, &storage);
        let (b_id, b_desc) = cache.get_or_insert(b, &storage);
        assert_ne!(a_id, b_id);
        assert!(!Arc::ptr_eq(&a_desc, &b_desc));
        assert_eq!(cache.len(), 2);

        let mut again = compile(&QueryDesc::new().read::<B>(), &registry);
        again.hash = a_desc.content_hash();
        let (again_id, again_desc) = cache.get_or_insert(again, &storage);
        assert_eq!(again_id, b_id);
        assert!(Arc::ptr_eq(&again_desc, &b_desc));
    }

    #[test]
    fn new_archetypes_are_offered_incrementally() {
        let mut registry = TypeRegistry::new();
        registry.get_or_register::<A>();
        let mut storage = Storage::default();
        let mut cache = DescriptorCache::default();

        storage.push_archetype(ArchetypeSchema::new(&[ComponentMeta::of::<A>()], 1024, 128));
        let (id, descriptor) =
            cache.get_or_insert(compile(&QueryDesc::new().read::<A>(), &registry), &storage);
        assert_eq!(cache.matches(id).len(), 1);

        storage.push_archetype(ArchetypeSchema::new(&[ComponentMeta::of::<B>()], 1024, 128));
        storage.push_archetype(ArchetypeSchema::new(
            &[ComponentMeta::of::<A>(), ComponentMeta::of::<C>()],
            1024,
            128,
        ));
        cache.update(&storage);

        let incremental: Vec<_> = cache.matches(id).iter().map(|m| m.archetype()).collect();
        let rescan: Vec<_> = storage.layout_index().search(&*descriptor).collect();
        assert_eq!(incremental, rescan);
        assert_eq!(incremental, vec![ArchetypeIndex(0), ArchetypeIndex(2)]);
    }
}
