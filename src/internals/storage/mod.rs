//! Archetype and chunk storage.
//!
//! Chunks live in a generational arena and are referenced by [`ChunkId`] handles. A handle to a
//! released chunk never resolves again, even after its slot has been reused. Every creation or
//! release of an archetype or chunk advances the storage's structural generation, which is what
//! query chunk caches are validated against.

use self::{
    archetype::{Archetype, ArchetypeIndex, ArchetypeSchema},
    chunk::{Chunk, Version},
    component::ComponentTypeId,
    index::SearchIndex,
    shared::SharedValueIndex,
};
use smallvec::SmallVec;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use tracing::{debug, trace};

pub mod archetype;
pub mod buffer;
pub mod chunk;
pub mod component;
pub mod enable;
pub mod index;
pub mod registry;
pub mod shared;
pub mod slicevec;

/// A generational handle to a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ChunkId {
    slot: u32,
    generation: u32,
}

impl ChunkId {
    pub(crate) fn new(slot: u32, generation: u32) -> Self {
        Self { slot, generation }
    }

    /// Returns the arena slot of the chunk.
    pub fn slot(&self) -> u32 {
        self.slot
    }

    /// Returns the generation of the slot the handle was issued for.
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

/// Counts the open iterators over a storage. Structural changes are refused while any token is
/// alive.
#[derive(Debug)]
pub struct IterationToken(Arc<AtomicUsize>);

impl IterationToken {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter.clone())
    }
}

impl Clone for IterationToken {
    fn clone(&self) -> Self {
        Self::new(&self.0)
    }
}

impl Drop for IterationToken {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

#[derive(Debug, Default)]
struct ChunkSlot {
    generation: u32,
    chunk: Option<Chunk>,
}

/// Owns all archetypes and chunks of a world.
#[derive(Debug, Default)]
pub struct Storage {
    archetypes: Vec<Archetype>,
    archetype_lookup: HashMap<SmallVec<[ComponentTypeId; 8]>, ArchetypeIndex>,
    index: SearchIndex,
    chunks: Vec<ChunkSlot>,
    free: Vec<u32>,
    generation: u64,
    iterators: Arc<AtomicUsize>,
}

impl Storage {
    /// Returns all archetypes, in creation order.
    pub fn archetypes(&self) -> &[Archetype] {
        &self.archetypes
    }

    /// Returns the archetype layout index.
    pub fn layout_index(&self) -> &SearchIndex {
        &self.index
    }

    /// Returns the structural generation, which advances whenever an archetype or chunk is
    /// created or released.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns the number of live chunks.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len() - self.free.len()
    }

    /// Returns the chunk referenced by a handle, if it is still alive.
    pub fn chunk(&self, id: ChunkId) -> Option<&Chunk> {
        self.chunks
            .get(id.slot as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.chunk.as_ref())
    }

    pub(crate) fn chunk_mut(&mut self, id: ChunkId) -> Option<&mut Chunk> {
        self.chunks
            .get_mut(id.slot as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.chunk.as_mut())
    }

    /// Returns two distinct chunks mutably.
    ///
    /// # Panics
    ///
    /// Panics if the handles refer to the same chunk or either chunk is not alive.
    pub(crate) fn chunk_pair_mut(&mut self, a: ChunkId, b: ChunkId) -> (&mut Chunk, &mut Chunk) {
        assert_ne!(a.slot, b.slot, "attempted to borrow a chunk twice");
        let (low, high, swapped) = if a.slot < b.slot {
            (a, b, false)
        } else {
            (b, a, true)
        };

        let (head, tail) = self.chunks.split_at_mut(high.slot as usize);
        let low_chunk = head[low.slot as usize]
            .chunk
            .as_mut()
            .filter(|chunk| chunk.id() == low);
        let high_chunk = tail[0].chunk.as_mut().filter(|chunk| chunk.id() == high);
        match (low_chunk, high_chunk) {
            (Some(low), Some(high)) if swapped => (high, low),
            (Some(low), Some(high)) => (low, high),
            _ => panic!("attempted to access a released chunk"),
        }
    }

    /// Returns a token which marks an open iteration over the storage.
    pub fn iteration_token(&self) -> IterationToken {
        IterationToken::new(&self.iterators)
    }

    /// Returns the number of open iteration tokens.
    pub fn open_iterators(&self) -> usize {
        self.iterators.load(Ordering::Acquire)
    }

    /// # Panics
    ///
    /// Panics if any iteration token is alive.
    pub(crate) fn assert_structural_change_allowed(&self) {
        let open = self.open_iterators();
        assert!(
            open == 0,
            "attempted a structural change while {} chunk iterator(s) are open",
            open
        );
    }

    /// Finds the archetype with exactly the given sorted component types.
    pub fn find_archetype(&self, types: &[ComponentTypeId]) -> Option<ArchetypeIndex> {
        self.archetype_lookup.get(types).copied()
    }

    pub(crate) fn push_archetype(&mut self, schema: ArchetypeSchema) -> ArchetypeIndex {
        let index = ArchetypeIndex(self.archetypes.len() as u32);
        let types: SmallVec<[ComponentTypeId; 8]> = schema.types().iter().copied().collect();
        debug!(
            archetype = index.0,
            components = types.len(),
            capacity = schema.capacity(),
            "Created archetype"
        );

        self.index.push(&types);
        self.archetype_lookup.insert(types, index);
        self.archetypes.push(Archetype::new(index, schema));
        self.generation += 1;
        index
    }

    pub(crate) fn archetype_mut(&mut self, index: ArchetypeIndex) -> &mut Archetype {
        &mut self.archetypes[index]
    }

    /// Finds a chunk of the archetype with room for another row and the given shared values.
    pub fn find_chunk(
        &self,
        archetype: ArchetypeIndex,
        shared: &[SharedValueIndex],
    ) -> Option<ChunkId> {
        self.archetypes[archetype]
            .chunks()
            .iter()
            .copied()
            .find(|id| {
                self.chunk(*id)
                    .map(|chunk| !chunk.is_full() && chunk.shared_values() == shared)
                    .unwrap_or(false)
            })
    }

    /// Returns a chunk of the archetype with room for another row and the given shared values,
    /// allocating one if needed.
    pub(crate) fn chunk_for_insert(
        &mut self,
        archetype: ArchetypeIndex,
        shared: &[SharedValueIndex],
        version: Version,
    ) -> ChunkId {
        match self.find_chunk(archetype, shared) {
            Some(id) => id,
            None => self.allocate_chunk(archetype, shared.iter().copied().collect(), version),
        }
    }

    fn allocate_chunk(
        &mut self,
        archetype: ArchetypeIndex,
        shared: SmallVec<[SharedValueIndex; 2]>,
        version: Version,
    ) -> ChunkId {
        let slot = match self.free.pop() {
            Some(slot) => slot,
            None => {
                self.chunks.push(ChunkSlot::default());
                (self.chunks.len() - 1) as u32
            }
        };

        let id = ChunkId::new(slot, self.chunks[slot as usize].generation);
        let schema = self.archetypes[archetype].schema().clone();
        self.chunks[slot as usize].chunk = Some(Chunk::new(id, archetype, schema, shared, version));
        self.archetypes[archetype].push_chunk(id);
        self.generation += 1;
        id
    }

    /// Releases an empty chunk, invalidating its handle.
    pub(crate) fn release_chunk(&mut self, id: ChunkId) {
        let slot = match self.chunks.get_mut(id.slot as usize) {
            Some(slot) if slot.generation == id.generation => slot,
            _ => return,
        };

        if let Some(chunk) = slot.chunk.take() {
            debug_assert!(chunk.is_empty(), "released chunk still holds rows");
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(id.slot);
            self.archetypes[chunk.archetype()].remove_chunk(id);
            self.generation += 1;
            trace!(chunk = ?id, archetype = chunk.archetype().0, "Released chunk");
        }
    }
}
