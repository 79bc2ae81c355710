//! Per-descriptor chunk caches and the batch chunk list builder.

use super::descriptor::{MatchingArchetype, RowSelection};
use crate::internals::storage::{archetype::ArchetypeIndex, chunk::Chunk, ChunkId, Storage};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, span, Level};

/// A chunk matched by a query, with the archetype and match record it belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CachedChunk {
    chunk: ChunkId,
    archetype: ArchetypeIndex,
    matching: u32,
}

impl CachedChunk {
    /// Returns the chunk handle.
    pub fn chunk(&self) -> ChunkId {
        self.chunk
    }

    /// Returns the chunk's archetype.
    pub fn archetype(&self) -> ArchetypeIndex {
        self.archetype
    }

    /// Returns the position of the archetype's record among the descriptor's matches.
    pub fn matching(&self) -> usize {
        self.matching as usize
    }
}

/// An ordered snapshot of the chunks of every archetype matched by a descriptor.
///
/// The snapshot is stamped with the storage's structural generation and is rebuilt only when
/// that generation has changed.
#[derive(Debug, Default)]
pub struct ChunkCache {
    generation: Option<u64>,
    entries: Option<Arc<[CachedChunk]>>,
}

impl ChunkCache {
    /// Returns the generation the snapshot was built at.
    pub fn generation(&self) -> Option<u64> {
        self.generation
    }

    fn current(&self, generation: u64) -> Option<Arc<[CachedChunk]>> {
        if self.generation == Some(generation) {
            self.entries.clone()
        } else {
            None
        }
    }

    /// Returns the current snapshot, rebuilding it if the storage has structurally changed.
    pub(crate) fn entries(
        lock: &RwLock<ChunkCache>,
        matches: &[MatchingArchetype],
        storage: &Storage,
    ) -> Arc<[CachedChunk]> {
        let generation = storage.generation();
        if let Some(entries) = lock.read().current(generation) {
            return entries;
        }

        let mut cache = lock.write();
        if let Some(entries) = cache.current(generation) {
            return entries;
        }

        let entries: Arc<[CachedChunk]> = build_chunk_list(matches, storage, None).into();
        debug!(
            generation,
            archetypes = matches.len(),
            chunks = entries.len(),
            "Rebuilt chunk cache"
        );
        cache.generation = Some(generation);
        cache.entries = Some(entries.clone());
        entries
    }
}

/// Decides whether a chunk is included in a chunk list.
pub(crate) type ChunkPredicate<'a> = &'a (dyn Fn(&Chunk, &MatchingArchetype) -> bool + Sync);

/// Collects the chunks of the matched archetypes, in match order then chunk order.
///
/// Without a predicate every chunk handle is bulk copied into the range of the output reserved
/// for its archetype. With a predicate, each archetype scatters its accepted chunks to the front
/// of its range in a sparse buffer and the accepted runs are then compacted into a dense list.
pub(crate) fn build_chunk_list(
    matches: &[MatchingArchetype],
    storage: &Storage,
    predicate: Option<ChunkPredicate>,
) -> Vec<CachedChunk> {
    let span = span!(Level::TRACE, "build_chunk_list", archetypes = matches.len());
    let _guard = span.enter();

    let archetypes = storage.archetypes();
    let counts: Vec<usize> = matches
        .iter()
        .map(|m| archetypes[m.archetype()].chunks().len())
        .collect();
    let offsets = exclusive_prefix_sum(&counts);
    let total = offsets.last().copied().unwrap_or(0) + counts.last().copied().unwrap_or(0);

    let mut sparse = vec![CachedChunk::default(); total];
    let scatter = |i: usize, range: &mut [CachedChunk]| -> usize {
        let matching = &matches[i];
        let archetype = matching.archetype();
        let mut written = 0;
        for id in archetypes[archetype].chunks() {
            if let Some(predicate) = predicate {
                let accepted = storage
                    .chunk(*id)
                    .map(|chunk| predicate(chunk, matching))
                    .unwrap_or(false);
                if !accepted {
                    continue;
                }
            }
            range[written] = CachedChunk {
                chunk: *id,
                archetype,
                matching: i as u32,
            };
            written += 1;
        }
        written
    };

    let accepted = for_each_range(split_ranges(&mut sparse, &counts), scatter);
    if predicate.is_none() {
        return sparse;
    }

    let dense_offsets = exclusive_prefix_sum(&accepted);
    let dense_total =
        dense_offsets.last().copied().unwrap_or(0) + accepted.last().copied().unwrap_or(0);
    let mut dense = vec![CachedChunk::default(); dense_total];
    let sparse = &sparse;
    let offsets = &offsets;
    let accepted_counts = &accepted;
    for_each_range(split_ranges(&mut dense, &accepted), |i, range| {
        let start = offsets[i];
        range.copy_from_slice(&sparse[start..start + accepted_counts[i]]);
        range.len()
    });
    dense
}

/// A chunk predicate which rejects chunks whose rows are all disabled for the query.
pub(crate) fn has_enabled_rows(chunk: &Chunk, matching: &MatchingArchetype) -> bool {
    !chunk.is_empty()
        && (!matching.has_enable_bits() || matching.select_rows(chunk) != RowSelection::Empty)
}

fn exclusive_prefix_sum(counts: &[usize]) -> Vec<usize> {
    counts
        .iter()
        .scan(0, |sum, count| {
            let start = *sum;
            *sum += count;
            Some(start)
        })
        .collect()
}

fn split_ranges<'a, T>(mut slice: &'a mut [T], lengths: &[usize]) -> Vec<&'a mut [T]> {
    let mut ranges = Vec::with_capacity(lengths.len());
    for &len in lengths {
        let (head, tail) = std::mem::take(&mut slice).split_at_mut(len);
        ranges.push(head);
        slice = tail;
    }
    ranges
}

#[cfg(feature = "parallel")]
fn for_each_range<F>(ranges: Vec<&mut [CachedChunk]>, f: F) -> Vec<usize>
where
    F: Fn(usize, &mut [CachedChunk]) -> usize + Send + Sync,
{
    use rayon::prelude::*;
    ranges
        .into_par_iter()
        .enumerate()
        .map(|(i, range)| f(i, range))
        .collect()
}

#[cfg(not(feature = "parallel"))]
fn for_each_range<F>(ranges: Vec<&mut [CachedChunk]>, f: F) -> Vec<usize>
where
    F: Fn(usize, &mut [CachedChunk]) -> usize,
{
    ranges
        .into_iter()
        .enumerate()
        .map(|(i, range)| f(i, range))
        .collect()
}
