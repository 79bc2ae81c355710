//! Streaming iteration over the chunks matched by a query.

use super::{
    cache::CachedChunk,
    descriptor::{MatchingArchetype, RowSelection},
    view::ChunkView,
    Query,
};
use crate::internals::{
    storage::{chunk::Chunk, enable::EnabledRanges, IterationToken},
    world::World,
};
use std::sync::Arc;

enum IterState<'a> {
    /// Looking for the next chunk which passes the filter.
    Scanning,
    /// Yielding the enabled row ranges of a partially enabled chunk.
    Emitting {
        chunk: &'a Chunk,
        matching: &'a MatchingArchetype,
        ranges: EnabledRanges,
    },
}

/// Iterates through the chunks matched by a query.
///
/// Chunks are visited in archetype match order, then chunk order. Chunks failing the query's
/// filter, and chunks with no enabled rows, are skipped. A partially enabled chunk is yielded once
/// per contiguous run of enabled rows, in ascending row order.
///
/// Structural changes to the world panic while the iterator is alive.
pub struct ChunkIter<'a> {
    query: &'a Query,
    world: &'a World,
    matches: &'a [MatchingArchetype],
    chunks: Arc<[CachedChunk]>,
    cursor: usize,
    state: IterState<'a>,
    _token: IterationToken,
}

impl<'a> ChunkIter<'a> {
    pub(crate) fn new(query: &'a Query, world: &'a World, chunks: Arc<[CachedChunk]>) -> Self {
        Self {
            query,
            world,
            matches: world.descriptors().matches(query.id),
            chunks,
            cursor: 0,
            state: IterState::Scanning,
            _token: world.storage().iteration_token(),
        }
    }

    fn view(
        &self,
        chunk: &'a Chunk,
        matching: &'a MatchingArchetype,
        range: std::ops::Range<usize>,
    ) -> ChunkView<'a> {
        ChunkView::new(chunk, matching, &self.query.descriptor, self.world, range)
    }
}

impl<'a> Iterator for ChunkIter<'a> {
    type Item = ChunkView<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let IterState::Emitting {
                chunk,
                matching,
                ranges,
            } = &mut self.state
            {
                let (chunk, matching) = (*chunk, *matching);
                if let Some(range) = ranges.next() {
                    return Some(self.view(chunk, matching, range));
                }
                self.state = IterState::Scanning;
            }

            let entry = *self.chunks.get(self.cursor)?;
            self.cursor += 1;

            let chunk = match self.world.storage().chunk(entry.chunk()) {
                Some(chunk) if !chunk.is_empty() => chunk,
                _ => continue,
            };
            if !self.query.filter.matches_chunk(chunk) {
                continue;
            }

            let matching = &self.matches[entry.matching()];
            if !matching.has_enable_bits() {
                return Some(self.view(chunk, matching, 0..chunk.len()));
            }

            match matching.select_rows(chunk) {
                RowSelection::All => return Some(self.view(chunk, matching, 0..chunk.len())),
                RowSelection::Empty => continue,
                RowSelection::Mask(mask) => {
                    self.state = IterState::Emitting {
                        chunk,
                        matching,
                        ranges: EnabledRanges::new(mask),
                    }
                }
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, None)
    }
}

impl<'a> std::iter::FusedIterator for ChunkIter<'a> {}

impl<'a> std::fmt::Debug for ChunkIter<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkIter")
            .field("cursor", &self.cursor)
            .field("chunks", &self.chunks.len())
            .finish()
    }
}
