//! Queries match archetypes by the component types they require, and iterate through the chunks
//! of those archetypes.
//!
//! A [`QueryDesc`] lists the component types a query requires (`all`), accepts (`any`) and rejects
//! (`none`), along with the access it needs to each. Compiling a description against a
//! [`World`](crate::world::World) produces a [`Query`], which shares an interned descriptor and
//! match list with every other query of the same shape.
//!
//! ```
//! # use tessera::*;
//! #[derive(Clone, Copy, Debug, PartialEq)]
//! struct Position(f32);
//! #[derive(Clone, Copy, Debug, PartialEq)]
//! struct Velocity(f32);
//!
//! let mut world = World::default();
//! world.extend((0..10).map(|i| (Position(0.0), Velocity(i as f32))));
//!
//! let query = world
//!     .compile_query(&QueryDesc::new().write::<Position>().read::<Velocity>())
//!     .unwrap();
//!
//! for chunk in query.iter_chunks(&world) {
//!     let mut positions = chunk.column_mut::<Position>();
//!     let velocities = chunk.column::<Velocity>();
//!     for (pos, vel) in positions.iter_mut().zip(velocities.iter()) {
//!         pos.0 += vel.0;
//!     }
//! }
//! ```

pub use crate::internals::{
    permissions::Permissions,
    query::{
        cache::{CachedChunk, ChunkCache},
        descriptor::{
            Access, ComponentAccess, DescriptorCache, DescriptorId, MatchingArchetype,
            QueryDescriptor, QueryOptions, RowSelection,
        },
        filter::{
            Filter, FilterResult, LayoutFilter, SharedFilter, MAX_CHANGED_FILTERS,
            MAX_SHARED_FILTERS,
        },
        iter::ChunkIter,
        view::{BufferColumn, BufferColumnMut, ChunkView},
        ChunkList, Query, QueryDesc, QueryError,
    },
};
