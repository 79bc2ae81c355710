//! Tessera is an archetype and chunk based entity component storage engine.
//!
//! Entities with the same set of component types are stored together in fixed size chunks, with
//! one contiguous column per component type. Queries match archetypes by the component types they
//! require and iterate over the chunks of the matched archetypes, skipping rows whose enableable
//! components are switched off.
//!
//! # Getting Started
//!
//! ```
//! use tessera::*;
//!
//! // Define our entity data types
//! #[derive(Clone, Copy, Debug, PartialEq)]
//! struct Position {
//!     x: f32,
//!     y: f32,
//! }
//!
//! #[derive(Clone, Copy, Debug, PartialEq)]
//! struct Velocity {
//!     dx: f32,
//!     dy: f32,
//! }
//!
//! #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
//! struct Model(usize);
//!
//! let mut world = World::default();
//!
//! // Create entities with `Position` and `Velocity` data
//! world.extend((0..999).map(|_| {
//!     (
//!         Position { x: 0.0, y: 0.0 },
//!         Velocity { dx: 1.0, dy: 0.0 },
//!     )
//! }));
//!
//! // Create entities with `Position` data which share a `Model` value.
//! // Shared values are stored once per chunk, and queries can filter chunks by them.
//! world.extend_shared(Model(5), (0..999).map(|_| (Position { x: 0.0, y: 0.0 },)));
//!
//! // Create a query which finds all `Position` and `Velocity` components
//! let query = world
//!     .compile_query(&QueryDesc::new().write::<Position>().read::<Velocity>())
//!     .unwrap();
//!
//! // Iterate through all chunks that match the query in the world
//! for chunk in query.iter_chunks(&world) {
//!     let velocities = chunk.column::<Velocity>();
//!     let mut positions = chunk.column_mut::<Position>();
//!     for (pos, vel) in positions.iter_mut().zip(velocities.iter()) {
//!         pos.x += vel.dx;
//!         pos.y += vel.dy;
//!     }
//! }
//!
//! assert_eq!(query.count(&world), 999);
//! ```
//!
//! # Features
//!
//! ### Shared components and filters
//!
//! Shared components split an archetype's entities into chunks by value. A query can be
//! restricted to the chunks holding a particular value.
//!
//! ```
//! # use tessera::*;
//! # #[derive(Clone, Copy, Debug, PartialEq)]
//! # struct Position(f32);
//! # #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
//! # struct Team(u8);
//! let mut world = World::default();
//! world.extend_shared(Team(1), (0..10).map(|_| (Position(0.0),)));
//! world.extend_shared(Team(2), (0..5).map(|_| (Position(0.0),)));
//!
//! let mut query = world
//!     .compile_query(&QueryDesc::new().read::<Position>().read::<Team>())
//!     .unwrap();
//! query.set_shared_filter(&world, &Team(2)).unwrap();
//! assert_eq!(query.count(&world), 5);
//! ```
//!
//! ### Change detection
//!
//! Every column records the world version at which it was last written. Queries can skip chunks
//! whose columns have not changed since a given version.
//!
//! ```
//! # use tessera::*;
//! # #[derive(Clone, Copy, Debug, PartialEq)]
//! # struct Position(f32);
//! let mut world = World::default();
//! let entity = world.spawn((Position(0.0),));
//! let since = world.increment_version();
//!
//! let mut query = world
//!     .compile_query(&QueryDesc::new().read::<Position>())
//!     .unwrap();
//! query.set_changed_filter::<Position>(since).unwrap();
//! assert!(query.is_empty(&world));
//!
//! world.increment_version();
//! *world.lookup_mut::<Position>().get_mut(entity).unwrap() = Position(1.0);
//! assert_eq!(query.count(&world), 1);
//! ```
//!
//! ### Parallel iteration
//!
//! With the `parallel` feature (enabled by default), `Query::par_for_each_chunk` distributes
//! matched chunks across the rayon thread pool.

#![warn(missing_docs)]

mod internals;

pub mod query;
pub mod storage;
pub mod world;

pub use crate::{
    query::{ChunkIter, ChunkList, ChunkView, Query, QueryDesc, QueryError, QueryOptions},
    storage::{
        BufferElement, BufferMut, BufferRef, Component, ComponentTypeId, Disabled, Prefab,
        RegistryError, SharedComponent, TypeRegistry, Version,
    },
    world::{
        BufferLookup, ComponentLookup, ComponentLookupMut, Entity, EntityAccessError, World,
        WorldOptions,
    },
};
