//! Archetype and chunk storage.
//!
//! Every combination of component types attached to an entity forms an archetype. An archetype's
//! entities are stored in fixed size chunks of at most 128 rows, with one 64 byte aligned column
//! per component type which stores data. Tags take no space, shared components store a single
//! interned value index per chunk, and buffer components store an inline array per row which
//! spills to the heap when it grows past its inline capacity.
//!
//! Enableable components carry a 128-bit enable mask per chunk. Disabled rows are skipped by
//! queries which read or write the component, without moving the entity between chunks.
//!
//! ```
//! # use tessera::*;
//! #[derive(Clone, Copy, Debug, PartialEq)]
//! struct Stunned;
//!
//! let mut world = World::default();
//! world.registry_mut().register_enableable::<Stunned>().unwrap();
//! let entity = world.spawn((Stunned,));
//! world.set_enabled::<Stunned>(entity, false).unwrap();
//! assert_eq!(world.is_enabled::<Stunned>(entity), Ok(false));
//! ```

pub use crate::internals::{
    borrow::{BorrowFlag, Exclusive, Ref, RefMut, Shared},
    hash::{U64BuildHasher, U64Hasher},
    insert::{ComponentMetas, ComponentSet, RowWriter},
    storage::{
        archetype::{Archetype, ArchetypeIndex, ArchetypeSchema, Field, COLUMN_ALIGNMENT},
        buffer::{BufferMut, BufferRef},
        chunk::{is_newer, Chunk, Version},
        component::{
            BufferElement, ChunkHeader, Component, ComponentKind, ComponentMeta, ComponentTypeId,
            Disabled, Prefab, SharedComponent,
        },
        enable::{
            row_mask, EnableBits, EnabledColumn, EnabledRanges, EnabledRef, EnabledRefMut,
            MAX_CHUNK_CAPACITY,
        },
        index::SearchIndex,
        registry::{RegistryError, TypeRegistry},
        shared::{SharedValue, SharedValueIndex, SharedValues},
        slicevec::SliceVec,
        ChunkId, IterationToken, Storage,
    },
};
