//! Contains types related to the [World](struct.World.html) entity collection.

pub use crate::internals::{
    entity::{Entities, Entity, EntityLocation, EntityTable},
    lookup::{BufferLookup, ComponentLookup, ComponentLookupMut},
    world::{
        EntityAccessError, World, WorldId, WorldOptions, DEFAULT_BUFFER_CAPACITY,
    },
};
