//! Entity identities and the table which maps them to their storage location.

use super::storage::ChunkId;
use std::fmt::{Debug, Display, Formatter};

/// An opaque identifier for an entity.
///
/// An entity handle is only valid while its generation matches the generation stored in the
/// [`EntityTable`] for its index. Handles to despawned entities never resolve, even after their
/// index has been reused.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Entity {
    index: u32,
    generation: u32,
}

impl Entity {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Returns the index of the entity within the identity table.
    pub fn index(self) -> u32 {
        self.index
    }

    /// Returns the generation of the entity.
    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl Debug for Entity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Entity({}#{})", self.index, self.generation)
    }
}

impl Display for Entity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.index, self.generation)
    }
}

/// The storage location of an entity's data.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct EntityLocation {
    chunk: ChunkId,
    row: usize,
}

impl EntityLocation {
    /// Constructs a new entity location.
    pub fn new(chunk: ChunkId, row: usize) -> Self {
        Self { chunk, row }
    }

    /// Returns the chunk which holds the entity's components.
    pub fn chunk(&self) -> ChunkId {
        self.chunk
    }

    /// Returns the entity's row within its chunk.
    pub fn row(&self) -> usize {
        self.row
    }
}

/// Resolves entity identities to storage locations.
pub trait EntityTable {
    /// Returns the location of a live entity, or `None` if the entity does not exist or its
    /// generation is stale.
    fn resolve(&self, entity: Entity) -> Option<EntityLocation>;

    /// Returns `true` if the entity is alive.
    fn exists(&self, entity: Entity) -> bool {
        self.resolve(entity).is_some()
    }
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    generation: u32,
    location: Option<EntityLocation>,
}

/// A generational entity table.
///
/// Freed indices are recycled with an incremented generation.
#[derive(Debug, Default)]
pub struct Entities {
    slots: Vec<Slot>,
    free: Vec<u32>,
    len: usize,
}

impl Entities {
    /// Returns the number of live entities.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if there are no live entities.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Allocates a new entity identity. The entity has no location until one is set.
    pub fn allocate(&mut self) -> Entity {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &self.slots[index as usize];
            Entity::new(index, slot.generation)
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                location: None,
            });
            Entity::new(index, 0)
        }
    }

    /// Sets the location of a live entity.
    ///
    /// # Panics
    ///
    /// Panics if the entity is stale.
    pub fn set(&mut self, entity: Entity, location: EntityLocation) {
        match self.slots.get_mut(entity.index as usize) {
            Some(slot) if slot.generation == entity.generation => slot.location = Some(location),
            _ => panic!("attempted to set the location of stale entity {}", entity),
        }
    }

    /// Frees an entity, returning its last location.
    pub fn free(&mut self, entity: Entity) -> Option<EntityLocation> {
        let slot = self.slots.get_mut(entity.index as usize)?;
        if slot.generation != entity.generation {
            return None;
        }

        let location = slot.location.take();
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(entity.index);
        self.len -= 1;
        location
    }
}

impl EntityTable for Entities {
    fn resolve(&self, entity: Entity) -> Option<EntityLocation> {
        self.slots
            .get(entity.index as usize)
            .filter(|slot| slot.generation == entity.generation)
            .and_then(|slot| slot.location)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::internals::storage::ChunkId;

    #[test]
    fn stale_generation_does_not_resolve() {
        let mut entities = Entities::default();
        let a = entities.allocate();
        entities.set(a, EntityLocation::new(ChunkId::new(0, 0), 3));
        assert!(entities.exists(a));

        entities.free(a);
        assert!(!entities.exists(a));

        let b = entities.allocate();
        assert_eq!(a.index(), b.index());
        assert_ne!(a.generation(), b.generation());
        entities.set(b, EntityLocation::new(ChunkId::new(0, 0), 0));
        assert!(entities.exists(b));
        assert!(!entities.exists(a));
        assert_eq!(entities.resolve(a), None);
    }

    #[test]
    fn double_free_is_ignored() {
        let mut entities = Entities::default();
        let a = entities.allocate();
        entities.free(a);
        assert_eq!(entities.len(), 0);
        assert_eq!(entities.free(a), None);
        assert_eq!(entities.len(), 0);
    }
}
