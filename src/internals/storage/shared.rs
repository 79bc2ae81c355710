//! Interned storage for shared component values.
//!
//! A chunk stores a single [`SharedValueIndex`] per shared component type of its archetype. The
//! values themselves are interned here, once per distinct value, and are immutable for the
//! lifetime of the world.

use super::component::{ComponentTypeId, SharedComponent};
use crate::internals::hash::U64BuildHasher;
use downcast_rs::{impl_downcast, Downcast};
use smallvec::SmallVec;
use std::{
    collections::{hash_map::DefaultHasher, HashMap},
    fmt::{Debug, Formatter},
    hash::{Hash, Hasher},
};

/// The index of an interned shared value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SharedValueIndex(pub(crate) u32);

/// A type-erased shared component value.
pub trait SharedValue: Downcast + Send + Sync {
    /// Returns the component type of the value.
    fn component_type(&self) -> ComponentTypeId;

    /// Returns `true` if `other` holds an equal value of the same type.
    fn eq_value(&self, other: &dyn SharedValue) -> bool;

    /// Hashes the value.
    fn hash_value(&self) -> u64;
}
impl_downcast!(SharedValue);

impl<T: SharedComponent> SharedValue for T {
    fn component_type(&self) -> ComponentTypeId {
        ComponentTypeId::of::<T>()
    }

    fn eq_value(&self, other: &dyn SharedValue) -> bool {
        other
            .downcast_ref::<T>()
            .map(|other| other == self)
            .unwrap_or(false)
    }

    fn hash_value(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        ComponentTypeId::of::<T>().hash(&mut hasher);
        self.hash(&mut hasher);
        hasher.finish()
    }
}

/// Stores every distinct shared component value used in a world.
#[derive(Default)]
pub struct SharedValues {
    values: Vec<Box<dyn SharedValue>>,
    lookup: HashMap<u64, SmallVec<[SharedValueIndex; 1]>, U64BuildHasher>,
}

impl SharedValues {
    /// Returns the number of interned values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if no values have been interned.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Interns a value, returning the index of the existing equal value if there is one.
    pub fn intern<T: SharedComponent>(&mut self, value: T) -> SharedValueIndex {
        if let Some(index) = self.find(&value) {
            return index;
        }

        let hash = value.hash_value();
        let index = SharedValueIndex(self.values.len() as u32);
        self.values.push(Box::new(value));
        self.lookup.entry(hash).or_default().push(index);
        index
    }

    /// Finds the index of an interned value.
    pub fn find<T: SharedComponent>(&self, value: &T) -> Option<SharedValueIndex> {
        let candidates = self.lookup.get(&value.hash_value())?;
        candidates
            .iter()
            .copied()
            .find(|index| self.values[index.0 as usize].eq_value(value))
    }

    /// Returns the value at the given index, if it is a `T`.
    pub fn get<T: SharedComponent>(&self, index: SharedValueIndex) -> Option<&T> {
        self.values
            .get(index.0 as usize)
            .and_then(|value| value.downcast_ref::<T>())
    }

    /// Returns the type-erased value at the given index.
    pub fn get_dyn(&self, index: SharedValueIndex) -> Option<&dyn SharedValue> {
        self.values.get(index.0 as usize).map(|value| &**value)
    }
}

impl Debug for SharedValues {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedValues")
            .field("len", &self.values.len())
            .finish()
    }
}
