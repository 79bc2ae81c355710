//! The component type registry.
//!
//! Every component type stored in a world has a [`ComponentMeta`] entry here. The registry also
//! holds the write-group table: a dense adjacency list from each component to the components
//! declared as overriding writers of it.

use super::component::{
    BufferElement, ChunkHeader, Component, ComponentMeta, ComponentTypeId, Disabled, Prefab,
    SharedComponent,
};
use bit_set::BitSet;
use smallvec::SmallVec;
use std::collections::HashMap;
use tracing::trace;

/// Error type representing a failure to register component metadata.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    /// The component has already been used with different metadata.
    #[error("component {0} is already in use with a different registration")]
    AlreadyRegistered(ComponentTypeId),
    /// The component has not been registered.
    #[error("component {0} has not been registered")]
    UnknownComponent(ComponentTypeId),
    /// The write group declaration would create a cycle.
    #[error("declaring {member} as a writer of {target} would create a write group cycle")]
    WriteGroupCycle {
        /// The declared writer.
        member: ComponentTypeId,
        /// The component being overridden.
        target: ComponentTypeId,
    },
}

/// Stores metadata for all known component types.
#[derive(Debug)]
pub struct TypeRegistry {
    metas: Vec<ComponentMeta>,
    indices: HashMap<ComponentTypeId, usize>,
    write_groups: Vec<SmallVec<[usize; 2]>>,
    in_use: BitSet,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    /// Constructs a registry containing only the system tags.
    pub fn new() -> Self {
        let mut registry = Self {
            metas: Vec::new(),
            indices: HashMap::new(),
            write_groups: Vec::new(),
            in_use: BitSet::new(),
        };

        for meta in [
            ComponentMeta::of::<Disabled>(),
            ComponentMeta::of::<Prefab>(),
            ComponentMeta::of::<ChunkHeader>(),
        ]
        .iter()
        {
            registry.insert(*meta);
        }

        registry
    }

    fn insert(&mut self, meta: ComponentMeta) -> usize {
        let index = self.metas.len();
        self.metas.push(meta);
        self.write_groups.push(SmallVec::new());
        self.indices.insert(meta.type_id(), index);
        index
    }

    /// Registers component metadata, returning the dense index of the type.
    ///
    /// Re-registering a type replaces its metadata, unless the type is already stored in an
    /// archetype with different metadata.
    pub fn register(&mut self, meta: ComponentMeta) -> Result<usize, RegistryError> {
        match self.indices.get(&meta.type_id()) {
            Some(&index) => {
                let existing = &self.metas[index];
                let same = existing.kind() == meta.kind()
                    && existing.is_enableable() == meta.is_enableable();
                if !same {
                    if self.in_use.contains(index) {
                        return Err(RegistryError::AlreadyRegistered(meta.type_id()));
                    }
                    self.metas[index] = meta;
                }
                Ok(index)
            }
            None => {
                trace!(component = %meta.type_id(), kind = ?meta.kind(), "Registered component");
                Ok(self.insert(meta))
            }
        }
    }

    /// Registers `T` as a data component whose rows can be individually enabled and disabled.
    pub fn register_enableable<T: Component>(&mut self) -> Result<usize, RegistryError> {
        self.register(ComponentMeta::of::<T>().enableable())
    }

    /// Registers `T` as a shared component.
    pub fn register_shared<T: SharedComponent>(&mut self) -> Result<usize, RegistryError> {
        self.register(ComponentMeta::shared::<T>())
    }

    /// Registers `T` as a buffer element type with the given inline capacity.
    pub fn register_buffer<T: BufferElement>(
        &mut self,
        inline_capacity: usize,
    ) -> Result<usize, RegistryError> {
        self.register(ComponentMeta::buffer::<T>(inline_capacity))
    }

    /// Returns the index of `T`, registering it as a plain data component if it is unknown.
    pub fn get_or_register<T: Component>(&mut self) -> usize {
        match self.indices.get(&ComponentTypeId::of::<T>()) {
            Some(&index) => index,
            None => self.insert(ComponentMeta::of::<T>()),
        }
    }

    /// Returns the dense index of a component type.
    pub fn index_of(&self, type_id: ComponentTypeId) -> Option<usize> {
        self.indices.get(&type_id).copied()
    }

    /// Returns the metadata of a component type.
    pub fn meta(&self, type_id: ComponentTypeId) -> Option<&ComponentMeta> {
        self.index_of(type_id).map(|i| &self.metas[i])
    }

    /// Returns `true` if the component type has been registered as enableable.
    pub fn is_enableable(&self, type_id: ComponentTypeId) -> bool {
        self.meta(type_id)
            .map(|meta| meta.is_enableable())
            .unwrap_or(false)
    }

    pub(crate) fn mark_in_use(&mut self, type_id: ComponentTypeId) {
        if let Some(index) = self.index_of(type_id) {
            self.in_use.insert(index);
        }
    }

    /// Declares `member` as a write-group dependent of `target`.
    ///
    /// Queries which filter write groups and write `target` exclude archetypes holding
    /// `member`, unless the query names `member` itself.
    pub fn add_write_group(
        &mut self,
        member: ComponentTypeId,
        target: ComponentTypeId,
    ) -> Result<(), RegistryError> {
        let member_index = self
            .index_of(member)
            .ok_or(RegistryError::UnknownComponent(member))?;
        let target_index = self
            .index_of(target)
            .ok_or(RegistryError::UnknownComponent(target))?;

        // the new edge target -> member closes a cycle if target is reachable from member
        if self.reachable(member_index, target_index) {
            return Err(RegistryError::WriteGroupCycle { member, target });
        }

        let dependents = &mut self.write_groups[target_index];
        if !dependents.contains(&member_index) {
            dependents.push(member_index);
        }
        Ok(())
    }

    /// Declares `M` as a write-group dependent of `T`, registering both as data components if
    /// they are unknown.
    pub fn add_write_group_of<M: Component, T: Component>(&mut self) -> Result<(), RegistryError> {
        self.get_or_register::<M>();
        self.get_or_register::<T>();
        self.add_write_group(ComponentTypeId::of::<M>(), ComponentTypeId::of::<T>())
    }

    fn reachable(&self, from: usize, to: usize) -> bool {
        let mut visited = BitSet::with_capacity(self.metas.len());
        let mut stack = vec![from];
        while let Some(next) = stack.pop() {
            if next == to {
                return true;
            }
            if visited.insert(next) {
                stack.extend(self.write_groups[next].iter().copied());
            }
        }
        false
    }

    /// Returns the write-group dependents of a component type.
    pub fn write_group(&self, target: ComponentTypeId) -> impl Iterator<Item = ComponentTypeId> + '_ {
        self.index_of(target)
            .map(|index| self.write_groups[index].as_slice())
            .unwrap_or(&[])
            .iter()
            .map(move |&i| self.metas[i].type_id())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct Translation;
    struct LocalToWorld;
    struct Parent;

    #[test]
    fn system_tags_are_registered() {
        let registry = TypeRegistry::new();
        assert!(registry.meta(ComponentTypeId::of::<Disabled>()).is_some());
        assert!(registry.meta(ComponentTypeId::of::<Prefab>()).is_some());
        assert!(registry.meta(ComponentTypeId::of::<ChunkHeader>()).is_some());
    }

    #[test]
    fn reregister_before_use() {
        let mut registry = TypeRegistry::new();
        let a = registry.get_or_register::<u32>();
        let b = registry.register_enableable::<u32>().unwrap();
        assert_eq!(a, b);
        assert!(registry.is_enableable(ComponentTypeId::of::<u32>()));
    }

    #[test]
    fn reregister_after_use_fails() {
        let mut registry = TypeRegistry::new();
        registry.get_or_register::<u32>();
        registry.mark_in_use(ComponentTypeId::of::<u32>());
        assert_eq!(
            registry.register_enableable::<u32>(),
            Err(RegistryError::AlreadyRegistered(ComponentTypeId::of::<u32>()))
        );
        // identical registration is fine
        assert!(registry.register(ComponentMeta::of::<u32>()).is_ok());
    }

    #[test]
    fn write_group_dependents() {
        let mut registry = TypeRegistry::new();
        registry
            .add_write_group_of::<Parent, LocalToWorld>()
            .unwrap();
        let dependents: Vec<_> = registry
            .write_group(ComponentTypeId::of::<LocalToWorld>())
            .collect();
        assert_eq!(dependents, vec![ComponentTypeId::of::<Parent>()]);
        assert_eq!(
            registry
                .write_group(ComponentTypeId::of::<Parent>())
                .count(),
            0
        );
    }

    #[test]
    fn write_group_cycle_is_rejected() {
        let mut registry = TypeRegistry::new();
        registry
            .add_write_group_of::<Translation, LocalToWorld>()
            .unwrap();
        registry.add_write_group_of::<Parent, Translation>().unwrap();

        let result = registry.add_write_group_of::<LocalToWorld, Parent>();
        assert_eq!(
            result,
            Err(RegistryError::WriteGroupCycle {
                member: ComponentTypeId::of::<LocalToWorld>(),
                target: ComponentTypeId::of::<Parent>(),
            })
        );

        let result = registry.add_write_group_of::<Parent, Parent>();
        assert!(matches!(result, Err(RegistryError::WriteGroupCycle { .. })));
    }

    #[test]
    fn unknown_component_in_write_group() {
        let mut registry = TypeRegistry::new();
        registry.get_or_register::<Parent>();
        assert_eq!(
            registry.add_write_group(
                ComponentTypeId::of::<Parent>(),
                ComponentTypeId::of::<Translation>()
            ),
            Err(RegistryError::UnknownComponent(ComponentTypeId::of::<
                Translation,
            >()))
        );
    }
}
