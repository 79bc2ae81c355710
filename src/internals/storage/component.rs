//! Contains types related to entity components.

use std::{
    any::TypeId,
    cmp::Ordering,
    fmt::{Display, Formatter},
    hash::Hasher,
};

/// A unique ID for a component type.
///
/// Component type IDs are totally ordered. Archetype type lists and query descriptors are
/// always sorted by this order.
#[derive(Copy, Clone, Debug, Eq)]
pub struct ComponentTypeId {
    pub(crate) type_id: TypeId,
    #[cfg(debug_assertions)]
    name: &'static str,
}

impl ComponentTypeId {
    /// Constructs the component type ID for the given component type.
    pub fn of<T: Component>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            #[cfg(debug_assertions)]
            name: std::any::type_name::<T>(),
        }
    }

    /// Returns the internal TypeID of the component.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }
}

impl std::hash::Hash for ComponentTypeId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

impl PartialEq for ComponentTypeId {
    fn eq(&self, other: &Self) -> bool {
        self.type_id.eq(&other.type_id)
    }
}

impl PartialOrd for ComponentTypeId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ComponentTypeId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.type_id.cmp(&other.type_id)
    }
}

impl Display for ComponentTypeId {
    #[cfg(debug_assertions)]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }

    #[cfg(not(debug_assertions))]
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.type_id)
    }
}

/// A marker trait for all types which can be attached to an entity.
///
/// This trait has a blanket impl for all applicable types.
pub trait Component: 'static + Sized + Send + Sync {}

impl<T: 'static + Sized + Send + Sync> Component for T {}

/// A component whose value is shared by every entity in a chunk.
///
/// Shared values are interned in the world's [`SharedValues`](super::shared::SharedValues) store
/// and each chunk stores a single index per shared component type.
pub trait SharedComponent: Component + Eq + std::hash::Hash + Clone {}

impl<T: Component + Eq + std::hash::Hash + Clone> SharedComponent for T {}

/// An element type which can be stored in a dynamic buffer component.
pub trait BufferElement: Component + Copy {}

impl<T: Component + Copy> BufferElement for T {}

/// Marks an entity as disabled. Archetypes containing this tag are only matched by queries
/// which explicitly require it.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Disabled;

/// Marks an entity as a prefab. Archetypes containing this tag are only matched by queries
/// which explicitly require it.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Prefab;

/// Marks an archetype whose rows describe chunk metadata rather than entities. Archetypes
/// containing this tag are only matched by queries which explicitly require it.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ChunkHeader;

/// Describes how a component's data is laid out in a chunk.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ComponentKind {
    /// One value per row.
    Data,
    /// One value index per chunk.
    Shared,
    /// A dynamically sized buffer per row, stored inline up to `inline_capacity` elements.
    Buffer {
        /// Number of elements stored inline before spilling to the heap.
        inline_capacity: usize,
        /// Size of a single element.
        element_size: usize,
        /// Alignment of a single element.
        element_align: usize,
    },
}

/// Contains information about the type of a component.
#[derive(Copy, Clone, Debug)]
pub struct ComponentMeta {
    type_id: ComponentTypeId,
    size: usize,
    align: usize,
    kind: ComponentKind,
    enableable: bool,
    drop_fn: Option<fn(*mut u8)>,
}

impl ComponentMeta {
    /// Returns the component meta of the data component type `T`.
    pub fn of<T: Component>() -> Self {
        ComponentMeta {
            type_id: ComponentTypeId::of::<T>(),
            size: std::mem::size_of::<T>(),
            align: std::mem::align_of::<T>(),
            kind: ComponentKind::Data,
            enableable: false,
            drop_fn: if std::mem::needs_drop::<T>() {
                Some(|ptr| unsafe { std::ptr::drop_in_place(ptr as *mut T) })
            } else {
                None
            },
        }
    }

    /// Returns the component meta of the shared component type `T`.
    ///
    /// Shared values live in the world's shared value store, so chunks only hold an index.
    pub fn shared<T: SharedComponent>() -> Self {
        ComponentMeta {
            type_id: ComponentTypeId::of::<T>(),
            size: std::mem::size_of::<T>(),
            align: std::mem::align_of::<T>(),
            kind: ComponentKind::Shared,
            enableable: false,
            drop_fn: None,
        }
    }

    /// Returns the component meta of a buffer of `T` elements with the given inline capacity.
    pub fn buffer<T: BufferElement>(inline_capacity: usize) -> Self {
        ComponentMeta {
            type_id: ComponentTypeId::of::<T>(),
            size: std::mem::size_of::<T>(),
            align: std::mem::align_of::<T>(),
            kind: ComponentKind::Buffer {
                inline_capacity,
                element_size: std::mem::size_of::<T>(),
                element_align: std::mem::align_of::<T>(),
            },
            enableable: false,
            drop_fn: None,
        }
    }

    /// Returns a copy of this meta marked as enableable.
    pub fn enableable(mut self) -> Self {
        self.enableable = true;
        self
    }

    /// Returns the type ID of the component.
    pub fn type_id(&self) -> ComponentTypeId {
        self.type_id
    }

    /// Returns the size of the component.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns the alignment of the component.
    pub fn align(&self) -> usize {
        self.align
    }

    /// Returns `true` if the component is zero sized.
    pub fn is_zero_sized(&self) -> bool {
        self.size == 0
    }

    /// Returns the storage kind of the component.
    pub fn kind(&self) -> ComponentKind {
        self.kind
    }

    /// Returns `true` if rows may individually enable and disable the component.
    pub fn is_enableable(&self) -> bool {
        self.enableable
    }

    /// Returns the number of buffer elements stored inline, if this is a buffer component.
    pub fn buffer_capacity(&self) -> Option<usize> {
        match self.kind {
            ComponentKind::Buffer {
                inline_capacity, ..
            } => Some(inline_capacity),
            _ => None,
        }
    }

    /// Drops the component.
    ///
    /// # Safety
    /// The caller must ensure that the memory location refered to by `value` is
    /// not accessed again before it is re-initialized.
    pub unsafe fn drop(&self, value: *mut u8) {
        if let Some(drop_fn) = self.drop_fn {
            drop_fn(value)
        }
    }
}
