//! Archetypes are sets of entities which all contain exactly the same
//! set of component types.
//!
//! Entities in the same archetype have their components stored in chunks. Each chunk holds
//! one column per component type, laid out by the archetype's [`ArchetypeSchema`].
//!
//! All query matching is performed at the archetype level; per-entity decisions are only ever
//! made through enable bits.

use super::{
    buffer,
    component::{ChunkHeader, ComponentKind, ComponentMeta, ComponentTypeId, Disabled, Prefab},
    enable::MAX_CHUNK_CAPACITY,
    ChunkId,
};
use crate::internals::entity::Entity;
use smallvec::SmallVec;
use std::{
    ops::{Index, IndexMut},
    sync::Arc,
};

/// The byte alignment of every column within a chunk.
pub const COLUMN_ALIGNMENT: usize = 64;

/// The index of an archetype in a world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[repr(transparent)]
pub struct ArchetypeIndex(pub u32);

impl Index<ArchetypeIndex> for [Archetype] {
    type Output = Archetype;

    fn index(&self, index: ArchetypeIndex) -> &Self::Output {
        &self[index.0 as usize]
    }
}

impl IndexMut<ArchetypeIndex> for [Archetype] {
    fn index_mut(&mut self, index: ArchetypeIndex) -> &mut Self::Output {
        &mut self[index.0 as usize]
    }
}

impl Index<ArchetypeIndex> for Vec<Archetype> {
    type Output = Archetype;

    fn index(&self, index: ArchetypeIndex) -> &Self::Output {
        &self[index.0 as usize]
    }
}

impl IndexMut<ArchetypeIndex> for Vec<Archetype> {
    fn index_mut(&mut self, index: ArchetypeIndex) -> &mut Self::Output {
        &mut self[index.0 as usize]
    }
}

/// Describes where one component type lives in the chunks of an archetype.
#[derive(Debug, Clone, Copy)]
pub struct Field {
    meta: ComponentMeta,
    offset: usize,
    stride: usize,
    shared_slot: Option<usize>,
    enable_slot: Option<usize>,
}

impl Field {
    /// Returns the component's metadata.
    pub fn meta(&self) -> &ComponentMeta {
        &self.meta
    }

    /// Returns the component type.
    pub fn type_id(&self) -> ComponentTypeId {
        self.meta.type_id()
    }

    /// Returns the byte offset of the column from the start of the chunk's block.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Returns the number of bytes each row occupies in the column.
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Returns the index of the chunk's shared value slot, for shared components.
    pub fn shared_slot(&self) -> Option<usize> {
        self.shared_slot
    }

    /// Returns the index of the chunk's enable bits, for enableable components.
    pub fn enable_slot(&self) -> Option<usize> {
        self.enable_slot
    }

    /// Returns `true` if the column stores bytes in the chunk's block.
    pub fn has_storage(&self) -> bool {
        self.shared_slot.is_none()
    }
}

/// The layout of an archetype's chunks.
///
/// Fields are ordered by component type, matching the archetype's canonical type list.
#[derive(Debug)]
pub struct ArchetypeSchema {
    types: Vec<ComponentTypeId>,
    fields: Vec<Field>,
    capacity: usize,
    block_size: usize,
    block_align: usize,
    shared_count: usize,
    enable_count: usize,
}

impl ArchetypeSchema {
    /// Computes the schema for a set of components.
    ///
    /// Capacity is the number of rows which fit in `chunk_size` bytes, clamped to
    /// `1..=max_capacity` (and never above 128).
    pub fn new(metas: &[ComponentMeta], chunk_size: usize, max_capacity: usize) -> Self {
        let mut metas: SmallVec<[ComponentMeta; 8]> = metas.iter().copied().collect();
        metas.sort_by_key(|meta| meta.type_id());

        let strides: SmallVec<[usize; 8]> = metas.iter().map(column_stride).collect();
        let row_size = std::mem::size_of::<Entity>() + strides.iter().sum::<usize>();
        let max_capacity = max_capacity.clamp(1, MAX_CHUNK_CAPACITY);
        let capacity = (chunk_size / row_size.max(1)).clamp(1, max_capacity);

        let mut fields = Vec::with_capacity(metas.len());
        let mut cursor = 0;
        let mut block_align = COLUMN_ALIGNMENT;
        let mut shared_count = 0;
        let mut enable_count = 0;
        for (meta, stride) in metas.iter().zip(strides.iter()) {
            let shared_slot = if meta.kind() == ComponentKind::Shared {
                shared_count += 1;
                Some(shared_count - 1)
            } else {
                None
            };

            let enable_slot = if meta.is_enableable() {
                enable_count += 1;
                Some(enable_count - 1)
            } else {
                None
            };

            let align = COLUMN_ALIGNMENT.max(column_align(meta));
            block_align = block_align.max(align);
            let offset = buffer::round_up(cursor, align);
            cursor = offset + stride * capacity;

            fields.push(Field {
                meta: *meta,
                offset,
                stride: *stride,
                shared_slot,
                enable_slot,
            });
        }

        Self {
            types: metas.iter().map(|meta| meta.type_id()).collect(),
            fields,
            capacity,
            block_size: cursor,
            block_align,
            shared_count,
            enable_count,
        }
    }

    /// Returns the sorted component types of the archetype.
    pub fn types(&self) -> &[ComponentTypeId] {
        &self.types
    }

    /// Returns the fields of the archetype, in type order.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Returns the number of rows each chunk can hold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the size of each chunk's column block in bytes.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Returns the alignment of each chunk's column block.
    pub fn block_align(&self) -> usize {
        self.block_align
    }

    /// Returns the number of shared components in the archetype.
    pub fn shared_count(&self) -> usize {
        self.shared_count
    }

    /// Returns the number of enableable components in the archetype.
    pub fn enable_count(&self) -> usize {
        self.enable_count
    }

    /// Returns the field index of a component type.
    pub fn field_index(&self, type_id: ComponentTypeId) -> Option<usize> {
        self.types.binary_search(&type_id).ok()
    }

    /// Returns the field of a component type.
    pub fn field(&self, type_id: ComponentTypeId) -> Option<&Field> {
        self.field_index(type_id).map(|i| &self.fields[i])
    }

    /// Returns `true` if the archetype contains the component type.
    pub fn contains(&self, type_id: ComponentTypeId) -> bool {
        self.field_index(type_id).is_some()
    }
}

fn column_stride(meta: &ComponentMeta) -> usize {
    match meta.kind() {
        ComponentKind::Data => meta.size(),
        ComponentKind::Shared => 0,
        ComponentKind::Buffer {
            inline_capacity,
            element_size,
            element_align,
        } => buffer::row_stride(inline_capacity, element_size, element_align),
    }
}

fn column_align(meta: &ComponentMeta) -> usize {
    match meta.kind() {
        ComponentKind::Data => meta.align(),
        ComponentKind::Shared => 1,
        ComponentKind::Buffer { element_align, .. } => {
            element_align.max(std::mem::align_of::<buffer::BufferHeader>())
        }
    }
}

/// An archetype is a collection of entities which all have identical component types.
///
/// The archetype owns the ordered list of its chunks. Chunk order only changes when chunks are
/// created or released.
#[derive(Debug)]
pub struct Archetype {
    index: ArchetypeIndex,
    schema: Arc<ArchetypeSchema>,
    chunks: Vec<ChunkId>,
    entity_count: usize,
}

impl Archetype {
    pub(crate) fn new(index: ArchetypeIndex, schema: ArchetypeSchema) -> Self {
        Self {
            index,
            schema: Arc::new(schema),
            chunks: Vec::new(),
            entity_count: 0,
        }
    }

    /// Returns the index of the archetype.
    pub fn index(&self) -> ArchetypeIndex {
        self.index
    }

    /// Returns the layout of the archetype's chunks.
    pub fn schema(&self) -> &Arc<ArchetypeSchema> {
        &self.schema
    }

    /// Returns the sorted component types of the archetype.
    pub fn types(&self) -> &[ComponentTypeId] {
        self.schema.types()
    }

    /// Returns the archetype's chunks in order.
    pub fn chunks(&self) -> &[ChunkId] {
        &self.chunks
    }

    /// Returns the number of entities stored in the archetype.
    pub fn entity_count(&self) -> usize {
        self.entity_count
    }

    /// Returns `true` if entities of this archetype carry the [`Disabled`] tag.
    pub fn is_disabled(&self) -> bool {
        self.schema.contains(ComponentTypeId::of::<Disabled>())
    }

    /// Returns `true` if entities of this archetype carry the [`Prefab`] tag.
    pub fn is_prefab(&self) -> bool {
        self.schema.contains(ComponentTypeId::of::<Prefab>())
    }

    /// Returns `true` if rows of this archetype describe chunks rather than entities.
    pub fn is_chunk_header(&self) -> bool {
        self.schema.contains(ComponentTypeId::of::<ChunkHeader>())
    }

    pub(crate) fn push_chunk(&mut self, chunk: ChunkId) {
        self.chunks.push(chunk);
    }

    pub(crate) fn remove_chunk(&mut self, chunk: ChunkId) {
        if let Some(position) = self.chunks.iter().position(|c| *c == chunk) {
            self.chunks.remove(position);
        }
    }

    pub(crate) fn add_entities(&mut self, count: usize) {
        self.entity_count += count;
    }

    pub(crate) fn remove_entities(&mut self, count: usize) {
        self.entity_count -= count;
    }
}
