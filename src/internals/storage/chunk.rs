//! Fixed capacity blocks of component rows.
//!
//! A chunk belongs to exactly one archetype and stores up to the archetype's capacity of rows.
//! Each column occupies a contiguous byte range of the chunk's block at the offset given by the
//! archetype schema. Rows are kept dense: removing a row moves the last row into its place.

use super::{
    archetype::{ArchetypeIndex, ArchetypeSchema, Field},
    buffer::BufferHeader,
    component::ComponentKind,
    enable::EnableBits,
    shared::SharedValueIndex,
    ChunkId,
};
use crate::internals::{borrow::BorrowFlag, entity::Entity};
use smallvec::SmallVec;
use std::{
    alloc::Layout,
    fmt::{Debug, Formatter},
    ptr::NonNull,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
};
use tracing::trace;

/// The version of a column or of a chunk's row order.
pub type Version = u32;

/// Returns `true` if `version` was stamped after `since`.
///
/// Versions wrap; a `since` of zero is older than every version.
#[inline]
pub fn is_newer(version: Version, since: Version) -> bool {
    since == 0 || (version.wrapping_sub(since) as i32) > 0
}

/// A fixed capacity block of rows for one archetype.
pub struct Chunk {
    id: ChunkId,
    archetype: ArchetypeIndex,
    schema: Arc<ArchetypeSchema>,
    block: NonNull<u8>,
    entities: Vec<Entity>,
    versions: Box<[AtomicU32]>,
    borrows: Box<[BorrowFlag]>,
    enabled: Box<[EnableBits]>,
    shared: SmallVec<[SharedValueIndex; 2]>,
    order_version: Version,
}

// chunks only hold `Component` data, which is `Send + Sync`; interior mutation of columns is
// guarded by the per-column borrow flags
unsafe impl Send for Chunk {}
unsafe impl Sync for Chunk {}

impl Chunk {
    pub(crate) fn new(
        id: ChunkId,
        archetype: ArchetypeIndex,
        schema: Arc<ArchetypeSchema>,
        shared: SmallVec<[SharedValueIndex; 2]>,
        version: Version,
    ) -> Self {
        assert_eq!(
            shared.len(),
            schema.shared_count(),
            "chunk requires one shared value per shared component"
        );

        let block = if schema.block_size() == 0 {
            // an aligned, non-null address which is never dereferenced for more than zero bytes
            unsafe { NonNull::new_unchecked(schema.block_align() as *mut u8) }
        } else {
            let layout = Self::layout(&schema);
            let ptr = unsafe { std::alloc::alloc(layout) };
            match NonNull::new(ptr) {
                Some(ptr) => ptr,
                None => std::alloc::handle_alloc_error(layout),
            }
        };

        trace!(
            chunk = ?id,
            archetype = archetype.0,
            capacity = schema.capacity(),
            bytes = schema.block_size(),
            "Allocated chunk"
        );

        let fields = schema.fields().len();
        Self {
            id,
            archetype,
            block,
            entities: Vec::with_capacity(schema.capacity()),
            versions: (0..fields).map(|_| AtomicU32::new(version)).collect(),
            borrows: (0..fields).map(|_| BorrowFlag::default()).collect(),
            enabled: (0..schema.enable_count())
                .map(|_| EnableBits::default())
                .collect(),
            shared,
            order_version: version,
            schema,
        }
    }

    fn layout(schema: &ArchetypeSchema) -> Layout {
        match Layout::from_size_align(schema.block_size(), schema.block_align()) {
            Ok(layout) => layout,
            Err(_) => panic!(
                "invalid chunk layout of {} bytes aligned to {}",
                schema.block_size(),
                schema.block_align()
            ),
        }
    }

    /// Returns the chunk's handle.
    pub fn id(&self) -> ChunkId {
        self.id
    }

    /// Returns the archetype the chunk belongs to.
    pub fn archetype(&self) -> ArchetypeIndex {
        self.archetype
    }

    /// Returns the layout of the chunk.
    pub fn schema(&self) -> &Arc<ArchetypeSchema> {
        &self.schema
    }

    /// Returns the number of rows in the chunk.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns `true` if the chunk has no rows.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Returns the maximum number of rows the chunk can hold.
    pub fn capacity(&self) -> usize {
        self.schema.capacity()
    }

    /// Returns `true` if no more rows can be added.
    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity()
    }

    /// Returns the entity stored in each row.
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// Returns the chunk's shared value indices, one per shared component in schema order.
    pub fn shared_values(&self) -> &[SharedValueIndex] {
        &self.shared
    }

    /// Returns the version at which rows were last added to or removed from the chunk.
    pub fn order_version(&self) -> Version {
        self.order_version
    }

    /// Returns the version at which a column was last written.
    pub fn version(&self, field: usize) -> Version {
        self.versions[field].load(Ordering::Acquire)
    }

    /// Stamps a column as written at `version`.
    pub(crate) fn set_version(&self, field: usize, version: Version) {
        self.versions[field].store(version, Ordering::Release);
    }

    /// Returns the borrow flag of a column.
    pub fn borrow_flag(&self, field: usize) -> &BorrowFlag {
        &self.borrows[field]
    }

    /// Returns the enable bits of an enableable column.
    pub fn enable_bits(&self, slot: usize) -> &EnableBits {
        &self.enabled[slot]
    }

    /// Returns the enable bits of the column for `field`, if it is enableable.
    pub fn field_enable_bits(&self, field: usize) -> Option<&EnableBits> {
        self.schema.fields()[field]
            .enable_slot()
            .map(|slot| &self.enabled[slot])
    }

    /// Returns a pointer to the given row of a column.
    pub(crate) fn row_ptr(&self, field: &Field, row: usize) -> *mut u8 {
        debug_assert!(row <= self.capacity());
        unsafe { self.block.as_ptr().add(field.offset() + field.stride() * row) }
    }

    /// Returns a typed slice over the rows of a data column.
    ///
    /// # Safety
    /// `T` must be the column's component type and the caller must hold a borrow of the column.
    pub(crate) unsafe fn column<T>(&self, field: usize) -> &[T] {
        let field = &self.schema.fields()[field];
        std::slice::from_raw_parts(self.row_ptr(field, 0) as *const T, self.len())
    }

    /// Returns a mutable typed slice over the rows of a data column.
    ///
    /// # Safety
    /// `T` must be the column's component type and the caller must hold an exclusive borrow of
    /// the column.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn column_mut<T>(&self, field: usize) -> &mut [T] {
        let field = &self.schema.fields()[field];
        std::slice::from_raw_parts_mut(self.row_ptr(field, 0) as *mut T, self.len())
    }

    /// Stamps every column and the row order with `version`.
    pub(crate) fn stamp(&mut self, version: Version) {
        for column in self.versions.iter_mut() {
            *column.get_mut() = version;
        }
        self.order_version = version;
    }

    /// Appends a row for `entity`, returning its index.
    ///
    /// Buffer columns are initialized empty. Data columns are left uninitialized.
    ///
    /// # Safety
    /// The caller must write every data column of the new row before it is read or dropped.
    pub(crate) unsafe fn push_entity(&mut self, entity: Entity) -> usize {
        assert!(
            !self.is_full(),
            "chunk overflow: attempted to push into a full chunk of capacity {}",
            self.capacity()
        );
        let row = self.entities.len();
        self.entities.push(entity);
        for field in self.schema.fields() {
            if let ComponentKind::Buffer {
                inline_capacity, ..
            } = field.meta().kind()
            {
                (self.row_ptr(field, row) as *mut BufferHeader)
                    .write(BufferHeader::empty(inline_capacity));
            }
        }
        row
    }

    /// Removes the last row, which was appended by [`push_entity`](Self::push_entity) but whose
    /// data columns were not all written. Values already written are leaked, not dropped.
    pub(crate) fn abandon_last_row(&mut self, row: usize) {
        assert_eq!(row + 1, self.len(), "only the last row can be abandoned");
        self.entities.pop();
    }

    /// Writes a data component into a row.
    ///
    /// # Safety
    /// `T` must be the component type of `field` and the row's value must be uninitialized.
    pub(crate) unsafe fn write<T>(&mut self, field: usize, row: usize, value: T) {
        let field = &self.schema.fields()[field];
        (self.row_ptr(field, row) as *mut T).write(value);
    }

    /// Drops the value of a column at a row.
    unsafe fn drop_value(&self, field: &Field, row: usize) {
        let ptr = self.row_ptr(field, row);
        match field.meta().kind() {
            ComponentKind::Data => field.meta().drop(ptr),
            ComponentKind::Buffer {
                element_size,
                element_align,
                ..
            } => (*(ptr as *mut BufferHeader)).free(element_size, element_align),
            ComponentKind::Shared => {}
        }
    }

    /// Replaces the value of a data column at a row, dropping the old value.
    ///
    /// # Safety
    /// `T` must be the component type of `field`.
    pub(crate) unsafe fn replace<T>(&mut self, field: usize, row: usize, value: T) {
        let field = &self.schema.fields()[field];
        let ptr = self.row_ptr(field, row) as *mut T;
        std::ptr::drop_in_place(ptr);
        ptr.write(value);
    }

    /// Removes a row by moving the last row into its place.
    ///
    /// Returns the entity which now occupies `row`, if a row was moved.
    pub(crate) fn swap_remove(&mut self, row: usize, drop_components: bool) -> Option<Entity> {
        assert!(row < self.len(), "row {} out of bounds", row);
        let last = self.len() - 1;

        for field in self.schema.fields().iter().filter(|f| f.has_storage()) {
            unsafe {
                if drop_components {
                    self.drop_value(field, row);
                }
                if row != last && field.stride() > 0 {
                    std::ptr::copy_nonoverlapping(
                        self.row_ptr(field, last),
                        self.row_ptr(field, row),
                        field.stride(),
                    );
                }
            }
        }

        for bits in self.enabled.iter_mut() {
            bits.swap_remove(row, last);
        }

        self.entities.swap_remove(row);
        if row != last {
            Some(self.entities[row])
        } else {
            None
        }
    }

    /// Moves a row into another chunk.
    ///
    /// Columns present in both chunks are moved along with their enabled state. Columns missing
    /// from `dst` are dropped. Buffer columns new to `dst` are initialized empty; data columns new
    /// to `dst` are left uninitialized.
    ///
    /// Returns the row in `dst` and the entity which now occupies `row` in `self`, if any.
    ///
    /// # Safety
    /// The caller must write every data column which `dst` has and `self` lacks.
    pub(crate) unsafe fn move_row(&mut self, row: usize, dst: &mut Chunk) -> (usize, Option<Entity>) {
        let entity = self.entities[row];
        let dst_row = dst.push_entity(entity);

        let src_schema = self.schema.clone();
        for field in src_schema.fields() {
            match dst.schema.field_index(field.type_id()) {
                Some(dst_index) => {
                    let dst_field = dst.schema.fields()[dst_index];
                    if field.has_storage() && field.stride() > 0 {
                        std::ptr::copy_nonoverlapping(
                            self.row_ptr(field, row),
                            dst.row_ptr(&dst_field, dst_row),
                            field.stride(),
                        );
                    }
                    if let (Some(src_slot), Some(dst_slot)) =
                        (field.enable_slot(), dst_field.enable_slot())
                    {
                        let enabled = self.enabled[src_slot].get(row);
                        dst.enabled[dst_slot].set(dst_row, enabled);
                    }
                }
                None if field.has_storage() => self.drop_value(field, row),
                None => {}
            }
        }

        let moved = self.swap_remove(row, false);
        (dst_row, moved)
    }
}

impl Drop for Chunk {
    fn drop(&mut self) {
        for field in self.schema.fields().iter().filter(|f| f.has_storage()) {
            for row in 0..self.entities.len() {
                unsafe { self.drop_value(field, row) };
            }
        }

        if self.schema.block_size() > 0 {
            unsafe { std::alloc::dealloc(self.block.as_ptr(), Self::layout(&self.schema)) };
        }
    }
}

impl Debug for Chunk {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunk")
            .field("id", &self.id)
            .field("archetype", &self.archetype)
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .field("order_version", &self.order_version)
            .finish()
    }
}
