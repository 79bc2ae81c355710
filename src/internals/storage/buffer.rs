//! Dynamic buffer components.
//!
//! Every row of a buffer column starts with a [`BufferHeader`] followed by space for
//! `inline_capacity` elements. Buffers which grow past their inline capacity move their elements
//! into a heap allocation owned by the header. Buffer elements are `Copy`, so moving a row between
//! chunks is a plain byte copy of the header and inline storage.

use super::component::BufferElement;
use crate::internals::borrow::{Exclusive, Shared};
use std::{
    alloc::Layout,
    fmt::{Debug, Formatter},
    marker::PhantomData,
    ops::{Deref, DerefMut},
    ptr::NonNull,
};

/// The header stored at the start of every buffer row.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct BufferHeader {
    len: usize,
    capacity: usize,
    heap: *mut u8,
}

impl BufferHeader {
    /// Constructs an empty header for a buffer with the given inline capacity.
    pub fn empty(inline_capacity: usize) -> Self {
        Self {
            len: 0,
            capacity: inline_capacity,
            heap: std::ptr::null_mut(),
        }
    }

    /// Returns the number of elements in the buffer.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the buffer has no elements.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns `true` if the elements live in a heap allocation.
    pub fn is_spilled(&self) -> bool {
        !self.heap.is_null()
    }

    /// Frees the heap allocation of a spilled buffer.
    ///
    /// # Safety
    /// `element_size` and `element_align` must describe the element type the buffer was created
    /// with, and the header must not be used again.
    pub(crate) unsafe fn free(&mut self, element_size: usize, element_align: usize) {
        if self.is_spilled() && element_size > 0 {
            let layout = Layout::from_size_align_unchecked(element_size * self.capacity, element_align);
            std::alloc::dealloc(self.heap, layout);
        }
        self.heap = std::ptr::null_mut();
        self.len = 0;
    }
}

/// Returns the offset of the inline elements from the start of a buffer row.
pub fn inline_offset(element_align: usize) -> usize {
    round_up(std::mem::size_of::<BufferHeader>(), element_align)
}

/// Returns the number of bytes a buffer row occupies.
pub fn row_stride(inline_capacity: usize, element_size: usize, element_align: usize) -> usize {
    let align = element_align.max(std::mem::align_of::<BufferHeader>());
    round_up(
        inline_offset(element_align) + inline_capacity * element_size,
        align,
    )
}

pub(crate) fn round_up(value: usize, align: usize) -> usize {
    (value + align - 1) / align * align
}

/// A read-only view of one entity's buffer.
pub struct BufferRef<'a, T: BufferElement> {
    #[allow(dead_code)]
    // held for drop impl
    borrow: Shared<'a>,
    elements: &'a [T],
}

impl<'a, T: BufferElement> BufferRef<'a, T> {
    /// # Safety
    /// `row` must point at an initialized buffer row of element type `T`.
    pub(crate) unsafe fn from_row(row: *const u8, borrow: Shared<'a>) -> Self {
        let header = &*(row as *const BufferHeader);
        let data = if header.is_spilled() {
            header.heap as *const T
        } else {
            row.add(inline_offset(std::mem::align_of::<T>())) as *const T
        };
        let data = if header.len == 0 {
            NonNull::dangling().as_ptr()
        } else {
            data
        };
        Self {
            borrow,
            elements: std::slice::from_raw_parts(data, header.len),
        }
    }

    /// Returns the buffer's elements.
    pub fn as_slice(&self) -> &'a [T] {
        self.elements
    }
}

impl<'a, T: BufferElement> Deref for BufferRef<'a, T> {
    type Target = [T];

    fn deref(&self) -> &Self::Target {
        self.elements
    }
}

impl<'a, T: BufferElement + Debug> Debug for BufferRef<'a, T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.elements.iter()).finish()
    }
}

/// A mutable view of one entity's buffer.
pub struct BufferMut<'a, T: BufferElement> {
    #[allow(dead_code)]
    // held for drop impl
    borrow: Exclusive<'a>,
    row: NonNull<u8>,
    inline_capacity: usize,
    _phantom: PhantomData<&'a mut T>,
}

impl<'a, T: BufferElement> BufferMut<'a, T> {
    /// # Safety
    /// `row` must point at an initialized buffer row of element type `T` with the given inline
    /// capacity, and no other reference to the row may exist for `'a`.
    pub(crate) unsafe fn from_row(
        row: *mut u8,
        inline_capacity: usize,
        borrow: Exclusive<'a>,
    ) -> Self {
        Self {
            borrow,
            row: NonNull::new_unchecked(row),
            inline_capacity,
            _phantom: PhantomData,
        }
    }

    fn header(&self) -> &BufferHeader {
        unsafe { &*(self.row.as_ptr() as *const BufferHeader) }
    }

    fn header_mut(&mut self) -> &mut BufferHeader {
        unsafe { &mut *(self.row.as_ptr() as *mut BufferHeader) }
    }

    fn data_ptr(&self) -> *mut T {
        let header = self.header();
        if header.is_spilled() {
            header.heap as *mut T
        } else {
            unsafe { self.row.as_ptr().add(inline_offset(std::mem::align_of::<T>())) as *mut T }
        }
    }

    /// Returns the number of elements in the buffer.
    pub fn len(&self) -> usize {
        self.header().len
    }

    /// Returns `true` if the buffer has no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of elements the buffer can hold without reallocating.
    pub fn capacity(&self) -> usize {
        self.header().capacity
    }

    /// Returns `true` if the elements have moved out of inline storage.
    pub fn is_spilled(&self) -> bool {
        self.header().is_spilled()
    }

    /// Ensures there is room for `additional` more elements.
    pub fn reserve(&mut self, additional: usize) {
        let required = self.len() + additional;
        if required <= self.capacity() || std::mem::size_of::<T>() == 0 {
            return;
        }

        let new_capacity = required.max(self.capacity() * 2).max(self.inline_capacity);
        let layout = match Layout::array::<T>(new_capacity) {
            Ok(layout) => layout,
            Err(_) => panic!("buffer capacity overflow"),
        };

        unsafe {
            let new_data = std::alloc::alloc(layout);
            if new_data.is_null() {
                std::alloc::handle_alloc_error(layout);
            }

            let len = self.len();
            std::ptr::copy_nonoverlapping(self.data_ptr(), new_data as *mut T, len);

            let header = self.header_mut();
            header.free(std::mem::size_of::<T>(), std::mem::align_of::<T>());
            header.heap = new_data;
            header.capacity = new_capacity;
            header.len = len;
        }
    }

    /// Appends an element.
    pub fn push(&mut self, value: T) {
        self.reserve(1);
        unsafe {
            let len = self.len();
            self.data_ptr().add(len).write(value);
            self.header_mut().len = len + 1;
        }
    }

    /// Appends all elements of a slice.
    pub fn extend_from_slice(&mut self, values: &[T]) {
        self.reserve(values.len());
        unsafe {
            let len = self.len();
            std::ptr::copy_nonoverlapping(values.as_ptr(), self.data_ptr().add(len), values.len());
            self.header_mut().len = len + values.len();
        }
    }

    /// Removes the last element.
    pub fn pop(&mut self) -> Option<T> {
        let len = self.len();
        if len == 0 {
            return None;
        }

        self.header_mut().len = len - 1;
        unsafe { Some(self.data_ptr().add(len - 1).read()) }
    }

    /// Removes all elements. Heap storage is kept.
    pub fn clear(&mut self) {
        self.header_mut().len = 0;
    }

    /// Returns the buffer's elements.
    pub fn as_slice(&self) -> &[T] {
        let len = self.len();
        if len == 0 {
            return &[];
        }
        unsafe { std::slice::from_raw_parts(self.data_ptr(), len) }
    }

    /// Returns the buffer's elements mutably.
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        let len = self.len();
        if len == 0 {
            return &mut [];
        }
        unsafe { std::slice::from_raw_parts_mut(self.data_ptr(), len) }
    }
}

impl<'a, T: BufferElement> Deref for BufferMut<'a, T> {
    type Target = [T];

    fn deref(&self) -> &Self::Target {
        self.as_slice()
    }
}

impl<'a, T: BufferElement> DerefMut for BufferMut<'a, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.as_mut_slice()
    }
}

impl<'a, T: BufferElement + Debug> Debug for BufferMut<'a, T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.as_slice().iter()).finish()
    }
}
