use crate::internals::{
    borrow::{Exclusive, Shared},
    storage::{
        buffer::{BufferMut, BufferRef},
        chunk::Chunk,
        component::{BufferElement, ComponentKind},
    },
};
use std::marker::PhantomData;

fn inline_capacity(chunk: &Chunk, field: usize) -> usize {
    match chunk.schema().fields()[field].meta().kind() {
        ComponentKind::Buffer {
            inline_capacity, ..
        } => inline_capacity,
        _ => panic!(
            "component {} is not stored as a buffer column",
            chunk.schema().fields()[field].type_id()
        ),
    }
}

/// The buffers of one buffer column across a chunk's rows.
pub struct BufferColumn<'a, T: BufferElement> {
    borrow: Shared<'a>,
    column: Option<(&'a Chunk, usize)>,
    _phantom: PhantomData<&'a [T]>,
}

impl<'a, T: BufferElement> BufferColumn<'a, T> {
    pub(crate) fn new(chunk: &'a Chunk, field: usize) -> Self {
        let _ = inline_capacity(chunk, field);
        Self {
            borrow: chunk.borrow_flag(field).shared(),
            column: Some((chunk, field)),
            _phantom: PhantomData,
        }
    }

    pub(crate) fn empty() -> Self {
        Self {
            borrow: Shared::untracked(),
            column: None,
            _phantom: PhantomData,
        }
    }

    /// Returns the number of rows.
    pub fn len(&self) -> usize {
        self.column.map(|(chunk, _)| chunk.len()).unwrap_or(0)
    }

    /// Returns `true` if there are no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the buffer of a row.
    pub fn get(&self, row: usize) -> Option<BufferRef<'a, T>> {
        let (chunk, field) = self.column?;
        if row >= chunk.len() {
            return None;
        }
        let ptr = chunk.row_ptr(&chunk.schema().fields()[field], row);
        // safety: the row holds an initialized buffer of T and the column is borrowed
        Some(unsafe { BufferRef::from_row(ptr, self.borrow.clone()) })
    }

    /// Iterates over the buffers of every row.
    pub fn iter(&self) -> impl Iterator<Item = BufferRef<'a, T>> + '_ {
        (0..self.len()).filter_map(move |row| self.get(row))
    }
}

/// The buffers of one buffer column across a chunk's rows, with write access.
pub struct BufferColumnMut<'a, T: BufferElement> {
    #[allow(dead_code)]
    // held for drop impl
    borrow: Exclusive<'a>,
    column: Option<(&'a Chunk, usize, usize)>,
    _phantom: PhantomData<&'a mut [T]>,
}

impl<'a, T: BufferElement> BufferColumnMut<'a, T> {
    pub(crate) fn new(chunk: &'a Chunk, field: usize) -> Self {
        let inline_capacity = inline_capacity(chunk, field);
        Self {
            borrow: chunk.borrow_flag(field).exclusive(),
            column: Some((chunk, field, inline_capacity)),
            _phantom: PhantomData,
        }
    }

    pub(crate) fn empty() -> Self {
        Self {
            borrow: Exclusive::untracked(),
            column: None,
            _phantom: PhantomData,
        }
    }

    /// Returns the number of rows.
    pub fn len(&self) -> usize {
        self.column.map(|(chunk, ..)| chunk.len()).unwrap_or(0)
    }

    /// Returns `true` if there are no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the buffer of a row.
    pub fn get(&self, row: usize) -> Option<BufferRef<'_, T>> {
        let (chunk, field, _) = self.column?;
        if row >= chunk.len() {
            return None;
        }
        let ptr = chunk.row_ptr(&chunk.schema().fields()[field], row);
        // safety: the column is exclusively borrowed by self, which is borrowed for the result
        Some(unsafe { BufferRef::from_row(ptr, Shared::untracked()) })
    }

    /// Returns the buffer of a row with write access.
    pub fn get_mut(&mut self, row: usize) -> Option<BufferMut<'_, T>> {
        let (chunk, field, inline_capacity) = self.column?;
        if row >= chunk.len() {
            return None;
        }
        let ptr = chunk.row_ptr(&chunk.schema().fields()[field], row);
        // safety: the column is exclusively borrowed by self, which is mutably borrowed for the
        // result
        Some(unsafe { BufferMut::from_row(ptr, inline_capacity, Exclusive::untracked()) })
    }
}
