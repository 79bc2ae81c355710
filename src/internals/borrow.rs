//! Atomic runtime borrow checking for chunk columns.
//!
//! Each column of a chunk carries a [`BorrowFlag`]. Column views hold a [`Shared`] or
//! [`Exclusive`] guard which is released when the view is dropped. Borrowing a column which is
//! already mutably borrowed (or mutably borrowing a column which is already borrowed) is a
//! caller error and panics.

use std::{
    fmt::{Debug, Formatter},
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicIsize, Ordering},
};

/// The borrow state of a single column. Positive values count shared borrows, `-1` marks an
/// exclusive borrow.
#[derive(Default)]
pub struct BorrowFlag(AtomicIsize);

impl BorrowFlag {
    /// Attempts to take a shared borrow.
    pub fn try_shared(&self) -> Result<Shared<'_>, &'static str> {
        loop {
            let read = self.0.load(Ordering::SeqCst);
            if read < 0 {
                return Err("column already borrowed as mutable");
            }

            if self
                .0
                .compare_exchange_weak(read, read + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return Ok(Shared { state: Some(&self.0) });
            }
        }
    }

    /// Attempts to take an exclusive borrow.
    pub fn try_exclusive(&self) -> Result<Exclusive<'_>, &'static str> {
        match self
            .0
            .compare_exchange(0, -1, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => Ok(Exclusive { state: Some(&self.0) }),
            Err(x) if x < 0 => Err("column already borrowed as mutable"),
            Err(_) => Err("column already borrowed as immutable"),
        }
    }

    /// Takes a shared borrow.
    ///
    /// # Panics
    ///
    /// Panics if the column is mutably borrowed.
    pub fn shared(&self) -> Shared<'_> {
        self.try_shared().unwrap_or_else(|err| panic!("{}", err))
    }

    /// Takes an exclusive borrow.
    ///
    /// # Panics
    ///
    /// Panics if the column is borrowed.
    pub fn exclusive(&self) -> Exclusive<'_> {
        self.try_exclusive().unwrap_or_else(|err| panic!("{}", err))
    }

    /// Returns `true` if there are no outstanding borrows.
    pub fn is_free(&self) -> bool {
        self.0.load(Ordering::SeqCst) == 0
    }
}

impl Debug for BorrowFlag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "BorrowFlag({})", self.0.load(Ordering::Relaxed))
    }
}

/// A shared borrow guard.
#[derive(Debug)]
pub struct Shared<'a> {
    state: Option<&'a AtomicIsize>,
}

impl<'a> Shared<'a> {
    /// A guard which does not track any flag; used for empty views.
    pub(crate) fn untracked() -> Self {
        Self { state: None }
    }
}

impl<'a> Clone for Shared<'a> {
    fn clone(&self) -> Self {
        if let Some(state) = self.state {
            state.fetch_add(1, Ordering::SeqCst);
        }
        Self { state: self.state }
    }
}

impl<'a> Drop for Shared<'a> {
    fn drop(&mut self) {
        if let Some(state) = self.state {
            state.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// An exclusive borrow guard.
#[derive(Debug)]
pub struct Exclusive<'a> {
    state: Option<&'a AtomicIsize>,
}

impl<'a> Exclusive<'a> {
    pub(crate) fn untracked() -> Self {
        Self { state: None }
    }
}

impl<'a> Drop for Exclusive<'a> {
    fn drop(&mut self) {
        if let Some(state) = self.state {
            state.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// A shared reference guarded by a column borrow.
pub struct Ref<'a, T: ?Sized> {
    #[allow(dead_code)]
    // held for drop impl
    borrow: Shared<'a>,
    value: &'a T,
}

impl<'a, T: ?Sized> Ref<'a, T> {
    pub(crate) fn new(borrow: Shared<'a>, value: &'a T) -> Self {
        Self { borrow, value }
    }

    /// Maps the borrowed value into another reference guarded by the same borrow.
    pub fn map<K: ?Sized, F: FnOnce(&'a T) -> &'a K>(self, f: F) -> Ref<'a, K> {
        Ref {
            value: f(self.value),
            borrow: self.borrow,
        }
    }

    /// Maps the borrowed value into an optional reference guarded by the same borrow.
    pub fn filter_map<K: ?Sized, F: FnOnce(&'a T) -> Option<&'a K>>(
        self,
        f: F,
    ) -> Option<Ref<'a, K>> {
        let borrow = self.borrow;
        f(self.value).map(|value| Ref { borrow, value })
    }
}

impl<'a, T: ?Sized> Clone for Ref<'a, T> {
    fn clone(&self) -> Self {
        Self {
            borrow: self.borrow.clone(),
            value: self.value,
        }
    }
}

impl<'a, T: ?Sized> Deref for Ref<'a, T> {
    type Target = T;

    #[inline(always)]
    fn deref(&self) -> &Self::Target {
        self.value
    }
}

impl<'a, T: ?Sized + Debug> Debug for Ref<'a, T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.value.fmt(f)
    }
}

/// A mutable reference guarded by an exclusive column borrow.
pub struct RefMut<'a, T: ?Sized> {
    #[allow(dead_code)]
    // held for drop impl
    borrow: Exclusive<'a>,
    value: &'a mut T,
}

impl<'a, T: ?Sized> RefMut<'a, T> {
    pub(crate) fn new(borrow: Exclusive<'a>, value: &'a mut T) -> Self {
        Self { borrow, value }
    }

    /// Maps the borrowed value into another mutable reference guarded by the same borrow.
    pub fn map<K: ?Sized, F: FnOnce(&'a mut T) -> &'a mut K>(self, f: F) -> RefMut<'a, K> {
        RefMut {
            value: f(self.value),
            borrow: self.borrow,
        }
    }
}

impl<'a, T: ?Sized> Deref for RefMut<'a, T> {
    type Target = T;

    #[inline(always)]
    fn deref(&self) -> &Self::Target {
        self.value
    }
}

impl<'a, T: ?Sized> DerefMut for RefMut<'a, T> {
    #[inline(always)]
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.value
    }
}

impl<'a, T: ?Sized + Debug> Debug for RefMut<'a, T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.value.fmt(f)
    }
}
