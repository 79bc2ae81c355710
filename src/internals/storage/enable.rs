//! Per-row enable bits for enableable components.
//!
//! Every enableable column of a chunk owns an [`EnableBits`]: one bit per row (set = enabled)
//! paired with a count of disabled rows. The count is adjusted on every bit transition by the
//! same call that flips the bit, so it is never recomputed by scanning and stays exact under
//! concurrent toggles of different rows.

use std::{
    fmt::{Debug, Formatter},
    ops::Range,
    sync::atomic::{AtomicU64, AtomicUsize, Ordering},
};

/// The maximum number of rows a chunk may hold; two 64-bit words of enable bits per column.
pub const MAX_CHUNK_CAPACITY: usize = 128;

/// Returns a mask with the low `count` bits set.
#[inline]
pub fn row_mask(count: usize) -> u128 {
    if count >= MAX_CHUNK_CAPACITY {
        !0
    } else {
        (1u128 << count) - 1
    }
}

/// Enable bits and the disabled-row counter of one enableable column in one chunk.
pub struct EnableBits {
    words: [AtomicU64; 2],
    disabled: AtomicUsize,
}

impl Default for EnableBits {
    fn default() -> Self {
        // rows beyond the chunk's count are kept enabled so that appended rows start enabled
        Self {
            words: [AtomicU64::new(!0), AtomicU64::new(!0)],
            disabled: AtomicUsize::new(0),
        }
    }
}

impl EnableBits {
    #[inline]
    fn locate(row: usize) -> (usize, u64) {
        debug_assert!(row < MAX_CHUNK_CAPACITY);
        (row / 64, 1u64 << (row % 64))
    }

    /// Returns `true` if the row is enabled.
    #[inline]
    pub fn get(&self, row: usize) -> bool {
        let (word, bit) = Self::locate(row);
        self.words[word].load(Ordering::Acquire) & bit != 0
    }

    /// Sets the enabled state of a row, adjusting the disabled counter by the resulting delta.
    ///
    /// Returns `true` if the bit changed.
    pub fn set(&self, row: usize, enabled: bool) -> bool {
        let (word, bit) = Self::locate(row);
        if enabled {
            let previous = self.words[word].fetch_or(bit, Ordering::AcqRel);
            let changed = previous & bit == 0;
            if changed {
                self.disabled.fetch_sub(1, Ordering::AcqRel);
            }
            changed
        } else {
            let previous = self.words[word].fetch_and(!bit, Ordering::AcqRel);
            let changed = previous & bit != 0;
            if changed {
                self.disabled.fetch_add(1, Ordering::AcqRel);
            }
            changed
        }
    }

    /// Returns the number of disabled rows.
    #[inline]
    pub fn disabled_count(&self) -> usize {
        self.disabled.load(Ordering::Acquire)
    }

    /// Returns all 128 bits; bits at or beyond the chunk's count are always set.
    #[inline]
    pub fn mask(&self) -> u128 {
        let low = self.words[0].load(Ordering::Acquire) as u128;
        let high = self.words[1].load(Ordering::Acquire) as u128;
        low | (high << 64)
    }

    /// Removes `row` by moving the bit of `last` into it. `last` must be the final row of the
    /// chunk, which leaves the counted range.
    pub(crate) fn swap_remove(&mut self, row: usize, last: usize) {
        debug_assert!(row <= last);
        if !self.get(row) {
            *self.disabled.get_mut() -= 1;
        }

        let moved = self.get(last);
        self.write_bit(row, moved);
        self.write_bit(last, true);
    }

    fn write_bit(&mut self, row: usize, value: bool) {
        let (word, bit) = Self::locate(row);
        let word = self.words[word].get_mut();
        if value {
            *word |= bit;
        } else {
            *word &= !bit;
        }
    }

    /// Recounts disabled rows below `count`. Only used to verify the maintained counter.
    pub fn count_disabled(&self, count: usize) -> usize {
        (!self.mask() & row_mask(count)).count_ones() as usize
    }
}

impl Debug for EnableBits {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "EnableBits {{ mask: {:#034x}, disabled: {} }}",
            self.mask(),
            self.disabled_count()
        )
    }
}

/// A read-only handle to the enable bit of one row.
#[derive(Clone, Copy)]
pub struct EnabledRef<'a> {
    bits: &'a EnableBits,
    row: usize,
}

impl<'a> EnabledRef<'a> {
    pub(crate) fn new(bits: &'a EnableBits, row: usize) -> Self {
        Self { bits, row }
    }

    /// Returns `true` if the component is enabled on the row.
    pub fn is_enabled(&self) -> bool {
        self.bits.get(self.row)
    }
}

impl<'a> Debug for EnabledRef<'a> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "EnabledRef({}: {})", self.row, self.is_enabled())
    }
}

/// A read-write handle to the enable bit of one row.
pub struct EnabledRefMut<'a> {
    bits: &'a EnableBits,
    row: usize,
}

impl<'a> EnabledRefMut<'a> {
    pub(crate) fn new(bits: &'a EnableBits, row: usize) -> Self {
        Self { bits, row }
    }

    /// Returns `true` if the component is enabled on the row.
    pub fn is_enabled(&self) -> bool {
        self.bits.get(self.row)
    }

    /// Enables or disables the component on the row. Returns `true` if the state changed.
    pub fn set_enabled(&mut self, enabled: bool) -> bool {
        self.bits.set(self.row, enabled)
    }
}

impl<'a> Debug for EnabledRefMut<'a> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "EnabledRefMut({}: {})", self.row, self.is_enabled())
    }
}

/// The enable bits of one enableable column across a chunk's rows.
#[derive(Clone, Copy)]
pub struct EnabledColumn<'a> {
    bits: &'a EnableBits,
    len: usize,
    writable: bool,
}

impl<'a> EnabledColumn<'a> {
    pub(crate) fn new(bits: &'a EnableBits, len: usize, writable: bool) -> Self {
        Self {
            bits,
            len,
            writable,
        }
    }

    /// Returns the number of rows.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the chunk has no rows.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the number of disabled rows.
    pub fn disabled_count(&self) -> usize {
        self.bits.disabled_count()
    }

    /// Returns a read-only handle for a row.
    pub fn get(&self, row: usize) -> Option<EnabledRef<'a>> {
        if row < self.len {
            Some(EnabledRef::new(self.bits, row))
        } else {
            None
        }
    }

    /// Returns a read-write handle for a row.
    ///
    /// # Panics
    ///
    /// Panics if the column was obtained without write access.
    pub fn get_mut(&self, row: usize) -> Option<EnabledRefMut<'a>> {
        assert!(
            self.writable,
            "enable bits were borrowed without write access"
        );
        if row < self.len {
            Some(EnabledRefMut::new(self.bits, row))
        } else {
            None
        }
    }

    /// Returns the enabled mask of the chunk's rows.
    pub fn mask(&self) -> u128 {
        self.bits.mask() & row_mask(self.len)
    }
}

/// Iterates over the contiguous runs of set bits in a row mask, in ascending order.
#[derive(Debug, Clone)]
pub struct EnabledRanges {
    mask: u128,
}

impl EnabledRanges {
    /// Creates an iterator over the runs of set bits in `mask`.
    pub fn new(mask: u128) -> Self {
        Self { mask }
    }
}

impl Iterator for EnabledRanges {
    type Item = Range<usize>;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        if self.mask == 0 {
            return None;
        }

        let start = self.mask.trailing_zeros() as usize;
        let run = (!(self.mask >> start)).trailing_zeros() as usize;
        let end = start + run;

        // clear the run and everything below it
        self.mask = if end >= MAX_CHUNK_CAPACITY {
            0
        } else {
            self.mask & !row_mask(end)
        };

        Some(start..end)
    }
}

impl std::iter::FusedIterator for EnabledRanges {}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn toggle_round_trip() {
        let bits = EnableBits::default();
        assert!(bits.get(5));
        assert_eq!(bits.disabled_count(), 0);

        assert!(bits.set(5, false));
        assert!(!bits.get(5));
        assert_eq!(bits.disabled_count(), 1);

        // setting the same state again is not a transition
        assert!(!bits.set(5, false));
        assert_eq!(bits.disabled_count(), 1);

        assert!(bits.set(5, true));
        assert!(bits.get(5));
        assert_eq!(bits.disabled_count(), 0);
        assert_eq!(bits.mask(), !0);
    }

    #[test]
    fn high_word() {
        let bits = EnableBits::default();
        bits.set(64, false);
        bits.set(127, false);
        assert_eq!(bits.disabled_count(), 2);
        assert_eq!(bits.count_disabled(128), 2);
        assert_eq!(bits.count_disabled(100), 1);
        assert!(!bits.get(64));
        assert!(bits.get(63));
    }

    #[test]
    fn swap_remove_keeps_counter_exact() {
        let mut bits = EnableBits::default();
        let count = 10;
        bits.set(2, false);
        bits.set(9, false);

        // remove an enabled row, the disabled last row moves into it
        bits.swap_remove(4, count - 1);
        assert!(!bits.get(4));
        assert!(bits.get(9));
        assert_eq!(bits.disabled_count(), 2);
        assert_eq!(bits.count_disabled(count - 1), 2);

        // remove a disabled row
        bits.swap_remove(2, count - 2);
        assert_eq!(bits.disabled_count(), 1);
        assert_eq!(bits.count_disabled(count - 2), 1);

        // remove a disabled last row, its bit must be set again for the next push
        bits.set(7, false);
        assert_eq!(bits.disabled_count(), 2);
        bits.swap_remove(7, 7);
        assert_eq!(bits.disabled_count(), 1);
        assert!(bits.get(7));
        assert_eq!(bits.count_disabled(count - 3), 1);
        assert_eq!(!bits.mask() & !row_mask(count - 3), 0);
    }

    #[test]
    fn concurrent_toggles_on_disjoint_rows() {
        let bits = Arc::new(EnableBits::default());
        let threads: Vec<_> = (0..4)
            .map(|t| {
                let bits = bits.clone();
                std::thread::spawn(move || {
                    for round in 0..1000 {
                        for row in (t * 32)..(t * 32 + 32) {
                            bits.set(row, round % 2 == 1 || row % 3 != 0);
                        }
                    }
                })
            })
            .collect();

        for thread in threads {
            thread.join().unwrap();
        }

        // the final round (999) enables every row
        assert_eq!(bits.disabled_count(), 0);
        assert_eq!(bits.count_disabled(128), 0);

        for row in (0..128).step_by(3) {
            bits.set(row, false);
        }
        assert_eq!(bits.disabled_count(), bits.count_disabled(128));
    }

    #[test]
    fn ranges_half_enabled() {
        let mask = row_mask(64);
        let ranges: Vec<_> = EnabledRanges::new(mask).collect();
        assert_eq!(ranges, vec![0..64]);
    }

    #[test]
    fn ranges_split() {
        let mask = 0b1110_0110u128 | (1u128 << 127);
        let ranges: Vec<_> = EnabledRanges::new(mask).collect();
        assert_eq!(ranges, vec![1..3, 5..8, 127..128]);

        assert_eq!(EnabledRanges::new(!0).collect::<Vec<_>>(), vec![0..128]);
        assert_eq!(EnabledRanges::new(0).count(), 0);
    }
}
