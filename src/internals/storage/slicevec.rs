//! A vector of slices.

use derivative::Derivative;
use std::iter::{FusedIterator, IntoIterator};

/// A vector of slices.
///
/// Each slice is stored inline so as to be efficiently iterated through linearly.
#[derive(Derivative, Debug)]
#[derivative(Default(bound = ""))]
pub struct SliceVec<T> {
    data: Vec<T>,
    offsets: Vec<usize>,
}

impl<T> SliceVec<T> {
    /// Pushes a new slice onto the end of the vector.
    pub fn push<I: IntoIterator<Item = T>>(&mut self, items: I) {
        if self.offsets.is_empty() {
            self.offsets.push(0);
        }
        self.data.extend(items);
        self.offsets.push(self.data.len());
    }

    /// Returns the number of slices in the vector.
    pub fn len(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }

    /// Returns `true` if the vector holds no slices.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the slice at the given index.
    pub fn get(&self, index: usize) -> Option<&[T]> {
        if index < self.len() {
            Some(&self.data[self.offsets[index]..self.offsets[index + 1]])
        } else {
            None
        }
    }

    /// Gets an iterator over slices starting from the given index.
    pub fn iter_from(&self, start: usize) -> SliceVecIter<T> {
        let start = start.min(self.len());
        SliceVecIter {
            data: &self.data,
            offsets: self.offsets.get(start..).unwrap_or(&[]),
        }
    }
}

/// An iterator over slices in a `SliceVec`.
#[derive(Clone)]
pub struct SliceVecIter<'a, T> {
    data: &'a [T],
    offsets: &'a [usize],
}

impl<'a, T> Iterator for SliceVecIter<'a, T> {
    type Item = &'a [T];

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        match self.offsets {
            [start, end, ..] => {
                let slice = &self.data[*start..*end];
                self.offsets = &self.offsets[1..];
                Some(slice)
            }
            _ => None,
        }
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.offsets.len().saturating_sub(1);
        (len, Some(len))
    }
}

impl<'a, T> ExactSizeIterator for SliceVecIter<'a, T> {}
impl<'a, T> FusedIterator for SliceVecIter<'a, T> {}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn push_and_get() {
        let mut vec = SliceVec::default();
        vec.push(vec![1, 2, 3]);
        vec.push(Vec::new());
        vec.push(vec![4]);

        assert_eq!(vec.len(), 3);
        assert_eq!(vec.get(0), Some(&[1, 2, 3][..]));
        assert_eq!(vec.get(1), Some(&[][..]));
        assert_eq!(vec.get(2), Some(&[4][..]));
        assert_eq!(vec.get(3), None);
    }

    #[test]
    fn iter_from() {
        let mut vec = SliceVec::default();
        let slices = [[1, 2, 3], [4, 5, 6], [7, 8, 9]];

        for slice in &slices {
            vec.push(slice.iter().copied());
        }

        let collected: Vec<_> = vec.iter_from(1).collect();
        assert_eq!(collected, vec![&slices[1][..], &slices[2][..]]);
        assert_eq!(vec.iter_from(3).count(), 0);
        assert_eq!(vec.iter_from(10).count(), 0);
        assert_eq!(SliceVec::<usize>::default().iter_from(0).count(), 0);
    }
}
