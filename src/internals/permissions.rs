//! Reader and writer sets declared by query descriptors.
//!
//! Column writes made through a query are validated against these sets.

use smallvec::SmallVec;
use std::fmt::{Debug, Display};

/// Describes read and read-write access to component types.
///
/// Items are kept in two partitions: `[read only | read-write]`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Permissions<T: PartialEq> {
    items: SmallVec<[T; 4]>,
    write: usize, // index of first read-write item
}

impl<T: PartialEq> Permissions<T> {
    /// Constructs a new empty permissions set.
    pub fn new() -> Self {
        Self {
            items: SmallVec::default(),
            write: 0,
        }
    }

    fn find(&self, item: &T) -> Option<usize> {
        self.items.iter().position(|x| x == item)
    }

    /// Adds an item to the set as readable. Items which are already writable stay writable.
    pub fn push_read(&mut self, item: T) {
        if self.find(&item).is_none() {
            // add to the end, then swap down into the read-only partition
            self.items.push(item);
            let index = self.items.len() - 1;
            self.items.swap(index, self.write);
            self.write += 1;
        }
    }

    /// Adds an item to the set as both readable and writable.
    pub fn push_write(&mut self, item: T) {
        match self.find(&item) {
            Some(index) if index < self.write => {
                // promote out of the read-only partition
                self.items.swap(index, self.write - 1);
                self.write -= 1;
            }
            Some(_) => {}
            None => self.items.push(item),
        }
    }

    /// Gets a slice of items which are afforded read access. All writable items are readable.
    pub fn reads(&self) -> &[T] {
        &self.items
    }

    /// Gets a slice of items which are afforded read access but not write access.
    pub fn reads_only(&self) -> &[T] {
        &self.items[..self.write]
    }

    /// Gets a slice of items which are afforded write access.
    pub fn writes(&self) -> &[T] {
        &self.items[self.write..]
    }

    /// Returns `true` if the set allows reading the given item.
    pub fn allows_read(&self, item: &T) -> bool {
        self.find(item).is_some()
    }

    /// Returns `true` if the set allows writing the given item.
    pub fn allows_write(&self, item: &T) -> bool {
        self.find(item).map(|i| i >= self.write).unwrap_or(false)
    }
}

impl<T: PartialEq> Default for Permissions<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn list<V, F: Fn(&V) -> String>(items: &[V], f: F) -> String {
    use itertools::Itertools;
    items
        .iter()
        .map(f)
        .fold1(|x, y| format!("{}, {}", x, y))
        .unwrap_or_else(|| "".to_owned())
}

impl<T: PartialEq + Debug> Debug for Permissions<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Permissions {{ reads: [{}], writes: [{}] }}",
            list(self.reads_only(), |x| format!("{:?}", x)),
            list(self.writes(), |x| format!("{:?}", x))
        )
    }
}

impl<T: PartialEq + Display> Display for Permissions<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "reads: [{}], writes: [{}]",
            list(self.reads_only(), |x| format!("{}", x)),
            list(self.writes(), |x| format!("{}", x))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::Permissions;

    #[test]
    fn push_read() {
        let mut permissions = Permissions::new();
        permissions.push_read(1usize);

        let empty: &[usize] = &[];
        assert_eq!(permissions.reads_only(), &[1usize]);
        assert_eq!(permissions.writes(), empty);
        assert!(permissions.allows_read(&1));
        assert!(!permissions.allows_write(&1));
    }

    #[test]
    fn push_write() {
        let mut permissions = Permissions::new();
        permissions.push_write(1usize);

        let empty: &[usize] = &[];
        assert_eq!(permissions.reads_only(), empty);
        assert_eq!(permissions.writes(), &[1usize]);
        assert!(permissions.allows_read(&1));
        assert!(permissions.allows_write(&1));
    }

    #[test]
    fn promote_read_to_write() {
        let mut permissions = Permissions::new();
        permissions.push_read(1usize);
        permissions.push_read(2usize);
        permissions.push_write(1usize);

        assert_eq!(permissions.reads_only(), &[2usize]);
        assert_eq!(permissions.writes(), &[1usize]);
    }

    #[test]
    fn write_is_not_demoted() {
        let mut permissions = Permissions::new();
        permissions.push_write(1usize);
        permissions.push_read(1usize);

        assert!(permissions.allows_write(&1));
        assert_eq!(permissions.reads().len(), 1);
    }
}
