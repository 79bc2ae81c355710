use std::hash::{BuildHasherDefault, Hasher};

/// A hasher optimized for hashing types that are represented as a u64.
///
/// Query descriptor hashes and entity indices are already well distributed, so they are
/// only spread with a single multiply.
#[derive(Default)]
pub struct U64Hasher(u64);

impl Hasher for U64Hasher {
    fn finish(&self) -> u64 {
        self.0
    }

    fn write(&mut self, bytes: &[u8]) {
        // fold arbitrary input into the state; u32/u64 keys take the fast paths below
        for chunk in bytes.chunks(8) {
            let mut word = [0u8; 8];
            word[..chunk.len()].copy_from_slice(chunk);
            self.write_u64(u64::from_ne_bytes(word));
        }
    }

    fn write_u32(&mut self, seed: u32) {
        self.write_u64(seed as u64)
    }

    fn write_u64(&mut self, seed: u64) {
        let max_prime = 11_400_714_819_323_198_549u64;
        self.0 = max_prime.wrapping_mul(seed ^ self.0);
    }
}

/// A `BuildHasher` for [`U64Hasher`].
pub type U64BuildHasher = BuildHasherDefault<U64Hasher>;

#[cfg(test)]
mod test {
    use super::*;
    use std::hash::Hash;

    #[test]
    fn hashes_u64_keys() {
        let hash = |value: u64| {
            let mut hasher = U64Hasher::default();
            value.hash(&mut hasher);
            hasher.finish()
        };

        assert_eq!(hash(1), hash(1));
        assert_ne!(hash(1), hash(2));
        assert_ne!(hash(0), hash(u64::MAX));
    }
}
