//! Fingerprints identifying canonical process states.

use std::fmt;
use std::hash::{BuildHasher, Hash, Hasher};

/// A fingerprint is a 64-bit hash identifying a state.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(u64);

impl Fingerprint {
    #[inline]
    pub fn as_u64(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn from_u64(v: u64) -> Self {
        Fingerprint(v)
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({:016x})", self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Seeds of the secondary hasher used to detect fingerprint collisions.
const CHECK_SEEDS: [u64; 4] = [
    0x243f_6a88_85a3_08d3,
    0x1319_8a2e_0370_7344,
    0xa409_3822_299f_31d0,
    0x082e_fa98_ec4e_6c89,
];

/// Primary fingerprint plus an independent check hash of the same data.
///
/// Two states with equal fingerprints but different check hashes are a
/// collision; the visited store reports them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateKey {
    pub fingerprint: Fingerprint,
    pub check: u64,
}

/// Hashes a value into a [`StateKey`] with two independently keyed hashers.
pub struct KeyHasher {
    primary: ahash::AHasher,
    check: ahash::AHasher,
}

impl Default for KeyHasher {
    fn default() -> Self {
        let [a, b, c, d] = CHECK_SEEDS;
        Self {
            primary: ahash::AHasher::default(),
            check: ahash::RandomState::with_seeds(a, b, c, d).build_hasher(),
        }
    }
}

impl KeyHasher {
    pub fn finish_key(&self) -> StateKey {
        StateKey {
            fingerprint: Fingerprint(self.primary.finish()),
            check: self.check.finish(),
        }
    }
}

impl Hasher for KeyHasher {
    fn finish(&self) -> u64 {
        self.primary.finish()
    }

    fn write(&mut self, bytes: &[u8]) {
        self.primary.write(bytes);
        self.check.write(bytes);
    }

    fn write_u8(&mut self, i: u8) {
        self.primary.write_u8(i);
        self.check.write_u8(i);
    }

    fn write_u32(&mut self, i: u32) {
        self.primary.write_u32(i);
        self.check.write_u32(i);
    }

    fn write_u64(&mut self, i: u64) {
        self.primary.write_u64(i);
        self.check.write_u64(i);
    }

    fn write_usize(&mut self, i: usize) {
        self.primary.write_usize(i);
        self.check.write_usize(i);
    }
}

/// Fingerprint of a single hashable value.
pub fn fingerprint_of<T: Hash + ?Sized>(value: &T) -> Fingerprint {
    let mut hasher = ahash::AHasher::default();
    value.hash(&mut hasher);
    Fingerprint(hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_display() {
        let fp = Fingerprint::from_u64(0xab);
        assert_eq!(fp.to_string(), "00000000000000ab");
        assert_eq!(format!("{:?}", fp), "Fingerprint(00000000000000ab)");
        assert_eq!(fp.as_u64(), 0xab);
    }

    #[test]
    fn test_key_hasher_is_deterministic() {
        let key = |s: &str| {
            let mut h = KeyHasher::default();
            s.hash(&mut h);
            h.finish_key()
        };
        assert_eq!(key("state"), key("state"));
        assert_ne!(key("state"), key("other"));
        assert_eq!(fingerprint_of("state"), key("state").fingerprint);
    }
}
