// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! A deterministic, length-prefixed hash over an ordered set
//! of `(key, bytes)` pairs.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A 128-bit content digest. Rendered as lowercase hex for file names and
/// log lines.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(pub u128);

impl Fingerprint {
    pub fn to_hex(self) -> String {
        format!("{:032x}", self.0)
    }

    /// The first two hex characters, used as the cache's sharding directory.
    pub fn shard(self) -> String {
        self.to_hex()[..2].to_string()
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

const FNV_OFFSET_LO: u64 = 0xcbf29ce484222325;
const FNV_OFFSET_HI: u64 = 0x100000001b3cafe1;
const FNV_PRIME: u64 = 0x100000001b3;

/// Accumulates length-prefixed fields into a 128-bit digest. Two
/// independent 64-bit FNV-1a lanes, seeded with different offset bases, are
/// run over the same byte stream and concatenated; this keeps the
/// implementation auditable in-crate, using an explicit
/// length-prefix discipline over importing an opaque hashing crate, while
/// giving collision resistance well beyond what a single 64-bit lane
/// offers.
#[derive(Debug, Clone)]
pub struct FingerprintHasher {
    lo: u64,
    hi: u64,
}

impl Default for FingerprintHasher {
    fn default() -> Self {
        FingerprintHasher {
            lo: FNV_OFFSET_LO,
            hi: FNV_OFFSET_HI,
        }
    }
}

impl FingerprintHasher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one field, prefixed with its length as a little-endian u64,
    /// precluding boundary ambiguity between adjacent fields.
    pub fn feed(&mut self, key: &str, bytes: &[u8]) -> &mut Self {
        self.feed_bytes(key.as_bytes());
        self.feed_bytes(bytes);
        self
    }

    fn feed_bytes(&mut self, bytes: &[u8]) {
        let len = (bytes.len() as u64).to_le_bytes();
        self.fold(&len);
        self.fold(bytes);
    }

    fn fold(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.lo ^= byte as u64;
            self.lo = self.lo.wrapping_mul(FNV_PRIME);
            self.hi ^= (byte as u64).rotate_left(13);
            self.hi = self.hi.wrapping_mul(FNV_PRIME);
        }
    }

    pub fn finish(&self) -> Fingerprint {
        Fingerprint(((self.hi as u128) << 64) | self.lo as u128)
    }
}

/// Convenience: hash an ordered sequence of `(key, bytes)` pairs in one
/// call. Same inputs in the same order always produce the same hash.
pub fn fingerprint_of<'a>(fields: impl IntoIterator<Item = (&'a str, &'a [u8])>) -> Fingerprint {
    let mut hasher = FingerprintHasher::new();
    for (key, bytes) in fields {
        hasher.feed(key, bytes);
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_inputs_same_order_are_stable() {
        let a = fingerprint_of(vec![("name", b"build".as_slice()), ("cmd", b"make".as_slice())]);
        let b = fingerprint_of(vec![("name", b"build".as_slice()), ("cmd", b"make".as_slice())]);
        assert_eq!(a, b);
    }

    #[test]
    fn changing_any_field_changes_the_hash() {
        let a = fingerprint_of(vec![("name", b"build".as_slice()), ("cmd", b"make".as_slice())]);
        let b = fingerprint_of(vec![("name", b"build".as_slice()), ("cmd", b"make2".as_slice())]);
        assert_ne!(a, b);
    }

    #[test]
    fn order_matters_length_prefix_prevents_boundary_ambiguity() {
        // Without length prefixes, ("ab","c") and ("a","bc") would collide.
        let a = fingerprint_of(vec![("ab", b"c".as_slice())]);
        let b = fingerprint_of(vec![("a", b"bc".as_slice())]);
        assert_ne!(a, b);
    }

    #[test]
    fn hex_rendering_is_lowercase_and_32_chars() {
        let fp = fingerprint_of(vec![("k", b"v".as_slice())]);
        let hex = fp.to_hex();
        assert_eq!(hex.len(), 32);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn shard_is_first_two_hex_chars() {
        let fp = fingerprint_of(vec![("k", b"v".as_slice())]);
        assert_eq!(fp.shard(), fp.to_hex()[..2].to_string());
    }
}
