//! Object identifiers.
//!
//! Git addresses every object by the SHA-1 of its canonical serialization.
//! `ObjectId` is fixed-size, zero-heap storage for that digest with
//! lexicographic ordering (the order used by pack index hash tables) and
//! lowercase-hex rendering matching Git's canonical form.

use std::fmt;

use sha1::{Digest, Sha1};

/// Digest length in bytes.
pub const ID_LEN: usize = 20;

/// Hex string length of a rendered identifier.
pub const ID_HEX_LEN: usize = 40;

/// A 20-byte SHA-1 object identifier.
///
/// Compares lexicographically on the raw bytes, which is the sort order
/// of pack index hash tables.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ObjectId([u8; ID_LEN]);

impl ObjectId {
    /// Wraps raw digest bytes.
    #[inline]
    #[must_use]
    pub const fn new(bytes: [u8; ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Computes the SHA-1 of a byte run.
    #[must_use]
    pub fn hash_of(bytes: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(bytes);
        Self(hasher.finalize().into())
    }

    /// Creates an identifier from a 20-byte slice.
    ///
    /// Returns `None` for any other length.
    #[must_use]
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; ID_LEN] = bytes.try_into().ok()?;
        Some(Self(bytes))
    }

    /// Parses 40 hex digits (either case) into an identifier.
    #[must_use]
    pub fn from_hex(hex: &[u8]) -> Option<Self> {
        if hex.len() != ID_HEX_LEN {
            return None;
        }
        let mut out = [0u8; ID_LEN];
        for (i, pair) in hex.chunks_exact(2).enumerate() {
            out[i] = (hex_val(pair[0])? << 4) | hex_val(pair[1])?;
        }
        Some(Self(out))
    }

    /// Returns the raw digest bytes.
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }

    /// Returns the first byte, used for fanout bucketing.
    #[inline]
    #[must_use]
    pub const fn first_byte(&self) -> u8 {
        self.0[0]
    }

    /// Appends the 40-digit lowercase hex form to `out`.
    pub fn push_hex(&self, out: &mut Vec<u8>) {
        const DIGITS: &[u8; 16] = b"0123456789abcdef";
        for &byte in &self.0 {
            out.push(DIGITS[(byte >> 4) as usize]);
            out.push(DIGITS[(byte & 0xf) as usize]);
        }
    }
}

#[inline]
fn hex_val(digit: u8) -> Option<u8> {
    match digit {
        b'0'..=b'9' => Some(digit - b'0'),
        b'a'..=b'f' => Some(digit - b'a' + 10),
        b'A'..=b'F' => Some(digit - b'A' + 10),
        _ => None,
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Lowercase hex, matching Git's canonical rendering.
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({self})")
    }
}

impl From<[u8; ID_LEN]> for ObjectId {
    fn from(bytes: [u8; ID_LEN]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for ObjectId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
