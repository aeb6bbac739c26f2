//! Pack index (`.idx`) v2 lookup.
//!
//! The index maps sorted object identifiers to byte offsets in the
//! companion pack. Only the 256-entry fanout is held in memory; the hash,
//! CRC, and offset tables are read on demand through the byte source.
//!
//! # Layout (v2)
//! ```text
//! +------------------+
//! | Magic (4B)       |  0xff 't' 'O' 'c'
//! | Version (4B)     |  big-endian 2
//! +------------------+
//! | Fanout (1024B)   |  256 * u32 BE cumulative counts
//! +------------------+
//! | Hash table       |  N * 20 bytes, sorted
//! +------------------+
//! | CRC table        |  N * 4 bytes (not read)
//! +------------------+
//! | Offset table     |  N * 4 bytes (MSB set -> large offset index)
//! +------------------+
//! | Large offsets    |  M * 8 bytes
//! +------------------+
//! | Pack checksum    |  20 bytes (not validated)
//! | Index checksum   |  20 bytes (not validated)
//! +------------------+
//! ```
//!
//! # Invariants
//! - Fanout values are non-decreasing; `fanout[255]` is the object count.
//! - The file is large enough for all fixed-size tables.

use std::fmt;

use crate::object_id::{ObjectId, ID_LEN};
use crate::source::{ByteSource, SourceError};

/// Index magic bytes for the v2 format.
const IDX_MAGIC: [u8; 4] = [0xff, b't', b'O', b'c'];
/// The only supported index version.
const IDX_VERSION: u32 = 2;
/// Fanout entries, one per leading hash byte.
const FANOUT_ENTRIES: usize = 256;
/// Header plus fanout, in bytes.
const IDX_HEADER_SIZE: u64 = 8 + (FANOUT_ENTRIES as u64) * 4;
/// MSB flag redirecting into the large offset table.
const LARGE_OFFSET_FLAG: u32 = 0x8000_0000;
/// Two trailing 20-byte checksums.
const TRAILER_SIZE: u64 = 40;

/// Errors from pack index parsing and lookup.
#[derive(Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum IdxError {
    /// The magic bytes are wrong.
    BadMagic,
    /// The index version is not 2.
    UnsupportedVersion { version: u32 },
    /// The index is malformed.
    Corrupt { detail: &'static str },
    /// A large-offset indirection points outside the table.
    LargeOffsetOutOfBounds { index: u32, count: u64 },
    /// Positioned read failed.
    Source(SourceError),
}

impl fmt::Display for IdxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadMagic => write!(f, "bad magic number in index file"),
            Self::UnsupportedVersion { version } => {
                write!(f, "unsupported index version: {version} (expected 2)")
            }
            Self::Corrupt { detail } => write!(f, "corrupt pack index: {detail}"),
            Self::LargeOffsetOutOfBounds { index, count } => {
                write!(f, "large offset index out of bounds: {index} >= {count}")
            }
            Self::Source(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for IdxError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Source(err) => Some(err),
            _ => None,
        }
    }
}

impl From<SourceError> for IdxError {
    fn from(err: SourceError) -> Self {
        Self::Source(err)
    }
}

/// Pack index v2 reader over a positioned byte source.
///
/// The fanout is loaded at open; all table reads go through the source.
#[derive(Debug)]
pub struct PackIndex<S> {
    source: S,
    fanout: [u32; FANOUT_ENTRIES],
}

impl<S: ByteSource> PackIndex<S> {
    /// Opens an index: validates magic and version, loads the fanout and
    /// checks it is monotonic, and verifies the file is large enough for
    /// the tables the fanout implies.
    pub fn open(source: S) -> Result<Self, IdxError> {
        let mut header = [0u8; IDX_HEADER_SIZE as usize];
        source
            .read_exact_at(0, &mut header)
            .map_err(|_| IdxError::Corrupt {
                detail: "file too small for header",
            })?;

        if header[0..4] != IDX_MAGIC {
            return Err(IdxError::BadMagic);
        }
        let version = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
        if version != IDX_VERSION {
            return Err(IdxError::UnsupportedVersion { version });
        }

        let mut fanout = [0u32; FANOUT_ENTRIES];
        let mut prev = 0u32;
        for (i, slot) in fanout.iter_mut().enumerate() {
            let at = 8 + i * 4;
            let value =
                u32::from_be_bytes([header[at], header[at + 1], header[at + 2], header[at + 3]]);
            if value < prev {
                return Err(IdxError::Corrupt {
                    detail: "fanout not monotonic",
                });
            }
            prev = value;
            *slot = value;
        }

        let count = u64::from(prev);
        let min_size = IDX_HEADER_SIZE + count * (ID_LEN as u64 + 4 + 4) + TRAILER_SIZE;
        if source.len() < min_size {
            return Err(IdxError::Corrupt {
                detail: "file too small for object count",
            });
        }

        Ok(Self { source, fanout })
    }

    /// Returns the number of objects indexed.
    #[inline]
    #[must_use]
    pub fn object_count(&self) -> u32 {
        self.fanout[FANOUT_ENTRIES - 1]
    }

    /// Returns the fanout value for a leading byte: the exclusive upper
    /// bound of that byte's bucket in the hash table.
    #[inline]
    #[must_use]
    pub fn fanout(&self, first_byte: u8) -> u32 {
        self.fanout[first_byte as usize]
    }

    /// Reads the identifier at a table position.
    pub fn oid_at(&self, idx: u32) -> Result<ObjectId, IdxError> {
        debug_assert!(idx < self.object_count(), "hash index out of bounds");
        let mut bytes = [0u8; ID_LEN];
        self.source
            .read_exact_at(IDX_HEADER_SIZE + u64::from(idx) * ID_LEN as u64, &mut bytes)?;
        Ok(ObjectId::new(bytes))
    }

    /// Reads the pack offset at a table position, following large-offset
    /// indirection when the MSB is set.
    pub fn offset_at(&self, idx: u32) -> Result<u64, IdxError> {
        debug_assert!(idx < self.object_count(), "offset index out of bounds");
        let count = u64::from(self.object_count());
        let off32_base = IDX_HEADER_SIZE + count * (ID_LEN as u64 + 4);

        let mut raw = [0u8; 4];
        self.source
            .read_exact_at(off32_base + u64::from(idx) * 4, &mut raw)?;
        let raw = u32::from_be_bytes(raw);

        if raw & LARGE_OFFSET_FLAG == 0 {
            return Ok(u64::from(raw));
        }
        self.large_offset_at(raw & !LARGE_OFFSET_FLAG)
    }

    /// Searches the sorted hash table for `id` and returns its pack
    /// offset, or `None` if the pack does not contain the object.
    ///
    /// The search is bounded by the fanout bucket for the leading byte:
    /// `[fanout[b-1], fanout[b])`, with the left edge at zero for `b == 0`.
    pub fn lookup(&self, id: &ObjectId) -> Result<Option<u64>, IdxError> {
        let first = id.first_byte();
        let mut lo = if first == 0 {
            0
        } else {
            self.fanout[first as usize - 1]
        };
        let mut hi = self.fanout[first as usize];

        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.oid_at(mid)?.cmp(id) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => return Ok(Some(self.offset_at(mid)?)),
            }
        }
        Ok(None)
    }

    /// Reads all indexed identifiers in table order (lexicographic).
    pub fn objects(&self) -> Result<Vec<ObjectId>, IdxError> {
        let count = self.object_count() as usize;
        let mut table = vec![0u8; count * ID_LEN];
        self.source.read_exact_at(IDX_HEADER_SIZE, &mut table)?;

        Ok(table
            .chunks_exact(ID_LEN)
            .map(|chunk| ObjectId::new(chunk.try_into().expect("chunk is ID_LEN")))
            .collect())
    }

    fn large_offset_at(&self, idx: u32) -> Result<u64, IdxError> {
        let count = u64::from(self.object_count());
        let table_base = IDX_HEADER_SIZE + count * (ID_LEN as u64 + 4 + 4);
        let table_end = self.source.len().saturating_sub(TRAILER_SIZE);
        let table_len = table_end.saturating_sub(table_base) / 8;

        if u64::from(idx) >= table_len {
            return Err(IdxError::LargeOffsetOutOfBounds {
                index: idx,
                count: table_len,
            });
        }

        let mut raw = [0u8; 8];
        self.source
            .read_exact_at(table_base + u64::from(idx) * 8, &mut raw)?;
        Ok(u64::from_be_bytes(raw))
    }
}
