//! Random-access byte sources backing pack and index files.
//!
//! The engine performs positioned reads only; there is no seek cursor and
//! no mutation after construction, so concurrent reads against the same
//! source are sound wherever the backing store supports them (memory maps,
//! pread-style file access).

use std::fmt;
use std::fs::File;
use std::path::Path;

use memmap2::Mmap;

/// Errors produced by byte sources.
#[derive(Debug, PartialEq, Eq)]
pub enum SourceError {
    /// The requested read starts past the end of the source.
    OutOfRange { offset: u64, len: usize },
    /// The source yielded fewer bytes than required.
    ShortRead { expected: usize, got: usize },
    /// Backend-specific I/O failure.
    Io(String),
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfRange { offset, len } => {
                write!(f, "read out of range at {offset} (len {len})")
            }
            Self::ShortRead { expected, got } => {
                write!(f, "short read: expected {expected}, got {got}")
            }
            Self::Io(msg) => write!(f, "source I/O error: {msg}"),
        }
    }
}

impl std::error::Error for SourceError {}

/// Read-only positioned-read capability.
pub trait ByteSource {
    /// Total length in bytes.
    fn len(&self) -> u64;

    /// Returns true if the source is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads bytes starting at `offset` into `dst`.
    ///
    /// Returns the number of bytes read, which may be less than
    /// `dst.len()` near the end of the source. Reading exactly at the end
    /// returns `Ok(0)`; reading past it returns `OutOfRange`.
    fn read_at(&self, offset: u64, dst: &mut [u8]) -> Result<usize, SourceError>;

    /// Fills `dst` completely or fails with `ShortRead`.
    fn read_exact_at(&self, offset: u64, dst: &mut [u8]) -> Result<(), SourceError> {
        let mut filled = 0usize;
        while filled < dst.len() {
            let got = self.read_at(offset + filled as u64, &mut dst[filled..])?;
            if got == 0 {
                return Err(SourceError::ShortRead {
                    expected: dst.len(),
                    got: filled,
                });
            }
            filled += got;
        }
        Ok(())
    }
}

fn read_from_slice(bytes: &[u8], offset: u64, dst: &mut [u8]) -> Result<usize, SourceError> {
    if offset > bytes.len() as u64 {
        return Err(SourceError::OutOfRange {
            offset,
            len: dst.len(),
        });
    }
    let available = &bytes[offset as usize..];
    let n = available.len().min(dst.len());
    dst[..n].copy_from_slice(&available[..n]);
    Ok(n)
}

/// Byte source over an in-memory slice.
#[derive(Debug, Clone, Copy)]
pub struct SliceSource<'a> {
    bytes: &'a [u8],
}

impl<'a> SliceSource<'a> {
    /// Wraps a slice for positioned reads.
    #[must_use]
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }
}

impl ByteSource for SliceSource<'_> {
    fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn read_at(&self, offset: u64, dst: &mut [u8]) -> Result<usize, SourceError> {
        read_from_slice(self.bytes, offset, dst)
    }
}

/// Memory-mapped byte source, the production backing for pack and index
/// files: large, long-lived, read patterns dominated by small positioned
/// reads and inflate sweeps.
#[derive(Debug)]
pub struct MmapSource {
    map: Mmap,
}

impl MmapSource {
    /// Opens and maps a file read-only.
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        let file = File::open(path).map_err(|err| SourceError::Io(err.to_string()))?;
        // Safety: the map is read-only and the file is never truncated by
        // this crate; external truncation is undefined behavior shared by
        // every mmap consumer.
        let map = unsafe { Mmap::map(&file) }.map_err(|err| SourceError::Io(err.to_string()))?;
        Ok(Self { map })
    }
}

impl ByteSource for MmapSource {
    fn len(&self) -> u64 {
        self.map.len() as u64
    }

    fn read_at(&self, offset: u64, dst: &mut [u8]) -> Result<usize, SourceError> {
        read_from_slice(&self.map, offset, dst)
    }
}
