//! Pack (`.pack`) v2 reading and delta-chain resolution.
//!
//! A pack entry starts with a variable-length type/size header: the first
//! byte carries a 3-bit type tag and the low four size bits, continuation
//! bytes contribute seven size bits each. Non-delta entries are followed
//! directly by their zlib stream. `OFS_DELTA` entries insert a pseudo-
//! varint back-distance to the base entry, `REF_DELTA` entries a 20-byte
//! base identifier; in both cases the zlib stream holds a delta payload.
//!
//! Delta chains are resolved iteratively: the reader walks down the chain
//! collecting inflated delta payloads until it reaches a non-delta base,
//! then folds the patches back up. The walk depth is capped so corrupt or
//! hostile packs cannot recurse without bound.
//!
//! # Caller Expectations
//! - The reader is immutable after open; concurrent extraction is sound
//!   when the underlying sources support concurrent positioned reads.
//! - A `REF_DELTA` base outside this pack is delegated to the installed
//!   [`ExternalBases`] resolver; without one the extraction fails with
//!   `NotInPack`.

use std::fmt;

use crate::delta::{apply, DeltaError};
use crate::inflate::{inflate_at, InflateError};
use crate::object::{read_object, Object, ObjectError, ObjectType};
use crate::object_id::{ObjectId, ID_LEN};
use crate::pack_idx::{IdxError, PackIndex};
use crate::source::{ByteSource, SourceError};

/// Pack magic bytes.
const PACK_MAGIC: [u8; 4] = *b"PACK";
/// The only supported pack version.
const PACK_VERSION: u32 = 2;
/// Pack header size: magic(4) + version(4) + object count(4).
const PACK_HEADER_SIZE: u64 = 12;
/// Trailing pack checksum size.
const TRAILER_SIZE: u64 = 20;
/// Fixed window large enough for any entry header this reader accepts.
const HEADER_WINDOW: usize = 32;

/// Limits for pack decoding.
#[derive(Debug, Clone, Copy)]
pub struct PackLimits {
    /// Maximum bytes of a single entry header (type/size varint plus
    /// OFS back-distance).
    pub max_header_bytes: usize,
    /// Maximum inflated size of a non-delta object or a patched result.
    pub max_object_bytes: usize,
    /// Maximum inflated size of one delta payload.
    pub max_delta_bytes: usize,
    /// Maximum delta-chain depth before extraction is rejected.
    pub max_delta_depth: usize,
}

impl Default for PackLimits {
    fn default() -> Self {
        Self {
            max_header_bytes: HEADER_WINDOW,
            max_object_bytes: 256 * 1024 * 1024,
            max_delta_bytes: 64 * 1024 * 1024,
            max_delta_depth: 50,
        }
    }
}

/// Wire type tags observed while walking a pack.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PackedKind {
    Commit,
    Tree,
    Blob,
    Tag,
}

impl PackedKind {
    /// Maps the wire kind to a domain object type. Tags have no domain
    /// representation and yield `None`.
    #[must_use]
    pub const fn object_type(self) -> Option<ObjectType> {
        match self {
            Self::Commit => Some(ObjectType::Commit),
            Self::Tree => Some(ObjectType::Tree),
            Self::Blob => Some(ObjectType::Blob),
            Self::Tag => None,
        }
    }
}

impl From<ObjectType> for PackedKind {
    fn from(kind: ObjectType) -> Self {
        match kind {
            ObjectType::Commit => Self::Commit,
            ObjectType::Tree => Self::Tree,
            ObjectType::Blob => Self::Blob,
        }
    }
}

/// Parsed entry kind from a pack header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    /// Non-delta object.
    NonDelta { kind: PackedKind },
    /// Delta against the entry at a backward offset in the same pack.
    OfsDelta { base_offset: u64 },
    /// Delta against the object with the given identifier.
    RefDelta { base_id: ObjectId },
}

/// Entry header parsed from a pack.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntryHeader {
    /// Inflated payload size (for delta entries: the delta stream, not
    /// the patched result).
    pub size: u64,
    /// Offset where the zlib stream begins.
    pub data_start: u64,
    pub kind: EntryKind,
}

/// Resolver for `REF_DELTA` bases that live outside this pack.
///
/// A repository-level layer can satisfy cross-pack references without the
/// pack engine owning that policy.
pub trait ExternalBases {
    /// Returns the type and raw payload of the object, or `None` if this
    /// resolver cannot supply it.
    fn resolve_base(&self, id: &ObjectId) -> Option<(ObjectType, Vec<u8>)>;
}

/// The default resolver: everything is absent.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoExternalBases;

impl ExternalBases for NoExternalBases {
    fn resolve_base(&self, _id: &ObjectId) -> Option<(ObjectType, Vec<u8>)> {
        None
    }
}

/// Errors from pack reading.
#[derive(Debug)]
#[non_exhaustive]
pub enum PackError {
    /// The pack magic bytes are wrong.
    BadMagic,
    /// The pack version is not 2.
    UnsupportedVersion { version: u32 },
    /// The pack file is malformed.
    Corrupt { detail: &'static str },
    /// The object is not present in this pack.
    NotInPack { id: ObjectId },
    /// An entry header carries a type tag outside the known set.
    BadEntryType { tag: u8 },
    /// An entry offset points outside the pack data region.
    EntryOutOfRange { offset: u64 },
    /// An entry header exceeded the configured byte bound.
    HeaderTooLong,
    /// A delta chain exceeded the configured depth bound.
    DeltaChainTooDeep { depth: usize },
    /// An `OFS_DELTA` back-distance does not land on a prior entry.
    DeltaBaseOutOfRange { offset: u64 },
    /// An inflated size exceeds the configured cap.
    TooLarge { size: u64, max: usize },
    /// The extracted object does not hash to the requested identifier.
    HashMismatch { expected: ObjectId, actual: ObjectId },
    /// Index-side failure.
    Idx(IdxError),
    /// Positioned read failed.
    Source(SourceError),
    /// Zlib decode failed.
    Inflate(InflateError),
    /// Delta application failed.
    Delta(DeltaError),
    /// Object payload parse failed.
    Object(ObjectError),
}

impl fmt::Display for PackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadMagic => write!(f, "bad magic number in packfile"),
            Self::UnsupportedVersion { version } => {
                write!(f, "unsupported pack version: {version} (expected 2)")
            }
            Self::Corrupt { detail } => write!(f, "corrupt packfile: {detail}"),
            Self::NotInPack { id } => write!(f, "object {id} does not exist in pack"),
            Self::BadEntryType { tag } => write!(f, "invalid pack entry type {tag}"),
            Self::EntryOutOfRange { offset } => {
                write!(f, "pack entry offset {offset} out of range")
            }
            Self::HeaderTooLong => write!(f, "pack entry header exceeded bound"),
            Self::DeltaChainTooDeep { depth } => {
                write!(f, "delta chain deeper than {depth}")
            }
            Self::DeltaBaseOutOfRange { offset } => {
                write!(f, "delta base out of range for entry at {offset}")
            }
            Self::TooLarge { size, max } => {
                write!(f, "entry size {size} exceeds cap {max}")
            }
            Self::HashMismatch { expected, actual } => {
                write!(f, "hash mismatch: requested {expected}, extracted {actual}")
            }
            Self::Idx(err) => write!(f, "{err}"),
            Self::Source(err) => write!(f, "{err}"),
            Self::Inflate(err) => write!(f, "{err}"),
            Self::Delta(err) => write!(f, "{err}"),
            Self::Object(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for PackError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Idx(err) => Some(err),
            Self::Source(err) => Some(err),
            Self::Inflate(err) => Some(err),
            Self::Delta(err) => Some(err),
            Self::Object(err) => Some(err),
            _ => None,
        }
    }
}

impl From<IdxError> for PackError {
    fn from(err: IdxError) -> Self {
        Self::Idx(err)
    }
}

impl From<SourceError> for PackError {
    fn from(err: SourceError) -> Self {
        Self::Source(err)
    }
}

impl From<InflateError> for PackError {
    fn from(err: InflateError) -> Self {
        Self::Inflate(err)
    }
}

impl From<DeltaError> for PackError {
    fn from(err: DeltaError) -> Self {
        Self::Delta(err)
    }
}

impl From<ObjectError> for PackError {
    fn from(err: ObjectError) -> Self {
        Self::Object(err)
    }
}

/// Reader over a pack file and its v2 index.
///
/// Immutable after open: the fanout lives in the index, everything else
/// is read on demand.
#[derive(Debug)]
pub struct PackReader<S> {
    pack: S,
    index: PackIndex<S>,
    version: u32,
    header_count: u32,
    data_end: u64,
    limits: PackLimits,
}

impl<S: ByteSource> PackReader<S> {
    /// Opens a pack/index pair with default limits.
    pub fn open(pack: S, idx: S) -> Result<Self, PackError> {
        Self::with_limits(pack, idx, PackLimits::default())
    }

    /// Opens a pack/index pair, validating both magics.
    ///
    /// The header object count should match the index; a mismatch is
    /// recorded (see [`count_mismatch`](Self::count_mismatch)) but does
    /// not fail the open.
    pub fn with_limits(pack: S, idx: S, limits: PackLimits) -> Result<Self, PackError> {
        if pack.len() < PACK_HEADER_SIZE + TRAILER_SIZE {
            return Err(PackError::Corrupt {
                detail: "file too small",
            });
        }
        let mut header = [0u8; PACK_HEADER_SIZE as usize];
        pack.read_exact_at(0, &mut header)?;

        if header[0..4] != PACK_MAGIC {
            return Err(PackError::BadMagic);
        }
        let version = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
        if version != PACK_VERSION {
            return Err(PackError::UnsupportedVersion { version });
        }
        let header_count = u32::from_be_bytes([header[8], header[9], header[10], header[11]]);

        let index = PackIndex::open(idx)?;
        let data_end = pack.len() - TRAILER_SIZE;

        Ok(Self {
            pack,
            index,
            version,
            header_count,
            data_end,
            limits,
        })
    }

    /// Returns the pack format version (always 2 for now).
    #[must_use]
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Returns the number of objects in the index.
    #[must_use]
    pub fn object_count(&self) -> u32 {
        self.index.object_count()
    }

    /// Returns the pack-header and index object counts when they
    /// disagree. Such packs are still readable; the index governs.
    #[must_use]
    pub fn count_mismatch(&self) -> Option<(u32, u32)> {
        let indexed = self.index.object_count();
        (self.header_count != indexed).then_some((self.header_count, indexed))
    }

    /// Returns the index.
    #[must_use]
    pub fn index(&self) -> &PackIndex<S> {
        &self.index
    }

    /// Lists every object in this pack in index (lexicographic) order.
    pub fn objects(&self) -> Result<Vec<ObjectId>, PackError> {
        Ok(self.index.objects()?)
    }

    /// Finds and parses an object, verifying that it hashes back to the
    /// requested identifier.
    pub fn extract(&self, id: &ObjectId) -> Result<Object, PackError> {
        self.extract_with(id, &NoExternalBases)
    }

    /// [`extract`](Self::extract) with a resolver for out-of-pack
    /// `REF_DELTA` bases.
    pub fn extract_with(
        &self,
        id: &ObjectId,
        external: &dyn ExternalBases,
    ) -> Result<Object, PackError> {
        let (kind, data) = self.extract_raw_with(id, external)?;
        let object = read_object(kind, data)?;
        if object.id() != *id {
            return Err(PackError::HashMismatch {
                expected: *id,
                actual: object.id(),
            });
        }
        Ok(object)
    }

    /// Extracts the resolved type and raw payload without parsing or
    /// hash verification.
    pub fn extract_raw(&self, id: &ObjectId) -> Result<(ObjectType, Vec<u8>), PackError> {
        self.extract_raw_with(id, &NoExternalBases)
    }

    /// [`extract_raw`](Self::extract_raw) with an external base resolver.
    pub fn extract_raw_with(
        &self,
        id: &ObjectId,
        external: &dyn ExternalBases,
    ) -> Result<(ObjectType, Vec<u8>), PackError> {
        let offset = self
            .index
            .lookup(id)?
            .ok_or(PackError::NotInPack { id: *id })?;
        self.resolve_at(offset, external)
    }

    /// Parses the entry header at a pack offset.
    pub fn entry_header_at(&self, offset: u64) -> Result<EntryHeader, PackError> {
        if offset < PACK_HEADER_SIZE || offset >= self.data_end {
            return Err(PackError::EntryOutOfRange { offset });
        }

        let mut window = [0u8; HEADER_WINDOW];
        let filled = self.read_window(offset, &mut window)?;
        let window = &window[..filled];
        let bound = self.limits.max_header_bytes.min(filled);

        let mut pos = 0usize;
        let first = *window.first().ok_or(PackError::Corrupt {
            detail: "truncated entry header",
        })?;
        pos += 1;

        let tag = (first >> 4) & 0x07;
        let mut size = u64::from(first & 0x0f);
        let mut shift = 4u32;
        let mut byte = first;
        while byte & 0x80 != 0 {
            if pos >= bound {
                return Err(PackError::HeaderTooLong);
            }
            byte = window[pos];
            pos += 1;
            size |= u64::from(byte & 0x7f) << shift;
            shift += 7;
            if shift > 63 {
                return Err(PackError::HeaderTooLong);
            }
        }

        let kind = match tag {
            1 => EntryKind::NonDelta {
                kind: PackedKind::Commit,
            },
            2 => EntryKind::NonDelta {
                kind: PackedKind::Tree,
            },
            3 => EntryKind::NonDelta {
                kind: PackedKind::Blob,
            },
            4 => EntryKind::NonDelta {
                kind: PackedKind::Tag,
            },
            6 => {
                let distance = self.parse_ofs_distance(window, &mut pos, bound)?;
                if distance == 0 || distance >= offset || offset - distance < PACK_HEADER_SIZE {
                    return Err(PackError::DeltaBaseOutOfRange { offset });
                }
                EntryKind::OfsDelta {
                    base_offset: offset - distance,
                }
            }
            7 => {
                let mut base = [0u8; ID_LEN];
                self.pack
                    .read_exact_at(offset + pos as u64, &mut base)
                    .map_err(|_| PackError::Corrupt {
                        detail: "truncated base id",
                    })?;
                pos += ID_LEN;
                EntryKind::RefDelta {
                    base_id: ObjectId::new(base),
                }
            }
            tag => return Err(PackError::BadEntryType { tag }),
        };

        Ok(EntryHeader {
            size,
            data_start: offset + pos as u64,
            kind,
        })
    }

    /// Decodes the `OFS_DELTA` back-distance: big-endian base-128 groups
    /// where every continuation adds one before shifting.
    fn parse_ofs_distance(
        &self,
        window: &[u8],
        pos: &mut usize,
        bound: usize,
    ) -> Result<u64, PackError> {
        // ceil(64 / 7) bytes is the most a 64-bit distance can need.
        const MAX_OFS_BYTES: usize = 10;

        if *pos >= bound {
            return Err(PackError::HeaderTooLong);
        }
        let mut byte = window[*pos];
        *pos += 1;
        let mut value = u64::from(byte & 0x7f);
        let mut bytes_read = 1usize;

        while byte & 0x80 != 0 {
            if *pos >= bound || bytes_read >= MAX_OFS_BYTES {
                return Err(PackError::HeaderTooLong);
            }
            byte = window[*pos];
            *pos += 1;
            bytes_read += 1;
            value = (value + 1) << 7;
            value |= u64::from(byte & 0x7f);
        }
        Ok(value)
    }

    /// Resolves the entry at `offset` to its object type and full
    /// payload, walking delta chains iteratively.
    fn resolve_at(
        &self,
        offset: u64,
        external: &dyn ExternalBases,
    ) -> Result<(ObjectType, Vec<u8>), PackError> {
        let mut deltas: Vec<Vec<u8>> = Vec::new();
        let mut cursor = offset;

        let (kind, mut data) = loop {
            if deltas.len() >= self.limits.max_delta_depth {
                return Err(PackError::DeltaChainTooDeep {
                    depth: deltas.len(),
                });
            }

            let header = self.entry_header_at(cursor)?;
            match header.kind {
                EntryKind::NonDelta { kind } => {
                    let data = self.entry_payload(&header, self.limits.max_object_bytes)?;
                    break (kind, data);
                }
                EntryKind::OfsDelta { base_offset } => {
                    deltas.push(self.entry_payload(&header, self.limits.max_delta_bytes)?);
                    cursor = base_offset;
                }
                EntryKind::RefDelta { base_id } => {
                    let payload = self.entry_payload(&header, self.limits.max_delta_bytes)?;
                    match self.index.lookup(&base_id)? {
                        Some(base_offset) => {
                            deltas.push(payload);
                            cursor = base_offset;
                        }
                        None => match external.resolve_base(&base_id) {
                            Some((kind, data)) => {
                                deltas.push(payload);
                                break (PackedKind::from(kind), data);
                            }
                            None => return Err(PackError::NotInPack { id: base_id }),
                        },
                    }
                }
            }
        };

        for delta in deltas.iter().rev() {
            data = apply(&data, delta, self.limits.max_object_bytes)?;
        }

        let kind = kind.object_type().ok_or(PackError::Object(ObjectError::InvalidType))?;
        Ok((kind, data))
    }

    fn entry_payload(&self, header: &EntryHeader, cap: usize) -> Result<Vec<u8>, PackError> {
        if header.size > cap as u64 {
            return Err(PackError::TooLarge {
                size: header.size,
                max: cap,
            });
        }
        Ok(inflate_at(&self.pack, header.data_start, header.size as usize)?)
    }

    /// Fills `buf` with as many bytes as the data region holds at
    /// `offset`.
    fn read_window(&self, offset: u64, buf: &mut [u8]) -> Result<usize, PackError> {
        let avail = (self.data_end - offset).min(buf.len() as u64) as usize;
        self.pack.read_exact_at(offset, &mut buf[..avail])?;
        Ok(avail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{Blob, Object};
    use crate::pack_idx::tests::IdxBuilder;
    use crate::source::SliceSource;

    fn deflate(data: &[u8]) -> Vec<u8> {
        use flate2::write::ZlibEncoder;
        use flate2::Compression;
        use std::io::Write;

        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    /// Builds a bit-exact pack v2 file plus its index for tests.
    struct PackBuilder {
        body: Vec<u8>,
        entries: Vec<(ObjectId, u64)>,
        count: u32,
    }

    /// Encodes the entry type/size header.
    fn entry_header_bytes(tag: u8, mut size: u64) -> Vec<u8> {
        let mut out = Vec::new();
        let mut first = (tag << 4) | (size & 0x0f) as u8;
        size >>= 4;
        if size != 0 {
            first |= 0x80;
        }
        out.push(first);
        while size != 0 {
            let mut byte = (size & 0x7f) as u8;
            size >>= 7;
            if size != 0 {
                byte |= 0x80;
            }
            out.push(byte);
        }
        out
    }

    /// Encodes an OFS_DELTA back-distance.
    fn ofs_distance_bytes(mut distance: u64) -> Vec<u8> {
        let mut bytes = vec![(distance & 0x7f) as u8];
        distance >>= 7;
        while distance != 0 {
            distance -= 1;
            bytes.push(0x80 | (distance & 0x7f) as u8);
            distance >>= 7;
        }
        bytes.reverse();
        bytes
    }

    impl PackBuilder {
        fn new() -> Self {
            Self {
                body: Vec::new(),
                entries: Vec::new(),
                count: 0,
            }
        }

        fn next_offset(&self) -> u64 {
            PACK_HEADER_SIZE + self.body.len() as u64
        }

        fn add_base(&mut self, tag: u8, id: ObjectId, payload: &[u8]) -> u64 {
            let offset = self.next_offset();
            self.body
                .extend_from_slice(&entry_header_bytes(tag, payload.len() as u64));
            self.body.extend_from_slice(&deflate(payload));
            self.entries.push((id, offset));
            self.count += 1;
            offset
        }

        fn add_ofs_delta(&mut self, id: ObjectId, base_offset: u64, delta: &[u8]) -> u64 {
            let offset = self.next_offset();
            self.body
                .extend_from_slice(&entry_header_bytes(6, delta.len() as u64));
            self.body
                .extend_from_slice(&ofs_distance_bytes(offset - base_offset));
            self.body.extend_from_slice(&deflate(delta));
            self.entries.push((id, offset));
            self.count += 1;
            offset
        }

        fn add_ref_delta(&mut self, id: ObjectId, base_id: ObjectId, delta: &[u8]) -> u64 {
            let offset = self.next_offset();
            self.body
                .extend_from_slice(&entry_header_bytes(7, delta.len() as u64));
            self.body.extend_from_slice(base_id.as_bytes());
            self.body.extend_from_slice(&deflate(delta));
            self.entries.push((id, offset));
            self.count += 1;
            offset
        }

        fn build(&self) -> (Vec<u8>, Vec<u8>) {
            let mut pack = Vec::new();
            pack.extend_from_slice(&PACK_MAGIC);
            pack.extend_from_slice(&PACK_VERSION.to_be_bytes());
            pack.extend_from_slice(&self.count.to_be_bytes());
            pack.extend_from_slice(&self.body);
            let trailer = ObjectId::hash_of(&pack);
            pack.extend_from_slice(trailer.as_bytes());

            let mut idx = IdxBuilder::new();
            for (id, offset) in &self.entries {
                idx.add_object(*id, *offset);
            }
            (pack, idx.build())
        }
    }

    /// Delta that replaces the base wholesale with `data` (pure insert).
    fn insert_delta(base_len: usize, data: &[u8]) -> Vec<u8> {
        use crate::delta::write_size_varint;
        let mut delta = Vec::new();
        write_size_varint(&mut delta, base_len as u64);
        write_size_varint(&mut delta, data.len() as u64);
        for chunk in data.chunks(0x7f) {
            delta.push(chunk.len() as u8);
            delta.extend_from_slice(chunk);
        }
        delta
    }

    /// Delta that copies the whole base and appends `suffix`.
    fn append_delta(base_len: usize, suffix: &[u8]) -> Vec<u8> {
        use crate::delta::write_size_varint;
        assert!(base_len > 0 && base_len <= 0xffff);
        let mut delta = Vec::new();
        write_size_varint(&mut delta, base_len as u64);
        write_size_varint(&mut delta, (base_len + suffix.len()) as u64);
        delta.extend_from_slice(&[0x90 | 0x20, (base_len & 0xff) as u8, (base_len >> 8) as u8]);
        delta.push(suffix.len() as u8);
        delta.extend_from_slice(suffix);
        delta
    }

    fn blob_id(data: &[u8]) -> ObjectId {
        Blob::new(data.to_vec()).id
    }

    #[test]
    fn open_rejects_bad_magic() {
        let (mut pack, idx) = PackBuilder::new().build();
        pack[0] = b'X';
        assert!(matches!(
            PackReader::open(SliceSource::new(&pack), SliceSource::new(&idx)),
            Err(PackError::BadMagic)
        ));
    }

    #[test]
    fn open_rejects_version_3() {
        let (mut pack, idx) = PackBuilder::new().build();
        pack[4..8].copy_from_slice(&3u32.to_be_bytes());
        assert!(matches!(
            PackReader::open(SliceSource::new(&pack), SliceSource::new(&idx)),
            Err(PackError::UnsupportedVersion { version: 3 })
        ));
    }

    #[test]
    fn count_mismatch_is_recorded_not_fatal() {
        let data = b"mismatch blob";
        let mut builder = PackBuilder::new();
        builder.add_base(3, blob_id(data), data);
        let (mut pack, idx) = builder.build();
        pack[8..12].copy_from_slice(&7u32.to_be_bytes());

        let reader = PackReader::open(SliceSource::new(&pack), SliceSource::new(&idx)).unwrap();
        assert_eq!(reader.count_mismatch(), Some((7, 1)));
        let object = reader.extract(&blob_id(data)).unwrap();
        assert_eq!(object.id(), blob_id(data));
    }

    #[test]
    fn extract_plain_blob() {
        let data = b"Hello World!\n";
        let mut builder = PackBuilder::new();
        builder.add_base(3, blob_id(data), data);
        let (pack, idx) = builder.build();

        let reader = PackReader::open(SliceSource::new(&pack), SliceSource::new(&idx)).unwrap();
        assert!(reader.count_mismatch().is_none());

        let object = reader.extract(&blob_id(data)).unwrap();
        match object {
            Object::Blob(blob) => assert_eq!(blob.data, data),
            other => panic!("expected blob, got {:?}", other.kind()),
        }
    }

    #[test]
    fn extract_missing_object() {
        let data = b"present";
        let mut builder = PackBuilder::new();
        builder.add_base(3, blob_id(data), data);
        let (pack, idx) = builder.build();
        let reader = PackReader::open(SliceSource::new(&pack), SliceSource::new(&idx)).unwrap();

        let absent = blob_id(b"absent");
        assert!(matches!(
            reader.extract(&absent),
            Err(PackError::NotInPack { id }) if id == absent
        ));
    }

    #[test]
    fn extract_ofs_delta_chain() {
        let base = b"base blob contents, long enough to copy from";
        let target: Vec<u8> = {
            let mut t = base.to_vec();
            t.extend_from_slice(b" plus a suffix");
            t
        };

        let mut builder = PackBuilder::new();
        let base_offset = builder.add_base(3, blob_id(base), base);
        builder.add_ofs_delta(
            blob_id(&target),
            base_offset,
            &append_delta(base.len(), b" plus a suffix"),
        );
        let (pack, idx) = builder.build();

        let reader = PackReader::open(SliceSource::new(&pack), SliceSource::new(&idx)).unwrap();
        let object = reader.extract(&blob_id(&target)).unwrap();
        match object {
            Object::Blob(blob) => assert_eq!(blob.data, target),
            other => panic!("expected blob, got {:?}", other.kind()),
        }
    }

    #[test]
    fn extract_ref_delta_same_pack() {
        let base = b"ref delta base payload";
        let target = b"entirely replaced contents";

        let mut builder = PackBuilder::new();
        builder.add_base(3, blob_id(base), base);
        builder.add_ref_delta(
            blob_id(target),
            blob_id(base),
            &insert_delta(base.len(), target),
        );
        let (pack, idx) = builder.build();

        let reader = PackReader::open(SliceSource::new(&pack), SliceSource::new(&idx)).unwrap();
        let object = reader.extract(&blob_id(target)).unwrap();
        assert_eq!(object.id(), blob_id(target));
    }

    #[test]
    fn extract_stacked_deltas() {
        // base <- ofs delta <- ofs delta, propagating the blob type up.
        let v1 = b"version one of the file".to_vec();
        let mut v2 = v1.clone();
        v2.extend_from_slice(b", amended");
        let mut v3 = v2.clone();
        v3.extend_from_slice(b", twice");

        let mut builder = PackBuilder::new();
        let off1 = builder.add_base(3, blob_id(&v1), &v1);
        let off2 = builder.add_ofs_delta(blob_id(&v2), off1, &append_delta(v1.len(), b", amended"));
        builder.add_ofs_delta(blob_id(&v3), off2, &append_delta(v2.len(), b", twice"));
        let (pack, idx) = builder.build();

        let reader = PackReader::open(SliceSource::new(&pack), SliceSource::new(&idx)).unwrap();
        let object = reader.extract(&blob_id(&v3)).unwrap();
        assert_eq!(object.kind(), ObjectType::Blob);
        match object {
            Object::Blob(blob) => assert_eq!(blob.data, v3),
            _ => unreachable!(),
        }
    }

    #[test]
    fn ref_delta_external_base() {
        let base = b"lives in another pack";
        let target = b"patched against an external base";

        let mut builder = PackBuilder::new();
        builder.add_ref_delta(
            blob_id(target),
            blob_id(base),
            &insert_delta(base.len(), target),
        );
        let (pack, idx) = builder.build();
        let reader = PackReader::open(SliceSource::new(&pack), SliceSource::new(&idx)).unwrap();

        // Without a resolver the base is simply missing.
        assert!(matches!(
            reader.extract(&blob_id(target)),
            Err(PackError::NotInPack { id }) if id == blob_id(base)
        ));

        struct OneBase(Vec<u8>);
        impl ExternalBases for OneBase {
            fn resolve_base(&self, id: &ObjectId) -> Option<(ObjectType, Vec<u8>)> {
                (Blob::new(self.0.clone()).id == *id).then(|| (ObjectType::Blob, self.0.clone()))
            }
        }

        let object = reader
            .extract_with(&blob_id(target), &OneBase(base.to_vec()))
            .unwrap();
        assert_eq!(object.id(), blob_id(target));
    }

    #[test]
    fn delta_chain_depth_capped() {
        let base = b"depth test base";
        let mut builder = PackBuilder::new();
        let mut prev = builder.add_base(3, blob_id(base), base);
        let mut content = base.to_vec();
        for i in 0..4u8 {
            let mut next = content.clone();
            next.push(i);
            prev = builder.add_ofs_delta(
                blob_id(&next),
                prev,
                &append_delta(content.len(), &[i]),
            );
            content = next;
        }
        let (pack, idx) = builder.build();

        let tight = PackLimits {
            max_delta_depth: 2,
            ..PackLimits::default()
        };
        let reader =
            PackReader::with_limits(SliceSource::new(&pack), SliceSource::new(&idx), tight)
                .unwrap();
        assert!(matches!(
            reader.extract(&blob_id(&content)),
            Err(PackError::DeltaChainTooDeep { depth: 2 })
        ));

        let reader = PackReader::open(SliceSource::new(&pack), SliceSource::new(&idx)).unwrap();
        assert_eq!(reader.extract(&blob_id(&content)).unwrap().id(), blob_id(&content));
    }

    #[test]
    fn ofs_distance_zero_rejected() {
        let data = b"zero distance victim";
        let mut builder = PackBuilder::new();
        builder.add_base(3, blob_id(data), data);
        let victim = builder.next_offset();
        // Hand-rolled OFS_DELTA entry with distance 0.
        let delta = insert_delta(data.len(), b"x");
        builder
            .body
            .extend_from_slice(&entry_header_bytes(6, delta.len() as u64));
        builder.body.push(0x00);
        builder.body.extend_from_slice(&deflate(&delta));
        builder.entries.push((blob_id(b"victim"), victim));
        builder.count += 1;
        let (pack, idx) = builder.build();

        let reader = PackReader::open(SliceSource::new(&pack), SliceSource::new(&idx)).unwrap();
        assert!(matches!(
            reader.extract(&blob_id(b"victim")),
            Err(PackError::DeltaBaseOutOfRange { offset }) if offset == victim
        ));
    }

    #[test]
    fn ofs_distance_past_start_rejected() {
        let data = b"underflow victim";
        let mut builder = PackBuilder::new();
        let victim = {
            let offset = builder.next_offset();
            let delta = insert_delta(data.len(), b"x");
            builder
                .body
                .extend_from_slice(&entry_header_bytes(6, delta.len() as u64));
            // Distance equal to the entry offset reaches before the header.
            builder
                .body
                .extend_from_slice(&ofs_distance_bytes(offset));
            builder.body.extend_from_slice(&deflate(&delta));
            builder.entries.push((blob_id(b"victim"), offset));
            builder.count += 1;
            offset
        };
        let (pack, idx) = builder.build();

        let reader = PackReader::open(SliceSource::new(&pack), SliceSource::new(&idx)).unwrap();
        assert!(matches!(
            reader.extract(&blob_id(b"victim")),
            Err(PackError::DeltaBaseOutOfRange { offset }) if offset == victim
        ));
    }

    #[test]
    fn bad_entry_type_rejected() {
        let mut builder = PackBuilder::new();
        let offset = builder.next_offset();
        builder
            .body
            .extend_from_slice(&entry_header_bytes(5, 3));
        builder.body.extend_from_slice(&deflate(b"abc"));
        builder.entries.push((blob_id(b"bad"), offset));
        builder.count += 1;
        let (pack, idx) = builder.build();

        let reader = PackReader::open(SliceSource::new(&pack), SliceSource::new(&idx)).unwrap();
        assert!(matches!(
            reader.extract(&blob_id(b"bad")),
            Err(PackError::BadEntryType { tag: 5 })
        ));
    }

    #[test]
    fn tag_entries_never_surface_as_objects() {
        let payload = b"object 980a0d5f19a64b4b30a87d4206aade58726b60e3\ntype blob\n";
        let id = ObjectId::hash_of(b"tagged");
        let mut builder = PackBuilder::new();
        builder.add_base(4, id, payload);
        let (pack, idx) = builder.build();

        let reader = PackReader::open(SliceSource::new(&pack), SliceSource::new(&idx)).unwrap();
        assert!(matches!(
            reader.extract(&id),
            Err(PackError::Object(ObjectError::InvalidType))
        ));
    }

    #[test]
    fn hash_verification_catches_wrong_ids() {
        let data = b"honest payload";
        let lie = ObjectId::hash_of(b"some other id");
        let mut builder = PackBuilder::new();
        builder.add_base(3, lie, data);
        let (pack, idx) = builder.build();

        let reader = PackReader::open(SliceSource::new(&pack), SliceSource::new(&idx)).unwrap();
        assert!(matches!(
            reader.extract(&lie),
            Err(PackError::HashMismatch { expected, actual })
                if expected == lie && actual == blob_id(data)
        ));
        // Raw extraction skips verification.
        let (kind, raw) = reader.extract_raw(&lie).unwrap();
        assert_eq!(kind, ObjectType::Blob);
        assert_eq!(raw, data);
    }

    #[test]
    fn extraction_is_idempotent() {
        let data = b"read me twice";
        let mut builder = PackBuilder::new();
        builder.add_base(3, blob_id(data), data);
        let (pack, idx) = builder.build();
        let reader = PackReader::open(SliceSource::new(&pack), SliceSource::new(&idx)).unwrap();

        let first = reader.extract(&blob_id(data)).unwrap();
        let second = reader.extract(&blob_id(data)).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.canonical_bytes(), second.canonical_bytes());
    }

    #[test]
    fn entry_size_cap_enforced() {
        let data = vec![7u8; 4096];
        let mut builder = PackBuilder::new();
        builder.add_base(3, blob_id(&data), &data);
        let (pack, idx) = builder.build();

        let tight = PackLimits {
            max_object_bytes: 1024,
            ..PackLimits::default()
        };
        let reader =
            PackReader::with_limits(SliceSource::new(&pack), SliceSource::new(&idx), tight)
                .unwrap();
        assert!(matches!(
            reader.extract(&blob_id(&data)),
            Err(PackError::TooLarge { size: 4096, max: 1024 })
        ));
    }

    #[test]
    fn objects_lists_index_order() {
        let a = b"first";
        let b = b"second";
        let mut builder = PackBuilder::new();
        builder.add_base(3, blob_id(a), a);
        builder.add_base(3, blob_id(b), b);
        let (pack, idx) = builder.build();
        let reader = PackReader::open(SliceSource::new(&pack), SliceSource::new(&idx)).unwrap();

        let mut expected = vec![blob_id(a), blob_id(b)];
        expected.sort();
        assert_eq!(reader.objects().unwrap(), expected);
    }

    #[test]
    fn extract_packed_tree_and_commit() {
        let blob_data = b"Hello World!\n";
        let mut tree_payload = b"100644 test\x00".to_vec();
        tree_payload.extend_from_slice(blob_id(blob_data).as_bytes());
        let tree_id = ObjectId::hash_of(
            &[b"tree 32\x00".to_vec(), tree_payload.clone()].concat(),
        );
        let commit_payload = format!(
            "tree {tree_id}\nauthor A <a@b> 1356355981 +0100\ncommitter A <a@b> 1356355981 +0100\n\nHello!\n"
        );
        let commit_id = ObjectId::hash_of(
            format!("commit {}\x00{commit_payload}", commit_payload.len()).as_bytes(),
        );

        let mut builder = PackBuilder::new();
        builder.add_base(3, blob_id(blob_data), blob_data);
        builder.add_base(2, tree_id, &tree_payload);
        builder.add_base(1, commit_id, commit_payload.as_bytes());
        let (pack, idx) = builder.build();

        let reader = PackReader::open(SliceSource::new(&pack), SliceSource::new(&idx)).unwrap();
        let tree = reader.extract(&tree_id).unwrap();
        assert_eq!(tree.kind(), ObjectType::Tree);

        let commit = reader.extract(&commit_id).unwrap();
        match commit {
            Object::Commit(commit) => {
                assert_eq!(commit.tree, tree_id);
                assert_eq!(commit.message, b"Hello!\n");
            }
            other => panic!("expected commit, got {:?}", other.kind()),
        }
    }
}
