//! The Git object model: blobs, trees, and commits.
//!
//! Every stored object has canonical form `<type> <decimal size>\0<payload>`
//! and is addressed by the SHA-1 of that envelope. The three variants are a
//! closed set, so they are modeled as an enum rather than a trait object.
//!
//! Identifiers are always computed from the canonical re-serialization of
//! the parsed value. A payload that parses but does not serialize back to
//! its original bytes (non-canonical tree modes, for instance) therefore
//! surfaces as a hash mismatch when extraction is verified.

use std::fmt;

use sha1::{Digest, Sha1};

use crate::commit::{parse_commit, Commit};
use crate::object_id::ObjectId;
use crate::tree::{parse_tree, Tree};

/// The addressable object kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectType {
    Blob,
    Tree,
    Commit,
}

impl ObjectType {
    /// The envelope tag for this type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Blob => "blob",
            Self::Tree => "tree",
            Self::Commit => "commit",
        }
    }

    /// Parses an envelope tag.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes {
            b"blob" => Some(Self::Blob),
            b"tree" => Some(Self::Tree),
            b"commit" => Some(Self::Commit),
            _ => None,
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Object payload parse error taxonomy.
#[derive(Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ObjectError {
    /// The loose envelope header is malformed.
    BadHeader { detail: &'static str },
    /// The envelope names a type outside the closed set.
    InvalidType,
    /// The envelope size disagrees with the payload length.
    SizeMismatch { expected: u64, got: u64 },
    /// A tree payload is malformed or out of order.
    BadTree { detail: &'static str },
    /// A commit payload is malformed.
    MalformedCommit { detail: &'static str },
}

impl fmt::Display for ObjectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadHeader { detail } => write!(f, "bad object header: {detail}"),
            Self::InvalidType => write!(f, "invalid object type"),
            Self::SizeMismatch { expected, got } => {
                write!(f, "object size mismatch: header says {expected}, payload is {got}")
            }
            Self::BadTree { detail } => write!(f, "bad tree: {detail}"),
            Self::MalformedCommit { detail } => write!(f, "malformed commit: {detail}"),
        }
    }
}

impl std::error::Error for ObjectError {}

/// Appends the canonical envelope header for a payload of `len` bytes.
pub(crate) fn write_envelope(out: &mut Vec<u8>, kind: ObjectType, len: usize) {
    out.extend_from_slice(kind.as_str().as_bytes());
    out.push(b' ');
    out.extend_from_slice(len.to_string().as_bytes());
    out.push(0);
}

/// Hashes the canonical envelope of a payload.
pub(crate) fn hash_payload(kind: ObjectType, payload: &[u8]) -> ObjectId {
    let mut hasher = Sha1::new();
    hasher.update(kind.as_str().as_bytes());
    hasher.update(b" ");
    hasher.update(payload.len().to_string().as_bytes());
    hasher.update(b"\0");
    hasher.update(payload);
    ObjectId::new(hasher.finalize().into())
}

/// An object representing an opaque chunk of data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Blob {
    pub id: ObjectId,
    pub data: Vec<u8>,
}

impl Blob {
    /// Creates a blob, computing its identifier.
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        let id = hash_payload(ObjectType::Blob, &data);
        Self { id, data }
    }
}

/// A parsed Git object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Object {
    Blob(Blob),
    Tree(Tree),
    Commit(Commit),
}

impl Object {
    /// Returns the object identifier.
    #[must_use]
    pub fn id(&self) -> ObjectId {
        match self {
            Self::Blob(blob) => blob.id,
            Self::Tree(tree) => tree.id,
            Self::Commit(commit) => commit.id,
        }
    }

    /// Returns the object type.
    #[must_use]
    pub fn kind(&self) -> ObjectType {
        match self {
            Self::Blob(_) => ObjectType::Blob,
            Self::Tree(_) => ObjectType::Tree,
            Self::Commit(_) => ObjectType::Commit,
        }
    }

    /// Appends the canonical payload (envelope excluded).
    pub fn payload_into(&self, out: &mut Vec<u8>) {
        match self {
            Self::Blob(blob) => out.extend_from_slice(&blob.data),
            Self::Tree(tree) => tree.payload_into(out),
            Self::Commit(commit) => commit.payload_into(out),
        }
    }

    /// Returns the canonical payload bytes.
    #[must_use]
    pub fn payload(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.payload_into(&mut out);
        out
    }

    /// Appends the canonical serialization; hashing it yields `id()`.
    pub fn serialize_into(&self, out: &mut Vec<u8>) {
        let payload = self.payload();
        write_envelope(out, self.kind(), payload.len());
        out.extend_from_slice(&payload);
    }

    /// Returns the canonical serialization.
    #[must_use]
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.serialize_into(&mut out);
        out
    }
}

/// Parses a payload of the given type into a typed object.
///
/// The resulting identifier is the hash of the canonical serialization.
pub fn read_object(kind: ObjectType, payload: Vec<u8>) -> Result<Object, ObjectError> {
    match kind {
        ObjectType::Blob => Ok(Object::Blob(Blob::new(payload))),
        ObjectType::Tree => {
            let entries = parse_tree(&payload)?;
            Ok(Object::Tree(Tree::new(entries)?))
        }
        ObjectType::Commit => Ok(Object::Commit(parse_commit(&payload)?)),
    }
}
