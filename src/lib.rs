//! Read-only Git object database.
//!
//! Resolves a 20-byte content hash to a typed object (blob, tree, or
//! commit), whether it is stored as a standalone zlib-compressed file
//! ("loose") or inside a pack file as a base entry or a chain of binary
//! deltas against another packed object.
//!
//! Layering, leaves first:
//! 1. [`inflate`] reads bounded zlib streams from positioned sources.
//! 2. [`delta`] applies Git's copy/insert delta encoding; [`delta_diff`]
//!    produces it via Rabin-fingerprint chunk matching.
//! 3. [`object`], [`tree`], [`commit`], and [`loose`] implement the
//!    object model: envelope framing, payload parsing, and the canonical
//!    serialization that rehashes to each object's identifier.
//! 4. [`pack_idx`] and [`pack`] resolve hashes through pack index v2
//!    files and reconstruct delta chains.
//! 5. [`repo`] ties the stores together: branch refs, the loose object
//!    directory, and every discovered pack.
//!
//! The engine is single-threaded, synchronous, and blocking. Readers are
//! immutable after open and hold no state besides the in-memory fanout,
//! so concurrent extraction is sound whenever the byte sources support
//! concurrent positioned reads (memory maps do).

pub mod commit;
pub mod delta;
pub mod delta_diff;
pub mod inflate;
pub mod loose;
pub mod object;
pub mod object_id;
pub mod pack;
pub mod pack_idx;
pub mod repo;
pub mod source;
pub mod tree;

pub use commit::{Commit, Signature};
pub use delta::{apply, delta_sizes, DeltaError};
pub use delta_diff::diff;
pub use inflate::{inflate_at, inflate_slice, InflateError};
pub use loose::{parse_loose, LooseError, LooseLimits};
pub use object::{read_object, Blob, Object, ObjectError, ObjectType};
pub use object_id::ObjectId;
pub use pack::{
    EntryHeader, EntryKind, ExternalBases, NoExternalBases, PackError, PackLimits, PackReader,
    PackedKind,
};
pub use pack_idx::{IdxError, PackIndex};
pub use repo::{Ref, RepoError, Repository};
pub use source::{ByteSource, MmapSource, SliceSource, SourceError};
pub use tree::{GitMode, Tree, TreeEntry};
