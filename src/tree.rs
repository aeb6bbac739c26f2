//! Git tree payloads.
//!
//! A tree payload is a sequence of entries, each
//! `<octal mode> SP <name> NUL <20-byte id>`, where the name is a single
//! path component (non-empty, no NUL, no slash). Entries are required to
//! be strictly increasing under the comparison Git uses when writing
//! trees: a directory name sorts as if it carried a trailing `/`.
//!
//! # Entry Modes
//!
//! The mode is `(type_nibble << 12) | unix_perm`:
//!
//! | Nibble | Meaning | Canonical mode(s) |
//! |--------|---------|-------------------|
//! | 0x8 | regular file | 100644, 100755 |
//! | 0x4 | directory | 40000 |
//! | 0x2 | symlink | 120000 |
//! | 0xE | gitlink | 160000 |
//!
//! Only the low 9 permission bits are meaningful for regular files.

use std::cmp::Ordering;
use std::fmt;

use memchr::memchr;

use crate::object::{hash_payload, ObjectError, ObjectType};
use crate::object_id::{ObjectId, ID_LEN};

/// A Git file mode: `(type_nibble << 12) | unix_perm`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct GitMode(u16);

impl GitMode {
    /// Regular file type bits.
    pub const REGULAR: GitMode = GitMode(0o100000);
    /// Directory type bits.
    pub const DIR: GitMode = GitMode(0o040000);
    /// Symlink type bits.
    pub const SYMLINK: GitMode = GitMode(0o120000);
    /// Gitlink (submodule) type bits: directory | symlink.
    pub const GITLINK: GitMode = GitMode(0o160000);

    /// Wraps a raw mode value.
    #[inline]
    #[must_use]
    pub const fn new(bits: u16) -> Self {
        Self(bits)
    }

    /// Returns the raw mode value.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u16 {
        self.0
    }

    /// Returns the type nibble (high four bits).
    #[inline]
    #[must_use]
    pub const fn type_bits(self) -> u16 {
        self.0 >> 12
    }

    /// Returns true for directory entries (type nibble 4).
    ///
    /// Gitlinks (0xE) are not directories for sorting purposes.
    #[inline]
    #[must_use]
    pub const fn is_dir(self) -> bool {
        self.type_bits() == 0o4
    }

    /// Returns the Unix permission bits.
    #[inline]
    #[must_use]
    pub const fn perm(self) -> u16 {
        self.0 & 0o777
    }

    /// Parses one to six octal digits.
    #[must_use]
    pub fn from_octal(digits: &[u8]) -> Option<Self> {
        if digits.is_empty() || digits.len() > 6 {
            return None;
        }
        let mut value: u32 = 0;
        for &digit in digits {
            if !(b'0'..=b'7').contains(&digit) {
                return None;
            }
            value = (value << 3) | u32::from(digit - b'0');
        }
        u16::try_from(value).ok().map(Self)
    }

    /// Appends the minimal octal form (no leading zeros).
    pub fn push_octal(self, out: &mut Vec<u8>) {
        let mut digits = [0u8; 6];
        let mut n = 0;
        let mut value = self.0;
        loop {
            digits[n] = b'0' + (value & 0o7) as u8;
            n += 1;
            value >>= 3;
            if value == 0 {
                break;
            }
        }
        for i in (0..n).rev() {
            out.push(digits[i]);
        }
    }
}

impl fmt::Debug for GitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GitMode({:o})", self.0)
    }
}

/// One tree entry: a named link to a child object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TreeEntry {
    pub mode: GitMode,
    /// Single path component; non-empty, no NUL, no slash.
    pub name: Vec<u8>,
    pub id: ObjectId,
}

/// A collection of blobs and trees in a directory-like fashion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tree {
    pub id: ObjectId,
    pub entries: Vec<TreeEntry>,
}

impl Tree {
    /// Builds a tree from entries, verifying the ordering invariant and
    /// computing the identifier.
    pub fn new(entries: Vec<TreeEntry>) -> Result<Self, ObjectError> {
        for pair in entries.windows(2) {
            if entry_order(&pair[0], &pair[1]) != Ordering::Less {
                return Err(ObjectError::BadTree {
                    detail: "entries out of order",
                });
            }
        }
        let mut payload = Vec::new();
        payload_of(&entries, &mut payload);
        let id = hash_payload(ObjectType::Tree, &payload);
        Ok(Self { id, entries })
    }

    /// Appends the canonical payload.
    pub fn payload_into(&self, out: &mut Vec<u8>) {
        payload_of(&self.entries, out);
    }
}

fn payload_of(entries: &[TreeEntry], out: &mut Vec<u8>) {
    for entry in entries {
        entry.mode.push_octal(out);
        out.push(b' ');
        out.extend_from_slice(&entry.name);
        out.push(0);
        out.extend_from_slice(entry.id.as_bytes());
    }
}

/// Compares entries the way Git sorts them when writing a tree: a
/// directory name is treated as if suffixed by `/`.
pub fn entry_order(a: &TreeEntry, b: &TreeEntry) -> Ordering {
    let common = a.name.len().min(b.name.len());
    match a.name[..common].cmp(&b.name[..common]) {
        Ordering::Equal => {}
        other => return other,
    }
    let ca = tail_byte(&a.name, common, a.mode);
    let cb = tail_byte(&b.name, common, b.mode);
    ca.cmp(&cb)
}

#[inline]
fn tail_byte(name: &[u8], pos: usize, mode: GitMode) -> u8 {
    match name.get(pos) {
        Some(&byte) => byte,
        None if mode.is_dir() => b'/',
        None => 0,
    }
}

/// Parses a tree payload into entries.
///
/// Ordering is verified by [`Tree::new`]; this only checks the wire shape
/// of each entry.
pub(crate) fn parse_tree(payload: &[u8]) -> Result<Vec<TreeEntry>, ObjectError> {
    let mut entries = Vec::new();
    let mut pos = 0usize;

    while pos < payload.len() {
        let sp = memchr(b' ', &payload[pos..]).ok_or(ObjectError::BadTree {
            detail: "missing space after mode",
        })? + pos;
        let mode = GitMode::from_octal(&payload[pos..sp]).ok_or(ObjectError::BadTree {
            detail: "bad mode digits",
        })?;

        let name_start = sp + 1;
        let nul = memchr(0, &payload[name_start..]).ok_or(ObjectError::BadTree {
            detail: "missing NUL after name",
        })? + name_start;
        let name = &payload[name_start..nul];
        if name.is_empty() {
            return Err(ObjectError::BadTree {
                detail: "empty entry name",
            });
        }
        if memchr(b'/', name).is_some() {
            return Err(ObjectError::BadTree {
                detail: "slash in entry name",
            });
        }

        let id_end = nul + 1 + ID_LEN;
        if id_end > payload.len() {
            return Err(ObjectError::BadTree {
                detail: "truncated entry id",
            });
        }
        let id = ObjectId::from_slice(&payload[nul + 1..id_end]).ok_or(ObjectError::BadTree {
            detail: "truncated entry id",
        })?;

        entries.push(TreeEntry {
            mode,
            name: name.to_vec(),
            id,
        });
        pos = id_end;
    }

    Ok(entries)
}
