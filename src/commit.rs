//! Git commit payloads.
//!
//! A commit is a block of header lines, an empty line, then the message
//! verbatim. Headers appear in fixed leading order: `tree` (exactly one),
//! `parent` (zero or more), `author`, `committer`. Anything after the
//! committer line (`encoding`, `gpgsig` with its space-indented
//! continuation lines, headers this crate has never heard of) is carried
//! through untouched so the canonical serialization reproduces the
//! original bytes.
//!
//! Signature lines are parsed leniently: the last two whitespace-separated
//! tokens are the Unix timestamp and a `±HHMM` timezone, and everything
//! before them is the identity. Historical repositories contain identities
//! with embedded spaces and malformed emails that Git itself accepts, so
//! the identity is never picked apart.

use memchr::{memchr, memrchr};

use crate::object::{hash_payload, ObjectError, ObjectType};
use crate::object_id::{ObjectId, ID_HEX_LEN};

/// An author or committer stamp.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature {
    /// Identity bytes, conventionally `Name <email>`, kept verbatim.
    pub ident: Vec<u8>,
    /// Seconds since the Unix epoch.
    pub seconds: i64,
    /// Timezone offset in minutes east of UTC.
    pub tz_minutes: i16,
}

impl Signature {
    /// Parses `<ident> <unix seconds> <±HHMM>`.
    pub fn parse(line: &[u8]) -> Result<Self, ObjectError> {
        let tz_sp = memrchr(b' ', line).ok_or(ObjectError::MalformedCommit {
            detail: "signature missing timezone",
        })?;
        let tz = &line[tz_sp + 1..];
        if tz.len() != 5
            || (tz[0] != b'+' && tz[0] != b'-')
            || !tz[1..].iter().all(u8::is_ascii_digit)
        {
            return Err(ObjectError::MalformedCommit {
                detail: "signature timezone not ±HHMM",
            });
        }

        let ts_sp = memrchr(b' ', &line[..tz_sp]).ok_or(ObjectError::MalformedCommit {
            detail: "signature missing timestamp",
        })?;
        let seconds = parse_i64(&line[ts_sp + 1..tz_sp]).ok_or(ObjectError::MalformedCommit {
            detail: "signature timestamp not a number",
        })?;

        let hours = i16::from(tz[1] - b'0') * 10 + i16::from(tz[2] - b'0');
        let minutes = i16::from(tz[3] - b'0') * 10 + i16::from(tz[4] - b'0');
        let mut tz_minutes = hours * 60 + minutes;
        if tz[0] == b'-' {
            tz_minutes = -tz_minutes;
        }

        Ok(Self {
            ident: line[..ts_sp].to_vec(),
            seconds,
            tz_minutes,
        })
    }

    /// Appends the serialized form.
    pub fn write_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.ident);
        out.push(b' ');
        out.extend_from_slice(self.seconds.to_string().as_bytes());
        out.push(b' ');
        out.push(if self.tz_minutes < 0 { b'-' } else { b'+' });
        let total = self.tz_minutes.unsigned_abs();
        let (hours, minutes) = (total / 60, total % 60);
        out.push(b'0' + ((hours / 10) % 10) as u8);
        out.push(b'0' + (hours % 10) as u8);
        out.push(b'0' + ((minutes / 10) % 10) as u8);
        out.push(b'0' + (minutes % 10) as u8);
    }
}

fn parse_i64(digits: &[u8]) -> Option<i64> {
    let (neg, digits) = match digits.split_first() {
        Some((b'-', rest)) => (true, rest),
        _ => (false, digits),
    };
    if digits.is_empty() {
        return None;
    }
    let mut value: i64 = 0;
    for &digit in digits {
        if !digit.is_ascii_digit() {
            return None;
        }
        value = value
            .checked_mul(10)?
            .checked_add(i64::from(digit - b'0'))?;
    }
    Some(if neg { -value } else { value })
}

/// The metadata stored in a Git commit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Commit {
    pub id: ObjectId,
    /// The tree snapshot this commit points to.
    pub tree: ObjectId,
    /// Parent commits, order preserved.
    pub parents: Vec<ObjectId>,
    pub author: Signature,
    pub committer: Signature,
    /// Raw header lines after `committer` (without the trailing newline),
    /// preserved verbatim; continuation lines keep their leading space.
    pub extra_headers: Vec<Vec<u8>>,
    /// The commit description, verbatim.
    pub message: Vec<u8>,
}

impl Commit {
    /// Builds a commit, computing its identifier.
    #[must_use]
    pub fn new(
        tree: ObjectId,
        parents: Vec<ObjectId>,
        author: Signature,
        committer: Signature,
        extra_headers: Vec<Vec<u8>>,
        message: Vec<u8>,
    ) -> Self {
        let mut commit = Self {
            id: ObjectId::default(),
            tree,
            parents,
            author,
            committer,
            extra_headers,
            message,
        };
        let mut payload = Vec::new();
        commit.payload_into(&mut payload);
        commit.id = hash_payload(ObjectType::Commit, &payload);
        commit
    }

    /// Appends the canonical payload.
    pub fn payload_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(b"tree ");
        self.tree.push_hex(out);
        out.push(b'\n');
        for parent in &self.parents {
            out.extend_from_slice(b"parent ");
            parent.push_hex(out);
            out.push(b'\n');
        }
        out.extend_from_slice(b"author ");
        self.author.write_into(out);
        out.push(b'\n');
        out.extend_from_slice(b"committer ");
        self.committer.write_into(out);
        out.push(b'\n');
        for line in &self.extra_headers {
            out.extend_from_slice(line);
            out.push(b'\n');
        }
        out.push(b'\n');
        out.extend_from_slice(&self.message);
    }
}

/// Consumes one newline-terminated line.
fn take_line<'a>(payload: &'a [u8], pos: &mut usize) -> Result<&'a [u8], ObjectError> {
    let rest = &payload[*pos..];
    let nl = memchr(b'\n', rest).ok_or(ObjectError::MalformedCommit {
        detail: "unterminated header line",
    })?;
    *pos += nl + 1;
    Ok(&rest[..nl])
}

/// Consumes a `<prefix><40 hex digits>` line.
fn take_id_line(
    payload: &[u8],
    pos: &mut usize,
    prefix: &[u8],
    detail: &'static str,
) -> Result<ObjectId, ObjectError> {
    let line = take_line(payload, pos)?;
    let hex = line
        .strip_prefix(prefix)
        .ok_or(ObjectError::MalformedCommit { detail })?;
    if hex.len() != ID_HEX_LEN {
        return Err(ObjectError::MalformedCommit { detail });
    }
    ObjectId::from_hex(hex).ok_or(ObjectError::MalformedCommit { detail })
}

/// Parses a commit payload.
pub(crate) fn parse_commit(payload: &[u8]) -> Result<Commit, ObjectError> {
    let mut pos = 0usize;

    let tree = take_id_line(payload, &mut pos, b"tree ", "bad tree header")?;

    let mut parents = Vec::new();
    while payload[pos..].starts_with(b"parent ") {
        parents.push(take_id_line(payload, &mut pos, b"parent ", "bad parent header")?);
    }

    let author_line = take_line(payload, &mut pos)?;
    let author = Signature::parse(author_line.strip_prefix(b"author ").ok_or(
        ObjectError::MalformedCommit {
            detail: "missing author header",
        },
    )?)?;

    let committer_line = take_line(payload, &mut pos)?;
    let committer = Signature::parse(committer_line.strip_prefix(b"committer ").ok_or(
        ObjectError::MalformedCommit {
            detail: "missing committer header",
        },
    )?)?;

    // Remaining headers up to the blank line are preserved verbatim.
    let mut extra_headers = Vec::new();
    let mut message = Vec::new();
    while pos < payload.len() {
        let line = take_line(payload, &mut pos)?;
        if line.is_empty() {
            message = payload[pos..].to_vec();
            break;
        }
        extra_headers.push(line.to_vec());
    }

    Ok(Commit::new(
        tree,
        parents,
        author,
        committer,
        extra_headers,
        message,
    ))
}
