//! Loose object parsing.
//!
//! A loose object is a zlib-compressed `<type> <decimal size>\0<payload>`
//! stored under `objects/xx/yyyy…`. The header is scanned within the
//! first 32 bytes of the inflated stream, which is enough for a 20-digit
//! size.

use std::fmt;
use std::io::Read;

use memchr::memchr;

use crate::inflate::{inflate_slice, InflateError};
use crate::object::{read_object, Object, ObjectError, ObjectType};

/// Longest envelope header this parser accepts.
const HEADER_SCAN_BYTES: usize = 32;

/// Limits for loose object parsing.
#[derive(Debug, Clone, Copy)]
pub struct LooseLimits {
    /// Maximum inflated object size in bytes.
    pub max_object_bytes: usize,
}

impl Default for LooseLimits {
    fn default() -> Self {
        Self {
            max_object_bytes: 256 * 1024 * 1024,
        }
    }
}

/// Errors from loose object reading.
#[derive(Debug)]
pub enum LooseError {
    /// Reading the compressed stream failed.
    Io(String),
    /// Zlib decode failed.
    Inflate(InflateError),
    /// The envelope or payload is malformed.
    Object(ObjectError),
}

impl fmt::Display for LooseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(msg) => write!(f, "loose object read: {msg}"),
            Self::Inflate(err) => write!(f, "{err}"),
            Self::Object(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for LooseError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(_) => None,
            Self::Inflate(err) => Some(err),
            Self::Object(err) => Some(err),
        }
    }
}

impl From<InflateError> for LooseError {
    fn from(err: InflateError) -> Self {
        Self::Inflate(err)
    }
}

impl From<ObjectError> for LooseError {
    fn from(err: ObjectError) -> Self {
        Self::Object(err)
    }
}

/// Reads and parses a loose object from its raw compressed contents.
pub fn parse_loose<R: Read>(mut reader: R, limits: &LooseLimits) -> Result<Object, LooseError> {
    let mut compressed = Vec::new();
    reader
        .read_to_end(&mut compressed)
        .map_err(|err| LooseError::Io(err.to_string()))?;

    let mut data = Vec::new();
    // Envelope header rides on top of the payload cap.
    inflate_slice(&compressed, &mut data, limits.max_object_bytes + HEADER_SCAN_BYTES)?;

    let (kind, payload) = split_envelope(data)?;
    Ok(read_object(kind, payload)?)
}

/// Splits `<type> SP <size> NUL` off the inflated bytes.
fn split_envelope(mut data: Vec<u8>) -> Result<(ObjectType, Vec<u8>), LooseError> {
    let window = &data[..data.len().min(HEADER_SCAN_BYTES)];
    let sp = memchr(b' ', window).ok_or(ObjectError::BadHeader {
        detail: "missing space",
    })?;
    let nul = memchr(0, window).ok_or(ObjectError::BadHeader {
        detail: "missing NUL",
    })?;
    if nul < sp {
        return Err(ObjectError::BadHeader {
            detail: "NUL before space",
        }
        .into());
    }

    let kind = ObjectType::from_bytes(&window[..sp]).ok_or(ObjectError::InvalidType)?;
    let size = parse_size(&window[sp + 1..nul]).ok_or(ObjectError::BadHeader {
        detail: "bad size digits",
    })?;

    let payload = data.split_off(nul + 1);
    if payload.len() as u64 != size {
        return Err(ObjectError::SizeMismatch {
            expected: size,
            got: payload.len() as u64,
        }
        .into());
    }
    Ok((kind, payload))
}

/// Parses the ASCII decimal size; leading zeros are non-canonical and
/// rejected (except the bare "0").
fn parse_size(digits: &[u8]) -> Option<u64> {
    if digits.is_empty() || (digits.len() > 1 && digits[0] == b'0') {
        return None;
    }
    let mut value: u64 = 0;
    for &digit in digits {
        if !digit.is_ascii_digit() {
            return None;
        }
        value = value
            .checked_mul(10)?
            .checked_add(u64::from(digit - b'0'))?;
    }
    Some(value)
}
