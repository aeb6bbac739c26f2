//! Bounded zlib inflation.
//!
//! Pack entries store the uncompressed size but not the compressed length,
//! and entries are concatenated without padding, so decompression must be
//! driven by the expected output size: `inflate_at` reads forward from a
//! positioned source and stops as soon as the expected number of bytes has
//! been produced. Hitting end-of-source at or after that point is normal
//! (the pack trailer sits right behind the last entry).
//!
//! # Caller Expectations
//! - Output sizes are validated against caller-side caps before inflation
//!   is attempted; `expected` and `max_out` are trusted bounds here.
//! - The thread-local scratch state is not re-entrant: inflate helpers
//!   must not be invoked recursively on the same thread.

use std::cell::RefCell;
use std::fmt;

use flate2::{Decompress, FlushDecompress, Status};

use crate::source::{ByteSource, SourceError};

/// Scratch buffer size for both input refill and output drains.
const INFLATE_BUF_SIZE: usize = 64 * 1024;

thread_local! {
    static INFLATE_STATE: RefCell<Decompress> = RefCell::new(Decompress::new(true));
    static INFLATE_IN: RefCell<[u8; INFLATE_BUF_SIZE]> =
        const { RefCell::new([0u8; INFLATE_BUF_SIZE]) };
    static INFLATE_OUT: RefCell<[u8; INFLATE_BUF_SIZE]> =
        const { RefCell::new([0u8; INFLATE_BUF_SIZE]) };
}

/// Runs an inflate operation with per-thread scratch buffers.
fn with_inflate_scratch<F, R>(f: F) -> R
where
    F: FnOnce(&mut Decompress, &mut [u8], &mut [u8]) -> R,
{
    INFLATE_STATE.with(|state| {
        INFLATE_IN.with(|in_buf| {
            INFLATE_OUT.with(|out_buf| {
                let mut state = state.borrow_mut();
                state.reset(true);
                let mut in_buf = in_buf.borrow_mut();
                let mut out_buf = out_buf.borrow_mut();
                f(&mut state, &mut *in_buf, &mut *out_buf)
            })
        })
    })
}

/// Inflate error taxonomy.
#[derive(Debug, PartialEq, Eq)]
pub enum InflateError {
    /// The zlib stream is malformed (bad header, bad data, checksum
    /// failure, or a stall with input still available).
    CorruptStream,
    /// The underlying source ended before the expected output was produced.
    Truncated,
    /// Output exceeded the caller's cap.
    TooLarge { size: usize, max: usize },
    /// Positioned read failed.
    Source(SourceError),
}

impl fmt::Display for InflateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CorruptStream => write!(f, "corrupt zlib stream"),
            Self::Truncated => write!(f, "truncated zlib stream"),
            Self::TooLarge { size, max } => {
                write!(f, "inflated size {size} exceeds cap {max}")
            }
            Self::Source(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for InflateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Source(err) => Some(err),
            _ => None,
        }
    }
}

impl From<SourceError> for InflateError {
    fn from(err: SourceError) -> Self {
        Self::Source(err)
    }
}

/// Inflates a zlib stream beginning at `start` in `source`, producing
/// exactly `expected` bytes.
///
/// The compressed length is unknown in advance; input is pulled from the
/// source in scratch-sized chunks. Production stops once `expected` bytes
/// exist, whether or not the stream has formally ended, and any output
/// past that point is discarded. Running out of input first is
/// `Truncated`.
pub fn inflate_at<S: ByteSource + ?Sized>(
    source: &S,
    start: u64,
    expected: usize,
) -> Result<Vec<u8>, InflateError> {
    let mut out = Vec::with_capacity(expected);
    if expected == 0 {
        return Ok(out);
    }

    with_inflate_scratch(|state, in_buf, out_buf| {
        let mut read_pos = start;
        let mut in_len = 0usize;
        let mut in_pos = 0usize;

        loop {
            if in_pos == in_len {
                let got = source.read_at(read_pos, in_buf)?;
                if got == 0 {
                    return Err(InflateError::Truncated);
                }
                read_pos += got as u64;
                in_len = got;
                in_pos = 0;
            }

            let before_in = state.total_in() as usize;
            let before_out = state.total_out() as usize;

            let status = state
                .decompress(&in_buf[in_pos..in_len], out_buf, FlushDecompress::None)
                .map_err(|_| InflateError::CorruptStream)?;

            let consumed = state.total_in() as usize - before_in;
            let produced = state.total_out() as usize - before_out;
            in_pos += consumed;

            if produced != 0 {
                let take = produced.min(expected - out.len());
                out.extend_from_slice(&out_buf[..take]);
                if out.len() == expected {
                    return Ok(());
                }
            }

            match status {
                Status::StreamEnd => return Err(InflateError::Truncated),
                Status::Ok | Status::BufError => {
                    if consumed == 0 && produced == 0 && in_pos < in_len {
                        return Err(InflateError::CorruptStream);
                    }
                }
            }
        }
    })?;

    Ok(out)
}

/// Inflates a complete in-memory zlib stream with a hard output cap.
///
/// Used where the uncompressed size is not known in advance (loose
/// objects). The stream must end properly; the number of input bytes
/// consumed is returned.
pub fn inflate_slice(
    input: &[u8],
    out: &mut Vec<u8>,
    max_out: usize,
) -> Result<usize, InflateError> {
    out.clear();

    with_inflate_scratch(|state, _in_buf, out_buf| {
        let mut in_pos = 0usize;

        loop {
            let before_in = state.total_in() as usize;
            let before_out = state.total_out() as usize;

            let status = state
                .decompress(&input[in_pos..], out_buf, FlushDecompress::None)
                .map_err(|_| InflateError::CorruptStream)?;

            let consumed = state.total_in() as usize - before_in;
            let produced = state.total_out() as usize - before_out;
            in_pos += consumed;

            if produced != 0 {
                if out.len() + produced > max_out {
                    return Err(InflateError::TooLarge {
                        size: out.len() + produced,
                        max: max_out,
                    });
                }
                out.extend_from_slice(&out_buf[..produced]);
            }

            match status {
                Status::StreamEnd => return Ok(in_pos),
                Status::Ok => {
                    if consumed == 0 && produced == 0 {
                        if in_pos >= input.len() {
                            return Err(InflateError::Truncated);
                        }
                        return Err(InflateError::CorruptStream);
                    }
                }
                Status::BufError => {
                    if in_pos >= input.len() {
                        return Err(InflateError::Truncated);
                    }
                }
            }
        }
    })
}
