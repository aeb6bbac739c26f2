//! Delta encoding via Rabin-fingerprint chunk matching.
//!
//! The encoder slices the base into fixed-width chunks, indexes them by a
//! rolling polynomial fingerprint over GF(2), then scans the target with
//! the rolling window. Fingerprint hits are verified byte-wise and
//! extended in both directions before being emitted as copy instructions;
//! everything in between becomes literal inserts.
//!
//! Output is deterministic for a given input pair. It is not required to
//! be byte-identical to any other encoder, only to reconstruct the target
//! through [`crate::delta::apply`].

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::delta::write_size_varint;

/// Irreducible polynomial x^31 + x^3 + 1 over GF(2).
const RABIN_POLY: u64 = (1 << 31) | (1 << 3) | 1;

/// Fingerprint width in bits (degree of the polynomial).
const RABIN_DEGREE: u32 = 31;

/// Mask keeping fingerprints below the polynomial degree.
const FP_MASK: u32 = (1 << RABIN_DEGREE) - 1;

/// Matching window and base chunk width in bytes.
const CHUNK_LEN: usize = 16;

/// Longest run a single copy instruction can express.
const MAX_COPY_LEN: usize = 0x10000;

/// Longest run a single insert instruction can express.
const MAX_INSERT_LEN: usize = 0x7f;

/// Reduces a polynomial (bit-vector) modulo [`RABIN_POLY`].
fn poly_mod(mut value: u64) -> u32 {
    while value >> RABIN_DEGREE != 0 {
        let top = 63 - value.leading_zeros();
        value ^= RABIN_POLY << (top - RABIN_DEGREE);
    }
    value as u32
}

/// Precomputed byte-wise transition tables for the rolling fingerprint.
struct RabinTables {
    /// Reduction of the eight bits shifted past the degree when a byte
    /// enters the window.
    shift_in: [u32; 256],
    /// Contribution of a byte about to leave the window
    /// (`b * x^(8*(CHUNK_LEN-1)) mod P`).
    shift_out: [u32; 256],
}

impl RabinTables {
    fn new() -> Self {
        let mut shift_in = [0u32; 256];
        for (byte, slot) in shift_in.iter_mut().enumerate() {
            *slot = poly_mod((byte as u64) << RABIN_DEGREE);
        }

        let mut tables = Self {
            shift_in,
            shift_out: [0u32; 256],
        };
        for byte in 0..256 {
            let mut value = byte as u32;
            for _ in 0..CHUNK_LEN - 1 {
                value = tables.push(value, 0);
            }
            tables.shift_out[byte] = value;
        }
        tables
    }

    /// Multiplies by x^8 and adds `byte`, reducing modulo the polynomial.
    #[inline]
    fn push(&self, fp: u32, byte: u8) -> u32 {
        let top = (fp >> (RABIN_DEGREE - 8)) as usize;
        ((fp << 8) & FP_MASK) ^ u32::from(byte) ^ self.shift_in[top]
    }

    /// Slides the window one byte: removes `out_byte`, appends `in_byte`.
    #[inline]
    fn roll(&self, fp: u32, out_byte: u8, in_byte: u8) -> u32 {
        self.push(fp ^ self.shift_out[out_byte as usize], in_byte)
    }

    /// Fingerprints a full window.
    fn fingerprint(&self, window: &[u8]) -> u32 {
        debug_assert_eq!(window.len(), CHUNK_LEN);
        window.iter().fold(0, |fp, &byte| self.push(fp, byte))
    }
}

fn tables() -> &'static RabinTables {
    static TABLES: OnceLock<RabinTables> = OnceLock::new();
    TABLES.get_or_init(RabinTables::new)
}

/// Indexes each non-overlapping base chunk by fingerprint.
///
/// On collision the smallest offset wins, biasing later extension toward
/// earlier base regions.
fn chunk_index(base: &[u8], tables: &RabinTables) -> HashMap<u32, usize> {
    let mut index = HashMap::with_capacity(base.len() / CHUNK_LEN);
    let mut offset = 0;
    while offset + CHUNK_LEN <= base.len() {
        index
            .entry(tables.fingerprint(&base[offset..offset + CHUNK_LEN]))
            .or_insert(offset);
        offset += CHUNK_LEN;
    }
    index
}

/// Computes a delta such that `apply(base, diff(base, target)) == target`.
pub fn diff(base: &[u8], target: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(32 + target.len() / 8);
    write_size_varint(&mut out, base.len() as u64);
    write_size_varint(&mut out, target.len() as u64);

    // Copy offsets are encoded in four bytes; a base beyond that range
    // (or inputs shorter than the window) degrades to pure inserts.
    if base.len() < CHUNK_LEN || target.len() < CHUNK_LEN || base.len() > u32::MAX as usize {
        emit_insert(&mut out, target);
        return out;
    }

    let tables = tables();
    let chunks = chunk_index(base, tables);

    let mut emitted = 0usize;
    let mut fp = tables.fingerprint(&target[..CHUNK_LEN]);
    let mut end = CHUNK_LEN;

    loop {
        let window_start = end - CHUNK_LEN;
        let candidate = chunks
            .get(&fp)
            .copied()
            .filter(|&off| base[off..off + CHUNK_LEN] == target[window_start..end]);

        if let Some(candidate) = candidate {
            // Extend the verified window left (without crossing already
            // emitted output) and right as far as the buffers agree.
            let mut base_start = candidate;
            let mut tgt_start = window_start;
            while base_start > 0 && tgt_start > emitted && base[base_start - 1] == target[tgt_start - 1]
            {
                base_start -= 1;
                tgt_start -= 1;
            }
            let mut base_end = candidate + CHUNK_LEN;
            let mut tgt_end = end;
            while base_end < base.len() && tgt_end < target.len() && base[base_end] == target[tgt_end]
            {
                base_end += 1;
                tgt_end += 1;
            }

            emit_insert(&mut out, &target[emitted..tgt_start]);
            emit_copy(&mut out, base_start, base_end - base_start);
            emitted = tgt_end;

            if tgt_end + CHUNK_LEN > target.len() {
                break;
            }
            fp = tables.fingerprint(&target[tgt_end..tgt_end + CHUNK_LEN]);
            end = tgt_end + CHUNK_LEN;
            continue;
        }

        if end == target.len() {
            break;
        }
        fp = tables.roll(fp, target[window_start], target[end]);
        end += 1;
    }

    emit_insert(&mut out, &target[emitted..]);
    out
}

/// Emits literal data as insert instructions of at most 127 bytes.
fn emit_insert(out: &mut Vec<u8>, mut data: &[u8]) {
    while !data.is_empty() {
        let take = data.len().min(MAX_INSERT_LEN);
        out.push(take as u8);
        out.extend_from_slice(&data[..take]);
        data = &data[take..];
    }
}

/// Emits a copy run, splitting it into instruction-sized pieces.
fn emit_copy(out: &mut Vec<u8>, mut offset: usize, mut len: usize) {
    while len > MAX_COPY_LEN {
        push_copy(out, offset, MAX_COPY_LEN);
        offset += MAX_COPY_LEN;
        len -= MAX_COPY_LEN;
    }
    if len > 0 {
        push_copy(out, offset, len);
    }
}

/// Emits one copy instruction for `len` in `1..=MAX_COPY_LEN`.
///
/// Zero bytes are omitted from the encoding; a full 0x10000 run is
/// expressed by omitting every length byte.
fn push_copy(out: &mut Vec<u8>, offset: usize, len: usize) {
    debug_assert!((1..=MAX_COPY_LEN).contains(&len));

    let op_at = out.len();
    out.push(0);
    let mut op = 0x80u8;

    let offset = offset as u32;
    for shift in 0..4 {
        let byte = (offset >> (8 * shift)) as u8;
        if byte != 0 {
            op |= 1 << shift;
            out.push(byte);
        }
    }

    if len != MAX_COPY_LEN {
        for shift in 0..2 {
            let byte = (len >> (8 * shift)) as u8;
            if byte != 0 {
                op |= 0x10 << shift;
                out.push(byte);
            }
        }
    }

    out[op_at] = op;
}
