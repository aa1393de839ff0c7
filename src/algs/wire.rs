//! Fixed, versioned, little-endian wire types for the plan handshake.
//!
//! Payload exchanges move caller bytes untouched; only the metadata the plan
//! builder sends to its peers has a wire format, defined here.

use bytemuck::{Pod, Zeroable};
use static_assertions::{assert_eq_align, assert_eq_size};
use std::mem::size_of;

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

pub fn cast_slice_mut<T: Pod>(v: &mut [T]) -> &mut [u8] {
    bytemuck::cast_slice_mut(v)
}

pub fn expect_exact_len(actual: usize, expected: usize) -> Result<(), String> {
    if actual == expected {
        Ok(())
    } else {
        Err(format!("expected {expected} bytes, got {actual}"))
    }
}

/// Bump when the layout or semantics change in incompatible ways.
pub const WIRE_VERSION: u16 = 1;

/// Header kind of a send-count vector.
pub const KIND_SEND_COUNTS: u16 = 1;

/// All multi-byte integers in these structs are **little-endian** on the wire.
/// We store them pre-LE with `.to_le()` and decode with `.from_le()`.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireHdr {
    pub version_le: u16,
    pub kind_le: u16,
    /// Group size as seen by the sender.
    pub n_ranks_le: u32,
}

impl WireHdr {
    pub fn new(kind: u16, n_ranks: usize) -> Self {
        Self {
            version_le: WIRE_VERSION.to_le(),
            kind_le: kind.to_le(),
            n_ranks_le: (n_ranks as u32).to_le(),
        }
    }
    pub fn kind(&self) -> u16 {
        u16::from_le(self.kind_le)
    }
    pub fn version(&self) -> u16 {
        u16::from_le(self.version_le)
    }
    pub fn n_ranks(&self) -> usize {
        u32::from_le(self.n_ranks_le) as usize
    }
}

/// One element count.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireCount {
    pub n_le: u64,
}

impl WireCount {
    pub fn new(n: usize) -> Self {
        Self {
            n_le: (n as u64).to_le(),
        }
    }
    pub fn get(&self) -> usize {
        u64::from_le(self.n_le) as usize
    }
}

/// Encode `[hdr | counts...]` as sent by the count handshake.
pub fn encode_counts(n_ranks: usize, counts: &[usize]) -> Vec<u8> {
    let hdr = WireHdr::new(KIND_SEND_COUNTS, n_ranks);
    let wire: Vec<WireCount> = counts.iter().map(|&c| WireCount::new(c)).collect();
    let mut out = Vec::with_capacity(counts_message_len(counts.len()));
    out.extend_from_slice(cast_slice(std::slice::from_ref(&hdr)));
    out.extend_from_slice(cast_slice(&wire));
    out
}

/// Byte length of a count message carrying `n` entries.
pub const fn counts_message_len(n: usize) -> usize {
    size_of::<WireHdr>() + n * size_of::<WireCount>()
}

/// Split a count message into its header and decoded counts.
///
/// Fails if the buffer is shorter than a header or its body is not a whole
/// number of counts; semantic checks on the header are left to the caller.
pub fn decode_counts(raw: &[u8]) -> Result<(WireHdr, Vec<usize>), String> {
    let hdr_len = size_of::<WireHdr>();
    if raw.len() < hdr_len {
        return Err(format!(
            "count message of {} bytes is shorter than its {hdr_len}-byte header",
            raw.len()
        ));
    }
    let (head, body) = raw.split_at(hdr_len);
    if body.len() % size_of::<WireCount>() != 0 {
        return Err(format!(
            "count body of {} bytes is not a multiple of {}",
            body.len(),
            size_of::<WireCount>()
        ));
    }
    // Copy out: the receive buffer carries no alignment guarantee.
    let mut hdr = WireHdr::zeroed();
    cast_slice_mut(std::slice::from_mut(&mut hdr)).copy_from_slice(head);
    let mut counts = vec![WireCount::zeroed(); body.len() / size_of::<WireCount>()];
    cast_slice_mut(&mut counts).copy_from_slice(body);
    Ok((hdr, counts.iter().map(WireCount::get).collect()))
}

// ===== Compile-time sanity checks =========================================

assert_eq_size!(WireHdr, u64);
assert_eq_size!(WireCount, u64);
assert_eq_align!(WireCount, u64);
