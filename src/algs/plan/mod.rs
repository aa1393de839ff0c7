//! Communication plans for irregular (all-to-all-v style) redistribution.
//!
//! A [`CommPlan`] records who sends how many elements to whom. It is built
//! once from a local destination list (see [`PlanBuilder`]) through a count
//! handshake with every peer, and then reused by an
//! [`Exchanger`](crate::algs::exchange::Exchanger) for any number of payload
//! exchanges with arbitrary element widths.
//!
//! # Buffer layouts
//!
//! All counts and offsets are in *elements*; bytes only appear once an element
//! width is chosen for a particular exchange.
//!
//! * **Send order**: local elements grouped by destination rank in increasing
//!   rank order, then all retained elements. Within a group, elements keep their
//!   original relative order, so the layout is deterministic.
//! * **Receive order**: data from rank 0, rank 1, ... at
//!   [`CommPlan::recv_offsets`], followed by a trailing slot holding this
//!   process's own retained elements in send order.

mod builder;
pub mod count_exchange;

pub use builder::{PlanBuilder, build, build_from_raw};

use crate::algs::communicator::PlanCommTags;
use crate::comm_error::CommError;
use crate::debug_invariants::DebugInvariants;
use bytemuck::Pod;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Where a locally held element should go.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Destination {
    /// Keep the element on this process without touching the transport.
    Retain,
    /// Send the element to the given rank. The caller's own rank behaves like
    /// [`Destination::Retain`].
    Rank(usize),
}

impl Destination {
    /// The only sentinel accepted in raw destination lists.
    pub const RETAIN_SENTINEL: i32 = -1;

    /// Decode one raw destination-list entry.
    ///
    /// `index` is only used for error reporting.
    pub fn from_raw(raw: i32, index: usize, n_ranks: usize) -> Result<Self, CommError> {
        match raw {
            Self::RETAIN_SENTINEL => Ok(Destination::Retain),
            r if r >= 0 && (r as usize) < n_ranks => Ok(Destination::Rank(r as usize)),
            r => Err(CommError::InvalidDestination {
                index,
                value: r as i64,
                n_ranks,
            }),
        }
    }
}

impl From<usize> for Destination {
    fn from(rank: usize) -> Self {
        Destination::Rank(rank)
    }
}

/// Derived, reusable description of an irregular exchange.
///
/// The topology is immutable once built; only the default element width can
/// be changed through [`CommPlan::set_element_width`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommPlan {
    rank: usize,
    n_ranks: usize,
    tags: PlanCommTags,
    send_counts: Vec<usize>,
    recv_counts: Vec<usize>,
    /// `n_ranks + 1` entries; the last is the start of the retained run.
    send_offsets: Vec<usize>,
    /// `n_ranks + 1` entries; the last is the start of the retain slot.
    recv_offsets: Vec<usize>,
    send_order: Vec<usize>,
    n_retain: usize,
    element_width: usize,
}

/// Serializable snapshot of a plan for diagnostics.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub rank: usize,
    pub n_ranks: usize,
    pub tags: PlanCommTags,
    pub send_counts: Vec<usize>,
    pub recv_counts: Vec<usize>,
    pub total_send: usize,
    pub total_receive: usize,
    pub n_retain: usize,
    pub element_width: usize,
}

/// `[0, c0, c0 + c1, ..., sum]`
pub(crate) fn exclusive_prefix(counts: &[usize]) -> Vec<usize> {
    std::iter::once(0)
        .chain(counts.iter().scan(0usize, |acc, &c| {
            *acc += c;
            Some(*acc)
        }))
        .collect()
}

impl CommPlan {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        rank: usize,
        n_ranks: usize,
        tags: PlanCommTags,
        send_counts: Vec<usize>,
        recv_counts: Vec<usize>,
        send_order: Vec<usize>,
        n_retain: usize,
        element_width: usize,
    ) -> Self {
        let send_offsets = exclusive_prefix(&send_counts);
        let recv_offsets = exclusive_prefix(&recv_counts);
        Self {
            rank,
            n_ranks,
            tags,
            send_counts,
            recv_counts,
            send_offsets,
            recv_offsets,
            send_order,
            n_retain,
            element_width,
        }
    }

    /// Rank of the process that built the plan.
    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn n_ranks(&self) -> usize {
        self.n_ranks
    }

    pub fn tags(&self) -> PlanCommTags {
        self.tags
    }

    /// Elements sent to each peer; zero for this process's own rank.
    pub fn send_counts(&self) -> &[usize] {
        &self.send_counts
    }

    /// Elements received from each peer, as learned in the handshake.
    pub fn recv_counts(&self) -> &[usize] {
        &self.recv_counts
    }

    /// Start of each peer's run in the send buffer, plus the start of the
    /// retained run as the last entry.
    pub fn send_offsets(&self) -> &[usize] {
        &self.send_offsets
    }

    /// Start of each peer's run in the receive buffer, plus the start of the
    /// retain slot as the last entry.
    pub fn recv_offsets(&self) -> &[usize] {
        &self.recv_offsets
    }

    /// `send_order[k]` is the local index of the element at position `k` of
    /// the send buffer.
    pub fn send_order(&self) -> &[usize] {
        &self.send_order
    }

    /// Number of locally held elements the plan was built from.
    pub fn n_local(&self) -> usize {
        self.send_order.len()
    }

    /// Elements kept on this process.
    pub fn n_retain(&self) -> usize {
        self.n_retain
    }

    /// Elements handed to the transport (retained elements excluded).
    pub fn total_send(&self) -> usize {
        self.send_offsets[self.n_ranks]
    }

    /// Length of the receive buffer, retain slot included.
    pub fn total_receive(&self) -> usize {
        self.recv_offsets[self.n_ranks] + self.n_retain
    }

    /// Offset of the retain slot in the receive buffer.
    pub fn retain_offset(&self) -> usize {
        self.recv_offsets[self.n_ranks]
    }

    /// Range of the send buffer destined for `peer`.
    pub fn send_range(&self, peer: usize) -> Range<usize> {
        self.send_offsets[peer]..self.send_offsets[peer + 1]
    }

    /// Range of the receive buffer filled by `peer`.
    pub fn recv_range(&self, peer: usize) -> Range<usize> {
        self.recv_offsets[peer]..self.recv_offsets[peer + 1]
    }

    /// Peers this process sends at least one element to, in rank order.
    pub fn send_neighbors(&self) -> impl Iterator<Item = usize> + '_ {
        self.send_counts
            .iter()
            .enumerate()
            .filter(|&(_, &c)| c > 0)
            .map(|(p, _)| p)
    }

    /// Peers this process receives at least one element from, in rank order.
    pub fn recv_neighbors(&self) -> impl Iterator<Item = usize> + '_ {
        self.recv_counts
            .iter()
            .enumerate()
            .filter(|&(_, &c)| c > 0)
            .map(|(p, _)| p)
    }

    /// Default element width (bytes) used by width-less exchange calls.
    pub fn element_width(&self) -> usize {
        self.element_width
    }

    /// Change the payload shape without touching the topology.
    pub fn set_element_width(&mut self, bytes: usize) -> Result<(), CommError> {
        if bytes == 0 {
            return Err(CommError::InvalidElementWidth);
        }
        self.element_width = bytes;
        Ok(())
    }

    /// Permute a buffer in local element order into send order.
    pub fn pack(&self, local: &[u8], width: usize) -> Result<Vec<u8>, CommError> {
        check_len(local.len(), self.n_local(), width)?;
        let mut out = Vec::with_capacity(local.len());
        for &i in &self.send_order {
            out.extend_from_slice(&local[i * width..(i + 1) * width]);
        }
        Ok(out)
    }

    /// Inverse of [`CommPlan::pack`]: restore local element order from a
    /// buffer in send order (e.g. the result of a reverse exchange).
    pub fn unpack(&self, packed: &[u8], width: usize) -> Result<Vec<u8>, CommError> {
        check_len(packed.len(), self.n_local(), width)?;
        let mut out = vec![0u8; packed.len()];
        for (k, &i) in self.send_order.iter().enumerate() {
            out[i * width..(i + 1) * width].copy_from_slice(&packed[k * width..(k + 1) * width]);
        }
        Ok(out)
    }

    /// Typed [`CommPlan::pack`].
    pub fn pack_typed<T: Pod>(&self, local: &[T]) -> Result<Vec<T>, CommError> {
        check_elems(local.len(), self.n_local(), std::mem::size_of::<T>())?;
        Ok(self.send_order.iter().map(|&i| local[i]).collect())
    }

    /// Typed [`CommPlan::unpack`].
    pub fn unpack_typed<T: Pod>(&self, packed: &[T]) -> Result<Vec<T>, CommError> {
        check_elems(packed.len(), self.n_local(), std::mem::size_of::<T>())?;
        let mut out = packed.to_vec();
        for (k, &i) in self.send_order.iter().enumerate() {
            out[i] = packed[k];
        }
        Ok(out)
    }

    /// The reverse plan as a standalone plan.
    ///
    /// Its local elements are this plan's receive buffer (already grouped, so
    /// its send order is the identity) and its forward exchange talks to peers
    /// running [`Exchanger::reverse`](crate::algs::exchange::Exchanger::reverse)
    /// on the original plan, and vice versa. No communication is needed.
    pub fn invert(&self) -> CommPlan {
        CommPlan {
            rank: self.rank,
            n_ranks: self.n_ranks,
            tags: self.tags.swapped(),
            send_counts: self.recv_counts.clone(),
            recv_counts: self.send_counts.clone(),
            send_offsets: self.recv_offsets.clone(),
            recv_offsets: self.send_offsets.clone(),
            send_order: (0..self.total_receive()).collect(),
            n_retain: self.n_retain,
            element_width: self.element_width,
        }
    }

    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            rank: self.rank,
            n_ranks: self.n_ranks,
            tags: self.tags,
            send_counts: self.send_counts.clone(),
            recv_counts: self.recv_counts.clone(),
            total_send: self.total_send(),
            total_receive: self.total_receive(),
            n_retain: self.n_retain,
            element_width: self.element_width,
        }
    }
}

/// Byte length of `n_elems` records of `width` bytes.
///
/// Fails with [`CommError::InvalidElementWidth`] for a zero width or when the
/// length cannot be addressed by any buffer.
pub(crate) fn byte_len(n_elems: usize, width: usize) -> Result<usize, CommError> {
    if width == 0 {
        return Err(CommError::InvalidElementWidth);
    }
    match n_elems.checked_mul(width) {
        Some(len) if len <= isize::MAX as usize => Ok(len),
        _ => Err(CommError::InvalidElementWidth),
    }
}

fn check_len(actual_bytes: usize, n_elems: usize, width: usize) -> Result<(), CommError> {
    let expected = byte_len(n_elems, width)?;
    if actual_bytes != expected {
        return Err(CommError::BufferSizeMismatch {
            expected,
            actual: actual_bytes,
        });
    }
    Ok(())
}

fn check_elems(actual: usize, expected: usize, width: usize) -> Result<(), CommError> {
    if width == 0 {
        return Err(CommError::InvalidElementWidth);
    }
    if actual != expected {
        return Err(CommError::BufferSizeMismatch {
            expected: expected.saturating_mul(width),
            actual: actual.saturating_mul(width),
        });
    }
    Ok(())
}

impl DebugInvariants for CommPlan {
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), "CommPlan");
    }

    fn validate_invariants(&self) -> Result<(), CommError> {
        let n = self.n_ranks;
        if self.rank >= n {
            return Err(CommError::InvalidGroup {
                rank: self.rank,
                size: n,
            });
        }
        if self.send_counts.len() != n || self.recv_counts.len() != n {
            return Err(CommError::InvariantViolation(format!(
                "count vectors have lengths {}/{} for a group of {n}",
                self.send_counts.len(),
                self.recv_counts.len()
            )));
        }
        if self.send_counts[self.rank] != 0 || self.recv_counts[self.rank] != 0 {
            return Err(CommError::InvariantViolation(
                "self-traffic must go through the retain slot".into(),
            ));
        }
        if self.send_offsets != exclusive_prefix(&self.send_counts)
            || self.recv_offsets != exclusive_prefix(&self.recv_counts)
        {
            return Err(CommError::InvariantViolation(
                "offsets are not the exclusive prefix sums of the counts".into(),
            ));
        }
        if self.send_order.len() != self.total_send() + self.n_retain {
            return Err(CommError::InvariantViolation(format!(
                "send order has {} entries, expected {} sent + {} retained",
                self.send_order.len(),
                self.total_send(),
                self.n_retain
            )));
        }
        let mut seen = vec![false; self.send_order.len()];
        for &i in &self.send_order {
            match seen.get_mut(i) {
                Some(slot) if !*slot => *slot = true,
                _ => {
                    return Err(CommError::InvariantViolation(format!(
                        "send order is not a permutation (index {i})"
                    )));
                }
            }
        }
        if self.element_width == 0 {
            return Err(CommError::InvalidElementWidth);
        }
        Ok(())
    }
}
