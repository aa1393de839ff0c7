//! Stage 2: move payload along a built [`CommPlan`].
//!
//! An [`Exchanger`] treats payloads as raw fixed-width records: the same plan
//! carries `f64`s in one call and `u32`s in the next, because the plan counts
//! elements and the width only enters when bytes are sliced.
//!
//! Each call posts every receive before issuing any send, copies retained
//! elements locally without using the transport, then waits on every handle.
//! Errors are collected but never cut the drain short.

use crate::algs::communicator::{CommTag, Communicator, Wait};
use crate::algs::plan::{CommPlan, byte_len};
use crate::algs::wire::{cast_slice, cast_slice_mut, expect_exact_len};
use crate::comm_error::CommError;
use bytemuck::Pod;
use serde::{Deserialize, Serialize};
use std::ops::AddAssign;

/// Per-call traffic counters.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeStats {
    pub messages_sent: usize,
    pub messages_received: usize,
    pub bytes_sent: usize,
    pub bytes_received: usize,
    /// Bytes copied locally for retained elements.
    pub bytes_retained: usize,
}

impl AddAssign for ExchangeStats {
    fn add_assign(&mut self, rhs: Self) {
        self.messages_sent += rhs.messages_sent;
        self.messages_received += rhs.messages_received;
        self.bytes_sent += rhs.bytes_sent;
        self.bytes_received += rhs.bytes_received;
        self.bytes_retained += rhs.bytes_retained;
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Direction {
    Forward,
    Reverse,
}

/// One direction of a plan, seen from the sending side.
struct Layout<'p> {
    out_counts: &'p [usize],
    out_offsets: &'p [usize],
    in_counts: &'p [usize],
    in_offsets: &'p [usize],
    tag: CommTag,
}

impl<'p> Layout<'p> {
    fn of(plan: &'p CommPlan, dir: Direction) -> Self {
        match dir {
            Direction::Forward => Layout {
                out_counts: plan.send_counts(),
                out_offsets: plan.send_offsets(),
                in_counts: plan.recv_counts(),
                in_offsets: plan.recv_offsets(),
                tag: plan.tags().forward,
            },
            Direction::Reverse => Layout {
                out_counts: plan.recv_counts(),
                out_offsets: plan.recv_offsets(),
                in_counts: plan.send_counts(),
                in_offsets: plan.send_offsets(),
                tag: plan.tags().reverse,
            },
        }
    }
}

/// Runs exchanges over one communicator and keeps traffic counters.
///
/// Calls take `&mut self`, so one exchanger never has two exchanges in flight.
#[derive(Debug)]
pub struct Exchanger<'a, C> {
    comm: &'a C,
    last: ExchangeStats,
    total: ExchangeStats,
}

impl<'a, C> Exchanger<'a, C>
where
    C: Communicator,
{
    pub fn new(comm: &'a C) -> Self {
        Self {
            comm,
            last: ExchangeStats::default(),
            total: ExchangeStats::default(),
        }
    }

    /// Counters of the most recent successful exchange.
    pub fn last_stats(&self) -> ExchangeStats {
        self.last
    }

    /// Counters accumulated over all successful exchanges.
    pub fn total_stats(&self) -> ExchangeStats {
        self.total
    }

    /// Forward exchange at the plan's configured element width.
    ///
    /// `send` holds `plan.n_local()` elements in send order; the result holds
    /// `plan.total_receive()` elements in receive order.
    pub fn forward(&mut self, plan: &CommPlan, send: &[u8]) -> Result<Vec<u8>, CommError> {
        self.forward_with_width(plan, send, plan.element_width())
    }

    pub fn forward_with_width(
        &mut self,
        plan: &CommPlan,
        send: &[u8],
        width: usize,
    ) -> Result<Vec<u8>, CommError> {
        self.run(plan, Direction::Forward, send, width)
    }

    /// Reverse exchange at the plan's configured element width.
    ///
    /// `send` holds `plan.total_receive()` elements in receive order; each
    /// element goes back to the rank it came from and lands at the send-order
    /// position it was sent from. Retained elements go back to their send-order
    /// positions as well, so `reverse(forward(x)) == x` element for element.
    pub fn reverse(&mut self, plan: &CommPlan, send: &[u8]) -> Result<Vec<u8>, CommError> {
        self.reverse_with_width(plan, send, plan.element_width())
    }

    pub fn reverse_with_width(
        &mut self,
        plan: &CommPlan,
        send: &[u8],
        width: usize,
    ) -> Result<Vec<u8>, CommError> {
        self.run(plan, Direction::Reverse, send, width)
    }

    /// Forward exchange of `T`s; the element width is `size_of::<T>()`.
    pub fn forward_typed<T: Pod>(
        &mut self,
        plan: &CommPlan,
        send: &[T],
    ) -> Result<Vec<T>, CommError> {
        let width = pod_width::<T>()?;
        let raw = self.forward_with_width(plan, cast_slice(send), width)?;
        Ok(collect_pod(&raw))
    }

    /// Reverse exchange of `T`s; the element width is `size_of::<T>()`.
    pub fn reverse_typed<T: Pod>(
        &mut self,
        plan: &CommPlan,
        send: &[T],
    ) -> Result<Vec<T>, CommError> {
        let width = pod_width::<T>()?;
        let raw = self.reverse_with_width(plan, cast_slice(send), width)?;
        Ok(collect_pod(&raw))
    }

    fn run(
        &mut self,
        plan: &CommPlan,
        dir: Direction,
        send: &[u8],
        width: usize,
    ) -> Result<Vec<u8>, CommError> {
        let comm = self.comm;
        if comm.rank() != plan.rank() || comm.size() != plan.n_ranks() {
            return Err(CommError::GroupMismatch {
                neighbor: comm.rank(),
                reason: format!(
                    "plan was built for rank {} of {}, communicator is rank {} of {}",
                    plan.rank(),
                    plan.n_ranks(),
                    comm.rank(),
                    comm.size()
                ),
            });
        }
        let n = plan.n_ranks();
        let n_retain = plan.n_retain();
        let layout = Layout::of(plan, dir);
        let tag = layout.tag.as_u16();

        // Every slice below lies within one of these two lengths.
        let expected = byte_len(layout.out_offsets[n] + n_retain, width)?;
        let recv_len = byte_len(layout.in_offsets[n] + n_retain, width)?;
        if send.len() != expected {
            return Err(CommError::BufferSizeMismatch {
                expected,
                actual: send.len(),
            });
        }
        let mut recv = vec![0u8; recv_len];
        let mut stats = ExchangeStats::default();

        // 1) post all receives before any send
        let mut pending_recvs = Vec::new();
        for (peer, &count) in layout.in_counts.iter().enumerate() {
            if count > 0 {
                pending_recvs.push((peer, comm.irecv(peer, tag, count * width)));
            }
        }

        // 2) one message per peer with a nonzero count
        let mut pending_sends = Vec::new();
        for (peer, &count) in layout.out_counts.iter().enumerate() {
            if count == 0 {
                continue;
            }
            let lo = layout.out_offsets[peer] * width;
            let hi = lo + count * width;
            log::trace!("[rank {}] {dir:?} send {} B to {peer} on tag {tag}", plan.rank(), hi - lo);
            pending_sends.push(comm.isend(peer, tag, &send[lo..hi]));
            stats.messages_sent += 1;
            stats.bytes_sent += hi - lo;
        }

        // 3) retained elements bypass the transport
        let keep_src = layout.out_offsets[n] * width;
        let keep_dst = layout.in_offsets[n] * width;
        recv[keep_dst..].copy_from_slice(&send[keep_src..]);
        stats.bytes_retained = n_retain * width;

        // 4) wait for all recvs (collect the first error, keep draining)
        let mut maybe_err = None;
        for (peer, h) in pending_recvs {
            let got = h.wait();
            if maybe_err.is_some() {
                continue;
            }
            let lo = layout.in_offsets[peer] * width;
            let hi = lo + layout.in_counts[peer] * width;
            match got {
                Some(raw) => match expect_exact_len(raw.len(), hi - lo) {
                    Ok(()) => {
                        recv[lo..hi].copy_from_slice(&raw);
                        stats.messages_received += 1;
                        stats.bytes_received += raw.len();
                    }
                    Err(reason) => {
                        maybe_err = Some(CommError::TransportFailure {
                            neighbor: peer,
                            reason: format!(
                                "payload from rank {peer}: {reason} (do all ranks use the same element width?)"
                            ),
                        });
                    }
                },
                None => {
                    maybe_err = Some(CommError::TransportFailure {
                        neighbor: peer,
                        reason: format!("receive from rank {peer} failed"),
                    });
                }
            }
        }

        // 5) always drain sends
        for s in pending_sends {
            let _ = s.wait();
        }

        if let Some(e) = maybe_err {
            log::debug!("[rank {}] {dir:?} exchange failed: {e}", plan.rank());
            return Err(e);
        }
        log::debug!(
            "[rank {}] {dir:?} exchange on tag {tag}: {} msgs / {} B out, {} msgs / {} B in, {} B retained",
            plan.rank(),
            stats.messages_sent,
            stats.bytes_sent,
            stats.messages_received,
            stats.bytes_received,
            stats.bytes_retained
        );
        self.last = stats;
        self.total += stats;
        Ok(recv)
    }
}

// Zero-sized types cannot be cast to bytes, so reject them up front.
fn pod_width<T: Pod>() -> Result<usize, CommError> {
    match std::mem::size_of::<T>() {
        0 => Err(CommError::InvalidElementWidth),
        w => Ok(w),
    }
}

// Copy out: a `Vec<u8>` carries no alignment guarantee for `T`.
fn collect_pod<T: Pod>(raw: &[u8]) -> Vec<T> {
    let mut out = vec![T::zeroed(); raw.len() / std::mem::size_of::<T>()];
    cast_slice_mut(&mut out).copy_from_slice(raw);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::algs::plan::{Destination, build};

    #[test]
    fn serial_forward_is_local_copy() {
        let plan = build(&NoComm, CommTag::new(3), &[Destination::Retain; 3]).unwrap();
        let mut ex = Exchanger::new(&NoComm);
        let out = ex.forward_typed(&plan, &[1.5f64, 2.5, 3.5]).unwrap();
        assert_eq!(out, vec![1.5, 2.5, 3.5]);
        let stats = ex.last_stats();
        assert_eq!(stats.messages_sent, 0);
        assert_eq!(stats.bytes_retained, 24);
    }

    #[test]
    fn size_mismatch_is_reported_before_any_transfer() {
        let plan = build(&NoComm, CommTag::new(3), &[Destination::Retain; 2]).unwrap();
        let mut ex = Exchanger::new(&NoComm);
        let err = ex.forward_with_width(&plan, &[0u8; 12], 8).unwrap_err();
        assert_eq!(
            err,
            CommError::BufferSizeMismatch {
                expected: 16,
                actual: 12
            }
        );
        assert_eq!(ex.total_stats(), ExchangeStats::default());
    }

    #[test]
    fn oversized_width_is_rejected_without_panicking() {
        let plan = build(&NoComm, CommTag::new(3), &[Destination::Retain; 2]).unwrap();
        let mut ex = Exchanger::new(&NoComm);
        let huge = usize::MAX / 2 + 2;
        assert_eq!(
            ex.forward_with_width(&plan, &[0u8; 4], huge).unwrap_err(),
            CommError::InvalidElementWidth
        );
        assert_eq!(
            ex.reverse_with_width(&plan, &[0u8; 4], huge).unwrap_err(),
            CommError::InvalidElementWidth
        );
        assert_eq!(ex.total_stats(), ExchangeStats::default());
    }

    #[test]
    fn zero_width_rejected() {
        let plan = build(&NoComm, CommTag::new(3), &[]).unwrap();
        let mut ex = Exchanger::new(&NoComm);
        assert_eq!(
            ex.forward_with_width(&plan, &[], 0).unwrap_err(),
            CommError::InvalidElementWidth
        );
        assert_eq!(
            ex.reverse_typed::<()>(&plan, &[]).unwrap_err(),
            CommError::InvalidElementWidth
        );
    }

    #[test]
    fn stats_accumulate() {
        let mut a = ExchangeStats {
            messages_sent: 1,
            bytes_sent: 8,
            ..Default::default()
        };
        a += ExchangeStats {
            messages_sent: 2,
            bytes_received: 4,
            ..Default::default()
        };
        assert_eq!(a.messages_sent, 3);
        assert_eq!(a.bytes_sent, 8);
        assert_eq!(a.bytes_received, 4);
    }
}
