//! Stage 1 of plan construction: the all-to-all count handshake.
//!
//! No process knows in advance how many elements it will receive, or from
//! whom, so every process sends its full send-count vector to every peer and
//! receives every peer's vector in return. Zero-volume peers take part too.
//! Every send/receive handle is drained before returning, even if an error
//! occurs.

use crate::algs::communicator::{CommTag, Communicator, Wait};
use crate::algs::wire::{
    KIND_SEND_COUNTS, WIRE_VERSION, counts_message_len, decode_counts, encode_counts, expect_exact_len,
};
use crate::comm_error::CommError;

/// Exchange `send_counts` (one entry per rank) with every peer and return
/// `recv_counts`, where `recv_counts[p]` is what peer `p` declared it sends to
/// this process. The own-rank entry is always zero.
pub fn exchange_send_counts<C>(
    comm: &C,
    tag: CommTag,
    send_counts: &[usize],
) -> Result<Vec<usize>, CommError>
where
    C: Communicator,
{
    let me = comm.rank();
    let n = comm.size();
    if send_counts.len() != n {
        return Err(CommError::InvariantViolation(format!(
            "send-count vector has {} entries for a group of {n}",
            send_counts.len()
        )));
    }
    if comm.is_no_comm() {
        return Ok(vec![0; n]);
    }
    let msg_len = counts_message_len(n);

    // 1) post all receives
    let mut pending_recvs = Vec::with_capacity(n.saturating_sub(1));
    for peer in (0..n).filter(|&p| p != me) {
        pending_recvs.push((peer, comm.irecv(peer, tag.as_u16(), msg_len)));
    }

    // 2) post all sends; the same vector goes to everyone
    let msg = encode_counts(n, send_counts);
    let mut pending_sends = Vec::with_capacity(n.saturating_sub(1));
    for peer in (0..n).filter(|&p| p != me) {
        pending_sends.push(comm.isend(peer, tag.as_u16(), &msg));
    }

    // 3) wait for all recvs, collect counts (but do not early-return)
    let mut recv_counts = vec![0usize; n];
    let mut maybe_err = None;
    for (peer, h) in pending_recvs {
        let got = h.wait();
        if maybe_err.is_some() {
            continue; // already have an error; just drain
        }
        match got {
            Some(raw) => match count_from_peer(peer, me, n, &raw) {
                Ok(c) => recv_counts[peer] = c,
                Err(e) => maybe_err = Some(e),
            },
            None => {
                maybe_err = Some(CommError::TransportFailure {
                    neighbor: peer,
                    reason: format!("failed to receive send counts from rank {peer}"),
                });
            }
        }
    }

    // 4) always drain all send handles before returning
    for send in pending_sends {
        let _ = send.wait();
    }

    match maybe_err {
        Some(err) => Err(err),
        None => Ok(recv_counts),
    }
}

/// Validate one peer's count message and pick out the entry addressed to `me`.
fn count_from_peer(peer: usize, me: usize, n: usize, raw: &[u8]) -> Result<usize, CommError> {
    let (hdr, counts) = decode_counts(raw).map_err(|reason| CommError::TransportFailure {
        neighbor: peer,
        reason,
    })?;
    if hdr.version() != WIRE_VERSION {
        return Err(CommError::GroupMismatch {
            neighbor: peer,
            reason: format!(
                "wire version {} does not match local version {WIRE_VERSION}",
                hdr.version()
            ),
        });
    }
    if hdr.kind() != KIND_SEND_COUNTS {
        return Err(CommError::GroupMismatch {
            neighbor: peer,
            reason: format!(
                "message kind {} on the count channel; is the tag shared with another exchange?",
                hdr.kind()
            ),
        });
    }
    if hdr.n_ranks() != n {
        return Err(CommError::GroupMismatch {
            neighbor: peer,
            reason: format!(
                "peer sees a group of {}, this process sees {n}",
                hdr.n_ranks()
            ),
        });
    }
    expect_exact_len(raw.len(), counts_message_len(n)).map_err(|reason| {
        CommError::TransportFailure {
            neighbor: peer,
            reason: format!("count message: {reason}"),
        }
    })?;
    Ok(counts[me])
}
