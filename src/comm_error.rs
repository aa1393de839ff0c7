//! CommError: unified error type for unstructured-comm public APIs
//!
//! Every fallible operation in this crate (plan construction, exchanges, element
//! width changes) reports failures through [`CommError`]. Errors are always
//! returned to the caller of the failing operation; nothing is retried or
//! swallowed internally.

use thiserror::Error;

/// Unified error type for plan construction and data exchange.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommError {
    /// A destination entry is neither a rank in `[0, n_ranks)` nor the retain sentinel.
    #[error(
        "invalid destination `{value}` at index {index}: expected a rank in [0, {n_ranks}) or the retain sentinel"
    )]
    InvalidDestination {
        index: usize,
        value: i64,
        n_ranks: usize,
    },
    /// A plan's base tag leaves no room for its three channels.
    #[error("base tag {base} out of range: plans need base tags in [0, {max}]")]
    InvalidTag { base: u16, max: u16 },
    /// A payload buffer does not have the byte length the plan expects.
    #[error("buffer size mismatch: expected {expected} bytes, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },
    /// Element widths are byte counts and must be positive.
    #[error("element width must be a positive number of bytes")]
    InvalidElementWidth,
    /// The transport failed to deliver (or delivered a malformed) message.
    #[error("transport failure with rank {neighbor}: {reason}")]
    TransportFailure { neighbor: usize, reason: String },
    /// Peers disagree about the group or the handshake protocol.
    #[error("group mismatch with rank {neighbor}: {reason}")]
    GroupMismatch { neighbor: usize, reason: String },
    /// The communicator reports a rank outside its own group.
    #[error("invalid group: rank {rank} in a group of size {size}")]
    InvalidGroup { rank: usize, size: usize },
    /// A plan failed its structural self-check.
    #[error("plan invariant violated: {0}")]
    InvariantViolation(String),
    /// An in-process group could not be started.
    #[error("failed to set up in-process group: {0}")]
    GroupSetup(String),
}
