#![cfg_attr(docsrs, feature(doc_cfg))]
//! # unstructured-comm
//!
//! unstructured-comm redistributes per-element data across a fixed group of
//! cooperating processes when every process knows only where *its own* elements
//! must go. Each process declares "send element k to rank p" for an arbitrary,
//! data-dependent set of pairs; a collective handshake then tells every process
//! how much it will receive and from whom.
//!
//! The result of that handshake, a [`CommPlan`], is the expensive part and is
//! reused for any number of payload exchanges, each with its own element width:
//! move `f64` coordinates with one call and `u32` ids with the next.
//!
//! ## Features
//! - Plan construction from a destination list with a `Retain` sentinel for
//!   elements that stay put (see [`algs::plan`])
//! - Forward and reverse exchanges of raw fixed-width records, plus typed
//!   helpers for `bytemuck::Pod` payloads (see [`algs::exchange`])
//! - Pluggable communication backends: serial ([`NoComm`]), in-process threads
//!   ([`RayonComm`]) and MPI (`MpiComm`, feature `mpi-support`)
//! - Per-call traffic counters and `log`-based diagnostics
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! unstructured-comm = "0.3"
//! # Optional features:
//! # features = ["mpi-support", "check-invariants"]
//! ```
//!
//! ```
//! use unstructured_comm::prelude::*;
//!
//! // Two in-process ranks; each keeps its first element and sends the second
//! // one to the other rank.
//! let out = RayonComm::run_world(2, |comm| {
//!     let other = 1 - comm.rank();
//!     let plan = build(&comm, CommTag::new(0x40), &[Destination::Retain, Destination::Rank(other)])
//!         .unwrap();
//!     let local = [comm.rank() as f64, 10.0 + comm.rank() as f64];
//!     let mut ex = Exchanger::new(&comm);
//!     ex.forward_typed(&plan, &plan.pack_typed(&local).unwrap()).unwrap()
//! })
//! .unwrap();
//! // Received data first (from the peer), then the retained element.
//! assert_eq!(out[0], vec![11.0, 0.0]);
//! assert_eq!(out[1], vec![10.0, 1.0]);
//! ```
//!
//! ## Tags
//!
//! A plan occupies three consecutive tags starting at the one it was built
//! with. Plans whose exchanges may overlap in time must use base tags at least
//! [`PlanCommTags::SPAN`](algs::communicator::PlanCommTags::SPAN) apart; the
//! crate never allocates tags on its own. Tags stay within the range every MPI
//! implementation accepts, so base tags above
//! [`PlanCommTags::MAX_BASE`](algs::communicator::PlanCommTags::MAX_BASE) are
//! rejected.

pub mod algs;
pub mod comm_error;
pub mod config;
pub mod debug_invariants;

pub use algs::communicator::{NoComm, RayonComm};
pub use algs::plan::CommPlan;
pub use debug_invariants::DebugInvariants;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::algs::communicator::{CommTag, Communicator, NoComm, PlanCommTags, RayonComm, Wait};
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::algs::exchange::{ExchangeStats, Exchanger};
    pub use crate::algs::plan::{CommPlan, Destination, PlanBuilder, PlanSummary, build, build_from_raw};
    pub use crate::comm_error::CommError;
    pub use crate::config::ExchangeConfig;
    pub use crate::debug_invariants::DebugInvariants;
}
