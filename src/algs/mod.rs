//! Re-export public algorithms.

pub mod communicator;
pub mod exchange;
pub mod plan;
pub mod wire;

pub use exchange::{ExchangeStats, Exchanger};
pub use plan::{CommPlan, Destination, PlanBuilder, build, build_from_raw};
