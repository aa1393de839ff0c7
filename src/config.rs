//! Runtime configuration for plan construction and exchanges.
//!
//! [`ExchangeConfig`] is deserializable so callers can embed it in their own
//! configuration files; missing fields fall back to [`ExchangeConfig::default`].

use serde::{Deserialize, Serialize};

/// Default element width in bytes (one `f64` per element).
pub const DEFAULT_ELEMENT_WIDTH: usize = 8;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    /// Element width a freshly built plan starts with.
    pub element_width: usize,
    /// Run [`DebugInvariants::validate_invariants`](crate::DebugInvariants) on
    /// every plan right after it is built.
    pub check_invariants: bool,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            element_width: DEFAULT_ELEMENT_WIDTH,
            check_invariants: cfg!(any(debug_assertions, feature = "check-invariants")),
        }
    }
}

impl ExchangeConfig {
    pub fn with_element_width(mut self, bytes: usize) -> Self {
        self.element_width = bytes;
        self
    }

    pub fn with_check_invariants(mut self, on: bool) -> Self {
        self.check_invariants = on;
        self
    }
}
