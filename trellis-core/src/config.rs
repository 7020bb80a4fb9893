//! Runtime configuration.
//!
//! Configuration is plain data so hosts can load it with `serde` from
//! whatever format they already use.

use serde::{Deserialize, Serialize};

/// Recalculations of one cell allowed within a single release pass before
/// the pass is declared circular.
pub const DEFAULT_CIRCULARITY_LIMIT: u32 = 10;

/// Tunables for a [`Runtime`](crate::Runtime).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Consecutive same-pass recalculations of one cell that trip the
    /// circuit breaker.
    pub circularity_limit: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            circularity_limit: DEFAULT_CIRCULARITY_LIMIT,
        }
    }
}
