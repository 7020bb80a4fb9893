//! Error types.
//!
//! Two channels carry failures. Validation and immutable-write violations
//! are returned from the call that caused them. Formula failures and
//! circular dependencies happen inside a release pass; they are wrapped in
//! an [`ErrorEvent`](crate::reactive::ErrorEvent) and delivered to listeners.

use std::error::Error as StdError;
use std::sync::Arc;

use thiserror::Error;

use crate::graph::CellId;

/// Error type returned by user hooks (formulas, validators).
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Shared form of [`BoxError`], cheap to clone into events.
pub type SharedError = Arc<dyn StdError + Send + Sync + 'static>;

/// Errors raised by cells.
#[derive(Debug, Clone, Error)]
pub enum CellError {
    /// The validation hook rejected a value.
    #[error("validation failed: {0}")]
    Validation(SharedError),

    /// A computed cell without an inverse writer was written to.
    #[error("cannot write to read-only {cell}")]
    ImmutableWrite { cell: CellId },

    /// The same-pass re-entry breaker tripped, or a formula read a cell
    /// whose own first evaluation was still on the stack.
    #[error("circular dependency detected at {cell}")]
    CircularDependency { cell: CellId },

    /// A formula (or the validation of its result) failed.
    #[error("formula of {cell} failed: {reason}")]
    Formula { cell: CellId, reason: SharedError },

    /// A computed cell was read before it ever produced a value.
    #[error("{cell} has no value yet")]
    Unresolved { cell: CellId },
}

impl CellError {
    pub(crate) fn validation(err: BoxError) -> Self {
        Self::Validation(Arc::from(err))
    }

    pub(crate) fn formula(cell: CellId, err: BoxError) -> Self {
        Self::Formula {
            cell,
            reason: Arc::from(err),
        }
    }

    /// Whether this error came from the circuit breaker.
    pub fn is_circular(&self) -> bool {
        matches!(self, Self::CircularDependency { .. })
    }
}

/// Error carried by a formula that panicked.
#[derive(Debug, Error)]
#[error("formula panicked: {0}")]
pub struct FormulaPanic(pub String);
