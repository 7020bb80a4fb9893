//! Events delivered to cell listeners.

use std::cell::Cell as Flag;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::CellError;
use crate::graph::CellId;

/// A committed change of a cell's value.
///
/// When several writes to one cell happen within a turn they are reported
/// once: `old_value` is the value before the first write and `value` the
/// value after the last.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent<T> {
    pub target: CellId,
    pub old_value: T,
    pub value: T,
}

/// A formula or circularity failure travelling through the graph.
///
/// Clones share identity and the propagation flag, so a listener stopping
/// propagation on its copy stops it for the whole delivery.
#[derive(Debug, Clone)]
pub struct ErrorEvent {
    inner: Rc<ErrorEventInner>,
}

#[derive(Debug)]
struct ErrorEventInner {
    id: u64,
    target: CellId,
    error: CellError,
    propagation_stopped: Flag<bool>,
}

impl ErrorEvent {
    pub(crate) fn new(target: CellId, error: CellError) -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self {
            inner: Rc::new(ErrorEventInner {
                id: COUNTER.fetch_add(1, Ordering::Relaxed),
                target,
                error,
                propagation_stopped: Flag::new(false),
            }),
        }
    }

    /// Identity of this event, shared by its clones.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// The cell whose evaluation failed.
    pub fn target(&self) -> CellId {
        self.inner.target
    }

    pub fn error(&self) -> &CellError {
        &self.inner.error
    }

    /// Keep the event from reaching further dependents.
    pub fn stop_propagation(&self) {
        self.inner.propagation_stopped.set(true);
    }

    pub fn is_propagation_stopped(&self) -> bool {
        self.inner.propagation_stopped.get()
    }
}

impl PartialEq for ErrorEvent {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

/// What a [`subscribe`](crate::Cell::subscribe) listener receives.
#[derive(Debug)]
pub enum Notification<'a, T> {
    Change(&'a ChangeEvent<T>),
    Error(&'a ErrorEvent),
}

impl<'a, T> Notification<'a, T> {
    /// The error, if this is an error notification.
    pub fn error(&self) -> Option<&'a CellError> {
        match self {
            Notification::Change(_) => None,
            Notification::Error(event) => Some(event.error()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_identity_and_propagation() {
        let cell = CellId::new();
        let event = ErrorEvent::new(cell, CellError::CircularDependency { cell });
        let copy = event.clone();

        assert_eq!(event, copy);
        assert_eq!(copy.target(), cell);

        copy.stop_propagation();
        assert!(event.is_propagation_stopped());
    }

    #[test]
    fn distinct_events_differ() {
        let cell = CellId::new();
        let first = ErrorEvent::new(cell, CellError::Unresolved { cell });
        let second = ErrorEvent::new(cell, CellError::Unresolved { cell });
        assert_ne!(first, second);
        assert_ne!(first.id(), second.id());
    }
}
