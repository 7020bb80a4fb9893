//! Deferred flush primitives.
//!
//! A write never propagates synchronously: it asks the runtime's
//! [`NextTick`] to run one release pass "soon". The runtime coalesces these
//! requests so at most one callback is outstanding per pass.
//!
//! - [`TurnQueue`] keeps callbacks until the host ends its turn
//!   (see [`Runtime::end_turn`](super::Runtime::end_turn)).
//! - [`TokioTick`] hands the callback to the current `tokio` `LocalSet`.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;

/// A one-shot deferred callback.
pub type Callback = Box<dyn FnOnce()>;

/// Runs callbacks after the current turn.
pub trait NextTick {
    /// Schedule `callback` to run once, after the current turn.
    fn schedule(&self, callback: Callback);
}

/// Callbacks queued until [`run`](TurnQueue::run) is called.
#[derive(Default)]
pub struct TurnQueue {
    pending: RefCell<VecDeque<Callback>>,
}

impl TurnQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every queued callback, including ones queued while running.
    ///
    /// Returns the number of callbacks run.
    pub fn run(&self) -> usize {
        let mut ran = 0;
        loop {
            // The borrow must end before the callback runs: it may schedule.
            let next = self.pending.borrow_mut().pop_front();
            let Some(callback) = next else {
                break;
            };
            callback();
            ran += 1;
        }
        ran
    }

    pub fn len(&self) -> usize {
        self.pending.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.borrow().is_empty()
    }
}

impl NextTick for TurnQueue {
    fn schedule(&self, callback: Callback) {
        self.pending.borrow_mut().push_back(callback);
    }
}

impl fmt::Debug for TurnQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TurnQueue")
            .field("pending", &self.len())
            .finish()
    }
}

/// Defers callbacks to a `tokio` local task.
///
/// Must be used from within a `tokio::task::LocalSet`; cells are not
/// `Send`, so the flush stays on the thread that owns them.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioTick;

impl NextTick for TokioTick {
    fn schedule(&self, callback: Callback) {
        tokio::task::spawn_local(async move {
            callback();
        });
    }
}
