//! Trellis Core
//!
//! This crate provides a fine-grained reactive cell engine. It implements:
//!
//! - Plain and computed cells with automatic dependency tracking
//! - Batched, level-ordered propagation (each cell recomputes at most once
//!   per pass, after all of its masters)
//! - Cancellation of writes that are undone before they are released
//! - An error channel that carries formula failures to dependent cells
//! - A circuit breaker for circular dependencies
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Cells, the runtime and its release scheduler, events
//! - `graph`: Dependency graph bookkeeping and the release plan
//! - `error`: Error types
//! - `config`: Runtime configuration
//!
//! # Example
//!
//! ```rust
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! use trellis_core::{Cell, ChangeEvent, Runtime};
//!
//! let runtime = Runtime::new();
//! let a = Cell::new_in(&runtime, 1);
//! let b = Cell::new_in(&runtime, 2);
//! let c = {
//!     let (a, b) = (a.clone(), b.clone());
//!     Cell::computed_in(&runtime, move || a.read() + b.read())
//! };
//!
//! let seen = Rc::new(RefCell::new(Vec::new()));
//! let log = seen.clone();
//! c.on_change(Rc::new(move |event: &ChangeEvent<i32>| {
//!     log.borrow_mut().push((event.old_value, event.value));
//! }));
//!
//! // Both writes are released together at the end of the turn.
//! a.write(2).unwrap();
//! b.write(5).unwrap();
//! runtime.end_turn();
//!
//! assert_eq!(*seen.borrow(), vec![(3, 7)]);
//! ```
//!
//! # Failed Cells
//!
//! A computed cell whose formula has never succeeded has no value.
//! [`Cell::read`] panics on such a cell when called outside a formula;
//! inside a formula the failure becomes that formula's error. Code that
//! reads cells which may fail should use [`Cell::try_read`]:
//!
//! ```rust
//! use trellis_core::{Cell, Runtime};
//!
//! let runtime = Runtime::new();
//! let broken = Cell::<i32>::try_computed_in(&runtime, || Err("no input"));
//! assert!(broken.try_read().is_err());
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod reactive;

pub use config::RuntimeConfig;
pub use error::{BoxError, CellError, FormulaPanic};
pub use graph::{CellId, GraphSnapshot, NodeKind, NodeSnapshot};
pub use reactive::{
    Cell, CellBuilder, ChangeEvent, ChangeSource, Emitter, ErrorEvent, Listener, NextTick,
    Notification, Runtime, TokioTick, TurnQueue,
};
