//! Reactive Cells
//!
//! This module implements the cell engine: plain and computed cells, the
//! runtime that schedules their propagation, and the events they emit.
//!
//! # Concepts
//!
//! ## Cells
//!
//! A plain cell holds a value written from outside. A computed cell holds a
//! formula; every cell the formula reads becomes one of its *masters*, and
//! the computed cell becomes a *slave* of each of them.
//!
//! ## Release passes
//!
//! Writes do not propagate immediately. They are collected and released in
//! one pass, which processes cells in ascending level order so a cell is
//! only recomputed after all of its masters have settled. A cell that is
//! invalidated by several masters in one pass is recomputed once.
//!
//! ## Activation
//!
//! Computed cells that nothing observes stay lazy: they evaluate on read
//! and are not registered with their masters. Observing one, through a
//! change listener or by being read from an active formula, activates it
//! and, transitively, its computed masters.
//!
//! # Implementation Notes
//!
//! Dependencies are tracked with a per-runtime evaluation stack. When a
//! cell is read we check if a formula is being evaluated and, if so, record
//! the read cell as a master of that formula's cell.

mod cell;
mod context;
mod event;
mod listen;
mod runtime;
mod tick;

pub use cell::{same_value, Cell, CellBuilder, Equality, Formula, SubscribeListener};
pub use event::{ChangeEvent, ErrorEvent, Notification};
pub use listen::{ChangeSource, Emitter, Listener};
pub use runtime::Runtime;
pub use tick::{Callback, NextTick, TokioTick, TurnQueue};
