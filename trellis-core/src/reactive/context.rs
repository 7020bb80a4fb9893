//! Evaluation Context
//!
//! The dependency tracker. While a computed cell's formula runs, every cell
//! it reads is recorded as a candidate master of that cell, and the cell's
//! level is raised above the level of each master.
//!
//! # Implementation
//!
//! Each runtime keeps a stack of frames. Evaluating a formula pushes a
//! frame; reads append to the top frame only, so a lazy cell evaluated from
//! inside another formula collects its own masters. An untracked section
//! pushes a frame without a cell, which swallows reads.
//!
//! Frames are popped by a guard, so the stack stays consistent even when a
//! formula unwinds.

use std::cell::RefCell;

use crate::graph::{CellId, Masters};

/// One formula evaluation in progress.
#[derive(Debug, Default)]
pub struct Frame {
    /// The cell being evaluated, `None` for an untracked section.
    pub cell: Option<CellId>,
    /// Cells read so far, deduplicated, in read order.
    pub masters: Masters,
    /// 1 + the highest level among `masters`, 0 without masters.
    pub level: usize,
}

/// Stack of evaluations in progress.
#[derive(Debug, Default)]
pub struct EvaluationContext {
    stack: RefCell<Vec<Frame>>,
}

impl EvaluationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start evaluating `cell`.
    ///
    /// The frame is popped when the returned guard is dropped or finished.
    pub fn enter(&self, cell: CellId) -> EvaluationGuard<'_> {
        self.push(Frame {
            cell: Some(cell),
            ..Frame::default()
        })
    }

    /// Start a section whose reads are not recorded.
    pub fn untracked(&self) -> EvaluationGuard<'_> {
        self.push(Frame::default())
    }

    fn push(&self, frame: Frame) -> EvaluationGuard<'_> {
        let mut stack = self.stack.borrow_mut();
        stack.push(frame);
        EvaluationGuard {
            context: self,
            depth: stack.len(),
            done: false,
        }
    }

    /// Whether a formula is running, even if an untracked section sits on
    /// top of it.
    pub fn in_evaluation(&self) -> bool {
        self.stack.borrow().iter().any(|frame| frame.cell.is_some())
    }

    /// Whether `cell`'s formula is anywhere on the stack.
    pub fn is_evaluating(&self, cell: CellId) -> bool {
        self.stack
            .borrow()
            .iter()
            .any(|frame| frame.cell == Some(cell))
    }

    /// Record a read of `master` (sitting at `master_level`) by the current
    /// evaluation.
    ///
    /// Returns the evaluating cell when the read was recorded.
    pub fn track(&self, master: CellId, master_level: usize) -> Option<CellId> {
        let mut stack = self.stack.borrow_mut();
        let frame = stack.last_mut()?;
        let cell = frame.cell?;

        if !frame.masters.contains(&master) {
            frame.masters.push(master);
            frame.level = frame.level.max(master_level + 1);
        }
        Some(cell)
    }
}

/// Pops its frame when dropped.
pub struct EvaluationGuard<'a> {
    context: &'a EvaluationContext,
    depth: usize,
    done: bool,
}

impl EvaluationGuard<'_> {
    /// Pop the frame and hand back what was recorded.
    pub fn finish(mut self) -> Frame {
        self.done = true;
        self.pop().unwrap_or_default()
    }

    fn pop(&self) -> Option<Frame> {
        let mut stack = self.context.stack.borrow_mut();
        debug_assert_eq!(
            stack.len(),
            self.depth,
            "evaluation frames popped out of order"
        );
        stack.pop()
    }
}

impl Drop for EvaluationGuard<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.pop();
        }
    }
}
