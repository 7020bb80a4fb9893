//! Release Plan
//!
//! The plan holds the cells waiting for the current release pass, bucketed
//! by level. It decides the order in which they are processed:
//!
//! 1. Levels drain strictly in ascending order from a cursor.
//! 2. A level is drained completely, including entries appended to it while
//!    it drains, before the cursor advances.
//! 3. Enqueueing below the cursor rewinds it, so a write made by a listener
//!    mid-pass (level 0) or a slave that sits lower than the cell which
//!    invalidated it is still handled within the same pass.
//!
//! Within one level cells are processed in FIFO order.

use std::collections::VecDeque;

use super::node::CellId;

/// Level-indexed queues of cells pending in the current pass.
#[derive(Debug, Default)]
pub struct ReleasePlan {
    /// Sparse queues indexed by level.
    queues: Vec<VecDeque<CellId>>,

    /// Level currently being drained.
    cursor: usize,

    /// Highest level holding work, `None` when the plan is empty.
    max_level: Option<usize>,
}

impl ReleasePlan {
    /// Create an empty plan.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a cell at the given level.
    pub fn enqueue(&mut self, level: usize, id: CellId) {
        if self.queues.len() <= level {
            self.queues.resize_with(level + 1, VecDeque::new);
        }
        self.queues[level].push_back(id);

        match self.max_level {
            Some(max) if max >= level => {}
            _ => self.max_level = Some(level),
        }
        if self.cursor > level {
            self.cursor = level;
        }
    }

    /// Remove a cell from the given level.
    ///
    /// Returns whether an entry was found.
    pub fn cancel(&mut self, level: usize, id: CellId) -> bool {
        let Some(queue) = self.queues.get_mut(level) else {
            return false;
        };
        let before = queue.len();
        queue.retain(|queued| *queued != id);
        let removed = queue.len() != before;

        if removed && self.is_drained() {
            self.reset();
        }
        removed
    }

    /// Remove a cell from every level.
    pub fn remove(&mut self, id: CellId) {
        for queue in &mut self.queues {
            queue.retain(|queued| *queued != id);
        }
        if self.is_drained() {
            self.reset();
        }
    }

    /// Pop the next cell to process together with the level it was queued at.
    ///
    /// Returns `None` once every level up to the highest scheduled one is
    /// empty.
    pub fn next(&mut self) -> Option<(usize, CellId)> {
        let max = self.max_level?;

        while self.cursor <= max {
            if let Some(id) = self
                .queues
                .get_mut(self.cursor)
                .and_then(VecDeque::pop_front)
            {
                return Some((self.cursor, id));
            }
            self.cursor += 1;
        }

        None
    }

    /// Whether a release pass would find anything to do.
    pub fn has_work(&self) -> bool {
        self.max_level.is_some() && !self.is_drained()
    }

    /// Number of queued entries across all levels.
    pub fn len(&self) -> usize {
        self.queues.iter().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of entries queued at one level.
    pub fn len_at(&self, level: usize) -> usize {
        self.queues.get(level).map(VecDeque::len).unwrap_or(0)
    }

    /// Close the pass: forget the cursor and the highest level.
    pub fn reset(&mut self) {
        self.cursor = 0;
        self.max_level = None;
    }

    fn is_drained(&self) -> bool {
        self.queues.iter().all(VecDeque::is_empty)
    }
}
