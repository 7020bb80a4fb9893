//! Graph Nodes
//!
//! This module defines the per-cell bookkeeping that lives in the dependency
//! graph. Values stay in the typed cells; a node only carries what the
//! release scheduler needs to order and settle work.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Unique identifier for a cell in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellId(u64);

impl CellId {
    /// Generate a new unique cell ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for CellId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<u64> for CellId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cell#{}", self.0)
    }
}

/// The kind of cell a node stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// A cell holding a value written from outside. Always at level 0.
    Plain,

    /// A cell whose value is a formula over other cells.
    Computed,
}

/// Masters are usually few; keep them inline.
pub type Masters = SmallVec<[CellId; 4]>;

/// A node in the dependency graph.
#[derive(Debug)]
pub struct Node {
    /// Unique identifier for this node.
    id: CellId,

    /// What kind of cell this node stands for.
    kind: NodeKind,

    /// Cells read by the last formula evaluation, in read order.
    pub(crate) masters: Masters,

    /// Cells currently registered as depending on this one, in
    /// registration order.
    pub(crate) slaves: IndexSet<CellId>,

    /// Topological depth: 0 without masters, otherwise one more than the
    /// deepest master.
    pub(crate) level: usize,

    /// Whether a computed cell is eagerly subscribed to its masters.
    pub(crate) active: bool,

    /// False exactly while the node waits in the release plan.
    pub(crate) fixed: bool,

    /// Pass stamp of the last recalculation, for the circuit breaker.
    pub(crate) version: u64,

    /// Value epoch at the last lazy evaluation. A lazy read recomputes once
    /// any committed value has changed since.
    pub(crate) evaluated_at: u64,

    /// Consecutive recalculations within one release pass.
    pub(crate) circularity_counter: u32,

    /// Epoch in which the committed value last changed.
    pub(crate) changed_at: Option<u64>,

    /// Identity of the last error event delivered here.
    pub(crate) last_error: Option<u64>,
}

impl Node {
    /// Create a new node with the given kind.
    pub fn new(id: CellId, kind: NodeKind) -> Self {
        Self {
            id,
            kind,
            masters: Masters::new(),
            slaves: IndexSet::new(),
            level: 0,
            active: false,
            fixed: true,
            version: 0,
            evaluated_at: 0,
            circularity_counter: 0,
            changed_at: None,
            last_error: None,
        }
    }

    /// Create a node for a plain cell.
    pub fn plain(id: CellId) -> Self {
        Self::new(id, NodeKind::Plain)
    }

    /// Create a node for a computed cell.
    pub fn computed(id: CellId) -> Self {
        Self::new(id, NodeKind::Computed)
    }

    /// Get the node's ID.
    pub fn id(&self) -> CellId {
        self.id
    }

    /// Get the node's kind.
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn is_computed(&self) -> bool {
        self.kind == NodeKind::Computed
    }

    /// Get the topological level.
    pub fn level(&self) -> usize {
        self.level
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_fixed(&self) -> bool {
        self.fixed
    }

    /// Cells this node read during its last evaluation.
    pub fn masters(&self) -> &[CellId] {
        &self.masters
    }

    /// Cells depending on this node.
    pub fn slaves(&self) -> &IndexSet<CellId> {
        &self.slaves
    }

    /// Add a slave (a cell that reads from this one).
    pub fn add_slave(&mut self, id: CellId) -> bool {
        self.slaves.insert(id)
    }

    /// Remove a slave, keeping the order of the others.
    pub fn remove_slave(&mut self, id: CellId) -> bool {
        self.slaves.shift_remove(&id)
    }

    /// Replace the masters and level after an evaluation.
    pub fn replace_masters(&mut self, masters: Masters, level: usize) -> Masters {
        self.level = level;
        std::mem::replace(&mut self.masters, masters)
    }

    /// Forget a master without re-evaluating (the master went away).
    pub fn remove_master(&mut self, id: CellId) {
        self.masters.retain(|m| *m != id);
    }
}
