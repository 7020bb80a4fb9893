//! Dependency Graph
//!
//! This module holds the bookkeeping side of the cell network: which cells
//! read which, how deep each cell sits, and the level-ordered plan the
//! release scheduler drains.
//!
//! # Overview
//!
//! - Nodes are indexed by [`CellId`]. The typed values live in the cells
//!   themselves; the graph never owns a cell.
//! - An edge `master -> slave` means "slave's formula read master". Both
//!   directions are stored so disposal and invalidation are O(edges).
//! - Levels keep the graph ordered: every slave sits strictly above each of
//!   its masters, so draining level 0, 1, 2, ... commits masters first.
//!
//! Edges reference stable IDs rather than `Rc`s, which keeps cyclic
//! dependency shapes from keeping cells alive.

mod node;
mod scheduler;

use std::collections::HashMap;

use serde::Serialize;

pub use node::{CellId, Masters, Node, NodeKind};
pub use scheduler::ReleasePlan;

/// All nodes of one runtime, indexed by ID.
#[derive(Debug, Default)]
pub struct Graph {
    nodes: HashMap<CellId, Node>,
}

impl Graph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node to the graph.
    pub fn add_node(&mut self, node: Node) -> CellId {
        let id = node.id();
        self.nodes.insert(id, node);
        id
    }

    /// Remove a node from the graph.
    ///
    /// Edges to the remaining nodes are cut on both sides. The removed node
    /// is returned so the caller can react to the masters it left behind.
    pub fn remove_node(&mut self, id: CellId) -> Option<Node> {
        let node = self.nodes.remove(&id)?;

        for master in node.masters() {
            if let Some(master) = self.nodes.get_mut(master) {
                master.remove_slave(id);
            }
        }
        for slave in node.slaves() {
            if let Some(slave) = self.nodes.get_mut(slave) {
                slave.remove_master(id);
            }
        }

        Some(node)
    }

    /// Get a reference to a node.
    pub fn get_node(&self, id: CellId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Get a mutable reference to a node.
    pub fn get_node_mut(&mut self, id: CellId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    /// Register `slave` as depending on `master`.
    ///
    /// Only the slave list of the master changes: the slave's master list is
    /// owned by the dependency tracker.
    pub fn add_edge(&mut self, master: CellId, slave: CellId) -> bool {
        self.nodes
            .get_mut(&master)
            .map(|node| node.add_slave(slave))
            .unwrap_or(false)
    }

    /// Unregister `slave` from `master`.
    pub fn remove_edge(&mut self, master: CellId, slave: CellId) -> bool {
        self.nodes
            .get_mut(&master)
            .map(|node| node.remove_slave(slave))
            .unwrap_or(false)
    }

    /// Level of a node, 0 for unknown IDs.
    pub fn level(&self, id: CellId) -> usize {
        self.nodes.get(&id).map(Node::level).unwrap_or(0)
    }

    /// Get the total number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Capture a serializable view of the graph, ordered by ID.
    pub fn snapshot(&self, pass: u64) -> GraphSnapshot {
        let mut nodes: Vec<NodeSnapshot> = self
            .nodes
            .values()
            .map(|node| NodeSnapshot {
                id: node.id(),
                kind: node.kind(),
                level: node.level(),
                active: node.is_active(),
                masters: node.masters().to_vec(),
                slaves: node.slaves().iter().copied().collect(),
            })
            .collect();
        nodes.sort_by_key(|node| node.id);

        GraphSnapshot { pass, nodes }
    }
}

/// Point-in-time view of a runtime's dependency graph.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphSnapshot {
    /// Pass counter at the time of the snapshot.
    pub pass: u64,
    pub nodes: Vec<NodeSnapshot>,
}

impl GraphSnapshot {
    /// Find a node by ID.
    pub fn node(&self, id: CellId) -> Option<&NodeSnapshot> {
        self.nodes.iter().find(|node| node.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeSnapshot {
    pub id: CellId,
    pub kind: NodeKind,
    pub level: usize,
    pub active: bool,
    pub masters: Vec<CellId>,
    pub slaves: Vec<CellId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wired() -> (Graph, CellId, CellId) {
        let mut graph = Graph::new();
        let master = graph.add_node(Node::plain(CellId::new()));
        let slave = graph.add_node(Node::computed(CellId::new()));

        graph
            .get_node_mut(slave)
            .unwrap()
            .replace_masters(Masters::from_slice(&[master]), 1);
        graph.add_edge(master, slave);

        (graph, master, slave)
    }

    #[test]
    fn add_and_remove_nodes() {
        let mut graph = Graph::new();

        let id1 = graph.add_node(Node::plain(CellId::new()));
        let id2 = graph.add_node(Node::computed(CellId::new()));
        assert_eq!(graph.node_count(), 2);

        graph.remove_node(id1);
        assert_eq!(graph.node_count(), 1);
        assert!(graph.get_node(id1).is_none());
        assert!(graph.get_node(id2).is_some());
    }

    #[test]
    fn add_and_remove_edges() {
        let (mut graph, master, slave) = wired();

        assert!(graph.get_node(master).unwrap().slaves().contains(&slave));
        assert!(!graph.add_edge(master, slave));

        assert!(graph.remove_edge(master, slave));
        assert!(!graph.get_node(master).unwrap().slaves().contains(&slave));
    }

    #[test]
    fn removing_a_node_cuts_both_directions() {
        let (mut graph, master, slave) = wired();

        let removed = graph.remove_node(slave).unwrap();
        assert_eq!(removed.masters(), &[master]);
        assert!(graph.get_node(master).unwrap().slaves().is_empty());

        let (mut graph, master, slave) = wired();
        graph.remove_node(master);
        assert!(graph.get_node(slave).unwrap().masters().is_empty());
    }

    #[test]
    fn snapshot_lists_edges_and_levels() {
        let (graph, master, slave) = wired();
        let snapshot = graph.snapshot(7);

        assert_eq!(snapshot.pass, 7);
        assert_eq!(snapshot.nodes.len(), 2);

        let node = snapshot.node(slave).unwrap();
        assert_eq!(node.kind, NodeKind::Computed);
        assert_eq!(node.level, 1);
        assert_eq!(node.masters, vec![master]);
        assert_eq!(snapshot.node(master).unwrap().slaves, vec![slave]);
    }
}
