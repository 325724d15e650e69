//! Node admission filter.
//!
//! The task queue only acts on whitelisted nodes; everything else is
//! observed but never dispatched to. Events without a resolved node
//! (unknown sources) are treated as not whitelisted.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::node::Node;

#[derive(Default)]
pub(crate) struct Whitelist {
    nodes: Mutex<Vec<Arc<Node>>>,
}

impl Whitelist {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Add a node; already-present nodes are fine.
    pub(crate) fn add(&self, node: &Arc<Node>) {
        let mut nodes = self.nodes.lock();
        if !nodes.iter().any(|n| n.mac() == node.mac()) {
            nodes.push(Arc::clone(node));
        }
    }

    /// Remove a node; returns whether it was present.
    pub(crate) fn remove(&self, node: &Node) -> bool {
        let mut nodes = self.nodes.lock();
        let before = nodes.len();
        nodes.retain(|n| n.mac() != node.mac());
        nodes.len() != before
    }

    pub(crate) fn contains(&self, node: &Node) -> bool {
        self.nodes.lock().iter().any(|n| n.mac() == node.mac())
    }

    pub(crate) fn nodes(&self) -> Vec<Arc<Node>> {
        self.nodes.lock().clone()
    }
}
