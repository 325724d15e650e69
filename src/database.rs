//! Node database boundary.
//!
//! The gateway does not own node persistence. Callers hand it an object
//! implementing [`NodeDatabase`]; the library reads gateway identity and
//! node records through it and writes back provisioning results and
//! configuration updates. Implementations must be thread safe: the event
//! parser, the transmit worker and user threads all query it.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::node::Node;

/// Persistent store of the mesh network the gateway manages.
pub trait NodeDatabase: Send + Sync {
    /// Gateway's own mesh unicast address.
    fn get_address(&self) -> u16;

    /// Mesh network key (subnet 0).
    fn get_netkey(&self) -> [u8; 16];

    /// All stored nodes.
    fn get_nodes(&self) -> Vec<Arc<Node>>;

    /// Node with the given unicast address, if any.
    fn get_node_by_address(&self, addr: u16) -> Option<Arc<Node>>;

    /// Node with the given MAC, if any.
    fn get_node_by_mac(&self, mac: &[u8; 6]) -> Option<Arc<Node>>;

    /// Insert or update a node.
    fn store_node(&self, node: &Arc<Node>);

    /// Remove a node.
    fn remove_node(&self, node: &Arc<Node>);
}

/// In-memory database, sufficient for tools and tests that do not need
/// persistence across runs.
pub struct MemoryNodeDatabase {
    address: u16,
    netkey: [u8; 16],
    nodes: Mutex<Vec<Arc<Node>>>,
}

impl MemoryNodeDatabase {
    pub fn new(address: u16, netkey: [u8; 16]) -> Self {
        Self {
            address,
            netkey,
            nodes: Mutex::new(Vec::new()),
        }
    }
}

impl NodeDatabase for MemoryNodeDatabase {
    fn get_address(&self) -> u16 {
        self.address
    }

    fn get_netkey(&self) -> [u8; 16] {
        self.netkey
    }

    fn get_nodes(&self) -> Vec<Arc<Node>> {
        self.nodes.lock().clone()
    }

    fn get_node_by_address(&self, addr: u16) -> Option<Arc<Node>> {
        self.nodes
            .lock()
            .iter()
            .find(|n| n.unicast_addr() == addr)
            .cloned()
    }

    fn get_node_by_mac(&self, mac: &[u8; 6]) -> Option<Arc<Node>> {
        self.nodes.lock().iter().find(|n| n.mac() == *mac).cloned()
    }

    fn store_node(&self, node: &Arc<Node>) {
        let mut nodes = self.nodes.lock();
        if let Some(existing) = nodes.iter_mut().find(|n| n.mac() == node.mac()) {
            *existing = Arc::clone(node);
        } else {
            nodes.push(Arc::clone(node));
        }
    }

    fn remove_node(&self, node: &Arc<Node>) {
        self.nodes.lock().retain(|n| n.mac() != node.mac());
    }
}
