//! Configuration client: SIG node reset.
//!
//! The only SIG-model operation the gateway issues. A node that
//! acknowledges the reset forgets its provisioning data and is removed
//! from the database and the replay cache.

use std::sync::Arc;

use crate::gateway::Core;
use crate::models::queue::add_task;
use crate::models::sig_opcode;
use crate::models::task::{Task, TaskKind};
use crate::node::Node;

const NODE_RESET: u16 = 0x8049;

pub(crate) fn reset_msg() -> Vec<u8> {
    sig_opcode(NODE_RESET)
}

/// Schedule a node reset. The node must be awake to receive it.
pub(crate) fn reset_node(core: &Arc<Core>, node: &Arc<Node>) {
    log::info!("scheduled reset of node {}", node.mac_hex());
    add_task(core, Task::new(Arc::clone(node), TaskKind::NodeReset));
}
