//! Tap model: accelerometer tap detection state.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::gateway::Core;
use crate::models::queue::add_task;
use crate::models::task::{Task, TaskKind};
use crate::models::vendor_opcode;
use crate::node::Node;

pub const MODEL_ID: u16 = 0x0006;

const STATE: u8 = 0xC1;

pub(crate) fn state_msg(state: u8) -> Vec<u8> {
    let mut msg = vendor_opcode(STATE, MODEL_ID);
    msg.push(state);
    msg
}

/// Accelerometer state: 0 off, 1 on, 2 on with colours.
pub(crate) fn set_accel_state(core: &Arc<Core>, node: &Arc<Node>, state: u8) -> Result<()> {
    if state > 2 {
        return Err(Error::InvalidArgument("invalid accelerometer state"));
    }
    log::info!(
        "scheduled accel state {state} for node {}",
        node.mac_hex()
    );
    add_task(core, Task::new(Arc::clone(node), TaskKind::ChangeAccel { state }));
    Ok(())
}
