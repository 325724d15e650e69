//! Datetime model: wall-clock distribution.
//!
//! Nodes with realtime schedules need a Unix time reference. The
//! gateway pushes it on demand and also answers node-initiated
//! requests.

use std::sync::Arc;

use crate::events::{Event, ModelBody};
use crate::gateway::Core;
use crate::models::queue::add_task;
use crate::models::task::{Task, TaskKind};
use crate::models::vendor_opcode;
use crate::node::Node;

pub const MODEL_ID: u16 = 0x000A;

/// Default datetime refresh period (24 h).
pub const DEFAULT_DATETIME_PERIOD: u32 = 86_400;

const DATETIME: u8 = 0xC1;

pub(crate) fn datetime_msg(unix_time: u32) -> Vec<u8> {
    let mut msg = vendor_opcode(DATETIME, MODEL_ID);
    msg.extend_from_slice(&unix_time.to_le_bytes());
    msg
}

pub(crate) fn send_datetime(core: &Arc<Core>, node: &Arc<Node>) {
    add_task(core, Task::new(Arc::clone(node), TaskKind::SendDatetime));
}

pub(crate) fn handle_event(core: &Arc<Core>, event: &Event) {
    if let Event::Model(ev) = event {
        if matches!(ev.body, ModelBody::DatetimeReq { .. }) {
            if let Some(node) = &ev.node {
                send_datetime(core, node);
            }
        }
    }
}
