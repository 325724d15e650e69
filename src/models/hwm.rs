//! Hardware monitor model: on-node sensor selftest.

use std::sync::Arc;

use crate::events::{Event, ModelBody};
use crate::gateway::Core;
use crate::models::queue::add_task;
use crate::models::task::{Task, TaskKind};
use crate::models::vendor_opcode;
use crate::node::Node;

pub const MODEL_ID: u16 = 0x0016;

const HWM_REQ: u8 = 0xC1;

pub(crate) fn selftest_msg() -> Vec<u8> {
    vendor_opcode(HWM_REQ, MODEL_ID)
}

pub(crate) fn get_selftest(core: &Arc<Core>, node: &Arc<Node>) {
    log::info!("scheduled selftest of node {}", node.mac_hex());
    add_task(core, Task::new(Arc::clone(node), TaskKind::GetSelftest));
}

pub(crate) fn handle_event(event: &Event) {
    if let Event::Model(ev) = event {
        if let ModelBody::HwmData { hts, sht, fxx, lps } = ev.body {
            log::debug!("[selftest] hts: {hts}, sht: {sht}, fxx: {fxx}, lps: {lps}");
        }
    }
}
