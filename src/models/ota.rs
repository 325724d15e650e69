//! OTA model: firmware update negotiation over the mesh.
//!
//! The gateway announces an available image (version notify), and nodes
//! that accept get a reboot-to-bootloader schedule installed through the
//! task-gateway model. Store and relay drive image distribution between
//! nodes. The actual image transfer runs over the application OTA
//! commands and is owned by external tooling.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::events::{Event, ModelBody};
use crate::gateway::Core;
use crate::models::queue::add_task;
use crate::models::task::{Clock, Task, TaskKind};
use crate::models::{task_gw, vendor_opcode};
use crate::node::Node;

pub const MODEL_ID: u16 = 0x0012;

const NOTIFY_UPDATE: u8 = 0xC0;
const STATUS: u8 = 0xC2;
const STORE_UPDATE: u8 = 0xC4;
const RELAY_UPDATE: u8 = 0xC6;

/// Nodes that accepted the current update offer.
pub(crate) struct OtaModel {
    pending: Mutex<Vec<Arc<Node>>>,
}

impl OtaModel {
    pub(crate) fn new() -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn push_pending(&self, node: &Arc<Node>) {
        self.pending.lock().push(Arc::clone(node));
    }

    pub(crate) fn pending_nodes(&self) -> Vec<Arc<Node>> {
        self.pending.lock().clone()
    }

    pub(crate) fn clear_pending(&self) {
        self.pending.lock().clear();
    }
}

pub(crate) fn notify_msg(
    update_type: u8,
    major: u8,
    minor: u8,
    fix: u8,
    sd_version: u16,
    size: u32,
) -> Vec<u8> {
    let mut msg = vendor_opcode(NOTIFY_UPDATE, MODEL_ID);
    msg.push(update_type);
    msg.push(major);
    msg.push(minor);
    msg.push(fix);
    msg.extend_from_slice(&sd_version.to_le_bytes());
    msg.extend_from_slice(&size.to_le_bytes());
    msg
}

pub(crate) fn status_msg() -> Vec<u8> {
    vendor_opcode(STATUS, MODEL_ID)
}

pub(crate) fn store_msg(size: u32) -> Vec<u8> {
    let mut msg = vendor_opcode(STORE_UPDATE, MODEL_ID);
    msg.extend_from_slice(&size.to_le_bytes());
    msg
}

pub(crate) fn relay_msg() -> Vec<u8> {
    vendor_opcode(RELAY_UPDATE, MODEL_ID)
}

/// Schedule the reboot-to-bootloader task on an accepting node.
pub(crate) fn update_task(core: &Arc<Core>, node: &Arc<Node>, reboot_time: u32) {
    task_gw::new_task(
        core,
        node,
        task_gw::op::UPDATE,
        reboot_time,
        0,
        Clock::Monotonic,
    );
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn update_notify(
    core: &Arc<Core>,
    node: &Arc<Node>,
    update_type: u8,
    major: u8,
    minor: u8,
    fix: u8,
    sd_version: u16,
    size: u32,
    reboot_time: u32,
) {
    add_task(
        core,
        Task::new(
            Arc::clone(node),
            TaskKind::OtaNotify {
                update_type,
                major,
                minor,
                fix,
                sd_version,
                size,
                reboot_time,
            },
        ),
    );
}

pub(crate) fn status(core: &Arc<Core>, node: &Arc<Node>) {
    log::info!("scheduled ota status request for node {}", node.mac_hex());
    add_task(core, Task::new(Arc::clone(node), TaskKind::OtaStatus));
}

pub(crate) fn store_update(core: &Arc<Core>, node: &Arc<Node>, size: u32, reboot_time: u32) {
    add_task(
        core,
        Task::new(Arc::clone(node), TaskKind::OtaStore { size, reboot_time }),
    );
}

pub(crate) fn relay_update(core: &Arc<Core>, node: &Arc<Node>, reboot_time: u32) {
    add_task(
        core,
        Task::new(Arc::clone(node), TaskKind::OtaRelay { reboot_time }),
    );
}

pub(crate) fn handle_event(event: &Event) {
    if let Event::Model(ev) = event {
        if let ModelBody::OtaStatusAck { status } = ev.body {
            log::debug!("ota status: {status}");
        }
    }
}
