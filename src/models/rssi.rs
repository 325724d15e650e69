//! RSSI model: neighbour tables, link status, ping.
//!
//! Ping is symmetric: the gateway answers node-initiated pings
//! automatically and can schedule its own.

use std::sync::Arc;

use crate::events::{Event, ModelBody};
use crate::gateway::Core;
use crate::models::queue::add_task;
use crate::models::task::{Task, TaskKind};
use crate::models::vendor_opcode;
use crate::node::Node;

pub const MODEL_ID: u16 = 0x000E;

const NEIGHBOR_REQ: u8 = 0xC1;
const STATUS_REQ: u8 = 0xC3;
const PING: u8 = 0xC5;
const PING_ACK: u8 = 0xC6;

pub(crate) fn neighbor_req_msg() -> Vec<u8> {
    vendor_opcode(NEIGHBOR_REQ, MODEL_ID)
}

pub(crate) fn status_req_msg() -> Vec<u8> {
    vendor_opcode(STATUS_REQ, MODEL_ID)
}

pub(crate) fn ping_msg() -> Vec<u8> {
    vendor_opcode(PING, MODEL_ID)
}

pub(crate) fn get_neighbor_rssi(core: &Arc<Core>, node: &Arc<Node>) {
    log::info!("scheduled neighbour rssi request for node {}", node.mac_hex());
    add_task(core, Task::new(Arc::clone(node), TaskKind::GetNeighborRssi));
}

pub(crate) fn get_status_rssi(core: &Arc<Core>, node: &Arc<Node>) {
    log::info!("scheduled rssi status request for node {}", node.mac_hex());
    add_task(core, Task::new(Arc::clone(node), TaskKind::GetStatusRssi));
}

pub(crate) fn ping_node(core: &Arc<Core>, node: &Arc<Node>) {
    log::info!("scheduled ping to node {}", node.mac_hex());
    add_task(core, Task::new(Arc::clone(node), TaskKind::Ping));
}

pub(crate) fn handle_event(core: &Arc<Core>, event: &Event) {
    let Event::Model(ev) = event else { return };
    match &ev.body {
        ModelBody::RssiPing => {
            if let Some(node) = &ev.node {
                log::debug!("rssi ping ack");
                let msg = vendor_opcode(PING_ACK, MODEL_ID);
                core.tx.send_node(core, msg, Arc::clone(node));
            }
        }
        ModelBody::RssiStatusAck { rssi } => {
            log::debug!("rssi status: {rssi}");
        }
        ModelBody::RssiPingAck => {
            if let Some(node) = &ev.node {
                log::info!("ping ack from node {}", node.mac_hex());
            }
        }
        _ => {}
    }
}
