//! Beacon model: BLE advertising beacon on a node.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::error::{Error, Result};
use crate::events::{Event, ModelBody};
use crate::gateway::Core;
use crate::models::queue::add_task;
use crate::models::task::{Task, TaskKind};
use crate::models::vendor_opcode;
use crate::node::Node;

pub const MODEL_ID: u16 = 0x0018;

const START_BEACON: u8 = 0xC0;
const STOP_BEACON: u8 = 0xC2;

/// Transaction counter pairing acks to requests; wraps at 100.
pub(crate) struct BeaconModel {
    tid: AtomicU8,
}

impl BeaconModel {
    pub(crate) fn new() -> Self {
        Self {
            tid: AtomicU8::new(0),
        }
    }

    fn next_tid(&self) -> u8 {
        let tid = self.tid.load(Ordering::Relaxed);
        self.tid
            .store(if tid < 100 { tid + 1 } else { 0 }, Ordering::Relaxed);
        tid
    }
}

pub(crate) fn start_msg(period_ms: u16, tid: u8) -> Vec<u8> {
    let mut msg = vendor_opcode(START_BEACON, MODEL_ID);
    msg.extend_from_slice(&period_ms.to_le_bytes());
    msg.push(tid);
    msg
}

pub(crate) fn stop_msg(tid: u8) -> Vec<u8> {
    let mut msg = vendor_opcode(STOP_BEACON, MODEL_ID);
    msg.push(tid);
    msg
}

/// Beacon period must fit the BLE advertising interval (20 ms–10.24 s).
pub(crate) fn start_beacon(core: &Arc<Core>, node: &Arc<Node>, period_ms: u16) -> Result<()> {
    if !(20..=10_240).contains(&period_ms) {
        return Err(Error::InvalidArgument(
            "beacon period must be between 20 ms and 10.24 s",
        ));
    }
    let tid = core.beacon.next_tid();
    log::info!(
        "scheduled beacon start (period: {period_ms} ms) for node {}",
        node.mac_hex()
    );
    add_task(
        core,
        Task::new(Arc::clone(node), TaskKind::BeaconStart { period_ms, tid }),
    );
    Ok(())
}

pub(crate) fn stop_beacon(core: &Arc<Core>, node: &Arc<Node>) {
    let tid = core.beacon.next_tid();
    log::info!("scheduled beacon stop for node {}", node.mac_hex());
    add_task(core, Task::new(Arc::clone(node), TaskKind::BeaconStop { tid }));
}

pub(crate) fn handle_event(event: &Event) {
    if let Event::Model(ev) = event {
        match ev.body {
            ModelBody::BeaconStartAck { tid } => log::debug!("beacon start ack, tid: {tid}"),
            ModelBody::BeaconStopAck { tid } => log::debug!("beacon stop ack, tid: {tid}"),
            _ => {}
        }
    }
}
