//! Wake-up model: sleep/wake coordination for low-power nodes.
//!
//! Low-power nodes spend most of their life asleep and announce each
//! wake with a notify broadcast. The gateway answers with WAIT to hold
//! them awake, SLEEP to put them back down, or ALIVE as a liveness
//! round-trip for mains-powered boards. A freshly booted node reports
//! its reset reason, which opens a configuration session (see
//! [`queue`](super::queue)).

use std::sync::atomic::{AtomicU32, Ordering};

use crate::gateway::Core;
use crate::models::vendor_opcode;
use crate::node::Node;

pub const MODEL_ID: u16 = 0x0000;

/// Default period between wake-ups, applied to nodes at configuration.
pub const DEFAULT_SLEEP_TIME: u32 = 600;

const SLEEP: u8 = 0xC1;
const WAIT: u8 = 0xC2;
const RESET_ACK: u8 = 0xC6;
const ALIVE: u8 = 0xC7;

/// Gateway-wide default sleep time, adjustable at runtime.
pub(crate) struct WakeUpModel {
    sleep_time: AtomicU32,
}

impl WakeUpModel {
    pub(crate) fn new() -> Self {
        Self {
            sleep_time: AtomicU32::new(DEFAULT_SLEEP_TIME),
        }
    }

    pub(crate) fn sleep_time(&self) -> u32 {
        self.sleep_time.load(Ordering::Relaxed)
    }

    pub(crate) fn set_sleep_time(&self, secs: u32) {
        self.sleep_time.store(secs, Ordering::Relaxed);
    }
}

pub(crate) fn send_sleep(core: &Core, node: &std::sync::Arc<Node>, configured: bool) {
    let mut msg = vendor_opcode(SLEEP, MODEL_ID);
    msg.push(u8::from(configured));
    core.tx.send_node(core, msg, std::sync::Arc::clone(node));
}

pub(crate) fn send_alive(core: &Core, node: &std::sync::Arc<Node>, configured: bool) {
    let mut msg = vendor_opcode(ALIVE, MODEL_ID);
    msg.push(u8::from(configured));
    core.tx.send_node(core, msg, std::sync::Arc::clone(node));
}

pub(crate) fn send_wait(core: &Core, node: &std::sync::Arc<Node>) {
    let msg = vendor_opcode(WAIT, MODEL_ID);
    core.tx.send_node(core, msg, std::sync::Arc::clone(node));
}

pub(crate) fn wake_reset_ack(core: &Core, node: &std::sync::Arc<Node>) {
    log::debug!("wake reset ack for {}", node.mac_hex());
    let msg = vendor_opcode(RESET_ACK, MODEL_ID);
    core.tx.send_node(core, msg, std::sync::Arc::clone(node));
}

/// Human-readable reset reason reported in the wake-reset broadcast.
pub fn reset_reason_str(reason: u8) -> String {
    match reason {
        0 => "UNKNOWN".into(),
        1 => "RESETPIN".into(),
        2 => "DOG".into(),
        3 => "SREQ".into(),
        4 => "LOCKUP".into(),
        5 => "OFF".into(),
        6 => "LPCOMP".into(),
        7 => "DIF".into(),
        8 => "NFC".into(),
        9 => "VBUS".into(),
        10 => "MULTIPLE".into(),
        other => other.to_string(),
    }
}
