//! Power model: radio transmit power and DCDC regulator mode.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::events::{Event, ModelBody};
use crate::gateway::Core;
use crate::models::queue::add_task;
use crate::models::task::{Task, TaskKind};
use crate::models::vendor_opcode;
use crate::node::Node;

pub const MODEL_ID: u16 = 0x0014;

const POWER: u8 = 0xC0;

pub(crate) fn power_msg(radio_power: u8, dcdc_mode: u8) -> Vec<u8> {
    let mut msg = vendor_opcode(POWER, MODEL_ID);
    msg.push(radio_power);
    msg.push(dcdc_mode);
    msg
}

/// Radio power 0..=2 (low/med/high), dcdc_mode 0..=1.
pub(crate) fn set_power(core: &Arc<Core>, node: &Arc<Node>, radio_power: u8, dcdc_mode: u8) -> Result<()> {
    if radio_power > 2 {
        return Err(Error::InvalidArgument(
            "radio power should be 2 (high), 1 (med) or 0 (low)",
        ));
    }
    if dcdc_mode > 1 {
        return Err(Error::InvalidArgument(
            "DCDC mode should be 1 (enabled) or 0 (disabled)",
        ));
    }
    log::info!(
        "scheduled power config (radio_power: {radio_power}, dcdc_mode: {dcdc_mode}) for node {}",
        node.mac_hex()
    );
    add_task(
        core,
        Task::new(
            Arc::clone(node),
            TaskKind::ChangePower {
                radio_power,
                dcdc_mode,
            },
        ),
    );
    Ok(())
}

pub(crate) fn handle_event(event: &Event) {
    if let Event::Model(ev) = event {
        if matches!(ev.body, ModelBody::PowerAck) {
            log::debug!("power config ack received");
        }
    }
}
