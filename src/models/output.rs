//! Output model: analog (DAC) and digital outputs on I/O boards.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::events::{Event, ModelBody};
use crate::gateway::Core;
use crate::models::queue::add_task;
use crate::models::task::{Task, TaskKind};
use crate::models::vendor_opcode;
use crate::node::Node;

pub const MODEL_ID: u16 = 0x001E;

const DAC: u8 = 0xC0;
const DIG: u8 = 0xC2;

pub(crate) fn dac_msg(value: f32) -> Vec<u8> {
    let mut msg = vendor_opcode(DAC, MODEL_ID);
    msg.extend_from_slice(&value.to_le_bytes());
    msg
}

pub(crate) fn dig_msg(status: u8) -> Vec<u8> {
    let mut msg = vendor_opcode(DIG, MODEL_ID);
    msg.push(status);
    msg
}

/// DAC output as a fraction of full scale, 0.0..=1.0.
pub(crate) fn set_dac(core: &Arc<Core>, node: &Arc<Node>, value: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(Error::InvalidArgument("DAC value must be within 0..=1"));
    }
    log::info!(
        "scheduled dac output {value} for node {}",
        node.mac_hex()
    );
    add_task(core, Task::new(Arc::clone(node), TaskKind::DacOutput { value }));
    Ok(())
}

/// Digital output: 0 clear, 1 set.
pub(crate) fn set_digital(core: &Arc<Core>, node: &Arc<Node>, status: u8) -> Result<()> {
    if status > 1 {
        return Err(Error::InvalidArgument("digital output must be 0 or 1"));
    }
    log::info!(
        "scheduled digital output {status} for node {}",
        node.mac_hex()
    );
    add_task(core, Task::new(Arc::clone(node), TaskKind::DigOutput { status }));
    Ok(())
}

pub(crate) fn handle_event(event: &Event) {
    if let Event::Model(ev) = event {
        match ev.body {
            ModelBody::OutputDacAck => log::debug!("dac output ack received"),
            ModelBody::OutputDigAck => log::debug!("digital output ack received"),
            _ => {}
        }
    }
}
