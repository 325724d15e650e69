//! Light model: node LED colour and blink control.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::gateway::Core;
use crate::models::queue::add_task;
use crate::models::task::{Task, TaskKind};
use crate::models::vendor_opcode;
use crate::node::Node;

pub const MODEL_ID: u16 = 0x0008;

const LIGHT: u8 = 0xC0;
const BLINK: u8 = 0xC2;

/// LED colour, parsed from `#RRGGBB`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

pub fn parse_color(color: &str) -> Result<Rgb> {
    let hex_part = color
        .strip_prefix('#')
        .filter(|rest| rest.len() == 6)
        .ok_or(Error::InvalidArgument("color format should be #RRGGBB"))?;
    let bytes =
        hex::decode(hex_part).map_err(|_| Error::InvalidArgument("color format should be #RRGGBB"))?;
    Ok(Rgb {
        r: bytes[0],
        g: bytes[1],
        b: bytes[2],
    })
}

pub(crate) fn light_msg(color: Rgb) -> Vec<u8> {
    let mut msg = vendor_opcode(LIGHT, MODEL_ID);
    msg.extend_from_slice(&[color.r, color.g, color.b]);
    msg
}

pub(crate) fn blink_msg(color: Rgb, repeat: u16) -> Vec<u8> {
    let mut msg = vendor_opcode(BLINK, MODEL_ID);
    msg.extend_from_slice(&[color.r, color.g, color.b]);
    msg.extend_from_slice(&repeat.to_le_bytes());
    msg
}

pub(crate) fn set_led(core: &Arc<Core>, node: &Arc<Node>, color: &str) -> Result<()> {
    let color = parse_color(color)?;
    log::info!("scheduled led colour {color:?} for node {}", node.mac_hex());
    add_task(
        core,
        Task::new(
            Arc::clone(node),
            TaskKind::ChangeLed {
                color,
                blink: false,
                repeat: 0,
            },
        ),
    );
    Ok(())
}

pub(crate) fn set_blink(core: &Arc<Core>, node: &Arc<Node>, color: &str, repeat: u16) -> Result<()> {
    let color = parse_color(color)?;
    log::info!("scheduled led blink {color:?} for node {}", node.mac_hex());
    add_task(
        core,
        Task::new(
            Arc::clone(node),
            TaskKind::ChangeLed {
                color,
                blink: true,
                repeat,
            },
        ),
    );
    Ok(())
}

pub(crate) fn stop_blink(core: &Arc<Core>, node: &Arc<Node>) -> Result<()> {
    set_blink(core, node, "#000000", 0)
}
