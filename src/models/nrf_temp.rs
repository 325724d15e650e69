//! Temperature model: environmental telemetry and sensor tuning.
//!
//! Covers the SHT4x-family sensing pipeline: plain and reliable
//! temperature broadcasts (the reliable flavour is acked back),
//! air-quality and CO2 readings, on-node inference ("ia") gating, and
//! sensor mode/calibration. Reporting rates live on the node scheduler
//! (see [`task_gw`](super::task_gw)).

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::events::{Event, ModelBody};
use crate::gateway::Core;
use crate::models::queue::add_task;
use crate::models::task::{Task, TaskKind};
use crate::models::{task_gw, unix_now, vendor_opcode};
use crate::node::Node;

pub const MODEL_ID: u16 = 0x0002;

pub const DEFAULT_NRFTEMP_PERIOD: u32 = 600;
pub const DEFAULT_IAQ_PERIOD: u32 = 300;
pub const DEFAULT_CO2_PERIOD: u32 = 300;

const IA: u8 = 0xC2;
const TEMP_DATA_ACK: u8 = 0xC5;
const TEMP_CONFIG: u8 = 0xC7;
const TEMP_CALIBRATE: u8 = 0xC9;
const TEMP_CAL_RESET: u8 = 0xCB;

/// SHT4x sampling modes accepted by `set_temp_mode`.
pub const SHT4X_MODES: [(u8, &str); 9] = [
    (0, "SHT4X_REP_HIGH"),
    (1, "SHT4X_REP_MED"),
    (2, "SHT4X_REP_LOW"),
    (3, "SHT4X_REP_HEAT_H_1S"),
    (4, "SHT4X_REP_HEAT_H_0_1S"),
    (5, "SHT4X_REP_HEAT_M_1S"),
    (6, "SHT4X_REP_HEAT_M_0_1S"),
    (7, "SHT4X_REP_HEAT_L_1S"),
    (8, "SHT4X_REP_HEAT_L_0_1S"),
];

pub(crate) fn ia_msg(status: u8, max_skip: u8) -> Vec<u8> {
    let mut msg = vendor_opcode(IA, MODEL_ID);
    msg.push(status);
    msg.push(max_skip);
    msg
}

pub(crate) fn config_msg(mode: u8) -> Vec<u8> {
    let mut msg = vendor_opcode(TEMP_CONFIG, MODEL_ID);
    msg.push(mode);
    msg
}

pub(crate) fn calibrate_msg(temp_offset: f32, humd_offset: i8, press_offset: i32) -> Vec<u8> {
    let mut msg = vendor_opcode(TEMP_CALIBRATE, MODEL_ID);
    msg.extend_from_slice(&((temp_offset * 100.0) as i16).to_le_bytes());
    msg.push(humd_offset as u8);
    // 24-bit pressure offset.
    msg.extend_from_slice(&press_offset.to_le_bytes()[..3]);
    msg
}

pub(crate) fn cal_reset_msg(temp: i16, humd: i8, press: i32) -> Vec<u8> {
    let mut msg = vendor_opcode(TEMP_CAL_RESET, MODEL_ID);
    msg.extend_from_slice(&temp.to_le_bytes());
    msg.push(humd as u8);
    msg.extend_from_slice(&press.to_le_bytes()[..3]);
    msg
}

fn temp_data_ack(core: &Arc<Core>, node: &Arc<Node>) {
    log::debug!("reliable temperature ack");
    let msg = vendor_opcode(TEMP_DATA_ACK, MODEL_ID);
    core.tx.send_node(core, msg, Arc::clone(node));
}

// ── Operations ───────────────────────────────────────────────

pub(crate) fn set_ia(core: &Arc<Core>, node: &Arc<Node>, status: u8, max_skip: u8) -> Result<()> {
    if status > 1 {
        return Err(Error::InvalidArgument("ia status must be 0 (off) or 1 (on)"));
    }
    log::info!(
        "scheduled ia config (status: {status}, skip: {max_skip}) for node {}",
        node.mac_hex()
    );
    add_task(
        core,
        Task::new(Arc::clone(node), TaskKind::ChangeIa { status, max_skip }),
    );
    Ok(())
}

pub(crate) fn set_configuration(core: &Arc<Core>, node: &Arc<Node>, mode: u8) -> Result<()> {
    let Some((_, name)) = SHT4X_MODES.iter().find(|(m, _)| *m == mode) else {
        return Err(Error::InvalidArgument("unsupported sensor mode"));
    };
    log::info!(
        "scheduled sensor configuration (mode: {name}) for node {}",
        node.mac_hex()
    );
    add_task(
        core,
        Task::new(Arc::clone(node), TaskKind::ChangeTempConfig { mode }),
    );
    Ok(())
}

pub(crate) fn set_calibration(
    core: &Arc<Core>,
    node: &Arc<Node>,
    temp_offset: f32,
    humd_offset: i8,
    press_offset: i32,
) {
    log::info!(
        "scheduled calibration (temp: {temp_offset:.2}, humd: {humd_offset}, press: {press_offset}) for node {}",
        node.mac_hex()
    );
    add_task(
        core,
        Task::new(
            Arc::clone(node),
            TaskKind::ChangeCalibration {
                temp_offset,
                humd_offset,
                press_offset,
            },
        ),
    );
}

pub(crate) fn reset_calibration(core: &Arc<Core>, node: &Arc<Node>, temp: i16, humd: i8, press: i32) {
    log::info!(
        "scheduled calibration reset (temp: {temp}, humd: {humd}, press: {press}) for node {}",
        node.mac_hex()
    );
    add_task(
        core,
        Task::new(
            Arc::clone(node),
            TaskKind::ResetCalibration { temp, humd, press },
        ),
    );
}

pub(crate) fn set_rate(core: &Arc<Core>, node: &Arc<Node>, rate: u32) {
    task_gw::set_rate(core, node, task_gw::op::NRFTEMP, rate);
}

pub(crate) fn set_rate_legacy(core: &Arc<Core>, node: &Arc<Node>, rate: u32) {
    task_gw::set_rate_legacy(core, node, task_gw::op::NRFTEMP, rate);
}

pub(crate) fn set_iaq_rate(core: &Arc<Core>, node: &Arc<Node>, rate: u32) {
    task_gw::set_rate(core, node, task_gw::op::NRFTEMP_READ_IAQ, rate);
}

pub(crate) fn set_iaq_rate_legacy(core: &Arc<Core>, node: &Arc<Node>, rate: u32) {
    task_gw::set_rate_legacy(core, node, task_gw::op::NRFTEMP_READ_IAQ, rate);
}

pub(crate) fn set_co2_rate(core: &Arc<Core>, node: &Arc<Node>, rate: u32) {
    task_gw::set_rate(core, node, task_gw::op::NRFTEMP_CO2, rate);
}

pub(crate) fn set_co2_rate_legacy(core: &Arc<Core>, node: &Arc<Node>, rate: u32) {
    task_gw::set_rate_legacy(core, node, task_gw::op::NRFTEMP_CO2, rate);
}

// ── Event handling (bus worker) ──────────────────────────────

pub(crate) fn handle_event(core: &Arc<Core>, event: &Event) {
    let Event::Model(ev) = event else { return };
    match &ev.body {
        ModelBody::TempData {
            temp, hum, press, ..
        }
        | ModelBody::TempDataReliable {
            temp, hum, press, ..
        } => {
            if let Some(node) = &ev.node {
                if matches!(ev.body, ModelBody::TempDataReliable { .. }) {
                    temp_data_ack(core, node);
                }
                log::debug!(
                    "temp received: {}, {}, {temp}, {hum}, {press}, {}, {}",
                    ev.meta.src,
                    node.mac_hex(),
                    ev.meta.rssi,
                    ev.meta.ttl
                );
                node.set_msg_timestamp(unix_now());
            }
        }
        ModelBody::IaqData {
            iaq,
            tvoc,
            etoh,
            eco2,
            ..
        } => {
            if let Some(node) = &ev.node {
                log::debug!(
                    "iaq received: {}, {}, {iaq}, {tvoc}, {etoh}, {eco2}",
                    ev.meta.src,
                    node.mac_hex()
                );
            }
        }
        ModelBody::Co2Data {
            co2,
            cal_status,
            abc_time,
            ..
        } => {
            if let Some(node) = &ev.node {
                log::debug!(
                    "co2 received: {}, {}, {co2} ppm (cal_status: {cal_status}, abc_time: {abc_time})",
                    ev.meta.src,
                    node.mac_hex()
                );
            }
        }
        _ => {}
    }
}
