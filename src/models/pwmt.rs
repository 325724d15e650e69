//! Power-meter model: three-phase measurement configuration and data.
//!
//! A meter node streams per-phase or aggregate samples whose shape is
//! selected by the ctl byte (decoded in the event parser). The gateway
//! configures which phases, statistics and value groups to receive and
//! the voltage/current conversion factors of the measurement channels.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::events::{Event, ModelBody, PwmtReadings};
use crate::gateway::Core;
use crate::models::queue::add_task;
use crate::models::task::{Task, TaskKind};
use crate::models::{task_gw, unix_now, vendor_opcode};
use crate::node::Node;

pub const MODEL_ID: u16 = 0x001C;

pub const DEFAULT_PWMT_PERIOD: u32 = 30;

const CONF: u8 = 0xC1;
const CONV: u8 = 0xC3;

pub(crate) fn conf_msg(phases: u8, stats: u8, values_ph: u8, values_tot: u8) -> Vec<u8> {
    let c1 = (phases & 0b1111) | ((stats & 0b111) << 4);
    let c2 = (values_ph & 0b1111) | ((values_tot & 0b1111) << 4);
    let mut msg = vendor_opcode(CONF, MODEL_ID);
    msg.push(c1);
    msg.push(c2);
    msg
}

pub(crate) fn conv_msg(kv: u32, ki: u32) -> Vec<u8> {
    // Two 28-bit factors packed into 56 bits, current in the low half.
    let k = u64::from(ki & 0x0FFF_FFFF) | (u64::from(kv & 0x0FFF_FFFF) << 28);
    let mut msg = vendor_opcode(CONV, MODEL_ID);
    msg.extend_from_slice(&k.to_le_bytes()[..7]);
    msg
}

pub(crate) fn set_pwmt_conf(
    core: &Arc<Core>,
    node: &Arc<Node>,
    phases: u8,
    stats: u8,
    values_ph: u8,
    values_tot: u8,
) -> Result<()> {
    if !node.is_power_meter() {
        return Ok(());
    }
    if phases > 0b1111 {
        return Err(Error::InvalidArgument(
            "incorrect phases to receive (TOT|L1|L2|L3)",
        ));
    }
    if stats > 0b111 {
        return Err(Error::InvalidArgument(
            "incorrect stats to receive (avg|max|min)",
        ));
    }
    if values_ph > 0b1111 {
        return Err(Error::InvalidArgument(
            "incorrect phase values to receive (VIF|Ppf|QSph|E)",
        ));
    }
    log::info!(
        "scheduled pwmt config (phases {phases}, stats {stats}, values_ph {values_ph}, values_tot {values_tot}) for node {}",
        node.mac_hex()
    );
    add_task(
        core,
        Task::new(
            Arc::clone(node),
            TaskKind::PwmtConfig {
                phases,
                stats,
                values_ph,
                values_tot,
            },
        ),
    );
    Ok(())
}

pub(crate) fn set_pwmt_conv(core: &Arc<Core>, node: &Arc<Node>, kv: u32, ki: u32) -> Result<()> {
    if !node.is_power_meter() {
        return Ok(());
    }
    if kv > 0x0FFF_FFFF {
        return Err(Error::InvalidArgument("invalid kv"));
    }
    if ki > 0x0FFF_FFFF {
        return Err(Error::InvalidArgument("invalid ki"));
    }
    log::info!(
        "scheduled pwmt conversion factors (kv {:.3}, ki {:.3}) for node {}",
        f64::from(kv) / 1000.0,
        f64::from(ki) / 1000.0,
        node.mac_hex()
    );
    add_task(
        core,
        Task::new(Arc::clone(node), TaskKind::PwmtConv { kv, ki }),
    );
    Ok(())
}

pub(crate) fn set_pwmt_rate(core: &Arc<Core>, node: &Arc<Node>, rate: u32) {
    task_gw::set_rate(core, node, task_gw::op::PWMT_READ, rate);
}

pub(crate) fn set_pwmt_rate_legacy(core: &Arc<Core>, node: &Arc<Node>, rate: u32) {
    task_gw::set_rate_legacy(core, node, task_gw::op::PWMT_READ, rate);
}

// ── Event handling (bus worker) ──────────────────────────────

pub(crate) fn handle_event(event: &Event) {
    let Event::Model(ev) = event else { return };
    let ModelBody::PwmtData { ctl, readings } = &ev.body else {
        return;
    };
    let Some(node) = &ev.node else { return };

    let phase_id = ctl & 0b11;
    let value_type = (ctl >> 4) & 0b11;
    let calc_status = (ctl >> 6) & 0b11;

    if calc_status == 1 {
        log::debug!("pwmt: INVALID_DATA (L{phase_id})");
        return;
    }

    let stat = match value_type {
        0b00 => "avg",
        0b01 => "max",
        0b10 => "min",
        _ => "",
    };
    let src = ev.meta.src;
    let mac = node.mac_hex();
    let rssi = ev.meta.rssi;

    match readings {
        PwmtReadings::TotalPower { p, q, s } => log::debug!(
            "pwmt: {src}, {mac}, [TO][{stat}] P:{p}W, Q:{q}VAr, S:{s}VA ({rssi} dBm)"
        ),
        PwmtReadings::PhaseAngles { ph12, ph23, ph31 } => log::debug!(
            "pwmt: {src}, {mac}, [TO][{stat}] PH12:{ph12:.2}deg, PH23:{ph23:.2}deg, PH31:{ph31:.2}deg ({rssi} dBm)"
        ),
        PwmtReadings::LineVoltages { v12, v23, v31 } => log::debug!(
            "pwmt: {src}, {mac}, [TO][{stat}] V12:{v12:.2}V, V23:{v23:.2}V, V31:{v31:.2}V ({rssi} dBm)"
        ),
        PwmtReadings::TotalEnergy { e } => {
            log::debug!("pwmt: {src}, {mac}, [TO][{stat}] E:{e}Wh ({rssi} dBm)");
        }
        PwmtReadings::PhaseVif { v, i, f } => log::debug!(
            "pwmt: {src}, {mac}, [L{phase_id}][{stat}] V:{v:.2}V, I:{i:.2}A, f:{f:.2}Hz ({rssi} dBm)"
        ),
        PwmtReadings::PhasePower { p, pf, inductive } => log::debug!(
            "pwmt: {src}, {mac}, [L{phase_id}][{stat}] P:{p}W, pf:{pf:.2}({}) ({rssi} dBm)",
            if *inductive { "ind" } else { "cap" }
        ),
        PwmtReadings::PhaseQs { q, s, ph } => log::debug!(
            "pwmt: {src}, {mac}, [L{phase_id}][{stat}] Q:{q}VAr, S:{s}VA, ph:{ph:.2}deg ({rssi} dBm)"
        ),
        PwmtReadings::PhaseEnergy { e } => {
            log::debug!("pwmt: {src}, {mac}, [L{phase_id}][{stat}] E:{e}Wh ({rssi} dBm)");
        }
    }
    node.set_msg_timestamp(unix_now());
}
