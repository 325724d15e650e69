//! Task-gateway model: periodic schedules running on the nodes.
//!
//! Nodes execute their sensing and housekeeping as opcoded tasks on a
//! small on-device scheduler, either monotonic or realtime clocked. The
//! gateway installs, changes and deletes these schedules; telemetry
//! rates and the sleep cadence are all expressed this way. `legacy`
//! firmware lacks the change operation, so rate updates there are a
//! delete followed by a fresh install.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::Mutex;

use crate::gateway::Core;
use crate::models::queue::add_task;
use crate::models::task::{Clock, Task, TaskKind};
use crate::models::{unix_now, vendor_opcode};
use crate::node::Node;

pub const MODEL_ID: u16 = 0x000C;

const CONF_REAL: u8 = 0xC9;
const CONF_MONO: u8 = 0xCA;
const DELETE: u8 = 0xC2;
const DELETE_OP: u8 = 0xC4;
const GET: u8 = 0xC6;
const CHANGE_REAL: u8 = 0xCB;
const CHANGE_MONO: u8 = 0xCC;

/// On-device task opcodes.
pub mod op {
    /// Configuration FSM; its period is the node sleep period.
    pub const CONF: u8 = 0x01;
    pub const NRFTEMP: u8 = 0x02;
    pub const BAT: u8 = 0x03;
    pub const SET_BLUE_LED: u8 = 0x04;
    pub const REQ_DATETIME: u8 = 0x05;
    pub const UPDATE: u8 = 0x07;
    pub const SEND_NODES: u8 = 0x08;
    pub const REBOOT: u8 = 0x09;
    pub const NRFTEMP_START_IAQ: u8 = 0x0A;
    pub const NRFTEMP_READ_IAQ: u8 = 0x0B;
    pub const NRFTEMP_STOP_IAQ: u8 = 0x0C;
    pub const NRFTEMP_CO2: u8 = 0x0D;
    pub const NRFTEMP_START_CO2: u8 = 0x0E;
    pub const NRFTEMP_STOP_CO2: u8 = 0x0F;
    pub const NRFTEMP_RELIABLE: u8 = 0x10;
    pub const LEDS_DISP_TEMP: u8 = 0x12;
    pub const LEDS_DISP_HUMD: u8 = 0x13;
    pub const LEDS_DISP_PRESS: u8 = 0x14;
    pub const LEDS_DISP_CO2: u8 = 0x15;
    pub const LEDS_DISP_IAQ: u8 = 0x16;
    pub const LEDS_DISP_BAT: u8 = 0x18;
    pub const LEDS_DISP_RSSI: u8 = 0x19;
    pub const CO2_ZERO_CALIB: u8 = 0x1B;
    pub const CO2_TARGET_CALIB: u8 = 0x1C;
    pub const PWMT_READ: u8 = 0x1D;
    pub const PWMT_START: u8 = 0x1E;
    pub const PWMT_STOP: u8 = 0x1F;
    pub const BLINK_START: u8 = 0x20;
    pub const BLINK_STOP: u8 = 0x21;
}

pub fn op_to_string(opcode: u8) -> &'static str {
    match opcode {
        op::CONF => "CONF",
        op::NRFTEMP => "NRFTEMP",
        op::BAT => "BAT",
        op::SET_BLUE_LED => "SET_BLUE_LED",
        op::REQ_DATETIME => "REQ_DATETIME",
        op::UPDATE => "UPDATE",
        op::SEND_NODES => "SEND_NODES",
        op::REBOOT => "REBOOT",
        op::NRFTEMP_START_IAQ => "NRFTEMP_START_IAQ",
        op::NRFTEMP_READ_IAQ => "NRFTEMP_READ_IAQ",
        op::NRFTEMP_STOP_IAQ => "NRFTEMP_STOP_IAQ",
        op::NRFTEMP_CO2 => "NRFTEMP_CO2",
        op::NRFTEMP_START_CO2 => "NRFTEMP_START_CO2",
        op::NRFTEMP_STOP_CO2 => "NRFTEMP_STOP_CO2",
        op::NRFTEMP_RELIABLE => "NRFTEMP_RELIABLE",
        op::LEDS_DISP_TEMP => "LEDS_DISP_TEMP",
        op::LEDS_DISP_HUMD => "LEDS_DISP_HUMD",
        op::LEDS_DISP_PRESS => "LEDS_DISP_PRESS",
        op::LEDS_DISP_CO2 => "LEDS_DISP_CO2",
        op::LEDS_DISP_IAQ => "LEDS_DISP_IAQ",
        op::LEDS_DISP_BAT => "LEDS_DISP_BAT",
        op::LEDS_DISP_RSSI => "LEDS_DISP_RSSI",
        op::CO2_ZERO_CALIB => "CO2_ZERO_CALIB",
        op::CO2_TARGET_CALIB => "CO2_TARGET_CALIB",
        op::PWMT_READ => "PWMT_READ",
        op::PWMT_START => "PWMT_START",
        op::PWMT_STOP => "PWMT_STOP",
        op::BLINK_START => "BLINK_START",
        op::BLINK_STOP => "BLINK_STOP",
        _ => "UNKNOWN_TASK",
    }
}

/// Device error codes carried in schedule acks (negative `task_index`).
pub fn ack_code_str(code: i8) -> &'static str {
    match code {
        0 => "TASK_SUCCESS",
        -1 => "TASK_ERR_INVALID_OP",
        -2 => "TASK_ERR_ARRAY_FULL",
        -3 => "TASK_ERR_ALRDY_SCHD",
        -4 => "TASK_ERR_INVALID_ID",
        -5 => "TASK_ERR_NOT_CONFIG",
        _ => "TASK_ERR_UNKNOWN",
    }
}

/// Transaction counter plus the per-node record of installed schedules.
pub(crate) struct TaskGwModel {
    tid: AtomicU8,
    node_tasks: Mutex<HashMap<String, Vec<String>>>,
}

impl TaskGwModel {
    pub(crate) fn new() -> Self {
        Self {
            tid: AtomicU8::new(0),
            node_tasks: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn next_tid(&self) -> u8 {
        let tid = self.tid.load(Ordering::Relaxed);
        self.tid
            .store(if tid < 100 { tid + 1 } else { 0 }, Ordering::Relaxed);
        tid
    }

    pub(crate) fn ensure_entry(&self, node: &Node) {
        self.node_tasks
            .lock()
            .entry(node.mac_hex())
            .or_default();
    }

    pub(crate) fn record_configured(&self, node: &Node, opcode: u8) {
        let mut tasks = self.node_tasks.lock();
        let entry = tasks.entry(node.mac_hex()).or_default();
        let name = op_to_string(opcode).to_owned();
        if !entry.contains(&name) {
            entry.push(name);
        }
    }

    pub(crate) fn remove_configured(&self, node: &Node, opcode: u8) {
        let mut tasks = self.node_tasks.lock();
        let entry = tasks.entry(node.mac_hex()).or_default();
        entry.retain(|t| t != op_to_string(opcode));
    }

    /// Names of schedules the gateway has confirmed on this node, or
    /// `None` if the node has never checked in.
    pub(crate) fn configured_tasks(&self, node: &Node) -> Option<Vec<String>> {
        self.node_tasks.lock().get(&node.mac_hex()).cloned()
    }
}

// ── Wire payloads ────────────────────────────────────────────

fn schedule_payload(inner: u8, opcode: u8, event_date: u32, period: u32) -> Vec<u8> {
    let mut msg = vendor_opcode(inner, MODEL_ID);
    msg.push(opcode);
    msg.extend_from_slice(&event_date.to_le_bytes());
    // Period is a 24-bit little-endian field.
    msg.extend_from_slice(&period.to_le_bytes()[..3]);
    msg
}

pub(crate) fn conf_msg(opcode: u8, event_date: u32, period: u32, clock: Clock) -> Vec<u8> {
    let inner = match clock {
        Clock::Monotonic => CONF_MONO,
        Clock::Realtime => CONF_REAL,
    };
    schedule_payload(inner, opcode, event_date, period)
}

pub(crate) fn change_msg(opcode: u8, event_date: u32, period: u32, clock: Clock) -> Vec<u8> {
    let inner = match clock {
        Clock::Monotonic => CHANGE_MONO,
        Clock::Realtime => CHANGE_REAL,
    };
    schedule_payload(inner, opcode, event_date, period)
}

pub(crate) fn delete_msg(index: u8, tid: u8) -> Vec<u8> {
    let mut msg = vendor_opcode(DELETE, MODEL_ID);
    msg.push(index);
    msg.push(tid);
    msg
}

pub(crate) fn delete_op_msg(opcode: u8, tid: u8) -> Vec<u8> {
    let mut msg = vendor_opcode(DELETE_OP, MODEL_ID);
    msg.push(opcode);
    msg.push(tid);
    msg
}

pub(crate) fn get_msg() -> Vec<u8> {
    vendor_opcode(GET, MODEL_ID)
}

// ── Operations ───────────────────────────────────────────────

pub(crate) fn new_task(
    core: &Arc<Core>,
    node: &Arc<Node>,
    opcode: u8,
    event_date: u32,
    period: u32,
    clock: Clock,
) {
    log::info!(
        "scheduled task {} ({opcode}) for node {}",
        op_to_string(opcode),
        node.mac_hex()
    );
    add_task(
        core,
        Task::new(
            Arc::clone(node),
            TaskKind::GwTaskNew {
                opcode,
                event_date,
                period,
                clock,
            },
        ),
    );
}

pub(crate) fn change_task(
    core: &Arc<Core>,
    node: &Arc<Node>,
    opcode: u8,
    event_date: u32,
    period: u32,
    clock: Clock,
) {
    log::info!(
        "scheduled task change {} ({opcode}) for node {}",
        op_to_string(opcode),
        node.mac_hex()
    );
    add_task(
        core,
        Task::new(
            Arc::clone(node),
            TaskKind::GwTaskChange {
                opcode,
                event_date,
                period,
                clock,
            },
        ),
    );
}

pub(crate) fn delete_task(core: &Arc<Core>, node: &Arc<Node>, index: u8) {
    let tid = core.task_gw.next_tid();
    log::info!(
        "scheduled deleting task index {index} for node {}",
        node.mac_hex()
    );
    add_task(
        core,
        Task::new(Arc::clone(node), TaskKind::GwTaskDelete { index, tid }),
    );
}

pub(crate) fn delete_task_op(core: &Arc<Core>, node: &Arc<Node>, opcode: u8) {
    let tid = core.task_gw.next_tid();
    log::info!(
        "scheduled deleting task {} ({opcode}) for node {}",
        op_to_string(opcode),
        node.mac_hex()
    );
    add_task(
        core,
        Task::new(Arc::clone(node), TaskKind::GwTaskDeleteOp { opcode, tid }),
    );
}

pub(crate) fn get_tasks(core: &Arc<Core>, node: &Arc<Node>) {
    log::info!("scheduled task listing for node {}", node.mac_hex());
    add_task(core, Task::new(Arc::clone(node), TaskKind::GwTaskGet));
}

/// Update a telemetry rate in place.
pub(crate) fn set_rate(core: &Arc<Core>, node: &Arc<Node>, opcode: u8, rate: u32) {
    change_task(core, node, opcode, unix_now() as u32, rate, Clock::Monotonic);
}

/// Legacy firmware cannot change a schedule: delete it and install anew.
pub(crate) fn set_rate_legacy(core: &Arc<Core>, node: &Arc<Node>, opcode: u8, rate: u32) {
    delete_task_op(core, node, opcode);
    new_task(core, node, opcode, unix_now() as u32, rate, Clock::Monotonic);
}

/// Point the node's sleep schedule at the gateway-wide sleep time.
pub(crate) fn set_sleep_time(core: &Arc<Core>, node: &Arc<Node>) {
    let sleep_time = core.wake.sleep_time();
    let first_awake = unix_now() as u32 + sleep_time;
    change_task(core, node, op::CONF, first_awake, sleep_time, Clock::Monotonic);
}

/// Legacy sleep-schedule update; the delete is skipped on a node's very
/// first configuration, which has no schedule to delete yet.
pub(crate) fn set_sleep_time_legacy(core: &Arc<Core>, node: &Arc<Node>, first_time: bool) {
    if !first_time {
        delete_task_op(core, node, op::CONF);
    }
    let sleep_time = core.wake.sleep_time();
    let first_awake = unix_now() as u32 + sleep_time;
    new_task(core, node, op::CONF, first_awake, sleep_time, Clock::Monotonic);
}

// ── Event handling (bus worker) ──────────────────────────────

pub(crate) fn handle_event(core: &Arc<Core>, event: &crate::events::Event) {
    use crate::events::{Event, ModelBody};
    let Event::Model(ev) = event else { return };
    match &ev.body {
        ModelBody::TaskAck { task_index, tid } => {
            if *task_index >= 0 {
                log::debug!("task conf ack, tid: {tid}, index: {task_index}");
            } else {
                log::debug!(
                    "task conf ack, tid: {tid}, error: {}",
                    ack_code_str(*task_index)
                );
            }
        }
        ModelBody::TaskDeleteAck { code, tid } => {
            log::debug!("task delete ack, tid: {tid}, code: {}", ack_code_str(*code));
        }
        ModelBody::TaskDeleteOpAck { code, tid } => {
            log::debug!(
                "task delete-op ack, tid: {tid}, code: {}",
                ack_code_str(*code)
            );
        }
        ModelBody::TaskData {
            opcode,
            event_date,
            period,
        } => {
            log::debug!(
                "task listed: op {opcode} ({}), event date {event_date}, period {period}",
                op_to_string(*opcode)
            );
        }
        ModelBody::WakeReset { .. } => {
            if let Some(node) = &ev.node {
                core.task_gw.ensure_entry(node);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_payload_is_24_bit_period() {
        let msg = conf_msg(op::NRFTEMP, 1_700_000_000, 600, Clock::Monotonic);
        assert_eq!(msg[0], CONF_MONO);
        assert_eq!(&msg[1..3], &MODEL_ID.to_le_bytes());
        assert_eq!(msg[3], op::NRFTEMP);
        assert_eq!(&msg[4..8], &1_700_000_000_u32.to_le_bytes());
        assert_eq!(&msg[8..11], &600_u32.to_le_bytes()[..3]);
        assert_eq!(msg.len(), 11);
    }

    #[test]
    fn op_names() {
        assert_eq!(op_to_string(op::CONF), "CONF");
        assert_eq!(op_to_string(0x7F), "UNKNOWN_TASK");
        assert_eq!(ack_code_str(-3), "TASK_ERR_ALRDY_SCHD");
    }

    #[test]
    fn configured_task_bookkeeping() {
        let model = TaskGwModel::new();
        let node = crate::node::Node::new([1; 6], [0; 16]);

        assert!(model.configured_tasks(&node).is_none());
        model.record_configured(&node, op::NRFTEMP);
        model.record_configured(&node, op::NRFTEMP);
        assert_eq!(model.configured_tasks(&node).unwrap(), vec!["NRFTEMP"]);

        model.remove_configured(&node, op::NRFTEMP);
        assert!(model.configured_tasks(&node).unwrap().is_empty());
    }
}
