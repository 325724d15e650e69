//! The unit of work targeted at one node.
//!
//! A [`Task`] transmits one model request and waits for events. Its
//! kind declares which event kinds complete it, which restart it, the
//! per-attempt timeout, and whether retries are bounded. Model tasks
//! give up after [`MAX_RETRIES`] attempts and let the queue reschedule
//! the node; the wake/sleep primers and the node reset retry for as
//! long as the node keeps answering with wake notifies, because those
//! exchanges are the queue's own pacing mechanism.

use std::sync::Arc;
use std::time::Duration;

use crate::events::timer::{self, TimerHandle};
use crate::events::{Event, EventKind, ModelBody};
use crate::gateway::Core;
use crate::models::light::Rgb;
use crate::models::{
    beacon, config_client, datetime, hwm, light, nrf_temp, ota, output, power, pwmt, rssi,
    task_gw, tap, unix_now, wake_up,
};
use crate::node::Node;

/// Retry budget for model tasks; the initial attempt counts.
pub const MAX_RETRIES: u8 = 4;

/// Clock base for node schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Clock {
    Monotonic,
    Realtime,
}

/// Outcome of feeding one event to the queue head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskStatus {
    /// Event did not complete the task; it stays at the head.
    NotMatched,
    /// Success event consumed; pop and advance.
    Completed,
    /// Retries exhausted; the node needs rescheduling.
    Failed,
}

/// What a task does, with its per-kind parameters.
#[derive(Debug, Clone)]
pub(crate) enum TaskKind {
    // Queue primers and terminals
    Wake,
    Sleep,
    Alive,
    NodeReset,

    // NrfTemp
    ChangeIa { status: u8, max_skip: u8 },
    ChangeTempConfig { mode: u8 },
    ChangeCalibration { temp_offset: f32, humd_offset: i8, press_offset: i32 },
    ResetCalibration { temp: i16, humd: i8, press: i32 },

    // Tap / Light / Power / Output
    ChangeAccel { state: u8 },
    ChangeLed { color: Rgb, blink: bool, repeat: u16 },
    ChangePower { radio_power: u8, dcdc_mode: u8 },
    DacOutput { value: f32 },
    DigOutput { status: u8 },

    // Datetime / Hwm / Rssi
    SendDatetime,
    GetSelftest,
    GetNeighborRssi,
    GetStatusRssi,
    Ping,

    // TaskGw
    GwTaskNew { opcode: u8, event_date: u32, period: u32, clock: Clock },
    GwTaskChange { opcode: u8, event_date: u32, period: u32, clock: Clock },
    GwTaskDelete { index: u8, tid: u8 },
    GwTaskDeleteOp { opcode: u8, tid: u8 },
    GwTaskGet,

    // Beacon
    BeaconStart { period_ms: u16, tid: u8 },
    BeaconStop { tid: u8 },

    // Ota
    OtaNotify {
        update_type: u8,
        major: u8,
        minor: u8,
        fix: u8,
        sd_version: u16,
        size: u32,
        reboot_time: u32,
    },
    OtaStatus,
    OtaStore { size: u32, reboot_time: u32 },
    OtaRelay { reboot_time: u32 },

    // Pwmt
    PwmtConfig { phases: u8, stats: u8, values_ph: u8, values_tot: u8 },
    PwmtConv { kv: u32, ki: u32 },
}

use EventKind as K;

impl TaskKind {
    pub(crate) fn success_events(&self) -> &'static [EventKind] {
        match self {
            Self::Wake => &[K::WakeAckWait],
            Self::Sleep => &[K::WakeAckSleep, K::TaskTimeout],
            Self::Alive => &[K::WakeAckAlive, K::TaskTimeout],
            Self::NodeReset => &[K::NodeReset, K::TaskTimeout],
            Self::ChangeIa { .. } => &[K::IaAck],
            Self::ChangeTempConfig { .. } => &[K::TempConfigAck],
            Self::ChangeCalibration { .. } => &[K::TempCalibAck],
            Self::ResetCalibration { .. } => &[K::TempCalResetAck],
            Self::ChangeAccel { .. } => &[K::TapAckConf],
            Self::ChangeLed { .. } => &[K::LightAck],
            Self::ChangePower { .. } => &[K::PowerAck],
            Self::DacOutput { .. } => &[K::OutputDacAck],
            Self::DigOutput { .. } => &[K::OutputDigAck],
            Self::SendDatetime => &[K::DatetimeAck],
            Self::GetSelftest => &[K::HwmAck],
            Self::GetNeighborRssi => &[K::RssiNeighborAck],
            Self::GetStatusRssi => &[K::RssiStatusAck],
            Self::Ping => &[K::RssiPingAck],
            Self::GwTaskNew { .. } => &[K::TaskAck],
            Self::GwTaskChange { .. } => &[K::TaskChangeAck],
            Self::GwTaskDelete { .. } => &[K::TaskDeleteAck],
            Self::GwTaskDeleteOp { .. } => &[K::TaskDeleteOpAck],
            Self::GwTaskGet => &[K::TaskGetTasksAck],
            Self::BeaconStart { .. } => &[K::BeaconStartAck],
            Self::BeaconStop { .. } => &[K::BeaconStopAck],
            Self::OtaNotify { .. } => &[K::OtaVersionAck],
            Self::OtaStatus => &[K::OtaStatusAck],
            Self::OtaStore { .. } => &[K::OtaStoreAck],
            Self::OtaRelay { .. } => &[K::OtaRelayAck],
            Self::PwmtConfig { .. } => &[K::PwmtConfigAck],
            Self::PwmtConv { .. } => &[K::PwmtConvAck],
        }
    }

    pub(crate) fn error_events(&self) -> &'static [EventKind] {
        match self {
            Self::Wake | Self::Sleep | Self::Alive | Self::NodeReset => &[K::WakeNotify],
            _ => &[K::TaskTimeout],
        }
    }

    /// Per-attempt timeout; the wake primer has none — it waits for the
    /// node's next wake broadcast.
    fn timeout(&self) -> Option<Duration> {
        match self {
            Self::Wake => None,
            Self::Sleep | Self::Alive | Self::NodeReset => Some(Duration::from_millis(10_500)),
            Self::GetSelftest | Self::GetNeighborRssi | Self::GetStatusRssi | Self::Ping => {
                Some(Duration::from_secs(10))
            }
            Self::GwTaskNew { .. }
            | Self::GwTaskChange { .. }
            | Self::GwTaskDelete { .. }
            | Self::GwTaskDeleteOp { .. }
            | Self::GwTaskGet => Some(Duration::from_secs(6)),
            _ => Some(Duration::from_millis(2_500)),
        }
    }

    /// Primers retry as long as the node keeps waking.
    fn unbounded_retry(&self) -> bool {
        matches!(
            self,
            Self::Wake | Self::Sleep | Self::Alive | Self::NodeReset
        )
    }

    /// Completing a terminal task dissolves the queue and any
    /// configuration session.
    pub(crate) fn is_terminal(&self) -> bool {
        matches!(self, Self::Sleep | Self::Alive | Self::NodeReset)
    }

    /// Primers are queue plumbing, not user work; they are not carried
    /// over when pending tasks are re-queued.
    pub(crate) fn is_primer(&self) -> bool {
        matches!(self, Self::Wake | Self::Sleep)
    }
}

pub(crate) struct Task {
    pub(crate) node: Arc<Node>,
    pub(crate) kind: TaskKind,
    retries: u8,
    timeout: Option<TimerHandle>,
}

impl Task {
    pub(crate) fn new(node: Arc<Node>, kind: TaskKind) -> Self {
        Self {
            node,
            kind,
            retries: 0,
            timeout: None,
        }
    }

    /// Display name for pending-task listings.
    pub(crate) fn name(&self) -> String {
        match &self.kind {
            TaskKind::Wake => "Wake".into(),
            TaskKind::Sleep => "Sleep".into(),
            TaskKind::Alive => "Alive".into(),
            TaskKind::NodeReset => "Reset".into(),
            TaskKind::ChangeIa { .. } => "ChangeIa".into(),
            TaskKind::ChangeTempConfig { .. } => "ChangeConfig".into(),
            TaskKind::ChangeCalibration { .. } => "ChangeCalibration".into(),
            TaskKind::ResetCalibration { .. } => "ResetCalibration".into(),
            TaskKind::ChangeAccel { .. } => "ChangeAccel".into(),
            TaskKind::ChangeLed { .. } => "ChangeLedState".into(),
            TaskKind::ChangePower { .. } => "ChangePower".into(),
            TaskKind::DacOutput { .. } => "ChangeDacOutput".into(),
            TaskKind::DigOutput { .. } => "ChangeDigOutput".into(),
            TaskKind::SendDatetime => "SendDatetime".into(),
            TaskKind::GetSelftest => "GetSelftest".into(),
            TaskKind::GetNeighborRssi => "GetNeighbrRssi".into(),
            TaskKind::GetStatusRssi => "GetStatusRssi".into(),
            TaskKind::Ping => "PingToNodeRssi".into(),
            TaskKind::GwTaskNew { opcode, .. } => {
                format!("NewTaskGw-{}", task_gw::op_to_string(*opcode))
            }
            TaskKind::GwTaskChange { opcode, .. } => {
                format!("ChangeTaskGw-{}", task_gw::op_to_string(*opcode))
            }
            TaskKind::GwTaskDelete { .. } => "DeleteTaskGw".into(),
            TaskKind::GwTaskDeleteOp { opcode, .. } => {
                format!("DeleteTaskOpGw-{}", task_gw::op_to_string(*opcode))
            }
            TaskKind::GwTaskGet => "GetTasksGw".into(),
            TaskKind::BeaconStart { .. } => "StartBeacon".into(),
            TaskKind::BeaconStop { .. } => "StopBeacon".into(),
            TaskKind::OtaNotify { .. } => "OtaUpdateNotify".into(),
            TaskKind::OtaStatus => "OtaStatus".into(),
            TaskKind::OtaStore { .. } => "OtaStoreUpdate".into(),
            TaskKind::OtaRelay { .. } => "OtaRelayUpdate".into(),
            TaskKind::PwmtConfig { .. } => "ConfigPwmt".into(),
            TaskKind::PwmtConv { .. } => "ConversionPwmt".into(),
        }
    }

    #[cfg(test)]
    pub(crate) fn attempts(&self) -> u8 {
        self.retries
    }

    /// Transmit the request and arm the attempt timeout.
    pub(crate) fn execute(&mut self, core: &Arc<Core>) {
        let node = &self.node;
        match &self.kind {
            TaskKind::Wake => wake_up::send_wait(core, node),
            TaskKind::Sleep => wake_up::send_sleep(core, node, true),
            TaskKind::Alive => wake_up::send_alive(core, node, true),
            TaskKind::NodeReset => {
                log::debug!("resetting node {}", node.mac_hex());
                core.tx
                    .send_node(core, config_client::reset_msg(), Arc::clone(node));
            }

            TaskKind::ChangeIa { status, max_skip } => {
                core.tx
                    .send_node(core, nrf_temp::ia_msg(*status, *max_skip), Arc::clone(node));
            }
            TaskKind::ChangeTempConfig { mode } => {
                core.tx
                    .send_node(core, nrf_temp::config_msg(*mode), Arc::clone(node));
            }
            TaskKind::ChangeCalibration {
                temp_offset,
                humd_offset,
                press_offset,
            } => {
                core.tx.send_node(
                    core,
                    nrf_temp::calibrate_msg(*temp_offset, *humd_offset, *press_offset),
                    Arc::clone(node),
                );
            }
            TaskKind::ResetCalibration { temp, humd, press } => {
                core.tx.send_node(
                    core,
                    nrf_temp::cal_reset_msg(*temp, *humd, *press),
                    Arc::clone(node),
                );
            }

            TaskKind::ChangeAccel { state } => {
                core.tx.send_node(core, tap::state_msg(*state), Arc::clone(node));
            }
            TaskKind::ChangeLed {
                color,
                blink,
                repeat,
            } => {
                let msg = if *blink {
                    light::blink_msg(*color, *repeat)
                } else {
                    light::light_msg(*color)
                };
                core.tx.send_node(core, msg, Arc::clone(node));
            }
            TaskKind::ChangePower {
                radio_power,
                dcdc_mode,
            } => {
                core.tx.send_node(
                    core,
                    power::power_msg(*radio_power, *dcdc_mode),
                    Arc::clone(node),
                );
            }
            TaskKind::DacOutput { value } => {
                core.tx.send_node(core, output::dac_msg(*value), Arc::clone(node));
            }
            TaskKind::DigOutput { status } => {
                core.tx.send_node(core, output::dig_msg(*status), Arc::clone(node));
            }

            TaskKind::SendDatetime => {
                core.tx.send_node(
                    core,
                    datetime::datetime_msg(unix_now() as u32),
                    Arc::clone(node),
                );
            }
            TaskKind::GetSelftest => {
                core.tx.send_node(core, hwm::selftest_msg(), Arc::clone(node));
            }
            TaskKind::GetNeighborRssi => {
                core.tx
                    .send_node(core, rssi::neighbor_req_msg(), Arc::clone(node));
            }
            TaskKind::GetStatusRssi => {
                core.tx.send_node(core, rssi::status_req_msg(), Arc::clone(node));
            }
            TaskKind::Ping => {
                log::info!("ping to node {}", node.mac_hex());
                core.tx.send_node(core, rssi::ping_msg(), Arc::clone(node));
            }

            TaskKind::GwTaskNew {
                opcode,
                event_date,
                period,
                clock,
            } => {
                core.tx.send_node(
                    core,
                    task_gw::conf_msg(*opcode, *event_date, *period, *clock),
                    Arc::clone(node),
                );
            }
            TaskKind::GwTaskChange {
                opcode,
                event_date,
                period,
                clock,
            } => {
                core.tx.send_node(
                    core,
                    task_gw::change_msg(*opcode, *event_date, *period, *clock),
                    Arc::clone(node),
                );
            }
            TaskKind::GwTaskDelete { index, tid } => {
                core.tx
                    .send_node(core, task_gw::delete_msg(*index, *tid), Arc::clone(node));
            }
            TaskKind::GwTaskDeleteOp { opcode, tid } => {
                core.tx
                    .send_node(core, task_gw::delete_op_msg(*opcode, *tid), Arc::clone(node));
            }
            TaskKind::GwTaskGet => {
                core.tx.send_node(core, task_gw::get_msg(), Arc::clone(node));
            }

            TaskKind::BeaconStart { period_ms, tid } => {
                core.tx
                    .send_node(core, beacon::start_msg(*period_ms, *tid), Arc::clone(node));
            }
            TaskKind::BeaconStop { tid } => {
                core.tx.send_node(core, beacon::stop_msg(*tid), Arc::clone(node));
            }

            TaskKind::OtaNotify {
                update_type,
                major,
                minor,
                fix,
                sd_version,
                size,
                ..
            } => {
                core.tx.send_node(
                    core,
                    ota::notify_msg(*update_type, *major, *minor, *fix, *sd_version, *size),
                    Arc::clone(node),
                );
            }
            TaskKind::OtaStatus => {
                core.tx.send_node(core, ota::status_msg(), Arc::clone(node));
            }
            TaskKind::OtaStore { size, .. } => {
                core.tx.send_node(core, ota::store_msg(*size), Arc::clone(node));
            }
            TaskKind::OtaRelay { .. } => {
                core.tx.send_node(core, ota::relay_msg(), Arc::clone(node));
            }

            TaskKind::PwmtConfig {
                phases,
                stats,
                values_ph,
                values_tot,
            } => {
                core.tx.send_node(
                    core,
                    pwmt::conf_msg(*phases, *stats, *values_ph, *values_tot),
                    Arc::clone(node),
                );
            }
            TaskKind::PwmtConv { kv, ki } => {
                core.tx.send_node(core, pwmt::conv_msg(*kv, *ki), Arc::clone(node));
            }
        }

        if let Some(delay) = self.kind.timeout() {
            self.timeout = Some(timer::schedule(
                core.bus.sender(),
                delay,
                Event::TaskTimeout {
                    node: Arc::clone(node),
                },
            ));
        }
        if !self.kind.unbounded_retry() {
            self.retries += 1;
        }
    }

    fn cancel_timeout(&mut self) {
        if let Some(timer) = self.timeout.take() {
            timer.cancel();
        }
    }

    /// Feed an event to the task. Called only for the queue head, under
    /// the queue lock.
    pub(crate) fn handle(&mut self, core: &Arc<Core>, event: &Event) -> TaskStatus {
        let kind = event.kind();
        if self.kind.success_events().contains(&kind) {
            self.cancel_timeout();
            self.on_success(core, event);
            return TaskStatus::Completed;
        }
        if self.kind.error_events().contains(&kind) {
            self.cancel_timeout();
            if self.kind.unbounded_retry() || self.retries < MAX_RETRIES {
                self.execute(core);
            } else {
                log::info!(
                    "max retries for {}, node {}",
                    self.name(),
                    self.node.mac_hex()
                );
                return TaskStatus::Failed;
            }
        }
        TaskStatus::NotMatched
    }

    fn on_success(&self, core: &Arc<Core>, event: &Event) {
        let node = &self.node;
        match &self.kind {
            TaskKind::Wake => log::info!("node {} awake", node.mac_hex()),
            TaskKind::Sleep => {
                node.set_sleep_timestamp(unix_now());
                log::debug!(
                    "node {} sleeping {} seconds",
                    node.mac_hex(),
                    core.wake.sleep_time()
                );
            }
            TaskKind::Alive => log::debug!("node {} alive", node.mac_hex()),
            TaskKind::NodeReset => {
                log::info!("node {} reset and removed from database", node.mac_hex());
                core.replay.lock().remove_node(node.unicast_addr());
                core.db.remove_node(node);
            }

            TaskKind::GwTaskNew { opcode, period, .. }
            | TaskKind::GwTaskChange { opcode, period, .. } => {
                self.on_schedule_ack(core, event, *opcode, *period);
            }
            TaskKind::GwTaskDeleteOp { opcode, .. } => {
                log::info!("delete task ack for node {} received", node.mac_hex());
                core.task_gw.remove_configured(node, *opcode);
            }
            TaskKind::GwTaskDelete { .. } => {
                log::info!("delete task ack for node {} received", node.mac_hex());
            }
            TaskKind::GwTaskGet => {
                log::info!("task listing for node {} done", node.mac_hex());
            }

            TaskKind::OtaNotify { reboot_time, .. } => {
                if let Some(status) = ota_status(event) {
                    log::info!("node {} version rsp: {status}", node.mac_hex());
                    if status == 0 {
                        ota::update_task(core, node, *reboot_time);
                        core.ota.push_pending(node);
                    }
                }
            }
            TaskKind::OtaStore { reboot_time, .. } | TaskKind::OtaRelay { reboot_time } => {
                if let Some(status) = ota_status(event) {
                    log::info!("node {} update rsp: {status}", node.mac_hex());
                    if status == 0 {
                        ota::update_task(core, node, *reboot_time);
                    }
                }
            }
            TaskKind::OtaStatus => {
                if let Some(status) = ota_status(event) {
                    log::info!("ota status of node {}: {status}", node.mac_hex());
                }
            }

            _ => log::info!("{} for node {} succeeded", self.name(), node.mac_hex()),
        }
    }

    /// Shared ack bookkeeping for install and change schedules: the
    /// sleep schedule's period is the node's sleep period, and every
    /// confirmed periodic schedule lands in the configured-task record.
    fn on_schedule_ack(&self, core: &Arc<Core>, event: &Event, opcode: u8, period: u32) {
        let node = &self.node;
        if opcode == task_gw::op::CONF {
            node.set_sleep_period(period);
            core.db.store_node(node);
        }
        log::info!(
            "task {} ({opcode}) ack for node {} received",
            task_gw::op_to_string(opcode),
            node.mac_hex()
        );

        let task_index = match event {
            Event::Model(ev) => match ev.body {
                ModelBody::TaskAck { task_index, .. }
                | ModelBody::TaskChangeAck { task_index, .. } => Some(task_index),
                _ => None,
            },
            _ => None,
        };
        core.task_gw.ensure_entry(node);
        if let Some(idx) = task_index {
            // Already-scheduled (-3) still counts as configured.
            if (idx >= 0 || idx == -3) && period != 0 {
                core.task_gw.record_configured(node, opcode);
            }
        }
    }
}

fn ota_status(event: &Event) -> Option<u8> {
    match event {
        Event::Model(ev) => match ev.body {
            ModelBody::OtaVersionAck { status }
            | ModelBody::OtaStatusAck { status }
            | ModelBody::OtaStoreAck { status }
            | ModelBody::OtaRelayAck { status } => Some(status),
            _ => None,
        },
        _ => None,
    }
}
