//! The gateway: owning root and public API.
//!
//! [`Core`] owns every component by value; components never hold
//! back-references to each other and instead receive `&Core` (or
//! `&Arc<Core>`) at call time. Event fan-out goes through the bus with
//! handlers that hold a `Weak<Core>`, so dropping the [`Gateway`] tears
//! the whole object graph down.
//!
//! Threads: the bus worker (handler dispatch), the event parser (link
//! bytes → events), the transmit dispatcher, plus a short-lived
//! device-config thread per device reset and one thread per armed
//! timer.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::{Config, ConfigCallback, ConfigMode, Platform};
use crate::database::NodeDatabase;
use crate::device::DeviceManager;
use crate::error::Result;
use crate::events::bus::EventBus;
use crate::events::replay::ReplayCache;
use crate::events::{parser, Event};
use crate::link::serial::SerialLink;
use crate::link::socket::SocketLink;
use crate::link::Link;
use crate::models::beacon::BeaconModel;
use crate::models::ota::OtaModel;
use crate::models::queue::TaskQueue;
use crate::models::task_gw::TaskGwModel;
use crate::models::transport::TransportModel;
use crate::models::wake_up::WakeUpModel;
use crate::models::{
    beacon, config_client, datetime, hwm, light, nrf_temp, ota, output, power, pwmt, rssi,
    task_gw, tap, transport,
};
use crate::models::task::Clock;
use crate::models::unix_now;
use crate::node::Node;
use crate::provisioning::engine::ProvEngine;
use crate::tx::TxManager;
use crate::whitelist::Whitelist;

/// Shared state of a running gateway.
pub(crate) struct Core {
    pub(crate) db: Arc<dyn NodeDatabase>,
    pub(crate) link: Arc<dyn Link>,
    pub(crate) bus: EventBus,
    pub(crate) replay: Mutex<ReplayCache>,
    pub(crate) whitelist: Whitelist,
    pub(crate) device: DeviceManager,
    pub(crate) tx: TxManager,
    pub(crate) prov: ProvEngine,
    pub(crate) queue: TaskQueue,

    pub(crate) wake: WakeUpModel,
    pub(crate) task_gw: TaskGwModel,
    pub(crate) beacon: BeaconModel,
    pub(crate) ota: OtaModel,
    pub(crate) transport: TransportModel,

    pub(crate) config_cb: Option<ConfigCallback>,
    pub(crate) config_mode: ConfigMode,
    prov_mode: bool,
    remote: bool,
    listener: AtomicBool,
    running: AtomicBool,

    pub(crate) workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Core {
    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub(crate) fn is_listener(&self) -> bool {
        self.listener.load(Ordering::Relaxed)
    }

    pub(crate) fn is_provisioner_mode(&self) -> bool {
        self.prov_mode
    }
}

/// Snapshot of gateway and mesh state.
#[derive(Debug, Clone)]
pub struct GatewayStatus {
    pub lib_version: &'static str,
    pub scanning: bool,
    pub provisioning: bool,
    pub nodes: usize,
    pub listener: bool,
    /// Device replay-cache capacity — the provisionable node budget.
    pub max_nodes: u16,
    pub unicast_addr: u16,
    pub netkey: String,
}

/// Handle to a running gateway. Cheap to clone; `close` stops the
/// worker threads and the device.
#[derive(Clone)]
pub struct Gateway {
    core: Arc<Core>,
}

impl Gateway {
    /// Bring up the link, the worker threads and the device.
    ///
    /// Blocks until the device has acknowledged its reset (except on
    /// the cloud platform, where the remote passthrough resets it).
    pub fn init(config: Config) -> Result<Self> {
        let link: Arc<dyn Link> = if config.platform.is_remote() {
            Arc::new(SocketLink::connect(&config.port)?)
        } else {
            Arc::new(SerialLink::open(&config.port)?)
        };

        let core = Arc::new(Core {
            db: Arc::clone(&config.node_db),
            link,
            bus: EventBus::new(),
            replay: Mutex::new(ReplayCache::new()),
            whitelist: Whitelist::new(),
            device: DeviceManager::new(config.seq_number_file.clone()),
            tx: TxManager::new(),
            prov: ProvEngine::new(),
            queue: TaskQueue::new(),
            wake: WakeUpModel::new(),
            task_gw: TaskGwModel::new(),
            beacon: BeaconModel::new(),
            ota: OtaModel::new(),
            transport: TransportModel::new(),
            config_cb: config.config_cb.clone(),
            config_mode: config.config_mode,
            prov_mode: config.prov_mode,
            remote: config.platform == Platform::Cloud,
            listener: AtomicBool::new(false),
            running: AtomicBool::new(true),
            workers: Mutex::new(Vec::new()),
        });

        register_handlers(&core);
        spawn_workers(&core);

        if !core.remote {
            core.device.start_device(&core)?;
        }

        Ok(Self { core })
    }

    pub(crate) fn from_core(core: Arc<Core>) -> Self {
        Self { core }
    }

    /// Stop the device and the background threads. Call before exiting
    /// to keep the serial stream in sync.
    pub fn close(&self) {
        if self.core.device.is_started() {
            self.stop_scan();
            if !self.core.remote {
                self.core.device.stop_device(&self.core);
            }
        }
        self.core.running.store(false, Ordering::Relaxed);
        self.core.link.stop();

        let workers: Vec<_> = self.core.workers.lock().drain(..).collect();
        for handle in workers {
            let _ = handle.join();
        }
    }

    /// Reset the microcontroller and wait for it to come back.
    pub fn reset(&self) -> Result<()> {
        self.core.device.start_device(&self.core)
    }

    /// Echo-probe the link.
    pub fn check_connection(&self) -> bool {
        self.core.device.check_connection(&self.core)
    }

    // ── Event subscription ────────────────────────────────────

    /// Register a named handler for every event the library produces.
    /// Adding the same name twice is a no-op.
    pub fn add_event_handler(
        &self,
        name: &str,
        handler: impl Fn(&Event) + Send + Sync + 'static,
    ) {
        self.core.bus.add_handler(
            name,
            Arc::new(move |ev| {
                handler(ev);
                Ok(())
            }),
        );
    }

    pub fn remove_event_handler(&self, name: &str) {
        self.core.bus.remove_handler(name);
    }

    // ── Status and modes ──────────────────────────────────────

    pub fn get_status(&self) -> GatewayStatus {
        GatewayStatus {
            lib_version: env!("CARGO_PKG_VERSION"),
            scanning: self.core.prov.is_scanning(),
            provisioning: self.core.prov.is_provisioning(),
            nodes: self.core.db.get_nodes().len(),
            listener: self.core.is_listener(),
            max_nodes: self.core.device.cache_size(),
            unicast_addr: self.core.db.get_address(),
            netkey: hex::encode(self.core.db.get_netkey()),
        }
    }

    /// Listener mode: observe the mesh without ever transmitting, for
    /// multi-gateway deployments.
    pub fn set_listener(&self, on: bool) {
        self.core.listener.store(on, Ordering::Relaxed);
    }

    pub fn is_listener(&self) -> bool {
        self.core.is_listener()
    }

    pub fn is_provisioner_mode(&self) -> bool {
        self.core.is_provisioner_mode()
    }

    pub fn config_mode(&self) -> ConfigMode {
        self.core.config_mode
    }

    /// Default sleep time applied to nodes after configuration; zero
    /// keeps nodes awake.
    pub fn get_sleep_time(&self) -> u32 {
        self.core.wake.sleep_time()
    }

    pub fn set_sleep_time(&self, secs: u32) {
        self.core.wake.set_sleep_time(secs);
    }

    // ── Provisioning ──────────────────────────────────────────

    /// Start detection of unprovisioned nodes. Devices passing any of
    /// the UUID/MAC hex-prefix filters are provisioned automatically,
    /// one at a time; empty filter lists admit nothing. A zero timeout
    /// scans until [`Gateway::stop_scan`]; `one` stops after the first
    /// successful enrolment.
    pub fn start_scan(
        &self,
        uuid_filters: Vec<String>,
        mac_filters: Vec<String>,
        timeout: Duration,
        one: bool,
    ) {
        self.core
            .prov
            .start_scan(&self.core, uuid_filters, mac_filters, timeout, one);
    }

    pub fn stop_scan(&self) {
        self.core.prov.stop_scan(&self.core);
    }

    /// Reset a node out of the mesh. The node must be awake; on ack it
    /// is removed from the database.
    pub fn reset_node(&self, node: &Arc<Node>) {
        config_client::reset_node(&self.core, node);
    }

    // ── Inter-gateway transport ───────────────────────────────

    /// Send opaque bytes to another gateway.
    pub fn send_msg(&self, unicast_addr: u16, msg: &[u8]) -> Result<()> {
        transport::send_msg(&self.core, unicast_addr, msg)
    }

    // ── Task queue ────────────────────────────────────────────

    /// Names of tasks queued for the node.
    pub fn get_pending_tasks(&self, node: &Node) -> Vec<String> {
        self.core.queue.pending_task_names(node)
    }

    pub fn cancel_tasks(&self, node: &Node) {
        self.core.queue.cancel_tasks(node);
    }

    // ── Model operations ──────────────────────────────────────

    pub fn get_neighbor_rssi(&self, node: &Arc<Node>) {
        rssi::get_neighbor_rssi(&self.core, node);
    }

    pub fn get_status_rssi(&self, node: &Arc<Node>) {
        rssi::get_status_rssi(&self.core, node);
    }

    pub fn ping_node(&self, node: &Arc<Node>) {
        rssi::ping_node(&self.core, node);
    }

    pub fn get_node_selftest(&self, node: &Arc<Node>) {
        hwm::get_selftest(&self.core, node);
    }

    pub fn get_node_ota_status(&self, node: &Arc<Node>) {
        ota::status(&self.core, node);
    }

    /// Temperature reporting rate, seconds.
    pub fn set_rate(&self, node: &Arc<Node>, rate: u32) {
        nrf_temp::set_rate(&self.core, node, rate);
    }

    pub fn set_rate_legacy(&self, node: &Arc<Node>, rate: u32) {
        nrf_temp::set_rate_legacy(&self.core, node, rate);
    }

    /// On-node inference gating: `status` 0/1, with up to `max_skip`
    /// suppressed reports.
    pub fn set_ia(&self, node: &Arc<Node>, status: u8, max_skip: u8) -> Result<()> {
        nrf_temp::set_ia(&self.core, node, status, max_skip)
    }

    /// SHT4x sampling mode.
    pub fn set_temp_mode(&self, node: &Arc<Node>, mode: u8) -> Result<()> {
        nrf_temp::set_configuration(&self.core, node, mode)
    }

    /// Sensor calibration offsets: °C, %RH, hPa.
    pub fn set_calibration(
        &self,
        node: &Arc<Node>,
        temp_offset: f32,
        humd_offset: i8,
        press_offset: i32,
    ) {
        nrf_temp::set_calibration(&self.core, node, temp_offset, humd_offset, press_offset);
    }

    pub fn reset_calibration(&self, node: &Arc<Node>, temp: i16, humd: i8, press: i32) {
        nrf_temp::reset_calibration(&self.core, node, temp, humd, press);
    }

    pub fn set_iaq_rate(&self, node: &Arc<Node>, rate: u32) {
        nrf_temp::set_iaq_rate(&self.core, node, rate);
    }

    pub fn set_iaq_rate_legacy(&self, node: &Arc<Node>, rate: u32) {
        nrf_temp::set_iaq_rate_legacy(&self.core, node, rate);
    }

    pub fn set_co2_rate(&self, node: &Arc<Node>, rate: u32) {
        nrf_temp::set_co2_rate(&self.core, node, rate);
    }

    pub fn set_co2_rate_legacy(&self, node: &Arc<Node>, rate: u32) {
        nrf_temp::set_co2_rate_legacy(&self.core, node, rate);
    }

    pub fn set_pwmt_rate(&self, node: &Arc<Node>, rate: u32) {
        pwmt::set_pwmt_rate(&self.core, node, rate);
    }

    pub fn set_pwmt_rate_legacy(&self, node: &Arc<Node>, rate: u32) {
        pwmt::set_pwmt_rate_legacy(&self.core, node, rate);
    }

    /// Power-meter report shape: phase mask (TOT|L1|L2|L3), stat mask
    /// (avg|max|min), per-phase and total value groups.
    pub fn set_pwmt_conf(
        &self,
        node: &Arc<Node>,
        phases: u8,
        stats: u8,
        values_ph: u8,
        values_tot: u8,
    ) -> Result<()> {
        pwmt::set_pwmt_conf(&self.core, node, phases, stats, values_ph, values_tot)
    }

    /// Measurement-channel conversion factors (×1000).
    pub fn set_pwmt_conv(&self, node: &Arc<Node>, kv: u32, ki: u32) -> Result<()> {
        pwmt::set_pwmt_conv(&self.core, node, kv, ki)
    }

    /// DAC output as a fraction of full scale.
    pub fn set_dac_output(&self, node: &Arc<Node>, value: f32) -> Result<()> {
        output::set_dac(&self.core, node, value)
    }

    /// Digital output: 0 clear, 1 set.
    pub fn set_digital_output(&self, node: &Arc<Node>, status: u8) -> Result<()> {
        output::set_digital(&self.core, node, status)
    }

    /// Accelerometer state: 0 off, 1 on, 2 on with colours.
    pub fn set_accel(&self, node: &Arc<Node>, state: u8) -> Result<()> {
        tap::set_accel_state(&self.core, node, state)
    }

    /// LED colour, `#RRGGBB`.
    pub fn set_led(&self, node: &Arc<Node>, color: &str) -> Result<()> {
        light::set_led(&self.core, node, color)
    }

    pub fn set_blink(&self, node: &Arc<Node>, color: &str, repeat: u16) -> Result<()> {
        light::set_blink(&self.core, node, color, repeat)
    }

    pub fn stop_blink(&self, node: &Arc<Node>) -> Result<()> {
        light::stop_blink(&self.core, node)
    }

    /// Radio power (0 low, 1 med, 2 high) and DCDC mode (0/1).
    pub fn set_power(&self, node: &Arc<Node>, radio_power: u8, dcdc_mode: u8) -> Result<()> {
        power::set_power(&self.core, node, radio_power, dcdc_mode)
    }

    /// Push the current wall clock to a node.
    pub fn set_datetime(&self, node: &Arc<Node>) {
        datetime::send_datetime(&self.core, node);
    }

    // ── Node schedules ────────────────────────────────────────

    /// Install or update a periodic schedule starting `wait_time`
    /// seconds from now.
    pub fn config_task(&self, node: &Arc<Node>, opcode: u8, period: u32, wait_time: u32) {
        self.change_task(node, opcode, unix_now() as u32 + wait_time, period, Clock::Monotonic);
    }

    pub fn config_task_legacy(&self, node: &Arc<Node>, opcode: u8, period: u32, wait_time: u32) {
        self.set_task(node, opcode, unix_now() as u32 + wait_time, period, Clock::Monotonic);
    }

    /// Ask the node to reboot shortly. Sent directly, outside the task
    /// queue.
    pub fn node_reboot(&self, node: &Arc<Node>) {
        let msg = task_gw::conf_msg(task_gw::op::REBOOT, 1000, 0, Clock::Monotonic);
        self.core.tx.send_node(&self.core, msg, Arc::clone(node));
    }

    pub fn set_task(&self, node: &Arc<Node>, opcode: u8, event_date: u32, period: u32, clock: Clock) {
        task_gw::new_task(&self.core, node, opcode, event_date, period, clock);
    }

    pub fn change_task(
        &self,
        node: &Arc<Node>,
        opcode: u8,
        event_date: u32,
        period: u32,
        clock: Clock,
    ) {
        task_gw::change_task(&self.core, node, opcode, event_date, period, clock);
    }

    /// Schedules the gateway has confirmed on this node.
    pub fn get_configured_tasks(&self, node: &Node) -> Option<Vec<String>> {
        self.core.task_gw.configured_tasks(node)
    }

    /// Ask the node to list its schedules.
    pub fn get_node_tasks(&self, node: &Arc<Node>) {
        task_gw::get_tasks(&self.core, node);
    }

    pub fn delete_task(&self, node: &Arc<Node>, index: u8) {
        task_gw::delete_task(&self.core, node, index);
    }

    pub fn delete_task_op(&self, node: &Arc<Node>, opcode: u8) {
        task_gw::delete_task_op(&self.core, node, opcode);
    }

    // ── OTA ───────────────────────────────────────────────────

    /// Offer a firmware image to a node; accepting nodes get a
    /// reboot-to-bootloader schedule at `reboot_time`.
    #[allow(clippy::too_many_arguments)]
    pub fn ota_update_notify(
        &self,
        node: &Arc<Node>,
        update_type: u8,
        major: u8,
        minor: u8,
        fix: u8,
        sd_version: u16,
        size: u32,
        reboot_time: u32,
    ) {
        ota::update_notify(
            &self.core,
            node,
            update_type,
            major,
            minor,
            fix,
            sd_version,
            size,
            reboot_time,
        );
    }

    pub fn ota_store_update(&self, node: &Arc<Node>, size: u32, reboot_time: u32) {
        ota::store_update(&self.core, node, size, reboot_time);
    }

    pub fn ota_relay_update(&self, node: &Arc<Node>, reboot_time: u32) {
        ota::relay_update(&self.core, node, reboot_time);
    }

    /// Nodes that accepted the current update offer.
    pub fn ota_pending_nodes(&self) -> Vec<Arc<Node>> {
        self.core.ota.pending_nodes()
    }

    pub fn ota_clear_pending(&self) {
        self.core.ota.clear_pending();
    }

    // ── Beacon ────────────────────────────────────────────────

    pub fn start_node_beacon(&self, node: &Arc<Node>, period_ms: u16) -> Result<()> {
        beacon::start_beacon(&self.core, node, period_ms)
    }

    pub fn stop_node_beacon(&self, node: &Arc<Node>) {
        beacon::stop_beacon(&self.core, node);
    }

    // ── Whitelist ─────────────────────────────────────────────

    pub fn add_node_to_whitelist(&self, node: &Arc<Node>) {
        self.core.whitelist.add(node);
    }

    /// Remove a node from the whitelist, cancelling any queued work.
    pub fn remove_node_from_whitelist(&self, node: &Node) -> bool {
        if self.core.queue.node_is_in_queue(node) {
            self.core.queue.node_cancel_tasks(node);
        }
        self.core.whitelist.remove(node)
    }

    pub fn is_node_in_whitelist(&self, node: &Node) -> bool {
        self.core.whitelist.contains(node)
    }

    pub fn get_whitelist_nodes(&self) -> Vec<Arc<Node>> {
        self.core.whitelist.nodes()
    }
}

// ── Wiring ───────────────────────────────────────────────────

/// Register the built-in subscribers. Handlers hold a `Weak<Core>` so
/// the bus (owned by the core) never keeps the core alive.
fn register_handlers(core: &Arc<Core>) {
    macro_rules! subscribe {
        ($name:literal, |$core:ident, $ev:ident| $body:expr) => {{
            let weak = Arc::downgrade(core);
            core.bus.add_handler(
                $name,
                Arc::new(move |$ev: &Event| {
                    if let Some($core) = weak.upgrade() {
                        $body;
                    }
                    Ok(())
                }),
            );
        }};
    }

    subscribe!("device", |core, ev| core.device.handle_event(&core, ev));
    subscribe!("tx", |core, ev| core.tx.handle_event(ev));
    subscribe!("task-queue", |core, ev| core.queue.handle_event(&core, ev));
    subscribe!("provisioning", |core, ev| core.prov.handle_event(&core, ev));
    subscribe!("nrf-temp", |core, ev| nrf_temp::handle_event(&core, ev));
    subscribe!("datetime", |core, ev| datetime::handle_event(&core, ev));
    subscribe!("rssi", |core, ev| rssi::handle_event(&core, ev));
    subscribe!("task-gw", |core, ev| task_gw::handle_event(&core, ev));
    subscribe!("transport", |core, ev| transport::handle_event(&core, ev));
    subscribe!("power", |_core, ev| power::handle_event(ev));
    subscribe!("output", |_core, ev| output::handle_event(ev));
    subscribe!("hwm", |_core, ev| hwm::handle_event(ev));
    subscribe!("beacon", |_core, ev| beacon::handle_event(ev));
    subscribe!("ota", |_core, ev| ota::handle_event(ev));
    subscribe!("pwmt", |_core, ev| pwmt::handle_event(ev));
}

fn spawn_workers(core: &Arc<Core>) {
    let mut workers = core.workers.lock();

    workers.push(
        std::thread::Builder::new()
            .name("event-bus".into())
            .spawn({
                let core = Arc::clone(core);
                move || {
                    while core.is_running() {
                        match core.bus.receiver().recv_timeout(Duration::from_secs(1)) {
                            Ok(event) => core.bus.dispatch(&event),
                            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
                        }
                    }
                }
            })
            .expect("spawn event-bus"),
    );

    workers.push(
        std::thread::Builder::new()
            .name("event-parser".into())
            .spawn({
                let core = Arc::clone(core);
                move || parser::run(&core)
            })
            .expect("spawn event-parser"),
    );

    workers.push(
        std::thread::Builder::new()
            .name("tx-manager".into())
            .spawn({
                let core = Arc::clone(core);
                move || TxManager::run(&core)
            })
            .expect("spawn tx-manager"),
    );
}

// ── Test scaffolding ─────────────────────────────────────────

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use crate::database::MemoryNodeDatabase;
    use crate::events::{MeshMeta, ModelBody, ModelEvent};

    /// Link stub: records writes, never produces input.
    pub(crate) struct TestLink {
        pub(crate) sent: Mutex<Vec<Vec<u8>>>,
    }

    impl Link for TestLink {
        fn send(&self, bytes: &[u8]) {
            self.sent.lock().push(bytes.to_vec());
        }

        fn recv(&self, _timeout: Duration) -> Option<Vec<u8>> {
            None
        }

        fn is_connected(&self) -> bool {
            true
        }

        fn stop(&self) {}

        fn drain(&self) {}
    }

    /// A core with no worker threads: tests drive `handle_event` and
    /// friends directly on the calling thread.
    pub(crate) fn test_core(
        config_mode: ConfigMode,
        config_cb: Option<ConfigCallback>,
    ) -> Arc<Core> {
        let db = Arc::new(MemoryNodeDatabase::new(1, [0xAA; 16]));
        let seq_file = std::env::temp_dir().join(format!(
            "meshgw-seq-{}-{:p}",
            std::process::id(),
            &db
        ));
        Arc::new(Core {
            db,
            link: Arc::new(TestLink {
                sent: Mutex::new(Vec::new()),
            }),
            bus: EventBus::new(),
            replay: Mutex::new(ReplayCache::new()),
            whitelist: Whitelist::new(),
            device: DeviceManager::new(seq_file),
            tx: TxManager::new(),
            prov: ProvEngine::new(),
            queue: TaskQueue::new(),
            wake: WakeUpModel::new(),
            task_gw: TaskGwModel::new(),
            beacon: BeaconModel::new(),
            ota: OtaModel::new(),
            transport: TransportModel::new(),
            config_cb,
            config_mode,
            prov_mode: false,
            remote: false,
            listener: AtomicBool::new(false),
            running: AtomicBool::new(true),
            workers: Mutex::new(Vec::new()),
        })
    }

    /// Node with the given MAC suffix and board id in its UUID.
    pub(crate) fn test_node(tag: u8, board_id: u16, addr: u16) -> Arc<Node> {
        let mut uuid = [0xFF_u8; 16];
        uuid[2..4].copy_from_slice(&board_id.to_be_bytes());
        let node = Arc::new(Node::new([0, 0, 0, 0, 0, tag], uuid));
        node.set_unicast_addr(addr);
        node
    }

    /// Model event from `node` with placeholder transport metadata.
    pub(crate) fn model_event(node: &Arc<Node>, body: ModelBody) -> Event {
        Event::Model(ModelEvent {
            meta: MeshMeta {
                src: node.unicast_addr(),
                dst: 1,
                appkey_handle: 0,
                subnet_handle: 0,
                ttl: 4,
                adv_addr_type: 1,
                adv_addr: node.mac(),
                rssi: -40,
                actual_length: 0,
                sequence_number: 1,
            },
            node: Some(Arc::clone(node)),
            body,
        })
    }
}
