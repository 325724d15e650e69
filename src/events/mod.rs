//! Typed events flowing through the gateway.
//!
//! Everything the microcontroller reports — and every synthetic timer
//! tick the library generates — becomes one [`Event`] value, dispatched
//! in order by the [`bus`]. Mesh model traffic carries its transport
//! metadata in [`MeshMeta`] and resolves to the emitting [`Node`] when
//! the source address is known to the database.
//!
//! [`EventKind`] is the fieldless discriminant used wherever an event
//! *set* is needed (task success/error matching).

pub mod bus;
pub(crate) mod parser;
pub mod replay;
pub mod timer;

use std::sync::Arc;

use crate::node::Node;

/// Transport metadata attached to every received model event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshMeta {
    pub src: u16,
    pub dst: u16,
    pub appkey_handle: u16,
    pub subnet_handle: u16,
    pub ttl: u8,
    pub adv_addr_type: u8,
    /// Advertisement address of the last hop, already byte-reversed
    /// back into canonical order.
    pub adv_addr: [u8; 6],
    pub rssi: i8,
    pub actual_length: u16,
    pub sequence_number: u32,
}

/// A mesh access-layer message from (or about) a node.
#[derive(Debug, Clone)]
pub struct ModelEvent {
    pub meta: MeshMeta,
    /// Resolved emitter. `None` for unknown sources and for peer
    /// gateways (addresses ≤ 10) that are not in the node database.
    pub node: Option<Arc<Node>>,
    pub body: ModelBody,
}

/// Decoded model payloads, one variant per access opcode the gateway
/// understands.
#[derive(Debug, Clone)]
pub enum ModelBody {
    /// Message from a source the database does not know.
    UnknownNode,
    NodeReset,

    // NrfTemp (vendor 0x0002)
    TempData { temp: u16, hum: u8, press: u32, tid: u8 },
    TempDataReliable { temp: u16, hum: u8, press: u32, tid: u8 },
    IaAck,
    TempConfigAck,
    TempCalibAck,
    TempCalResetAck,
    TempHeaterNotify,
    IaqData { iaq: u8, tvoc: u16, etoh: u8, eco2: u16, tid: u8 },
    Co2Data { co2: u16, cal_status: u8, abc_time: u16, tid: u8 },

    // Battery (vendor 0x0004)
    BatData { millivolts: u16, tid: u8 },

    // Tap (vendor 0x0006)
    TapNotify { kind: u8, color: u8, tid: u8 },
    TapAckConf,

    // Light (vendor 0x0008)
    LightAck,

    // Datetime (vendor 0x000A)
    DatetimeReq { tid: u8 },
    DatetimeAck,

    // TaskGw (vendor 0x000C)
    TaskAck { task_index: i8, tid: u8 },
    TaskChangeAck { task_index: i8, tid: u8 },
    TaskDeleteAck { code: i8, tid: u8 },
    TaskDeleteOpAck { code: i8, tid: u8 },
    TaskData { opcode: u8, event_date: u32, period: u32 },
    TaskGetTasksAck,

    // Rssi (vendor 0x000E)
    RssiNeighborData { addr: u16, rssi: i8 },
    RssiNeighborAck,
    RssiStatusAck { rssi: i8 },
    RssiPing,
    RssiPingAck,

    // Ota (vendor 0x0012)
    OtaVersionAck { status: u8 },
    OtaStatusAck { status: u8 },
    OtaStoreAck { status: u8 },
    OtaRelayAck { status: u8 },

    // Power (vendor 0x0014)
    PowerAck,

    // Hwm (vendor 0x0016)
    HwmData { hts: u8, sht: u8, fxx: u8, lps: u8 },
    HwmAck,

    // Beacon (vendor 0x0018)
    BeaconStartAck { tid: u8 },
    BeaconStopAck { tid: u8 },

    // Transport (vendor 0x001A)
    TransportRecv { data: Vec<u8> },
    TransportFrStart { len: u16 },
    TransportFrData { seq: u16, data: Vec<u8> },
    TransportFrEnd { checksum: [u8; 6] },

    // Pwmt (vendor 0x001C)
    PwmtData { ctl: u8, readings: PwmtReadings },
    PwmtConfigAck,
    PwmtConvAck,

    // Output (vendor 0x001E)
    OutputDacAck,
    OutputDigAck,

    // WakeUp (vendor 0x0000)
    /// `configured` is present only in the extended two-byte format;
    /// the single-byte legacy format carries just a tid.
    WakeNotify { tid: u8, configured: Option<bool> },
    WakeReset { board_id: u8, reset_reason: u8 },
    WakeAckSleep,
    WakeAckWait,
    WakeAckAlive,
}

/// Power-meter sample shapes, selected by the ctl byte (phase id in
/// bits 0..2, message id in bits 2..4).
#[derive(Debug, Clone, PartialEq)]
pub enum PwmtReadings {
    TotalPower { p: i16, q: i16, s: i16 },
    PhaseAngles { ph12: f32, ph23: f32, ph31: f32 },
    LineVoltages { v12: f32, v23: f32, v31: f32 },
    TotalEnergy { e: i32 },
    PhaseVif { v: f32, i: f32, f: f32 },
    PhasePower { p: i16, pf: f32, inductive: bool },
    PhaseQs { q: i16, s: i16, ph: f32 },
    PhaseEnergy { e: i32 },
}

/// One event on the bus.
#[derive(Debug, Clone)]
pub enum Event {
    // Device control
    DeviceStarted { operating_mode: u8, hw_error: u8, data_credit: u8 },
    Echo(Vec<u8>),
    RspEvent { opcode: u8, result: u8, data: Vec<u8> },
    RspSend { result: u8, token: Option<u32> },
    SeqUpdate { seq: u32 },
    CacheSize { size: u16 },
    SdEnabled,
    AppEvent(Vec<u8>),
    MeshTxComplete { token: u32 },
    UartDisconnection,

    // Provisioning
    UnprovDiscovered {
        uuid: [u8; 16],
        mac: [u8; 6],
        rssi: i8,
        gatt_supported: u8,
        adv_addr_type: u8,
    },
    ProvLinkEstablished,
    ProvLinkClosed { reason: u8 },
    ProvCaps,
    ProvAuthRequest { method: u8, action: u8, size: u8 },
    ProvEcdh { peer_public: [u8; 64], private: [u8; 32] },
    ProvComplete { devkey: [u8; 16] },
    ProvFailed { code: u8 },

    // Mesh model traffic
    Model(ModelEvent),

    // Synthetic timer events
    ConfigTimeout { node: Arc<Node> },
    ScanTimeout,
    TaskTimeout { node: Arc<Node> },
}

impl Event {
    /// Node this event concerns, when it concerns one.
    pub fn node(&self) -> Option<&Arc<Node>> {
        match self {
            Self::Model(ev) => ev.node.as_ref(),
            Self::ConfigTimeout { node } | Self::TaskTimeout { node } => Some(node),
            _ => None,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::DeviceStarted { .. } => EventKind::DeviceStarted,
            Self::Echo(_) => EventKind::Echo,
            Self::RspEvent { .. } => EventKind::RspEvent,
            Self::RspSend { .. } => EventKind::RspSend,
            Self::SeqUpdate { .. } => EventKind::SeqUpdate,
            Self::CacheSize { .. } => EventKind::CacheSize,
            Self::SdEnabled => EventKind::SdEnabled,
            Self::AppEvent(_) => EventKind::AppEvent,
            Self::MeshTxComplete { .. } => EventKind::MeshTxComplete,
            Self::UartDisconnection => EventKind::UartDisconnection,
            Self::UnprovDiscovered { .. } => EventKind::UnprovDiscovered,
            Self::ProvLinkEstablished => EventKind::ProvLinkEstablished,
            Self::ProvLinkClosed { .. } => EventKind::ProvLinkClosed,
            Self::ProvCaps => EventKind::ProvCaps,
            Self::ProvAuthRequest { .. } => EventKind::ProvAuthRequest,
            Self::ProvEcdh { .. } => EventKind::ProvEcdh,
            Self::ProvComplete { .. } => EventKind::ProvComplete,
            Self::ProvFailed { .. } => EventKind::ProvFailed,
            Self::ConfigTimeout { .. } => EventKind::ConfigTimeout,
            Self::ScanTimeout => EventKind::ScanTimeout,
            Self::TaskTimeout { .. } => EventKind::TaskTimeout,
            Self::Model(ev) => ev.body.kind(),
        }
    }
}

impl ModelBody {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::UnknownNode => EventKind::UnknownNode,
            Self::NodeReset => EventKind::NodeReset,
            Self::TempData { .. } => EventKind::TempData,
            Self::TempDataReliable { .. } => EventKind::TempDataReliable,
            Self::IaAck => EventKind::IaAck,
            Self::TempConfigAck => EventKind::TempConfigAck,
            Self::TempCalibAck => EventKind::TempCalibAck,
            Self::TempCalResetAck => EventKind::TempCalResetAck,
            Self::TempHeaterNotify => EventKind::TempHeaterNotify,
            Self::IaqData { .. } => EventKind::IaqData,
            Self::Co2Data { .. } => EventKind::Co2Data,
            Self::BatData { .. } => EventKind::BatData,
            Self::TapNotify { .. } => EventKind::TapNotify,
            Self::TapAckConf => EventKind::TapAckConf,
            Self::LightAck => EventKind::LightAck,
            Self::DatetimeReq { .. } => EventKind::DatetimeReq,
            Self::DatetimeAck => EventKind::DatetimeAck,
            Self::TaskAck { .. } => EventKind::TaskAck,
            Self::TaskChangeAck { .. } => EventKind::TaskChangeAck,
            Self::TaskDeleteAck { .. } => EventKind::TaskDeleteAck,
            Self::TaskDeleteOpAck { .. } => EventKind::TaskDeleteOpAck,
            Self::TaskData { .. } => EventKind::TaskData,
            Self::TaskGetTasksAck => EventKind::TaskGetTasksAck,
            Self::RssiNeighborData { .. } => EventKind::RssiNeighborData,
            Self::RssiNeighborAck => EventKind::RssiNeighborAck,
            Self::RssiStatusAck { .. } => EventKind::RssiStatusAck,
            Self::RssiPing => EventKind::RssiPing,
            Self::RssiPingAck => EventKind::RssiPingAck,
            Self::OtaVersionAck { .. } => EventKind::OtaVersionAck,
            Self::OtaStatusAck { .. } => EventKind::OtaStatusAck,
            Self::OtaStoreAck { .. } => EventKind::OtaStoreAck,
            Self::OtaRelayAck { .. } => EventKind::OtaRelayAck,
            Self::PowerAck => EventKind::PowerAck,
            Self::HwmData { .. } => EventKind::HwmData,
            Self::HwmAck => EventKind::HwmAck,
            Self::BeaconStartAck { .. } => EventKind::BeaconStartAck,
            Self::BeaconStopAck { .. } => EventKind::BeaconStopAck,
            Self::TransportRecv { .. } => EventKind::TransportRecv,
            Self::TransportFrStart { .. } => EventKind::TransportFrStart,
            Self::TransportFrData { .. } => EventKind::TransportFrData,
            Self::TransportFrEnd { .. } => EventKind::TransportFrEnd,
            Self::PwmtData { .. } => EventKind::PwmtData,
            Self::PwmtConfigAck => EventKind::PwmtConfigAck,
            Self::PwmtConvAck => EventKind::PwmtConvAck,
            Self::OutputDacAck => EventKind::OutputDacAck,
            Self::OutputDigAck => EventKind::OutputDigAck,
            Self::WakeNotify { .. } => EventKind::WakeNotify,
            Self::WakeReset { .. } => EventKind::WakeReset,
            Self::WakeAckSleep => EventKind::WakeAckSleep,
            Self::WakeAckWait => EventKind::WakeAckWait,
            Self::WakeAckAlive => EventKind::WakeAckAlive,
        }
    }
}

/// Fieldless discriminant of [`Event`], used for event-set matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    DeviceStarted,
    Echo,
    RspEvent,
    RspSend,
    SeqUpdate,
    CacheSize,
    SdEnabled,
    AppEvent,
    MeshTxComplete,
    UartDisconnection,
    UnprovDiscovered,
    ProvLinkEstablished,
    ProvLinkClosed,
    ProvCaps,
    ProvAuthRequest,
    ProvEcdh,
    ProvComplete,
    ProvFailed,
    ConfigTimeout,
    ScanTimeout,
    TaskTimeout,
    UnknownNode,
    NodeReset,
    TempData,
    TempDataReliable,
    IaAck,
    TempConfigAck,
    TempCalibAck,
    TempCalResetAck,
    TempHeaterNotify,
    IaqData,
    Co2Data,
    BatData,
    TapNotify,
    TapAckConf,
    LightAck,
    DatetimeReq,
    DatetimeAck,
    TaskAck,
    TaskChangeAck,
    TaskDeleteAck,
    TaskDeleteOpAck,
    TaskData,
    TaskGetTasksAck,
    RssiNeighborData,
    RssiNeighborAck,
    RssiStatusAck,
    RssiPing,
    RssiPingAck,
    OtaVersionAck,
    OtaStatusAck,
    OtaStoreAck,
    OtaRelayAck,
    PowerAck,
    HwmData,
    HwmAck,
    BeaconStartAck,
    BeaconStopAck,
    TransportRecv,
    TransportFrStart,
    TransportFrData,
    TransportFrEnd,
    PwmtData,
    PwmtConfigAck,
    PwmtConvAck,
    OutputDacAck,
    OutputDigAck,
    WakeNotify,
    WakeReset,
    WakeAckSleep,
    WakeAckWait,
    WakeAckAlive,
}
