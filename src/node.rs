//! Mesh node identity and capabilities.
//!
//! A [`Node`] is a provisioned remote device. Its 6-byte MAC is the
//! identity key (equality and hashing use the MAC only); the board kind
//! and the capability flags derive from bytes 2..4 of the UUID. Fields
//! that change after provisioning (unicast address, device key, sleep
//! bookkeeping) use atomics or a small lock so nodes can be shared as
//! `Arc<Node>` between the event parser, the task queue and user code.

use std::sync::atomic::{AtomicI64, AtomicU16, AtomicU32, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Hardware family of a node, decoded from the board id in its UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Board {
    /// Battery powered environmental sensor.
    Iris,
    /// Mains powered repeater/sensor.
    Prometeo,
    /// Battery powered sensor with a CO2 cell.
    Soter,
    /// Mains powered three-phase power meter.
    Thor,
    /// Mains powered I/O board (DAC + digital output).
    Rhea,
}

impl Board {
    pub fn is_low_power(self) -> bool {
        matches!(self, Self::Iris | Self::Soter)
    }

    pub fn is_power_meter(self) -> bool {
        matches!(self, Self::Thor)
    }
}

/// Board id (UUID bytes 2..4, big-endian) to board family.
pub fn board_from_id(board_id: u16) -> Option<Board> {
    match board_id {
        0 | 1 | 2 | 16 | 17 | 24 | 35 => Some(Board::Iris),
        6 | 7 | 20 | 25 | 30 => Some(Board::Prometeo),
        21 | 28 => Some(Board::Soter),
        31 | 32 | 34 => Some(Board::Thor),
        33 => Some(Board::Rhea),
        _ => None,
    }
}

/// A provisioned (or in-provisioning) Bluetooth Mesh node.
#[derive(Debug)]
pub struct Node {
    mac: [u8; 6],
    uuid: [u8; 16],
    netkey_index: u16,
    name: Mutex<String>,
    unicast_addr: AtomicU16,
    devkey: Mutex<[u8; 16]>,
    sleep_period: AtomicU32,
    sleep_timestamp: AtomicI64,
    msg_timestamp: AtomicI64,
}

impl Node {
    pub fn new(mac: [u8; 6], uuid: [u8; 16]) -> Self {
        Self {
            mac,
            uuid,
            netkey_index: 0,
            name: Mutex::new(String::new()),
            unicast_addr: AtomicU16::new(0),
            devkey: Mutex::new([0; 16]),
            sleep_period: AtomicU32::new(0),
            sleep_timestamp: AtomicI64::new(0),
            msg_timestamp: AtomicI64::new(0),
        }
    }

    pub fn mac(&self) -> [u8; 6] {
        self.mac
    }

    /// Lower-case hex MAC, the conventional log identifier for a node.
    pub fn mac_hex(&self) -> String {
        hex::encode(self.mac)
    }

    pub fn uuid(&self) -> [u8; 16] {
        self.uuid
    }

    pub fn netkey_index(&self) -> u16 {
        self.netkey_index
    }

    pub fn name(&self) -> String {
        self.name.lock().clone()
    }

    pub fn set_name(&self, name: &str) {
        *self.name.lock() = name.to_owned();
    }

    pub fn unicast_addr(&self) -> u16 {
        self.unicast_addr.load(Ordering::Relaxed)
    }

    pub fn set_unicast_addr(&self, addr: u16) {
        self.unicast_addr.store(addr, Ordering::Relaxed);
    }

    pub fn devkey(&self) -> [u8; 16] {
        *self.devkey.lock()
    }

    pub fn set_devkey(&self, key: [u8; 16]) {
        *self.devkey.lock() = key;
    }

    pub fn sleep_period(&self) -> u32 {
        self.sleep_period.load(Ordering::Relaxed)
    }

    pub fn set_sleep_period(&self, secs: u32) {
        self.sleep_period.store(secs, Ordering::Relaxed);
    }

    pub fn sleep_timestamp(&self) -> i64 {
        self.sleep_timestamp.load(Ordering::Relaxed)
    }

    pub fn set_sleep_timestamp(&self, ts: i64) {
        self.sleep_timestamp.store(ts, Ordering::Relaxed);
    }

    pub fn msg_timestamp(&self) -> i64 {
        self.msg_timestamp.load(Ordering::Relaxed)
    }

    pub fn set_msg_timestamp(&self, ts: i64) {
        self.msg_timestamp.store(ts, Ordering::Relaxed);
    }

    /// Board id encoded big-endian in UUID bytes 2..4.
    pub fn board_id(&self) -> u16 {
        u16::from_be_bytes([self.uuid[2], self.uuid[3]])
    }

    /// Unknown boards default to low power: treating a sleepy node as
    /// mains powered would flood it while asleep, the reverse is harmless.
    pub fn is_low_power(&self) -> bool {
        board_from_id(self.board_id()).is_none_or(Board::is_low_power)
    }

    pub fn is_power_meter(&self) -> bool {
        board_from_id(self.board_id()).is_some_and(Board::is_power_meter)
    }

    pub fn has_co2(&self) -> bool {
        board_from_id(self.board_id()) == Some(Board::Soter)
    }

    pub fn to_record(&self) -> NodeRecord {
        NodeRecord {
            name: self.name(),
            mac: hex::encode(self.mac),
            uuid: hex::encode(self.uuid),
            unicast_address: self.unicast_addr(),
            devkey: hex::encode(self.devkey()),
            sleep_period: self.sleep_period(),
            sleep_timestamp: self.sleep_timestamp(),
            msg_timestamp: self.msg_timestamp(),
        }
    }

    pub fn from_record(rec: &NodeRecord) -> Option<Self> {
        let mac: [u8; 6] = hex::decode(&rec.mac).ok()?.try_into().ok()?;
        let uuid: [u8; 16] = hex::decode(&rec.uuid).ok()?.try_into().ok()?;
        let devkey: [u8; 16] = hex::decode(&rec.devkey).ok()?.try_into().ok()?;
        let node = Self::new(mac, uuid);
        node.set_name(&rec.name);
        node.set_unicast_addr(rec.unicast_address);
        node.set_devkey(devkey);
        node.set_sleep_period(rec.sleep_period);
        node.set_sleep_timestamp(rec.sleep_timestamp);
        node.set_msg_timestamp(rec.msg_timestamp);
        Some(node)
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.mac == other.mac
    }
}

impl Eq for Node {}

impl std::hash::Hash for Node {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.mac.hash(state);
    }
}

/// JSON-serialisable snapshot of a node, keys hex-encoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    #[serde(default)]
    pub name: String,
    pub mac: String,
    pub uuid: String,
    #[serde(default)]
    pub unicast_address: u16,
    pub devkey: String,
    #[serde(default)]
    pub sleep_period: u32,
    #[serde(default)]
    pub sleep_timestamp: i64,
    #[serde(default)]
    pub msg_timestamp: i64,
}
