//! Per-model protocols and the per-node task queue.
//!
//! Every device-side feature is one BT-Mesh vendor model: a 16-bit
//! model id (doubling as the vendor id in access opcodes), a handful of
//! one-byte inner opcodes, and a small ack/retry protocol. Outward
//! operations become [`Task`](task::Task)s on the per-node
//! [`queue`](queue::TaskQueue); inbound traffic is handled by each
//! model's `handle_event`.

pub mod battery;
pub mod beacon;
pub mod config_client;
pub mod datetime;
pub mod hwm;
pub mod light;
pub mod nrf_temp;
pub mod ota;
pub mod output;
pub mod power;
pub mod pwmt;
pub mod queue;
pub mod rssi;
pub mod tap;
pub mod task;
pub mod task_gw;
pub mod transport;
pub mod wake_up;

use std::time::{SystemTime, UNIX_EPOCH};

/// Vendor-model access opcode: one opcode byte followed by the vendor
/// id little-endian (decodes big-endian as `0xOPVVVV`).
pub(crate) fn vendor_opcode(opcode: u8, vendor_id: u16) -> Vec<u8> {
    let v = vendor_id.to_le_bytes();
    vec![opcode, v[0], v[1]]
}

/// SIG-model access opcode, big-endian two bytes.
pub(crate) fn sig_opcode(opcode: u16) -> Vec<u8> {
    opcode.to_be_bytes().to_vec()
}

/// Seconds since the Unix epoch.
pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
