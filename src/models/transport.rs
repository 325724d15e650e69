//! Transport model: opaque point-to-point bytes between gateways.
//!
//! A mesh frame fits seven payload bytes after the access opcode.
//! Larger messages are fragmented: a start frame declares the total
//! length, numbered five-byte data frames follow, and an end frame
//! closes the transfer. Fragments ride the low-priority transmit queue
//! so a long transfer cannot starve interactive traffic.
//!
//! Reassembly is keyed by sender address. The end frame carries a fixed
//! six-byte placeholder in the checksum slot; the receiver preserves the
//! wire bytes but accepts any value.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::events::{Event, MeshMeta, ModelBody, ModelEvent};
use crate::gateway::Core;
use crate::models::vendor_opcode;

pub const MODEL_ID: u16 = 0x001A;

/// Bytes per fragment data frame.
pub const FRAG_SIZE: usize = 5;

/// Largest payload that still fits a single SEND frame.
const INLINE_MAX: usize = 7;

const SEND: u8 = 0xC2;
const FRAGMENT_START: u8 = 0xC3;
const FRAGMENT_DATA: u8 = 0xC4;
const FRAGMENT_END: u8 = 0xC5;

/// Placeholder transmitted in the end-frame checksum slot.
const FRAG_CHECKSUM: [u8; 6] = [5, 1, 2, 3, 4, 5];

/// Per-source reassembly buffers.
pub(crate) struct TransportModel {
    rx: Mutex<HashMap<u16, FragmentedPacket>>,
}

impl TransportModel {
    pub(crate) fn new() -> Self {
        Self {
            rx: Mutex::new(HashMap::new()),
        }
    }
}

// ── Outbound ─────────────────────────────────────────────────

/// Send opaque bytes to another gateway at `addr`.
pub(crate) fn send_msg(core: &Core, addr: u16, data: &[u8]) -> Result<()> {
    if data.is_empty() {
        return Err(Error::InvalidArgument("transport payload is empty"));
    }

    if data.len() <= INLINE_MAX {
        let mut msg = vendor_opcode(SEND, MODEL_ID);
        msg.extend_from_slice(data);
        core.tx.send_addr(msg, addr, false);
        return Ok(());
    }

    let mut start = vendor_opcode(FRAGMENT_START, MODEL_ID);
    start.extend_from_slice(&(data.len() as u16).to_le_bytes());
    core.tx.send_addr(start, addr, true);

    for (seq, chunk) in data.chunks(FRAG_SIZE).enumerate() {
        let mut frame = vendor_opcode(FRAGMENT_DATA, MODEL_ID);
        frame.extend_from_slice(&(seq as u16).to_le_bytes());
        frame.extend_from_slice(chunk);
        core.tx.send_addr(frame, addr, true);
    }

    let mut end = vendor_opcode(FRAGMENT_END, MODEL_ID);
    end.extend_from_slice(&FRAG_CHECKSUM);
    core.tx.send_addr(end, addr, true);
    Ok(())
}

// ── Inbound reassembly ───────────────────────────────────────

pub(crate) struct FragmentedPacket {
    slots: Vec<Option<Vec<u8>>>,
}

impl FragmentedPacket {
    pub(crate) fn new(total_len: usize) -> Self {
        Self {
            slots: vec![None; total_len.div_ceil(FRAG_SIZE)],
        }
    }

    /// Fill slot `seq`; duplicates are ignored.
    pub(crate) fn add_data(&mut self, seq: usize, data: &[u8]) -> Result<()> {
        let Some(slot) = self.slots.get_mut(seq) else {
            return Err(Error::Codec(format!(
                "fragment {seq} outside range {}",
                self.slots.len()
            )));
        };
        if slot.is_none() {
            *slot = Some(data.to_vec());
        }
        Ok(())
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    /// The wire checksum is transmitted but not verified.
    pub(crate) fn checksum_accepted(&self, _checksum: &[u8; 6]) -> bool {
        true
    }

    pub(crate) fn into_data(self) -> Option<Vec<u8>> {
        if !self.is_complete() {
            return None;
        }
        Some(self.slots.into_iter().flatten().flatten().collect())
    }
}

pub(crate) fn handle_event(core: &Arc<Core>, event: &Event) {
    let Event::Model(ev) = event else { return };
    match &ev.body {
        ModelBody::TransportFrStart { len } => {
            core.transport
                .rx
                .lock()
                .insert(ev.meta.src, FragmentedPacket::new(*len as usize));
        }

        ModelBody::TransportFrData { seq, data } => {
            let mut rx = core.transport.rx.lock();
            match rx.get_mut(&ev.meta.src) {
                Some(packet) => {
                    if let Err(e) = packet.add_data(*seq as usize, data) {
                        log::warn!("{e}");
                    }
                }
                None => log::warn!("fragment data without start from {}", ev.meta.src),
            }
        }

        ModelBody::TransportFrEnd { checksum } => {
            let Some(packet) = core.transport.rx.lock().remove(&ev.meta.src) else {
                log::warn!("fragment end without start from {}", ev.meta.src);
                return;
            };
            if packet.is_complete() && packet.checksum_accepted(checksum) {
                let Some(data) = packet.into_data() else { return };
                let meta = MeshMeta {
                    actual_length: data.len() as u16,
                    ..ev.meta.clone()
                };
                core.bus.publish(Event::Model(ModelEvent {
                    meta,
                    node: ev.node.clone(),
                    body: ModelBody::TransportRecv { data },
                }));
            } else {
                log::warn!("fragment end error from {}", ev.meta.src);
            }
        }

        _ => {}
    }
}
