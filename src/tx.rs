//! Transmit manager: credit-limited mesh packet dispatch.
//!
//! The device keeps a small in-flight radio queue; ten concurrent sends
//! crash an nRF52832, five work, three is the tested safe ceiling. Each
//! `PacketSend` consumes one credit. The device's send response carries
//! a token; the credit comes back when the matching transmit-complete
//! event arrives, or immediately when the command is rejected.
//!
//! Two priorities: the normal queue drains first, fragment traffic rides
//! the low queue so large transfers cannot starve interactive commands.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::{Condvar, Mutex};

use crate::commands::Command;
use crate::error::Result;
use crate::events::Event;
use crate::gateway::Core;
use crate::node::Node;

const TTL: u8 = 127;
const FORCE_SEGMENTED: u8 = 0;
const TRANSMIC_SIZE: u8 = 0;

/// In-flight ceiling for `PacketSend` commands.
const CREDITS: u8 = 3;

/// Bounded credit counter with blocking acquire.
pub(crate) struct Credits {
    available: Mutex<u8>,
    cv: Condvar,
}

impl Credits {
    fn new(count: u8) -> Self {
        Self {
            available: Mutex::new(count),
            cv: Condvar::new(),
        }
    }

    /// Take one credit, waiting at most `timeout`.
    pub(crate) fn acquire(&self, timeout: Duration) -> bool {
        let mut available = self.available.lock();
        if *available == 0 {
            let _ = self.cv.wait_for(&mut available, timeout);
        }
        if *available > 0 {
            *available -= 1;
            true
        } else {
            false
        }
    }

    pub(crate) fn release(&self) {
        *self.available.lock() += 1;
        self.cv.notify_one();
    }

    #[cfg(test)]
    fn available(&self) -> u8 {
        *self.available.lock()
    }
}

/// Packet destination: a specific node (device-key encrypted) or a raw
/// address (appkey encrypted, e.g. a group broadcast).
pub(crate) enum TxDest {
    Node(Arc<Node>),
    Addr(u16),
}

pub(crate) struct TxManager {
    normal_tx: Sender<(Vec<u8>, TxDest)>,
    normal_rx: Receiver<(Vec<u8>, TxDest)>,
    low_tx: Sender<(Vec<u8>, TxDest)>,
    low_rx: Receiver<(Vec<u8>, TxDest)>,
    credits: Credits,
    pending: Mutex<HashSet<u32>>,
}

impl TxManager {
    pub(crate) fn new() -> Self {
        let (normal_tx, normal_rx) = unbounded();
        let (low_tx, low_rx) = unbounded();
        Self {
            normal_tx,
            normal_rx,
            low_tx,
            low_rx,
            credits: Credits::new(CREDITS),
            pending: Mutex::new(HashSet::new()),
        }
    }

    /// Queue a packet for a node. Dropped silently in listener and
    /// provisioner-only modes, which never talk to nodes.
    pub(crate) fn send_node(&self, core: &Core, data: Vec<u8>, node: Arc<Node>) {
        if core.is_listener() || core.is_provisioner_mode() {
            return;
        }
        let _ = self.normal_tx.send((data, TxDest::Node(node)));
    }

    /// Queue a packet for a raw address.
    pub(crate) fn send_addr(&self, data: Vec<u8>, addr: u16, low_priority: bool) {
        let queue = if low_priority {
            &self.low_tx
        } else {
            &self.normal_tx
        };
        let _ = queue.send((data, TxDest::Addr(addr)));
    }

    /// Messages sitting in the normal queue, for tests that bypass the
    /// dispatch worker.
    #[cfg(test)]
    pub(crate) fn drain_queued(&self) -> Vec<(Vec<u8>, TxDest)> {
        let mut out = Vec::new();
        while let Ok(item) = self.normal_rx.try_recv() {
            out.push(item);
        }
        while let Ok(item) = self.low_rx.try_recv() {
            out.push(item);
        }
        out
    }

    // ── Event handling (bus worker) ───────────────────────────

    pub(crate) fn handle_event(&self, event: &Event) {
        match event {
            Event::RspSend { result, token } => {
                if *result == 0 {
                    if let Some(token) = token {
                        self.pending.lock().insert(*token);
                    }
                } else {
                    log::warn!("send failed: {result:#04x}");
                    self.credits.release();
                }
            }
            Event::MeshTxComplete { token } => {
                if self.pending.lock().remove(token) {
                    self.credits.release();
                }
            }
            _ => {}
        }
    }

    // ── Dispatch worker ───────────────────────────────────────

    pub(crate) fn run(core: &Arc<Core>) {
        let tx = &core.tx;
        while core.is_running() {
            let item = match tx.normal_rx.recv_timeout(Duration::from_millis(100)) {
                Ok(item) => item,
                Err(_) => match tx.low_rx.recv_timeout(Duration::from_millis(100)) {
                    Ok(item) => item,
                    Err(_) => continue,
                },
            };

            while !tx.credits.acquire(Duration::from_secs(1)) {
                if !core.is_running() {
                    return;
                }
            }

            let (data, dest) = item;
            match dest {
                TxDest::Node(node) => {
                    if let Err(e) = tx.dispatch_node(core, data, &node) {
                        // Handle installation failed before any send was
                        // issued; the credit never reached the device.
                        log::warn!("dropping packet for {}: {e}", node.mac_hex());
                        tx.credits.release();
                    }
                }
                TxDest::Addr(addr) => {
                    if let Err(e) = tx.dispatch_addr(core, data, addr) {
                        log::warn!("dropping packet for {addr:#06x}: {e}");
                        tx.credits.release();
                    }
                }
            }
        }
    }

    fn dispatch_node(&self, core: &Core, data: Vec<u8>, node: &Arc<Node>) -> Result<()> {
        let key_handle = core.device.get_devkey_handle(core, node)?;
        let addr_handle = core.device.get_address_handle(core, node.unicast_addr())?;
        self.packet_send(core, key_handle, addr_handle, data);
        Ok(())
    }

    fn dispatch_addr(&self, core: &Core, data: Vec<u8>, addr: u16) -> Result<()> {
        let addr_handle = core.device.get_address_handle(core, addr)?;
        let appkey = core
            .device
            .handles
            .lock()
            .appkey
            .ok_or(crate::error::Error::Link("device not configured"))?;
        self.packet_send(core, appkey, addr_handle, data);
        Ok(())
    }

    fn packet_send(&self, core: &Core, appkey_handle: u16, dst_handle: u16, data: Vec<u8>) {
        let cmd = Command::PacketSend {
            appkey_handle,
            src_addr: core.db.get_address(),
            dst_handle,
            ttl: TTL,
            force_segmented: FORCE_SEGMENTED,
            transmic_size: TRANSMIC_SIZE,
            data,
        };
        // A rejected send surfaces as an error here, but the credit
        // was already released by the response handler.
        if let Err(e) = core.device.send_cmd_wait_rsp(core, &cmd) {
            log::warn!("packet send rejected: {e}");
        }
    }
}
