//! Device manager: boot handshake, command round-trips, handle caches.
//!
//! The microcontroller identifies keys and publish addresses by opaque
//! 16-bit handles with hard capacity limits (10 device keys, 30
//! addresses). The caches here mirror the device state in insertion
//! order and evict least-recently-inserted entries with an explicit
//! delete command, so cache and device never diverge.
//!
//! `send_cmd_wait_rsp` is the blocking request/response primitive. It
//! parks the calling thread on a condvar until the response event
//! arrives, which means it must never run on the event-bus worker —
//! device configuration therefore runs on its own thread spawned from
//! the device-started handler.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::commands::{APP_KEY, Command, group};
use crate::error::{Error, Result};
use crate::events::Event;
use crate::gateway::Core;
use crate::node::Node;

/// Device capacity for cached device keys.
pub const MAX_DEVKEYS: usize = 10;
/// Device capacity for cached publication addresses.
pub const MAX_ADDRESSES: usize = 30;

/// Outbound sequence numbers are persisted rounded up to the next
/// multiple of this block, bounding the loss on abrupt termination.
pub const SEQ_BLOCK: u32 = 100;

/// Payload of the connection-check echo.
const ECHO_PROBE: [u8; 3] = [0x02, 0x04, 0xFF];

#[derive(Debug, Clone, Copy)]
struct DevkeyEntry {
    key: [u8; 16],
    addr: u16,
    handle: u16,
}

#[derive(Debug, Clone, Copy)]
struct AddrEntry {
    addr: u16,
    handle: u16,
}

/// Host mirror of the device's handle tables.
#[derive(Default)]
pub(crate) struct HandleCache {
    pub netkey: Option<u16>,
    pub appkey: Option<u16>,
    pub wake_sub: Option<u16>,
    pub nrftemp_sub: Option<u16>,
    devkeys: heapless::Vec<DevkeyEntry, MAX_DEVKEYS>,
    addresses: heapless::Vec<AddrEntry, MAX_ADDRESSES>,
}

/// Completed command response.
#[derive(Debug, Clone)]
pub(crate) struct CmdResponse {
    pub opcode: u8,
    pub result: u8,
    pub data: Vec<u8>,
    /// Only for `PacketSend` completions.
    pub token: Option<u32>,
}

#[derive(Default)]
struct Pending {
    waiting: Option<u8>,
    response: Option<CmdResponse>,
}

pub(crate) struct DeviceManager {
    seq_file: PathBuf,
    started: AtomicBool,
    started_cv: (Mutex<bool>, Condvar),
    echo_flag: (Mutex<bool>, Condvar),
    cache_size: AtomicU16,
    pending: Mutex<Pending>,
    pending_cv: Condvar,
    pub(crate) handles: Mutex<HandleCache>,
}

impl DeviceManager {
    pub(crate) fn new(seq_file: PathBuf) -> Self {
        Self {
            seq_file,
            started: AtomicBool::new(false),
            started_cv: (Mutex::new(false), Condvar::new()),
            echo_flag: (Mutex::new(false), Condvar::new()),
            cache_size: AtomicU16::new(0),
            pending: Mutex::new(Pending::default()),
            pending_cv: Condvar::new(),
            handles: Mutex::new(HandleCache::default()),
        }
    }

    /// Replay-cache slots on the device, learned at boot. Bounds the
    /// number of provisionable nodes.
    pub(crate) fn cache_size(&self) -> u16 {
        self.cache_size.load(Ordering::Relaxed)
    }

    pub(crate) fn is_started(&self) -> bool {
        self.started.load(Ordering::Relaxed)
    }

    // ── Event handling (bus worker) ───────────────────────────

    pub(crate) fn handle_event(&self, core: &Arc<Core>, event: &Event) {
        match event {
            Event::DeviceStarted { .. } => {
                self.started.store(true, Ordering::Relaxed);
                let (lock, cv) = &self.started_cv;
                *lock.lock() = true;
                cv.notify_all();

                // Configuration blocks on responses, so it gets its own
                // thread instead of the bus worker.
                let config_core = Arc::clone(core);
                let handle = std::thread::Builder::new()
                    .name("device-config".into())
                    .spawn(move || {
                        if let Err(e) = config_core.device.config_device(&config_core) {
                            log::error!("device configuration failed: {e}");
                        }
                    })
                    .expect("spawn device-config");
                core.workers.lock().push(handle);
            }

            Event::SeqUpdate { seq } => {
                if let Err(e) = std::fs::write(&self.seq_file, seq.to_string()) {
                    log::error!("persisting sequence number: {e}");
                }
            }

            Event::CacheSize { size } => {
                self.cache_size.store(*size, Ordering::Relaxed);
            }

            Event::Echo(data) => {
                if data.as_slice() == ECHO_PROBE {
                    let (lock, cv) = &self.echo_flag;
                    *lock.lock() = true;
                    cv.notify_all();
                }
            }

            Event::RspEvent {
                opcode,
                result,
                data,
            } => {
                let mut pending = self.pending.lock();
                if pending.waiting == Some(*opcode) {
                    pending.response = Some(CmdResponse {
                        opcode: *opcode,
                        result: *result,
                        data: data.clone(),
                        token: None,
                    });
                    self.pending_cv.notify_all();
                }
            }

            Event::RspSend { result, token } => {
                let mut pending = self.pending.lock();
                if pending.waiting == Some(0xAB) {
                    pending.response = Some(CmdResponse {
                        opcode: 0xAB,
                        result: *result,
                        data: Vec::new(),
                        token: *token,
                    });
                    self.pending_cv.notify_all();
                }
            }

            _ => {}
        }
    }

    // ── Command round-trip ────────────────────────────────────

    /// Transmit `cmd` and block until its response event arrives.
    /// Must not be called from the event-bus worker.
    pub(crate) fn send_cmd_wait_rsp(&self, core: &Core, cmd: &Command) -> Result<CmdResponse> {
        let mut pending = self.pending.lock();
        pending.waiting = Some(cmd.opcode());
        pending.response = None;
        core.link.send(&cmd.encode());

        loop {
            if let Some(rsp) = pending.response.take() {
                pending.waiting = None;
                if rsp.result != 0 {
                    return Err(Error::Protocol {
                        opcode: rsp.opcode,
                        status: rsp.result,
                    });
                }
                return Ok(rsp);
            }
            if !core.is_running() {
                pending.waiting = None;
                return Err(Error::Link("shutting down"));
            }
            let _ = self
                .pending_cv
                .wait_for(&mut pending, Duration::from_millis(100));
        }
    }

    // ── Boot ──────────────────────────────────────────────────

    pub(crate) fn reset_device(&self, core: &Core) {
        core.link.send(&Command::Reset.encode());
    }

    /// Reset the device and wait for its started event. Configuration
    /// then proceeds on the device-config thread.
    pub(crate) fn start_device(&self, core: &Core) -> Result<()> {
        self.started.store(false, Ordering::Relaxed);
        {
            let (lock, _) = &self.started_cv;
            *lock.lock() = false;
        }
        self.reset_device(core);

        let (lock, cv) = &self.started_cv;
        let mut started = lock.lock();
        while !*started {
            if !core.is_running() {
                return Err(Error::Link("shutting down"));
            }
            let _ = cv.wait_for(&mut started, Duration::from_millis(100));
        }
        Ok(())
    }

    /// Full gateway configuration sequence, run after every device
    /// reset.
    pub(crate) fn config_device(&self, core: &Core) -> Result<()> {
        log::info!("configuring gateway");

        self.send_cmd_wait_rsp(core, &Command::StateClear)?;

        // Capacity arrives asynchronously as an application event.
        self.send_cmd_wait_rsp(core, &Command::get_replay_cache_size())?;

        let gateway_addr = core.db.get_address();
        log::debug!("setting gateway unicast address to {gateway_addr}");
        self.send_cmd_wait_rsp(
            core,
            &Command::AddrLocalUnicastSet {
                start: gateway_addr,
                count: 1,
            },
        )?;

        let seq = self.load_and_advance_seq()?;
        self.send_cmd_wait_rsp(
            core,
            &Command::SetNetState {
                iv_index: 0,
                iv_update: 0,
                iv_update_timeout: 0,
                seq,
            },
        )?;

        log::debug!("adding keys");
        let rsp = self.send_cmd_wait_rsp(
            core,
            &Command::SubnetAdd {
                index: 0,
                key: core.db.get_netkey(),
            },
        )?;
        self.handles.lock().netkey = Some(handle_from(&rsp)?);

        let rsp = self.send_cmd_wait_rsp(
            core,
            &Command::AppkeyAdd {
                index: 0,
                subnet: 0,
                key: APP_KEY,
            },
        )?;
        self.handles.lock().appkey = Some(handle_from(&rsp)?);

        log::debug!("wake-up subscription ({})", group::WAKE);
        let rsp = self.send_cmd_wait_rsp(
            core,
            &Command::SubscriptionAdd {
                address: group::WAKE,
            },
        )?;
        self.handles.lock().wake_sub = Some(handle_from(&rsp)?);

        log::debug!("temperature subscription ({})", group::NRFTEMP);
        let rsp = self.send_cmd_wait_rsp(
            core,
            &Command::SubscriptionAdd {
                address: group::NRFTEMP,
            },
        )?;
        self.handles.lock().nrftemp_sub = Some(handle_from(&rsp)?);

        Ok(())
    }

    /// Read the persisted sequence number, round up to the next
    /// `SEQ_BLOCK` multiple and write it back. A missing or unreadable
    /// file seeds zero.
    fn load_and_advance_seq(&self) -> Result<u32> {
        let seq = match std::fs::read_to_string(&self.seq_file)
            .ok()
            .and_then(|s| s.trim().parse::<u32>().ok())
        {
            Some(n) => SEQ_BLOCK * (n / SEQ_BLOCK + 1),
            None => 0,
        };
        std::fs::write(&self.seq_file, seq.to_string())?;
        Ok(seq)
    }

    /// Probe the link with an echo; up to ten 500 ms waits.
    pub(crate) fn check_connection(&self, core: &Core) -> bool {
        {
            let (lock, _) = &self.echo_flag;
            *lock.lock() = false;
        }
        core.link.send(&Command::Echo(ECHO_PROBE.to_vec()).encode());

        let (lock, cv) = &self.echo_flag;
        let mut flag = lock.lock();
        for _ in 0..10 {
            if *flag {
                break;
            }
            let _ = cv.wait_for(&mut flag, Duration::from_millis(500));
        }
        *flag
    }

    /// Drop the group subscriptions and reset the device.
    pub(crate) fn stop_device(&self, core: &Core) {
        let (wake, nrftemp) = {
            let handles = self.handles.lock();
            (handles.wake_sub, handles.nrftemp_sub)
        };
        if let Some(handle) = wake {
            core.link
                .send(&Command::SubscriptionRemove { handle }.encode());
        }
        if let Some(handle) = nrftemp {
            core.link
                .send(&Command::SubscriptionRemove { handle }.encode());
        }
        self.reset_device(core);
    }

    /// Clear the device-side message cache for a unicast address.
    pub(crate) fn clear_replay_cache(&self, core: &Core, unicast_addr: u16) {
        core.link
            .send(&Command::clear_node_replay_cache(unicast_addr).encode());
    }

    // ── Handle caches ─────────────────────────────────────────

    /// Handle for a node's device key, installing it on the device if
    /// needed. A node re-provisioned under the same address evicts its
    /// stale key first; a full cache evicts the oldest entry.
    pub(crate) fn get_devkey_handle(&self, core: &Core, node: &Node) -> Result<u16> {
        let mut cache = self.handles.lock();
        let key = node.devkey();

        if let Some(entry) = cache.devkeys.iter().find(|e| e.key == key) {
            return Ok(entry.handle);
        }

        if let Some(pos) = cache
            .devkeys
            .iter()
            .position(|e| e.addr == node.unicast_addr())
        {
            let stale = cache.devkeys.remove(pos);
            self.send_cmd_wait_rsp(
                core,
                &Command::DevkeyDelete {
                    handle: stale.handle,
                },
            )?;
        } else if cache.devkeys.is_full() {
            let oldest = cache.devkeys.remove(0);
            self.send_cmd_wait_rsp(
                core,
                &Command::DevkeyDelete {
                    handle: oldest.handle,
                },
            )?;
        }

        let rsp = self.send_cmd_wait_rsp(
            core,
            &Command::DevkeyAdd {
                owner_addr: node.unicast_addr(),
                subnet: node.netkey_index(),
                key,
            },
        )?;
        let handle = handle_from(&rsp)?;
        let _ = cache.devkeys.push(DevkeyEntry {
            key,
            addr: node.unicast_addr(),
            handle,
        });
        Ok(handle)
    }

    /// Handle for a publication address, analogous to the devkey path.
    pub(crate) fn get_address_handle(&self, core: &Core, addr: u16) -> Result<u16> {
        let mut cache = self.handles.lock();

        if let Some(entry) = cache.addresses.iter().find(|e| e.addr == addr) {
            return Ok(entry.handle);
        }

        if cache.addresses.is_full() {
            let oldest = cache.addresses.remove(0);
            self.send_cmd_wait_rsp(
                core,
                &Command::PublicationRemove {
                    handle: oldest.handle,
                },
            )?;
        }

        let rsp = self.send_cmd_wait_rsp(core, &Command::PublicationAdd { address: addr })?;
        let handle = handle_from(&rsp)?;
        let _ = cache.addresses.push(AddrEntry { addr, handle });
        Ok(handle)
    }
}

fn handle_from(rsp: &CmdResponse) -> Result<u16> {
    if rsp.data.len() < 2 {
        return Err(Error::Codec(format!(
            "response to {:#04x} too short for a handle",
            rsp.opcode
        )));
    }
    Ok(u16::from_le_bytes([rsp.data[0], rsp.data[1]]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seq_rounding() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".seq_number");

        // Missing file seeds zero.
        let mgr = DeviceManager::new(path.clone());
        assert_eq!(mgr.load_and_advance_seq().unwrap(), 0);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "0");

        // An existing value rounds up to the next block.
        std::fs::write(&path, "47").unwrap();
        assert_eq!(mgr.load_and_advance_seq().unwrap(), 100);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "100");

        // An exact multiple still advances a full block.
        std::fs::write(&path, "200").unwrap();
        assert_eq!(mgr.load_and_advance_seq().unwrap(), 300);

        // Garbage behaves like a missing file.
        std::fs::write(&path, "not a number").unwrap();
        assert_eq!(mgr.load_and_advance_seq().unwrap(), 0);
    }

    #[test]
    fn handle_from_rejects_short_payload() {
        let rsp = CmdResponse {
            opcode: 0x92,
            result: 0,
            data: vec![1],
            token: None,
        };
        assert!(handle_from(&rsp).is_err());
    }
}
