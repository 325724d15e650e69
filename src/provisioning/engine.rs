//! Scan → provision state machine.
//!
//! Scanning subscribes to unprovisioned beacons; a candidate passing the
//! admission filter enters the provisioning sequence:
//!
//! ```text
//! UNPROV_DISC ─▶ allocate unicast ─▶ KeypairSet + Provision
//!   ─▶ PROV_LINK_ESTABLISHED ─▶ PROV_CAPS (reply OobUse 0,0,0)
//!   ─▶ PROV_ECDH (reply shared secret) ─▶ PROV_COMPLETE | PROV_FAILED
//!   ─▶ PROV_LINK_CLOSED (always ends the session)
//! ```
//!
//! Only one node provisions at a time; further discoveries are ignored
//! until the link closes. A provisioned device announcing itself as
//! unprovisioned is stale state — it is removed from the database and
//! re-enrolled.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::commands::Command;
use crate::events::timer::{self, TimerHandle};
use crate::events::Event;
use crate::gateway::Core;
use crate::node::Node;
use crate::provisioning::crypto;
use crate::provisioning::filter::ScanFilter;
use crate::provisioning::NODE_START_UNICAST;

#[derive(Default)]
struct EngineState {
    scanning: bool,
    provisioning: bool,
    only_one: bool,
    filter: ScanFilter,
    scan_timer: Option<TimerHandle>,
    current: Option<Arc<Node>>,
}

pub(crate) struct ProvEngine {
    state: Mutex<EngineState>,
}

impl ProvEngine {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(EngineState::default()),
        }
    }

    pub(crate) fn is_scanning(&self) -> bool {
        self.state.lock().scanning
    }

    pub(crate) fn is_provisioning(&self) -> bool {
        self.state.lock().provisioning
    }

    // ── Public scan control ───────────────────────────────────

    pub(crate) fn start_scan(
        &self,
        core: &Core,
        uuid_filters: Vec<String>,
        mac_filters: Vec<String>,
        timeout: Duration,
        only_one: bool,
    ) {
        let mut st = self.state.lock();
        if st.scanning || core.is_listener() {
            return;
        }
        st.scanning = true;
        st.only_one = only_one;
        st.filter = ScanFilter::new(uuid_filters, mac_filters);

        if !timeout.is_zero() {
            st.scan_timer = Some(timer::schedule(
                core.bus.sender(),
                timeout,
                Event::ScanTimeout,
            ));
        }

        core.link.send(&Command::ScanStart.encode());
    }

    pub(crate) fn stop_scan(&self, core: &Core) {
        self.stop_scan_locked(core, &mut self.state.lock());
    }

    fn stop_scan_locked(&self, core: &Core, st: &mut EngineState) {
        if !st.scanning {
            return;
        }
        st.scanning = false;
        if let Some(timer) = st.scan_timer.take() {
            timer.cancel();
        }
        core.link.send(&Command::ScanStop.encode());
    }

    // ── Event handling (bus worker) ───────────────────────────

    pub(crate) fn handle_event(&self, core: &Arc<Core>, event: &Event) {
        let mut st = self.state.lock();
        match event {
            Event::UnprovDiscovered { uuid, mac, .. } => {
                if !st.scanning {
                    return;
                }
                let node = Arc::new(Node::new(*mac, *uuid));

                if let Some(stale) = core.db.get_node_by_mac(mac) {
                    log::warn!(
                        "provisioned device {} announcing as unprovisioned, removing it",
                        node.mac_hex()
                    );
                    core.db.remove_node(&stale);
                }

                if !st.provisioning && st.filter.check(&node) {
                    log::info!("new device {} found", node.mac_hex());
                    self.provision(core, &mut st, node);
                }
            }

            Event::ScanTimeout => self.stop_scan_locked(core, &mut st),

            Event::ProvLinkEstablished => log::debug!("provisioning link established"),

            Event::ProvCaps => {
                if st.provisioning {
                    log::debug!("OOB capabilities received");
                    core.link.send(
                        &Command::OobUse {
                            method: 0,
                            action: 0,
                            size: 0,
                        }
                        .encode(),
                    );
                }
            }

            Event::ProvEcdh {
                peer_public,
                private,
            } => {
                if st.provisioning {
                    log::debug!("ECDH request");
                    match crypto::shared_secret(private, peer_public) {
                        Ok(secret) => core.link.send(&Command::EcdhSecret(secret).encode()),
                        Err(e) => log::warn!("ECDH failed: {e}"),
                    }
                }
            }

            Event::ProvComplete { devkey } => {
                if let Some(node) = &st.current {
                    node.set_devkey(*devkey);
                    core.db.store_node(node);
                    log::info!("node {} provisioned successfully", node.mac_hex());
                }
            }

            Event::ProvFailed { code } => {
                log::warn!("provisioning failed: {code}");
            }

            Event::ProvLinkClosed { reason } => {
                if st.provisioning {
                    if let Some(node) = &st.current {
                        log::debug!("link closed: {reason} ({})", node.mac_hex());
                    }
                    self.end_provision(core, &mut st);
                }
            }

            _ => {}
        }
    }

    // ── Provisioning sequence ─────────────────────────────────

    /// Smallest free unicast address in the node range; the device-side
    /// message cache and the host replay entry for it are cleared.
    fn obtain_unicast_addr(&self, core: &Core) -> Option<u16> {
        let used: std::collections::HashSet<u16> = core
            .db
            .get_nodes()
            .iter()
            .map(|n| n.unicast_addr())
            .collect();

        let end = NODE_START_UNICAST + core.device.cache_size();
        (NODE_START_UNICAST..end).find(|addr| !used.contains(addr)).inspect(|addr| {
            core.device.clear_replay_cache(core, *addr);
        })
    }

    fn provision(&self, core: &Core, st: &mut EngineState, node: Arc<Node>) {
        core.link.send(&Command::ScanStop.encode());
        st.provisioning = true;

        let Some(addr) = self.obtain_unicast_addr(core) else {
            log::error!("no unicast addresses left");
            st.provisioning = false;
            return;
        };
        node.set_unicast_addr(addr);
        core.replay.lock().remove_node(addr);

        let keypair = crypto::generate_keypair();
        core.link.send(
            &Command::KeypairSet {
                private: keypair.private,
                public: keypair.public,
            }
            .encode(),
        );

        log::info!("provisioning device {} at {addr}", node.mac_hex());
        core.link.send(
            &Command::Provision {
                uuid: node.uuid(),
                netkey: core.db.get_netkey(),
                netkey_index: 0,
                address: addr,
            }
            .encode(),
        );

        st.current = Some(node);
    }

    fn end_provision(&self, core: &Core, st: &mut EngineState) {
        st.provisioning = false;
        st.current = None;
        if st.only_one {
            self.stop_scan_locked(core, st);
        } else if st.scanning {
            core.link.send(&Command::ScanStart.encode());
        }
    }
}
