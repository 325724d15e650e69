//! Per-node task queue — the gateway's cooperative scheduler.
//!
//! Each node owns a FIFO of [`Task`]s; only the head is live, and the
//! head's declared event sets decide which bus traffic feeds it. For
//! low-power nodes the queue is framed by primers: a Wake task holds
//! the node awake when it next announces itself, a Sleep task puts it
//! back down, and for mains-powered boards a single Alive round-trip
//! closes the conversation.
//!
//! A node that reports a fresh boot enters a *configuration session*:
//! a bounded window (at most [`MAX_CONFIG_NODES`] concurrent, refreshed
//! by any traffic from the node, dropped after [`CONFIG_TIMEOUT`])
//! during which the user callback may enqueue its task set.
//!
//! All queue state sits behind one mutex. Dispatch runs on the bus
//! worker; the user configuration callback is invoked with the lock
//! released (no other dispatch can interleave — there is only one bus
//! worker) so that it can call `add_task` itself.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::ConfigMode;
use crate::events::timer::{self, TimerHandle};
use crate::events::{Event, ModelBody};
use crate::gateway::{Core, Gateway};
use crate::models::task::{Clock, Task, TaskKind, TaskStatus};
use crate::models::{task_gw, unix_now, wake_up};
use crate::node::Node;

/// Upper bound on concurrent configuration sessions.
pub const MAX_CONFIG_NODES: usize = 10;

/// Configuration session lifetime, refreshed by any event from the node.
pub const CONFIG_TIMEOUT: Duration = Duration::from_secs(120);

type Mac = [u8; 6];

struct ConfigSession {
    timer: TimerHandle,
}

#[derive(Default)]
struct QueueState {
    queues: HashMap<Mac, VecDeque<Task>>,
    config_nodes: HashMap<Mac, ConfigSession>,
    configuring: HashSet<Mac>,
}

/// Work queued for the user configuration callback after the lock is
/// released.
struct CbAction {
    pending: Vec<Task>,
    mark_configuring: bool,
}

pub(crate) struct TaskQueue {
    state: Mutex<QueueState>,
}

/// Enqueue a task on its node's queue.
pub(crate) fn add_task(core: &Arc<Core>, task: Task) {
    core.queue.add_task(core, task);
}

impl TaskQueue {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
        }
    }

    // ── Public queue operations ───────────────────────────────

    pub(crate) fn add_task(&self, core: &Arc<Core>, task: Task) {
        if core.is_listener() || core.is_provisioner_mode() {
            return;
        }
        let mut st = self.state.lock();
        self.add_task_locked(core, &mut st, task);
    }

    pub(crate) fn cancel_tasks(&self, node: &Node) {
        self.state.lock().queues.remove(&node.mac());
    }

    pub(crate) fn reschedule_tasks(&self, core: &Arc<Core>, node: &Arc<Node>) {
        if core.is_listener() || core.is_provisioner_mode() {
            self.cancel_tasks(node);
            return;
        }
        let mut st = self.state.lock();
        self.reschedule_locked(&mut st, node);
    }

    /// Names of the node's queued non-primer tasks.
    pub(crate) fn pending_task_names(&self, node: &Node) -> Vec<String> {
        let st = self.state.lock();
        st.queues
            .get(&node.mac())
            .map(|q| {
                q.iter()
                    .filter(|t| !t.kind.is_primer())
                    .map(Task::name)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether the node has queued work or an open session.
    pub(crate) fn node_is_in_queue(&self, node: &Node) -> bool {
        let st = self.state.lock();
        let mac = node.mac();
        st.queues.contains_key(&mac)
            || st.config_nodes.contains_key(&mac)
            || st.configuring.contains(&mac)
    }

    /// Drop everything the queue knows about a node.
    pub(crate) fn node_cancel_tasks(&self, node: &Node) {
        let mut st = self.state.lock();
        let mac = node.mac();
        st.queues.remove(&mac);
        if let Some(session) = st.config_nodes.remove(&mac) {
            session.timer.cancel();
        }
        st.configuring.remove(&mac);
    }

    // ── Internal helpers (queue lock held) ────────────────────

    fn add_task_locked(&self, core: &Arc<Core>, st: &mut QueueState, task: Task) {
        let node = Arc::clone(&task.node);
        let mac = node.mac();

        if st.config_nodes.contains_key(&mac) || node.is_low_power() {
            // The node is presumed asleep; a wake primer must head the
            // queue so nothing is sent before its wake beacon.
            let queue = st.queues.entry(mac).or_insert_with(|| {
                let mut seeded = VecDeque::new();
                seeded.push_back(Task::new(Arc::clone(&node), TaskKind::Wake));
                seeded
            });
            queue.push_back(task);
        } else if let Some(queue) = st.queues.get_mut(&mac) {
            queue.push_back(task);
        } else {
            let mut queue = VecDeque::new();
            queue.push_back(task);
            let entry = st.queues.entry(mac).or_insert(queue);
            if let Some(head) = entry.front_mut() {
                head.execute(core);
            }
        }
    }

    fn reschedule_locked(&self, st: &mut QueueState, node: &Arc<Node>) {
        let mac = node.mac();
        if node.is_low_power() {
            // The node is probably asleep again after the failures;
            // hold the remaining work for its next wake.
            if let Some(queue) = st.queues.get_mut(&mac) {
                let head_is_wake = queue
                    .front()
                    .is_some_and(|t| matches!(t.kind, TaskKind::Wake));
                if !queue.is_empty() && !head_is_wake {
                    queue.push_front(Task::new(Arc::clone(node), TaskKind::Wake));
                }
            }
        } else {
            st.queues.remove(&mac);
        }
    }

    /// Remove the node's queue and keep its user tasks for re-queueing.
    fn take_pending(st: &mut QueueState, mac: &Mac) -> Vec<Task> {
        st.queues
            .remove(mac)
            .map(|q| q.into_iter().filter(|t| !t.kind.is_primer()).collect())
            .unwrap_or_default()
    }

    /// Frame the queue so the node ends up asleep (or alive-checked).
    fn sleep_node_locked(&self, core: &Arc<Core>, st: &mut QueueState, node: &Arc<Node>) {
        let mac = node.mac();

        if !node.is_low_power() {
            let mut queue = VecDeque::new();
            queue.push_back(Task::new(Arc::clone(node), TaskKind::Alive));
            st.queues.insert(mac, queue);
            return;
        }

        let sleep_time = core.wake.sleep_time();
        if node.sleep_period() != sleep_time {
            // Re-point the node's sleep schedule before putting it down.
            let first_time = st.config_nodes.contains_key(&mac);
            let first_awake = unix_now() as u32 + sleep_time;
            match core.config_mode {
                ConfigMode::Legacy => {
                    if !first_time {
                        let tid = core.task_gw.next_tid();
                        self.add_task_locked(
                            core,
                            st,
                            Task::new(
                                Arc::clone(node),
                                TaskKind::GwTaskDeleteOp {
                                    opcode: task_gw::op::CONF,
                                    tid,
                                },
                            ),
                        );
                    }
                    self.add_task_locked(
                        core,
                        st,
                        Task::new(
                            Arc::clone(node),
                            TaskKind::GwTaskNew {
                                opcode: task_gw::op::CONF,
                                event_date: first_awake,
                                period: sleep_time,
                                clock: Clock::Monotonic,
                            },
                        ),
                    );
                }
                ConfigMode::Default => {
                    self.add_task_locked(
                        core,
                        st,
                        Task::new(
                            Arc::clone(node),
                            TaskKind::GwTaskChange {
                                opcode: task_gw::op::CONF,
                                event_date: first_awake,
                                period: sleep_time,
                                clock: Clock::Monotonic,
                            },
                        ),
                    );
                }
            }
            st.queues
                .entry(mac)
                .or_default()
                .push_back(Task::new(Arc::clone(node), TaskKind::Sleep));
        } else {
            let mut queue = VecDeque::new();
            queue.push_back(Task::new(Arc::clone(node), TaskKind::Sleep));
            st.queues.insert(mac, queue);
        }
    }

    // ── Wake/reset coordination ───────────────────────────────

    fn on_wake_reset(
        &self,
        core: &Arc<Core>,
        st: &mut QueueState,
        node: &Arc<Node>,
        board_id: u8,
        reset_reason: u8,
    ) {
        log::info!(
            "reset reason: {} (board {board_id})",
            wake_up::reset_reason_str(reset_reason)
        );
        let mac = node.mac();
        if st.config_nodes.len() < MAX_CONFIG_NODES && !st.config_nodes.contains_key(&mac) {
            let timer = timer::schedule(
                core.bus.sender(),
                CONFIG_TIMEOUT,
                Event::ConfigTimeout {
                    node: Arc::clone(node),
                },
            );
            st.config_nodes.insert(mac, ConfigSession { timer });
        }
        if st.config_nodes.contains_key(&mac) {
            wake_up::wake_reset_ack(core, node);
        }
    }

    fn on_wake_notify(
        &self,
        core: &Arc<Core>,
        st: &mut QueueState,
        node: &Arc<Node>,
        configured: Option<bool>,
    ) -> Option<CbAction> {
        let mac = node.mac();
        match configured {
            // Legacy single-byte notify: a session means "configure me
            // now", otherwise an idle node is put back to sleep.
            None => {
                if st.config_nodes.contains_key(&mac) {
                    st.queues.remove(&mac);
                    node.set_sleep_period(0);
                    return Some(CbAction {
                        pending: Vec::new(),
                        mark_configuring: false,
                    });
                }
                if !st.queues.contains_key(&mac) {
                    self.sleep_node_locked(core, st, node);
                }
                None
            }

            // Extended notify, node says it lacks configuration.
            Some(false) => {
                if st.config_nodes.len() < MAX_CONFIG_NODES && !st.config_nodes.contains_key(&mac)
                {
                    let timer = timer::schedule(
                        core.bus.sender(),
                        CONFIG_TIMEOUT,
                        Event::ConfigTimeout {
                            node: Arc::clone(node),
                        },
                    );
                    st.config_nodes.insert(mac, ConfigSession { timer });
                }
                if st.config_nodes.contains_key(&mac) && !st.configuring.contains(&mac) {
                    let pending = Self::take_pending(st, &mac);
                    node.set_sleep_period(0);
                    return Some(CbAction {
                        pending,
                        mark_configuring: true,
                    });
                }
                None
            }

            // Extended notify, node already configured.
            Some(true) => {
                if !st.queues.contains_key(&mac) {
                    self.sleep_node_locked(core, st, node);
                }
                None
            }
        }
    }

    fn on_config_timeout(&self, node: &Arc<Node>) {
        let mut st = self.state.lock();
        let mac = node.mac();
        if let Some(session) = st.config_nodes.remove(&mac) {
            session.timer.cancel();
            st.configuring.remove(&mac);
            st.queues.remove(&mac);
            log::debug!("configuration session for {} expired", node.mac_hex());
        }
    }

    // ── Event handling (bus worker) ───────────────────────────

    pub(crate) fn handle_event(&self, core: &Arc<Core>, event: &Event) {
        if let Event::ConfigTimeout { node } = event {
            self.on_config_timeout(node);
            return;
        }

        let Some(node) = event.node().cloned() else {
            return;
        };
        if core.is_listener() || core.is_provisioner_mode() {
            return;
        }
        // UnknownNode events never reach here (no node); everything
        // else must pass admission.
        if !core.whitelist.contains(&node) {
            return;
        }

        let mac = node.mac();
        let mut st = self.state.lock();

        if let Event::Model(ev) = event {
            match &ev.body {
                ModelBody::WakeReset {
                    board_id,
                    reset_reason,
                } => self.on_wake_reset(core, &mut st, &node, *board_id, *reset_reason),

                ModelBody::WakeNotify { configured, .. } => {
                    if let Some(action) = self.on_wake_notify(core, &mut st, &node, *configured) {
                        // The callback may enqueue tasks itself, so it
                        // runs without the queue lock.
                        drop(st);
                        if let Some(cb) = &core.config_cb {
                            let gateway = Gateway::from_core(Arc::clone(core));
                            cb(&gateway, &node);
                        }
                        st = self.state.lock();
                        for task in action.pending {
                            self.add_task_locked(core, &mut st, task);
                        }
                        if action.mark_configuring {
                            st.configuring.insert(mac);
                        }
                    }
                }
                _ => {}
            }
        }

        // Any event from a node under configuration refreshes its
        // session timeout.
        if let Some(session) = st.config_nodes.get_mut(&mac) {
            session.timer.cancel();
            session.timer = timer::schedule(
                core.bus.sender(),
                CONFIG_TIMEOUT,
                Event::ConfigTimeout {
                    node: Arc::clone(&node),
                },
            );
        }

        // Head-of-line dispatch.
        let status = {
            let Some(queue) = st.queues.get_mut(&mac) else {
                return;
            };
            let Some(head) = queue.front_mut() else {
                return;
            };
            head.handle(core, event)
        };

        match status {
            TaskStatus::NotMatched => {}
            TaskStatus::Failed => self.reschedule_locked(&mut st, &node),
            TaskStatus::Completed => {
                let Some(task) = st.queues.get_mut(&mac).and_then(VecDeque::pop_front) else {
                    return;
                };

                if task.kind.is_terminal() {
                    if let Some(session) = st.config_nodes.remove(&mac) {
                        session.timer.cancel();
                    }
                    st.configuring.remove(&mac);
                    st.queues.remove(&mac);
                } else if st.queues.get(&mac).is_some_and(|q| !q.is_empty()) {
                    if let Some(next) = st.queues.get_mut(&mac).and_then(VecDeque::front_mut) {
                        next.execute(core);
                    }
                } else if st.config_nodes.contains_key(&mac) || node.is_low_power() {
                    self.sleep_node_locked(core, &mut st, &node);
                    if let Some(next) = st.queues.get_mut(&mac).and_then(VecDeque::front_mut) {
                        next.execute(core);
                    }
                } else {
                    st.queues.remove(&mac);
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn queued_kinds(&self, node: &Node) -> Vec<String> {
        let st = self.state.lock();
        st.queues
            .get(&node.mac())
            .map(|q| q.iter().map(Task::name).collect())
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub(crate) fn session_count(&self) -> usize {
        self.state.lock().config_nodes.len()
    }

    #[cfg(test)]
    pub(crate) fn head_attempts(&self, node: &Node) -> Option<u8> {
        let st = self.state.lock();
        st.queues
            .get(&node.mac())
            .and_then(|q| q.front().map(Task::attempts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::testutil::{model_event, test_core, test_node};
    use crate::models::{datetime, light};

    const IRIS: u16 = 2;
    const PROMETEO: u16 = 6;

    fn sent_payloads(core: &Arc<Core>) -> Vec<Vec<u8>> {
        core.tx.drain_queued().into_iter().map(|(p, _)| p).collect()
    }

    fn wake_notify(node: &Arc<Node>, configured: Option<bool>) -> Event {
        model_event(
            node,
            ModelBody::WakeNotify {
                tid: 1,
                configured,
            },
        )
    }

    #[test]
    fn mains_task_executes_immediately() {
        let core = test_core(ConfigMode::Default, None);
        let node = test_node(1, PROMETEO, 30);
        core.db.store_node(&node);
        core.whitelist.add(&node);

        datetime::send_datetime(&core, &node);

        let sent = sent_payloads(&core);
        assert_eq!(sent.len(), 1);
        assert_eq!(&sent[0][..3], &[0xC1, 0x0A, 0x00]);
        assert_eq!(core.queue.queued_kinds(&node), vec!["SendDatetime"]);
    }

    #[test]
    fn low_power_task_waits_behind_wake_primer() {
        let core = test_core(ConfigMode::Default, None);
        let node = test_node(2, IRIS, 21);
        core.db.store_node(&node);
        core.whitelist.add(&node);

        light::set_led(&core, &node, "#FF8000").unwrap();

        assert!(sent_payloads(&core).is_empty());
        assert_eq!(
            core.queue.queued_kinds(&node),
            vec!["Wake", "ChangeLedState"]
        );
    }

    #[test]
    fn listener_mode_rejects_tasks() {
        let core = test_core(ConfigMode::Default, None);
        Gateway::from_core(Arc::clone(&core)).set_listener(true);
        let node = test_node(3, PROMETEO, 30);
        core.whitelist.add(&node);

        datetime::send_datetime(&core, &node);
        assert!(core.queue.queued_kinds(&node).is_empty());
        assert!(sent_payloads(&core).is_empty());
    }

    #[test]
    fn events_from_unlisted_nodes_are_ignored() {
        let core = test_core(ConfigMode::Default, None);
        let node = test_node(4, IRIS, 21);
        core.db.store_node(&node);
        // Not whitelisted: tasks can be queued, but no event reaches
        // the queue head.
        light::set_led(&core, &node, "#112233").unwrap();

        core.queue
            .handle_event(&core, &wake_notify(&node, Some(true)));

        assert!(sent_payloads(&core).is_empty());
        assert_eq!(
            core.queue.queued_kinds(&node),
            vec!["Wake", "ChangeLedState"]
        );
    }

    /// Full low-power cycle: wake primer, user task with two timeouts,
    /// sleep-schedule update, sleep, queue dissolution.
    #[test]
    fn low_power_cycle_with_retries() {
        let core = test_core(ConfigMode::Default, None);
        let node = test_node(5, IRIS, 21);
        core.db.store_node(&node);
        core.whitelist.add(&node);

        light::set_led(&core, &node, "#FF8000").unwrap();

        // Node announces itself; the wake primer answers with WAIT.
        core.queue
            .handle_event(&core, &wake_notify(&node, Some(true)));
        let sent = sent_payloads(&core);
        assert_eq!(sent.len(), 1);
        assert_eq!(&sent[0][..3], &[0xC2, 0x00, 0x00]);

        // Wake acked: the LED task transmits.
        core.queue
            .handle_event(&core, &model_event(&node, ModelBody::WakeAckWait));
        let sent = sent_payloads(&core);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0], vec![0xC0, 0x08, 0x00, 0xFF, 0x80, 0x00]);

        // Two timeouts, two retries.
        for _ in 0..2 {
            core.queue.handle_event(
                &core,
                &Event::TaskTimeout {
                    node: Arc::clone(&node),
                },
            );
        }
        assert_eq!(sent_payloads(&core).len(), 2);
        assert_eq!(core.queue.head_attempts(&node), Some(3));

        // Third attempt is acked; the queue moves to the sleep frame.
        core.queue
            .handle_event(&core, &model_event(&node, ModelBody::LightAck));
        assert_eq!(
            core.queue.queued_kinds(&node),
            vec!["ChangeTaskGw-CONF", "Sleep"]
        );
        let sent = sent_payloads(&core);
        assert_eq!(sent.len(), 1);
        assert_eq!(&sent[0][..4], &[0xCC, 0x0C, 0x00, 0x01]);

        // Schedule acked: sleep period recorded, SLEEP transmitted.
        core.queue.handle_event(
            &core,
            &model_event(
                &node,
                ModelBody::TaskChangeAck {
                    task_index: 0,
                    tid: 0,
                },
            ),
        );
        assert_eq!(node.sleep_period(), core.wake.sleep_time());
        let sent = sent_payloads(&core);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0], vec![0xC1, 0x00, 0x00, 0x01]);

        // Sleep acked: terminal, queue dissolves, timestamp recorded.
        core.queue
            .handle_event(&core, &model_event(&node, ModelBody::WakeAckSleep));
        assert!(core.queue.queued_kinds(&node).is_empty());
        assert!(node.sleep_timestamp() > 0);
    }

    #[test]
    fn retries_exhaust_then_reschedule_seeds_wake() {
        let core = test_core(ConfigMode::Default, None);
        let node = test_node(6, IRIS, 21);
        core.db.store_node(&node);
        core.whitelist.add(&node);

        light::set_led(&core, &node, "#010203").unwrap();
        core.queue
            .handle_event(&core, &wake_notify(&node, Some(true)));
        core.queue
            .handle_event(&core, &model_event(&node, ModelBody::WakeAckWait));
        let _ = sent_payloads(&core);

        // Three further timeouts reach the retry budget; the fourth
        // gives up and re-seeds the wake primer.
        for _ in 0..3 {
            core.queue.handle_event(
                &core,
                &Event::TaskTimeout {
                    node: Arc::clone(&node),
                },
            );
        }
        assert_eq!(sent_payloads(&core).len(), 3);
        assert_eq!(core.queue.head_attempts(&node), Some(4));

        core.queue.handle_event(
            &core,
            &Event::TaskTimeout {
                node: Arc::clone(&node),
            },
        );
        assert!(sent_payloads(&core).is_empty());
        assert_eq!(
            core.queue.queued_kinds(&node),
            vec!["Wake", "ChangeLedState"]
        );
    }

    #[test]
    fn mains_retries_exhaust_then_queue_cancelled() {
        let core = test_core(ConfigMode::Default, None);
        let node = test_node(7, PROMETEO, 30);
        core.db.store_node(&node);
        core.whitelist.add(&node);

        light::set_led(&core, &node, "#010203").unwrap();
        let _ = sent_payloads(&core);

        for _ in 0..4 {
            core.queue.handle_event(
                &core,
                &Event::TaskTimeout {
                    node: Arc::clone(&node),
                },
            );
        }
        assert!(core.queue.queued_kinds(&node).is_empty());
    }

    #[test]
    fn wake_reset_opens_session_and_acks() {
        let core = test_core(ConfigMode::Default, None);
        let node = test_node(8, IRIS, 21);
        core.db.store_node(&node);
        core.whitelist.add(&node);

        core.queue.handle_event(
            &core,
            &model_event(
                &node,
                ModelBody::WakeReset {
                    board_id: 2,
                    reset_reason: 3,
                },
            ),
        );
        assert_eq!(core.queue.session_count(), 1);
        let sent = sent_payloads(&core);
        assert_eq!(sent.len(), 1);
        assert_eq!(&sent[0][..3], &[0xC6, 0x00, 0x00]);
    }

    #[test]
    fn session_count_is_bounded() {
        let core = test_core(ConfigMode::Default, None);
        for i in 0..12_u8 {
            let node = test_node(100 + i, IRIS, 21 + u16::from(i));
            core.db.store_node(&node);
            core.whitelist.add(&node);
            core.queue.handle_event(
                &core,
                &model_event(
                    &node,
                    ModelBody::WakeReset {
                        board_id: 2,
                        reset_reason: 0,
                    },
                ),
            );
        }
        assert_eq!(core.queue.session_count(), MAX_CONFIG_NODES);
    }

    /// Configuration timeout silently drops the session and its queue;
    /// a later task add starts from a plain wake primer.
    #[test]
    fn config_timeout_drops_session_and_queue() {
        let core = test_core(ConfigMode::Default, None);
        let node = test_node(9, IRIS, 21);
        core.db.store_node(&node);
        core.whitelist.add(&node);

        core.queue.handle_event(
            &core,
            &model_event(
                &node,
                ModelBody::WakeReset {
                    board_id: 2,
                    reset_reason: 1,
                },
            ),
        );
        let _ = sent_payloads(&core);
        light::set_led(&core, &node, "#808080").unwrap();
        assert_eq!(core.queue.session_count(), 1);

        core.queue.handle_event(
            &core,
            &Event::ConfigTimeout {
                node: Arc::clone(&node),
            },
        );
        assert_eq!(core.queue.session_count(), 0);
        assert!(core.queue.queued_kinds(&node).is_empty());

        light::set_led(&core, &node, "#808080").unwrap();
        assert_eq!(
            core.queue.queued_kinds(&node),
            vec!["Wake", "ChangeLedState"]
        );
    }

    /// Extended notify with `configured = false`: pending tasks survive
    /// the callback, which may enqueue its own work first.
    #[test]
    fn unconfigured_notify_runs_callback_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let calls = Arc::new(AtomicUsize::new(0));
        let cb_calls = Arc::clone(&calls);
        let cb: crate::config::ConfigCallback = Arc::new(move |gw, node| {
            cb_calls.fetch_add(1, Ordering::SeqCst);
            gw.set_datetime(node);
        });

        let core = test_core(ConfigMode::Default, Some(cb));
        let node = test_node(10, IRIS, 21);
        core.db.store_node(&node);
        core.whitelist.add(&node);
        node.set_sleep_period(600);

        light::set_led(&core, &node, "#FF0000").unwrap();
        core.queue
            .handle_event(&core, &wake_notify(&node, Some(false)));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(node.sleep_period(), 0);
        assert_eq!(core.queue.session_count(), 1);
        // Callback work first, then the captured pending task; the
        // notify itself already re-triggered the wake primer.
        assert_eq!(
            core.queue.queued_kinds(&node),
            vec!["Wake", "SendDatetime", "ChangeLedState"]
        );
        let sent = sent_payloads(&core);
        assert_eq!(sent.len(), 1);
        assert_eq!(&sent[0][..3], &[0xC2, 0x00, 0x00]);

        // Marked as configuring: a second notify does not re-run the
        // callback.
        core.queue
            .handle_event(&core, &wake_notify(&node, Some(false)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn legacy_notify_in_session_reconfigures() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let calls = Arc::new(AtomicUsize::new(0));
        let cb_calls = Arc::clone(&calls);
        let cb: crate::config::ConfigCallback = Arc::new(move |gw, node| {
            cb_calls.fetch_add(1, Ordering::SeqCst);
            gw.set_datetime(node);
        });

        let core = test_core(ConfigMode::Legacy, Some(cb));
        let node = test_node(11, IRIS, 21);
        core.db.store_node(&node);
        core.whitelist.add(&node);
        node.set_sleep_period(600);

        core.queue.handle_event(
            &core,
            &model_event(
                &node,
                ModelBody::WakeReset {
                    board_id: 2,
                    reset_reason: 0,
                },
            ),
        );
        let _ = sent_payloads(&core);
        light::set_led(&core, &node, "#00FF00").unwrap();

        // Legacy format: the pending LED task is discarded, only the
        // callback's work remains.
        core.queue.handle_event(&core, &wake_notify(&node, None));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(node.sleep_period(), 0);
        assert_eq!(
            core.queue.queued_kinds(&node),
            vec!["Wake", "SendDatetime"]
        );
    }

    #[test]
    fn idle_mains_node_gets_alive_check() {
        let core = test_core(ConfigMode::Default, None);
        let node = test_node(12, PROMETEO, 30);
        core.db.store_node(&node);
        core.whitelist.add(&node);

        core.queue
            .handle_event(&core, &wake_notify(&node, Some(true)));
        // The notify lands on the fresh Alive task's error set, which
        // fires the liveness round-trip straight away.
        assert_eq!(core.queue.queued_kinds(&node), vec!["Alive"]);
        let sent = sent_payloads(&core);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0], vec![0xC7, 0x00, 0x00, 0x01]);
    }

    #[test]
    fn idle_low_power_node_with_stale_period_resyncs_schedule() {
        let core = test_core(ConfigMode::Default, None);
        let node = test_node(13, IRIS, 21);
        core.db.store_node(&node);
        core.whitelist.add(&node);

        core.queue
            .handle_event(&core, &wake_notify(&node, Some(true)));
        assert_eq!(
            core.queue.queued_kinds(&node),
            vec!["Wake", "ChangeTaskGw-CONF", "Sleep"]
        );
        // The notify re-triggered the freshly seeded wake primer.
        let sent = sent_payloads(&core);
        assert_eq!(sent.len(), 1);
        assert_eq!(&sent[0][..3], &[0xC2, 0x00, 0x00]);
    }

    #[test]
    fn idle_low_power_node_with_current_period_just_sleeps() {
        let core = test_core(ConfigMode::Default, None);
        let node = test_node(14, IRIS, 21);
        node.set_sleep_period(crate::models::wake_up::DEFAULT_SLEEP_TIME);
        core.db.store_node(&node);
        core.whitelist.add(&node);

        core.queue
            .handle_event(&core, &wake_notify(&node, Some(true)));
        assert_eq!(core.queue.queued_kinds(&node), vec!["Sleep"]);
        // The notify is the Sleep task's error event: it transmits
        // immediately.
        let sent = sent_payloads(&core);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0], vec![0xC1, 0x00, 0x00, 0x01]);
    }

    #[test]
    fn legacy_sleep_resync_deletes_then_installs() {
        let core = test_core(ConfigMode::Legacy, None);
        let node = test_node(15, IRIS, 21);
        core.db.store_node(&node);
        core.whitelist.add(&node);

        core.queue
            .handle_event(&core, &wake_notify(&node, Some(true)));
        assert_eq!(
            core.queue.queued_kinds(&node),
            vec!["Wake", "DeleteTaskOpGw-CONF", "NewTaskGw-CONF", "Sleep"]
        );
    }

    #[test]
    fn terminal_completion_clears_session() {
        let core = test_core(ConfigMode::Default, None);
        let node = test_node(16, IRIS, 21);
        node.set_sleep_period(crate::models::wake_up::DEFAULT_SLEEP_TIME);
        core.db.store_node(&node);
        core.whitelist.add(&node);

        core.queue.handle_event(
            &core,
            &model_event(
                &node,
                ModelBody::WakeReset {
                    board_id: 2,
                    reset_reason: 0,
                },
            ),
        );
        assert_eq!(core.queue.session_count(), 1);
        let _ = sent_payloads(&core);

        core.queue
            .handle_event(&core, &wake_notify(&node, Some(true)));
        assert_eq!(core.queue.queued_kinds(&node), vec!["Sleep"]);

        core.queue
            .handle_event(&core, &model_event(&node, ModelBody::WakeAckSleep));
        assert_eq!(core.queue.session_count(), 0);
        assert!(core.queue.queued_kinds(&node).is_empty());
    }

    #[test]
    fn whitelist_removal_cancels_everything() {
        let core = test_core(ConfigMode::Default, None);
        let node = test_node(17, IRIS, 21);
        core.db.store_node(&node);
        core.whitelist.add(&node);
        light::set_led(&core, &node, "#123456").unwrap();
        assert!(core.queue.node_is_in_queue(&node));

        let gw = Gateway::from_core(Arc::clone(&core));
        assert!(gw.remove_node_from_whitelist(&node));
        assert!(!core.queue.node_is_in_queue(&node));
    }
}
