//! In-process publish/subscribe.
//!
//! A FIFO queue feeds a single worker thread (spawned by the gateway)
//! that calls every registered handler in registration order. Handlers
//! are keyed by name: adding the same name twice is a no-op, and a
//! handler added while an event is being dispatched does not observe
//! that event (dispatch iterates a snapshot taken when the event is
//! picked up). A handler error is logged and swallowed — it neither
//! unregisters the handler nor stops the worker.

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;

use crate::error::Result;
use crate::events::{Event, EventKind};

/// Event callback. Runs on the bus worker thread; must not block on
/// command round-trips (see `DeviceManager::send_cmd_wait_rsp`).
pub type Handler = Arc<dyn Fn(&Event) -> Result<()> + Send + Sync>;

struct HandlerEntry {
    name: String,
    handler: Handler,
}

pub struct EventBus {
    tx: Sender<Event>,
    rx: Receiver<Event>,
    handlers: Mutex<Vec<HandlerEntry>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            tx,
            rx,
            handlers: Mutex::new(Vec::new()),
        }
    }

    /// Queue an event for dispatch.
    pub fn publish(&self, event: Event) {
        // Send only fails when the bus is torn down; late timer fires
        // during shutdown land here.
        let _ = self.tx.send(event);
    }

    /// A cloneable producer handle for timer threads.
    pub fn sender(&self) -> Sender<Event> {
        self.tx.clone()
    }

    pub(crate) fn receiver(&self) -> &Receiver<Event> {
        &self.rx
    }

    /// Register a handler under `name`. Duplicate names are a no-op.
    pub fn add_handler(&self, name: &str, handler: Handler) {
        let mut handlers = self.handlers.lock();
        if handlers.iter().any(|e| e.name == name) {
            return;
        }
        handlers.push(HandlerEntry {
            name: name.to_owned(),
            handler,
        });
    }

    /// Unregister `name` if present.
    pub fn remove_handler(&self, name: &str) {
        self.handlers.lock().retain(|e| e.name != name);
    }

    #[cfg(test)]
    fn handler_count(&self) -> usize {
        self.handlers.lock().len()
    }

    /// Deliver one event to every handler registered at this moment.
    pub fn dispatch(&self, event: &Event) {
        match event.kind() {
            EventKind::WakeNotify
            | EventKind::WakeReset
            | EventKind::TaskTimeout
            | EventKind::ConfigTimeout => {
                if let Some(node) = event.node() {
                    log::debug!("event: {:?}, node: {}", event.kind(), node.mac_hex());
                }
            }
            kind => log::trace!("event: {kind:?}"),
        }

        let snapshot: Vec<(String, Handler)> = self
            .handlers
            .lock()
            .iter()
            .map(|e| (e.name.clone(), Arc::clone(&e.handler)))
            .collect();

        for (name, handler) in snapshot {
            if let Err(e) = handler(event) {
                log::error!("event handler {name}: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn duplicate_registration_is_a_noop() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let hits = Arc::clone(&hits);
            bus.add_handler(
                "counter",
                Arc::new(move |_| {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            );
        }
        assert_eq!(bus.handler_count(), 1);

        bus.dispatch(&Event::ScanTimeout);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn remove_handler_stops_delivery() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        {
            let hits = Arc::clone(&hits);
            bus.add_handler(
                "counter",
                Arc::new(move |_| {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            );
        }
        bus.dispatch(&Event::ScanTimeout);
        bus.remove_handler("counter");
        bus.remove_handler("counter"); // idempotent
        bus.dispatch(&Event::ScanTimeout);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failing_handler_does_not_block_the_rest() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        bus.add_handler(
            "bad",
            Arc::new(|_| Err(crate::error::Error::Link("down"))),
        );
        {
            let hits = Arc::clone(&hits);
            bus.add_handler(
                "good",
                Arc::new(move |_| {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            );
        }
        bus.dispatch(&Event::ScanTimeout);
        bus.dispatch(&Event::ScanTimeout);
        // The failing handler stays registered and keeps failing, the
        // good one keeps running.
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(bus.handler_count(), 2);
    }

    #[test]
    fn handler_added_during_dispatch_misses_inflight_event() {
        let bus = Arc::new(EventBus::new());
        let late_hits = Arc::new(AtomicUsize::new(0));
        {
            let bus2 = Arc::clone(&bus);
            let late_hits = Arc::clone(&late_hits);
            bus.add_handler(
                "adder",
                Arc::new(move |_| {
                    let late_hits = Arc::clone(&late_hits);
                    bus2.add_handler(
                        "late",
                        Arc::new(move |_| {
                            late_hits.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        }),
                    );
                    Ok(())
                }),
            );
        }
        bus.dispatch(&Event::ScanTimeout);
        assert_eq!(late_hits.load(Ordering::SeqCst), 0);
        bus.dispatch(&Event::ScanTimeout);
        assert_eq!(late_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn publish_queues_in_fifo_order() {
        let bus = EventBus::new();
        bus.publish(Event::ScanTimeout);
        bus.publish(Event::SdEnabled);
        assert!(matches!(
            bus.receiver().try_recv().unwrap(),
            Event::ScanTimeout
        ));
        assert!(matches!(bus.receiver().try_recv().unwrap(), Event::SdEnabled));
    }
}
