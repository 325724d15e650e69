//! Cancellable one-shot timers.
//!
//! A timer is a short-lived thread sleeping on a condvar; when the delay
//! elapses it enqueues its synthetic event on the bus. Cancellation
//! wakes the thread early and suppresses the event. Task timeouts,
//! configuration timeouts and scan timeouts are all built on this.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use parking_lot::{Condvar, Mutex};

use crate::events::Event;

struct TimerInner {
    cancelled: Mutex<bool>,
    cv: Condvar,
}

/// Handle to a pending timer. Dropping the handle does not cancel it.
#[derive(Clone)]
pub struct TimerHandle {
    inner: Arc<TimerInner>,
}

impl TimerHandle {
    /// Suppress the event if it has not fired yet.
    pub fn cancel(&self) {
        let mut cancelled = self.inner.cancelled.lock();
        *cancelled = true;
        self.inner.cv.notify_all();
    }
}

/// Arm a timer that publishes `event` after `delay`.
pub fn schedule(sender: Sender<Event>, delay: Duration, event: Event) -> TimerHandle {
    let inner = Arc::new(TimerInner {
        cancelled: Mutex::new(false),
        cv: Condvar::new(),
    });
    let handle = TimerHandle {
        inner: Arc::clone(&inner),
    };

    std::thread::spawn(move || {
        let deadline = Instant::now() + delay;
        let mut cancelled = inner.cancelled.lock();
        while !*cancelled {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let _ = inner.cv.wait_for(&mut cancelled, deadline - now);
        }
        if !*cancelled {
            let _ = sender.send(event);
        }
    });

    handle
}
