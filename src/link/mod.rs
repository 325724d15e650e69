//! Byte transport to the radio microcontroller.
//!
//! Two symmetric implementations: a UART serial port and a TCP socket
//! (the remote end of a passthrough gateway). Both run one reader and
//! one writer thread; the core only sees ordered byte chunks. The event
//! parser polls [`Link::recv`] with a short timeout so shutdown stays
//! prompt, and watches [`Link::is_connected`] to raise the disconnect
//! event.

pub mod serial;
pub mod socket;

use std::time::Duration;

/// Full-duplex byte channel to the device.
pub trait Link: Send + Sync {
    /// Queue bytes for transmission. Writes are asynchronous; transport
    /// failures surface through [`Link::is_connected`].
    fn send(&self, bytes: &[u8]);

    /// Next chunk of received bytes, or `None` on timeout.
    fn recv(&self, timeout: Duration) -> Option<Vec<u8>>;

    fn is_connected(&self) -> bool;

    /// Stop the I/O threads, flushing queued writes first.
    fn stop(&self);

    /// Discard any buffered input (used around device resets).
    fn drain(&self);
}
