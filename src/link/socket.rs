//! TCP socket link.
//!
//! The `cloud` platform drives a gateway whose serial port lives behind
//! a passthrough proxy; this end is a plain TCP client. A 20 s read
//! timeout keeps the reader responsive to shutdown; a zero-length read
//! marks the link disconnected, which the event parser turns into a
//! `UartDisconnection` event.

use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;

use crate::error::Result;
use crate::link::Link;

const READ_TIMEOUT: Duration = Duration::from_secs(20);

pub struct SocketLink {
    write_tx: Sender<Vec<u8>>,
    read_rx: Receiver<Vec<u8>>,
    running: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
    stream: TcpStream,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl SocketLink {
    /// Connect to `addr` (`host:port`) and start the I/O threads.
    pub fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_read_timeout(Some(READ_TIMEOUT))?;
        Self::from_stream(stream)
    }

    /// Wrap an already-connected stream.
    pub fn from_stream(stream: TcpStream) -> Result<Self> {
        stream.set_read_timeout(Some(READ_TIMEOUT))?;
        let reader = stream.try_clone()?;
        let writer = stream.try_clone()?;

        let running = Arc::new(AtomicBool::new(true));
        let connected = Arc::new(AtomicBool::new(true));
        let (write_tx, write_rx) = unbounded::<Vec<u8>>();
        let (read_tx, read_rx) = unbounded::<Vec<u8>>();

        let mut threads = Vec::new();
        threads.push(
            std::thread::Builder::new()
                .name("socket-reader".into())
                .spawn({
                    let running = Arc::clone(&running);
                    let connected = Arc::clone(&connected);
                    move || read_loop(reader, &read_tx, &running, &connected)
                })
                .expect("spawn socket reader"),
        );
        threads.push(
            std::thread::Builder::new()
                .name("socket-writer".into())
                .spawn({
                    let running = Arc::clone(&running);
                    let connected = Arc::clone(&connected);
                    move || write_loop(writer, &write_rx, &running, &connected)
                })
                .expect("spawn socket writer"),
        );

        Ok(Self {
            write_tx,
            read_rx,
            running,
            connected,
            stream,
            threads: Mutex::new(threads),
        })
    }
}

fn read_loop(
    mut stream: TcpStream,
    read_tx: &Sender<Vec<u8>>,
    running: &AtomicBool,
    connected: &AtomicBool,
) {
    let mut buf = [0_u8; 4096];
    while running.load(Ordering::Relaxed) {
        match stream.read(&mut buf) {
            Ok(0) => {
                log::error!("socket closed by peer");
                connected.store(false, Ordering::Relaxed);
                break;
            }
            Ok(n) => {
                let _ = read_tx.send(buf[..n].to_vec());
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => {
                log::error!("socket read: {e}");
                connected.store(false, Ordering::Relaxed);
                break;
            }
        }
    }
}

fn write_loop(
    mut stream: TcpStream,
    write_rx: &Receiver<Vec<u8>>,
    running: &AtomicBool,
    connected: &AtomicBool,
) {
    let mut write = |msg: Vec<u8>| {
        if let Err(e) = stream.write_all(&msg) {
            log::error!("socket write: {e}");
            connected.store(false, Ordering::Relaxed);
        }
    };

    while running.load(Ordering::Relaxed) {
        if let Ok(msg) = write_rx.recv_timeout(Duration::from_secs(1)) {
            write(msg);
        }
    }
    while let Ok(msg) = write_rx.try_recv() {
        write(msg);
    }
}

impl Link for SocketLink {
    fn send(&self, bytes: &[u8]) {
        log::trace!("TX: {}", hex::encode(bytes));
        let _ = self.write_tx.send(bytes.to_vec());
    }

    fn recv(&self, timeout: Duration) -> Option<Vec<u8>> {
        self.read_rx.recv_timeout(timeout).ok()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
        self.connected.store(false, Ordering::Relaxed);
        let _ = self.stream.shutdown(Shutdown::Both);
        for handle in self.threads.lock().drain(..) {
            let _ = handle.join();
        }
    }

    fn drain(&self) {
        while self.read_rx.try_recv().is_ok() {}
    }
}
