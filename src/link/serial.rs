//! UART link to the microcontroller.
//!
//! 115200 baud with RTS/CTS flow control. Writes are split into bursts
//! of at most 40 bytes — the device's serial receive buffer overflows on
//! longer uninterrupted writes even with flow control enabled.

use std::io::{Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;
use serialport::{ClearBuffer, FlowControl, SerialPort};

use crate::error::Result;
use crate::link::Link;

const BAUD_RATE: u32 = 115_200;
const WRITE_BURST: usize = 40;

pub struct SerialLink {
    write_tx: Sender<Vec<u8>>,
    read_rx: Receiver<Vec<u8>>,
    running: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl SerialLink {
    /// Open `port` and start the reader and writer threads.
    pub fn open(port: &str) -> Result<Self> {
        let reader = serialport::new(port, BAUD_RATE)
            .flow_control(FlowControl::Hardware)
            .timeout(Duration::from_millis(500))
            .open()?;
        let writer = reader.try_clone()?;

        let running = Arc::new(AtomicBool::new(true));
        let connected = Arc::new(AtomicBool::new(true));
        let (write_tx, write_rx) = unbounded::<Vec<u8>>();
        let (read_tx, read_rx) = unbounded::<Vec<u8>>();

        let mut threads = Vec::new();
        threads.push(
            std::thread::Builder::new()
                .name("serial-reader".into())
                .spawn({
                    let running = Arc::clone(&running);
                    let connected = Arc::clone(&connected);
                    move || read_loop(reader, &read_tx, &running, &connected)
                })
                .expect("spawn serial reader"),
        );
        threads.push(
            std::thread::Builder::new()
                .name("serial-writer".into())
                .spawn({
                    let running = Arc::clone(&running);
                    let connected = Arc::clone(&connected);
                    move || write_loop(writer, &write_rx, &running, &connected)
                })
                .expect("spawn serial writer"),
        );

        Ok(Self {
            write_tx,
            read_rx,
            running,
            connected,
            threads: Mutex::new(threads),
        })
    }
}

fn read_loop(
    mut port: Box<dyn SerialPort>,
    read_tx: &Sender<Vec<u8>>,
    running: &AtomicBool,
    connected: &AtomicBool,
) {
    let _ = port.clear(ClearBuffer::Input);
    let mut buf = [0_u8; 256];
    while running.load(Ordering::Relaxed) {
        match port.read(&mut buf) {
            Ok(0) => {}
            Ok(n) => {
                let _ = read_tx.send(buf[..n].to_vec());
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => {
                log::error!("serial read: {e}");
                connected.store(false, Ordering::Relaxed);
                break;
            }
        }
    }
}

fn write_loop(
    mut port: Box<dyn SerialPort>,
    write_rx: &Receiver<Vec<u8>>,
    running: &AtomicBool,
    connected: &AtomicBool,
) {
    let mut write = |msg: Vec<u8>| {
        for burst in msg.chunks(WRITE_BURST) {
            if let Err(e) = port.write_all(burst) {
                log::error!("serial write: {e}");
                connected.store(false, Ordering::Relaxed);
                return;
            }
        }
    };

    while running.load(Ordering::Relaxed) {
        if let Ok(msg) = write_rx.recv_timeout(Duration::from_secs(1)) {
            write(msg);
        }
    }
    // Flush whatever was queued before the stop.
    while let Ok(msg) = write_rx.try_recv() {
        write(msg);
    }
    let _ = port.flush();
}

impl Link for SerialLink {
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
        for handle in self.threads.lock().drain(..) {
            let _ = handle.join();
        }
    }

    fn drain(&self) {
        while self.read_rx.try_recv().is_ok() {}
    }
}
