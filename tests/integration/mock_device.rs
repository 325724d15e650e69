//! Scripted mock of the radio microcontroller.
//!
//! Listens on a loopback TCP port (the gateway connects with the
//! `cloud` platform), decodes command frames with the library's own
//! codec, answers them the way the real firmware does, and lets tests
//! inject arbitrary event frames. Every received command is recorded
//! for assertions.

use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use meshgw::codec::{Frame, FrameDecoder, encode_frame};
use meshgw::provisioning::crypto::{Keypair, generate_keypair, shared_secret};

/// Device key handed out on provisioning completion.
pub const MOCK_DEVKEY: [u8; 16] = [0x5A; 16];

/// Replay-cache capacity the mock reports.
pub const MOCK_CACHE_SIZE: u16 = 40;

pub struct MockDevice {
    addr: String,
    inner: Arc<Inner>,
}

struct Inner {
    cmds: Mutex<Vec<Frame>>,
    stream: Mutex<Option<TcpStream>>,
    devkey_handle: AtomicU16,
    addr_handle: AtomicU16,
    sub_handle: AtomicU16,
    token: AtomicU32,
    keys: Keypair,
    gw_public: Mutex<Option<[u8; 64]>>,
}

impl MockDevice {
    /// Bind, start the accept/serve thread, and return the dial
    /// address.
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let inner = Arc::new(Inner {
            cmds: Mutex::new(Vec::new()),
            stream: Mutex::new(None),
            devkey_handle: AtomicU16::new(0x0100),
            addr_handle: AtomicU16::new(0x0200),
            sub_handle: AtomicU16::new(0x0300),
            token: AtomicU32::new(1),
            keys: generate_keypair(),
            gw_public: Mutex::new(None),
        });

        let serve = Arc::clone(&inner);
        std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            stream
                .set_read_timeout(Some(Duration::from_millis(100)))
                .unwrap();
            *serve.stream.lock() = Some(stream.try_clone().unwrap());

            // A freshly connected device announces its boot.
            serve.send_frame(0x81, &[0x02, 0x00, 0x1E]);

            serve.read_loop(stream);
        });

        Self { addr, inner }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// All commands received so far.
    pub fn commands(&self) -> Vec<Frame> {
        self.inner.cmds.lock().clone()
    }

    /// Wait until `pred` matches a received command.
    pub fn wait_for(&self, timeout: Duration, pred: impl Fn(&Frame) -> bool) -> Option<Frame> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(frame) = self.inner.cmds.lock().iter().find(|f| pred(f)) {
                return Some(frame.clone());
            }
            if Instant::now() >= deadline {
                return None;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    /// Wait for the next `PacketSend` whose mesh payload matches, then
    /// return that payload (access opcode + data).
    pub fn wait_for_mesh(&self, timeout: Duration, pred: impl Fn(&[u8]) -> bool) -> Option<Vec<u8>> {
        self.wait_for(timeout, |f| {
            f.opcode == 0xAB && f.payload.len() > 10 && pred(&f.payload[10..])
        })
        .map(|f| f.payload[10..].to_vec())
    }

    /// Wait until the boot configuration has run to its last step (the
    /// temperature group subscription).
    pub fn wait_boot(&self) -> bool {
        self.wait_for(Duration::from_secs(5), |f| {
            f.opcode == 0xA1 && f.payload == 49400_u16.to_le_bytes()
        })
        .is_some()
    }

    /// Inject a raw event frame.
    pub fn inject(&self, opcode: u8, payload: &[u8]) {
        self.inner.send_frame(opcode, payload);
    }

    /// Inject a model event (0xD0) with the standard metadata header.
    pub fn inject_model(&self, src: u16, seq: u32, access_opcode: &[u8], data: &[u8]) {
        let mut payload = Vec::new();
        payload.extend_from_slice(&src.to_le_bytes()); // src
        payload.extend_from_slice(&1_u16.to_le_bytes()); // dst
        payload.extend_from_slice(&0_u16.to_le_bytes()); // appkey handle
        payload.extend_from_slice(&0_u16.to_le_bytes()); // subnet handle
        payload.push(4); // ttl
        payload.push(1); // adv addr type
        payload.extend_from_slice(&[0x66, 0x55, 0x44, 0x33, 0x22, 0x11]); // adv addr (wire order)
        payload.push((-40_i8) as u8); // rssi
        payload.extend_from_slice(&((access_opcode.len() + data.len()) as u16).to_le_bytes());
        payload.extend_from_slice(&seq.to_le_bytes());
        payload.extend_from_slice(access_opcode);
        payload.extend_from_slice(data);
        self.inner.send_frame(0xD0, &payload);
    }
}

impl Inner {
    fn send_frame(&self, opcode: u8, payload: &[u8]) {
        if let Some(stream) = self.stream.lock().as_mut() {
            let _ = stream.write_all(&encode_frame(opcode, payload));
        }
    }

    /// Command response event.
    fn rsp(&self, opcode: u8, result: u8, data: &[u8]) {
        let mut payload = vec![opcode, result];
        payload.extend_from_slice(data);
        self.send_frame(0x84, &payload);
    }

    fn read_loop(&self, mut stream: TcpStream) {
        use std::io::Read;
        // Commands carry no boot preamble: prime the decoder with a
        // synthetic one so it starts framing immediately.
        let mut decoder = FrameDecoder::new();
        let _ = decoder.feed(&encode_frame(0x81, &[0x02, 0x00, 0x00]));
        let mut buf = [0_u8; 4096];

        loop {
            let n = match stream.read(&mut buf) {
                Ok(0) => return,
                Ok(n) => n,
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    continue;
                }
                Err(_) => return,
            };
            for frame in decoder.feed(&buf[..n]) {
                self.cmds.lock().push(frame.clone());
                self.respond(&frame);
            }
        }
    }

    fn respond(&self, frame: &Frame) {
        match frame.opcode {
            // Reset: boot again.
            0x0E => self.send_frame(0x81, &[0x02, 0x00, 0x1E]),

            // Echo: reflect the payload.
            0x02 => self.send_frame(0x82, &frame.payload),

            // Application command: plain ack, plus the cache-size
            // event for the size query.
            0x20 => {
                self.rsp(0x20, 0, &[]);
                if frame.payload.first() == Some(&0x04) {
                    let mut data = vec![0x04];
                    data.extend_from_slice(&MOCK_CACHE_SIZE.to_le_bytes());
                    self.send_frame(0x8A, &data);
                }
            }

            0xAC | 0x9F | 0xAE | 0x61 | 0x62 => self.rsp(frame.opcode, 0, &[]),

            // Key installs return handles.
            0x92 | 0x97 => self.rsp(frame.opcode, 0, &0_u16.to_le_bytes()),
            0xA1 => {
                let handle = self.sub_handle.fetch_add(1, Ordering::Relaxed);
                self.rsp(0xA1, 0, &handle.to_le_bytes());
            }
            0x9C => {
                let handle = self.devkey_handle.fetch_add(1, Ordering::Relaxed);
                self.rsp(0x9C, 0, &handle.to_le_bytes());
            }
            0xA4 => {
                let handle = self.addr_handle.fetch_add(1, Ordering::Relaxed);
                self.rsp(0xA4, 0, &handle.to_le_bytes());
            }
            0x9D | 0xA3 | 0xA6 => self.rsp(frame.opcode, 0, &[]),

            // Packet send: token response plus transmit completion.
            0xAB => {
                let token = self.token.fetch_add(1, Ordering::Relaxed);
                let mut data = vec![0xAB, 0x00];
                data.extend_from_slice(&token.to_le_bytes());
                self.send_frame(0x84, &data);
                self.send_frame(0xD2, &token.to_le_bytes());
            }

            // Provisioning exchange.
            0x69 => {
                // KeypairSet: remember the gateway's public key.
                if frame.payload.len() >= 96 {
                    let mut public = [0_u8; 64];
                    public.copy_from_slice(&frame.payload[32..96]);
                    *self.gw_public.lock() = Some(public);
                }
            }
            0x63 => {
                self.send_frame(0xC1, &[0]); // link established
                self.send_frame(0xC3, &[0]); // capabilities
            }
            0x66 => {
                // OOB selected: request the ECDH secret. The device
                // echoes the provisioner's own private key back, which
                // the mock recovers from the recorded KeypairSet.
                let private = self
                    .cmds
                    .lock()
                    .iter()
                    .rev()
                    .find(|f| f.opcode == 0x69)
                    .map(|f| f.payload[..32].to_vec())
                    .expect("keypair set first");
                let mut data = vec![0_u8];
                data.extend_from_slice(&self.keys.public);
                data.extend_from_slice(&private);
                self.send_frame(0xC7, &data);
            }
            0x68 => {
                // Verify the shared secret, then complete.
                let gw_public = (*self.gw_public.lock()).expect("keypair set first");
                let expected = shared_secret(&self.keys.private, &gw_public).unwrap();
                assert_eq!(&frame.payload[1..33], expected.as_slice(), "ECDH mismatch");

                let mut data = vec![0_u8]; // context
                data.extend_from_slice(&0_u32.to_le_bytes()); // iv index
                data.extend_from_slice(&0_u16.to_le_bytes()); // netkey index
                data.extend_from_slice(&21_u16.to_le_bytes()); // address
                data.push(0); // iv update
                data.push(0); // key refresh
                data.extend_from_slice(&MOCK_DEVKEY);
                data.extend_from_slice(&[0x11; 16]); // netkey
                self.send_frame(0xC5, &data);
                self.send_frame(0xC2, &[0, 0]); // link closed, success
            }

            _ => {}
        }
    }
}

/// Poll until `cond` holds.
pub fn wait_until(timeout: Duration, cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    cond()
}
