//! Passthrough mode: expose a local device to a remote server.
//!
//! Instead of driving the mesh itself, the gateway relays raw bytes
//! between the local serial port and a TLS connection to a remote
//! operator (whose end speaks [`SocketLink`](crate::link::socket)).
//! The client reconnects every 10 s; on every (re)connect the local
//! input buffer is drained and the device hard-reset so the remote side
//! sees a clean boot preamble.

use std::io::{BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use rustls::client::{ServerCertVerified, ServerCertVerifier};
use rustls::{Certificate, ClientConfig, ClientConnection, PrivateKey, ServerName, StreamOwned};

use crate::commands::Command;
use crate::config::PassthroughConfig;
use crate::error::{Error, Result};
use crate::link::serial::SerialLink;
use crate::link::Link;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const RECONNECT_DELAY: Duration = Duration::from_secs(10);

pub struct Passthrough {
    link: Arc<dyn Link>,
    running: Arc<AtomicBool>,
    connected: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Passthrough {
    /// Open the local port and start the reconnect loop.
    pub fn start(config: PassthroughConfig) -> Result<Self> {
        let link: Arc<dyn Link> = Arc::new(SerialLink::open(&config.port)?);
        let tls = Arc::new(build_tls_config(&config)?);

        let running = Arc::new(AtomicBool::new(true));
        let connected = Arc::new(AtomicBool::new(false));

        let thread = std::thread::Builder::new()
            .name("passthrough".into())
            .spawn({
                let link = Arc::clone(&link);
                let running = Arc::clone(&running);
                let connected = Arc::clone(&connected);
                move || keep_connected(&config, &tls, &link, &running, &connected)
            })
            .expect("spawn passthrough");

        log::debug!("starting passthrough mode");
        Ok(Self {
            link,
            running,
            connected,
            thread: Mutex::new(Some(thread)),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn stop(&self) {
        log::debug!("stopping passthrough mode");
        self.running.store(false, Ordering::Relaxed);
        if let Some(thread) = self.thread.lock().take() {
            let _ = thread.join();
        }
        self.link.stop();
    }
}

// ── Connection management ────────────────────────────────────

fn keep_connected(
    config: &PassthroughConfig,
    tls: &Arc<ClientConfig>,
    link: &Arc<dyn Link>,
    running: &AtomicBool,
    connected: &AtomicBool,
) {
    while running.load(Ordering::Relaxed) {
        log::debug!("trying to connect to {}:{}", config.address, config.tcp_port);
        let mut stream = match connect(config, tls) {
            Ok(stream) => stream,
            Err(e) => {
                log::debug!(
                    "unable to connect ({e}), retrying in {}s",
                    RECONNECT_DELAY.as_secs()
                );
                // Sleep in slices so stop() stays prompt.
                for _ in 0..RECONNECT_DELAY.as_secs() {
                    if !running.load(Ordering::Relaxed) {
                        return;
                    }
                    std::thread::sleep(Duration::from_secs(1));
                }
                continue;
            }
        };
        log::debug!("connected");
        connected.store(true, Ordering::Relaxed);

        // The remote side wants a clean boot: flush stale bytes and
        // force the device through reset.
        link.drain();
        link.send(&Command::Reset.encode());

        relay(&mut stream, link, running);
        connected.store(false, Ordering::Relaxed);
        log::debug!("connection closed");
    }
}

fn connect(config: &PassthroughConfig, tls: &Arc<ClientConfig>) -> Result<TlsStream> {
    let addr = (config.address.as_str(), config.tcp_port)
        .to_socket_addrs()?
        .next()
        .ok_or(Error::Link("server address did not resolve"))?;

    let tcp = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)?;
    // Short read timeout: the relay loop alternates directions.
    tcp.set_read_timeout(Some(Duration::from_millis(100)))?;

    let server_name = ServerName::try_from(config.address.as_str())
        .map_err(|_| Error::Link("invalid server name"))?;
    let conn = ClientConnection::new(Arc::clone(tls), server_name)?;
    Ok(StreamOwned::new(conn, tcp))
}

type TlsStream = StreamOwned<ClientConnection, TcpStream>;

/// Pump bytes both ways until either side drops.
fn relay(stream: &mut TlsStream, link: &Arc<dyn Link>, running: &AtomicBool) {
    let mut buf = [0_u8; 4096];
    while running.load(Ordering::Relaxed) {
        if let Some(chunk) = link.recv(Duration::from_millis(10)) {
            if let Err(e) = stream.write_all(&chunk) {
                log::error!("passthrough send: {e}");
                return;
            }
        }

        match stream.read(&mut buf) {
            Ok(0) => return,
            Ok(n) => link.send(&buf[..n]),
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => {
                log::error!("passthrough receive: {e}");
                return;
            }
        }
    }
}

// ── TLS setup ────────────────────────────────────────────────

/// TLS 1.2+ client config: CA-pinned verification when a CA is given,
/// otherwise encrypted but unverified; optional mutual auth.
fn build_tls_config(config: &PassthroughConfig) -> Result<ClientConfig> {
    let builder = ClientConfig::builder().with_safe_defaults();

    let tls = match &config.ca_cert {
        Some(path) => {
            let mut roots = rustls::RootCertStore::empty();
            for cert in load_certs(path)? {
                roots
                    .add(&cert)
                    .map_err(|_| Error::Link("invalid CA certificate"))?;
            }
            let builder = builder.with_root_certificates(roots);
            match (&config.client_cert, &config.client_key) {
                (Some(cert), Some(key)) => {
                    builder.with_client_auth_cert(load_certs(cert)?, load_key(key)?)?
                }
                _ => builder.with_no_client_auth(),
            }
        }
        None => {
            let builder = builder.with_custom_certificate_verifier(Arc::new(AcceptAnyCert));
            match (&config.client_cert, &config.client_key) {
                (Some(cert), Some(key)) => {
                    builder.with_client_auth_cert(load_certs(cert)?, load_key(key)?)?
                }
                _ => builder.with_no_client_auth(),
            }
        }
    };
    Ok(tls)
}

fn load_certs(path: &std::path::Path) -> Result<Vec<Certificate>> {
    let mut reader = BufReader::new(std::fs::File::open(path)?);
    Ok(rustls_pemfile::certs(&mut reader)?
        .into_iter()
        .map(Certificate)
        .collect())
}

fn load_key(path: &std::path::Path) -> Result<PrivateKey> {
    let mut reader = BufReader::new(std::fs::File::open(path)?);
    if let Some(key) = rustls_pemfile::pkcs8_private_keys(&mut reader)?.into_iter().next() {
        return Ok(PrivateKey(key));
    }
    let mut reader = BufReader::new(std::fs::File::open(path)?);
    rustls_pemfile::rsa_private_keys(&mut reader)?
        .into_iter()
        .next()
        .map(PrivateKey)
        .ok_or(Error::Link("no private key found in file"))
}

/// Verifier used when no CA is pinned: the tunnel is still encrypted,
/// the peer is not authenticated.
struct AcceptAnyCert;

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &Certificate,
        _intermediates: &[Certificate],
        _server_name: &ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: std::time::SystemTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }
}
