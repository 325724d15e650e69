//! Unified error types for the gateway library.
//!
//! A single `Error` enum that every subsystem converts into, keeping the
//! public API's error handling uniform. Malformed device input is never
//! fatal: parse failures are reported through [`Error::Codec`] and logged
//! by the event parser, which keeps running.

use core::fmt;

/// Every fallible operation in the library funnels into this type.
#[derive(Debug)]
pub enum Error {
    /// The link to the microcontroller is down or rejected a write.
    Link(&'static str),
    /// A frame or event payload failed structural validation.
    Codec(String),
    /// The device answered a command with a non-zero status code.
    Protocol { opcode: u8, status: u8 },
    /// A caller-supplied argument is out of range or malformed.
    InvalidArgument(&'static str),
    /// The provisioning engine could not start or finish an enrolment.
    Provisioning(&'static str),
    /// A bounded resource (addresses, sessions) is exhausted.
    Capacity(&'static str),
    /// Underlying I/O failure (serial port, socket, sequence file).
    Io(std::io::Error),
    /// TLS handshake or certificate failure in passthrough mode.
    Tls(rustls::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Link(msg) => write!(f, "link: {msg}"),
            Self::Codec(msg) => write!(f, "codec: {msg}"),
            Self::Protocol { opcode, status } => write!(
                f,
                "command {opcode:#04x} failed: {} ({status:#04x})",
                status_str(*status)
            ),
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Self::Provisioning(msg) => write!(f, "provisioning: {msg}"),
            Self::Capacity(msg) => write!(f, "capacity: {msg}"),
            Self::Io(e) => write!(f, "I/O: {e}"),
            Self::Tls(e) => write!(f, "TLS: {e}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<rustls::Error> for Error {
    fn from(e: rustls::Error) -> Self {
        Self::Tls(e)
    }
}

impl From<serialport::Error> for Error {
    fn from(e: serialport::Error) -> Self {
        Self::Io(std::io::Error::other(e))
    }
}

/// Device serial status codes, as reported in command responses.
pub fn status_str(status: u8) -> &'static str {
    match status {
        0x00 => "success",
        0x80 => "unknown error",
        0x81 => "internal error",
        0x82 => "unknown command",
        0x83 => "invalid state",
        0x84 => "invalid length",
        0x85 => "invalid parameter",
        0x86 => "busy",
        0x87 => "invalid data",
        0x8E => "rejected",
        0x93 => "timeout",
        0x98 => "invalid key data",
        _ => "unrecognised status",
    }
}

/// Library-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
