//! Length-prefix frame codec for the device serial protocol.
//!
//! Wire format:
//! ```text
//! ┌─────────┬────────┬──────────────────┐
//! │ Len (1B) │ Opcode │ Payload (N B)    │
//! │ 1 + N    │ (1B)   │                  │
//! └─────────┴────────┴──────────────────┘
//! ```
//!
//! Multi-byte payload integers are little-endian unless a field says
//! otherwise; MAC addresses travel reversed on the wire.
//!
//! The decoder is a streaming state machine. It starts unsynchronised
//! and scans for the `04 81 02` boot preamble (the device-started frame
//! the microcontroller emits after reset); a framing error re-enters the
//! scan. Frames whose payload later fails event validation are dropped
//! by the parser without resynchronising — the length prefix keeps the
//! stream aligned.

/// First three bytes of the device-started frame: length 4, opcode 0x81,
/// operating mode 2.
pub const BOOT_PREAMBLE: [u8; 3] = [0x04, 0x81, 0x02];

/// A complete `[len][opcode][payload]` frame, framing stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub opcode: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Re-serialise the frame, `len = 1 + |payload|`.
    pub fn encode(&self) -> Vec<u8> {
        encode_frame(self.opcode, &self.payload)
    }
}

/// Serialise one frame.
pub fn encode_frame(opcode: u8, payload: &[u8]) -> Vec<u8> {
    debug_assert!(payload.len() <= 254);
    let mut out = Vec::with_capacity(2 + payload.len());
    out.push(1 + payload.len() as u8);
    out.push(opcode);
    out.extend_from_slice(payload);
    out
}

// ── Decoder ──────────────────────────────────────────────────

enum DecoderState {
    /// Scanning for the boot preamble; `window` holds the last bytes seen.
    Sync { window: [u8; 3], filled: usize },
    /// Waiting for a length byte.
    ReadLen,
    /// Collecting `expected` bytes of opcode + payload.
    ReadBody { expected: usize, body: Vec<u8> },
}

/// Streaming frame decoder with boot-preamble resynchronisation.
pub struct FrameDecoder {
    state: DecoderState,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// A fresh decoder starts unsynchronised.
    pub fn new() -> Self {
        Self {
            state: DecoderState::Sync {
                window: [0; 3],
                filled: 0,
            },
        }
    }

    /// Drop any partial frame and scan for the boot preamble again.
    pub fn resync(&mut self) {
        self.state = DecoderState::Sync {
            window: [0; 3],
            filled: 0,
        };
    }

    /// Feed raw link bytes; returns every frame completed by this chunk.
    pub fn feed(&mut self, data: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();

        for &byte in data {
            match &mut self.state {
                DecoderState::Sync { window, filled } => {
                    window[0] = window[1];
                    window[1] = window[2];
                    window[2] = byte;
                    *filled = (*filled + 1).min(3);
                    if *filled == 3 && *window == BOOT_PREAMBLE {
                        // Mid-frame: len 4 means two payload bytes remain
                        // after the opcode and the first payload byte.
                        self.state = DecoderState::ReadBody {
                            expected: 4,
                            body: vec![BOOT_PREAMBLE[1], BOOT_PREAMBLE[2]],
                        };
                    }
                }

                DecoderState::ReadLen => {
                    if byte == 0 {
                        // A zero length cannot frame an opcode; the stream
                        // is corrupt.
                        log::warn!("zero-length frame, resynchronising");
                        self.resync();
                    } else {
                        self.state = DecoderState::ReadBody {
                            expected: byte as usize,
                            body: Vec::with_capacity(byte as usize),
                        };
                    }
                }

                DecoderState::ReadBody { expected, body } => {
                    body.push(byte);
                    if body.len() == *expected {
                        frames.push(Frame {
                            opcode: body[0],
                            payload: body[1..].to_vec(),
                        });
                        self.state = DecoderState::ReadLen;
                    }
                }
            }
        }

        frames
    }
}

// ── Access opcodes ───────────────────────────────────────────
//
// Model events carry an inner BT-Mesh access opcode of one to three
// bytes. The top two bits of the first byte select the width:
// 00/01 → 1 byte, 10 → 2 bytes, 11 → 3 bytes. The opcode value is
// big-endian within those bytes.

/// Split a model payload into `(access_opcode, rest)`.
pub fn split_access_opcode(data: &[u8]) -> Option<(u32, &[u8])> {
    let first = *data.first()?;
    let width = match first >> 6 {
        0b00 | 0b01 => 1,
        0b10 => 2,
        _ => 3,
    };
    if data.len() < width {
        return None;
    }
    let mut opcode = 0_u32;
    for &b in &data[..width] {
        opcode = (opcode << 8) | u32::from(b);
    }
    Some((opcode, &data[width..]))
}

/// Encode an access opcode in its canonical width.
pub fn encode_access_opcode(opcode: u32) -> Vec<u8> {
    if opcode <= 0xFF {
        vec![opcode as u8]
    } else if opcode <= 0xFFFF {
        (opcode as u16).to_be_bytes().to_vec()
    } else {
        let b = opcode.to_be_bytes();
        vec![b[1], b[2], b[3]]
    }
}

// ── Tests ────────────────────────────────────────────────────
