//! Frame-to-event demultiplexer.
//!
//! The parser thread pulls byte chunks off the link, runs them through
//! the streaming [`FrameDecoder`](crate::codec::FrameDecoder) and turns
//! each frame into a typed [`Event`]. Model frames additionally pass the
//! replay filter and get enriched with the emitting node from the
//! database before they reach the bus.
//!
//! A payload that fails validation is logged and dropped; the frame
//! length prefix keeps the stream aligned, so no resynchronisation is
//! needed for a bad payload. Loss of the link publishes
//! [`Event::UartDisconnection`] and stops the thread.

use std::sync::Arc;
use std::time::Duration;

use crate::codec::{FrameDecoder, Frame, split_access_opcode};
use crate::error::{Error, Result};
use crate::events::{Event, MeshMeta, ModelBody, ModelEvent, PwmtReadings};
use crate::gateway::Core;

/// Parser thread body.
pub(crate) fn run(core: &Arc<Core>) {
    let mut decoder = FrameDecoder::new();

    while core.is_running() {
        if !core.link.is_connected() {
            core.bus.publish(Event::UartDisconnection);
            break;
        }
        let Some(chunk) = core.link.recv(Duration::from_secs(1)) else {
            continue;
        };
        log::trace!("RX: {}", hex::encode(&chunk));

        for frame in decoder.feed(&chunk) {
            match decode_frame(core, &frame) {
                Ok(Some(event)) => core.bus.publish(event),
                Ok(None) => {}
                Err(e) => log::error!("parsing error ({:#04x}): {e}", frame.opcode),
            }
        }
    }
}

// ── Payload reader ───────────────────────────────────────────

/// Cursor over a payload; every accessor fails with a codec error
/// instead of panicking on short input.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.data.len() {
            return Err(Error::Codec(format!(
                "payload truncated: need {n} at {}, have {}",
                self.pos,
                self.data.len()
            )));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn i8(&mut self) -> Result<i8> {
        Ok(self.take(1)?[0] as i8)
    }

    fn u16_le(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn i16_le(&mut self) -> Result<i16> {
        let b = self.take(2)?;
        Ok(i16::from_le_bytes([b[0], b[1]]))
    }

    fn u24_le(&mut self) -> Result<u32> {
        let b = self.take(3)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], 0]))
    }

    fn u32_le(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i32_le(&mut self) -> Result<i32> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0_u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// 6-byte MAC, reversed back from wire order.
    fn mac(&mut self) -> Result<[u8; 6]> {
        let mut mac: [u8; 6] = self.array()?;
        mac.reverse();
        Ok(mac)
    }

    fn rest(&mut self) -> &'a [u8] {
        let slice = &self.data[self.pos..];
        self.pos = self.data.len();
        slice
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
}

// ── Frame decoding ───────────────────────────────────────────

fn decode_frame(core: &Arc<Core>, frame: &Frame) -> Result<Option<Event>> {
    let mut r = Reader::new(&frame.payload);
    let event = match frame.opcode {
        0x81 => Event::DeviceStarted {
            operating_mode: r.u8()?,
            hw_error: r.u8()?,
            data_credit: r.u8()?,
        },
        0x82 => Event::Echo(frame.payload.clone()),
        0x84 => decode_cmd_response(&mut r)?,
        0x8A => decode_application(&mut r)?,
        0xC0 => {
            let uuid: [u8; 16] = r.array()?;
            let rssi = r.i8()?;
            let gatt_supported = r.u8()?;
            let adv_addr_type = r.u8()?;
            let mac = r.mac()?;
            Event::UnprovDiscovered {
                uuid,
                mac,
                rssi,
                gatt_supported,
                adv_addr_type,
            }
        }
        0xC1 => Event::ProvLinkEstablished,
        0xC2 => {
            let _ctx = r.u8()?;
            Event::ProvLinkClosed { reason: r.u8()? }
        }
        0xC3 => Event::ProvCaps,
        0xC6 => {
            let _ctx = r.u8()?;
            Event::ProvAuthRequest {
                method: r.u8()?,
                action: r.u8()?,
                size: r.u8()?,
            }
        }
        0xC7 => {
            let _ctx = r.u8()?;
            let peer_public: [u8; 64] = r.array()?;
            let private: [u8; 32] = r.array()?;
            Event::ProvEcdh {
                peer_public,
                private,
            }
        }
        0xC5 => {
            let _ctx = r.u8()?;
            let _iv_index = r.u32_le()?;
            let _netkey_index = r.u16_le()?;
            let _address = r.u16_le()?;
            let _iv_update = r.u8()?;
            let _key_refresh = r.u8()?;
            let devkey: [u8; 16] = r.array()?;
            Event::ProvComplete { devkey }
        }
        0xC9 => {
            let _ctx = r.u8()?;
            Event::ProvFailed { code: r.u8()? }
        }
        0xD0 | 0xD1 => return decode_model(core, &frame.payload),
        0xD2 => Event::MeshTxComplete { token: r.u32_le()? },
        _ => return Ok(None),
    };
    Ok(Some(event))
}

fn decode_cmd_response(r: &mut Reader) -> Result<Event> {
    let opcode = r.u8()?;
    let result = r.u8()?;
    if opcode == 0xAB {
        let token = if result == 0 { Some(r.u32_le()?) } else { None };
        Ok(Event::RspSend { result, token })
    } else {
        Ok(Event::RspEvent {
            opcode,
            result,
            data: r.rest().to_vec(),
        })
    }
}

fn decode_application(r: &mut Reader) -> Result<Event> {
    let opcode = r.u8()?;
    Ok(match opcode {
        0x02 => Event::SeqUpdate { seq: r.u32_le()? },
        0x04 => Event::CacheSize { size: r.u16_le()? },
        0x05 => Event::SdEnabled,
        _ => {
            let mut data = vec![opcode];
            data.extend_from_slice(r.rest());
            Event::AppEvent(data)
        }
    })
}

// ── Model events ─────────────────────────────────────────────

/// Sources at or below this address with no database entry are peer
/// gateways speaking the transport model, not unknown nodes.
const GATEWAY_ADDR_MAX: u16 = 10;

fn decode_model(core: &Arc<Core>, payload: &[u8]) -> Result<Option<Event>> {
    let mut r = Reader::new(payload);
    let meta = MeshMeta {
        src: r.u16_le()?,
        dst: r.u16_le()?,
        appkey_handle: r.u16_le()?,
        subnet_handle: r.u16_le()?,
        ttl: r.u8()?,
        adv_addr_type: r.u8()?,
        adv_addr: r.mac()?,
        rssi: r.i8()?,
        actual_length: r.u16_le()?,
        sequence_number: r.u32_le()?,
    };

    if !core
        .replay
        .lock()
        .check_seq_number(meta.src, meta.sequence_number)
    {
        return Ok(None);
    }

    log::trace!(
        "model msg: src={}, dst={}, ttl={}, seq={}",
        meta.src,
        meta.dst,
        meta.ttl,
        meta.sequence_number
    );

    let node = core.db.get_node_by_address(meta.src);
    if node.is_none() && meta.src > GATEWAY_ADDR_MAX {
        return Ok(Some(Event::Model(ModelEvent {
            meta,
            node: None,
            body: ModelBody::UnknownNode,
        })));
    }

    let Some((opcode, model_data)) = split_access_opcode(r.rest()) else {
        return Err(Error::Codec("empty model payload".into()));
    };
    let mut r = Reader::new(model_data);

    let body = match opcode {
        0x804A => ModelBody::NodeReset,

        // WakeUp
        0xC0_0000 => {
            if r.remaining() == 2 {
                let tid = r.u8()?;
                let configured = r.u8()? != 0;
                ModelBody::WakeNotify {
                    tid,
                    configured: Some(configured),
                }
            } else {
                ModelBody::WakeNotify {
                    tid: r.u8()?,
                    configured: None,
                }
            }
        }
        0xC3_0000 => ModelBody::WakeAckSleep,
        0xC4_0000 => ModelBody::WakeAckWait,
        0xC5_0000 => ModelBody::WakeReset {
            board_id: r.u8()?,
            reset_reason: r.u8()?,
        },
        0xC8_0000 => ModelBody::WakeAckAlive,

        // NrfTemp
        0xC0_0200 => ModelBody::TempData {
            temp: r.u16_le()?,
            hum: r.u8()?,
            press: r.u24_le()?,
            tid: r.u8()?,
        },
        0xC1_0200 => ModelBody::IaqData {
            iaq: r.u8()?,
            tvoc: r.u16_le()?,
            etoh: r.u8()?,
            eco2: r.u16_le()?,
            tid: r.u8()?,
        },
        0xC3_0200 => ModelBody::IaAck,
        0xC4_0200 => ModelBody::TempDataReliable {
            temp: r.u16_le()?,
            hum: r.u8()?,
            press: r.u24_le()?,
            tid: r.u8()?,
        },
        0xC6_0200 => ModelBody::Co2Data {
            co2: r.u16_le()?,
            cal_status: r.u8()?,
            abc_time: r.u16_le()?,
            tid: r.u8()?,
        },
        0xC8_0200 => ModelBody::TempConfigAck,
        0xCA_0200 => ModelBody::TempCalibAck,
        0xCC_0200 => ModelBody::TempCalResetAck,
        0xCD_0200 => ModelBody::TempHeaterNotify,

        // Battery
        0xC0_0400 => ModelBody::BatData {
            millivolts: r.u16_le()?,
            tid: r.u8()?,
        },

        // Tap
        0xC0_0600 => ModelBody::TapNotify {
            kind: r.u8()?,
            color: r.u8()?,
            tid: r.u8()?,
        },
        0xC2_0600 => ModelBody::TapAckConf,

        // Light
        0xC1_0800 => ModelBody::LightAck,

        // Datetime
        0xC0_0A00 => ModelBody::DatetimeReq { tid: r.u8()? },
        0xC2_0A00 => ModelBody::DatetimeAck,

        // TaskGw
        0xC1_0C00 => ModelBody::TaskAck {
            task_index: r.i8()?,
            tid: r.u8()?,
        },
        0xC3_0C00 => ModelBody::TaskDeleteAck {
            code: r.i8()?,
            tid: r.u8()?,
        },
        0xC5_0C00 => ModelBody::TaskDeleteOpAck {
            code: r.i8()?,
            tid: r.u8()?,
        },
        0xC7_0C00 => ModelBody::TaskData {
            opcode: r.u8()?,
            event_date: r.u32_le()?,
            period: r.u24_le()?,
        },
        0xC8_0C00 => ModelBody::TaskGetTasksAck,
        0xCD_0C00 => ModelBody::TaskChangeAck {
            task_index: r.i8()?,
            tid: r.u8()?,
        },

        // Rssi
        0xC0_0E00 => ModelBody::RssiNeighborData {
            addr: r.u16_le()?,
            rssi: r.i8()?,
        },
        0xC2_0E00 => ModelBody::RssiNeighborAck,
        0xC4_0E00 => ModelBody::RssiStatusAck { rssi: r.i8()? },
        0xC5_0E00 => ModelBody::RssiPing,
        0xC6_0E00 => ModelBody::RssiPingAck,

        // Ota
        0xC1_1200 => ModelBody::OtaVersionAck { status: r.u8()? },
        0xC3_1200 => ModelBody::OtaStatusAck { status: r.u8()? },
        0xC5_1200 => ModelBody::OtaStoreAck { status: r.u8()? },
        0xC7_1200 => ModelBody::OtaRelayAck { status: r.u8()? },

        // Power
        0xC1_1400 => ModelBody::PowerAck,

        // Hwm
        0xC0_1600 => ModelBody::HwmData {
            hts: r.u8()?,
            sht: r.u8()?,
            fxx: r.u8()?,
            lps: r.u8()?,
        },
        0xC2_1600 => ModelBody::HwmAck,

        // Beacon
        0xC1_1800 => ModelBody::BeaconStartAck { tid: r.u8()? },
        0xC3_1800 => ModelBody::BeaconStopAck { tid: r.u8()? },

        // Transport
        0xC2_1A00 => ModelBody::TransportRecv {
            data: r.rest().to_vec(),
        },
        0xC3_1A00 => ModelBody::TransportFrStart { len: r.u16_le()? },
        0xC4_1A00 => ModelBody::TransportFrData {
            seq: r.u16_le()?,
            data: r.rest().to_vec(),
        },
        0xC5_1A00 => ModelBody::TransportFrEnd {
            checksum: r.array()?,
        },

        // Pwmt
        0xC0_1C00 => decode_pwmt(&mut r)?,
        0xC2_1C00 => ModelBody::PwmtConfigAck,
        0xC4_1C00 => ModelBody::PwmtConvAck,

        // Output
        0xC1_1E00 => ModelBody::OutputDacAck,
        0xC3_1E00 => ModelBody::OutputDigAck,

        _ => return Ok(None),
    };

    Ok(Some(Event::Model(ModelEvent { meta, node, body })))
}

fn decode_pwmt(r: &mut Reader) -> Result<ModelBody> {
    let ctl = r.u8()?;
    let phase_id = ctl & 0b11;
    let message_id = (ctl >> 2) & 0b11;

    let readings = if phase_id == 0 {
        match message_id {
            0 => PwmtReadings::TotalPower {
                p: r.i16_le()?,
                q: r.i16_le()?,
                s: r.i16_le()?,
            },
            1 => PwmtReadings::PhaseAngles {
                ph12: f32::from(r.i16_le()?) / 100.0,
                ph23: f32::from(r.i16_le()?) / 100.0,
                ph31: f32::from(r.i16_le()?) / 100.0,
            },
            2 => PwmtReadings::LineVoltages {
                v12: f32::from(r.u16_le()?) / 100.0,
                v23: f32::from(r.u16_le()?) / 100.0,
                v31: f32::from(r.u16_le()?) / 100.0,
            },
            _ => PwmtReadings::TotalEnergy { e: r.i32_le()? },
        }
    } else {
        match message_id {
            0 => PwmtReadings::PhaseVif {
                v: f32::from(r.u16_le()?) / 100.0,
                i: f32::from(r.u16_le()?) / 100.0,
                f: f32::from(r.u16_le()?) / 100.0,
            },
            1 => {
                let p = r.i16_le()?;
                let pf_raw = r.i16_le()?;
                PwmtReadings::PhasePower {
                    p,
                    pf: f32::from(pf_raw & 0x7F) / 100.0,
                    inductive: pf_raw < 0,
                }
            }
            2 => PwmtReadings::PhaseQs {
                q: r.i16_le()?,
                s: r.i16_le()?,
                ph: f32::from(r.i16_le()?) / 100.0,
            },
            _ => PwmtReadings::PhaseEnergy { e: r.i32_le()? },
        }
    };

    Ok(ModelBody::PwmtData { ctl, readings })
}
