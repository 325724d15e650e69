//! Typed device commands and their wire encoding.
//!
//! Each variant maps to one opcode of the serial protocol; `encode`
//! produces the complete `[len][opcode][payload]` frame. Scalar fields
//! pack little-endian. The `Application` command (0x20) multiplexes
//! gateway-firmware specifics behind one opcode, including the OTA
//! download sequence used by external flashing tools.

use crate::codec::encode_frame;

/// Fixed application key installed at boot (index 0).
pub const APP_KEY: [u8; 16] = [
    0x4F, 0x68, 0xAD, 0x85, 0xD9, 0xF4, 0x8A, 0xC8, 0x58, 0x9D, 0xF6, 0x65, 0xB6, 0xB4, 0x9B, 0x8A,
];

/// Pub/sub group addresses the gateway subscribes to at boot.
pub mod group {
    /// Wake-up model broadcasts.
    pub const WAKE: u16 = 49156;
    /// Temperature model broadcasts.
    pub const NRFTEMP: u16 = 49400;
}

/// A command frame bound for the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Echo(Vec<u8>),
    Reset,
    AdvAddrGet,
    StateClear,
    SetNetState {
        iv_index: u32,
        iv_update: u8,
        iv_update_timeout: u16,
        seq: u32,
    },
    GetNetState,
    EnableMesh,
    DisableMesh,
    AddrLocalUnicastSet {
        start: u16,
        count: u16,
    },
    AddrLocalUnicastGet,
    SubnetAdd {
        index: u16,
        key: [u8; 16],
    },
    AppkeyAdd {
        index: u16,
        subnet: u16,
        key: [u8; 16],
    },
    DevkeyAdd {
        owner_addr: u16,
        subnet: u16,
        key: [u8; 16],
    },
    DevkeyDelete {
        handle: u16,
    },
    ScanStart,
    ScanStop,
    Provision {
        uuid: [u8; 16],
        netkey: [u8; 16],
        netkey_index: u16,
        address: u16,
    },
    OobUse {
        method: u8,
        action: u8,
        size: u8,
    },
    AuthData([u8; 16]),
    EcdhSecret([u8; 32]),
    KeypairSet {
        private: [u8; 32],
        public: [u8; 64],
    },
    SubscriptionAdd {
        address: u16,
    },
    SubscriptionRemove {
        handle: u16,
    },
    PublicationAdd {
        address: u16,
    },
    PublicationRemove {
        handle: u16,
    },
    PacketSend {
        appkey_handle: u16,
        src_addr: u16,
        dst_handle: u16,
        ttl: u8,
        force_segmented: u8,
        transmic_size: u8,
        data: Vec<u8>,
    },
    Application {
        opcode: u8,
        data: Vec<u8>,
    },
}

/// Sub-opcodes of [`Command::Application`].
pub mod app_opcode {
    pub const CLEAR_NODE_REPLAY_CACHE: u8 = 0x01;
    pub const GET_REPLAY_CACHE_SIZE: u8 = 0x04;
    pub const ENABLE_SOFTDEVICE: u8 = 0x05;
    pub const DISABLE_SOFTDEVICE: u8 = 0x06;
    pub const UPDATE_START_DATA: u8 = 0x07;
    pub const UPDATE_BIN_DATA: u8 = 0x08;
    pub const UPDATE_SEND: u8 = 0x09;
    pub const SET_LED: u8 = 0x0A;
    pub const UPDATE_INSTALL: u8 = 0x0B;
    pub const UPDATE_STATUS: u8 = 0x0C;
}

impl Command {
    pub fn opcode(&self) -> u8 {
        match self {
            Self::Echo(_) => 0x02,
            Self::Reset => 0x0E,
            Self::Application { .. } => 0x20,
            Self::AdvAddrGet => 0x41,
            Self::ScanStart => 0x61,
            Self::ScanStop => 0x62,
            Self::Provision { .. } => 0x63,
            Self::OobUse { .. } => 0x66,
            Self::AuthData(_) => 0x67,
            Self::EcdhSecret(_) => 0x68,
            Self::KeypairSet { .. } => 0x69,
            Self::EnableMesh => 0x90,
            Self::DisableMesh => 0x91,
            Self::SubnetAdd { .. } => 0x92,
            Self::AppkeyAdd { .. } => 0x97,
            Self::DevkeyAdd { .. } => 0x9C,
            Self::DevkeyDelete { .. } => 0x9D,
            Self::AddrLocalUnicastSet { .. } => 0x9F,
            Self::AddrLocalUnicastGet => 0xA0,
            Self::SubscriptionAdd { .. } => 0xA1,
            Self::SubscriptionRemove { .. } => 0xA3,
            Self::PublicationAdd { .. } => 0xA4,
            Self::PublicationRemove { .. } => 0xA6,
            Self::PacketSend { .. } => 0xAB,
            Self::StateClear => 0xAC,
            Self::SetNetState { .. } => 0xAE,
            Self::GetNetState => 0xAF,
        }
    }

    fn payload(&self) -> Vec<u8> {
        let mut p = Vec::new();
        match self {
            Self::Echo(data) => p.extend_from_slice(data),

            Self::Reset
            | Self::AdvAddrGet
            | Self::StateClear
            | Self::GetNetState
            | Self::EnableMesh
            | Self::DisableMesh
            | Self::AddrLocalUnicastGet
            | Self::ScanStart
            | Self::ScanStop => {}

            Self::SetNetState {
                iv_index,
                iv_update,
                iv_update_timeout,
                seq,
            } => {
                p.extend_from_slice(&iv_index.to_le_bytes());
                p.push(*iv_update);
                p.extend_from_slice(&iv_update_timeout.to_le_bytes());
                p.extend_from_slice(&seq.to_le_bytes());
            }

            Self::AddrLocalUnicastSet { start, count } => {
                p.extend_from_slice(&start.to_le_bytes());
                p.extend_from_slice(&count.to_le_bytes());
            }

            Self::SubnetAdd { index, key } => {
                p.extend_from_slice(&index.to_le_bytes());
                p.extend_from_slice(key);
            }

            Self::AppkeyAdd { index, subnet, key } => {
                p.extend_from_slice(&index.to_le_bytes());
                p.extend_from_slice(&subnet.to_le_bytes());
                p.extend_from_slice(key);
            }

            Self::DevkeyAdd {
                owner_addr,
                subnet,
                key,
            } => {
                p.extend_from_slice(&owner_addr.to_le_bytes());
                p.extend_from_slice(&subnet.to_le_bytes());
                p.extend_from_slice(key);
            }

            Self::DevkeyDelete { handle }
            | Self::SubscriptionRemove { handle }
            | Self::PublicationRemove { handle } => {
                p.extend_from_slice(&handle.to_le_bytes());
            }

            Self::SubscriptionAdd { address } | Self::PublicationAdd { address } => {
                p.extend_from_slice(&address.to_le_bytes());
            }

            Self::Provision {
                uuid,
                netkey,
                netkey_index,
                address,
            } => {
                p.push(0); // context id
                p.extend_from_slice(uuid);
                p.extend_from_slice(netkey);
                p.extend_from_slice(&netkey_index.to_le_bytes());
                p.extend_from_slice(&0_u32.to_le_bytes()); // iv index
                p.extend_from_slice(&address.to_le_bytes());
                p.push(0); // iv update flag
                p.push(0); // key refresh flag
                p.push(0); // attention duration
            }

            Self::OobUse {
                method,
                action,
                size,
            } => {
                p.push(0); // context id
                p.push(*method);
                p.push(*action);
                p.push(*size);
            }

            Self::AuthData(data) => {
                p.push(0); // context id
                p.extend_from_slice(data);
            }

            Self::EcdhSecret(secret) => {
                p.push(0); // context id
                p.extend_from_slice(secret);
            }

            Self::KeypairSet { private, public } => {
                p.extend_from_slice(private);
                p.extend_from_slice(public);
            }

            Self::PacketSend {
                appkey_handle,
                src_addr,
                dst_handle,
                ttl,
                force_segmented,
                transmic_size,
                data,
            } => {
                p.extend_from_slice(&appkey_handle.to_le_bytes());
                p.extend_from_slice(&src_addr.to_le_bytes());
                p.extend_from_slice(&dst_handle.to_le_bytes());
                p.push(*ttl);
                p.push(*force_segmented);
                p.push(*transmic_size);
                p.push(0); // friendship credential flag
                p.extend_from_slice(data);
            }

            Self::Application { opcode, data } => {
                p.push(*opcode);
                p.extend_from_slice(data);
            }
        }
        p
    }

    /// Full wire frame for the command.
    pub fn encode(&self) -> Vec<u8> {
        encode_frame(self.opcode(), &self.payload())
    }

    // ── Application command constructors ──────────────────────

    pub fn clear_node_replay_cache(unicast_addr: u16) -> Self {
        Self::Application {
            opcode: app_opcode::CLEAR_NODE_REPLAY_CACHE,
            data: unicast_addr.to_le_bytes().to_vec(),
        }
    }

    pub fn get_replay_cache_size() -> Self {
        Self::Application {
            opcode: app_opcode::GET_REPLAY_CACHE_SIZE,
            data: Vec::new(),
        }
    }

    pub fn enable_softdevice() -> Self {
        Self::Application {
            opcode: app_opcode::ENABLE_SOFTDEVICE,
            data: Vec::new(),
        }
    }

    pub fn disable_softdevice() -> Self {
        Self::Application {
            opcode: app_opcode::DISABLE_SOFTDEVICE,
            data: Vec::new(),
        }
    }

    pub fn update_start_data(start_address: u32, size: u32, signature: &[u8]) -> Self {
        let mut data = Vec::with_capacity(8 + signature.len());
        data.extend_from_slice(&start_address.to_le_bytes());
        data.extend_from_slice(&size.to_le_bytes());
        data.extend_from_slice(signature);
        Self::Application {
            opcode: app_opcode::UPDATE_START_DATA,
            data,
        }
    }

    pub fn update_bin_data(address: u32, bin: &[u8]) -> Self {
        let mut data = Vec::with_capacity(4 + bin.len());
        data.extend_from_slice(&address.to_le_bytes());
        data.extend_from_slice(bin);
        Self::Application {
            opcode: app_opcode::UPDATE_BIN_DATA,
            data,
        }
    }

    pub fn update_send() -> Self {
        Self::Application {
            opcode: app_opcode::UPDATE_SEND,
            data: Vec::new(),
        }
    }

    pub fn set_gateway_led(r: u8, g: u8, b: u8) -> Self {
        Self::Application {
            opcode: app_opcode::SET_LED,
            data: vec![r, g, b],
        }
    }

    pub fn update_install(update_type: u32) -> Self {
        Self::Application {
            opcode: app_opcode::UPDATE_INSTALL,
            data: update_type.to_le_bytes().to_vec(),
        }
    }

    pub fn update_status() -> Self {
        Self::Application {
            opcode: app_opcode::UPDATE_STATUS,
            data: Vec::new(),
        }
    }
}
