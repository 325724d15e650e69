//! Library configuration.

use std::path::PathBuf;
use std::sync::Arc;

use crate::database::NodeDatabase;
use crate::error::{Error, Result};
use crate::gateway::Gateway;
use crate::node::Node;

/// Callback invoked when a node enters a configuration session. It may
/// enqueue tasks for the node through the [`Gateway`] it receives.
pub type ConfigCallback = Arc<dyn Fn(&Gateway, &Arc<Node>) + Send + Sync>;

/// Hardware platform the library runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// Development kit on a local serial port.
    Desktop,
    /// Gateway board, first revision.
    Heimdall,
    /// Gateway board, second revision.
    HeimdallV2,
    /// Compute-module carrier.
    CmV1,
    /// Remote device behind a TCP passthrough.
    Cloud,
}

impl Platform {
    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "desktop" => Ok(Self::Desktop),
            "heimdall" => Ok(Self::Heimdall),
            "heimdall_v2" => Ok(Self::HeimdallV2),
            "cm_v1" => Ok(Self::CmV1),
            "cloud" => Ok(Self::Cloud),
            _ => Err(Error::InvalidArgument("unknown platform")),
        }
    }

    pub fn is_remote(self) -> bool {
        self == Self::Cloud
    }
}

/// Task-configuration dialect spoken by the node firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConfigMode {
    /// Old firmware: schedules cannot be changed, only deleted and
    /// re-installed.
    #[default]
    Legacy,
    /// Current firmware with the change operation.
    Default,
}

/// Normal-mode configuration.
#[derive(Clone)]
pub struct Config {
    pub node_db: Arc<dyn NodeDatabase>,
    pub platform: Platform,
    /// Serial port path, or `host:port` for the cloud platform.
    pub port: String,
    pub config_cb: Option<ConfigCallback>,
    /// Where the outbound sequence number is persisted.
    pub seq_number_file: PathBuf,
    /// Provision-only mode: no node configuration traffic.
    pub prov_mode: bool,
    pub config_mode: ConfigMode,
}

impl Config {
    pub fn new(node_db: Arc<dyn NodeDatabase>, platform: Platform, port: impl Into<String>) -> Self {
        Self {
            node_db,
            platform,
            port: port.into(),
            config_cb: None,
            seq_number_file: PathBuf::from(".seq_number"),
            prov_mode: false,
            config_mode: ConfigMode::Legacy,
        }
    }
}

/// Passthrough-mode configuration: relay a local device to a remote
/// server over TLS.
#[derive(Debug, Clone)]
pub struct PassthroughConfig {
    pub platform: Platform,
    /// Local serial port of the device being exposed.
    pub port: String,
    /// Remote server host.
    pub address: String,
    pub tcp_port: u16,
    /// CA certificate for server verification; no verification when
    /// absent.
    pub ca_cert: Option<PathBuf>,
    /// Client certificate and key for mutual auth.
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
}
