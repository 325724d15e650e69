//! Host-side library for a Bluetooth Mesh gateway.
//!
//! A microcontroller attached by serial port (or a TLS socket proxy)
//! acts as the radio provisioner/relay; this library drives it over a
//! framed byte protocol and exposes a high-level API to provision
//! nodes, send per-model messages, schedule periodic tasks on
//! low-power nodes, and receive telemetry.
//!
//! Entry point is [`Gateway::init`] with a [`Config`]; node persistence
//! is supplied by the caller through the [`NodeDatabase`] trait.
//! Passthrough deployments (device here, operator elsewhere) use
//! [`Passthrough::start`] instead.

#![deny(unused_must_use)]

pub mod codec;
pub mod commands;
pub mod config;
pub mod database;
pub mod events;
pub mod gateway;
pub mod link;
pub mod models;
pub mod node;
pub mod passthrough;
pub mod provisioning;

mod device;
mod error;
mod tx;
mod whitelist;

pub use config::{Config, ConfigCallback, ConfigMode, PassthroughConfig, Platform};
pub use database::{MemoryNodeDatabase, NodeDatabase};
pub use error::{Error, Result};
pub use events::{Event, EventKind, MeshMeta, ModelBody, ModelEvent, PwmtReadings};
pub use gateway::{Gateway, GatewayStatus};
pub use models::light::Rgb;
pub use models::task::Clock;
pub use node::{Board, Node, NodeRecord};
pub use passthrough::Passthrough;
