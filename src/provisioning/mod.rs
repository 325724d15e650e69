//! Scan-and-provision pipeline.
//!
//! [`filter`] admits discovered devices by UUID/MAC prefix, [`crypto`]
//! supplies the P-256 key material for the provisioning ECDH, and
//! [`engine`] drives the link → capabilities → ECDH → complete state
//! machine against the device.

pub mod crypto;
pub mod engine;
pub mod filter;

/// First unicast address handed out to provisioned nodes; lower
/// addresses are reserved for gateways.
pub const NODE_START_UNICAST: u16 = 21;
