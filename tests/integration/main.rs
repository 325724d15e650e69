//! End-to-end tests against a scripted mock device over loopback TCP.

mod boot_tests;
mod handle_cache_tests;
mod mock_device;
mod node_cycle_tests;
mod provisioning_flow_tests;
mod transport_tests;
