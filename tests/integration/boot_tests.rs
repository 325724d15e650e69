//! Boot handshake and sequence-number durability.

use std::sync::Arc;
use std::time::Duration;

use meshgw::{Config, ConfigMode, Gateway, MemoryNodeDatabase, Platform};

use crate::mock_device::{MOCK_CACHE_SIZE, MockDevice, wait_until};

fn gateway_config(device: &MockDevice, seq_file: &std::path::Path) -> Config {
    let db = Arc::new(MemoryNodeDatabase::new(1, [0xAA; 16]));
    let mut config = Config::new(db, Platform::Cloud, device.addr());
    config.seq_number_file = seq_file.to_path_buf();
    config.config_mode = ConfigMode::Default;
    config
}

#[test]
fn boot_configures_device_and_persists_sequence() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let seq_file = dir.path().join(".seq_number");
    std::fs::write(&seq_file, "47")?;

    let device = MockDevice::start();
    let gateway = Gateway::init(gateway_config(&device, &seq_file))?;

    // Configuration runs through: state clear, cache-size query,
    // unicast, net state, both keys, both group subscriptions.
    assert!(
        device
            .wait_for(Duration::from_secs(5), |f| f.opcode == 0xA1
                && f.payload == 49400_u16.to_le_bytes())
            .is_some(),
        "temperature subscription not seen"
    );

    // Sequence number was rounded up to the next block and sent in
    // SetNetState.
    let net_state = device
        .wait_for(Duration::from_secs(1), |f| f.opcode == 0xAE)
        .unwrap();
    assert_eq!(&net_state.payload[7..11], &100_u32.to_le_bytes());
    assert_eq!(std::fs::read_to_string(&seq_file)?, "100");

    // Boot order: StateClear before the unicast assignment, which
    // precedes SetNetState.
    let cmds: Vec<u8> = device.commands().iter().map(|f| f.opcode).collect();
    let pos = |op: u8| cmds.iter().position(|&o| o == op).unwrap();
    assert!(pos(0xAC) < pos(0x9F));
    assert!(pos(0x9F) < pos(0xAE));
    assert!(pos(0x92) < pos(0x97));

    // The device reported its capacity.
    assert!(wait_until(Duration::from_secs(1), || {
        gateway.get_status().max_nodes == MOCK_CACHE_SIZE
    }));

    // A sequence update overwrites the persisted value.
    let mut data = vec![0x02];
    data.extend_from_slice(&123_u32.to_le_bytes());
    device.inject(0x8A, &data);
    assert!(wait_until(Duration::from_secs(2), || {
        std::fs::read_to_string(&seq_file).unwrap() == "123"
    }));

    gateway.close();
    Ok(())
}

#[test]
fn echo_probe_confirms_connection() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let device = MockDevice::start();
    let gateway = Gateway::init(gateway_config(&device, &dir.path().join(".seq_number")))?;

    // The mock reflects echo commands, so the probe succeeds.
    assert!(gateway.check_connection());

    gateway.close();
    Ok(())
}
