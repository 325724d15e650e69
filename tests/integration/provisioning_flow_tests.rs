//! Scan-and-provision happy path against the mock device.

use std::sync::Arc;
use std::time::Duration;

use meshgw::{Config, ConfigMode, Gateway, MemoryNodeDatabase, NodeDatabase, Platform};

use crate::mock_device::{MOCK_DEVKEY, MockDevice, wait_until};

#[test]
fn scan_filter_provision_store() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let db = Arc::new(MemoryNodeDatabase::new(1, [0xAA; 16]));
    let device = MockDevice::start();

    let mut config = Config::new(
        Arc::clone(&db) as Arc<dyn NodeDatabase>,
        Platform::Cloud,
        device.addr(),
    );
    config.seq_number_file = dir.path().join(".seq_number");
    config.config_mode = ConfigMode::Default;
    let gateway = Gateway::init(config)?;

    // Wait for boot configuration (capacity defines the address pool).
    assert!(device.wait_boot());

    gateway.start_scan(
        vec!["DA510001".into()],
        vec![],
        Duration::ZERO,
        true,
    );
    assert!(
        device
            .wait_for(Duration::from_secs(2), |f| f.opcode == 0x61)
            .is_some()
    );
    assert!(gateway.get_status().scanning);

    // An unprovisioned beacon that passes the UUID filter.
    let uuid: [u8; 16] = hex::decode("DA510001FFFFFFFF9B1979D4D43D6268")?
        .try_into()
        .unwrap();
    let mac_wire: [u8; 6] = [0xFF, 0xEE, 0xDD, 0xCC, 0xBB, 0xAA]; // reversed on the wire
    let mut beacon = Vec::new();
    beacon.extend_from_slice(&uuid);
    beacon.push((-60_i8) as u8);
    beacon.push(0); // gatt
    beacon.push(1); // adv addr type
    beacon.extend_from_slice(&mac_wire);
    device.inject(0xC0, &beacon);

    // The full link → caps → ECDH → complete exchange runs; the node
    // lands in the database with the devkey from the completion event.
    let mac: [u8; 6] = [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF];
    assert!(wait_until(Duration::from_secs(5), || {
        db.get_node_by_mac(&mac).is_some()
    }));
    let node = db.get_node_by_mac(&mac).unwrap();
    assert_eq!(node.unicast_addr(), 21);
    assert_eq!(node.devkey(), MOCK_DEVKEY);
    assert_eq!(node.uuid(), uuid);

    // Keypair and provision command were issued in order; the replay
    // cache for the allocated address was cleared on the device.
    let cmds: Vec<u8> = device.commands().iter().map(|f| f.opcode).collect();
    let pos = |op: u8| cmds.iter().position(|&o| o == op).unwrap();
    assert!(pos(0x69) < pos(0x63));
    assert!(
        device
            .commands()
            .iter()
            .any(|f| f.opcode == 0x20 && f.payload == vec![0x01, 21, 0])
    );

    // `one = true`: scanning stops after the enrolment.
    assert!(wait_until(Duration::from_secs(2), || {
        !gateway.get_status().scanning && !gateway.get_status().provisioning
    }));

    gateway.close();
    Ok(())
}
