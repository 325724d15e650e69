//! Full wake → work → schedule-sync → sleep cycle for a low-power node.

use std::sync::Arc;
use std::time::Duration;

use meshgw::{Config, ConfigMode, Gateway, MemoryNodeDatabase, Node, NodeDatabase, Platform};

use crate::mock_device::{MockDevice, wait_until};

/// Iris board (low power): board id 2 in UUID bytes 2..4.
fn iris_node(addr: u16) -> Arc<Node> {
    let mut uuid = [0xFF_u8; 16];
    uuid[2..4].copy_from_slice(&2_u16.to_be_bytes());
    let node = Arc::new(Node::new([0x10, 0x20, 0x30, 0x40, 0x50, 0x60], uuid));
    node.set_unicast_addr(addr);
    node
}

#[test]
fn led_change_rides_the_wake_sleep_frame() -> anyhow::Result<()> {
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
    assert!(device.wait_boot());

    let node = iris_node(21);
    db.store_node(&node);
    gateway.add_node_to_whitelist(&node);

    // The request parks behind a wake primer; nothing transmits yet.
    gateway.set_led(&node, "#FF8000")?;
    assert_eq!(gateway.get_pending_tasks(&node), vec!["ChangeLedState"]);
    std::thread::sleep(Duration::from_millis(200));
    assert!(device.commands().iter().all(|f| f.opcode != 0xAB));

    let src = node.unicast_addr();
    let mut seq = 1_u32;
    let mut next_seq = || {
        seq += 1;
        seq
    };

    // Node wakes (extended notify, already configured): the primer
    // answers with WAIT.
    device.inject_model(src, next_seq(), &[0xC0, 0x00, 0x00], &[1, 1]);
    assert!(
        device
            .wait_for_mesh(Duration::from_secs(2), |m| m == [0xC2, 0x00, 0x00])
            .is_some(),
        "wake primer did not transmit WAIT"
    );

    // Wake acked: the LED request goes out.
    device.inject_model(src, next_seq(), &[0xC4, 0x00, 0x00], &[]);
    assert!(
        device
            .wait_for_mesh(Duration::from_secs(2), |m| m
                == [0xC0, 0x08, 0x00, 0xFF, 0x80, 0x00])
            .is_some(),
        "LED request did not transmit"
    );

    // LED acked: the sleep-schedule change follows (period differs
    // from the gateway default).
    device.inject_model(src, next_seq(), &[0xC1, 0x08, 0x00], &[]);
    assert!(
        device
            .wait_for_mesh(Duration::from_secs(2), |m| m.starts_with(&[
                0xCC, 0x0C, 0x00, 0x01
            ]))
            .is_some(),
        "sleep schedule change did not transmit"
    );

    // Schedule acked: sleep period recorded, SLEEP goes out.
    device.inject_model(src, next_seq(), &[0xCD, 0x0C, 0x00], &[0, 0]);
    assert!(
        device
            .wait_for_mesh(Duration::from_secs(2), |m| m == [0xC1, 0x00, 0x00, 0x01])
            .is_some(),
        "SLEEP did not transmit"
    );
    assert!(wait_until(Duration::from_secs(1), || {
        node.sleep_period() == gateway.get_sleep_time()
    }));

    // Sleep acked: queue dissolves, timestamp recorded.
    device.inject_model(src, next_seq(), &[0xC3, 0x00, 0x00], &[]);
    assert!(wait_until(Duration::from_secs(2), || {
        gateway.get_pending_tasks(&node).is_empty() && node.sleep_timestamp() > 0
    }));

    gateway.close();
    Ok(())
}

#[test]
fn replayed_messages_are_dropped() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let db = Arc::new(MemoryNodeDatabase::new(1, [0xAA; 16]));
    let device = MockDevice::start();

    let mut config = Config::new(
        Arc::clone(&db) as Arc<dyn NodeDatabase>,
        Platform::Cloud,
        device.addr(),
    );
    config.seq_number_file = dir.path().join(".seq_number");
    let gateway = Gateway::init(config)?;

    let node = iris_node(22);
    db.store_node(&node);
    gateway.add_node_to_whitelist(&node);

    use parking_lot::Mutex;
    let seen = Arc::new(Mutex::new(0_u32));
    let counter = Arc::clone(&seen);
    gateway.add_event_handler("count-temps", move |ev| {
        if matches!(
            ev,
            meshgw::Event::Model(m) if matches!(m.body, meshgw::ModelBody::TempData { .. })
        ) {
            *counter.lock() += 1;
        }
    });

    // Same sequence number twice, then a regression: only the first
    // copy passes the replay filter.
    let temp = [0x10, 0x00, 0x32, 0x01, 0x02, 0x03, 0x01];
    device.inject_model(22, 50, &[0xC0, 0x02, 0x00], &temp);
    device.inject_model(22, 50, &[0xC0, 0x02, 0x00], &temp);
    device.inject_model(22, 49, &[0xC0, 0x02, 0x00], &temp);
    device.inject_model(22, 51, &[0xC0, 0x02, 0x00], &temp);

    assert!(wait_until(Duration::from_secs(2), || *seen.lock() == 2));
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(*seen.lock(), 2);

    gateway.close();
    Ok(())
}
