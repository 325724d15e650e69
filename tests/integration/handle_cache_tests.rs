//! Devkey handle cache: bounded size, LRU-by-insertion eviction.

use std::sync::Arc;
use std::time::Duration;

use meshgw::{Config, ConfigMode, Gateway, MemoryNodeDatabase, Node, NodeDatabase, Platform};

use crate::mock_device::{MockDevice, wait_until};

/// Prometeo board (mains powered): tasks dispatch immediately.
fn prometeo_node(tag: u8, addr: u16) -> Arc<Node> {
    let mut uuid = [0xFF_u8; 16];
    uuid[2..4].copy_from_slice(&6_u16.to_be_bytes());
    let node = Arc::new(Node::new([9, 9, 9, 9, 9, tag], uuid));
    node.set_unicast_addr(addr);
    node.set_devkey([tag; 16]);
    node
}

#[test]
fn eleventh_devkey_evicts_the_first() -> anyhow::Result<()> {
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

    let mut seq = 1_u32;
    for tag in 0..11_u8 {
        let addr = 30 + u16::from(tag);
        let node = prometeo_node(tag + 1, addr);
        db.store_node(&node);
        gateway.add_node_to_whitelist(&node);

        gateway.set_datetime(&node);
        let expected = u32::from(tag) + 1;
        assert!(
            wait_until(Duration::from_secs(3), || {
                device
                    .commands()
                    .iter()
                    .filter(|f| f.opcode == 0x9C)
                    .count() as u32
                    == expected
            }),
            "devkey add {expected} not seen"
        );
        // Ack the datetime so the queue drains before the next node.
        seq += 1;
        device.inject_model(addr, seq, &[0xC2, 0x0A, 0x00], &[]);
        assert!(wait_until(Duration::from_secs(2), || {
            gateway.get_pending_tasks(&node).is_empty()
        }));
    }

    let cmds = device.commands();
    let adds: Vec<usize> = cmds
        .iter()
        .enumerate()
        .filter(|(_, f)| f.opcode == 0x9C)
        .map(|(i, _)| i)
        .collect();
    assert_eq!(adds.len(), 11);

    // Exactly one eviction, and it names the first handle the mock
    // handed out (0x0100), issued before the eleventh install.
    let deletes: Vec<usize> = cmds
        .iter()
        .enumerate()
        .filter(|(_, f)| f.opcode == 0x9D)
        .map(|(i, _)| i)
        .collect();
    assert_eq!(deletes.len(), 1);
    assert_eq!(cmds[deletes[0]].payload, 0x0100_u16.to_le_bytes());
    assert!(deletes[0] < adds[10]);

    // Publication addresses stayed within their own capacity: no
    // publication removals.
    assert!(cmds.iter().all(|f| f.opcode != 0xA6));

    gateway.close();
    Ok(())
}
