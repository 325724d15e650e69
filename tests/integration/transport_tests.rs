//! Fragmentation transport: inbound reassembly and outbound framing.

use std::sync::Arc;
use std::time::Duration;

use meshgw::{Config, Event, Gateway, MemoryNodeDatabase, ModelBody, NodeDatabase, Platform};
use parking_lot::Mutex;

use crate::mock_device::{MockDevice, wait_until};

const FR_START: [u8; 3] = [0xC3, 0x1A, 0x00];
const FR_DATA: [u8; 3] = [0xC4, 0x1A, 0x00];
const FR_END: [u8; 3] = [0xC5, 0x1A, 0x00];

fn setup(device: &MockDevice) -> anyhow::Result<(Gateway, tempfile::TempDir)> {
    let dir = tempfile::tempdir()?;
    let db = Arc::new(MemoryNodeDatabase::new(1, [0xAA; 16]));
    let mut config = Config::new(db as Arc<dyn NodeDatabase>, Platform::Cloud, device.addr());
    config.seq_number_file = dir.path().join(".seq_number");
    Ok((Gateway::init(config)?, dir))
}

#[test]
fn fragments_reassemble_into_transport_recv() -> anyhow::Result<()> {
    let device = MockDevice::start();
    let (gateway, _dir) = setup(&device)?;

    let received = Arc::new(Mutex::new(Vec::<Vec<u8>>::new()));
    let sink = Arc::clone(&received);
    gateway.add_event_handler("capture-transport", move |ev| {
        if let Event::Model(m) = ev {
            if let ModelBody::TransportRecv { data } = &m.body {
                sink.lock().push(data.clone());
            }
        }
    });

    // Peer gateway at address 2 sends "hello world!" in three
    // fragments.
    device.inject_model(2, 10, &FR_START, &12_u16.to_le_bytes());
    let mut frag0 = 0_u16.to_le_bytes().to_vec();
    frag0.extend_from_slice(b"hello");
    device.inject_model(2, 11, &FR_DATA, &frag0);
    let mut frag1 = 1_u16.to_le_bytes().to_vec();
    frag1.extend_from_slice(b" worl");
    device.inject_model(2, 12, &FR_DATA, &frag1);
    let mut frag2 = 2_u16.to_le_bytes().to_vec();
    frag2.extend_from_slice(b"d!");
    device.inject_model(2, 13, &FR_DATA, &frag2);
    device.inject_model(2, 14, &FR_END, &[5, 1, 2, 3, 4, 5]);

    assert!(wait_until(Duration::from_secs(2), || {
        !received.lock().is_empty()
    }));
    assert_eq!(received.lock()[0], b"hello world!");

    gateway.close();
    Ok(())
}

#[test]
fn incomplete_assembly_is_dropped() -> anyhow::Result<()> {
    let device = MockDevice::start();
    let (gateway, _dir) = setup(&device)?;

    let received = Arc::new(Mutex::new(0_usize));
    let sink = Arc::clone(&received);
    gateway.add_event_handler("capture-transport", move |ev| {
        if let Event::Model(m) = ev {
            if matches!(m.body, ModelBody::TransportRecv { .. }) {
                *sink.lock() += 1;
            }
        }
    });

    // Slot 1 never arrives.
    device.inject_model(3, 10, &FR_START, &12_u16.to_le_bytes());
    let mut frag0 = 0_u16.to_le_bytes().to_vec();
    frag0.extend_from_slice(b"hello");
    device.inject_model(3, 11, &FR_DATA, &frag0);
    device.inject_model(3, 12, &FR_END, &[5, 1, 2, 3, 4, 5]);

    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(*received.lock(), 0);

    gateway.close();
    Ok(())
}

#[test]
fn outbound_payloads_fragment_on_the_low_priority_path() -> anyhow::Result<()> {
    let device = MockDevice::start();
    let (gateway, _dir) = setup(&device)?;
    assert!(device.wait_boot());

    // Short payloads go out in one SEND frame.
    gateway.send_msg(2, b"hi")?;
    let sent = device
        .wait_for_mesh(Duration::from_secs(2), |m| m.starts_with(&[0xC2, 0x1A, 0x00]))
        .unwrap();
    assert_eq!(&sent[3..], b"hi");

    // Long payloads: start + ceil(len/5) fragments + end.
    gateway.send_msg(2, b"hello world!")?;
    assert!(
        device
            .wait_for_mesh(Duration::from_secs(2), |m| m.starts_with(&FR_END))
            .is_some()
    );
    let mesh_frames: Vec<Vec<u8>> = device
        .commands()
        .iter()
        .filter(|f| f.opcode == 0xAB)
        .map(|f| f.payload[10..].to_vec())
        .collect();

    let starts: Vec<&Vec<u8>> = mesh_frames
        .iter()
        .filter(|m| m.starts_with(&FR_START))
        .collect();
    assert_eq!(starts.len(), 1);
    assert_eq!(&starts[0][3..], &12_u16.to_le_bytes());

    let data_frames: Vec<&Vec<u8>> = mesh_frames
        .iter()
        .filter(|m| m.starts_with(&FR_DATA))
        .collect();
    assert_eq!(data_frames.len(), 3);
    assert_eq!(&data_frames[0][5..], b"hello");
    assert_eq!(&data_frames[1][5..], b" worl");
    assert_eq!(&data_frames[2][5..], b"d!");

    let ends: Vec<&Vec<u8>> = mesh_frames.iter().filter(|m| m.starts_with(&FR_END)).collect();
    assert_eq!(ends.len(), 1);
    assert_eq!(&ends[0][3..], &[5, 1, 2, 3, 4, 5]);

    gateway.close();
    Ok(())
}
