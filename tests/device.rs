//! Typed device API against the firmware emulator.

mod common;

use std::time::Duration;

use garage_remote::transport::{DeviceEmulator, SimulatedTransport};
use garage_remote::{Device, DeviceState, Error, SessionConfig};
use serde_json::json;
use tokio_test::{assert_err, assert_ok};

use common::{connected_device, connection, emulated, slot};

const HOLD: Duration = Duration::from_millis(10);

#[tokio::test]
async fn test_queries_short_circuit_when_disconnected() {
    let (transport, emulator) = emulated();
    let device = Device::new(connection(&transport, SessionConfig::default()));

    assert!(assert_ok!(device.list_signals().await).is_empty());
    assert!(assert_ok!(device.query_status().await).is_none());

    assert_eq!(transport.write_count(), 0);
    assert_eq!(emulator.lock().handled(), 0);
}

#[tokio::test]
async fn test_commands_fail_when_disconnected() {
    let (transport, _) = emulated();
    let device = Device::new(connection(&transport, SessionConfig::default()));

    let err = assert_err!(device.play(slot(1)).await);
    assert!(matches!(err, Error::NotConnected));
}

#[tokio::test]
async fn test_capture_save_play_delete() {
    let (device, _transport, emulator) = connected_device().await;

    let saved = assert_ok!(device.capture_and_save(slot(2), " gate ", HOLD).await);
    assert_eq!(saved.slot, slot(2));
    assert_eq!(saved.name, "gate");
    assert_eq!(saved.pulse_count, 64);
    assert_eq!(saved.protocol, "PT2262");
    assert!(emulator.lock().signal(slot(2)).is_some());

    let signals = assert_ok!(device.list_signals().await);
    assert_eq!(signals, vec![saved]);

    assert_ok!(device.play(slot(2)).await);
    assert_ok!(device.delete_signal(slot(2)).await);

    let err = assert_err!(device.delete_signal(slot(2)).await);
    assert!(matches!(err, Error::DeviceReported { ref detail, .. } if detail == "Slot not found"));
    assert!(assert_ok!(device.list_signals().await).is_empty());
}

#[tokio::test]
async fn test_capture_without_signal_short_circuits() {
    let (device, transport, emulator) = connected_device().await;
    emulator.lock().set_next_capture(None);

    let err = assert_err!(device.capture_and_save(slot(1), "gate", HOLD).await);
    assert!(
        matches!(err, Error::DeviceReported { ref tag, ref detail } if tag == "stop" && detail == "No signal detected")
    );

    let actions: Vec<String> = transport
        .requests()
        .iter()
        .map(|r| r["action"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(actions, ["record", "stop"]);
}

#[tokio::test]
async fn test_blank_name_rejected_before_sending() {
    let (device, transport, _) = connected_device().await;

    let err = assert_err!(device.capture_and_save(slot(1), "   ", HOLD).await);
    assert!(matches!(err, Error::InvalidArgument { .. }));

    let err = assert_err!(device.save_signal(slot(1), "").await);
    assert!(matches!(err, Error::InvalidArgument { .. }));

    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn test_save_without_capture() {
    let (device, _, _) = connected_device().await;

    let err = assert_err!(device.save_signal(slot(3), "gate").await);
    assert!(matches!(err, Error::DeviceReported { ref detail, .. } if detail == "No signal to save"));
}

#[tokio::test]
async fn test_recording_twice_is_busy() {
    let (device, _, _) = connected_device().await;

    assert_ok!(device.start_recording().await);
    let err = assert_err!(device.start_recording().await);
    assert!(matches!(err, Error::DeviceReported { ref detail, .. } if detail == "Busy"));

    let capture = assert_ok!(device.stop_recording().await);
    assert_eq!(capture.pulse_count, 64);
}

#[tokio::test]
async fn test_query_status() {
    let (device, _, emulator) = connected_device().await;
    emulator.lock().set_battery(3.5);

    let status = assert_ok!(device.query_status().await).expect("connected");
    assert_eq!(status.state, DeviceState::Idle);
    assert!(status.ble);
    assert!((status.battery - 3.5).abs() < f64::EPSILON);
    assert_eq!(status.signals, 0);

    assert_ok!(device.start_recording().await);
    let status = assert_ok!(device.query_status().await).expect("connected");
    assert_eq!(status.state, DeviceState::Recording);
}

#[tokio::test]
async fn test_list_prepopulated_slots() {
    let (transport, _) = emulated();
    transport.attach_emulator(
        DeviceEmulator::new()
            .with_signal(slot(1), "garage", 48, "EV1527")
            .with_signal(slot(5), "gate", 96, "PT2262"),
    );
    let device = Device::new(connection(&transport, SessionConfig::default()));
    assert_ok!(device.connect().await);

    let signals = assert_ok!(device.list_signals().await);
    let slots: Vec<u8> = signals.iter().map(|s| s.slot.get()).collect();
    assert_eq!(slots, [1, 5]);
    assert_eq!(signals[0].name, "garage");
}

#[tokio::test]
async fn test_disconnect_then_queries_are_empty() {
    let (device, _, _) = connected_device().await;
    assert_ok!(device.disconnect().await);

    assert!(assert_ok!(device.list_signals().await).is_empty());
    assert!(assert_ok!(device.query_status().await).is_none());
}

#[tokio::test]
async fn test_save_confirmation_out_of_range_is_protocol_error() {
    common::init_tracing();
    let transport = SimulatedTransport::new();
    transport.set_responder(|_| Some(json!({"action": "save", "status": "ok", "slot": 9, "name": "gate"})));
    let device = Device::new(connection(&transport, SessionConfig::default()));
    assert_ok!(device.connect().await);

    let err = assert_err!(device.save_signal(slot(1), "gate").await);
    assert!(matches!(err, Error::Protocol { .. }));
}

#[tokio::test]
async fn test_save_bare_acknowledgement_reports_request() {
    common::init_tracing();
    let transport = SimulatedTransport::new();
    transport.set_responder(|_| Some(json!({"action": "save", "status": "ok"})));
    let device = Device::new(connection(&transport, SessionConfig::default()));
    assert_ok!(device.connect().await);

    let saved = assert_ok!(device.save_signal(slot(4), "gate").await);
    assert_eq!(saved.slot, slot(4));
    assert_eq!(saved.name, "gate");
}
