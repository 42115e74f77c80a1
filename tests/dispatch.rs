//! Request/response dispatch over the simulated transport.

mod common;

use std::time::Duration;

use garage_remote::transport::{DeviceEmulator, SimulatedTransport};
use garage_remote::{Command, CorrelationMode, Error, SessionConfig};
use serde_json::json;
use tokio_test::{assert_err, assert_ok};

use common::{connection, emulated, init_tracing, slot, wait_for_pending};

#[tokio::test]
async fn test_round_trip_with_split_notifications() {
    let (transport, _) = emulated();
    transport.set_notify_chunk_len(3);
    let connection = connection(&transport, SessionConfig::default());
    assert_ok!(connection.connect(None).await);

    let response = assert_ok!(connection.send(Command::Status).await);
    assert_eq!(response.tag, "status");
    assert_eq!(response.get_str("state"), Some("idle"));
    assert!(response.get_bool("ble"));
}

#[tokio::test]
async fn test_malformed_frame_does_not_block_stream() {
    init_tracing();
    let transport = SimulatedTransport::new();
    let connection = connection(&transport, SessionConfig::default());
    assert_ok!(connection.connect(None).await);

    let pending = {
        let connection = connection.clone();
        tokio::spawn(async move { connection.send(Command::Status).await })
    };
    wait_for_pending(&connection, 1).await;

    assert!(transport.inject(&b"OK ready\n{\"tag\":\"sta"[..]));
    assert!(transport.inject(&b"tus\",\"status\":\"ok\",\"state\":\"idle\"}\n"[..]));

    let response = pending.await.expect("join");
    let response = assert_ok!(response);
    assert_eq!(response.get_str("state"), Some("idle"));
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_request_times_out_at_deadline() {
    init_tracing();
    let transport = SimulatedTransport::new();
    let connection = connection(&transport, SessionConfig::default());
    assert_ok!(connection.connect(None).await);

    let started = tokio::time::Instant::now();
    let err = assert_err!(connection.send(Command::Status).await);
    let elapsed = started.elapsed();

    assert!(matches!(
        err,
        Error::RequestTimeout { ref tag, timeout_ms: 5000 } if tag == "status"
    ));
    assert!(elapsed >= Duration::from_millis(5000));
    assert!(elapsed < Duration::from_millis(5100));
    assert_eq!(connection.pending_count(), 0);

    // A late answer finds nobody waiting.
    assert!(transport.inject(&b"{\"action\":\"status\",\"status\":\"ok\"}\n"[..]));
    tokio::task::yield_now().await;
    assert_eq!(connection.pending_count(), 0);
    assert!(connection.is_connected());
}

#[tokio::test]
async fn test_per_call_timeout_override() {
    init_tracing();
    let transport = SimulatedTransport::new();
    let connection = connection(&transport, SessionConfig::default());
    assert_ok!(connection.connect(None).await);

    let err = assert_err!(
        connection
            .send_with_timeout(Command::Record, Duration::from_millis(20))
            .await
    );
    assert!(err.is_timeout());
    assert!(err.is_recoverable());
}

#[tokio::test]
async fn test_unbounded_timeout_round_trip() {
    let (transport, _) = emulated();
    let config = SessionConfig::builder()
        .request_timeout(Duration::MAX)
        .build()
        .expect("config");
    let connection = connection(&transport, config);
    assert_ok!(connection.connect(None).await);

    let response = assert_ok!(connection.send(Command::Status).await);
    assert_eq!(response.tag, "status");

    let response = assert_ok!(
        connection
            .send_with_timeout(Command::GetSlots, Duration::MAX)
            .await
    );
    assert_eq!(response.tag, "get_slots");
    assert_eq!(connection.pending_count(), 0);
}

#[tokio::test]
async fn test_device_error_is_reported() {
    let (transport, _) = emulated();
    let connection = connection(&transport, SessionConfig::default());
    assert_ok!(connection.connect(None).await);

    let err = assert_err!(connection.send(Command::Play { slot: slot(2) }).await);
    assert!(matches!(
        err,
        Error::DeviceReported { ref tag, ref detail } if tag == "play" && detail == "Slot empty"
    ));
    assert!(err.is_device_error());
}

#[tokio::test]
async fn test_same_tag_requests_resolve_oldest_first() {
    init_tracing();
    let transport = SimulatedTransport::new();
    let connection = connection(&transport, SessionConfig::default());
    assert_ok!(connection.connect(None).await);

    let first = {
        let connection = connection.clone();
        tokio::spawn(async move { connection.send(Command::Status).await })
    };
    wait_for_pending(&connection, 1).await;
    let second = {
        let connection = connection.clone();
        tokio::spawn(async move { connection.send(Command::Status).await })
    };
    wait_for_pending(&connection, 2).await;

    transport.inject(
        &b"{\"action\":\"status\",\"marker\":\"a\"}\n{\"action\":\"status\",\"marker\":\"b\"}\n"[..],
    );

    let first = assert_ok!(first.await.expect("join"));
    let second = assert_ok!(second.await.expect("join"));
    assert_eq!(first.get_str("marker"), Some("a"));
    assert_eq!(second.get_str("marker"), Some("b"));
}

#[tokio::test]
async fn test_identifier_mode_matches_out_of_order() {
    init_tracing();
    let transport = SimulatedTransport::new();
    let config = SessionConfig::builder()
        .correlation(CorrelationMode::Identifier)
        .build()
        .expect("config");
    let connection = connection(&transport, config);
    assert_ok!(connection.connect(None).await);

    let first = {
        let connection = connection.clone();
        tokio::spawn(async move { connection.send(Command::Status).await })
    };
    wait_for_pending(&connection, 1).await;
    let second = {
        let connection = connection.clone();
        tokio::spawn(async move { connection.send(Command::Status).await })
    };
    wait_for_pending(&connection, 2).await;

    let requests = transport.requests();
    assert_eq!(requests.len(), 2);
    let ids: Vec<String> = requests
        .iter()
        .map(|r| r["id"].as_str().expect("id attached").to_string())
        .collect();

    // Answer the second request first.
    for (id, marker) in [(&ids[1], "second"), (&ids[0], "first")] {
        let mut line = serde_json::to_vec(&json!({
            "action": "status", "status": "ok", "id": id, "marker": marker
        }))
        .expect("json");
        line.push(b'\n');
        transport.inject(line);
    }

    let first = assert_ok!(first.await.expect("join"));
    let second = assert_ok!(second.await.expect("join"));
    assert_eq!(first.get_str("marker"), Some("first"));
    assert_eq!(second.get_str("marker"), Some("second"));
}

#[tokio::test]
async fn test_identifier_mode_with_echoing_emulator() {
    init_tracing();
    let transport = SimulatedTransport::new();
    transport.attach_emulator(DeviceEmulator::new().echo_ids(true));
    let config = SessionConfig::builder()
        .correlation(CorrelationMode::Identifier)
        .build()
        .expect("config");
    let connection = connection(&transport, config);
    assert_ok!(connection.connect(None).await);

    let response = assert_ok!(connection.send(Command::GetSlots).await);
    assert!(response.id.is_some());
    assert_eq!(response.fields["slots"], json!([]));
}

#[tokio::test]
async fn test_unsolicited_message_is_dropped() {
    let (transport, _) = emulated();
    let connection = connection(&transport, SessionConfig::default());
    assert_ok!(connection.connect(None).await);

    assert!(transport.inject(&b"{\"action\":\"play\",\"status\":\"ok\",\"slot\":1}\n"[..]));
    let response = assert_ok!(connection.send(Command::Status).await);
    assert_eq!(response.tag, "status");
}

#[tokio::test]
async fn test_pending_limit_rejects_extra_requests() {
    init_tracing();
    let transport = SimulatedTransport::new();
    let config = SessionConfig::builder()
        .max_pending(1)
        .build()
        .expect("config");
    let connection = connection(&transport, config);
    assert_ok!(connection.connect(None).await);

    let _held = {
        let connection = connection.clone();
        tokio::spawn(async move { connection.send(Command::Status).await })
    };
    wait_for_pending(&connection, 1).await;

    let err = assert_err!(connection.send(Command::Record).await);
    assert!(matches!(err, Error::Protocol { .. }));
    assert_eq!(transport.requests().len(), 1);
}

#[tokio::test]
async fn test_write_failure_surfaces_transport_error() {
    let (transport, _) = emulated();
    let connection = connection(&transport, SessionConfig::default());
    assert_ok!(connection.connect(None).await);

    transport.fail_writes(true);
    let err = assert_err!(connection.send(Command::Status).await);
    assert!(matches!(err, Error::TransportFailure { .. }));
    assert_eq!(connection.pending_count(), 0);
}
