//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Once};
use std::time::Duration;

use garage_remote::transport::{DeviceEmulator, SimulatedTransport};
use garage_remote::{Connection, Device, SessionConfig, SlotId};
use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Installs a test subscriber once, honouring `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Slot shorthand.
pub fn slot(n: u8) -> SlotId {
    SlotId::new(n).expect("slot in range")
}

/// Default config with a short request timeout.
pub fn quick_config() -> SessionConfig {
    SessionConfig::builder()
        .request_timeout(Duration::from_millis(500))
        .build()
        .expect("valid config")
}

/// Simulated transport backed by a fresh emulator.
pub fn emulated() -> (SimulatedTransport, Arc<Mutex<DeviceEmulator>>) {
    init_tracing();
    let transport = SimulatedTransport::new();
    let emulator = transport.attach_emulator(DeviceEmulator::new());
    (transport, emulator)
}

/// Connection over `transport` with `config`.
pub fn connection(transport: &SimulatedTransport, config: SessionConfig) -> Connection {
    Connection::new(Arc::new(transport.clone()), config)
}

/// Connected device over an emulated peer.
pub async fn connected_device() -> (Device, SimulatedTransport, Arc<Mutex<DeviceEmulator>>) {
    let (transport, emulator) = emulated();
    let device = Device::new(connection(&transport, SessionConfig::default()));
    device.connect().await.expect("connect");
    (device, transport, emulator)
}

/// Yields until `connection` has at least `count` outstanding requests.
pub async fn wait_for_pending(connection: &Connection, count: usize) {
    for _ in 0..10_000 {
        if connection.pending_count() >= count {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("expected {count} pending requests, have {}", connection.pending_count());
}

/// Records every state transition seen by a listener.
pub fn record_changes(
    connection: &Connection,
) -> (
    garage_remote::StateSubscription,
    Arc<Mutex<Vec<garage_remote::StateChange>>>,
) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let sub = connection.on_connection_change(move |change| sink.lock().push(change));
    (sub, seen)
}
