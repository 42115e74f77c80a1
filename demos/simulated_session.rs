//! End-to-end session against the in-process emulator.
//!
//! Connects, captures a signal, saves it, lists slots, replays it, then
//! drops the link to show the listener and the forced teardown.
//!
//! Run with: RUST_LOG=garage_remote=debug cargo run --example simulated_session

use std::sync::Arc;
use std::time::Duration;

use garage_remote::transport::{DeviceEmulator, SimulatedTransport};
use garage_remote::{Device, SessionConfig, SlotId};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let transport = SimulatedTransport::new();
    transport.set_notify_chunk_len(20);
    let emulator = transport.attach_emulator(DeviceEmulator::new());

    let config = SessionConfig::builder()
        .request_timeout(Duration::from_secs(2))
        .build()?;
    let device = Device::with_transport(Arc::new(transport.clone()), config);

    let _listener = device.on_connection_change(|change| {
        info!(from = %change.from, to = %change.to, "Connection changed");
    });

    device.connect().await?;

    let slot = SlotId::try_from(1)?;
    let saved = device
        .capture_and_save(slot, "garage", Duration::from_millis(250))
        .await?;
    info!(slot = %saved.slot, pulses = saved.pulse_count, protocol = %saved.protocol, "Saved");

    for signal in device.list_signals().await? {
        info!(slot = %signal.slot, name = %signal.name, "Stored signal");
    }

    device.play(slot).await?;

    if let Some(status) = device.query_status().await? {
        info!(state = %status.state, battery = status.battery, signals = status.signals, "Status");
    }

    transport.drop_link("demo: peer out of range");
    tokio::time::sleep(Duration::from_millis(50)).await;
    info!(state = %device.state(), handled = emulator.lock().handled(), "After link loss");

    device.disconnect().await?;
    Ok(())
}
