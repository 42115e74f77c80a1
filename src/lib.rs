//! Garage Remote - request/response client for a BLE UART signal recorder.
//!
//! This library talks to a 433 MHz signal recorder over a Bluetooth LE
//! UART service. The link only offers a write characteristic and a
//! notification characteristic; this crate adds framing, correlation,
//! timeouts and connection lifecycle on top of it.
//!
//! # Architecture
//!
//! ```text
//! Device ──► Dispatcher ──► encode ──► Connection ──► Transport
//!                 ▲                                      │
//!                 └── route ◄── FrameAssembler ◄─────────┘
//! ```
//!
//! - **Device**: typed façade, one round trip per operation
//! - **Dispatcher**: pending expectations, tag or identifier matching, deadlines
//! - **FrameAssembler**: newline-delimited JSON from arbitrary chunks
//! - **Connection**: state machine, MTU chunking, inbound loop
//! - **Transport**: radio primitives behind a trait
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use garage_remote::transport::{DeviceEmulator, SimulatedTransport};
//! use garage_remote::{Device, Result, SessionConfig, SlotId};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let transport = SimulatedTransport::new();
//!     transport.attach_emulator(DeviceEmulator::new());
//!
//!     let config = SessionConfig::builder()
//!         .request_timeout(Duration::from_secs(3))
//!         .build()?;
//!     let device = Device::with_transport(Arc::new(transport), config);
//!
//!     device.connect().await?;
//!     let slot = SlotId::try_from(1)?;
//!     device.capture_and_save(slot, "garage", Duration::from_millis(500)).await?;
//!     device.play(slot).await?;
//!     device.disconnect().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`config`] | Session configuration and peer identity |
//! | [`device`] | Typed device API: [`Device`] |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Commands, messages, framing |
//! | [`transport`] | Connection, dispatcher, transport trait |

// ============================================================================
// Modules
// ============================================================================

/// Session configuration.
///
/// Use [`SessionConfig::builder()`] to override defaults.
pub mod config;

/// Typed device API.
pub mod device;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
///
/// Newtype wrappers for slots, request IDs and listener handles.
pub mod identifiers;

/// Wire protocol: commands, messages, and newline framing.
pub mod protocol;

/// Connection lifecycle and request/response dispatch.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Configuration
pub use config::{CorrelationMode, PeerFilter, SessionConfig, SessionConfigBuilder};

// Device types
pub use device::{Capture, Device, DeviceState, DeviceStatus, SavedSignal, Slot};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{RequestId, SlotId, SubscriptionId};

// Protocol types
pub use protocol::{Command, Message, Status};

// Transport types
pub use transport::{
    Connection, ConnectionState, PeerHandle, RadioState, StateChange, StateSubscription,
    Transport,
};
