//! Radio transport layer.
//!
//! This module turns the peer's one-way write channel and its
//! asynchronously delivered notifications into a request/response link.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐                         ┌──────────────────┐
//! │  Connection (Rust)   │                         │  Peer            │
//! │                      │   write (RX char)       │  (UART service)  │
//! │  Dispatcher ─────────┼────────────────────────►│                  │
//! │                      │   notify (TX char)      │                  │
//! │  FrameAssembler ◄────┼─────────────────────────│                  │
//! └──────────────────────┘                         └──────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `Connection::scan` - Wait for radio readiness, find an advertising peer
//! 2. `Connection::connect` - Connect, negotiate MTU, subscribe to notifications
//! 3. `Connection::send` - Write requests, match responses by tag
//! 4. `Connection::disconnect` - Unsubscribe, disconnect, reject pending requests
//!
//! The radio primitives themselves sit behind the [`Transport`] trait.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | Session object and inbound notification loop |
//! | `dispatcher` | Pending expectations and response matching |
//! | `emulator` | Firmware-compatible command handler for simulations |
//! | `simulated` | In-process [`Transport`] for tests and demos |
//! | `state` | Connection state machine and listeners |

// ============================================================================
// Submodules
// ============================================================================

/// Session object and inbound notification loop.
pub mod connection;

/// Pending expectations and response matching.
pub mod dispatcher;

/// Firmware-compatible command handler.
pub mod emulator;

/// In-process transport for tests and demos.
pub mod simulated;

/// Connection state machine.
pub mod state;

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use uuid::Uuid;

use crate::config::PeerFilter;
use crate::error::Result;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::Connection;
pub use dispatcher::{Dispatcher, FrameSink};
pub use emulator::DeviceEmulator;
pub use simulated::SimulatedTransport;
pub use state::{ConnectionState, ConnectionStateMachine, StateChange, StateSubscription};

// ============================================================================
// RadioState
// ============================================================================

/// Power state of the local radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RadioState {
    /// Radio is on and usable.
    PoweredOn,
    /// Radio is switched off.
    PoweredOff,
    /// Hardware has no usable radio.
    Unsupported,
    /// The process is not permitted to use the radio.
    Unauthorized,
    /// State not yet known; the platform is still initialising.
    Unknown,
}

impl RadioState {
    /// Returns `true` if scans can start.
    #[inline]
    #[must_use]
    pub fn is_ready(self) -> bool {
        self == Self::PoweredOn
    }
}

impl fmt::Display for RadioState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::PoweredOn => "powered on",
            Self::PoweredOff => "powered off",
            Self::Unsupported => "unsupported",
            Self::Unauthorized => "unauthorized",
            Self::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

// ============================================================================
// PeerHandle
// ============================================================================

/// A discovered peer, ready to be passed to `connect`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerHandle {
    /// Platform address or identifier.
    pub id: String,
    /// Advertised local name.
    pub name: Option<String>,
    /// Advertised service UUIDs.
    pub services: Vec<Uuid>,
    /// Signal strength at discovery time.
    pub rssi: Option<i16>,
}

impl PeerHandle {
    /// Creates a handle with only an identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            services: Vec::new(),
            rssi: None,
        }
    }

    /// Sets the advertised name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Adds an advertised service.
    #[must_use]
    pub fn with_service(mut self, service: Uuid) -> Self {
        self.services.push(service);
        self
    }

    /// Returns `true` if this peer advertises what `filter` looks for.
    #[inline]
    #[must_use]
    pub fn matches(&self, filter: &PeerFilter) -> bool {
        filter.matches(self.name.as_deref(), &self.services)
    }
}

impl fmt::Display for PeerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name} ({})", self.id),
            None => f.write_str(&self.id),
        }
    }
}

// ============================================================================
// TransportEvent
// ============================================================================

/// Something the transport delivers on the notification stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One inbound chunk, at whatever granularity the stack chose.
    Notification(Vec<u8>),
    /// The peer link dropped without being asked to.
    LinkLost {
        /// Platform-reported reason.
        reason: String,
    },
}

/// Stream of inbound events for one subscription.
///
/// Ending the stream is treated the same as [`TransportEvent::LinkLost`].
pub type NotificationStream = BoxStream<'static, TransportEvent>;

// ============================================================================
// Transport
// ============================================================================

/// Radio primitives consumed by the [`Connection`].
///
/// Implementations wrap a platform BLE stack (or a simulation). They do
/// not frame, retry or correlate; that is the connection's job.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Reports the radio state, waiting out platform initialisation.
    async fn radio_state(&self) -> RadioState;

    /// Scans for a peer matching `filter` for at most `window`.
    ///
    /// Returns `Ok(None)` if nothing matched in time.
    async fn discover(&self, filter: &PeerFilter, window: Duration) -> Result<Option<PeerHandle>>;

    /// Opens the link to `peer`.
    async fn connect(&self, peer: &PeerHandle) -> Result<()>;

    /// Requests a larger MTU and returns the negotiated value.
    async fn negotiate_mtu(&self, preferred: u16) -> Result<u16>;

    /// Subscribes to the peer's notification characteristic.
    async fn subscribe(&self) -> Result<NotificationStream>;

    /// Drops the notification subscription.
    async fn unsubscribe(&self) -> Result<()>;

    /// Writes one chunk to the peer's write characteristic.
    async fn write(&self, chunk: &[u8]) -> Result<()>;

    /// Closes the link. Must tolerate an already closed link.
    async fn disconnect(&self) -> Result<()>;
}

// ============================================================================
// Tests
// ============================================================================
