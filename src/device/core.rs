//! Core Device struct, lifecycle and accessors.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::config::SessionConfig;
use crate::error::Result;
use crate::protocol::{Command, Message};
use crate::transport::{
    Connection, ConnectionState, PeerHandle, StateChange, StateSubscription, Transport,
};

// ============================================================================
// Device
// ============================================================================

/// Typed handle to the signal recorder.
///
/// Each operation is one request/response round trip over the owned
/// [`Connection`]. Cheap to clone; clones share the session.
#[derive(Clone)]
pub struct Device {
    pub(super) connection: Connection,
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Device - Constructors
// ============================================================================

impl Device {
    /// Wraps an existing session.
    #[inline]
    #[must_use]
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }

    /// Creates a session over `transport` with `config`.
    #[must_use]
    pub fn with_transport(transport: Arc<dyn Transport>, config: SessionConfig) -> Self {
        Self::new(Connection::new(transport, config))
    }
}

// ============================================================================
// Device - Accessors
// ============================================================================

impl Device {
    /// Returns the underlying session.
    #[inline]
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Returns the connection state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Returns `true` if commands may be sent.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Registers a connection state listener.
    pub fn on_connection_change<F>(&self, listener: F) -> StateSubscription
    where
        F: Fn(StateChange) + Send + Sync + 'static,
    {
        self.connection.on_connection_change(listener)
    }
}

// ============================================================================
// Device - Lifecycle
// ============================================================================

impl Device {
    /// Scans for the recorder and connects to the first match.
    ///
    /// # Errors
    ///
    /// See [`Connection::connect`].
    pub async fn connect(&self) -> Result<()> {
        self.connection.connect(None).await
    }

    /// Connects to a peer found by an earlier scan.
    ///
    /// # Errors
    ///
    /// See [`Connection::connect`].
    pub async fn connect_to(&self, peer: PeerHandle) -> Result<()> {
        self.connection.connect(Some(peer)).await
    }

    /// Scans without connecting.
    ///
    /// # Errors
    ///
    /// See [`Connection::scan`].
    pub async fn scan(&self) -> Result<PeerHandle> {
        self.connection.scan().await
    }

    /// Closes the link. Always succeeds.
    ///
    /// # Errors
    ///
    /// Never fails in practice; the `Result` mirrors the other lifecycle calls.
    pub async fn disconnect(&self) -> Result<()> {
        self.connection.disconnect().await
    }

    /// Sends one command and returns the successful response.
    pub(super) async fn send_command(&self, command: Command) -> Result<Message> {
        let tag = command.tag();
        let response = self.connection.send(command).await?;
        debug!(tag, "Command acknowledged");
        Ok(response)
    }
}
