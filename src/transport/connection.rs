//! Peer connection and inbound notification loop.
//!
//! This module owns the single link to the peer: it drives the
//! connection state machine, serializes lifecycle calls, chunks outbound
//! frames to the negotiated MTU, and runs the task that feeds inbound
//! notifications through the frame assembler into the dispatcher.
//!
//! # Event Loop
//!
//! While connected, a tokio task handles:
//!
//! - Notification chunks from the transport (reassembled into messages)
//! - Messages routed to pending expectations
//! - Unsolicited link loss (forced teardown)
//! - Shutdown requested by `disconnect`

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::{Mutex as AsyncMutex, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crate::config::{MIN_MTU, SessionConfig};
use crate::error::{Error, Result};
use crate::protocol::{Command, FrameAssembler, Message};

use super::dispatcher::{Dispatcher, FrameSink};
use super::state::{ConnectionState, ConnectionStateMachine, StateChange, StateSubscription};
use super::{NotificationStream, PeerHandle, RadioState, Transport, TransportEvent};

// ============================================================================
// Constants
// ============================================================================

/// ATT header bytes subtracted from the MTU for each write.
const ATT_HEADER_LEN: usize = 3;

/// Smallest write chunk, matching the ATT minimum MTU.
const MIN_CHUNK_LEN: usize = MIN_MTU as usize - ATT_HEADER_LEN;

// ============================================================================
// Link
// ============================================================================

/// Write half of the connection, shared with the dispatcher.
struct Link {
    transport: Arc<dyn Transport>,
    state: Arc<ConnectionStateMachine>,
    /// Keeps the chunks of one frame contiguous on the wire.
    write_lock: AsyncMutex<()>,
    chunk_len: AtomicUsize,
}

#[async_trait]
impl FrameSink for Link {
    fn is_connected(&self) -> bool {
        self.state.current().is_connected()
    }

    async fn write_frame(&self, frame: &[u8]) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        if !self.is_connected() {
            return Err(Error::NotConnected);
        }

        let chunk_len = self.chunk_len.load(Ordering::Acquire).max(MIN_CHUNK_LEN);
        for chunk in frame.chunks(chunk_len) {
            self.transport.write(chunk).await?;
        }

        trace!(len = frame.len(), chunk_len, "Frame written");
        Ok(())
    }
}

// ============================================================================
// InboundTask
// ============================================================================

/// Handle to the running notification loop.
struct InboundTask {
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl InboundTask {
    /// Signals the loop and waits for it to exit.
    async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.handle.await {
            debug!(error = %e, "Inbound loop ended abnormally");
        }
    }
}

/// Lifecycle slot shared with the inbound loop.
type Lifecycle = AsyncMutex<Option<InboundTask>>;

// ============================================================================
// Connection
// ============================================================================

struct ConnectionInner {
    config: SessionConfig,
    transport: Arc<dyn Transport>,
    state: Arc<ConnectionStateMachine>,
    dispatcher: Arc<Dispatcher>,
    link: Arc<Link>,
    /// Serializes scan/connect/disconnect/link-loss release and holds the inbound loop.
    lifecycle: Arc<Lifecycle>,
}

/// Session with one peer.
///
/// Owns the transport, the connection state machine, and the pending
/// request set. Explicitly constructed and torn down; independent
/// instances share nothing.
///
/// # Thread Safety
///
/// `Connection` is `Send + Sync` and cheap to clone. Lifecycle calls are
/// serialized internally; requests may be issued concurrently.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use garage_remote::protocol::Command;
/// use garage_remote::transport::{Connection, DeviceEmulator, SimulatedTransport};
///
/// # async fn example() -> garage_remote::Result<()> {
/// let transport = SimulatedTransport::new();
/// transport.attach_emulator(DeviceEmulator::new());
///
/// let connection = Connection::with_defaults(Arc::new(transport));
/// connection.connect(None).await?;
///
/// let status = connection.send(Command::Status).await?;
/// assert_eq!(status.tag, "status");
///
/// connection.disconnect().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Connection - Constructor
// ============================================================================

impl Connection {
    /// Creates a disconnected session over `transport`.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, config: SessionConfig) -> Self {
        let state = ConnectionStateMachine::new();
        let dispatcher = Arc::new(Dispatcher::new(config.correlation, config.max_pending));
        let link = Arc::new(Link {
            transport: Arc::clone(&transport),
            state: Arc::clone(&state),
            write_lock: AsyncMutex::new(()),
            chunk_len: AtomicUsize::new(MIN_CHUNK_LEN),
        });

        Self {
            inner: Arc::new(ConnectionInner {
                config,
                transport,
                state,
                dispatcher,
                link,
                lifecycle: Arc::new(AsyncMutex::new(None)),
            }),
        }
    }

    /// Creates a session with [`SessionConfig::default`].
    #[inline]
    #[must_use]
    pub fn with_defaults(transport: Arc<dyn Transport>) -> Self {
        Self::new(transport, SessionConfig::default())
    }
}

// ============================================================================
// Connection - Accessors
// ============================================================================

impl Connection {
    /// Returns the current connection state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.state.current()
    }

    /// Returns `true` if requests may be sent.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Returns the session configuration.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Returns the number of outstanding requests.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.dispatcher.pending_count()
    }

    /// Returns the size of each outbound write.
    #[inline]
    #[must_use]
    pub fn write_chunk_len(&self) -> usize {
        self.inner.link.chunk_len.load(Ordering::Acquire)
    }

    /// Registers a listener invoked on every state transition.
    ///
    /// Explicit `disconnect` and unsolicited link loss notify identically.
    pub fn on_connection_change<F>(&self, listener: F) -> StateSubscription
    where
        F: Fn(StateChange) + Send + Sync + 'static,
    {
        self.inner.state.subscribe(listener)
    }
}

// ============================================================================
// Connection - Lifecycle
// ============================================================================

impl Connection {
    /// Searches for a peer advertising the configured identity.
    ///
    /// Moves `Disconnected → Scanning → Disconnected`.
    ///
    /// # Errors
    ///
    /// - [`Error::RadioUnavailable`] if the radio is off, unsupported, or never settles
    /// - [`Error::DiscoveryTimeout`] if nothing matches within the scan window
    /// - [`Error::Protocol`] if a link is already open
    pub async fn scan(&self) -> Result<PeerHandle> {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        self.reap(&mut lifecycle).await;
        self.scan_locked().await
    }

    async fn scan_locked(&self) -> Result<PeerHandle> {
        let inner = &self.inner;
        let current = inner.state.current();
        if current != ConnectionState::Disconnected {
            return Err(Error::protocol(format!("cannot scan while {current}")));
        }

        let radio = timeout(inner.config.radio_ready_timeout, inner.transport.radio_state())
            .await
            .unwrap_or(RadioState::Unknown);
        if !radio.is_ready() {
            warn!(%radio, "Radio not available for scanning");
            return Err(Error::radio_unavailable(radio));
        }

        inner.state.transition(ConnectionState::Scanning)?;
        let window = inner.config.scan_timeout;
        debug!(window_ms = window.as_millis() as u64, "Scanning for peer");

        let outcome = timeout(window, inner.transport.discover(&inner.config.peer, window)).await;
        inner.state.force_disconnected();

        match outcome {
            Ok(Ok(Some(peer))) => {
                info!(%peer, "Peer found");
                Ok(peer)
            }
            Ok(Ok(None)) | Err(_) => Err(Error::discovery_timeout(window.as_millis() as u64)),
            Ok(Err(e)) => Err(e),
        }
    }

    /// Connects to `peer`, scanning first if none is given.
    ///
    /// Negotiates the MTU, subscribes to notifications, then moves to
    /// `Connected`. Already connected is a no-op.
    ///
    /// # Errors
    ///
    /// Scan errors from [`scan`](Self::scan), or the transport error that
    /// aborted the connect. All transport resources are released and the
    /// state returns to `Disconnected` on failure.
    pub async fn connect(&self, peer: Option<PeerHandle>) -> Result<()> {
        let mut lifecycle = self.inner.lifecycle.lock().await;

        if self.is_connected() {
            debug!("Already connected");
            return Ok(());
        }
        self.reap(&mut lifecycle).await;

        let peer = match peer {
            Some(peer) => peer,
            None => self.scan_locked().await?,
        };

        self.inner.state.transition(ConnectionState::Connecting)?;
        debug!(%peer, "Connecting");

        let task = match self.establish(&peer).await {
            Ok(task) => task,
            Err(e) => {
                warn!(%peer, error = %e, "Connect failed, rolling back");
                self.release_transport().await;
                self.inner.state.force_disconnected();
                return Err(e);
            }
        };

        // Let the inbound loop see events queued during the handshake.
        tokio::task::yield_now().await;

        if !self
            .inner
            .state
            .transition_from(ConnectionState::Connecting, ConnectionState::Connected)
        {
            warn!(%peer, "Link dropped during handshake");
            task.stop().await;
            self.release_transport().await;
            self.inner.state.force_disconnected();
            return Err(Error::ConnectionLost);
        }

        *lifecycle = Some(task);
        info!(%peer, chunk_len = self.write_chunk_len(), "Connected");
        Ok(())
    }

    async fn establish(&self, peer: &PeerHandle) -> Result<InboundTask> {
        let inner = &self.inner;

        inner.transport.connect(peer).await?;

        let mtu = inner.transport.negotiate_mtu(inner.config.preferred_mtu).await?;
        let chunk_len = (usize::from(mtu).saturating_sub(ATT_HEADER_LEN)).max(MIN_CHUNK_LEN);
        inner.link.chunk_len.store(chunk_len, Ordering::Release);
        debug!(mtu, chunk_len, "MTU negotiated");

        let stream = inner.transport.subscribe().await?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let handle = tokio::spawn(run_inbound_loop(
            stream,
            shutdown_rx,
            Arc::clone(&inner.transport),
            Arc::clone(&inner.state),
            Arc::clone(&inner.dispatcher),
            Arc::downgrade(&inner.lifecycle),
            inner.config.max_frame_len,
        ));

        Ok(InboundTask {
            shutdown_tx,
            handle,
        })
    }

    /// Tears the link down.
    ///
    /// Idempotent and always succeeds: transport errors while closing are
    /// logged, not returned. Requests still pending are rejected with
    /// [`Error::ConnectionLost`].
    pub async fn disconnect(&self) -> Result<()> {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        let task = lifecycle.take();

        if task.is_none() && self.state() == ConnectionState::Disconnected {
            debug!("Already disconnected");
            return Ok(());
        }

        if let Some(task) = task {
            task.stop().await;
        }

        teardown(&self.inner.transport, &self.inner.state, &self.inner.dispatcher).await;
        info!("Disconnected");
        Ok(())
    }

    async fn release_transport(&self) {
        release_transport(&self.inner.transport).await;
    }

    /// Finishes a loop left behind by a lost link before a new lifecycle step.
    async fn reap(&self, lifecycle: &mut Option<InboundTask>) {
        if let Some(task) = lifecycle.take() {
            debug!("Reaping inbound loop of lost link");
            task.stop().await;
            teardown(&self.inner.transport, &self.inner.state, &self.inner.dispatcher).await;
        }
    }
}

// ============================================================================
// Connection - Requests
// ============================================================================

impl Connection {
    /// Sends a command and waits for its response with the default timeout.
    ///
    /// # Errors
    ///
    /// See [`Dispatcher::send`].
    pub async fn send(&self, command: Command) -> Result<Message> {
        self.send_with_timeout(command, self.inner.config.request_timeout)
            .await
    }

    /// Sends a command and waits for its response with a custom timeout.
    ///
    /// # Errors
    ///
    /// See [`Dispatcher::send`].
    pub async fn send_with_timeout(
        &self,
        command: Command,
        request_timeout: Duration,
    ) -> Result<Message> {
        self.inner
            .dispatcher
            .send(self.inner.link.as_ref(), command, request_timeout)
            .await
    }
}

// ============================================================================
// Inbound Loop
// ============================================================================

/// Feeds notifications through the assembler until shutdown or link loss.
async fn run_inbound_loop(
    mut stream: NotificationStream,
    mut shutdown_rx: oneshot::Receiver<()>,
    transport: Arc<dyn Transport>,
    state: Arc<ConnectionStateMachine>,
    dispatcher: Arc<Dispatcher>,
    lifecycle: Weak<Lifecycle>,
    max_frame_len: usize,
) {
    let mut assembler = FrameAssembler::with_max_frame_len(max_frame_len);

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                debug!("Inbound loop shutdown");
                return;
            }

            event = stream.next() => {
                match event {
                    Some(TransportEvent::Notification(chunk)) => {
                        trace!(len = chunk.len(), "Notification received");
                        assembler.push_with(&chunk, |message| {
                            dispatcher.route(message);
                        });
                    }

                    Some(TransportEvent::LinkLost { reason }) => {
                        warn!(%reason, "Link lost");
                        break;
                    }

                    None => {
                        warn!("Notification stream ended");
                        break;
                    }
                }
            }
        }
    }

    drop(stream);
    debug!(discarded = assembler.discarded(), "Inbound loop terminated");

    state.force_disconnected();
    dispatcher.fail_all(|| Error::ConnectionLost);

    let Some(lifecycle) = lifecycle.upgrade() else {
        release_transport(&transport).await;
        return;
    };

    // Releasing is a lifecycle step. An owner already holding the lock
    // stops this loop and releases the transport itself.
    tokio::select! {
        _ = &mut shutdown_rx => {
            debug!("Link release left to owner");
        }

        mut slot = lifecycle.lock() => {
            release_transport(&transport).await;
            slot.take();
        }
    }
}

/// Releases the transport, moves to `Disconnected`, rejects pending requests.
///
/// Idempotent.
async fn teardown(
    transport: &Arc<dyn Transport>,
    state: &ConnectionStateMachine,
    dispatcher: &Dispatcher,
) {
    release_transport(transport).await;
    state.force_disconnected();
    dispatcher.fail_all(|| Error::ConnectionLost);
}

/// Unsubscribes and disconnects, logging failures.
async fn release_transport(transport: &Arc<dyn Transport>) {
    if let Err(e) = transport.unsubscribe().await {
        debug!(error = %e, "Unsubscribe failed during teardown");
    }
    if let Err(e) = transport.disconnect().await {
        debug!(error = %e, "Disconnect failed during teardown");
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::transport::{DeviceEmulator, SimulatedTransport};

    fn session(transport: &SimulatedTransport) -> Connection {
        Connection::with_defaults(Arc::new(transport.clone()))
    }

    #[test]
    fn test_constants() {
        assert_eq!(ATT_HEADER_LEN, 3);
        assert_eq!(MIN_CHUNK_LEN, 20);
    }

    #[tokio::test]
    async fn test_connect_and_disconnect() {
        let transport = SimulatedTransport::new();
        let connection = session(&transport);

        connection.connect(None).await.expect("connect");
        assert_eq!(connection.state(), ConnectionState::Connected);
        assert!(transport.is_subscribed());
        assert_eq!(connection.write_chunk_len(), 253);

        connection.disconnect().await.expect("disconnect");
        assert_eq!(connection.state(), ConnectionState::Disconnected);
        assert!(!transport.is_subscribed());

        // Second disconnect is a no-op.
        connection.disconnect().await.expect("idempotent");
    }

    #[tokio::test]
    async fn test_scan_radio_off() {
        let transport = SimulatedTransport::new();
        transport.set_radio_state(RadioState::PoweredOff);
        let connection = session(&transport);

        let err = connection.scan().await.unwrap_err();
        assert!(matches!(
            err,
            Error::RadioUnavailable {
                state: RadioState::PoweredOff
            }
        ));
        assert_eq!(connection.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_request_round_trip() {
        let transport = SimulatedTransport::new();
        transport.attach_emulator(DeviceEmulator::new());
        let connection = session(&transport);
        connection.connect(None).await.expect("connect");

        let response = connection.send(Command::Status).await.expect("status");
        assert_eq!(response.tag, "status");
        assert_eq!(response.get_str("state"), Some("idle"));
        assert_eq!(connection.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_frames_chunked_to_mtu() {
        let transport = SimulatedTransport::new();
        transport.set_max_mtu(MIN_MTU);
        transport.attach_emulator(DeviceEmulator::new());
        let connection = session(&transport);
        connection.connect(None).await.expect("connect");

        let slot = crate::identifiers::SlotId::new(1).expect("valid slot");
        let _ = connection
            .send(Command::Save {
                slot,
                name: "a rather long signal name".to_string(),
            })
            .await;

        let chunks = transport.written_chunks();
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.len() <= MIN_CHUNK_LEN));
        assert_eq!(transport.requests().len(), 1);
    }
}
