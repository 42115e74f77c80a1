//! In-process [`Transport`] implementation.
//!
//! [`SimulatedTransport`] stands in for a platform BLE stack. It keeps a
//! list of advertising peers, reassembles outbound writes into request
//! lines, and answers them through a pluggable responder (usually a
//! [`DeviceEmulator`]). Faults, radio state, and link loss can be
//! injected from tests.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace, warn};

use crate::config::{DEFAULT_PEER_NAME, PeerFilter, UART_SERVICE_UUID};
use crate::error::{Error, Result};
use crate::protocol::FRAME_DELIMITER;

use super::emulator::DeviceEmulator;
use super::{NotificationStream, PeerHandle, RadioState, Transport, TransportEvent};

// ============================================================================
// Constants
// ============================================================================

/// Largest MTU the simulated peer accepts by default.
const DEFAULT_MAX_MTU: u16 = 517;

/// Address of the default advertising peer.
const DEFAULT_PEER_ID: &str = "SIM:00:00:00:00:01";

// ============================================================================
// Types
// ============================================================================

/// Produces the response to one decoded request, or nothing.
pub type Responder = Arc<dyn Fn(&Value) -> Option<Value> + Send + Sync>;

#[derive(Debug, Default, Clone, Copy)]
struct Faults {
    connect: bool,
    mtu: bool,
    subscribe: bool,
    writes: bool,
    drop_on_subscribe: bool,
}

struct SimState {
    peers: Vec<PeerHandle>,
    max_mtu: u16,
    faults: Faults,
    connected: bool,
    notify_tx: Option<mpsc::UnboundedSender<TransportEvent>>,
    outbound: Vec<u8>,
    requests: Vec<Value>,
    written: Vec<Vec<u8>>,
    responder: Option<Responder>,
    notify_chunk_len: Option<usize>,
    connects: usize,
    disconnects: usize,
    release_delay: Duration,
}

struct SimInner {
    radio_tx: watch::Sender<RadioState>,
    state: Mutex<SimState>,
}

// ============================================================================
// SimulatedTransport
// ============================================================================

/// Scriptable in-memory transport.
///
/// Cheap to clone; clones share state, so a test can keep one handle
/// while the [`Connection`](super::Connection) owns another.
///
/// # Example
///
/// ```
/// use garage_remote::transport::{DeviceEmulator, SimulatedTransport};
///
/// let transport = SimulatedTransport::new();
/// let device = transport.attach_emulator(DeviceEmulator::new());
/// assert_eq!(device.lock().handled(), 0);
/// ```
#[derive(Clone)]
pub struct SimulatedTransport {
    inner: Arc<SimInner>,
}

impl Default for SimulatedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SimulatedTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("SimulatedTransport")
            .field("radio", &*self.inner.radio_tx.borrow())
            .field("peers", &state.peers.len())
            .field("connected", &state.connected)
            .field("subscribed", &state.notify_tx.is_some())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// SimulatedTransport - Setup
// ============================================================================

impl SimulatedTransport {
    /// Creates a powered-on transport with one matching peer in range.
    #[must_use]
    pub fn new() -> Self {
        let peer = PeerHandle {
            rssi: Some(-60),
            ..PeerHandle::new(DEFAULT_PEER_ID)
                .with_name(DEFAULT_PEER_NAME)
                .with_service(UART_SERVICE_UUID)
        };

        let (radio_tx, _) = watch::channel(RadioState::PoweredOn);

        Self {
            inner: Arc::new(SimInner {
                radio_tx,
                state: Mutex::new(SimState {
                    peers: vec![peer],
                    max_mtu: DEFAULT_MAX_MTU,
                    faults: Faults::default(),
                    connected: false,
                    notify_tx: None,
                    outbound: Vec::new(),
                    requests: Vec::new(),
                    written: Vec::new(),
                    responder: None,
                    notify_chunk_len: None,
                    connects: 0,
                    disconnects: 0,
                    release_delay: Duration::ZERO,
                }),
            }),
        }
    }

    /// Changes the radio state. `Unknown` makes `radio_state` wait.
    pub fn set_radio_state(&self, state: RadioState) {
        self.inner.radio_tx.send_replace(state);
    }

    /// Adds an advertising peer.
    pub fn add_peer(&self, peer: PeerHandle) {
        self.inner.state.lock().peers.push(peer);
    }

    /// Removes every advertising peer.
    pub fn clear_peers(&self) {
        self.inner.state.lock().peers.clear();
    }

    /// Caps the MTU the peer accepts.
    pub fn set_max_mtu(&self, mtu: u16) {
        self.inner.state.lock().max_mtu = mtu;
    }

    /// Makes `connect` fail.
    pub fn fail_connect(&self, fail: bool) {
        self.inner.state.lock().faults.connect = fail;
    }

    /// Makes MTU negotiation fail.
    pub fn fail_mtu(&self, fail: bool) {
        self.inner.state.lock().faults.mtu = fail;
    }

    /// Makes `subscribe` fail.
    pub fn fail_subscribe(&self, fail: bool) {
        self.inner.state.lock().faults.subscribe = fail;
    }

    /// Makes every `write` fail.
    pub fn fail_writes(&self, fail: bool) {
        self.inner.state.lock().faults.writes = fail;
    }

    /// Makes the link drop right after `subscribe` hands out its stream.
    pub fn drop_link_on_subscribe(&self, enabled: bool) {
        self.inner.state.lock().faults.drop_on_subscribe = enabled;
    }

    /// Makes `unsubscribe` take `delay` before releasing the notify channel.
    pub fn set_release_delay(&self, delay: Duration) {
        self.inner.state.lock().release_delay = delay;
    }

    /// Installs a responder for decoded requests.
    pub fn set_responder<F>(&self, responder: F)
    where
        F: Fn(&Value) -> Option<Value> + Send + Sync + 'static,
    {
        self.inner.state.lock().responder = Some(Arc::new(responder));
    }

    /// Removes the responder; requests go unanswered.
    pub fn clear_responder(&self) {
        self.inner.state.lock().responder = None;
    }

    /// Answers requests with `emulator` and returns a handle to it.
    pub fn attach_emulator(&self, emulator: DeviceEmulator) -> Arc<Mutex<DeviceEmulator>> {
        let device = Arc::new(Mutex::new(emulator));
        let handle = Arc::clone(&device);
        self.set_responder(move |request| Some(device.lock().handle(request)));
        handle
    }

    /// Splits each response into notifications of at most `len` bytes.
    pub fn set_notify_chunk_len(&self, len: usize) {
        self.inner.state.lock().notify_chunk_len = Some(len.max(1));
    }
}

// ============================================================================
// SimulatedTransport - Injection
// ============================================================================

impl SimulatedTransport {
    /// Delivers raw bytes as one notification.
    ///
    /// Returns `false` if nobody is subscribed.
    pub fn inject(&self, bytes: impl Into<Vec<u8>>) -> bool {
        let tx = self.inner.state.lock().notify_tx.clone();
        match tx {
            Some(tx) => tx.send(TransportEvent::Notification(bytes.into())).is_ok(),
            None => false,
        }
    }

    /// Drops the link as if the peer went out of range.
    pub fn drop_link(&self, reason: &str) {
        let tx = {
            let mut state = self.inner.state.lock();
            state.connected = false;
            state.notify_tx.take()
        };

        debug!(%reason, "Simulated link drop");
        if let Some(tx) = tx {
            let _ = tx.send(TransportEvent::LinkLost {
                reason: reason.to_string(),
            });
        }
    }
}

// ============================================================================
// SimulatedTransport - Inspection
// ============================================================================

impl SimulatedTransport {
    /// Returns every complete request written so far, decoded.
    #[must_use]
    pub fn requests(&self) -> Vec<Value> {
        self.inner.state.lock().requests.clone()
    }

    /// Returns every raw chunk written so far.
    #[must_use]
    pub fn written_chunks(&self) -> Vec<Vec<u8>> {
        self.inner.state.lock().written.clone()
    }

    /// Returns the number of successful writes.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.inner.state.lock().written.len()
    }

    /// Returns the number of successful connects.
    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.inner.state.lock().connects
    }

    /// Returns the number of disconnect calls.
    #[must_use]
    pub fn disconnect_count(&self) -> usize {
        self.inner.state.lock().disconnects
    }

    /// Returns `true` while a notification subscription is open.
    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.inner.state.lock().notify_tx.is_some()
    }

    /// Returns `true` while the link is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.state.lock().connected
    }
}

// ============================================================================
// Transport Implementation
// ============================================================================

#[async_trait]
impl Transport for SimulatedTransport {
    async fn radio_state(&self) -> RadioState {
        let mut rx = self.inner.radio_tx.subscribe();
        match rx.wait_for(|state| *state != RadioState::Unknown).await {
            Ok(state) => *state,
            Err(_) => RadioState::Unknown,
        }
    }

    async fn discover(&self, filter: &PeerFilter, window: Duration) -> Result<Option<PeerHandle>> {
        let found = self
            .inner
            .state
            .lock()
            .peers
            .iter()
            .find(|peer| peer.matches(filter))
            .cloned();

        if found.is_none() {
            tokio::time::sleep(window).await;
        }
        Ok(found)
    }

    async fn connect(&self, peer: &PeerHandle) -> Result<()> {
        let mut state = self.inner.state.lock();
        if state.faults.connect {
            return Err(Error::transport("connection refused by peer"));
        }
        if !state.peers.iter().any(|p| p.id == peer.id) {
            return Err(Error::transport(format!("peer {} not in range", peer.id)));
        }

        state.connected = true;
        state.connects += 1;
        state.outbound.clear();
        Ok(())
    }

    async fn negotiate_mtu(&self, preferred: u16) -> Result<u16> {
        let state = self.inner.state.lock();
        if state.faults.mtu {
            return Err(Error::transport("MTU exchange failed"));
        }
        Ok(preferred.min(state.max_mtu))
    }

    async fn subscribe(&self) -> Result<NotificationStream> {
        let rx = {
            let mut state = self.inner.state.lock();
            if state.faults.subscribe {
                return Err(Error::transport("notification subscribe failed"));
            }
            if !state.connected {
                return Err(Error::transport("subscribe without link"));
            }
            let (tx, rx) = mpsc::unbounded_channel();
            if state.faults.drop_on_subscribe {
                let _ = tx.send(TransportEvent::LinkLost {
                    reason: "peer went away during subscribe".to_string(),
                });
                state.connected = false;
            } else {
                state.notify_tx = Some(tx);
            }
            rx
        };

        let stream = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        });
        Ok(stream.boxed())
    }

    async fn unsubscribe(&self) -> Result<()> {
        let delay = self.inner.state.lock().release_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.inner.state.lock().notify_tx = None;
        Ok(())
    }

    async fn write(&self, chunk: &[u8]) -> Result<()> {
        let (lines, responder, tx, notify_chunk_len) = {
            let mut state = self.inner.state.lock();
            if state.faults.writes {
                return Err(Error::transport("write rejected"));
            }
            if !state.connected {
                return Err(Error::transport("write without link"));
            }

            state.written.push(chunk.to_vec());
            state.outbound.extend_from_slice(chunk);

            let mut lines = Vec::new();
            while let Some(pos) = state.outbound.iter().position(|&b| b == FRAME_DELIMITER) {
                let line: Vec<u8> = state.outbound.drain(..=pos).collect();
                match serde_json::from_slice::<Value>(&line[..pos]) {
                    Ok(value) => {
                        state.requests.push(value.clone());
                        lines.push(value);
                    }
                    Err(e) => warn!(error = %e, "Simulated peer got malformed request"),
                }
            }

            (
                lines,
                state.responder.clone(),
                state.notify_tx.clone(),
                state.notify_chunk_len,
            )
        };

        let (Some(responder), Some(tx)) = (responder, tx) else {
            return Ok(());
        };

        for request in &lines {
            let Some(response) = responder(request) else {
                continue;
            };

            let mut bytes = serde_json::to_vec(&response)?;
            bytes.push(FRAME_DELIMITER);
            trace!(len = bytes.len(), "Simulated response");

            let chunk_len = notify_chunk_len.unwrap_or(bytes.len());
            for piece in bytes.chunks(chunk_len) {
                let _ = tx.send(TransportEvent::Notification(piece.to_vec()));
            }
        }

        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let mut state = self.inner.state.lock();
        state.connected = false;
        state.notify_tx = None;
        state.disconnects += 1;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
