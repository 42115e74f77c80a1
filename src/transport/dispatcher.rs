//! Command dispatch and response correlation.
//!
//! The peer answers every request with a message carrying the same tag.
//! The dispatcher keeps one pending expectation per outstanding
//! request, hands each decoded message to the oldest live expectation
//! with a matching tag (or matching `id` in identifier mode), and makes
//! sure every expectation ends exactly once: matched, timed out, rejected
//! on send failure, or rejected on teardown.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::oneshot;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, trace, warn};

use crate::config::CorrelationMode;
use crate::error::{Error, Result};
use crate::identifiers::RequestId;
use crate::protocol::{Command, Message, Request, encode_frame};

// ============================================================================
// Types
// ============================================================================

/// Completion handle for one expectation.
type Completion = oneshot::Sender<Result<Message>>;

/// Bookkeeping for one outstanding request.
#[derive(Debug)]
struct PendingExpectation {
    /// Tag the response must carry.
    tag: &'static str,
    /// Issuance order, used for FIFO matching among equal tags.
    seq: u64,
    /// Instant after which the expectation no longer accepts a match.
    deadline: Instant,
    /// Resolves or rejects the waiting caller.
    completion: Completion,
}

#[derive(Debug, Default)]
struct PendingSet {
    entries: FxHashMap<RequestId, PendingExpectation>,
    next_seq: u64,
}

// ============================================================================
// FrameSink
// ============================================================================

/// Where the dispatcher writes encoded requests.
#[async_trait]
pub trait FrameSink: Send + Sync {
    /// Returns `true` if the link is in the `Connected` state.
    fn is_connected(&self) -> bool;

    /// Writes one complete delimited frame.
    async fn write_frame(&self, frame: &[u8]) -> Result<()>;
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Request/response correlation over a one-way write channel.
#[derive(Debug)]
pub struct Dispatcher {
    pending: Mutex<PendingSet>,
    mode: CorrelationMode,
    max_pending: usize,
}

impl Dispatcher {
    /// Creates a dispatcher with an empty pending set.
    #[must_use]
    pub fn new(mode: CorrelationMode, max_pending: usize) -> Self {
        Self {
            pending: Mutex::new(PendingSet::default()),
            mode,
            max_pending: max_pending.max(1),
        }
    }

    /// Returns the correlation strategy.
    #[inline]
    #[must_use]
    pub fn mode(&self) -> CorrelationMode {
        self.mode
    }

    /// Returns the number of outstanding expectations.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().entries.len()
    }

    /// Sends `command` through `sink` and waits for the matching response.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] if the sink is not connected (nothing is written)
    /// - [`Error::Protocol`] if too many requests are outstanding
    /// - [`Error::TransportFailure`] if the write fails
    /// - [`Error::RequestTimeout`] if no response arrives before the deadline
    /// - [`Error::DeviceReported`] if the response has error status
    /// - [`Error::ConnectionLost`] if the link is torn down while waiting
    pub async fn send(
        &self,
        sink: &dyn FrameSink,
        command: Command,
        request_timeout: Duration,
    ) -> Result<Message> {
        if !sink.is_connected() {
            return Err(Error::NotConnected);
        }

        let tag = command.tag();
        let deadline = deadline_after(request_timeout);
        let (id, response_rx) = self.register(tag, deadline)?;
        let guard = PendingGuard { dispatcher: self, id };

        let request = match self.mode {
            CorrelationMode::Tag => Request::new(command),
            CorrelationMode::Identifier => Request::with_id(id, command),
        };
        let frame = encode_frame(&request)?;

        if let Err(e) = sink.write_frame(&frame).await {
            debug!(tag, error = %e, "Send failed, dropping expectation");
            return Err(e);
        }
        trace!(tag, %id, len = frame.len(), "Request sent");

        let outcome = timeout_at(deadline, response_rx).await;
        drop(guard);

        match outcome {
            Ok(Ok(result)) => result?.into_result(),
            Ok(Err(_)) => Err(Error::ConnectionLost),
            Err(_) => {
                debug!(tag, %id, "Request timed out");
                Err(Error::request_timeout(
                    tag,
                    request_timeout.as_millis() as u64,
                ))
            }
        }
    }

    /// Registers an expectation for `tag` until `deadline`.
    fn register(
        &self,
        tag: &'static str,
        deadline: Instant,
    ) -> Result<(RequestId, oneshot::Receiver<Result<Message>>)> {
        let (completion, response_rx) = oneshot::channel();
        let id = RequestId::generate();

        let mut pending = self.pending.lock();
        if pending.entries.len() >= self.max_pending {
            warn!(
                pending = pending.entries.len(),
                max = self.max_pending,
                "Too many pending requests"
            );
            return Err(Error::protocol(format!(
                "Too many pending requests: {}/{}",
                pending.entries.len(),
                self.max_pending
            )));
        }

        let seq = pending.next_seq;
        pending.next_seq += 1;
        pending.entries.insert(
            id,
            PendingExpectation {
                tag,
                seq,
                deadline,
                completion,
            },
        );

        Ok((id, response_rx))
    }

    /// Removes an expectation without completing it.
    ///
    /// Returns `true` if it was still pending.
    fn remove(&self, id: RequestId) -> bool {
        self.pending.lock().entries.remove(&id).is_some()
    }

    /// Hands a decoded message to the expectation it answers.
    ///
    /// Returns `true` if an expectation was resolved. Messages nobody is
    /// waiting for are logged and dropped.
    pub fn route(&self, message: Message) -> bool {
        let expectation = {
            let mut pending = self.pending.lock();
            let id = self.find_match(&pending, &message);
            id.and_then(|id| pending.entries.remove(&id))
        };

        match expectation {
            Some(expectation) => {
                trace!(tag = %message.tag, seq = expectation.seq, "Response matched");
                let _ = expectation.completion.send(Ok(message));
                true
            }
            None => {
                debug!(tag = %message.tag, "Dropping unsolicited message");
                false
            }
        }
    }

    fn find_match(&self, pending: &PendingSet, message: &Message) -> Option<RequestId> {
        if self.mode == CorrelationMode::Identifier
            && let Some(id) = message.id
        {
            return pending
                .entries
                .get(&id)
                .filter(|e| e.tag == message.tag)
                .map(|_| id);
        }

        let now = Instant::now();
        pending
            .entries
            .iter()
            .filter(|(_, e)| e.tag == message.tag && e.deadline > now)
            .min_by_key(|(_, e)| e.seq)
            .map(|(id, _)| *id)
    }

    /// Rejects every outstanding expectation.
    ///
    /// Returns the number rejected.
    pub fn fail_all(&self, reason: impl Fn() -> Error) -> usize {
        let drained: Vec<_> = self.pending.lock().entries.drain().collect();
        let count = drained.len();

        for (_, expectation) in drained {
            let _ = expectation.completion.send(Err(reason()));
        }

        if count > 0 {
            debug!(count, "Failed pending requests");
        }
        count
    }
}

/// Longest wait actually scheduled; larger timeouts are clamped to it.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Returns `now + timeout` without overflowing the clock.
fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .unwrap_or_else(|| now + FAR_FUTURE)
}

// ============================================================================
// PendingGuard
// ============================================================================

/// Removes an expectation when its caller stops waiting.
///
/// Covers send failure, timeout and the caller dropping the future.
struct PendingGuard<'a> {
    dispatcher: &'a Dispatcher,
    id: RequestId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.dispatcher.remove(self.id) {
            trace!(id = %self.id, "Removed abandoned expectation");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
