//! Stream-to-message framing.
//!
//! The notification channel delivers bytes at whatever granularity the
//! radio stack chooses. Messages are separated by a single `\n`; JSON
//! encoding escapes newlines inside strings, so a body never contains a
//! raw delimiter.
//!
//! [`FrameAssembler`] buffers chunks, cuts them at each delimiter, decodes
//! every complete segment and emits the [`Message`]s in arrival order. A
//! segment that fails to decode is logged and dropped without affecting
//! its neighbours.

// ============================================================================
// Imports
// ============================================================================

use serde::Serialize;
use tracing::{trace, warn};

use crate::config::DEFAULT_MAX_FRAME_LEN;
use crate::error::{Error, Result};

use super::Message;

// ============================================================================
// Constants
// ============================================================================

/// Byte separating consecutive messages.
pub const FRAME_DELIMITER: u8 = b'\n';

// ============================================================================
// Encoding
// ============================================================================

/// Encodes a value as one delimited frame.
///
/// # Errors
///
/// Returns [`Error::Json`] if serialization fails.
pub fn encode_frame<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec(value)?;
    bytes.push(FRAME_DELIMITER);
    Ok(bytes)
}

/// Decodes one segment (without its delimiter) into a message.
///
/// Surrounding ASCII whitespace is ignored so `\r\n` peers decode too.
///
/// # Errors
///
/// Returns [`Error::MalformedFrame`] if the segment is not a JSON object
/// with an `action` (or `tag`) field.
pub fn decode_frame(segment: &[u8]) -> Result<Message> {
    let trimmed = segment.trim_ascii();
    if trimmed.is_empty() {
        return Err(Error::malformed_frame("empty segment"));
    }
    serde_json::from_slice(trimmed).map_err(|e| Error::malformed_frame(e.to_string()))
}

// ============================================================================
// FrameAssembler
// ============================================================================

/// Reassembles delimited messages from an arbitrarily chunked byte stream.
///
/// # Example
///
/// ```
/// use garage_remote::protocol::FrameAssembler;
///
/// let mut assembler = FrameAssembler::new();
/// assert!(assembler.push(br#"{"tag":"pl"#).is_empty());
///
/// let messages = assembler.push(b"ay\",\"status\":\"ok\"}\n");
/// assert_eq!(messages.len(), 1);
/// assert_eq!(messages[0].tag, "play");
/// ```
#[derive(Debug)]
pub struct FrameAssembler {
    /// Bytes received after the last delimiter.
    buffer: Vec<u8>,
    /// Residue limit before the buffer is discarded.
    max_frame_len: usize,
    /// Set after an overflow; bytes are dropped until the next delimiter.
    resync: bool,
    /// Segments dropped since creation.
    discarded: u64,
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameAssembler {
    /// Creates an assembler with the default residue limit.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_frame_len(DEFAULT_MAX_FRAME_LEN)
    }

    /// Creates an assembler with a custom residue limit.
    #[must_use]
    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(256),
            max_frame_len: max_frame_len.max(1),
            resync: false,
            discarded: 0,
        }
    }

    /// Appends a chunk and returns every message it completed, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Message> {
        let mut messages = Vec::new();
        self.push_with(chunk, |message| messages.push(message));
        messages
    }

    /// Appends a chunk and hands each completed message to `emit`.
    pub fn push_with(&mut self, chunk: &[u8], mut emit: impl FnMut(Message)) {
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|&b| b == FRAME_DELIMITER) {
            let (head, tail) = rest.split_at(pos);
            rest = &tail[1..];

            if self.resync {
                self.resync = false;
                self.buffer.clear();
                continue;
            }

            let decoded = if self.buffer.is_empty() {
                self.decode_segment(head)
            } else {
                self.buffer.extend_from_slice(head);
                let segment = std::mem::take(&mut self.buffer);
                let decoded = self.decode_segment(&segment);
                self.buffer = segment;
                self.buffer.clear();
                decoded
            };

            if let Some(message) = decoded {
                emit(message);
            }
        }

        if self.resync || rest.is_empty() {
            return;
        }

        if self.buffer.len() + rest.len() > self.max_frame_len {
            warn!(
                buffered = self.buffer.len() + rest.len(),
                max = self.max_frame_len,
                "Frame exceeds limit, discarding until next delimiter"
            );
            self.buffer.clear();
            self.resync = true;
            self.discarded += 1;
            return;
        }

        self.buffer.extend_from_slice(rest);
    }

    /// Decodes one segment, absorbing malformed input.
    fn decode_segment(&mut self, segment: &[u8]) -> Option<Message> {
        if segment.trim_ascii().is_empty() {
            return None;
        }

        match decode_frame(segment) {
            Ok(message) => {
                trace!(tag = %message.tag, len = segment.len(), "Frame decoded");
                Some(message)
            }
            Err(e) => {
                self.discarded += 1;
                warn!(
                    error = %e,
                    frame = %String::from_utf8_lossy(segment),
                    "Discarding malformed frame"
                );
                None
            }
        }
    }

    /// Returns the number of bytes waiting for a delimiter.
    #[inline]
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns the number of segments dropped as malformed or oversized.
    #[inline]
    #[must_use]
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Clears any partial frame.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.resync = false;
    }
}

// ============================================================================
// Tests
// ============================================================================
