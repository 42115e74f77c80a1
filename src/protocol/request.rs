//! Request and Message types.
//!
//! Defines what the client writes to the peer and what the peer notifies
//! back. Both directions are flat JSON objects keyed by `action`.

// ============================================================================
// Imports
// ============================================================================

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::identifiers::RequestId;

use super::Command;

// ============================================================================
// Request
// ============================================================================

/// A command request from client to peer.
///
/// # Format
///
/// ```json
/// {
///   "action": "play",
///   "slot": 1,
///   "id": "uuid"
/// }
/// ```
///
/// `id` is only present when identifier correlation is enabled.
#[derive(Debug, Clone, Serialize)]
pub struct Request {
    /// Correlation identifier echoed by peers that support it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,

    /// Command with tag and params.
    #[serde(flatten)]
    pub command: Command,
}

impl Request {
    /// Creates a request without a wire-level correlation ID.
    #[inline]
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self { id: None, command }
    }

    /// Creates a request carrying a correlation ID.
    #[inline]
    #[must_use]
    pub fn with_id(id: RequestId, command: Command) -> Self {
        Self {
            id: Some(id),
            command,
        }
    }

    /// Returns the tag the matching response will carry.
    #[inline]
    #[must_use]
    pub fn tag(&self) -> &'static str {
        self.command.tag()
    }
}

// ============================================================================
// Status
// ============================================================================

/// Response status discriminator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Successful response. Assumed when the field is absent.
    #[default]
    Ok,
    /// Error response.
    Error,
}

// ============================================================================
// Message
// ============================================================================

/// A decoded message from peer to client.
///
/// # Format
///
/// Success:
/// ```json
/// {"status": "ok", "action": "play", "slot": 1}
/// ```
///
/// Error:
/// ```json
/// {"status": "error", "action": "play", "message": "Slot empty"}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Tag of the request this message answers.
    #[serde(rename = "action", alias = "tag")]
    pub tag: String,

    /// Status discriminator.
    #[serde(default)]
    pub status: Status,

    /// Echoed correlation ID, if the peer supports it.
    ///
    /// A value that is not a request ID is treated as absent.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_id"
    )]
    pub id: Option<RequestId>,

    /// Error detail (if error).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Action-specific payload fields.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

fn lenient_id<'de, D>(deserializer: D) -> std::result::Result<Option<RequestId>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| serde_json::from_value(v).ok()))
}

impl Message {
    /// Returns `true` if this is a success message.
    #[inline]
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }

    /// Returns `true` if this is an error message.
    #[inline]
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.status == Status::Error
    }

    /// Returns the error detail, or a placeholder if none was sent.
    #[must_use]
    pub fn error_detail(&self) -> &str {
        self.message.as_deref().unwrap_or("unknown error")
    }

    /// Converts an error-status message into [`Error::DeviceReported`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceReported`] if the status is `error`.
    pub fn into_result(self) -> Result<Self> {
        match self.status {
            Status::Ok => Ok(self),
            Status::Error => Err(Error::device_reported(&self.tag, self.error_detail())),
        }
    }

    /// Deserializes the payload fields into a typed value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the payload does not have the
    /// expected shape.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(Value::Object(self.fields.clone())).map_err(|e| {
            Error::protocol(format!("unexpected '{}' payload: {e}", self.tag))
        })
    }

    /// Gets a string field.
    ///
    /// Returns `None` if the key is missing or not a string.
    #[inline]
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// Gets an unsigned integer field.
    ///
    /// Returns `None` if the key is missing or not a number.
    #[inline]
    #[must_use]
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.fields.get(key).and_then(Value::as_u64)
    }

    /// Gets a boolean field.
    ///
    /// Returns false if the key is missing or not a boolean.
    #[inline]
    #[must_use]
    pub fn get_bool(&self, key: &str) -> bool {
        self.fields
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or_default()
    }
}

// ============================================================================
// Tests
// ============================================================================
