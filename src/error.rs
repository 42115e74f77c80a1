//! Error types for the remote link.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use garage_remote::{Device, Result, SlotId};
//!
//! async fn example(device: &Device) -> Result<()> {
//!     let slot = SlotId::try_from(2)?;
//!     device.play(slot).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`], [`Error::InvalidArgument`] |
//! | Radio | [`Error::RadioUnavailable`], [`Error::DiscoveryTimeout`] |
//! | Connection | [`Error::NotConnected`], [`Error::ConnectionLost`], [`Error::TransportFailure`] |
//! | Request | [`Error::RequestTimeout`], [`Error::DeviceReported`], [`Error::Protocol`] |
//! | Framing | [`Error::MalformedFrame`] (absorbed by the frame assembler) |
//! | External | [`Error::Json`] |

// ============================================================================
// Imports
// ============================================================================

use std::result::Result as StdResult;

use thiserror::Error;

use crate::transport::RadioState;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when a session configuration fails validation.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// Invalid argument passed to a typed call.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument.
        message: String,
    },

    // ========================================================================
    // Radio Errors
    // ========================================================================
    /// Local radio is powered off, unsupported or never became ready.
    #[error("Radio unavailable: {state}")]
    RadioUnavailable {
        /// Radio state observed when the check failed.
        state: RadioState,
    },

    /// No matching peer found within the scan window.
    #[error("No peer found within {timeout_ms}ms")]
    DiscoveryTimeout {
        /// Milliseconds scanned before giving up.
        timeout_ms: u64,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Operation attempted outside the `Connected` state.
    #[error("Not connected")]
    NotConnected,

    /// The link was torn down while a request was still pending.
    #[error("Connection lost")]
    ConnectionLost,

    /// Underlying transport primitive failed.
    #[error("Transport failure: {message}")]
    TransportFailure {
        /// Description reported by the transport.
        message: String,
    },

    // ========================================================================
    // Request Errors
    // ========================================================================
    /// No matching response arrived before the deadline.
    #[error("Request '{tag}' timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// Tag of the request that timed out.
        tag: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// The peer answered with an error status.
    #[error("Device reported error for '{tag}': {detail}")]
    DeviceReported {
        /// Tag of the rejected request.
        tag: String,
        /// Error detail sent by the peer.
        detail: String,
    },

    /// Protocol violation or unexpected response shape.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    // ========================================================================
    // Framing Errors
    // ========================================================================
    /// A delimited segment could not be decoded.
    ///
    /// Never surfaced to callers; the frame assembler logs and drops it.
    #[error("Malformed frame: {reason}")]
    MalformedFrame {
        /// Why the segment was rejected.
        reason: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    #[inline]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a radio unavailable error.
    #[inline]
    pub fn radio_unavailable(state: RadioState) -> Self {
        Self::RadioUnavailable { state }
    }

    /// Creates a discovery timeout error.
    #[inline]
    pub fn discovery_timeout(timeout_ms: u64) -> Self {
        Self::DiscoveryTimeout { timeout_ms }
    }

    /// Creates a transport failure error.
    #[inline]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::TransportFailure {
            message: message.into(),
        }
    }

    /// Creates a request timeout error.
    #[inline]
    pub fn request_timeout(tag: impl Into<String>, timeout_ms: u64) -> Self {
        Self::RequestTimeout {
            tag: tag.into(),
            timeout_ms,
        }
    }

    /// Creates a device reported error.
    #[inline]
    pub fn device_reported(tag: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::DeviceReported {
            tag: tag.into(),
            detail: detail.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a malformed frame error.
    #[inline]
    pub fn malformed_frame(reason: impl Into<String>) -> Self {
        Self::MalformedFrame {
            reason: reason.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::DiscoveryTimeout { .. } | Self::RequestTimeout { .. }
        )
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::NotConnected
                | Self::ConnectionLost
                | Self::TransportFailure { .. }
                | Self::RadioUnavailable { .. }
        )
    }

    /// Returns `true` if the peer itself rejected the request.
    #[inline]
    #[must_use]
    pub fn is_device_error(&self) -> bool {
        matches!(self, Self::DeviceReported { .. })
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed if the caller re-issues the call.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::DiscoveryTimeout { .. }
                | Self::RequestTimeout { .. }
                | Self::ConnectionLost
                | Self::NotConnected
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
