//! Session configuration.
//!
//! Provides a fluent builder for the timeouts, limits and peer identity a
//! [`Connection`](crate::transport::Connection) works with.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use garage_remote::SessionConfig;
//!
//! # fn example() -> garage_remote::Result<()> {
//! let config = SessionConfig::builder()
//!     .peer_name("GarageDoor433")
//!     .request_timeout(Duration::from_secs(3))
//!     .build()?;
//! assert_eq!(config.request_timeout, Duration::from_secs(3));
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use uuid::Uuid;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Nordic UART service advertised by the peer.
pub const UART_SERVICE_UUID: Uuid = Uuid::from_u128(0x6E400001_B5A3_F393_E0A9_E50E24DCCA9E);

/// Characteristic the client writes requests to.
pub const UART_RX_CHAR_UUID: Uuid = Uuid::from_u128(0x6E400002_B5A3_F393_E0A9_E50E24DCCA9E);

/// Characteristic the peer notifies responses on.
pub const UART_TX_CHAR_UUID: Uuid = Uuid::from_u128(0x6E400003_B5A3_F393_E0A9_E50E24DCCA9E);

/// Name the firmware advertises.
pub const DEFAULT_PEER_NAME: &str = "GarageDoor433";

/// Default timeout for one request/response round trip.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(5000);

/// Default scan window.
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(10);

/// How long to wait for the radio to settle before scanning.
pub const DEFAULT_RADIO_READY_TIMEOUT: Duration = Duration::from_secs(5);

/// MTU requested during negotiation.
pub const DEFAULT_PREFERRED_MTU: u16 = 256;

/// ATT minimum MTU every link supports.
pub const MIN_MTU: u16 = 23;

/// Maximum outstanding requests before new sends are refused.
pub const DEFAULT_MAX_PENDING: usize = 16;

/// Largest undelimited residue the assembler keeps.
pub const DEFAULT_MAX_FRAME_LEN: usize = 4096;

// ============================================================================
// CorrelationMode
// ============================================================================

/// How responses are matched to outstanding requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CorrelationMode {
    /// Match by tag only, oldest outstanding request first.
    ///
    /// Compatible with firmware that does not echo an `id` field.
    #[default]
    Tag,

    /// Attach an `id` to every request and match the echoed `id`.
    ///
    /// Responses without an `id` still fall back to tag matching.
    Identifier,
}

// ============================================================================
// PeerFilter
// ============================================================================

/// Identity marker a peer must advertise to be selected by a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerFilter {
    /// Advertised local name.
    pub name: Option<String>,
    /// Advertised primary service.
    pub service: Option<Uuid>,
}

impl Default for PeerFilter {
    fn default() -> Self {
        Self {
            name: Some(DEFAULT_PEER_NAME.to_string()),
            service: Some(UART_SERVICE_UUID),
        }
    }
}

impl PeerFilter {
    /// Returns `true` if an advertisement matches this filter.
    ///
    /// Either marker is sufficient; the firmware puts its name in the
    /// advertisement and its service UUID in the scan response.
    #[must_use]
    pub fn matches(&self, name: Option<&str>, services: &[Uuid]) -> bool {
        let by_name = matches!((&self.name, name), (Some(want), Some(got)) if want == got);
        let by_service = self.service.is_some_and(|s| services.contains(&s));
        by_name || by_service
    }
}

// ============================================================================
// SessionConfig
// ============================================================================

/// Validated configuration for a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Identity the scan looks for.
    pub peer: PeerFilter,
    /// Bounded scan window.
    pub scan_timeout: Duration,
    /// How long to wait for the radio to settle.
    pub radio_ready_timeout: Duration,
    /// Default per-request deadline.
    pub request_timeout: Duration,
    /// MTU requested during negotiation.
    pub preferred_mtu: u16,
    /// Outstanding request limit.
    pub max_pending: usize,
    /// Largest undelimited residue kept by the assembler.
    pub max_frame_len: usize,
    /// Response correlation strategy.
    pub correlation: CorrelationMode,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            peer: PeerFilter::default(),
            scan_timeout: DEFAULT_SCAN_TIMEOUT,
            radio_ready_timeout: DEFAULT_RADIO_READY_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            preferred_mtu: DEFAULT_PREFERRED_MTU,
            max_pending: DEFAULT_MAX_PENDING,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            correlation: CorrelationMode::default(),
        }
    }
}

impl SessionConfig {
    /// Creates a new builder seeded with defaults.
    #[inline]
    #[must_use]
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::new()
    }
}

// ============================================================================
// SessionConfigBuilder
// ============================================================================

/// Builder for [`SessionConfig`].
#[derive(Debug, Default, Clone)]
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    /// Creates a builder with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the advertised name to look for.
    #[inline]
    #[must_use]
    pub fn peer_name(mut self, name: impl Into<String>) -> Self {
        self.config.peer.name = Some(name.into());
        self
    }

    /// Sets the advertised service to look for.
    #[inline]
    #[must_use]
    pub fn peer_service(mut self, service: Uuid) -> Self {
        self.config.peer.service = Some(service);
        self
    }

    /// Replaces the whole peer filter.
    #[inline]
    #[must_use]
    pub fn peer(mut self, filter: PeerFilter) -> Self {
        self.config.peer = filter;
        self
    }

    /// Sets the scan window.
    #[inline]
    #[must_use]
    pub fn scan_timeout(mut self, timeout: Duration) -> Self {
        self.config.scan_timeout = timeout;
        self
    }

    /// Sets how long to wait for radio readiness.
    #[inline]
    #[must_use]
    pub fn radio_ready_timeout(mut self, timeout: Duration) -> Self {
        self.config.radio_ready_timeout = timeout;
        self
    }

    /// Sets the default request deadline.
    #[inline]
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Sets the MTU requested during negotiation.
    #[inline]
    #[must_use]
    pub fn preferred_mtu(mut self, mtu: u16) -> Self {
        self.config.preferred_mtu = mtu;
        self
    }

    /// Sets the outstanding request limit.
    #[inline]
    #[must_use]
    pub fn max_pending(mut self, max: usize) -> Self {
        self.config.max_pending = max;
        self
    }

    /// Sets the largest undelimited residue the assembler keeps.
    #[inline]
    #[must_use]
    pub fn max_frame_len(mut self, len: usize) -> Self {
        self.config.max_frame_len = len;
        self
    }

    /// Sets the correlation strategy.
    #[inline]
    #[must_use]
    pub fn correlation(mut self, mode: CorrelationMode) -> Self {
        self.config.correlation = mode;
        self
    }

    /// Builds the configuration with validation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a timeout is zero, the MTU is below the
    /// ATT minimum, a limit is zero, or the peer filter is empty.
    pub fn build(self) -> Result<SessionConfig> {
        let config = self.config;

        if config.peer.name.is_none() && config.peer.service.is_none() {
            return Err(Error::config(
                "Peer filter needs a name or a service UUID. Use .peer_name() or .peer_service().",
            ));
        }

        for (label, value) in [
            ("scan_timeout", config.scan_timeout),
            ("radio_ready_timeout", config.radio_ready_timeout),
            ("request_timeout", config.request_timeout),
        ] {
            if value.is_zero() {
                return Err(Error::config(format!("{label} must be greater than zero")));
            }
        }

        if config.preferred_mtu < MIN_MTU {
            return Err(Error::config(format!(
                "preferred_mtu {} is below the ATT minimum of {MIN_MTU}",
                config.preferred_mtu
            )));
        }

        if config.max_pending == 0 {
            return Err(Error::config("max_pending must be at least 1"));
        }

        if config.max_frame_len == 0 {
            return Err(Error::config("max_frame_len must be at least 1"));
        }

        Ok(config)
    }
}

// ============================================================================
// Tests
// ============================================================================
