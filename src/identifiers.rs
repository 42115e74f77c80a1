//! Type-safe identifiers.
//!
//! Newtype wrappers prevent mixing slot numbers, request correlation IDs
//! and listener handles at compile time.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

// ============================================================================
// SlotId
// ============================================================================

/// Storage slot on the peer.
///
/// The device keeps a fixed number of slots numbered from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct SlotId(u8);

impl SlotId {
    /// Lowest valid slot number.
    pub const MIN: u8 = 1;

    /// Highest valid slot number.
    pub const MAX: u8 = 5;

    /// Creates a slot ID, returning `None` when out of range.
    #[inline]
    #[must_use]
    pub const fn new(slot: u8) -> Option<Self> {
        if slot >= Self::MIN && slot <= Self::MAX {
            Some(Self(slot))
        } else {
            None
        }
    }

    /// Returns the raw slot number.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }

    /// Iterates every valid slot in ascending order.
    pub fn all() -> impl Iterator<Item = Self> {
        (Self::MIN..=Self::MAX).map(Self)
    }
}

impl TryFrom<u8> for SlotId {
    type Error = Error;

    fn try_from(slot: u8) -> Result<Self> {
        Self::new(slot).ok_or_else(|| {
            Error::invalid_argument(format!(
                "slot {slot} out of range {}..={}",
                Self::MIN,
                Self::MAX
            ))
        })
    }
}

impl From<SlotId> for u8 {
    #[inline]
    fn from(slot: SlotId) -> Self {
        slot.0
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// RequestId
// ============================================================================

/// Correlation identifier attached to outgoing requests.
///
/// Always generated locally to key the pending set. Only sent on the wire
/// when identifier correlation is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Generates a new random request ID.
    #[inline]
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[inline]
    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// SubscriptionId
// ============================================================================

static NEXT_SUBSCRIPTION: AtomicU64 = AtomicU64::new(1);

/// Handle identifying one registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Allocates a process-unique subscription ID.
    #[inline]
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_SUBSCRIPTION.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================
