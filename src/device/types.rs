//! Typed results returned by [`Device`](super::Device).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::identifiers::SlotId;

// ============================================================================
// Slot
// ============================================================================

/// A stored signal as reported by the device.
///
/// A read-only snapshot; the device owns the authoritative copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    /// Slot number.
    pub slot: SlotId,
    /// User label.
    pub name: String,
    /// Detected protocol label.
    #[serde(default)]
    pub protocol: String,
    /// Number of captured pulses.
    #[serde(default)]
    pub pulse_count: u32,
}

/// `get_slots` payload.
#[derive(Debug, Deserialize)]
pub(crate) struct SlotList {
    #[serde(default)]
    pub slots: Vec<Slot>,
}

// ============================================================================
// DeviceState / DeviceStatus
// ============================================================================

/// What the recorder is doing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    /// Waiting for commands.
    Idle,
    /// Capturing pulses.
    Recording,
    /// Holding an unsaved capture.
    Captured,
    /// Transmitting a stored signal.
    Replaying,
    /// Reported a state this client does not know.
    #[default]
    #[serde(other)]
    Unknown,
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Recording => "recording",
            Self::Captured => "captured",
            Self::Replaying => "replaying",
            Self::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

/// `status` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    /// Recorder state.
    #[serde(default)]
    pub state: DeviceState,
    /// Whether the device's radio link is up.
    #[serde(default)]
    pub ble: bool,
    /// Battery voltage.
    #[serde(default)]
    pub battery: f64,
    /// Number of occupied slots.
    #[serde(default)]
    pub signals: u32,
}

// ============================================================================
// Capture / SavedSignal
// ============================================================================

/// Result of ending a capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capture {
    /// Number of captured pulses.
    pub pulse_count: u32,
    /// Detected protocol label.
    #[serde(default)]
    pub protocol: String,
}

/// Confirmation of a save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedSignal {
    /// Slot written.
    pub slot: SlotId,
    /// Label stored.
    pub name: String,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_slot_from_firmware_json() {
        let slot: Slot = serde_json::from_value(json!({
            "slot": 3, "name": "gate", "pulse_count": 48, "protocol": "EV1527"
        }))
        .expect("slot");

        assert_eq!(slot.slot.get(), 3);
        assert_eq!(slot.pulse_count, 48);
    }

    #[test]
    fn test_slot_out_of_range_rejected() {
        let result: Result<Slot, _> = serde_json::from_value(json!({"slot": 9, "name": "x"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_device_state() {
        let status: DeviceStatus = serde_json::from_value(json!({
            "state": "sleeping", "ble": true, "battery": 3.7, "signals": 2
        }))
        .expect("status");

        assert_eq!(status.state, DeviceState::Unknown);
        assert_eq!(status.signals, 2);
    }

    #[test]
    fn test_status_defaults() {
        let status: DeviceStatus = serde_json::from_value(json!({})).expect("status");
        assert_eq!(status.state, DeviceState::Unknown);
        assert!(!status.ble);
    }
}
