//! Firmware-compatible command handler.
//!
//! [`DeviceEmulator`] answers the JSON command set the way the recorder
//! firmware does, including its error strings, so the typed API can be
//! exercised end to end without hardware.

// ============================================================================
// Imports
// ============================================================================

use std::collections::BTreeMap;

use serde_json::{Map, Value, json};
use tracing::trace;

use crate::identifiers::SlotId;

// ============================================================================
// Types
// ============================================================================

/// Capture state of the emulated recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmulatorState {
    /// Waiting for commands.
    Idle,
    /// Capturing pulses.
    Recording,
    /// Holding a capture not yet saved.
    Captured,
}

impl EmulatorState {
    fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Recording => "recording",
            Self::Captured => "captured",
        }
    }
}

/// A signal held by the emulator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSignal {
    /// User label.
    pub name: String,
    /// Number of captured pulses.
    pub pulse_count: u32,
    /// Detected protocol label.
    pub protocol: String,
}

// ============================================================================
// DeviceEmulator
// ============================================================================

/// In-memory stand-in for the recorder firmware.
#[derive(Debug, Clone)]
pub struct DeviceEmulator {
    state: EmulatorState,
    /// What the next `stop` will have captured. `None` means silence.
    next_capture: Option<(u32, String)>,
    capture: Option<(u32, String)>,
    slots: BTreeMap<u8, StoredSignal>,
    battery: f64,
    echo_ids: bool,
    handled: u64,
}

impl Default for DeviceEmulator {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceEmulator {
    /// Creates an idle emulator with empty slots.
    ///
    /// The next capture yields 64 pulses of protocol `PT2262`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: EmulatorState::Idle,
            next_capture: Some((64, "PT2262".to_string())),
            capture: None,
            slots: BTreeMap::new(),
            battery: 3.92,
            echo_ids: false,
            handled: 0,
        }
    }

    /// Pre-populates a slot.
    #[must_use]
    pub fn with_signal(mut self, slot: SlotId, name: &str, pulse_count: u32, protocol: &str) -> Self {
        self.slots.insert(
            slot.get(),
            StoredSignal {
                name: name.to_string(),
                pulse_count,
                protocol: protocol.to_string(),
            },
        );
        self
    }

    /// Echoes the request `id` in responses.
    #[must_use]
    pub fn echo_ids(mut self, echo: bool) -> Self {
        self.echo_ids = echo;
        self
    }

    /// Sets what the next `stop` captures; `None` simulates silence.
    pub fn set_next_capture(&mut self, capture: Option<(u32, &str)>) {
        self.next_capture = capture.map(|(pulses, proto)| (pulses, proto.to_string()));
    }

    /// Sets the reported battery voltage.
    pub fn set_battery(&mut self, volts: f64) {
        self.battery = volts;
    }

    /// Returns the capture state.
    #[must_use]
    pub fn state(&self) -> EmulatorState {
        self.state
    }

    /// Returns the signal stored in `slot`.
    #[must_use]
    pub fn signal(&self, slot: SlotId) -> Option<&StoredSignal> {
        self.slots.get(&slot.get())
    }

    /// Returns the number of requests handled.
    #[must_use]
    pub fn handled(&self) -> u64 {
        self.handled
    }

    /// Handles one decoded request and returns the response object.
    pub fn handle(&mut self, request: &Value) -> Value {
        self.handled += 1;
        let action = request
            .get("action")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let result = match action.as_str() {
            "record" => self.record(),
            "stop" => self.stop(),
            "play" => self.play(request),
            "save" => self.save(request),
            "delete" => self.delete(request),
            "get_slots" => Ok(json!({ "slots": self.slots_json() })),
            "status" => Ok(json!({
                "state": self.state.as_str(),
                "ble": true,
                "battery": self.battery,
                "signals": self.slots.len(),
            })),
            _ => Err("Unknown action".to_string()),
        };

        let mut response = Map::new();
        match result {
            Ok(Value::Object(fields)) => {
                response.insert("status".into(), json!("ok"));
                response.insert("action".into(), json!(action));
                response.extend(fields);
            }
            Ok(_) => {
                response.insert("status".into(), json!("ok"));
                response.insert("action".into(), json!(action));
            }
            Err(message) => {
                response.insert("status".into(), json!("error"));
                response.insert("action".into(), json!(action));
                response.insert("message".into(), json!(message));
            }
        }

        if self.echo_ids
            && let Some(id) = request.get("id")
        {
            response.insert("id".into(), id.clone());
        }

        trace!(%action, "Emulator handled request");
        Value::Object(response)
    }

    fn record(&mut self) -> Result<Value, String> {
        match self.state {
            EmulatorState::Idle | EmulatorState::Captured => {
                self.state = EmulatorState::Recording;
                Ok(json!({}))
            }
            EmulatorState::Recording => Err("Busy".to_string()),
        }
    }

    fn stop(&mut self) -> Result<Value, String> {
        if self.state != EmulatorState::Recording {
            return Err("Not recording".to_string());
        }

        match self.next_capture.clone() {
            Some((pulse_count, protocol)) if pulse_count > 0 => {
                self.state = EmulatorState::Captured;
                self.capture = Some((pulse_count, protocol.clone()));
                Ok(json!({ "pulse_count": pulse_count, "protocol": protocol }))
            }
            _ => {
                self.state = EmulatorState::Idle;
                self.capture = None;
                Err("No signal detected".to_string())
            }
        }
    }

    fn play(&mut self, request: &Value) -> Result<Value, String> {
        let slot = slot_arg(request)?;
        if !self.slots.contains_key(&slot) {
            return Err("Slot empty".to_string());
        }
        Ok(json!({ "slot": slot }))
    }

    fn save(&mut self, request: &Value) -> Result<Value, String> {
        let slot = slot_arg(request)?;
        let name = request
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("signal")
            .to_string();

        let Some((pulse_count, protocol)) = self.capture.clone() else {
            return Err("No signal to save".to_string());
        };
        if SlotId::new(slot).is_none() {
            return Err("Save failed (slot 1-5)".to_string());
        }

        self.slots.insert(
            slot,
            StoredSignal {
                name: name.clone(),
                pulse_count,
                protocol,
            },
        );
        self.state = EmulatorState::Idle;
        Ok(json!({ "slot": slot, "name": name }))
    }

    fn delete(&mut self, request: &Value) -> Result<Value, String> {
        let slot = slot_arg(request)?;
        match self.slots.remove(&slot) {
            Some(_) => Ok(json!({ "slot": slot })),
            None => Err("Slot not found".to_string()),
        }
    }

    fn slots_json(&self) -> Vec<Value> {
        self.slots
            .iter()
            .map(|(slot, signal)| {
                json!({
                    "slot": slot,
                    "name": signal.name,
                    "pulse_count": signal.pulse_count,
                    "protocol": signal.protocol,
                })
            })
            .collect()
    }
}

fn slot_arg(request: &Value) -> Result<u8, String> {
    request
        .get("slot")
        .and_then(Value::as_u64)
        .and_then(|s| u8::try_from(s).ok())
        .ok_or_else(|| "Missing slot".to_string())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(n: u8) -> SlotId {
        SlotId::new(n).expect("valid slot")
    }

    #[test]
    fn test_record_stop_save_cycle() {
        let mut device = DeviceEmulator::new();

        let r = device.handle(&json!({"action": "record"}));
        assert_eq!(r["status"], "ok");
        assert_eq!(device.state(), EmulatorState::Recording);

        let r = device.handle(&json!({"action": "record"}));
        assert_eq!(r["message"], "Busy");

        let r = device.handle(&json!({"action": "stop"}));
        assert_eq!(r["pulse_count"], 64);
        assert_eq!(r["protocol"], "PT2262");

        let r = device.handle(&json!({"action": "save", "slot": 2, "name": "gate"}));
        assert_eq!(r, json!({"status": "ok", "action": "save", "slot": 2, "name": "gate"}));
        assert_eq!(device.signal(slot(2)).map(|s| s.pulse_count), Some(64));
        assert_eq!(device.state(), EmulatorState::Idle);
    }

    #[test]
    fn test_stop_without_signal() {
        let mut device = DeviceEmulator::new();
        device.set_next_capture(None);

        device.handle(&json!({"action": "record"}));
        let r = device.handle(&json!({"action": "stop"}));
        assert_eq!(r["status"], "error");
        assert_eq!(r["message"], "No signal detected");
        assert_eq!(device.state(), EmulatorState::Idle);
    }

    #[test]
    fn test_error_strings() {
        let mut device = DeviceEmulator::new();

        assert_eq!(device.handle(&json!({"action": "stop"}))["message"], "Not recording");
        assert_eq!(device.handle(&json!({"action": "play"}))["message"], "Missing slot");
        assert_eq!(device.handle(&json!({"action": "play", "slot": 1}))["message"], "Slot empty");
        assert_eq!(
            device.handle(&json!({"action": "save", "slot": 1}))["message"],
            "No signal to save"
        );
        assert_eq!(device.handle(&json!({"action": "delete", "slot": 3}))["message"], "Slot not found");
        assert_eq!(device.handle(&json!({"action": "fly"}))["message"], "Unknown action");
    }

    #[test]
    fn test_get_slots_and_status() {
        let mut device = DeviceEmulator::new().with_signal(slot(1), "garage", 48, "EV1527");

        let r = device.handle(&json!({"action": "get_slots"}));
        assert_eq!(
            r["slots"],
            json!([{"slot": 1, "name": "garage", "pulse_count": 48, "protocol": "EV1527"}])
        );

        let r = device.handle(&json!({"action": "status"}));
        assert_eq!(r["state"], "idle");
        assert_eq!(r["signals"], 1);
        assert_eq!(r["ble"], true);
        assert_eq!(device.handled(), 2);
    }

    #[test]
    fn test_echo_ids() {
        let mut device = DeviceEmulator::new().echo_ids(true);
        let r = device.handle(&json!({"action": "status", "id": "abc"}));
        assert_eq!(r["id"], "abc");

        let mut quiet = DeviceEmulator::new();
        let r = quiet.handle(&json!({"action": "status", "id": "abc"}));
        assert!(r.get("id").is_none());
    }
}
