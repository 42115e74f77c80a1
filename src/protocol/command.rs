//! Command definitions.
//!
//! Each command serializes to a JSON object whose `action` field is the
//! tag, with the command parameters alongside it:
//!
//! ```json
//! {"action": "save", "slot": 2, "name": "garage"}
//! ```

// ============================================================================
// Imports
// ============================================================================

use serde::Serialize;

use crate::identifiers::SlotId;

// ============================================================================
// Command
// ============================================================================

/// A request the peer understands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Command {
    /// Begin capturing a signal.
    Record,

    /// End capture and report what was captured.
    Stop,

    /// Replay the signal stored in a slot.
    Play {
        /// Slot to replay.
        slot: SlotId,
    },

    /// Persist the last capture into a slot.
    Save {
        /// Target slot.
        slot: SlotId,
        /// Label stored alongside the signal.
        name: String,
    },

    /// Remove the signal stored in a slot.
    Delete {
        /// Slot to clear.
        slot: SlotId,
    },

    /// List every stored signal.
    GetSlots,

    /// Query device state.
    Status,
}

impl Command {
    /// Returns the wire tag of this command.
    ///
    /// Responses carry the same tag.
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::Record => "record",
            Self::Stop => "stop",
            Self::Play { .. } => "play",
            Self::Save { .. } => "save",
            Self::Delete { .. } => "delete",
            Self::GetSlots => "get_slots",
            Self::Status => "status",
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::{Value, json};

    fn to_value(command: &Command) -> Value {
        serde_json::to_value(command).expect("serialize")
    }

    #[test]
    fn test_unit_commands() {
        assert_eq!(to_value(&Command::Record), json!({"action": "record"}));
        assert_eq!(to_value(&Command::GetSlots), json!({"action": "get_slots"}));
        assert_eq!(to_value(&Command::Status), json!({"action": "status"}));
    }

    #[test]
    fn test_save_command() {
        let slot = SlotId::new(2).expect("valid slot");
        let command = Command::Save {
            slot,
            name: "gate".to_string(),
        };
        assert_eq!(
            to_value(&command),
            json!({"action": "save", "slot": 2, "name": "gate"})
        );
    }

    #[test]
    fn test_tag_matches_serialized_action() {
        let slot = SlotId::new(1).expect("valid slot");
        let commands = [
            Command::Record,
            Command::Stop,
            Command::Play { slot },
            Command::Save {
                slot,
                name: "x".into(),
            },
            Command::Delete { slot },
            Command::GetSlots,
            Command::Status,
        ];

        for command in commands {
            let value = to_value(&command);
            assert_eq!(value["action"], command.tag());
        }
    }
}
