//! Stored signal methods.

use tracing::debug;

use crate::error::{Error, Result};
use crate::identifiers::SlotId;
use crate::protocol::Command;

use super::Device;
use super::types::{SavedSignal, Slot, SlotList};

// ============================================================================
// Device - Signals
// ============================================================================

impl Device {
    /// Lists every stored signal.
    ///
    /// Returns an empty list without sending anything when not connected.
    ///
    /// # Errors
    ///
    /// Request errors, or [`Error::Protocol`] if the payload is malformed.
    pub async fn list_signals(&self) -> Result<Vec<Slot>> {
        if !self.is_connected() {
            debug!("Not connected, no signals to list");
            return Ok(Vec::new());
        }

        let response = self.send_command(Command::GetSlots).await?;
        let list: SlotList = response.payload()?;

        debug!(count = list.slots.len(), "Listed signals");
        Ok(list.slots)
    }

    /// Replays the signal stored in `slot`.
    ///
    /// # Errors
    ///
    /// [`Error::DeviceReported`] with `Slot empty` if nothing is stored there.
    pub async fn play(&self, slot: SlotId) -> Result<()> {
        debug!(%slot, "Playing signal");
        self.send_command(Command::Play { slot }).await?;
        Ok(())
    }

    /// Persists the last capture into `slot` under `name`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if `name` is blank
    /// - [`Error::DeviceReported`] with `No signal to save` if nothing was captured
    /// - [`Error::Protocol`] if the confirmation payload is malformed
    pub async fn save_signal(&self, slot: SlotId, name: &str) -> Result<SavedSignal> {
        let name = validate_name(name)?;
        debug!(%slot, %name, "Saving signal");

        let response = self
            .send_command(Command::Save {
                slot,
                name: name.clone(),
            })
            .await?;

        // Bare acknowledgement: report what was requested.
        if !response.fields.contains_key("slot") && !response.fields.contains_key("name") {
            return Ok(SavedSignal { slot, name });
        }
        response.payload()
    }

    /// Removes the signal stored in `slot`.
    ///
    /// # Errors
    ///
    /// [`Error::DeviceReported`] with `Slot not found` if the slot is empty.
    pub async fn delete_signal(&self, slot: SlotId) -> Result<()> {
        debug!(%slot, "Deleting signal");
        self.send_command(Command::Delete { slot }).await?;
        Ok(())
    }
}

/// Trims `name` and rejects it if nothing is left.
pub(super) fn validate_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(Error::invalid_argument("signal name must not be empty"));
    }
    Ok(trimmed.to_string())
}

// ============================================================================
// Tests
// ============================================================================
