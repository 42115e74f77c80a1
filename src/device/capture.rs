//! Recording methods and capture workflows.
//!
//! The workflows run their steps strictly in sequence; the first failing
//! step ends the workflow and its error is returned as is.

use std::time::Duration;

use tracing::{debug, info};

use crate::error::Result;
use crate::identifiers::SlotId;
use crate::protocol::Command;

use super::Device;
use super::signals::validate_name;
use super::types::{Capture, Slot};

// ============================================================================
// Device - Recording
// ============================================================================

impl Device {
    /// Starts capturing.
    ///
    /// # Errors
    ///
    /// [`Error::DeviceReported`](crate::Error::DeviceReported) with `Busy`
    /// if a capture is already running.
    pub async fn start_recording(&self) -> Result<()> {
        debug!("Starting capture");
        self.send_command(Command::Record).await?;
        Ok(())
    }

    /// Stops capturing and returns what was captured.
    ///
    /// # Errors
    ///
    /// [`Error::DeviceReported`](crate::Error::DeviceReported) with
    /// `Not recording` or `No signal detected`.
    pub async fn stop_recording(&self) -> Result<Capture> {
        let response = self.send_command(Command::Stop).await?;
        let capture: Capture = response.payload()?;

        debug!(pulses = capture.pulse_count, protocol = %capture.protocol, "Capture stopped");
        Ok(capture)
    }
}

// ============================================================================
// Device - Workflows
// ============================================================================

impl Device {
    /// Records for `hold`, then stops.
    ///
    /// # Errors
    ///
    /// The error of the first failing step.
    pub async fn capture(&self, hold: Duration) -> Result<Capture> {
        self.start_recording().await?;
        tokio::time::sleep(hold).await;
        self.stop_recording().await
    }

    /// Records for `hold`, stops, and saves the capture into `slot`.
    ///
    /// `name` is validated before anything is sent.
    ///
    /// # Errors
    ///
    /// The error of the first failing step.
    pub async fn capture_and_save(&self, slot: SlotId, name: &str, hold: Duration) -> Result<Slot> {
        let name = validate_name(name)?;

        let capture = self.capture(hold).await?;
        let saved = self.save_signal(slot, &name).await?;

        info!(slot = %saved.slot, name = %saved.name, pulses = capture.pulse_count, "Signal captured and saved");
        Ok(Slot {
            slot: saved.slot,
            name: saved.name,
            protocol: capture.protocol,
            pulse_count: capture.pulse_count,
        })
    }
}
