//! Status query.

use tracing::debug;

use crate::error::Result;
use crate::protocol::Command;

use super::Device;
use super::types::DeviceStatus;

impl Device {
    /// Queries recorder state, battery and slot usage.
    ///
    /// Returns `None` without sending anything when not connected.
    ///
    /// # Errors
    ///
    /// Request errors, or [`Error::Protocol`](crate::Error::Protocol) if
    /// the payload is malformed.
    pub async fn query_status(&self) -> Result<Option<DeviceStatus>> {
        if !self.is_connected() {
            debug!("Not connected, no status");
            return Ok(None);
        }

        let response = self.send_command(Command::Status).await?;
        let status: DeviceStatus = response.payload()?;

        debug!(state = %status.state, battery = status.battery, "Status received");
        Ok(Some(status))
    }
}
