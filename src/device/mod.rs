//! Typed device API.
//!
//! [`Device`] translates domain calls into one request/response round
//! trip each and turns the response payload into a typed result.
//!
//! # Module Structure
//!
//! | Module | Description |
//! |--------|-------------|
//! | `core` | Device struct, lifecycle, accessors |
//! | `signals` | Listing, replaying, saving, deleting stored signals |
//! | `capture` | Recording and the sequential capture workflows |
//! | `status` | Device status query |
//! | `types` | Typed results |
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use garage_remote::{Device, SlotId};
//!
//! # async fn example(device: Device) -> garage_remote::Result<()> {
//! device.connect().await?;
//!
//! let slot = SlotId::try_from(1)?;
//! device.capture_and_save(slot, "garage", Duration::from_secs(2)).await?;
//! device.play(slot).await?;
//!
//! for signal in device.list_signals().await? {
//!     println!("{}: {}", signal.slot, signal.name);
//! }
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Submodules
// ============================================================================

mod capture;
mod core;
mod signals;
mod status;
mod types;

// ============================================================================
// Re-exports
// ============================================================================

pub use self::core::Device;
pub use types::{Capture, DeviceState, DeviceStatus, SavedSignal, Slot};
