//! Wire protocol message types.
//!
//! This module defines the message format for communication between the
//! client and the peer over the UART notification channel.
//!
//! # Protocol Overview
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | `Request` | Client → Peer | Command request |
//! | `Message` | Peer → Client | Command response |
//!
//! # Command Tags
//!
//! `record`, `stop`, `play`, `save`, `delete`, `get_slots`, `status`.
//! Every response carries the tag of the request it answers.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `command` | Command definitions |
//! | `frame` | Delimiter framing and the stream assembler |
//! | `request` | Request and Message types |

// ============================================================================
// Submodules
// ============================================================================

/// Command definitions.
pub mod command;

/// Delimiter framing and stream reassembly.
pub mod frame;

/// Request and Message types.
pub mod request;

// ============================================================================
// Re-exports
// ============================================================================

pub use command::Command;
pub use frame::{FRAME_DELIMITER, FrameAssembler, decode_frame, encode_frame};
pub use request::{Message, Request, Status};
