//! Binary frame layouts for the legacy APNs gateway and feedback services.
//!
//! This crate provides the wire-level pieces of the binary push protocol with no I/O:
//! device tokens, the command-2 notification frame (stamped in place per device),
//! the 6-byte error frame returned by the gateway, and the 38-byte feedback frame.
//!
//! ## Wire Format
//!
//! Notification (client → gateway, command 2):
//!
//! ```text
//! +---------+--------------+-----------------------------------------+
//! | u8 = 2  | u32 frame_len| items: u8 id | u16 len | data           |
//! +---------+--------------+-----------------------------------------+
//!   item 1: device token (32 bytes)
//!   item 2: payload      (<= 2048 bytes)
//!   item 3: identifier   (u32, big-endian)
//!   item 4: expiration   (u32, big-endian, 0 = do not store)
//!   item 5: priority     (u8, 10 or 5)
//! ```
//!
//! Error (gateway → client):
//!
//! ```text
//! +---------+-----------+----------------------+
//! | u8 = 8  | u8 status | u32 identifier (BE)  |
//! +---------+-----------+----------------------+
//! ```
//!
//! Feedback (feedback service → client):
//!
//! ```text
//! +----------------+---------------+---------------------+
//! | u32 timestamp  | u16 token_len | 32-byte device token|
//! +----------------+---------------+---------------------+
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod frame;
pub mod notification;
pub mod status;
pub mod token;

// Re-export main types
pub use error::WireError;
pub use frame::{
    ErrorFrame, FeedbackFrame, ERROR_COMMAND, ERROR_FRAME_SIZE, FEEDBACK_FRAME_SIZE,
};
pub use notification::{
    Notification, NotificationBuilder, NotificationDecoder, NotificationFrame, Priority,
    MAX_PAYLOAD_SIZE, NOTIFICATION_COMMAND,
};
pub use status::StatusCode;
pub use token::{DeviceToken, TOKEN_BINARY_SIZE, TOKEN_HEX_LEN};
