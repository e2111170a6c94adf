//! Wire protocol error types.

use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WireError {
    /// Fewer bytes than the fixed layout requires
    #[error("incomplete frame: need {needed} bytes, got {got}")]
    Incomplete {
        /// Bytes required by the layout
        needed: usize,
        /// Bytes actually available
        got: usize,
    },

    /// Device token has the wrong length
    #[error("invalid device token length: {0}")]
    TokenLength(usize),

    /// Device token is not valid hex
    #[error("invalid hex in device token: {0}")]
    TokenHex(#[from] hex::FromHexError),

    /// Notification payload is empty
    #[error("empty payload")]
    EmptyPayload,

    /// Notification payload exceeds the gateway limit
    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    /// Unexpected command byte
    #[error("unknown command {0}")]
    Command(u8),

    /// Unknown notification item
    #[error("unknown item {0}")]
    Item(u8),

    /// Unknown status code
    #[error("unknown status {0}")]
    Status(u8),

    /// Unknown priority value
    #[error("unknown priority {0}")]
    Priority(u8),

    /// Malformed frame structure
    #[error("malformed frame")]
    Malformed,
}
