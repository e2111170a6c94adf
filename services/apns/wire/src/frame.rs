//! Fixed-layout frames sent by the gateway and the feedback service.
//!
//! Both decoders are bounds checked: they fail with [`WireError::Incomplete`]
//! instead of reading past the end of a short buffer.

use crate::token::{DeviceToken, TOKEN_BINARY_SIZE};
use crate::{StatusCode, WireError};
use bytes::{Buf, BufMut};

/// Command byte that marks an error frame
pub const ERROR_COMMAND: u8 = 8;

/// Error frame size in bytes
pub const ERROR_FRAME_SIZE: usize = 6;

/// Feedback frame size in bytes
pub const FEEDBACK_FRAME_SIZE: usize = 4 + 2 + TOKEN_BINARY_SIZE;

/// Error response from the gateway
///
/// The identifier echoes the identifier stamped into the offending notification,
/// which is the token's index within the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorFrame {
    /// Raw status byte
    pub status: u8,
    /// Identifier of the notification the status refers to
    pub identifier: u32,
}

impl ErrorFrame {
    /// Create an error frame
    pub fn new(status: u8, identifier: u32) -> Self {
        Self { status, identifier }
    }

    /// Decode an error frame.
    ///
    /// Returns `Ok(None)` when the command byte is not [`ERROR_COMMAND`];
    /// such frames are not errors and are ignored by callers.
    pub fn decode(buf: &[u8]) -> Result<Option<Self>, WireError> {
        if buf.len() < ERROR_FRAME_SIZE {
            return Err(WireError::Incomplete {
                needed: ERROR_FRAME_SIZE,
                got: buf.len(),
            });
        }

        let mut buf = &buf[..ERROR_FRAME_SIZE];
        if buf.get_u8() != ERROR_COMMAND {
            return Ok(None);
        }

        let status = buf.get_u8();
        let identifier = buf.get_u32();
        Ok(Some(Self { status, identifier }))
    }

    /// Encode the frame as the gateway would send it
    pub fn encode(&self) -> [u8; ERROR_FRAME_SIZE] {
        let mut out = [0u8; ERROR_FRAME_SIZE];
        let mut buf = &mut out[..];
        buf.put_u8(ERROR_COMMAND);
        buf.put_u8(self.status);
        buf.put_u32(self.identifier);
        out
    }

    /// Typed status code, if the status byte is a known one
    pub fn status_code(&self) -> Result<StatusCode, WireError> {
        StatusCode::try_from(self.status)
    }
}

/// Record from the feedback service naming a token that should no longer be used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedbackFrame {
    /// Seconds since the epoch at which the service saw the token become invalid
    pub timestamp: u32,
    /// Token length announced by the service
    pub token_len: u16,
    /// The device token
    pub token: DeviceToken,
}

impl FeedbackFrame {
    /// Decode a feedback frame
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < FEEDBACK_FRAME_SIZE {
            return Err(WireError::Incomplete {
                needed: FEEDBACK_FRAME_SIZE,
                got: buf.len(),
            });
        }

        let mut buf = &buf[..FEEDBACK_FRAME_SIZE];
        let timestamp = buf.get_u32();
        let token_len = buf.get_u16();
        let token = DeviceToken::from_slice(&buf[..TOKEN_BINARY_SIZE])?;

        Ok(Self {
            timestamp,
            token_len,
            token,
        })
    }

    /// Encode the frame as the feedback service would send it
    pub fn encode(&self) -> [u8; FEEDBACK_FRAME_SIZE] {
        let mut out = [0u8; FEEDBACK_FRAME_SIZE];
        let mut buf = &mut out[..];
        buf.put_u32(self.timestamp);
        buf.put_u16(self.token_len);
        buf.put_slice(self.token.as_bytes());
        out
    }

    /// Token as lowercase hex
    pub fn token_hex(&self) -> String {
        self.token.to_hex()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_frame_decode() {
        let raw = [8u8, 8, 0, 0, 0, 1];
        let frame = ErrorFrame::decode(&raw).unwrap().unwrap();
        assert_eq!(frame.status, 8);
        assert_eq!(frame.identifier, 1);
        assert_eq!(frame.status_code(), Ok(StatusCode::InvalidToken));

        let big = ErrorFrame::decode(&[8, 10, 0x01, 0x02, 0x03, 0x04]).unwrap().unwrap();
        assert_eq!(big.identifier, 0x0102_0304);
        assert_eq!(big.encode(), [8, 10, 0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_error_frame_ignores_other_commands() {
        assert_eq!(ErrorFrame::decode(&[2, 8, 0, 0, 0, 1]), Ok(None));
    }

    #[test]
    fn test_error_frame_short_input() {
        assert_eq!(
            ErrorFrame::decode(&[8, 8, 0]),
            Err(WireError::Incomplete { needed: 6, got: 3 })
        );
    }

    #[test]
    fn test_feedback_frame_decode() {
        let mut raw = [0u8; FEEDBACK_FRAME_SIZE];
        raw[..4].copy_from_slice(&1_400_000_000u32.to_be_bytes());
        raw[4..6].copy_from_slice(&32u16.to_be_bytes());
        for (i, byte) in raw[6..].iter_mut().enumerate() {
            *byte = i as u8;
        }

        let frame = FeedbackFrame::decode(&raw).unwrap();
        assert_eq!(frame.timestamp, 1_400_000_000);
        assert_eq!(frame.token_len, 32);
        assert_eq!(
            frame.token_hex(),
            "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f"
        );
        assert_eq!(frame.encode(), raw);
    }

    #[test]
    fn test_feedback_token_ignores_timestamp() {
        let token = DeviceToken::from_bytes([0xab; TOKEN_BINARY_SIZE]);
        let early = FeedbackFrame { timestamp: 1, token_len: 32, token }.encode();
        let late = FeedbackFrame { timestamp: u32::MAX, token_len: 32, token }.encode();

        assert_eq!(
            FeedbackFrame::decode(&early).unwrap().token_hex(),
            FeedbackFrame::decode(&late).unwrap().token_hex()
        );
    }

    #[test]
    fn test_feedback_frame_short_input() {
        assert_eq!(
            FeedbackFrame::decode(&[0u8; 20]),
            Err(WireError::Incomplete { needed: 38, got: 20 })
        );
    }
}
