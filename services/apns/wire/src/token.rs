//! Device tokens and their hex representation.

use crate::WireError;
use std::fmt;
use std::str::FromStr;

/// Binary device token size in bytes
pub const TOKEN_BINARY_SIZE: usize = 32;

/// Length of a device token rendered as hex
pub const TOKEN_HEX_LEN: usize = TOKEN_BINARY_SIZE * 2;

/// A 32-byte device token
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceToken([u8; TOKEN_BINARY_SIZE]);

impl DeviceToken {
    /// Wrap raw token bytes
    pub const fn from_bytes(bytes: [u8; TOKEN_BINARY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Copy a token out of a slice that must be exactly 32 bytes long
    pub fn from_slice(bytes: &[u8]) -> Result<Self, WireError> {
        let raw: [u8; TOKEN_BINARY_SIZE] = bytes
            .try_into()
            .map_err(|_| WireError::TokenLength(bytes.len()))?;
        Ok(Self(raw))
    }

    /// Parse a 64-character hex token (either case)
    pub fn from_hex(hex_token: &str) -> Result<Self, WireError> {
        let hex_token = hex_token.trim();
        if hex_token.len() != TOKEN_HEX_LEN {
            return Err(WireError::TokenLength(hex_token.len()));
        }

        let mut raw = [0u8; TOKEN_BINARY_SIZE];
        hex::decode_to_slice(hex_token, &mut raw)?;
        Ok(Self(raw))
    }

    /// Lowercase hex rendering
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Raw token bytes
    pub fn as_bytes(&self) -> &[u8; TOKEN_BINARY_SIZE] {
        &self.0
    }
}

impl FromStr for DeviceToken {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl fmt::Display for DeviceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for DeviceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceToken({})", self.to_hex())
    }
}
