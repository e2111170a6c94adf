//! Command-2 notification frames.
//!
//! A [`NotificationFrame`] is built once per batch from a serialized payload and then
//! stamped in place for every device: the identifier and token items sit at fixed
//! offsets, so re-targeting the frame never reallocates.

use crate::token::{DeviceToken, TOKEN_BINARY_SIZE};
use crate::WireError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Command byte for notification frames
pub const NOTIFICATION_COMMAND: u8 = 2;

/// Maximum payload size accepted by the gateway
pub const MAX_PAYLOAD_SIZE: usize = 2048;

const ITEM_TOKEN: u8 = 1;
const ITEM_PAYLOAD: u8 = 2;
const ITEM_IDENTIFIER: u8 = 3;
const ITEM_EXPIRATION: u8 = 4;
const ITEM_PRIORITY: u8 = 5;

/// u8 command + u32 frame length
const FRAME_HEADER_SIZE: usize = 5;
/// u8 item id + u16 item length
const ITEM_HEADER_SIZE: usize = 3;

const TOKEN_OFFSET: usize = FRAME_HEADER_SIZE + ITEM_HEADER_SIZE;

/// Delivery priority
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    /// Deliver immediately
    #[default]
    Immediate = 10,
    /// Deliver at a time that conserves power on the device
    PowerConserving = 5,
}

impl TryFrom<u8> for Priority {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            10 => Ok(Priority::Immediate),
            5 => Ok(Priority::PowerConserving),
            _ => Err(WireError::Priority(value)),
        }
    }
}

/// Builder for [`NotificationFrame`]
#[derive(Debug, Clone)]
pub struct NotificationBuilder {
    payload: Bytes,
    expiry: u32,
    priority: Priority,
}

impl NotificationBuilder {
    /// Start a frame around an already serialized payload
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            expiry: 0,
            priority: Priority::default(),
        }
    }

    /// Expiration as seconds since the epoch (0 = do not store)
    pub fn expiry(mut self, expiry: u32) -> Self {
        self.expiry = expiry;
        self
    }

    /// Delivery priority
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Encode the frame with a zeroed token and identifier
    pub fn build(self) -> Result<NotificationFrame, WireError> {
        if self.payload.is_empty() {
            return Err(WireError::EmptyPayload);
        }
        if self.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(WireError::PayloadTooLarge(self.payload.len()));
        }

        let items_len = (ITEM_HEADER_SIZE + TOKEN_BINARY_SIZE)
            + (ITEM_HEADER_SIZE + self.payload.len())
            + (ITEM_HEADER_SIZE + 4)
            + (ITEM_HEADER_SIZE + 4)
            + (ITEM_HEADER_SIZE + 1);

        let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + items_len);
        buf.put_u8(NOTIFICATION_COMMAND);
        buf.put_u32(items_len as u32);

        buf.put_u8(ITEM_TOKEN);
        buf.put_u16(TOKEN_BINARY_SIZE as u16);
        buf.put_bytes(0, TOKEN_BINARY_SIZE);

        buf.put_u8(ITEM_PAYLOAD);
        buf.put_u16(self.payload.len() as u16);
        buf.put_slice(&self.payload);

        buf.put_u8(ITEM_IDENTIFIER);
        buf.put_u16(4);
        let identifier_offset = buf.len();
        buf.put_u32(0);

        buf.put_u8(ITEM_EXPIRATION);
        buf.put_u16(4);
        buf.put_u32(self.expiry);

        buf.put_u8(ITEM_PRIORITY);
        buf.put_u16(1);
        buf.put_u8(self.priority as u8);

        Ok(NotificationFrame {
            buf,
            identifier_offset,
        })
    }
}

/// One framed notification, re-targeted in place per device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationFrame {
    buf: BytesMut,
    identifier_offset: usize,
}

impl NotificationFrame {
    /// Build a frame with default expiry and priority
    pub fn new(payload: impl Into<Bytes>) -> Result<Self, WireError> {
        NotificationBuilder::new(payload).build()
    }

    /// Stamp the identifier echoed back by gateway error frames
    pub fn set_identifier(&mut self, identifier: u32) {
        let offset = self.identifier_offset;
        self.buf[offset..offset + 4].copy_from_slice(&identifier.to_be_bytes());
    }

    /// Stamp the destination token
    pub fn set_token(&mut self, token: &DeviceToken) {
        self.buf[TOKEN_OFFSET..TOKEN_OFFSET + TOKEN_BINARY_SIZE].copy_from_slice(token.as_bytes());
    }

    /// Stamp the destination token from its hex form
    pub fn set_token_hex(&mut self, hex_token: &str) -> Result<(), WireError> {
        let token = DeviceToken::from_hex(hex_token)?;
        self.set_token(&token);
        Ok(())
    }

    /// Currently stamped identifier
    pub fn identifier(&self) -> u32 {
        let mut raw = &self.buf[self.identifier_offset..self.identifier_offset + 4];
        raw.get_u32()
    }

    /// Currently stamped token
    pub fn token(&self) -> DeviceToken {
        let mut raw = [0u8; TOKEN_BINARY_SIZE];
        raw.copy_from_slice(&self.buf[TOKEN_OFFSET..TOKEN_OFFSET + TOKEN_BINARY_SIZE]);
        DeviceToken::from_bytes(raw)
    }

    /// Encoded frame bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Encoded frame size
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Always false for a built frame; present for API symmetry with `len`
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// A decoded notification frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Notification identifier
    pub identifier: u32,
    /// Destination token
    pub token: DeviceToken,
    /// Serialized payload
    pub payload: Bytes,
    /// Expiration (seconds since the epoch, 0 = do not store)
    pub expiry: u32,
    /// Delivery priority
    pub priority: Priority,
}

/// Streaming decoder for notification frames, as a gateway would read them
#[derive(Debug, Default)]
pub struct NotificationDecoder;

impl NotificationDecoder {
    /// Create a new decoder
    pub fn new() -> Self {
        Self
    }

    /// Decode one frame from a buffer, leaving any remainder in place
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Notification>, WireError> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        if buf[0] != NOTIFICATION_COMMAND {
            return Err(WireError::Command(buf[0]));
        }

        let frame_len = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
        if buf.len() < FRAME_HEADER_SIZE + frame_len {
            return Ok(None);
        }

        buf.advance(FRAME_HEADER_SIZE);
        let mut items = buf.split_to(frame_len).freeze();

        let mut identifier = None;
        let mut token = None;
        let mut payload = None;
        let mut expiry = 0;
        let mut priority = Priority::default();

        while items.has_remaining() {
            if items.remaining() < ITEM_HEADER_SIZE {
                return Err(WireError::Malformed);
            }
            let item_id = items.get_u8();
            let item_len = items.get_u16() as usize;
            if items.remaining() < item_len {
                return Err(WireError::Malformed);
            }
            let mut data = items.split_to(item_len);

            match (item_id, item_len) {
                (ITEM_TOKEN, TOKEN_BINARY_SIZE) => token = Some(DeviceToken::from_slice(&data)?),
                (ITEM_PAYLOAD, _) => payload = Some(data),
                (ITEM_IDENTIFIER, 4) => identifier = Some(data.get_u32()),
                (ITEM_EXPIRATION, 4) => expiry = data.get_u32(),
                (ITEM_PRIORITY, 1) => priority = Priority::try_from(data.get_u8())?,
                (ITEM_TOKEN | ITEM_IDENTIFIER | ITEM_EXPIRATION | ITEM_PRIORITY, _) => {
                    return Err(WireError::Malformed)
                }
                (other, _) => return Err(WireError::Item(other)),
            }
        }

        match (identifier, token, payload) {
            (Some(identifier), Some(token), Some(payload)) => Ok(Some(Notification {
                identifier,
                token,
                payload,
                expiry,
                priority,
            })),
            _ => Err(WireError::Malformed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYLOAD: &[u8] = br#"{"aps":{"alert":"hello"}}"#;

    #[test]
    fn test_stamping_in_place() {
        let mut frame = NotificationBuilder::new(PAYLOAD)
            .expiry(1_700_000_000)
            .priority(Priority::PowerConserving)
            .build()
            .unwrap();
        let len = frame.len();

        let token = DeviceToken::from_bytes([0x42; TOKEN_BINARY_SIZE]);
        frame.set_identifier(7);
        frame.set_token(&token);

        assert_eq!(frame.len(), len);
        assert_eq!(frame.identifier(), 7);
        assert_eq!(frame.token(), token);
        assert_eq!(frame.as_bytes()[0], NOTIFICATION_COMMAND);
        assert_eq!(&frame.as_bytes()[TOKEN_OFFSET..TOKEN_OFFSET + 2], &[0x42, 0x42]);

        let mut buf = BytesMut::from(frame.as_bytes());
        let decoded = NotificationDecoder::new().decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.identifier, 7);
        assert_eq!(decoded.token, token);
        assert_eq!(&decoded.payload[..], PAYLOAD);
        assert_eq!(decoded.expiry, 1_700_000_000);
        assert_eq!(decoded.priority, Priority::PowerConserving);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_set_token_hex() {
        let mut frame = NotificationFrame::new(PAYLOAD).unwrap();
        let hex_token = "ff".repeat(TOKEN_BINARY_SIZE);
        frame.set_token_hex(&hex_token).unwrap();
        assert_eq!(frame.token().to_hex(), hex_token);

        assert!(frame.set_token_hex("not-a-token").is_err());
        assert_eq!(frame.token().to_hex(), hex_token);
    }

    #[test]
    fn test_payload_limits() {
        assert_eq!(
            NotificationFrame::new(Bytes::new()),
            Err(WireError::EmptyPayload)
        );

        let oversized = vec![b'x'; MAX_PAYLOAD_SIZE + 1];
        assert_eq!(
            NotificationFrame::new(oversized),
            Err(WireError::PayloadTooLarge(MAX_PAYLOAD_SIZE + 1))
        );

        assert!(NotificationFrame::new(vec![b'x'; MAX_PAYLOAD_SIZE]).is_ok());
    }

    #[test]
    fn test_decoder_waits_for_complete_frames() {
        let mut first = NotificationFrame::new(PAYLOAD).unwrap();
        first.set_identifier(0);
        let mut second = first.clone();
        second.set_identifier(1);

        let mut stream = BytesMut::new();
        stream.extend_from_slice(first.as_bytes());
        stream.extend_from_slice(&second.as_bytes()[..10]);

        let mut decoder = NotificationDecoder::new();
        assert_eq!(decoder.decode(&mut stream).unwrap().unwrap().identifier, 0);
        assert_eq!(decoder.decode(&mut stream).unwrap(), None);

        stream.extend_from_slice(&second.as_bytes()[10..]);
        assert_eq!(decoder.decode(&mut stream).unwrap().unwrap().identifier, 1);
    }
}
