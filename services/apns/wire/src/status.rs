//! Status codes carried by gateway error frames.

/// Status codes reported by the gateway in an error frame
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// No errors encountered
    NoErrors = 0,
    /// Processing error
    ProcessingError = 1,
    /// Missing device token
    MissingDeviceToken = 2,
    /// Missing topic
    MissingTopic = 3,
    /// Missing payload
    MissingPayload = 4,
    /// Invalid token size
    InvalidTokenSize = 5,
    /// Invalid topic size
    InvalidTopicSize = 6,
    /// Invalid payload size
    InvalidPayloadSize = 7,
    /// Invalid device token
    InvalidToken = 8,
    /// Gateway is shutting down the connection
    Shutdown = 10,
}

impl TryFrom<u8> for StatusCode {
    type Error = crate::WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(StatusCode::NoErrors),
            1 => Ok(StatusCode::ProcessingError),
            2 => Ok(StatusCode::MissingDeviceToken),
            3 => Ok(StatusCode::MissingTopic),
            4 => Ok(StatusCode::MissingPayload),
            5 => Ok(StatusCode::InvalidTokenSize),
            6 => Ok(StatusCode::InvalidTopicSize),
            7 => Ok(StatusCode::InvalidPayloadSize),
            8 => Ok(StatusCode::InvalidToken),
            10 => Ok(StatusCode::Shutdown),
            _ => Err(crate::WireError::Status(value)),
        }
    }
}
