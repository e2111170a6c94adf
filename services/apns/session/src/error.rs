//! Client error types and the gateway status translator.

use apns_wire::{StatusCode, WireError};
use std::io;
use thiserror::Error;

/// Errors surfaced by the APNs client
#[derive(Error, Debug)]
pub enum ApnError {
    // Configuration
    /// No certificate or PKCS#12 file configured
    #[error("certificate is not set")]
    CertificateNotSet,

    /// Certificate configured without a private key
    #[error("private key is not set")]
    PrivateKeyNotSet,

    /// Certificate file could not be read or used
    #[error("unable to use specified SSL certificate: {0}")]
    CertificateUnusable(String),

    /// Private key could not be read, decrypted, or does not match the certificate
    #[error("unable to use specified private key: {0}")]
    PrivateKeyUnusable(String),

    /// PKCS#12 container could not be read, decrypted, or used
    #[error("unable to use specified PKCS12 file: {0}")]
    Pkcs12Unusable(String),

    /// CA bundle or trust store could not be loaded
    #[error("unable to load trusted CA certificates: {0}")]
    CaUnusable(String),

    // Connection
    /// Host name resolution failed
    #[error("unable to resolve {host}: {source}")]
    ResolveFailed {
        /// Host being resolved
        host: String,
        /// Underlying resolver error
        #[source]
        source: io::Error,
    },

    /// Every resolved address refused or timed out
    #[error("could not initialize connection to {host}")]
    ConnectFailed {
        /// Host being connected to
        host: String,
    },

    /// TLS handshake failed
    #[error("could not initialize ssl connection: {0}")]
    TlsHandshakeFailed(String),

    /// No notification connection is open
    #[error("no opened connection to Apple Push Notification Service")]
    NotConnected,

    /// No feedback connection is open
    #[error("no opened connection to Apple Feedback Service")]
    NotConnectedFeedback,

    // Transport
    /// Peer is gone (broken pipe)
    #[error("network unreachable")]
    NetworkUnreachable,

    /// Socket operation timed out
    #[error("connection timed out")]
    ConnectionTimedOut,

    /// Peer closed the connection
    #[error("connection was closed")]
    ConnectionClosed,

    /// Write to the TLS stream failed
    #[error("SSL write failed: {0}")]
    WriteFailed(#[source] io::Error),

    /// Read from the TLS stream failed
    #[error("SSL read failed: {0}")]
    ReadFailed(#[source] io::Error),

    /// Readiness wait failed
    #[error("select failed: {0}")]
    SelectFailed(#[source] io::Error),

    // Reported by the gateway
    /// Gateway processing error
    #[error("processing error")]
    ProcessingError,

    /// Gateway reported a missing device token
    #[error("missing device token")]
    MissingToken,

    /// Gateway reported a missing topic
    #[error("missing topic")]
    MissingTopic,

    /// Gateway reported a missing payload
    #[error("missing payload")]
    MissingPayload,

    /// Gateway reported an invalid token size
    #[error("invalid token size")]
    InvalidTokenSize,

    /// Gateway reported an invalid topic size
    #[error("invalid topic size")]
    InvalidTopicSize,

    /// Payload exceeds the gateway limit
    #[error("invalid notification payload size")]
    InvalidPayloadSize,

    /// Gateway rejected the device token
    #[error("invalid device token")]
    InvalidToken,

    /// Gateway is shutting the connection down
    #[error("server closed the connection (service shutdown)")]
    ServiceShutdown,

    /// Gateway status code without a known meaning
    #[error("unknown error (status {0})")]
    Unknown(u8),

    // Local
    /// Token string is not 64 hex characters
    #[error("malformed device token: {0}")]
    InvalidTokenFormat(#[source] WireError),

    /// Send called with an empty token list
    #[error("no device tokens to send to")]
    NoTokens,

    /// More tokens than notification identifiers can address
    #[error("too many device tokens ({0})")]
    TooManyTokens(usize),

    /// Frame encoding or decoding failed
    #[error("wire error: {0}")]
    Wire(#[from] WireError),
}

impl ApnError {
    /// Errors after which reconnecting and resuming the batch makes sense
    pub fn is_reconnectable(&self) -> bool {
        matches!(
            self,
            ApnError::ConnectionClosed | ApnError::ServiceShutdown | ApnError::InvalidToken
        )
    }

    /// Errors that reject a single device token rather than the connection
    pub fn is_invalid_token(&self) -> bool {
        matches!(self, ApnError::InvalidToken | ApnError::InvalidTokenFormat(_))
    }

    /// Configuration errors are never retried
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ApnError::CertificateNotSet
                | ApnError::PrivateKeyNotSet
                | ApnError::CertificateUnusable(_)
                | ApnError::PrivateKeyUnusable(_)
                | ApnError::Pkcs12Unusable(_)
                | ApnError::CaUnusable(_)
        )
    }
}

/// Translate a gateway status byte into an error.
///
/// Status 0 carries no remote error, so the translator yields nothing and any
/// local transport error passes through unchanged.
pub fn translate_status(status: u8) -> Option<ApnError> {
    let code = match StatusCode::try_from(status) {
        Ok(code) => code,
        Err(_) => return Some(ApnError::Unknown(status)),
    };

    let error = match code {
        StatusCode::NoErrors => return None,
        StatusCode::ProcessingError => ApnError::ProcessingError,
        StatusCode::MissingDeviceToken => ApnError::MissingToken,
        StatusCode::MissingTopic => ApnError::MissingTopic,
        StatusCode::MissingPayload => ApnError::MissingPayload,
        StatusCode::InvalidTokenSize => ApnError::InvalidTokenSize,
        StatusCode::InvalidTopicSize => ApnError::InvalidTopicSize,
        StatusCode::InvalidPayloadSize => ApnError::InvalidPayloadSize,
        StatusCode::InvalidToken => ApnError::InvalidToken,
        StatusCode::Shutdown => ApnError::ServiceShutdown,
    };
    Some(error)
}
