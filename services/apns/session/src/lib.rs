//! TLS sessions, batch send engine, reconnect policy and feedback reader for APNs.
//!
//! This crate drives the legacy binary interface of the Apple Push Notification
//! service: it opens mutually-authenticated TLS connections to the notification
//! gateway or the feedback service, sends one notification to many device tokens
//! while watching for the gateway's asynchronous error frames, and reads the
//! feedback service's list of tokens that should no longer be used.
//!
//! ## Features
//!
//! - **Credentials**: PEM certificate and key (optionally encrypted) or PKCS#12
//! - **Batch send**: per-device identifiers, error-frame detection before every write
//! - **Reconnect**: resume a batch after a rejected token or a dropped connection
//! - **Invalid tokens**: collected per send and reported to an optional notifier
//! - **Feedback**: one record per call, with a bounded wait
//!
//! ## Example
//!
//! ```rust,no_run
//! use apns_session::{ApnClient, Behavior, Environment, LogLevel};
//! use apns_wire::{NotificationBuilder, Priority};
//!
//! # async fn example() -> anyhow::Result<()> {
//! apns_session::init();
//!
//! let mut client = ApnClient::new();
//! client.set_certificate("push.pem", Some("push.key"), None);
//! client.set_mode(Environment::Sandbox);
//! client.set_behavior(Behavior::RECONNECT);
//! client.set_log_level(LogLevel::ERROR | LogLevel::INFO);
//! client.set_invalid_token_notifier(|token: &str, index: usize| {
//!     println!("token {} at {} is no longer valid", token, index);
//! });
//! client.connect().await?;
//!
//! let frame = NotificationBuilder::new(r#"{"aps":{"alert":"Hello"}}"#)
//!     .expiry(0)
//!     .priority(Priority::Immediate)
//!     .build()?;
//! let tokens = vec!["0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef"];
//! let mut invalid = Vec::new();
//! client.send(&frame, &tokens, Some(&mut invalid)).await?;
//! client.close().await;
//!
//! let mut feedback = ApnClient::new();
//! feedback.set_pkcs12_file("push.p12", "secret");
//! feedback.feedback_connect().await?;
//! for token in feedback.feedback_all().await? {
//!     println!("unregistered: {}", token);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod connection;
pub mod credentials;
mod engine;
pub mod error;
mod feedback;
pub mod logging;
pub mod transport;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

// Re-export main types
pub use client::{ApnClient, ClientOptions, Timeouts};
pub use connection::{ConnectParams, Connector, Endpoint, Environment, Service, TlsDialer};
pub use credentials::Credentials;
pub use error::{translate_status, ApnError};
pub use logging::{Behavior, InvalidTokenNotifier, LogLevel, LogSink, StderrSink};
pub use transport::{Readiness, TlsTransport, Transport};

/// Crate version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Install the process-wide TLS crypto provider.
///
/// Safe to call more than once. Connecting works without it as long as no other
/// provider is compiled in.
pub fn init() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

/// Version packed as `major << 16 | minor << 8 | patch`
pub fn version() -> u32 {
    let part = |s: &str| s.parse::<u32>().unwrap_or(0) & 0xff;
    part(env!("CARGO_PKG_VERSION_MAJOR")) << 16
        | part(env!("CARGO_PKG_VERSION_MINOR")) << 8
        | part(env!("CARGO_PKG_VERSION_PATCH"))
}

/// Version as text
pub fn version_string() -> &'static str {
    VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(version_string(), "0.1.0");
        assert_eq!(version(), 0x00_01_00);
    }

    #[test]
    fn test_init_twice() {
        init();
        init();
    }
}
