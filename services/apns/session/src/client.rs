//! APNs client: configuration, connection lifecycle and the send retry controller.

use crate::connection::{ConnectParams, Connector, Endpoint, Environment, Service, TlsDialer};
use crate::credentials::Credentials;
use crate::engine::{self, BatchFailure};
use crate::error::ApnError;
use crate::feedback;
use crate::logging::{Behavior, ClientLog, InvalidTokenNotifier, LogLevel, LogSink};
use crate::transport::Transport;
use apns_wire::NotificationFrame;
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Timing knobs of a client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Readiness wait before each notification, repeated until ready
    pub send_wait: Duration,
    /// Wait for a late error frame after the last notification
    pub trailing_wait: Duration,
    /// Wait for a feedback record
    pub feedback_wait: Duration,
    /// Pause between closing and reopening a connection during a batch
    pub reconnect_delay: Duration,
    /// Bound on each TCP connect attempt and on the TLS handshake
    pub connect: Duration,
    /// Bound on each graceful TLS shutdown attempt
    pub shutdown: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            send_wait: Duration::from_secs(10),
            trailing_wait: Duration::from_secs(1),
            feedback_wait: Duration::from_secs(3),
            reconnect_delay: Duration::from_secs(1),
            connect: Duration::from_secs(10),
            shutdown: Duration::from_secs(1),
        }
    }
}

/// Client settings other than credentials and callbacks
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientOptions {
    /// Sandbox or production services
    pub environment: Environment,
    /// Behavior options
    pub behavior: Behavior,
    /// Log level filter for the sink and standard error
    pub log_level: LogLevel,
    /// Timing knobs
    pub timeouts: Timeouts,
    /// CA bundle replacing the platform trust store
    pub ca_file: Option<PathBuf>,
    /// Notification gateway replacing Apple's
    pub gateway: Option<Endpoint>,
    /// Feedback service replacing Apple's
    pub feedback: Option<Endpoint>,
}

enum ConnectionState<T> {
    Disconnected,
    Connected { service: Service, transport: T },
}

/// Client for the Apple Push Notification binary interface
///
/// A client owns at most one connection, either to the notification gateway or to
/// the feedback service. It is configured through setters, connected with
/// [`connect`](Self::connect) or [`feedback_connect`](Self::feedback_connect), and
/// closes its connection when dropped.
///
/// ```no_run
/// # async fn demo() -> Result<(), apns_session::ApnError> {
/// use apns_session::{ApnClient, Behavior, Environment};
/// use apns_wire::NotificationBuilder;
///
/// let mut client = ApnClient::new();
/// client.set_certificate("push.pem", Some("push.key"), None);
/// client.set_mode(Environment::Sandbox);
/// client.set_behavior(Behavior::RECONNECT);
/// client.connect().await?;
///
/// let frame = NotificationBuilder::new(r#"{"aps":{"alert":"Hello"}}"#).build()?;
/// let mut invalid = Vec::new();
/// client.send(&frame, &["0a1b..."], Some(&mut invalid)).await?;
/// client.close().await;
/// # Ok(())
/// # }
/// ```
pub struct ApnClient<C: Connector = TlsDialer> {
    connector: C,
    credentials: Credentials,
    options: ClientOptions,
    log: ClientLog,
    notifier: Option<Arc<dyn InvalidTokenNotifier>>,
    feedback_mode: bool,
    state: ConnectionState<C::Transport>,
}

impl ApnClient<TlsDialer> {
    /// Client connecting over TCP and TLS
    pub fn new() -> Self {
        Self::with_connector(TlsDialer)
    }
}

impl Default for ApnClient<TlsDialer> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Connector> ApnClient<C> {
    /// Client using a custom connector
    pub fn with_connector(connector: C) -> Self {
        Self::with_options(connector, ClientOptions::default())
    }

    /// Client using a custom connector and options
    pub fn with_options(connector: C, options: ClientOptions) -> Self {
        let log = ClientLog {
            level: options.log_level,
            behavior: options.behavior,
            sink: None,
        };
        Self {
            connector,
            credentials: Credentials::default(),
            options,
            log,
            notifier: None,
            feedback_mode: false,
            state: ConnectionState::Disconnected,
        }
    }

    /// Replace every option at once
    pub fn set_options(&mut self, options: ClientOptions) {
        self.log.level = options.log_level;
        self.log.behavior = options.behavior;
        self.options = options;
    }

    /// Current options
    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Use a PEM certificate and private key, replacing any PKCS#12 file
    pub fn set_certificate(
        &mut self,
        certificate: &str,
        private_key: Option<&str>,
        passphrase: Option<&str>,
    ) {
        self.credentials = Credentials::pem(certificate, private_key, passphrase);
    }

    /// Use a PKCS#12 container, replacing any PEM certificate and key
    pub fn set_pkcs12_file(&mut self, file: &str, passphrase: &str) {
        self.credentials = Credentials::pkcs12(file, passphrase);
    }

    /// Replace the credentials wholesale
    pub fn set_credentials(&mut self, credentials: Credentials) {
        self.credentials = credentials;
    }

    /// Select sandbox or production services
    pub fn set_mode(&mut self, environment: Environment) {
        self.options.environment = environment;
    }

    /// Set behavior options
    pub fn set_behavior(&mut self, behavior: Behavior) {
        self.options.behavior = behavior;
        self.log.behavior = behavior;
    }

    /// Set the log level filter applied to the sink and standard error
    pub fn set_log_level(&mut self, level: LogLevel) {
        self.options.log_level = level;
        self.log.level = level;
    }

    /// Install a log sink
    pub fn set_log_sink(&mut self, sink: impl LogSink + 'static) {
        self.log.sink = Some(Arc::new(sink));
    }

    /// Remove the log sink
    pub fn clear_log_sink(&mut self) {
        self.log.sink = None;
    }

    /// Install a callback receiving every token the gateway rejects
    pub fn set_invalid_token_notifier(&mut self, notifier: impl InvalidTokenNotifier + 'static) {
        self.notifier = Some(Arc::new(notifier));
    }

    /// Verify servers against a CA bundle instead of the platform trust store
    pub fn set_ca_file(&mut self, ca_file: Option<PathBuf>) {
        self.options.ca_file = ca_file;
    }

    /// Replace the timing knobs
    pub fn set_timeouts(&mut self, timeouts: Timeouts) {
        self.options.timeouts = timeouts;
    }

    /// Connect to `endpoint` instead of Apple's notification gateway
    pub fn set_gateway_endpoint(&mut self, endpoint: Option<Endpoint>) {
        self.options.gateway = endpoint;
    }

    /// Connect to `endpoint` instead of Apple's feedback service
    pub fn set_feedback_endpoint(&mut self, endpoint: Option<Endpoint>) {
        self.options.feedback = endpoint;
    }

    /// Configured credentials
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// PEM certificate path
    pub fn certificate(&self) -> Option<&Path> {
        self.credentials.certificate()
    }

    /// PEM private key path
    pub fn private_key(&self) -> Option<&Path> {
        self.credentials.private_key()
    }

    /// Private key passphrase
    pub fn private_key_passphrase(&self) -> Option<&str> {
        self.credentials.private_key_passphrase()
    }

    /// PKCS#12 container path
    pub fn pkcs12_file(&self) -> Option<&Path> {
        self.credentials.pkcs12_file()
    }

    /// Selected environment
    pub fn mode(&self) -> Environment {
        self.options.environment
    }

    /// Behavior options
    pub fn behavior(&self) -> Behavior {
        self.options.behavior
    }

    /// Log level filter
    pub fn log_level(&self) -> LogLevel {
        self.options.log_level
    }

    /// Timing knobs
    pub fn timeouts(&self) -> &Timeouts {
        &self.options.timeouts
    }

    /// CA bundle, if any
    pub fn ca_file(&self) -> Option<&Path> {
        self.options.ca_file.as_deref()
    }

    /// Whether a connection is open, to either service
    pub fn is_connected(&self) -> bool {
        matches!(self.state, ConnectionState::Connected { .. })
    }

    /// Whether this client was ever connected to the feedback service.
    ///
    /// Such a client can no longer send notifications.
    pub fn is_feedback(&self) -> bool {
        self.feedback_mode
    }

    fn endpoint(&self, service: Service) -> Endpoint {
        let custom = match service {
            Service::Notification => &self.options.gateway,
            Service::Feedback => &self.options.feedback,
        };
        custom
            .clone()
            .unwrap_or_else(|| Endpoint::for_service(service, self.options.environment))
    }

    async fn open(&mut self, service: Service) -> Result<(), ApnError> {
        if self.is_connected() {
            return Ok(());
        }

        let endpoint = self.endpoint(service);
        let params = ConnectParams::new(
            &self.credentials,
            self.options.ca_file.as_deref(),
            self.options.timeouts.connect,
            &self.log,
        );
        let transport = self.connector.connect(&endpoint, &params).await?;
        self.state = ConnectionState::Connected { service, transport };
        Ok(())
    }

    /// Open a connection to the notification gateway. No-op when already connected.
    pub async fn connect(&mut self) -> Result<(), ApnError> {
        self.open(Service::Notification).await
    }

    /// Open a connection to the feedback service. No-op when already connected.
    ///
    /// The client is then permanently restricted to feedback.
    pub async fn feedback_connect(&mut self) -> Result<(), ApnError> {
        self.open(Service::Feedback).await?;
        self.feedback_mode = true;
        Ok(())
    }

    /// Close the connection, if any
    pub async fn close(&mut self) {
        let state = std::mem::replace(&mut self.state, ConnectionState::Disconnected);
        if let ConnectionState::Connected {
            service,
            mut transport,
        } = state
        {
            self.log.info(format_args!("Closing connection to {}...", service));
            transport.shutdown(self.options.timeouts.shutdown).await;
            self.log.info(format_args!("Connection has been closed"));
        }
    }

    /// Send `frame` to every token, in order.
    ///
    /// Each notification is identified by its token index. Tokens the gateway
    /// rejects are appended to `invalid_tokens` and reported to the notifier. With
    /// [`Behavior::RECONNECT`] the batch survives rejected tokens and dropped
    /// connections by reconnecting and resuming after the last accepted token.
    /// A rejection of the final token is not reported as an error.
    pub async fn send<S: AsRef<str>>(
        &mut self,
        frame: &NotificationFrame,
        tokens: &[S],
        mut invalid_tokens: Option<&mut Vec<String>>,
    ) -> Result<(), ApnError> {
        if self.feedback_mode
            || !matches!(
                self.state,
                ConnectionState::Connected {
                    service: Service::Notification,
                    ..
                }
            )
        {
            self.log.error(format_args!("Connection was not opened"));
            return Err(ApnError::NotConnected);
        }
        if tokens.is_empty() {
            self.log.error(format_args!("No device tokens given"));
            return Err(ApnError::NoTokens);
        }
        if u32::try_from(tokens.len()).is_err() {
            return Err(ApnError::TooManyTokens(tokens.len()));
        }

        let mut frame = frame.clone();
        let reconnect_enabled = self.options.behavior.contains(Behavior::RECONNECT);
        let mut start = 0;
        let mut reconnect = false;
        let mut collected = BTreeSet::new();

        self.log.info(format_args!(
            "Sending notification to {} device(s)...",
            tokens.len()
        ));

        loop {
            if reconnect {
                self.log.info(format_args!("Reconnecting..."));
                self.close().await;
                tokio::time::sleep(self.options.timeouts.reconnect_delay).await;
                self.connect().await?;
            }

            let ConnectionState::Connected { transport, .. } = &mut self.state else {
                return Err(ApnError::NotConnected);
            };
            let BatchFailure { error, index } = match engine::send_batch(
                transport,
                &mut frame,
                tokens,
                start,
                self.options.timeouts.send_wait,
                self.options.timeouts.trailing_wait,
                &self.log,
            )
            .await
            {
                Ok(()) => {
                    self.log.info(format_args!("Notification has been sent"));
                    return Ok(());
                }
                Err(failure) => failure,
            };

            // A late error frame can move the batch back before a token that was
            // already collected.
            if error.is_invalid_token() && collected.insert(index) {
                self.harvest(tokens, index, invalid_tokens.as_deref_mut());
            }

            let next = if error.is_invalid_token() { index + 1 } else { index };
            if next >= tokens.len() {
                if error.is_invalid_token() {
                    self.log.info(format_args!("Notification has been sent"));
                    return Ok(());
                }
                self.log.error(format_args!("Could not send notification: {}", error));
                return Err(error);
            }

            match error {
                ApnError::InvalidTokenFormat(_) if reconnect_enabled => {
                    start = next;
                    reconnect = false;
                }
                ref e if reconnect_enabled && e.is_reconnectable() => {
                    start = next;
                    reconnect = true;
                }
                error => {
                    self.log.error(format_args!("Could not send notification: {}", error));
                    return Err(error);
                }
            }
        }
    }

    fn harvest<S: AsRef<str>>(
        &self,
        tokens: &[S],
        index: usize,
        invalid_tokens: Option<&mut Vec<String>>,
    ) {
        let Some(token) = tokens.get(index).map(AsRef::as_ref) else {
            self.log.error(format_args!(
                "Gateway rejected unknown notification identifier {}",
                index
            ));
            return;
        };

        self.log.error(format_args!(
            "Invalid device token: {} (index: {})",
            token, index
        ));
        if let Some(invalid_tokens) = invalid_tokens {
            invalid_tokens.push(token.to_string());
        }
        if let Some(notifier) = &self.notifier {
            notifier.invalid_token(token, index);
        }
    }

    /// Read the next feedback record.
    ///
    /// Returns at most one token; an empty list means nothing arrived in time.
    pub async fn feedback(&mut self) -> Result<Vec<String>, ApnError> {
        let ConnectionState::Connected {
            service: Service::Feedback,
            transport,
        } = &mut self.state
        else {
            self.log.error(format_args!("Connection was not opened"));
            return Err(ApnError::NotConnectedFeedback);
        };

        self.log.info(format_args!("Reading feedback..."));
        feedback::read_feedback(transport, self.options.timeouts.feedback_wait, &self.log).await
    }

    /// Read feedback records until the service has nothing more to say
    pub async fn feedback_all(&mut self) -> Result<Vec<String>, ApnError> {
        let mut tokens = Vec::new();
        loop {
            let batch = self.feedback().await?;
            if batch.is_empty() {
                return Ok(tokens);
            }
            tokens.extend(batch);
        }
    }
}

impl<C: Connector> Drop for ApnClient<C> {
    fn drop(&mut self) {
        if let ConnectionState::Connected { transport, .. } = &mut self.state {
            transport.abort();
        }
    }
}

impl<C: Connector> fmt::Debug for ApnClient<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApnClient")
            .field("credentials", &self.credentials)
            .field("options", &self.options)
            .field("sink", &self.log.sink.is_some())
            .field("connected", &self.is_connected())
            .field("feedback", &self.feedback_mode)
            .finish()
    }
}
