//! Endpoint selection and connection establishment.

use crate::credentials::Credentials;
use crate::error::ApnError;
use crate::logging::ClientLog;
use crate::transport::{TlsTransport, Transport};
use async_trait::async_trait;
use rustls::pki_types::ServerName;
use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;

/// Production notification gateway
pub const GATEWAY_HOST: &str = "gateway.push.apple.com";
/// Sandbox notification gateway
pub const GATEWAY_SANDBOX_HOST: &str = "gateway.sandbox.push.apple.com";
/// Notification gateway port
pub const GATEWAY_PORT: u16 = 2195;
/// Production feedback service
pub const FEEDBACK_HOST: &str = "feedback.push.apple.com";
/// Sandbox feedback service
pub const FEEDBACK_SANDBOX_HOST: &str = "feedback.sandbox.push.apple.com";
/// Feedback service port
pub const FEEDBACK_PORT: u16 = 2196;

/// Apple environment a client talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    /// Development environment
    Sandbox,
    /// Production environment
    #[default]
    Production,
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Sandbox => write!(f, "sandbox"),
            Environment::Production => write!(f, "production"),
        }
    }
}

/// Remote service of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    /// Notification gateway
    Notification,
    /// Feedback service
    Feedback,
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Service::Notification => write!(f, "Apple Push Notification Service"),
            Service::Feedback => write!(f, "Apple Feedback Service"),
        }
    }
}

/// Host and port of a remote service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Host name, also used for SNI and certificate verification
    pub host: String,
    /// TCP port
    pub port: u16,
}

impl Endpoint {
    /// Create an endpoint
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Apple's endpoint for a service in an environment
    pub fn for_service(service: Service, environment: Environment) -> Self {
        match (service, environment) {
            (Service::Notification, Environment::Sandbox) => {
                Self::new(GATEWAY_SANDBOX_HOST, GATEWAY_PORT)
            }
            (Service::Notification, Environment::Production) => {
                Self::new(GATEWAY_HOST, GATEWAY_PORT)
            }
            (Service::Feedback, Environment::Sandbox) => {
                Self::new(FEEDBACK_SANDBOX_HOST, FEEDBACK_PORT)
            }
            (Service::Feedback, Environment::Production) => {
                Self::new(FEEDBACK_HOST, FEEDBACK_PORT)
            }
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Everything a connector needs from the client for one connect attempt
pub struct ConnectParams<'a> {
    /// Client credentials
    pub credentials: &'a Credentials,
    /// Optional CA bundle overriding the platform trust store
    pub ca_file: Option<&'a Path>,
    /// Bound on each TCP connect attempt and on the TLS handshake
    pub timeout: Duration,
    log: &'a ClientLog,
}

impl<'a> ConnectParams<'a> {
    pub(crate) fn new(
        credentials: &'a Credentials,
        ca_file: Option<&'a Path>,
        timeout: Duration,
        log: &'a ClientLog,
    ) -> Self {
        Self {
            credentials,
            ca_file,
            timeout,
            log,
        }
    }

    /// Log a progress message through the client's logger
    pub fn info(&self, args: fmt::Arguments<'_>) {
        self.log.info(args);
    }

    /// Log a failure through the client's logger
    pub fn error(&self, args: fmt::Arguments<'_>) {
        self.log.error(args);
    }

    /// Log socket-level detail through the client's logger
    pub fn debug(&self, args: fmt::Arguments<'_>) {
        self.log.debug(args);
    }
}

/// Opens transports to remote endpoints
#[async_trait]
pub trait Connector: Send + Sync {
    /// Transport produced by this connector
    type Transport: Transport;

    /// Open a secure session to `endpoint`
    async fn connect(
        &self,
        endpoint: &Endpoint,
        params: &ConnectParams<'_>,
    ) -> Result<Self::Transport, ApnError>;
}

/// TCP + TLS connector used against the real services
#[derive(Debug, Default, Clone, Copy)]
pub struct TlsDialer;

#[async_trait]
impl Connector for TlsDialer {
    type Transport = TlsTransport;

    async fn connect(
        &self,
        endpoint: &Endpoint,
        params: &ConnectParams<'_>,
    ) -> Result<TlsTransport, ApnError> {
        params.credentials.validate()?;

        params.info(format_args!("Connecting to {}...", endpoint));
        let addrs = resolve_ipv4(endpoint).await?;
        let tcp = connect_any(endpoint, &addrs, params).await?;
        if let Err(e) = tcp.set_nodelay(true) {
            params.debug(format_args!("Unable to disable Nagle's algorithm: {}", e));
        }

        let config = params.credentials.client_config(params.ca_file)?;
        let server_name = ServerName::try_from(endpoint.host.clone()).map_err(|e| {
            ApnError::TlsHandshakeFailed(format!("invalid server name {}: {}", endpoint.host, e))
        })?;

        params.info(format_args!("Initializing SSL connection..."));
        let connector = tokio_rustls::TlsConnector::from(Arc::new(config));
        let stream = match tokio::time::timeout(params.timeout, connector.connect(server_name, tcp))
            .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                params.error(format_args!("Could not initialize SSL connection: {}", e));
                return Err(ApnError::TlsHandshakeFailed(e.to_string()));
            }
            Err(_) => {
                params.error(format_args!("SSL handshake timed out"));
                return Err(ApnError::TlsHandshakeFailed(format!(
                    "handshake did not complete within {:?}",
                    params.timeout
                )));
            }
        };

        log_session_details(&stream, params);
        params.info(format_args!("Connection has been established"));
        Ok(TlsTransport::new(stream))
    }
}

/// Resolve the endpoint, keeping IPv4 addresses only
async fn resolve_ipv4(endpoint: &Endpoint) -> Result<Vec<SocketAddr>, ApnError> {
    let resolved = tokio::net::lookup_host((endpoint.host.as_str(), endpoint.port))
        .await
        .map_err(|source| ApnError::ResolveFailed {
            host: endpoint.host.clone(),
            source,
        })?;

    let addrs: Vec<SocketAddr> = resolved.filter(SocketAddr::is_ipv4).collect();
    if addrs.is_empty() {
        return Err(ApnError::ResolveFailed {
            host: endpoint.host.clone(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no IPv4 address"),
        });
    }
    Ok(addrs)
}

/// Try each address in turn until one accepts
async fn connect_any(
    endpoint: &Endpoint,
    addrs: &[SocketAddr],
    params: &ConnectParams<'_>,
) -> Result<TcpStream, ApnError> {
    for addr in addrs {
        params.debug(format_args!("Trying to connect to {}...", addr));
        match tokio::time::timeout(params.timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                params.debug(format_args!("Connected to {}", addr));
                return Ok(stream);
            }
            Ok(Err(e)) => params.debug(format_args!("Could not connect to {}: {}", addr, e)),
            Err(_) => params.debug(format_args!(
                "Connection to {} timed out after {:?}",
                addr, params.timeout
            )),
        }
    }

    params.error(format_args!("Could not initialize connection to {}", endpoint));
    Err(ApnError::ConnectFailed {
        host: endpoint.host.clone(),
    })
}

fn log_session_details(stream: &TlsStream<TcpStream>, params: &ConnectParams<'_>) {
    let (_, session) = stream.get_ref();

    if let Some(version) = session.protocol_version() {
        params.debug(format_args!("SSL protocol: {:?}", version));
    }
    if let Some(suite) = session.negotiated_cipher_suite() {
        params.debug(format_args!("SSL cipher suite: {:?}", suite.suite()));
    }

    let Some(cert) = session.peer_certificates().and_then(|certs| certs.first()) else {
        params.debug(format_args!("Server presented no certificate"));
        return;
    };
    match x509_parser::parse_x509_certificate(cert.as_ref()) {
        Ok((_, cert)) => {
            params.info(format_args!("Server certificate subject: {}", cert.subject()));
            params.info(format_args!("Server certificate issuer: {}", cert.issuer()));
        }
        Err(e) => params.debug(format_args!("Unable to parse server certificate: {}", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoints() {
        assert_eq!(
            Endpoint::for_service(Service::Notification, Environment::Sandbox).to_string(),
            "gateway.sandbox.push.apple.com:2195"
        );
        assert_eq!(
            Endpoint::for_service(Service::Notification, Environment::Production).to_string(),
            "gateway.push.apple.com:2195"
        );
        assert_eq!(
            Endpoint::for_service(Service::Feedback, Environment::Sandbox).to_string(),
            "feedback.sandbox.push.apple.com:2196"
        );
        assert_eq!(
            Endpoint::for_service(Service::Feedback, Environment::Production).to_string(),
            "feedback.push.apple.com:2196"
        );
    }

    #[test]
    fn test_default_environment() {
        assert_eq!(Environment::default(), Environment::Production);
    }

    #[tokio::test]
    async fn test_dialer_checks_credentials_first() {
        let credentials = Credentials::default();
        let log = ClientLog::default();
        let params = ConnectParams::new(&credentials, None, Duration::from_secs(1), &log);
        let endpoint = Endpoint::new("gateway.invalid", GATEWAY_PORT);

        let result = TlsDialer.connect(&endpoint, &params).await;
        assert!(matches!(result, Err(ApnError::CertificateNotSet)));
    }

    #[tokio::test]
    async fn test_dialer_refused_connection() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let credentials = Credentials::pem("/nonexistent/cert.pem", Some("/nonexistent/key.pem"), None);
        let log = ClientLog::default();
        let params = ConnectParams::new(&credentials, None, Duration::from_secs(1), &log);
        let endpoint = Endpoint::new("127.0.0.1", port);

        let result = TlsDialer.connect(&endpoint, &params).await;
        assert!(matches!(result, Err(ApnError::ConnectFailed { .. })));
    }
}
