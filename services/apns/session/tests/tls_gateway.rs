//! Batch send and transport behavior over real TLS against a loopback gateway.

use apns_session::{
    ApnClient, ApnError, Credentials, Endpoint, LogLevel, Readiness, Timeouts, TlsTransport,
    Transport,
};
use apns_wire::{ErrorFrame, Notification, NotificationBuilder, NotificationDecoder};
use bytes::BytesMut;
use rcgen::{BasicConstraints, Certificate, CertificateParams, DnType, IsCa, KeyPair};
use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer, ServerName};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_rustls::{server::TlsStream, TlsAcceptor, TlsConnector};

const A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
const B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
const C: &str = "cccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccc";

/// Throwaway CA, server and client certificates written to a temporary directory
struct TestPki {
    dir: TempDir,
    server_config: Arc<ServerConfig>,
}

impl TestPki {
    fn new() -> Self {
        apns_session::init();
        let dir = TempDir::new().unwrap();

        let ca_key = KeyPair::generate().unwrap();
        let mut ca_params = CertificateParams::default();
        ca_params
            .distinguished_name
            .push(DnType::CommonName, "Loopback Test CA");
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let ca = ca_params.self_signed(&ca_key).unwrap();

        let (server, server_key) = issue(&ca, &ca_key, "localhost", vec!["localhost".into()]);
        let (client, client_key) = issue(&ca, &ca_key, "Apple Push Services: test", vec![]);

        std::fs::write(dir.path().join("ca.pem"), ca.pem()).unwrap();
        std::fs::write(dir.path().join("client.pem"), client.pem()).unwrap();
        std::fs::write(dir.path().join("client.key"), client_key.serialize_pem()).unwrap();

        let mut roots = RootCertStore::empty();
        roots.add(ca.der().clone()).unwrap();
        let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
            .build()
            .unwrap();
        let server_config = ServerConfig::builder()
            .with_client_cert_verifier(verifier)
            .with_single_cert(
                vec![server.der().clone()],
                PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(server_key.serialize_der())),
            )
            .unwrap();

        Self {
            dir,
            server_config: Arc::new(server_config),
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn credentials(&self) -> Credentials {
        Credentials::pem(
            self.path("client.pem").to_str().unwrap(),
            Some(self.path("client.key").to_str().unwrap()),
            None,
        )
    }

    fn client(&self, port: u16) -> ApnClient {
        let mut client = ApnClient::new();
        client.set_credentials(self.credentials());
        client.set_ca_file(Some(self.path("ca.pem")));
        client.set_gateway_endpoint(Some(Endpoint::new("localhost", port)));
        client.set_timeouts(Timeouts {
            trailing_wait: Duration::from_millis(500),
            ..Timeouts::default()
        });
        client
    }
}

fn issue(
    ca: &Certificate,
    ca_key: &KeyPair,
    common_name: &str,
    names: Vec<String>,
) -> (Certificate, KeyPair) {
    let key = KeyPair::generate().unwrap();
    let mut params = CertificateParams::new(names).unwrap();
    params
        .distinguished_name
        .push(DnType::CommonName, common_name);
    let cert = params.signed_by(&key, ca, ca_key).unwrap();
    (cert, key)
}

/// Accept one TLS connection. With `reject`, answer the first notification with
/// that status, then keep reading until the client closes.
async fn gateway(pki: &TestPki, reject: Option<u8>) -> (u16, JoinHandle<Vec<Notification>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let acceptor = TlsAcceptor::from(pki.server_config.clone());

    let handle = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut tls = acceptor.accept(tcp).await.unwrap();
        let mut decoder = NotificationDecoder::new();
        let mut inbound = BytesMut::new();
        let mut received = Vec::new();
        let mut answered = false;

        loop {
            match tls.read_buf(&mut inbound).await {
                Ok(0) | Err(_) => return received,
                Ok(_) => {}
            }
            while let Some(notification) = decoder.decode(&mut inbound).unwrap() {
                if let (Some(status), false) = (reject, answered) {
                    let frame = ErrorFrame::new(status, notification.identifier);
                    tls.write_all(&frame.encode()).await.unwrap();
                    tls.flush().await.unwrap();
                    answered = true;
                }
                received.push(notification);
            }
        }
    });

    (port, handle)
}

#[tokio::test]
async fn test_clean_batch_over_tls() {
    let pki = TestPki::new();
    let (port, gateway) = gateway(&pki, None).await;
    let mut client = pki.client(port);
    client.connect().await.unwrap();

    let frame = NotificationBuilder::new(r#"{"aps":{"alert":"Hello"}}"#)
        .build()
        .unwrap();
    let mut invalid = Vec::new();
    client
        .send(&frame, &[A, B, C], Some(&mut invalid))
        .await
        .unwrap();
    client.close().await;

    assert!(invalid.is_empty());
    let received = gateway.await.unwrap();
    let identifiers: Vec<u32> = received.iter().map(|n| n.identifier).collect();
    let tokens: Vec<String> = received.iter().map(|n| n.token.to_hex()).collect();
    assert_eq!(identifiers, vec![0, 1, 2]);
    assert_eq!(tokens, vec![A, B, C]);
    assert_eq!(&received[0].payload[..], br#"{"aps":{"alert":"Hello"}}"#);
}

#[tokio::test]
async fn test_error_frame_after_first_write_over_tls() {
    let pki = TestPki::new();
    let (port, gateway) = gateway(&pki, Some(8)).await;
    let mut client = pki.client(port);
    client.connect().await.unwrap();

    let frame = NotificationBuilder::new(r#"{"aps":{"alert":"Hello"}}"#)
        .build()
        .unwrap();
    let mut invalid = Vec::new();
    let result = client.send(&frame, &[A, B, C], Some(&mut invalid)).await;
    client.close().await;

    assert!(matches!(result, Err(ApnError::InvalidToken)));
    assert_eq!(invalid, vec![A]);
    let received = gateway.await.unwrap();
    assert_eq!(received[0].token.to_hex(), A);
}

#[tokio::test]
async fn test_connect_logs_server_certificate() {
    let pki = TestPki::new();
    let (port, gateway) = gateway(&pki, None).await;
    let mut client = pki.client(port);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let captured = seen.clone();
    client.set_log_level(LogLevel::INFO);
    client.set_log_sink(move |_: LogLevel, message: &str| {
        captured.lock().unwrap().push(message.to_string());
    });

    client.connect().await.unwrap();
    client.close().await;
    gateway.await.unwrap();

    let seen = seen.lock().unwrap();
    let count = |prefix: &str| seen.iter().filter(|m| m.starts_with(prefix)).count();
    assert_eq!(count("Connecting to"), 1);
    assert!(seen
        .iter()
        .any(|m| m.starts_with("Server certificate subject:") && m.contains("localhost")));
    assert!(seen
        .iter()
        .any(|m| m.starts_with("Server certificate issuer:") && m.contains("Loopback Test CA")));
}

/// Handshake a bare transport with the loopback gateway's peer side in hand
async fn transport_pair(pki: &TestPki) -> (TlsTransport, TlsStream<TcpStream>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let acceptor = TlsAcceptor::from(pki.server_config.clone());
    let server = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        acceptor.accept(tcp).await.unwrap()
    });

    let ca_file = pki.path("ca.pem");
    let config = pki.credentials().client_config(Some(ca_file.as_path())).unwrap();
    let tcp = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let stream = TlsConnector::from(Arc::new(config))
        .connect(ServerName::try_from("localhost").unwrap(), tcp)
        .await
        .unwrap();

    (TlsTransport::new(stream), server.await.unwrap())
}

#[tokio::test]
async fn test_transport_reads_before_writing() {
    let pki = TestPki::new();
    let (mut transport, mut peer) = transport_pair(&pki).await;

    // Session tickets make the socket readable without any plaintext.
    let idle = transport
        .wait(Readiness::READABLE, Duration::from_millis(300))
        .await
        .unwrap();
    assert_eq!(idle, None);

    let ready = transport
        .wait(Readiness::WRITABLE, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(ready, Some(Readiness::WRITABLE));

    let mut frame = NotificationBuilder::new("{}").build().unwrap();
    frame.set_identifier(7);
    frame.set_token_hex(A).unwrap();
    transport.write_all(frame.as_bytes()).await.unwrap();

    let mut decoder = NotificationDecoder::new();
    let mut inbound = BytesMut::new();
    let notification = loop {
        peer.read_buf(&mut inbound).await.unwrap();
        if let Some(notification) = decoder.decode(&mut inbound).unwrap() {
            break notification;
        }
    };
    assert_eq!(notification.identifier, 7);

    peer.write_all(&ErrorFrame::new(10, 7).encode()).await.unwrap();
    peer.shutdown().await.unwrap();

    let ready = transport
        .wait(Readiness::READABLE, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(ready, Some(Readiness::READABLE));
    let ready = transport
        .wait(Readiness::READABLE | Readiness::WRITABLE, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(ready, Some(Readiness::READABLE));

    let mut buf = [0u8; 6];
    transport.read_exact(&mut buf).await.unwrap();
    assert_eq!(ErrorFrame::decode(&buf).unwrap(), Some(ErrorFrame::new(10, 7)));
    assert!(matches!(
        transport.read(&mut buf).await,
        Err(ApnError::ConnectionClosed)
    ));

    tokio::time::timeout(Duration::from_secs(5), transport.shutdown(Duration::from_secs(1)))
        .await
        .unwrap();
}
