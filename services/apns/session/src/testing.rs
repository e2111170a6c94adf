//! Scripted in-memory gateway for exercising the client without a network.
//!
//! A [`ScriptedConnector`] hands out one [`ScriptedTransport`] per connect, each
//! driven by a [`ConnectionScript`]. The transport decodes what the client writes
//! the way the gateway would and answers according to its script. Everything
//! received is recorded in a shared [`GatewayRecord`] for assertions.

use crate::connection::{ConnectParams, Connector, Endpoint};
use crate::error::ApnError;
use crate::transport::{Readiness, Transport};
use apns_wire::{ErrorFrame, FeedbackFrame, Notification, NotificationDecoder};
use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
struct Rejection {
    identifier: u32,
    status: u8,
    lag: usize,
}

/// Behavior of the fake service for one connection
#[derive(Debug, Clone, Default)]
pub struct ConnectionScript {
    reject: Option<Rejection>,
    close_after: Option<usize>,
    outbound: BytesMut,
    eof: bool,
    refuse: bool,
    read_chunk: Option<usize>,
}

impl ConnectionScript {
    /// Accept every notification silently
    pub fn accept_all() -> Self {
        Self::default()
    }

    /// Answer the notification with `identifier` with an error frame, then close
    pub fn reject(identifier: u32, status: u8) -> Self {
        Self {
            reject: Some(Rejection {
                identifier,
                status,
                lag: 0,
            }),
            ..Self::default()
        }
    }

    /// Make the rejection visible only after `frames` further notifications
    pub fn with_lag(mut self, frames: usize) -> Self {
        if let Some(reject) = self.reject.as_mut() {
            reject.lag = frames;
        }
        self
    }

    /// Close without an error frame once `frames` notifications were received
    pub fn close_after(mut self, frames: usize) -> Self {
        self.close_after = Some(frames);
        if frames == 0 {
            self.eof = true;
        }
        self
    }

    /// Serve feedback records, one after another
    pub fn feedback(records: Vec<FeedbackFrame>) -> Self {
        let mut script = Self::default();
        for record in records {
            script.outbound.extend_from_slice(&record.encode());
        }
        script
    }

    /// Queue raw bytes for the client to read
    pub fn with_noise(mut self, bytes: &[u8]) -> Self {
        self.outbound.extend_from_slice(bytes);
        self
    }

    /// Close once every queued byte has been read
    pub fn close_when_drained(mut self) -> Self {
        self.eof = true;
        self
    }

    /// Hand out at most `size` bytes per read
    pub fn with_read_chunk(mut self, size: usize) -> Self {
        self.read_chunk = Some(size.max(1));
        self
    }

    /// Fail the connect attempt itself
    pub fn refuse() -> Self {
        Self {
            refuse: true,
            ..Self::default()
        }
    }
}

/// Everything the fake service observed, across connections
#[derive(Debug, Default, Clone)]
pub struct GatewayRecord {
    /// Endpoint of each connect attempt, in order
    pub connections: Vec<Endpoint>,
    /// Notifications received, tagged with their connection index
    pub notifications: Vec<(usize, Notification)>,
    /// Graceful shutdowns performed by the client
    pub shutdowns: usize,
    /// Aborts performed by the client
    pub aborts: usize,
}

impl GatewayRecord {
    /// Tokens received on any connection, in order
    pub fn tokens(&self) -> Vec<String> {
        self.notifications
            .iter()
            .map(|(_, n)| n.token.to_hex())
            .collect()
    }

    /// Tokens received on one connection, in order
    pub fn tokens_on(&self, connection: usize) -> Vec<String> {
        self.notifications
            .iter()
            .filter(|(c, _)| *c == connection)
            .map(|(_, n)| n.token.to_hex())
            .collect()
    }

    /// Identifiers received on one connection, in order
    pub fn identifiers_on(&self, connection: usize) -> Vec<u32> {
        self.notifications
            .iter()
            .filter(|(c, _)| *c == connection)
            .map(|(_, n)| n.identifier)
            .collect()
    }
}

fn lock(record: &Mutex<GatewayRecord>) -> MutexGuard<'_, GatewayRecord> {
    record.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory transport following a [`ConnectionScript`]
#[derive(Debug)]
pub struct ScriptedTransport {
    script: ConnectionScript,
    decoder: NotificationDecoder,
    inbound: BytesMut,
    received: Vec<Notification>,
    countdown: Option<(ErrorFrame, usize)>,
    closed: bool,
    record: Option<(Arc<Mutex<GatewayRecord>>, usize)>,
}

impl ScriptedTransport {
    /// Standalone transport, not tied to a connector
    pub fn new(script: ConnectionScript) -> Self {
        Self {
            script,
            decoder: NotificationDecoder::new(),
            inbound: BytesMut::new(),
            received: Vec::new(),
            countdown: None,
            closed: false,
            record: None,
        }
    }

    fn recorded(script: ConnectionScript, record: Arc<Mutex<GatewayRecord>>, index: usize) -> Self {
        let mut transport = Self::new(script);
        transport.record = Some((record, index));
        transport
    }

    /// Notifications received on this connection
    pub fn received(&self) -> &[Notification] {
        &self.received
    }

    /// Whether the client closed this connection
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn readiness(&self) -> Readiness {
        let mut ready = Readiness::empty();
        if self.closed {
            return ready;
        }
        if !self.script.outbound.is_empty() || self.script.eof {
            ready |= Readiness::READABLE;
        }
        ready | Readiness::WRITABLE
    }

    fn accept(&mut self, notification: Notification) {
        if let Some((record, index)) = &self.record {
            lock(record).notifications.push((*index, notification.clone()));
        }
        let identifier = notification.identifier;
        self.received.push(notification);

        if let Some((_, remaining)) = self.countdown.as_mut() {
            *remaining = remaining.saturating_sub(1);
        } else if let Some(reject) = self.script.reject {
            if reject.identifier == identifier {
                self.countdown = Some((ErrorFrame::new(reject.status, identifier), reject.lag));
            }
        }

        if let Some((frame, 0)) = self.countdown {
            self.script.outbound.extend_from_slice(&frame.encode());
            self.script.eof = true;
            self.script.reject = None;
            self.countdown = None;
        }

        if self.script.close_after == Some(self.received.len()) {
            self.script.eof = true;
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn wait(
        &mut self,
        interest: Readiness,
        timeout: Duration,
    ) -> Result<Option<Readiness>, ApnError> {
        let ready = self.readiness() & interest;
        if ready.is_empty() {
            tokio::time::sleep(timeout).await;
            return Ok(None);
        }
        Ok(Some(ready))
    }

    async fn write_all(&mut self, buf: &[u8]) -> Result<(), ApnError> {
        if self.closed || self.script.eof {
            return Err(ApnError::ConnectionClosed);
        }

        self.inbound.extend_from_slice(buf);
        while let Some(notification) = self.decoder.decode(&mut self.inbound)? {
            self.accept(notification);
        }
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, ApnError> {
        if self.closed {
            return Err(ApnError::ConnectionClosed);
        }
        if self.script.outbound.is_empty() {
            if self.script.eof {
                return Err(ApnError::ConnectionClosed);
            }
            return std::future::pending().await;
        }

        let limit = self.script.read_chunk.unwrap_or(usize::MAX);
        let n = buf.len().min(self.script.outbound.len()).min(limit);
        buf[..n].copy_from_slice(&self.script.outbound[..n]);
        self.script.outbound.advance(n);
        Ok(n)
    }

    async fn shutdown(&mut self, _timeout: Duration) {
        self.closed = true;
        if let Some((record, _)) = &self.record {
            lock(record).shutdowns += 1;
        }
    }

    fn abort(&mut self) {
        self.closed = true;
        if let Some((record, _)) = &self.record {
            lock(record).aborts += 1;
        }
    }
}

/// Connector handing out scripted transports in order
///
/// Once the scripts run out every further connection accepts all notifications.
#[derive(Debug, Default)]
pub struct ScriptedConnector {
    scripts: Mutex<VecDeque<ConnectionScript>>,
    record: Arc<Mutex<GatewayRecord>>,
}

impl ScriptedConnector {
    /// Connector serving `scripts`, one per connect
    pub fn new(scripts: impl IntoIterator<Item = ConnectionScript>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into_iter().collect()),
            record: Arc::default(),
        }
    }

    /// Shared handle to what the fake service observed
    pub fn record(&self) -> Arc<Mutex<GatewayRecord>> {
        self.record.clone()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    type Transport = ScriptedTransport;

    async fn connect(
        &self,
        endpoint: &Endpoint,
        params: &ConnectParams<'_>,
    ) -> Result<ScriptedTransport, ApnError> {
        params.credentials.validate()?;
        params.info(format_args!("Connecting to {}...", endpoint));

        let script = self
            .scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_default();

        let index = {
            let mut record = lock(&self.record);
            record.connections.push(endpoint.clone());
            record.connections.len() - 1
        };

        if script.refuse {
            params.error(format_args!("Could not initialize connection to {}", endpoint));
            return Err(ApnError::ConnectFailed {
                host: endpoint.host.clone(),
            });
        }

        params.info(format_args!("Connection has been established"));
        Ok(ScriptedTransport::recorded(script, self.record.clone(), index))
    }
}
