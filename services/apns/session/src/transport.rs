//! Secure transport for gateway and feedback sessions.
//!
//! [`Transport`] is the seam between the protocol code and the socket: a readiness
//! wait plus read/write primitives that retry transient conditions internally and
//! classify everything else into [`ApnError`]. [`TlsTransport`] implements it over a
//! tokio-rustls client stream.

use crate::error::ApnError;
use async_trait::async_trait;
use bitflags::bitflags;
use bytes::{Buf, BytesMut};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, Interest};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_rustls::client::TlsStream;
use tracing::{debug, trace};

const READ_AHEAD: usize = 4096;

bitflags! {
    /// Socket readiness, used both as the wait interest and its result
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Readiness: u8 {
        /// Plaintext (or end of stream) is available to read
        const READABLE = 1 << 0;
        /// A write can be attempted
        const WRITABLE = 1 << 1;
    }
}

/// Direction of a failed I/O call, used to pick the generic error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Reading from the peer
    Read,
    /// Writing to the peer
    Write,
}

/// Byte transport to one gateway or feedback endpoint
#[async_trait]
pub trait Transport: Send {
    /// Wait until any readiness in `interest` holds, or `timeout` elapses (`None`).
    async fn wait(&mut self, interest: Readiness, timeout: Duration)
        -> Result<Option<Readiness>, ApnError>;

    /// Write every byte of `buf`
    async fn write_all(&mut self, buf: &[u8]) -> Result<(), ApnError>;

    /// Read at least one byte into `buf`, returning the count
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, ApnError>;

    /// Graceful close, bounded by `timeout` per attempt
    async fn shutdown(&mut self, timeout: Duration);

    /// Immediate bidirectional socket shutdown
    fn abort(&mut self);

    /// Fill `buf` completely
    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), ApnError> {
        let mut filled = 0;
        while filled < buf.len() {
            filled += self.read(&mut buf[filled..]).await?;
        }
        Ok(())
    }
}

/// Map an I/O error to the client taxonomy
pub fn classify_io_error(err: io::Error, direction: Direction) -> ApnError {
    match err.kind() {
        io::ErrorKind::BrokenPipe => ApnError::NetworkUnreachable,
        io::ErrorKind::TimedOut => ApnError::ConnectionTimedOut,
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::WriteZero
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NotConnected => ApnError::ConnectionClosed,
        _ => match direction {
            Direction::Read => ApnError::ReadFailed(err),
            Direction::Write => ApnError::WriteFailed(err),
        },
    }
}

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// TLS session over one TCP socket
///
/// Plaintext is read ahead into a local buffer so that bytes rustls has already
/// decrypted count as readable even when the socket itself is idle.
pub struct TlsTransport {
    stream: TlsStream<TcpStream>,
    pending: BytesMut,
    eof: bool,
    read_error: Option<io::Error>,
}

impl TlsTransport {
    /// Wrap an established TLS stream
    pub fn new(stream: TlsStream<TcpStream>) -> Self {
        Self {
            stream,
            pending: BytesMut::with_capacity(READ_AHEAD),
            eof: false,
            read_error: None,
        }
    }

    /// Underlying TLS stream
    pub fn stream(&self) -> &TlsStream<TcpStream> {
        &self.stream
    }

    /// Pull whatever plaintext is available without waiting.
    ///
    /// Returns true when a read would now complete immediately: buffered bytes,
    /// end of stream, or a pending error.
    async fn poll_plaintext(&mut self) -> bool {
        if !self.pending.is_empty() || self.eof || self.read_error.is_some() {
            return true;
        }

        self.pending.reserve(READ_AHEAD);
        match tokio::time::timeout(Duration::ZERO, self.stream.read_buf(&mut self.pending)).await {
            Err(_) => false,
            Ok(Ok(0)) => {
                self.eof = true;
                true
            }
            Ok(Ok(n)) => {
                trace!("Read ahead {} plaintext byte(s)", n);
                true
            }
            Ok(Err(e)) if is_transient(&e) => false,
            Ok(Err(e)) => {
                self.read_error = Some(e);
                true
            }
        }
    }
}

#[async_trait]
impl Transport for TlsTransport {
    async fn wait(
        &mut self,
        interest: Readiness,
        timeout: Duration,
    ) -> Result<Option<Readiness>, ApnError> {
        let wants_read = interest.contains(Readiness::READABLE);
        let wants_write = interest.contains(Readiness::WRITABLE);
        let socket_interest = match (wants_read, wants_write) {
            (true, true) => Interest::READABLE | Interest::WRITABLE,
            (false, true) => Interest::WRITABLE,
            _ => Interest::READABLE,
        };
        let deadline = Instant::now() + timeout;

        loop {
            if wants_read && self.poll_plaintext().await {
                return Ok(Some(Readiness::READABLE));
            }

            let tcp = self.stream.get_ref().0;
            let ready = match tokio::time::timeout_at(deadline, tcp.ready(socket_interest)).await {
                Err(_) => return Ok(None),
                Ok(Ok(ready)) => ready,
                Ok(Err(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
                Ok(Err(e)) => return Err(ApnError::SelectFailed(e)),
            };

            // Plaintext that arrived after the poll above still outranks writability.
            if wants_read && ready.is_readable() && self.poll_plaintext().await {
                return Ok(Some(Readiness::READABLE));
            }
            if wants_write && ready.is_writable() {
                return Ok(Some(Readiness::WRITABLE));
            }
            // Readable without plaintext: handshake-only records such as session
            // tickets. Wait again.
        }
    }

    async fn write_all(&mut self, buf: &[u8]) -> Result<(), ApnError> {
        let mut written = 0;
        while written < buf.len() {
            match self.stream.write(&buf[written..]).await {
                Ok(0) => return Err(ApnError::ConnectionClosed),
                Ok(n) => written += n,
                Err(e) if is_transient(&e) => continue,
                Err(e) => return Err(classify_io_error(e, Direction::Write)),
            }
        }

        loop {
            match self.stream.flush().await {
                Ok(()) => return Ok(()),
                Err(e) if is_transient(&e) => continue,
                Err(e) => return Err(classify_io_error(e, Direction::Write)),
            }
        }
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, ApnError> {
        loop {
            if !self.pending.is_empty() {
                let n = buf.len().min(self.pending.len());
                buf[..n].copy_from_slice(&self.pending[..n]);
                self.pending.advance(n);
                return Ok(n);
            }
            if let Some(e) = self.read_error.take() {
                return Err(classify_io_error(e, Direction::Read));
            }
            if self.eof {
                return Err(ApnError::ConnectionClosed);
            }

            self.pending.reserve(READ_AHEAD);
            match self.stream.read_buf(&mut self.pending).await {
                Ok(0) => self.eof = true,
                Ok(_) => {}
                Err(e) if is_transient(&e) => {}
                Err(e) => return Err(classify_io_error(e, Direction::Read)),
            }
        }
    }

    async fn shutdown(&mut self, timeout: Duration) {
        match tokio::time::timeout(timeout, self.stream.shutdown()).await {
            Ok(Ok(())) => return,
            Ok(Err(e)) => debug!("TLS shutdown failed: {}", e),
            Err(_) => debug!("TLS shutdown did not complete within {:?}", timeout),
        }

        self.abort();
        if let Ok(Err(e)) = tokio::time::timeout(timeout, self.stream.shutdown()).await {
            debug!("TLS shutdown retry failed: {}", e);
        }
    }

    fn abort(&mut self) {
        let tcp = self.stream.get_ref().0;
        if let Err(e) = socket2::SockRef::from(tcp).shutdown(std::net::Shutdown::Both) {
            debug!("Socket shutdown failed: {}", e);
        }
    }
}
