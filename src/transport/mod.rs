//! Transport layer for the DCC client.
//!
//! A [`Connection`] owns the write half of one duplex byte stream and a
//! [`FrameReader`] owns the read half. The two halves live in different
//! tasks: the reader feeds the response router, while the handshake,
//! watchdog and dispatcher all write through the same `Connection`.
//!
//! # Architecture
//!
//! ```text
//!   handshake ──┐
//!   watchdog  ──┼──> Connection (write lock) ──> socket
//!   dispatcher ─┘
//!
//!   socket ──> FrameReader ──> ResponseRouter
//! ```
//!
//! Every write encodes one whole message and writes it while holding the
//! write lock, so two logical messages never interleave on the wire.
//! Closing does not wait behind a write the peer never drains: pending and
//! in-progress writes observe the close signal and fail with
//! [`DccError::ConnectionClosed`].

mod tcp;

pub use tcp::TcpTransport;

use std::net::{IpAddr, SocketAddr};
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{watch, Mutex};

use crate::codec::Message;
use crate::error::{DccError, Result};

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Initial read buffer size
const READ_BUFFER_SIZE: usize = 4096;

/// Exclusive handle to the write side of one peer connection.
pub struct Connection {
    /// Peer address as dialed
    peer_addr: String,
    /// Local socket address, if the transport has one
    local_addr: Option<SocketAddr>,
    /// Write half; `None` once closed
    writer: Mutex<Option<BoxedWriter>>,
    /// Closed flag; in-flight writes race against it
    closed: watch::Sender<bool>,
}

impl Connection {
    /// Wrap a write half.
    pub fn new<W>(writer: W, local_addr: Option<SocketAddr>, peer_addr: impl Into<String>) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            peer_addr: peer_addr.into(),
            local_addr,
            writer: Mutex::new(Some(Box::new(writer))),
            closed: watch::channel(false).0,
        }
    }

    /// Split any duplex stream into a connection and its frame reader.
    pub fn from_stream<S>(
        stream: S,
        local_addr: Option<SocketAddr>,
        peer_addr: impl Into<String>,
    ) -> (Self, FrameReader)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read, write) = tokio::io::split(stream);
        (Self::new(write, local_addr, peer_addr), FrameReader::new(read))
    }

    /// Peer address as dialed
    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }

    /// Local socket address
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Local IP, as advertised in Host-IP-Address
    pub fn local_ip(&self) -> Option<IpAddr> {
        self.local_addr.map(|addr| addr.ip())
    }

    /// Check if the connection is closed
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Encode and write one message. Fails once the connection is closed.
    pub async fn write_message(&self, message: &Message) -> Result<usize> {
        if self.is_closed() {
            return Err(DccError::ConnectionClosed);
        }
        let bytes = message.to_bytes()?;

        let mut closed = self.closed.subscribe();
        tokio::select! {
            written = self.write_locked(&bytes) => written?,
            _ = closed.wait_for(|closed| *closed) => return Err(DccError::ConnectionClosed),
        }

        tracing::trace!(
            peer = %self.peer_addr,
            command = message.header.command_code,
            hop_by_hop = message.hop_by_hop(),
            bytes = bytes.len(),
            "wrote message"
        );
        Ok(bytes.len())
    }

    async fn write_locked(&self, bytes: &[u8]) -> Result<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(DccError::ConnectionClosed)?;
        writer.write_all(bytes).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Mark closed without touching the writer (peer went away).
    ///
    /// Writes still in progress are abandoned.
    pub(crate) fn mark_closed(&self) {
        self.closed.send_replace(true);
    }

    /// Close the connection. Idempotent; later writes fail.
    ///
    /// A write stalled on a peer that stopped reading is abandoned rather
    /// than waited for.
    pub async fn close(&self) {
        self.mark_closed();
        // The lock is free once the abandoned write has observed the signal
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.shutdown().await {
                tracing::debug!(peer = %self.peer_addr, "shutdown error: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer_addr", &self.peer_addr)
            .field("local_addr", &self.local_addr)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Splits the inbound byte stream into messages.
pub struct FrameReader {
    reader: BoxedReader,
    buf: BytesMut,
}

impl std::fmt::Debug for FrameReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameReader")
            .field("buffered", &self.buf.len())
            .finish_non_exhaustive()
    }
}

impl FrameReader {
    /// Wrap a read half.
    pub fn new<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            reader: Box::new(reader),
            buf: BytesMut::with_capacity(READ_BUFFER_SIZE),
        }
    }

    /// Read the next complete message.
    ///
    /// Returns `Ok(None)` on a clean end of stream. A stream that ends in
    /// the middle of a message is an error.
    pub async fn next_message(&mut self) -> Result<Option<Message>> {
        loop {
            if let Some(message) = Message::decode_frame(&mut self.buf)? {
                return Ok(Some(message));
            }

            let read = self.reader.read_buf(&mut self.buf).await?;
            if read == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(DccError::Codec(format!(
                    "stream ended with {} bytes of a partial message",
                    self.buf.len()
                )));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{avp_code, Avp, Command, Value};

    fn watchdog(hop: u32) -> Message {
        Message::request(Command::DeviceWatchdog, 0, hop, hop).with_avp(Avp::mandatory(
            avp_code::ORIGIN_HOST,
            Value::DiameterIdentity("client".to_string()),
        ))
    }

    #[tokio::test]
    async fn test_write_then_read_frames() {
        let (client, server) = tokio::io::duplex(1024);
        let (conn, _client_reader) = Connection::from_stream(client, None, "memory");
        let (_server_conn, mut reader) = Connection::from_stream(server, None, "memory");

        conn.write_message(&watchdog(1)).await.unwrap();
        conn.write_message(&watchdog(2)).await.unwrap();

        let first = reader.next_message().await.unwrap().unwrap();
        let second = reader.next_message().await.unwrap().unwrap();
        assert_eq!(first.hop_by_hop(), 1);
        assert_eq!(second.hop_by_hop(), 2);
        assert_eq!(second.origin_host().as_deref(), Some("client"));
    }

    #[tokio::test]
    async fn test_close_abandons_stalled_write() {
        // The peer never reads, so the 32-byte pipe fills mid-message
        let (client, _server) = tokio::io::duplex(32);
        let (conn, _reader) = Connection::from_stream(client, None, "memory");
        let conn = std::sync::Arc::new(conn);
        let large = watchdog(1).with_avp(Avp::mandatory(
            avp_code::PRODUCT_NAME,
            Value::Utf8String("x".repeat(256)),
        ));

        let stalled = {
            let conn = std::sync::Arc::clone(&conn);
            let large = large.clone();
            tokio::spawn(async move { conn.write_message(&large).await })
        };
        let queued = {
            let conn = std::sync::Arc::clone(&conn);
            tokio::spawn(async move { conn.write_message(&large).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!stalled.is_finished());

        tokio::time::timeout(std::time::Duration::from_secs(2), conn.close())
            .await
            .expect("close waited behind a stalled write");
        assert!(matches!(stalled.await.unwrap(), Err(DccError::ConnectionClosed)));
        assert!(matches!(queued.await.unwrap(), Err(DccError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_write_after_close_fails() {
        let (client, _server) = tokio::io::duplex(64);
        let (conn, _reader) = Connection::from_stream(client, None, "memory");

        conn.close().await;
        assert!(conn.is_closed());
        let err = conn.write_message(&watchdog(1)).await.unwrap_err();
        assert!(matches!(err, DccError::ConnectionClosed));

        // Closing twice is fine
        conn.close().await;
    }

    #[tokio::test]
    async fn test_reader_eof() {
        let (client, server) = tokio::io::duplex(64);
        let (_conn, mut reader) = Connection::from_stream(client, None, "memory");
        drop(server);
        assert!(reader.next_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reader_partial_message_is_error() {
        let (client, server) = tokio::io::duplex(64);
        let (_conn, mut reader) = Connection::from_stream(client, None, "memory");
        let (server_read, mut server_write) = tokio::io::split(server);

        let bytes = watchdog(3).to_bytes().unwrap();
        server_write.write_all(&bytes[..12]).await.unwrap();
        server_write.shutdown().await.unwrap();
        drop(server_write);
        drop(server_read);

        assert!(reader.next_message().await.is_err());
    }

    #[test]
    fn test_local_ip() {
        let addr: SocketAddr = "192.168.1.5:40000".parse().unwrap();
        let (client, _server) = tokio::io::duplex(8);
        let (_, write) = tokio::io::split(client);
        let conn = Connection::new(write, Some(addr), "peer:3868");
        assert_eq!(conn.local_ip(), Some("192.168.1.5".parse().unwrap()));
        assert_eq!(conn.peer_addr(), "peer:3868");
    }
}
