//! TCP transport implementation.
//!
//! Dials the peer once; there is no reconnect logic.

use std::time::Duration;

use tokio::net::TcpStream;

use super::{Connection, FrameReader};
use crate::error::{DccError, Result};

/// TCP dialer for one Diameter peer.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    /// Peer address (`host:port`)
    addr: String,
    /// Give up dialing after this long
    connect_timeout: Option<Duration>,
}

impl TcpTransport {
    /// Create a new TCP transport.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout: None,
        }
    }

    /// Bound the dial with a timeout.
    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Peer address
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Open the connection.
    pub async fn dial(&self) -> Result<(Connection, FrameReader)> {
        let connect = TcpStream::connect(self.addr.as_str());
        let stream = match self.connect_timeout {
            Some(timeout) => tokio::time::timeout(timeout, connect)
                .await
                .map_err(|_| DccError::Connect {
                    addr: self.addr.clone(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        format!("no connection after {:?}", timeout),
                    ),
                })?,
            None => connect.await,
        }
        .map_err(|source| DccError::Connect {
            addr: self.addr.clone(),
            source,
        })?;

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(peer = %self.addr, "set_nodelay failed: {}", e);
        }

        // Host-IP-Address falls back to empty when the socket cannot tell us.
        let local_addr = match stream.local_addr() {
            Ok(addr) => Some(addr),
            Err(e) => {
                tracing::warn!(peer = %self.addr, "local address unavailable: {}", e);
                None
            },
        };
        tracing::info!(peer = %self.addr, local = ?local_addr, "TCP connection established");

        let (read, write) = stream.into_split();
        Ok((
            Connection::new(write, local_addr, self.addr.clone()),
            FrameReader::new(read),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_dial_reports_local_addr() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap() });

        let transport = TcpTransport::new(addr.clone()).with_connect_timeout(Some(Duration::from_secs(2)));
        let (conn, _reader) = transport.dial().await.unwrap();
        assert_eq!(conn.peer_addr(), addr);
        assert_eq!(conn.local_ip(), Some("127.0.0.1".parse().unwrap()));
        assert!(!conn.is_closed());

        accept.await.unwrap();
    }

    #[tokio::test]
    async fn test_dial_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = TcpTransport::new(addr).dial().await.unwrap_err();
        assert!(matches!(err, DccError::Connect { .. }));
    }
}
