//! DCC client error types.
//!
//! Only a dial failure is fatal, and only to the call that triggered it.
//! Write failures inside the protocol loops are reported on the event
//! stream (see [`crate::protocol::EventSink`]) and, depending on the
//! configured [`WriteFailurePolicy`](crate::config::WriteFailurePolicy),
//! also handed to the waiter that owned the failed request.

use thiserror::Error;

use crate::protocol::SessionState;

/// DCC client errors.
#[derive(Error, Debug)]
pub enum DccError {
    /// Dialing the peer failed.
    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        /// Peer address that was dialed.
        addr: String,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The connection has been closed locally or by the peer.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Malformed message or AVP.
    #[error("Codec error: {0}")]
    Codec(String),

    /// Protocol-level violation (unexpected message, missing handshake, ...).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A configured deadline expired before the answer arrived.
    #[error("Timed out waiting for {0}")]
    Timeout(String),

    /// The session is not in a state that allows the operation.
    #[error("Session not ready: {0:?}")]
    SessionNotReady(SessionState),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for DCC operations
pub type Result<T> = std::result::Result<T, DccError>;

impl From<toml::de::Error> for DccError {
    fn from(err: toml::de::Error) -> Self {
        DccError::Config(err.to_string())
    }
}

impl DccError {
    /// True for failures caused by the transport going away.
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::ConnectionClosed => true,
            Self::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}
