//! Session events and the error sink.
//!
//! Every completed exchange and every failure is published on a bounded
//! broadcast channel. Slow subscribers lose the oldest events
//! (`RecvError::Lagged`); the protocol loops never block on them.
//! Failures are also logged through `tracing` when they are reported, so a
//! session with no subscribers still leaves a trail.

use std::fmt;
use std::time::Instant;

use tokio::sync::broadcast;

use crate::codec::{Command, Message};
use crate::error::DccError;

/// Failure category carried by [`SessionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The request could not be written
    Write,
    /// No answer arrived within the configured timeout
    Timeout,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Write => f.write_str("write"),
            Self::Timeout => f.write_str("timeout"),
        }
    }
}

/// A reported protocol failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionError {
    /// Exchange the failure belongs to
    pub command: Command,
    /// What went wrong
    pub kind: FailureKind,
    /// Underlying error text
    pub message: String,
}

impl SessionError {
    /// Failure to write a request or answer
    pub fn write(command: Command, err: &DccError) -> Self {
        Self {
            command,
            kind: FailureKind::Write,
            message: err.to_string(),
        }
    }

    /// Answer deadline passed
    pub fn timeout(command: Command, err: &DccError) -> Self {
        Self {
            command,
            kind: FailureKind::Timeout,
            message: err.to_string(),
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} failure: {}", self.command.request_name(), self.kind, self.message)
    }
}

impl std::error::Error for SessionError {}

/// Observable session event.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A write or timeout failure
    Error(SessionError),
    /// CEA received
    HandshakeCompleted(Message),
    /// DWA received
    WatchdogCompleted(Message),
    /// Liveness tick, published after every completed watchdog exchange
    Alive {
        /// Watchdog round, starting at 1
        tick: u64,
        /// When the round completed
        at: Instant,
    },
    /// CCA received and handed to its request
    AnswerDelivered(Message),
}

impl SessionEvent {
    /// Check if this is an error event
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

/// Bounded fan-out for [`SessionEvent`]s.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventSink {
    /// Create a sink retaining at most `capacity` undelivered events per
    /// subscriber. `capacity` must be non-zero.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// New subscriber; sees events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    /// Publish without waiting. Events with no subscriber are dropped.
    pub fn publish(&self, event: SessionEvent) {
        let _ = self.tx.send(event);
    }

    /// Log and publish a failure.
    pub fn report(&self, error: SessionError) {
        tracing::error!(
            command = %error.command,
            kind = %error.kind,
            "{}",
            error.message
        );
        self.publish(SessionEvent::Error(error));
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_subscribers() {
        let sink = EventSink::new(4);
        assert_eq!(sink.subscriber_count(), 0);
        sink.report(SessionError::write(Command::DeviceWatchdog, &DccError::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_report_reaches_subscriber() {
        let sink = EventSink::new(4);
        let mut rx = sink.subscribe();

        sink.report(SessionError::timeout(
            Command::CreditControl,
            &DccError::Timeout("CCA".into()),
        ));

        match rx.recv().await.unwrap() {
            SessionEvent::Error(err) => {
                assert_eq!(err.command, Command::CreditControl);
                assert_eq!(err.kind, FailureKind::Timeout);
                assert!(err.message.contains("CCA"));
            },
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_slow_subscriber_lags() {
        let sink = EventSink::new(2);
        let mut rx = sink.subscribe();
        for tick in 1..=5 {
            sink.publish(SessionEvent::Alive {
                tick,
                at: Instant::now(),
            });
        }
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Lagged(3))
        ));
        match rx.recv().await.unwrap() {
            SessionEvent::Alive { tick, .. } => assert_eq!(tick, 4),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_error_display() {
        let err = SessionError::write(Command::CapabilitiesExchange, &DccError::ConnectionClosed);
        assert_eq!(err.to_string(), "CER write failure: Connection closed");
        assert!(SessionEvent::Error(err).is_error());
    }
}
