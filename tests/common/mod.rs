//! Scripted Diameter peer for integration tests.
//!
//! Listens on `127.0.0.1:0`, accepts one connection and answers CER, DWR
//! and CCR according to a [`PeerBehavior`]. Every message it receives is
//! recorded with its arrival time.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dcc::codec::{avp_code, Avp, Command, Message, Value, DIAMETER_SUCCESS};
use dcc::config::SessionConfig;
use dcc::protocol::SessionEvent;
use dcc::transport::Connection;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Upper bound for any single wait in the tests
pub const WAIT: Duration = Duration::from_secs(2);

/// How the peer reacts to requests
#[derive(Debug, Clone)]
pub struct PeerBehavior {
    pub answer_cer: bool,
    pub answer_dwr: bool,
    pub answer_ccr: bool,
    pub ccr_delay: Duration,
}

impl Default for PeerBehavior {
    fn default() -> Self {
        Self {
            answer_cer: true,
            answer_dwr: true,
            answer_ccr: true,
            ccr_delay: Duration::ZERO,
        }
    }
}

/// A received message and when it arrived
#[derive(Debug, Clone)]
pub struct Received {
    pub at: Instant,
    pub message: Message,
}

pub struct ScriptedPeer {
    pub addr: SocketAddr,
    received: mpsc::UnboundedReceiver<Received>,
    outbound: mpsc::UnboundedSender<Message>,
    task: JoinHandle<()>,
}

impl ScriptedPeer {
    /// Start listening; the peer serves the first connection only.
    pub async fn spawn(behavior: PeerBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (received_tx, received) = mpsc::unbounded_channel();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

        let task = tokio::spawn(async move {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let (conn, mut reader) = Connection::from_stream(stream, None, "client");
            let conn = Arc::new(conn);

            loop {
                tokio::select! {
                    next = reader.next_message() => {
                        let Ok(Some(message)) = next else { break };
                        let _ = received_tx.send(Received {
                            at: Instant::now(),
                            message: message.clone(),
                        });
                        if message.is_request() {
                            respond(&conn, &behavior, message);
                        }
                    }
                    Some(message) = outbound_rx.recv() => {
                        let _ = conn.write_message(&message).await;
                    }
                }
            }
        });

        Self {
            addr,
            received,
            outbound,
            task,
        }
    }

    /// Peer address as a `host:port` string
    pub fn url(&self) -> String {
        self.addr.to_string()
    }

    /// Next received message of `command`, skipping others.
    pub async fn expect(&mut self, command: Command, is_request: bool) -> Received {
        let deadline = Instant::now() + WAIT;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let received = timeout(remaining, self.received.recv())
                .await
                .unwrap_or_else(|_| panic!("no {:?} from the client", command))
                .expect("peer stopped");
            if received.message.command() == Some(command) && received.message.is_request() == is_request {
                return received;
            }
        }
    }

    /// Everything received so far
    pub fn drain(&mut self) -> Vec<Received> {
        let mut all = Vec::new();
        while let Ok(received) = self.received.try_recv() {
            all.push(received);
        }
        all
    }

    /// Write a message to the client
    pub fn send(&self, message: Message) {
        self.outbound.send(message).unwrap();
    }

    /// Drop the connection
    pub fn shutdown(&self) {
        self.task.abort();
    }
}

impl Drop for ScriptedPeer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn peer_identity(answer: Message) -> Message {
    answer
        .with_avp(Avp::mandatory(
            avp_code::ORIGIN_HOST,
            Value::DiameterIdentity("srv".to_string()),
        ))
        .with_avp(Avp::mandatory(
            avp_code::ORIGIN_REALM,
            Value::DiameterIdentity("localhost".to_string()),
        ))
}

fn respond(conn: &Arc<Connection>, behavior: &PeerBehavior, request: Message) {
    let (answer, delay) = match request.command() {
        Some(Command::CapabilitiesExchange) if behavior.answer_cer => {
            let answer = peer_identity(request.answer(DIAMETER_SUCCESS))
                .with_avp(Avp::mandatory(
                    avp_code::HOST_IP_ADDRESS,
                    Value::Address(Some("127.0.0.1".parse().unwrap())),
                ))
                .with_avp(Avp::mandatory(avp_code::VENDOR_ID, Value::Unsigned32(0)))
                .with_avp(Avp::mandatory(
                    avp_code::PRODUCT_NAME,
                    Value::Utf8String("scripted-peer".to_string()),
                ));
            (answer, Duration::ZERO)
        },
        Some(Command::DeviceWatchdog) if behavior.answer_dwr => {
            (peer_identity(request.answer(DIAMETER_SUCCESS)), Duration::ZERO)
        },
        Some(Command::CreditControl) if behavior.answer_ccr => {
            let mut answer = peer_identity(request.answer(DIAMETER_SUCCESS));
            if let Some(number) = request.find_avp(avp_code::CC_REQUEST_NUMBER) {
                answer.add_avp(number.clone());
            }
            (answer, behavior.ccr_delay)
        },
        _ => return,
    };

    let conn = Arc::clone(conn);
    tokio::spawn(async move {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let _ = conn.write_message(&answer).await;
    });
}

/// Client configuration used by the end-to-end scenarios
pub fn client_config(url: impl Into<String>) -> SessionConfig {
    SessionConfig::new(url, "client", "localhost")
        .with_destination("srv", "localhost")
        .with_watchdog_interval(Duration::from_millis(100))
}

/// Next event matching `pred`, failing on any error event seen first.
pub async fn next_event<F>(events: &mut broadcast::Receiver<SessionEvent>, mut pred: F) -> SessionEvent
where
    F: FnMut(&SessionEvent) -> bool,
{
    let deadline = Instant::now() + WAIT;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let event = timeout(remaining, events.recv())
            .await
            .expect("timed out waiting for session event")
            .expect("event stream closed or lagged");
        if let SessionEvent::Error(err) = &event {
            panic!("unexpected error event: {}", err);
        }
        if pred(&event) {
            return event;
        }
    }
}

/// All events currently buffered
pub fn buffered_events(events: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut all = Vec::new();
    while let Ok(event) = events.try_recv() {
        all.push(event);
    }
    all
}
