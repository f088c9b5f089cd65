//! Correlation of inbound answers with outstanding requests.
//!
//! Each request registers a one-shot slot under its hop-by-hop id before it
//! is written. The reader task hands every inbound answer to
//! [`ResponseRouter::route`], which completes the matching slot exactly
//! once. Answers nobody waits for are logged and dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::codec::{Command, Message};
use crate::error::{DccError, Result};

struct Pending {
    command: Command,
    token: u64,
    tx: oneshot::Sender<Result<Message>>,
}

/// Result of routing one inbound message.
#[derive(Debug)]
pub enum Routed {
    /// Answer handed to its waiter
    Delivered,
    /// Inbound request; the caller decides how to answer it
    PeerRequest(Message),
    /// Answer with no matching waiter
    Unmatched(Message),
}

/// Hop-by-hop keyed table of outstanding requests.
#[derive(Default)]
pub struct ResponseRouter {
    pending: Mutex<HashMap<u32, Pending>>,
    next_token: AtomicU64,
}

impl ResponseRouter {
    /// Create an empty router
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> std::sync::MutexGuard<'_, HashMap<u32, Pending>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register interest in the answer to `command` carrying `hop_by_hop`.
    ///
    /// A previous registration under the same id is failed and replaced.
    pub fn register(self: &Arc<Self>, command: Command, hop_by_hop: u32) -> AnswerWaiter {
        let (tx, rx) = oneshot::channel();
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let replaced = self.table().insert(hop_by_hop, Pending { command, token, tx });
        if let Some(old) = replaced {
            tracing::warn!(hop_by_hop, command = %old.command, "hop-by-hop id reused");
            let _ = old
                .tx
                .send(Err(DccError::Protocol(format!("hop-by-hop id {} reused", hop_by_hop))));
        }
        AnswerWaiter {
            router: Arc::clone(self),
            command,
            hop_by_hop,
            token,
            rx,
        }
    }

    fn release(&self, hop_by_hop: u32, token: u64) {
        let mut table = self.table();
        if table.get(&hop_by_hop).is_some_and(|pending| pending.token == token) {
            table.remove(&hop_by_hop);
        }
    }

    /// Complete one registration with an error.
    pub fn fail(&self, hop_by_hop: u32, err: DccError) {
        if let Some(pending) = self.table().remove(&hop_by_hop) {
            let _ = pending.tx.send(Err(err));
        }
    }

    /// Complete every registration with [`DccError::ConnectionClosed`].
    pub fn fail_all(&self) {
        let drained: Vec<Pending> = self.table().drain().map(|(_, pending)| pending).collect();
        if !drained.is_empty() {
            tracing::debug!(count = drained.len(), "failing outstanding requests");
        }
        for pending in drained {
            let _ = pending.tx.send(Err(DccError::ConnectionClosed));
        }
    }

    /// Route an inbound message.
    pub fn route(&self, message: Message) -> Routed {
        if message.is_request() {
            return Routed::PeerRequest(message);
        }

        let hop_by_hop = message.hop_by_hop();
        let mut table = self.table();
        let expected = match table.get(&hop_by_hop) {
            Some(pending) => pending.command,
            None => return Routed::Unmatched(message),
        };
        if message.header.command_code != expected.code() {
            tracing::warn!(
                hop_by_hop,
                expected = %expected,
                got = message.header.command_code,
                "answer command does not match request"
            );
            return Routed::Unmatched(message);
        }
        let Some(pending) = table.remove(&hop_by_hop) else {
            return Routed::Unmatched(message);
        };
        drop(table);

        if pending.tx.send(Ok(message)).is_err() {
            tracing::debug!(hop_by_hop, command = %expected, "waiter gone before answer arrived");
        }
        Routed::Delivered
    }

    /// Number of outstanding registrations
    pub fn pending_count(&self) -> usize {
        self.table().len()
    }
}

impl std::fmt::Debug for ResponseRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseRouter")
            .field("pending", &self.pending_count())
            .finish()
    }
}

/// Receiving end of one registration.
///
/// Dropping the waiter removes its registration, so an abandoned request
/// never leaves a stale entry behind.
#[derive(Debug)]
pub struct AnswerWaiter {
    router: Arc<ResponseRouter>,
    command: Command,
    hop_by_hop: u32,
    token: u64,
    rx: oneshot::Receiver<Result<Message>>,
}

impl AnswerWaiter {
    /// Command this waiter expects
    pub fn command(&self) -> Command {
        self.command
    }

    /// Hop-by-hop id this waiter is registered under
    pub fn hop_by_hop(&self) -> u32 {
        self.hop_by_hop
    }

    /// Wait for the answer, optionally bounded by `timeout`.
    pub async fn wait(mut self, timeout: Option<Duration>) -> Result<Message> {
        let received = match timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut self.rx).await {
                Ok(received) => received,
                Err(_) => {
                    return Err(DccError::Timeout(format!(
                        "{} (hop-by-hop {:#010x}) after {:?}",
                        self.command.answer_name(),
                        self.hop_by_hop,
                        limit
                    )))
                },
            },
            None => (&mut self.rx).await,
        };
        received.unwrap_or(Err(DccError::ConnectionClosed))
    }
}

impl Drop for AnswerWaiter {
    fn drop(&mut self) {
        self.router.release(self.hop_by_hop, self.token);
    }
}
