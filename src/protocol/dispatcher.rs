//! Credit-Control request dispatch.
//!
//! Callers hand [`Request`]s to a bounded queue. A single task takes them
//! in FIFO order and runs one CCR/CCA exchange at a time: the next request
//! is not written until the previous one has been completed.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

use tokio::sync::{mpsc, oneshot};

use crate::codec::{avp_code, Avp, Command, Message, Value, CREDIT_CONTROL_APP_ID};
use crate::config::SessionConfig;
use crate::error::{DccError, Result};

use super::events::SessionEvent;
use super::handshake::{origin_host, origin_realm};
use super::ids::{IdGenerator, SessionIdGenerator};
use super::session::{closed, Context};

/// An application request the dispatcher can carry.
///
/// `complete` takes the request by value, so each request receives exactly
/// one outcome. The dispatcher keeps no handle to it afterwards: the
/// implementor carries its own read-once notification to the caller, the
/// way [`CreditControlRequest`] pairs with an [`AnswerReceiver`].
///
/// ```
/// use dcc::codec::{avp_code, Avp, Message, Value};
/// use dcc::protocol::Request;
/// use tokio::sync::mpsc;
///
/// struct Numbered {
///     number: u32,
///     done: mpsc::UnboundedSender<(u32, dcc::Result<Message>)>,
/// }
///
/// impl Request for Numbered {
///     fn avps(&self) -> Vec<Avp> {
///         vec![Avp::mandatory(avp_code::CC_REQUEST_NUMBER, Value::Unsigned32(self.number))]
///     }
///
///     fn complete(self: Box<Self>, outcome: dcc::Result<Message>) {
///         let _ = self.done.send((self.number, outcome));
///     }
/// }
///
/// let (done, mut completions) = mpsc::unbounded_channel();
/// let request: Box<dyn Request> = Box::new(Numbered { number: 4, done });
/// assert_eq!(request.avps().len(), 1);
/// request.complete(Err(dcc::DccError::ConnectionClosed));
///
/// let (number, outcome) = completions.try_recv().unwrap();
/// assert_eq!(number, 4);
/// assert!(outcome.is_err());
/// ```
pub trait Request: Send + 'static {
    /// AVPs appended to the CCR after the session and routing AVPs.
    fn avps(&self) -> Vec<Avp>;

    /// Receive the CCA, or the reason there is none.
    fn complete(self: Box<Self>, outcome: Result<Message>);
}

/// Built-in [`Request`] carrying a fixed AVP list.
#[derive(Debug)]
pub struct CreditControlRequest {
    avps: Vec<Avp>,
    tx: oneshot::Sender<Result<Message>>,
}

impl CreditControlRequest {
    /// Create a request and the receiver its answer will arrive on.
    pub fn new(avps: Vec<Avp>) -> (Self, AnswerReceiver) {
        let (tx, rx) = oneshot::channel();
        (Self { avps, tx }, AnswerReceiver { rx })
    }
}

impl Request for CreditControlRequest {
    fn avps(&self) -> Vec<Avp> {
        self.avps.clone()
    }

    fn complete(self: Box<Self>, outcome: Result<Message>) {
        if self.tx.send(outcome).is_err() {
            tracing::debug!("answer receiver dropped before completion");
        }
    }
}

/// Read-once handle to a [`CreditControlRequest`]'s answer.
#[derive(Debug)]
pub struct AnswerReceiver {
    rx: oneshot::Receiver<Result<Message>>,
}

impl Future for AnswerReceiver {
    type Output = Result<Message>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(DccError::ConnectionClosed)))
    }
}

/// Build a CCR.
///
/// Layout: Session-Id, Destination-Host and Destination-Realm (when
/// configured), Origin-Host, Origin-Realm, then `avps` unchanged.
pub fn credit_control_request(
    config: &SessionConfig,
    ids: &IdGenerator,
    session_id: String,
    avps: Vec<Avp>,
) -> Message {
    let mut message = Message::request(
        Command::CreditControl,
        CREDIT_CONTROL_APP_ID,
        ids.next_hop_by_hop(),
        ids.next_end_to_end(),
    )
    .with_avp(Avp::mandatory(avp_code::SESSION_ID, Value::Utf8String(session_id)));

    if let Some(host) = &config.destination_host {
        message.add_avp(Avp::mandatory(
            avp_code::DESTINATION_HOST,
            Value::DiameterIdentity(host.clone()),
        ));
    }
    if let Some(realm) = &config.destination_realm {
        message.add_avp(Avp::mandatory(
            avp_code::DESTINATION_REALM,
            Value::DiameterIdentity(realm.clone()),
        ));
    }
    message.add_avp(origin_host(config)).add_avp(origin_realm(config));
    message.avps.extend(avps);
    message
}

/// Fail every request still in the queue.
pub(crate) fn drain(queue: &mut mpsc::Receiver<Box<dyn Request>>) {
    queue.close();
    let mut failed = 0usize;
    while let Ok(request) = queue.try_recv() {
        request.complete(Err(DccError::ConnectionClosed));
        failed += 1;
    }
    if failed > 0 {
        tracing::debug!(failed, "failed queued requests on close");
    }
}

/// Dispatcher loop; returns once the session is closed.
pub(crate) async fn run(
    ctx: Arc<Context>,
    mut queue: mpsc::Receiver<Box<dyn Request>>,
    session_ids: Arc<SessionIdGenerator>,
) {
    let mut state = ctx.state.clone();
    tracing::debug!("request dispatcher started");

    loop {
        let request = tokio::select! {
            biased;
            _ = closed(&mut state) => break,
            next = queue.recv() => match next {
                Some(request) => request,
                None => break,
            },
        };

        let session_id = session_ids.next();
        let message = credit_control_request(&ctx.config, &ctx.ids, session_id.clone(), request.avps());
        let outcome = ctx.round_trip(message, ctx.config.answer_timeout()).await;
        match &outcome {
            Ok(answer) => {
                tracing::debug!(
                    session_id = %session_id,
                    result_code = ?answer.result_code(),
                    "CCA received"
                );
                ctx.events.publish(SessionEvent::AnswerDelivered(answer.clone()));
            },
            Err(e) => tracing::debug!(session_id = %session_id, "CCR failed: {}", e),
        }
        request.complete(outcome);
    }

    drain(&mut queue);
    tracing::debug!("request dispatcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SessionConfig {
        SessionConfig::new("memory", "client", "localhost")
    }

    #[test]
    fn test_ccr_layout() {
        let config = config().with_destination("srv", "localhost");
        let ids = IdGenerator::with_seeds(1, 2);
        let extra = Avp::mandatory(avp_code::CC_REQUEST_NUMBER, Value::Unsigned32(0));
        let ccr = credit_control_request(&config, &ids, "localhost;OMR1001".to_string(), vec![extra]);

        assert!(ccr.is_request());
        assert_eq!(ccr.command(), Some(Command::CreditControl));
        assert_eq!(ccr.header.application_id, CREDIT_CONTROL_APP_ID);
        let codes: Vec<u32> = ccr.avps.iter().map(|avp| avp.code).collect();
        assert_eq!(
            codes,
            vec![
                avp_code::SESSION_ID,
                avp_code::DESTINATION_HOST,
                avp_code::DESTINATION_REALM,
                avp_code::ORIGIN_HOST,
                avp_code::ORIGIN_REALM,
                avp_code::CC_REQUEST_NUMBER,
            ]
        );
        assert_eq!(ccr.session_id().as_deref(), Some("localhost;OMR1001"));
    }

    #[test]
    fn test_ccr_without_destination() {
        let ids = IdGenerator::with_seeds(1, 2);
        let ccr = credit_control_request(&config(), &ids, "s".to_string(), Vec::new());
        assert!(ccr.find_avp(avp_code::DESTINATION_HOST).is_none());
        assert!(ccr.find_avp(avp_code::DESTINATION_REALM).is_none());
        assert_eq!(ccr.avps.len(), 3);
    }

    #[tokio::test]
    async fn test_request_completes_once() {
        let (request, answer) = CreditControlRequest::new(Vec::new());
        let reply = Message::request(Command::CreditControl, CREDIT_CONTROL_APP_ID, 3, 3)
            .answer(crate::codec::DIAMETER_SUCCESS);
        Box::new(request).complete(Ok(reply));
        assert_eq!(answer.await.unwrap().hop_by_hop(), 3);
    }

    #[test]
    fn test_answer_pending_until_complete() {
        let (request, answer) = CreditControlRequest::new(Vec::new());
        let mut answer = tokio_test::task::spawn(answer);
        tokio_test::assert_pending!(answer.poll());

        let reply = Message::request(Command::CreditControl, CREDIT_CONTROL_APP_ID, 9, 9)
            .answer(crate::codec::DIAMETER_SUCCESS);
        Box::new(request).complete(Ok(reply));
        assert!(answer.is_woken());
        let delivered = tokio_test::assert_ready_ok!(answer.poll());
        assert_eq!(delivered.hop_by_hop(), 9);
    }

    #[tokio::test]
    async fn test_dropped_request_reports_closed() {
        let (request, answer) = CreditControlRequest::new(Vec::new());
        drop(request);
        assert!(matches!(answer.await, Err(DccError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_drain_fails_queued() {
        let (tx, mut rx) = mpsc::channel::<Box<dyn Request>>(4);
        let (first, first_answer) = CreditControlRequest::new(Vec::new());
        let (second, second_answer) = CreditControlRequest::new(Vec::new());
        tx.send(Box::new(first)).await.unwrap();
        tx.send(Box::new(second)).await.unwrap();

        drain(&mut rx);
        assert!(matches!(first_answer.await, Err(DccError::ConnectionClosed)));
        assert!(matches!(second_answer.await, Err(DccError::ConnectionClosed)));
        let (third, _) = CreditControlRequest::new(Vec::new());
        assert!(tx.send(Box::new(third)).await.is_err());
    }
}
