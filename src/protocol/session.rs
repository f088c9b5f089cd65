//! Session lifecycle for one Diameter peer connection.
//!
//! A [`Session`] dials the peer, installs the response router and reader
//! task, performs the capabilities exchange and, once the CEA has arrived,
//! starts the watchdog loop and the request dispatcher. All three share the
//! same [`Connection`] and report through the same [`EventSink`].

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use super::dispatcher::{self, AnswerReceiver, CreditControlRequest, Request};
use super::events::{EventSink, SessionError, SessionEvent};
use super::handshake;
use super::ids::{IdGenerator, SessionIdGenerator};
use super::router::{AnswerWaiter, ResponseRouter, Routed};
use super::watchdog;
use crate::codec::{Avp, Command, Message, DIAMETER_SUCCESS};
use crate::config::{SessionConfig, WriteFailurePolicy};
use crate::error::{DccError, Result};
use crate::transport::{Connection, FrameReader, TcpTransport};

/// Session state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Not connected, or connected but no CER sent yet
    Disconnected,
    /// CER sent, waiting for CEA
    Handshaking,
    /// Handshake done; watchdog and dispatcher running
    Ready,
    /// Session closed
    Closed,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Resolves once `state` reaches [`SessionState::Closed`] or its sender is gone.
pub(crate) async fn closed(state: &mut watch::Receiver<SessionState>) {
    let _ = state.wait_for(|s| *s == SessionState::Closed).await;
}

/// Everything the per-connection tasks share.
pub(crate) struct Context {
    pub(crate) config: Arc<SessionConfig>,
    pub(crate) connection: Arc<Connection>,
    pub(crate) router: Arc<ResponseRouter>,
    pub(crate) events: EventSink,
    pub(crate) ids: IdGenerator,
    pub(crate) state: watch::Receiver<SessionState>,
}

impl Context {
    /// Register `request` with the router, then write it.
    ///
    /// A write failure is always reported on the event sink. Under
    /// [`WriteFailurePolicy::AwaitAnswer`] the waiter is still returned;
    /// under [`WriteFailurePolicy::FailFast`] it is dropped and the write
    /// error returned instead.
    pub(crate) async fn send(&self, request: &Message) -> Result<AnswerWaiter> {
        let command = request.command().ok_or_else(|| {
            DccError::Protocol(format!("unknown command code {}", request.header.command_code))
        })?;
        let waiter = self.router.register(command, request.hop_by_hop());

        match self.connection.write_message(request).await {
            Ok(bytes) => {
                tracing::debug!(
                    command = command.request_name(),
                    hop_by_hop = request.hop_by_hop(),
                    bytes,
                    "request sent"
                );
                Ok(waiter)
            },
            Err(err) => {
                self.events.report(SessionError::write(command, &err));
                match self.config.write_failure_policy {
                    WriteFailurePolicy::AwaitAnswer => Ok(waiter),
                    WriteFailurePolicy::FailFast => Err(err),
                }
            },
        }
    }

    /// Wait for an answer, reporting a timeout on the event sink.
    ///
    /// Closing the session ends the wait with [`DccError::ConnectionClosed`].
    pub(crate) async fn wait(&self, waiter: AnswerWaiter, timeout: Option<Duration>) -> Result<Message> {
        let command = waiter.command();
        let mut state = self.state.clone();
        let outcome = tokio::select! {
            outcome = waiter.wait(timeout) => outcome,
            _ = closed(&mut state) => Err(DccError::ConnectionClosed),
        };
        if let Err(err @ DccError::Timeout(_)) = &outcome {
            self.events.report(SessionError::timeout(command, err));
        }
        outcome
    }

    /// Send a request and wait for its answer.
    pub(crate) async fn round_trip(&self, request: Message, timeout: Option<Duration>) -> Result<Message> {
        let waiter = self.send(&request).await?;
        self.wait(waiter, timeout).await
    }

    /// Check if the session has been closed
    pub(crate) fn is_closed(&self) -> bool {
        *self.state.borrow() == SessionState::Closed
    }
}

async fn read_loop(ctx: Arc<Context>, mut reader: FrameReader) {
    let peer = ctx.connection.peer_addr().to_string();
    loop {
        let message = match reader.next_message().await {
            Ok(Some(message)) => message,
            Ok(None) => {
                tracing::info!(peer = %peer, "peer closed the connection");
                break;
            },
            Err(e) => {
                tracing::error!(peer = %peer, "read failed: {}", e);
                break;
            },
        };

        match ctx.router.route(message) {
            Routed::Delivered => {},
            Routed::PeerRequest(request) => match request.command() {
                Some(Command::DeviceWatchdog) => {
                    let ctx = Arc::clone(&ctx);
                    tokio::spawn(async move { watchdog::answer_peer(&ctx, &request).await });
                },
                _ => tracing::warn!(
                    peer = %peer,
                    command = request.header.command_code,
                    "ignoring unsupported peer request"
                ),
            },
            Routed::Unmatched(answer) => tracing::warn!(
                peer = %peer,
                command = answer.header.command_code,
                hop_by_hop = answer.hop_by_hop(),
                "dropping unmatched answer"
            ),
        }
    }

    ctx.connection.mark_closed();
    ctx.router.fail_all();
}

struct Shared {
    config: Arc<SessionConfig>,
    state: watch::Sender<SessionState>,
    events: EventSink,
    router: Arc<ResponseRouter>,
    session_ids: Arc<SessionIdGenerator>,
    context: Mutex<Option<Arc<Context>>>,
    handshake: Mutex<Option<Result<AnswerWaiter>>>,
    queue_tx: mpsc::Sender<Box<dyn Request>>,
    queue_rx: Mutex<Option<mpsc::Receiver<Box<dyn Request>>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    loops: Mutex<Vec<JoinHandle<()>>>,
}

/// Client-side credit-control session.
///
/// Cheap to clone; all clones drive the same connection.
///
/// # Example
///
/// ```rust,no_run
/// use dcc::config::SessionConfig;
/// use dcc::protocol::Session;
///
/// # async fn run() -> dcc::Result<()> {
/// let config = SessionConfig::new("127.0.0.1:3868", "client", "localhost")
///     .with_destination("srv", "localhost");
/// let session = Session::new(config)?;
/// session.start().await?;
/// session.init().await?;
///
/// let answer = session.call(Vec::new()).await?;
/// println!("Result-Code: {:?}", answer.result_code());
/// session.close().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Session {
    shared: Arc<Shared>,
}

impl Session {
    /// Create a session. Nothing is dialed until [`Session::start`].
    pub fn new(config: SessionConfig) -> Result<Self> {
        config.validate()?;
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity);
        let (state, _) = watch::channel(SessionState::Disconnected);
        let session_ids = Arc::new(SessionIdGenerator::new(config.origin_realm.clone()));
        let events = EventSink::new(config.event_capacity);

        Ok(Self {
            shared: Arc::new(Shared {
                config: Arc::new(config),
                state,
                events,
                router: Arc::new(ResponseRouter::new()),
                session_ids,
                context: Mutex::new(None),
                handshake: Mutex::new(None),
                queue_tx,
                queue_rx: Mutex::new(Some(queue_rx)),
                reader: Mutex::new(None),
                loops: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Dial the configured peer and start routing inbound messages.
    pub async fn start(&self) -> Result<()> {
        self.ensure_unstarted()?;
        let config = &self.shared.config;
        let transport = TcpTransport::new(config.url.clone()).with_connect_timeout(config.connect_timeout());
        let (connection, reader) = transport.dial().await?;
        self.attach(connection, reader)
    }

    /// Run the session over an already open stream instead of dialing.
    pub fn start_with_stream<S>(&self, stream: S, local_addr: Option<SocketAddr>) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.ensure_unstarted()?;
        let (connection, reader) = Connection::from_stream(stream, local_addr, self.shared.config.url.clone());
        self.attach(connection, reader)
    }

    fn ensure_unstarted(&self) -> Result<()> {
        match self.state() {
            SessionState::Disconnected => Ok(()),
            state => Err(DccError::SessionNotReady(state)),
        }
    }

    fn attach(&self, connection: Connection, reader: FrameReader) -> Result<()> {
        let mut slot = lock(&self.shared.context);
        if slot.is_some() {
            return Err(DccError::Protocol("session already started".to_string()));
        }
        let ctx = Arc::new(Context {
            config: Arc::clone(&self.shared.config),
            connection: Arc::new(connection),
            router: Arc::clone(&self.shared.router),
            events: self.shared.events.clone(),
            ids: IdGenerator::new(),
            state: self.shared.state.subscribe(),
        });
        *slot = Some(Arc::clone(&ctx));
        drop(slot);

        tracing::info!(peer = %ctx.connection.peer_addr(), "session started");
        let handle = tokio::spawn(read_loop(ctx, reader));
        *lock(&self.shared.reader) = Some(handle);
        Ok(())
    }

    fn context(&self) -> Result<Arc<Context>> {
        lock(&self.shared.context)
            .clone()
            .ok_or_else(|| DccError::SessionNotReady(self.state()))
    }

    fn transition(&self, from: SessionState, to: SessionState) -> Result<()> {
        let mut outcome = Ok(());
        self.shared.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                outcome = Err(DccError::SessionNotReady(*state));
                false
            }
        });
        if outcome.is_ok() {
            tracing::debug!(from = ?from, to = ?to, "session state changed");
        }
        outcome
    }

    /// Send the CER. Only allowed once, right after [`Session::start`].
    ///
    /// A write failure is reported on the event stream and does not fail
    /// this call; it surfaces from [`Session::await_capability_answer`]
    /// under [`WriteFailurePolicy::FailFast`].
    pub async fn send_capability_request(&self) -> Result<()> {
        let ctx = self.context()?;
        self.transition(SessionState::Disconnected, SessionState::Handshaking)?;

        let request = handshake::capability_request(&ctx.config, ctx.connection.local_ip(), &ctx.ids);
        let pending = ctx.send(&request).await;
        *lock(&self.shared.handshake) = Some(pending);
        Ok(())
    }

    /// Wait for the CEA. Resolves at most once per handshake.
    pub async fn await_capability_answer(&self) -> Result<Message> {
        let ctx = self.context()?;
        let pending = lock(&self.shared.handshake)
            .take()
            .ok_or_else(|| DccError::Protocol("no capability request outstanding".to_string()))?;
        let answer = ctx.wait(pending?, ctx.config.handshake_timeout()).await?;

        match answer.result_code() {
            Some(DIAMETER_SUCCESS) => {},
            code => tracing::warn!(result_code = ?code, "CEA without success result"),
        }
        tracing::info!(
            peer = %ctx.connection.peer_addr(),
            origin_host = ?answer.origin_host(),
            "capability exchange completed"
        );
        ctx.events.publish(SessionEvent::HandshakeCompleted(answer.clone()));
        Ok(answer)
    }

    /// Run the handshake, then start the watchdog and the dispatcher.
    pub async fn init(&self) -> Result<()> {
        self.send_capability_request().await?;
        self.await_capability_answer().await?;

        let ctx = self.context()?;
        self.transition(SessionState::Handshaking, SessionState::Ready)?;

        // `close` publishes Closed before collecting the handles, so checking
        // under the lock means the loops are either joined by it or never spawned.
        let mut loops = lock(&self.shared.loops);
        if ctx.is_closed() {
            return Err(DccError::ConnectionClosed);
        }
        let queue = lock(&self.shared.queue_rx)
            .take()
            .ok_or_else(|| DccError::Protocol("request dispatcher already running".to_string()))?;
        loops.push(tokio::spawn(watchdog::run(Arc::clone(&ctx))));
        loops.push(tokio::spawn(dispatcher::run(
            ctx,
            queue,
            Arc::clone(&self.shared.session_ids),
        )));
        drop(loops);

        tracing::info!(
            interval = ?self.shared.config.watchdog_interval(),
            "session ready"
        );
        Ok(())
    }

    /// Queue a request. Waits while the queue is full.
    ///
    /// Requests queued before [`Session::init`] are sent once the session
    /// is ready.
    pub async fn submit<R: Request>(&self, request: R) -> Result<()> {
        if self.state() == SessionState::Closed {
            return Err(DccError::ConnectionClosed);
        }
        self.shared
            .queue_tx
            .send(Box::new(request))
            .await
            .map_err(|_| DccError::ConnectionClosed)
    }

    /// Queue a [`CreditControlRequest`] and return its answer receiver.
    pub async fn submit_avps(&self, avps: Vec<Avp>) -> Result<AnswerReceiver> {
        let (request, answer) = CreditControlRequest::new(avps);
        self.submit(request).await?;
        Ok(answer)
    }

    /// Send a CCR carrying `avps` and wait for the CCA.
    pub async fn call(&self, avps: Vec<Avp>) -> Result<Message> {
        self.submit_avps(avps).await?.await
    }

    /// Subscribe to session events
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    /// Watch state changes
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// Session configuration
    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    /// Local address of the connection, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        lock(&self.shared.context)
            .as_ref()
            .and_then(|ctx| ctx.connection.local_addr())
    }

    /// Number of requests waiting for an answer
    pub fn pending_answers(&self) -> usize {
        self.shared.router.pending_count()
    }

    /// Close the session.
    ///
    /// Stops the loops, shuts the connection and fails every outstanding
    /// waiter and queued request with [`DccError::ConnectionClosed`].
    /// A write stalled on an unresponsive peer is abandoned. Idempotent.
    pub async fn close(&self) {
        let previous = self.shared.state.send_replace(SessionState::Closed);
        if previous == SessionState::Closed {
            return;
        }

        let ctx = lock(&self.shared.context).clone();
        if let Some(ctx) = ctx {
            ctx.connection.close().await;
        }
        if let Some(reader) = lock(&self.shared.reader).take() {
            reader.abort();
        }
        self.shared.router.fail_all();

        if let Some(mut queue) = lock(&self.shared.queue_rx).take() {
            dispatcher::drain(&mut queue);
        }

        let loops: Vec<JoinHandle<()>> = lock(&self.shared.loops).drain(..).collect();
        for handle in loops {
            if let Err(e) = handle.await {
                tracing::debug!("session task ended abnormally: {}", e);
            }
        }
        tracing::info!(previous = ?previous, "session closed");
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        // The reader keeps the connection alive; the loops stop on their own
        // once the state sender is gone.
        let reader = self.reader.get_mut().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(reader) = reader {
            reader.abort();
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("url", &self.shared.config.url)
            .field("state", &self.state())
            .field("pending_answers", &self.pending_answers())
            .finish_non_exhaustive()
    }
}
