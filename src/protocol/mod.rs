//! Diameter credit-control session coordination.
//!
//! Implements the client side of one peer connection: the
//! Capabilities-Exchange gate, the Device-Watchdog keep-alive and a
//! single-flight Credit-Control dispatcher, all sharing one connection.
//!
//! # Message Flow
//!
//! ```text
//! Client                            Peer
//!    |                                |
//!    |-------- CER ----------------->|  Capabilities exchange
//!    |<------- CEA ------------------|  Session ready
//!    |                                |
//!    |-------- DWR ----------------->|  Every watchdog interval
//!    |<------- DWA ------------------|
//!    |<------- DWR ------------------|  Peer-initiated keep-alive
//!    |-------- DWA ----------------->|
//!    |                                |
//!    |-------- CCR ----------------->|  One at a time, FIFO
//!    |<------- CCA ------------------|
//! ```
//!
//! ## State Machine
//!
//! | State          | Description                         | Valid Transitions |
//! |----------------|-------------------------------------|-------------------|
//! | `Disconnected` | Created or started, no CER sent yet | → Handshaking     |
//! | `Handshaking`  | CER sent, waiting for CEA           | → Ready           |
//! | `Ready`        | Watchdog and dispatcher running     | → Closed          |
//! | `Closed`       | Connection shut, waiters failed     | (terminal)        |
//!
//! Any state can move to `Closed` through [`Session::close`].
//!
//! ## Correlation
//!
//! Every outbound request registers a one-shot slot under its hop-by-hop
//! id in the [`ResponseRouter`] before it is written. The reader task
//! completes the slot when the matching answer arrives; answers with an
//! unknown id or the wrong command are logged and dropped.
//!
//! ## Write Failures
//!
//! Every failed write is reported once on the event stream. What happens
//! to the request afterwards is chosen by
//! [`WriteFailurePolicy`](crate::config::WriteFailurePolicy).
//!
//! # Usage
//!
//! ```rust,no_run
//! use dcc::codec::{avp_code, Avp, Value};
//! use dcc::config::SessionConfig;
//! use dcc::protocol::{Session, SessionEvent};
//!
//! # async fn run() -> dcc::Result<()> {
//! let session = Session::new(SessionConfig::new("127.0.0.1:3868", "client", "localhost"))?;
//! let mut events = session.events();
//! session.start().await?;
//! session.init().await?;
//!
//! let answer = session
//!     .call(vec![Avp::mandatory(avp_code::CC_REQUEST_NUMBER, Value::Unsigned32(0))])
//!     .await?;
//! println!("{:?}", answer.result_code());
//!
//! while let Ok(event) = events.recv().await {
//!     if let SessionEvent::Alive { tick, .. } = event {
//!         println!("peer alive ({})", tick);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod dispatcher;
mod events;
mod handshake;
mod ids;
mod router;
mod session;
mod watchdog;

pub use dispatcher::{credit_control_request, AnswerReceiver, CreditControlRequest, Request};
pub use events::{EventSink, FailureKind, SessionError, SessionEvent};
pub use handshake::capability_request;
pub use ids::{IdGenerator, SessionIdGenerator};
pub use router::{AnswerWaiter, ResponseRouter, Routed};
pub use session::{Session, SessionState};
pub use watchdog::{watchdog_answer, watchdog_request};
