//! # DCC - Diameter Credit-Control Client Core
//!
//! Client-side session coordinator for the Diameter Credit-Control
//! application (RFC 4006) over a single peer connection.
//!
//! ## Features
//!
//! - **Capabilities exchange**: CER/CEA gate before any other traffic
//! - **Keep-alive**: periodic DWR/DWA plus answers to peer-initiated DWR
//! - **Single-flight dispatch**: bounded FIFO queue of CCRs, one in flight
//! - **Correlation**: per-request completion keyed by hop-by-hop id
//! - **Observability**: bounded event stream plus `tracing` records
//!
//! ## Protocol Overview
//!
//! ### Architecture
//!
//! ```text
//!                 ┌────────────────────────────┐
//!   submit() ───> │ bounded queue ──> dispatcher├──┐
//!                 └────────────────────────────┘  │
//!                     watchdog (DWR every tick) ──┼──> Connection ──> peer
//!                     handshake (CER once) ───────┘        │
//!                                                          │
//!   waiters <──── ResponseRouter <──── reader task <───────┘
//! ```
//!
//! ### State Machine
//!
//! ```text
//!                 send_capability_request()
//!   [Disconnected] ───────────────────────> [Handshaking]
//!                                                 │
//!                                                 │ CEA received (init)
//!                                                 v
//!                   close()                   [Ready]
//!   [Closed] <────────────────────────────────────┘
//! ```
//!
//! ### Wire Format
//!
//! | Part   | Layout                                                      |
//! |--------|-------------------------------------------------------------|
//! | Header | version, length(3), flags, code(3), app-id, hop-by-hop, e2e |
//! | AVP    | code, flags, length(3), [vendor-id], data, padding to 4     |
//!
//! ### Commands
//!
//! | Command               | Code | Application | Direction          |
//! |-----------------------|------|-------------|--------------------|
//! | Capabilities-Exchange | 257  | 0           | Client→Peer        |
//! | Device-Watchdog       | 280  | 0           | Bidirectional      |
//! | Credit-Control        | 272  | 4           | Client→Peer        |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dcc::codec::{avp_code, Avp, Value};
//! use dcc::{Session, SessionConfig};
//!
//! # async fn run() -> dcc::Result<()> {
//! let config = SessionConfig::new("127.0.0.1:3868", "client", "localhost")
//!     .with_destination("srv", "localhost");
//! let session = Session::new(config)?;
//! session.start().await?;
//! session.init().await?;
//!
//! let answer = session
//!     .call(vec![
//!         Avp::mandatory(avp_code::CC_REQUEST_TYPE, Value::Enumerated(4)),
//!         Avp::mandatory(avp_code::CC_REQUEST_NUMBER, Value::Unsigned32(0)),
//!     ])
//!     .await?;
//! println!("Result-Code: {:?}", answer.result_code());
//! session.close().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`codec`]: Diameter header and AVP encoding
//! - [`protocol`]: Session, handshake, watchdog, dispatcher and router
//! - [`transport`]: TCP dialing and the shared connection
//! - [`config`]: Configuration management
//! - [`error`]: Error types and result aliases

pub mod codec;
pub mod config;
pub mod error;
pub mod protocol;
pub mod transport;

// Re-exports for convenience
pub use codec::{Avp, Command, Message, Value};
pub use config::{Config, SessionConfig, WriteFailurePolicy};
pub use error::{DccError, Result};
pub use protocol::{CreditControlRequest, Request, Session, SessionEvent, SessionState};
pub use transport::{Connection, TcpTransport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
