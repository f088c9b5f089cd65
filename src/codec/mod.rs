//! Minimal Diameter wire codec.
//!
//! Implements exactly the framing the session layer needs: the 20-byte
//! message header and the AVP TLV layout. There is no dictionary-driven
//! validation; inbound AVP values stay as raw octets and are interpreted
//! through typed accessors such as [`Avp::as_u32`] and [`Avp::as_str`].
//!
//! # Wire Format
//!
//! ```text
//! <header:20><avp>*
//!
//! avp := <code:4><flags:1><length:3>[<vendor-id:4>]<data><pad to 4>
//! ```
//!
//! # Usage
//!
//! ```rust
//! use dcc::codec::{avp_code, Avp, Command, Message, Value};
//!
//! let request = Message::request(Command::DeviceWatchdog, 0, 1, 1)
//!     .with_avp(Avp::mandatory(avp_code::ORIGIN_HOST, Value::DiameterIdentity("client".into())));
//! let bytes = request.to_bytes().unwrap();
//! let decoded = Message::decode(bytes).unwrap();
//! assert_eq!(decoded.origin_host().as_deref(), Some("client"));
//! ```

mod avp;
pub mod dictionary;
mod header;
mod message;

pub use avp::{Avp, AvpFlags, Value};
pub use dictionary::{avp_code, Command, BASE_APP_ID, CREDIT_CONTROL_APP_ID, DIAMETER_SUCCESS};
pub use header::{CommandFlags, Header, HEADER_LEN, MAX_LENGTH, VERSION};
pub use message::Message;
