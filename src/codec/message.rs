//! Diameter messages: header plus AVP list.

use bytes::{Bytes, BytesMut};

use super::avp::{Avp, Value};
use super::dictionary::{avp_code, Command};
use super::header::{CommandFlags, Header, HEADER_LEN, MAX_LENGTH};
use crate::error::{DccError, Result};

/// A complete Diameter message
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Fixed header
    pub header: Header,
    /// AVPs in wire order
    pub avps: Vec<Avp>,
}

impl Message {
    /// Create a request (R bit set).
    pub fn request(command: Command, application_id: u32, hop_by_hop: u32, end_to_end: u32) -> Self {
        let mut flags = CommandFlags::new();
        flags.set(CommandFlags::REQUEST);
        Self {
            header: Header::new(flags, command.code(), application_id, hop_by_hop, end_to_end),
            avps: Vec::new(),
        }
    }

    /// Build the answer skeleton for this request.
    ///
    /// Copies command code, application id and both identifiers, clears the
    /// R bit and adds a Result-Code AVP.
    pub fn answer(&self, result_code: u32) -> Self {
        let mut flags = self.header.flags;
        flags.clear(CommandFlags::REQUEST);
        flags.clear(CommandFlags::RETRANSMIT);
        let mut answer = Self {
            header: Header::new(
                flags,
                self.header.command_code,
                self.header.application_id,
                self.header.hop_by_hop,
                self.header.end_to_end,
            ),
            avps: Vec::new(),
        };
        if let Some(session_id) = self.find_avp(avp_code::SESSION_ID) {
            answer.avps.push(session_id.clone());
        }
        answer.add_avp(Avp::mandatory(avp_code::RESULT_CODE, Value::Unsigned32(result_code)));
        answer
    }

    /// Append an AVP
    pub fn add_avp(&mut self, avp: Avp) -> &mut Self {
        self.avps.push(avp);
        self
    }

    /// Append an AVP (builder style)
    pub fn with_avp(mut self, avp: Avp) -> Self {
        self.avps.push(avp);
        self
    }

    /// First top-level AVP with `code`
    pub fn find_avp(&self, code: u32) -> Option<&Avp> {
        self.avps.iter().find(|avp| avp.code == code)
    }

    /// Known command identity
    pub fn command(&self) -> Option<Command> {
        self.header.command()
    }

    /// Check the R bit
    pub fn is_request(&self) -> bool {
        self.header.is_request()
    }

    /// Hop-by-hop identifier
    pub fn hop_by_hop(&self) -> u32 {
        self.header.hop_by_hop
    }

    /// Result-Code, if present
    pub fn result_code(&self) -> Option<u32> {
        self.find_avp(avp_code::RESULT_CODE).and_then(Avp::as_u32)
    }

    /// Session-Id, if present
    pub fn session_id(&self) -> Option<String> {
        self.find_avp(avp_code::SESSION_ID).and_then(Avp::as_str)
    }

    /// Origin-Host, if present
    pub fn origin_host(&self) -> Option<String> {
        self.find_avp(avp_code::ORIGIN_HOST).and_then(Avp::as_str)
    }

    /// Encoded size in bytes
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.avps.iter().map(Avp::encoded_len).sum::<usize>()
    }

    /// Encode into `buf`, filling in the length field.
    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        let length = self.encoded_len();
        if length > MAX_LENGTH {
            return Err(DccError::Codec(format!(
                "message length {} exceeds 24-bit limit",
                length
            )));
        }
        buf.reserve(length);
        let mut header = self.header.clone();
        header.length = length as u32;
        header.write(buf);
        for avp in &self.avps {
            avp.encode(buf);
        }
        Ok(())
    }

    /// Encode into a fresh buffer
    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Decode exactly one message occupying all of `data`.
    pub fn decode(mut data: Bytes) -> Result<Self> {
        let header = Header::parse(&data)?;
        if header.length as usize != data.len() {
            return Err(DccError::Codec(format!(
                "length field {} does not match {} bytes",
                header.length,
                data.len()
            )));
        }
        let body = data.split_off(HEADER_LEN);
        let avps = Avp::decode_all(body)?;
        Ok(Self { header, avps })
    }

    /// Take one complete message off the front of a stream buffer.
    ///
    /// Returns `Ok(None)` while fewer bytes than the length field announces
    /// are buffered.
    pub fn decode_frame(buf: &mut BytesMut) -> Result<Option<Self>> {
        let Some(length) = Header::peek_length(buf) else {
            return Ok(None);
        };
        if length < HEADER_LEN {
            return Err(DccError::Codec(format!("invalid message length {}", length)));
        }
        if buf.len() < length {
            buf.reserve(length - buf.len());
            return Ok(None);
        }
        let frame = buf.split_to(length).freeze();
        Self::decode(frame).map(Some)
    }
}
