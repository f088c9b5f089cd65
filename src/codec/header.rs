//! Diameter message header.
//!
//! ```text
//!  0                   1                   2                   3
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |    Version    |                 Message Length                |
//! | command flags |                  Command Code                 |
//! |                         Application-ID                        |
//! |                      Hop-by-Hop Identifier                    |
//! |                      End-to-End Identifier                    |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use bytes::{Buf, BufMut, BytesMut};

use super::dictionary::Command;
use crate::error::{DccError, Result};

/// Header size in bytes
pub const HEADER_LEN: usize = 20;

/// Only protocol version 1 exists.
pub const VERSION: u8 = 1;

/// Largest value a 24-bit length field can hold.
pub const MAX_LENGTH: usize = 0x00FF_FFFF;

/// Command flags byte.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandFlags(u8);

impl CommandFlags {
    /// Message is a request
    pub const REQUEST: u8 = 0x80;
    /// Message may be proxied
    pub const PROXIABLE: u8 = 0x40;
    /// Answer carries a protocol error
    pub const ERROR: u8 = 0x20;
    /// Potentially retransmitted message
    pub const RETRANSMIT: u8 = 0x10;

    /// Create new empty flags
    pub fn new() -> Self {
        Self(0)
    }

    /// Create from raw bits
    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// Get raw bits
    pub fn bits(&self) -> u8 {
        self.0
    }

    /// Set a flag
    pub fn set(&mut self, flag: u8) {
        self.0 |= flag;
    }

    /// Clear a flag
    pub fn clear(&mut self, flag: u8) {
        self.0 &= !flag;
    }

    /// Check if flag is set
    pub fn has(&self, flag: u8) -> bool {
        self.0 & flag != 0
    }
}

/// Fixed 20-byte header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Protocol version
    pub version: u8,
    /// Total message length including this header
    pub length: u32,
    /// Command flags
    pub flags: CommandFlags,
    /// 24-bit command code
    pub command_code: u32,
    /// Application id
    pub application_id: u32,
    /// Hop-by-hop identifier, used to match answers to requests
    pub hop_by_hop: u32,
    /// End-to-end identifier, used for duplicate detection
    pub end_to_end: u32,
}

impl Header {
    /// Create a header; the length is filled in on encode.
    pub fn new(
        flags: CommandFlags,
        command_code: u32,
        application_id: u32,
        hop_by_hop: u32,
        end_to_end: u32,
    ) -> Self {
        Self {
            version: VERSION,
            length: HEADER_LEN as u32,
            flags,
            command_code,
            application_id,
            hop_by_hop,
            end_to_end,
        }
    }

    /// Check the R bit
    pub fn is_request(&self) -> bool {
        self.flags.has(CommandFlags::REQUEST)
    }

    /// Known command identity, if any
    pub fn command(&self) -> Option<Command> {
        Command::from_code(self.command_code)
    }

    /// Write the header into `buf`.
    pub fn write(&self, buf: &mut BytesMut) {
        buf.put_u8(self.version);
        buf.put_uint(u64::from(self.length), 3);
        buf.put_u8(self.flags.bits());
        buf.put_uint(u64::from(self.command_code), 3);
        buf.put_u32(self.application_id);
        buf.put_u32(self.hop_by_hop);
        buf.put_u32(self.end_to_end);
    }

    /// Parse a header from the first [`HEADER_LEN`] bytes of `data`.
    pub fn parse(mut data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(DccError::Codec(format!(
                "header needs {} bytes, got {}",
                HEADER_LEN,
                data.len()
            )));
        }

        let version = data.get_u8();
        if version != VERSION {
            return Err(DccError::Codec(format!("unsupported version {}", version)));
        }
        let length = data.get_uint(3) as u32;
        let flags = CommandFlags::from_bits(data.get_u8());
        let command_code = data.get_uint(3) as u32;
        let application_id = data.get_u32();
        let hop_by_hop = data.get_u32();
        let end_to_end = data.get_u32();

        if (length as usize) < HEADER_LEN || length % 4 != 0 {
            return Err(DccError::Codec(format!("invalid message length {}", length)));
        }

        Ok(Self {
            version,
            length,
            flags,
            command_code,
            application_id,
            hop_by_hop,
            end_to_end,
        })
    }

    /// Read the message length from a partial buffer without validating the rest.
    pub fn peek_length(data: &[u8]) -> Option<usize> {
        if data.len() < 4 {
            return None;
        }
        Some(((data[1] as usize) << 16) | ((data[2] as usize) << 8) | data[3] as usize)
    }
}
