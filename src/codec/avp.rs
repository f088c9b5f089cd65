//! Attribute-value pairs.
//!
//! Outbound AVPs carry a typed [`Value`]. Inbound AVPs are decoded without a
//! dictionary, so their value stays [`Value::Raw`] and the typed accessors
//! interpret the octets on demand.

use std::net::IpAddr;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{DateTime, TimeZone, Utc};

use crate::error::{DccError, Result};

/// Seconds between the NTP epoch (1900) and the Unix epoch (1970).
const NTP_UNIX_OFFSET: i64 = 2_208_988_800;

/// Address family numbers (IANA).
const FAMILY_IPV4: u16 = 1;
const FAMILY_IPV6: u16 = 2;

/// AVP flags byte.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AvpFlags(u8);

impl AvpFlags {
    /// Vendor-Id field present
    pub const VENDOR: u8 = 0x80;
    /// Receiver must understand this AVP
    pub const MANDATORY: u8 = 0x40;
    /// End-to-end protection requested
    pub const PROTECTED: u8 = 0x20;

    /// Create new empty flags
    pub fn new() -> Self {
        Self(0)
    }

    /// Only the M bit
    pub fn mandatory() -> Self {
        Self(Self::MANDATORY)
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

    /// Check if flag is set
    pub fn has(&self, flag: u8) -> bool {
        self.0 & flag != 0
    }
}

/// AVP payload
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Unsigned32
    Unsigned32(u32),
    /// Unsigned64
    Unsigned64(u64),
    /// Integer32
    Integer32(i32),
    /// Integer64
    Integer64(i64),
    /// Enumerated (encoded as Integer32)
    Enumerated(i32),
    /// UTF8String
    Utf8String(String),
    /// DiameterIdentity (FQDN, encoded as octets)
    DiameterIdentity(String),
    /// OctetString
    OctetString(Bytes),
    /// Address; `None` encodes as an empty value
    Address(Option<IpAddr>),
    /// Time, NTP seconds on the wire
    Time(DateTime<Utc>),
    /// Grouped
    Grouped(Vec<Avp>),
    /// Undecoded octets (inbound AVPs)
    Raw(Bytes),
}

impl Value {
    fn write(&self, buf: &mut BytesMut) {
        match self {
            Value::Unsigned32(v) => buf.put_u32(*v),
            Value::Unsigned64(v) => buf.put_u64(*v),
            Value::Integer32(v) | Value::Enumerated(v) => buf.put_i32(*v),
            Value::Integer64(v) => buf.put_i64(*v),
            Value::Utf8String(s) | Value::DiameterIdentity(s) => buf.put_slice(s.as_bytes()),
            Value::OctetString(b) | Value::Raw(b) => buf.put_slice(b),
            Value::Address(None) => {},
            Value::Address(Some(IpAddr::V4(ip))) => {
                buf.put_u16(FAMILY_IPV4);
                buf.put_slice(&ip.octets());
            },
            Value::Address(Some(IpAddr::V6(ip))) => {
                buf.put_u16(FAMILY_IPV6);
                buf.put_slice(&ip.octets());
            },
            Value::Time(t) => buf.put_u32((t.timestamp() + NTP_UNIX_OFFSET) as u32),
            Value::Grouped(avps) => {
                for avp in avps {
                    avp.encode(buf);
                }
            },
        }
    }

    fn len(&self) -> usize {
        match self {
            Value::Unsigned32(_) | Value::Integer32(_) | Value::Enumerated(_) | Value::Time(_) => 4,
            Value::Unsigned64(_) | Value::Integer64(_) => 8,
            Value::Utf8String(s) | Value::DiameterIdentity(s) => s.len(),
            Value::OctetString(b) | Value::Raw(b) => b.len(),
            Value::Address(None) => 0,
            Value::Address(Some(IpAddr::V4(_))) => 6,
            Value::Address(Some(IpAddr::V6(_))) => 18,
            Value::Grouped(avps) => avps.iter().map(Avp::encoded_len).sum(),
        }
    }

    /// Wire octets of this value (without padding).
    fn octets(&self) -> Bytes {
        match self {
            Value::OctetString(b) | Value::Raw(b) => b.clone(),
            other => {
                let mut buf = BytesMut::with_capacity(other.len());
                other.write(&mut buf);
                buf.freeze()
            },
        }
    }
}

/// One attribute-value pair
#[derive(Debug, Clone, PartialEq)]
pub struct Avp {
    /// AVP code
    pub code: u32,
    /// AVP flags
    pub flags: AvpFlags,
    /// Vendor id, present iff the V bit is set
    pub vendor_id: Option<u32>,
    /// Payload
    pub value: Value,
}

impl Avp {
    /// Create an AVP without vendor id.
    pub fn new(code: u32, flags: AvpFlags, value: Value) -> Self {
        Self {
            code,
            flags,
            vendor_id: None,
            value,
        }
    }

    /// Create an AVP with the M bit set.
    pub fn mandatory(code: u32, value: Value) -> Self {
        Self::new(code, AvpFlags::mandatory(), value)
    }

    /// Attach a vendor id (sets the V bit).
    pub fn with_vendor(mut self, vendor_id: u32) -> Self {
        self.flags.set(AvpFlags::VENDOR);
        self.vendor_id = Some(vendor_id);
        self
    }

    fn header_len(&self) -> usize {
        if self.vendor_id.is_some() {
            12
        } else {
            8
        }
    }

    /// Length field value (header plus data, without padding)
    pub fn length(&self) -> usize {
        self.header_len() + self.value.len()
    }

    /// Bytes this AVP occupies on the wire, padding included
    pub fn encoded_len(&self) -> usize {
        padded(self.length())
    }

    /// Append this AVP to `buf`, padded to a 4-byte boundary.
    pub fn encode(&self, buf: &mut BytesMut) {
        let length = self.length();
        buf.put_u32(self.code);
        buf.put_u8(self.flags.bits());
        buf.put_uint(length as u64, 3);
        if let Some(vendor) = self.vendor_id {
            buf.put_u32(vendor);
        }
        self.value.write(buf);
        buf.put_bytes(0, padded(length) - length);
    }

    /// Decode one AVP from the front of `data`, consuming its padding.
    pub fn decode(data: &mut Bytes) -> Result<Self> {
        if data.len() < 8 {
            return Err(DccError::Codec(format!(
                "AVP header needs 8 bytes, got {}",
                data.len()
            )));
        }
        let code = data.get_u32();
        let flags = AvpFlags::from_bits(data.get_u8());
        let length = data.get_uint(3) as usize;

        let mut header_len = 8;
        let vendor_id = if flags.has(AvpFlags::VENDOR) {
            if data.len() < 4 {
                return Err(DccError::Codec(format!("AVP {} truncated vendor id", code)));
            }
            header_len = 12;
            Some(data.get_u32())
        } else {
            None
        };

        if length < header_len {
            return Err(DccError::Codec(format!(
                "AVP {} length {} shorter than its header",
                code, length
            )));
        }
        let data_len = length - header_len;
        if data.len() < data_len {
            return Err(DccError::Codec(format!(
                "AVP {} needs {} data bytes, got {}",
                code,
                data_len,
                data.len()
            )));
        }
        let value = data.split_to(data_len);
        // The last AVP of a message may omit its padding.
        let padding = (padded(length) - length).min(data.len());
        data.advance(padding);

        Ok(Self {
            code,
            flags,
            vendor_id,
            value: Value::Raw(value),
        })
    }

    /// Decode a sequence of AVPs filling `data` completely.
    pub fn decode_all(mut data: Bytes) -> Result<Vec<Self>> {
        let mut avps = Vec::new();
        while data.has_remaining() {
            avps.push(Self::decode(&mut data)?);
        }
        Ok(avps)
    }

    /// Interpret as Unsigned32 / Enumerated
    pub fn as_u32(&self) -> Option<u32> {
        match &self.value {
            Value::Unsigned32(v) => Some(*v),
            Value::Enumerated(v) | Value::Integer32(v) => u32::try_from(*v).ok(),
            Value::Raw(b) if b.len() == 4 => Some(u32::from_be_bytes([b[0], b[1], b[2], b[3]])),
            _ => None,
        }
    }

    /// Interpret as Unsigned64
    pub fn as_u64(&self) -> Option<u64> {
        match &self.value {
            Value::Unsigned64(v) => Some(*v),
            Value::Raw(b) if b.len() == 8 => {
                let mut raw = b.clone();
                Some(raw.get_u64())
            },
            _ => self.as_u32().map(u64::from),
        }
    }

    /// Interpret as UTF8String / DiameterIdentity
    pub fn as_str(&self) -> Option<String> {
        match &self.value {
            Value::Utf8String(s) | Value::DiameterIdentity(s) => Some(s.clone()),
            Value::Raw(b) | Value::OctetString(b) => String::from_utf8(b.to_vec()).ok(),
            _ => None,
        }
    }

    /// Interpret as Address; `Some(None)` for an empty address value
    pub fn as_address(&self) -> Option<Option<IpAddr>> {
        match &self.value {
            Value::Address(addr) => Some(*addr),
            Value::Raw(b) => parse_address(b),
            _ => None,
        }
    }

    /// Interpret as Time
    pub fn as_time(&self) -> Option<DateTime<Utc>> {
        match &self.value {
            Value::Time(t) => Some(*t),
            Value::Raw(_) => {
                let ntp = i64::from(self.as_u32()?);
                Utc.timestamp_opt(ntp - NTP_UNIX_OFFSET, 0).single()
            },
            _ => None,
        }
    }

    /// Interpret as Grouped
    pub fn as_grouped(&self) -> Option<Vec<Avp>> {
        match &self.value {
            Value::Grouped(avps) => Some(avps.clone()),
            Value::Raw(b) => Self::decode_all(b.clone()).ok(),
            _ => None,
        }
    }

    /// Raw wire octets of the value
    pub fn octets(&self) -> Bytes {
        self.value.octets()
    }
}

fn parse_address(b: &[u8]) -> Option<Option<IpAddr>> {
    if b.is_empty() {
        return Some(None);
    }
    if b.len() < 2 {
        return None;
    }
    let family = u16::from_be_bytes([b[0], b[1]]);
    match (family, &b[2..]) {
        (FAMILY_IPV4, rest) if rest.len() == 4 => {
            let octets: [u8; 4] = rest.try_into().ok()?;
            Some(Some(IpAddr::from(octets)))
        },
        (FAMILY_IPV6, rest) if rest.len() == 16 => {
            let octets: [u8; 16] = rest.try_into().ok()?;
            Some(Some(IpAddr::from(octets)))
        },
        _ => None,
    }
}

/// Round up to the next multiple of 4
pub(crate) fn padded(len: usize) -> usize {
    (len + 3) & !3
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn encode(avp: &Avp) -> Bytes {
        let mut buf = BytesMut::new();
        avp.encode(&mut buf);
        buf.freeze()
    }

    #[test]
    fn test_unsigned32_layout() {
        let avp = Avp::mandatory(266, Value::Unsigned32(99));
        let bytes = encode(&avp);
        assert_eq!(
            bytes.as_ref(),
            &[0, 0, 1, 10, 0x40, 0, 0, 12, 0, 0, 0, 99]
        );
    }

    #[test]
    fn test_string_is_padded() {
        let avp = Avp::mandatory(264, Value::DiameterIdentity("client".to_string()));
        assert_eq!(avp.length(), 14);
        let bytes = encode(&avp);
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[14..], &[0, 0]);

        let mut data = bytes;
        let decoded = Avp::decode(&mut data).unwrap();
        assert!(data.is_empty());
        assert_eq!(decoded.as_str().as_deref(), Some("client"));
    }

    #[test]
    fn test_vendor_specific() {
        let avp = Avp::mandatory(20336, Value::Utf8String("66906300719".to_string())).with_vendor(2011);
        let mut data = encode(&avp);
        let decoded = Avp::decode(&mut data).unwrap();
        assert_eq!(decoded.vendor_id, Some(2011));
        assert!(decoded.flags.has(AvpFlags::VENDOR));
        assert!(decoded.flags.has(AvpFlags::MANDATORY));
        assert_eq!(decoded.as_str().as_deref(), Some("66906300719"));
    }

    #[test]
    fn test_address_values() {
        let ip = Avp::mandatory(257, Value::Address(Some(IpAddr::V4(Ipv4Addr::LOCALHOST))));
        let mut data = encode(&ip);
        let decoded = Avp::decode(&mut data).unwrap();
        assert_eq!(
            decoded.as_address(),
            Some(Some(IpAddr::V4(Ipv4Addr::LOCALHOST)))
        );

        let empty = Avp::mandatory(257, Value::Address(None));
        assert_eq!(empty.length(), 8);
        let mut data = encode(&empty);
        let decoded = Avp::decode(&mut data).unwrap();
        assert_eq!(decoded.as_address(), Some(None));
    }

    #[test]
    fn test_grouped_roundtrip() {
        let grouped = Avp::mandatory(
            443,
            Value::Grouped(vec![
                Avp::mandatory(450, Value::Enumerated(0)),
                Avp::mandatory(444, Value::Utf8String("66906300719".to_string())),
            ]),
        );
        let mut data = encode(&grouped);
        let decoded = Avp::decode(&mut data).unwrap();
        let children = decoded.as_grouped().unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].as_u32(), Some(0));
        assert_eq!(children[1].as_str().as_deref(), Some("66906300719"));
    }

    #[test]
    fn test_time_uses_ntp_epoch() {
        let t = Utc.timestamp_opt(1_700_000_000, 0).single().unwrap();
        let avp = Avp::mandatory(55, Value::Time(t));
        let mut data = encode(&avp);
        let decoded = Avp::decode(&mut data).unwrap();
        assert_eq!(decoded.as_u32(), Some((1_700_000_000i64 + NTP_UNIX_OFFSET) as u32));
        assert_eq!(decoded.as_time(), Some(t));
    }

    #[test]
    fn test_decode_rejects_truncated() {
        let mut data = Bytes::from_static(&[0, 0, 1, 8, 0x40, 0, 0, 12, 0, 0]);
        assert!(Avp::decode(&mut data).is_err());

        let mut data = Bytes::from_static(&[0, 0, 1, 8, 0x40, 0, 0, 4]);
        assert!(Avp::decode(&mut data).is_err());
    }

    #[test]
    fn test_padding() {
        assert_eq!(padded(0), 0);
        assert_eq!(padded(1), 4);
        assert_eq!(padded(8), 8);
        assert_eq!(padded(14), 16);
    }
}
