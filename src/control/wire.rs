//! The control channel's binary encoding.
//!
//! Requests open with a 16-byte packed little-endian header:
//!
//! ```text
//! magic[4] = "jool" | type u8 ('n'|'s') | version u32 | length u32
//! | mode u16 | operation u8
//! ```
//!
//! Bodies are fixed-width packed fields. Addresses travel in network
//! order; ports and other scalars in little-endian. Responses open with
//! an i32 status (zero, or a negative errno) followed by an
//! operation-specific payload. Display payloads are `[count u16][records
//! ...][more u8]`, paginated by re-sending the request with the last
//! record's key as cursor.

use std::net::{Ipv4Addr, Ipv6Addr};

use ipnet::{Ipv4Net, Ipv6Net};
use nat_state::{TransportV4, TransportV6};

use crate::error::{Error, Result};

pub const MAGIC: [u8; 4] = *b"jool";
pub const HEADER_LEN: usize = 16;

/// Protocol version, packed `(major<<24)|(minor<<16)|(rev<<8)|dev`.
pub const fn wire_version() -> u32 {
    (1 << 24) | (0 << 16) | (0 << 8)
}

// Modes.
pub const MODE_GLOBAL: u16 = 1 << 0;
pub const MODE_POOL6: u16 = 1 << 1;
pub const MODE_POOL4: u16 = 1 << 2;
pub const MODE_BIB: u16 = 1 << 3;
pub const MODE_SESSION: u16 = 1 << 4;
pub const MODE_LOGTIME: u16 = 1 << 5;
pub const MODE_EAMT: u16 = 1 << 6;
pub const MODE_RFC6791: u16 = 1 << 7;
pub const MODE_BLACKLIST: u16 = 1 << 8;

// Operations.
pub const OP_DISPLAY: u8 = 1 << 0;
pub const OP_COUNT: u8 = 1 << 1;
pub const OP_ADD: u8 = 1 << 2;
pub const OP_UPDATE: u8 = 1 << 3;
pub const OP_REMOVE: u8 = 1 << 4;
pub const OP_FLUSH: u8 = 1 << 5;

/// Display responses fit in this many payload bytes; longer listings
/// paginate.
pub const MAX_RESPONSE_PAYLOAD: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub flavor_type: u8,
    pub version: u32,
    pub length: u32,
    pub mode: u16,
    pub operation: u8,
}

impl Header {
    pub fn parse(bytes: &[u8]) -> Result<Header> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::InvalidArg(format!(
                "request of {} bytes cannot hold a header",
                bytes.len()
            )));
        }
        if bytes[0..4] != MAGIC {
            return Err(Error::VersionMismatch(
                "bad magic; this is not a translator control request".to_string(),
            ));
        }
        Ok(Header {
            flavor_type: bytes[4],
            version: u32::from_le_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]),
            length: u32::from_le_bytes([bytes[9], bytes[10], bytes[11], bytes[12]]),
            mode: u16::from_le_bytes([bytes[13], bytes[14]]),
            operation: bytes[15],
        })
    }

    pub fn emit(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(&MAGIC);
        out[4] = self.flavor_type;
        out[5..9].copy_from_slice(&self.version.to_le_bytes());
        out[9..13].copy_from_slice(&self.length.to_le_bytes());
        out[13..15].copy_from_slice(&self.mode.to_le_bytes());
        out[15] = self.operation;
        out
    }
}

/// Build a request from parts; used by tests and by clients.
pub fn request(flavor_type: u8, mode: u16, operation: u8, body: &[u8]) -> Vec<u8> {
    let header = Header {
        flavor_type,
        version: wire_version(),
        length: (HEADER_LEN + body.len()) as u32,
        mode,
        operation,
    };
    let mut out = header.emit().to_vec();
    out.extend_from_slice(body);
    out
}

pub struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos + n;
        if end > self.bytes.len() {
            return Err(Error::InvalidArg(format!(
                "request body too short: wanted {n} more bytes, had {}",
                self.bytes.len() - self.pos
            )));
        }
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn remaining(&self) -> &'a [u8] {
        &self.bytes[self.pos..]
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn bool(&mut self) -> Result<bool> {
        Ok(self.u8()? != 0)
    }

    pub fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn prefix4(&mut self) -> Result<Ipv4Net> {
        let b = self.take(5)?;
        let addr = Ipv4Addr::new(b[0], b[1], b[2], b[3]);
        Ipv4Net::new(addr, b[4])
            .map_err(|_| Error::InvalidArg(format!("bad IPv4 prefix length {}", b[4])))
    }

    pub fn prefix6(&mut self) -> Result<Ipv6Net> {
        let b = self.take(17)?;
        let mut octets = [0u8; 16];
        octets.copy_from_slice(&b[0..16]);
        Ipv6Net::new(Ipv6Addr::from(octets), b[16])
            .map_err(|_| Error::InvalidArg(format!("bad IPv6 prefix length {}", b[16])))
    }

    pub fn taddr4(&mut self) -> Result<TransportV4> {
        let b = self.take(6)?;
        Ok(TransportV4::new(
            Ipv4Addr::new(b[0], b[1], b[2], b[3]),
            u16::from_le_bytes([b[4], b[5]]),
        ))
    }

    pub fn taddr6(&mut self) -> Result<TransportV6> {
        let b = self.take(18)?;
        let mut octets = [0u8; 16];
        octets.copy_from_slice(&b[0..16]);
        Ok(TransportV6::new(
            Ipv6Addr::from(octets),
            u16::from_le_bytes([b[16], b[17]]),
        ))
    }
}

#[derive(Debug, Default)]
pub struct Writer {
    bytes: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn u8(&mut self, value: u8) -> &mut Self {
        self.bytes.push(value);
        self
    }

    pub fn bool(&mut self, value: bool) -> &mut Self {
        self.u8(u8::from(value))
    }

    pub fn u16(&mut self, value: u16) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn u16_be(&mut self, value: u16) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn u64(&mut self, value: u64) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn u64_be(&mut self, value: u64) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn prefix4(&mut self, net: &Ipv4Net) -> &mut Self {
        self.bytes.extend_from_slice(&net.addr().octets());
        self.u8(net.prefix_len())
    }

    pub fn prefix6(&mut self, net: &Ipv6Net) -> &mut Self {
        self.bytes.extend_from_slice(&net.addr().octets());
        self.u8(net.prefix_len())
    }

    pub fn taddr4(&mut self, addr: &TransportV4) -> &mut Self {
        self.bytes.extend_from_slice(&addr.addr.octets());
        self.u16(addr.port)
    }

    pub fn taddr6(&mut self, addr: &TransportV6) -> &mut Self {
        self.bytes.extend_from_slice(&addr.addr.octets());
        self.u16(addr.port)
    }
}

/// Frame a successful response.
pub fn respond_payload(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + payload.len());
    out.extend_from_slice(&0i32.to_le_bytes());
    out.extend_from_slice(payload);
    out
}

/// Frame an error response.
pub fn respond_error(error: &Error) -> Vec<u8> {
    log::debug!("Control request failed: {error}");
    error.errno().to_le_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_round_trip() {
        let header = Header {
            flavor_type: b'n',
            version: wire_version(),
            length: 42,
            mode: MODE_POOL6,
            operation: OP_ADD,
        };
        let parsed = Header::parse(&header.emit()).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_header_rejects_bad_magic() {
        let mut bytes = Header {
            flavor_type: b'n',
            version: wire_version(),
            length: 16,
            mode: MODE_GLOBAL,
            operation: OP_DISPLAY,
        }
        .emit();
        bytes[0] = b'x';
        assert!(matches!(
            Header::parse(&bytes),
            Err(Error::VersionMismatch(_))
        ));
    }

    #[test]
    fn test_scalar_round_trips() {
        let prefix4: Ipv4Net = "198.51.100.0/24".parse().unwrap();
        let prefix6: Ipv6Net = "64:ff9b::/96".parse().unwrap();
        let taddr4 = TransportV4::new("203.0.113.5".parse().unwrap(), 8080);
        let taddr6 = TransportV6::new("2001:db8::1".parse().unwrap(), 443);

        let mut writer = Writer::new();
        writer
            .prefix4(&prefix4)
            .prefix6(&prefix6)
            .taddr4(&taddr4)
            .taddr6(&taddr6);
        let bytes = writer.into_bytes();
        assert_eq!(bytes.len(), 5 + 17 + 6 + 18);

        let mut reader = Reader::new(&bytes);
        assert_eq!(reader.prefix4().unwrap(), prefix4);
        assert_eq!(reader.prefix6().unwrap(), prefix6);
        assert_eq!(reader.taddr4().unwrap(), taddr4);
        assert_eq!(reader.taddr6().unwrap(), taddr6);
    }

    #[test]
    fn test_reader_underflow() {
        let mut reader = Reader::new(&[1, 2, 3]);
        assert!(matches!(reader.prefix4(), Err(Error::InvalidArg(_))));
    }
}
