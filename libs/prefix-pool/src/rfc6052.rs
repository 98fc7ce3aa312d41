//! RFC 6052 IPv4-embedded IPv6 address construction and deconstruction.
//!
//! The embedded IPv4 address always skips octet 8 (the reserved "u" octet),
//! so the four octets land in different positions for every legal prefix
//! length. The per-length layout is taken straight from
//! [RFC 6052 section 2.2](https://datatracker.ietf.org/doc/html/rfc6052#section-2.2).

use std::net::{Ipv4Addr, Ipv6Addr};

use ipnet::Ipv6Net;

use crate::error::{Error, Result};

/// The prefix lengths RFC 6052 permits.
pub const LEGAL_PREFIX_LENS: [u8; 6] = [32, 40, 48, 56, 64, 96];

/// Embed `addr` into `prefix`, producing the IPv4-embedded IPv6 address.
pub fn embed_ipv4(addr: Ipv4Addr, prefix: Ipv6Net) -> Result<Ipv6Addr> {
    if !LEGAL_PREFIX_LENS.contains(&prefix.prefix_len()) {
        return Err(Error::BadPrefixLength(prefix.prefix_len()));
    }

    let v4 = addr.octets();
    let mut out = prefix.network().octets();
    match prefix.prefix_len() {
        32 => out[4..8].copy_from_slice(&v4),
        40 => {
            out[5..8].copy_from_slice(&v4[..3]);
            out[9] = v4[3];
        }
        48 => {
            out[6..8].copy_from_slice(&v4[..2]);
            out[9..11].copy_from_slice(&v4[2..]);
        }
        56 => {
            out[7] = v4[0];
            out[9..12].copy_from_slice(&v4[1..]);
        }
        64 => out[9..13].copy_from_slice(&v4),
        96 => out[12..16].copy_from_slice(&v4),
        _ => unreachable!(),
    }
    Ok(Ipv6Addr::from(out))
}

/// Recover the IPv4 address embedded in `addr` under a prefix of length
/// `prefix_len`.
pub fn extract_ipv4(addr: Ipv6Addr, prefix_len: u8) -> Result<Ipv4Addr> {
    if !LEGAL_PREFIX_LENS.contains(&prefix_len) {
        return Err(Error::BadPrefixLength(prefix_len));
    }

    let b = addr.octets();
    let v4 = match prefix_len {
        32 => [b[4], b[5], b[6], b[7]],
        40 => [b[5], b[6], b[7], b[9]],
        48 => [b[6], b[7], b[9], b[10]],
        56 => [b[7], b[9], b[10], b[11]],
        64 => [b[9], b[10], b[11], b[12]],
        96 => [b[12], b[13], b[14], b[15]],
        _ => unreachable!(),
    };
    Ok(Ipv4Addr::from(v4))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The RFC 6052 section 2.4 example table, all six lengths.
    const CASES: [(&str, &str); 6] = [
        ("2001:db8::/32", "2001:db8:c000:221::"),
        ("2001:db8:100::/40", "2001:db8:1c0:2:21::"),
        ("2001:db8:122::/48", "2001:db8:122:c000:2:2100::"),
        ("2001:db8:122:300::/56", "2001:db8:122:3c0:0:221::"),
        ("2001:db8:122:344::/64", "2001:db8:122:344:c0:2:2100::"),
        ("2001:db8:122:344::/96", "2001:db8:122:344::192.0.2.33"),
    ];

    #[test]
    fn test_embed_rfc_examples() {
        let addr: Ipv4Addr = "192.0.2.33".parse().unwrap();
        for (prefix, expected) in CASES {
            assert_eq!(
                embed_ipv4(addr, prefix.parse().unwrap()).unwrap(),
                expected.parse::<Ipv6Addr>().unwrap(),
                "embedding under {prefix}"
            );
        }
    }

    #[test]
    fn test_extract_rfc_examples() {
        let addr: Ipv4Addr = "192.0.2.33".parse().unwrap();
        for (prefix, embedded) in CASES {
            let len = prefix.parse::<Ipv6Net>().unwrap().prefix_len();
            assert_eq!(
                extract_ipv4(embedded.parse().unwrap(), len).unwrap(),
                addr,
                "extracting under {prefix}"
            );
        }
    }

    #[test]
    fn test_round_trip_every_length() {
        let addr: Ipv4Addr = "203.0.113.77".parse().unwrap();
        for len in LEGAL_PREFIX_LENS {
            let prefix = Ipv6Net::new("64:ff9b::".parse().unwrap(), len)
                .unwrap()
                .trunc();
            let embedded = embed_ipv4(addr, prefix).unwrap();
            assert_eq!(extract_ipv4(embedded, len).unwrap(), addr);
        }
    }

    #[test]
    fn test_illegal_length() {
        assert_eq!(
            embed_ipv4(
                "192.0.2.1".parse().unwrap(),
                "64:ff9b::/95".parse().unwrap()
            ),
            Err(Error::BadPrefixLength(95))
        );
        assert_eq!(
            extract_ipv4("64:ff9b::c000:201".parse().unwrap(), 97),
            Err(Error::BadPrefixLength(97))
        );
    }
}
