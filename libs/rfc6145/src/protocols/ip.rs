//! Translation functions that convert whole packets between IPv4 and IPv6.

use std::hash::{Hash, Hasher};
use std::net::{Ipv4Addr, Ipv6Addr};

use pnet::packet::ip::{IpNextHeaderProtocol, IpNextHeaderProtocols};
use pnet::packet::ipv4::{self, Ipv4Packet, MutableIpv4Packet};
use pnet::packet::ipv6::{Ipv6Packet, MutableIpv6Packet};
use pnet::packet::Packet;
use rustc_hash::FxHasher;

use crate::error::{Error, Result};
use crate::options::TranslationOptions;
use crate::protocols::{icmp, tcp, udp};

/// The IPv6 fragment extension header number.
const FRAGMENT_HEADER: u8 = 44;

/// The smallest MTU an IPv6 link may have; packets at or under this size
/// survive any IPv6 path, so their IPv4 renditions may be fragmented.
const IPV6_MIN_MTU: usize = 1280;

/// The translated addressing of a packet headed into IPv6. Ports (or the
/// ICMP identifier, riding in `src_port`) are rewritten only when given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flow6 {
    pub src: Ipv6Addr,
    pub dst: Ipv6Addr,
    pub src_port: Option<u16>,
    pub dst_port: Option<u16>,
}

impl Flow6 {
    pub fn addrs(src: Ipv6Addr, dst: Ipv6Addr) -> Self {
        Self {
            src,
            dst,
            src_port: None,
            dst_port: None,
        }
    }

    /// The reverse direction, used for the packet embedded in an ICMP
    /// error when the caller knows no better mapping.
    pub fn swapped(&self) -> Self {
        Self {
            src: self.dst,
            dst: self.src,
            src_port: self.dst_port,
            dst_port: self.src_port,
        }
    }
}

/// The translated addressing of a packet headed into IPv4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flow4 {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub src_port: Option<u16>,
    pub dst_port: Option<u16>,
}

impl Flow4 {
    pub fn addrs(src: Ipv4Addr, dst: Ipv4Addr) -> Self {
        Self {
            src,
            dst,
            src_port: None,
            dst_port: None,
        }
    }

    pub fn swapped(&self) -> Self {
        Self {
            src: self.dst,
            dst: self.src,
            src_port: self.dst_port,
            dst_port: self.src_port,
        }
    }
}

/// Fragment-related facts pulled from whichever header carried them.
struct FragInfo {
    offset_bytes: usize,
    more_fragments: bool,
    identification: u32,
    is_fragment: bool,
}

/// Translate an IPv4 packet into a freshly allocated IPv6 packet.
///
/// `embedded_flow` addresses the packet embedded in an ICMP error; when
/// `None`, the reverse of `flow` is assumed, which is right whenever both
/// directions map through the same state.
pub fn translate_ipv4_to_ipv6(
    ipv4_packet: &[u8],
    flow: &Flow6,
    embedded_flow: Option<&Flow6>,
    opts: &TranslationOptions,
) -> Result<Vec<u8>> {
    let packet = Ipv4Packet::new(ipv4_packet).ok_or(Error::PacketTooShort {
        expected: Ipv4Packet::minimum_packet_size(),
        actual: ipv4_packet.len(),
    })?;

    // A packet that would leave with TTL zero dies here; the caller owes
    // the sender a Time Exceeded.
    if packet.get_ttl() <= 1 {
        return Err(Error::TtlExpired);
    }

    let frag = FragInfo {
        offset_bytes: usize::from(packet.get_fragment_offset()) * 8,
        more_fragments: packet.get_flags() & Ipv4Flags::MORE_FRAGMENTS != 0,
        identification: u32::from(packet.get_identification()),
        is_fragment: packet.get_fragment_offset() > 0
            || packet.get_flags() & Ipv4Flags::MORE_FRAGMENTS != 0,
    };
    let df = packet.get_flags() & Ipv4Flags::DONT_FRAGMENT != 0;

    // Only the first fragment carries a transport header to translate.
    let payload = packet.payload();
    let next_proto = packet.get_next_level_protocol();
    let new_payload = if frag.offset_bytes == 0 {
        match next_proto {
            IpNextHeaderProtocols::Icmp => {
                icmp::translate_icmp_to_icmpv6(payload, flow, embedded_flow, opts)?
            }
            IpNextHeaderProtocols::Tcp => tcp::translate_tcp_to_ipv6(payload, flow)?,
            IpNextHeaderProtocols::Udp => {
                udp::translate_udp_to_ipv6(payload, flow, opts, frag.is_fragment)?
            }
            protocol => {
                log::warn!("Passing through unknown next level protocol: {protocol:?}");
                payload.to_vec()
            }
        }
    } else {
        payload.to_vec()
    };

    let new_next = match next_proto {
        IpNextHeaderProtocols::Icmp => IpNextHeaderProtocols::Icmpv6,
        protocol => protocol,
    };

    // A fragmented datagram always keeps its fragment header; atomic
    // fragments are minted only on request, and only when the sender
    // allowed fragmentation.
    let with_fh = frag.is_fragment || (opts.build_ipv6_fh && !df);

    let fh_len = if with_fh { 8 } else { 0 };
    let mut buffer = vec![0u8; Ipv6Packet::minimum_packet_size() + fh_len + new_payload.len()];
    let mut out = MutableIpv6Packet::new(&mut buffer).unwrap();
    out.set_version(6);
    out.set_traffic_class(if opts.reset_traffic_class {
        0
    } else {
        packet.get_dscp() << 2 | packet.get_ecn()
    });
    out.set_flow_label(0);
    out.set_payload_length((fh_len + new_payload.len()) as u16);
    out.set_next_header(if with_fh {
        IpNextHeaderProtocol(FRAGMENT_HEADER)
    } else {
        new_next
    });
    out.set_hop_limit(packet.get_ttl() - 1);
    out.set_source(flow.src);
    out.set_destination(flow.dst);

    if with_fh {
        let fh = build_fragment_header(
            new_next.0,
            frag.offset_bytes,
            frag.more_fragments,
            frag.identification,
        );
        buffer[40..48].copy_from_slice(&fh);
    }
    buffer[40 + fh_len..].copy_from_slice(&new_payload);
    Ok(buffer)
}

/// Translate an IPv6 packet into a freshly allocated IPv4 packet.
pub fn translate_ipv6_to_ipv4(
    ipv6_packet: &[u8],
    flow: &Flow4,
    embedded_flow: Option<&Flow4>,
    opts: &TranslationOptions,
) -> Result<Vec<u8>> {
    let packet = Ipv6Packet::new(ipv6_packet).ok_or(Error::PacketTooShort {
        expected: Ipv6Packet::minimum_packet_size(),
        actual: ipv6_packet.len(),
    })?;

    if packet.get_hop_limit() <= 1 {
        return Err(Error::TtlExpired);
    }

    // The only extension header handled is the fragment header; anything
    // else is treated as opaque payload under its own protocol number.
    let (frag, next_proto, l4) = match packet.get_next_header().0 {
        FRAGMENT_HEADER => {
            let payload = packet.payload();
            if payload.len() < 8 {
                return Err(Error::PacketTooShort {
                    expected: Ipv6Packet::minimum_packet_size() + 8,
                    actual: ipv6_packet.len(),
                });
            }
            let next = payload[0];
            let offset_and_flags = u16::from_be_bytes([payload[2], payload[3]]);
            let offset_bytes = usize::from(offset_and_flags >> 3) * 8;
            let more = offset_and_flags & 1 != 0;
            (
                FragInfo {
                    offset_bytes,
                    more_fragments: more,
                    identification: u32::from_be_bytes([
                        payload[4], payload[5], payload[6], payload[7],
                    ]),
                    // An atomic fragment is not actually fragmented.
                    is_fragment: offset_bytes > 0 || more,
                },
                IpNextHeaderProtocol(next),
                &payload[8..],
            )
        }
        _ => (
            FragInfo {
                offset_bytes: 0,
                more_fragments: false,
                identification: 0,
                is_fragment: false,
            },
            packet.get_next_header(),
            packet.payload(),
        ),
    };

    let new_payload = if frag.offset_bytes == 0 {
        match next_proto {
            IpNextHeaderProtocols::Icmpv6 => {
                icmp::translate_icmpv6_to_icmp(l4, flow, embedded_flow, opts)?
            }
            IpNextHeaderProtocols::Tcp => tcp::translate_tcp_to_ipv4(l4, flow)?,
            IpNextHeaderProtocols::Udp => udp::translate_udp_to_ipv4(l4, flow)?,
            protocol => {
                log::warn!("Passing through unknown next header: {protocol:?}");
                l4.to_vec()
            }
        }
    } else {
        l4.to_vec()
    };

    // Identification: prefer what the fragment header said, then the
    // operator's policy.
    let identification = if frag.is_fragment || packet.get_next_header().0 == FRAGMENT_HEADER {
        frag.identification as u16
    } else if opts.build_ipv4_id {
        flow_identification(&packet, flow)
    } else {
        0
    };

    // Anything small enough to survive every IPv6 path may be fragmented
    // by IPv4 routers; bigger packets must not be.
    let df = if frag.is_fragment {
        false
    } else {
        opts.df_always_on || ipv6_packet.len() > IPV6_MIN_MTU
    };

    let mut buffer =
        vec![0u8; Ipv4Packet::minimum_packet_size() + new_payload.len()];
    let mut out = MutableIpv4Packet::new(&mut buffer).unwrap();
    out.set_version(4);
    out.set_header_length(5);
    let tos = if opts.reset_tos {
        opts.new_tos
    } else {
        packet.get_traffic_class()
    };
    out.set_dscp(tos >> 2);
    out.set_ecn(tos & 0b11);
    out.set_total_length((Ipv4Packet::minimum_packet_size() + new_payload.len()) as u16);
    out.set_identification(identification);
    out.set_flags(
        if df { Ipv4Flags::DONT_FRAGMENT } else { 0 }
            | if frag.more_fragments {
                Ipv4Flags::MORE_FRAGMENTS
            } else {
                0
            },
    );
    out.set_fragment_offset((frag.offset_bytes / 8) as u16);
    out.set_ttl(packet.get_hop_limit() - 1);
    out.set_next_level_protocol(match next_proto {
        IpNextHeaderProtocols::Icmpv6 => IpNextHeaderProtocols::Icmp,
        protocol => protocol,
    });
    out.set_source(flow.src);
    out.set_destination(flow.dst);
    out.set_payload(&new_payload);
    out.set_checksum(ipv4::checksum(&out.to_immutable()));
    Ok(buffer)
}

/// An identification for packets that never carried one, derived from
/// the flow so retransmissions within it share their id.
fn flow_identification(packet: &Ipv6Packet, flow: &Flow4) -> u16 {
    let mut hasher = FxHasher::default();
    packet.get_source().hash(&mut hasher);
    packet.get_destination().hash(&mut hasher);
    packet.get_next_header().0.hash(&mut hasher);
    flow.src_port.hash(&mut hasher);
    flow.dst_port.hash(&mut hasher);
    hasher.finish() as u16
}

/// IPv4 header flag bits as pnet's 3-bit field sees them.
struct Ipv4Flags;

impl Ipv4Flags {
    const DONT_FRAGMENT: u8 = 0b010;
    const MORE_FRAGMENTS: u8 = 0b001;
}

fn build_fragment_header(
    next_header: u8,
    offset_bytes: usize,
    more_fragments: bool,
    identification: u32,
) -> [u8; 8] {
    let offset_and_flags =
        ((offset_bytes as u16 / 8) << 3) | u16::from(more_fragments);
    let mut fh = [0u8; 8];
    fh[0] = next_header;
    fh[2..4].copy_from_slice(&offset_and_flags.to_be_bytes());
    fh[4..8].copy_from_slice(&identification.to_be_bytes());
    fh
}
