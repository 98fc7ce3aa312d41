//! Determine-incoming-tuple: reduce a packet to the transport addresses
//! the state lookups key on, and validate ICMP checksums on the way.
//!
//! For ICMP errors the tuple comes from the packet embedded in the error,
//! with source and destination swapped, so the error is filed under the
//! flow that triggered it.

use std::net::{Ipv4Addr, Ipv6Addr};

use nat_state::{L4Proto, TcpEvent, TransportV4, TransportV6};
use pnet::packet::icmp::{self, IcmpPacket};
use pnet::packet::icmpv6::{self, Icmpv6Packet};

const FRAGMENT_HEADER: u8 = 44;

#[derive(Debug, Clone, Copy)]
pub struct Tuple6 {
    pub src: TransportV6,
    pub dst: TransportV6,
    pub proto: L4Proto,
    pub tcp_event: TcpEvent,
    pub icmp_info: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct Tuple4 {
    pub src: TransportV4,
    pub dst: TransportV4,
    pub proto: L4Proto,
    pub tcp_event: TcpEvent,
    pub icmp_info: bool,
}

fn tcp_event_v6(flags: u8) -> TcpEvent {
    if flags & 0x04 != 0 {
        TcpEvent::Rst
    } else if flags & 0x02 != 0 {
        TcpEvent::SynV6
    } else if flags & 0x01 != 0 {
        TcpEvent::FinV6
    } else {
        TcpEvent::Data
    }
}

fn tcp_event_v4(flags: u8) -> TcpEvent {
    if flags & 0x04 != 0 {
        TcpEvent::Rst
    } else if flags & 0x02 != 0 {
        TcpEvent::SynV4
    } else if flags & 0x01 != 0 {
        TcpEvent::FinV4
    } else {
        TcpEvent::Data
    }
}

fn ports(l4: &[u8]) -> (u16, u16) {
    if l4.len() >= 4 {
        (
            u16::from_be_bytes([l4[0], l4[1]]),
            u16::from_be_bytes([l4[2], l4[3]]),
        )
    } else {
        (0, 0)
    }
}

fn icmp_id(l4: &[u8]) -> u16 {
    if l4.len() >= 6 {
        u16::from_be_bytes([l4[4], l4[5]])
    } else {
        0
    }
}

/// The IPv6 header's addresses, plus the transport payload past an
/// optional fragment header.
fn split_v6(packet: &[u8]) -> Option<(Ipv6Addr, Ipv6Addr, u8, &[u8])> {
    if packet.len() < 40 {
        return None;
    }
    let src = v6_at(packet, 8);
    let dst = v6_at(packet, 24);
    let next = packet[6];
    if next == FRAGMENT_HEADER {
        if packet.len() < 48 {
            return None;
        }
        Some((src, dst, packet[40], &packet[48..]))
    } else {
        Some((src, dst, next, &packet[40..]))
    }
}

fn split_v4(packet: &[u8]) -> Option<(Ipv4Addr, Ipv4Addr, u8, &[u8])> {
    if packet.len() < 20 {
        return None;
    }
    let ihl = usize::from(packet[0] & 0x0f) * 4;
    if ihl < 20 || packet.len() < ihl {
        return None;
    }
    let src = Ipv4Addr::new(packet[12], packet[13], packet[14], packet[15]);
    let dst = Ipv4Addr::new(packet[16], packet[17], packet[18], packet[19]);
    Some((src, dst, packet[9], &packet[ihl..]))
}

fn v6_at(packet: &[u8], offset: usize) -> Ipv6Addr {
    let mut octets = [0u8; 16];
    octets.copy_from_slice(&packet[offset..offset + 16]);
    Ipv6Addr::from(octets)
}

pub fn tuple_from_v6(packet: &[u8]) -> Option<Tuple6> {
    let (src, dst, proto, l4) = split_v6(packet)?;
    match proto {
        6 => {
            let (sport, dport) = ports(l4);
            Some(Tuple6 {
                src: TransportV6::new(src, sport),
                dst: TransportV6::new(dst, dport),
                proto: L4Proto::Tcp,
                tcp_event: tcp_event_v6(l4.get(13).copied().unwrap_or(0)),
                icmp_info: false,
            })
        }
        17 => {
            let (sport, dport) = ports(l4);
            Some(Tuple6 {
                src: TransportV6::new(src, sport),
                dst: TransportV6::new(dst, dport),
                proto: L4Proto::Udp,
                tcp_event: TcpEvent::Data,
                icmp_info: false,
            })
        }
        58 => {
            let icmp_type = *l4.first()?;
            match icmp_type {
                128 | 129 => {
                    let id = icmp_id(l4);
                    Some(Tuple6 {
                        src: TransportV6::new(src, id),
                        dst: TransportV6::new(dst, id),
                        proto: L4Proto::Icmp,
                        tcp_event: TcpEvent::Data,
                        icmp_info: true,
                    })
                }
                1..=4 => {
                    // The embedded packet describes the original flow;
                    // swapping it files the error under that flow.
                    let embedded = l4.get(8..)?;
                    let (emb_src, emb_dst, emb_proto, emb_l4) = split_v6(embedded)?;
                    let (emb_sport, emb_dport) = match emb_proto {
                        6 | 17 => ports(emb_l4),
                        58 => {
                            let id = icmp_id(emb_l4);
                            (id, id)
                        }
                        _ => return None,
                    };
                    Some(Tuple6 {
                        src: TransportV6::new(emb_dst, emb_dport),
                        dst: TransportV6::new(emb_src, emb_sport),
                        proto: match emb_proto {
                            6 => L4Proto::Tcp,
                            17 => L4Proto::Udp,
                            _ => L4Proto::Icmp,
                        },
                        tcp_event: TcpEvent::Data,
                        icmp_info: false,
                    })
                }
                _ => None,
            }
        }
        _ => None,
    }
}

pub fn tuple_from_v4(packet: &[u8]) -> Option<Tuple4> {
    let (src, dst, proto, l4) = split_v4(packet)?;
    match proto {
        6 => {
            let (sport, dport) = ports(l4);
            Some(Tuple4 {
                src: TransportV4::new(src, sport),
                dst: TransportV4::new(dst, dport),
                proto: L4Proto::Tcp,
                tcp_event: tcp_event_v4(l4.get(13).copied().unwrap_or(0)),
                icmp_info: false,
            })
        }
        17 => {
            let (sport, dport) = ports(l4);
            Some(Tuple4 {
                src: TransportV4::new(src, sport),
                dst: TransportV4::new(dst, dport),
                proto: L4Proto::Udp,
                tcp_event: TcpEvent::Data,
                icmp_info: false,
            })
        }
        1 => {
            let icmp_type = *l4.first()?;
            match icmp_type {
                8 | 0 => {
                    let id = icmp_id(l4);
                    Some(Tuple4 {
                        src: TransportV4::new(src, id),
                        dst: TransportV4::new(dst, id),
                        proto: L4Proto::Icmp,
                        tcp_event: TcpEvent::Data,
                        icmp_info: true,
                    })
                }
                3 | 11 | 12 => {
                    let embedded = l4.get(8..)?;
                    let (emb_src, emb_dst, emb_proto, emb_l4) = split_v4(embedded)?;
                    let (emb_sport, emb_dport) = match emb_proto {
                        6 | 17 => ports(emb_l4),
                        1 => {
                            let id = icmp_id(emb_l4);
                            (id, id)
                        }
                        _ => return None,
                    };
                    Some(Tuple4 {
                        src: TransportV4::new(emb_dst, emb_dport),
                        dst: TransportV4::new(emb_src, emb_sport),
                        proto: match emb_proto {
                            6 => L4Proto::Tcp,
                            17 => L4Proto::Udp,
                            _ => L4Proto::Icmp,
                        },
                        tcp_event: TcpEvent::Data,
                        icmp_info: false,
                    })
                }
                _ => None,
            }
        }
        _ => None,
    }
}

/// Verify the ICMPv4 checksum of an unfragmented ICMP packet. Packets of
/// other protocols pass; their checksums are the endpoints' business.
pub fn validate_icmp4_checksum(packet: &[u8]) -> bool {
    let Some((_, _, proto, l4)) = split_v4(packet) else {
        return false;
    };
    if proto != 1 {
        return true;
    }
    let fragmented = {
        let offset_and_flags = u16::from_be_bytes([packet[6], packet[7]]);
        offset_and_flags & 0x1fff != 0 || offset_and_flags & 0x2000 != 0
    };
    if fragmented {
        return true;
    }
    match IcmpPacket::new(l4) {
        Some(parsed) => icmp::checksum(&parsed) == parsed.get_checksum(),
        None => false,
    }
}

/// Verify the ICMPv6 checksum, pseudo-header included.
pub fn validate_icmp6_checksum(packet: &[u8]) -> bool {
    let Some((src, dst, proto, l4)) = split_v6(packet) else {
        return false;
    };
    if proto != 58 {
        return true;
    }
    match Icmpv6Packet::new(l4) {
        Some(parsed) => icmpv6::checksum(&parsed, &src, &dst) == parsed.get_checksum(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pnet::packet::icmpv6::MutableIcmpv6Packet;

    fn v6_udp_packet() -> Vec<u8> {
        let mut packet = vec![0u8; 40 + 8];
        packet[0] = 0x60;
        packet[4..6].copy_from_slice(&8u16.to_be_bytes());
        packet[6] = 17;
        packet[7] = 64;
        packet[8..24].copy_from_slice(&"2001:db8::1".parse::<Ipv6Addr>().unwrap().octets());
        packet[24..40].copy_from_slice(
            &"64:ff9b::cb00:7105".parse::<Ipv6Addr>().unwrap().octets(),
        );
        packet[40..42].copy_from_slice(&1234u16.to_be_bytes());
        packet[42..44].copy_from_slice(&80u16.to_be_bytes());
        packet
    }

    #[test]
    fn test_v6_udp_tuple() {
        let tuple = tuple_from_v6(&v6_udp_packet()).unwrap();
        assert_eq!(tuple.proto, L4Proto::Udp);
        assert_eq!(tuple.src.port, 1234);
        assert_eq!(tuple.dst.port, 80);
        assert_eq!(tuple.src.addr, "2001:db8::1".parse::<Ipv6Addr>().unwrap());
    }

    #[test]
    fn test_v6_tcp_flags_map_to_events() {
        let mut packet = v6_udp_packet();
        packet[6] = 6;
        // Pad to hold a TCP header.
        packet.resize(40 + 20, 0);
        packet[40..42].copy_from_slice(&1234u16.to_be_bytes());
        packet[42..44].copy_from_slice(&80u16.to_be_bytes());

        packet[53] = 0x02;
        assert_eq!(tuple_from_v6(&packet).unwrap().tcp_event, TcpEvent::SynV6);
        packet[53] = 0x01;
        assert_eq!(tuple_from_v6(&packet).unwrap().tcp_event, TcpEvent::FinV6);
        packet[53] = 0x14; // RST+ACK
        assert_eq!(tuple_from_v6(&packet).unwrap().tcp_event, TcpEvent::Rst);
        packet[53] = 0x10; // plain ACK
        assert_eq!(tuple_from_v6(&packet).unwrap().tcp_event, TcpEvent::Data);
    }

    #[test]
    fn test_v6_icmp_error_tuple_from_embedded() {
        // A router reports trouble with a packet the translator emitted
        // toward the v6 node: embedded src is the pool6 representation of
        // the v4 peer, embedded dst is the v6 node.
        let mut embedded = vec![0u8; 40 + 8];
        embedded[0] = 0x60;
        embedded[4..6].copy_from_slice(&8u16.to_be_bytes());
        embedded[6] = 17;
        embedded[7] = 3;
        embedded[8..24].copy_from_slice(
            &"64:ff9b::cb00:7105".parse::<Ipv6Addr>().unwrap().octets(),
        );
        embedded[24..40].copy_from_slice(&"2001:db8::1".parse::<Ipv6Addr>().unwrap().octets());
        embedded[40..42].copy_from_slice(&80u16.to_be_bytes());
        embedded[42..44].copy_from_slice(&1234u16.to_be_bytes());

        let mut packet = vec![0u8; 40 + 8];
        packet[0] = 0x60;
        packet[6] = 58;
        packet[7] = 64;
        packet[8..24].copy_from_slice(&"2001:db8:ffff::9".parse::<Ipv6Addr>().unwrap().octets());
        packet[24..40].copy_from_slice(
            &"64:ff9b::cb00:7105".parse::<Ipv6Addr>().unwrap().octets(),
        );
        packet[40] = 3; // time exceeded
        packet.extend_from_slice(&embedded);
        let payload_len = (packet.len() - 40) as u16;
        packet[4..6].copy_from_slice(&payload_len.to_be_bytes());

        // The swapped embedded flow is the session's own v6-side key.
        let tuple = tuple_from_v6(&packet).unwrap();
        assert_eq!(tuple.proto, L4Proto::Udp);
        assert_eq!(tuple.src.addr, "2001:db8::1".parse::<Ipv6Addr>().unwrap());
        assert_eq!(tuple.src.port, 1234);
        assert_eq!(
            tuple.dst.addr,
            "64:ff9b::cb00:7105".parse::<Ipv6Addr>().unwrap()
        );
        assert_eq!(tuple.dst.port, 80);
        assert!(!tuple.icmp_info);
    }

    #[test]
    fn test_icmp6_checksum_validation() {
        let src: Ipv6Addr = "2001:db8::1".parse().unwrap();
        let dst: Ipv6Addr = "64:ff9b::1".parse().unwrap();
        let mut packet = vec![0u8; 40 + 8];
        packet[0] = 0x60;
        packet[4..6].copy_from_slice(&8u16.to_be_bytes());
        packet[6] = 58;
        packet[7] = 64;
        packet[8..24].copy_from_slice(&src.octets());
        packet[24..40].copy_from_slice(&dst.octets());
        {
            let mut icmp_packet = MutableIcmpv6Packet::new(&mut packet[40..]).unwrap();
            icmp_packet.set_icmpv6_type(pnet::packet::icmpv6::Icmpv6Type(128));
            let checksum = icmpv6::checksum(&icmp_packet.to_immutable(), &src, &dst);
            icmp_packet.set_checksum(checksum);
        }
        assert!(validate_icmp6_checksum(&packet));

        // Corrupt one byte.
        packet[44] ^= 0xff;
        assert!(!validate_icmp6_checksum(&packet));
    }

    #[test]
    fn test_icmp4_checksum_validation() {
        let mut packet = vec![0u8; 20 + 8];
        packet[0] = 0x45;
        packet[2..4].copy_from_slice(&28u16.to_be_bytes());
        packet[8] = 64;
        packet[9] = 1;
        packet[20] = 8; // echo request
        {
            let parsed = IcmpPacket::new(&packet[20..]).unwrap();
            let checksum = icmp::checksum(&parsed);
            packet[22..24].copy_from_slice(&checksum.to_be_bytes());
        }
        assert!(validate_icmp4_checksum(&packet));
        packet[27] ^= 0x01;
        assert!(!validate_icmp4_checksum(&packet));

        // Non-ICMP packets are not judged here.
        packet[9] = 17;
        assert!(validate_icmp4_checksum(&packet));
    }
}
