//! ICMP ↔ ICMPv6 translation, including the packet embedded in errors.
//!
//! Outer messages are rebuilt and fully checksummed. The embedded packet
//! is translated exactly one level deep and may be truncated, so its
//! transport checksum is maintained incrementally instead of recomputed.

use std::net::{Ipv4Addr, Ipv6Addr};

use pnet::packet::icmp::{self, IcmpPacket};
use pnet::packet::icmpv6::{self, Icmpv6Packet};

use crate::csum;
use crate::error::{Error, Result};
use crate::options::TranslationOptions;
use crate::protocols::ip::{Flow4, Flow6};

// ICMPv4 types.
const ICMP4_ECHO_REPLY: u8 = 0;
const ICMP4_DEST_UNREACH: u8 = 3;
const ICMP4_ECHO_REQUEST: u8 = 8;
const ICMP4_TIME_EXCEEDED: u8 = 11;
const ICMP4_PARAM_PROBLEM: u8 = 12;

// ICMPv6 types.
const ICMP6_DEST_UNREACH: u8 = 1;
const ICMP6_PACKET_TOO_BIG: u8 = 2;
const ICMP6_TIME_EXCEEDED: u8 = 3;
const ICMP6_PARAM_PROBLEM: u8 = 4;
const ICMP6_ECHO_REQUEST: u8 = 128;
const ICMP6_ECHO_REPLY: u8 = 129;

/// ICMPv6 errors must fit the minimum IPv6 MTU with the 40-byte header
/// and the 8-byte ICMPv6 header taken out.
const MAX_EMBEDDED_6: usize = 1280 - 40 - 8;

/// ICMPv4 errors should not exceed 576 bytes on the wire.
const MAX_EMBEDDED_4: usize = 576 - 20 - 8;

/// Translate an ICMPv4 message into ICMPv6.
pub fn translate_icmp_to_icmpv6(
    icmp_packet: &[u8],
    flow: &Flow6,
    embedded_flow: Option<&Flow6>,
    opts: &TranslationOptions,
) -> Result<Vec<u8>> {
    if icmp_packet.len() < 8 {
        return Err(Error::PacketTooShort {
            expected: 8,
            actual: icmp_packet.len(),
        });
    }
    let (icmp_type, icmp_code) = (icmp_packet[0], icmp_packet[1]);

    match icmp_type {
        ICMP4_ECHO_REQUEST | ICMP4_ECHO_REPLY => {
            let mut out = icmp_packet.to_vec();
            out[0] = if icmp_type == ICMP4_ECHO_REQUEST {
                ICMP6_ECHO_REQUEST
            } else {
                ICMP6_ECHO_REPLY
            };
            out[1] = 0;
            if let Some(id) = flow.src_port.or(flow.dst_port) {
                out[4..6].copy_from_slice(&id.to_be_bytes());
            }
            finish_icmpv6(out, flow)
        }

        ICMP4_DEST_UNREACH => {
            let embedded = &icmp_packet[8..];
            let (new_type, new_code, rest) = match icmp_code {
                // Network/host class unreachables collapse onto "no route".
                0 | 1 | 5 | 6 | 7 | 8 | 11 | 12 => (ICMP6_DEST_UNREACH, 0, [0u8; 4]),
                // The administratively prohibited family.
                9 | 10 | 13 | 15 => (ICMP6_DEST_UNREACH, 1, [0u8; 4]),
                // Protocol unreachable: Parameter Problem pointing at the
                // Next Header byte.
                2 => (ICMP6_PARAM_PROBLEM, 1, 6u32.to_be_bytes()),
                // Port unreachable.
                3 => (ICMP6_DEST_UNREACH, 4, [0u8; 4]),
                // Fragmentation needed: Packet Too Big, with the MTU fit.
                4 => {
                    let mtu4 = u16::from_be_bytes([icmp_packet[6], icmp_packet[7]]);
                    let mtu = ptb_mtu_6(mtu4, embedded, opts);
                    (ICMP6_PACKET_TOO_BIG, 0, mtu.to_be_bytes())
                }
                _ => return Err(Error::UntranslatableIcmp(icmp_type, icmp_code)),
            };
            build_error_6(new_type, new_code, rest, embedded, flow, embedded_flow)
        }

        ICMP4_TIME_EXCEEDED => build_error_6(
            ICMP6_TIME_EXCEEDED,
            icmp_code,
            [0u8; 4],
            &icmp_packet[8..],
            flow,
            embedded_flow,
        ),

        ICMP4_PARAM_PROBLEM => match icmp_code {
            0 | 2 => {
                let pointer = translate_pointer_4to6(icmp_packet[4])
                    .ok_or(Error::UntranslatableIcmp(icmp_type, icmp_code))?;
                build_error_6(
                    ICMP6_PARAM_PROBLEM,
                    0,
                    u32::from(pointer).to_be_bytes(),
                    &icmp_packet[8..],
                    flow,
                    embedded_flow,
                )
            }
            _ => Err(Error::UntranslatableIcmp(icmp_type, icmp_code)),
        },

        // Everything else (source quench, redirects, timestamps, ...) has
        // no ICMPv6 counterpart and is dropped.
        _ => Err(Error::UntranslatableIcmp(icmp_type, icmp_code)),
    }
}

/// Translate an ICMPv6 message into ICMPv4.
pub fn translate_icmpv6_to_icmp(
    icmpv6_packet: &[u8],
    flow: &Flow4,
    embedded_flow: Option<&Flow4>,
    _opts: &TranslationOptions,
) -> Result<Vec<u8>> {
    if icmpv6_packet.len() < 8 {
        return Err(Error::PacketTooShort {
            expected: 8,
            actual: icmpv6_packet.len(),
        });
    }
    let (icmp_type, icmp_code) = (icmpv6_packet[0], icmpv6_packet[1]);

    match icmp_type {
        ICMP6_ECHO_REQUEST | ICMP6_ECHO_REPLY => {
            let mut out = icmpv6_packet.to_vec();
            out[0] = if icmp_type == ICMP6_ECHO_REQUEST {
                ICMP4_ECHO_REQUEST
            } else {
                ICMP4_ECHO_REPLY
            };
            out[1] = 0;
            if let Some(id) = flow.src_port.or(flow.dst_port) {
                out[4..6].copy_from_slice(&id.to_be_bytes());
            }
            finish_icmpv4(out)
        }

        ICMP6_DEST_UNREACH => {
            let (new_type, new_code) = match icmp_code {
                // No route, beyond scope and address unreachable all
                // become host unreachable.
                0 | 2 | 3 => (ICMP4_DEST_UNREACH, 1),
                1 => (ICMP4_DEST_UNREACH, 10),
                4 => (ICMP4_DEST_UNREACH, 3),
                _ => return Err(Error::UntranslatableIcmpv6(icmp_type, icmp_code)),
            };
            build_error_4(
                new_type,
                new_code,
                [0u8; 4],
                &icmpv6_packet[8..],
                flow,
                embedded_flow,
            )
        }

        ICMP6_PACKET_TOO_BIG => {
            let mtu6 = u32::from_be_bytes([
                icmpv6_packet[4],
                icmpv6_packet[5],
                icmpv6_packet[6],
                icmpv6_packet[7],
            ]);
            // The IPv4 rendition of the same packet is 20 bytes shorter.
            let mtu4 = u16::try_from(mtu6.saturating_sub(20)).unwrap_or(u16::MAX);
            let mut rest = [0u8; 4];
            rest[2..4].copy_from_slice(&mtu4.to_be_bytes());
            build_error_4(
                ICMP4_DEST_UNREACH,
                4,
                rest,
                &icmpv6_packet[8..],
                flow,
                embedded_flow,
            )
        }

        ICMP6_TIME_EXCEEDED => build_error_4(
            ICMP4_TIME_EXCEEDED,
            icmp_code,
            [0u8; 4],
            &icmpv6_packet[8..],
            flow,
            embedded_flow,
        ),

        ICMP6_PARAM_PROBLEM => match icmp_code {
            0 => {
                let pointer6 = u32::from_be_bytes([
                    icmpv6_packet[4],
                    icmpv6_packet[5],
                    icmpv6_packet[6],
                    icmpv6_packet[7],
                ]);
                let pointer = translate_pointer_6to4(pointer6)
                    .ok_or(Error::UntranslatableIcmpv6(icmp_type, icmp_code))?;
                build_error_4(
                    ICMP4_PARAM_PROBLEM,
                    0,
                    [pointer, 0, 0, 0],
                    &icmpv6_packet[8..],
                    flow,
                    embedded_flow,
                )
            }
            // Unrecognized Next Header: protocol unreachable.
            1 => build_error_4(
                ICMP4_DEST_UNREACH,
                2,
                [0u8; 4],
                &icmpv6_packet[8..],
                flow,
                embedded_flow,
            ),
            _ => Err(Error::UntranslatableIcmpv6(icmp_type, icmp_code)),
        },

        // MLD, neighbor discovery and friends are link-local business and
        // never cross the translator.
        _ => Err(Error::UntranslatableIcmpv6(icmp_type, icmp_code)),
    }
}

/// The MTU advertised in a translated Packet Too Big. A Fragmentation
/// Needed with an empty MTU field falls back to the plateau table keyed
/// by the embedded packet's Total Length.
fn ptb_mtu_6(mtu4: u16, embedded: &[u8], opts: &TranslationOptions) -> u32 {
    if mtu4 == 0 {
        let total_length = if embedded.len() >= 4 {
            u16::from_be_bytes([embedded[2], embedded[3]])
        } else {
            0
        };
        return opts.plateau_below(total_length);
    }
    // The IPv6 rendition of any packet is 20 bytes longer.
    let mtu = u32::from(mtu4) + 20;
    if mtu >= 1280 || !opts.lower_mtu_fail {
        mtu
    } else {
        1280
    }
}

fn translate_pointer_4to6(pointer: u8) -> Option<u8> {
    match pointer {
        0 => Some(0),
        1 => Some(1),
        2 | 3 => Some(4),
        8 => Some(7),
        9 | 10 | 11 => Some(6),
        12..=15 => Some(8),
        16..=19 => Some(24),
        _ => None,
    }
}

fn translate_pointer_6to4(pointer: u32) -> Option<u8> {
    match pointer {
        0 => Some(0),
        1 => Some(1),
        4 | 5 => Some(2),
        6 => Some(9),
        7 => Some(8),
        8..=23 => Some(12),
        24..=39 => Some(16),
        _ => None,
    }
}

fn build_error_6(
    new_type: u8,
    new_code: u8,
    rest: [u8; 4],
    embedded: &[u8],
    flow: &Flow6,
    embedded_flow: Option<&Flow6>,
) -> Result<Vec<u8>> {
    let inner_flow = embedded_flow.copied().unwrap_or_else(|| flow.swapped());
    let mut translated = translate_embedded_4to6(embedded, &inner_flow)?;
    translated.truncate(MAX_EMBEDDED_6);

    let mut out = Vec::with_capacity(8 + translated.len());
    out.extend_from_slice(&[new_type, new_code, 0, 0]);
    out.extend_from_slice(&rest);
    out.extend_from_slice(&translated);
    finish_icmpv6(out, flow)
}

fn build_error_4(
    new_type: u8,
    new_code: u8,
    rest: [u8; 4],
    embedded: &[u8],
    flow: &Flow4,
    embedded_flow: Option<&Flow4>,
) -> Result<Vec<u8>> {
    let inner_flow = embedded_flow.copied().unwrap_or_else(|| flow.swapped());
    let mut translated = translate_embedded_6to4(embedded, &inner_flow)?;
    translated.truncate(MAX_EMBEDDED_4);

    let mut out = Vec::with_capacity(8 + translated.len());
    out.extend_from_slice(&[new_type, new_code, 0, 0]);
    out.extend_from_slice(&rest);
    out.extend_from_slice(&translated);
    finish_icmpv4(out)
}

/// Write the ICMPv6 checksum (pseudo-header included) into place.
fn finish_icmpv6(mut out: Vec<u8>, flow: &Flow6) -> Result<Vec<u8>> {
    out[2] = 0;
    out[3] = 0;
    let checksum = {
        let packet = Icmpv6Packet::new(&out).unwrap();
        icmpv6::checksum(&packet, &flow.src, &flow.dst)
    };
    out[2..4].copy_from_slice(&checksum.to_be_bytes());
    Ok(out)
}

/// Write the ICMPv4 checksum (no pseudo-header) into place.
fn finish_icmpv4(mut out: Vec<u8>) -> Result<Vec<u8>> {
    out[2] = 0;
    out[3] = 0;
    let checksum = {
        let packet = IcmpPacket::new(&out).unwrap();
        icmp::checksum(&packet)
    };
    out[2..4].copy_from_slice(&checksum.to_be_bytes());
    Ok(out)
}

/// Translate the IPv4 packet embedded in an ICMP error into its IPv6
/// rendition. The input may be truncated anywhere past its IP header;
/// transport checksums are adjusted incrementally where present.
fn translate_embedded_4to6(bytes: &[u8], flow: &Flow6) -> Result<Vec<u8>> {
    if bytes.len() < 20 {
        return Err(Error::PacketTooShort {
            expected: 20,
            actual: bytes.len(),
        });
    }
    let ihl = usize::from(bytes[0] & 0x0f) * 4;
    if ihl < 20 || bytes.len() < ihl {
        return Err(Error::PacketTooShort {
            expected: ihl.max(20),
            actual: bytes.len(),
        });
    }

    let tos = bytes[1];
    let total_length = u16::from_be_bytes([bytes[2], bytes[3]]);
    let ttl = bytes[8];
    let proto = bytes[9];
    let old_src = Ipv4Addr::new(bytes[12], bytes[13], bytes[14], bytes[15]);
    let old_dst = Ipv4Addr::new(bytes[16], bytes[17], bytes[18], bytes[19]);
    let payload_length = total_length.saturating_sub(ihl as u16);

    let mut out = vec![0u8; 40];
    out[0] = 0x60 | (tos >> 4);
    out[1] = (tos & 0x0f) << 4;
    out[4..6].copy_from_slice(&payload_length.to_be_bytes());
    out[6] = if proto == 1 { 58 } else { proto };
    out[7] = ttl;
    out[8..24].copy_from_slice(&flow.src.octets());
    out[24..40].copy_from_slice(&flow.dst.octets());

    let mut l4 = bytes[ihl..].to_vec();
    let addr_delta = AddrDelta {
        old: csum::sum_addr4(old_src) + csum::sum_addr4(old_dst),
        new: csum::sum_addr6(flow.src) + csum::sum_addr6(flow.dst),
    };
    adjust_embedded_l4_to_6(&mut l4, proto, flow, addr_delta, payload_length)?;
    out.extend_from_slice(&l4);
    Ok(out)
}

/// Translate the IPv6 packet embedded in an ICMPv6 error into its IPv4
/// rendition.
fn translate_embedded_6to4(bytes: &[u8], flow: &Flow4) -> Result<Vec<u8>> {
    if bytes.len() < 40 {
        return Err(Error::PacketTooShort {
            expected: 40,
            actual: bytes.len(),
        });
    }

    let tc = (bytes[0] & 0x0f) << 4 | bytes[1] >> 4;
    let payload_length = u16::from_be_bytes([bytes[4], bytes[5]]);
    let mut next = bytes[6];
    let hop_limit = bytes[7];
    let old_src = slice_to_v6(&bytes[8..24]);
    let old_dst = slice_to_v6(&bytes[24..40]);

    // Consume a leading fragment header, carrying its facts over.
    let mut l4_start = 40;
    let mut frag_offset_units = 0u16;
    let mut more_fragments = false;
    let mut identification = 0u16;
    if next == 44 && bytes.len() >= 48 {
        let offset_and_flags = u16::from_be_bytes([bytes[42], bytes[43]]);
        frag_offset_units = offset_and_flags >> 3;
        more_fragments = offset_and_flags & 1 != 0;
        identification = u16::from_be_bytes([bytes[46], bytes[47]]);
        next = bytes[40];
        l4_start = 48;
    }

    let l4_length = payload_length.saturating_sub((l4_start - 40) as u16);
    let total_length = 20u16.saturating_add(l4_length);

    let mut out = vec![0u8; 20];
    out[0] = 0x45;
    out[1] = tc;
    out[2..4].copy_from_slice(&total_length.to_be_bytes());
    out[4..6].copy_from_slice(&identification.to_be_bytes());
    let offset_and_flags = (u16::from(more_fragments) << 13) | frag_offset_units;
    out[6..8].copy_from_slice(&offset_and_flags.to_be_bytes());
    out[8] = hop_limit;
    out[9] = if next == 58 { 1 } else { next };
    out[12..16].copy_from_slice(&flow.src.octets());
    out[16..20].copy_from_slice(&flow.dst.octets());
    let header_checksum = header_checksum_v4(&out);
    out[10..12].copy_from_slice(&header_checksum.to_be_bytes());

    let mut l4 = bytes[l4_start..].to_vec();
    let addr_delta = AddrDelta {
        old: csum::sum_addr6(old_src) + csum::sum_addr6(old_dst),
        new: csum::sum_addr4(flow.src) + csum::sum_addr4(flow.dst),
    };
    adjust_embedded_l4_to_4(&mut l4, next, flow, addr_delta, l4_length)?;
    out.extend_from_slice(&l4);
    Ok(out)
}

struct AddrDelta {
    old: u32,
    new: u32,
}

fn adjust_embedded_l4_to_6(
    l4: &mut [u8],
    proto: u8,
    flow: &Flow6,
    addrs: AddrDelta,
    payload_length: u16,
) -> Result<()> {
    match proto {
        // TCP: ports up front, checksum at offset 16.
        6 => {
            let port_delta = rewrite_ports(l4, flow.src_port, flow.dst_port);
            fixup_checksum(l4, 16, addrs.old + port_delta.old, addrs.new + port_delta.new);
        }
        // UDP: ports up front, checksum at offset 6; zero stays zero.
        17 => {
            let port_delta = rewrite_ports(l4, flow.src_port, flow.dst_port);
            if l4.len() >= 8 && !(l4[6] == 0 && l4[7] == 0) {
                fixup_checksum(l4, 6, addrs.old + port_delta.old, addrs.new + port_delta.new);
            }
        }
        // ICMP: only queries may be embedded; an error inside an error
        // dies here. The new checksum also gains the ICMPv6 pseudo-header.
        1 => {
            if l4.is_empty() {
                return Ok(());
            }
            let old_type = u32::from(u16::from_be_bytes([l4[0], l4[1]]));
            l4[0] = match l4[0] {
                ICMP4_ECHO_REQUEST => ICMP6_ECHO_REQUEST,
                ICMP4_ECHO_REPLY => ICMP6_ECHO_REPLY,
                _ => return Err(Error::NestedIcmpError),
            };
            let new_type = u32::from(u16::from_be_bytes([l4[0], l4[1]]));
            let id_delta = rewrite_icmp_id(l4, flow.src_port.or(flow.dst_port));
            let pseudo = csum::sum_addr6(flow.src)
                + csum::sum_addr6(flow.dst)
                + u32::from(payload_length)
                + 58;
            fixup_checksum(
                l4,
                2,
                old_type + id_delta.old,
                new_type + id_delta.new + pseudo,
            );
        }
        _ => {}
    }
    Ok(())
}

fn adjust_embedded_l4_to_4(
    l4: &mut [u8],
    next: u8,
    flow: &Flow4,
    addrs: AddrDelta,
    l4_length: u16,
) -> Result<()> {
    match next {
        6 => {
            let port_delta = rewrite_ports(l4, flow.src_port, flow.dst_port);
            fixup_checksum(l4, 16, addrs.old + port_delta.old, addrs.new + port_delta.new);
        }
        17 => {
            let port_delta = rewrite_ports(l4, flow.src_port, flow.dst_port);
            fixup_checksum(l4, 6, addrs.old + port_delta.old, addrs.new + port_delta.new);
        }
        58 => {
            if l4.is_empty() {
                return Ok(());
            }
            let old_type = u32::from(u16::from_be_bytes([l4[0], l4[1]]));
            l4[0] = match l4[0] {
                ICMP6_ECHO_REQUEST => ICMP4_ECHO_REQUEST,
                ICMP6_ECHO_REPLY => ICMP4_ECHO_REPLY,
                _ => return Err(Error::NestedIcmpError),
            };
            let new_type = u32::from(u16::from_be_bytes([l4[0], l4[1]]));
            let id_delta = rewrite_icmp_id(l4, flow.src_port.or(flow.dst_port));
            // The ICMPv6 checksum covered a pseudo-header; ICMPv4 has none.
            let pseudo = addrs.old + u32::from(l4_length) + 58;
            fixup_checksum(
                l4,
                2,
                old_type + id_delta.old + pseudo,
                new_type + id_delta.new,
            );
        }
        _ => {}
    }
    Ok(())
}

struct WordDelta {
    old: u32,
    new: u32,
}

/// Rewrite TCP/UDP ports in place where present, reporting the checksum
/// contribution they had and have.
fn rewrite_ports(l4: &mut [u8], src_port: Option<u16>, dst_port: Option<u16>) -> WordDelta {
    let mut delta = WordDelta { old: 0, new: 0 };
    if let (Some(port), true) = (src_port, l4.len() >= 2) {
        delta.old += u32::from(u16::from_be_bytes([l4[0], l4[1]]));
        l4[0..2].copy_from_slice(&port.to_be_bytes());
        delta.new += u32::from(port);
    }
    if let (Some(port), true) = (dst_port, l4.len() >= 4) {
        delta.old += u32::from(u16::from_be_bytes([l4[2], l4[3]]));
        l4[2..4].copy_from_slice(&port.to_be_bytes());
        delta.new += u32::from(port);
    }
    delta
}

fn rewrite_icmp_id(l4: &mut [u8], id: Option<u16>) -> WordDelta {
    let mut delta = WordDelta { old: 0, new: 0 };
    if let (Some(id), true) = (id, l4.len() >= 6) {
        delta.old += u32::from(u16::from_be_bytes([l4[4], l4[5]]));
        l4[4..6].copy_from_slice(&id.to_be_bytes());
        delta.new += u32::from(id);
    }
    delta
}

/// Incrementally patch the checksum at `offset`, if the packet is long
/// enough to still contain it.
fn fixup_checksum(l4: &mut [u8], offset: usize, old: u32, new: u32) {
    if l4.len() >= offset + 2 {
        let checksum = u16::from_be_bytes([l4[offset], l4[offset + 1]]);
        let updated = csum::update(checksum, old, new);
        l4[offset..offset + 2].copy_from_slice(&updated.to_be_bytes());
    }
}

fn header_checksum_v4(header: &[u8]) -> u16 {
    let mut sum = csum::sum_words(header);
    while sum > 0xffff {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

fn slice_to_v6(slice: &[u8]) -> Ipv6Addr {
    let mut octets = [0u8; 16];
    octets.copy_from_slice(slice);
    Ipv6Addr::from(octets)
}

/// Build a complete IPv6 packet carrying an ICMPv6 error about
/// `original`, which is included up to the size limit.
pub fn build_icmpv6_error(
    src: Ipv6Addr,
    dst: Ipv6Addr,
    icmp_type: u8,
    icmp_code: u8,
    rest: [u8; 4],
    original: &[u8],
) -> Vec<u8> {
    let embedded = &original[..original.len().min(MAX_EMBEDDED_6)];
    let mut message = Vec::with_capacity(8 + embedded.len());
    message.extend_from_slice(&[icmp_type, icmp_code, 0, 0]);
    message.extend_from_slice(&rest);
    message.extend_from_slice(embedded);
    let checksum = {
        let packet = Icmpv6Packet::new(&message).unwrap();
        icmpv6::checksum(&packet, &src, &dst)
    };
    message[2..4].copy_from_slice(&checksum.to_be_bytes());

    let mut out = vec![0u8; 40];
    out[0] = 0x60;
    out[4..6].copy_from_slice(&(message.len() as u16).to_be_bytes());
    out[6] = 58;
    out[7] = 64;
    out[8..24].copy_from_slice(&src.octets());
    out[24..40].copy_from_slice(&dst.octets());
    out.extend_from_slice(&message);
    out
}

/// Hop limit ran out on a 6→4 translation.
pub fn build_icmpv6_time_exceeded(src: Ipv6Addr, dst: Ipv6Addr, original: &[u8]) -> Vec<u8> {
    build_icmpv6_error(src, dst, ICMP6_TIME_EXCEEDED, 0, [0u8; 4], original)
}

/// A held v4-initiated connection timed out without a v6 answer.
pub fn build_icmpv6_address_unreachable(
    src: Ipv6Addr,
    dst: Ipv6Addr,
    original: &[u8],
) -> Vec<u8> {
    build_icmpv6_error(src, dst, ICMP6_DEST_UNREACH, 3, [0u8; 4], original)
}

/// Build a complete IPv4 packet carrying an ICMP error about `original`
/// (its header plus eight bytes, per RFC 792).
pub fn build_icmpv4_error(
    src: Ipv4Addr,
    dst: Ipv4Addr,
    icmp_type: u8,
    icmp_code: u8,
    original: &[u8],
) -> Vec<u8> {
    let ihl = original
        .first()
        .map(|b| usize::from(b & 0x0f) * 4)
        .unwrap_or(20);
    let embedded = &original[..original.len().min(ihl + 8)];
    let mut message = Vec::with_capacity(8 + embedded.len());
    message.extend_from_slice(&[icmp_type, icmp_code, 0, 0, 0, 0, 0, 0]);
    message.extend_from_slice(embedded);
    let checksum = {
        let packet = IcmpPacket::new(&message).unwrap();
        icmp::checksum(&packet)
    };
    message[2..4].copy_from_slice(&checksum.to_be_bytes());

    let total_length = (20 + message.len()) as u16;
    let mut out = vec![0u8; 20];
    out[0] = 0x45;
    out[2..4].copy_from_slice(&total_length.to_be_bytes());
    out[8] = 64;
    out[9] = 1;
    out[12..16].copy_from_slice(&src.octets());
    out[16..20].copy_from_slice(&dst.octets());
    let header_checksum = header_checksum_v4(&out);
    out[10..12].copy_from_slice(&header_checksum.to_be_bytes());
    out.extend_from_slice(&message);
    out
}

/// TTL ran out on a 4→6 translation.
pub fn build_icmpv4_time_exceeded(src: Ipv4Addr, dst: Ipv4Addr, original: &[u8]) -> Vec<u8> {
    build_icmpv4_error(src, dst, ICMP4_TIME_EXCEEDED, 0, original)
}

/// A held v4-initiated connection timed out; the v4 node hears that its
/// target is unreachable.
pub fn build_icmpv4_host_unreachable(src: Ipv4Addr, dst: Ipv4Addr, original: &[u8]) -> Vec<u8> {
    build_icmpv4_error(src, dst, ICMP4_DEST_UNREACH, 1, original)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pnet::packet::ipv4::MutableIpv4Packet;
    use pnet::packet::udp::MutableUdpPacket;
    use pnet::packet::{ip::IpNextHeaderProtocols, ipv4};

    fn flow6() -> Flow6 {
        Flow6 {
            src: "64:ff9b::c633:6401".parse().unwrap(),
            dst: "2001:db8::1".parse().unwrap(),
            src_port: None,
            dst_port: None,
        }
    }

    fn flow4() -> Flow4 {
        Flow4 {
            src: "198.51.100.1".parse().unwrap(),
            dst: "203.0.113.5".parse().unwrap(),
            src_port: None,
            dst_port: None,
        }
    }

    fn echo_request_v4(id: u16) -> Vec<u8> {
        let mut out = vec![ICMP4_ECHO_REQUEST, 0, 0, 0, 0, 0, 0, 1];
        out[4..6].copy_from_slice(&id.to_be_bytes());
        out.extend_from_slice(b"payload");
        let checksum = icmp::checksum(&IcmpPacket::new(&out).unwrap());
        out[2..4].copy_from_slice(&checksum.to_be_bytes());
        out
    }

    /// A small, complete IPv4+UDP packet to embed inside errors. The UDP
    /// checksum is genuine, so incremental updates stay verifiable.
    fn embedded_v4_udp() -> Vec<u8> {
        let mut udp_buffer = vec![0u8; 12];
        {
            let mut udp_packet = MutableUdpPacket::new(&mut udp_buffer).unwrap();
            udp_packet.set_source(3300);
            udp_packet.set_destination(80);
            udp_packet.set_length(12);
            udp_packet.set_payload(b"abcd");
            udp_packet.set_checksum(0);
            let checksum = pnet::packet::udp::ipv4_checksum(
                &udp_packet.to_immutable(),
                &"198.51.100.1".parse().unwrap(),
                &"203.0.113.5".parse().unwrap(),
            );
            udp_packet.set_checksum(checksum);
        }
        let mut buffer = vec![0u8; 20 + udp_buffer.len()];
        let mut packet = MutableIpv4Packet::new(&mut buffer).unwrap();
        packet.set_version(4);
        packet.set_header_length(5);
        packet.set_total_length(32);
        packet.set_ttl(60);
        packet.set_next_level_protocol(IpNextHeaderProtocols::Udp);
        packet.set_source("198.51.100.1".parse().unwrap());
        packet.set_destination("203.0.113.5".parse().unwrap());
        packet.set_payload(&udp_buffer);
        packet.set_checksum(ipv4::checksum(&packet.to_immutable()));
        buffer
    }

    #[test]
    fn test_echo_request_4to6() {
        let mut flow = flow6();
        flow.src_port = Some(777);
        let out = translate_icmp_to_icmpv6(
            &echo_request_v4(42),
            &flow,
            None,
            &TranslationOptions::default(),
        )
        .unwrap();
        assert_eq!(out[0], ICMP6_ECHO_REQUEST);
        assert_eq!(u16::from_be_bytes([out[4], out[5]]), 777);
        // The checksum verifies against the pseudo-header.
        let parsed = Icmpv6Packet::new(&out).unwrap();
        assert_eq!(
            icmpv6::checksum(&parsed, &flow.src, &flow.dst),
            u16::from_be_bytes([out[2], out[3]])
        );
    }

    #[test]
    fn test_echo_reply_6to4() {
        let mut message = vec![ICMP6_ECHO_REPLY, 0, 0, 0, 0, 99, 0, 1];
        message.extend_from_slice(b"xyz");
        let out = translate_icmpv6_to_icmp(
            &message,
            &flow4(),
            None,
            &TranslationOptions::default(),
        )
        .unwrap();
        assert_eq!(out[0], ICMP4_ECHO_REPLY);
        let parsed = IcmpPacket::new(&out).unwrap();
        assert_eq!(
            icmp::checksum(&parsed),
            u16::from_be_bytes([out[2], out[3]])
        );
    }

    #[test]
    fn test_ptb_plateau_fit() {
        // Fragmentation Needed with MTU 0; the embedded packet claims
        // Total Length 1400. Expect plateau 1006.
        let mut embedded = embedded_v4_udp();
        embedded[2..4].copy_from_slice(&1400u16.to_be_bytes());
        let mut message = vec![ICMP4_DEST_UNREACH, 4, 0, 0, 0, 0, 0, 0];
        message.extend_from_slice(&embedded);

        let opts = TranslationOptions {
            mtu_plateaus: vec![1500, 1492, 1006, 576],
            ..Default::default()
        };
        let out = translate_icmp_to_icmpv6(&message, &flow6(), None, &opts).unwrap();
        assert_eq!(out[0], ICMP6_PACKET_TOO_BIG);
        assert_eq!(u32::from_be_bytes([out[4], out[5], out[6], out[7]]), 1006);
    }

    #[test]
    fn test_ptb_mtu_arithmetic() {
        let opts = TranslationOptions::default();
        // A real next-hop MTU grows by the header difference.
        assert_eq!(ptb_mtu_6(1400, &[], &opts), 1420);
        // Below the IPv6 floor it is clamped up (lower_mtu_fail default).
        assert_eq!(ptb_mtu_6(600, &[], &opts), 1280);
        let opts = TranslationOptions {
            lower_mtu_fail: false,
            ..Default::default()
        };
        assert_eq!(ptb_mtu_6(600, &[], &opts), 620);
    }

    #[test]
    fn test_port_unreachable_4to6() {
        let mut message = vec![ICMP4_DEST_UNREACH, 3, 0, 0, 0, 0, 0, 0];
        message.extend_from_slice(&embedded_v4_udp());
        let out = translate_icmp_to_icmpv6(
            &message,
            &flow6(),
            None,
            &TranslationOptions::default(),
        )
        .unwrap();
        assert_eq!((out[0], out[1]), (ICMP6_DEST_UNREACH, 4));
        // The embedded packet was translated: IPv6 version nibble, UDP
        // next header, the reverse flow's addresses.
        let embedded = &out[8..];
        assert_eq!(embedded[0] >> 4, 6);
        assert_eq!(embedded[6], 17);
        assert_eq!(&embedded[8..24], &flow6().dst.octets());
        assert_eq!(&embedded[24..40], &flow6().src.octets());
    }

    #[test]
    fn test_time_exceeded_6to4_embedded() {
        // Build an ICMPv6 Time Exceeded wrapping an IPv6+UDP original.
        let mut inner = vec![0u8; 40 + 8];
        inner[0] = 0x60;
        inner[4..6].copy_from_slice(&8u16.to_be_bytes());
        inner[6] = 17;
        inner[7] = 9;
        inner[8..24].copy_from_slice(&flow6().dst.octets());
        inner[24..40].copy_from_slice(&flow6().src.octets());
        inner[40..42].copy_from_slice(&1234u16.to_be_bytes());
        inner[42..44].copy_from_slice(&80u16.to_be_bytes());
        inner[44..46].copy_from_slice(&8u16.to_be_bytes());

        let mut message = vec![ICMP6_TIME_EXCEEDED, 0, 0, 0, 0, 0, 0, 0];
        message.extend_from_slice(&inner);
        let out = translate_icmpv6_to_icmp(
            &message,
            &flow4(),
            None,
            &TranslationOptions::default(),
        )
        .unwrap();
        assert_eq!((out[0], out[1]), (ICMP4_TIME_EXCEEDED, 0));
        let embedded = &out[8..];
        assert_eq!(embedded[0], 0x45);
        assert_eq!(embedded[9], 17);
        // Reverse flow: the embedded source is the outer destination.
        assert_eq!(&embedded[12..16], &flow4().dst.octets());
        assert_eq!(&embedded[16..20], &flow4().src.octets());
        // Ports survive untouched.
        assert_eq!(u16::from_be_bytes([embedded[20], embedded[21]]), 1234);
    }

    #[test]
    fn test_nested_error_dropped() {
        // An ICMPv4 Time Exceeded whose embedded packet is itself an ICMP
        // error must not recurse.
        let mut inner_error = vec![0u8; 20 + 8];
        inner_error[0] = 0x45;
        inner_error[2..4].copy_from_slice(&28u16.to_be_bytes());
        inner_error[8] = 5;
        inner_error[9] = 1;
        inner_error[20] = ICMP4_DEST_UNREACH;

        let mut message = vec![ICMP4_TIME_EXCEEDED, 0, 0, 0, 0, 0, 0, 0];
        message.extend_from_slice(&inner_error);
        assert_eq!(
            translate_icmp_to_icmpv6(
                &message,
                &flow6(),
                None,
                &TranslationOptions::default(),
            ),
            Err(Error::NestedIcmpError)
        );
    }

    #[test]
    fn test_untranslatable_types_die() {
        // Timestamp request.
        let message = vec![13u8, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(
            translate_icmp_to_icmpv6(&message, &flow6(), None, &TranslationOptions::default()),
            Err(Error::UntranslatableIcmp(13, 0))
        );
        // Neighbor solicitation.
        let message = vec![135u8, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(
            translate_icmpv6_to_icmp(&message, &flow4(), None, &TranslationOptions::default()),
            Err(Error::UntranslatableIcmpv6(135, 0))
        );
    }

    #[test]
    fn test_param_problem_pointer_mapping() {
        // IPv4 pointer 9 (protocol field) becomes IPv6 pointer 6.
        let mut message = vec![ICMP4_PARAM_PROBLEM, 0, 0, 0, 9, 0, 0, 0];
        message.extend_from_slice(&embedded_v4_udp());
        let out = translate_icmp_to_icmpv6(
            &message,
            &flow6(),
            None,
            &TranslationOptions::default(),
        )
        .unwrap();
        assert_eq!((out[0], out[1]), (ICMP6_PARAM_PROBLEM, 0));
        assert_eq!(u32::from_be_bytes([out[4], out[5], out[6], out[7]]), 6);
    }

    #[test]
    fn test_ptb_6to4_shrinks_mtu() {
        let mut inner = vec![0u8; 40 + 8];
        inner[0] = 0x60;
        inner[4..6].copy_from_slice(&8u16.to_be_bytes());
        inner[6] = 17;
        inner[7] = 9;
        inner[8..24].copy_from_slice(&flow6().dst.octets());
        inner[24..40].copy_from_slice(&flow6().src.octets());

        let mut message = vec![ICMP6_PACKET_TOO_BIG, 0, 0, 0];
        message.extend_from_slice(&1500u32.to_be_bytes());
        message.extend_from_slice(&inner);
        let out = translate_icmpv6_to_icmp(
            &message,
            &flow4(),
            None,
            &TranslationOptions::default(),
        )
        .unwrap();
        assert_eq!((out[0], out[1]), (ICMP4_DEST_UNREACH, 4));
        assert_eq!(u16::from_be_bytes([out[6], out[7]]), 1480);
    }

    #[test]
    fn test_embedded_checksum_incremental_update() {
        // For a complete embedded UDP packet, the incrementally updated
        // checksum must equal a full recomputation.
        let mut message = vec![ICMP4_DEST_UNREACH, 3, 0, 0, 0, 0, 0, 0];
        message.extend_from_slice(&embedded_v4_udp());
        let out = translate_icmp_to_icmpv6(
            &message,
            &flow6(),
            None,
            &TranslationOptions::default(),
        )
        .unwrap();
        let embedded = &out[8..];
        let udp_bytes = &embedded[40..];
        let parsed = pnet::packet::udp::UdpPacket::new(udp_bytes).unwrap();
        let expected = pnet::packet::udp::ipv6_checksum(
            &parsed,
            &flow6().dst,
            &flow6().src,
        );
        assert_eq!(parsed.get_checksum(), expected);
    }

    #[test]
    fn test_builders_produce_valid_packets() {
        let original = embedded_v4_udp();
        let out = build_icmpv4_time_exceeded(
            "192.0.2.1".parse().unwrap(),
            "198.51.100.1".parse().unwrap(),
            &original,
        );
        assert_eq!(out[0] >> 4, 4);
        assert_eq!(out[9], 1);
        assert_eq!(out[20], ICMP4_TIME_EXCEEDED);
        // Header plus 8 bytes of the original were kept.
        assert_eq!(out.len(), 20 + 8 + 20 + 8);

        let out = build_icmpv6_address_unreachable(
            "64:ff9b::1".parse().unwrap(),
            "2001:db8::1".parse().unwrap(),
            &[0u8; 60],
        );
        assert_eq!(out[0] >> 4, 6);
        assert_eq!(out[6], 58);
        assert_eq!((out[40], out[41]), (ICMP6_DEST_UNREACH, 3));
    }
}
