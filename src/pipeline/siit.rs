//! The stateless half of the pipeline: EAM-first address mapping with the
//! RFC 6052 pool as fallback, and RFC 6791 source selection for ICMP
//! errors with unrepresentable origins.

use std::net::{Ipv4Addr, Ipv6Addr};

use rfc6145::protocols::icmp::{build_icmpv4_time_exceeded, build_icmpv6_time_exceeded};
use rfc6145::{translate_ipv4_to_ipv6, translate_ipv6_to_ipv4, Flow4, Flow6};

use crate::config::Config;
use crate::instance::{Instance, SiitState};
use crate::pipeline::{process_4to6, process_6to4, Output, Verdict};

/// Map an IPv6 address to IPv4: explicit mappings first, then the
/// translation prefix.
pub(super) fn map_6to4(instance: &Instance, state: &SiitState, addr: &Ipv6Addr) -> Option<Ipv4Addr> {
    if let Some(mapped) = state.eamt.read().get_ipv4_by_ipv6(addr) {
        return Some(mapped);
    }
    instance.pool6.read().translate_6to4(addr)
}

/// Map an IPv4 address to IPv6.
pub(super) fn map_4to6(instance: &Instance, state: &SiitState, addr: &Ipv4Addr) -> Option<Ipv6Addr> {
    if let Some(mapped) = state.eamt.read().get_ipv6_by_ipv4(addr) {
        return Some(mapped);
    }
    let prefix = instance.pool6.read().first()?;
    prefix_pool::embed_ipv4(*addr, prefix).ok()
}

pub(super) fn handle_6to4(
    instance: &Instance,
    state: &SiitState,
    cfg: &Config,
    packet: &[u8],
    depth: u8,
) -> Output {
    let src6 = addr6_at(packet, 8);
    let dst6 = addr6_at(packet, 24);

    // Remember which mechanism claimed the destination; hairpinning only
    // applies to pool6-resolved ones.
    let dst_via_eam = state.eamt.read().lookup_by6(&dst6).is_some();
    let Some(dst) = map_6to4(instance, state, &dst6) else {
        return Output::accepted();
    };

    // An ICMPv6 error may come from a v6-only router with no IPv4
    // rendition; those are sourced from the RFC 6791 pool instead.
    let src = match map_6to4(instance, state, &src6) {
        Some(src) => src,
        None if is_icmp6_error(packet) => {
            let hop_limit = packet.get(7).copied().unwrap_or(0);
            match pick_rfc6791_source(state, cfg, hop_limit) {
                Some(src) => src,
                None => {
                    log::debug!("No RFC 6791 source available; dropping ICMPv6 error");
                    return Output::dropped();
                }
            }
        }
        None => return Output::accepted(),
    };

    // The embedded packet of an error maps address by address; the outer
    // source is no use for it.
    let embedded_flow = embedded_flow_6to4(instance, state, packet);

    let flow = Flow4::addrs(src, dst);
    match translate_ipv6_to_ipv4(packet, &flow, embedded_flow.as_ref(), &cfg.xlat) {
        Ok(translated) => hairpin_or_send_v4(instance, state, translated, depth, dst_via_eam),
        Err(rfc6145::error::Error::TtlExpired) => Output {
            verdict: Verdict::Drop,
            packets: vec![build_icmpv6_time_exceeded(dst6, src6, packet)],
        },
        Err(err) => {
            log::debug!("Translation failed: {err}");
            Output::dropped()
        }
    }
}

pub(super) fn handle_4to6(
    instance: &Instance,
    state: &SiitState,
    cfg: &Config,
    packet: &[u8],
    depth: u8,
) -> Output {
    let src4 = addr4_at(packet, 12);
    let dst4 = addr4_at(packet, 16);

    let dst_via_eam = state.eamt.read().lookup_by4(&dst4).is_some();
    let Some(dst) = map_4to6(instance, state, &dst4) else {
        return Output::accepted();
    };
    let Some(src) = map_4to6(instance, state, &src4) else {
        return Output::accepted();
    };

    let embedded_flow = embedded_flow_4to6(instance, state, packet);

    let flow = Flow6::addrs(src, dst);
    match translate_ipv4_to_ipv6(packet, &flow, embedded_flow.as_ref(), &cfg.xlat) {
        Ok(translated) => hairpin_or_send_v6(instance, translated, depth, dst_via_eam),
        Err(rfc6145::error::Error::TtlExpired) => Output {
            verdict: Verdict::Drop,
            packets: vec![build_icmpv4_time_exceeded(dst4, src4, packet)],
        },
        Err(err) => {
            log::debug!("Translation failed: {err}");
            Output::dropped()
        }
    }
}

/// A pool6-resolved destination whose IPv4 rendition lands inside the EAM
/// table names another local v6 node; the packet turns right back around.
fn hairpin_or_send_v4(
    instance: &Instance,
    state: &SiitState,
    translated: Vec<u8>,
    depth: u8,
    dst_via_eam: bool,
) -> Output {
    if translated.len() < 20 {
        return Output::dropped();
    }
    let dst = addr4_at(&translated, 16);
    if !dst_via_eam && state.eamt.read().lookup_by4(&dst).is_some() {
        if depth >= 1 {
            log::warn!("Hairpin loop detected; dropping");
            return Output::dropped();
        }
        log::debug!("Hairpinning toward {dst}");
        let mut output = process_4to6(instance, &translated, depth + 1);
        output.verdict = Verdict::Stolen;
        return output;
    }
    Output::stolen(vec![translated])
}

/// The mirror case: an EAM-resolved destination whose IPv6 rendition
/// falls under a pool6 prefix is an embedded v4 address, not a v6 node.
fn hairpin_or_send_v6(
    instance: &Instance,
    translated: Vec<u8>,
    depth: u8,
    dst_via_eam: bool,
) -> Output {
    if translated.len() < 40 {
        return Output::dropped();
    }
    let dst = addr6_at(&translated, 24);
    if dst_via_eam && instance.pool6.read().contains(&dst).is_some() {
        if depth >= 1 {
            log::warn!("Hairpin loop detected; dropping");
            return Output::dropped();
        }
        log::debug!("Hairpinning toward {dst}");
        let mut output = process_6to4(instance, &translated, depth + 1);
        output.verdict = Verdict::Stolen;
        return output;
    }
    Output::stolen(vec![translated])
}

/// Pick the source for an ICMPv4 error whose IPv6 origin has no mapping.
///
/// The index is random or hop-limit-derived, reduced modulo the pool's
/// address count, then walked entry by entry. Membership is a strict
/// `index < count` test; an index equal to an entry's count belongs to
/// the next entry.
pub(super) fn pick_rfc6791_source(
    state: &SiitState,
    cfg: &Config,
    hop_limit: u8,
) -> Option<Ipv4Addr> {
    let pool = state.rfc6791.read();
    let total = pool.total_addr_count();
    if total == 0 {
        return host_ipv4_address();
    }

    let raw_index = if cfg.siit.randomize_rfc6791 {
        u64::from(rand::random::<u32>())
    } else {
        u64::from(hop_limit)
    };
    let mut index = raw_index % total;

    for entry in pool.iter() {
        let count = prefix_pool::Net::addr_count(entry);
        if index < count {
            let base = u32::from(entry.network());
            return Some(Ipv4Addr::from(base + index as u32));
        }
        index -= count;
    }
    None
}

/// Fallback when the RFC 6791 pool is empty: the host's first
/// non-loopback IPv4 address.
fn host_ipv4_address() -> Option<Ipv4Addr> {
    let addrs = nix::ifaddrs::getifaddrs().ok()?;
    for ifaddr in addrs {
        if let Some(sockaddr) = ifaddr.address {
            if let Some(sin) = sockaddr.as_sockaddr_in() {
                let addr = *std::net::SocketAddrV4::from(*sin).ip();
                if !addr.is_loopback() {
                    return Some(addr);
                }
            }
        }
    }
    None
}

fn is_icmp6_error(packet: &[u8]) -> bool {
    packet.get(6) == Some(&58) && matches!(packet.get(40), Some(1..=4))
}

fn is_icmp4_error(packet: &[u8]) -> bool {
    let ihl = packet
        .first()
        .map(|b| usize::from(b & 0x0f) * 4)
        .unwrap_or(20);
    packet.get(9) == Some(&1) && matches!(packet.get(ihl), Some(3 | 11 | 12))
}

/// Map the embedded packet's own addresses for an outgoing ICMPv4 error.
fn embedded_flow_6to4(instance: &Instance, state: &SiitState, packet: &[u8]) -> Option<Flow4> {
    if !is_icmp6_error(packet) {
        return None;
    }
    let embedded = packet.get(48..)?;
    if embedded.len() < 40 {
        return None;
    }
    let src6 = addr6_at(embedded, 8);
    let dst6 = addr6_at(embedded, 24);
    Some(Flow4::addrs(
        map_6to4(instance, state, &src6)?,
        map_6to4(instance, state, &dst6)?,
    ))
}

fn embedded_flow_4to6(instance: &Instance, state: &SiitState, packet: &[u8]) -> Option<Flow6> {
    if !is_icmp4_error(packet) {
        return None;
    }
    let ihl = usize::from(*packet.first()? & 0x0f) * 4;
    let embedded = packet.get(ihl + 8..)?;
    if embedded.len() < 20 {
        return None;
    }
    let src4 = addr4_at(embedded, 12);
    let dst4 = addr4_at(embedded, 16);
    Some(Flow6::addrs(
        map_4to6(instance, state, &src4)?,
        map_4to6(instance, state, &dst4)?,
    ))
}

fn addr4_at(packet: &[u8], offset: usize) -> Ipv4Addr {
    Ipv4Addr::new(
        packet[offset],
        packet[offset + 1],
        packet[offset + 2],
        packet[offset + 3],
    )
}

fn addr6_at(packet: &[u8], offset: usize) -> Ipv6Addr {
    let mut octets = [0u8; 16];
    octets.copy_from_slice(&packet[offset..offset + 16]);
    Ipv6Addr::from(octets)
}
