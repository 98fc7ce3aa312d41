//! The per-packet pipeline.
//!
//! Every stage resolves to a verdict: `Accept` hands the packet back
//! untouched (not ours), `Stolen` means the pipeline consumed it (it was
//! translated, held for reassembly, or buffered), `Drop` discards it.
//! Errors never escape to the packet loop; they become verdicts here.

mod nat64;
mod siit;
mod tuple;

pub use nat64::{expire, next_deadline};
pub use tuple::{tuple_from_v4, tuple_from_v6, Tuple4, Tuple6};

use std::net::{Ipv4Addr, Ipv6Addr};
use std::time::Instant;

use nat_state::{FragKey, FragVerdict, Fragment};

use crate::instance::{Instance, State};
use crate::pipeline::tuple::{validate_icmp4_checksum, validate_icmp6_checksum};

const FRAGMENT_HEADER: u8 = 44;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Stolen,
    Drop,
}

/// What a pipeline run produced: a verdict for the incoming packet and
/// zero or more packets to put on the wire.
#[derive(Debug)]
pub struct Output {
    pub verdict: Verdict,
    pub packets: Vec<Vec<u8>>,
}

impl Output {
    pub fn accepted() -> Self {
        Self {
            verdict: Verdict::Accept,
            packets: Vec::new(),
        }
    }

    pub fn dropped() -> Self {
        Self {
            verdict: Verdict::Drop,
            packets: Vec::new(),
        }
    }

    pub fn stolen(packets: Vec<Vec<u8>>) -> Self {
        Self {
            verdict: Verdict::Stolen,
            packets,
        }
    }
}

/// Entry point: dispatch on the version nibble.
pub fn process(instance: &Instance, packet: &[u8]) -> Output {
    if packet.is_empty() {
        return Output::dropped();
    }
    match packet[0] >> 4 {
        4 => process_4to6(instance, packet, 0),
        6 => process_6to4(instance, packet, 0),
        version => {
            log::warn!("Unknown IP version: {version}");
            Output::dropped()
        }
    }
}

pub(crate) fn process_4to6(instance: &Instance, packet: &[u8], depth: u8) -> Output {
    let cfg = instance.config();
    if cfg.is_disable {
        return Output::accepted();
    }
    if packet.len() < 20 {
        return Output::dropped();
    }
    let dst = Ipv4Addr::new(packet[16], packet[17], packet[18], packet[19]);
    let src = Ipv4Addr::new(packet[12], packet[13], packet[14], packet[15]);
    log::trace!("Catching IPv4 packet: {src} -> {dst}");

    match &instance.state {
        State::Nat64(state) => {
            // Not for us unless the destination is one of our bindings'
            // addresses and we can represent v4 nodes in v6.
            if !state.pool4.read().contains(&dst) || instance.pool6.read().is_empty() {
                return Output::accepted();
            }
            if !validate_icmp4_checksum(packet) {
                log::debug!("Bad ICMPv4 checksum; dropping");
                return Output::dropped();
            }
            nat64::handle_4to6(instance, state, &cfg, packet, depth)
        }
        State::Siit(state) => {
            if state.pool4.read().contains(&dst).is_none() {
                return Output::accepted();
            }
            if instance.pool6.read().is_empty() && state.eamt.read().is_empty() {
                return Output::accepted();
            }
            if state.blacklist.read().contains(&src).is_some()
                || state.blacklist.read().contains(&dst).is_some()
            {
                return Output::accepted();
            }
            if !validate_icmp4_checksum(packet) {
                log::debug!("Bad ICMPv4 checksum; dropping");
                return Output::dropped();
            }
            siit::handle_4to6(instance, state, &cfg, packet, depth)
        }
    }
}

pub(crate) fn process_6to4(instance: &Instance, packet: &[u8], depth: u8) -> Output {
    let cfg = instance.config();
    if cfg.is_disable {
        return Output::accepted();
    }
    if packet.len() < 40 {
        return Output::dropped();
    }
    let dst = addr6(packet, 24);
    let src = addr6(packet, 8);
    log::trace!("Catching IPv6 packet: {src} -> {dst}");

    match &instance.state {
        State::Nat64(state) => {
            if instance.pool6.read().contains(&dst).is_none() || state.pool4.read().is_empty() {
                return Output::accepted();
            }

            // Fragmented datagrams regroup before translation.
            if let Some(reassembly) = try_reassemble(instance, state, &cfg, packet) {
                match reassembly {
                    FragOutcome::Held => return Output::stolen(Vec::new()),
                    FragOutcome::Dropped => return Output::dropped(),
                    FragOutcome::Complete(whole) => {
                        if !validate_icmp6_checksum(&whole) {
                            return Output::dropped();
                        }
                        return nat64::handle_6to4(instance, state, &cfg, &whole, depth);
                    }
                }
            }

            if !validate_icmp6_checksum(packet) {
                log::debug!("Bad ICMPv6 checksum; dropping");
                return Output::dropped();
            }
            nat64::handle_6to4(instance, state, &cfg, packet, depth)
        }
        State::Siit(state) => {
            // The destination must map, or the packet is not ours.
            if siit::map_6to4(instance, state, &dst).is_none() {
                return Output::accepted();
            }
            if !validate_icmp6_checksum(packet) {
                log::debug!("Bad ICMPv6 checksum; dropping");
                return Output::dropped();
            }
            siit::handle_6to4(instance, state, &cfg, packet, depth)
        }
    }
}

enum FragOutcome {
    Held,
    Dropped,
    Complete(Vec<u8>),
}

/// Feed a fragment into the reassembly DB. `None` means the packet is not
/// fragmented and proceeds directly.
fn try_reassemble(
    instance: &Instance,
    state: &crate::instance::Nat64State,
    cfg: &crate::config::Config,
    packet: &[u8],
) -> Option<FragOutcome> {
    if packet[6] != FRAGMENT_HEADER || packet.len() < 48 {
        return None;
    }
    let offset_and_flags = u16::from_be_bytes([packet[42], packet[43]]);
    let offset = usize::from(offset_and_flags >> 3) * 8;
    let more = offset_and_flags & 1 != 0;
    if offset == 0 && !more {
        // An atomic fragment; the translator handles its header itself.
        return None;
    }

    let key = FragKey {
        src: addr6(packet, 8),
        dst: addr6(packet, 24),
        ident: u32::from_be_bytes([packet[44], packet[45], packet[46], packet[47]]),
        proto: packet[40],
    };
    let mut header = [0u8; 40];
    header.copy_from_slice(&packet[..40]);

    let fragment = Fragment {
        offset,
        more,
        data: packet[48..].to_vec(),
    };

    let verdict = state.fragdb.lock().store(
        Instant::now(),
        key,
        header,
        fragment,
        cfg.nat64.max_stored_pkts.max(1) as usize,
    );
    instance.expiry_rearm.notify_one();
    Some(match verdict {
        Ok(FragVerdict::Stolen) => FragOutcome::Held,
        Ok(FragVerdict::Complete(whole)) => FragOutcome::Complete(whole),
        Err(err) => {
            log::debug!("Reassembly failed: {err}");
            FragOutcome::Dropped
        }
    })
}

fn addr6(packet: &[u8], offset: usize) -> Ipv6Addr {
    let mut octets = [0u8; 16];
    octets.copy_from_slice(&packet[offset..offset + 16]);
    Ipv6Addr::from(octets)
}
