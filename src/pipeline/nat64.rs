//! The stateful half of the pipeline: filtering-and-updating, outgoing
//! tuple computation, and session/fragment expiry.

use std::time::Instant;

use nat_state::{
    new_session, tcp_transition, L4Proto, SessionKey, SessionState, TransportV4, TransportV6,
};
use rfc6145::protocols::icmp::{
    build_icmpv4_host_unreachable, build_icmpv4_time_exceeded, build_icmpv6_time_exceeded,
};
use rfc6145::{translate_ipv4_to_ipv6, translate_ipv6_to_ipv4, Flow4, Flow6};

use crate::config::Config;
use crate::instance::{Instance, Nat64State};
use crate::pipeline::tuple::{tuple_from_v4, tuple_from_v6, Tuple4, Tuple6};
use crate::pipeline::{process_4to6, Output, Verdict};
use crate::ratelimit;

/// IPv6 side in: look up or create state, translate, hand the result to
/// the hairpin check.
pub(super) fn handle_6to4(
    instance: &Instance,
    state: &Nat64State,
    cfg: &Config,
    packet: &[u8],
    depth: u8,
) -> Output {
    let now = Instant::now();
    let Some(tuple) = tuple_from_v6(packet) else {
        log::debug!("Could not build a tuple out of an IPv6 packet; dropping");
        return Output::dropped();
    };

    if tuple.proto == L4Proto::Icmp && tuple.icmp_info && cfg.nat64.drop_icmp6_info {
        log::debug!("Dropping ICMPv6 informational packet by policy");
        return Output::dropped();
    }

    let (local4, remote4, released) = match filter_and_update_6(instance, state, cfg, &tuple, now)
    {
        Ok(result) => result,
        Err(output) => return output,
    };

    let flow = Flow4 {
        src: local4.addr,
        dst: remote4.addr,
        src_port: Some(local4.port),
        dst_port: Some(remote4.port),
    };
    match translate_ipv6_to_ipv4(packet, &flow, None, &cfg.xlat) {
        Ok(translated) => {
            let mut output = hairpin_or_send(instance, state, translated, depth);
            // A buffered v4 SYN whose session just became established
            // finally gets to cross.
            if let Some(stored) = released {
                let extra = process_4to6(instance, &stored, depth);
                output.packets.extend(extra.packets);
            }
            output
        }
        Err(rfc6145::error::Error::TtlExpired) => {
            let icmp = build_icmpv6_time_exceeded(tuple.dst.addr, tuple.src.addr, packet);
            Output {
                verdict: Verdict::Drop,
                packets: vec![icmp],
            }
        }
        Err(err) => {
            log::debug!("Translation failed: {err}");
            Output::dropped()
        }
    }
}

/// IPv4 side in.
pub(super) fn handle_4to6(
    instance: &Instance,
    state: &Nat64State,
    cfg: &Config,
    packet: &[u8],
    _depth: u8,
) -> Output {
    let now = Instant::now();
    let Some(tuple) = tuple_from_v4(packet) else {
        log::debug!("Could not build a tuple out of an IPv4 packet; dropping");
        return Output::dropped();
    };

    let (remote6, local6) = match filter_and_update_4(instance, state, cfg, &tuple, packet, now) {
        Ok(result) => result,
        Err(output) => return output,
    };

    let flow = Flow6 {
        src: local6.addr,
        dst: remote6.addr,
        src_port: Some(local6.port),
        dst_port: Some(remote6.port),
    };
    match translate_ipv4_to_ipv6(packet, &flow, None, &cfg.xlat) {
        Ok(translated) => Output::stolen(vec![translated]),
        Err(rfc6145::error::Error::TtlExpired) => {
            let icmp = build_icmpv4_time_exceeded(tuple.dst.addr, tuple.src.addr, packet);
            Output {
                verdict: Verdict::Drop,
                packets: vec![icmp],
            }
        }
        Err(err) => {
            log::debug!("Translation failed: {err}");
            Output::dropped()
        }
    }
}

type Filter6Out = (TransportV4, TransportV4, Option<Vec<u8>>);

fn filter_and_update_6(
    instance: &Instance,
    state: &Nat64State,
    cfg: &Config,
    tuple: &Tuple6,
    now: Instant,
) -> Result<Filter6Out, Output> {
    let key = SessionKey {
        remote6: tuple.src,
        local6: tuple.dst,
    };
    let mut sessions = state.sessions.write();

    if let Some((local4, remote4, prev)) = sessions
        .get(tuple.proto, &key)
        .map(|s| (s.local4, s.remote4, s.state))
    {
        let new_state = (tuple.proto == L4Proto::Tcp)
            .then(|| tcp_transition(prev, tuple.tcp_event));
        sessions.touch(tuple.proto, &key, now, new_state);

        let released = if prev == SessionState::V4Init
            && new_state == Some(SessionState::Established)
        {
            sessions.take_stored_pkt(tuple.proto, &key)
        } else {
            None
        };
        return Ok((local4, remote4, released));
    }

    // No session: this packet opens one, binding through pool4.
    let mut bib = state.bib.write();
    let local4 = {
        let pool4 = state.pool4.read();
        match bib.find_or_create(tuple.proto, tuple.src, &pool4) {
            Ok(addr4) => addr4,
            Err(err) => {
                if ratelimit::POOL4_EXHAUSTED.allow() {
                    log::warn!("Cannot mask {}: {err}", tuple.src);
                }
                return Err(Output::dropped());
            }
        }
    };

    let Some(remote4_addr) = instance.pool6.read().translate_6to4(&tuple.dst.addr) else {
        log::debug!("Destination {} lost its pool6 mapping mid-flight", tuple.dst);
        return Err(Output::dropped());
    };
    // Each side of an ICMP session carries that side's identifier; the
    // v4 node only ever sees the pool4 binding's id.
    let remote4_port = if tuple.proto == L4Proto::Icmp {
        local4.port
    } else {
        tuple.dst.port
    };
    let remote4 = TransportV4::new(remote4_addr, remote4_port);

    let initial = if tuple.proto == L4Proto::Tcp {
        SessionState::V6Init
    } else {
        SessionState::Established
    };
    let session = new_session(
        tuple.src, tuple.dst, local4, remote4, tuple.proto, initial, None,
    );
    if sessions.insert(now, session).is_ok() {
        bib.attach_session(tuple.proto, &tuple.src);
        if cfg.nat64.session_logging {
            log::info!(
                "Session created: {} {} -> {} ({initial})",
                tuple.proto,
                tuple.src,
                tuple.dst
            );
        }
        if cfg.nat64.bib_logging {
            log::info!("BIB in use: {} {} <-> {}", tuple.proto, tuple.src, local4);
        }
        instance.expiry_rearm.notify_one();
    }
    Ok((local4, remote4, None))
}

type Filter4Out = (TransportV6, TransportV6);

fn filter_and_update_4(
    instance: &Instance,
    state: &Nat64State,
    cfg: &Config,
    tuple: &Tuple4,
    packet: &[u8],
    now: Instant,
) -> Result<Filter4Out, Output> {
    let mut sessions = state.sessions.write();

    if let Some((key, remote6, local6, prev)) = sessions
        .get_by4(tuple.proto, tuple.src, tuple.dst)
        .map(|s| (s.key(), s.remote6, s.local6, s.state))
    {
        let new_state = (tuple.proto == L4Proto::Tcp)
            .then(|| tcp_transition(prev, tuple.tcp_event));
        sessions.touch(tuple.proto, &key, now, new_state);
        return Ok((remote6, local6));
    }

    // No session. Everything below needs a binding to have any meaning.
    let Some(remote6) = state.bib.read().get_by4(tuple.proto, &tuple.dst).map(|e| e.addr6)
    else {
        log::debug!("No binding for {}; dropping external packet", tuple.dst);
        return Err(Output::dropped());
    };

    let Some(pool6_prefix) = instance.pool6.read().first() else {
        return Err(Output::dropped());
    };
    let Ok(local6_addr) = prefix_pool::embed_ipv4(tuple.src.addr, pool6_prefix) else {
        return Err(Output::dropped());
    };
    // The v6 node knows this flow by the binding's identifier, not by
    // whatever id the v4 node chose.
    let local6_port = if tuple.proto == L4Proto::Icmp {
        remote6.port
    } else {
        tuple.src.port
    };
    let local6 = TransportV6::new(local6_addr, local6_port);

    match tuple.proto {
        L4Proto::Udp | L4Proto::Icmp => {
            if cfg.nat64.drop_by_addr
                && !sessions.exists_local4_remote_addr(tuple.proto, tuple.dst, tuple.src.addr)
            {
                log::debug!(
                    "Address-dependent filtering: {} never contacted {}; dropping",
                    tuple.dst,
                    tuple.src.addr
                );
                return Err(Output::dropped());
            }
            let session = new_session(
                remote6,
                local6,
                tuple.dst,
                tuple.src,
                tuple.proto,
                SessionState::Established,
                None,
            );
            if sessions.insert(now, session).is_ok() {
                state.bib.write().attach_session(tuple.proto, &remote6);
                if cfg.nat64.session_logging {
                    log::info!(
                        "Session created: {} {} -> {} (ESTABLISHED)",
                        tuple.proto,
                        tuple.src,
                        tuple.dst
                    );
                }
                instance.expiry_rearm.notify_one();
            }
            Ok((remote6, local6))
        }
        L4Proto::Tcp => {
            // A v4 node is opening the connection.
            if cfg.nat64.drop_external_tcp {
                log::debug!("Externally initiated TCP dropped by policy");
                return Err(Output::dropped());
            }
            if sessions.stored_pkt_count() as u64 >= cfg.nat64.max_stored_pkts {
                if ratelimit::STORED_PKTS_FULL.allow() {
                    log::warn!("Too many held SYNs; dropping new v4-initiated connection");
                }
                return Err(Output::dropped());
            }
            let session = new_session(
                remote6,
                local6,
                tuple.dst,
                tuple.src,
                L4Proto::Tcp,
                SessionState::V4Init,
                Some(packet.to_vec()),
            );
            if sessions.insert(now, session).is_ok() {
                state.bib.write().attach_session(L4Proto::Tcp, &remote6);
                if cfg.nat64.session_logging {
                    log::info!(
                        "Session created: TCP {} -> {} (V4_INIT, SYN held)",
                        tuple.src,
                        tuple.dst
                    );
                }
                instance.expiry_rearm.notify_one();
            }
            // The SYN waits for the v6 side to answer.
            Err(Output::stolen(Vec::new()))
        }
    }
}

/// Decide whether a translated v4 packet loops straight back in.
fn hairpin_or_send(
    instance: &Instance,
    state: &Nat64State,
    translated: Vec<u8>,
    depth: u8,
) -> Output {
    let dst = match translated.get(16..20) {
        Some(bytes) => std::net::Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]),
        None => return Output::dropped(),
    };
    if state.pool4.read().contains(&dst) {
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

/// Sweep expired sessions and fragments. Returns ICMP errors owed to
/// peers whose held connections died.
pub fn expire(instance: &Instance, now: Instant) -> Vec<Vec<u8>> {
    let Some(state) = instance.nat64() else {
        return Vec::new();
    };
    let cfg = instance.config();

    let dead = state.sessions.write().expire_at(now, &cfg.nat64.ttls);
    let mut errors = Vec::new();
    if !dead.is_empty() {
        let mut bib = state.bib.write();
        for session in dead {
            let removed = bib.detach_session(session.proto, &session.remote6);
            if cfg.nat64.session_logging {
                log::info!(
                    "Session expired: {} {} -> {}",
                    session.proto,
                    session.remote6,
                    session.local6
                );
            }
            if removed && cfg.nat64.bib_logging {
                log::info!("BIB released: {} {}", session.proto, session.remote6);
            }
            // A v4-initiated connection died waiting; the initiator may
            // deserve to hear about it.
            if session.state == SessionState::V4Init {
                if let (Some(stored), true) =
                    (session.stored_pkt, cfg.nat64.src_icmp6errs_better)
                {
                    errors.push(build_icmpv4_host_unreachable(
                        session.local4.addr,
                        session.remote4.addr,
                        &stored,
                    ));
                }
            }
        }
    }

    let expired_frags = state
        .fragdb
        .lock()
        .expire_at(now, cfg.nat64.frag_ttl);
    if expired_frags > 0 {
        log::debug!("Dropped {expired_frags} incomplete datagrams");
    }
    errors
}

/// When the expiry task should wake next.
pub fn next_deadline(instance: &Instance) -> Option<Instant> {
    let state = instance.nat64()?;
    let cfg = instance.config();
    let sessions = state.sessions.read().next_deadline(&cfg.nat64.ttls);
    let frags = state.fragdb.lock().next_deadline(cfg.nat64.frag_ttl);
    match (sessions, frags) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}
