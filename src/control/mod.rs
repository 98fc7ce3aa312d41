//! Control-plane request dispatch.
//!
//! A request names a (mode, operation) pair; the matrix of legal pairs is
//! fixed, everything else is an invalid argument. Mutating operations
//! additionally require the caller to hold administrative privileges and
//! are serialized behind the instance's control lock.

pub mod server;
pub mod wire;

use std::time::Instant;

use nat_state::{L4Proto, Session, SessionDb};

use crate::config::{Config, Flavor};
use crate::error::{Error, Result};
use crate::instance::{Instance, Nat64State, State};
use wire::{Header, Reader, Writer, HEADER_LEN};

const DATABASE_OPS: u8 =
    wire::OP_DISPLAY | wire::OP_COUNT | wire::OP_ADD | wire::OP_REMOVE | wire::OP_FLUSH;
const MUTATING_OPS: u8 = wire::OP_ADD | wire::OP_UPDATE | wire::OP_REMOVE | wire::OP_FLUSH;

/// Handle one framed request, producing one framed response.
pub fn dispatch(instance: &Instance, request: &[u8], privileged: bool) -> Vec<u8> {
    match handle(instance, request, privileged) {
        Ok(payload) => wire::respond_payload(&payload),
        Err(error) => wire::respond_error(&error),
    }
}

fn handle(instance: &Instance, request: &[u8], privileged: bool) -> Result<Vec<u8>> {
    let header = Header::parse(request)?;
    validate_header(instance, &header, request.len())?;

    if header.operation & MUTATING_OPS != 0 && !privileged {
        return Err(Error::PermissionDenied);
    }
    // One configuration mutation in flight at a time.
    let _guard = (header.operation & MUTATING_OPS != 0).then(|| instance.control_lock.lock());

    let mut body = Reader::new(&request[HEADER_LEN..]);
    match header.mode {
        wire::MODE_GLOBAL => handle_global(instance, header.operation, &mut body),
        wire::MODE_POOL6 => handle_pool6(instance, header.operation, &mut body),
        wire::MODE_POOL4 => handle_pool4(instance, header.operation, &mut body),
        wire::MODE_BLACKLIST => {
            let state = instance.siit().ok_or(Error::Unsupported)?;
            handle_prefix4_pool(&state.blacklist, header.operation, &mut body)
        }
        wire::MODE_RFC6791 => {
            let state = instance.siit().ok_or(Error::Unsupported)?;
            handle_prefix4_pool(&state.rfc6791, header.operation, &mut body)
        }
        wire::MODE_EAMT => handle_eamt(instance, header.operation, &mut body),
        wire::MODE_BIB => handle_bib(instance, header.operation, &mut body),
        wire::MODE_SESSION => handle_session(instance, header.operation, &mut body),
        // The benchmark module is not part of this build.
        wire::MODE_LOGTIME => Err(Error::Unsupported),
        mode => Err(Error::InvalidArg(format!("unknown mode {mode:#x}"))),
    }
}

fn validate_header(instance: &Instance, header: &Header, actual_len: usize) -> Result<()> {
    if header.flavor_type != instance.flavor.wire_type() {
        return Err(Error::VersionMismatch(match instance.flavor {
            Flavor::Nat64 => "this is the NAT64 flavor; use the NAT64 client".to_string(),
            Flavor::Siit => "this is the SIIT flavor; use the SIIT client".to_string(),
        }));
    }
    if header.version != wire::wire_version() {
        return Err(Error::VersionMismatch(format!(
            "client speaks version {:#x}, this translator speaks {:#x}",
            header.version,
            wire::wire_version()
        )));
    }
    if header.length as usize != actual_len {
        return Err(Error::InvalidArg(format!(
            "header claims {} bytes but {} arrived",
            header.length, actual_len
        )));
    }

    let allowed = match header.mode {
        wire::MODE_GLOBAL => wire::OP_DISPLAY | wire::OP_UPDATE,
        wire::MODE_POOL6
        | wire::MODE_POOL4
        | wire::MODE_BLACKLIST
        | wire::MODE_RFC6791
        | wire::MODE_EAMT => DATABASE_OPS,
        wire::MODE_BIB => DATABASE_OPS & !wire::OP_FLUSH,
        wire::MODE_SESSION => wire::OP_DISPLAY | wire::OP_COUNT,
        wire::MODE_LOGTIME => wire::OP_DISPLAY,
        mode => return Err(Error::InvalidArg(format!("unknown mode {mode:#x}"))),
    };
    if header.operation & allowed != header.operation || header.operation.count_ones() != 1 {
        return Err(Error::InvalidArg(format!(
            "operation {:#x} is not valid for mode {:#x}",
            header.operation, header.mode
        )));
    }

    let flavor_modes = match instance.flavor {
        Flavor::Siit => {
            wire::MODE_GLOBAL
                | wire::MODE_POOL6
                | wire::MODE_POOL4
                | wire::MODE_BLACKLIST
                | wire::MODE_RFC6791
                | wire::MODE_EAMT
                | wire::MODE_LOGTIME
        }
        Flavor::Nat64 => {
            wire::MODE_GLOBAL
                | wire::MODE_POOL6
                | wire::MODE_POOL4
                | wire::MODE_BIB
                | wire::MODE_SESSION
                | wire::MODE_LOGTIME
        }
    };
    if header.mode & flavor_modes != header.mode {
        return Err(Error::Unsupported);
    }
    Ok(())
}

// ---------------------------------------------------------------- GLOBAL

fn handle_global(instance: &Instance, op: u8, body: &mut Reader) -> Result<Vec<u8>> {
    match op {
        wire::OP_DISPLAY => {
            let cfg = instance.config();
            Ok(serialize_global(&cfg, instance.flavor, status(instance, &cfg)))
        }
        wire::OP_UPDATE => {
            let field = body.u8()?;
            let payload = body.remaining();
            let next = instance
                .config()
                .with_update(instance.flavor, field, payload)?;
            instance.publish_config(next);
            if Config::is_ttl_field(instance.flavor, field) {
                instance.expiry_rearm.notify_one();
            }
            Ok(Vec::new())
        }
        _ => Err(Error::InvalidArg("bad global operation".to_string())),
    }
}

/// Is the translator actually translating right now?
fn status(instance: &Instance, cfg: &Config) -> bool {
    if cfg.is_disable {
        return false;
    }
    match &instance.state {
        State::Nat64(state) => {
            !instance.pool6.read().is_empty() && !state.pool4.read().is_empty()
        }
        State::Siit(state) => {
            (!instance.pool6.read().is_empty() || !state.eamt.read().is_empty())
                && !state.pool4.read().is_empty()
        }
    }
}

/// The globals payload: shared fields, the plateau list, then the
/// flavor's own block. Multi-byte values travel in network order here,
/// TTLs as milliseconds.
pub fn serialize_global(cfg: &Config, flavor: Flavor, status: bool) -> Vec<u8> {
    let mut w = Writer::new();
    w.bool(status)
        .bool(cfg.is_disable)
        .bool(cfg.xlat.reset_traffic_class)
        .bool(cfg.xlat.reset_tos)
        .u8(cfg.xlat.new_tos)
        .bool(cfg.xlat.df_always_on)
        .bool(cfg.xlat.build_ipv6_fh)
        .bool(cfg.xlat.build_ipv4_id)
        .bool(cfg.xlat.lower_mtu_fail)
        .u16_be(cfg.xlat.mtu_plateaus.len() as u16);
    for plateau in &cfg.xlat.mtu_plateaus {
        w.u16_be(*plateau);
    }
    match flavor {
        Flavor::Nat64 => {
            w.u64_be(cfg.nat64.ttls.udp.as_millis() as u64)
                .u64_be(cfg.nat64.ttls.icmp.as_millis() as u64)
                .u64_be(cfg.nat64.ttls.tcp_est.as_millis() as u64)
                .u64_be(cfg.nat64.ttls.tcp_trans.as_millis() as u64)
                .u64_be(cfg.nat64.frag_ttl.as_millis() as u64)
                .u64_be(cfg.nat64.max_stored_pkts)
                .bool(cfg.nat64.src_icmp6errs_better)
                .bool(cfg.nat64.drop_by_addr)
                .bool(cfg.nat64.drop_icmp6_info)
                .bool(cfg.nat64.drop_external_tcp)
                .bool(cfg.nat64.bib_logging)
                .bool(cfg.nat64.session_logging);
        }
        Flavor::Siit => {
            w.bool(cfg.xlat.compute_udp_csum_zero)
                .bool(cfg.siit.randomize_rfc6791);
        }
    }
    w.into_bytes()
}

/// Rebuild a config from a globals payload. The status byte is computed,
/// not stored, so it round-trips as input only.
pub fn deserialize_global(payload: &[u8], flavor: Flavor) -> Result<Config> {
    fn take<'a>(payload: &mut &'a [u8], n: usize) -> Result<&'a [u8]> {
        if payload.len() < n {
            return Err(Error::InvalidArg("globals payload truncated".to_string()));
        }
        let (head, tail) = payload.split_at(n);
        *payload = tail;
        Ok(head)
    }
    fn byte(payload: &mut &[u8]) -> Result<u8> {
        Ok(take(payload, 1)?[0])
    }
    fn be16(payload: &mut &[u8]) -> Result<u16> {
        let b = take(payload, 2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }
    fn be64(payload: &mut &[u8]) -> Result<u64> {
        let b = take(payload, 8)?;
        Ok(u64::from_be_bytes(b.try_into().unwrap()))
    }

    let mut p = payload;
    let mut cfg = Config::default();
    let _status = byte(&mut p)?;
    cfg.is_disable = byte(&mut p)? != 0;
    cfg.xlat.reset_traffic_class = byte(&mut p)? != 0;
    cfg.xlat.reset_tos = byte(&mut p)? != 0;
    cfg.xlat.new_tos = byte(&mut p)?;
    cfg.xlat.df_always_on = byte(&mut p)? != 0;
    cfg.xlat.build_ipv6_fh = byte(&mut p)? != 0;
    cfg.xlat.build_ipv4_id = byte(&mut p)? != 0;
    cfg.xlat.lower_mtu_fail = byte(&mut p)? != 0;
    let plateau_count = be16(&mut p)?;
    let mut plateaus = Vec::with_capacity(plateau_count.into());
    for _ in 0..plateau_count {
        plateaus.push(be16(&mut p)?);
    }
    cfg.xlat.mtu_plateaus = plateaus;
    match flavor {
        Flavor::Nat64 => {
            cfg.nat64.ttls.udp = std::time::Duration::from_millis(be64(&mut p)?);
            cfg.nat64.ttls.icmp = std::time::Duration::from_millis(be64(&mut p)?);
            cfg.nat64.ttls.tcp_est = std::time::Duration::from_millis(be64(&mut p)?);
            cfg.nat64.ttls.tcp_trans = std::time::Duration::from_millis(be64(&mut p)?);
            cfg.nat64.frag_ttl = std::time::Duration::from_millis(be64(&mut p)?);
            cfg.nat64.max_stored_pkts = be64(&mut p)?;
            cfg.nat64.src_icmp6errs_better = byte(&mut p)? != 0;
            cfg.nat64.drop_by_addr = byte(&mut p)? != 0;
            cfg.nat64.drop_icmp6_info = byte(&mut p)? != 0;
            cfg.nat64.drop_external_tcp = byte(&mut p)? != 0;
            cfg.nat64.bib_logging = byte(&mut p)? != 0;
            cfg.nat64.session_logging = byte(&mut p)? != 0;
        }
        Flavor::Siit => {
            cfg.xlat.compute_udp_csum_zero = byte(&mut p)? != 0;
            cfg.siit.randomize_rfc6791 = byte(&mut p)? != 0;
        }
    }
    Ok(cfg)
}

// ----------------------------------------------------------------- POOL6

fn handle_pool6(instance: &Instance, op: u8, body: &mut Reader) -> Result<Vec<u8>> {
    match op {
        wire::OP_DISPLAY => {
            let cursor = body
                .bool()?
                .then(|| body.prefix6())
                .transpose()?;
            let pool6 = instance.pool6.read();
            let mut w = Writer::new();
            let mut count: u16 = 0;
            let mut more = false;
            for prefix in pool6.iter_from(cursor) {
                if w.len() + 17 > wire::MAX_RESPONSE_PAYLOAD {
                    more = true;
                    break;
                }
                w.prefix6(prefix);
                count += 1;
            }
            Ok(listing(count, w, more))
        }
        wire::OP_COUNT => Ok(count_payload(instance.pool6.read().count())),
        wire::OP_ADD => {
            let prefix = body.prefix6()?;
            instance.pool6.write().add(prefix)?;
            Ok(Vec::new())
        }
        wire::OP_REMOVE => {
            let prefix = body.prefix6()?;
            let quick = body.bool().unwrap_or(false);
            instance.pool6.write().remove(&prefix)?;
            if !quick {
                if let Some(state) = instance.nat64() {
                    sweep_sessions(state, |sessions| {
                        sessions.remove_by_local6_prefix(&prefix)
                    });
                }
            }
            Ok(Vec::new())
        }
        wire::OP_FLUSH => {
            let quick = body.bool().unwrap_or(false);
            instance.pool6.write().flush();
            if !quick {
                if let Some(state) = instance.nat64() {
                    sweep_sessions(state, SessionDb::flush);
                }
            }
            Ok(Vec::new())
        }
        _ => Err(Error::InvalidArg("bad pool6 operation".to_string())),
    }
}

// ----------------------------------------------------------------- POOL4

fn handle_pool4(instance: &Instance, op: u8, body: &mut Reader) -> Result<Vec<u8>> {
    match &instance.state {
        State::Nat64(state) => handle_pool4_nat64(instance, state, op, body),
        State::Siit(state) => handle_prefix4_pool(&state.pool4, op, body),
    }
}

fn handle_pool4_nat64(
    instance: &Instance,
    state: &Nat64State,
    op: u8,
    body: &mut Reader,
) -> Result<Vec<u8>> {
    match op {
        wire::OP_DISPLAY => {
            let cursor = body
                .bool()?
                .then(|| body.prefix4())
                .transpose()?;
            let pool4 = state.pool4.read();
            let mut w = Writer::new();
            let mut count: u16 = 0;
            let mut more = false;
            for entry in pool4.iter_from(cursor) {
                if w.len() + 9 > wire::MAX_RESPONSE_PAYLOAD {
                    more = true;
                    break;
                }
                w.prefix4(&entry.prefix)
                    .u16(*entry.ports.start())
                    .u16(*entry.ports.end());
                count += 1;
            }
            Ok(listing(count, w, more))
        }
        wire::OP_COUNT => Ok(count_payload(state.pool4.read().count())),
        wire::OP_ADD => {
            let prefix = body.prefix4()?;
            let port_min = body.u16()?;
            let port_max = body.u16()?;
            if port_min > port_max {
                return Err(Error::InvalidArg(format!(
                    "backwards port range {port_min}-{port_max}"
                )));
            }
            state.pool4.write().add(prefix, port_min..=port_max)?;
            Ok(Vec::new())
        }
        wire::OP_REMOVE => {
            let prefix = body.prefix4()?;
            let quick = body.bool().unwrap_or(false);
            state.pool4.write().remove(&prefix)?;
            if !quick {
                sweep_sessions(state, |sessions| sessions.remove_by_local4_prefix(&prefix));
                state.bib.write().remove_by_prefix4(&prefix);
            }
            instance.expiry_rearm.notify_one();
            Ok(Vec::new())
        }
        wire::OP_FLUSH => {
            let quick = body.bool().unwrap_or(false);
            state.pool4.write().flush();
            if !quick {
                sweep_sessions(state, SessionDb::flush);
                state.bib.write().flush();
            }
            instance.expiry_rearm.notify_one();
            Ok(Vec::new())
        }
        _ => Err(Error::InvalidArg("bad pool4 operation".to_string())),
    }
}

/// Remove sessions and release their bindings together.
fn sweep_sessions<F>(state: &Nat64State, remove: F)
where
    F: FnOnce(&mut SessionDb) -> Vec<Session>,
{
    let dead = remove(&mut state.sessions.write());
    if dead.is_empty() {
        return;
    }
    let mut bib = state.bib.write();
    for session in &dead {
        bib.detach_session(session.proto, &session.remote6);
    }
    log::debug!("Swept {} sessions", dead.len());
}

// ---------------------------------------------- SIIT prefix pools

fn handle_prefix4_pool(
    pool: &parking_lot::RwLock<prefix_pool::Pool4>,
    op: u8,
    body: &mut Reader,
) -> Result<Vec<u8>> {
    match op {
        wire::OP_DISPLAY => {
            let cursor = body
                .bool()?
                .then(|| body.prefix4())
                .transpose()?;
            let pool = pool.read();
            let mut w = Writer::new();
            let mut count: u16 = 0;
            let mut more = false;
            for prefix in pool.iter_from(cursor) {
                if w.len() + 5 > wire::MAX_RESPONSE_PAYLOAD {
                    more = true;
                    break;
                }
                w.prefix4(prefix);
                count += 1;
            }
            Ok(listing(count, w, more))
        }
        wire::OP_COUNT => Ok(count_payload(pool.read().count())),
        wire::OP_ADD => {
            let prefix = body.prefix4()?;
            pool.write().add(prefix)?;
            Ok(Vec::new())
        }
        wire::OP_REMOVE => {
            let prefix = body.prefix4()?;
            pool.write().remove(&prefix)?;
            Ok(Vec::new())
        }
        wire::OP_FLUSH => {
            pool.write().flush();
            Ok(Vec::new())
        }
        _ => Err(Error::InvalidArg("bad pool operation".to_string())),
    }
}

// ------------------------------------------------------------------ EAMT

fn handle_eamt(instance: &Instance, op: u8, body: &mut Reader) -> Result<Vec<u8>> {
    let state = instance.siit().ok_or(Error::Unsupported)?;
    match op {
        wire::OP_DISPLAY => {
            let cursor = body
                .bool()?
                .then(|| body.prefix4())
                .transpose()?;
            let eamt = state.eamt.read();
            let mut w = Writer::new();
            let mut count: u16 = 0;
            let mut more = false;
            for entry in eamt.iter_from(cursor) {
                if w.len() + 22 > wire::MAX_RESPONSE_PAYLOAD {
                    more = true;
                    break;
                }
                w.prefix4(&entry.prefix4).prefix6(&entry.prefix6);
                count += 1;
            }
            Ok(listing(count, w, more))
        }
        wire::OP_COUNT => Ok(count_payload(state.eamt.read().count())),
        wire::OP_ADD => {
            let prefix6 = body.prefix6()?;
            let prefix4 = body.prefix4()?;
            state.eamt.write().add(prefix6, prefix4)?;
            Ok(Vec::new())
        }
        wire::OP_REMOVE => {
            let prefix6 = body.bool()?.then(|| body.prefix6()).transpose()?;
            let prefix4 = body.bool()?.then(|| body.prefix4()).transpose()?;
            state.eamt.write().remove(prefix6, prefix4)?;
            Ok(Vec::new())
        }
        wire::OP_FLUSH => {
            state.eamt.write().flush();
            Ok(Vec::new())
        }
        _ => Err(Error::InvalidArg("bad EAMT operation".to_string())),
    }
}

// ------------------------------------------------------------------- BIB

fn parse_l4(body: &mut Reader) -> Result<L4Proto> {
    let number = body.u8()?;
    L4Proto::from_number(number)
        .ok_or_else(|| Error::InvalidArg(format!("unknown L4 protocol {number}")))
}

fn handle_bib(instance: &Instance, op: u8, body: &mut Reader) -> Result<Vec<u8>> {
    let state = instance.nat64().ok_or(Error::Unsupported)?;
    let proto = parse_l4(body)?;
    match op {
        wire::OP_DISPLAY => {
            let cursor = body
                .bool()?
                .then(|| body.taddr4())
                .transpose()?;
            let bib = state.bib.read();
            let mut w = Writer::new();
            let mut count: u16 = 0;
            let mut more = false;
            for entry in bib.iter_from(proto, cursor) {
                if w.len() + 25 > wire::MAX_RESPONSE_PAYLOAD {
                    more = true;
                    break;
                }
                w.taddr4(&entry.addr4)
                    .taddr6(&entry.addr6)
                    .bool(entry.is_static);
                count += 1;
            }
            Ok(listing(count, w, more))
        }
        wire::OP_COUNT => Ok(count_payload(state.bib.read().count(proto))),
        wire::OP_ADD => {
            let addr6 = body.taddr6()?;
            let addr4 = body.taddr4()?;
            if !state.pool4.read().contains(&addr4.addr) {
                return Err(Error::InvalidArg(format!(
                    "{} is not a pool4 address",
                    addr4.addr
                )));
            }
            state.bib.write().add_static(proto, addr6, addr4)?;
            Ok(Vec::new())
        }
        wire::OP_REMOVE => {
            let addr6 = body.bool()?.then(|| body.taddr6()).transpose()?;
            let addr4 = body.bool()?.then(|| body.taddr4()).transpose()?;
            let key = match (addr6, addr4) {
                (Some(addr6), _) => addr6,
                (None, Some(addr4)) => state
                    .bib
                    .read()
                    .key_by4(proto, &addr4)
                    .ok_or(Error::NotFound)?,
                (None, None) => {
                    return Err(Error::InvalidArg(
                        "BIB removal names neither side of the binding".to_string(),
                    ))
                }
            };
            state.bib.write().remove(proto, &key)?;
            Ok(Vec::new())
        }
        _ => Err(Error::InvalidArg("bad BIB operation".to_string())),
    }
}

// --------------------------------------------------------------- SESSION

fn handle_session(instance: &Instance, op: u8, body: &mut Reader) -> Result<Vec<u8>> {
    let state = instance.nat64().ok_or(Error::Unsupported)?;
    let proto = parse_l4(body)?;
    match op {
        wire::OP_DISPLAY => {
            let cursor = if body.bool()? {
                let remote4 = body.taddr4()?;
                let local4 = body.taddr4()?;
                Some((remote4, local4))
            } else {
                None
            };
            let cfg = instance.config();
            let now = Instant::now();
            let sessions = state.sessions.read();
            let mut w = Writer::new();
            let mut count: u16 = 0;
            let mut more = false;
            for session in sessions.iter_from(proto, cursor) {
                if w.len() + 57 > wire::MAX_RESPONSE_PAYLOAD {
                    more = true;
                    break;
                }
                let dying = session
                    .deadline(&cfg.nat64.ttls)
                    .saturating_duration_since(now);
                w.taddr6(&session.remote6)
                    .taddr6(&session.local6)
                    .taddr4(&session.local4)
                    .taddr4(&session.remote4)
                    .u64(dying.as_millis() as u64)
                    .u8(session.state.as_wire());
                count += 1;
            }
            Ok(listing(count, w, more))
        }
        wire::OP_COUNT => Ok(count_payload(state.sessions.read().count(proto))),
        _ => Err(Error::InvalidArg("bad session operation".to_string())),
    }
}

// --------------------------------------------------------------- helpers

fn listing(count: u16, records: Writer, more: bool) -> Vec<u8> {
    let mut w = Writer::new();
    w.u16(count);
    let mut out = w.into_bytes();
    out.extend_from_slice(&records.into_bytes());
    out.push(u8::from(more));
    out
}

fn count_payload(count: u64) -> Vec<u8> {
    count.to_le_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use nat_state::{TransportV4, TransportV6};

    use crate::pipeline::process;
    use crate::testpkt::ipv6_udp;

    fn nat64() -> Arc<Instance> {
        let instance = Instance::new(Flavor::Nat64);
        instance
            .pool6
            .write()
            .add("64:ff9b::/96".parse().unwrap())
            .unwrap();
        instance
            .nat64()
            .unwrap()
            .pool4
            .write()
            .add("198.51.100.0/32".parse().unwrap(), 1024..=65535)
            .unwrap();
        instance
    }

    fn siit() -> Arc<Instance> {
        Instance::new(Flavor::Siit)
    }

    fn status_of(response: &[u8]) -> i32 {
        i32::from_le_bytes(response[0..4].try_into().unwrap())
    }

    fn payload_of(response: &[u8]) -> &[u8] {
        &response[4..]
    }

    fn send(instance: &Instance, mode: u16, op: u8, body: &[u8]) -> Vec<u8> {
        let request = wire::request(instance.flavor.wire_type(), mode, op, body);
        dispatch(instance, &request, true)
    }

    #[test]
    fn test_bad_magic_is_version_mismatch() {
        let instance = nat64();
        let mut request = wire::request(b'n', wire::MODE_GLOBAL, wire::OP_DISPLAY, &[]);
        request[0] = b'x';
        let response = dispatch(&instance, &request, true);
        assert_eq!(status_of(&response), -22);
    }

    #[test]
    fn test_flavor_type_must_match() {
        let instance = nat64();
        let request = wire::request(b's', wire::MODE_GLOBAL, wire::OP_DISPLAY, &[]);
        assert_eq!(status_of(&dispatch(&instance, &request, true)), -22);
    }

    #[test]
    fn test_version_must_match() {
        let instance = nat64();
        let mut request = wire::request(b'n', wire::MODE_GLOBAL, wire::OP_DISPLAY, &[]);
        request[5] = 0xff;
        assert_eq!(status_of(&dispatch(&instance, &request, true)), -22);
    }

    #[test]
    fn test_length_must_match() {
        let instance = nat64();
        let mut request = wire::request(b'n', wire::MODE_GLOBAL, wire::OP_DISPLAY, &[]);
        request[9] = 99;
        assert_eq!(status_of(&dispatch(&instance, &request, true)), -22);
    }

    #[test]
    fn test_operation_matrix() {
        let instance = nat64();
        // Sessions are read-only.
        let mut body = vec![17u8]; // UDP
        body.extend_from_slice(&[0]);
        assert_eq!(
            status_of(&send(&instance, wire::MODE_SESSION, wire::OP_ADD, &body)),
            -22
        );
        // The BIB cannot be flushed.
        assert_eq!(
            status_of(&send(&instance, wire::MODE_BIB, wire::OP_FLUSH, &[17])),
            -22
        );
        // SIIT-only modes are unsupported on a NAT64.
        assert_eq!(
            status_of(&send(&instance, wire::MODE_EAMT, wire::OP_COUNT, &[])),
            -95
        );
        // The benchmark module is not part of this build.
        assert_eq!(
            status_of(&send(&instance, wire::MODE_LOGTIME, wire::OP_DISPLAY, &[])),
            -95
        );
    }

    #[test]
    fn test_mutations_need_privileges() {
        let instance = nat64();
        let mut w = Writer::new();
        w.prefix6(&"2001:db8:1::/96".parse().unwrap());
        let body = w.into_bytes();

        let request = wire::request(b'n', wire::MODE_POOL6, wire::OP_ADD, &body);
        let response = dispatch(&instance, &request, false);
        assert_eq!(status_of(&response), -1);

        // Reading needs none.
        let request = wire::request(b'n', wire::MODE_POOL6, wire::OP_COUNT, &[]);
        assert_eq!(status_of(&dispatch(&instance, &request, false)), 0);
    }

    #[test]
    fn test_pool6_crud_and_pagination() {
        let instance = nat64();
        for prefix in ["2001:db8:aaaa::/96", "2001:db8:bbbb::/96"] {
            let mut w = Writer::new();
            w.prefix6(&prefix.parse().unwrap());
            let response = send(&instance, wire::MODE_POOL6, wire::OP_ADD, &w.into_bytes());
            assert_eq!(status_of(&response), 0);
        }

        // Duplicate add reports EEXIST.
        let mut w = Writer::new();
        w.prefix6(&"2001:db8:aaaa::/96".parse().unwrap());
        assert_eq!(
            status_of(&send(&instance, wire::MODE_POOL6, wire::OP_ADD, &w.into_bytes())),
            -17
        );

        // Count sees all three (the fixture added 64:ff9b::/96).
        let response = send(&instance, wire::MODE_POOL6, wire::OP_COUNT, &[]);
        assert_eq!(status_of(&response), 0);
        assert_eq!(
            u64::from_le_bytes(payload_of(&response).try_into().unwrap()),
            3
        );

        // Display with no cursor returns everything.
        let response = send(&instance, wire::MODE_POOL6, wire::OP_DISPLAY, &[0]);
        let payload = payload_of(&response);
        let count = u16::from_le_bytes(payload[0..2].try_into().unwrap());
        assert_eq!(count, 3);
        assert_eq!(payload[payload.len() - 1], 0); // no more

        // Resume after the first returned prefix: two remain.
        let first_prefix = &payload[2..19];
        let mut body = vec![1u8];
        body.extend_from_slice(first_prefix);
        let response = send(&instance, wire::MODE_POOL6, wire::OP_DISPLAY, &body);
        let payload = payload_of(&response);
        assert_eq!(u16::from_le_bytes(payload[0..2].try_into().unwrap()), 2);

        // Exact-match removal only.
        let mut w = Writer::new();
        w.prefix6(&"2001:db8:cccc::/96".parse().unwrap());
        let mut body = w.into_bytes();
        body.push(1); // quick
        assert_eq!(
            status_of(&send(&instance, wire::MODE_POOL6, wire::OP_REMOVE, &body)),
            -2
        );
    }

    #[test]
    fn test_global_display_round_trips() {
        let instance = nat64();
        let response = send(&instance, wire::MODE_GLOBAL, wire::OP_DISPLAY, &[]);
        assert_eq!(status_of(&response), 0);

        let recovered = deserialize_global(payload_of(&response), Flavor::Nat64).unwrap();
        assert_eq!(recovered, *instance.config());

        // Same through the SIIT shape.
        let siit = siit();
        let response = send(&siit, wire::MODE_GLOBAL, wire::OP_DISPLAY, &[]);
        let recovered = deserialize_global(payload_of(&response), Flavor::Siit).unwrap();
        assert_eq!(recovered, *siit.config());
    }

    #[test]
    fn test_global_update_applies_atomically() {
        let instance = nat64();
        let before = instance.config();

        // drop_by_addr is NAT64 field 9.
        let response = send(&instance, wire::MODE_GLOBAL, wire::OP_UPDATE, &[9, 1]);
        assert_eq!(status_of(&response), 0);

        let after = instance.config();
        assert!(after.nat64.drop_by_addr);
        // The old snapshot is unchanged for whoever still holds it.
        assert!(!before.nat64.drop_by_addr);

        // Unknown field.
        let response = send(&instance, wire::MODE_GLOBAL, wire::OP_UPDATE, &[99, 1]);
        assert_eq!(status_of(&response), -22);
    }

    #[test]
    fn test_serialize_global_helper_round_trip() {
        let cfg = Config::default();
        for flavor in [Flavor::Nat64, Flavor::Siit] {
            let bytes = serialize_global(&cfg, flavor, true);
            assert_eq!(deserialize_global(&bytes, flavor).unwrap(), cfg);
        }
    }

    #[test]
    fn test_eamt_via_dispatch() {
        let instance = siit();
        let mut w = Writer::new();
        w.prefix6(&"2001:db8:cccc::/124".parse().unwrap())
            .prefix4(&"192.0.2.16/28".parse().unwrap());
        assert_eq!(
            status_of(&send(&instance, wire::MODE_EAMT, wire::OP_ADD, &w.into_bytes())),
            0
        );

        // Suffix mismatch is refused.
        let mut w = Writer::new();
        w.prefix6(&"2001:db8:dddd::/120".parse().unwrap())
            .prefix4(&"198.18.0.0/28".parse().unwrap());
        assert_eq!(
            status_of(&send(&instance, wire::MODE_EAMT, wire::OP_ADD, &w.into_bytes())),
            -22
        );

        // Remove by the IPv4 side alone: prefix6 flag off, prefix4 flag
        // on, then the prefix.
        let mut body = vec![0u8, 1];
        let mut w = Writer::new();
        w.prefix4(&"192.0.2.16/28".parse().unwrap());
        body.extend_from_slice(&w.into_bytes());
        let response = send(&instance, wire::MODE_EAMT, wire::OP_REMOVE, &body);
        assert_eq!(status_of(&response), 0);

        let response = send(&instance, wire::MODE_EAMT, wire::OP_COUNT, &[]);
        assert_eq!(
            u64::from_le_bytes(payload_of(&response).try_into().unwrap()),
            0
        );
    }

    #[test]
    fn test_bib_static_add_and_display() {
        let instance = nat64();
        let addr6 = TransportV6::new("2001:db8::1".parse().unwrap(), 8080);
        let addr4 = TransportV4::new("198.51.100.0".parse().unwrap(), 8080);

        let mut body = vec![6u8]; // TCP
        let mut w = Writer::new();
        w.taddr6(&addr6).taddr4(&addr4);
        body.extend_from_slice(&w.into_bytes());
        assert_eq!(
            status_of(&send(&instance, wire::MODE_BIB, wire::OP_ADD, &body)),
            0
        );

        // Static entries must come from pool4.
        let mut body = vec![6u8];
        let mut w = Writer::new();
        w.taddr6(&TransportV6::new("2001:db8::2".parse().unwrap(), 80))
            .taddr4(&TransportV4::new("203.0.113.9".parse().unwrap(), 80));
        body.extend_from_slice(&w.into_bytes());
        assert_eq!(
            status_of(&send(&instance, wire::MODE_BIB, wire::OP_ADD, &body)),
            -22
        );

        // Display returns the one static entry.
        let response = send(&instance, wire::MODE_BIB, wire::OP_DISPLAY, &[6, 0]);
        let payload = payload_of(&response);
        assert_eq!(u16::from_le_bytes(payload[0..2].try_into().unwrap()), 1);
        // Record: taddr4 (6 bytes), taddr6 (18), is_static (1).
        let record = &payload[2..27];
        assert_eq!(&record[0..4], &[198, 51, 100, 0]);
        assert_eq!(record[24], 1);

        // Remove by the IPv4 side.
        let mut body = vec![6u8, 0, 1];
        let mut w = Writer::new();
        w.taddr4(&addr4);
        body.extend_from_slice(&w.into_bytes());
        assert_eq!(
            status_of(&send(&instance, wire::MODE_BIB, wire::OP_REMOVE, &body)),
            0
        );
        let response = send(&instance, wire::MODE_BIB, wire::OP_COUNT, &[6]);
        assert_eq!(
            u64::from_le_bytes(payload_of(&response).try_into().unwrap()),
            0
        );
    }

    #[test]
    fn test_pool4_remove_sweeps_state() {
        let instance = nat64();

        // Build some state through the dataplane.
        let packet = ipv6_udp(
            ("2001:db8::1".parse().unwrap(), 1234),
            ("64:ff9b::cb00:7105".parse().unwrap(), 80),
            b"hello",
        );
        process(&instance, &packet);
        let state = instance.nat64().unwrap();
        assert_eq!(state.sessions.read().count(L4Proto::Udp), 1);
        assert_eq!(state.bib.read().count(L4Proto::Udp), 1);

        // Quick removal keeps the state around.
        let mut w = Writer::new();
        w.prefix4(&"198.51.100.0/32".parse().unwrap());
        let mut body = w.into_bytes();
        body.push(1);
        assert_eq!(
            status_of(&send(&instance, wire::MODE_POOL4, wire::OP_REMOVE, &body)),
            0
        );
        assert_eq!(state.sessions.read().count(L4Proto::Udp), 1);

        // Re-add, then non-quick removal tears sessions and bindings
        // down.
        let mut w = Writer::new();
        w.prefix4(&"198.51.100.0/32".parse().unwrap());
        let mut body = w.into_bytes();
        body.extend_from_slice(&1024u16.to_le_bytes());
        body.extend_from_slice(&65535u16.to_le_bytes());
        assert_eq!(
            status_of(&send(&instance, wire::MODE_POOL4, wire::OP_ADD, &body)),
            0
        );

        let mut w = Writer::new();
        w.prefix4(&"198.51.100.0/32".parse().unwrap());
        let mut body = w.into_bytes();
        body.push(0);
        assert_eq!(
            status_of(&send(&instance, wire::MODE_POOL4, wire::OP_REMOVE, &body)),
            0
        );
        assert_eq!(state.sessions.read().count(L4Proto::Udp), 0);
        assert_eq!(state.bib.read().count(L4Proto::Udp), 0);
    }

    #[test]
    fn test_session_display_records() {
        let instance = nat64();
        let packet = ipv6_udp(
            ("2001:db8::1".parse().unwrap(), 1234),
            ("64:ff9b::cb00:7105".parse().unwrap(), 80),
            b"hello",
        );
        process(&instance, &packet);

        let response = send(&instance, wire::MODE_SESSION, wire::OP_DISPLAY, &[17, 0]);
        assert_eq!(status_of(&response), 0);
        let payload = payload_of(&response);
        assert_eq!(u16::from_le_bytes(payload[0..2].try_into().unwrap()), 1);

        // Record: remote6 (18) local6 (18) local4 (6) remote4 (6)
        // dying (8) state (1) = 57 bytes.
        let record = &payload[2..59];
        // remote6 address.
        assert_eq!(
            &record[0..16],
            &"2001:db8::1"
                .parse::<std::net::Ipv6Addr>()
                .unwrap()
                .octets()
        );
        // Dying time is positive and at most the UDP TTL.
        let dying = u64::from_le_bytes(record[48..56].try_into().unwrap());
        assert!(dying > 0 && dying <= 5 * 60 * 1000);
        // UDP sessions display as established.
        assert_eq!(record[56], 2);
    }
}
