use std::time::{Duration, Instant};

use ipnet::{Ipv4Net, Ipv6Net};
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::types::{L4Proto, SessionState, TransportV4, TransportV6};

/// Session lifetimes per protocol and TCP state. The fragment TTL lives
/// with the fragment DB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ttls {
    pub udp: Duration,
    pub icmp: Duration,
    pub tcp_est: Duration,
    pub tcp_trans: Duration,
}

impl Ttls {
    fn for_session(&self, proto: L4Proto, state: SessionState) -> Duration {
        match proto {
            L4Proto::Udp => self.udp,
            L4Proto::Icmp => self.icmp,
            L4Proto::Tcp => match state {
                // Single-FIN states keep the established lifetime; only
                // the transitory states use the short one.
                SessionState::Established
                | SessionState::V4FinRcv
                | SessionState::V6FinRcv => self.tcp_est,
                _ => self.tcp_trans,
            },
        }
    }
}

/// A session is named by its IPv6-side column pair; the IPv4-side pair is
/// a secondary index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub remote6: TransportV6,
    pub local6: TransportV6,
}

/// One translated flow.
#[derive(Debug, Clone)]
pub struct Session {
    /// The IPv6 node.
    pub remote6: TransportV6,
    /// Our IPv6 face of the IPv4 node.
    pub local6: TransportV6,
    /// Our IPv4 face of the IPv6 node (the BIB's v4 column).
    pub local4: TransportV4,
    /// The IPv4 node.
    pub remote4: TransportV4,
    pub proto: L4Proto,
    pub state: SessionState,
    pub update_time: Instant,
    /// A buffered v4-initiated SYN, waiting for the v6 side to answer.
    pub stored_pkt: Option<Vec<u8>>,
    seq: u64,
}

impl Session {
    pub fn key(&self) -> SessionKey {
        SessionKey {
            remote6: self.remote6,
            local6: self.local6,
        }
    }

    pub fn key4(&self) -> (TransportV4, TransportV4) {
        (self.remote4, self.local4)
    }

    pub fn deadline(&self, ttls: &Ttls) -> Instant {
        self.update_time + ttls.for_session(self.proto, self.state)
    }
}

#[derive(Debug, Default)]
struct SessionTable {
    map: FxHashMap<SessionKey, Session>,
    by4: FxHashMap<(TransportV4, TransportV4), SessionKey>,
    /// Expiry list ordered by update time: sequence numbers are handed
    /// out monotonically and reassigned on every touch.
    lru: BTreeMap<u64, SessionKey>,
}

/// The session database, one table per transport protocol.
#[derive(Debug, Default)]
pub struct SessionDb {
    tables: [SessionTable; 3],
    next_seq: u64,
    /// Live count of buffered v4-initiated SYNs across all tables.
    stored_pkts: usize,
}

impl SessionDb {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self, proto: L4Proto) -> &SessionTable {
        &self.tables[proto.index()]
    }

    pub fn get(&self, proto: L4Proto, key: &SessionKey) -> Option<&Session> {
        self.table(proto).map.get(key)
    }

    pub fn get_by4(
        &self,
        proto: L4Proto,
        remote4: TransportV4,
        local4: TransportV4,
    ) -> Option<&Session> {
        let table = self.table(proto);
        table
            .by4
            .get(&(remote4, local4))
            .and_then(|key| table.map.get(key))
    }

    pub fn stored_pkt_count(&self) -> usize {
        self.stored_pkts
    }

    /// Address-dependent filtering: has `local4` ever spoken with this
    /// remote IPv4 address, on any port?
    pub fn exists_local4_remote_addr(
        &self,
        proto: L4Proto,
        local4: TransportV4,
        remote_addr: std::net::Ipv4Addr,
    ) -> bool {
        self.table(proto)
            .map
            .values()
            .any(|s| s.local4 == local4 && s.remote4.addr == remote_addr)
    }

    /// Insert a new session stamped `now`.
    pub fn insert(&mut self, now: Instant, mut session: Session) -> Result<()> {
        let proto = session.proto;
        let key = session.key();
        let table = &mut self.tables[proto.index()];
        if table.map.contains_key(&key) {
            return Err(Error::SessionExists);
        }

        self.next_seq += 1;
        session.update_time = now;
        session.seq = self.next_seq;
        if session.stored_pkt.is_some() {
            self.stored_pkts += 1;
        }
        table.by4.insert(session.key4(), key);
        table.lru.insert(session.seq, key);
        table.map.insert(key, session);
        Ok(())
    }

    /// Refresh a session's update time and optionally move its state,
    /// pushing it to the tail of the expiry list.
    pub fn touch(
        &mut self,
        proto: L4Proto,
        key: &SessionKey,
        now: Instant,
        new_state: Option<SessionState>,
    ) -> Option<SessionState> {
        self.next_seq += 1;
        let seq = self.next_seq;
        let table = &mut self.tables[proto.index()];
        let session = table.map.get_mut(key)?;

        table.lru.remove(&session.seq);
        session.seq = seq;
        session.update_time = now;
        if let Some(state) = new_state {
            session.state = state;
        }
        table.lru.insert(seq, *key);
        Some(session.state)
    }

    /// Pull the buffered SYN out of a v4-initiated session, if any.
    pub fn take_stored_pkt(&mut self, proto: L4Proto, key: &SessionKey) -> Option<Vec<u8>> {
        let pkt = self.tables[proto.index()]
            .map
            .get_mut(key)
            .and_then(|s| s.stored_pkt.take());
        if pkt.is_some() {
            self.stored_pkts -= 1;
        }
        pkt
    }

    pub fn remove(&mut self, proto: L4Proto, key: &SessionKey) -> Option<Session> {
        let table = &mut self.tables[proto.index()];
        let session = table.map.remove(key)?;
        table.by4.remove(&session.key4());
        table.lru.remove(&session.seq);
        if session.stored_pkt.is_some() {
            self.stored_pkts -= 1;
        }
        Some(session)
    }

    /// The next instant at which some session may die, considering only
    /// the head of each expiry list.
    pub fn next_deadline(&self, ttls: &Ttls) -> Option<Instant> {
        self.tables
            .iter()
            .filter_map(|table| {
                let (_, key) = table.lru.iter().next()?;
                table.map.get(key).map(|s| s.deadline(ttls))
            })
            .min()
    }

    /// Remove and return every session whose deadline has passed. Walks
    /// each expiry list from the head; a session whose state shortened
    /// its TTL behind a longer-lived neighbor is caught one sweep late.
    pub fn expire_at(&mut self, now: Instant, ttls: &Ttls) -> Vec<Session> {
        let mut dead = Vec::new();
        for table in &mut self.tables {
            loop {
                let Some((&seq, &key)) = table.lru.iter().next() else {
                    break;
                };
                let expired = table
                    .map
                    .get(&key)
                    .map_or(true, |s| s.deadline(ttls) <= now);
                if !expired {
                    break;
                }
                table.lru.remove(&seq);
                if let Some(session) = table.map.remove(&key) {
                    table.by4.remove(&session.key4());
                    dead.push(session);
                }
            }
        }
        for s in &dead {
            if s.stored_pkt.is_some() {
                self.stored_pkts -= 1;
            }
        }
        dead
    }

    /// Remove every session whose local IPv4 address falls in `prefix`.
    /// This is the non-quick pool4 removal sweep.
    pub fn remove_by_local4_prefix(&mut self, prefix: &Ipv4Net) -> Vec<Session> {
        self.remove_matching(|s| prefix.contains(&s.local4.addr))
    }

    /// Remove every session whose local IPv6 address falls in `prefix`.
    /// This is the non-quick pool6 removal sweep.
    pub fn remove_by_local6_prefix(&mut self, prefix: &Ipv6Net) -> Vec<Session> {
        self.remove_matching(|s| prefix.contains(&s.local6.addr))
    }

    fn remove_matching<F>(&mut self, mut pred: F) -> Vec<Session>
    where
        F: FnMut(&Session) -> bool,
    {
        let mut dead = Vec::new();
        for table in &mut self.tables {
            let doomed: Vec<SessionKey> = table
                .map
                .values()
                .filter(|s| pred(s))
                .map(Session::key)
                .collect();
            for key in doomed {
                if let Some(session) = table.map.remove(&key) {
                    table.by4.remove(&session.key4());
                    table.lru.remove(&session.seq);
                    dead.push(session);
                }
            }
        }
        for s in &dead {
            if s.stored_pkt.is_some() {
                self.stored_pkts -= 1;
            }
        }
        dead
    }

    pub fn count(&self, proto: L4Proto) -> u64 {
        self.table(proto).map.len() as u64
    }

    pub fn flush(&mut self) -> Vec<Session> {
        self.remove_matching(|_| true)
    }

    /// Sessions in (remote4, local4) order for display, resuming after
    /// `cursor`.
    pub fn iter_from(
        &self,
        proto: L4Proto,
        cursor: Option<(TransportV4, TransportV4)>,
    ) -> Vec<Session> {
        let table = self.table(proto);
        let mut sessions: Vec<&Session> = table
            .map
            .values()
            .filter(|s| cursor.map_or(true, |c| s.key4() > c))
            .collect();
        sessions.sort_unstable_by_key(|s| s.key4());
        sessions.into_iter().cloned().collect()
    }
}

/// Build a fresh session record. The sequence and timestamp are assigned
/// by `SessionDb::insert`.
#[allow(clippy::too_many_arguments)]
pub fn new_session(
    remote6: TransportV6,
    local6: TransportV6,
    local4: TransportV4,
    remote4: TransportV4,
    proto: L4Proto,
    state: SessionState,
    stored_pkt: Option<Vec<u8>>,
) -> Session {
    Session {
        remote6,
        local6,
        local4,
        remote4,
        proto,
        state,
        update_time: Instant::now(),
        stored_pkt,
        seq: 0,
    }
}
