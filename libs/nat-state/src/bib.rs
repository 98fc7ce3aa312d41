use ipnet::Ipv4Net;
use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::pool4::Pool4Db;
use crate::types::{L4Proto, TransportV4, TransportV6};

/// One binding between an IPv6 transport address and the IPv4 transport
/// address the translator speaks for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BibEntry {
    pub addr6: TransportV6,
    pub addr4: TransportV4,
    pub proto: L4Proto,
    /// User-created entries survive their last session.
    pub is_static: bool,
    /// Number of sessions currently built on this binding.
    pub sessions: usize,
}

#[derive(Debug, Default)]
struct BibTable {
    by6: FxHashMap<TransportV6, BibEntry>,
    by4: FxHashMap<TransportV4, TransportV6>,
}

/// The Binding Information Base, one table per transport protocol, each
/// indexed by both of its key columns.
#[derive(Debug, Default)]
pub struct BibDb {
    tables: [BibTable; 3],
}

impl BibDb {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self, proto: L4Proto) -> &BibTable {
        &self.tables[proto.index()]
    }

    fn table_mut(&mut self, proto: L4Proto) -> &mut BibTable {
        &mut self.tables[proto.index()]
    }

    pub fn get_by6(&self, proto: L4Proto, addr6: &TransportV6) -> Option<&BibEntry> {
        self.table(proto).by6.get(addr6)
    }

    pub fn get_by4(&self, proto: L4Proto, addr4: &TransportV4) -> Option<&BibEntry> {
        let table = self.table(proto);
        table.by4.get(addr4).and_then(|a6| table.by6.get(a6))
    }

    /// Return the binding for `addr6`, creating one from pool4 if none
    /// exists yet.
    pub fn find_or_create(
        &mut self,
        proto: L4Proto,
        addr6: TransportV6,
        pool4: &Pool4Db,
    ) -> Result<TransportV4> {
        if let Some(entry) = self.table(proto).by6.get(&addr6) {
            return Ok(entry.addr4);
        }

        let table = &mut self.tables[proto.index()];
        let addr4 = pool4.allocate(&addr6, |candidate| table.by4.contains_key(candidate))?;
        table.by6.insert(
            addr6,
            BibEntry {
                addr6,
                addr4,
                proto,
                is_static: false,
                sessions: 0,
            },
        );
        table.by4.insert(addr4, addr6);
        Ok(addr4)
    }

    /// Insert a user-requested static binding.
    pub fn add_static(
        &mut self,
        proto: L4Proto,
        addr6: TransportV6,
        addr4: TransportV4,
    ) -> Result<()> {
        let table = self.table_mut(proto);
        if table.by6.contains_key(&addr6) {
            return Err(Error::BibExists6(addr6));
        }
        if table.by4.contains_key(&addr4) {
            return Err(Error::BibExists4(addr4));
        }
        table.by6.insert(
            addr6,
            BibEntry {
                addr6,
                addr4,
                proto,
                is_static: true,
                sessions: 0,
            },
        );
        table.by4.insert(addr4, addr6);
        Ok(())
    }

    /// Remove a binding. Dynamic entries with live sessions refuse.
    pub fn remove(&mut self, proto: L4Proto, addr6: &TransportV6) -> Result<()> {
        let table = self.table_mut(proto);
        let entry = table.by6.get(addr6).ok_or(Error::BibNotFound)?;
        if entry.sessions > 0 && !entry.is_static {
            return Err(Error::BibInUse(entry.sessions));
        }
        let entry = table.by6.remove(addr6).unwrap();
        table.by4.remove(&entry.addr4);
        Ok(())
    }

    /// Resolve a v4 transport address to its v6 key, for control requests
    /// that name the binding by its IPv4 side.
    pub fn key_by4(&self, proto: L4Proto, addr4: &TransportV4) -> Option<TransportV6> {
        self.table(proto).by4.get(addr4).copied()
    }

    /// A new session was attached to the binding.
    pub fn attach_session(&mut self, proto: L4Proto, addr6: &TransportV6) {
        if let Some(entry) = self.table_mut(proto).by6.get_mut(addr6) {
            entry.sessions += 1;
        }
    }

    /// A session was detached. Dynamic bindings die with their last
    /// session; returns true when the entry was removed.
    pub fn detach_session(&mut self, proto: L4Proto, addr6: &TransportV6) -> bool {
        let table = self.table_mut(proto);
        let Some(entry) = table.by6.get_mut(addr6) else {
            return false;
        };
        entry.sessions = entry.sessions.saturating_sub(1);
        if entry.sessions == 0 && !entry.is_static {
            let entry = table.by6.remove(addr6).unwrap();
            table.by4.remove(&entry.addr4);
            return true;
        }
        false
    }

    pub fn count(&self, proto: L4Proto) -> u64 {
        self.table(proto).by6.len() as u64
    }

    /// Entries in v4-transport-address order, resuming after `cursor`.
    /// Display-path only; this sorts a snapshot of the keys.
    pub fn iter_from(&self, proto: L4Proto, cursor: Option<TransportV4>) -> Vec<BibEntry> {
        let table = self.table(proto);
        let mut keys: Vec<&TransportV4> = table
            .by4
            .keys()
            .filter(|k| cursor.map_or(true, |c| **k > c))
            .collect();
        keys.sort_unstable();
        keys.iter()
            .filter_map(|k| table.by4.get(*k).and_then(|a6| table.by6.get(a6)))
            .cloned()
            .collect()
    }

    /// Drop every session-free binding whose IPv4 address falls inside
    /// `prefix`. Used by pool4 removal after the session sweep has
    /// detached everything dynamic.
    pub fn remove_by_prefix4(&mut self, prefix: &Ipv4Net) -> usize {
        let mut removed = 0;
        for table in &mut self.tables {
            let doomed: Vec<TransportV4> = table
                .by4
                .keys()
                .filter(|a4| prefix.contains(&a4.addr))
                .copied()
                .collect();
            for a4 in doomed {
                let Some(a6) = table.by4.get(&a4).copied() else {
                    continue;
                };
                if table.by6.get(&a6).map_or(false, |e| e.sessions == 0) {
                    table.by6.remove(&a6);
                    table.by4.remove(&a4);
                    removed += 1;
                }
            }
        }
        removed
    }

    pub fn flush(&mut self) {
        for table in &mut self.tables {
            table.by6.clear();
            table.by4.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t6(s: &str, port: u16) -> TransportV6 {
        TransportV6::new(s.parse().unwrap(), port)
    }

    fn t4(s: &str, port: u16) -> TransportV4 {
        TransportV4::new(s.parse().unwrap(), port)
    }

    fn pool() -> Pool4Db {
        let mut db = Pool4Db::new();
        db.add("198.51.100.0/32".parse().unwrap(), 1024..=65535).unwrap();
        db
    }

    #[test]
    fn test_find_or_create_preserves_port() {
        let mut bib = BibDb::new();
        let got = bib
            .find_or_create(L4Proto::Udp, t6("2001:db8::1", 1234), &pool())
            .unwrap();
        assert_eq!(got, t4("198.51.100.0", 1234));

        // Second call returns the same binding without consulting pool4.
        let again = bib
            .find_or_create(L4Proto::Udp, t6("2001:db8::1", 1234), &Pool4Db::new())
            .unwrap();
        assert_eq!(again, got);
        assert_eq!(bib.count(L4Proto::Udp), 1);
    }

    #[test]
    fn test_collision_gets_new_port() {
        let mut bib = BibDb::new();
        let pool = pool();
        let a = bib
            .find_or_create(L4Proto::Udp, t6("2001:db8::1", 1234), &pool)
            .unwrap();
        let b = bib
            .find_or_create(L4Proto::Udp, t6("2001:db8::2", 1234), &pool)
            .unwrap();
        assert_ne!(a, b);
        // Same parity, per the allocation rules.
        assert_eq!(b.port % 2, 0);
    }

    #[test]
    fn test_proto_separation() {
        let mut bib = BibDb::new();
        let pool = pool();
        bib.find_or_create(L4Proto::Udp, t6("2001:db8::1", 1234), &pool).unwrap();
        bib.find_or_create(L4Proto::Tcp, t6("2001:db8::1", 1234), &pool).unwrap();
        assert_eq!(bib.count(L4Proto::Udp), 1);
        assert_eq!(bib.count(L4Proto::Tcp), 1);
        assert_eq!(bib.count(L4Proto::Icmp), 0);
    }

    #[test]
    fn test_static_lifecycle() {
        let mut bib = BibDb::new();
        bib.add_static(L4Proto::Tcp, t6("2001:db8::1", 80), t4("198.51.100.0", 80)).unwrap();
        assert_eq!(
            bib.add_static(L4Proto::Tcp, t6("2001:db8::1", 80), t4("198.51.100.0", 81)),
            Err(Error::BibExists6(t6("2001:db8::1", 80)))
        );
        assert_eq!(
            bib.add_static(L4Proto::Tcp, t6("2001:db8::2", 80), t4("198.51.100.0", 80)),
            Err(Error::BibExists4(t4("198.51.100.0", 80)))
        );

        // Statics survive their sessions.
        bib.attach_session(L4Proto::Tcp, &t6("2001:db8::1", 80));
        assert!(!bib.detach_session(L4Proto::Tcp, &t6("2001:db8::1", 80)));
        assert_eq!(bib.count(L4Proto::Tcp), 1);
    }

    #[test]
    fn test_dynamic_dies_with_last_session() {
        let mut bib = BibDb::new();
        let key = t6("2001:db8::1", 1234);
        bib.find_or_create(L4Proto::Udp, key, &pool()).unwrap();
        bib.attach_session(L4Proto::Udp, &key);
        bib.attach_session(L4Proto::Udp, &key);

        assert!(!bib.detach_session(L4Proto::Udp, &key));
        assert!(bib.detach_session(L4Proto::Udp, &key));
        assert_eq!(bib.count(L4Proto::Udp), 0);
    }

    #[test]
    fn test_remove_refuses_in_use() {
        let mut bib = BibDb::new();
        let key = t6("2001:db8::1", 1234);
        bib.find_or_create(L4Proto::Udp, key, &pool()).unwrap();
        bib.attach_session(L4Proto::Udp, &key);
        assert_eq!(bib.remove(L4Proto::Udp, &key), Err(Error::BibInUse(1)));
        bib.detach_session(L4Proto::Udp, &key);
        assert_eq!(bib.remove(L4Proto::Udp, &key), Err(Error::BibNotFound));
    }

    #[test]
    fn test_iter_ordered_by_v4() {
        let mut bib = BibDb::new();
        bib.add_static(L4Proto::Udp, t6("2001:db8::3", 3), t4("198.51.100.3", 3)).unwrap();
        bib.add_static(L4Proto::Udp, t6("2001:db8::1", 1), t4("198.51.100.1", 1)).unwrap();
        bib.add_static(L4Proto::Udp, t6("2001:db8::2", 2), t4("198.51.100.2", 2)).unwrap();

        let all = bib.iter_from(L4Proto::Udp, None);
        let addrs: Vec<TransportV4> = all.iter().map(|e| e.addr4).collect();
        assert_eq!(addrs, vec![t4("198.51.100.1", 1), t4("198.51.100.2", 2), t4("198.51.100.3", 3)]);

        let rest = bib.iter_from(L4Proto::Udp, Some(t4("198.51.100.1", 1)));
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0].addr4, t4("198.51.100.2", 2));
    }
}
