use ipnet::{Ipv4Net, Ipv6Net};

use crate::error::{Error, Result};
use crate::prefix::Net;

/// An ordered set of non-overlapping prefixes.
///
/// This is the storage behind the IPv4 membership pool, the blacklist and
/// the RFC 6791 pool, as well as the raw half of `Pool6`. Entries are kept
/// sorted so iteration is deterministic and resumable by cursor.
#[derive(Debug, Clone)]
pub struct PrefixPool<N: Net> {
    entries: Vec<N>,
}

impl<N: Net> Default for PrefixPool<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// An IPv4 prefix pool.
pub type Pool4 = PrefixPool<Ipv4Net>;

/// An IPv6 prefix pool. See `Pool6` for the RFC 6052 wrapper.
pub type Pool6Set = PrefixPool<Ipv6Net>;

impl<N: Net> PrefixPool<N> {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Insert a prefix, rejecting duplicates and overlaps.
    pub fn add(&mut self, prefix: N) -> Result<()> {
        if !prefix.is_canonical() {
            return Err(Error::HostBitsSet(prefix.as_ipnet()));
        }
        for existing in &self.entries {
            if *existing == prefix {
                return Err(Error::Exists(prefix.as_ipnet()));
            }
            if existing.intersects(&prefix) {
                return Err(Error::Intersects(prefix.as_ipnet(), existing.as_ipnet()));
            }
        }
        let pos = self.entries.partition_point(|e| *e < prefix);
        self.entries.insert(pos, prefix);
        Ok(())
    }

    /// Remove exactly `prefix`. Containment is not enough; the entry must
    /// match address and length.
    pub fn remove(&mut self, prefix: &N) -> Result<()> {
        match self.entries.iter().position(|e| e == prefix) {
            Some(pos) => {
                self.entries.remove(pos);
                Ok(())
            }
            None => Err(Error::NotFound(prefix.as_ipnet())),
        }
    }

    pub fn flush(&mut self) {
        self.entries.clear();
    }

    pub fn count(&self) -> u64 {
        self.entries.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Longest-prefix match. Entries never overlap, so at most one entry
    /// can contain the address.
    pub fn contains(&self, addr: &N::Addr) -> Option<N> {
        self.entries.iter().find(|e| e.contains_addr(addr)).copied()
    }

    /// Total number of addresses covered by the pool, saturating.
    pub fn total_addr_count(&self) -> u64 {
        self.entries
            .iter()
            .fold(0u64, |acc, e| acc.saturating_add(e.addr_count()))
    }

    /// Iterate in stored order, resuming after `cursor` when one is given.
    /// If the cursor entry has been removed, iteration resumes at the next
    /// surviving prefix.
    pub fn iter_from(&self, cursor: Option<N>) -> impl Iterator<Item = &N> {
        let start = match cursor {
            Some(c) => self.entries.partition_point(move |e| *e <= c),
            None => 0,
        };
        self.entries[start..].iter()
    }

    pub fn iter(&self) -> impl Iterator<Item = &N> {
        self.entries.iter()
    }
}
