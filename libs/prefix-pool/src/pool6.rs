use std::net::{Ipv4Addr, Ipv6Addr};

use ipnet::Ipv6Net;

use crate::error::{Error, Result};
use crate::pool::Pool6Set;
use crate::rfc6052;

/// The set of RFC 6052 translation prefixes.
///
/// A thin layer over `PrefixPool` that additionally enforces the legal
/// RFC 6052 prefix lengths and knows how to move addresses across the
/// translation boundary.
#[derive(Debug, Clone, Default)]
pub struct Pool6 {
    pool: Pool6Set,
}

impl Pool6 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, prefix: Ipv6Net) -> Result<()> {
        if !rfc6052::LEGAL_PREFIX_LENS.contains(&prefix.prefix_len()) {
            return Err(Error::BadPrefixLength(prefix.prefix_len()));
        }
        self.pool.add(prefix)
    }

    pub fn remove(&mut self, prefix: &Ipv6Net) -> Result<()> {
        self.pool.remove(prefix)
    }

    pub fn flush(&mut self) {
        self.pool.flush();
    }

    pub fn count(&self) -> u64 {
        self.pool.count()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    /// Longest-prefix match of `addr` against the pool.
    pub fn contains(&self, addr: &Ipv6Addr) -> Option<Ipv6Net> {
        self.pool.contains(addr)
    }

    pub fn iter_from(&self, cursor: Option<Ipv6Net>) -> impl Iterator<Item = &Ipv6Net> {
        self.pool.iter_from(cursor)
    }

    /// Extract the IPv4 address embedded in `addr`, if `addr` falls under
    /// one of the pool's prefixes.
    pub fn translate_6to4(&self, addr: &Ipv6Addr) -> Option<Ipv4Addr> {
        let prefix = self.contains(addr)?;
        rfc6052::extract_ipv4(*addr, prefix.prefix_len()).ok()
    }

    /// Embed `addr` into `prefix`. The prefix does not have to be in the
    /// pool; callers pass whichever pool prefix they matched earlier.
    pub fn translate_4to6(addr: Ipv4Addr, prefix: Ipv6Net) -> Result<Ipv6Addr> {
        rfc6052::embed_ipv4(addr, prefix)
    }

    /// The first prefix in the pool, used when an IPv4 address needs a
    /// representation and no specific prefix was matched.
    pub fn first(&self) -> Option<Ipv6Net> {
        self.pool.iter().next().copied()
    }
}
