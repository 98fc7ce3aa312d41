use std::net::Ipv4Addr;
use std::ops::RangeInclusive;

use ipnet::Ipv4Net;

use crate::error::{Error, Result};
use crate::types::{TransportV4, TransportV6};

/// The border between the well-known and ephemeral port ranges. An
/// allocation stays on its own side of it whenever it can.
const EPHEMERAL_START: u16 = 1024;

/// One pool4 row: an IPv4 prefix and the ports its addresses lend out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pool4Entry {
    pub prefix: Ipv4Net,
    pub ports: RangeInclusive<u16>,
}

impl Pool4Entry {
    /// Every address in the prefix, network and broadcast included.
    fn addrs(&self) -> impl Iterator<Item = Ipv4Addr> + '_ {
        let base = u32::from(self.prefix.network());
        let count = 1u64 << (32 - self.prefix.prefix_len());
        (0..count).map(move |i| Ipv4Addr::from(base.wrapping_add(i as u32)))
    }
}

/// The IPv4 transport addresses a NAT64 may bind IPv6 sources to.
#[derive(Debug, Clone, Default)]
pub struct Pool4Db {
    entries: Vec<Pool4Entry>,
}

impl Pool4Db {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a prefix and its port range. Prefix overlap with any existing
    /// entry is rejected regardless of the port ranges involved.
    pub fn add(&mut self, prefix: Ipv4Net, ports: RangeInclusive<u16>) -> Result<()> {
        if self
            .entries
            .iter()
            .any(|e| e.prefix.contains(&prefix) || prefix.contains(&e.prefix))
        {
            return Err(Error::Pool4Overlap);
        }
        let pos = self.entries.partition_point(|e| e.prefix < prefix);
        self.entries.insert(pos, Pool4Entry { prefix, ports });
        Ok(())
    }

    /// Remove the entry whose prefix is exactly `prefix`.
    pub fn remove(&mut self, prefix: &Ipv4Net) -> Result<Pool4Entry> {
        match self.entries.iter().position(|e| e.prefix == *prefix) {
            Some(pos) => Ok(self.entries.remove(pos)),
            None => Err(Error::Pool4NotFound),
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

    pub fn contains(&self, addr: &Ipv4Addr) -> bool {
        self.entries.iter().any(|e| e.prefix.contains(addr))
    }

    pub fn iter_from(&self, cursor: Option<Ipv4Net>) -> impl Iterator<Item = &Pool4Entry> {
        let start = match cursor {
            Some(c) => self.entries.partition_point(move |e| e.prefix <= c),
            None => 0,
        };
        self.entries[start..].iter()
    }

    /// Every transport address the pool can lend, in stored order.
    pub fn iter_transport_addrs(&self) -> impl Iterator<Item = TransportV4> + '_ {
        self.entries.iter().flat_map(|e| {
            let ports = e.ports.clone();
            e.addrs()
                .flat_map(move |addr| ports.clone().map(move |port| TransportV4::new(addr, port)))
        })
    }

    /// Pick an IPv4 transport address for `src6`, preferring in order:
    /// the source's own port, then any free port of the same parity in the
    /// same range (well-known vs ephemeral), then any free port in the
    /// same range, then anything at all.
    pub fn allocate<F>(&self, src6: &TransportV6, mut in_use: F) -> Result<TransportV4>
    where
        F: FnMut(&TransportV4) -> bool,
    {
        let desired = src6.port;

        // Pass 1: port preservation.
        for entry in &self.entries {
            if !entry.ports.contains(&desired) {
                continue;
            }
            for addr in entry.addrs() {
                let candidate = TransportV4::new(addr, desired);
                if !in_use(&candidate) {
                    return Ok(candidate);
                }
            }
        }

        let same_range = |port: u16| (port < EPHEMERAL_START) == (desired < EPHEMERAL_START);
        let same_parity = |port: u16| port % 2 == desired % 2;

        let passes: [&dyn Fn(u16) -> bool; 3] = [
            &|port| same_range(port) && same_parity(port),
            &|port| same_range(port),
            &|_| true,
        ];
        for accept in passes {
            for entry in &self.entries {
                for addr in entry.addrs() {
                    for port in entry.ports.clone().filter(|p| accept(*p)) {
                        let candidate = TransportV4::new(addr, port);
                        if !in_use(&candidate) {
                            return Ok(candidate);
                        }
                    }
                }
            }
        }

        Err(Error::PoolExhausted(*src6))
    }
}
