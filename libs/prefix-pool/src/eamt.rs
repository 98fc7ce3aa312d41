use std::net::{Ipv4Addr, Ipv6Addr};

use ipnet::{Ipv4Net, Ipv6Net};

use crate::error::{Error, Result};
use crate::prefix::Net;

/// One explicit address mapping: an IPv6 prefix paired with an IPv4 prefix
/// of equal suffix width, so the host bits transport unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EamEntry {
    pub prefix6: Ipv6Net,
    pub prefix4: Ipv4Net,
}

impl EamEntry {
    /// Move the host bits of `addr` from the IPv6 side to the IPv4 side.
    pub fn map_6to4(&self, addr: &Ipv6Addr) -> Ipv4Addr {
        let suffix = 128 - u32::from(self.prefix6.prefix_len());
        let host = if suffix == 0 {
            0
        } else {
            u128::from(*addr) & ((1u128 << suffix) - 1)
        };
        Ipv4Addr::from(u32::from(self.prefix4.network()) | host as u32)
    }

    /// Move the host bits of `addr` from the IPv4 side to the IPv6 side.
    pub fn map_4to6(&self, addr: &Ipv4Addr) -> Ipv6Addr {
        let suffix = 32 - u32::from(self.prefix4.prefix_len());
        let host = if suffix == 0 {
            0
        } else {
            u32::from(*addr) & ((1u32 << suffix) - 1)
        };
        Ipv6Addr::from(u128::from(self.prefix6.network()) | u128::from(host))
    }
}

/// The Explicit Address Mapping table.
///
/// The same entries are indexed twice, once per address family, both
/// sorted so display iteration is deterministic and cursor-resumable.
#[derive(Debug, Clone, Default)]
pub struct EamTable {
    by4: Vec<EamEntry>,
    by6: Vec<EamEntry>,
}

impl EamTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, prefix6: Ipv6Net, prefix4: Ipv4Net) -> Result<()> {
        if !prefix6.is_canonical() {
            return Err(Error::HostBitsSet(prefix6.as_ipnet()));
        }
        if !prefix4.is_canonical() {
            return Err(Error::HostBitsSet(prefix4.as_ipnet()));
        }

        let suffix6 = 128 - prefix6.prefix_len();
        let suffix4 = 32 - prefix4.prefix_len();
        if suffix6 != suffix4 {
            return Err(Error::SuffixMismatch {
                len6: prefix6.prefix_len(),
                suffix6,
                len4: prefix4.prefix_len(),
                suffix4,
            });
        }

        // Overlap in either family disambiguates neither direction, so
        // both indexes reject it.
        for existing in &self.by4 {
            if existing.prefix4.intersects(&prefix4) {
                return Err(Error::Intersects(
                    prefix4.as_ipnet(),
                    existing.prefix4.as_ipnet(),
                ));
            }
            if existing.prefix6.intersects(&prefix6) {
                return Err(Error::Intersects(
                    prefix6.as_ipnet(),
                    existing.prefix6.as_ipnet(),
                ));
            }
        }

        let entry = EamEntry { prefix6, prefix4 };
        let pos4 = self.by4.partition_point(|e| e.prefix4 < prefix4);
        self.by4.insert(pos4, entry);
        let pos6 = self.by6.partition_point(|e| e.prefix6 < prefix6);
        self.by6.insert(pos6, entry);
        Ok(())
    }

    /// Remove the entry named by either prefix. When both are given they
    /// must identify the same entry.
    pub fn remove(&mut self, prefix6: Option<Ipv6Net>, prefix4: Option<Ipv4Net>) -> Result<()> {
        let entry = match (prefix6, prefix4) {
            (Some(p6), Some(p4)) => {
                let entry = self
                    .by6
                    .iter()
                    .find(|e| e.prefix6 == p6)
                    .copied()
                    .ok_or(Error::NotFound(p6.as_ipnet()))?;
                if entry.prefix4 != p4 {
                    return Err(Error::MappingMismatch);
                }
                entry
            }
            (Some(p6), None) => self
                .by6
                .iter()
                .find(|e| e.prefix6 == p6)
                .copied()
                .ok_or(Error::NotFound(p6.as_ipnet()))?,
            (None, Some(p4)) => self
                .by4
                .iter()
                .find(|e| e.prefix4 == p4)
                .copied()
                .ok_or(Error::NotFound(p4.as_ipnet()))?,
            (None, None) => return Err(Error::MappingMismatch),
        };

        self.by4.retain(|e| e != &entry);
        self.by6.retain(|e| e != &entry);
        Ok(())
    }

    pub fn flush(&mut self) {
        self.by4.clear();
        self.by6.clear();
    }

    pub fn count(&self) -> u64 {
        self.by4.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.by4.is_empty()
    }

    /// Longest-prefix match by IPv6 address. Entries never overlap, so at
    /// most one can match.
    pub fn lookup_by6(&self, addr: &Ipv6Addr) -> Option<&EamEntry> {
        self.by6.iter().find(|e| e.prefix6.contains(addr))
    }

    /// Longest-prefix match by IPv4 address.
    pub fn lookup_by4(&self, addr: &Ipv4Addr) -> Option<&EamEntry> {
        self.by4.iter().find(|e| e.prefix4.contains(addr))
    }

    /// Translate an IPv6 address to its explicit IPv4 mapping.
    pub fn get_ipv4_by_ipv6(&self, addr: &Ipv6Addr) -> Option<Ipv4Addr> {
        self.lookup_by6(addr).map(|e| e.map_6to4(addr))
    }

    /// Translate an IPv4 address to its explicit IPv6 mapping.
    pub fn get_ipv6_by_ipv4(&self, addr: &Ipv4Addr) -> Option<Ipv6Addr> {
        self.lookup_by4(addr).map(|e| e.map_4to6(addr))
    }

    /// Iterate in IPv4-prefix order, resuming after `cursor`.
    pub fn iter_from(&self, cursor: Option<Ipv4Net>) -> impl Iterator<Item = &EamEntry> {
        let start = match cursor {
            Some(c) => self.by4.partition_point(move |e| e.prefix4 <= c),
            None => 0,
        };
        self.by4[start..].iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add(table: &mut EamTable, p6: &str, p4: &str) -> Result<()> {
        table.add(p6.parse().unwrap(), p4.parse().unwrap())
    }

    #[test]
    fn test_collisions() {
        let mut t = EamTable::new();
        add(&mut t, "1::c/126", "1.0.0.4/30").unwrap();
        // Exact duplicate.
        assert!(matches!(add(&mut t, "1::c/126", "1.0.0.4/30"), Err(Error::Intersects(..))));
        // The IPv4 side is inside an existing entry.
        assert!(matches!(add(&mut t, "2::c/127", "1.0.0.6/31"), Err(Error::Intersects(..))));
        // The IPv6 side is inside an existing entry.
        assert!(matches!(add(&mut t, "1::e/127", "2.0.0.4/31"), Err(Error::Intersects(..))));
        // The IPv4 side contains an existing entry.
        assert!(matches!(add(&mut t, "2::/120", "1.0.0.0/24"), Err(Error::Intersects(..))));
        // The IPv6 side contains an existing entry.
        assert!(matches!(add(&mut t, "1::/120", "2.0.0.0/24"), Err(Error::Intersects(..))));
        // Disjoint in both families.
        add(&mut t, "1::/126", "1.0.0.0/30").unwrap();
        assert_eq!(t.count(), 2);
    }

    #[test]
    fn test_prefix_validation() {
        let mut t = EamTable::new();
        // Suffix widths must agree.
        assert!(matches!(
            add(&mut t, "5::/124", "5.0.0.0/24"),
            Err(Error::SuffixMismatch { .. })
        ));
        add(&mut t, "5::/120", "5.0.0.0/24").unwrap();
        // Host bits must be zero.
        assert!(matches!(add(&mut t, "7::/120", "7.0.0.1/24"), Err(Error::HostBitsSet(_))));
        assert!(matches!(add(&mut t, "7::1/120", "7.0.0.0/24"), Err(Error::HostBitsSet(_))));
    }

    #[test]
    fn test_translation() {
        let mut t = EamTable::new();
        add(&mut t, "2001:db8::0/126", "10.0.0.0/30").unwrap();
        add(&mut t, "2001:db8::4/126", "10.0.0.12/30").unwrap();
        add(&mut t, "2001:db8::20/124", "10.0.0.16/28").unwrap();
        add(&mut t, "2001:db8::111/128", "10.0.0.254/32").unwrap();
        add(&mut t, "2001:db8::200/120", "10.0.1.0/24").unwrap();

        let cases = [
            ("10.0.0.1", "2001:db8::1"),
            ("10.0.0.14", "2001:db8::6"),
            ("10.0.0.27", "2001:db8::2b"),
            ("10.0.0.254", "2001:db8::111"),
            ("10.0.1.15", "2001:db8::20f"),
        ];
        for (a4, a6) in cases {
            let a4: Ipv4Addr = a4.parse().unwrap();
            let a6: Ipv6Addr = a6.parse().unwrap();
            assert_eq!(t.get_ipv6_by_ipv4(&a4), Some(a6), "{a4} -> {a6}");
            assert_eq!(t.get_ipv4_by_ipv6(&a6), Some(a4), "{a6} -> {a4}");
        }

        assert_eq!(t.get_ipv6_by_ipv4(&"192.0.2.1".parse().unwrap()), None);
        assert_eq!(t.get_ipv4_by_ipv6(&"64:ff9b::1".parse().unwrap()), None);
    }

    #[test]
    fn test_anderson_example() {
        let mut t = EamTable::new();
        add(&mut t, "2001:db8:cccc::/124", "192.0.2.16/28").unwrap();

        assert_eq!(
            t.get_ipv6_by_ipv4(&"192.0.2.24".parse().unwrap()),
            Some("2001:db8:cccc::8".parse().unwrap())
        );
        assert_eq!(
            t.get_ipv4_by_ipv6(&"2001:db8:cccc::f".parse().unwrap()),
            Some("192.0.2.31".parse().unwrap())
        );
    }

    #[test]
    fn test_remove_by_either_side() {
        let mut t = EamTable::new();
        add(&mut t, "2001:db8::/120", "198.51.100.0/24").unwrap();
        add(&mut t, "2001:db8:1::/120", "203.0.113.0/24").unwrap();

        t.remove(Some("2001:db8::/120".parse().unwrap()), None).unwrap();
        assert_eq!(t.count(), 1);
        t.remove(None, Some("203.0.113.0/24".parse().unwrap())).unwrap();
        assert!(t.is_empty());

        assert_eq!(
            t.remove(None, Some("203.0.113.0/24".parse().unwrap())),
            Err(Error::NotFound("203.0.113.0/24".parse::<Ipv4Net>().unwrap().into()))
        );
    }

    #[test]
    fn test_remove_mismatched_pair() {
        let mut t = EamTable::new();
        add(&mut t, "2001:db8::/120", "198.51.100.0/24").unwrap();
        add(&mut t, "2001:db8:1::/120", "203.0.113.0/24").unwrap();

        assert_eq!(
            t.remove(
                Some("2001:db8::/120".parse().unwrap()),
                Some("203.0.113.0/24".parse().unwrap()),
            ),
            Err(Error::MappingMismatch)
        );
        assert_eq!(t.count(), 2);
    }

    #[test]
    fn test_zero_length_suffixes() {
        let mut t = EamTable::new();
        // /128 <-> /32: exactly one address each.
        add(&mut t, "2001:db8::dead/128", "192.0.2.77/32").unwrap();
        assert_eq!(
            t.get_ipv4_by_ipv6(&"2001:db8::dead".parse().unwrap()),
            Some("192.0.2.77".parse().unwrap())
        );
        assert_eq!(t.get_ipv4_by_ipv6(&"2001:db8::deae".parse().unwrap()), None);
    }

    #[test]
    fn test_iteration_cursor() {
        let mut t = EamTable::new();
        add(&mut t, "2001:db8::/120", "10.0.0.0/24").unwrap();
        add(&mut t, "2001:db8:1::/120", "10.0.1.0/24").unwrap();
        add(&mut t, "2001:db8:2::/120", "10.0.2.0/24").unwrap();

        let all: Vec<EamEntry> = t.iter_from(None).copied().collect();
        assert_eq!(all.len(), 3);
        assert!(all.windows(2).all(|w| w[0].prefix4 < w[1].prefix4));

        let rest: Vec<EamEntry> = t.iter_from(Some(all[0].prefix4)).copied().collect();
        assert_eq!(rest, all[1..].to_vec());
    }
}
