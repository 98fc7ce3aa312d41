use std::fmt::Display;
use std::net::{Ipv4Addr, Ipv6Addr};

use ipnet::{IpNet, Ipv4Net, Ipv6Net};

/// The operations `PrefixPool` needs from a prefix type, implemented for
/// both `ipnet` network types so the pool logic exists only once.
pub trait Net: Copy + Eq + Ord + Display {
    type Addr: Copy + Eq;

    /// True when every bit past the prefix length is zero.
    fn is_canonical(&self) -> bool;

    /// True when the two prefixes share at least one address. With
    /// canonical prefixes this is equivalent to one containing the other.
    fn intersects(&self, other: &Self) -> bool;

    fn contains_addr(&self, addr: &Self::Addr) -> bool;

    /// Number of addresses covered by the prefix. Saturates at `u64::MAX`
    /// for the IPv6 prefixes where the true count does not fit.
    fn addr_count(&self) -> u64;

    fn as_ipnet(&self) -> IpNet;
}

impl Net for Ipv4Net {
    type Addr = Ipv4Addr;

    fn is_canonical(&self) -> bool {
        self.addr() == self.network()
    }

    fn intersects(&self, other: &Self) -> bool {
        self.contains(other) || other.contains(self)
    }

    fn contains_addr(&self, addr: &Ipv4Addr) -> bool {
        self.contains(addr)
    }

    fn addr_count(&self) -> u64 {
        1u64 << (32 - self.prefix_len())
    }

    fn as_ipnet(&self) -> IpNet {
        IpNet::V4(*self)
    }
}

impl Net for Ipv6Net {
    type Addr = Ipv6Addr;

    fn is_canonical(&self) -> bool {
        self.addr() == self.network()
    }

    fn intersects(&self, other: &Self) -> bool {
        self.contains(other) || other.contains(self)
    }

    fn contains_addr(&self, addr: &Ipv6Addr) -> bool {
        self.contains(addr)
    }

    fn addr_count(&self) -> u64 {
        let host_bits = 128 - u32::from(self.prefix_len());
        if host_bits >= 64 {
            u64::MAX
        } else {
            1u64 << host_bits
        }
    }

    fn as_ipnet(&self) -> IpNet {
        IpNet::V6(*self)
    }
}
