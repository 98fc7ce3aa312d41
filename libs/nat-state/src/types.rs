use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

/// The transport protocols a NAT64 keeps state for. ICMP queries are
/// demultiplexed by identifier, which rides in the same slot as a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum L4Proto {
    Udp,
    Tcp,
    Icmp,
}

impl L4Proto {
    pub const ALL: [L4Proto; 3] = [L4Proto::Udp, L4Proto::Tcp, L4Proto::Icmp];

    pub(crate) fn index(self) -> usize {
        match self {
            L4Proto::Udp => 0,
            L4Proto::Tcp => 1,
            L4Proto::Icmp => 2,
        }
    }

    /// IANA protocol number, which is also the on-wire encoding.
    pub fn number(self) -> u8 {
        match self {
            L4Proto::Udp => 17,
            L4Proto::Tcp => 6,
            L4Proto::Icmp => 1,
        }
    }

    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            17 => Some(L4Proto::Udp),
            6 => Some(L4Proto::Tcp),
            1 => Some(L4Proto::Icmp),
            _ => None,
        }
    }
}

impl fmt::Display for L4Proto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            L4Proto::Udp => write!(f, "UDP"),
            L4Proto::Tcp => write!(f, "TCP"),
            L4Proto::Icmp => write!(f, "ICMP"),
        }
    }
}

/// An IPv4 address plus port (or ICMP identifier).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransportV4 {
    pub addr: Ipv4Addr,
    pub port: u16,
}

impl TransportV4 {
    pub fn new(addr: Ipv4Addr, port: u16) -> Self {
        Self { addr, port }
    }
}

impl fmt::Display for TransportV4 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.addr, self.port)
    }
}

/// An IPv6 address plus port (or ICMP identifier).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransportV6 {
    pub addr: Ipv6Addr,
    pub port: u16,
}

impl TransportV6 {
    pub fn new(addr: Ipv6Addr, port: u16) -> Self {
        Self { addr, port }
    }
}

impl fmt::Display for TransportV6 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]:{}", self.addr, self.port)
    }
}

/// Where a session is in its life. UDP and ICMP sessions only ever use
/// `Established`; the remaining states belong to the TCP machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    V4Init,
    V6Init,
    Established,
    V4FinRcv,
    V6FinRcv,
    V4FinV6FinRcv,
    Trans,
}

impl SessionState {
    /// On-wire encoding, in state-machine order.
    pub fn as_wire(self) -> u8 {
        match self {
            SessionState::V4Init => 0,
            SessionState::V6Init => 1,
            SessionState::Established => 2,
            SessionState::V4FinRcv => 3,
            SessionState::V6FinRcv => 4,
            SessionState::V4FinV6FinRcv => 5,
            SessionState::Trans => 6,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::V4Init => "V4_INIT",
            SessionState::V6Init => "V6_INIT",
            SessionState::Established => "ESTABLISHED",
            SessionState::V4FinRcv => "V4_FIN_RCV",
            SessionState::V6FinRcv => "V6_FIN_RCV",
            SessionState::V4FinV6FinRcv => "V4_FIN_V6_FIN_RCV",
            SessionState::Trans => "TRANS",
        };
        write!(f, "{name}")
    }
}
