/// All possible errors thrown by `rfc6145` functions
#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone)]
pub enum Error {
    #[error("Packet too short. Expected at least {expected} bytes, got {actual}")]
    PacketTooShort { expected: usize, actual: usize },
    #[error("TTL or hop limit expired in transit")]
    TtlExpired,
    #[error("IPv4 UDP packet has a zero checksum and amending is disabled")]
    UdpZeroChecksum,
    #[error("Untranslatable ICMP type/code: {0}/{1}")]
    UntranslatableIcmp(u8, u8),
    #[error("Untranslatable ICMPv6 type/code: {0}/{1}")]
    UntranslatableIcmpv6(u8, u8),
    #[error("ICMP error nested inside another ICMP error")]
    NestedIcmpError,
}

/// Result type for `rfc6145`
pub type Result<T> = std::result::Result<T, Error>;
