//! Error types for this library

use ipnet::IpNet;

#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone)]
pub enum Error {
    #[error("{0} has nonzero bits past its prefix length")]
    HostBitsSet(IpNet),
    #[error("{0} is already in the table")]
    Exists(IpNet),
    #[error("{0} intersects the existing entry {1}")]
    Intersects(IpNet, IpNet),
    #[error("{0} is not in the table")]
    NotFound(IpNet),
    #[error("IPv6 prefix length {0} is not one of 32, 40, 48, 56, 64 or 96")]
    BadPrefixLength(u8),
    #[error("suffix widths differ: /{len6} keeps {suffix6} host bits but /{len4} keeps {suffix4}")]
    SuffixMismatch {
        len6: u8,
        suffix6: u8,
        len4: u8,
        suffix4: u8,
    },
    #[error("the given IPv4 and IPv6 prefixes belong to different mappings")]
    MappingMismatch,
}

/// Result type for `prefix-pool`
pub type Result<T> = std::result::Result<T, Error>;
