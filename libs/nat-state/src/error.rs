//! Error types for this library

use crate::types::{TransportV4, TransportV6};

#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone)]
pub enum Error {
    #[error("pool4 has no free transport address for {0}")]
    PoolExhausted(TransportV6),
    #[error("{0} already has a binding")]
    BibExists6(TransportV6),
    #[error("{0} already has a binding")]
    BibExists4(TransportV4),
    #[error("no binding for the given transport address")]
    BibNotFound,
    #[error("the binding still has {0} live sessions")]
    BibInUse(usize),
    #[error("a session for this connection already exists")]
    SessionExists,
    #[error("the IPv4 prefix overlaps an existing pool4 entry")]
    Pool4Overlap,
    #[error("the IPv4 prefix is not in pool4")]
    Pool4NotFound,
    #[error("fragments overlap")]
    FragOverlap,
}

/// Result type for `nat-state`
pub type Result<T> = std::result::Result<T, Error>;
