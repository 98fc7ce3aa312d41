#![doc = include_str!("../README.md")]

pub mod error;

mod eamt;
mod pool;
mod pool6;
mod prefix;
mod rfc6052;

pub use eamt::{EamEntry, EamTable};
pub use pool::{Pool4, Pool6Set, PrefixPool};
pub use pool6::Pool6;
pub use prefix::Net;
pub use rfc6052::{embed_ipv4, extract_ipv4, LEGAL_PREFIX_LENS};
