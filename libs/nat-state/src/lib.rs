#![doc = include_str!("../README.md")]

pub mod error;

mod bib;
mod fragdb;
mod pool4;
mod session;
mod tcp;
mod types;

pub use bib::{BibDb, BibEntry};
pub use fragdb::{FragDb, FragKey, FragVerdict, Fragment};
pub use pool4::{Pool4Db, Pool4Entry};
pub use session::{new_session, Session, SessionDb, SessionKey, Ttls};
pub use tcp::{tcp_transition, TcpEvent};
pub use types::{L4Proto, SessionState, TransportV4, TransportV6};
