#![doc = include_str!("../README.md")]

pub mod error;

mod csum;
mod options;
pub mod protocols;

pub use options::{TranslationOptions, DEFAULT_MTU_PLATEAUS};
pub use protocols::ip::{translate_ipv4_to_ipv6, translate_ipv6_to_ipv4, Flow4, Flow6};
