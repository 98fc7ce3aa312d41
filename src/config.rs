//! The runtime configuration snapshot.
//!
//! The running config is immutable; an update clones it, edits one field,
//! revalidates and republishes the whole thing atomically. The dataplane
//! grabs one snapshot per packet and never observes a half-applied change.

use std::time::Duration;

use nat_state::Ttls;
use rfc6145::TranslationOptions;

use crate::error::{Error, Result};

/// Which translator this process is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    Nat64,
    Siit,
}

impl Flavor {
    /// The `type` byte of the control protocol header.
    pub fn wire_type(self) -> u8 {
        match self {
            Flavor::Nat64 => b'n',
            Flavor::Siit => b's',
        }
    }
}

/// TTL floors; everything is also capped at `u32::MAX` milliseconds.
const UDP_TTL_MIN: Duration = Duration::from_secs(5 * 60);
const TCP_EST_TTL_MIN: Duration = Duration::from_secs(2 * 60 * 60);
const TCP_TRANS_TTL_MIN: Duration = Duration::from_secs(4 * 60);
const FRAG_TTL_MIN: Duration = Duration::from_secs(2);
const TTL_MAX_MS: u64 = u32::MAX as u64;

/// Knobs only the stateful translator reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nat64Config {
    pub ttls: Ttls,
    pub frag_ttl: Duration,
    /// Cap on buffered v4-initiated SYNs and reassembly buckets.
    pub max_stored_pkts: u64,
    /// Answer timed-out v4-initiated connections with ICMPv6 address
    /// unreachable instead of silence.
    pub src_icmp6errs_better: bool,
    /// Address-dependent filtering.
    pub drop_by_addr: bool,
    pub drop_icmp6_info: bool,
    pub drop_external_tcp: bool,
    pub bib_logging: bool,
    pub session_logging: bool,
}

impl Default for Nat64Config {
    fn default() -> Self {
        Self {
            ttls: Ttls {
                udp: Duration::from_secs(5 * 60),
                icmp: Duration::from_secs(60),
                tcp_est: Duration::from_secs(2 * 60 * 60),
                tcp_trans: Duration::from_secs(4 * 60),
            },
            frag_ttl: Duration::from_secs(2),
            max_stored_pkts: 10,
            src_icmp6errs_better: false,
            drop_by_addr: false,
            drop_icmp6_info: false,
            drop_external_tcp: false,
            bib_logging: false,
            session_logging: false,
        }
    }
}

/// Knobs only the stateless translator reads. The zero-UDP-checksum
/// policy rides inside the translation options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SiitConfig {
    pub randomize_rfc6791: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    /// The operator asked the translator to sit idle.
    pub is_disable: bool,
    pub xlat: TranslationOptions,
    pub nat64: Nat64Config,
    pub siit: SiitConfig,
}

/// Wire field identifiers, numbered the way each flavor's build numbers
/// them: flavor-specific fields first, shared fields after.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    // NAT64-only.
    UdpTimeout,
    IcmpTimeout,
    TcpEstTimeout,
    TcpTransTimeout,
    FragmentTimeout,
    MaxPkts,
    SrcIcmp6ErrsBetter,
    BibLogging,
    SessionLogging,
    DropByAddr,
    DropIcmp6Info,
    DropExternalTcp,
    // SIIT-only.
    ComputeUdpCsumZero,
    RandomizeRfc6791,
    // Shared.
    ResetTclass,
    ResetTos,
    NewTos,
    DfAlwaysOn,
    BuildIpv6Fh,
    BuildIpv4Id,
    LowerMtuFail,
    MtuPlateaus,
    Disable,
    Enable,
    AtomicFragments,
}

const SHARED_FIELDS: [Field; 11] = [
    Field::ResetTclass,
    Field::ResetTos,
    Field::NewTos,
    Field::DfAlwaysOn,
    Field::BuildIpv6Fh,
    Field::BuildIpv4Id,
    Field::LowerMtuFail,
    Field::MtuPlateaus,
    Field::Disable,
    Field::Enable,
    Field::AtomicFragments,
];

impl Field {
    /// Decode a wire field id under the given flavor.
    pub fn from_wire(flavor: Flavor, id: u8) -> Option<Field> {
        let specific: &[Field] = match flavor {
            Flavor::Nat64 => &[
                Field::UdpTimeout,
                Field::IcmpTimeout,
                Field::TcpEstTimeout,
                Field::TcpTransTimeout,
                Field::FragmentTimeout,
                Field::MaxPkts,
                Field::SrcIcmp6ErrsBetter,
                Field::BibLogging,
                Field::SessionLogging,
                Field::DropByAddr,
                Field::DropIcmp6Info,
                Field::DropExternalTcp,
            ],
            Flavor::Siit => &[Field::ComputeUdpCsumZero, Field::RandomizeRfc6791],
        };
        let id = usize::from(id);
        specific
            .get(id)
            .or_else(|| SHARED_FIELDS.get(id.checked_sub(specific.len())?))
            .copied()
    }
}

fn parse_bool(payload: &[u8]) -> Result<bool> {
    match payload {
        [value] => Ok(*value != 0),
        _ => Err(Error::InvalidArg(format!(
            "expected a 1-byte boolean, got {} bytes",
            payload.len()
        ))),
    }
}

fn parse_u64(payload: &[u8]) -> Result<u64> {
    payload.try_into().map(u64::from_le_bytes).map_err(|_| {
        Error::InvalidArg(format!(
            "expected an 8-byte value, got {} bytes",
            payload.len()
        ))
    })
}

fn parse_ttl(payload: &[u8], floor: Duration) -> Result<Duration> {
    let ms = parse_u64(payload)?;
    if ms > TTL_MAX_MS {
        return Err(Error::InvalidArg(format!("TTL {ms}ms is too large")));
    }
    let ttl = Duration::from_millis(ms);
    if ttl < floor {
        return Err(Error::InvalidArg(format!(
            "TTL {ms}ms is below the {}ms floor",
            floor.as_millis()
        )));
    }
    Ok(ttl)
}

/// Strip zeros, sort descending, deduplicate. An empty result is refused.
fn normalize_plateaus(raw: &[u16]) -> Result<Vec<u16>> {
    let mut plateaus: Vec<u16> = raw.iter().copied().filter(|p| *p != 0).collect();
    plateaus.sort_unstable_by(|a, b| b.cmp(a));
    plateaus.dedup();
    if plateaus.is_empty() {
        return Err(Error::InvalidArg(
            "the MTU plateau list cannot end up empty".to_string(),
        ));
    }
    Ok(plateaus)
}

fn parse_plateaus(payload: &[u8]) -> Result<Vec<u16>> {
    if payload.is_empty() || payload.len() % 2 != 0 {
        return Err(Error::InvalidArg(format!(
            "a plateau list must be a nonempty sequence of 16-bit values, got {} bytes",
            payload.len()
        )));
    }
    let raw: Vec<u16> = payload
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    normalize_plateaus(&raw)
}

impl Config {
    /// Apply one field update, returning the successor snapshot.
    pub fn with_update(&self, flavor: Flavor, field_id: u8, payload: &[u8]) -> Result<Config> {
        let field = Field::from_wire(flavor, field_id)
            .ok_or_else(|| Error::InvalidArg(format!("unknown config field {field_id}")))?;
        let mut next = self.clone();
        match field {
            Field::UdpTimeout => next.nat64.ttls.udp = parse_ttl(payload, UDP_TTL_MIN)?,
            Field::IcmpTimeout => next.nat64.ttls.icmp = parse_ttl(payload, Duration::ZERO)?,
            Field::TcpEstTimeout => {
                next.nat64.ttls.tcp_est = parse_ttl(payload, TCP_EST_TTL_MIN)?;
            }
            Field::TcpTransTimeout => {
                next.nat64.ttls.tcp_trans = parse_ttl(payload, TCP_TRANS_TTL_MIN)?;
            }
            Field::FragmentTimeout => next.nat64.frag_ttl = parse_ttl(payload, FRAG_TTL_MIN)?,
            Field::MaxPkts => next.nat64.max_stored_pkts = parse_u64(payload)?,
            Field::SrcIcmp6ErrsBetter => next.nat64.src_icmp6errs_better = parse_bool(payload)?,
            Field::BibLogging => next.nat64.bib_logging = parse_bool(payload)?,
            Field::SessionLogging => next.nat64.session_logging = parse_bool(payload)?,
            Field::DropByAddr => next.nat64.drop_by_addr = parse_bool(payload)?,
            Field::DropIcmp6Info => next.nat64.drop_icmp6_info = parse_bool(payload)?,
            Field::DropExternalTcp => next.nat64.drop_external_tcp = parse_bool(payload)?,
            Field::ComputeUdpCsumZero => next.xlat.compute_udp_csum_zero = parse_bool(payload)?,
            Field::RandomizeRfc6791 => next.siit.randomize_rfc6791 = parse_bool(payload)?,
            Field::ResetTclass => next.xlat.reset_traffic_class = parse_bool(payload)?,
            Field::ResetTos => next.xlat.reset_tos = parse_bool(payload)?,
            Field::NewTos => {
                next.xlat.new_tos = match payload {
                    [value] => *value,
                    _ => {
                        return Err(Error::InvalidArg(format!(
                            "expected a 1-byte TOS, got {} bytes",
                            payload.len()
                        )))
                    }
                };
            }
            Field::DfAlwaysOn => next.xlat.df_always_on = parse_bool(payload)?,
            Field::BuildIpv6Fh => next.xlat.build_ipv6_fh = parse_bool(payload)?,
            Field::BuildIpv4Id => next.xlat.build_ipv4_id = parse_bool(payload)?,
            Field::LowerMtuFail => next.xlat.lower_mtu_fail = parse_bool(payload)?,
            Field::MtuPlateaus => next.xlat.mtu_plateaus = parse_plateaus(payload)?,
            Field::Disable => next.is_disable = true,
            Field::Enable => next.is_disable = false,
            // The legacy composite intentionally copies one value into
            // both header-building flags and its negation into the rest.
            Field::AtomicFragments => {
                let value = parse_bool(payload)?;
                next.xlat.df_always_on = value;
                next.xlat.build_ipv6_fh = value;
                next.xlat.build_ipv4_id = !value;
                next.xlat.lower_mtu_fail = !value;
            }
        }
        Ok(next)
    }

    /// True when the named field is one of the session/fragment TTLs, so
    /// the expiry timer needs rearming after the update.
    pub fn is_ttl_field(flavor: Flavor, field_id: u8) -> bool {
        matches!(
            Field::from_wire(flavor, field_id),
            Some(
                Field::UdpTimeout
                    | Field::IcmpTimeout
                    | Field::TcpEstTimeout
                    | Field::TcpTransTimeout
                    | Field::FragmentTimeout
            )
        )
    }
}
