/// The classic RFC 1191 plateau table, largest first.
pub const DEFAULT_MTU_PLATEAUS: [u16; 11] = [
    65535, 32000, 17914, 8166, 4352, 2002, 1492, 1006, 508, 296, 68,
];

/// Everything the translation functions let the operator decide.
///
/// The four fragment-related booleans are the "atomic fragments" knobs;
/// they are independent here, composite handling is the config layer's
/// business.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationOptions {
    /// Zero the IPv6 traffic class instead of copying the IPv4 TOS.
    pub reset_traffic_class: bool,
    /// Write `new_tos` into translated IPv4 headers instead of copying
    /// the traffic class.
    pub reset_tos: bool,
    pub new_tos: u8,
    /// Always set Don't Fragment on translated IPv4 headers.
    pub df_always_on: bool,
    /// Attach a fragment header to unfragmented 4→6 translations when the
    /// original cleared DF.
    pub build_ipv6_fh: bool,
    /// Generate IPv4 identification when the original carried none.
    pub build_ipv4_id: bool,
    /// Never report a path MTU below 1280 to IPv6 nodes.
    pub lower_mtu_fail: bool,
    /// Amend zero UDP checksums on 4→6 instead of dropping the packet.
    pub compute_udp_csum_zero: bool,
    /// Likely path MTUs for translating MTU-less Fragmentation Needed
    /// messages. Sorted descending, deduplicated, no zeros, never empty.
    pub mtu_plateaus: Vec<u16>,
}

impl Default for TranslationOptions {
    fn default() -> Self {
        Self {
            reset_traffic_class: false,
            reset_tos: false,
            new_tos: 0,
            df_always_on: false,
            build_ipv6_fh: false,
            build_ipv4_id: true,
            lower_mtu_fail: true,
            compute_udp_csum_zero: false,
            mtu_plateaus: DEFAULT_MTU_PLATEAUS.to_vec(),
        }
    }
}

impl TranslationOptions {
    /// The greatest plateau strictly below `total_length`, for peers that
    /// sent a Fragmentation Needed without filling in the MTU field.
    pub fn plateau_below(&self, total_length: u16) -> u32 {
        self.mtu_plateaus
            .iter()
            .copied()
            .find(|p| *p < total_length)
            .unwrap_or_else(|| *self.mtu_plateaus.last().unwrap_or(&68))
            .into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plateau_lookup() {
        let opts = TranslationOptions {
            mtu_plateaus: vec![1500, 1492, 1006, 576],
            ..Default::default()
        };
        assert_eq!(opts.plateau_below(1400), 1006);
        assert_eq!(opts.plateau_below(1501), 1500);
        // An exact plateau hit keeps looking for a *strictly* smaller one.
        assert_eq!(opts.plateau_below(1492), 1006);
        // Nothing below the smallest plateau: report the smallest.
        assert_eq!(opts.plateau_below(100), 576);
    }
}
