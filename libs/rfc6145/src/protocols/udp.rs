use pnet::packet::udp::{self, MutableUdpPacket, UdpPacket};

use crate::error::{Error, Result};
use crate::options::TranslationOptions;
use crate::protocols::ip::{Flow4, Flow6};

/// Rewrite a UDP packet for an IPv6 pseudo-header, applying the zero-
/// checksum policy. `fragmented` means the datagram is split and a fresh
/// checksum cannot be computed from this piece alone.
pub fn translate_udp_to_ipv6(
    udp_packet: &[u8],
    flow: &Flow6,
    opts: &TranslationOptions,
    fragmented: bool,
) -> Result<Vec<u8>> {
    if udp_packet.len() < UdpPacket::minimum_packet_size() {
        return Err(Error::PacketTooShort {
            expected: UdpPacket::minimum_packet_size(),
            actual: udp_packet.len(),
        });
    }

    // A zero checksum is legal over IPv4 but not over IPv6. Either we are
    // allowed to make one up, or the packet dies here.
    let had_zero_checksum = udp_packet[6] == 0 && udp_packet[7] == 0;
    if had_zero_checksum && (!opts.compute_udp_csum_zero || fragmented) {
        return Err(Error::UdpZeroChecksum);
    }

    let mut buffer = udp_packet.to_vec();
    let mut packet = MutableUdpPacket::new(&mut buffer).unwrap();
    if let Some(port) = flow.src_port {
        packet.set_source(port);
    }
    if let Some(port) = flow.dst_port {
        packet.set_destination(port);
    }
    packet.set_checksum(0);
    packet.set_checksum(udp::ipv6_checksum(
        &packet.to_immutable(),
        &flow.src,
        &flow.dst,
    ));
    Ok(buffer)
}

/// Rewrite a UDP packet for an IPv4 pseudo-header.
pub fn translate_udp_to_ipv4(udp_packet: &[u8], flow: &Flow4) -> Result<Vec<u8>> {
    if udp_packet.len() < UdpPacket::minimum_packet_size() {
        return Err(Error::PacketTooShort {
            expected: UdpPacket::minimum_packet_size(),
            actual: udp_packet.len(),
        });
    }

    let mut buffer = udp_packet.to_vec();
    let mut packet = MutableUdpPacket::new(&mut buffer).unwrap();
    if let Some(port) = flow.src_port {
        packet.set_source(port);
    }
    if let Some(port) = flow.dst_port {
        packet.set_destination(port);
    }
    packet.set_checksum(0);
    packet.set_checksum(udp::ipv4_checksum(
        &packet.to_immutable(),
        &flow.src,
        &flow.dst,
    ));
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_udp() -> Vec<u8> {
        let mut buffer = vec![0u8; UdpPacket::minimum_packet_size() + 4];
        let mut packet = MutableUdpPacket::new(&mut buffer).unwrap();
        packet.set_source(1234);
        packet.set_destination(80);
        packet.set_length(12);
        packet.set_payload(b"ping");
        packet.set_checksum(0xbeef);
        buffer
    }

    #[test]
    fn test_checksum_valid_after_translation() {
        let flow = Flow6 {
            src: "2001:db8::1".parse().unwrap(),
            dst: "64:ff9b::cb00:7105".parse().unwrap(),
            src_port: None,
            dst_port: None,
        };
        let out = translate_udp_to_ipv6(
            &sample_udp(),
            &flow,
            &TranslationOptions::default(),
            false,
        )
        .unwrap();
        let parsed = UdpPacket::new(&out).unwrap();
        assert_eq!(
            parsed.get_checksum(),
            udp::ipv6_checksum(&parsed, &flow.src, &flow.dst)
        );
        assert_eq!(parsed.get_source(), 1234);
    }

    #[test]
    fn test_port_rewrite() {
        let flow = Flow4 {
            src: "198.51.100.1".parse().unwrap(),
            dst: "203.0.113.5".parse().unwrap(),
            src_port: Some(40000),
            dst_port: None,
        };
        let out = translate_udp_to_ipv4(&sample_udp(), &flow).unwrap();
        let parsed = UdpPacket::new(&out).unwrap();
        assert_eq!(parsed.get_source(), 40000);
        assert_eq!(parsed.get_destination(), 80);
        assert_eq!(
            parsed.get_checksum(),
            udp::ipv4_checksum(&parsed, &flow.src, &flow.dst)
        );
    }

    #[test]
    fn test_zero_checksum_dropped_by_default() {
        let mut udp_packet = sample_udp();
        udp_packet[6] = 0;
        udp_packet[7] = 0;
        let flow = Flow6 {
            src: "2001:db8::1".parse().unwrap(),
            dst: "64:ff9b::cb00:7105".parse().unwrap(),
            src_port: None,
            dst_port: None,
        };
        assert_eq!(
            translate_udp_to_ipv6(&udp_packet, &flow, &TranslationOptions::default(), false),
            Err(Error::UdpZeroChecksum)
        );

        // Amending is allowed when the operator opted in.
        let opts = TranslationOptions {
            compute_udp_csum_zero: true,
            ..Default::default()
        };
        let out = translate_udp_to_ipv6(&udp_packet, &flow, &opts, false).unwrap();
        let parsed = UdpPacket::new(&out).unwrap();
        assert_ne!(parsed.get_checksum(), 0);

        // But never for a fragment; the datagram is not all here.
        assert_eq!(
            translate_udp_to_ipv6(&udp_packet, &flow, &opts, true),
            Err(Error::UdpZeroChecksum)
        );
    }
}
