use pnet::packet::tcp::{self, MutableTcpPacket, TcpPacket};

use crate::error::{Error, Result};
use crate::protocols::ip::{Flow4, Flow6};

/// Rewrite a TCP segment for an IPv6 pseudo-header.
pub fn translate_tcp_to_ipv6(tcp_packet: &[u8], flow: &Flow6) -> Result<Vec<u8>> {
    if tcp_packet.len() < TcpPacket::minimum_packet_size() {
        return Err(Error::PacketTooShort {
            expected: TcpPacket::minimum_packet_size(),
            actual: tcp_packet.len(),
        });
    }

    let mut buffer = tcp_packet.to_vec();
    let mut packet = MutableTcpPacket::new(&mut buffer).unwrap();
    if let Some(port) = flow.src_port {
        packet.set_source(port);
    }
    if let Some(port) = flow.dst_port {
        packet.set_destination(port);
    }
    packet.set_checksum(0);
    packet.set_checksum(tcp::ipv6_checksum(
        &packet.to_immutable(),
        &flow.src,
        &flow.dst,
    ));
    Ok(buffer)
}

/// Rewrite a TCP segment for an IPv4 pseudo-header.
pub fn translate_tcp_to_ipv4(tcp_packet: &[u8], flow: &Flow4) -> Result<Vec<u8>> {
    if tcp_packet.len() < TcpPacket::minimum_packet_size() {
        return Err(Error::PacketTooShort {
            expected: TcpPacket::minimum_packet_size(),
            actual: tcp_packet.len(),
        });
    }

    let mut buffer = tcp_packet.to_vec();
    let mut packet = MutableTcpPacket::new(&mut buffer).unwrap();
    if let Some(port) = flow.src_port {
        packet.set_source(port);
    }
    if let Some(port) = flow.dst_port {
        packet.set_destination(port);
    }
    packet.set_checksum(0);
    packet.set_checksum(tcp::ipv4_checksum(
        &packet.to_immutable(),
        &flow.src,
        &flow.dst,
    ));
    Ok(buffer)
}
