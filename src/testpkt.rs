//! Packet builders shared by the pipeline and control-plane tests.
#![allow(dead_code)]

use std::net::{Ipv4Addr, Ipv6Addr};

use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::{self, MutableIpv4Packet};
use pnet::packet::ipv6::MutableIpv6Packet;
use pnet::packet::tcp::{self, MutableTcpPacket};
use pnet::packet::udp::{self, MutableUdpPacket};

pub(crate) fn ipv6_udp(src: (Ipv6Addr, u16), dst: (Ipv6Addr, u16), payload: &[u8]) -> Vec<u8> {
    let mut udp_buffer = vec![0u8; 8 + payload.len()];
    {
        let mut udp_packet = MutableUdpPacket::new(&mut udp_buffer).unwrap();
        udp_packet.set_source(src.1);
        udp_packet.set_destination(dst.1);
        udp_packet.set_length((8 + payload.len()) as u16);
        udp_packet.set_payload(payload);
        let checksum = udp::ipv6_checksum(&udp_packet.to_immutable(), &src.0, &dst.0);
        udp_packet.set_checksum(checksum);
    }
    ipv6_wrap(src.0, dst.0, 17, &udp_buffer)
}

pub(crate) fn ipv4_udp(src: (Ipv4Addr, u16), dst: (Ipv4Addr, u16), payload: &[u8]) -> Vec<u8> {
    let mut udp_buffer = vec![0u8; 8 + payload.len()];
    {
        let mut udp_packet = MutableUdpPacket::new(&mut udp_buffer).unwrap();
        udp_packet.set_source(src.1);
        udp_packet.set_destination(dst.1);
        udp_packet.set_length((8 + payload.len()) as u16);
        udp_packet.set_payload(payload);
        let checksum = udp::ipv4_checksum(&udp_packet.to_immutable(), &src.0, &dst.0);
        udp_packet.set_checksum(checksum);
    }
    ipv4_wrap(src.0, dst.0, IpNextHeaderProtocols::Udp.0, &udp_buffer)
}

pub(crate) fn ipv6_tcp_syn(src: (Ipv6Addr, u16), dst: (Ipv6Addr, u16)) -> Vec<u8> {
    let mut tcp_buffer = vec![0u8; 20];
    {
        let mut tcp_packet = MutableTcpPacket::new(&mut tcp_buffer).unwrap();
        tcp_packet.set_source(src.1);
        tcp_packet.set_destination(dst.1);
        tcp_packet.set_data_offset(5);
        tcp_packet.set_flags(0x02);
        let checksum = tcp::ipv6_checksum(&tcp_packet.to_immutable(), &src.0, &dst.0);
        tcp_packet.set_checksum(checksum);
    }
    ipv6_wrap(src.0, dst.0, 6, &tcp_buffer)
}

pub(crate) fn ipv4_tcp_syn(src: (Ipv4Addr, u16), dst: (Ipv4Addr, u16)) -> Vec<u8> {
    let mut tcp_buffer = vec![0u8; 20];
    {
        let mut tcp_packet = MutableTcpPacket::new(&mut tcp_buffer).unwrap();
        tcp_packet.set_source(src.1);
        tcp_packet.set_destination(dst.1);
        tcp_packet.set_data_offset(5);
        tcp_packet.set_flags(0x02);
        let checksum = tcp::ipv4_checksum(&tcp_packet.to_immutable(), &src.0, &dst.0);
        tcp_packet.set_checksum(checksum);
    }
    ipv4_wrap(src.0, dst.0, IpNextHeaderProtocols::Tcp.0, &tcp_buffer)
}

pub(crate) fn ipv6_wrap(src: Ipv6Addr, dst: Ipv6Addr, next_header: u8, l4: &[u8]) -> Vec<u8> {
    let mut buffer = vec![0u8; 40 + l4.len()];
    let mut packet = MutableIpv6Packet::new(&mut buffer).unwrap();
    packet.set_version(6);
    packet.set_payload_length(l4.len() as u16);
    packet.set_next_header(pnet::packet::ip::IpNextHeaderProtocol(next_header));
    packet.set_hop_limit(64);
    packet.set_source(src);
    packet.set_destination(dst);
    packet.set_payload(l4);
    buffer
}

pub(crate) fn ipv4_wrap(src: Ipv4Addr, dst: Ipv4Addr, protocol: u8, l4: &[u8]) -> Vec<u8> {
    let mut buffer = vec![0u8; 20 + l4.len()];
    let mut packet = MutableIpv4Packet::new(&mut buffer).unwrap();
    packet.set_version(4);
    packet.set_header_length(5);
    packet.set_total_length((20 + l4.len()) as u16);
    packet.set_ttl(64);
    packet.set_next_level_protocol(pnet::packet::ip::IpNextHeaderProtocol(protocol));
    packet.set_source(src);
    packet.set_destination(dst);
    packet.set_payload(l4);
    packet.set_checksum(ipv4::checksum(&packet.to_immutable()));
    buffer
}

pub(crate) fn v4_src(packet: &[u8]) -> Ipv4Addr {
    Ipv4Addr::new(packet[12], packet[13], packet[14], packet[15])
}

pub(crate) fn v4_dst(packet: &[u8]) -> Ipv4Addr {
    Ipv4Addr::new(packet[16], packet[17], packet[18], packet[19])
}

pub(crate) fn v6_src(packet: &[u8]) -> Ipv6Addr {
    let mut octets = [0u8; 16];
    octets.copy_from_slice(&packet[8..24]);
    Ipv6Addr::from(octets)
}

pub(crate) fn v6_dst(packet: &[u8]) -> Ipv6Addr {
    let mut octets = [0u8; 16];
    octets.copy_from_slice(&packet[24..40]);
    Ipv6Addr::from(octets)
}

/// Source and destination ports of the transport header, assuming no
/// extension headers.
pub(crate) fn l4_ports(packet: &[u8]) -> (u16, u16) {
    let l4 = match packet[0] >> 4 {
        4 => &packet[usize::from(packet[0] & 0x0f) * 4..],
        _ => &packet[40..],
    };
    (
        u16::from_be_bytes([l4[0], l4[1]]),
        u16::from_be_bytes([l4[2], l4[3]]),
    )
}
