//! Fixed-size IPv4 and TCP headers, decoded with `pnet_packet`

use std::net::Ipv4Addr;

use pnet_packet::ip::IpNextHeaderProtocol;
use pnet_packet::ipv4::Ipv4Packet;
use pnet_packet::tcp::TcpPacket;

use crate::cursor::WireHeader;

pub const IPV4_MIN_HEADER_LEN: usize = 20;
pub const TCP_MIN_HEADER_LEN: usize = 20;

/// The fixed part of an IPv4 header (options are not decoded)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ipv4Header {
    pub version: u8,
    /// Header length, in 32-bit words
    pub ihl: u8,
    pub total_length: u16,
    pub protocol: IpNextHeaderProtocol,
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
}

impl Ipv4Header {
    /// Header length in bytes, as declared by the IHL nibble
    #[inline]
    pub fn header_len(&self) -> usize {
        self.ihl as usize * 4
    }
}

impl WireHeader for Ipv4Header {
    const SIZE: usize = IPV4_MIN_HEADER_LEN;

    fn decode(bytes: &[u8]) -> Option<Self> {
        let ipv4 = Ipv4Packet::new(bytes)?;
        Some(Ipv4Header {
            version: ipv4.get_version(),
            ihl: ipv4.get_header_length(),
            total_length: ipv4.get_total_length(),
            protocol: ipv4.get_next_level_protocol(),
            source: ipv4.get_source(),
            destination: ipv4.get_destination(),
        })
    }
}

/// The fixed part of a TCP header (options are not decoded)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TcpHeader {
    pub source_port: u16,
    pub destination_port: u16,
    pub sequence: u32,
    pub acknowledgement: u32,
    /// Header length, in 32-bit words
    pub data_offset: u8,
}

impl TcpHeader {
    /// Header length in bytes, as declared by the data offset nibble
    #[inline]
    pub fn header_len(&self) -> usize {
        self.data_offset as usize * 4
    }
}

impl WireHeader for TcpHeader {
    const SIZE: usize = TCP_MIN_HEADER_LEN;

    fn decode(bytes: &[u8]) -> Option<Self> {
        let tcp = TcpPacket::new(bytes)?;
        Some(TcpHeader {
            source_port: tcp.get_source(),
            destination_port: tcp.get_destination(),
            sequence: tcp.get_sequence(),
            acknowledgement: tcp.get_acknowledgement(),
            data_offset: tcp.get_data_offset(),
        })
    }
}
