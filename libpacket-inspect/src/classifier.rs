use std::net::Ipv4Addr;

use pnet_packet::ip::IpNextHeaderProtocols;

use crate::cursor::PacketView;
use crate::error::ParseError;
use crate::headers::{Ipv4Header, IPV4_MIN_HEADER_LEN};
use crate::modbus::{extract_tcp, TcpExtraction};

/// What the classifier learned from the IPv4 header of one packet
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Classification {
    pub is_ipv4: bool,
    pub protocol: u8,
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    /// IPv4 total length field, host order
    pub total_length: u16,
}

impl Default for Classification {
    fn default() -> Self {
        Classification {
            is_ipv4: false,
            protocol: 0,
            source: Ipv4Addr::UNSPECIFIED,
            destination: Ipv4Addr::UNSPECIFIED,
            total_length: 0,
        }
    }
}

impl From<&Ipv4Header> for Classification {
    fn from(ip: &Ipv4Header) -> Self {
        Classification {
            is_ipv4: true,
            protocol: ip.protocol.0,
            source: ip.source,
            destination: ip.destination,
            total_length: ip.total_length,
        }
    }
}

/// Classification plus, for TCP, the extracted transport metadata
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Inspection {
    pub classification: Classification,
    pub tcp: Option<TcpExtraction>,
}

/// Read the IPv4 header at the current position of `view`
///
/// Fails if fewer than 20 bytes remain, or if the version is not 4.
pub fn classify(view: &mut PacketView) -> Result<Ipv4Header, ParseError> {
    let ip = view.try_read::<Ipv4Header>()?;
    if ip.version != 4 {
        return Err(ParseError::NotClassifiable("IP version is not 4"));
    }
    Ok(ip)
}

/// Position `view` on the first byte after the IPv4 header and its options
fn skip_ipv4_header(view: &mut PacketView, start: usize, ip: &Ipv4Header) -> Result<(), ParseError> {
    let header_len = ip.header_len();
    if header_len < IPV4_MIN_HEADER_LEN {
        return Err(ParseError::NotClassifiable("IPv4 header length below minimum"));
    }
    view.seek(start + header_len)
}

/// Classify a packet starting with an IPv4 header and extract its metadata
///
/// Never fails: a short or malformed packet yields a default (non-IPv4)
/// classification, and a truncated TCP header yields `tcp: None`.
///
/// ICMP packets are reported with a debug log line carrying the IPv4 total
/// length. No other packet produces a log line.
pub fn inspect(data: &[u8]) -> Inspection {
    let mut view = PacketView::new(data);
    let start = view.offset();
    let ip = match classify(&mut view) {
        Ok(ip) => ip,
        Err(_) => return Inspection::default(),
    };
    let classification = Classification::from(&ip);
    let tcp = match ip.protocol {
        IpNextHeaderProtocols::Icmp => {
            debug!("ICMP packet received, length: {} bytes", ip.total_length);
            None
        }
        IpNextHeaderProtocols::Tcp => skip_ipv4_header(&mut view, start, &ip)
            .and_then(|_| extract_tcp(&mut view))
            .ok(),
        _ => None,
    };
    Inspection {
        classification,
        tcp,
    }
}
