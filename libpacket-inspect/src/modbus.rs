//! TCP metadata and Modbus-over-TCP heuristic
//!
//! The bytes following the TCP header are interpreted as a Modbus/TCP
//! transaction identifier (first two bytes) and function code (first byte).
//! This is a best-effort interpretation: the payload is never checked to be
//! Modbus, so any TCP payload will report these fields.

use crate::cursor::PacketView;
use crate::error::ParseError;
use crate::headers::{TcpHeader, TCP_MIN_HEADER_LEN};

/// Well-known Modbus/TCP server port
pub const MODBUS_TCP_PORT: u16 = 502;

/// Metadata extracted from a TCP segment
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TcpExtraction {
    pub source_port: u16,
    pub destination_port: u16,
    pub sequence_number: u32,
    /// First two payload bytes, if present
    pub transaction_id: Option<u16>,
    /// First payload byte, if present
    pub function_code: Option<u8>,
}

impl TcpExtraction {
    /// True if either port is the Modbus/TCP port
    pub fn is_modbus_port(&self) -> bool {
        self.source_port == MODBUS_TCP_PORT || self.destination_port == MODBUS_TCP_PORT
    }
}

/// Extract TCP metadata from `view`, positioned on the first byte of the TCP header
///
/// Fails only if the fixed 20-byte TCP header is not available. Payload
/// fields are located using the data offset of the header, and are left
/// absent if the header length is invalid or the payload is too short.
pub fn extract_tcp(view: &mut PacketView) -> Result<TcpExtraction, ParseError> {
    let tcp_start = view.offset();
    let tcp = view.try_read::<TcpHeader>()?;
    let mut extraction = TcpExtraction {
        source_port: tcp.source_port,
        destination_port: tcp.destination_port,
        sequence_number: tcp.sequence,
        transaction_id: None,
        function_code: None,
    };
    let header_len = tcp.header_len();
    if header_len < TCP_MIN_HEADER_LEN || view.seek(tcp_start + header_len).is_err() {
        return Ok(extraction);
    }
    extraction.transaction_id = view.peek::<u16>().ok();
    extraction.function_code = view.try_read::<u8>().ok();
    Ok(extraction)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::tcp_segment;

    fn extract(segment: &[u8]) -> Result<TcpExtraction, ParseError> {
        let mut view = PacketView::new(segment);
        extract_tcp(&mut view)
    }

    #[test]
    fn mbap_header_reports_leading_bytes() {
        // MBAP header + function code 3
        let pdu = [0x00, 0x2a, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x02];
        let tcp = extract(&tcp_segment(51000, 502, 7, &[], &pdu)).expect("tcp");
        assert_eq!(tcp.source_port, 51000);
        assert_eq!(tcp.destination_port, 502);
        assert_eq!(tcp.sequence_number, 7);
        assert_eq!(tcp.transaction_id, Some(0x002a));
        assert_eq!(tcp.function_code, Some(0x00));
        assert!(tcp.is_modbus_port());
    }

    #[test]
    fn single_payload_byte() {
        let tcp = extract(&tcp_segment(502, 51000, 123456, &[], &[0x03])).expect("tcp");
        assert_eq!(tcp.function_code, Some(3));
        assert_eq!(tcp.transaction_id, None);
    }

    #[test]
    fn payload_located_after_options() {
        // MSS option + NOP padding: header is 24 bytes
        let options = [0x02, 0x04, 0x05, 0xb4];
        let tcp = extract(&tcp_segment(502, 51000, 1, &options, &[0x10, 0x01])).expect("tcp");
        assert_eq!(tcp.transaction_id, Some(0x1001));
        assert_eq!(tcp.function_code, Some(0x10));
    }

    #[test]
    fn no_payload() {
        let tcp = extract(&tcp_segment(80, 40000, 99, &[], &[])).expect("tcp");
        assert_eq!(tcp.source_port, 80);
        assert_eq!(tcp.transaction_id, None);
        assert_eq!(tcp.function_code, None);
        assert!(!tcp.is_modbus_port());
    }

    #[test]
    fn truncated_header() {
        let segment = tcp_segment(502, 51000, 1, &[], &[]);
        assert_eq!(
            extract(&segment[..19]),
            Err(ParseError::Truncated {
                needed: 20,
                remaining: 19
            })
        );
    }

    #[test]
    fn data_offset_beyond_capture() {
        let mut segment = tcp_segment(502, 51000, 1, &[], &[0x03]);
        // claims a 60-byte header
        segment[12] = 0xf0;
        let tcp = extract(&segment).expect("tcp");
        assert_eq!(tcp.source_port, 502);
        assert_eq!(tcp.function_code, None);
        assert_eq!(tcp.transaction_id, None);
    }

    #[test]
    fn data_offset_below_minimum() {
        let mut segment = tcp_segment(502, 51000, 1, &[], &[0x03, 0x04]);
        segment[12] = 0x40;
        let tcp = extract(&segment).expect("tcp");
        assert_eq!(tcp.function_code, None);
        assert_eq!(tcp.transaction_id, None);
    }
}
