//! Packet builders and log capture shared by unit tests

use std::cell::RefCell;
use std::net::Ipv4Addr;
use std::sync::Once;

use log::{Level, LevelFilter, Metadata, Record};
use pnet_packet::ip::IpNextHeaderProtocol;
use pnet_packet::ipv4::MutableIpv4Packet;
use pnet_packet::tcp::MutableTcpPacket;

pub(crate) const SRC: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 10);
pub(crate) const DST: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 20);

/// Build an IPv4 packet with `ihl` 32-bit words of header followed by `payload`
pub(crate) fn ipv4_packet(protocol: IpNextHeaderProtocol, ihl: u8, payload: &[u8]) -> Vec<u8> {
    let header_len = ihl as usize * 4;
    let mut buf = vec![0u8; header_len.max(20) + payload.len()];
    {
        let mut ip = MutableIpv4Packet::new(&mut buf).expect("ipv4 buffer");
        ip.set_version(4);
        ip.set_header_length(ihl);
        ip.set_total_length((header_len + payload.len()) as u16);
        ip.set_ttl(64);
        ip.set_next_level_protocol(protocol);
        ip.set_source(SRC);
        ip.set_destination(DST);
    }
    buf[header_len.max(20)..].copy_from_slice(payload);
    buf
}

/// Build a TCP segment; `options` must be a multiple of 4 bytes
pub(crate) fn tcp_segment(
    source_port: u16,
    destination_port: u16,
    sequence: u32,
    options: &[u8],
    payload: &[u8],
) -> Vec<u8> {
    let header_len = 20 + options.len();
    let mut buf = vec![0u8; header_len + payload.len()];
    {
        let mut tcp = MutableTcpPacket::new(&mut buf).expect("tcp buffer");
        tcp.set_source(source_port);
        tcp.set_destination(destination_port);
        tcp.set_sequence(sequence);
        tcp.set_data_offset((header_len / 4) as u8);
        tcp.set_window(8192);
    }
    buf[20..header_len].copy_from_slice(options);
    buf[header_len..].copy_from_slice(payload);
    buf
}

/// An ICMP echo request with a small body
pub(crate) fn icmp_echo() -> Vec<u8> {
    let mut echo = vec![8u8, 0, 0, 0, 0, 1, 0, 1];
    echo.extend_from_slice(b"abcdefgh");
    echo
}

thread_local! {
    static RECORDS: RefCell<Vec<(Level, String)>> = const { RefCell::new(Vec::new()) };
}

struct CaptureLogger;

impl log::Log for CaptureLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        RECORDS.with(|r| {
            r.borrow_mut()
                .push((record.level(), format!("{}", record.args())))
        });
    }

    fn flush(&self) {}
}

static LOGGER: CaptureLogger = CaptureLogger;
static INIT: Once = Once::new();

/// Run `f` and return the log records (level and message) it emitted on the current thread
pub(crate) fn capture_logs<F: FnOnce()>(f: F) -> Vec<(Level, String)> {
    INIT.call_once(|| {
        let _ = log::set_logger(&LOGGER);
        log::set_max_level(LevelFilter::Trace);
    });
    RECORDS.with(|r| r.borrow_mut().clear());
    f();
    RECORDS.with(|r| r.borrow_mut().drain(..).collect())
}

/// Only the messages produced for ICMP packets
pub(crate) fn icmp_lines(lines: &[(Level, String)]) -> Vec<&str> {
    lines
        .iter()
        .filter(|(_, l)| l.starts_with("ICMP packet received"))
        .map(|(_, l)| l.as_str())
        .collect()
}
