//! Trace entries, trace sinks and rendering

use std::fmt;
use std::io::{self, Write};
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::classifier::Inspection;
use crate::error::Error;
use crate::node::NextHop;

/// Diagnostic record describing one traced packet
///
/// TCP fields are zero (or `None`) for packets without TCP metadata. The
/// payload fields are `None` when the segment carries too few bytes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub sw_if_index: u32,
    pub next: NextHop,
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    pub protocol: u8,
    pub source_port: u16,
    pub destination_port: u16,
    pub sequence_number: u32,
    pub transaction_id: Option<u16>,
    pub function_code: Option<u8>,
}

impl TraceEntry {
    pub fn new(sw_if_index: u32, next: NextHop, inspection: &Inspection) -> Self {
        let c = &inspection.classification;
        let mut entry = TraceEntry {
            sw_if_index,
            next,
            source: c.source,
            destination: c.destination,
            protocol: c.protocol,
            source_port: 0,
            destination_port: 0,
            sequence_number: 0,
            transaction_id: None,
            function_code: None,
        };
        if let Some(tcp) = &inspection.tcp {
            entry.source_port = tcp.source_port;
            entry.destination_port = tcp.destination_port;
            entry.sequence_number = tcp.sequence_number;
            entry.transaction_id = tcp.transaction_id;
            entry.function_code = tcp.function_code;
        }
        entry
    }
}

impl fmt::Display for TraceEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "packet-inspect: sw_if_index {}, next {}, src {}, dst {}, protocol {}",
            self.sw_if_index, self.next, self.source, self.destination, self.protocol
        )?;
        if self.source_port != 0 || self.destination_port != 0 {
            write!(
                f,
                ", src port {}, seq {}, dst port {}",
                self.source_port, self.sequence_number, self.destination_port
            )?;
            match self.transaction_id {
                Some(id) => write!(f, ", trans id {}", id)?,
                None => write!(f, ", trans id -")?,
            }
            match self.function_code {
                Some(code) => write!(f, ", function code {}", code)?,
                None => write!(f, ", function code -")?,
            }
        }
        Ok(())
    }
}

/// Which trace entries are rendered by text sinks
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TraceRender {
    /// Every entry is rendered
    #[default]
    All,
    /// Only entries with a non-zero source port (legacy behavior: ICMP and
    /// other non-TCP entries render empty)
    TcpOnly,
}

impl TraceRender {
    pub fn of_string(s: &str) -> Result<TraceRender, Error> {
        match s {
            "all" => Ok(TraceRender::All),
            "tcp" => Ok(TraceRender::TcpOnly),
            _ => Err(Error::Config(format!(
                "Invalid trace render mode: {s} not among all|tcp"
            ))),
        }
    }

    pub fn accepts(self, entry: &TraceEntry) -> bool {
        match self {
            TraceRender::All => true,
            TraceRender::TcpOnly => entry.source_port != 0,
        }
    }
}

/// Receiver of completed trace entries
///
/// Ownership of each entry is transferred to the sink.
pub trait TraceSink {
    fn add_trace(&mut self, entry: TraceEntry);

    /// Flush buffered output. Fails if any entry could not be written.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn flush_writer<W: Write>(w: &mut W, errors: usize) -> io::Result<()> {
    w.flush()?;
    if errors > 0 {
        return Err(io::Error::new(
            io::ErrorKind::Other,
            format!("{} trace entries could not be written", errors),
        ));
    }
    Ok(())
}

impl TraceSink for Vec<TraceEntry> {
    fn add_trace(&mut self, entry: TraceEntry) {
        self.push(entry);
    }
}

/// Build and emit a trace entry, only if `traced` is set
pub fn record_trace<S: TraceSink + ?Sized>(
    sink: &mut S,
    traced: bool,
    sw_if_index: u32,
    next: NextHop,
    inspection: &Inspection,
) {
    if !traced {
        return;
    }
    sink.add_trace(TraceEntry::new(sw_if_index, next, inspection));
}

/// Writes one rendered line per accepted entry
pub struct TextTraceSink<W: Write> {
    w: W,
    render: TraceRender,
    written: usize,
    errors: usize,
}

impl<W: Write> TextTraceSink<W> {
    pub fn new(w: W, render: TraceRender) -> Self {
        TextTraceSink {
            w,
            render,
            written: 0,
            errors: 0,
        }
    }

    /// Number of entries written
    pub fn written(&self) -> usize {
        self.written
    }

    /// Number of entries lost to write errors
    pub fn errors(&self) -> usize {
        self.errors
    }

    pub fn into_inner(self) -> W {
        self.w
    }
}

impl<W: Write> TraceSink for TextTraceSink<W> {
    fn add_trace(&mut self, entry: TraceEntry) {
        if !self.render.accepts(&entry) {
            return;
        }
        match writeln!(self.w, "{}", entry) {
            Ok(()) => self.written += 1,
            Err(e) => {
                warn!("could not write trace entry: {}", e);
                self.errors += 1;
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        flush_writer(&mut self.w, self.errors)
    }
}

/// Writes one JSON object per line for every entry
pub struct JsonTraceSink<W: Write> {
    w: W,
    written: usize,
    errors: usize,
}

impl<W: Write> JsonTraceSink<W> {
    pub fn new(w: W) -> Self {
        JsonTraceSink {
            w,
            written: 0,
            errors: 0,
        }
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn errors(&self) -> usize {
        self.errors
    }

    pub fn into_inner(self) -> W {
        self.w
    }
}

impl<W: Write> TraceSink for JsonTraceSink<W> {
    fn add_trace(&mut self, entry: TraceEntry) {
        let res = serde_json::to_writer(&mut self.w, &entry)
            .map_err(io::Error::from)
            .and_then(|_| self.w.write_all(b"\n"));
        match res {
            Ok(()) => self.written += 1,
            Err(e) => {
                warn!("could not write trace entry: {}", e);
                self.errors += 1;
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        flush_writer(&mut self.w, self.errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{Classification, Inspection};
    use crate::modbus::TcpExtraction;

    fn icmp_inspection() -> Inspection {
        Inspection {
            classification: Classification {
                is_ipv4: true,
                protocol: 1,
                source: Ipv4Addr::new(10, 0, 0, 1),
                destination: Ipv4Addr::new(10, 0, 0, 2),
                total_length: 84,
            },
            tcp: None,
        }
    }

    fn modbus_inspection() -> Inspection {
        Inspection {
            classification: Classification {
                protocol: 6,
                ..icmp_inspection().classification
            },
            tcp: Some(TcpExtraction {
                source_port: 502,
                destination_port: 51000,
                sequence_number: 123456,
                transaction_id: Some(42),
                function_code: Some(3),
            }),
        }
    }

    #[test]
    fn record_only_when_traced() {
        let mut sink: Vec<TraceEntry> = Vec::new();
        record_trace(&mut sink, false, 1, NextHop::Forward, &icmp_inspection());
        assert!(sink.is_empty());
        record_trace(&mut sink, true, 1, NextHop::Forward, &icmp_inspection());
        assert_eq!(sink.len(), 1);
        assert_eq!(sink[0].sw_if_index, 1);
        assert_eq!(sink[0].protocol, 1);
        assert_eq!(sink[0].source_port, 0);
        assert_eq!(sink[0].function_code, None);
    }

    #[test]
    fn tcp_fields_copied() {
        let entry = TraceEntry::new(3, NextHop::Forward, &modbus_inspection());
        assert_eq!(entry.source_port, 502);
        assert_eq!(entry.destination_port, 51000);
        assert_eq!(entry.sequence_number, 123456);
        assert_eq!(entry.transaction_id, Some(42));
        assert_eq!(entry.function_code, Some(3));
    }

    #[test]
    fn render_policy() {
        let icmp = TraceEntry::new(0, NextHop::Forward, &icmp_inspection());
        let tcp = TraceEntry::new(0, NextHop::Forward, &modbus_inspection());

        let mut sink = TextTraceSink::new(Vec::new(), TraceRender::TcpOnly);
        sink.add_trace(icmp.clone());
        sink.add_trace(tcp.clone());
        assert_eq!(sink.written(), 1);
        let text = String::from_utf8(sink.into_inner()).expect("utf8");
        assert_eq!(
            text,
            "packet-inspect: sw_if_index 0, next forward, src 10.0.0.1, dst 10.0.0.2, protocol 6, \
             src port 502, seq 123456, dst port 51000, trans id 42, function code 3\n"
        );

        let mut sink = TextTraceSink::new(Vec::new(), TraceRender::All);
        sink.add_trace(icmp);
        sink.add_trace(tcp);
        assert_eq!(sink.written(), 2);
        let text = String::from_utf8(sink.into_inner()).expect("utf8");
        assert!(text.starts_with(
            "packet-inspect: sw_if_index 0, next forward, src 10.0.0.1, dst 10.0.0.2, protocol 1\n"
        ));
    }

    #[test]
    fn render_mode_names() {
        assert_eq!(TraceRender::of_string("all").ok(), Some(TraceRender::All));
        assert_eq!(TraceRender::of_string("tcp").ok(), Some(TraceRender::TcpOnly));
        assert!(TraceRender::of_string("icmp").is_err());
    }

    #[test]
    fn json_lines() {
        let mut sink = JsonTraceSink::new(Vec::new());
        sink.add_trace(TraceEntry::new(2, NextHop::Forward, &modbus_inspection()));
        sink.add_trace(TraceEntry::new(2, NextHop::Forward, &icmp_inspection()));
        assert_eq!(sink.written(), 2);
        let text = String::from_utf8(sink.into_inner()).expect("utf8");
        let entries: Vec<TraceEntry> = text
            .lines()
            .map(|l| serde_json::from_str(l).expect("json entry"))
            .collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].function_code, Some(3));
        assert_eq!(entries[0].next, NextHop::Forward);
        assert_eq!(entries[1].protocol, 1);
        assert!(text.contains("\"next\":\"forward\""));
    }

    struct DiskFull;

    impl Write for DiskFull {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "disk full"))
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn write_errors_reported_on_flush() {
        let mut sink = TextTraceSink::new(DiskFull, TraceRender::All);
        sink.add_trace(TraceEntry::new(0, NextHop::Forward, &modbus_inspection()));
        assert_eq!(sink.written(), 0);
        assert_eq!(sink.errors(), 1);
        assert!(TraceSink::flush(&mut sink).is_err());

        let mut sink = JsonTraceSink::new(io::BufWriter::new(DiskFull));
        sink.add_trace(TraceEntry::new(0, NextHop::Forward, &icmp_inspection()));
        assert_eq!(sink.errors(), 0);
        assert!(TraceSink::flush(&mut sink).is_err());

        let mut sink = TextTraceSink::new(Vec::new(), TraceRender::All);
        sink.add_trace(TraceEntry::new(0, NextHop::Forward, &icmp_inspection()));
        assert!(TraceSink::flush(&mut sink).is_ok());
    }

    #[test]
    fn absent_payload_fields() {
        let mut inspection = modbus_inspection();
        if let Some(tcp) = inspection.tcp.as_mut() {
            tcp.transaction_id = None;
            tcp.function_code = Some(3);
        }
        let entry = TraceEntry::new(0, NextHop::Forward, &inspection);
        assert_eq!(entry.transaction_id, None);
        assert!(entry.to_string().ends_with("trans id -, function code 3"));
        let json = serde_json::to_string(&entry).expect("json");
        assert!(json.contains("\"transaction_id\":null"));
        assert!(json.contains("\"function_code\":3"));
    }
}
