use std::io::{self, Error, ErrorKind, Write};

use libpacket_inspect::{NextHop, NextStage};
use pcap_parser::{LegacyPcapBlock, Linktype, ToVec};

use crate::buffer::FrameBuffer;

/// Output stage: writes forwarded packets to a legacy pcap stream
///
/// Write errors cannot be reported through [`NextStage`], so the first one is
/// kept and returned by [`PcapWriter::finish`]. Nothing is written after it.
pub struct PcapWriter<W: Write> {
    w: W,
    header_written: bool,
    packets: usize,
    error: Option<io::Error>,
}

impl<W: Write> PcapWriter<W> {
    pub fn new(w: W) -> Self {
        PcapWriter {
            w,
            header_written: false,
            packets: 0,
            error: None,
        }
    }

    /// Write the file header. Only the first call has an effect.
    pub fn init_file(&mut self, snaplen: u32, linktype: Linktype) -> Result<(), io::Error> {
        if self.header_written {
            return Ok(());
        }
        let mut hdr = pcap_parser::PcapHeader::new();
        hdr.snaplen = snaplen;
        hdr.network = linktype;
        let s = hdr
            .to_vec()
            .map_err(|_| Error::new(ErrorKind::Other, "Pcap header serialization failed"))?;
        self.w.write_all(&s)?;
        self.header_written = true;
        Ok(())
    }

    fn write_packet(&mut self, packet: &FrameBuffer) -> Result<(), io::Error> {
        if !self.header_written {
            return Err(Error::new(
                ErrorKind::Other,
                "packet received before any interface",
            ));
        }
        let record = LegacyPcapBlock {
            ts_sec: packet.ts_sec,
            ts_usec: packet.ts_usec,
            caplen: packet.data.len() as u32,
            origlen: packet.origlen,
            data: &packet.data,
        };
        let s = record
            .to_vec_raw()
            .map_err(|_| Error::new(ErrorKind::Other, "Pcap block serialization failed"))?;
        self.w.write_all(&s)
    }

    /// Number of packets written
    pub fn packets(&self) -> usize {
        self.packets
    }

    /// Flush the output, and return it with the first error encountered
    pub fn finish(mut self) -> Result<W, io::Error> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        self.w.flush()?;
        Ok(self.w)
    }
}

impl<W: Write> NextStage<FrameBuffer> for PcapWriter<W> {
    fn enqueue(&mut self, frame: &[FrameBuffer], nexts: &[NextHop]) {
        for (packet, next) in frame.iter().zip(nexts) {
            if *next != NextHop::Forward {
                continue;
            }
            if self.error.is_some() {
                return;
            }
            match self.write_packet(packet) {
                Ok(()) => self.packets += 1,
                Err(e) => {
                    error!("could not write packet {}: {}", packet.pcap_index, e);
                    self.error = Some(e);
                }
            }
        }
    }
}
