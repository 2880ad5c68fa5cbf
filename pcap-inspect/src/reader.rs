//! Streaming pcap / pcap-ng reader
//!
//! Iterates over the blocks of a capture, keeps track of interfaces, and
//! hands every packet to a [`CaptureHandler`] as an owned [`FrameBuffer`].

use std::io::Read;

use pcap_parser::{Block, Linktype, PcapBlockOwned, PcapError};

use crate::buffer::FrameBuffer;
use crate::error::Error;

const MICROS_PER_SEC: u64 = 1_000_000;

/// Capture interface, as declared by a pcap header or a pcap-ng IDB
#[derive(Clone, Copy, Debug)]
pub struct InterfaceInfo {
    pub link_type: Linktype,
    pub snaplen: u32,
    /// Timestamp units per second
    pub ts_unit: u64,
    /// Seconds added to every timestamp
    pub ts_offset: u64,
}

pub trait CaptureHandler {
    /// Called for every interface declaration, before its packets
    fn handle_interface(&mut self, _if_index: u32, _if_info: &InterfaceInfo) -> Result<(), Error> {
        Ok(())
    }

    fn handle_packet(&mut self, packet: FrameBuffer) -> Result<(), Error>;
}

/// Units per second for a pcap-ng `if_tsresol` value
fn ts_unit_of_tsresol(tsresol: u8) -> u64 {
    let exp = u32::from(tsresol & 0x7f);
    let unit = if tsresol & 0x80 != 0 {
        2u64.checked_pow(exp)
    } else {
        10u64.checked_pow(exp)
    };
    unit.filter(|&u| u > 0).unwrap_or(MICROS_PER_SEC)
}

/// Split a timestamp counted in `unit` per second into (seconds, microseconds)
fn split_ts(ts: u64, unit: u64, offset: u64) -> (u32, u32) {
    let secs = ts / unit + offset;
    let frac = ts % unit;
    let micros = (frac as u128 * MICROS_PER_SEC as u128 / unit as u128) as u32;
    (secs as u32, micros)
}

struct BlockReader<'h, H: CaptureHandler> {
    handler: &'h mut H,
    interfaces: Vec<InterfaceInfo>,
    pcap_index: usize,
}

impl<'h, H: CaptureHandler> BlockReader<'h, H> {
    fn handle_block(&mut self, block: &PcapBlockOwned) -> Result<(), Error> {
        let (if_index, raw, origlen, ts) = match block {
            PcapBlockOwned::LegacyHeader(ref hdr) => {
                let ts_unit = if hdr.is_nanosecond_precision() {
                    1_000_000_000
                } else {
                    MICROS_PER_SEC
                };
                let if_info = InterfaceInfo {
                    link_type: hdr.network,
                    snaplen: hdr.snaplen,
                    ts_unit,
                    ts_offset: 0,
                };
                trace!("Legacy pcap,  link type: {}", hdr.network);
                return self.add_interface(if_info);
            }
            PcapBlockOwned::Legacy(ref b) => {
                let if_info = self.interface(0)?;
                let ts_usec = if if_info.ts_unit == MICROS_PER_SEC {
                    b.ts_usec
                } else {
                    b.ts_usec / 1000
                };
                let caplen = (b.caplen as usize).min(b.data.len());
                (0, &b.data[..caplen], b.origlen, (b.ts_sec, ts_usec))
            }
            PcapBlockOwned::NG(Block::SectionHeader(_)) => {
                // interfaces are scoped to a section
                self.interfaces.clear();
                return Ok(());
            }
            PcapBlockOwned::NG(Block::InterfaceDescription(ref idb)) => {
                let if_info = InterfaceInfo {
                    link_type: idb.linktype,
                    snaplen: idb.snaplen,
                    ts_unit: ts_unit_of_tsresol(idb.if_tsresol),
                    ts_offset: idb.if_tsoffset as u64,
                };
                return self.add_interface(if_info);
            }
            PcapBlockOwned::NG(Block::EnhancedPacket(ref epb)) => {
                let if_info = self.interface(epb.if_id)?;
                let ts = (u64::from(epb.ts_high) << 32) | u64::from(epb.ts_low);
                let caplen = (epb.caplen as usize).min(epb.data.len());
                (
                    epb.if_id,
                    &epb.data[..caplen],
                    epb.origlen,
                    split_ts(ts, if_info.ts_unit, if_info.ts_offset),
                )
            }
            PcapBlockOwned::NG(Block::SimplePacket(ref spb)) => {
                let if_info = self.interface(0)?;
                let caplen = (spb.origlen as usize)
                    .min(if_info.snaplen as usize)
                    .min(spb.data.len());
                (0, &spb.data[..caplen], spb.origlen, (0, 0))
            }
            PcapBlockOwned::NG(Block::InterfaceStatistics(_))
            | PcapBlockOwned::NG(Block::NameResolution(_)) => {
                return Ok(());
            }
            _ => {
                warn!("unsupported block");
                return Ok(());
            }
        };
        self.pcap_index += 1;
        let link_type = self.interface(if_index)?.link_type;
        let data = pcap_parser::data::get_packetdata(raw, link_type, raw.len());
        if data.is_none() {
            debug!("packet {}: could not decode link layer", self.pcap_index);
        }
        let mut packet = FrameBuffer::new(raw, data, if_index);
        packet.ts_sec = ts.0;
        packet.ts_usec = ts.1;
        packet.origlen = origlen;
        packet.pcap_index = self.pcap_index;
        self.handler.handle_packet(packet)
    }

    fn add_interface(&mut self, if_info: InterfaceInfo) -> Result<(), Error> {
        let if_index = self.interfaces.len() as u32;
        self.interfaces.push(if_info);
        self.handler.handle_interface(if_index, &if_info)
    }

    fn interface(&self, if_index: u32) -> Result<InterfaceInfo, Error> {
        self.interfaces
            .get(if_index as usize)
            .copied()
            .ok_or(Error::Generic("packet refers to an undeclared interface"))
    }
}

/// Read all blocks from `reader`, calling `handler` for interfaces and packets
///
/// Returns the number of packets read.
pub fn read_capture<R, H>(reader: R, capacity: usize, handler: &mut H) -> Result<usize, Error>
where
    R: Read + Send,
    H: CaptureHandler,
{
    let mut reader = pcap_parser::create_reader(capacity, reader)?;
    let mut blocks = BlockReader {
        handler,
        interfaces: Vec::new(),
        pcap_index: 0,
    };
    let mut block_index = 0usize;
    let mut last_incomplete_index = None;

    loop {
        match reader.next() {
            Ok((offset, block)) => {
                blocks.handle_block(&block)?;
                block_index += 1;
                reader.consume_noshift(offset);
            }
            Err(PcapError::Eof) => break,
            Err(PcapError::Incomplete(_)) => {
                if last_incomplete_index == Some(block_index) {
                    warn!(
                        "Could not read complete data block (block_index={})",
                        block_index
                    );
                    warn!("Hint: the reader buffer size may be too small, or the input file may be truncated.");
                    break;
                }
                last_incomplete_index = Some(block_index);
                trace!("need refill");
                reader.refill()?;
            }
            Err(e) => {
                let e = e.to_owned_vec();
                error!("error while reading: {:?}", e);
                return Err(Error::Pcap(e));
            }
        }
    }
    Ok(blocks.pcap_index)
}
