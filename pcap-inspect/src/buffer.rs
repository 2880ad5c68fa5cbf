use libpacket_inspect::PacketBuffer;
use pcap_parser::data::PacketData;
use pnet_packet::ethernet::{EtherTypes, EthernetPacket};
use pnet_packet::vlan::VlanPacket;

/// An owned packet, as captured, plus the position of its layer-3 header
#[derive(Clone, Debug)]
pub struct FrameBuffer {
    /// Captured bytes, forwarded unchanged
    pub data: Vec<u8>,
    /// Offset of the IPv4 header in `data`. Equal to `data.len()` when there
    /// is nothing to inspect.
    pub l3_offset: usize,
    pub sw_if_index: u32,
    pub traced: bool,
    pub ts_sec: u32,
    pub ts_usec: u32,
    pub origlen: u32,
    pub pcap_index: usize,
}

impl FrameBuffer {
    /// Copy a captured packet. `raw` is the captured data, and `packet_data`
    /// its decoded view (which refers to a suffix of `raw`).
    pub fn new(raw: &[u8], packet_data: Option<PacketData>, sw_if_index: u32) -> Self {
        let l3_offset = match packet_data {
            Some(PacketData::L2(data)) => {
                let skipped = raw.len().saturating_sub(data.len());
                skipped + ethernet_l3_offset(data)
            }
            Some(PacketData::L3(_, data)) => raw.len().saturating_sub(data.len()),
            Some(PacketData::L4(_, _)) | Some(PacketData::Unsupported(_)) | None => raw.len(),
        };
        FrameBuffer {
            data: raw.to_vec(),
            l3_offset,
            sw_if_index,
            traced: false,
            ts_sec: 0,
            ts_usec: 0,
            origlen: raw.len() as u32,
            pcap_index: 0,
        }
    }
}

/// Offset of the layer-3 header in an Ethernet frame, skipping 802.1Q tags
fn ethernet_l3_offset(data: &[u8]) -> usize {
    let eth = match EthernetPacket::new(data) {
        Some(eth) => eth,
        None => return data.len(),
    };
    let mut offset = EthernetPacket::minimum_packet_size();
    let mut ethertype = eth.get_ethertype();
    while ethertype == EtherTypes::Vlan
        || ethertype == EtherTypes::PBridge
        || ethertype == EtherTypes::QinQ
    {
        match VlanPacket::new(&data[offset..]) {
            Some(vlan) => {
                ethertype = vlan.get_ethertype();
                offset += VlanPacket::minimum_packet_size();
            }
            None => return data.len(),
        }
    }
    trace!("    ethertype: 0x{:x}", ethertype.0);
    offset
}

impl PacketBuffer for FrameBuffer {
    fn current(&self) -> &[u8] {
        self.data.get(self.l3_offset..).unwrap_or(&[])
    }

    fn sw_if_index(&self) -> u32 {
        self.sw_if_index
    }

    fn is_traced(&self) -> bool {
        self.traced
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IPV4: &[u8] = &[
        0x45, 0x00, 0x00, 0x14, 0x00, 0x00, 0x00, 0x00, 0x40, 0x06, 0x00, 0x00, 0x0a, 0x00, 0x00,
        0x01, 0x0a, 0x00, 0x00, 0x02,
    ];

    fn ethernet(ethertype: &[u8], payload: &[u8]) -> Vec<u8> {
        let mut frame = vec![0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb];
        frame.extend_from_slice(ethertype);
        frame.extend_from_slice(payload);
        frame
    }

    #[test]
    fn ethernet_ipv4() {
        let frame = ethernet(&[0x08, 0x00], IPV4);
        let b = FrameBuffer::new(&frame, Some(PacketData::L2(&frame)), 0);
        assert_eq!(b.l3_offset, 14);
        assert_eq!(b.current(), IPV4);
        assert_eq!(b.data, frame);
    }

    #[test]
    fn vlan_tag_skipped() {
        let mut tagged = vec![0x00, 0x64, 0x08, 0x00];
        tagged.extend_from_slice(IPV4);
        let frame = ethernet(&[0x81, 0x00], &tagged);
        let b = FrameBuffer::new(&frame, Some(PacketData::L2(&frame)), 2);
        assert_eq!(b.l3_offset, 18);
        assert_eq!(b.current(), IPV4);
        assert_eq!(b.sw_if_index(), 2);
    }

    #[test]
    fn raw_ipv4_after_pseudo_header() {
        let mut raw = vec![0u8; 4];
        raw.extend_from_slice(IPV4);
        let b = FrameBuffer::new(&raw, Some(PacketData::L3(0x0800, &raw[4..])), 0);
        assert_eq!(b.l3_offset, 4);
        assert_eq!(b.current(), IPV4);
    }

    #[test]
    fn nothing_to_inspect() {
        let runt = [0u8; 10];
        let b = FrameBuffer::new(&runt, Some(PacketData::L2(&runt)), 0);
        assert!(b.current().is_empty());
        let b = FrameBuffer::new(&runt, None, 0);
        assert!(b.current().is_empty());
        assert_eq!(b.data.len(), 10);
    }
}
