use pcap_parser::PcapError;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Generic(&'static str),
    #[error(transparent)]
    Inspect(#[from] libpacket_inspect::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("pcap error: {0:?}")]
    Pcap(PcapError<&'static [u8]>),
}

impl From<PcapError<&[u8]>> for Error {
    fn from(e: PcapError<&[u8]>) -> Self {
        Error::Pcap(e.to_owned_vec())
    }
}
