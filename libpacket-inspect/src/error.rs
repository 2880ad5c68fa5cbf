use std::io;
use thiserror::Error;

/// Outcome of a failed header read or classification step
///
/// Both variants are local to a single packet: they stop extraction for that
/// packet, never the processing of a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("truncated header: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },
    #[error("not classifiable: {0}")]
    NotClassifiable(&'static str),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("invalid interface index {0}")]
    InvalidInterface(u32),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
