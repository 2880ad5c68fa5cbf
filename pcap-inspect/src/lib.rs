//! Run the packet inspection stage over a capture file
//!
//! Packets are read from a pcap or pcap-ng input, grouped into frames, inspected,
//! and written unchanged to a legacy pcap output, in input order.

#[macro_use]
extern crate log;

mod buffer;
mod error;
mod pipeline;
mod reader;
mod writer;

pub use buffer::FrameBuffer;
pub use error::Error;
pub use pipeline::*;
pub use reader::{read_capture, CaptureHandler, InterfaceInfo};
pub use writer::PcapWriter;

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use libpacket_inspect::{JsonTraceSink, TextTraceSink, TraceSink};

/// Reader buffer size. Blocks larger than this cannot be read.
pub const READER_CAPACITY: usize = 128 * 1024;

/// Open an input capture. `-` is standard input, and names ending with `.gz`
/// are decompressed.
pub fn get_reader(input_filename: &str) -> Result<Box<dyn Read + Send>, Error> {
    let input_reader = if input_filename == "-" {
        Box::new(io::stdin())
    } else {
        let path = Path::new(input_filename);
        let file = File::open(path)?;
        if input_filename.ends_with(".gz") {
            Box::new(GzDecoder::new(file))
        } else {
            Box::new(file) as Box<dyn Read + Send>
        }
    };
    Ok(input_reader)
}

/// Build the trace sink for `options`
pub fn trace_sink(w: Box<dyn Write>, options: &InspectOptions) -> Box<dyn TraceSink> {
    match options.trace_format {
        TraceFormat::Text => Box::new(TextTraceSink::new(w, options.trace_render)),
        TraceFormat::Json => Box::new(JsonTraceSink::new(w)),
    }
}

/// Inspect every packet of `input`, writing them to `output` and traces to `traces`
pub fn pcap_inspect<R, W>(
    input: R,
    output: W,
    traces: Box<dyn Write>,
    options: InspectOptions,
) -> Result<Stats, Error>
where
    R: Read + Send,
    W: Write,
{
    let sink = trace_sink(traces, &options);
    let mut inspector = Inspector::new(options, output, sink)?;
    let n = read_capture(input, READER_CAPACITY, &mut inspector)?;
    debug!("read {} packets", n);
    let (_, stats) = inspector.finish()?;
    Ok(stats)
}
