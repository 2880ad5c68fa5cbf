//! Batch dispatcher: run the inspection stage over one frame of packets

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::classifier::inspect;
use crate::trace::{record_trace, TraceSink};

/// Maximum number of packets in a frame
pub const MAX_FRAME_SIZE: usize = 256;

/// Downstream stage selected for a packet
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u16)]
pub enum NextHop {
    /// Not selected by this stage
    Drop = 0,
    Forward = 1,
}

impl fmt::Display for NextHop {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            NextHop::Drop => f.write_str("drop"),
            NextHop::Forward => f.write_str("forward"),
        }
    }
}

/// A packet buffer, as handed over by the pipeline driver
pub trait PacketBuffer {
    /// Packet bytes, starting at the IPv4 header
    fn current(&self) -> &[u8];

    /// Incoming interface identifier
    fn sw_if_index(&self) -> u32;

    /// True if the driver requested a trace entry for this packet
    fn is_traced(&self) -> bool;
}

/// The stage receiving packets after inspection
pub trait NextStage<B> {
    /// Receive a whole frame and one decision per packet, in frame order
    fn enqueue(&mut self, frame: &[B], nexts: &[NextHop]);
}

impl<B: Clone> NextStage<B> for Vec<(B, NextHop)> {
    fn enqueue(&mut self, frame: &[B], nexts: &[NextHop]) {
        self.extend(frame.iter().cloned().zip(nexts.iter().copied()));
    }
}

/// Per-invocation settings, owned by the pipeline driver
#[derive(Clone, Copy, Debug, Default)]
pub struct NodeRuntime {
    /// Node-level trace switch; packets are traced only if this and their own flag are set
    pub trace_enabled: bool,
}

/// Inspect every packet of `frame`, then hand the frame to `next_stage`
///
/// Every packet is forwarded, in input order. Returns the number of packets processed.
pub fn process_frame<B, S, D>(
    runtime: &NodeRuntime,
    frame: &[B],
    sink: &mut S,
    next_stage: &mut D,
) -> usize
where
    B: PacketBuffer,
    S: TraceSink + ?Sized,
    D: NextStage<B> + ?Sized,
{
    debug_assert!(frame.len() <= MAX_FRAME_SIZE);
    let mut nexts = Vec::with_capacity(frame.len());
    for b in frame {
        let next = NextHop::Forward;
        let inspection = inspect(b.current());
        record_trace(
            sink,
            runtime.trace_enabled && b.is_traced(),
            b.sw_if_index(),
            next,
            &inspection,
        );
        nexts.push(next);
    }
    next_stage.enqueue(frame, &nexts);
    frame.len()
}
