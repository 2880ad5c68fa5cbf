use std::collections::BTreeMap;
use std::io::Write;
use std::time::Duration;

use libpacket_inspect::periodic::{PeriodicEvent, PeriodicProcess, DEFAULT_PERIODIC_TIMEOUT};
use libpacket_inspect::worker::{FrameJob, FrameResult, WorkerPool};
use libpacket_inspect::{
    process_frame, Config, FeatureTable, NextHop, NextStage, NodeRuntime, TraceRender, TraceSink,
    MAX_FRAME_SIZE,
};

use crate::buffer::FrameBuffer;
use crate::error::Error;
use crate::reader::{CaptureHandler, InterfaceInfo};
use crate::writer::PcapWriter;

/// Trace output format
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TraceFormat {
    #[default]
    Text,
    Json,
}

impl TraceFormat {
    pub fn of_string(s: &str) -> Result<TraceFormat, Error> {
        match s {
            "text" => Ok(TraceFormat::Text),
            "json" => Ok(TraceFormat::Json),
            _ => Err(Error::Inspect(libpacket_inspect::Error::Config(format!(
                "Invalid trace format: {s} not among text|json"
            )))),
        }
    }
}

#[derive(Clone, Debug)]
pub struct InspectOptions {
    /// Packets per frame, between 1 and `MAX_FRAME_SIZE`
    pub frame_size: usize,
    /// 1 processes frames on the calling thread
    pub num_workers: usize,
    /// Number of registered interfaces. Packets from other interfaces are not inspected.
    pub n_interfaces: usize,
    /// Interfaces on which the stage is disabled
    pub disabled_interfaces: Vec<u32>,
    pub trace_enabled: bool,
    /// Only flag the first N packets for tracing
    pub trace_limit: Option<usize>,
    pub trace_render: TraceRender,
    pub trace_format: TraceFormat,
    pub periodic: bool,
    pub periodic_timeout: Duration,
}

impl Default for InspectOptions {
    fn default() -> Self {
        InspectOptions {
            frame_size: MAX_FRAME_SIZE,
            num_workers: 1,
            n_interfaces: 1,
            disabled_interfaces: Vec::new(),
            trace_enabled: false,
            trace_limit: None,
            trace_render: TraceRender::All,
            trace_format: TraceFormat::Text,
            periodic: false,
            periodic_timeout: DEFAULT_PERIODIC_TIMEOUT,
        }
    }
}

impl InspectOptions {
    pub fn from_config(config: &Config) -> Result<Self, Error> {
        let mut options = InspectOptions::default();
        if let Some(n) = config.get_usize("frame_size") {
            if n > MAX_FRAME_SIZE {
                warn!("frame_size {} is too large, using {}", n, MAX_FRAME_SIZE);
            }
            options.frame_size = n.clamp(1, MAX_FRAME_SIZE);
        }
        options.num_workers = config.num_workers();
        if let Some(n) = config.get_usize("interfaces") {
            options.n_interfaces = n;
        }
        if let Some(b) = config.get_bool("trace.enabled") {
            options.trace_enabled = b;
        }
        options.trace_limit = config.get_usize("trace.limit");
        if let Some(s) = config.get("trace.render") {
            options.trace_render = TraceRender::of_string(s)?;
        }
        if let Some(s) = config.get("trace.format") {
            options.trace_format = TraceFormat::of_string(s)?;
        }
        if let Some(b) = config.get_bool("periodic.enabled") {
            options.periodic = b;
        }
        if let Some(ms) = config.get_usize("periodic.timeout_ms") {
            if ms == 0 {
                return Err(Error::Inspect(libpacket_inspect::Error::Config(
                    "periodic.timeout_ms must be at least 1".to_owned(),
                )));
            }
            options.periodic_timeout = Duration::from_millis(ms as u64);
        }
        Ok(options)
    }
}

/// Counters reported at the end of a run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Stats {
    pub packets: usize,
    pub bytes: usize,
    pub frames: usize,
    /// Packets flagged for tracing
    pub traced: usize,
    /// Packets forwarded without inspection (interface disabled)
    pub bypassed: usize,
    /// Packets written to the output capture
    pub written: usize,
    pub periodic_timeouts: usize,
}

enum Completed {
    Inspected(FrameResult<FrameBuffer>),
    Bypassed(Vec<FrameBuffer>),
}

/// Groups packets into frames, runs the inspection stage, and writes the result
///
/// Frame order is preserved on the output, whether frames are processed
/// inline or by a worker pool.
pub struct Inspector<W: Write> {
    options: InspectOptions,
    runtime: NodeRuntime,
    features: FeatureTable,
    writer: PcapWriter<W>,
    sink: Box<dyn TraceSink>,
    pool: Option<WorkerPool<FrameBuffer>>,
    periodic: Option<PeriodicProcess>,
    frame: Vec<FrameBuffer>,
    frame_enabled: bool,
    /// Completed frames waiting for their turn to be written
    pending: BTreeMap<u64, Completed>,
    next_sequence: u64,
    next_output: u64,
    interfaces: usize,
    stats: Stats,
}

impl<W: Write> Inspector<W> {
    pub fn new(options: InspectOptions, output: W, sink: Box<dyn TraceSink>) -> Result<Self, Error> {
        let runtime = NodeRuntime {
            trace_enabled: options.trace_enabled,
        };
        let features = FeatureTable::new(options.n_interfaces);
        for &idx in &options.disabled_interfaces {
            features.enable_disable(idx, false)?;
        }
        let pool = if options.num_workers > 1 {
            debug!("starting {} workers", options.num_workers);
            Some(WorkerPool::new(options.num_workers, runtime)?)
        } else {
            None
        };
        let periodic = if options.periodic {
            let process = PeriodicProcess::create(options.periodic_timeout)?;
            process.signal(PeriodicEvent::EnableDisable(true));
            Some(process)
        } else {
            None
        };
        let frame_size = options.frame_size.clamp(1, MAX_FRAME_SIZE);
        Ok(Inspector {
            options: InspectOptions {
                frame_size,
                ..options
            },
            runtime,
            features,
            writer: PcapWriter::new(output),
            sink,
            pool,
            periodic,
            frame: Vec::with_capacity(frame_size),
            frame_enabled: true,
            pending: BTreeMap::new(),
            next_sequence: 0,
            next_output: 0,
            interfaces: 0,
            stats: Stats::default(),
        })
    }

    /// Control surface: insert or remove the stage on an interface
    pub fn features(&self) -> &FeatureTable {
        &self.features
    }

    fn flush_frame(&mut self) -> Result<(), Error> {
        if self.frame.is_empty() {
            return Ok(());
        }
        let packets = std::mem::replace(&mut self.frame, Vec::with_capacity(self.options.frame_size));
        self.stats.frames += 1;
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        trace!(
            "frame {}: {} packets ({})",
            sequence,
            packets.len(),
            if self.frame_enabled { "inspect" } else { "bypass" }
        );
        if !self.frame_enabled {
            self.stats.bypassed += packets.len();
        }
        match self.pool.as_mut() {
            None => {
                if self.frame_enabled {
                    process_frame(&self.runtime, &packets, self.sink.as_mut(), &mut self.writer);
                } else {
                    let nexts = vec![NextHop::Forward; packets.len()];
                    self.writer.enqueue(&packets, &nexts);
                }
                self.next_output += 1;
                Ok(())
            }
            Some(pool) => {
                if self.frame_enabled {
                    pool.submit(FrameJob { sequence, packets })?;
                } else {
                    self.pending.insert(sequence, Completed::Bypassed(packets));
                }
                let max_in_flight = 4 * pool.n_workers() as u64;
                self.drain(|in_flight| in_flight > max_in_flight)
            }
        }
    }

    /// Collect results from the pool and write frames in sequence order
    ///
    /// Blocks for results while `must_wait(frames in flight)` is true.
    fn drain<F: Fn(u64) -> bool>(&mut self, must_wait: F) -> Result<(), Error> {
        let pool = match self.pool.as_ref() {
            Some(pool) => pool,
            None => return Ok(()),
        };
        loop {
            while let Ok(result) = pool.results().try_recv() {
                self.pending.insert(result.sequence, Completed::Inspected(result));
            }
            while let Some(completed) = self.pending.remove(&self.next_output) {
                match completed {
                    Completed::Inspected(result) => {
                        for entry in result.traces {
                            self.sink.add_trace(entry);
                        }
                        self.writer.enqueue(&result.packets, &result.nexts);
                    }
                    Completed::Bypassed(packets) => {
                        let nexts = vec![NextHop::Forward; packets.len()];
                        self.writer.enqueue(&packets, &nexts);
                    }
                }
                self.next_output += 1;
            }
            if !must_wait(self.next_sequence - self.next_output) {
                return Ok(());
            }
            let result = pool
                .results()
                .recv()
                .map_err(|_| Error::Generic("all workers exited"))?;
            self.pending.insert(result.sequence, Completed::Inspected(result));
        }
    }

    /// Process remaining packets, stop background threads, and flush the output
    pub fn finish(mut self) -> Result<(W, Stats), Error> {
        self.flush_frame()?;
        self.drain(|in_flight| in_flight > 0)?;
        if let Some(pool) = self.pool.take() {
            pool.shutdown();
        }
        if let Some(periodic) = self.periodic.take() {
            self.stats.periodic_timeouts = periodic.timeouts();
            periodic.shutdown();
        }
        self.stats.written = self.writer.packets();
        let stats = self.stats;
        let output = self.writer.finish()?;
        if let Err(e) = self.sink.flush() {
            error!("trace output failed: {}", e);
            return Err(Error::Io(e));
        }
        info!(
            "{} packets ({} bytes) in {} frames: {} traced, {} bypassed, {} written",
            stats.packets, stats.bytes, stats.frames, stats.traced, stats.bypassed, stats.written
        );
        Ok((output, stats))
    }
}

impl<W: Write> CaptureHandler for Inspector<W> {
    fn handle_interface(&mut self, if_index: u32, if_info: &InterfaceInfo) -> Result<(), Error> {
        debug!(
            "interface {}: link type {}, snaplen {}",
            if_index, if_info.link_type, if_info.snaplen
        );
        if self.interfaces == 0 {
            self.writer.init_file(if_info.snaplen, if_info.link_type)?;
        } else {
            warn!(
                "interface {} written with the link type of the first interface",
                if_index
            );
        }
        if if_index as usize >= self.features.len() {
            warn!(
                "interface {} is not registered, its packets will not be inspected",
                if_index
            );
        }
        self.interfaces += 1;
        Ok(())
    }

    fn handle_packet(&mut self, mut packet: FrameBuffer) -> Result<(), Error> {
        self.stats.packets += 1;
        self.stats.bytes += packet.data.len();
        let enabled = self.features.is_enabled(packet.sw_if_index);
        if enabled != self.frame_enabled || self.frame.len() >= self.options.frame_size {
            self.flush_frame()?;
            self.frame_enabled = enabled;
        }
        if enabled && self.options.trace_enabled {
            let under_limit = self
                .options
                .trace_limit
                .map_or(true, |limit| self.stats.traced < limit);
            if under_limit {
                packet.traced = true;
                self.stats.traced += 1;
            }
        }
        self.frame.push(packet);
        Ok(())
    }
}
