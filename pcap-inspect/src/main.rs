#![warn(clippy::all)]

#[macro_use]
extern crate log;

use clap::{crate_version, Parser};
use tracing::Level;
use tracing_subscriber::EnvFilter;

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use libpacket_inspect::Config;
use pcap_inspect::{get_reader, pcap_inspect, Error, InspectOptions};

/// Run the packet inspection stage over a pcap file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short, long, value_name = "CONFIG")]
    config: Option<String>,

    /// Output file (legacy pcap). Packets are discarded if not set
    #[arg(short, long, value_name = "OUTPUT")]
    output: Option<String>,

    /// Enable packet tracing
    #[arg(short, long)]
    trace: bool,

    /// Only trace the first N packets
    #[arg(long, value_name = "N")]
    trace_limit: Option<u32>,

    /// Trace format: text or json
    #[arg(long, value_name = "FORMAT")]
    trace_format: Option<String>,

    /// Rendered text traces: all, or tcp to skip entries without ports
    #[arg(long, value_name = "RENDER")]
    trace_render: Option<String>,

    /// Write traces to this file instead of standard output
    #[arg(long, value_name = "FILE")]
    trace_file: Option<String>,

    /// Number of worker threads (0: one per CPU)
    #[arg(short, long)]
    jobs: Option<u8>,

    /// Number of packets per frame
    #[arg(long)]
    frame_size: Option<u16>,

    /// Number of registered interfaces
    #[arg(long)]
    interfaces: Option<u32>,

    /// Disable inspection on an interface (may be repeated)
    #[arg(long, value_name = "IF")]
    disable: Vec<u32>,

    /// Run the periodic process
    #[arg(long)]
    periodic: bool,

    /// Input file (- for standard input)
    input: String,
}

fn load_config(config: &mut Config, filename: &str) -> Result<(), Error> {
    debug!("Loading configuration {filename}");
    let path = Path::new(&filename);
    let file = File::open(path)?;
    config.load_config(file)?;
    Ok(())
}

fn create_writer(filename: Option<&str>) -> Result<Box<dyn Write>, Error> {
    match filename {
        Some(filename) => {
            let file = File::create(Path::new(filename))?;
            Ok(Box::new(BufWriter::new(file)))
        }
        None => Ok(Box::new(io::sink())),
    }
}

fn main() -> Result<(), Error> {
    let args = Args::parse();

    let env_filter = EnvFilter::try_from_env("PCAP_INSPECT_LOG")
        .unwrap_or_else(|_| EnvFilter::from_default_env().add_directive(Level::INFO.into()));
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .compact()
        .init();

    info!("pcap-inspect {}", crate_version!());

    // load config
    let mut config = Config::default();
    if let Some(filename) = args.config.as_deref() {
        load_config(&mut config, filename)?;
    }
    // override config options from command-line arguments
    if let Some(jobs) = args.jobs {
        config.set("num_threads", i64::from(jobs))?;
    }
    if let Some(n) = args.frame_size {
        config.set("frame_size", i64::from(n))?;
    }
    if let Some(n) = args.interfaces {
        config.set("interfaces", i64::from(n))?;
    }
    if args.trace {
        config.set("trace.enabled", true)?;
    }
    if let Some(n) = args.trace_limit {
        config.set("trace.limit", i64::from(n))?;
    }
    if let Some(s) = args.trace_format.as_deref() {
        config.set("trace.format", s)?;
    }
    if let Some(s) = args.trace_render.as_deref() {
        config.set("trace.render", s)?;
    }
    if args.periodic {
        config.set("periodic.enabled", true)?;
    }

    let mut options = InspectOptions::from_config(&config)?;
    options.disabled_interfaces = args.disable;

    let input = get_reader(&args.input)?;
    let output = create_writer(args.output.as_deref())?;
    let traces: Box<dyn Write> = match args.trace_file.as_deref() {
        Some(filename) => create_writer(Some(filename))?,
        None => Box::new(BufWriter::new(io::stdout())),
    };

    let stats = pcap_inspect(input, output, traces, options)?;
    if stats.periodic_timeouts > 0 {
        info!("periodic process: {} timeouts", stats.periodic_timeouts);
    }
    info!("Done.");
    Ok(())
}
