//! cditune - monitor and tune serial CDI ignition controllers

mod display;

use anyhow::Context;
use chrono::Local;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use cditune_core::demo::{SimulatedCdi, CAPTURED_MAP};
use cditune_core::ignition::{IgnitionMap, MapLayout};
use cditune_core::protocol::{
    list_ports, Link, ProtocolError, Session, SessionConfig, TelemetryFrame, DEFAULT_BAUD_RATE,
};

use display::{format_row, parse_hex, TelemetryRecord, HEADER, SAMPLE_FRAMES};

/// Wait before reopening a lost connection
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Longest single wait inside the telemetry loop
const POLL_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(Debug, Parser)]
#[command(name = "cditune", version, about = "Monitor and tune serial CDI ignition controllers")]
struct Cli {
    /// Baud rate (9600, 19200, 38400, 57600 or 115200)
    #[arg(short, long, global = true, default_value_t = DEFAULT_BAUD_RATE)]
    baud: u32,

    /// Talk to a simulated controller instead of the named port
    #[arg(long, global = true)]
    demo: bool,

    /// Number of entries in the ignition map
    #[arg(long, global = true, default_value_t = 16)]
    map_entries: usize,

    /// RPM of the first map bin
    #[arg(long, global = true, default_value_t = 1000)]
    first_bin: u16,

    /// RPM step between map bins
    #[arg(long, global = true, default_value_t = 1000)]
    bin_step: u16,

    /// Log protocol traffic (same as RUST_LOG=debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Stream live telemetry until Ctrl-C
    Monitor {
        /// Serial port, e.g. /dev/ttyUSB0 or COM5
        port: String,
        /// One JSON object per frame instead of table rows
        #[arg(long)]
        json: bool,
        /// Reopen the port after a connection failure
        #[arg(long)]
        reconnect: bool,
    },
    /// Decode hex frames offline (defaults to captured samples)
    Decode {
        /// Frames as hex, spaces optional
        frames: Vec<String>,
    },
    /// Read the ignition map from the controller
    ReadMap {
        /// Serial port
        port: String,
        /// Save to a .cfg or .json file instead of printing
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Upload an ignition map file to the controller
    WriteMap {
        /// Serial port
        port: String,
        /// Map file (.cfg or .json)
        file: PathBuf,
    },
    /// List serial ports
    Ports,
}

/// Everything needed to open a session, detached from the parsed arguments
#[derive(Debug, Clone)]
struct SessionOptions {
    baud: u32,
    demo: bool,
    layout: MapLayout,
}

impl SessionOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            baud: cli.baud,
            demo: cli.demo,
            layout: MapLayout {
                entry_count: cli.map_entries,
                first_bin_rpm: cli.first_bin,
                bin_step_rpm: cli.bin_step,
            },
        }
    }

    fn open(&self, port: &str) -> anyhow::Result<Session> {
        let mut config = SessionConfig::new(port, self.baud)?;
        config.map_layout = self.layout;

        let session = if self.demo {
            let advances: Vec<u16> = CAPTURED_MAP
                .iter()
                .copied()
                .cycle()
                .take(self.layout.entry_count)
                .collect();
            let sim = SimulatedCdi::new()
                .with_frame_interval(Duration::from_millis(100))
                .with_map(self.layout, IgnitionMap::from_advances(&self.layout, &advances));
            let link = Link::from_transport(format!("demo:{}", port), config.baud, Box::new(sim));
            Session::start(link, config)
        } else {
            Session::open(config)
        };
        session.with_context(|| format!("failed to start session on {}", port))
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_frame(frame: &TelemetryFrame, json: bool) {
    let now = Local::now();
    if json {
        match serde_json::to_string(&TelemetryRecord::new(now, frame)) {
            Ok(line) => println!("{}", line),
            Err(e) => tracing::warn!("could not serialize frame: {}", e),
        }
    } else {
        println!("{}", format_row(&now, Some(frame)));
    }
}

/// Errors that may clear up by reopening the port
fn is_connection_error(err: &anyhow::Error) -> bool {
    err.downcast_ref::<ProtocolError>()
        .map_or(false, ProtocolError::is_retryable)
}

fn monitor_loop(
    options: &SessionOptions,
    port: &str,
    json: bool,
    reconnect: bool,
    stop: &AtomicBool,
) -> anyhow::Result<()> {
    if !json {
        println!("{}", HEADER);
        println!("{}", "-".repeat(70));
    }

    while !stop.load(Ordering::Relaxed) {
        let result = options.open(port).and_then(|mut session| {
            let stats = session.run_telemetry(stop, POLL_TIMEOUT, |frame| print_frame(frame, json))?;
            session.close();
            Ok(stats)
        });

        match result {
            Ok(stats) => {
                tracing::info!(
                    "stopped: {} frames, {} bad terminators, {} checksum mismatches, {} bytes discarded",
                    stats.frames,
                    stats.bad_terminators,
                    stats.checksum_mismatches,
                    stats.discarded_bytes
                );
                return Ok(());
            }
            Err(e) if reconnect && is_connection_error(&e) => {
                tracing::warn!("connection lost, retrying: {:#}", e);
                std::thread::sleep(RECONNECT_DELAY);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

async fn monitor(
    options: SessionOptions,
    port: String,
    json: bool,
    reconnect: bool,
) -> anyhow::Result<()> {
    let stop = Arc::new(AtomicBool::new(false));

    let stop_signal = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted, stopping after the current frame");
            stop_signal.store(true, Ordering::Relaxed);
        }
    });

    tokio::task::spawn_blocking(move || monitor_loop(&options, &port, json, reconnect, &stop))
        .await
        .context("monitor thread failed")?
}

fn decode(frames: &[String]) -> anyhow::Result<()> {
    let inputs: Vec<&str> = if frames.is_empty() {
        SAMPLE_FRAMES.to_vec()
    } else {
        frames.iter().map(String::as_str).collect()
    };

    println!("{}", HEADER);
    println!("{}", "-".repeat(70));
    for input in inputs {
        let bytes = parse_hex(input)?;
        let now = Local::now();
        match TelemetryFrame::from_slice(&bytes) {
            Ok(frame) => println!("{}", format_row(&now, Some(&frame))),
            Err(e) => {
                tracing::warn!("{}: {}", input, e);
                println!("{}", format_row(&now, None));
            }
        }
    }
    Ok(())
}

fn print_map(map: &IgnitionMap) {
    println!("{:>6} | {:>7}", "RPM", "Advance");
    println!("{}", "-".repeat(16));
    for entry in &map.entries {
        println!("{:>6} | {:>7}", entry.rpm, entry.advance);
    }
}

fn read_map(options: &SessionOptions, port: &str, output: Option<&Path>) -> anyhow::Result<()> {
    let mut session = options.open(port)?;
    let map = session
        .read_ignition_map()
        .context("reading the ignition map failed")?;
    session.close();

    match output {
        Some(path) => {
            map.save(path)
                .with_context(|| format!("failed to write {}", path.display()))?;
            tracing::info!("saved {} entries to {}", map.len(), path.display());
        }
        None => print_map(&map),
    }
    Ok(())
}

fn write_map(options: &SessionOptions, port: &str, file: &Path) -> anyhow::Result<()> {
    let map = IgnitionMap::load(file, &options.layout)
        .with_context(|| format!("failed to load {}", file.display()))?;
    map.check_layout(&options.layout)
        .with_context(|| format!("{} does not fit the map layout", file.display()))?;

    let mut session = options.open(port)?;
    session
        .write_ignition_map(&map)
        .context("writing the ignition map failed")?;
    session.close();
    tracing::info!("uploaded {} entries from {}", map.len(), file.display());
    Ok(())
}

fn ports() {
    let ports = list_ports();
    if ports.is_empty() {
        println!("No serial ports found");
        return;
    }
    for port in ports {
        match (port.vid, port.pid) {
            (Some(vid), Some(pid)) => println!(
                "{}  [{:04x}:{:04x}] {}",
                port.name,
                vid,
                pid,
                port.product.unwrap_or_default()
            ),
            _ => println!("{}", port.name),
        }
    }
}

/// Run blocking serial work off the async runtime
async fn blocking<F>(work: F) -> anyhow::Result<()>
where
    F: FnOnce() -> anyhow::Result<()> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .context("worker thread failed")?
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let options = SessionOptions::from_cli(&cli);

    match cli.command {
        Command::Monitor {
            port,
            json,
            reconnect,
        } => monitor(options, port, json, reconnect).await,
        Command::Decode { frames } => decode(&frames),
        Command::ReadMap { port, output } => {
            blocking(move || read_map(&options, &port, output.as_deref())).await
        }
        Command::WriteMap { port, file } => {
            blocking(move || write_map(&options, &port, &file)).await
        }
        Command::Ports => {
            ports();
            Ok(())
        }
    }
}
