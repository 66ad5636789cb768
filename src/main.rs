//! # ESC Bridge
//!
//! Drive and monitor RS-485 drone ESCs through a USB serial bridge.
//!
//! # Commands
//!
//! - `bench`: arm, run the motors at a fixed throttle, then disarm
//! - `ramp`: arm, ramp one motor up and back down, then disarm
//! - `monitor`: print ESC telemetry without transmitting
//! - `decode`: decode a captured hex log offline
//!
//! Ctrl+C during `bench` or `ramp` stops the throttle. Every session sends
//! the disarm burst before the port is released and before any telemetry
//! output that could fail.
//!
//! # Examples
//!
//! ```bash
//! esc-bridge --port /dev/ttyACM0 bench --throttle 7,0,1000,0 --seconds 3
//! esc-bridge ramp --motor 3 --min 1000 --max 2000 --step 100
//! esc-bridge --config config/default.toml monitor
//! esc-bridge decode capture.log
//! ```
//!
//! Logs go to stderr (`RUST_LOG` overrides the INFO default); telemetry goes
//! to stdout.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use esc_bridge::config::Config;
use esc_bridge::esc::decoder::decode_a021_feedback;
use esc_bridge::esc::framer::{FramerEvent, StreamFramer};
use esc_bridge::esc::protocol::{
    Frame, TelemetryReading, Throttle, A021_THROTTLE_OFFSETS, CMD_ID_ESC_COMMAND, NUM_MOTORS,
};
use esc_bridge::scheduler::{CommandScheduler, RampPlan};
use esc_bridge::serial::line::parse_capture;
use esc_bridge::serial::{FrameTransport, Rs485Bridge};
use esc_bridge::telemetry::{JsonlWriter, TelemetryRecord};

/// Longest single wait between telemetry prints
const REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Drive and monitor RS-485 drone ESCs through a USB serial bridge
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serial port of the bridge, overrides the configuration file
    #[arg(short, long)]
    port: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Arm, run the motors at a fixed throttle, then disarm
    Bench {
        /// Four throttle slots, e.g. 7,0,1000,0
        #[arg(short, long, value_parser = parse_throttle)]
        throttle: Throttle,

        /// How long to hold the throttle, rounded up to whole command frames
        /// (at least one)
        #[arg(short, long, value_parser = parse_seconds, default_value = "5")]
        seconds: Duration,
    },

    /// Arm, ramp one motor up and back down, then disarm
    ///
    /// The other motors stay at their idle throttle. Remove the props.
    Ramp {
        /// Motor to ramp (1-4)
        #[arg(short, long, value_parser = clap::value_parser!(u8).range(1..=4))]
        motor: u8,

        /// Starting throttle
        #[arg(long, default_value_t = 1000)]
        min: u16,

        /// Peak throttle
        #[arg(long, default_value_t = 3000)]
        max: u16,

        /// Throttle change per step
        #[arg(long, default_value_t = 100, value_parser = clap::value_parser!(u16).range(1..))]
        step: u16,

        /// Time held at each step
        #[arg(long, value_parser = parse_seconds, default_value = "0.5")]
        step_seconds: Duration,
    },

    /// Print ESC telemetry without transmitting
    Monitor {
        /// Stop after this many seconds (default: until Ctrl+C)
        #[arg(short, long, value_parser = parse_seconds)]
        seconds: Option<Duration>,
    },

    /// Decode a captured hex log
    Decode {
        /// Log with [RX<-485] lines, FRAME, lines or plain hex bytes
        file: PathBuf,
    },
}

fn parse_throttle(s: &str) -> std::result::Result<Throttle, String> {
    let values = s
        .split(',')
        .map(|v| v.trim().parse::<u16>().map_err(|e| format!("'{}': {}", v.trim(), e)))
        .collect::<std::result::Result<Vec<u16>, String>>()?;

    values
        .try_into()
        .map_err(|v: Vec<u16>| format!("expected {} values, got {}", NUM_MOTORS, v.len()))
}

fn parse_seconds(s: &str) -> std::result::Result<Duration, String> {
    let seconds: f64 = s.parse().map_err(|e| format!("'{}': {}", s, e))?;
    if !seconds.is_finite() || seconds < 0.0 || seconds > 3600.0 {
        return Err("seconds must be between 0 and 3600".to_string());
    }
    Ok(Duration::from_secs_f64(seconds))
}

/// Set up stderr logging through a non-blocking writer
///
/// The returned guard flushes pending log lines when dropped.
fn setup_logging() -> WorkerGuard {
    let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());

    let filter = EnvFilter::builder()
        .with_default_directive(tracing::Level::INFO.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(writer))
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = setup_logging();

    info!("ESC Bridge v{} starting...", env!("CARGO_PKG_VERSION"));

    let mut config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load configuration from {:?}", path))?,
        None => Config::default(),
    };

    if let Some(port) = cli.port {
        config.serial.port = port;
        config.validate()?;
    }

    let session = match cli.command {
        Commands::Bench { throttle, seconds } => Session::Bench { throttle, duration: seconds },
        Commands::Ramp { motor, min, max, step, step_seconds } => {
            Session::Ramp(RampPlan::new(usize::from(motor), min, max, step, step_seconds)?)
        }
        Commands::Monitor { seconds } => Session::Monitor { duration: seconds },
        Commands::Decode { file } => return run_decode(&file),
    };

    let bridge = Rs485Bridge::open(&config.serial).await?;
    let scheduler = CommandScheduler::new(bridge, &config);
    let mut output = TelemetryOutput::new(config.telemetry.jsonl, std::io::stdout());

    info!("{}, press Ctrl+C to stop", session.describe());
    run_session(scheduler, &mut output, session, tokio::signal::ctrl_c()).await
}

/// Where decoded telemetry is printed
enum TelemetryOutput<W: Write> {
    Jsonl(JsonlWriter<W>),
    Text(W),
}

impl<W: Write> TelemetryOutput<W> {
    fn new(jsonl: bool, writer: W) -> Self {
        if jsonl {
            TelemetryOutput::Jsonl(JsonlWriter::new(writer))
        } else {
            TelemetryOutput::Text(writer)
        }
    }

    fn emit(&mut self, records: Vec<TelemetryRecord>) -> Result<()> {
        match self {
            TelemetryOutput::Jsonl(writer) => {
                for record in &records {
                    writer.write(record)?;
                }
                writer.flush()?;
            }
            TelemetryOutput::Text(writer) => {
                for record in &records {
                    writeln!(writer, "{}", format_reading(&record.reading))?;
                }
                writer.flush()?;
            }
        }
        Ok(())
    }
}

fn format_reading(reading: &TelemetryReading) -> String {
    format!(
        "seq={:3} {:6.2} V {:6.2} A {:6} rpm {:5.1} C raw={:?}",
        reading.sequence,
        reading.voltage,
        reading.current,
        reading.rpm,
        reading.temperature,
        reading.undecoded()
    )
}

/// What a hardware session does between opening and closing the bridge
#[derive(Debug)]
enum Session {
    Bench { throttle: Throttle, duration: Duration },
    Ramp(RampPlan),
    Monitor { duration: Option<Duration> },
}

impl Session {
    fn describe(&self) -> String {
        match self {
            Session::Bench { throttle, duration } => {
                format!("Bench: throttle {:?} for {:?}", throttle, duration)
            }
            Session::Ramp(plan) => format!("Ramp: motor {}", plan.motor()),
            Session::Monitor { duration: Some(duration) } => format!("Monitor for {:?}", duration),
            Session::Monitor { duration: None } => "Monitor".to_string(),
        }
    }

    async fn run<T: FrameTransport, W: Write>(
        &self,
        scheduler: &mut CommandScheduler<T>,
        output: &mut TelemetryOutput<W>,
    ) -> Result<()> {
        match self {
            Session::Bench { throttle, duration } => {
                bench_sequence(scheduler, output, *throttle, *duration).await
            }
            Session::Ramp(plan) => ramp_sequence(scheduler, output, plan).await,
            Session::Monitor { duration } => {
                let deadline = duration.map(|d| Instant::now() + d);
                monitor_loop(scheduler, output, deadline).await
            }
        }
    }
}

/// Run `session` until it ends or `interrupt` fires, then disarm and close
///
/// The disarm burst goes out before any telemetry is written, so a failing
/// output cannot leave the ESC armed.
async fn run_session<T, W, I>(
    mut scheduler: CommandScheduler<T>,
    output: &mut TelemetryOutput<W>,
    session: Session,
    interrupt: I,
) -> Result<()>
where
    T: FrameTransport,
    W: Write,
    I: Future,
{
    let result = tokio::select! {
        result = session.run(&mut scheduler, output) => result,
        _ = interrupt => {
            warn!("Interrupted, disarming...");
            Ok(())
        }
    };
    if let Err(e) = &result {
        warn!("Session failed: {:#}", e);
    }

    let records = scheduler.take_telemetry();
    let framer = scheduler.framer_stats();
    let stats = scheduler.stats();

    // Disarms unless the session already did
    let mut transport = scheduler.shutdown().await?;
    transport.close().await?;

    info!(
        "Sent {} frames ({} send errors), received {} frames ({} telemetry, {} dropped), {} resyncs",
        stats.frames_sent,
        stats.send_errors,
        framer.frames,
        stats.telemetry_frames,
        stats.telemetry_dropped,
        framer.resyncs
    );

    output.emit(records)?;
    result
}

async fn bench_sequence<T: FrameTransport, W: Write>(
    scheduler: &mut CommandScheduler<T>,
    output: &mut TelemetryOutput<W>,
    throttle: Throttle,
    duration: Duration,
) -> Result<()> {
    scheduler.arm().await?;

    // Whole frames, counted once so reporting chunks cannot add any
    let mut remaining = scheduler.frames_for(duration);
    let per_report = scheduler.frames_for(REPORT_INTERVAL);

    while remaining > 0 {
        let frames = remaining.min(per_report);
        scheduler.set_throttle(throttle, scheduler.cadence() * frames).await?;
        output.emit(scheduler.take_telemetry())?;
        remaining -= frames;
    }

    scheduler.disarm().await?;
    Ok(())
}

async fn ramp_sequence<T: FrameTransport, W: Write>(
    scheduler: &mut CommandScheduler<T>,
    output: &mut TelemetryOutput<W>,
    plan: &RampPlan,
) -> Result<()> {
    scheduler.arm().await?;

    for (throttle, duration) in plan.schedule(scheduler.throttle()) {
        info!("Motor {} throttle {:?}", plan.motor(), throttle);
        scheduler.set_throttle(throttle, duration).await?;
        output.emit(scheduler.take_telemetry())?;
    }

    scheduler.disarm().await?;
    Ok(())
}

async fn monitor_loop<T: FrameTransport, W: Write>(
    scheduler: &mut CommandScheduler<T>,
    output: &mut TelemetryOutput<W>,
    deadline: Option<Instant>,
) -> Result<()> {
    loop {
        let chunk = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return Ok(());
                }
                (deadline - now).min(REPORT_INTERVAL)
            }
            None => REPORT_INTERVAL,
        };

        scheduler.listen(chunk).await?;
        output.emit(scheduler.take_telemetry())?;
    }
}

fn run_decode(path: &Path) -> Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {:?}", path))?;
    let data = parse_capture(&text);
    info!("Decoding {} bytes from {:?}", data.len(), path);

    let mut framer = StreamFramer::from_capture(&data);
    for event in framer.drain() {
        match event {
            FramerEvent::Frame(frame) => println!("{}", describe_frame(&frame)),
            FramerEvent::Resync { offset, error } => println!("@{:<6} resync: {}", offset, error),
        }
    }

    let stats = framer.stats();
    println!(
        "{} frames, {} resyncs ({} checksum, {} legacy sum), {} bytes skipped",
        stats.frames, stats.resyncs, stats.checksum_mismatches, stats.legacy_checksums, stats.skipped_bytes
    );
    if stats.legacy_checksums > 0 {
        warn!("Some frames carry the legacy additive checksum; check the ESC firmware");
    }
    Ok(())
}

/// One-line summary of a decoded frame
fn describe_frame(frame: &Frame) -> String {
    if let Some(result) = TelemetryReading::from_frame(frame) {
        return match result {
            Ok(reading) => format!("A0D0 {}", format_reading(&reading)),
            Err(e) => format!("A0D0 seq={:3} undecodable: {}", frame.sequence, e),
        };
    }

    if frame.cmd_id == CMD_ID_ESC_COMMAND {
        return match decode_a021_feedback(&frame.payload) {
            Ok(feedback) => {
                let slots: Vec<u16> = A021_THROTTLE_OFFSETS
                    .iter()
                    .map(|&o| u16::from_le_bytes([frame.payload[o], frame.payload[o + 1]]))
                    .collect();
                format!(
                    "A021 seq={:3} counter={:5} {} slots={:?} state=0x{:02X} {:.2} V",
                    frame.sequence,
                    feedback.counter,
                    if feedback.armed { "ARMED   " } else { "disarmed" },
                    slots,
                    feedback.state,
                    feedback.voltage
                )
            }
            Err(e) => format!("A021 seq={:3} undecodable: {}", frame.sequence, e),
        };
    }

    format!(
        "{:04X} seq={:3} payload={}",
        frame.cmd_id,
        frame.sequence,
        hex::encode_upper(&frame.payload)
    )
}
