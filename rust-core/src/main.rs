//! Fall Sensing Engine
//!
//! Command-line front end for replaying recorded pose streams, running a
//! synthetic fall, or monitoring a live stream of JSON-lines frames on
//! stdin. For library use, see lib.rs.

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use fall_sensing::replay::{self, ReplayReport};
use fall_sensing::{
    AlertState, EngineConfig, LoggingNotifier, MonitorEvent, MonitorService, MonitoringSession,
    MonotonicClock, PoseFrame,
};

#[derive(Debug, Parser)]
#[command(name = "fall-sensing")]
#[command(about = "Pose-based fall detection with a cancellable caregiver alert")]
struct Cli {
    /// TOML configuration file. Defaults apply to anything it leaves out.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Replay a JSON-lines recording and print the emitted events.
    Replay(ReplayArgs),
    /// Run a synthetic fall through the engine.
    Simulate(SimulateArgs),
    /// Monitor JSON-lines frames from stdin in real time.
    Monitor,
    /// Print the effective configuration as TOML.
    Config,
}

#[derive(Debug, Args)]
struct ReplayArgs {
    /// Recording to replay.
    input: PathBuf,
    /// Print events as JSON lines.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct SimulateArgs {
    #[arg(long, default_value_t = 30)]
    fps: u32,
    /// Seconds spent on the floor after the fall.
    #[arg(long, default_value_t = 15)]
    lying_secs: u32,
    /// Also write the synthetic frames to this file.
    #[arg(long)]
    record: Option<PathBuf>,
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Replay(args) => {
            let frames = replay::load_frames(&args.input)
                .with_context(|| format!("failed to load {}", args.input.display()))?;
            let report = replay::replay(config, &frames);
            print_report(&report, args.json)?;
        }
        Commands::Simulate(args) => {
            let frames = replay::synthetic_fall(args.fps, args.lying_secs);
            if let Some(path) = &args.record {
                let file = std::fs::File::create(path)
                    .with_context(|| format!("failed to create {}", path.display()))?;
                replay::write_frames(std::io::BufWriter::new(file), &frames)?;
                tracing::info!(path = %path.display(), frames = frames.len(), "recording written");
            }
            let report = replay::replay(config, &frames);
            print_report(&report, args.json)?;
        }
        Commands::Monitor => monitor(config).await?,
        Commands::Config => print!("{}", config.to_toml_string()?),
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => Ok(EngineConfig::load(path)?),
        None => Ok(EngineConfig::default()),
    }
}

fn print_report(report: &ReplayReport, json: bool) -> Result<()> {
    for event in &report.events {
        if json {
            println!("{}", serde_json::to_string(event)?);
        } else {
            println!("{}", describe(event));
        }
    }
    if !json {
        println!();
        println!("Frames processed: {}", report.frames_processed);
        println!("Calibrated: {}", report.stats.detection.calibrated);
        println!("Alert state: {:?}", report.stats.alert_state);
        let history = report.stats.history;
        println!(
            "Falls: {} ({} alerted, {} cancelled, {} pending)",
            history.total, history.alerts_sent, history.cancelled, history.pending
        );
    }
    Ok(())
}

fn describe(event: &MonitorEvent) -> String {
    match event {
        MonitorEvent::FallDetected(d) => format!(
            "[{:>8} ms] fall detected ({:?}), confidence {:.1}",
            d.timestamp_ms, d.source, d.confidence
        ),
        MonitorEvent::CountdownTick {
            remaining_secs,
            timestamp_ms,
        } => format!("[{:>8} ms] countdown {}s", timestamp_ms, remaining_secs),
        MonitorEvent::AlertConfirmed(c) => format!("[{:>8} ms] ALERT CONFIRMED", c.timestamp_ms),
        MonitorEvent::AlertCancelled(c) => format!("[{:>8} ms] alert cancelled", c.timestamp_ms),
    }
}

/// Feed stdin frames to a live service until EOF, then let any running
/// countdown finish.
async fn monitor(config: EngineConfig) -> Result<()> {
    let session = MonitoringSession::new(config, Arc::new(MonotonicClock::new()));
    let service = MonitorService::builder(session)
        .with_notifier(Arc::new(LoggingNotifier))
        .spawn();
    let handle = service.handle();

    let mut events = handle.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(e) => tracing::warn!(error = %e, "failed to encode event"),
                },
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(lagged = n, "event printer lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    handle.start().await?;

    let reader = handle.clone();
    let runtime = tokio::runtime::Handle::current();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let stdin = std::io::stdin();
        for (index, line) in stdin.lock().lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let frame: PoseFrame = match serde_json::from_str(&line) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!(line = index + 1, error = %e, "skipping malformed frame");
                    continue;
                }
            };
            runtime.block_on(reader.push_frame(frame))?;
        }
        Ok(())
    })
    .await??;

    // Round trip so every queued frame has been processed
    handle.history().await?;
    while handle.stats().alert_state == AlertState::CountingDown {
        tokio::time::sleep(Duration::from_millis(250)).await;
    }

    service.shutdown().await;
    drop(handle);
    if let Err(e) = printer.await {
        tracing::warn!(error = %e, "event printer ended abnormally");
    }
    Ok(())
}
