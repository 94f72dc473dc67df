//! Serial Telemetry Acquisition - Main Entry Point
//!
//! Headless runner: opens the device link, streams samples into the store,
//! logs live window progress, and exports the history on shutdown.
//!
//! Commands are read from stdin, one per line:
//!
//! - `s` - send the start command
//! - `e` - send the stop command and finalize
//! - `q` - quit without waiting for the device

use anyhow::Context;
use clap::Parser;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use telemetry_rs::{
    config::{default_config_path, AppConfig, LoggingConfig},
    link::{Connector, ScriptedDevice, SerialConnector},
    Coordinator, RunSummary, Session,
};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Default filter when neither RUST_LOG nor the config sets one
const DEFAULT_LOG_FILTER: &str = "info,telemetry_rs=debug";

#[derive(Parser, Debug)]
#[command(name = "telemetry-rs", version, about = "Serial telemetry acquisition")]
struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serial port to open
    #[arg(short, long)]
    port: Option<String>,

    /// Bit rate
    #[arg(short, long)]
    baud: Option<u32>,

    /// Export file
    #[arg(long)]
    export: Option<PathBuf>,

    /// Do not write the export file
    #[arg(long)]
    no_export: bool,

    /// Replay a simulated run of this many device milliseconds instead of opening a port
    #[arg(long, value_name = "MS")]
    simulate: Option<u64>,

    /// Send the start command as soon as the link is open
    #[arg(long)]
    auto_start: bool,

    /// Print the run summary as JSON
    #[arg(long)]
    json: bool,

    /// List available serial ports and exit
    #[arg(long)]
    list_ports: bool,
}

/// Operator command read from stdin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Start,
    Stop,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = load_config(&cli)?;
    // Flushes the file writer when main returns
    let _log_guard = init_logging(&config.logging)?;

    if cli.list_ports {
        let ports = SerialConnector::available_ports();
        if ports.is_empty() {
            println!("No serial ports found");
        }
        for port in ports {
            println!("{}", port);
        }
        return Ok(());
    }

    tracing::info!("Starting telemetry acquisition");

    let cancel = Arc::new(AtomicBool::new(false));
    let commands = spawn_stdin_reader(cancel.clone())?;

    let connector: Box<dyn Connector> = match cli.simulate {
        Some(duration_ms) => {
            tracing::info!("Simulating a {} ms run", duration_ms);
            let device = ScriptedDevice::simulated_run(duration_ms, config.buffer.sample_stride_ms)
                .with_line_delay(Duration::from_millis(1));
            Box::new(device.connector())
        }
        None => Box::new(SerialConnector::new(config.link.read_timeout())),
    };

    let running = Session::new(config)
        .with_cancel_flag(cancel)
        .launch(connector)
        .context("Failed to start acquisition")?;

    let coordinator = running.coordinator().clone();
    if cli.auto_start {
        coordinator.start().context("Failed to send start command")?;
    } else {
        tracing::info!("Link open on {}; enter 's' to start, 'e' to stop", running.address());
    }
    spawn_controller(coordinator.clone(), commands)?;

    let signal = coordinator.shutdown_signal();
    let frames = running.monitor().run(&signal, |frame| {
        if frame.advanced {
            tracing::info!(
                "Display range [{}, {}] ms",
                frame.visible.0,
                frame.visible.1
            );
        }
        if let Some((from, to)) = frame.window.time_span() {
            tracing::trace!(
                "Window {}/{} samples covering {}..{} ms",
                frame.window.len(),
                frame.window.capacity,
                from,
                to
            );
        }
    });
    tracing::debug!("Monitor delivered {} frame(s)", frames);

    let summary = running.wait().context("Acquisition failed")?;
    report(&summary, cli.json)?;

    Ok(())
}

fn load_config(cli: &Cli) -> anyhow::Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => default_config_path()
            .map(AppConfig::load_or_default)
            .unwrap_or_default(),
    };

    if let Some(port) = &cli.port {
        config.link.port = port.clone();
    }
    if let Some(baud) = cli.baud {
        config.link.baud_rate = baud;
    }
    if let Some(path) = &cli.export {
        config.export.path = path.clone();
    }
    if cli.no_export {
        config.export.enabled = false;
    }
    if cli.simulate.is_some() {
        config.link.port = "simulated".to_string();
        config.link.settle_delay_ms = 0;
    }

    config.validate()?;
    Ok(config)
}

fn init_logging(logging: &LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(logging.filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER))
        })
    };

    let (file_layer, guard) = match logging.file_target()? {
        Some((dir, file_name)) => {
            let appender = tracing_appender::rolling::never(dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(filter());
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(filter()),
        )
        .with(file_layer)
        .init();
    Ok(guard)
}

/// Forward stdin commands; `q` raises the cancel flag directly so it also
/// aborts a link that is still retrying
fn spawn_stdin_reader(cancel: Arc<AtomicBool>) -> anyhow::Result<Receiver<Command>> {
    let (tx, rx) = unbounded();
    std::thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                let command = match line.trim() {
                    "s" => Command::Start,
                    "e" => Command::Stop,
                    "q" => {
                        tracing::warn!("Quit requested; cancelling acquisition");
                        cancel.store(true, Ordering::SeqCst);
                        continue;
                    }
                    "" => continue,
                    other => {
                        tracing::warn!("Unknown command {:?} (expected s, e or q)", other);
                        continue;
                    }
                };
                if tx.send(command).is_err() {
                    break;
                }
            }
        })
        .context("Failed to spawn stdin reader")?;
    Ok(rx)
}

fn spawn_controller(coordinator: Coordinator, commands: Receiver<Command>) -> anyhow::Result<()> {
    std::thread::Builder::new()
        .name("controller".to_string())
        .spawn(move || loop {
            if coordinator.is_terminated() {
                break;
            }
            match commands.recv_timeout(Duration::from_millis(200)) {
                Ok(Command::Start) => {
                    if let Err(e) = coordinator.start() {
                        tracing::error!("Start failed: {}", e);
                    }
                }
                Ok(Command::Stop) => {
                    coordinator.request_shutdown();
                    break;
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        })
        .context("Failed to spawn controller")?;
    Ok(())
}

fn report(summary: &RunSummary, json: bool) -> anyhow::Result<()> {
    if json {
        let text = serde_json::to_string_pretty(summary).context("Failed to serialize summary")?;
        println!("{}", text);
        return Ok(());
    }

    println!("Run on {} ended: {}", summary.address, summary.acquisition);
    println!(
        "  {} sample(s) from {} line(s) ({:.1}% yield), {} parse failure(s), {} ignored",
        summary.stats.samples,
        summary.stats.lines_read,
        summary.stats.yield_rate(),
        summary.stats.parse_failures,
        summary.stats.ignored_lines
    );
    if let Some(error) = &summary.error {
        println!("  Link error: {}", error);
    }
    match (&summary.export.path, &summary.export.error) {
        (Some(path), _) => println!("  Exported {} sample(s) to {}", summary.export.exported, path.display()),
        (None, Some(error)) => println!("  Export failed: {}", error),
        (None, None) if summary.export.skipped_empty => println!("  Nothing to export"),
        (None, None) => println!("  Export disabled"),
    }
    println!("  Duration: {:.1}s", summary.duration().num_milliseconds() as f64 / 1000.0);
    Ok(())
}
