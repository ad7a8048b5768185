//! Soundtrap - activity-triggered audio capture
//!
//! `serve` streams capture sessions to WebSocket peers, `record` captures
//! locally until the run limit, the end of the input, or Ctrl+C. `listen`
//! is the matching peer: it logs a server's events and saves its files.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use soundtrap::client::{self, ListenOptions};
use soundtrap_core::audio::source::source_factory;
use soundtrap_core::{
    CaptureConfig, CaptureRunner, EngineEvent, EventBus, FileNaming, SharedFlags, WavSink,
};
use soundtrap_server::{AppState, Settings};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "soundtrap", version, about = "Activity-triggered audio capture")]
struct Cli {
    /// Also write logs to a daily rolling file in this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve capture sessions to WebSocket peers
    Serve {
        /// Settings file (capture and server keys)
        config: PathBuf,
        /// Override the listening port
        #[arg(long)]
        port: Option<u16>,
    },
    /// Capture locally without a network peer
    Record {
        /// Capture configuration file
        config: PathBuf,
        /// Replay this WAV file instead of the input device
        #[arg(long)]
        input: Option<PathBuf>,
        /// Write the event history to this JSON file at the end
        #[arg(long)]
        events_out: Option<PathBuf>,
    },
    /// Connect to a capture server and log its events
    Listen {
        /// Server URI, e.g. ws://localhost:8765
        uri: String,
        /// Directory for downloaded files; must exist
        #[arg(long, default_value = ".")]
        download_dir: PathBuf,
        /// Ask the server to send every created file
        #[arg(long)]
        download: bool,
    },
    /// List audio input devices
    Devices,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_logging(cli.log_dir.as_deref())?;

    info!(
        version = soundtrap_core::VERSION,
        build_date = soundtrap_core::BUILD_DATE,
        "Soundtrap starting"
    );

    match cli.command {
        Command::Serve { config, port } => serve(&config, port),
        Command::Record {
            config,
            input,
            events_out,
        } => record(&config, input, events_out.as_deref()),
        Command::Listen {
            uri,
            download_dir,
            download,
        } => listen(ListenOptions {
            uri,
            download_dir,
            download,
        }),
        Command::Devices => list_devices(),
    }
}

/// Console logging, optionally mirrored to a rolling file
fn init_logging(log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("soundtrap=info,soundtrap_core=info,soundtrap_server=info")
    });

    let console_layer = fmt::layer().with_writer(std::io::stderr).with_target(true);

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log dir {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "soundtrap.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    Ok(guard)
}

fn serve(config: &Path, port: Option<u16>) -> Result<()> {
    let mut settings = Settings::load(config)?;
    if let Some(port) = port {
        settings.server.port = port;
    }
    if settings.capture.input_file.is_none() && !cfg!(feature = "device") {
        warn!("No input_file configured and device capture is not built in; sessions will fail");
    }

    let factory = source_factory(&settings.capture, true);
    let state = AppState::new(settings.server, settings.capture, factory);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(soundtrap_server::start_server(state))
}

fn record(config: &Path, input: Option<PathBuf>, events_out: Option<&Path>) -> Result<()> {
    let mut capture = CaptureConfig::load(config)?;
    if input.is_some() {
        capture.input_file = input;
    }
    capture.file_naming = FileNaming::SlotAndRun;
    capture.validate()?;

    let (bus, mut events) = EventBus::new(capture.recent_events);
    let history = bus.history();
    let factory = source_factory(&capture, false);
    let mut handle = CaptureRunner::spawn(
        capture,
        factory,
        Box::new(WavSink::new()),
        bus,
        SharedFlags::new(false),
    )?;

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = Arc::clone(&interrupted);
        ctrlc::set_handler(move || interrupted.store(true, Ordering::SeqCst))?;
    }

    println!("Recording. Press Ctrl+C to stop.");
    while handle.is_alive() && !interrupted.load(Ordering::SeqCst) {
        while let Some(event) = events.try_next() {
            report(&event);
        }
        std::thread::sleep(Duration::from_millis(100));
    }

    let reason = if interrupted.load(Ordering::SeqCst) {
        info!("Ctrl+C received, flushing");
        handle.stop()
    } else {
        handle.wait()
    };
    while let Some(event) = events.try_next() {
        report(&event);
    }

    let stats = handle.stats();
    info!(
        ?reason,
        runs = stats.runs,
        windows = stats.windows,
        files = stats.files_written,
        "Recording finished"
    );
    println!(
        "Done: {} file(s) written over {} run(s).",
        stats.files_written, stats.runs
    );

    if let Some(path) = events_out {
        let records = history.lock().map(|h| h.snapshot()).unwrap_or_default();
        let json = serde_json::to_string_pretty(&records)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write events to {}", path.display()))?;
        info!(path = %path.display(), count = records.len(), "Event history written");
    }

    Ok(())
}

fn listen(options: ListenOptions) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let summary = runtime.block_on(client::listen(&options))?;
    info!(
        activities = summary.activities,
        files = summary.files_created,
        downloads = summary.downloads.len(),
        "Listening finished"
    );
    for path in &summary.downloads {
        println!("Saved: {}", path.display());
    }
    println!(
        "Done: {} activity event(s), {} file(s) created, {} downloaded.",
        summary.activities,
        summary.files_created,
        summary.downloads.len()
    );
    Ok(())
}

fn report(event: &EngineEvent) {
    match event {
        EngineEvent::ActivityDetected {
            score,
            threshold,
            start_slot,
            run_index,
            ..
        } => println!(
            "Activity: score {:.3} >= {:.3} at slot {} (run {})",
            score, threshold, start_slot, run_index
        ),
        EngineEvent::FileCreated { run_index, file } => {
            println!("File created: {} (run {})", file.display(), run_index)
        }
        EngineEvent::FileTransferReady { file, bytes } => {
            println!("File ready: {} ({} bytes)", file.display(), bytes.len())
        }
    }
}

#[cfg(feature = "device")]
fn list_devices() -> Result<()> {
    let devices = soundtrap_core::audio::source::list_input_devices()?;
    if devices.is_empty() {
        println!("No input devices found.");
        return Ok(());
    }
    println!("Found {} input device(s):", devices.len());
    println!();
    for device in devices {
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {}. {}{}", device.index, device.name, default_marker);
        println!(
            "     {} channel(s) at {} Hz",
            device.channels, device.sample_rate
        );
    }
    Ok(())
}

#[cfg(not(feature = "device"))]
fn list_devices() -> Result<()> {
    anyhow::bail!("Device capture is not built in; rebuild with `--features device`")
}
