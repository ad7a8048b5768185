//! Engine thread
//!
//! Drives a [`CaptureEngine`] from a sample source on a dedicated thread:
//! builds the source, starts a listening cycle on a fresh chunk queue, feeds
//! every chunk to the engine and flushes on the way out.

use crate::audio::engine::{CaptureEngine, CaptureState, CaptureStats};
use crate::audio::queue::{chunk_queue, ChunkConsumer, Disconnected};
use crate::audio::sink::FileSink;
use crate::audio::source::{SampleSource, SourceFactory};
use crate::config::{CaptureConfig, ConfigError};
use crate::events::EventBus;
use crate::flags::SharedFlags;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;

/// How long the engine thread waits for a chunk before checking for stop
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Maximum chunks queued between source and engine
const QUEUE_CHUNKS: usize = 256;

/// Engine counters shared with status readers
pub type SharedStats = Arc<Mutex<CaptureStats>>;

/// Errors raised before the engine thread runs
#[derive(Error, Debug)]
pub enum SpawnError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to spawn capture thread: {0}")]
    Thread(#[from] std::io::Error),
}

/// Why the engine thread exited
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// `stop()` was called
    Requested,
    /// The run limit was reached
    RunLimit,
    /// The source finished
    SourceEnded,
    /// Source or chunk error; the message is also logged
    Failed(String),
}

/// Spawns capture engines on their own thread
pub struct CaptureRunner;

impl CaptureRunner {
    /// Validate `config` and start the engine thread
    ///
    /// The source is built on the new thread because device streams cannot
    /// move between threads.
    pub fn spawn(
        config: CaptureConfig,
        source_factory: SourceFactory,
        sink: Box<dyn FileSink>,
        bus: EventBus,
        flags: SharedFlags,
    ) -> Result<CaptureHandle, SpawnError> {
        let restart = config.restart_source_after_flush;
        let queue_samples = (config.slot_capacity() * 2)
            .max(config.chunk_frames * config.channels as usize * 8);
        let engine = CaptureEngine::new(config, sink, bus, flags)?;

        let stop_flag = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(Mutex::new(engine.stats()));
        let loop_ctx = EngineLoop {
            stop_flag: Arc::clone(&stop_flag),
            stats: Arc::clone(&stats),
            queue_samples,
            restart,
        };

        let thread = std::thread::Builder::new()
            .name("capture-engine".into())
            .spawn(move || {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    loop_ctx.run(engine, source_factory)
                }));
                match result {
                    Ok(reason) => {
                        tracing::info!(?reason, "Capture thread exited");
                        reason
                    }
                    Err(panic_info) => {
                        let msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                            s.to_string()
                        } else if let Some(s) = panic_info.downcast_ref::<String>() {
                            s.clone()
                        } else {
                            "unknown panic".to_string()
                        };
                        tracing::error!(panic = %msg, "Capture thread PANICKED");
                        StopReason::Failed(msg)
                    }
                }
            })?;

        Ok(CaptureHandle {
            stop_flag,
            stats,
            thread: Some(thread),
            reason: None,
        })
    }
}

struct EngineLoop {
    stop_flag: Arc<AtomicBool>,
    stats: SharedStats,
    queue_samples: usize,
    restart: bool,
}

impl EngineLoop {
    fn run(&self, mut engine: CaptureEngine, factory: SourceFactory) -> StopReason {
        let mut source = match factory() {
            Ok(source) => source,
            Err(e) => {
                tracing::error!(error = %e, "Failed to open sample source");
                engine.shutdown();
                self.publish(&engine);
                return StopReason::Failed(e.to_string());
            }
        };

        let reason = self.listen(&mut engine, source.as_mut());

        engine.shutdown();
        source.stop();
        self.publish(&engine);
        reason
    }

    /// Run listening cycles until something ends the session
    fn listen(&self, engine: &mut CaptureEngine, source: &mut dyn SampleSource) -> StopReason {
        let mut cycle: u64 = 0;
        loop {
            cycle += 1;
            let (producer, mut consumer) = chunk_queue(self.queue_samples, QUEUE_CHUNKS);
            if let Err(e) = source.start(producer) {
                tracing::error!(error = %e, source = %source.describe(), "Failed to start source");
                return StopReason::Failed(e.to_string());
            }
            tracing::info!(cycle, source = %source.describe(), "Listening cycle started");

            let mut reported_drops = 0;
            loop {
                if self.stop_flag.load(Ordering::Acquire) {
                    source.stop();
                    self.drain_queued(engine, &mut consumer);
                    return StopReason::Requested;
                }

                let (overflow, result) = match consumer.recv_timeout(POLL_INTERVAL) {
                    Ok(Some(chunk)) => (chunk.overflow, engine.process_chunk(chunk.samples)),
                    Ok(None) => continue,
                    Err(Disconnected) => {
                        tracing::info!(cycle, "Source ended");
                        return StopReason::SourceEnded;
                    }
                };

                if overflow {
                    let dropped = consumer.dropped();
                    tracing::warn!(
                        dropped = dropped - reported_drops,
                        total = dropped,
                        "Source overflow, chunks dropped"
                    );
                    reported_drops = dropped;
                }

                let report = match result {
                    Ok(report) => report,
                    Err(e) => {
                        tracing::error!(error = %e, "Chunk rejected, stopping capture");
                        return StopReason::Failed(e.to_string());
                    }
                };
                self.publish(engine);

                if report.stopped {
                    return StopReason::RunLimit;
                }
                if report.window_closed
                    && self.restart
                    && engine.state() == CaptureState::Listening
                {
                    source.stop();
                    let stale = consumer.drain();
                    tracing::info!(cycle, stale_chunks = stale, "Source restarted after flush");
                    engine.reset_cycle();
                    break;
                }
            }
        }
    }

    /// Feed chunks already queued by a stopped source to the engine
    fn drain_queued(&self, engine: &mut CaptureEngine, consumer: &mut ChunkConsumer) {
        let mut drained = 0usize;
        loop {
            let result = match consumer.recv_timeout(Duration::ZERO) {
                Ok(Some(chunk)) => engine.process_chunk(chunk.samples),
                Ok(None) | Err(Disconnected) => break,
            };
            drained += 1;
            match result {
                Ok(report) if report.stopped => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(error = %e, "Queued chunk rejected during stop");
                    break;
                }
            }
        }
        if drained > 0 {
            tracing::debug!(chunks = drained, "Queued chunks processed before stop");
        }
        self.publish(engine);
    }

    fn publish(&self, engine: &CaptureEngine) {
        if let Ok(mut stats) = self.stats.lock() {
            *stats = engine.stats();
        }
    }
}

/// Handle to a running engine thread; stops it on drop
pub struct CaptureHandle {
    stop_flag: Arc<AtomicBool>,
    stats: SharedStats,
    thread: Option<JoinHandle<StopReason>>,
    reason: Option<StopReason>,
}

impl CaptureHandle {
    /// Ask the engine to flush and stop, then wait for it
    pub fn stop(&mut self) -> Option<StopReason> {
        self.stop_flag.store(true, Ordering::Release);
        self.join()
    }

    /// Wait for the engine to stop on its own
    pub fn wait(&mut self) -> Option<StopReason> {
        self.join()
    }

    fn join(&mut self) -> Option<StopReason> {
        if let Some(thread) = self.thread.take() {
            match thread.join() {
                Ok(reason) => self.reason = Some(reason),
                Err(_) => tracing::error!("Capture thread could not be joined"),
            }
        }
        self.reason.clone()
    }

    /// Check if the engine thread is still alive
    pub fn is_alive(&self) -> bool {
        self.thread
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Latest engine counters
    pub fn stats(&self) -> CaptureStats {
        self.stats.lock().map(|s| *s).unwrap_or_default()
    }

    /// Counters handle that outlives this handle
    pub fn shared_stats(&self) -> SharedStats {
        Arc::clone(&self.stats)
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
