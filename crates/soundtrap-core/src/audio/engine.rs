//! Capture state machine
//!
//! Owns the ring, the activity detector and the file sink, and turns a stream
//! of chunks into capture windows and engine events.
//!
//! ## Window lifecycle
//!
//! A window opens at the slot that received the triggering chunk and spans
//! `record_count` slots in ring order. It is flushed as soon as its stop slot
//! is full, or just before the ring would roll over out of a partly filled
//! stop slot (otherwise `record_count == buffer_count` would overwrite the
//! start slot). Hitting the run limit or an explicit shutdown flushes whatever
//! part of the window has been recorded so far.
//!
//! The engine is synchronous and single-threaded; see
//! [`runner`](crate::audio::runner) for the thread that drives it.

use crate::audio::detector::ActivityDetector;
use crate::audio::ring::{RingBufferStore, RingError};
use crate::audio::sink::{FileSink, SinkError};
use crate::audio::source::SourceError;
use crate::config::{CaptureConfig, CaptureMode, ConfigError};
use crate::events::{EngineEvent, EventBus};
use crate::flags::SharedFlags;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that end a capture session
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error(transparent)]
    Ring(#[from] RingError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),
}

/// Engine state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CaptureState {
    /// Scoring chunks, no window open
    #[default]
    Listening,
    /// A window is open and waiting for its stop slot
    Capturing,
    /// Run limit reached or shut down; chunks are ignored
    Stopped,
}

/// An open capture window
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureWindow {
    pub start_slot: usize,
    pub stop_slot: usize,
    pub score: f64,
    pub threshold: f64,
    /// Run counter value when the window opened
    pub run_index: u64,
    pub file: PathBuf,
}

/// What happened while processing one chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChunkReport {
    /// Slot the chunk landed in; `None` if the engine was already stopped
    pub slot: Option<usize>,
    pub rolled_over: bool,
    pub triggered: bool,
    /// A window was flushed or abandoned during this chunk
    pub window_closed: bool,
    /// The engine is stopped after this chunk
    pub stopped: bool,
}

/// Counters for status reporting
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Default)]
pub struct CaptureStats {
    pub state: CaptureState,
    pub runs: u64,
    pub chunks: u64,
    pub windows: u64,
    pub files_written: u64,
    pub sink_failures: u64,
}

/// Activity-triggered capture engine
pub struct CaptureEngine {
    config: CaptureConfig,
    ring: RingBufferStore,
    detector: ActivityDetector,
    sink: Box<dyn FileSink>,
    bus: EventBus,
    flags: SharedFlags,
    state: CaptureState,
    window: Option<CaptureWindow>,
    stats: CaptureStats,
}

impl CaptureEngine {
    /// Validate `config` and allocate the ring
    ///
    /// Nothing is allocated if validation fails.
    pub fn new(
        config: CaptureConfig,
        sink: Box<dyn FileSink>,
        bus: EventBus,
        flags: SharedFlags,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let ring = RingBufferStore::new(config.buffer_count, config.slot_capacity());
        let detector = ActivityDetector::new(config.activity_threshold);

        tracing::info!(
            buffers = config.buffer_count,
            slot_capacity = ring.capacity(),
            record_count = config.record_count,
            threshold = config.activity_threshold,
            max_runs = config.max_runs,
            mode = ?config.mode,
            "Capture engine created"
        );

        Ok(Self {
            config,
            ring,
            detector,
            sink,
            bus,
            flags,
            state: CaptureState::Listening,
            window: None,
            stats: CaptureStats::default(),
        })
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// Rollovers since the engine was created
    pub fn runs(&self) -> u64 {
        self.stats.runs
    }

    pub fn window(&self) -> Option<&CaptureWindow> {
        self.window.as_ref()
    }

    pub fn ring(&self) -> &RingBufferStore {
        &self.ring
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            state: self.state,
            ..self.stats
        }
    }

    /// Feed one chunk of interleaved samples
    pub fn process_chunk(&mut self, chunk: &[f32]) -> Result<ChunkReport, CaptureError> {
        let mut report = ChunkReport::default();
        if self.state == CaptureState::Stopped {
            report.stopped = true;
            return Ok(report);
        }
        if chunk.len() > self.ring.capacity() {
            return Err(RingError::ChunkTooLarge {
                len: chunk.len(),
                capacity: self.ring.capacity(),
            }
            .into());
        }

        // Leaving a partly filled stop slot: the window is as complete as it gets
        if let Some(stop_slot) = self.window.as_ref().map(|w| w.stop_slot) {
            if self.ring.will_roll_over(chunk.len()) && self.ring.current_slot() == stop_slot {
                tracing::debug!(slot = stop_slot, "Stop slot closed early by rollover");
                self.flush_window(stop_slot, false);
                report.window_closed = true;
            }
        }

        let outcome = self.ring.write(chunk)?;
        self.stats.chunks += 1;
        report.slot = Some(outcome.slot);
        report.rolled_over = outcome.rolled_over;
        if outcome.rolled_over {
            self.stats.runs += 1;
            tracing::trace!(run = self.stats.runs, slot = outcome.slot, "Rollover");
        }

        if self.stats.runs >= self.config.max_runs {
            tracing::info!(
                runs = self.stats.runs,
                max_runs = self.config.max_runs,
                "Run limit reached"
            );
            report.window_closed |= self.window.is_some();
            self.shutdown();
            report.stopped = true;
            return Ok(report);
        }

        if self.state == CaptureState::Listening && self.config.mode == CaptureMode::Triggered {
            if let Some(detection) = self.detector.evaluate(chunk) {
                let start_slot = outcome.slot;
                let stop_slot = (start_slot + self.config.record_count - 1) % self.ring.slot_count();
                let run_index = self.stats.runs;
                let file = self.config.window_file(start_slot, run_index);

                tracing::info!(
                    score = detection.score,
                    threshold = detection.threshold,
                    start_slot,
                    stop_slot,
                    insertion_point = outcome.insertion_point,
                    run = run_index,
                    "Activity detected"
                );
                self.bus.emit(EngineEvent::ActivityDetected {
                    score: detection.score,
                    threshold: detection.threshold,
                    start_slot,
                    insertion_point: outcome.insertion_point,
                    run_index,
                });

                self.window = Some(CaptureWindow {
                    start_slot,
                    stop_slot,
                    score: detection.score,
                    threshold: detection.threshold,
                    run_index,
                    file,
                });
                self.stats.windows += 1;
                self.state = CaptureState::Capturing;
                report.triggered = true;
            }
        }

        if let Some(stop_slot) = self.window.as_ref().map(|w| w.stop_slot) {
            if outcome.slot == stop_slot && self.ring.is_full(stop_slot) {
                self.flush_window(stop_slot, false);
                report.window_closed = true;
            }
        }

        Ok(report)
    }

    /// Flush any open window (or dump the ring in continuous mode) and stop
    ///
    /// Idempotent; later chunks are ignored.
    pub fn shutdown(&mut self) {
        if self.state == CaptureState::Stopped {
            return;
        }

        match self.config.mode {
            CaptureMode::Triggered => {
                if self.window.is_some() {
                    let current = self.ring.current_slot();
                    tracing::info!(slot = current, "Flushing partial window on stop");
                    self.flush_window(current, true);
                }
            }
            CaptureMode::Continuous => self.dump_ring(),
        }

        self.state = CaptureState::Stopped;
        tracing::info!(runs = self.stats.runs, files = self.stats.files_written, "Capture engine stopped");
    }

    /// Start a fresh listening cycle on an empty ring
    ///
    /// Only valid while listening; an open window is left untouched.
    pub fn reset_cycle(&mut self) {
        if self.state == CaptureState::Listening {
            self.ring.reset();
            tracing::debug!("Ring reset for new listening cycle");
        }
    }

    /// Persist the open window over `start_slot..=end_slot`
    fn flush_window(&mut self, end_slot: usize, stopping: bool) {
        let Some(window) = self.window.take() else {
            return;
        };
        let slots = self.ring.slots_between(window.start_slot, end_slot);

        match self.persist(&window.file, &slots) {
            Ok(samples) => {
                tracing::info!(
                    file = %window.file.display(),
                    start_slot = window.start_slot,
                    end_slot,
                    samples,
                    run = window.run_index,
                    "Window written"
                );
                self.publish_file(window.run_index, window.file);
            }
            Err(e) => {
                self.stats.sink_failures += 1;
                tracing::error!(
                    file = %window.file.display(),
                    start_slot = window.start_slot,
                    run = window.run_index,
                    error = %e,
                    "Failed to write window, dropping it"
                );
            }
        }

        self.detector.release();
        self.state = if stopping {
            CaptureState::Stopped
        } else {
            CaptureState::Listening
        };
    }

    /// Write every recorded slot, oldest first, into one file
    fn dump_ring(&mut self) {
        let current = self.ring.current_slot();
        let oldest = self.ring.next_slot(current);
        let slots: Vec<usize> = self
            .ring
            .slots_between(oldest, current)
            .into_iter()
            .filter(|&slot| self.ring.filled(slot) > 0)
            .collect();
        if slots.is_empty() {
            tracing::info!("Ring is empty, nothing to dump");
            return;
        }

        let run_index = self.stats.runs;
        let file = self.config.dump_file(run_index);
        match self.persist(&file, &slots) {
            Ok(samples) => {
                tracing::info!(
                    file = %file.display(),
                    slots = slots.len(),
                    samples,
                    run = run_index,
                    "Ring dumped"
                );
                self.publish_file(run_index, file);
            }
            Err(e) => {
                self.stats.sink_failures += 1;
                tracing::error!(file = %file.display(), error = %e, "Failed to dump ring");
            }
        }
    }

    /// Write `slots` in order through the sink; aborts the file on error
    fn persist(&mut self, file: &Path, slots: &[usize]) -> Result<usize, SinkError> {
        let result = write_slots(
            self.sink.as_mut(),
            &self.ring,
            file,
            slots,
            self.config.sample_rate,
            self.config.channels,
        );
        if result.is_err() {
            self.sink.abort();
        }
        result
    }

    /// Announce a written file and, if enabled, hand its bytes to the peer
    fn publish_file(&mut self, run_index: u64, file: PathBuf) {
        self.stats.files_written += 1;
        self.bus.emit(EngineEvent::FileCreated {
            run_index,
            file: file.clone(),
        });

        if !self.flags.download_enabled() {
            return;
        }
        match self.sink.read_back(&file) {
            Ok(bytes) => {
                tracing::info!(file = %file.display(), bytes = bytes.len(), "File queued for transfer");
                self.bus.emit(EngineEvent::FileTransferReady { file, bytes });
            }
            Err(e) => {
                tracing::warn!(file = %file.display(), error = %e, "Read-back failed, transfer skipped");
            }
        }
    }
}

fn write_slots(
    sink: &mut dyn FileSink,
    ring: &RingBufferStore,
    file: &Path,
    slots: &[usize],
    sample_rate: u32,
    channels: u16,
) -> Result<usize, SinkError> {
    sink.open(file, sample_rate, channels)?;
    let mut samples = 0;
    for &slot in slots {
        let data = ring.slot_data(slot);
        sink.write(data)?;
        samples += data.len();
    }
    sink.close()?;
    Ok(samples)
}
