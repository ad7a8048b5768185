//! Soundtrap Core - ring-buffer capture engine and event plumbing
//!
//! This library samples an audio stream into a fixed ring of preallocated
//! buffers, detects sound activity with an energy threshold, and persists a
//! contiguous window of buffers to a WAV file whenever activity is detected.
//! Engine events are published on an [`events::EventBus`] for network-facing
//! consumers.

pub mod audio;
pub mod config;
pub mod events;
pub mod flags;

pub use audio::detector::ActivityDetector;
pub use audio::engine::{CaptureEngine, CaptureState, CaptureStats};
pub use audio::ring::RingBufferStore;
pub use audio::runner::{CaptureHandle, CaptureRunner, SharedStats, SpawnError, StopReason};
pub use audio::sink::{FileSink, SinkError, WavSink};
pub use audio::source::{source_factory, SampleSource, SourceError, SourceFactory, WavFileSource};
pub use config::{CaptureConfig, CaptureMode, ConfigError, DeviceSelector, FileNaming};
pub use events::{EngineEvent, EventBus, EventHistory, EventRecord, EventStream, SharedHistory};
pub use flags::SharedFlags;

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date injected by build.rs
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Default sample rate for capture
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;
