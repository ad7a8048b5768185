//! Soundtrap - activity-triggered audio capture
//!
//! This library re-exports the capture engine from `soundtrap-core` and the
//! WebSocket server from `soundtrap-server`, and carries the listening
//! client used by `soundtrap listen`.

pub mod client;

pub use soundtrap_core::{audio, config, events, flags};
pub use soundtrap_server as server;

pub use soundtrap_core::{
    CaptureConfig, CaptureEngine, CaptureHandle, CaptureRunner, EngineEvent, EventBus,
    SharedFlags, StopReason, WavFileSource, WavSink,
};
pub use soundtrap_core::{BUILD_DATE, DEFAULT_SAMPLE_RATE, VERSION};
