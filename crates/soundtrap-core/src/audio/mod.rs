//! Audio capture module
//!
//! This module contains the capture pipeline:
//! - Chunk hand-off from the producer context ([`queue`])
//! - Sample sources: WAV replay and input devices ([`source`])
//! - Preallocated slot ring ([`ring`])
//! - Energy-threshold activity detection ([`detector`])
//! - WAV file sink ([`sink`])
//! - Capture state machine ([`engine`])
//! - Dedicated engine thread and listening cycles ([`runner`])

pub mod detector;
pub mod engine;
pub mod queue;
pub mod ring;
pub mod runner;
pub mod sink;
pub mod source;
