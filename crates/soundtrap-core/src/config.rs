//! Capture configuration
//!
//! Loaded from a JSON file. Field names follow Rust conventions; the key names
//! used by earlier deployments (`nr_buffers`, `samplerate_hz`, ...) are
//! accepted as aliases so existing configuration files keep working.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while loading or validating configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("record_count {record_count} exceeds buffer_count {buffer_count}")]
    RecordCountExceedsBuffers {
        record_count: usize,
        buffer_count: usize,
    },

    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// How the engine decides what to persist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMode {
    /// Persist a window of `record_count` buffers after each activity trigger
    #[default]
    Triggered,
    /// No detection; dump the whole ring when the engine stops
    Continuous,
}

/// Naming scheme for captured files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FileNaming {
    /// `<stem>_run_<run>.<ext>`
    #[default]
    Run,
    /// `<stem>_<start slot>_<run>.<ext>`
    SlotAndRun,
}

/// Input device selection, by position in the host's device list or by name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeviceSelector {
    Index(usize),
    Name(String),
}

impl std::fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Index(i) => write!(f, "#{}", i),
            Self::Name(name) => f.write_str(name),
        }
    }
}

fn default_sample_rate() -> u32 {
    crate::DEFAULT_SAMPLE_RATE
}

fn default_channels() -> u16 {
    1
}

fn default_buffer_duration() -> f64 {
    1.0
}

fn default_buffer_count() -> usize {
    8
}

fn default_record_count() -> usize {
    3
}

fn default_threshold() -> f64 {
    100.0
}

fn default_max_runs() -> u64 {
    1000
}

fn default_output_file() -> PathBuf {
    PathBuf::from("recordings/capture.wav")
}

fn default_recent_events() -> usize {
    16
}

fn default_chunk_frames() -> usize {
    1024
}

/// Capture engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Input device (None = default input device)
    #[serde(default, alias = "device_index")]
    pub device: Option<DeviceSelector>,
    /// Sample rate in Hz
    #[serde(default = "default_sample_rate", alias = "samplerate_hz")]
    pub sample_rate: u32,
    /// Interleaved channels per frame
    #[serde(default = "default_channels")]
    pub channels: u16,
    /// Duration covered by one ring slot, in seconds
    #[serde(default = "default_buffer_duration")]
    pub buffer_duration_s: f64,
    /// Number of slots in the ring
    #[serde(default = "default_buffer_count", alias = "nr_buffers")]
    pub buffer_count: usize,
    /// Slots persisted per activity window
    #[serde(
        default = "default_record_count",
        alias = "nr_records_to_file",
        alias = "nr_records"
    )]
    pub record_count: usize,
    /// Activity score (sum of absolute sample values per chunk) that opens a window
    #[serde(default = "default_threshold")]
    pub activity_threshold: f64,
    /// Rollovers after which capture stops
    #[serde(default = "default_max_runs", alias = "nr_cycles")]
    pub max_runs: u64,
    /// Base path for captured files; run/slot suffixes are appended to the stem
    #[serde(default = "default_output_file", alias = "out_audio_file_wav")]
    pub output_file: PathBuf,
    /// Entries kept in the recent-event history
    #[serde(default = "default_recent_events", alias = "len_recent_events")]
    pub recent_events: usize,
    #[serde(default)]
    pub mode: CaptureMode,
    #[serde(default)]
    pub file_naming: FileNaming,
    /// Stop the source while a window is written and start a fresh listening cycle
    #[serde(default)]
    pub restart_source_after_flush: bool,
    /// Replay this WAV file instead of opening an input device
    #[serde(default)]
    pub input_file: Option<PathBuf>,
    /// Frames per chunk when replaying a file
    #[serde(default = "default_chunk_frames")]
    pub chunk_frames: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: default_sample_rate(),
            channels: default_channels(),
            buffer_duration_s: default_buffer_duration(),
            buffer_count: default_buffer_count(),
            record_count: default_record_count(),
            activity_threshold: default_threshold(),
            max_runs: default_max_runs(),
            output_file: default_output_file(),
            recent_events: default_recent_events(),
            mode: CaptureMode::default(),
            file_naming: FileNaming::default(),
            restart_source_after_flush: false,
            input_file: None,
            chunk_frames: default_chunk_frames(),
        }
    }
}

impl CaptureConfig {
    /// Load and validate a config file
    ///
    /// Unlike UI preferences, a capture configuration that cannot be read is
    /// fatal: the engine must not start on guessed settings.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        tracing::info!(path = %path.display(), "Loaded capture config");
        Ok(config)
    }

    /// Check every setting the engine relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(8000..=384000).contains(&self.sample_rate) {
            return Err(ConfigError::Invalid {
                field: "sample_rate",
                reason: format!("{} Hz is outside 8000..=384000", self.sample_rate),
            });
        }
        if self.channels == 0 {
            return Err(ConfigError::Invalid {
                field: "channels",
                reason: "must be at least 1".to_string(),
            });
        }
        if !self.buffer_duration_s.is_finite() || self.buffer_duration_s <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "buffer_duration_s",
                reason: format!("{} is not a positive duration", self.buffer_duration_s),
            });
        }
        if self.buffer_count == 0 {
            return Err(ConfigError::Invalid {
                field: "buffer_count",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.record_count == 0 {
            return Err(ConfigError::Invalid {
                field: "record_count",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.record_count > self.buffer_count {
            return Err(ConfigError::RecordCountExceedsBuffers {
                record_count: self.record_count,
                buffer_count: self.buffer_count,
            });
        }
        if !self.activity_threshold.is_finite() || self.activity_threshold < 0.0 {
            return Err(ConfigError::Invalid {
                field: "activity_threshold",
                reason: format!("{} is not a finite non-negative score", self.activity_threshold),
            });
        }
        if self.max_runs == 0 {
            return Err(ConfigError::Invalid {
                field: "max_runs",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.output_file.file_stem().is_none() {
            return Err(ConfigError::Invalid {
                field: "output_file",
                reason: format!("{} does not name a file", self.output_file.display()),
            });
        }
        if self.chunk_frames == 0 {
            return Err(ConfigError::Invalid {
                field: "chunk_frames",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.slot_capacity() == 0 {
            return Err(ConfigError::Invalid {
                field: "buffer_duration_s",
                reason: "slot would hold no samples".to_string(),
            });
        }
        Ok(())
    }

    /// Samples (not frames) held by one ring slot
    pub fn slot_capacity(&self) -> usize {
        let frames = (self.buffer_duration_s * self.sample_rate as f64).round() as usize;
        frames * self.channels as usize
    }

    /// File path for a window opened at `start_slot` during run `run`
    pub fn window_file(&self, start_slot: usize, run: u64) -> PathBuf {
        let suffix = match self.file_naming {
            FileNaming::Run => format!("_run_{}", run),
            FileNaming::SlotAndRun => format!("_{}_{}", start_slot, run),
        };
        self.suffixed_output(&suffix)
    }

    /// File path for a full-ring dump in continuous mode
    pub fn dump_file(&self, run: u64) -> PathBuf {
        self.suffixed_output(&format!("_dump_{}", run))
    }

    fn suffixed_output(&self, suffix: &str) -> PathBuf {
        let stem = self
            .output_file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "capture".to_string());
        let name = match self.output_file.extension() {
            Some(ext) => format!("{}{}.{}", stem, suffix, ext.to_string_lossy()),
            None => format!("{}{}", stem, suffix),
        };
        self.output_file.with_file_name(name)
    }

    /// Save config to disk, creating parent directories if needed
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!(path = %path.display(), "Config saved to disk");
        Ok(())
    }
}
