//! File sinks for captured windows

use hound::{SampleFormat, WavSpec, WavWriter};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while persisting a window
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("A file is already open: {0}")]
    AlreadyOpen(PathBuf),

    #[error("No file is open")]
    NotOpen,

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("WAV error on {path}: {source}")]
    Wav {
        path: PathBuf,
        #[source]
        source: hound::Error,
    },
}

/// Destination for the slots of a window
///
/// The engine calls `open`, then `write` once per slot in chronological
/// order, then `close`. On any error it calls `abort` and drops the window.
pub trait FileSink: Send {
    fn open(&mut self, path: &Path, sample_rate: u32, channels: u16) -> Result<(), SinkError>;

    /// Append interleaved samples to the open file
    fn write(&mut self, samples: &[f32]) -> Result<(), SinkError>;

    /// Finish the open file and return its path
    fn close(&mut self) -> Result<PathBuf, SinkError>;

    /// Discard the open file, if any
    fn abort(&mut self);

    /// Contents of a closed file, for transfer to the peer
    fn read_back(&self, path: &Path) -> Result<Vec<u8>, SinkError> {
        std::fs::read(path).map_err(|source| SinkError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

struct OpenWav {
    path: PathBuf,
    writer: WavWriter<BufWriter<File>>,
    samples: usize,
}

/// Writes windows as 16-bit integer PCM WAV files
#[derive(Default)]
pub struct WavSink {
    current: Option<OpenWav>,
}

impl WavSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Path of the file currently open
    pub fn open_path(&self) -> Option<&Path> {
        self.current.as_ref().map(|c| c.path.as_path())
    }
}

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

impl FileSink for WavSink {
    fn open(&mut self, path: &Path, sample_rate: u32, channels: u16) -> Result<(), SinkError> {
        if let Some(current) = &self.current {
            return Err(SinkError::AlreadyOpen(current.path.clone()));
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| SinkError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let spec = WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let writer = WavWriter::create(path, spec).map_err(|source| SinkError::Wav {
            path: path.to_path_buf(),
            source,
        })?;

        tracing::debug!(path = %path.display(), sample_rate, channels, "WAV file opened");
        self.current = Some(OpenWav {
            path: path.to_path_buf(),
            writer,
            samples: 0,
        });
        Ok(())
    }

    fn write(&mut self, samples: &[f32]) -> Result<(), SinkError> {
        let current = self.current.as_mut().ok_or(SinkError::NotOpen)?;
        for &sample in samples {
            current
                .writer
                .write_sample(to_i16(sample))
                .map_err(|source| SinkError::Wav {
                    path: current.path.clone(),
                    source,
                })?;
        }
        current.samples += samples.len();
        Ok(())
    }

    fn close(&mut self) -> Result<PathBuf, SinkError> {
        let OpenWav {
            path,
            writer,
            samples,
        } = self.current.take().ok_or(SinkError::NotOpen)?;
        if let Err(source) = writer.finalize() {
            // A file without a valid header is worse than no file
            remove_partial(&path);
            return Err(SinkError::Wav { path, source });
        }
        tracing::debug!(path = %path.display(), samples, "WAV file closed");
        Ok(path)
    }

    fn abort(&mut self) {
        if let Some(OpenWav { path, writer, .. }) = self.current.take() {
            drop(writer);
            remove_partial(&path);
        }
    }
}

fn remove_partial(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        tracing::debug!(path = %path.display(), error = %e, "Could not remove partial file");
    }
}
