//! Sample sources feeding the chunk queue
//!
//! A source is started with the producer half of a fresh queue and pushes
//! interleaved `f32` chunks into it until stopped or exhausted. Dropping the
//! producer is how a source signals end of stream.
//!
//! - [`WavFileSource`] replays a WAV file (or in-memory samples), optionally
//!   paced at real time
//! - `DeviceSource` opens an input device through cpal (feature `device`)

use crate::audio::queue::ChunkProducer;
use crate::config::CaptureConfig;
#[cfg(feature = "device")]
use crate::config::DeviceSelector;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while opening or running a source
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Input device not found: {0}")]
    DeviceNotFound(String),

    #[error("No default input device")]
    NoDefaultDevice,

    #[error("Failed to open stream: {0}")]
    Stream(String),

    #[error("Failed to read {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: hound::Error,
    },

    #[error("{path} is {actual_rate} Hz / {actual_channels} ch, expected {expected_rate} Hz / {expected_channels} ch")]
    FormatMismatch {
        path: PathBuf,
        expected_rate: u32,
        expected_channels: u16,
        actual_rate: u32,
        actual_channels: u16,
    },

    #[error("No input configured: set input_file or build with the `device` feature")]
    NoInput,

    #[error("Source already started")]
    AlreadyStarted,
}

/// Producer of interleaved sample chunks
///
/// Not required to be `Send`: device streams must stay on the thread that
/// built them, so sources are constructed on the engine thread through a
/// [`SourceFactory`].
pub trait SampleSource {
    /// Begin pushing chunks into `producer`
    fn start(&mut self, producer: ChunkProducer) -> Result<(), SourceError>;

    /// Stop pushing and release the producer; idempotent
    fn stop(&mut self);

    /// Human-readable description for logs
    fn describe(&self) -> String;
}

/// Builds a source on the engine thread
pub type SourceFactory = Arc<dyn Fn() -> Result<Box<dyn SampleSource>, SourceError> + Send + Sync>;

/// Factory for the source a config asks for
///
/// `input_file` wins over a device. `paced` replays files at real time,
/// which is what a live peer expects; batch processing leaves it off.
pub fn source_factory(config: &CaptureConfig, paced: bool) -> SourceFactory {
    let config = config.clone();
    Arc::new(move || -> Result<Box<dyn SampleSource>, SourceError> {
        if let Some(path) = &config.input_file {
            let source = WavFileSource::open(
                path,
                config.sample_rate,
                config.channels,
                config.chunk_frames,
            )?
            .paced(paced);
            return Ok(Box::new(source));
        }
        device_source(&config)
    })
}

#[cfg(feature = "device")]
fn device_source(config: &CaptureConfig) -> Result<Box<dyn SampleSource>, SourceError> {
    Ok(Box::new(DeviceSource::new(
        config.device.clone(),
        config.sample_rate,
        config.channels,
    )))
}

#[cfg(not(feature = "device"))]
fn device_source(_config: &CaptureConfig) -> Result<Box<dyn SampleSource>, SourceError> {
    Err(SourceError::NoInput)
}

/// Replays samples as fixed-size chunks from a background thread
pub struct WavFileSource {
    label: String,
    samples: Arc<[f32]>,
    sample_rate: u32,
    channels: u16,
    chunk_frames: usize,
    paced: bool,
    /// Next chunk to push; survives stop so a restart resumes
    position: Arc<AtomicUsize>,
    stop_flag: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl WavFileSource {
    /// Load a WAV file, checking it matches the capture format
    ///
    /// Integer PCM is scaled to `[-1.0, 1.0]`; float PCM is used as is.
    pub fn open(
        path: &Path,
        sample_rate: u32,
        channels: u16,
        chunk_frames: usize,
    ) -> Result<Self, SourceError> {
        let file_err = |source| SourceError::File {
            path: path.to_path_buf(),
            source,
        };
        let mut reader = hound::WavReader::open(path).map_err(file_err)?;
        let spec = reader.spec();
        if spec.sample_rate != sample_rate || spec.channels != channels {
            return Err(SourceError::FormatMismatch {
                path: path.to_path_buf(),
                expected_rate: sample_rate,
                expected_channels: channels,
                actual_rate: spec.sample_rate,
                actual_channels: spec.channels,
            });
        }

        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<Result<_, _>>()
                .map_err(file_err)?,
            hound::SampleFormat::Int => {
                let scale = (1u64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<Result<_, _>>()
                    .map_err(file_err)?
            }
        };

        tracing::info!(
            path = %path.display(),
            samples = samples.len(),
            sample_rate,
            channels,
            "Loaded WAV input"
        );

        let mut source = Self::from_samples(samples, sample_rate, channels, chunk_frames);
        source.label = format!("file {}", path.display());
        Ok(source)
    }

    /// Replay in-memory interleaved samples
    pub fn from_samples(
        samples: Vec<f32>,
        sample_rate: u32,
        channels: u16,
        chunk_frames: usize,
    ) -> Self {
        Self {
            label: format!("{} in-memory samples", samples.len()),
            samples: samples.into(),
            sample_rate,
            channels,
            chunk_frames: chunk_frames.max(1),
            paced: false,
            position: Arc::new(AtomicUsize::new(0)),
            stop_flag: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }

    /// Sleep one chunk duration between chunks
    pub fn paced(mut self, paced: bool) -> Self {
        self.paced = paced;
        self
    }

    /// Samples per pushed chunk
    pub fn chunk_len(&self) -> usize {
        self.chunk_frames * self.channels as usize
    }

    /// Whether every chunk has been pushed
    pub fn is_exhausted(&self) -> bool {
        self.position.load(Ordering::Relaxed) * self.chunk_len() >= self.samples.len()
    }
}

impl SampleSource for WavFileSource {
    fn start(&mut self, mut producer: ChunkProducer) -> Result<(), SourceError> {
        if self.thread.is_some() {
            return Err(SourceError::AlreadyStarted);
        }
        self.stop_flag.store(false, Ordering::Relaxed);

        let samples = Arc::clone(&self.samples);
        let position = Arc::clone(&self.position);
        let stop_flag = Arc::clone(&self.stop_flag);
        let chunk_len = self.chunk_len();
        let pace = self
            .paced
            .then(|| Duration::from_secs_f64(self.chunk_frames as f64 / self.sample_rate as f64));

        let thread = std::thread::Builder::new()
            .name("wav-replay".into())
            .spawn(move || {
                let mut sent = 0usize;
                let skip = position.load(Ordering::Relaxed);
                'chunks: for chunk in samples.chunks(chunk_len).skip(skip) {
                    // File replay must not lose data: wait for room instead of dropping
                    while !producer.has_room(chunk.len()) {
                        if stop_flag.load(Ordering::Relaxed) {
                            break 'chunks;
                        }
                        std::thread::sleep(Duration::from_millis(1));
                    }
                    if stop_flag.load(Ordering::Relaxed) {
                        break;
                    }
                    producer.push(chunk, false);
                    position.fetch_add(1, Ordering::Relaxed);
                    sent += 1;
                    if let Some(pace) = pace {
                        std::thread::sleep(pace);
                    }
                }
                tracing::debug!(chunks = sent, "Replay finished");
            })
            .map_err(|e| SourceError::Stream(e.to_string()))?;

        self.thread = Some(thread);
        tracing::info!(source = %self.label, "Source started");
        Ok(())
    }

    fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!(source = %self.label, "Replay thread panicked");
            }
            tracing::info!(source = %self.label, "Source stopped");
        }
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}

impl Drop for WavFileSource {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Information about an input device
#[cfg(feature = "device")]
#[derive(Debug, Clone, serde::Serialize)]
pub struct InputDeviceInfo {
    pub index: usize,
    pub name: String,
    pub is_default: bool,
    pub channels: u16,
    pub sample_rate: u32,
}

/// Enumerate input devices of the default host
#[cfg(feature = "device")]
pub fn list_input_devices() -> Result<Vec<InputDeviceInfo>, SourceError> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());
    let devices = host
        .input_devices()
        .map_err(|e| SourceError::Stream(e.to_string()))?;

    Ok(devices
        .enumerate()
        .map(|(index, device)| {
            let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
            let (channels, sample_rate) = device
                .default_input_config()
                .map(|c| (c.channels(), c.sample_rate().0))
                .unwrap_or((0, 0));
            InputDeviceInfo {
                index,
                is_default: default_name.as_deref() == Some(name.as_str()),
                name,
                channels,
                sample_rate,
            }
        })
        .collect())
}

/// Live input through cpal
#[cfg(feature = "device")]
pub struct DeviceSource {
    selector: Option<DeviceSelector>,
    sample_rate: u32,
    channels: u16,
    device_name: Option<String>,
    stream: Option<cpal::Stream>,
}

#[cfg(feature = "device")]
impl DeviceSource {
    pub fn new(selector: Option<DeviceSelector>, sample_rate: u32, channels: u16) -> Self {
        Self {
            selector,
            sample_rate,
            channels,
            device_name: None,
            stream: None,
        }
    }

    fn find_device(&self) -> Result<cpal::Device, SourceError> {
        use cpal::traits::{DeviceTrait, HostTrait};

        let host = cpal::default_host();
        match &self.selector {
            None => host.default_input_device().ok_or(SourceError::NoDefaultDevice),
            Some(DeviceSelector::Index(index)) => host
                .input_devices()
                .map_err(|e| SourceError::Stream(e.to_string()))?
                .nth(*index)
                .ok_or_else(|| SourceError::DeviceNotFound(format!("#{}", index))),
            Some(DeviceSelector::Name(name)) => host
                .input_devices()
                .map_err(|e| SourceError::Stream(e.to_string()))?
                .find(|d| d.name().map(|n| &n == name).unwrap_or(false))
                .ok_or_else(|| SourceError::DeviceNotFound(name.clone())),
        }
    }
}

#[cfg(feature = "device")]
impl SampleSource for DeviceSource {
    fn start(&mut self, mut producer: ChunkProducer) -> Result<(), SourceError> {
        use cpal::traits::{DeviceTrait, StreamTrait};

        if self.stream.is_some() {
            return Err(SourceError::AlreadyStarted);
        }

        let device = self.find_device()?;
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        let config = cpal::StreamConfig {
            channels: self.channels,
            sample_rate: cpal::SampleRate(self.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    // Never block the audio callback; a full queue drops the chunk
                    producer.push(data, false);
                },
                move |err| {
                    tracing::error!("Input stream error: {}", err);
                },
                None,
            )
            .map_err(|e| SourceError::Stream(e.to_string()))?;
        stream
            .play()
            .map_err(|e| SourceError::Stream(e.to_string()))?;

        tracing::info!(
            device = %name,
            sample_rate = self.sample_rate,
            channels = self.channels,
            "Input stream started"
        );
        self.device_name = Some(name);
        self.stream = Some(stream);
        Ok(())
    }

    fn stop(&mut self) {
        if self.stream.take().is_some() {
            tracing::info!(
                device = self.device_name.as_deref().unwrap_or("unknown"),
                "Input stream stopped"
            );
        }
    }

    fn describe(&self) -> String {
        match (&self.device_name, &self.selector) {
            (Some(name), _) => format!("device {}", name),
            (None, Some(selector)) => format!("device {}", selector),
            (None, None) => "default input device".to_string(),
        }
    }
}
