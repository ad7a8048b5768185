//! Capture engine throughput
//!
//! Feeds chunks through the engine with a sink that discards everything, so
//! only ring writes, scoring and window bookkeeping are measured.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use soundtrap::audio::sink::{FileSink, SinkError};
use soundtrap::{CaptureConfig, CaptureEngine, EventBus, SharedFlags};
use std::path::{Path, PathBuf};

#[derive(Default)]
struct NullSink {
    path: Option<PathBuf>,
}

impl FileSink for NullSink {
    fn open(&mut self, path: &Path, _sample_rate: u32, _channels: u16) -> Result<(), SinkError> {
        self.path = Some(path.to_path_buf());
        Ok(())
    }

    fn write(&mut self, samples: &[f32]) -> Result<(), SinkError> {
        black_box(samples);
        Ok(())
    }

    fn close(&mut self) -> Result<PathBuf, SinkError> {
        self.path.take().ok_or(SinkError::NotOpen)
    }

    fn abort(&mut self) {
        self.path = None;
    }
}

fn config(threshold: f64) -> CaptureConfig {
    CaptureConfig {
        sample_rate: 48000,
        buffer_duration_s: 0.1,
        buffer_count: 8,
        record_count: 2,
        activity_threshold: threshold,
        max_runs: u64::MAX,
        ..Default::default()
    }
}

fn bench_process_chunk(c: &mut Criterion) {
    let mut group = c.benchmark_group("process_chunk");

    for &chunk_len in &[256usize, 1024, 4096] {
        let chunk: Vec<f32> = (0..chunk_len).map(|i| (i as f32 * 0.01).sin() * 0.5).collect();
        group.throughput(Throughput::Elements(chunk_len as u64));

        // Threshold above any chunk score: listening only
        group.bench_with_input(BenchmarkId::new("quiet", chunk_len), &chunk, |b, chunk| {
            let (bus, _events) = EventBus::new(16);
            let mut engine = CaptureEngine::new(
                config(f64::MAX),
                Box::new(NullSink::default()),
                bus,
                SharedFlags::default(),
            )
            .unwrap();
            b.iter(|| engine.process_chunk(black_box(chunk)).unwrap());
        });

        // Every chunk triggers once the previous window closed
        group.bench_with_input(BenchmarkId::new("triggering", chunk_len), &chunk, |b, chunk| {
            let (bus, mut events) = EventBus::new(16);
            let mut engine = CaptureEngine::new(
                config(1.0),
                Box::new(NullSink::default()),
                bus,
                SharedFlags::default(),
            )
            .unwrap();
            b.iter(|| {
                engine.process_chunk(black_box(chunk)).unwrap();
                while events.try_next().is_some() {}
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_process_chunk);
criterion_main!(benches);
