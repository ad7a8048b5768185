//! Chunk hand-off between the producer context and the engine thread
//!
//! The producer side runs inside audio callbacks and must not allocate or
//! block. Samples go into a preallocated lock-free ring; a small header per
//! chunk (length and overflow flag) follows on a bounded crossbeam channel.
//! Samples are always pushed before their header, so a consumer holding a
//! header can pop exactly that many samples.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::HeapRb;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Metadata travelling ahead of each chunk's samples
#[derive(Debug, Clone, Copy)]
struct ChunkHeader {
    len: usize,
    overflow: bool,
}

/// One received chunk, borrowed from the consumer's scratch buffer
#[derive(Debug)]
pub struct Chunk<'a> {
    pub samples: &'a [f32],
    /// Set when the source reported an overflow or chunks were dropped
    /// since the previous delivered chunk
    pub overflow: bool,
}

/// The producer side has been dropped and every queued chunk consumed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disconnected;

/// Create a queue holding up to `sample_capacity` samples in at most
/// `max_chunks` chunks
pub fn chunk_queue(sample_capacity: usize, max_chunks: usize) -> (ChunkProducer, ChunkConsumer) {
    let ring = HeapRb::<f32>::new(sample_capacity.max(1));
    let (samples_tx, samples_rx) = ring.split();
    let (header_tx, header_rx) = crossbeam_channel::bounded(max_chunks.max(1));
    let dropped = Arc::new(AtomicU64::new(0));

    (
        ChunkProducer {
            samples: samples_tx,
            headers: header_tx,
            pending_overflow: false,
            dropped: Arc::clone(&dropped),
        },
        ChunkConsumer {
            samples: samples_rx,
            headers: header_rx,
            scratch: Vec::new(),
            dropped,
        },
    )
}

/// Producer half, moved into the source's callback or thread
pub struct ChunkProducer {
    samples: ringbuf::HeapProd<f32>,
    headers: Sender<ChunkHeader>,
    pending_overflow: bool,
    dropped: Arc<AtomicU64>,
}

impl ChunkProducer {
    /// Whether a chunk of `len` samples fits right now
    pub fn has_room(&self, len: usize) -> bool {
        self.samples.vacant_len() >= len && !self.headers.is_full()
    }

    /// Queue a copy of `data`; never blocks
    ///
    /// Returns `false` if the queue is full. The chunk is then dropped and
    /// the next chunk that fits carries the overflow flag.
    pub fn push(&mut self, data: &[f32], overflow: bool) -> bool {
        // Single producer: room can only grow between this check and the push.
        if !self.has_room(data.len()) {
            self.pending_overflow = true;
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let pushed = self.samples.push_slice(data);
        debug_assert_eq!(pushed, data.len());

        let header = ChunkHeader {
            len: pushed,
            overflow: overflow || self.pending_overflow,
        };
        match self.headers.try_send(header) {
            Ok(()) => {
                self.pending_overflow = false;
                true
            }
            // Consumer gone; nothing left to deliver to
            Err(TrySendError::Disconnected(_)) => false,
            Err(TrySendError::Full(_)) => {
                // Unreachable with a single producer, see has_room
                self.pending_overflow = true;
                false
            }
        }
    }

    /// Chunks dropped because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Consumer half, owned by the engine thread
pub struct ChunkConsumer {
    samples: ringbuf::HeapCons<f32>,
    headers: Receiver<ChunkHeader>,
    scratch: Vec<f32>,
    dropped: Arc<AtomicU64>,
}

impl ChunkConsumer {
    /// Wait up to `timeout` for the next chunk
    ///
    /// `Ok(None)` on timeout, `Err(Disconnected)` once the producer is gone
    /// and the queue is empty.
    pub fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<Chunk<'_>>, Disconnected> {
        match self.headers.recv_timeout(timeout) {
            Ok(header) => Ok(Some(self.take(header))),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(Disconnected),
        }
    }

    /// Block until the next chunk arrives
    pub fn recv(&mut self) -> Result<Chunk<'_>, Disconnected> {
        let header = self.headers.recv().map_err(|_| Disconnected)?;
        Ok(self.take(header))
    }

    fn take(&mut self, header: ChunkHeader) -> Chunk<'_> {
        if self.scratch.len() < header.len {
            self.scratch.resize(header.len, 0.0);
        }
        let read = self.samples.pop_slice(&mut self.scratch[..header.len]);
        Chunk {
            samples: &self.scratch[..read],
            overflow: header.overflow,
        }
    }

    /// Discard every queued chunk, returning how many were discarded
    pub fn drain(&mut self) -> usize {
        let mut discarded = 0;
        while let Ok(header) = self.headers.try_recv() {
            let _ = self.take(header);
            discarded += 1;
        }
        discarded
    }

    /// Chunks currently queued
    pub fn pending(&self) -> usize {
        self.headers.len()
    }

    /// Samples currently queued
    pub fn pending_samples(&self) -> usize {
        self.samples.occupied_len()
    }

    /// Chunks the producer dropped because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
