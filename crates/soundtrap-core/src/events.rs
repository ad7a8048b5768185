//! Engine events and the bus that carries them off the engine thread
//!
//! The engine thread must never block on a consumer, so the bus is an
//! unbounded FIFO. Each emitted event is also summarised into a bounded
//! history that status endpoints and the standalone recorder can read.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Something the capture engine did that a peer may want to know about
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// A chunk scored at or above the threshold and a window was opened
    ActivityDetected {
        score: f64,
        threshold: f64,
        start_slot: usize,
        /// Insertion offset in the start slot after the triggering chunk
        insertion_point: usize,
        run_index: u64,
    },
    /// A window (or ring dump) was written and closed
    FileCreated { run_index: u64, file: PathBuf },
    /// The file just created, read back for transfer to the peer
    FileTransferReady { file: PathBuf, bytes: Vec<u8> },
}

impl EngineEvent {
    /// Short kind name used in logs and history
    pub fn kind(&self) -> EventKind {
        match self {
            Self::ActivityDetected { .. } => EventKind::ActivityDetected,
            Self::FileCreated { .. } => EventKind::FileCreated,
            Self::FileTransferReady { .. } => EventKind::FileTransferReady,
        }
    }
}

/// Kind of an [`EngineEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ActivityDetected,
    FileCreated,
    FileTransferReady,
}

/// Timestamped summary of an emitted event
#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_index: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_slot: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    /// Payload size for transfers (the bytes themselves are not retained)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes: Option<usize>,
}

impl From<&EngineEvent> for EventRecord {
    fn from(event: &EngineEvent) -> Self {
        let mut record = Self {
            timestamp: Utc::now(),
            kind: event.kind(),
            run_index: None,
            start_slot: None,
            score: None,
            threshold: None,
            file: None,
            bytes: None,
        };
        match event {
            EngineEvent::ActivityDetected {
                score,
                threshold,
                start_slot,
                run_index,
                ..
            } => {
                record.score = Some(*score);
                record.threshold = Some(*threshold);
                record.start_slot = Some(*start_slot);
                record.run_index = Some(*run_index);
            }
            EngineEvent::FileCreated { run_index, file } => {
                record.run_index = Some(*run_index);
                record.file = Some(file.clone());
            }
            EngineEvent::FileTransferReady { file, bytes } => {
                record.file = Some(file.clone());
                record.bytes = Some(bytes.len());
            }
        }
        record
    }
}

/// Bounded history of recent events, oldest first
#[derive(Debug)]
pub struct EventHistory {
    records: VecDeque<EventRecord>,
    max_size: usize,
}

impl EventHistory {
    pub fn new(max_size: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(max_size),
            max_size,
        }
    }

    pub fn push(&mut self, record: EventRecord) {
        if self.max_size == 0 {
            return;
        }
        while self.records.len() >= self.max_size {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn records(&self) -> &VecDeque<EventRecord> {
        &self.records
    }

    /// Copy of the records, oldest first
    pub fn snapshot(&self) -> Vec<EventRecord> {
        self.records.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Shared handle to an [`EventHistory`]
pub type SharedHistory = Arc<Mutex<EventHistory>>;

/// Producer side of the event queue, owned by the engine
#[derive(Clone)]
pub struct EventBus {
    tx: mpsc::UnboundedSender<EngineEvent>,
    history: SharedHistory,
}

/// Consumer side of the event queue
///
/// There is exactly one consumer. An event sent while the consumer is busy
/// stays queued and wakes the next receive, so nothing is skipped.
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<EngineEvent>,
}

impl EventBus {
    /// Create a bus with its own history of `history_len` entries
    pub fn new(history_len: usize) -> (Self, EventStream) {
        Self::with_history(Arc::new(Mutex::new(EventHistory::new(history_len))))
    }

    /// Create a bus that records into an existing (possibly shared) history
    pub fn with_history(history: SharedHistory) -> (Self, EventStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, history }, EventStream { rx })
    }

    /// Publish an event; never blocks
    pub fn emit(&self, event: EngineEvent) {
        if let Ok(mut history) = self.history.lock() {
            history.push(EventRecord::from(&event));
        }
        let kind = event.kind();
        if self.tx.send(event).is_err() {
            tracing::debug!(?kind, "Event consumer gone, event kept in history only");
        }
    }

    pub fn history(&self) -> SharedHistory {
        Arc::clone(&self.history)
    }
}

impl EventStream {
    /// Next event in emission order; `None` once every bus handle is dropped
    /// and the queue is empty
    pub async fn next(&mut self) -> Option<EngineEvent> {
        self.rx.recv().await
    }

    /// Non-blocking receive, for synchronous consumers
    pub fn try_next(&mut self) -> Option<EngineEvent> {
        self.rx.try_recv().ok()
    }

    /// Blocking receive, for consumers on plain threads
    pub fn blocking_next(&mut self) -> Option<EngineEvent> {
        self.rx.blocking_recv()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn activity(run: u64) -> EngineEvent {
        EngineEvent::ActivityDetected {
            score: 10.0,
            threshold: 5.0,
            start_slot: 0,
            insertion_point: 50,
            run_index: run,
        }
    }

    #[tokio::test]
    async fn test_events_arrive_in_emission_order() {
        let (bus, mut stream) = EventBus::new(8);
        bus.emit(activity(1));
        bus.emit(EngineEvent::FileCreated {
            run_index: 1,
            file: PathBuf::from("a_run_1.wav"),
        });
        bus.emit(EngineEvent::FileTransferReady {
            file: PathBuf::from("a_run_1.wav"),
            bytes: vec![1, 2, 3],
        });
        drop(bus);

        let kinds: Vec<EventKind> = std::iter::from_fn(|| stream.try_next())
            .map(|e| e.kind())
            .collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::ActivityDetected,
                EventKind::FileCreated,
                EventKind::FileTransferReady
            ]
        );
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_event_sent_from_another_thread_wakes_consumer() {
        let (bus, mut stream) = EventBus::new(4);
        let producer = std::thread::spawn(move || {
            for run in 0..100 {
                bus.emit(activity(run));
            }
        });

        let mut seen = Vec::new();
        while let Some(EngineEvent::ActivityDetected { run_index, .. }) = stream.next().await {
            seen.push(run_index);
        }
        producer.join().unwrap();
        assert_eq!(seen, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_history_is_bounded() {
        let (bus, _stream) = EventBus::new(3);
        for run in 0..5 {
            bus.emit(activity(run));
        }
        let history = bus.history();
        let history = history.lock().unwrap();
        assert_eq!(history.len(), 3);
        let runs: Vec<u64> = history.records().iter().filter_map(|r| r.run_index).collect();
        assert_eq!(runs, vec![2, 3, 4]);
    }

    #[test]
    fn test_emit_without_consumer_keeps_history() {
        let (bus, stream) = EventBus::new(2);
        drop(stream);
        bus.emit(activity(7));
        assert_eq!(bus.history().lock().unwrap().len(), 1);
    }

    #[test]
    fn test_transfer_record_keeps_only_length() {
        let event = EngineEvent::FileTransferReady {
            file: PathBuf::from("x.wav"),
            bytes: vec![0u8; 1234],
        };
        let record = EventRecord::from(&event);
        assert_eq!(record.bytes, Some(1234));
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"kind\":\"file_transfer_ready\""));
        assert!(!json.contains("score"));
    }
}
