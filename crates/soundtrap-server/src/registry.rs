//! Active capture sessions

use serde::Serialize;
use soundtrap_core::{CaptureStats, SharedStats};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Status of one session as reported by the REST API
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: u64,
    #[serde(flatten)]
    pub stats: CaptureStats,
}

/// Bounded set of live sessions
pub struct SessionRegistry {
    max_sessions: usize,
    next_id: AtomicU64,
    sessions: Mutex<BTreeMap<u64, SharedStats>>,
}

impl SessionRegistry {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            max_sessions,
            next_id: AtomicU64::new(1),
            sessions: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    /// Claim a session slot; `None` when the limit is reached
    pub fn try_register(self: &Arc<Self>) -> Option<SessionGuard> {
        let mut sessions = self.sessions.lock().ok()?;
        if sessions.len() >= self.max_sessions {
            return None;
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        sessions.insert(id, SharedStats::default());
        Some(SessionGuard {
            registry: Arc::clone(self),
            id,
        })
    }

    pub fn active(&self) -> usize {
        self.sessions.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Current stats of every session, ordered by id
    pub fn summaries(&self) -> Vec<SessionSummary> {
        let Ok(sessions) = self.sessions.lock() else {
            return Vec::new();
        };
        sessions
            .iter()
            .map(|(&id, stats)| SessionSummary {
                id,
                stats: stats.lock().map(|s| *s).unwrap_or_default(),
            })
            .collect()
    }

    /// Wait until every session has ended; `false` on timeout
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let idle = async {
            while self.active() > 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        };
        tokio::time::timeout(timeout, idle).await.is_ok()
    }

    fn attach(&self, id: u64, stats: SharedStats) {
        if let Ok(mut sessions) = self.sessions.lock() {
            if let Some(slot) = sessions.get_mut(&id) {
                *slot = stats;
            }
        }
    }

    fn release(&self, id: u64) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.remove(&id);
        }
    }
}

/// Registration of one session; dropping it frees the slot
pub struct SessionGuard {
    registry: Arc<SessionRegistry>,
    id: u64,
}

impl SessionGuard {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Report this session's engine counters
    pub fn attach(&self, stats: SharedStats) {
        self.registry.attach(self.id, stats);
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.release(self.id);
    }
}
