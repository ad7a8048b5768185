//! Flags shared between the request handler and the engine thread

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Session-lifetime switches set by the peer and read by the engine
///
/// The engine takes a snapshot at file-completion time; a change that lands
/// after the snapshot applies to the next file.
#[derive(Debug, Clone, Default)]
pub struct SharedFlags {
    download_enabled: Arc<AtomicBool>,
}

impl SharedFlags {
    pub fn new(download_enabled: bool) -> Self {
        Self {
            download_enabled: Arc::new(AtomicBool::new(download_enabled)),
        }
    }

    /// Whether captured files are transferred back to the peer
    pub fn download_enabled(&self) -> bool {
        self.download_enabled.load(Ordering::Acquire)
    }

    pub fn set_download_enabled(&self, enabled: bool) {
        self.download_enabled.store(enabled, Ordering::Release);
    }
}
