//! Ingestion counters.
//!
//! Updated by the ingestion thread and readable from anywhere without
//! locking.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters for one ingester.
#[derive(Debug, Default)]
pub struct IngestStats {
    /// Messages pulled off the transport
    messages_received: AtomicU64,
    /// Frames written to the latest slot
    frames_published: AtomicU64,
    /// Messages that did not carry the data stream
    messages_ignored: AtomicU64,
    /// Data stream payloads that could not be decoded
    frames_malformed: AtomicU64,
}

impl IngestStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_message(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame(&self) {
        self.frames_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ignored(&self) {
        self.messages_ignored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.frames_malformed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current statistics.
    pub fn snapshot(&self) -> IngestStatsSnapshot {
        IngestStatsSnapshot {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            frames_published: self.frames_published.load(Ordering::Relaxed),
            messages_ignored: self.messages_ignored.load(Ordering::Relaxed),
            frames_malformed: self.frames_malformed.load(Ordering::Relaxed),
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.snapshot();
        format!(
            "Ingestion Statistics:\n\
             - Messages received: {}\n\
             - Frames published: {}\n\
             - Messages ignored: {}\n\
             - Malformed payloads: {}",
            stats.messages_received,
            stats.frames_published,
            stats.messages_ignored,
            stats.frames_malformed
        )
    }

    /// Reset all counters for a new session.
    pub fn reset(&self) {
        self.messages_received.store(0, Ordering::Relaxed);
        self.frames_published.store(0, Ordering::Relaxed);
        self.messages_ignored.store(0, Ordering::Relaxed);
        self.frames_malformed.store(0, Ordering::Relaxed);
    }
}

/// Point-in-time copy of [`IngestStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestStatsSnapshot {
    pub messages_received: u64,
    pub frames_published: u64,
    pub messages_ignored: u64,
    pub frames_malformed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counting() {
        let stats = IngestStats::new();
        stats.record_message();
        stats.record_message();
        stats.record_frame();
        stats.record_ignored();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.messages_received, 2);
        assert_eq!(snapshot.frames_published, 1);
        assert_eq!(snapshot.messages_ignored, 1);
        assert_eq!(snapshot.frames_malformed, 0);
    }

    #[test]
    fn test_reset() {
        let stats = IngestStats::new();
        stats.record_malformed();
        stats.reset();
        assert_eq!(stats.snapshot(), IngestStatsSnapshot::default());
    }

    #[test]
    fn test_summary_format() {
        let summary = IngestStats::new().summary();
        assert!(summary.contains("Frames published"));
        assert!(summary.contains("Malformed payloads"));
    }
}
