//! Single-writer, multi-reader holder for the most recent frame.
//!
//! Every publish swaps in a fresh immutable entry, so a reader sees either
//! the previous entry or the new one in full, never a mix. Readers never
//! block and never queue: a slow reader simply skips frames.

use super::frame::Frame;
use arc_swap::ArcSwapOption;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A published frame plus bookkeeping.
#[derive(Debug, Clone)]
pub struct SlotEntry {
    /// Publish sequence number, starting at 1
    pub seq: u64,
    /// When the entry was published
    pub published_at: Instant,
    pub frame: Frame,
}

/// The latest-frame slot shared between the ingestion thread and consumers.
///
/// Exactly one thread should publish; sequence numbers then follow receive
/// order and readers observe them monotonically.
#[derive(Debug, Default)]
pub struct LatestSlot {
    current: ArcSwapOption<SlotEntry>,
    published: AtomicU64,
}

impl LatestSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current entry. Returns the new sequence number.
    pub fn publish(&self, frame: Frame) -> u64 {
        let seq = self.published.fetch_add(1, Ordering::AcqRel) + 1;
        self.current.store(Some(Arc::new(SlotEntry {
            seq,
            published_at: Instant::now(),
            frame,
        })));
        seq
    }

    /// Empty the slot, keeping the sequence counter running so sequence
    /// numbers stay unique across sessions.
    pub fn clear(&self) {
        self.current.store(None);
    }

    /// Copy of the most recent frame, or `None` before the first publish.
    pub fn latest(&self) -> Option<Frame> {
        self.current.load().as_ref().map(|entry| entry.frame)
    }

    /// The most recent entry with its sequence number and publish time.
    pub fn entry(&self) -> Option<Arc<SlotEntry>> {
        self.current.load_full()
    }

    /// Number of frames published so far.
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Acquire)
    }

    /// Time since the last publish.
    pub fn age(&self) -> Option<Duration> {
        self.current
            .load()
            .as_ref()
            .map(|entry| entry.published_at.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::frame::CHANNEL_COUNT;
    use std::thread;

    fn frame(t: f64) -> Frame {
        Frame::new(t, [t; CHANNEL_COUNT])
    }

    #[test]
    fn test_empty_slot_reads_none() {
        let slot = LatestSlot::new();
        assert!(slot.latest().is_none());
        assert!(slot.entry().is_none());
        assert!(slot.age().is_none());
        assert_eq!(slot.published_count(), 0);
    }

    #[test]
    fn test_latest_is_last_published() {
        let slot = LatestSlot::new();
        for i in 1..=5 {
            let seq = slot.publish(frame(i as f64));
            assert_eq!(seq, i);
            // Stays put until the next publish
            assert_eq!(slot.latest(), Some(frame(i as f64)));
            assert_eq!(slot.latest(), Some(frame(i as f64)));
        }
        assert_eq!(slot.published_count(), 5);
        assert_eq!(slot.entry().unwrap().seq, 5);
    }

    #[test]
    fn test_concurrent_readers_see_whole_monotonic_frames() {
        let slot = Arc::new(LatestSlot::new());

        let writer = {
            let slot = slot.clone();
            thread::spawn(move || {
                for i in 1..=20_000u32 {
                    slot.publish(frame(f64::from(i)));
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let slot = slot.clone();
                thread::spawn(move || {
                    let mut last_seq = 0;
                    while last_seq < 20_000 {
                        if let Some(entry) = slot.entry() {
                            assert!(entry.seq >= last_seq);
                            // Every channel was written with the same value
                            let t = entry.frame.timestamp;
                            assert!(entry.frame.channels.iter().all(|&c| c == t));
                            assert_eq!(t, entry.seq as f64);
                            last_seq = entry.seq;
                        }
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
    }

    #[test]
    fn test_clear_keeps_sequence_running() {
        let slot = LatestSlot::new();
        slot.publish(frame(1.0));
        slot.publish(frame(2.0));

        slot.clear();
        assert!(slot.latest().is_none());
        assert!(slot.age().is_none());
        assert_eq!(slot.published_count(), 2);

        assert_eq!(slot.publish(frame(3.0)), 3);
    }
}
