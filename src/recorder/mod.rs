//! Time-boxed collection of labeled frames.
//!
//! The recorder polls the latest-frame slot at a fixed interval and keeps
//! every frame it has not seen before. It owns its history; the slot itself
//! never accumulates anything. Frames published faster than the poll
//! interval are skipped and counted.

pub mod sink;

pub use sink::{CsvSink, RecordingSink, SinkError};

use crate::stream::{LabeledFrame, LatestSlot};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use uuid::Uuid;

/// One labeled recording block.
#[derive(Debug, Clone, Serialize)]
pub struct Recording {
    pub id: Uuid,
    pub label: i64,
    pub started_at: DateTime<Utc>,
    pub frames: Vec<LabeledFrame>,
    /// Frames published while the recorder was not looking
    pub missed_frames: u64,
}

/// Pulls labeled frames out of a [`LatestSlot`].
pub struct Recorder {
    slot: Arc<LatestSlot>,
    poll_interval: Duration,
}

impl Recorder {
    pub fn new(slot: Arc<LatestSlot>, poll_interval: Duration) -> Self {
        Self {
            slot,
            poll_interval,
        }
    }

    /// Collect frames published during the next `duration`, tagged `label`.
    ///
    /// A quiet stream yields fewer frames; it never blocks past `duration`.
    pub fn collect(&self, duration: Duration, label: i64) -> Vec<LabeledFrame> {
        let running = AtomicBool::new(true);
        self.collect_until(duration, label, &running)
    }

    /// Like [`collect`](Self::collect), but returns early once `running` is
    /// cleared.
    pub fn collect_until(
        &self,
        duration: Duration,
        label: i64,
        running: &AtomicBool,
    ) -> Vec<LabeledFrame> {
        self.record(duration, label, running).frames
    }

    /// Collect a full [`Recording`] with its id and start time.
    pub fn record(&self, duration: Duration, label: i64, running: &AtomicBool) -> Recording {
        let id = Uuid::new_v4();
        let started_at = Utc::now();
        let started = Instant::now();
        info!(%id, label, duration_secs = duration.as_secs_f64(), "Recording started");

        // Frames already in the slot belong to before this block
        let mut last_seq = self.slot.entry().map_or(0, |entry| entry.seq);
        let mut frames = Vec::new();
        let mut missed_frames = 0;

        loop {
            if let Some(entry) = self.slot.entry() {
                if entry.seq > last_seq {
                    missed_frames += entry.seq - last_seq - 1;
                    last_seq = entry.seq;
                    frames.push(LabeledFrame {
                        frame: entry.frame,
                        label,
                    });
                }
            }

            let elapsed = started.elapsed();
            if elapsed >= duration || !running.load(Ordering::SeqCst) {
                break;
            }
            thread::sleep(self.poll_interval.min(duration - elapsed));
        }

        if missed_frames > 0 {
            debug!(missed_frames, "Recorder polled slower than the stream");
        }
        info!(%id, frames = frames.len(), "Recording finished");

        Recording {
            id,
            label,
            started_at,
            frames,
            missed_frames,
        }
    }
}
