//! Rolling per-channel sample window.
//!
//! Frames are appended one at a time; once the window holds `capacity`
//! frames the oldest is dropped on every push. A step in the device clock
//! larger than `max_gap` (or a clock that runs backwards) starts a new
//! window. The filter assumes evenly spaced samples, so a window must never
//! span a dropped or skipped frame.

use crate::stream::{Frame, CHANNEL_COUNT};
use std::collections::VecDeque;

/// Fixed-length history of recent samples for every channel.
#[derive(Debug, Clone)]
pub struct ChannelWindow {
    /// Number of frames kept
    capacity: usize,
    /// Largest tolerated timestamp step, seconds
    max_gap: f64,
    /// One queue per channel, oldest first
    channels: Vec<VecDeque<f64>>,
    /// Timestamp of the last frame pushed
    last_timestamp: Option<f64>,
}

impl ChannelWindow {
    pub fn new(capacity: usize, max_gap: f64) -> Self {
        Self {
            capacity,
            max_gap,
            channels: (0..CHANNEL_COUNT)
                .map(|_| VecDeque::with_capacity(capacity))
                .collect(),
            last_timestamp: None,
        }
    }

    /// Append a frame, evicting the oldest when full.
    ///
    /// Returns `true` if the push started a new window.
    pub fn push(&mut self, frame: &Frame) -> bool {
        let restarted = match self.last_timestamp {
            Some(last) => {
                let step = frame.timestamp - last;
                step < 0.0 || step > self.max_gap
            }
            None => false,
        };
        if restarted {
            self.clear();
        }

        for (queue, &value) in self.channels.iter_mut().zip(frame.channels.iter()) {
            if queue.len() == self.capacity {
                queue.pop_front();
            }
            queue.push_back(value);
        }
        self.last_timestamp = Some(frame.timestamp);
        restarted
    }

    /// Number of frames currently held.
    pub fn len(&self) -> usize {
        self.channels.first().map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.capacity > 0 && self.len() == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples of one channel, oldest first.
    pub fn samples(&self, channel: usize) -> Vec<f64> {
        self.channels
            .get(channel)
            .map(|queue| queue.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Immutable copy of a full window, tagged with the publish sequence
    /// number of its newest frame. `None` until the window is full.
    pub fn snapshot(&self, seq: u64) -> Option<WindowSnapshot> {
        if !self.is_full() {
            return None;
        }
        Some(WindowSnapshot {
            seq,
            timestamp: self.last_timestamp.unwrap_or_default(),
            channels: self
                .channels
                .iter()
                .map(|queue| queue.iter().copied().collect())
                .collect(),
        })
    }

    pub fn clear(&mut self) {
        for queue in &mut self.channels {
            queue.clear();
        }
        self.last_timestamp = None;
    }
}

/// A full window of consecutive frames, as handed to consumers.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowSnapshot {
    /// Sequence number of the newest frame
    pub seq: u64,
    /// Timestamp of the newest frame
    pub timestamp: f64,
    channels: Vec<Vec<f64>>,
}

impl WindowSnapshot {
    /// Samples of one channel, oldest first. Empty for an unknown channel.
    pub fn channel(&self, channel: usize) -> &[f64] {
        self.channels
            .get(channel)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Frames per channel.
    pub fn len(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
