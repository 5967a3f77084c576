//! Continuous ingestion of stream frames.
//!
//! Once a [`Session`] is subscribed, a [`StreamIngester`] takes it over and
//! runs the receive loop on a dedicated thread. Consumers never touch the
//! connection; they read the [`LatestSlot`] instead.
//!
//! An ingester built with [`StreamIngester::with_window`] also keeps a rolling
//! window of every frame on the ingestion thread and publishes it as a
//! [`WindowSnapshot`], so temporal features never depend on how often a
//! consumer polls.

pub mod frame;
pub mod slot;
pub mod stats;

pub use frame::{decode_stream_message, Frame, FrameError, LabeledFrame, CHANNEL_COUNT, CHANNEL_NAMES};
pub use slot::{LatestSlot, SlotEntry};
pub use stats::{IngestStats, IngestStatsSnapshot};

use crate::processing::{ChannelWindow, FilterParams, WindowSnapshot};
use crate::protocol::Session;
use crate::transport::Transport;
use arc_swap::ArcSwapOption;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Why the receive loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// `stop()` was called.
    Requested,
    /// The connection failed or the bridge went away.
    ReceiveFailure(String),
}

/// Lifecycle of an ingester.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestStatus {
    Idle,
    Running,
    Stopped(StopReason),
}

impl IngestStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, IngestStatus::Running)
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, IngestStatus::Stopped(_))
    }
}

/// Errors that can occur when starting ingestion.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("ingester is already running")]
    AlreadyRunning,

    #[error("failed to spawn ingestion thread: {0}")]
    Spawn(#[from] std::io::Error),
}

struct Worker {
    session: Session,
    handle: JoinHandle<()>,
}

/// Owns the background receive loop for one session at a time.
///
/// All methods take `&self`, so the ingester can be shared with a Ctrl+C
/// handler or a watchdog thread behind an `Arc`.
pub struct StreamIngester {
    data_stream: String,
    slot: Arc<LatestSlot>,
    /// Window length and largest tolerated timestamp step, when windowing
    window_shape: Option<(usize, f64)>,
    windows: Arc<ArcSwapOption<WindowSnapshot>>,
    stats: Arc<IngestStats>,
    status: Arc<Mutex<IngestStatus>>,
    stop_requested: Arc<AtomicBool>,
    worker: Mutex<Option<Worker>>,
    started_at: Mutex<Option<Instant>>,
}

impl StreamIngester {
    /// Create an idle ingester that turns `data_stream` payloads into frames.
    pub fn new(data_stream: impl Into<String>) -> Self {
        Self {
            data_stream: data_stream.into(),
            slot: Arc::new(LatestSlot::new()),
            window_shape: None,
            windows: Arc::new(ArcSwapOption::empty()),
            stats: Arc::new(IngestStats::new()),
            status: Arc::new(Mutex::new(IngestStatus::Idle)),
            stop_requested: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
            started_at: Mutex::new(None),
        }
    }

    /// Like [`new`](Self::new), and also keep a `window_len` frame window per
    /// channel, restarted whenever a frame is missing.
    pub fn with_window(data_stream: impl Into<String>, params: &FilterParams) -> Self {
        let mut ingester = Self::new(data_stream);
        ingester.window_shape = Some((params.window_len, params.max_gap_secs()));
        ingester
    }

    /// Take ownership of `session` and start the receive loop.
    ///
    /// Frames, windows and counters from an earlier session are discarded.
    /// A session rejected with [`IngestError::AlreadyRunning`] is dropped.
    pub fn start(&self, session: Session) -> Result<(), IngestError> {
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if self.status().is_running() {
            return Err(IngestError::AlreadyRunning);
        }

        // A loop that ended on its own still has a finished thread to reap
        if let Some(previous) = worker.take() {
            let _ = previous.handle.join();
        }

        self.slot.clear();
        self.windows.store(None);
        self.stats.reset();
        self.stop_requested.store(false, Ordering::SeqCst);
        set_status(&self.status, IngestStatus::Running);

        let context = LoopContext {
            transport: session.transport().clone(),
            data_stream: self.data_stream.clone(),
            slot: self.slot.clone(),
            window: self
                .window_shape
                .map(|(capacity, max_gap)| ChannelWindow::new(capacity, max_gap)),
            windows: self.windows.clone(),
            stats: self.stats.clone(),
            status: self.status.clone(),
            stop_requested: self.stop_requested.clone(),
        };

        let handle = match thread::Builder::new()
            .name("cortex-ingest".to_string())
            .spawn(move || context.run())
        {
            Ok(handle) => handle,
            Err(e) => {
                set_status(&self.status, IngestStatus::Idle);
                return Err(IngestError::Spawn(e));
            }
        };

        info!(
            session = session.session_id(),
            stream = %self.data_stream,
            "Stream ingestion started"
        );
        *self.started_at.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
        *worker = Some(Worker { session, handle });
        Ok(())
    }

    /// Most recently published frame, without blocking.
    pub fn latest(&self) -> Option<Frame> {
        self.slot.latest()
    }

    /// End the receive loop and close the connection.
    ///
    /// Returns once the ingestion thread has exited. Calling it again, or
    /// before `start`, does nothing.
    pub fn stop(&self) {
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(Worker { session, handle }) = worker else {
            return;
        };

        self.stop_requested.store(true, Ordering::SeqCst);
        session.transport().close();

        if handle.join().is_err() {
            error!("Ingestion thread panicked");
            set_status(
                &self.status,
                IngestStatus::Stopped(StopReason::ReceiveFailure(
                    "ingestion thread panicked".to_string(),
                )),
            );
        }
        session.close();
        info!("Stream ingestion stopped");
    }

    pub fn status(&self) -> IngestStatus {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_running(&self) -> bool {
        self.status().is_running()
    }

    /// Most recent full window, if this ingester keeps one.
    pub fn latest_window(&self) -> Option<Arc<WindowSnapshot>> {
        self.windows.load_full()
    }

    /// The shared slot, for consumers such as the recorder.
    pub fn slot(&self) -> Arc<LatestSlot> {
        self.slot.clone()
    }

    pub fn stats(&self) -> &IngestStats {
        &self.stats
    }

    /// Time since the last frame was published.
    pub fn frame_age(&self) -> Option<Duration> {
        self.slot.age()
    }

    /// Whether no frame has arrived within `timeout`.
    ///
    /// Before the first frame, the time since `start` is used instead. An
    /// ingester that was never started is not considered stalled.
    pub fn is_stalled(&self, timeout: Duration) -> bool {
        match self.slot.age() {
            Some(age) => age >= timeout,
            None => self
                .started_at
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .is_some_and(|started| started.elapsed() >= timeout),
        }
    }
}

impl Drop for StreamIngester {
    fn drop(&mut self) {
        self.stop();
    }
}

fn set_status(status: &Mutex<IngestStatus>, value: IngestStatus) {
    *status.lock().unwrap_or_else(PoisonError::into_inner) = value;
}

/// Everything the ingestion thread needs, moved onto it at start.
struct LoopContext {
    transport: Arc<dyn Transport>,
    data_stream: String,
    slot: Arc<LatestSlot>,
    window: Option<ChannelWindow>,
    windows: Arc<ArcSwapOption<WindowSnapshot>>,
    stats: Arc<IngestStats>,
    status: Arc<Mutex<IngestStatus>>,
    stop_requested: Arc<AtomicBool>,
}

impl LoopContext {
    fn run(mut self) {
        let reason = loop {
            let raw = match self.transport.receive() {
                Ok(raw) => raw,
                Err(e) => {
                    if self.stop_requested.load(Ordering::SeqCst) {
                        break StopReason::Requested;
                    }
                    error!(error = %e, "Stream receive failed, ingestion stopped");
                    break StopReason::ReceiveFailure(e.to_string());
                }
            };

            self.stats.record_message();
            match decode_stream_message(&raw, &self.data_stream) {
                Ok(Some(frame)) => {
                    let seq = self.slot.publish(frame);
                    self.stats.record_frame();
                    debug!(seq, timestamp = frame.timestamp, "Published frame");
                    self.update_window(&frame, seq);
                }
                Ok(None) => {
                    self.stats.record_ignored();
                    debug!(message = %raw, "Ignoring non-stream message");
                }
                Err(e) => {
                    self.stats.record_malformed();
                    warn!(error = %e, "Skipping malformed stream payload");
                }
            }
        };

        set_status(&self.status, IngestStatus::Stopped(reason));
    }

    fn update_window(&mut self, frame: &Frame, seq: u64) {
        let Some(window) = self.window.as_mut() else {
            return;
        };
        if window.push(frame) {
            debug!(timestamp = frame.timestamp, "Frame gap, window restarted");
        }
        if let Some(snapshot) = window.snapshot(seq) {
            self.windows.store(Some(Arc::new(snapshot)));
        }
    }
}
