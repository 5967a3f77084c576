//! Message-oriented connections to the device bridge.
//!
//! A [`Transport`] moves whole text messages in both directions. It never
//! retries or reconnects; that policy belongs to whoever re-runs setup.
//!
//! `receive()` is the only blocking operation in the crate. `close()` may be
//! called from any thread and makes an in-flight `receive()` return
//! [`TransportError::Closed`] instead of hanging.

pub mod memory;
pub mod simulated;
pub mod websocket;

pub use memory::MemoryTransport;
pub use simulated::{SimulatedBridge, SimulatedBridgeConfig};
pub use websocket::{WsOptions, WsTransport};

use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use thiserror::Error;

/// A bidirectional, message-oriented connection.
pub trait Transport: Send + Sync {
    /// Send one message.
    fn send(&self, message: &str) -> Result<(), TransportError>;

    /// Block until a message arrives or the connection closes.
    fn receive(&self) -> Result<String, TransportError>;

    /// Close the connection. Idempotent.
    fn close(&self);

    /// Whether `close()` has been called on this end.
    ///
    /// A peer that went away shows up as a failing `receive()` instead.
    fn is_closed(&self) -> bool;
}

/// Transport errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("could not connect to {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("receive failed: {0}")]
    Receive(String),

    #[error("connection closed")]
    Closed,
}

/// One-shot close notification usable from `crossbeam_channel::select!`.
///
/// The receiver becomes permanently ready once the sender is dropped, so any
/// number of blocked receivers wake up at once.
pub(crate) struct CloseSignal {
    trigger: Mutex<Option<Sender<()>>>,
    signal: Receiver<()>,
    fired: AtomicBool,
}

impl CloseSignal {
    pub(crate) fn new() -> Self {
        let (trigger, signal) = bounded(0);
        Self {
            trigger: Mutex::new(Some(trigger)),
            signal,
            fired: AtomicBool::new(false),
        }
    }

    /// Fire the signal. Returns `true` only for the first call.
    pub(crate) fn fire(&self) -> bool {
        if self.fired.swap(true, Ordering::SeqCst) {
            return false;
        }
        if let Ok(mut trigger) = self.trigger.lock() {
            trigger.take();
        }
        true
    }

    pub(crate) fn is_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    pub(crate) fn receiver(&self) -> &Receiver<()> {
        &self.signal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_close_signal_fires_once() {
        let signal = CloseSignal::new();
        assert!(!signal.is_fired());
        assert!(signal.fire());
        assert!(!signal.fire());
        assert!(signal.is_fired());
    }

    #[test]
    fn test_close_signal_wakes_waiter() {
        let signal = CloseSignal::new();
        assert!(signal
            .receiver()
            .recv_timeout(Duration::from_millis(10))
            .is_err());
        signal.fire();
        // Disconnected now, so the wait returns immediately with an error
        let started = std::time::Instant::now();
        let _ = signal.receiver().recv_timeout(Duration::from_secs(5));
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
