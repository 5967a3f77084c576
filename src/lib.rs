//! Cortex BCI - real-time EEG acquisition and command classification.
//!
//! This library connects to an Emotiv Cortex-style device bridge, sets up an
//! authenticated EEG subscription, ingests the stream on a background thread
//! and turns the most recent frames into discrete commands for a control
//! loop. It can also record labeled blocks for offline model training.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            Cortex BCI                            │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌───────────┐  setup  ┌──────────┐  session  ┌──────────────┐   │
//! │  │ Transport │◀───────▶│ Protocol │──────────▶│   Stream     │   │
//! │  │ (ws/mem)  │         │  Client  │           │  Ingester    │   │
//! │  └───────────┘         └──────────┘           └──────┬───────┘   │
//! │                                                      │ publish   │
//! │                                                      ▼           │
//! │  ┌───────────┐  poll   ┌──────────────┐       ┌──────────────┐   │
//! │  │ Recorder  │◀────────│  LatestSlot  │──────▶│   Signal     │   │
//! │  │ (+ sink)  │         │ (one frame)  │ poll  │  Processor   │   │
//! │  └───────────┘         └──────────────┘       └──────┬───────┘   │
//! │                                                      ▼           │
//! │                                               ┌──────────────┐   │
//! │                                               │  Classifier  │   │
//! │                                               └──────────────┘   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Setup is synchronous: each handshake step blocks on its response.
//! Streaming runs on its own thread, and consumers only ever read the latest
//! frame, so a slow consumer skips frames instead of queueing them. Temporal
//! windows are filled on the ingestion thread from every frame and read back
//! as a [`WindowSnapshot`].
//!
//! # Example
//!
//! ```no_run
//! use cortex_bci::{
//!     Classifier, Config, Credentials, ProtocolClient, SignalProcessor, StreamIngester,
//!     WsOptions,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load()?;
//! let credentials = Credentials::new("client-id", "client-secret");
//!
//! let mut client =
//!     ProtocolClient::connect(&config.endpoint, &WsOptions::from_config(&config), credentials)?;
//! client.authorize(None)?;
//! client.create_session(None)?;
//! client.subscribe(&config.streams)?;
//! let session = client.into_session()?;
//!
//! let ingester = StreamIngester::with_window(&config.data_stream, &config.filter);
//! ingester.start(session)?;
//!
//! let processor = SignalProcessor::new(config.filter, config.feature_mode)?;
//! let classifier = Classifier::load(&config.model_path);
//! if let Some(window) = ingester.latest_window() {
//!     if let Some(feature) = processor.window_features(&window) {
//!         println!("command: {:?}", classifier.predict(&feature));
//!     }
//! }
//! ingester.stop();
//! # Ok(())
//! # }
//! ```

pub mod classifier;
pub mod config;
pub mod processing;
pub mod protocol;
pub mod recorder;
pub mod stream;
pub mod transport;

// Re-export key types at crate root for convenience
pub use classifier::{Classifier, Command, DecisionRule, Model, ModelError};
pub use config::{Config, ConfigError, Credentials};
pub use processing::{
    Feature, FeatureMode, FilterError, FilterParams, SignalProcessor, WindowSnapshot,
};
pub use protocol::{
    ProtocolClient, ProtocolError, SessionState, SetupOptions, Session, StreamStatus,
    SubscriptionReport,
};
pub use recorder::{CsvSink, Recorder, Recording, RecordingSink, SinkError};
pub use stream::{
    Frame, IngestError, IngestStatus, LabeledFrame, LatestSlot, StopReason, StreamIngester,
    CHANNEL_COUNT, CHANNEL_NAMES,
};
pub use transport::{
    MemoryTransport, SimulatedBridge, SimulatedBridgeConfig, Transport, TransportError, WsOptions,
    WsTransport,
};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
