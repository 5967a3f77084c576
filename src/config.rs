//! Configuration for the Cortex BCI pipeline.

use crate::processing::{FeatureMode, FilterParams};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main configuration for acquisition, processing and recording.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Device bridge endpoint (`ws://` or `wss://`)
    pub endpoint: String,

    /// Accept the bridge's self-signed localhost certificate
    pub accept_invalid_certs: bool,

    /// Upper bound on opening the connection
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// Headset to bind the session to; discovered when absent
    pub headset: Option<String>,

    /// Streams requested at subscribe time
    pub streams: Vec<String>,

    /// Stream whose payloads become frames
    pub data_stream: String,

    /// Send `requestAccess` before `authorize`
    pub request_access: bool,

    /// Band-pass filter parameters
    pub filter: FilterParams,

    /// How features are derived from frames
    pub feature_mode: FeatureMode,

    /// Path of the model artifact
    pub model_path: PathBuf,

    /// Directory recordings are written to
    pub recording_path: PathBuf,

    /// Recorder polling interval
    #[serde(with = "duration_millis")]
    pub poll_interval: Duration,

    /// No frame for this long means the stream is stalled
    #[serde(with = "duration_millis")]
    pub stall_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cortex-bci");

        Self {
            endpoint: "wss://localhost:6868".to_string(),
            accept_invalid_certs: true,
            connect_timeout: Duration::from_secs(10),
            headset: None,
            streams: vec!["eeg".to_string()],
            data_stream: "eeg".to_string(),
            request_access: true,
            filter: FilterParams::default(),
            feature_mode: FeatureMode::default(),
            model_path: data_dir.join("model.json"),
            recording_path: data_dir.join("recordings"),
            poll_interval: Duration::from_millis(10),
            stall_timeout: Duration::from_secs(2),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from a specific file, falling back to defaults when absent.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Save configuration to a specific file.
    pub fn save_to(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cortex-bci")
            .join("config.json")
    }

    /// Ensure the recording directory exists.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.recording_path)?;
        Ok(())
    }
}

/// Client credential pair issued by the device vendor.
///
/// Supplied by the operator at runtime. It is deliberately not part of
/// [`Config`] and has no serde impls, so it never reaches disk.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
}

impl Credentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Serde support for Duration as whole seconds.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Serde support for Duration as milliseconds.
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
