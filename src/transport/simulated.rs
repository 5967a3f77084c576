//! In-process stand-in for the device bridge.
//!
//! Serves the bridge side of a [`MemoryTransport`] pair: it answers the setup
//! handshake like the real service would, then pushes synthetic EEG at a
//! fixed rate until the client goes away. Used for `--simulate` and tests.

use super::{MemoryTransport, Transport, TransportError};
use crate::protocol::messages::{method, JSONRPC_VERSION};
use crate::stream::{CHANNEL_COUNT, CHANNEL_NAMES};
use serde_json::{json, Value};
use std::f64::consts::PI;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Endpoint name reported for the simulated bridge.
pub const SIMULATED_ENDPOINT: &str = "simulated://bridge";

/// Streams the simulated bridge knows about.
const KNOWN_STREAMS: [&str; 8] = ["eeg", "mot", "dev", "eq", "pow", "met", "com", "fac"];

/// Electrode offset, microvolts.
const BASELINE_UV: f64 = 4200.0;

const ERR_METHOD_NOT_FOUND: i64 = -32601;
const ERR_INVALID_CREDENTIALS: i64 = -32021;
const ERR_INVALID_TOKEN: i64 = -32014;
const ERR_HEADSET_UNAVAILABLE: i64 = -32004;
const ERR_INVALID_SESSION: i64 = -32005;
const ERR_STREAM_UNAVAILABLE: i64 = -32016;

/// Behaviour of a simulated bridge.
#[derive(Debug, Clone)]
pub struct SimulatedBridgeConfig {
    /// Headset ids returned by discovery
    pub headsets: Vec<String>,
    /// Answer to `requestAccess`
    pub grant_access: bool,
    /// Streams refused at subscribe time
    pub rejected_streams: Vec<String>,
    /// Frames per second
    pub sample_rate_hz: f64,
    /// Frequency of the dominant rhythm in the synthetic signal
    pub rhythm_hz: f64,
    /// Close the connection after this many frames
    pub max_frames: Option<u64>,
}

impl Default for SimulatedBridgeConfig {
    fn default() -> Self {
        Self {
            headsets: vec!["EPOCX-SIM00001".to_string()],
            grant_access: true,
            rejected_streams: Vec::new(),
            sample_rate_hz: 128.0,
            rhythm_hz: 10.0,
            max_frames: None,
        }
    }
}

/// Handle to a running simulated bridge.
///
/// Dropping it closes the bridge end and waits for its thread.
pub struct SimulatedBridge {
    end: Arc<MemoryTransport>,
    handle: Option<JoinHandle<()>>,
    frames_sent: Arc<AtomicU64>,
}

impl SimulatedBridge {
    /// Start a bridge thread. Returns the handle and the client's end.
    pub fn spawn(
        config: SimulatedBridgeConfig,
    ) -> Result<(Self, MemoryTransport), TransportError> {
        if !(config.sample_rate_hz.is_finite() && config.sample_rate_hz > 0.0) {
            return Err(TransportError::Connect {
                endpoint: SIMULATED_ENDPOINT.to_string(),
                reason: format!("invalid sample rate {}", config.sample_rate_hz),
            });
        }

        let (client, bridge) = MemoryTransport::pair();
        let end = Arc::new(bridge);
        let frames_sent = Arc::new(AtomicU64::new(0));

        let server = Server {
            config,
            transport: end.clone(),
            frames_sent: frames_sent.clone(),
            token: format!("sim-{}", Uuid::new_v4().simple()),
            session_id: None,
        };

        let handle = thread::Builder::new()
            .name("cortex-sim".to_string())
            .spawn(move || server.run())
            .map_err(|e| TransportError::Connect {
                endpoint: SIMULATED_ENDPOINT.to_string(),
                reason: e.to_string(),
            })?;

        info!("Simulated bridge started");
        Ok((
            Self {
                end,
                handle: Some(handle),
                frames_sent,
            },
            client,
        ))
    }

    /// Stream frames sent so far.
    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    /// Close the bridge end and wait for the thread to exit.
    pub fn shutdown(&mut self) {
        self.end.close();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Simulated bridge thread panicked");
            }
        }
    }
}

impl Drop for SimulatedBridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}

type Reply = Result<Value, (i64, String)>;

struct Server {
    config: SimulatedBridgeConfig,
    transport: Arc<MemoryTransport>,
    frames_sent: Arc<AtomicU64>,
    token: String,
    session_id: Option<String>,
}

impl Server {
    fn run(mut self) {
        let Some(sid) = self.serve_handshake() else {
            return;
        };
        self.stream(&sid);
    }

    /// Answer requests until `eeg` is subscribed. Returns its subscription id.
    fn serve_handshake(&mut self) -> Option<String> {
        loop {
            let raw = self.transport.receive().ok()?;
            let request: Value = match serde_json::from_str(&raw) {
                Ok(request) => request,
                Err(e) => {
                    warn!(error = %e, "Simulated bridge got unparseable request");
                    continue;
                }
            };

            let id = request.get("id").cloned().unwrap_or(Value::Null);
            let name = request
                .get("method")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let params = request.get("params").cloned().unwrap_or_else(|| json!({}));
            debug!(method = %name, "Simulated bridge request");

            let mut eeg_sid = None;
            let reply = match name.as_str() {
                method::REQUEST_ACCESS => Ok(self.access()),
                method::AUTHORIZE => self.authorize(&params),
                method::QUERY_HEADSETS => Ok(self.headsets()),
                method::CREATE_SESSION => self.create_session(&params),
                method::SUBSCRIBE => self.subscribe(&params).map(|(result, sid)| {
                    eeg_sid = sid;
                    result
                }),
                other => Err((ERR_METHOD_NOT_FOUND, format!("Method {other} not found"))),
            };

            let message = match reply {
                Ok(result) => json!({"jsonrpc": JSONRPC_VERSION, "id": id, "result": result}),
                Err((code, message)) => json!({
                    "jsonrpc": JSONRPC_VERSION,
                    "id": id,
                    "error": {"code": code, "message": message},
                }),
            };
            self.transport.send(&message.to_string()).ok()?;

            if eeg_sid.is_some() {
                return eeg_sid;
            }
        }
    }

    fn access(&self) -> Value {
        let message = if self.config.grant_access {
            "The user has granted access right to this application."
        } else {
            "The user has not granted access right to this application."
        };
        json!({"accessGranted": self.config.grant_access, "message": message})
    }

    fn authorize(&self, params: &Value) -> Reply {
        let client_id = params.get("clientId").and_then(Value::as_str).unwrap_or_default();
        if client_id.is_empty() {
            return Err((ERR_INVALID_CREDENTIALS, "Invalid client credentials".to_string()));
        }
        Ok(json!({"cortexToken": self.token, "warning": {"code": 6, "message": "simulated"}}))
    }

    fn headsets(&self) -> Value {
        Value::Array(
            self.config
                .headsets
                .iter()
                .map(|id| json!({"id": id, "status": "connected", "connectedBy": "dongle"}))
                .collect(),
        )
    }

    fn check_token(&self, params: &Value) -> Result<(), (i64, String)> {
        match params.get("cortexToken").and_then(Value::as_str) {
            Some(token) if token == self.token => Ok(()),
            _ => Err((ERR_INVALID_TOKEN, "Invalid cortex token".to_string())),
        }
    }

    fn create_session(&mut self, params: &Value) -> Reply {
        self.check_token(params)?;
        let headset = params.get("headset").and_then(Value::as_str).unwrap_or_default();
        if !self.config.headsets.iter().any(|h| h == headset) {
            return Err((ERR_HEADSET_UNAVAILABLE, format!("Headset {headset} is unavailable")));
        }

        // The real service pushes id-less notices while a session comes up
        let notice = json!({"warning": {"code": 104, "message": {"headsetId": headset}}});
        let _ = self.transport.send(&notice.to_string());

        let session_id = Uuid::new_v4().to_string();
        self.session_id = Some(session_id.clone());
        Ok(json!({"id": session_id, "status": "activated", "headset": {"id": headset}}))
    }

    /// Reply to `subscribe`, plus the `eeg` subscription id if it went live.
    fn subscribe(&self, params: &Value) -> Result<(Value, Option<String>), (i64, String)> {
        self.check_token(params)?;
        let session = params.get("session").and_then(Value::as_str);
        if session.is_none() || session != self.session_id.as_deref() {
            return Err((ERR_INVALID_SESSION, "Session does not exist".to_string()));
        }

        let requested: Vec<&str> = params
            .get("streams")
            .and_then(Value::as_array)
            .map(|streams| streams.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let mut success = Vec::new();
        let mut failure = Vec::new();
        let mut eeg_sid = None;
        for stream in requested {
            let refused = self.config.rejected_streams.iter().any(|s| s == stream);
            if refused || !KNOWN_STREAMS.contains(&stream) {
                failure.push(json!({
                    "streamName": stream,
                    "code": ERR_STREAM_UNAVAILABLE,
                    "message": format!("Stream {stream} is unavailable"),
                }));
                continue;
            }

            let sid = Uuid::new_v4().to_string();
            let cols: Vec<Value> = if stream == "eeg" {
                eeg_sid = Some(sid.clone());
                ["TIMESTAMP", "MARKER"]
                    .into_iter()
                    .chain(CHANNEL_NAMES)
                    .chain(["RAW_CQ", "MARKERS"])
                    .map(Value::from)
                    .collect()
            } else {
                Vec::new()
            };
            success.push(json!({"streamName": stream, "cols": cols, "sid": sid}));
        }

        Ok((json!({"success": success, "failure": failure}), eeg_sid))
    }

    fn stream(&self, sid: &str) {
        let period = Duration::from_secs_f64(1.0 / self.config.sample_rate_hz);
        let origin = chrono::Utc::now().timestamp_millis() as f64 / 1000.0;
        let mut next = Instant::now();
        let mut index: u64 = 0;
        info!(rate_hz = self.config.sample_rate_hz, "Simulated bridge streaming");

        loop {
            if self.config.max_frames.is_some_and(|max| index >= max) {
                debug!(frames = index, "Simulated bridge reached frame limit");
                self.transport.close();
                return;
            }

            let t = index as f64 / self.config.sample_rate_hz;
            let message = json!({
                "eeg": self.sample(origin + t, t),
                "sid": sid,
                "time": origin + t,
            });
            if self.transport.send(&message.to_string()).is_err() {
                return;
            }
            self.frames_sent.fetch_add(1, Ordering::Relaxed);
            index += 1;

            next += period;
            if !self.pause_until(next) {
                debug!(frames = index, "Simulated bridge client went away");
                return;
            }
        }
    }

    /// One `[timestamp, marker, AF3..AF4, RAW_CQ, MARKERS]` payload.
    fn sample(&self, timestamp: f64, t: f64) -> Value {
        let mut values = Vec::with_capacity(CHANNEL_COUNT + 4);
        values.push(json!(timestamp));
        values.push(json!(0));
        for channel in 0..CHANNEL_COUNT {
            let phase = channel as f64 * 0.4;
            let rhythm = 12.0 * (2.0 * PI * self.config.rhythm_hz * t + phase).sin();
            let drift = 3.0 * (2.0 * PI * 0.3 * t + phase).sin();
            let fast = 2.0 * (2.0 * PI * 23.0 * t * (1.0 + channel as f64 * 0.01)).sin();
            values.push(json!(BASELINE_UV + rhythm + drift + fast));
        }
        values.push(json!(0));
        values.push(json!([]));
        Value::Array(values)
    }

    /// Sleep until `deadline`, draining anything the client sends meanwhile.
    /// Returns `false` once the client has closed.
    fn pause_until(&self, deadline: Instant) -> bool {
        loop {
            let wait = deadline.saturating_duration_since(Instant::now());
            match self.transport.receive_timeout(wait) {
                Ok(None) => return true,
                Ok(Some(raw)) => debug!(message = %raw, "Simulated bridge ignoring request"),
                Err(_) => return false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Credentials;
    use crate::protocol::{ProtocolClient, ProtocolError, SetupOptions};
    use crate::stream::decode_stream_message;

    fn setup(streams: &[&str]) -> SetupOptions {
        SetupOptions {
            streams: streams.iter().map(|s| s.to_string()).collect(),
            ..SetupOptions::default()
        }
    }

    #[test]
    fn test_handshake_then_stream() {
        let (_bridge, client) = SimulatedBridge::spawn(SimulatedBridgeConfig::default()).unwrap();
        let session = ProtocolClient::establish(
            Arc::new(client),
            Credentials::new("sim-client", "sim-secret"),
            &setup(&["eeg"]),
        )
        .unwrap();

        assert_eq!(session.headset_id(), "EPOCX-SIM00001");
        assert!(session.token().starts_with("sim-"));
        assert!(session.subscriptions().is_active("eeg"));

        let mut frames = Vec::new();
        while frames.len() < 3 {
            let raw = session.transport().receive().unwrap();
            if let Some(frame) = decode_stream_message(&raw, "eeg").unwrap() {
                frames.push(frame);
            }
        }
        assert!(frames[0].timestamp < frames[1].timestamp);
        assert!(frames[0].channels.iter().all(|v| (v - BASELINE_UV).abs() < 20.0));
        session.close();
    }

    #[test]
    fn test_no_headsets_means_no_device() {
        let config = SimulatedBridgeConfig {
            headsets: Vec::new(),
            ..SimulatedBridgeConfig::default()
        };
        let (_bridge, client) = SimulatedBridge::spawn(config).unwrap();
        let result = ProtocolClient::establish(
            Arc::new(client),
            Credentials::new("sim-client", "sim-secret"),
            &setup(&["eeg"]),
        );
        assert!(matches!(result, Err(ProtocolError::NoDeviceFound)));
    }

    #[test]
    fn test_empty_client_id_is_rejected() {
        let (_bridge, client) = SimulatedBridge::spawn(SimulatedBridgeConfig::default()).unwrap();
        let result = ProtocolClient::establish(
            Arc::new(client),
            Credentials::new("", ""),
            &setup(&["eeg"]),
        );
        assert!(matches!(
            result,
            Err(ProtocolError::Rpc { code: ERR_INVALID_CREDENTIALS, .. })
        ));
    }

    #[test]
    fn test_frame_limit_closes_connection() {
        let config = SimulatedBridgeConfig {
            max_frames: Some(5),
            sample_rate_hz: 500.0,
            ..SimulatedBridgeConfig::default()
        };
        let (bridge, client) = SimulatedBridge::spawn(config).unwrap();
        let session = ProtocolClient::establish(
            Arc::new(client),
            Credentials::new("sim-client", "sim-secret"),
            &setup(&["eeg"]),
        )
        .unwrap();

        let mut received = 0;
        while let Ok(raw) = session.transport().receive() {
            if raw.contains("\"eeg\"") {
                received += 1;
            }
        }
        assert_eq!(received, 5);
        assert_eq!(bridge.frames_sent(), 5);
    }

    #[test]
    fn test_invalid_rate_is_rejected() {
        let config = SimulatedBridgeConfig {
            sample_rate_hz: 0.0,
            ..SimulatedBridgeConfig::default()
        };
        assert!(SimulatedBridge::spawn(config).is_err());
    }
}
