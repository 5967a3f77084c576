//! Frame types and stream payload decoding.
//!
//! Stream messages carry no envelope, only a payload keyed by stream name:
//!
//! ```text
//! {"eeg": [timestamp, marker, AF3, F7, ..., AF4, ...], "sid": "...", "time": ...}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Number of EEG channels in a frame.
pub const CHANNEL_COUNT: usize = 14;

/// Channel names, in payload order.
pub const CHANNEL_NAMES: [&str; CHANNEL_COUNT] = [
    "AF3", "F7", "F3", "FC5", "T7", "P7", "O1", "O2", "P8", "T8", "FC6", "F4", "F8", "AF4",
];

/// Index of the first channel value in a stream payload.
const FIRST_CHANNEL: usize = 2;

/// One timestamped multi-channel sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Device clock, seconds
    pub timestamp: f64,
    /// Event marker, 0 when absent
    pub marker: i64,
    /// One value per entry of [`CHANNEL_NAMES`]
    pub channels: [f64; CHANNEL_COUNT],
}

impl Frame {
    pub fn new(timestamp: f64, channels: [f64; CHANNEL_COUNT]) -> Self {
        Self {
            timestamp,
            marker: 0,
            channels,
        }
    }

    /// Decode `[timestamp, marker, ch1..ch14, ...]`. Extra trailing columns are ignored.
    pub fn from_payload(payload: &Value) -> Result<Self, FrameError> {
        let values = payload.as_array().ok_or(FrameError::NotAnArray)?;
        if values.len() < FIRST_CHANNEL + CHANNEL_COUNT {
            return Err(FrameError::TooShort { len: values.len() });
        }

        let timestamp = values[0]
            .as_f64()
            .ok_or(FrameError::NotNumeric { index: 0 })?;

        let marker = match &values[1] {
            Value::Null => 0,
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)).unwrap_or(0),
            _ => 0,
        };

        let mut channels = [0.0; CHANNEL_COUNT];
        for (i, slot) in channels.iter_mut().enumerate() {
            let index = FIRST_CHANNEL + i;
            *slot = values[index]
                .as_f64()
                .ok_or(FrameError::NotNumeric { index })?;
        }

        Ok(Self {
            timestamp,
            marker,
            channels,
        })
    }

    /// Value of a channel by name.
    pub fn channel(&self, name: &str) -> Option<f64> {
        CHANNEL_NAMES
            .iter()
            .position(|n| *n == name)
            .map(|i| self.channels[i])
    }
}

/// A frame tagged with the task label active while it was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LabeledFrame {
    pub frame: Frame,
    pub label: i64,
}

/// Why a stream payload could not become a frame.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FrameError {
    #[error("message is not valid JSON: {0}")]
    Json(String),

    #[error("stream payload is not an array")]
    NotAnArray,

    #[error("stream payload has {len} entries, need at least 16")]
    TooShort { len: usize },

    #[error("stream payload entry {index} is not a number")]
    NotNumeric { index: usize },
}

/// Extract a frame for `stream` from a raw inbound message.
///
/// Returns `Ok(None)` for messages that do not carry that stream, such as
/// late handshake responses or bridge warnings.
pub fn decode_stream_message(raw: &str, stream: &str) -> Result<Option<Frame>, FrameError> {
    let message: Value = serde_json::from_str(raw).map_err(|e| FrameError::Json(e.to_string()))?;
    match message.get(stream) {
        Some(payload) => Frame::from_payload(payload).map(Some),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(timestamp: f64, marker: Value) -> Value {
        let mut values = vec![json!(timestamp), marker];
        values.extend((0..CHANNEL_COUNT).map(|i| json!(4000.0 + i as f64)));
        Value::Array(values)
    }

    #[test]
    fn test_decode_eeg_message() {
        let raw = json!({"eeg": payload(1.5, json!(3)), "sid": "abc", "time": 1.5}).to_string();
        let frame = decode_stream_message(&raw, "eeg").unwrap().unwrap();
        assert_eq!(frame.timestamp, 1.5);
        assert_eq!(frame.marker, 3);
        assert_eq!(frame.channels[0], 4000.0);
        assert_eq!(frame.channel("AF4"), Some(4013.0));
        assert_eq!(frame.channel("Cz"), None);
    }

    #[test]
    fn test_absent_marker_reads_as_zero() {
        let frame = Frame::from_payload(&payload(2.0, Value::Null)).unwrap();
        assert_eq!(frame.marker, 0);
    }

    #[test]
    fn test_trailing_columns_are_ignored() {
        let mut value = payload(2.0, json!(0));
        if let Value::Array(values) = &mut value {
            values.push(json!(1.0));
            values.push(json!([]));
        }
        assert!(Frame::from_payload(&value).is_ok());
    }

    #[test]
    fn test_other_shapes_are_not_frames() {
        let response = json!({"id": 4, "jsonrpc": "2.0", "result": {}}).to_string();
        assert_eq!(decode_stream_message(&response, "eeg"), Ok(None));

        let other_stream = json!({"mot": [1.0, 2.0]}).to_string();
        assert_eq!(decode_stream_message(&other_stream, "eeg"), Ok(None));
    }

    #[test]
    fn test_malformed_payloads() {
        let short = json!({"eeg": [1.0, 0, 2.0]}).to_string();
        assert_eq!(
            decode_stream_message(&short, "eeg"),
            Err(FrameError::TooShort { len: 3 })
        );

        let mut value = payload(1.0, json!(0));
        value[5] = json!("railed");
        assert_eq!(
            Frame::from_payload(&value),
            Err(FrameError::NotNumeric { index: 5 })
        );

        assert!(matches!(
            decode_stream_message("not json", "eeg"),
            Err(FrameError::Json(_))
        ));
    }
}
