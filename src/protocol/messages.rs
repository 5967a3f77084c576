//! JSON-RPC envelope and Cortex payload types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol version tag carried by every request.
pub const JSONRPC_VERSION: &str = "2.0";

/// Method names used during setup.
pub mod method {
    pub const REQUEST_ACCESS: &str = "requestAccess";
    pub const AUTHORIZE: &str = "authorize";
    pub const QUERY_HEADSETS: &str = "queryHeadsets";
    pub const CREATE_SESSION: &str = "createSession";
    pub const SUBSCRIBE: &str = "subscribe";
}

/// Outbound request envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    pub params: Value,
}

impl Request {
    pub fn new(id: u64, method: &str, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }
}

/// Error object embedded in a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

/// Inbound message as seen during setup.
///
/// Responses carry an `id`; bridge warnings and stream payloads do not.
#[derive(Debug, Clone, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcError>,
}

impl Response {
    /// Numeric correlation id, if present and numeric.
    pub fn numeric_id(&self) -> Option<u64> {
        self.id.as_ref().and_then(Value::as_u64)
    }
}

/// Result of `requestAccess`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessResult {
    pub access_granted: bool,
    #[serde(default)]
    pub message: String,
}

/// Result of `authorize`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeResult {
    pub cortex_token: String,
}

/// A device descriptor returned by `queryHeadsets`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeadsetInfo {
    pub id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub connected_by: Option<String>,
}

/// Result of `createSession`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateSessionResult {
    pub id: String,
}

/// Result of `subscribe`: per-stream successes and failures.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscribeResult {
    #[serde(default)]
    pub success: Vec<StreamSuccess>,
    #[serde(default)]
    pub failure: Vec<StreamFailure>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSuccess {
    pub stream_name: String,
    #[serde(default)]
    pub cols: Vec<Value>,
    #[serde(default)]
    pub sid: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamFailure {
    pub stream_name: String,
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
}
