//! Setup handshake with the device bridge.
//!
//! [`ProtocolClient`] drives authorize, create-session and subscribe as a
//! synchronous request/response state machine. Each step sends one request
//! with a fresh correlation id and blocks until the matching response
//! arrives. Once subscribed it yields a [`Session`]; it never reads stream
//! data itself.
//!
//! ```text
//! Disconnected → Connecting → Authorizing → Authorized → CreatingSession
//!     → SessionActive → Subscribing → Subscribed
//!                 (any step) → Failed(reason)
//! ```

pub mod messages;
pub mod session;

pub use messages::HeadsetInfo;
pub use session::{Session, StreamStatus, StreamSubscription, SubscriptionReport};

use crate::config::{Config, Credentials};
use crate::transport::{Transport, TransportError, WsOptions, WsTransport};
use messages::{
    method, AccessResult, AuthorizeResult, CreateSessionResult, Request, Response,
    SubscribeResult,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Handshake progress of one client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// No connection yet.
    Disconnected,
    /// Connection open, nothing exchanged yet.
    Connecting,
    /// Exchanging credentials for a token.
    Authorizing,
    /// Token obtained.
    Authorized,
    /// Waiting for the bridge to open a session.
    CreatingSession,
    /// Session open, no streams yet.
    SessionActive,
    /// Waiting for the subscribe response.
    Subscribing,
    /// At least one stream is live.
    Subscribed,
    /// A step failed; the client is unusable.
    Failed(String),
}

/// Setup failures. All of them are fatal to the handshake.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("transport failure during {method}: {source}")]
    Transport {
        method: String,
        #[source]
        source: TransportError,
    },

    #[error("{method} failed with code {code}: {message}")]
    Rpc {
        method: String,
        code: i64,
        message: String,
    },

    #[error("{method}: expected response id {expected}, got {got}")]
    UnexpectedId {
        method: String,
        expected: u64,
        got: String,
    },

    #[error("{method}: malformed response: {message}")]
    Malformed { method: String, message: String },

    #[error("no headset found")]
    NoDeviceFound,

    #[error("none of the requested streams could be subscribed")]
    NothingSubscribed(SubscriptionReport),

    #[error("cannot {method} in state {state:?}")]
    InvalidState { method: String, state: SessionState },
}

impl ProtocolError {
    /// Whether the bridge could not be reached at all.
    pub fn is_connect_error(&self) -> bool {
        matches!(
            self,
            ProtocolError::Transport {
                source: TransportError::Connect { .. },
                ..
            }
        )
    }
}

/// What to do during [`ProtocolClient::establish`].
#[derive(Debug, Clone)]
pub struct SetupOptions {
    /// Send `requestAccess` before `authorize`
    pub request_access: bool,
    /// Licence debit requested at authorize time
    pub debit: Option<u32>,
    /// Headset to bind; discovered when absent
    pub headset: Option<String>,
    /// Streams to subscribe
    pub streams: Vec<String>,
}

impl Default for SetupOptions {
    fn default() -> Self {
        Self {
            request_access: true,
            debit: None,
            headset: None,
            streams: vec!["eeg".to_string()],
        }
    }
}

impl SetupOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            request_access: config.request_access,
            debit: None,
            headset: config.headset.clone(),
            streams: config.streams.clone(),
        }
    }
}

/// Request/response client for one session's setup.
pub struct ProtocolClient {
    transport: Arc<dyn Transport>,
    credentials: Credentials,
    state: SessionState,
    next_id: u64,
    token: Option<String>,
    headset_id: Option<String>,
    session_id: Option<String>,
    subscriptions: Option<SubscriptionReport>,
}

impl ProtocolClient {
    /// Wrap an already open transport.
    pub fn new(transport: Arc<dyn Transport>, credentials: Credentials) -> Self {
        Self {
            transport,
            credentials,
            state: SessionState::Connecting,
            next_id: 1,
            token: None,
            headset_id: None,
            session_id: None,
            subscriptions: None,
        }
    }

    /// Open a WebSocket connection to the bridge.
    pub fn connect(
        endpoint: &str,
        options: &WsOptions,
        credentials: Credentials,
    ) -> Result<Self, ProtocolError> {
        info!(endpoint, "Connecting to device bridge");
        let transport =
            WsTransport::connect(endpoint, options).map_err(|source| ProtocolError::Transport {
                method: "connect".to_string(),
                source,
            })?;
        Ok(Self::new(Arc::new(transport), credentials))
    }

    /// Run the whole handshake and return the subscribed session.
    pub fn establish(
        transport: Arc<dyn Transport>,
        credentials: Credentials,
        options: &SetupOptions,
    ) -> Result<Session, ProtocolError> {
        let mut client = Self::new(transport, credentials);
        if options.request_access {
            client.request_access()?;
        }
        client.authorize(options.debit)?;
        client.create_session(options.headset.as_deref())?;
        client.subscribe(&options.streams)?;
        client.into_session()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Ask the bridge to grant this application access.
    ///
    /// A refusal is not fatal here; the following `authorize` reports it.
    pub fn request_access(&mut self) -> Result<bool, ProtocolError> {
        self.expect_state(method::REQUEST_ACCESS, &[SessionState::Connecting])?;
        self.state = SessionState::Authorizing;

        let params = json!({
            "clientId": self.credentials.client_id,
            "clientSecret": self.credentials.client_secret,
        });
        let result: AccessResult = self.call_typed(method::REQUEST_ACCESS, params)?;
        if result.access_granted {
            info!("Access granted by bridge");
        } else {
            warn!(message = %result.message, "Access not yet granted");
        }
        Ok(result.access_granted)
    }

    /// Exchange the credential pair for a session token.
    pub fn authorize(&mut self, debit: Option<u32>) -> Result<(), ProtocolError> {
        self.expect_state(
            method::AUTHORIZE,
            &[SessionState::Connecting, SessionState::Authorizing],
        )?;
        self.state = SessionState::Authorizing;

        let mut params = json!({
            "clientId": self.credentials.client_id,
            "clientSecret": self.credentials.client_secret,
        });
        if let Some(debit) = debit {
            params["debit"] = json!(debit);
        }

        let result: AuthorizeResult = self.call_typed(method::AUTHORIZE, params)?;
        self.token = Some(result.cortex_token);
        self.state = SessionState::Authorized;
        info!("Authorized");
        Ok(())
    }

    /// List headsets known to the bridge.
    pub fn query_headsets(&mut self) -> Result<Vec<HeadsetInfo>, ProtocolError> {
        self.expect_state(method::QUERY_HEADSETS, &[SessionState::Authorized])?;
        let headsets: Vec<HeadsetInfo> = self.call_typed(method::QUERY_HEADSETS, json!({}))?;
        debug!(count = headsets.len(), "Headsets discovered");
        Ok(headsets)
    }

    /// Open a session on `headset`, or on the first discovered headset.
    pub fn create_session(&mut self, headset: Option<&str>) -> Result<&str, ProtocolError> {
        self.expect_state(method::CREATE_SESSION, &[SessionState::Authorized])?;

        let headset_id = match headset {
            Some(id) => id.to_string(),
            None => match self.query_headsets()?.into_iter().next() {
                Some(first) => first.id,
                None => return Err(self.fail(ProtocolError::NoDeviceFound)),
            },
        };

        self.state = SessionState::CreatingSession;
        let params = json!({
            "cortexToken": self.token.clone().unwrap_or_default(),
            "headset": headset_id,
            "status": "active",
        });
        let result: CreateSessionResult = self.call_typed(method::CREATE_SESSION, params)?;

        info!(session = %result.id, headset = %headset_id, "Session created");
        self.headset_id = Some(headset_id);
        self.state = SessionState::SessionActive;
        Ok(self.session_id.insert(result.id).as_str())
    }

    /// Subscribe to `streams`, reporting the outcome of each one.
    ///
    /// Partial success moves to `Subscribed`; if nothing is live the step
    /// fails with [`ProtocolError::NothingSubscribed`].
    pub fn subscribe(&mut self, streams: &[String]) -> Result<SubscriptionReport, ProtocolError> {
        self.expect_state(method::SUBSCRIBE, &[SessionState::SessionActive])?;
        self.state = SessionState::Subscribing;

        let params = json!({
            "cortexToken": self.token.clone().unwrap_or_default(),
            "session": self.session_id.clone().unwrap_or_default(),
            "streams": streams,
        });
        let result: SubscribeResult = self.call_typed(method::SUBSCRIBE, params)?;
        let report = build_report(streams, result);

        for (stream, code, message) in report.failed() {
            warn!(stream, code, message, "Stream subscription failed");
        }
        if !report.any_active() {
            return Err(self.fail(ProtocolError::NothingSubscribed(report)));
        }

        info!(streams = ?report.active().collect::<Vec<_>>(), "Subscribed");
        self.subscriptions = Some(report.clone());
        self.state = SessionState::Subscribed;
        Ok(report)
    }

    /// Hand over the connection as an established session.
    pub fn into_session(self) -> Result<Session, ProtocolError> {
        if self.state != SessionState::Subscribed {
            return Err(ProtocolError::InvalidState {
                method: "into_session".to_string(),
                state: self.state,
            });
        }
        Ok(Session::new(
            self.credentials,
            self.token.unwrap_or_default(),
            self.headset_id.unwrap_or_default(),
            self.session_id.unwrap_or_default(),
            self.subscriptions.unwrap_or_default(),
            self.transport,
        ))
    }

    /// Abandon setup and close the connection.
    pub fn disconnect(&mut self) {
        self.transport.close();
        self.state = SessionState::Disconnected;
    }

    fn expect_state(&self, method: &str, allowed: &[SessionState]) -> Result<(), ProtocolError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(ProtocolError::InvalidState {
                method: method.to_string(),
                state: self.state.clone(),
            })
        }
    }

    fn fail(&mut self, error: ProtocolError) -> ProtocolError {
        warn!(error = %error, "Setup step failed");
        self.state = SessionState::Failed(error.to_string());
        error
    }

    fn call_typed<T: DeserializeOwned>(
        &mut self,
        method: &str,
        params: Value,
    ) -> Result<T, ProtocolError> {
        let result = self.call(method, params)?;
        serde_json::from_value(result).map_err(|e| {
            self.fail(ProtocolError::Malformed {
                method: method.to_string(),
                message: e.to_string(),
            })
        })
    }

    /// Send one request and wait for the response carrying its id.
    fn call(&mut self, method: &str, params: Value) -> Result<Value, ProtocolError> {
        let id = self.next_id;
        self.next_id += 1;

        let request = Request::new(id, method, params);
        let payload = serde_json::to_string(&request).map_err(|e| {
            self.fail(ProtocolError::Malformed {
                method: method.to_string(),
                message: e.to_string(),
            })
        })?;

        debug!(method, id, "Sending request");
        self.transport
            .send(&payload)
            .map_err(|source| transport_failure(method, source))
            .map_err(|e| self.fail(e))?;

        loop {
            let raw = self
                .transport
                .receive()
                .map_err(|source| transport_failure(method, source))
                .map_err(|e| self.fail(e))?;

            let response: Response = serde_json::from_str(&raw).map_err(|e| {
                self.fail(ProtocolError::Malformed {
                    method: method.to_string(),
                    message: e.to_string(),
                })
            })?;

            let Some(got) = response.id.as_ref() else {
                debug!(method, message = %raw, "Skipping message without id");
                continue;
            };
            if response.numeric_id() != Some(id) {
                return Err(self.fail(ProtocolError::UnexpectedId {
                    method: method.to_string(),
                    expected: id,
                    got: got.to_string(),
                }));
            }
            if let Some(error) = response.error {
                return Err(self.fail(ProtocolError::Rpc {
                    method: method.to_string(),
                    code: error.code,
                    message: error.message,
                }));
            }
            return match response.result {
                Some(result) => Ok(result),
                None => Err(self.fail(ProtocolError::Malformed {
                    method: method.to_string(),
                    message: "response has neither result nor error".to_string(),
                })),
            };
        }
    }
}

fn transport_failure(method: &str, source: TransportError) -> ProtocolError {
    ProtocolError::Transport {
        method: method.to_string(),
        source,
    }
}

/// Merge the bridge's success/failure lists into one entry per requested stream.
fn build_report(requested: &[String], result: SubscribeResult) -> SubscriptionReport {
    let streams = requested
        .iter()
        .map(|name| {
            let status = if let Some(ok) = result.success.iter().find(|s| &s.stream_name == name)
            {
                StreamStatus::Active {
                    columns: ok
                        .cols
                        .iter()
                        .map(|c| match c {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        })
                        .collect(),
                }
            } else if let Some(err) = result.failure.iter().find(|s| &s.stream_name == name) {
                StreamStatus::Failed {
                    code: err.code,
                    message: err.message.clone(),
                }
            } else {
                StreamStatus::Failed {
                    code: 0,
                    message: "no response for stream".to_string(),
                }
            };
            StreamSubscription {
                stream: name.clone(),
                status,
            }
        })
        .collect();
    SubscriptionReport { streams }
}
