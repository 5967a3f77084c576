//! Established sessions and per-stream subscription outcomes.

use crate::config::Credentials;
use crate::transport::Transport;
use serde::Serialize;
use std::sync::Arc;

/// Outcome of subscribing one stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StreamStatus {
    /// Streaming, with the column names the bridge announced.
    Active { columns: Vec<String> },
    /// Rejected by the bridge, or missing from its answer.
    Failed { code: i64, message: String },
}

/// One requested stream and what became of it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamSubscription {
    pub stream: String,
    pub status: StreamStatus,
}

/// Per-stream result of a subscribe step.
///
/// A successful subscribe response does not mean every requested stream is
/// live; callers inspect each entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SubscriptionReport {
    pub streams: Vec<StreamSubscription>,
}

impl SubscriptionReport {
    /// Status of a named stream, if it was requested.
    pub fn status(&self, stream: &str) -> Option<&StreamStatus> {
        self.streams
            .iter()
            .find(|s| s.stream == stream)
            .map(|s| &s.status)
    }

    pub fn is_active(&self, stream: &str) -> bool {
        matches!(self.status(stream), Some(StreamStatus::Active { .. }))
    }

    /// Names of streams that are live.
    pub fn active(&self) -> impl Iterator<Item = &str> {
        self.streams.iter().filter_map(|s| match s.status {
            StreamStatus::Active { .. } => Some(s.stream.as_str()),
            StreamStatus::Failed { .. } => None,
        })
    }

    /// Streams that failed, with their error.
    pub fn failed(&self) -> impl Iterator<Item = (&str, i64, &str)> {
        self.streams.iter().filter_map(|s| match &s.status {
            StreamStatus::Failed { code, message } => {
                Some((s.stream.as_str(), *code, message.as_str()))
            }
            StreamStatus::Active { .. } => None,
        })
    }

    pub fn any_active(&self) -> bool {
        self.active().next().is_some()
    }

    pub fn is_partial(&self) -> bool {
        self.any_active() && self.failed().next().is_some()
    }
}

/// An authenticated, device-bound, subscribed session.
///
/// Immutable once established. It owns the connection until it is handed to
/// a [`StreamIngester`](crate::stream::StreamIngester).
pub struct Session {
    credentials: Credentials,
    token: String,
    headset_id: String,
    session_id: String,
    subscriptions: SubscriptionReport,
    transport: Arc<dyn Transport>,
}

impl Session {
    pub(crate) fn new(
        credentials: Credentials,
        token: String,
        headset_id: String,
        session_id: String,
        subscriptions: SubscriptionReport,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            credentials,
            token,
            headset_id,
            session_id,
            subscriptions,
            transport,
        }
    }

    /// Opaque bridge token obtained by `authorize`.
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn headset_id(&self) -> &str {
        &self.headset_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn subscriptions(&self) -> &SubscriptionReport {
        &self.subscriptions
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Tear the session down by closing its connection.
    pub fn close(self) {
        self.transport.close();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("client_id", &self.credentials.client_id)
            .field("token", &"<redacted>")
            .field("headset_id", &self.headset_id)
            .field("session_id", &self.session_id)
            .field("subscriptions", &self.subscriptions)
            .finish()
    }
}
