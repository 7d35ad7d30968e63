//! Engine events published to subscribers.

use serde::Serialize;
use serde_json::Value;

/// Something the caller may want to react to outside a request.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum SyncEvent {
    /// The channel opened. Subscriptions are being re-sent.
    Opened,
    /// The channel closed. A reconnect is scheduled.
    Closed,
    /// The server pushed an error not tied to a request.
    ServerError(Value),
    /// The session was logged out after an authorization error.
    LoggedOut,
}

impl SyncEvent {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Opened => "opened",
            Self::Closed => "closed",
            Self::ServerError(_) => "server_error",
            Self::LoggedOut => "logged_out",
        }
    }
}
