//! Error hierarchy for the sync engine.
//!
//! [`SyncError`] covers every failure a caller-facing operation can return:
//!
//! - **Connection**: a request attempted while the channel is not open
//! - **Protocol**: the server answered a correlated request with `error`
//! - **Identity**: an object whose id cannot be resolved locally
//! - **Local misuse**: unsubscribing an unknown label, writing an immutable
//!   field, addressing a path that does not exist
//!
//! Unsolicited server errors are never returned from a call. They are
//! published on the engine's event channel instead.

use serde_json::Value;
use thiserror::Error;

use crate::ids::{Label, ObjectId};

/// Errors returned by sync engine operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The channel is not open; nothing was written.
    #[error("not connected")]
    NotConnected,

    /// The server rejected the request with an `error` reply.
    #[error("request rejected by server: {payload}")]
    Rejected {
        /// The error payload sent by the server.
        payload: Value,
    },

    /// The object's identity could not be resolved.
    #[error("cannot resolve object identity: {reason}")]
    Identity {
        /// Which identity field is missing.
        reason: String,
    },

    /// Attempted to unsubscribe a label that has no active subscription.
    #[error("unsubscribe of non-subscribed label '{label}'")]
    NotSubscribed {
        /// The label that was not subscribed.
        label: Label,
    },

    /// The object is not present in the local cache.
    #[error("object '{id}' is not in the cache")]
    NotCached {
        /// The missing object id.
        id: ObjectId,
    },

    /// The field cannot be written or deleted through a tracked object.
    #[error("field '{field}' cannot be modified")]
    ImmutableField {
        /// The protected field name.
        field: String,
    },

    /// A path does not address a writable location in the object.
    #[error("invalid path '{path}'")]
    InvalidPath {
        /// Rendered path, e.g. `meta.tags[2]`.
        path: String,
    },

    /// No reply arrived within the configured request timeout.
    #[error("request timed out after {timeout_ms}ms")]
    Timeout {
        /// The configured timeout.
        timeout_ms: u64,
    },

    /// The channel closed while the request was pending.
    #[error("connection closed before a reply arrived")]
    Disconnected,

    /// The underlying transport failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// A frame did not match the wire protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The session collaborator failed.
    #[error("session error: {0}")]
    Session(String),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    /// Machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotConnected => "NOT_CONNECTED",
            Self::Rejected { .. } => "REJECTED",
            Self::Identity { .. } => "IDENTITY",
            Self::NotSubscribed { .. } => "NOT_SUBSCRIBED",
            Self::NotCached { .. } => "NOT_CACHED",
            Self::ImmutableField { .. } => "IMMUTABLE_FIELD",
            Self::InvalidPath { .. } => "INVALID_PATH",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Disconnected => "DISCONNECTED",
            Self::Transport(_) => "TRANSPORT",
            Self::Protocol(_) => "PROTOCOL",
            Self::Session(_) => "SESSION",
            Self::Json(_) => "JSON",
        }
    }

    /// Whether retrying the same call later may succeed.
    ///
    /// Only connectivity failures qualify. A server rejection or a local
    /// misuse fails the same way every time.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NotConnected | Self::Timeout { .. } | Self::Disconnected | Self::Transport(_)
        )
    }

    /// The server's error payload, if this is a rejection.
    #[must_use]
    pub fn rejection_payload(&self) -> Option<&Value> {
        match self {
            Self::Rejected { payload } => Some(payload),
            _ => None,
        }
    }

    pub(crate) fn identity(reason: impl Into<String>) -> Self {
        Self::Identity {
            reason: reason.into(),
        }
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
