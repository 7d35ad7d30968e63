//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]` so a settings
//! file may specify any subset of fields.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tagsync_core::LabelScheme;

/// Root settings type for the tagsync client.
///
/// ```json
/// {
///   "server": { "origin": "wss://sync.example.com" },
///   "connection": { "reconnectDelayMs": 5000 },
///   "labels": { "scheme": "tags" }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncSettings {
    /// Where the sync server lives.
    pub server: ServerSettings,
    /// Connection lifecycle and pending-request policy.
    pub connection: ConnectionSettings,
    /// How objects declare their labels.
    pub labels: LabelSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

/// Sync server location.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Server origin, e.g. `https://sync.example.com` or `ws://127.0.0.1:8080`.
    pub origin: String,
    /// Path of the socket endpoint on the origin.
    pub socket_path: String,
    /// Query parameter carrying the session token.
    pub token_param: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            origin: "ws://127.0.0.1:8080".to_string(),
            socket_path: "/ws".to_string(),
            token_param: "token".to_string(),
        }
    }
}

/// Connection lifecycle settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionSettings {
    /// Fixed delay before every reconnect attempt.
    pub reconnect_delay_ms: u64,
    /// Reject requests with no reply after this long. `None` waits forever.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_ms: Option<u64>,
    /// Reject every pending request when the channel closes.
    pub fail_pending_on_disconnect: bool,
    /// Capacity of the engine event broadcast channel.
    pub event_buffer: usize,
}

impl ConnectionSettings {
    /// Reconnect delay as a [`Duration`].
    #[must_use]
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Request timeout as a [`Duration`], if one is configured.
    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: 2_000,
            request_timeout_ms: None,
            fail_pending_on_disconnect: false,
            event_buffer: 256,
        }
    }
}

/// Label handling.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LabelSettings {
    /// Label field and self-label behaviour.
    pub scheme: LabelScheme,
}

/// Logging configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Minimum level when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
