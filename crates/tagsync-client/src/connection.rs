//! Connection state tracking.
//!
//! The connection loop in [`crate::engine`] drives the transitions
//! `Disconnected → Connecting → Open → Disconnected → …`; this module holds
//! the current state and lets callers wait for a transition.

use std::fmt;

use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

/// Lifecycle state of the single sync channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No channel. Requests fail immediately.
    Disconnected,
    /// A connection attempt is in flight.
    Connecting,
    /// The channel is open and requests can be sent.
    Open,
}

impl ConnectionState {
    /// Whether requests can be sent.
    #[must_use]
    pub fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }

    /// Lowercase name for logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Open => "open",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Holds the connection state and notifies waiters of transitions.
#[derive(Debug)]
pub struct ConnectionMonitor {
    tx: watch::Sender<ConnectionState>,
}

impl ConnectionMonitor {
    /// Start in [`ConnectionState::Disconnected`].
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ConnectionState::Disconnected);
        Self { tx }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    /// Whether the channel is open.
    pub fn is_open(&self) -> bool {
        self.state().is_open()
    }

    /// Move to `state`. Returns `false` if already there.
    pub(crate) fn set(&self, state: ConnectionState) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            debug!(state = %state, "connection state changed");
        }
        changed
    }

    /// Resolve once the channel is open (`open = true`) or not open
    /// (`open = false`). Returns immediately if already there.
    pub async fn wait_for(&self, open: bool) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as self, so this cannot fail.
        let _ = rx.wait_for(|state| state.is_open() == open).await;
    }

    /// Subscribe to every state change.
    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }
}

impl Default for ConnectionMonitor {
    fn default() -> Self {
        Self::new()
    }
}
