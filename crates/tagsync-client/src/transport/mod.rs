//! Message channel abstraction.
//!
//! The engine only needs "send a text frame, receive text frames until the
//! link drops". [`Transport`] opens such a link; [`websocket`] implements it
//! over `tokio-tungstenite`, [`memory`] over in-process channels.

pub mod memory;
pub mod websocket;

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Sink, Stream};
use tagsync_core::{Result, SyncError};
use tagsync_settings::ServerSettings;
use url::Url;

pub use memory::{MemoryConnection, MemoryServer, MemoryTransport};
pub use websocket::WebSocketTransport;

/// Outbound half of an open link.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = SyncError> + Send>>;

/// Inbound half of an open link. Ends when the link closes.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Opens message links to the sync server.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a link to `url`.
    async fn connect(&self, url: &str) -> Result<(FrameSink, FrameStream)>;
}

/// Build the socket URL for `server`, carrying `token` as a credential.
///
/// `http`/`https` origins map to `ws`/`wss`. `socket_path` is appended to
/// any path the origin already has; an origin query is kept and the token
/// is added to it as `<token_param>=<token>`.
pub fn socket_url(server: &ServerSettings, token: Option<&str>) -> Result<String> {
    let invalid = |reason: String| {
        SyncError::Transport(format!("invalid origin '{}': {reason}", server.origin))
    };
    let mut url = Url::parse(server.origin.trim()).map_err(|e| invalid(e.to_string()))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(invalid(format!("unsupported scheme '{other}'"))),
    };
    url.set_scheme(scheme)
        .map_err(|()| invalid(format!("cannot switch to {scheme}")))?;

    let socket_path = server.socket_path.trim().trim_start_matches('/');
    if !socket_path.is_empty() {
        let path = format!("{}/{socket_path}", url.path().trim_end_matches('/'));
        url.set_path(&path);
    }

    if let Some(token) = token.filter(|t| !t.is_empty()) {
        let _ = url
            .query_pairs_mut()
            .append_pair(&server.token_param, token);
    }
    Ok(url.into())
}
