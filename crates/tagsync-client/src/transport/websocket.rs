//! WebSocket transport — thin client over `tokio-tungstenite`.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt, future};
use tagsync_core::{Result, SyncError};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::debug;

use super::{FrameSink, FrameStream, Transport};

/// Opens links with `connect_async`. Only text frames reach the engine;
/// ping/pong is answered by tungstenite, binary frames are dropped.
#[derive(Clone, Copy, Debug, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    /// Create a WebSocket transport.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, url: &str) -> Result<(FrameSink, FrameStream)> {
        let (ws, response) = connect_async(url)
            .await
            .map_err(|e| SyncError::Transport(format!("WebSocket connect: {e}")))?;
        debug!(status = %response.status(), "websocket handshake complete");

        let (ws_tx, ws_rx) = ws.split();

        let sink = ws_tx
            .with(|text: String| future::ready(Ok::<_, tungstenite::Error>(Message::Text(text.into()))))
            .sink_map_err(|e| SyncError::Transport(e.to_string()));

        let stream = ws_rx.filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "server closed websocket");
                    None
                }
                Ok(_) => None,
                Err(e) => Some(Err(SyncError::Transport(e.to_string()))),
            })
        });

        Ok((Box::pin(sink), Box::pin(stream)))
    }
}
