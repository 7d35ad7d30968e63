//! In-process transport.
//!
//! [`MemoryTransport::new`] returns the client half (handed to the engine)
//! and a [`MemoryServer`] that accepts each link the engine opens as a
//! [`MemoryConnection`]. Dropping a connection closes the link, which the
//! engine observes exactly like a network failure.

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tagsync_core::protocol::CORRELATION_FIELD;
use tagsync_core::{Result, SyncError};

use super::{FrameSink, FrameStream, Transport};

/// Client half of the in-process transport.
#[derive(Clone, Debug)]
pub struct MemoryTransport {
    accept_tx: mpsc::UnboundedSender<MemoryConnection>,
}

impl MemoryTransport {
    /// Create a transport and the server that accepts its links.
    pub fn new() -> (Self, MemoryServer) {
        let (accept_tx, accept_rx) = mpsc::unbounded();
        (Self { accept_tx }, MemoryServer { accept_rx })
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, url: &str) -> Result<(FrameSink, FrameStream)> {
        let (client_tx, server_rx) = mpsc::unbounded::<String>();
        let (server_tx, client_rx) = mpsc::unbounded::<String>();

        let connection = MemoryConnection {
            url: url.to_owned(),
            tx: server_tx,
            rx: server_rx,
        };
        self.accept_tx
            .unbounded_send(connection)
            .map_err(|_| SyncError::Transport("memory server is gone".into()))?;

        let sink = client_tx.sink_map_err(|_| SyncError::Transport("memory link closed".into()));
        let stream = client_rx.map(Ok);
        Ok((Box::pin(sink), Box::pin(stream)))
    }
}

/// Accepts links opened through the paired [`MemoryTransport`].
#[derive(Debug)]
pub struct MemoryServer {
    accept_rx: mpsc::UnboundedReceiver<MemoryConnection>,
}

impl MemoryServer {
    /// Wait for the next link. `None` once every transport clone is dropped.
    pub async fn accept(&mut self) -> Option<MemoryConnection> {
        self.accept_rx.next().await
    }
}

/// Server side of one in-process link.
#[derive(Debug)]
pub struct MemoryConnection {
    url: String,
    tx: mpsc::UnboundedSender<String>,
    rx: mpsc::UnboundedReceiver<String>,
}

impl MemoryConnection {
    /// The URL the client connected to.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Next frame sent by the client, or `None` once it hung up.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.next().await
    }

    /// Next frame sent by the client, parsed as JSON. Unparseable frames
    /// come back as JSON strings.
    pub async fn recv_json(&mut self) -> Option<Value> {
        let text = self.recv().await?;
        Some(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }

    /// Send a text frame to the client. Returns `false` if it hung up.
    pub fn send(&self, text: impl Into<String>) -> bool {
        self.tx.unbounded_send(text.into()).is_ok()
    }

    /// Send a JSON frame to the client.
    pub fn send_json(&self, value: &Value) -> bool {
        self.send(value.to_string())
    }

    /// Answer `request` with `{"correlationId", "reply"}`.
    pub fn reply(&self, request: &Value, reply: Value) -> bool {
        self.send_json(&json!({
            "correlationId": request[CORRELATION_FIELD],
            "reply": reply,
        }))
    }

    /// Answer `request` with `{"correlationId", "error"}`.
    pub fn reject(&self, request: &Value, error: Value) -> bool {
        self.send_json(&json!({
            "correlationId": request[CORRELATION_FIELD],
            "error": error,
        }))
    }

    /// Close the link from the server side.
    pub fn close(self) {
        drop(self);
    }
}
