//! The sync engine.
//!
//! [`Engine`] is a cheap-clone handle over one logical connection, the
//! subscription registry, and the object cache. [`Engine::start`] spawns the
//! connection loop, which:
//!
//! 1. resolves the session and opens the channel,
//! 2. clears the cache and re-sends every subscribed label in one request,
//! 3. pumps outbound frames and dispatches inbound ones in arrival order,
//! 4. on close waits the fixed reconnect delay and starts over.
//!
//! Local writes are optimistic: they land in the cache first and are rolled
//! back if the server rejects them or the request cannot be sent.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tagsync_core::object::ID_FIELD;
use tagsync_core::{
    Label, Object, ObjectId, PathSegment, Request, Result, SyncError, resolve_identity,
};
use tagsync_settings::SyncSettings;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::cache::SyncState;
use crate::connection::{ConnectionMonitor, ConnectionState};
use crate::correlator::Correlator;
use crate::dispatcher::{Dispatched, dispatch};
use crate::events::SyncEvent;
use crate::session::{AnonymousSession, SessionInfo, SessionProvider};
use crate::tracked::TrackedObject;
use crate::transport::{FrameSink, FrameStream, Transport, WebSocketTransport, socket_url};
use crate::view::LabelView;

/// Configures and builds an [`Engine`].
pub struct EngineBuilder {
    settings: SyncSettings,
    session: Option<Arc<dyn SessionProvider>>,
    transport: Option<Arc<dyn Transport>>,
}

impl EngineBuilder {
    /// Use `session` to resolve credentials. Defaults to [`AnonymousSession`].
    #[must_use]
    pub fn session(mut self, session: Arc<dyn SessionProvider>) -> Self {
        self.session = Some(session);
        self
    }

    /// Open channels through `transport`. Defaults to [`WebSocketTransport`].
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Build the engine. Nothing connects until [`Engine::start`].
    pub fn build(self) -> Engine {
        let (revision, _) = watch::channel(0);
        let (events, _) = broadcast::channel(self.settings.connection.event_buffer.max(1));
        let scheme = self.settings.labels.scheme;
        Engine {
            inner: Arc::new(Inner {
                session: self
                    .session
                    .unwrap_or_else(|| Arc::new(AnonymousSession)),
                transport: self
                    .transport
                    .unwrap_or_else(|| Arc::new(WebSocketTransport)),
                settings: self.settings,
                connection: ConnectionMonitor::new(),
                correlator: Correlator::new(),
                state: Mutex::new(SyncState::new(scheme)),
                revision,
                events,
                session_info: RwLock::new(SessionInfo::default()),
                session_changes: watch::channel(0).0,
                cancel: CancellationToken::new(),
                task: Mutex::new(None),
            }),
        }
    }
}

struct Inner {
    settings: SyncSettings,
    session: Arc<dyn SessionProvider>,
    transport: Arc<dyn Transport>,
    connection: ConnectionMonitor,
    correlator: Correlator,
    state: Mutex<SyncState>,
    /// Bumped whenever the cache or label membership changes.
    revision: watch::Sender<u64>,
    events: broadcast::Sender<SyncEvent>,
    session_info: RwLock<SessionInfo>,
    /// Generation bumped on log in/out. A change seen by the connection
    /// loop drops the open channel so the next attempt uses fresh
    /// credentials.
    session_changes: watch::Sender<u64>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to a running sync engine. Clones share the same state.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("origin", &self.inner.settings.server.origin)
            .field("state", &self.inner.connection.state())
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Start configuring an engine.
    pub fn builder(settings: SyncSettings) -> EngineBuilder {
        EngineBuilder {
            settings,
            session: None,
            transport: None,
        }
    }

    /// Spawn the connection loop. Must be called inside a Tokio runtime.
    /// Calling it again while the loop runs does nothing.
    pub fn start(&self) {
        let mut task = self.inner.task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) || self.inner.cancel.is_cancelled() {
            return;
        }
        let engine = self.clone();
        *task = Some(tokio::spawn(async move { engine.run().await }));
    }

    /// Stop the connection loop and wait for it to close the channel.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let task = self.inner.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    /// Resolve once the channel is open (`open = true`) or not (`open = false`).
    pub async fn connection_state(&self, open: bool) {
        self.inner.connection.wait_for(open).await;
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    /// Watch connection state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection.watch()
    }

    /// The settings the engine was built with.
    pub fn settings(&self) -> &SyncSettings {
        &self.inner.settings
    }

    /// The session resolved for the current (or last) connection.
    pub fn session(&self) -> SessionInfo {
        self.inner.session_info.read().clone()
    }

    /// Subscribe to engine events.
    pub fn events(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    /// Every subscribed label, sorted.
    pub fn subscribed_labels(&self) -> Vec<Label> {
        self.inner.state.lock().labels()
    }

    /// Snapshot of the cached object under `id`.
    pub fn get(&self, id: &ObjectId) -> Option<Object> {
        self.inner.state.lock().get(id).cloned()
    }

    /// Number of pending requests.
    pub fn pending_requests(&self) -> usize {
        self.inner.correlator.pending_count()
    }

    /// A tracked handle on the cached object `id`.
    pub fn tracked(&self, id: impl Into<ObjectId>) -> Result<TrackedObject> {
        let id = id.into();
        if !self.inner.state.lock().cache().contains(&id) {
            return Err(SyncError::NotCached { id });
        }
        Ok(TrackedObject::new(self.clone(), id))
    }

    /// A live view over the objects filed under any of `labels`.
    pub fn objects_for_labels<L>(&self, labels: impl IntoIterator<Item = L>) -> LabelView
    where
        L: Into<Label>,
    {
        let labels = labels.into_iter().map(Into::into).collect();
        LabelView::new(self.clone(), labels, self.inner.revision.subscribe())
    }

    /// Create or replace `object`, returning its id.
    ///
    /// A missing id is filled in (owner from the session, then derived from
    /// `key` or generated). The object is installed in the cache at once and
    /// reverted if the server rejects it.
    pub async fn update(&self, mut object: Object) -> Result<ObjectId> {
        let actor = self.inner.session_info.read().actor_id.clone();
        let id = resolve_identity(&mut object, actor.as_ref())?;
        let (previous, epoch) = {
            let mut state = self.inner.state.lock();
            let previous = state.get(&id).cloned();
            let _ = state.install(object.clone());
            (previous, state.epoch())
        };
        self.bump();
        self.commit(&id, previous, epoch, Request::Update(object))
            .await?;
        Ok(id)
    }

    /// Delete object `id`. It is evicted at once and reinstated if the
    /// server rejects the removal.
    pub async fn remove(&self, id: &ObjectId) -> Result<()> {
        let (previous, epoch) = {
            let mut state = self.inner.state.lock();
            (state.evict(id), state.epoch())
        };
        if previous.is_some() {
            self.bump();
        }
        self.commit(id, previous, epoch, Request::Remove(id.clone()))
            .await
    }

    /// Labels the server has this client subscribed to.
    pub async fn my_labels(&self) -> Result<Vec<Label>> {
        let reply = self.request(&Request::Ls).await?;
        if reply.is_null() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_value(reply)?)
    }

    /// Subscribe to `labels`.
    ///
    /// The subscription takes effect locally whatever happens on the wire;
    /// matching objects arrive once the server acknowledges it, or after the
    /// next reconnect.
    pub async fn subscribe<L>(&self, labels: impl IntoIterator<Item = L>)
    where
        L: Into<Label>,
    {
        let fresh = {
            let mut state = self.inner.state.lock();
            state.subscribe(labels.into_iter().map(Into::into))
        };
        if fresh.is_empty() {
            return;
        }
        self.bump();
        debug!(labels = ?fresh, "subscribing");
        self.best_effort(Request::Subscribe(fresh)).await;
    }

    /// Drop one subscription on each of `labels`.
    ///
    /// Labels whose last subscription goes away are unsubscribed on the
    /// server and their unmatched objects evicted. Fails, changing nothing,
    /// if a label is not subscribed.
    pub async fn unsubscribe<L>(&self, labels: impl IntoIterator<Item = L>) -> Result<()>
    where
        L: Into<Label>,
    {
        let dropped = {
            let mut state = self.inner.state.lock();
            state.unsubscribe(labels.into_iter().map(Into::into))?
        };
        if dropped.is_empty() {
            return Ok(());
        }
        self.bump();
        debug!(labels = ?dropped, "unsubscribing");
        self.best_effort(Request::Unsubscribe(dropped)).await;
        Ok(())
    }

    /// Log in through the session collaborator and reconnect with the new
    /// credentials.
    pub async fn log_in(&self) -> Result<()> {
        self.inner
            .session
            .log_in(&self.inner.settings.server.origin)
            .await?;
        info!("logged in, reconnecting");
        self.session_changed();
        Ok(())
    }

    /// Log out through the session collaborator and reconnect anonymously.
    pub async fn log_out(&self) -> Result<()> {
        self.inner.session.log_out().await?;
        *self.inner.session_info.write() = SessionInfo::default();
        info!("logged out, reconnecting");
        self.session_changed();
        Ok(())
    }

    /// Apply a write (`Some`) or delete (`None`) at `path` of cached object
    /// `id`, then confirm it with the server.
    pub(crate) async fn edit(
        &self,
        id: &ObjectId,
        path: &[PathSegment],
        value: Option<Value>,
    ) -> Result<()> {
        let Some(PathSegment::Key(root)) = path.first() else {
            return Err(SyncError::InvalidPath {
                path: tagsync_core::render_path(path),
            });
        };
        if root == ID_FIELD {
            return Err(SyncError::ImmutableField {
                field: ID_FIELD.to_owned(),
            });
        }

        if value.is_none() && path.len() == 1 && self.inner.settings.labels.scheme.is_reserved(root)
        {
            debug!(object_id = %id, field = %root, "reserved field deleted, removing object");
            return self.remove(id).await;
        }

        let (snapshot, updated, epoch) = {
            let mut state = self.inner.state.lock();
            let snapshot = state
                .get(id)
                .cloned()
                .ok_or_else(|| SyncError::NotCached { id: id.clone() })?;
            let mut updated = snapshot.clone();
            match value {
                Some(value) => updated.set_path(path, value)?,
                None => {
                    let _ = updated.remove_path(path)?;
                }
            }
            let _ = state.install(updated.clone());
            (snapshot, updated, state.epoch())
        };
        self.bump();
        self.commit(id, Some(snapshot), epoch, Request::Update(updated))
            .await
    }

    /// Send `request` and wait for its reply, subject to the configured
    /// timeout.
    async fn request(&self, request: &Request) -> Result<Value> {
        if !self.inner.connection.is_open() {
            return Err(SyncError::NotConnected);
        }
        let pending = self.inner.correlator.send(request)?;
        pending
            .wait(
                &self.inner.correlator,
                self.inner.settings.connection.request_timeout(),
            )
            .await
    }

    /// Confirm an optimistic change to `id`, restoring `snapshot` on failure
    /// unless the cache was rebuilt after `epoch`.
    async fn commit(
        &self,
        id: &ObjectId,
        snapshot: Option<Object>,
        epoch: u64,
        request: Request,
    ) -> Result<()> {
        let kind = request.kind();
        match self.request(&request).await {
            Ok(_) => {
                trace!(object_id = %id, kind, "change confirmed");
                Ok(())
            }
            Err(e) => {
                if self.inner.state.lock().restore(id, snapshot, epoch) {
                    warn!(object_id = %id, kind, error = %e, "change failed, rolled back");
                    self.bump();
                } else {
                    warn!(object_id = %id, kind, error = %e, "change failed after resync, keeping server state");
                }
                Err(e)
            }
        }
    }

    /// Send `request`, logging rather than returning any failure.
    async fn best_effort(&self, request: Request) {
        let kind = request.kind();
        if let Err(e) = self.request(&request).await {
            debug!(kind, error = %e, "best-effort request failed");
        }
    }

    fn session_changed(&self) {
        self.inner
            .session_changes
            .send_modify(|g| *g = g.wrapping_add(1));
    }

    fn bump(&self) {
        self.inner.revision.send_modify(|r| *r = r.wrapping_add(1));
    }

    fn emit(&self, event: SyncEvent) {
        trace!(event = event.name(), "event");
        // No receivers is fine.
        let _ = self.inner.events.send(event);
    }

    async fn run(self) {
        let inner = &self.inner;
        let mut session_changes = inner.session_changes.subscribe();
        loop {
            let _ = inner.connection.set(ConnectionState::Connecting);
            // Changes from here on postdate the credentials about to be read.
            session_changes.mark_unchanged();
            let connected = tokio::select! {
                () = inner.cancel.cancelled() => break,
                connected = self.connect() => connected,
            };
            match connected {
                Ok((sink, stream)) => self.serve(sink, stream, &mut session_changes).await,
                Err(e) => {
                    warn!(origin = %inner.settings.server.origin, error = %e, "connection attempt failed");
                    let _ = inner.connection.set(ConnectionState::Disconnected);
                }
            }

            debug!(
                delay_ms = inner.settings.connection.reconnect_delay_ms,
                "reconnecting after delay"
            );
            tokio::select! {
                () = inner.cancel.cancelled() => break,
                () = tokio::time::sleep(inner.settings.connection.reconnect_delay()) => {}
            }
        }
        let _ = inner.connection.set(ConnectionState::Disconnected);
        info!("connection loop stopped");
    }

    async fn connect(&self) -> Result<(FrameSink, FrameStream)> {
        let settings = &self.inner.settings;
        let info = self.inner.session.connect(&settings.server.origin).await?;
        let url = socket_url(&settings.server, info.token.as_deref())?;
        debug!(
            origin = %settings.server.origin,
            logged_in = info.logged_in,
            "connecting"
        );
        *self.inner.session_info.write() = info;
        self.inner.transport.connect(&url).await
    }

    async fn serve(
        &self,
        mut sink: FrameSink,
        mut stream: FrameStream,
        session_changes: &mut watch::Receiver<u64>,
    ) {
        let inner = &self.inner;
        let (writer, mut outbound) = mpsc::unbounded_channel();

        // Pushes missed while offline are not replayed, so start from empty.
        inner.state.lock().clear_objects();
        self.bump();
        inner.correlator.attach(writer);
        let _ = inner.connection.set(ConnectionState::Open);
        info!(origin = %inner.settings.server.origin, "connected");
        self.emit(SyncEvent::Opened);
        self.resubscribe();

        let reason = loop {
            tokio::select! {
                () = inner.cancel.cancelled() => break "shutdown",
                Ok(()) = session_changes.changed() => break "session changed",
                frame = outbound.recv() => {
                    let Some(text) = frame else { break "writer dropped" };
                    trace!(len = text.len(), "frame sent");
                    if let Err(e) = sink.send(text).await {
                        warn!(error = %e, "send failed");
                        break "send failed";
                    }
                }
                frame = stream.next() => match frame {
                    Some(Ok(text)) => self.handle_frame(&text),
                    Some(Err(e)) => {
                        warn!(error = %e, "receive failed");
                        break "receive failed";
                    }
                    None => break "closed by server",
                },
            }
        };

        inner.correlator.detach();
        let _ = sink.close().await;
        let _ = inner.connection.set(ConnectionState::Disconnected);
        info!(reason, "disconnected");
        self.emit(SyncEvent::Closed);
        if inner.settings.connection.fail_pending_on_disconnect {
            let _ = inner.correlator.fail_all(|| SyncError::Disconnected);
        }
    }

    /// Re-send every subscribed label in one request without blocking the
    /// connection loop.
    fn resubscribe(&self) {
        let labels = self.inner.state.lock().labels();
        if labels.is_empty() {
            return;
        }
        info!(count = labels.len(), "re-subscribing");
        let engine = self.clone();
        drop(tokio::spawn(async move {
            engine.best_effort(Request::Subscribe(labels)).await;
        }));
    }

    fn handle_frame(&self, text: &str) {
        trace!(len = text.len(), "frame received");
        match dispatch(text, &self.inner.correlator, &self.inner.state) {
            Dispatched::Changed => self.bump(),
            Dispatched::ServerError {
                payload,
                authorization,
            } => {
                self.emit(SyncEvent::ServerError(payload));
                if authorization {
                    let engine = self.clone();
                    drop(tokio::spawn(async move { engine.expire_session().await }));
                }
            }
            Dispatched::Reply { .. } | Dispatched::Unchanged | Dispatched::Malformed => {}
        }
    }

    async fn expire_session(&self) {
        match self.inner.session.log_out().await {
            Ok(()) => {
                *self.inner.session_info.write() = SessionInfo::default();
                info!("logged out after authorization error");
                self.emit(SyncEvent::LoggedOut);
            }
            Err(e) => warn!(error = %e, "log out after authorization error failed"),
        }
    }

    pub(crate) fn lock_state(&self) -> parking_lot::MutexGuard<'_, SyncState> {
        self.inner.state.lock()
    }
}
