//! Session collaborator.
//!
//! Credential exchange lives outside the engine. Before every connection
//! attempt the engine asks a [`SessionProvider`] for the resolved session and
//! appends its token to the socket URL. Authorization-error pushes call
//! [`SessionProvider::log_out`].

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tagsync_core::{ActorId, Result};
use tracing::debug;

/// A resolved session.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionInfo {
    /// Whether an actor is logged in.
    pub logged_in: bool,
    /// The logged-in actor. Used as `owner` for new objects.
    pub actor_id: Option<ActorId>,
    /// Connection credential appended to the socket URL.
    pub token: Option<String>,
}

/// Supplies the session the engine connects with.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Resolve the session for `origin`. Called before each connection attempt.
    async fn connect(&self, origin: &str) -> Result<SessionInfo>;

    /// Start a login for `origin`.
    async fn log_in(&self, origin: &str) -> Result<()>;

    /// Drop the current login.
    async fn log_out(&self) -> Result<()>;
}

/// A session that never logs in.
#[derive(Clone, Copy, Debug, Default)]
pub struct AnonymousSession;

#[async_trait]
impl SessionProvider for AnonymousSession {
    async fn connect(&self, _origin: &str) -> Result<SessionInfo> {
        Ok(SessionInfo::default())
    }

    async fn log_in(&self, origin: &str) -> Result<()> {
        debug!(origin, "anonymous session ignores log in");
        Ok(())
    }

    async fn log_out(&self) -> Result<()> {
        Ok(())
    }
}

/// A session with a fixed actor and token, toggled by log in / log out.
#[derive(Debug)]
pub struct StaticSession {
    actor_id: ActorId,
    token: Option<String>,
    logged_in: AtomicBool,
}

impl StaticSession {
    /// Create a logged-in session for `actor_id`.
    pub fn new(actor_id: impl Into<ActorId>, token: Option<String>) -> Self {
        Self {
            actor_id: actor_id.into(),
            token,
            logged_in: AtomicBool::new(true),
        }
    }

    /// Whether the session is currently logged in.
    pub fn is_logged_in(&self) -> bool {
        self.logged_in.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionProvider for StaticSession {
    async fn connect(&self, _origin: &str) -> Result<SessionInfo> {
        if !self.is_logged_in() {
            return Ok(SessionInfo::default());
        }
        Ok(SessionInfo {
            logged_in: true,
            actor_id: Some(self.actor_id.clone()),
            token: self.token.clone(),
        })
    }

    async fn log_in(&self, _origin: &str) -> Result<()> {
        self.logged_in.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn log_out(&self) -> Result<()> {
        self.logged_in.store(false, Ordering::SeqCst);
        Ok(())
    }
}
