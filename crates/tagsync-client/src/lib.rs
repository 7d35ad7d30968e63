//! # tagsync-client
//!
//! Client-side sync engine mirroring label-subscribed objects from a server.
//!
//! - Connection loop with fixed-delay perpetual reconnect and full resync
//! - Request/reply correlation over a single text-frame channel
//! - Reference-counted label subscriptions driving cache membership
//! - Tracked objects whose writes apply optimistically and roll back on rejection
//! - Live label views, engine events via `tokio::sync::broadcast`
//! - `WebSocket` and in-memory transports

#![deny(unsafe_code)]

pub mod cache;
pub mod connection;
pub mod correlator;
pub mod dispatcher;
pub mod engine;
pub mod events;
pub mod registry;
pub mod session;
pub mod tracked;
pub mod transport;
pub mod view;

pub use cache::{InstallOutcome, ObjectCache, SyncState};
pub use connection::{ConnectionMonitor, ConnectionState};
pub use correlator::{Correlator, PendingReply};
pub use engine::{Engine, EngineBuilder};
pub use events::SyncEvent;
pub use registry::{Subscription, SubscriptionRegistry};
pub use session::{AnonymousSession, SessionInfo, SessionProvider, StaticSession};
pub use tracked::{TrackedObject, TrackedValue};
pub use transport::{
    MemoryConnection, MemoryServer, MemoryTransport, Transport, WebSocketTransport, socket_url,
};
