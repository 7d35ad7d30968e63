//! # tagsync-core
//!
//! Foundation types for the tagsync client engine.
//!
//! This crate provides the shared vocabulary the engine and its tools depend on:
//!
//! - **Branded IDs**: `ObjectId`, `CorrelationId`, `ActorId`, `Label` as newtypes
//! - **Objects**: the `Object` record, `LabelScheme`, path-addressed access,
//!   and identity resolution
//! - **Protocol**: outbound `Request` frames and inbound `Inbound` classification
//! - **Errors**: the `SyncError` hierarchy via `thiserror`
//! - **Logging**: `tracing` subscriber setup

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod logging;
pub mod object;
pub mod protocol;

pub use errors::{Result, SyncError};
pub use ids::{ActorId, CorrelationId, Label, ObjectId, derive_object_id};
pub use object::{LabelScheme, Object, PathSegment, render_path, resolve_identity};
pub use protocol::{Inbound, RemoveTarget, Request, is_authorization_error};
