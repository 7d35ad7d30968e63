//! Tracked handles on cached objects.
//!
//! A [`TrackedObject`] names a cached object by id; it holds no copy of the
//! object. Reads go to the cache, and every write or delete (at any depth,
//! through [`TrackedValue`]) is applied optimistically, synced to the server
//! as an `update`, and reverted if the server rejects it.
//!
//! Deleting `owner`, `key`, or the label-list field at the root removes the
//! whole object. The `id` field cannot be written or deleted.

use serde_json::Value;
use tagsync_core::{Object, ObjectId, PathSegment, Result, render_path};
use tracing::trace;

use crate::engine::Engine;

/// A cached object, addressed by id.
#[derive(Clone, Debug)]
pub struct TrackedObject {
    engine: Engine,
    id: ObjectId,
}

impl TrackedObject {
    pub(crate) fn new(engine: Engine, id: ObjectId) -> Self {
        Self { engine, id }
    }

    /// The object id.
    pub fn id(&self) -> &ObjectId {
        &self.id
    }

    /// Copy of the object as currently cached. `None` once evicted.
    pub fn snapshot(&self) -> Option<Object> {
        self.engine.get(&self.id)
    }

    /// Whether the object is still cached.
    pub fn is_cached(&self) -> bool {
        self.engine.lock_state().cache().contains(&self.id)
    }

    /// Copy of a root field.
    pub fn get(&self, field: &str) -> Option<Value> {
        self.engine
            .lock_state()
            .get(&self.id)
            .and_then(|o| o.get(field).cloned())
    }

    /// Handle on a root field.
    pub fn field(&self, field: impl Into<String>) -> TrackedValue {
        TrackedValue {
            engine: self.engine.clone(),
            id: self.id.clone(),
            path: vec![PathSegment::Key(field.into())],
        }
    }

    /// Write a root field.
    pub async fn set(&self, field: impl Into<String>, value: Value) -> Result<()> {
        self.field(field).set(value).await
    }

    /// Delete a root field. Deleting a reserved field removes the object.
    pub async fn delete(&self, field: impl Into<String>) -> Result<()> {
        self.field(field).delete().await
    }

    /// Remove the object.
    pub async fn remove(&self) -> Result<()> {
        self.engine.remove(&self.id).await
    }
}

/// A location inside a tracked object.
#[derive(Clone, Debug)]
pub struct TrackedValue {
    engine: Engine,
    id: ObjectId,
    path: Vec<PathSegment>,
}

impl TrackedValue {
    /// Id of the object this value lives in.
    pub fn id(&self) -> &ObjectId {
        &self.id
    }

    /// Path from the object root.
    pub fn path(&self) -> &[PathSegment] {
        &self.path
    }

    /// Copy of the current value, if the path resolves.
    pub fn get(&self) -> Option<Value> {
        self.engine
            .lock_state()
            .get(&self.id)
            .and_then(|o| o.get_path(&self.path).cloned())
    }

    /// Handle on a map entry below this value.
    #[must_use]
    pub fn field(&self, key: impl Into<String>) -> Self {
        self.child(PathSegment::Key(key.into()))
    }

    /// Handle on an array element below this value.
    #[must_use]
    pub fn index(&self, index: usize) -> Self {
        self.child(PathSegment::Index(index))
    }

    /// Overwrite this value.
    pub async fn set(&self, value: Value) -> Result<()> {
        trace!(object_id = %self.id, path = %render_path(&self.path), "set");
        self.engine.edit(&self.id, &self.path, Some(value)).await
    }

    /// Delete this value. Array elements after it shift down.
    pub async fn delete(&self) -> Result<()> {
        trace!(object_id = %self.id, path = %render_path(&self.path), "delete");
        self.engine.edit(&self.id, &self.path, None).await
    }

    fn child(&self, segment: PathSegment) -> Self {
        let mut path = self.path.clone();
        path.push(segment);
        Self {
            engine: self.engine.clone(),
            id: self.id.clone(),
            path,
        }
    }
}
