//! Live views over the cache.

use tagsync_core::{Label, Object, ObjectId};
use tokio::sync::watch;

use crate::engine::Engine;
use crate::tracked::TrackedObject;

/// The objects filed under a set of labels.
///
/// A view holds no objects of its own: every read consults the cache, so it
/// always reflects the latest pushes and local writes. [`LabelView::changed`]
/// waits for the next change.
#[derive(Debug)]
pub struct LabelView {
    engine: Engine,
    labels: Vec<Label>,
    revision: watch::Receiver<u64>,
}

impl LabelView {
    pub(crate) fn new(engine: Engine, labels: Vec<Label>, revision: watch::Receiver<u64>) -> Self {
        Self {
            engine,
            labels,
            revision,
        }
    }

    /// The labels this view covers.
    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    /// Ids of the matching objects.
    pub fn ids(&self) -> Vec<ObjectId> {
        self.engine.lock_state().ids_for(&self.labels)
    }

    /// Snapshots of the matching objects.
    pub fn objects(&self) -> Vec<Object> {
        self.engine.lock_state().objects_for(&self.labels)
    }

    /// Tracked handles on the matching objects.
    pub fn tracked(&self) -> Vec<TrackedObject> {
        self.ids()
            .into_iter()
            .map(|id| TrackedObject::new(self.engine.clone(), id))
            .collect()
    }

    /// Whether `id` is among the matching objects.
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.ids().contains(id)
    }

    /// Number of matching objects.
    pub fn len(&self) -> usize {
        self.ids().len()
    }

    /// Whether nothing matches.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until the cache changes after the last call (or since the view
    /// was created).
    pub async fn changed(&mut self) {
        // The engine handle keeps the sender alive.
        let _ = self.revision.changed().await;
    }
}
