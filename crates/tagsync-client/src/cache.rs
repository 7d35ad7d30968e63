//! Object cache and the label bookkeeping that decides what it holds.
//!
//! [`SyncState`] owns the [`SubscriptionRegistry`] and the [`ObjectCache`]
//! together so every change keeps them consistent: an object is cached iff
//! at least one subscribed label lists it.

use std::collections::{HashMap, HashSet};

use tagsync_core::{Label, LabelScheme, Object, ObjectId, RemoveTarget, Result};
use tracing::{debug, trace, warn};

use crate::registry::SubscriptionRegistry;

/// Canonical objects keyed by id.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ObjectCache {
    objects: HashMap<ObjectId, Object>,
}

impl ObjectCache {
    /// The cached object under `id`.
    pub fn get(&self, id: &ObjectId) -> Option<&Object> {
        self.objects.get(id)
    }

    /// Whether `id` is cached.
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.objects.contains_key(id)
    }

    /// Number of cached objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Every cached id.
    pub fn ids(&self) -> impl Iterator<Item = &ObjectId> {
        self.objects.keys()
    }

    fn insert(&mut self, id: ObjectId, object: Object) -> Option<Object> {
        self.objects.insert(id, object)
    }

    fn remove(&mut self, id: &ObjectId) -> Option<Object> {
        self.objects.remove(id)
    }

    fn clear(&mut self) {
        self.objects.clear();
    }
}

/// What [`SyncState::install`] did with an object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstallOutcome {
    /// The object is cached under at least one subscribed label.
    Cached,
    /// The object was cached but no longer matches, so it was evicted.
    Evicted,
    /// The object matches nothing (or has no id) and was not cached.
    Discarded,
}

impl InstallOutcome {
    /// Whether the cache changed.
    pub fn changed(self) -> bool {
        !matches!(self, Self::Discarded)
    }
}

/// Subscription registry plus object cache.
#[derive(Clone, Debug, Default)]
pub struct SyncState {
    scheme: LabelScheme,
    registry: SubscriptionRegistry,
    cache: ObjectCache,
    /// Bumped each time the cache is cleared for a fresh connection.
    epoch: u64,
}

impl SyncState {
    /// Empty state filing objects under `scheme`.
    pub fn new(scheme: LabelScheme) -> Self {
        Self {
            scheme,
            registry: SubscriptionRegistry::new(),
            cache: ObjectCache::default(),
            epoch: 0,
        }
    }

    /// Which cache generation is live. Snapshots taken under an older
    /// epoch no longer describe the cache.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// The label scheme in use.
    pub fn scheme(&self) -> LabelScheme {
        self.scheme
    }

    /// The subscription registry.
    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// The object cache.
    pub fn cache(&self) -> &ObjectCache {
        &self.cache
    }

    /// The cached object under `id`.
    pub fn get(&self, id: &ObjectId) -> Option<&Object> {
        self.cache.get(id)
    }

    /// Every subscribed label, sorted.
    pub fn labels(&self) -> Vec<Label> {
        self.registry.labels()
    }

    /// Install `object`, re-deriving its label membership from scratch.
    ///
    /// The id joins every subscribed label it carries and leaves every other
    /// one. With no subscribed label left the object is evicted (or never
    /// cached). Objects without an id are discarded.
    pub fn install(&mut self, object: Object) -> InstallOutcome {
        let Some(id) = object.id() else {
            warn!("discarding object without an id");
            return InstallOutcome::Discarded;
        };
        let labels = self.scheme.membership_labels(&object);
        let listed = self.registry.set_membership(&id, &labels);
        if listed.is_empty() {
            return if self.cache.remove(&id).is_some() {
                debug!(object_id = %id, "evicted object with no subscribed label");
                InstallOutcome::Evicted
            } else {
                trace!(object_id = %id, "discarded object with no subscribed label");
                InstallOutcome::Discarded
            };
        }
        trace!(object_id = %id, labels = listed.len(), "cached object");
        let _ = self.cache.insert(id, object);
        InstallOutcome::Cached
    }

    /// Apply a `remove` push. Returns whether the cache or any label changed.
    ///
    /// A bare id leaves every label. A full object leaves every label it no
    /// longer carries; if it still matches one it stays cached with the
    /// pushed content.
    pub fn remove(&mut self, target: RemoveTarget) -> bool {
        let Some(id) = target.id() else {
            warn!("discarding remove without an id");
            return false;
        };
        let touched = self.cache.contains(&id) || self.registry.is_matched(&id);
        match target {
            RemoveTarget::Id(_) => {
                let _ = self.evict(&id);
            }
            RemoveTarget::Object(object) => {
                let keep = self.scheme.membership_labels(&object);
                if self.registry.retain_membership(&id, &keep) {
                    if self.cache.contains(&id) {
                        let _ = self.cache.insert(id, object);
                    }
                } else if self.cache.remove(&id).is_some() {
                    debug!(object_id = %id, "evicted removed object");
                }
            }
        }
        touched
    }

    /// Drop `id` from every label and from the cache, returning the object.
    pub fn evict(&mut self, id: &ObjectId) -> Option<Object> {
        let _ = self.registry.set_membership(id, &[]);
        self.cache.remove(id)
    }

    /// Put back a snapshot taken at `epoch` before an optimistic change.
    /// `None` means the object did not exist.
    ///
    /// Returns `false`, changing nothing, when the cache has been cleared
    /// since: the server has resent its state and the snapshot is stale.
    pub fn restore(&mut self, id: &ObjectId, snapshot: Option<Object>, epoch: u64) -> bool {
        if epoch != self.epoch {
            return false;
        }
        match snapshot {
            Some(object) => {
                let _ = self.install(object);
            }
            None => {
                let _ = self.evict(id);
            }
        }
        true
    }

    /// Subscribe to `labels`, returning the ones that are new.
    ///
    /// Objects already cached under another label are listed under the new
    /// labels they carry.
    pub fn subscribe(&mut self, labels: impl IntoIterator<Item = Label>) -> Vec<Label> {
        let fresh = self.registry.subscribe(labels);
        if fresh.is_empty() || self.cache.is_empty() {
            return fresh;
        }
        for (id, object) in &self.cache.objects {
            let carried = self.scheme.membership_labels(object);
            for label in fresh.iter().filter(|l| carried.contains(l)) {
                self.registry.add_match(label, id);
            }
        }
        fresh
    }

    /// Unsubscribe from `labels`, returning those whose count hit zero.
    ///
    /// Objects no longer listed under any label are evicted. Fails without
    /// changing anything if a label is not subscribed.
    pub fn unsubscribe(&mut self, labels: impl IntoIterator<Item = Label>) -> Result<Vec<Label>> {
        let removed = self.registry.unsubscribe(labels)?;
        let mut dropped = Vec::with_capacity(removed.len());
        for (label, subscription) in removed {
            for id in subscription.matched() {
                if !self.registry.is_matched(id) && self.cache.remove(id).is_some() {
                    debug!(object_id = %id, label = %label, "evicted on unsubscribe");
                }
            }
            dropped.push(label);
        }
        Ok(dropped)
    }

    /// Forget every cached object, keeping subscriptions.
    pub fn clear_objects(&mut self) {
        self.cache.clear();
        self.registry.clear_matches();
        self.epoch = self.epoch.wrapping_add(1);
    }

    /// Ids listed under any of `labels`, without duplicates, in label order.
    pub fn ids_for(&self, labels: &[Label]) -> Vec<ObjectId> {
        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        for label in labels {
            let Some(subscription) = self.registry.get(label) else {
                continue;
            };
            for id in subscription.matched() {
                if self.cache.contains(id) && seen.insert(id) {
                    ids.push(id.clone());
                }
            }
        }
        ids
    }

    /// Snapshots of the objects listed under any of `labels`.
    pub fn objects_for(&self, labels: &[Label]) -> Vec<Object> {
        self.ids_for(labels)
            .iter()
            .filter_map(|id| self.cache.get(id).cloned())
            .collect()
    }

    /// Panic if the cache and registry disagree.
    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        let subscribed = self.registry.labels();
        for label in &subscribed {
            let Some(subscription) = self.registry.get(label) else {
                continue;
            };
            for id in subscription.matched() {
                let object = self
                    .cache
                    .get(id)
                    .unwrap_or_else(|| panic!("{label} lists {id} which is not cached"));
                assert!(
                    self.scheme.membership_labels(object).contains(label),
                    "{label} lists {id} which does not carry it"
                );
            }
        }
        for id in self.cache.ids() {
            assert!(self.registry.is_matched(id), "{id} is cached but unlisted");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;
    use serde_json::json;
    use tagsync_core::SyncError;

    fn labels(names: &[&str]) -> Vec<Label> {
        names.iter().map(|n| Label::from(*n)).collect()
    }

    fn object(id: &str, context: &[&str]) -> Object {
        Object::from_value(json!({"id": id, "owner": "u1", "context": context})).unwrap()
    }

    fn ids(state: &SyncState, names: &[&str]) -> Vec<String> {
        state
            .ids_for(&labels(names))
            .into_iter()
            .map(ObjectId::into_inner)
            .collect()
    }

    #[test]
    fn push_for_subscribed_label_is_cached() {
        let mut state = SyncState::new(LabelScheme::Context);
        let _ = state.subscribe(labels(&["news"]));
        assert_eq!(state.install(object("a1", &["news"])), InstallOutcome::Cached);
        assert_eq!(ids(&state, &["news"]), vec!["a1"]);
        state.assert_consistent();
    }

    #[test]
    fn push_for_unsubscribed_label_is_discarded() {
        let mut state = SyncState::new(LabelScheme::Context);
        let _ = state.subscribe(labels(&["news"]));
        assert_eq!(
            state.install(object("a1", &["sport"])),
            InstallOutcome::Discarded
        );
        assert!(state.cache().is_empty());
    }

    #[test]
    fn object_without_id_is_discarded() {
        let mut state = SyncState::new(LabelScheme::Context);
        let _ = state.subscribe(labels(&["news"]));
        let object = Object::from_value(json!({"context": ["news"]})).unwrap();
        assert_eq!(state.install(object), InstallOutcome::Discarded);
    }

    #[test]
    fn context_scheme_matches_own_id() {
        let mut state = SyncState::new(LabelScheme::Context);
        let _ = state.subscribe(labels(&["a1"]));
        assert_eq!(state.install(object("a1", &[])), InstallOutcome::Cached);
        assert_eq!(ids(&state, &["a1"]), vec!["a1"]);
    }

    #[test]
    fn tags_scheme_ignores_own_id() {
        let mut state = SyncState::new(LabelScheme::Tags);
        let _ = state.subscribe(labels(&["a1", "red"]));
        let plain = Object::from_value(json!({"id": "a1", "tags": []})).unwrap();
        assert_eq!(state.install(plain), InstallOutcome::Discarded);
        let tagged = Object::from_value(json!({"id": "a1", "tags": ["red"]})).unwrap();
        assert_eq!(state.install(tagged), InstallOutcome::Cached);
        assert_eq!(ids(&state, &["red"]), vec!["a1"]);
    }

    #[test]
    fn label_change_moves_membership() {
        let mut state = SyncState::new(LabelScheme::Context);
        let _ = state.subscribe(labels(&["x", "y"]));
        let _ = state.install(object("a1", &["x"]));
        let _ = state.install(object("a1", &["y"]));
        assert!(ids(&state, &["x"]).is_empty());
        assert_eq!(ids(&state, &["y"]), vec!["a1"]);
        state.assert_consistent();
    }

    #[test]
    fn update_dropping_last_label_evicts() {
        let mut state = SyncState::new(LabelScheme::Context);
        let _ = state.subscribe(labels(&["x"]));
        let _ = state.install(object("a1", &["x"]));
        assert_eq!(state.install(object("a1", &["z"])), InstallOutcome::Evicted);
        assert!(state.get(&ObjectId::from("a1")).is_none());
        state.assert_consistent();
    }

    #[test]
    fn unsubscribe_evicts_only_orphans() {
        let mut state = SyncState::new(LabelScheme::Context);
        let _ = state.subscribe(labels(&["x", "y"]));
        let _ = state.install(object("a1", &["x"]));
        let _ = state.install(object("a2", &["x", "y"]));

        assert_eq!(state.unsubscribe(labels(&["x"])).unwrap(), labels(&["x"]));
        assert!(state.get(&ObjectId::from("a1")).is_none());
        assert!(state.get(&ObjectId::from("a2")).is_some());
        state.assert_consistent();
    }

    #[test]
    fn unsubscribe_untracked_label_changes_nothing() {
        let mut state = SyncState::new(LabelScheme::Context);
        let _ = state.subscribe(labels(&["x"]));
        let _ = state.install(object("a1", &["x"]));
        assert_matches!(
            state.unsubscribe(labels(&["x", "nope"])),
            Err(SyncError::NotSubscribed { .. })
        );
        assert!(state.get(&ObjectId::from("a1")).is_some());
        assert!(state.registry().is_subscribed(&Label::from("x")));
    }

    #[test]
    fn subscribe_lists_already_cached_objects() {
        let mut state = SyncState::new(LabelScheme::Context);
        let _ = state.subscribe(labels(&["x"]));
        let _ = state.install(object("a1", &["x", "y"]));
        assert_eq!(state.subscribe(labels(&["y"])), labels(&["y"]));
        assert_eq!(ids(&state, &["y"]), vec!["a1"]);
        state.assert_consistent();
    }

    #[test]
    fn remove_by_id_evicts() {
        let mut state = SyncState::new(LabelScheme::Context);
        let _ = state.subscribe(labels(&["x"]));
        let _ = state.install(object("a1", &["x"]));
        assert!(state.remove(RemoveTarget::Id(ObjectId::from("a1"))));
        assert!(state.cache().is_empty());
        assert!(!state.remove(RemoveTarget::Id(ObjectId::from("a1"))));
    }

    #[test]
    fn remove_with_surviving_label_keeps_object() {
        let mut state = SyncState::new(LabelScheme::Context);
        let _ = state.subscribe(labels(&["x", "y"]));
        let _ = state.install(object("a1", &["x", "y"]));

        assert!(state.remove(RemoveTarget::Object(object("a1", &["y"]))));
        assert!(ids(&state, &["x"]).is_empty());
        assert_eq!(ids(&state, &["y"]), vec!["a1"]);
        assert_eq!(
            state.get(&ObjectId::from("a1")).unwrap().labels(LabelScheme::Context),
            labels(&["y"])
        );
        state.assert_consistent();
    }

    #[test]
    fn remove_without_surviving_label_evicts() {
        let mut state = SyncState::new(LabelScheme::Context);
        let _ = state.subscribe(labels(&["x"]));
        let _ = state.install(object("a1", &["x"]));
        assert!(state.remove(RemoveTarget::Object(object("a1", &[]))));
        assert!(state.cache().is_empty());
        state.assert_consistent();
    }

    #[test]
    fn restore_reverts_new_and_existing() {
        let mut state = SyncState::new(LabelScheme::Context);
        let _ = state.subscribe(labels(&["x", "y"]));
        let before = object("a1", &["x"]);
        let _ = state.install(before.clone());

        let epoch = state.epoch();
        let _ = state.install(object("a1", &["y"]));
        assert!(state.restore(&ObjectId::from("a1"), Some(before.clone()), epoch));
        assert_eq!(state.get(&ObjectId::from("a1")), Some(&before));
        assert_eq!(ids(&state, &["x"]), vec!["a1"]);
        assert!(ids(&state, &["y"]).is_empty());

        let _ = state.install(object("a2", &["x"]));
        assert!(state.restore(&ObjectId::from("a2"), None, epoch));
        assert!(state.get(&ObjectId::from("a2")).is_none());
        assert!(!state.registry().is_matched(&ObjectId::from("a2")));
        state.assert_consistent();
    }

    #[test]
    fn restore_after_clear_is_ignored() {
        let mut state = SyncState::new(LabelScheme::Context);
        let _ = state.subscribe(labels(&["x"]));
        let epoch = state.epoch();
        let _ = state.install(object("n1", &["x"]));

        // Reconnect: cache cleared, server resends the object.
        state.clear_objects();
        assert_ne!(state.epoch(), epoch);
        let _ = state.install(object("n1", &["x"]));

        assert!(!state.restore(&ObjectId::from("n1"), None, epoch));
        assert_eq!(ids(&state, &["x"]), vec!["n1"]);
        state.assert_consistent();
    }

    #[test]
    fn clear_objects_keeps_labels() {
        let mut state = SyncState::new(LabelScheme::Context);
        let _ = state.subscribe(labels(&["x"]));
        let _ = state.install(object("a1", &["x"]));
        state.clear_objects();
        assert!(state.cache().is_empty());
        assert_eq!(state.labels(), labels(&["x"]));
        state.assert_consistent();
    }

    #[test]
    fn objects_for_deduplicates_across_labels() {
        let mut state = SyncState::new(LabelScheme::Context);
        let _ = state.subscribe(labels(&["x", "y"]));
        let _ = state.install(object("a1", &["x", "y"]));
        assert_eq!(state.objects_for(&labels(&["x", "y"])).len(), 1);
        assert!(state.objects_for(&labels(&["unknown"])).is_empty());
    }

    #[derive(Clone, Debug)]
    enum Op {
        Subscribe(Vec<usize>),
        Unsubscribe(Vec<usize>),
        Push(usize, Vec<usize>),
        RemovePush(usize, Vec<usize>),
        RemoveId(usize),
        Evict(usize),
    }

    const POOL: [&str; 5] = ["a", "b", "c", "o1", "o2"];
    const IDS: [&str; 3] = ["o1", "o2", "o3"];

    fn pick(indices: &[usize]) -> Vec<&'static str> {
        indices.iter().map(|i| POOL[*i]).collect()
    }

    fn op() -> impl Strategy<Value = Op> {
        let picks = prop::collection::vec(0..POOL.len(), 0..3);
        prop_oneof![
            picks.clone().prop_map(Op::Subscribe),
            picks.clone().prop_map(Op::Unsubscribe),
            (0..IDS.len(), picks.clone()).prop_map(|(i, l)| Op::Push(i, l)),
            (0..IDS.len(), picks).prop_map(|(i, l)| Op::RemovePush(i, l)),
            (0..IDS.len()).prop_map(Op::RemoveId),
            (0..IDS.len()).prop_map(Op::Evict),
        ]
    }

    proptest! {
        #[test]
        fn cache_tracks_subscribed_labels(ops in prop::collection::vec(op(), 1..40)) {
            let mut state = SyncState::new(LabelScheme::Context);
            for op in ops {
                match op {
                    Op::Subscribe(l) => {
                        let _ = state.subscribe(labels(&pick(&l)));
                    }
                    Op::Unsubscribe(l) => {
                        let before = state.registry().clone();
                        if state.unsubscribe(labels(&pick(&l))).is_err() {
                            prop_assert_eq!(state.registry(), &before);
                        }
                    }
                    Op::Push(i, l) => {
                        let _ = state.install(object(IDS[i], &pick(&l)));
                    }
                    Op::RemovePush(i, l) => {
                        let _ = state.remove(RemoveTarget::Object(object(IDS[i], &pick(&l))));
                    }
                    Op::RemoveId(i) => {
                        let _ = state.remove(RemoveTarget::Id(ObjectId::from(IDS[i])));
                    }
                    Op::Evict(i) => {
                        let _ = state.evict(&ObjectId::from(IDS[i]));
                    }
                }
                state.assert_consistent();
            }
        }

        #[test]
        fn refcount_follows_subscribe_balance(n in 1usize..6, m in 0usize..6) {
            let mut state = SyncState::new(LabelScheme::Context);
            for _ in 0..n {
                let _ = state.subscribe(labels(&["t"]));
            }
            let mut released = 0;
            for _ in 0..m {
                if state.unsubscribe(labels(&["t"])).is_ok() {
                    released += 1;
                }
            }
            prop_assert_eq!(released, m.min(n));
            prop_assert_eq!(state.registry().refcount(&Label::from("t")), n - m.min(n));
            prop_assert_eq!(state.registry().is_subscribed(&Label::from("t")), m < n);
        }
    }
}
