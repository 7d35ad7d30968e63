//! Reference-counted label subscriptions.
//!
//! A label is tracked while at least one caller holds a subscription to it.
//! Each record also lists the ids of cached objects believed to carry the
//! label; [`crate::cache::SyncState`] keeps those lists in step with the
//! cache.

use std::collections::{BTreeMap, BTreeSet};

use tagsync_core::{Label, ObjectId, Result, SyncError};

/// One tracked label.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Subscription {
    refcount: usize,
    matched: BTreeSet<ObjectId>,
}

impl Subscription {
    /// How many callers hold this subscription.
    pub fn refcount(&self) -> usize {
        self.refcount
    }

    /// Ids of cached objects matched by this label.
    pub fn matched(&self) -> &BTreeSet<ObjectId> {
        &self.matched
    }
}

/// Label → subscription bookkeeping.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubscriptionRegistry {
    subscriptions: BTreeMap<Label, Subscription>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a reference on each label. Blank labels are skipped.
    ///
    /// Returns the labels that were not tracked before, in first-seen order.
    /// Those are the ones the server must be told about.
    pub fn subscribe(&mut self, labels: impl IntoIterator<Item = Label>) -> Vec<Label> {
        let mut fresh = Vec::new();
        for label in labels.into_iter().filter(|l| !l.is_blank()) {
            let subscription = self.subscriptions.entry(label.clone()).or_default();
            if subscription.refcount == 0 {
                fresh.push(label);
            }
            subscription.refcount += 1;
        }
        fresh
    }

    /// Release a reference on each label. Blank labels are skipped.
    ///
    /// Labels whose count reaches zero are removed and returned together with
    /// their matched ids. If any label is not subscribed (or would be
    /// released more times than it is held) nothing changes and
    /// [`SyncError::NotSubscribed`] names the first offender.
    pub fn unsubscribe(
        &mut self,
        labels: impl IntoIterator<Item = Label>,
    ) -> Result<Vec<(Label, Subscription)>> {
        let mut releases: BTreeMap<Label, usize> = BTreeMap::new();
        let mut order = Vec::new();
        for label in labels.into_iter().filter(|l| !l.is_blank()) {
            let count = releases.entry(label.clone()).or_insert(0);
            if *count == 0 {
                order.push(label.clone());
            }
            *count += 1;
            if *count > self.refcount(&label) {
                return Err(SyncError::NotSubscribed { label });
            }
        }

        let mut removed = Vec::new();
        for label in order {
            let release = releases[&label];
            let Some(subscription) = self.subscriptions.get_mut(&label) else {
                continue;
            };
            subscription.refcount -= release;
            if subscription.refcount == 0 {
                if let Some(subscription) = self.subscriptions.remove(&label) {
                    removed.push((label, subscription));
                }
            }
        }
        Ok(removed)
    }

    /// Reference count for `label`; zero when not subscribed.
    pub fn refcount(&self, label: &Label) -> usize {
        self.subscriptions.get(label).map_or(0, |s| s.refcount)
    }

    /// Whether `label` has an active subscription.
    pub fn is_subscribed(&self, label: &Label) -> bool {
        self.subscriptions.contains_key(label)
    }

    /// Every subscribed label, sorted.
    pub fn labels(&self) -> Vec<Label> {
        self.subscriptions.keys().cloned().collect()
    }

    /// The subscription record for `label`.
    pub fn get(&self, label: &Label) -> Option<&Subscription> {
        self.subscriptions.get(label)
    }

    /// Number of subscribed labels.
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    /// Whether no label is subscribed.
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Make `id`'s membership exactly `labels` (restricted to subscribed
    /// ones). Returns the subscribed labels it is now listed under.
    pub(crate) fn set_membership(&mut self, id: &ObjectId, labels: &[Label]) -> Vec<Label> {
        let mut listed = Vec::new();
        for (label, subscription) in &mut self.subscriptions {
            if labels.contains(label) {
                let _ = subscription.matched.insert(id.clone());
                listed.push(label.clone());
            } else {
                let _ = subscription.matched.remove(id);
            }
        }
        listed
    }

    /// Remove `id` from every label not in `keep`. Returns whether any
    /// subscription still lists it.
    pub(crate) fn retain_membership(&mut self, id: &ObjectId, keep: &[Label]) -> bool {
        let mut still_listed = false;
        for (label, subscription) in &mut self.subscriptions {
            if keep.contains(label) {
                still_listed |= subscription.matched.contains(id);
            } else {
                let _ = subscription.matched.remove(id);
            }
        }
        still_listed
    }

    /// Add `id` to `label`'s matches if `label` is subscribed.
    pub(crate) fn add_match(&mut self, label: &Label, id: &ObjectId) {
        if let Some(subscription) = self.subscriptions.get_mut(label) {
            let _ = subscription.matched.insert(id.clone());
        }
    }

    /// Whether any subscription lists `id`.
    pub fn is_matched(&self, id: &ObjectId) -> bool {
        self.subscriptions.values().any(|s| s.matched.contains(id))
    }

    /// Forget every match, keeping the subscriptions themselves.
    pub(crate) fn clear_matches(&mut self) {
        for subscription in self.subscriptions.values_mut() {
            subscription.matched.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn labels(names: &[&str]) -> Vec<Label> {
        names.iter().map(|n| Label::from(*n)).collect()
    }

    #[test]
    fn first_subscribe_reports_new_labels() {
        let mut registry = SubscriptionRegistry::new();
        let fresh = registry.subscribe(labels(&["a", "b"]));
        assert_eq!(fresh, labels(&["a", "b"]));
        assert_eq!(registry.refcount(&Label::from("a")), 1);
    }

    #[test]
    fn repeat_subscribe_only_counts() {
        let mut registry = SubscriptionRegistry::new();
        let _ = registry.subscribe(labels(&["a"]));
        let fresh = registry.subscribe(labels(&["a", "b"]));
        assert_eq!(fresh, labels(&["b"]));
        assert_eq!(registry.refcount(&Label::from("a")), 2);
    }

    #[test]
    fn duplicate_labels_in_one_call_count_twice() {
        let mut registry = SubscriptionRegistry::new();
        let fresh = registry.subscribe(labels(&["a", "a"]));
        assert_eq!(fresh, labels(&["a"]));
        assert_eq!(registry.refcount(&Label::from("a")), 2);
    }

    #[test]
    fn blank_labels_are_skipped() {
        let mut registry = SubscriptionRegistry::new();
        let fresh = registry.subscribe(labels(&["", " ", "a"]));
        assert_eq!(fresh, labels(&["a"]));
        assert_eq!(registry.len(), 1);
        assert!(registry.unsubscribe(labels(&[""])).unwrap().is_empty());
    }

    #[test]
    fn refcount_reaches_zero_on_last_unsubscribe() {
        let mut registry = SubscriptionRegistry::new();
        let _ = registry.subscribe(labels(&["t"]));
        let _ = registry.subscribe(labels(&["t"]));

        let removed = registry.unsubscribe(labels(&["t"])).unwrap();
        assert!(removed.is_empty());
        assert!(registry.is_subscribed(&Label::from("t")));

        let removed = registry.unsubscribe(labels(&["t"])).unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].0, Label::from("t"));
        assert!(!registry.is_subscribed(&Label::from("t")));
    }

    #[test]
    fn unsubscribe_unknown_label_is_an_error() {
        let mut registry = SubscriptionRegistry::new();
        let _ = registry.subscribe(labels(&["a"]));
        let err = registry.unsubscribe(labels(&["a", "zzz"])).unwrap_err();
        assert_matches!(err, SyncError::NotSubscribed { ref label } if label.as_str() == "zzz");
        // Nothing was released.
        assert_eq!(registry.refcount(&Label::from("a")), 1);
    }

    #[test]
    fn over_release_in_one_call_is_an_error() {
        let mut registry = SubscriptionRegistry::new();
        let _ = registry.subscribe(labels(&["a"]));
        assert!(registry.unsubscribe(labels(&["a", "a"])).is_err());
        assert_eq!(registry.refcount(&Label::from("a")), 1);
    }

    #[test]
    fn removed_subscription_carries_matches() {
        let mut registry = SubscriptionRegistry::new();
        let _ = registry.subscribe(labels(&["a"]));
        let id = ObjectId::from("o1");
        registry.add_match(&Label::from("a"), &id);
        let removed = registry.unsubscribe(labels(&["a"])).unwrap();
        assert!(removed[0].1.matched().contains(&id));
    }

    #[test]
    fn set_membership_adds_and_prunes() {
        let mut registry = SubscriptionRegistry::new();
        let _ = registry.subscribe(labels(&["a", "b", "c"]));
        let id = ObjectId::from("o1");

        let listed = registry.set_membership(&id, &labels(&["a", "b", "x"]));
        assert_eq!(listed, labels(&["a", "b"]));

        let listed = registry.set_membership(&id, &labels(&["c"]));
        assert_eq!(listed, labels(&["c"]));
        assert!(!registry.get(&Label::from("a")).unwrap().matched().contains(&id));

        assert!(registry.set_membership(&id, &[]).is_empty());
        assert!(!registry.is_matched(&id));
    }

    #[test]
    fn retain_membership_reports_survivors() {
        let mut registry = SubscriptionRegistry::new();
        let _ = registry.subscribe(labels(&["a", "b"]));
        let id = ObjectId::from("o1");
        let _ = registry.set_membership(&id, &labels(&["a", "b"]));

        assert!(registry.retain_membership(&id, &labels(&["b"])));
        assert!(!registry.get(&Label::from("a")).unwrap().matched().contains(&id));
        assert!(!registry.retain_membership(&id, &[]));
    }

    #[test]
    fn clear_matches_keeps_subscriptions() {
        let mut registry = SubscriptionRegistry::new();
        let _ = registry.subscribe(labels(&["a"]));
        registry.add_match(&Label::from("a"), &ObjectId::from("o1"));
        registry.clear_matches();
        assert!(registry.is_subscribed(&Label::from("a")));
        assert!(registry.get(&Label::from("a")).unwrap().matched().is_empty());
    }
}
