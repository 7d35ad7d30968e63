//! The synchronized object record.
//!
//! An [`Object`] is a JSON map with three identity-bearing fields: `id`,
//! `owner`, and a label list (`context` or `tags`, see [`LabelScheme`]).
//! Everything else is application payload and opaque to the engine.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{Result, SyncError};
use crate::ids::{ActorId, Label, ObjectId, derive_object_id};

/// Field holding the object id.
pub const ID_FIELD: &str = "id";
/// Field holding the owning actor id.
pub const OWNER_FIELD: &str = "owner";
/// Field holding the optional owner-scoped key.
pub const KEY_FIELD: &str = "key";

/// How an object declares the labels it is filed under.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelScheme {
    /// Labels live in `context`, and every object is also labelled by its own id.
    #[default]
    Context,
    /// Labels live in `tags`.
    Tags,
}

impl LabelScheme {
    /// Name of the root field holding the label list.
    #[must_use]
    pub const fn field(self) -> &'static str {
        match self {
            Self::Context => "context",
            Self::Tags => "tags",
        }
    }

    /// Whether an object's own id counts as one of its labels.
    #[must_use]
    pub const fn includes_self(self) -> bool {
        matches!(self, Self::Context)
    }

    /// Whether deleting this root field deletes the whole object.
    #[must_use]
    pub fn is_reserved(self, field: &str) -> bool {
        field == OWNER_FIELD || field == KEY_FIELD || field == self.field()
    }

    /// Every label the object is matched by under this scheme.
    #[must_use]
    pub fn membership_labels(self, object: &Object) -> Vec<Label> {
        let mut labels = object.labels(self);
        if self.includes_self() {
            if let Some(id) = object.id() {
                let own = Label::from(id);
                if !labels.contains(&own) {
                    labels.push(own);
                }
            }
        }
        labels
    }
}

impl fmt::Display for LabelScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.field())
    }
}

/// One step into a nested JSON value.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PathSegment {
    /// A map key.
    Key(String),
    /// An array index.
    Index(usize),
}

impl From<&str> for PathSegment {
    fn from(key: &str) -> Self {
        Self::Key(key.to_owned())
    }
}

impl From<String> for PathSegment {
    fn from(key: String) -> Self {
        Self::Key(key)
    }
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

/// Render a path as `a.b[2].c` for error messages and logs.
#[must_use]
pub fn render_path(path: &[PathSegment]) -> String {
    let mut out = String::new();
    for segment in path {
        match segment {
            PathSegment::Key(key) => {
                if !out.is_empty() {
                    out.push('.');
                }
                out.push_str(key);
            }
            PathSegment::Index(index) => {
                out.push('[');
                out.push_str(&index.to_string());
                out.push(']');
            }
        }
    }
    out
}

fn invalid_path(path: &[PathSegment]) -> SyncError {
    SyncError::InvalidPath {
        path: render_path(path),
    }
}

/// A synchronized object: string keys mapped to JSON values.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Object(Map<String, Value>);

impl Object {
    /// Create an empty object.
    #[must_use]
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Wrap an existing JSON map.
    #[must_use]
    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Convert a JSON value, which must be an object.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(SyncError::Protocol(format!(
                "expected an object, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Borrow the underlying map.
    #[must_use]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Consume self and return the underlying map.
    #[must_use]
    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    /// The object id, when present as a non-empty string.
    #[must_use]
    pub fn id(&self) -> Option<ObjectId> {
        non_empty_str(self.0.get(ID_FIELD)).map(ObjectId::from)
    }

    /// Set the object id.
    pub fn set_id(&mut self, id: &ObjectId) {
        let _ = self
            .0
            .insert(ID_FIELD.to_owned(), Value::String(id.to_string()));
    }

    /// The owning actor, when present as a non-empty string.
    #[must_use]
    pub fn owner(&self) -> Option<ActorId> {
        non_empty_str(self.0.get(OWNER_FIELD)).map(ActorId::from)
    }

    /// Set the owning actor.
    pub fn set_owner(&mut self, owner: &ActorId) {
        let _ = self
            .0
            .insert(OWNER_FIELD.to_owned(), Value::String(owner.to_string()));
    }

    /// The owner-scoped key, when present as a non-empty string.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        non_empty_str(self.0.get(KEY_FIELD))
    }

    /// Declared labels in order, without blanks or duplicates.
    #[must_use]
    pub fn labels(&self, scheme: LabelScheme) -> Vec<Label> {
        let mut labels: Vec<Label> = Vec::new();
        let Some(Value::Array(items)) = self.0.get(scheme.field()) else {
            return labels;
        };
        for label in items.iter().filter_map(Value::as_str).map(Label::from) {
            if !label.is_blank() && !labels.contains(&label) {
                labels.push(label);
            }
        }
        labels
    }

    /// Read a root field.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Write a root field, returning the previous value.
    pub fn insert(&mut self, field: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(field.into(), value)
    }

    /// Read the value at `path`. An empty path is not addressable.
    #[must_use]
    pub fn get_path(&self, path: &[PathSegment]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        let PathSegment::Key(key) = first else {
            return None;
        };
        let mut current = self.0.get(key)?;
        for segment in rest {
            current = match (segment, current) {
                (PathSegment::Key(key), Value::Object(map)) => map.get(key)?,
                (PathSegment::Index(index), Value::Array(items)) => items.get(*index)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Write `value` at `path`.
    ///
    /// Every container on the way must already exist. An array index equal to
    /// the array length appends.
    pub fn set_path(&mut self, path: &[PathSegment], value: Value) -> Result<()> {
        let (last, parents) = path.split_last().ok_or_else(|| invalid_path(path))?;
        let container = self.container_mut(parents).ok_or_else(|| invalid_path(path))?;
        match (last, container) {
            (PathSegment::Key(key), Container::Map(map)) => {
                let _ = map.insert(key.clone(), value);
                Ok(())
            }
            (PathSegment::Index(index), Container::Array(items)) => {
                if *index < items.len() {
                    items[*index] = value;
                    Ok(())
                } else if *index == items.len() {
                    items.push(value);
                    Ok(())
                } else {
                    Err(invalid_path(path))
                }
            }
            _ => Err(invalid_path(path)),
        }
    }

    /// Remove the value at `path`, returning it. Array removal shifts later
    /// elements down.
    pub fn remove_path(&mut self, path: &[PathSegment]) -> Result<Option<Value>> {
        let (last, parents) = path.split_last().ok_or_else(|| invalid_path(path))?;
        let container = self.container_mut(parents).ok_or_else(|| invalid_path(path))?;
        match (last, container) {
            (PathSegment::Key(key), Container::Map(map)) => Ok(map.remove(key)),
            (PathSegment::Index(index), Container::Array(items)) => {
                if *index < items.len() {
                    Ok(Some(items.remove(*index)))
                } else {
                    Ok(None)
                }
            }
            _ => Err(invalid_path(path)),
        }
    }

    fn container_mut(&mut self, path: &[PathSegment]) -> Option<Container<'_>> {
        let Some((first, rest)) = path.split_first() else {
            return Some(Container::Map(&mut self.0));
        };
        let PathSegment::Key(key) = first else {
            return None;
        };
        let mut current = self.0.get_mut(key)?;
        for segment in rest {
            current = match (segment, current) {
                (PathSegment::Key(key), Value::Object(map)) => map.get_mut(key)?,
                (PathSegment::Index(index), Value::Array(items)) => items.get_mut(*index)?,
                _ => return None,
            };
        }
        match current {
            Value::Object(map) => Some(Container::Map(map)),
            Value::Array(items) => Some(Container::Array(items)),
            _ => None,
        }
    }
}

enum Container<'a> {
    Map(&'a mut Map<String, Value>),
    Array(&'a mut Vec<Value>),
}

impl From<Object> for Value {
    fn from(object: Object) -> Self {
        Value::Object(object.0)
    }
}

impl TryFrom<Value> for Object {
    type Error = SyncError;

    fn try_from(value: Value) -> Result<Self> {
        Self::from_value(value)
    }
}

/// Resolve the id of an object about to be written locally.
///
/// Keeps an existing `id`. Otherwise fills a missing `owner` from `actor`,
/// then derives the id from owner and `key` when a key is set, or generates
/// a random one. An object that ends up without an owner is an identity
/// error and must not be sent.
pub fn resolve_identity(object: &mut Object, actor: Option<&ActorId>) -> Result<ObjectId> {
    if let Some(id) = object.id() {
        return Ok(id);
    }
    if object.owner().is_none() {
        if let Some(actor) = actor {
            object.set_owner(actor);
        }
    }
    let owner = object
        .owner()
        .ok_or_else(|| SyncError::identity("object has no owner and no actor is logged in"))?;
    let id = match object.key() {
        Some(key) => derive_object_id(&owner, key),
        None => ObjectId::new(),
    };
    object.set_id(&id);
    Ok(id)
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;
    use serde_json::json;

    fn obj(value: Value) -> Object {
        Object::from_value(value).unwrap()
    }

    fn k(key: &str) -> PathSegment {
        PathSegment::Key(key.to_owned())
    }

    fn i(index: usize) -> PathSegment {
        PathSegment::Index(index)
    }

    #[test]
    fn identity_accessors() {
        let o = obj(json!({"id": "a1", "owner": "u1", "key": "k", "context": ["news"]}));
        assert_eq!(o.id().unwrap().as_str(), "a1");
        assert_eq!(o.owner().unwrap().as_str(), "u1");
        assert_eq!(o.key(), Some("k"));
    }

    #[test]
    fn empty_strings_are_absent() {
        let o = obj(json!({"id": "", "owner": ""}));
        assert!(o.id().is_none());
        assert!(o.owner().is_none());
    }

    #[test]
    fn labels_skip_blanks_duplicates_and_non_strings() {
        let o = obj(json!({"context": ["a", "", "b", "a", 3, null]}));
        let labels = o.labels(LabelScheme::Context);
        assert_eq!(labels, vec![Label::from("a"), Label::from("b")]);
    }

    #[test]
    fn labels_read_scheme_field() {
        let o = obj(json!({"context": ["c"], "tags": ["t"]}));
        assert_eq!(o.labels(LabelScheme::Tags), vec![Label::from("t")]);
        assert_eq!(o.labels(LabelScheme::Context), vec![Label::from("c")]);
    }

    #[test]
    fn context_scheme_includes_own_id() {
        let o = obj(json!({"id": "a1", "context": ["news"]}));
        let labels = LabelScheme::Context.membership_labels(&o);
        assert_eq!(labels, vec![Label::from("news"), Label::from("a1")]);
        let tags = LabelScheme::Tags.membership_labels(&o);
        assert!(tags.is_empty());
    }

    #[test]
    fn reserved_fields() {
        assert!(LabelScheme::Context.is_reserved("owner"));
        assert!(LabelScheme::Context.is_reserved("key"));
        assert!(LabelScheme::Context.is_reserved("context"));
        assert!(!LabelScheme::Context.is_reserved("tags"));
        assert!(LabelScheme::Tags.is_reserved("tags"));
        assert!(!LabelScheme::Tags.is_reserved("title"));
    }

    #[test]
    fn from_value_rejects_non_objects() {
        assert_matches!(Object::from_value(json!([1])), Err(SyncError::Protocol(_)));
    }

    #[test]
    fn get_path_walks_nested_values() {
        let o = obj(json!({"meta": {"tags": ["x", {"deep": 1}]}}));
        let p = [k("meta"), k("tags"), i(1), k("deep")];
        assert_eq!(o.get_path(&p), Some(&json!(1)));
        assert!(o.get_path(&[]).is_none());
        assert!(o.get_path(&[k("missing")]).is_none());
    }

    #[test]
    fn set_path_replaces_and_appends() {
        let mut o = obj(json!({"list": [1, 2], "meta": {}}));
        o.set_path(&[k("list"), i(0)], json!(10)).unwrap();
        o.set_path(&[k("list"), i(2)], json!(3)).unwrap();
        o.set_path(&[k("meta"), k("a")], json!("b")).unwrap();
        assert_eq!(Value::from(o), json!({"list": [10, 2, 3], "meta": {"a": "b"}}));
    }

    #[test]
    fn set_path_requires_existing_parents() {
        let mut o = obj(json!({"list": [1]}));
        let err = o
            .set_path(&[k("missing"), k("x")], json!(1))
            .unwrap_err();
        assert_matches!(err, SyncError::InvalidPath { ref path } if path == "missing.x");
        assert!(o.set_path(&[k("list"), i(5)], json!(1)).is_err());
        assert!(o.set_path(&[], json!(1)).is_err());
    }

    #[test]
    fn remove_path_from_map_and_array() {
        let mut o = obj(json!({"a": 1, "list": ["x", "y", "z"]}));
        assert_eq!(o.remove_path(&[k("a")]).unwrap(), Some(json!(1)));
        assert_eq!(
            o.remove_path(&[k("list"), i(1)]).unwrap(),
            Some(json!("y"))
        );
        assert_eq!(o.remove_path(&[k("list"), i(9)]).unwrap(), None);
        assert_eq!(Value::from(o), json!({"list": ["x", "z"]}));
    }

    #[test]
    fn render_path_formats_segments() {
        let p = [k("a"), i(2), k("b")];
        assert_eq!(render_path(&p), "a[2].b");
    }

    #[test]
    fn resolve_identity_keeps_existing_id() {
        let mut o = obj(json!({"id": "a1"}));
        assert_eq!(resolve_identity(&mut o, None).unwrap().as_str(), "a1");
    }

    #[test]
    fn resolve_identity_assigns_owner_and_random_id() {
        let mut o = obj(json!({"context": ["x"]}));
        let actor = ActorId::from("u1");
        let id = resolve_identity(&mut o, Some(&actor)).unwrap();
        assert_eq!(o.id(), Some(id));
        assert_eq!(o.owner(), Some(actor));
    }

    #[test]
    fn resolve_identity_derives_from_key() {
        let mut o = obj(json!({"owner": "u1", "key": "profile"}));
        let id = resolve_identity(&mut o, None).unwrap();
        assert_eq!(id, derive_object_id(&ActorId::from("u1"), "profile"));
    }

    #[test]
    fn resolve_identity_without_owner_fails() {
        let mut o = obj(json!({"key": "profile"}));
        assert_matches!(
            resolve_identity(&mut o, None),
            Err(SyncError::Identity { .. })
        );
        assert!(o.id().is_none());
    }

    proptest! {
        #[test]
        fn nested_write_then_delete_leaves_object_unchanged(
            field in "[a-z]{1,8}",
            value in any::<i64>(),
        ) {
            prop_assume!(field != "list");
            let original = obj(json!({"id": "a1", "data": {"list": [1, 2]}}));
            let path = [k("data"), k(&field)];

            let mut edited = original.clone();
            edited.set_path(&path, json!(value)).unwrap();
            prop_assert_eq!(edited.get_path(&path), Some(&json!(value)));
            prop_assert_eq!(edited.remove_path(&path).unwrap(), Some(json!(value)));
            prop_assert_eq!(edited, original);
        }

        #[test]
        fn appending_at_array_length_extends_by_one(len in 0usize..6, value in any::<bool>()) {
            let items: Vec<usize> = (0..len).collect();
            let mut o = obj(json!({"id": "a1", "items": items}));
            o.set_path(&[k("items"), i(len)], json!(value)).unwrap();
            prop_assert_eq!(o.get_path(&[k("items"), i(len)]), Some(&json!(value)));
            prop_assert!(o.set_path(&[k("items"), i(len + 2)], json!(value)).is_err());
        }

        #[test]
        fn keyed_identity_ignores_payload_and_owner_source(
            owner in "[a-z0-9]{1,12}",
            key in "[a-z0-9]{1,12}",
            title in "\\PC*",
        ) {
            let actor = ActorId::from(owner.as_str());
            let mut explicit = obj(json!({"owner": owner, "key": key}));
            let mut from_session = obj(json!({"key": key, "title": title, "context": ["x"]}));

            let a = resolve_identity(&mut explicit, None).unwrap();
            let b = resolve_identity(&mut from_session, Some(&actor)).unwrap();
            prop_assert_eq!(&a, &b);
            prop_assert_eq!(a, derive_object_id(&actor, &key));
        }
    }
}
