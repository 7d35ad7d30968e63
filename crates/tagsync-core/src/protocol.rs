//! JSON wire protocol.
//!
//! Every frame is a single JSON object. Outbound frames carry a
//! `correlationId` and exactly one request kind:
//!
//! ```json
//! {"correlationId": "…", "update": {…}}
//! {"correlationId": "…", "remove": "<id>"}
//! {"correlationId": "…", "subscribe": ["news"]}
//! {"correlationId": "…", "unsubscribe": ["news"]}
//! {"correlationId": "…", "ls": null}
//! ```
//!
//! Inbound frames with a `correlationId` are replies (`reply` or `error`).
//! Frames without one are pushes: `update`, `remove`, or an out-of-band `error`.

use serde_json::{Map, Value};

use crate::errors::{Result, SyncError};
use crate::ids::{CorrelationId, Label, ObjectId};
use crate::object::Object;

/// Field carrying the correlation id on both directions.
pub const CORRELATION_FIELD: &str = "correlationId";

/// An outbound request, before a correlation id is stamped on it.
#[derive(Clone, Debug, PartialEq)]
pub enum Request {
    /// Create or replace an object.
    Update(Object),
    /// Delete an object by id.
    Remove(ObjectId),
    /// Start receiving objects carrying these labels.
    Subscribe(Vec<Label>),
    /// Stop receiving objects carrying these labels.
    Unsubscribe(Vec<Label>),
    /// List the labels the server holds for this connection.
    Ls,
}

impl Request {
    /// The wire key naming this request kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Update(_) => "update",
            Self::Remove(_) => "remove",
            Self::Subscribe(_) => "subscribe",
            Self::Unsubscribe(_) => "unsubscribe",
            Self::Ls => "ls",
        }
    }

    fn payload(&self) -> Value {
        match self {
            Self::Update(object) => Value::Object(object.as_map().clone()),
            Self::Remove(id) => Value::String(id.to_string()),
            Self::Subscribe(labels) | Self::Unsubscribe(labels) => Value::Array(
                labels
                    .iter()
                    .map(|l| Value::String(l.to_string()))
                    .collect(),
            ),
            Self::Ls => Value::Null,
        }
    }

    /// Build the JSON frame for this request under `correlation_id`.
    #[must_use]
    pub fn to_frame(&self, correlation_id: &CorrelationId) -> Value {
        let mut frame = Map::with_capacity(2);
        let _ = frame.insert(
            CORRELATION_FIELD.to_owned(),
            Value::String(correlation_id.to_string()),
        );
        let _ = frame.insert(self.kind().to_owned(), self.payload());
        Value::Object(frame)
    }

    /// Serialize the frame for this request to text.
    pub fn encode(&self, correlation_id: &CorrelationId) -> Result<String> {
        Ok(serde_json::to_string(&self.to_frame(correlation_id))?)
    }
}

/// What an inbound `remove` push names.
#[derive(Clone, Debug, PartialEq)]
pub enum RemoveTarget {
    /// The object as it now stands, with the labels it still carries.
    Object(Object),
    /// A bare id: the object leaves every label.
    Id(ObjectId),
}

impl RemoveTarget {
    /// The id of the removed object, if it has one.
    #[must_use]
    pub fn id(&self) -> Option<ObjectId> {
        match self {
            Self::Object(object) => object.id(),
            Self::Id(id) => Some(id.clone()),
        }
    }
}

/// A classified inbound frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Inbound {
    /// Answer to a correlated request: `Ok(reply)` or `Err(error payload)`.
    Reply {
        /// The request this answers.
        correlation_id: CorrelationId,
        /// The reply payload, or the error payload on rejection.
        outcome: std::result::Result<Value, Value>,
    },
    /// An object was created or changed.
    Update(Object),
    /// An object left some or all of its labels.
    Remove(RemoveTarget),
    /// An out-of-band error not tied to a request.
    Error(Value),
}

impl Inbound {
    /// Parse and classify a text frame.
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    /// Classify an already-parsed frame.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(mut frame) = value else {
            return Err(SyncError::Protocol("frame is not a JSON object".into()));
        };

        if let Some(id) = frame.remove(CORRELATION_FIELD) {
            let Value::String(id) = id else {
                return Err(SyncError::Protocol("correlationId is not a string".into()));
            };
            let outcome = match frame.remove("error") {
                Some(error) if !error.is_null() => Err(error),
                _ => Ok(frame.remove("reply").unwrap_or(Value::Null)),
            };
            return Ok(Self::Reply {
                correlation_id: CorrelationId::from(id),
                outcome,
            });
        }

        if let Some(update) = frame.remove("update") {
            return Ok(Self::Update(Object::from_value(update)?));
        }

        if let Some(remove) = frame.remove("remove") {
            let target = match remove {
                Value::String(id) if !id.is_empty() => RemoveTarget::Id(ObjectId::from(id)),
                Value::Object(map) => RemoveTarget::Object(Object::from_map(map)),
                _ => {
                    return Err(SyncError::Protocol(
                        "remove payload must be an object or an id".into(),
                    ));
                }
            };
            return Ok(Self::Remove(target));
        }

        if let Some(error) = frame.remove("error") {
            return Ok(Self::Error(error));
        }

        let keys: Vec<&str> = frame.keys().map(String::as_str).collect();
        Err(SyncError::Protocol(format!(
            "unrecognized frame with keys {keys:?}"
        )))
    }
}

/// Whether an error payload signals that the session is no longer authorized.
///
/// Looks at a bare string payload, or the `reason`, `code`, and `message`
/// fields of an object payload.
#[must_use]
pub fn is_authorization_error(payload: &Value) -> bool {
    fn matches(text: &str) -> bool {
        let lower = text.to_ascii_lowercase();
        lower.contains("authoriz") || lower == "forbidden"
    }

    match payload {
        Value::String(text) => matches(text),
        Value::Object(map) => ["reason", "code", "message"]
            .iter()
            .filter_map(|field| map.get(*field).and_then(Value::as_str))
            .any(matches),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn cid() -> CorrelationId {
        CorrelationId::from("c1")
    }

    #[test]
    fn update_frame_shape() {
        let object = Object::from_value(json!({"id": "a1", "context": ["x"]})).unwrap();
        let frame = Request::Update(object).to_frame(&cid());
        assert_eq!(
            frame,
            json!({"correlationId": "c1", "update": {"id": "a1", "context": ["x"]}})
        );
    }

    #[test]
    fn remove_frame_carries_bare_id() {
        let frame = Request::Remove(ObjectId::from("a1")).to_frame(&cid());
        assert_eq!(frame, json!({"correlationId": "c1", "remove": "a1"}));
    }

    #[test]
    fn subscription_frames_carry_label_arrays() {
        let labels = vec![Label::from("a"), Label::from("b")];
        let sub = Request::Subscribe(labels.clone()).to_frame(&cid());
        let unsub = Request::Unsubscribe(labels).to_frame(&cid());
        assert_eq!(sub["subscribe"], json!(["a", "b"]));
        assert_eq!(unsub["unsubscribe"], json!(["a", "b"]));
    }

    #[test]
    fn ls_frame_carries_null() {
        let text = Request::Ls.encode(&cid()).unwrap();
        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, json!({"correlationId": "c1", "ls": null}));
    }

    #[test]
    fn parse_reply() {
        let inbound = Inbound::parse(r#"{"correlationId":"c1","reply":["news"]}"#).unwrap();
        assert_eq!(
            inbound,
            Inbound::Reply {
                correlation_id: cid(),
                outcome: Ok(json!(["news"])),
            }
        );
    }

    #[test]
    fn parse_reply_without_payload_is_null() {
        let inbound = Inbound::parse(r#"{"correlationId":"c1"}"#).unwrap();
        assert_matches!(inbound, Inbound::Reply { outcome: Ok(Value::Null), .. });
    }

    #[test]
    fn parse_correlated_error() {
        let inbound = Inbound::parse(r#"{"correlationId":"c1","error":"denied"}"#).unwrap();
        assert_matches!(inbound, Inbound::Reply { outcome: Err(ref e), .. } if e == "denied");
    }

    #[test]
    fn correlated_frame_is_always_a_reply() {
        let inbound =
            Inbound::parse(r#"{"correlationId":"c1","update":{"id":"a1"}}"#).unwrap();
        assert_matches!(inbound, Inbound::Reply { .. });
    }

    #[test]
    fn parse_update_push() {
        let inbound = Inbound::parse(r#"{"update":{"id":"a1","context":["news"]}}"#).unwrap();
        let Inbound::Update(object) = inbound else {
            panic!("expected update");
        };
        assert_eq!(object.id().unwrap().as_str(), "a1");
    }

    #[test]
    fn parse_remove_push_object_or_id() {
        let by_object = Inbound::parse(r#"{"remove":{"id":"a1","context":[]}}"#).unwrap();
        assert_matches!(by_object, Inbound::Remove(RemoveTarget::Object(_)));
        let by_id = Inbound::parse(r#"{"remove":"a1"}"#).unwrap();
        assert_matches!(by_id, Inbound::Remove(RemoveTarget::Id(ref id)) if id.as_str() == "a1");
    }

    #[test]
    fn parse_unsolicited_error() {
        let inbound = Inbound::parse(r#"{"error":{"reason":"authorization"}}"#).unwrap();
        assert_matches!(inbound, Inbound::Error(_));
    }

    #[test]
    fn parse_rejects_malformed_frames() {
        assert_matches!(Inbound::parse("not json"), Err(SyncError::Json(_)));
        assert_matches!(Inbound::parse("[1]"), Err(SyncError::Protocol(_)));
        assert_matches!(Inbound::parse(r#"{"hello":1}"#), Err(SyncError::Protocol(_)));
        assert_matches!(
            Inbound::parse(r#"{"correlationId":7,"reply":1}"#),
            Err(SyncError::Protocol(_))
        );
        assert_matches!(Inbound::parse(r#"{"update":[1]}"#), Err(SyncError::Protocol(_)));
        assert_matches!(Inbound::parse(r#"{"remove":5}"#), Err(SyncError::Protocol(_)));
    }

    #[test]
    fn authorization_error_detection() {
        assert!(is_authorization_error(&json!("authorization")));
        assert!(is_authorization_error(&json!({"reason": "Authorization revoked"})));
        assert!(is_authorization_error(&json!({"code": "UNAUTHORIZED"})));
        assert!(is_authorization_error(&json!({"message": "forbidden"})));
        assert!(!is_authorization_error(&json!({"reason": "rate limited"})));
        assert!(!is_authorization_error(&json!(42)));
    }
}
