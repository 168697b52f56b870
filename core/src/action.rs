//! Actions: the notifications flowing through a store's dispatch pipeline.
//!
//! An [`Action`] is a kind string plus a JSON payload. Kinds follow the
//! `"<module>/<name>"` convention (e.g. `"todos/readAllSuccess"`), which lets
//! task watchers match on them and lets the HTTP-status observability signal
//! (`"sagaApi/<status>"`) share the same pipe as module actions.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Namespace used for the generic HTTP-status notifications.
pub const STATUS_NAMESPACE: &str = "sagaApi";

/// A notification posted into the store's dispatch pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Action type, e.g. `"todos/readAll"`
    #[serde(rename = "type")]
    pub kind: String,

    /// Opaque payload
    #[serde(default)]
    pub payload: Value,
}

impl Action {
    /// Create an action with the given kind and payload.
    #[must_use]
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }

    /// Create an action with a `null` payload.
    #[must_use]
    pub fn bare(kind: impl Into<String>) -> Self {
        Self::new(kind, Value::Null)
    }

    /// Build the status-tagged notification for a failed HTTP response.
    ///
    /// The kind is `"sagaApi/<status>"` and the payload is the raw response object.
    #[must_use]
    pub fn http_status(status: u16, response: Value) -> Self {
        Self::new(status_kind(status), response)
    }

    /// Returns `true` if this action has the given kind.
    #[must_use]
    pub fn is(&self, kind: &str) -> bool {
        self.kind == kind
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)
    }
}

/// Kind of the status-tagged notification for `status`.
#[must_use]
pub fn status_kind(status: u16) -> String {
    format!("{STATUS_NAMESPACE}/{status}")
}

/// A notification constructor: produces an [`Action`] from a value.
///
/// Cheap to clone; shared between the action table, task handlers and tests.
#[derive(Clone)]
pub struct ActionCreator {
    kind: Arc<str>,
    build: Arc<dyn Fn(Value) -> Action + Send + Sync>,
}

impl ActionCreator {
    /// Creator producing actions of `kind` with the value as payload.
    #[must_use]
    pub fn of_kind(kind: impl Into<String>) -> Self {
        let kind: Arc<str> = Arc::from(kind.into());
        let owned = Arc::clone(&kind);
        Self {
            kind,
            build: Arc::new(move |payload| Action::new(owned.as_ref(), payload)),
        }
    }

    /// Creator backed by an arbitrary closure.
    ///
    /// `kind` is only used for diagnostics; the closure decides the kind of
    /// the produced action.
    #[must_use]
    pub fn from_fn<F>(kind: impl Into<String>, build: F) -> Self
    where
        F: Fn(Value) -> Action + Send + Sync + 'static,
    {
        Self {
            kind: Arc::from(kind.into()),
            build: Arc::new(build),
        }
    }

    /// Produce an action from `payload`.
    #[must_use]
    pub fn create(&self, payload: Value) -> Action {
        (self.build)(payload)
    }

    /// Kind this creator was registered under.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }
}

impl fmt::Debug for ActionCreator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ActionCreator").field(&self.kind).finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_kind() {
        let action = Action::http_status(404, json!({"status": 404}));
        assert_eq!(action.kind, "sagaApi/404");
        assert_eq!(action.payload["status"], 404);
    }

    #[test]
    fn test_creator_of_kind() {
        let creator = ActionCreator::of_kind("todos/readAllSuccess");
        let action = creator.create(json!([{"id": 1}]));
        assert!(action.is("todos/readAllSuccess"));
        assert_eq!(action.payload, json!([{"id": 1}]));
        assert_eq!(creator.kind(), "todos/readAllSuccess");
    }

    #[test]
    fn test_action_serializes_with_type_field() {
        let action = Action::new("todos/create", json!({"title": "x"}));
        let value = serde_json::to_value(&action).unwrap();
        assert_eq!(value, json!({"type": "todos/create", "payload": {"title": "x"}}));
    }
}
