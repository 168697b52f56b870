//! CRUD state slice and its reducer.

use crud_saga_core::action::Action;
use crud_saga_core::reducer::Reducer;
use crud_saga_core::table::{ActionTable, Operation, Phase, RESET_CURRENT, SET_CURRENT};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// State of one CRUD resource module.
///
/// Serializes in camelCase (`isLoading`, `current`, `data`, `error`) with the
/// caller's extra fields flattened alongside.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrudState {
    /// A request of this module is in flight
    #[serde(default)]
    pub is_loading: bool,

    /// Item the user is working on
    #[serde(default)]
    pub current: Option<Value>,

    /// Items keyed by id
    #[serde(default)]
    pub data: BTreeMap<String, Value>,

    /// Payload of the last failure
    #[serde(default)]
    pub error: Option<Value>,

    /// Caller-supplied fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CrudState {
    /// Default state carrying `extra` fields.
    #[must_use]
    pub fn with_extra(extra: Map<String, Value>) -> Self {
        Self {
            extra,
            ..Self::default()
        }
    }

    /// Item `id`, if loaded.
    #[must_use]
    pub fn item(&self, id: &str) -> Option<&Value> {
        self.data.get(id)
    }
}

/// Caller reducer for one extra action: receives the slice and the payload.
pub type SliceFn = Arc<dyn Fn(&mut CrudState, &Value) + Send + Sync>;

/// Reducer of a CRUD module's slice.
///
/// - triggers set `is_loading`
/// - `readAllSuccess` replaces `data` with the payload's items keyed by id
/// - `readOneSuccess`, `updateSuccess`, `patchSuccess` merge into `data[id]`
/// - `createSuccess` inserts, `deleteSuccess` removes
/// - `*Fail` clears `is_loading` and stores the error
/// - `setCurrent` takes an item, or an id looked up in `data`; `resetCurrent` clears it
///
/// Extra reducers registered for a kind replace the default handling of that kind.
#[derive(Clone)]
pub struct CrudReducer {
    table: ActionTable,
    extra: BTreeMap<String, SliceFn>,
}

impl fmt::Debug for CrudReducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrudReducer")
            .field("module", &self.table.module())
            .field("extra", &self.extra.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CrudReducer {
    /// Reducer for the actions of `table`.
    #[must_use]
    pub fn new(table: ActionTable) -> Self {
        Self {
            table,
            extra: BTreeMap::new(),
        }
    }

    /// Handle `<module>/<name>` with `reducer`.
    #[must_use]
    pub fn with_reducer(mut self, name: &str, reducer: SliceFn) -> Self {
        self.extra.insert(self.table.qualify(name), reducer);
        self
    }

    /// The action table this reducer answers to.
    #[must_use]
    pub const fn table(&self) -> &ActionTable {
        &self.table
    }
}

impl Reducer for CrudReducer {
    type State = CrudState;

    fn reduce(&self, state: &mut CrudState, action: &Action) {
        if let Some(reducer) = self.extra.get(&action.kind) {
            reducer(state, &action.payload);
            return;
        }

        if let Some((op, phase)) = self.table.lookup(&action.kind) {
            match phase {
                Phase::Trigger => state.is_loading = true,
                Phase::Success => {
                    state.is_loading = false;
                    apply_success(state, op, &action.payload);
                },
                Phase::Fail => {
                    state.is_loading = false;
                    state.error = Some(action.payload.clone());
                },
                Phase::Done => {},
            }
            return;
        }

        if self.table.action(SET_CURRENT).as_deref() == Some(action.kind.as_str()) {
            set_current(state, &action.payload);
        } else if self.table.action(RESET_CURRENT).as_deref() == Some(action.kind.as_str()) {
            state.current = None;
        }
    }
}

fn apply_success(state: &mut CrudState, op: Operation, payload: &Value) {
    match op {
        Operation::ReadAll => {
            let items: Box<dyn Iterator<Item = &Value> + '_> = match payload {
                Value::Array(items) => Box::new(items.iter()),
                Value::Object(items) => Box::new(items.values()),
                _ => Box::new(std::iter::empty()),
            };
            state.data = items
                .filter_map(|item| Some((key(item.get("id")?)?, item.clone())))
                .collect();
        },
        Operation::ReadOne | Operation::Update | Operation::Patch => {
            if let Some(id) = payload.get("id").and_then(key) {
                let entry = state.data.entry(id).or_insert(Value::Null);
                merge(entry, payload);
            }
        },
        Operation::Create => {
            if let Some(id) = payload.get("id").and_then(key) {
                state.data.insert(id, payload.clone());
            }
        },
        Operation::Delete => {
            if let Some(id) = payload.get("id").and_then(key).or_else(|| key(payload)) {
                state.data.remove(&id);
            }
        },
    }
}

/// Shallow merge of `update` into `target`; non-objects replace.
fn merge(target: &mut Value, update: &Value) {
    match (target, update) {
        (Value::Object(target), Value::Object(update)) => {
            for (k, v) in update {
                target.insert(k.clone(), v.clone());
            }
        },
        (target, update) => *target = update.clone(),
    }
}

fn set_current(state: &mut CrudState, payload: &Value) {
    match payload {
        Value::Object(_) => state.current = Some(payload.clone()),
        Value::String(_) | Value::Number(_) => {
            state.current = key(payload).and_then(|id| state.data.get(&id).cloned());
        },
        _ => tracing::debug!(payload = %payload, "Ignoring setCurrent payload"),
    }
}

/// Map key of an id value.
fn key(id: &Value) -> Option<String> {
    match id {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crud_saga_testing::ReducerTest;
    use serde_json::json;

    fn reducer() -> CrudReducer {
        CrudReducer::new(ActionTable::new("todos").unwrap().with_done(true))
    }

    fn loaded() -> CrudState {
        let mut state = CrudState::default();
        state.data.insert("1".into(), json!({"id": 1, "title": "a", "done": false}));
        state.data.insert("2".into(), json!({"id": 2, "title": "b", "done": true}));
        state
    }

    #[test]
    fn test_trigger_sets_loading() {
        ReducerTest::new(reducer())
            .given_state(CrudState::default())
            .when_action(Action::bare("todos/readAll"))
            .then_state(|state| assert!(state.is_loading))
            .run();
    }

    #[test]
    fn test_read_all_keys_items_by_id() {
        ReducerTest::new(reducer())
            .given_state(loaded())
            .when_action(Action::bare("todos/readAll"))
            .when_action(Action::new(
                "todos/readAllSuccess",
                json!([{"id": 3, "title": "c"}, {"id": "x", "title": "d"}, {"title": "no id"}]),
            ))
            .then_state(|state| {
                assert!(!state.is_loading);
                assert_eq!(state.data.len(), 2);
                assert_eq!(state.item("3"), Some(&json!({"id": 3, "title": "c"})));
                assert!(state.item("x").is_some());
                assert!(state.item("1").is_none());
            })
            .run();
    }

    #[test]
    fn test_update_merges_into_existing_item() {
        ReducerTest::new(reducer())
            .given_state(loaded())
            .when_action(Action::new("todos/patchSuccess", json!({"id": 1, "done": true})))
            .then_state(|state| {
                assert_eq!(state.item("1"), Some(&json!({"id": 1, "title": "a", "done": true})));
            })
            .run();
    }

    #[test]
    fn test_create_and_delete() {
        ReducerTest::new(reducer())
            .given_state(loaded())
            .when_actions([
                Action::new("todos/createSuccess", json!({"id": 7, "title": "new"})),
                Action::new("todos/deleteSuccess", json!({"id": 1})),
                Action::new("todos/deleteSuccess", json!(2)),
            ])
            .then_state(|state| {
                assert_eq!(state.data.keys().collect::<Vec<_>>(), vec!["7"]);
            })
            .run();
    }

    #[test]
    fn test_fail_stores_error() {
        ReducerTest::new(reducer())
            .given_state(CrudState::default())
            .when_actions([
                Action::bare("todos/create"),
                Action::new("todos/createFail", json!({"message": "nope"})),
                Action::new("todos/createDone", json!({"error": {"message": "nope"}})),
            ])
            .then_state(|state| {
                assert!(!state.is_loading);
                assert_eq!(state.error, Some(json!({"message": "nope"})));
            })
            .run();
    }

    #[test]
    fn test_set_current_by_object_and_id() {
        ReducerTest::new(reducer())
            .given_state(loaded())
            .when_action(Action::new("todos/setCurrent", json!(2)))
            .then_state(|state| {
                assert_eq!(state.current.as_ref().unwrap()["title"], "b");
            })
            .run();

        ReducerTest::new(reducer())
            .given_state(loaded())
            .when_actions([
                Action::new("todos/setCurrent", json!({"id": 99})),
                Action::bare("todos/resetCurrent"),
            ])
            .then_state(|state| assert!(state.current.is_none()))
            .run();
    }

    #[test]
    fn test_extra_reducer_overrides_default() {
        let reducer = reducer().with_reducer(
            "readAllSuccess",
            Arc::new(|state: &mut CrudState, payload: &Value| {
                state.extra.insert("count".into(), json!(payload.as_array().map_or(0, Vec::len)));
            }),
        );

        ReducerTest::new(reducer)
            .given_state(CrudState::default())
            .when_action(Action::new("todos/readAllSuccess", json!([{"id": 1}])))
            .then_state(|state| {
                assert!(state.data.is_empty());
                assert_eq!(state.extra.get("count"), Some(&json!(1)));
            })
            .run();
    }

    #[test]
    fn test_serializes_camel_case_with_extra() {
        let mut extra = Map::new();
        extra.insert("filter".into(), json!("all"));
        let value = serde_json::to_value(CrudState::with_extra(extra)).unwrap();
        assert_eq!(
            value,
            json!({"isLoading": false, "current": null, "data": {}, "error": null, "filter": "all"})
        );
    }
}
