//! Refetch of the current item after out-of-band changes.
//!
//! Bound to a trigger such as `todos/associationDone`, the task waits for the
//! burst of triggers to end, then re-reads the `current` item of a state scope
//! by dispatching `<module>/readOne` with its id.

use crud_saga_core::action::Action;
use crud_saga_core::table::{ActionTable, Operation};
use crud_saga_core::taker::{DEFAULT_QUIET_PERIOD, DispatchPolicy};
use crud_saga_core::task::{TaskContext, TaskEntry, task_fn};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Debounced task re-reading `scope`'s current item.
///
/// `quiet` defaults to 100 ms. The handler reads the state when the quiet
/// period ends, so it uses the current item as it is after the last trigger.
///
/// # Example
///
/// ```
/// use crud_saga_api::refetch_task;
/// use crud_saga_core::{ActionTable, DispatchPolicy, TaskMap};
/// use std::time::Duration;
///
/// let table = ActionTable::new("todos").unwrap().with_action("associationDone");
/// let tasks = TaskMap::new().with(
///     table.qualify("associationDone"),
///     refetch_task(&table, "todos", None),
/// );
///
/// let entry = tasks.get("todos/associationDone").unwrap();
/// assert_eq!(entry.policy, DispatchPolicy::Debounce(Duration::from_millis(100)));
/// ```
#[must_use]
pub fn refetch_task(table: &ActionTable, scope: &str, quiet: Option<Duration>) -> TaskEntry {
    let read_one = table.trigger(Operation::ReadOne);
    let scope: Arc<str> = Arc::from(scope);
    let name = format!("refetch:{scope}");

    let handler = task_fn(move |ctx, _trigger| {
        let read_one = read_one.clone();
        let scope = Arc::clone(&scope);
        async move { refetch(ctx.as_ref(), &scope, read_one).await }
    });

    TaskEntry::extension(
        name,
        handler,
        DispatchPolicy::Debounce(quiet.unwrap_or(DEFAULT_QUIET_PERIOD)),
    )
}

async fn refetch(ctx: &dyn TaskContext, scope: &str, read_one: String) {
    let id = ctx
        .select(scope)
        .await
        .and_then(|state| state.get("current")?.get("id").cloned())
        .filter(is_present);

    match id {
        Some(id) => {
            tracing::debug!(scope, id = %id, "Refetching current item");
            ctx.dispatch(Action::new(read_one, id)).await;
        },
        None => tracing::warn!(scope, "no current item set in {scope} state"),
    }
}

/// Empty ids (`null`, `false`, `0`, `0.0`, `""`) count as absent.
#[allow(clippy::float_cmp)]
fn is_present(id: &Value) -> bool {
    match id {
        Value::Null | Value::Bool(false) => false,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        _ => true,
    }
}
