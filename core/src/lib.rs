//! # Crud Saga Core
//!
//! Core traits and types for building CRUD resource modules on top of a
//! unidirectional store with cooperative tasks.
//!
//! ## Core Concepts
//!
//! - **Action**: A kind string plus JSON payload, posted into the store
//! - **Reducer**: Pure state mutation `(State, Action) → State`
//! - **Task**: An async handler started by a trigger action; talks to the
//!   store only through [`task::TaskContext`]
//! - **Dispatch Policy**: How repeated triggers are handled (every, latest, debounce)
//! - **Action Table**: The action identifiers of one module, resolved once
//!
//! ## Example
//!
//! ```
//! use crud_saga_core::table::{ActionTable, Operation, Phase};
//!
//! let table = ActionTable::new("todos").unwrap().with_done(true);
//! assert_eq!(table.trigger(Operation::ReadAll), "todos/readAll");
//! assert_eq!(
//!     table.kind(Operation::ReadAll, Phase::Done).as_deref(),
//!     Some("todos/readAllDone"),
//! );
//! ```

pub mod action;
pub mod composition;
pub mod error;
pub mod outcome;
pub mod table;
pub mod taker;
pub mod task;
pub mod transport;

pub use action::{Action, ActionCreator, STATUS_NAMESPACE};
pub use error::SagaError;
pub use outcome::{Outcome, Settlement};
pub use table::{ActionTable, Operation, Phase};
pub use taker::{DispatchPolicies, DispatchPolicy};
pub use task::{TaskContext, TaskEntry, TaskFn, TaskKey, TaskMap};
pub use transport::{
    CancelHandle, HttpResponse, Method, PendingRequest, RequestDescriptor, RequestOptions,
    Transport, TransportError,
};

/// Reducer module - The trait for state mutation
///
/// Reducers are pure functions: `(State, Action) → State`. Side effects live
/// in tasks, which react to the same actions after the reducer has run.
pub mod reducer {
    use crate::action::Action;

    /// The Reducer trait - state transitions for one action
    ///
    /// # Example
    ///
    /// ```
    /// use crud_saga_core::{Action, reducer::Reducer};
    ///
    /// struct Counter;
    ///
    /// impl Reducer for Counter {
    ///     type State = i64;
    ///
    ///     fn reduce(&self, state: &mut i64, action: &Action) {
    ///         if action.is("counter/increment") {
    ///             *state += 1;
    ///         }
    ///     }
    /// }
    ///
    /// let mut count = 0;
    /// Counter.reduce(&mut count, &Action::bare("counter/increment"));
    /// assert_eq!(count, 1);
    /// ```
    pub trait Reducer: Send + Sync {
        /// The state type this reducer operates on
        type State;

        /// Apply `action` to `state` in place
        fn reduce(&self, state: &mut Self::State, action: &Action);
    }
}

/// State module - read access to named state scopes
pub mod state {
    use serde_json::Value;

    /// State that exposes named scopes as JSON, for [`crate::task::TaskContext::select`].
    pub trait ScopedState {
        /// JSON view of the scope `name`, if it exists.
        fn scope(&self, name: &str) -> Option<Value>;
    }

    impl ScopedState for Value {
        fn scope(&self, name: &str) -> Option<Value> {
            self.get(name).cloned()
        }
    }

    impl<S: serde::Serialize> ScopedState for crate::composition::Slices<S> {
        fn scope(&self, name: &str) -> Option<Value> {
            let slice = self.get(name)?;
            match serde_json::to_value(slice) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::warn!(scope = name, error = %e, "State scope is not serializable");
                    None
                },
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use serde_json::json;

        #[test]
        fn test_value_scope() {
            let state = json!({"todos": {"current": {"id": 3}}});
            assert_eq!(state.scope("todos"), Some(json!({"current": {"id": 3}})));
            assert_eq!(state.scope("users"), None);
        }
    }
}
