//! Reducer composition utilities
//!
//! This module provides utilities for composing reducers:
//! - **`combine_reducers`**: Run multiple reducers on the same state/action
//! - **`scope_slice`**: Mount a reducer on one named slice of a root state
//!
//! A store usually holds several resource modules side by side, keyed by
//! module name. Each module's reducer is written against its own slice and
//! mounted with [`scope_slice`]; the mounted reducers are then combined.
//!
//! # Examples
//!
//! ```
//! use crud_saga_core::Action;
//! use crud_saga_core::composition::{Slices, combine_reducers, scope_slice};
//! use crud_saga_core::reducer::Reducer;
//!
//! struct Counter(&'static str);
//!
//! impl Reducer for Counter {
//!     type State = i64;
//!
//!     fn reduce(&self, state: &mut i64, action: &Action) {
//!         if action.kind == format!("{}/increment", self.0) {
//!             *state += 1;
//!         }
//!     }
//! }
//!
//! let root = combine_reducers(vec![
//!     Box::new(scope_slice("a", Counter("a"))),
//!     Box::new(scope_slice("b", Counter("b"))),
//! ]);
//!
//! let mut state = Slices::new();
//! root.reduce(&mut state, &Action::bare("b/increment"));
//! assert_eq!(state.get("b"), Some(&1));
//! assert_eq!(state.get("a"), Some(&0));
//! ```

use crate::action::Action;
use crate::reducer::Reducer;
use std::collections::BTreeMap;

/// Root state holding one slice per module name.
pub type Slices<S> = BTreeMap<String, S>;

/// Combines multiple reducers that operate on the same state type.
///
/// Each reducer is run in sequence with the same action.
#[must_use]
pub fn combine_reducers<S>(reducers: Vec<Box<dyn Reducer<State = S>>>) -> CombinedReducer<S>
where
    S: 'static,
{
    CombinedReducer { reducers }
}

/// A combined reducer that runs multiple reducers in sequence.
///
/// Created by [`combine_reducers`].
pub struct CombinedReducer<S>
where
    S: 'static,
{
    reducers: Vec<Box<dyn Reducer<State = S>>>,
}

impl<S> Reducer for CombinedReducer<S>
where
    S: 'static,
{
    type State = S;

    fn reduce(&self, state: &mut Self::State, action: &Action) {
        for reducer in &self.reducers {
            reducer.reduce(state, action);
        }
    }
}

/// Mounts `reducer` on the slice `name` of a [`Slices`] root state.
///
/// The slice is created from `Default` the first time an action reaches it,
/// so every mounted module is present after the first dispatch.
#[must_use]
pub fn scope_slice<R>(name: impl Into<String>, reducer: R) -> SliceReducer<R>
where
    R: Reducer,
    R::State: Default,
{
    SliceReducer {
        name: name.into(),
        reducer,
    }
}

/// A reducer mounted on one named slice.
///
/// Created by [`scope_slice`].
pub struct SliceReducer<R> {
    name: String,
    reducer: R,
}

impl<R> SliceReducer<R> {
    /// Name of the slice this reducer owns.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<R> Reducer for SliceReducer<R>
where
    R: Reducer,
    R::State: Default,
{
    type State = Slices<R::State>;

    fn reduce(&self, state: &mut Self::State, action: &Action) {
        let slice = state.entry(self.name.clone()).or_default();
        self.reducer.reduce(slice, action);
    }
}
