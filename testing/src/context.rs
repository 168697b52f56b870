//! Recording task context.

use crud_saga_core::action::Action;
use crud_saga_core::task::{BoxFuture, TaskContext};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;

/// A dispatched action and when it was dispatched.
#[derive(Clone, Debug, PartialEq)]
pub struct Recorded {
    /// The action
    pub action: Action,
    /// Time since the context was created (virtual under paused time)
    pub at: Duration,
}

#[derive(Debug)]
struct Shared {
    started: Instant,
    state: Mutex<Value>,
    dispatched: Mutex<Vec<Recorded>>,
    count: watch::Sender<usize>,
    actions: broadcast::Sender<Action>,
}

impl Shared {
    fn dispatched(&self) -> MutexGuard<'_, Vec<Recorded>> {
        self.dispatched.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> MutexGuard<'_, Value> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// [`TaskContext`] for tests.
///
/// - `dispatch` records the action with its timestamp and feeds it back to
///   every `take` (no reducer runs)
/// - `select` reads a scope of a JSON document the test controls
/// - [`RecordingContext::trigger`] feeds an action to `take` without recording it
///
/// Forked contexts share the record and the state, and see actions sent after
/// the fork.
#[derive(Debug)]
pub struct RecordingContext {
    shared: Arc<Shared>,
    rx: tokio::sync::Mutex<broadcast::Receiver<Action>>,
}

impl RecordingContext {
    /// Context over `state`, subscribed immediately.
    #[must_use]
    pub fn new(state: Value) -> Arc<Self> {
        let (actions, rx) = broadcast::channel(256);
        let (count, _) = watch::channel(0);
        Arc::new(Self {
            shared: Arc::new(Shared {
                started: Instant::now(),
                state: Mutex::new(state),
                dispatched: Mutex::new(Vec::new()),
                count,
                actions,
            }),
            rx: tokio::sync::Mutex::new(rx),
        })
    }

    /// Deliver `action` to pending and future `take` calls.
    pub fn trigger(&self, action: Action) {
        let _ = self.shared.actions.send(action);
    }

    /// Replace the whole state document.
    pub fn set_state(&self, state: Value) {
        *self.shared.state() = state;
    }

    /// Edit the state document in place.
    pub fn update_state(&self, f: impl FnOnce(&mut Value)) {
        f(&mut self.shared.state());
    }

    /// Everything dispatched so far, in order.
    #[must_use]
    pub fn dispatched(&self) -> Vec<Recorded> {
        self.shared.dispatched().clone()
    }

    /// Kinds of everything dispatched so far, in order.
    #[must_use]
    pub fn dispatched_kinds(&self) -> Vec<String> {
        self.shared
            .dispatched()
            .iter()
            .map(|r| r.action.kind.clone())
            .collect()
    }

    /// Wait until at least `n` actions have been dispatched.
    ///
    /// Returns the record, or `None` if `timeout` expires first.
    pub async fn wait_for_dispatches(&self, n: usize, timeout: Duration) -> Option<Vec<Recorded>> {
        let mut rx = self.shared.count.subscribe();
        tokio::time::timeout(timeout, rx.wait_for(|count| *count >= n))
            .await
            .ok()?
            .ok()?;
        Some(self.dispatched())
    }
}

impl TaskContext for RecordingContext {
    fn dispatch(&self, action: Action) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let at = self.shared.started.elapsed();
            tracing::trace!(kind = %action.kind, ?at, "Recorded dispatch");
            let total = {
                let mut dispatched = self.shared.dispatched();
                dispatched.push(Recorded {
                    action: action.clone(),
                    at,
                });
                dispatched.len()
            };
            self.shared.count.send_replace(total);
            let _ = self.shared.actions.send(action);
        })
    }

    fn select(&self, scope: &str) -> BoxFuture<'_, Option<Value>> {
        let value = self.shared.state().get(scope).cloned();
        Box::pin(async move { value })
    }

    fn take<'a>(&'a self, kind: &'a str) -> BoxFuture<'a, Option<Action>> {
        Box::pin(async move {
            let mut rx = self.rx.lock().await;
            loop {
                match rx.recv().await {
                    Ok(action) if action.kind == kind => return Some(action),
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {},
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
    }

    fn fork(&self) -> Arc<dyn TaskContext> {
        Arc::new(Self {
            shared: Arc::clone(&self.shared),
            rx: tokio::sync::Mutex::new(self.shared.actions.subscribe()),
        })
    }
}
