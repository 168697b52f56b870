//! # Crud Saga Runtime
//!
//! Runtime implementation for CRUD resource sagas.
//!
//! This crate provides the Store that coordinates reducer execution and the
//! task watchers started for a module's task map.
//!
//! ## Core Components
//!
//! - **Store**: Holds state, runs the reducer, fans out every action
//! - **Task watchers**: One per task entry, enforcing its dispatch policy
//! - **Store context**: The [`TaskContext`] handed to task handlers
//!
//! ## Example
//!
//! ```ignore
//! use crud_saga_runtime::Store;
//!
//! let store = Store::new(initial_state, module_reducer);
//! store.run(module_tasks);
//!
//! // Send an action
//! store.send(Action::bare("todos/readAll")).await?;
//!
//! // Read state
//! let loading = store.state(|s| s["todos"].is_loading).await;
//! ```

use crud_saga_core::task::TaskContext;
use std::sync::Arc;
use std::time::Duration;

/// Error types for the Store runtime
pub mod error {
    use thiserror::Error;

    /// Errors that can occur during Store operations
    #[derive(Error, Debug)]
    pub enum StoreError {
        /// Store is shutting down and not accepting new actions
        ///
        /// This error is returned when `send()` is called after shutdown initiated.
        #[error("Store is shutting down")]
        ShutdownInProgress,

        /// Shutdown timed out waiting for task watchers to stop
        #[error("Shutdown timed out with {0} watchers still running")]
        ShutdownTimeout(usize),

        /// Timeout waiting for terminal action
        ///
        /// Returned by `send_and_wait_for` when the timeout expires before
        /// a matching action is received.
        #[error("Timeout waiting for action")]
        Timeout,

        /// Action broadcast channel closed
        #[error("Action broadcast channel closed")]
        ChannelClosed,
    }
}

pub use error::StoreError;

/// Store configuration
///
/// # Example
///
/// ```
/// use crud_saga_runtime::StoreConfig;
/// use std::time::Duration;
///
/// let config = StoreConfig::default()
///     .with_broadcast_capacity(256)
///     .with_shutdown_timeout(Duration::from_secs(5));
/// assert_eq!(config.broadcast_capacity, 256);
/// ```
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Number of actions buffered per observer before it lags
    ///
    /// Only affects [`Store::subscribe_actions`] and
    /// [`Store::send_and_wait_for`]; task watchers get unbounded queues.
    pub broadcast_capacity: usize,

    /// Default timeout used by [`Store::shutdown_default`]
    pub shutdown_timeout: Duration,
}

impl StoreConfig {
    /// Set the action broadcast capacity
    #[must_use]
    pub const fn with_broadcast_capacity(mut self, capacity: usize) -> Self {
        self.broadcast_capacity = capacity;
        self
    }

    /// Set the default shutdown timeout
    #[must_use]
    pub const fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            broadcast_capacity: 64,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Store module - The runtime for reducers and tasks
pub mod store {
    use super::{Arc, Duration, StoreConfig, StoreError, TaskContext};
    use crud_saga_core::action::Action;
    use crud_saga_core::reducer::Reducer;
    use crud_saga_core::state::ScopedState;
    use crud_saga_core::taker;
    use crud_saga_core::task::{BoxFuture, TaskMap};
    use serde_json::Value;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Mutex, PoisonError};
    use tokio::sync::{RwLock, broadcast, mpsc};
    use tokio::task::JoinHandle;

    struct Inner<R: Reducer> {
        state: RwLock<R::State>,
        reducer: R,
        shutdown: AtomicBool,
        /// Every action sent to the store, after it has been reduced.
        action_broadcast: broadcast::Sender<Action>,
        /// Lossless per-context queues feeding `take`.
        queues: Mutex<Vec<mpsc::UnboundedSender<Action>>>,
        watchers: Mutex<Vec<JoinHandle<()>>>,
        config: StoreConfig,
    }

    impl<R> Inner<R>
    where
        R: Reducer + 'static,
        R::State: ScopedState + Send + Sync + 'static,
    {
        #[tracing::instrument(skip(self, action), fields(kind = %action.kind), name = "store_send")]
        async fn send(&self, action: Action) -> Result<(), StoreError> {
            if self.shutdown.load(Ordering::Acquire) {
                tracing::warn!("Rejected action: store is shutting down");
                metrics::counter!("store.shutdown.rejected_actions").increment(1);
                return Err(StoreError::ShutdownInProgress);
            }

            metrics::counter!("store.actions.total").increment(1);

            let mut state = self.state.write().await;
            tracing::trace!("Acquired write lock on state");
            self.reducer.reduce(&mut state, &action);

            // Fan out before releasing the lock: queues and observers see
            // actions in reduce order.
            self.queues
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|tx| tx.send(action.clone()).is_ok());
            // No receivers is not an error: nothing is watching yet
            let _ = self.action_broadcast.send(action);
            drop(state);
            Ok(())
        }

        /// Register a new `take` queue; it receives every action sent from now on.
        fn queue(&self) -> mpsc::UnboundedReceiver<Action> {
            let (tx, rx) = mpsc::unbounded_channel();
            if !self.shutdown.load(Ordering::Acquire) {
                self.queues.lock().unwrap_or_else(PoisonError::into_inner).push(tx);
            }
            rx
        }

        /// Close every `take` queue.
        fn close_queues(&self) {
            self.queues.lock().unwrap_or_else(PoisonError::into_inner).clear();
        }
    }

    /// The Store - runtime coordinator for a reducer and its tasks
    ///
    /// The Store manages:
    /// 1. State (behind `RwLock` for concurrent access)
    /// 2. Reducer (state transitions)
    /// 3. Action fan-out (an unbounded queue per task context, a broadcast for observers)
    /// 4. Task watchers (one per task entry)
    ///
    /// Actions are reduced before they are fanned out, so a task triggered by
    /// an action always observes the state that action produced. Watcher
    /// queues never drop triggers, however many arrive before the watcher runs.
    ///
    /// Dropping the store aborts its task watchers.
    pub struct Store<R>
    where
        R: Reducer + 'static,
        R::State: ScopedState + Send + Sync + 'static,
    {
        inner: Arc<Inner<R>>,
    }

    impl<R> Store<R>
    where
        R: Reducer + 'static,
        R::State: ScopedState + Send + Sync + 'static,
    {
        /// Create a new store with initial state and reducer
        #[must_use]
        pub fn new(initial_state: R::State, reducer: R) -> Self {
            Self::with_config(initial_state, reducer, StoreConfig::default())
        }

        /// Create a new store with custom configuration
        #[must_use]
        pub fn with_config(initial_state: R::State, reducer: R, config: StoreConfig) -> Self {
            let (action_broadcast, _) = broadcast::channel(config.broadcast_capacity.max(1));

            Self {
                inner: Arc::new(Inner {
                    state: RwLock::new(initial_state),
                    reducer,
                    shutdown: AtomicBool::new(false),
                    action_broadcast,
                    queues: Mutex::new(Vec::new()),
                    watchers: Mutex::new(Vec::new()),
                    config,
                }),
            }
        }

        /// Send an action to the store
        ///
        /// 1. Acquires write lock on state and runs the reducer
        /// 2. Queues the action for every task watcher and broadcasts it to
        ///    observers, still under the write lock
        ///
        /// # Errors
        ///
        /// Returns [`StoreError::ShutdownInProgress`] if the store is shutting down.
        pub async fn send(&self, action: Action) -> Result<(), StoreError> {
            self.inner.send(action).await
        }

        /// Send an action and wait for a matching result action
        ///
        /// Subscribes to the action broadcast BEFORE sending, so a result
        /// produced immediately by a task cannot be missed.
        ///
        /// # Errors
        ///
        /// - [`StoreError::Timeout`]: Timeout expired before matching action received
        /// - [`StoreError::ChannelClosed`]: Action broadcast channel closed
        /// - [`StoreError::ShutdownInProgress`]: Store is shutting down
        pub async fn send_and_wait_for<F>(
            &self,
            action: Action,
            predicate: F,
            timeout: Duration,
        ) -> Result<Action, StoreError>
        where
            F: Fn(&Action) -> bool,
        {
            let mut rx = self.inner.action_broadcast.subscribe();

            self.send(action).await?;

            tokio::time::timeout(timeout, async {
                loop {
                    match rx.recv().await {
                        Ok(action) if predicate(&action) => return Ok(action),
                        Ok(_) => {},
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "Action observer lagged, {} actions skipped", skipped);
                        },
                        Err(broadcast::error::RecvError::Closed) => {
                            return Err(StoreError::ChannelClosed);
                        },
                    }
                }
            })
            .await
            .map_err(|_| StoreError::Timeout)?
        }

        /// Subscribe to every action sent to this store
        #[must_use]
        pub fn subscribe_actions(&self) -> broadcast::Receiver<Action> {
            self.inner.action_broadcast.subscribe()
        }

        /// Read current state via a closure
        ///
        /// ```ignore
        /// let count = store.state(|s| s.len()).await;
        /// ```
        pub async fn state<F, T>(&self, f: F) -> T
        where
            F: FnOnce(&R::State) -> T,
        {
            let state = self.inner.state.read().await;
            f(&state)
        }

        /// A task context bound to this store
        ///
        /// Useful to run a one-off task outside of a watcher.
        #[must_use]
        pub fn context(&self) -> Arc<dyn TaskContext> {
            Arc::new(StoreContext::subscribed(Arc::clone(&self.inner)))
        }

        /// Start one watcher per task entry
        ///
        /// Each watcher subscribes immediately, so actions sent after `run`
        /// returns are seen by every watcher. Must be called inside a Tokio runtime.
        pub fn run(&self, tasks: TaskMap) {
            let mut handles = Vec::with_capacity(tasks.len());
            for (trigger, entry) in tasks {
                tracing::debug!(trigger = %trigger, key = %entry.key, "Starting task watcher");
                let ctx: Arc<dyn TaskContext> =
                    Arc::new(StoreContext::subscribed(Arc::clone(&self.inner)));
                handles.push(tokio::spawn(taker::watch(ctx, trigger, entry)));
            }
            self.inner
                .watchers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .extend(handles);
        }

        /// Number of running task watchers
        #[must_use]
        pub fn watcher_count(&self) -> usize {
            self.inner
                .watchers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .filter(|h| !h.is_finished())
                .count()
        }

        /// Initiate graceful shutdown of the store
        ///
        /// 1. Sets the shutdown flag (rejecting new actions)
        /// 2. Closes the watcher queues and aborts every task watcher
        /// 3. Waits for the watchers to stop (with timeout)
        ///
        /// Handler invocations already started keep running to completion;
        /// their dispatches are rejected.
        ///
        /// # Errors
        ///
        /// Returns [`StoreError::ShutdownTimeout`] if some watchers have not
        /// stopped when the timeout expires.
        pub async fn shutdown(&self, timeout: Duration) -> Result<(), StoreError> {
            tracing::info!("Initiating graceful shutdown");
            metrics::counter!("store.shutdown.initiated").increment(1);

            self.inner.shutdown.store(true, Ordering::Release);
            self.inner.close_queues();

            let handles: Vec<_> = self
                .inner
                .watchers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .drain(..)
                .collect();
            let total = handles.len();

            for handle in &handles {
                handle.abort();
            }

            let joined = tokio::time::timeout(timeout, futures::future::join_all(handles)).await;

            if joined.is_ok() {
                tracing::info!(watchers = total, "All watchers stopped, shutdown successful");
                metrics::counter!("store.shutdown.completed").increment(1);
                Ok(())
            } else {
                tracing::error!(watchers = total, "Shutdown timeout: watchers still running");
                metrics::counter!("store.shutdown.timeout").increment(1);
                Err(StoreError::ShutdownTimeout(total))
            }
        }

        /// [`Store::shutdown`] with the configured default timeout
        ///
        /// # Errors
        ///
        /// See [`Store::shutdown`].
        pub async fn shutdown_default(&self) -> Result<(), StoreError> {
            self.shutdown(self.inner.config.shutdown_timeout).await
        }
    }

    impl<R> Drop for Store<R>
    where
        R: Reducer + 'static,
        R::State: ScopedState + Send + Sync + 'static,
    {
        fn drop(&mut self) {
            self.inner.close_queues();
            let mut watchers = self
                .inner
                .watchers
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            for handle in watchers.drain(..) {
                handle.abort();
            }
        }
    }

    /// [`TaskContext`] backed by a store
    struct StoreContext<R>
    where
        R: Reducer + 'static,
        R::State: ScopedState + Send + Sync + 'static,
    {
        inner: Arc<Inner<R>>,
        rx: tokio::sync::Mutex<Option<mpsc::UnboundedReceiver<Action>>>,
    }

    impl<R> StoreContext<R>
    where
        R: Reducer + 'static,
        R::State: ScopedState + Send + Sync + 'static,
    {
        /// Context that sees every action sent from now on.
        fn subscribed(inner: Arc<Inner<R>>) -> Self {
            let rx = inner.queue();
            Self {
                inner,
                rx: tokio::sync::Mutex::new(Some(rx)),
            }
        }

        /// Context that subscribes on its first `take`.
        fn lazy(inner: Arc<Inner<R>>) -> Self {
            Self {
                inner,
                rx: tokio::sync::Mutex::new(None),
            }
        }
    }

    impl<R> TaskContext for StoreContext<R>
    where
        R: Reducer + 'static,
        R::State: ScopedState + Send + Sync + 'static,
    {
        fn dispatch(&self, action: Action) -> BoxFuture<'_, ()> {
            Box::pin(async move {
                let kind = action.kind.clone();
                if let Err(e) = self.inner.send(action).await {
                    tracing::debug!(kind = %kind, error = %e, "Dropped task dispatch");
                }
            })
        }

        fn select(&self, scope: &str) -> BoxFuture<'_, Option<Value>> {
            let scope = scope.to_string();
            Box::pin(async move {
                let state = self.inner.state.read().await;
                state.scope(&scope)
            })
        }

        fn take<'a>(&'a self, kind: &'a str) -> BoxFuture<'a, Option<Action>> {
            Box::pin(async move {
                let mut guard = self.rx.lock().await;
                let rx = guard.get_or_insert_with(|| self.inner.queue());
                while let Some(action) = rx.recv().await {
                    if action.kind == kind {
                        return Some(action);
                    }
                }
                tracing::debug!(kind, "Task queue closed");
                None
            })
        }

        fn fork(&self) -> Arc<dyn TaskContext> {
            Arc::new(Self::lazy(Arc::clone(&self.inner)))
        }
    }
}

pub use store::Store;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crud_saga_core::action::Action;
    use crud_saga_core::reducer::Reducer;
    use serde_json::{Value, json};

    struct CountingReducer;

    impl Reducer for CountingReducer {
        type State = Value;

        fn reduce(&self, state: &mut Value, action: &Action) {
            if action.is("counter/increment") {
                let next = state["counter"]["count"].as_i64().unwrap_or(0) + 1;
                state["counter"]["count"] = json!(next);
            }
        }
    }

    #[tokio::test]
    async fn test_send_reduces_state() {
        let store = Store::new(json!({}), CountingReducer);
        store.send(Action::bare("counter/increment")).await.unwrap();
        store.send(Action::bare("counter/increment")).await.unwrap();

        let count = store.state(|s| s["counter"]["count"].as_i64()).await;
        assert_eq!(count, Some(2));
    }

    #[tokio::test]
    async fn test_send_rejected_after_shutdown() {
        let store = Store::new(json!({}), CountingReducer);
        store.shutdown(Duration::from_secs(1)).await.unwrap();

        let result = store.send(Action::bare("counter/increment")).await;
        assert!(matches!(result, Err(StoreError::ShutdownInProgress)));
    }

    #[tokio::test]
    async fn test_context_select_reads_scope() {
        let store = Store::new(json!({"todos": {"current": {"id": 9}}}), CountingReducer);
        let ctx = store.context();
        assert_eq!(ctx.select("todos").await, Some(json!({"current": {"id": 9}})));
        assert_eq!(ctx.select("users").await, None);
    }

    /// Appends every action kind to `log`.
    struct LoggingReducer;

    impl Reducer for LoggingReducer {
        type State = Value;

        fn reduce(&self, state: &mut Value, action: &Action) {
            if !state["log"].is_array() {
                state["log"] = json!([]);
            }
            if let Some(log) = state["log"].as_array_mut() {
                log.push(json!(action.kind));
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_senders_are_observed_in_reduce_order() {
        let store = Arc::new(Store::with_config(
            json!({}),
            LoggingReducer,
            StoreConfig::default().with_broadcast_capacity(256),
        ));
        let mut rx = store.subscribe_actions();

        let senders: Vec<_> = ["left", "right"]
            .into_iter()
            .map(|side| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    for i in 0..50 {
                        store.send(Action::bare(format!("{side}/{i}"))).await.unwrap();
                    }
                })
            })
            .collect();
        for sender in senders {
            sender.await.unwrap();
        }

        let mut observed = Vec::new();
        while let Ok(action) = rx.try_recv() {
            observed.push(json!(action.kind));
        }
        let log = store.state(|s| s["log"].as_array().cloned().unwrap_or_default()).await;
        assert_eq!(observed.len(), 100);
        assert_eq!(observed, log);
    }

    #[tokio::test]
    async fn test_take_returns_none_after_shutdown() {
        let store = Store::new(json!({}), CountingReducer);
        let ctx = store.context();

        store.shutdown(Duration::from_secs(1)).await.unwrap();

        assert!(ctx.take("counter/increment").await.is_none());
    }

    #[tokio::test]
    async fn test_observers_see_actions_after_reduction() {
        let store = Store::new(json!({}), CountingReducer);
        let mut rx = store.subscribe_actions();

        store.send(Action::bare("counter/increment")).await.unwrap();

        let seen = rx.recv().await.unwrap();
        assert!(seen.is("counter/increment"));
        let count = store.state(|s| s["counter"]["count"].as_i64()).await;
        assert_eq!(count, Some(1));
    }
}
