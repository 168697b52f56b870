//! Task suspension points and task handler maps.
//!
//! Task handlers are plain async closures. Everything they need from the store
//! goes through [`TaskContext`], which exposes the suspension points a
//! cooperative task has: dispatching an action, reading a state scope, waiting
//! for an action of a given kind, sleeping, and forking a context for a child
//! task. The runtime implements it on top of the store; tests implement it
//! with a recorder.
//!
//! # Dyn Compatibility
//!
//! Methods return `Pin<Box<dyn Future>>` rather than using `async fn` so that
//! handlers can receive `Arc<dyn TaskContext>`.

use crate::action::Action;
use crate::taker::DispatchPolicy;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Boxed future returned by [`TaskContext`] methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Future of one task invocation.
pub type TaskFuture = BoxFuture<'static, ()>;

/// A task handler: runs once per accepted trigger action.
pub type TaskFn = Arc<dyn Fn(Arc<dyn TaskContext>, Action) -> TaskFuture + Send + Sync>;

/// Suspension-point interface available to task handlers.
pub trait TaskContext: Send + Sync {
    /// Post an action into the dispatch pipeline.
    fn dispatch(&self, action: Action) -> BoxFuture<'_, ()>;

    /// Read the named state scope as JSON.
    fn select(&self, scope: &str) -> BoxFuture<'_, Option<Value>>;

    /// Wait for the next action of `kind`.
    ///
    /// Returns `None` once the action stream is closed. Must be cancel-safe:
    /// dropping the future before it resolves loses no action.
    fn take<'a>(&'a self, kind: &'a str) -> BoxFuture<'a, Option<Action>>;

    /// Sleep for `duration`.
    fn delay(&self, duration: Duration) -> BoxFuture<'_, ()> {
        Box::pin(tokio::time::sleep(duration))
    }

    /// Context for a child task, with its own view of the action stream.
    fn fork(&self) -> Arc<dyn TaskContext>;

    /// Claim the right to emit the notifications of a settled call.
    ///
    /// Returns `false` if the invocation was superseded first; the caller must
    /// then emit nothing. After a successful claim the invocation is left to
    /// finish even when a newer trigger arrives.
    fn commit(&self) -> bool {
        true
    }
}

/// Wrap an async closure as a [`TaskFn`].
pub fn task_fn<F, Fut>(f: F) -> TaskFn
where
    F: Fn(Arc<dyn TaskContext>, Action) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |ctx, action| Box::pin(f(ctx, action)))
}

/// Identity of a task entry.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TaskKey {
    /// One of the canonical CRUD operations
    Operation(crate::table::Operation),
    /// A caller-supplied task, named after its trigger
    Extension(String),
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Operation(op) => write!(f, "{op}"),
            Self::Extension(name) => write!(f, "{name}"),
        }
    }
}

/// A task handler together with its dispatch policy.
#[derive(Clone)]
pub struct TaskEntry {
    /// What the entry is
    pub key: TaskKey,
    /// Handler run for each accepted trigger
    pub handler: TaskFn,
    /// Concurrency discipline for triggers
    pub policy: DispatchPolicy,
}

impl TaskEntry {
    /// Entry for a caller-supplied task.
    #[must_use]
    pub fn extension(name: impl Into<String>, handler: TaskFn, policy: DispatchPolicy) -> Self {
        Self {
            key: TaskKey::Extension(name.into()),
            handler,
            policy,
        }
    }
}

impl fmt::Debug for TaskEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskEntry")
            .field("key", &self.key)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// Task entries keyed by trigger action kind.
#[derive(Clone, Debug, Default)]
pub struct TaskMap {
    entries: BTreeMap<String, TaskEntry>,
}

impl TaskMap {
    /// Empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry for `trigger`, replacing any previous one.
    pub fn insert(&mut self, trigger: impl Into<String>, entry: TaskEntry) -> Option<TaskEntry> {
        self.entries.insert(trigger.into(), entry)
    }

    /// Builder-style [`TaskMap::insert`].
    #[must_use]
    pub fn with(mut self, trigger: impl Into<String>, entry: TaskEntry) -> Self {
        self.insert(trigger, entry);
        self
    }

    /// Merge `other` into `self`; entries of `other` win on collision.
    pub fn merge(&mut self, other: Self) {
        self.entries.extend(other.entries);
    }

    /// Entry for `trigger`.
    #[must_use]
    pub fn get(&self, trigger: &str) -> Option<&TaskEntry> {
        self.entries.get(trigger)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over `(trigger, entry)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &TaskEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl IntoIterator for TaskMap {
    type Item = (String, TaskEntry);
    type IntoIter = std::collections::btree_map::IntoIter<String, TaskEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
