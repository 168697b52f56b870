//! Dispatch policies and the drivers that enforce them.
//!
//! A watcher repeatedly waits for its trigger action and decides how to run the
//! handler for it:
//!
//! - [`DispatchPolicy::Every`]: every trigger gets its own handler invocation
//! - [`DispatchPolicy::Latest`]: a new trigger cancels the in-flight invocation
//!   first (its pending request is torn down), then starts a fresh one. An
//!   invocation whose call has already settled and committed is awaited instead,
//!   so its notifications are never cut short
//! - [`DispatchPolicy::Debounce`]: a burst of triggers runs the handler once,
//!   with the last trigger, after a quiet period
//!
//! ```text
//!              trigger                      timer fires
//! AwaitingTrigger ───────► Racing(action) ──────────────► run handler ─► AwaitingTrigger
//!                            │     ▲
//!                            └─────┘ trigger (remember it, restart the timer)
//! ```

use crate::action::Action;
use crate::error::SagaError;
use crate::table::Operation;
use crate::task::{BoxFuture, TaskContext, TaskEntry, TaskFn};
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Default quiet period of debounced tasks.
pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_millis(100);

/// Concurrency discipline for repeated triggers of the same task.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DispatchPolicy {
    /// Run every invocation independently (queue-all)
    #[default]
    Every,
    /// Cancel the previous in-flight invocation when a new one starts (supersede)
    Latest,
    /// Trailing-edge debounce with the given quiet period
    Debounce(Duration),
}

impl FromStr for DispatchPolicy {
    type Err = SagaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "takeEvery" | "every" | "queue-all" => Ok(Self::Every),
            "takeLatest" | "latest" | "supersede" => Ok(Self::Latest),
            other => Err(SagaError::invalid(format!(
                "takers must be \"takeEvery\" or \"takeLatest\", got {other:?}"
            ))),
        }
    }
}

/// Per-operation dispatch policy configuration for a resource task set.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum DispatchPolicies {
    /// Every operation queues all invocations
    #[default]
    Default,
    /// The same policy for every operation
    Uniform(DispatchPolicy),
    /// Named operations are overridden; the rest queue all invocations
    PerOperation(BTreeMap<Operation, DispatchPolicy>),
}

impl DispatchPolicies {
    /// Policy that applies to `op`.
    #[must_use]
    pub fn resolve(&self, op: Operation) -> DispatchPolicy {
        match self {
            Self::Default => DispatchPolicy::Every,
            Self::Uniform(policy) => *policy,
            Self::PerOperation(map) => map.get(&op).copied().unwrap_or_default(),
        }
    }

    /// Override the policy of a single operation.
    #[must_use]
    pub fn with(self, op: Operation, policy: DispatchPolicy) -> Self {
        let mut map = match self {
            Self::PerOperation(map) => map,
            Self::Default => BTreeMap::new(),
            Self::Uniform(uniform) => Operation::ALL.into_iter().map(|o| (o, uniform)).collect(),
        };
        map.insert(op, policy);
        Self::PerOperation(map)
    }
}

impl FromStr for DispatchPolicies {
    type Err = SagaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self::Uniform)
    }
}

/// Run the watcher for `entry`, triggered by actions of kind `trigger`.
///
/// Returns when the context's action stream closes.
pub async fn watch(ctx: Arc<dyn TaskContext>, trigger: String, entry: TaskEntry) {
    tracing::debug!(trigger = %trigger, key = %entry.key, policy = ?entry.policy, "Watching trigger");
    match entry.policy {
        DispatchPolicy::Every => take_every(ctx, &trigger, entry.handler).await,
        DispatchPolicy::Latest => take_latest(ctx, &trigger, entry.handler).await,
        DispatchPolicy::Debounce(quiet) => debounce(ctx, &trigger, quiet, entry.handler).await,
    }
}

/// Start a handler invocation for every trigger.
pub async fn take_every(ctx: Arc<dyn TaskContext>, trigger: &str, handler: TaskFn) {
    while let Some(action) = ctx.take(trigger).await {
        tokio::spawn(handler(ctx.fork(), action));
    }
}

const RUNNING: u8 = 0;
const COMMITTED: u8 = 1;
const SUPERSEDED: u8 = 2;

/// Context of one supersedable invocation.
///
/// `commit` and supersede race on `state`; whichever moves it out of
/// `RUNNING` first wins.
struct Invocation {
    ctx: Arc<dyn TaskContext>,
    state: Arc<AtomicU8>,
}

impl TaskContext for Invocation {
    fn dispatch(&self, action: Action) -> BoxFuture<'_, ()> {
        self.ctx.dispatch(action)
    }

    fn select(&self, scope: &str) -> BoxFuture<'_, Option<Value>> {
        self.ctx.select(scope)
    }

    fn take<'a>(&'a self, kind: &'a str) -> BoxFuture<'a, Option<Action>> {
        self.ctx.take(kind)
    }

    fn delay(&self, duration: Duration) -> BoxFuture<'_, ()> {
        self.ctx.delay(duration)
    }

    fn fork(&self) -> Arc<dyn TaskContext> {
        self.ctx.fork()
    }

    fn commit(&self) -> bool {
        match self
            .state
            .compare_exchange(RUNNING, COMMITTED, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => true,
            Err(state) => state == COMMITTED,
        }
    }
}

/// Start a handler invocation per trigger, cancelling the previous one first.
///
/// An uncommitted previous invocation is torn down before the new one is
/// spawned, so its in-flight request is cancelled before the new request
/// begins. A committed one is awaited until it has emitted its notifications.
pub async fn take_latest(ctx: Arc<dyn TaskContext>, trigger: &str, handler: TaskFn) {
    let mut running: Option<(JoinHandle<()>, Arc<AtomicU8>)> = None;

    while let Some(action) = ctx.take(trigger).await {
        if let Some((previous, state)) = running.take() {
            supersede(trigger, previous, &state).await;
        }
        let state = Arc::new(AtomicU8::new(RUNNING));
        let invocation: Arc<dyn TaskContext> = Arc::new(Invocation {
            ctx: ctx.fork(),
            state: Arc::clone(&state),
        });
        running = Some((tokio::spawn(handler(invocation, action)), state));
    }
}

async fn supersede(trigger: &str, previous: JoinHandle<()>, state: &AtomicU8) {
    match state.compare_exchange(RUNNING, SUPERSEDED, Ordering::AcqRel, Ordering::Acquire) {
        Ok(_) if !previous.is_finished() => {
            tracing::debug!(trigger, "Superseding in-flight task");
            previous.abort();
        },
        Ok(_) => {},
        Err(_) => tracing::debug!(trigger, "Previous task already settled, letting it finish"),
    }
    if let Err(e) = previous.await {
        if e.is_panic() {
            tracing::error!(trigger, error = %e, "Task handler panicked");
        }
    }
}

enum DebounceState {
    AwaitingTrigger,
    Racing(Action),
}

/// Run the handler once per burst of triggers, after `quiet` without a new one.
///
/// The handler receives the last trigger of the burst.
pub async fn debounce(
    ctx: Arc<dyn TaskContext>,
    trigger: &str,
    quiet: Duration,
    handler: TaskFn,
) {
    let mut state = DebounceState::AwaitingTrigger;

    loop {
        state = match state {
            DebounceState::AwaitingTrigger => match ctx.take(trigger).await {
                Some(action) => DebounceState::Racing(action),
                None => return,
            },
            DebounceState::Racing(latest) => {
                tokio::select! {
                    () = ctx.delay(quiet) => {
                        tracing::trace!(trigger, "Quiet period elapsed");
                        tokio::spawn(handler(ctx.fork(), latest));
                        DebounceState::AwaitingTrigger
                    }
                    next = ctx.take(trigger) => match next {
                        Some(action) => DebounceState::Racing(action),
                        None => return,
                    },
                }
            },
        };
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_keywords() {
        assert_eq!("takeEvery".parse::<DispatchPolicy>().unwrap(), DispatchPolicy::Every);
        assert_eq!("supersede".parse::<DispatchPolicy>().unwrap(), DispatchPolicy::Latest);
        assert_eq!("takeLatest".parse::<DispatchPolicy>().unwrap(), DispatchPolicy::Latest);
        assert!("takeSome".parse::<DispatchPolicy>().unwrap_err().is_invalid_argument());
    }

    #[test]
    fn test_uniform_supersede_applies_to_all_operations() {
        let policies: DispatchPolicies = "supersede".parse().unwrap();
        for op in Operation::ALL {
            assert_eq!(policies.resolve(op), DispatchPolicy::Latest);
        }
    }

    #[test]
    fn test_per_operation_overrides_only_named() {
        let policies = DispatchPolicies::Default.with(Operation::ReadAll, DispatchPolicy::Latest);
        assert_eq!(policies.resolve(Operation::ReadAll), DispatchPolicy::Latest);
        assert_eq!(policies.resolve(Operation::Create), DispatchPolicy::Every);
        assert_eq!(policies.resolve(Operation::Delete), DispatchPolicy::Every);
    }

    #[test]
    fn test_default_is_every() {
        for op in Operation::ALL {
            assert_eq!(DispatchPolicies::default().resolve(op), DispatchPolicy::Every);
        }
    }

    #[test]
    fn test_override_on_top_of_uniform() {
        let policies = DispatchPolicies::Uniform(DispatchPolicy::Latest)
            .with(Operation::Create, DispatchPolicy::Every);
        assert_eq!(policies.resolve(Operation::Create), DispatchPolicy::Every);
        assert_eq!(policies.resolve(Operation::Update), DispatchPolicy::Latest);
    }
}
