//! Task call adapter.
//!
//! Performs one HTTP call as a task step and turns its outcome into
//! notifications. Inputs are validated when the call is built, before any I/O:
//!
//! ```text
//! TaskApi::call ──► TaskCall ──issue──► IssuedCall ──settle──► Settlement
//!   (validates)       (descriptor)        (request in flight)
//! ```
//!
//! Notification order is fixed: `success` or `failure`, then the
//! `sagaApi/<status>` notification (failures carrying a response only), then
//! `done` if one was supplied. A call cancelled before it settles emits nothing.

use crud_saga_core::action::{Action, ActionCreator};
use crud_saga_core::error::SagaError;
use crud_saga_core::outcome::{Outcome, Settlement};
use crud_saga_core::table::{ActionTable, Operation, Phase};
use crud_saga_core::task::TaskContext;
use crud_saga_core::transport::{
    CancelHandle, Method, PendingRequest, RequestDescriptor, RequestOptions, Transport,
    TransportError,
};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Notification constructors a call reports through.
///
/// `success` and `failure` are mandatory; building a call without them fails.
#[derive(Clone, Debug, Default)]
pub struct NotificationTriple {
    /// Receives the response data
    pub success: Option<ActionCreator>,
    /// Receives the error payload
    pub failure: Option<ActionCreator>,
    /// Receives `{data}` or `{error}` once the call completed
    pub done: Option<ActionCreator>,
}

impl NotificationTriple {
    /// Triple with both mandatory constructors and no `done`.
    #[must_use]
    pub fn new(success: ActionCreator, failure: ActionCreator) -> Self {
        Self {
            success: Some(success),
            failure: Some(failure),
            done: None,
        }
    }

    /// Set the `done` constructor.
    #[must_use]
    pub fn with_done(mut self, done: ActionCreator) -> Self {
        self.done = Some(done);
        self
    }

    /// Constructors of `op` in `table`: `<op>Success`, `<op>Fail` and, when the
    /// table has done actions, `<op>Done`.
    #[must_use]
    pub fn for_operation(table: &ActionTable, op: Operation) -> Self {
        Self {
            success: table.creator(op, Phase::Success),
            failure: table.creator(op, Phase::Fail),
            done: table.creator(op, Phase::Done),
        }
    }
}

/// Issues task calls through one transport.
///
/// Cheap to clone; clones share the transport.
#[derive(Clone)]
pub struct TaskApi {
    transport: Arc<dyn Transport>,
}

impl fmt::Debug for TaskApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskApi").finish_non_exhaustive()
    }
}

impl TaskApi {
    /// Task API over `transport`.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// The underlying transport.
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Build a call from a method name.
    ///
    /// For GET, `payload` is read as [`RequestOptions`] (`null` for none) and
    /// nothing is sent as a body. For other methods it is the body.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError::InvalidArgument`] if the method is unknown, the path
    /// is empty, a GET payload is not valid options, or `success`/`failure` is
    /// missing.
    pub fn call(
        &self,
        method: &str,
        path: &str,
        payload: Value,
        notify: NotificationTriple,
    ) -> Result<TaskCall, SagaError> {
        let method: Method = method.parse()?;
        if method.carries_body() {
            self.build(method, path, Some(payload), RequestOptions::default(), notify)
        } else {
            let options = if payload.is_null() {
                RequestOptions::default()
            } else {
                serde_json::from_value(payload)
                    .map_err(|e| SagaError::invalid(format!("invalid request options: {e}")))?
            };
            self.build(method, path, None, options, notify)
        }
    }

    /// `GET path`.
    ///
    /// # Errors
    ///
    /// See [`TaskApi::call`].
    pub fn get(
        &self,
        path: &str,
        options: RequestOptions,
        notify: NotificationTriple,
    ) -> Result<TaskCall, SagaError> {
        self.build(Method::Get, path, None, options, notify)
    }

    /// `POST path` with `body`.
    ///
    /// # Errors
    ///
    /// See [`TaskApi::call`].
    pub fn post(&self, path: &str, body: Value, notify: NotificationTriple) -> Result<TaskCall, SagaError> {
        self.build(Method::Post, path, Some(body), RequestOptions::default(), notify)
    }

    /// `PUT path` with `body`.
    ///
    /// # Errors
    ///
    /// See [`TaskApi::call`].
    pub fn put(&self, path: &str, body: Value, notify: NotificationTriple) -> Result<TaskCall, SagaError> {
        self.build(Method::Put, path, Some(body), RequestOptions::default(), notify)
    }

    /// `PATCH path` with `body`.
    ///
    /// # Errors
    ///
    /// See [`TaskApi::call`].
    pub fn patch(&self, path: &str, body: Value, notify: NotificationTriple) -> Result<TaskCall, SagaError> {
        self.build(Method::Patch, path, Some(body), RequestOptions::default(), notify)
    }

    /// `DELETE path` with a `null` body.
    ///
    /// # Errors
    ///
    /// See [`TaskApi::call`].
    pub fn delete(&self, path: &str, notify: NotificationTriple) -> Result<TaskCall, SagaError> {
        self.build(Method::Delete, path, Some(Value::Null), RequestOptions::default(), notify)
    }

    pub(crate) fn build(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        options: RequestOptions,
        notify: NotificationTriple,
    ) -> Result<TaskCall, SagaError> {
        if path.trim().is_empty() {
            return Err(SagaError::invalid("valid path required"));
        }
        let success = notify
            .success
            .ok_or_else(|| SagaError::invalid("success action creator required"))?;
        let failure = notify
            .failure
            .ok_or_else(|| SagaError::invalid("failure action creator required"))?;

        Ok(TaskCall {
            transport: Arc::clone(&self.transport),
            descriptor: RequestDescriptor::new(method, path, body).with_options(options),
            success,
            failure,
            done: notify.done,
        })
    }

    /// A call that fails with `error` without reaching the transport.
    ///
    /// Used when a request cannot be built from its trigger; the failure is
    /// reported exactly like a transport failure.
    pub(crate) fn rejected(
        error: TransportError,
        notify: NotificationTriple,
    ) -> Result<IssuedCall, SagaError> {
        let success = notify
            .success
            .ok_or_else(|| SagaError::invalid("success action creator required"))?;
        let failure = notify
            .failure
            .ok_or_else(|| SagaError::invalid("failure action creator required"))?;

        metrics::counter!("saga_api.requests.total").increment(1);

        Ok(IssuedCall {
            pending: PendingRequest::failed(error),
            success,
            failure,
            done: notify.done,
        })
    }
}

/// A validated call, not yet issued.
pub struct TaskCall {
    transport: Arc<dyn Transport>,
    descriptor: RequestDescriptor,
    success: ActionCreator,
    failure: ActionCreator,
    done: Option<ActionCreator>,
}

impl fmt::Debug for TaskCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskCall")
            .field("descriptor", &self.descriptor)
            .field("success", &self.success)
            .field("failure", &self.failure)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl TaskCall {
    /// The request this call will issue.
    #[must_use]
    pub const fn descriptor(&self) -> &RequestDescriptor {
        &self.descriptor
    }

    /// Issue the request without waiting for it.
    pub fn issue(self) -> IssuedCall {
        tracing::debug!(
            method = %self.descriptor.method(),
            path = self.descriptor.path(),
            "Task call issued"
        );
        metrics::counter!("saga_api.requests.total").increment(1);

        IssuedCall {
            pending: self.transport.request(self.descriptor),
            success: self.success,
            failure: self.failure,
            done: self.done,
        }
    }

    /// Issue the request and report its outcome through `ctx`.
    pub async fn run(self, ctx: &dyn TaskContext) -> Settlement<TransportError> {
        self.issue().settle(ctx).await
    }
}

/// A call whose request is in flight.
///
/// Dropping it cancels the request.
#[derive(Debug)]
pub struct IssuedCall {
    pending: PendingRequest,
    success: ActionCreator,
    failure: ActionCreator,
    done: Option<ActionCreator>,
}

impl IssuedCall {
    /// Handle cancelling the in-flight request.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        self.pending.cancel_handle()
    }

    /// Wait for the request and emit the notifications for its outcome.
    ///
    /// Once the request has settled and the context accepts the commit, the
    /// whole notification sequence is emitted, done included.
    pub async fn settle(self, ctx: &dyn TaskContext) -> Settlement<TransportError> {
        let result = match self.pending.await {
            Err(TransportError::Cancelled { reason }) => {
                tracing::debug!(reason = %reason, "Task call cancelled before settling");
                metrics::counter!("saga_api.requests.cancelled").increment(1);
                return Settlement::Aborted;
            },
            result if !ctx.commit() => {
                tracing::debug!(ok = result.is_ok(), "Task call superseded as it settled");
                metrics::counter!("saga_api.requests.cancelled").increment(1);
                return Settlement::Aborted;
            },
            result => result,
        };

        let outcome = match result {
            Ok(response) => {
                ctx.dispatch(self.success.create(response.data.clone())).await;
                Outcome::Success {
                    data: response.data,
                }
            },
            Err(error) => {
                tracing::warn!(
                    kind = error.as_label(),
                    status = ?error.status(),
                    error = %error,
                    "Task call failed"
                );
                metrics::counter!("saga_api.requests.failed", "kind" => error.as_label()).increment(1);

                ctx.dispatch(self.failure.create(error.to_payload())).await;
                if let Some(response) = error.response() {
                    ctx.dispatch(Action::http_status(response.status, response.to_value()))
                        .await;
                }
                Outcome::Failure { error }
            },
        };

        if let Some(done) = &self.done {
            ctx.dispatch(done.create(outcome.completion_payload(TransportError::to_payload)))
                .await;
        }

        Settlement::Completed(outcome)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crud_saga_testing::{MockTransport, RecordingContext};
    use serde_json::json;

    fn triple() -> NotificationTriple {
        NotificationTriple::new(
            ActionCreator::of_kind("todos/readAllSuccess"),
            ActionCreator::of_kind("todos/readAllFail"),
        )
    }

    #[test]
    fn test_unknown_method_rejected() {
        let api = TaskApi::new(MockTransport::new().shared());
        let err = api.call("fetch", "/todos", Value::Null, triple()).unwrap_err();
        assert!(err.is_invalid_argument());
    }

    #[test]
    fn test_empty_path_rejected() {
        let api = TaskApi::new(MockTransport::new().shared());
        assert!(api.call("get", "", Value::Null, triple()).is_err());
        assert!(api.call("get", "   ", Value::Null, triple()).is_err());
    }

    #[test]
    fn test_get_payload_becomes_options() {
        let api = TaskApi::new(MockTransport::new().shared());
        let call = api
            .call("get", "/todos", json!({"query": [["page", "2"]]}), triple())
            .unwrap();
        assert_eq!(call.descriptor().body(), None);
        assert_eq!(
            call.descriptor().options().query,
            vec![("page".to_string(), "2".to_string())]
        );

        let err = api.call("get", "/todos", json!(42), triple()).unwrap_err();
        assert!(err.is_invalid_argument());
    }

    #[tokio::test]
    async fn test_done_receives_error_payload() {
        let transport = MockTransport::new().with_status(500, json!("boom"));
        let api = TaskApi::new(transport.shared());
        let ctx = RecordingContext::new(json!({}));

        let settlement = api
            .put(
                "/todos/1",
                json!({"title": "x"}),
                triple().with_done(ActionCreator::of_kind("todos/updateDone")),
            )
            .unwrap()
            .run(ctx.as_ref())
            .await;

        assert!(settlement.outcome().is_some_and(Outcome::is_failure));
        let dispatched = ctx.dispatched();
        let done = &dispatched.last().unwrap().action;
        assert!(done.is("todos/updateDone"));
        assert_eq!(done.payload["error"]["response"]["status"], 500);
        assert_eq!(done.payload["error"]["response"]["data"], "boom");
    }
}
