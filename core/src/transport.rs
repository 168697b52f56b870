//! Cancellable transport abstraction.
//!
//! Every request issued through a [`Transport`] returns a [`PendingRequest`]: a
//! future resolving to the response or a [`TransportError`], carrying a
//! [`CancelHandle`]. Cancellation is reachable two ways and both trip the same
//! token:
//!
//! - explicitly, through [`CancelHandle::cancel`] (or [`PendingRequest::cancel`])
//! - implicitly, by dropping the pending request before it settles, which is
//!   what happens when the runtime tears down the task awaiting it
//!
//! Cancelling is idempotent and a no-op once the request has settled.
//!
//! Implementations: `HttpApi` in `crud-saga-api` (reqwest) and
//! `MockTransport` in `crud-saga-testing`.

use crate::error::SagaError;
use crate::task::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll, ready};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::{CancellationToken, DropGuard};

/// Reason recorded when a request is torn down together with its task.
pub const TEARDOWN_REASON: &str = "request was cancelled by the task runtime";

/// Reason recorded by [`PendingRequest::cancel`] when none is given.
pub const USER_REASON: &str = "request was cancelled by user";

/// HTTP methods supported by the transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// GET (never carries a body)
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// PATCH
    Patch,
    /// DELETE
    Delete,
}

impl Method {
    /// Upper-case method name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    /// Whether requests with this method transmit a payload.
    #[must_use]
    pub const fn carries_body(self) -> bool {
        !matches!(self, Self::Get)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = SagaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "get" => Ok(Self::Get),
            "post" => Ok(Self::Post),
            "put" => Ok(Self::Put),
            "patch" => Ok(Self::Patch),
            "delete" => Ok(Self::Delete),
            _ => Err(SagaError::invalid(format!("valid method required, got {s:?}"))),
        }
    }
}

/// Per-request transport options.
///
/// For GET requests this is what occupies the payload slot.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestOptions {
    /// Extra headers, merged over the transport's default headers
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Query string parameters
    #[serde(default)]
    pub query: Vec<(String, String)>,

    /// Overrides the transport's timeout
    #[serde(skip)]
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    /// Add a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Add a query parameter.
    #[must_use]
    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Override the timeout for this request.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// One request, built per invocation and discarded once it settles.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestDescriptor {
    method: Method,
    path: String,
    body: Option<Value>,
    options: RequestOptions,
}

impl RequestDescriptor {
    /// Describe a request.
    ///
    /// GET requests never carry a body; `body` is discarded for them. Other
    /// methods always carry one, `null` when none is given.
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>, body: Option<Value>) -> Self {
        let body = method.carries_body().then(|| body.unwrap_or(Value::Null));
        Self {
            method,
            path: path.into(),
            body,
            options: RequestOptions::default(),
        }
    }

    /// Attach transport options.
    #[must_use]
    pub fn with_options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    /// Request method.
    #[must_use]
    pub const fn method(&self) -> Method {
        self.method
    }

    /// Request path, relative to the transport's base address.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Body slot: `None` for GET, `Some` (possibly `null`) otherwise.
    #[must_use]
    pub const fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    /// Transport options.
    #[must_use]
    pub const fn options(&self) -> &RequestOptions {
        &self.options
    }
}

/// A response received from the server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HttpResponse {
    /// Status code
    pub status: u16,

    /// Response headers
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Decoded body: JSON when it parses, a string otherwise
    #[serde(default)]
    pub data: Value,
}

impl HttpResponse {
    /// A response without headers.
    #[must_use]
    pub fn new(status: u16, data: Value) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            data,
        }
    }

    /// Whether the status is 2xx.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// JSON form, used as the payload of status-tagged notifications.
    #[must_use]
    pub fn to_value(&self) -> Value {
        json!({
            "status": self.status,
            "headers": self.headers,
            "data": self.data,
        })
    }
}

/// Why a request did not produce data.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// The server answered with a non-2xx status
    #[error("Request failed with status code {}", response.status)]
    Status {
        /// The failed response
        response: HttpResponse,
    },

    /// The request did not complete in time
    #[error("Timeout of {}ms exceeded", .0.as_millis())]
    Timeout(Duration),

    /// The request could not be delivered
    #[error("Network error: {0}")]
    Network(String),

    /// The request could not be built from the trigger
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The request was cancelled before it settled
    #[error("Request cancelled: {reason}")]
    Cancelled {
        /// Reason given to the cancel handle
        reason: String,
    },
}

impl TransportError {
    /// The HTTP response, when the failure originated from one.
    #[must_use]
    pub const fn response(&self) -> Option<&HttpResponse> {
        match self {
            Self::Status { response } => Some(response),
            _ => None,
        }
    }

    /// Status code of the failed response, if any.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        self.response().map(|r| r.status)
    }

    /// Returns `true` for [`TransportError::Cancelled`].
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Short stable label for logs and metrics.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::Status { .. } => "status",
            Self::Timeout(_) => "timeout",
            Self::Network(_) => "network",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Cancelled { .. } => "cancelled",
        }
    }

    /// JSON form passed to failure and done notifications.
    #[must_use]
    pub fn to_payload(&self) -> Value {
        let mut payload = json!({
            "kind": self.as_label(),
            "message": self.to_string(),
        });
        if let Some(response) = self.response() {
            payload["response"] = response.to_value();
        }
        payload
    }
}

/// Single-use capability cancelling one in-flight request.
///
/// Clones share the same token: cancelling any clone cancels the request.
#[derive(Clone, Debug, Default)]
pub struct CancelHandle {
    token: CancellationToken,
    reason: Arc<OnceLock<String>>,
}

impl CancelHandle {
    /// A fresh, un-cancelled handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the request. Only the first reason is kept; later calls are no-ops.
    pub fn cancel(&self, reason: impl Into<String>) {
        let _ = self.reason.set(reason.into());
        self.token.cancel();
    }

    /// Whether the request has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Reason given at cancellation; teardown cancellations carry [`TEARDOWN_REASON`].
    #[must_use]
    pub fn reason(&self) -> String {
        self.reason
            .get()
            .cloned()
            .unwrap_or_else(|| TEARDOWN_REASON.to_string())
    }

    /// Token transports race the request against.
    #[must_use]
    pub const fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// A request in flight.
///
/// Resolves to the response, or to an error (including
/// [`TransportError::Cancelled`] if it was cancelled first). Dropping it
/// before it settles cancels the request.
#[must_use = "requests are cancelled when the pending request is dropped"]
pub struct PendingRequest {
    handle: CancelHandle,
    inner: BoxFuture<'static, Result<HttpResponse, TransportError>>,
    guard: Option<DropGuard>,
}

impl PendingRequest {
    /// Wrap `request` so it races against `handle`.
    pub fn new<F>(handle: CancelHandle, request: F) -> Self
    where
        F: Future<Output = Result<HttpResponse, TransportError>> + Send + 'static,
    {
        let watched = handle.clone();
        let inner = Box::pin(async move {
            tokio::select! {
                biased;
                () = watched.token.cancelled() => Err(TransportError::Cancelled {
                    reason: watched.reason(),
                }),
                result = request => result,
            }
        });

        Self {
            guard: Some(handle.token.clone().drop_guard()),
            handle,
            inner,
        }
    }

    /// A request that has already failed, e.g. because it could not be built.
    pub fn failed(error: TransportError) -> Self {
        Self::new(CancelHandle::new(), std::future::ready(Err(error)))
    }

    /// Handle cancelling this request.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        self.handle.clone()
    }

    /// Cancel this request with the default user reason.
    pub fn cancel(&self) {
        self.handle.cancel(USER_REASON);
    }
}

impl Future for PendingRequest {
    type Output = Result<HttpResponse, TransportError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let result = ready!(self.inner.as_mut().poll(cx));
        // Settled: later drops must not flip the token
        if let Some(guard) = self.guard.take() {
            let _ = guard.disarm();
        }
        Poll::Ready(result)
    }
}

impl fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRequest")
            .field("cancelled", &self.handle.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// An HTTP client issuing cancellable requests.
///
/// # Dyn Compatibility
///
/// Used as `Arc<dyn Transport>` by the task call adapter.
pub trait Transport: Send + Sync {
    /// Issue a request. Never fails synchronously; failures surface through
    /// the pending request.
    fn request(&self, descriptor: RequestDescriptor) -> PendingRequest;

    /// `GET path`.
    fn get(&self, path: &str, options: RequestOptions) -> PendingRequest {
        self.request(RequestDescriptor::new(Method::Get, path, None).with_options(options))
    }

    /// `POST path` with `body`.
    fn post(&self, path: &str, body: Value, options: RequestOptions) -> PendingRequest {
        self.request(RequestDescriptor::new(Method::Post, path, Some(body)).with_options(options))
    }

    /// `PUT path` with `body`.
    fn put(&self, path: &str, body: Value, options: RequestOptions) -> PendingRequest {
        self.request(RequestDescriptor::new(Method::Put, path, Some(body)).with_options(options))
    }

    /// `PATCH path` with `body`.
    fn patch(&self, path: &str, body: Value, options: RequestOptions) -> PendingRequest {
        self.request(RequestDescriptor::new(Method::Patch, path, Some(body)).with_options(options))
    }

    /// `DELETE path` with `body` (usually `null`).
    fn delete(&self, path: &str, body: Value, options: RequestOptions) -> PendingRequest {
        self.request(RequestDescriptor::new(Method::Delete, path, Some(body)).with_options(options))
    }
}
