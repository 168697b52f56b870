//! Mock transport.

use crud_saga_core::transport::{
    CancelHandle, HttpResponse, PendingRequest, RequestDescriptor, Transport, TransportError,
};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// A request seen by [`MockTransport`].
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    /// What was asked for
    pub descriptor: RequestDescriptor,
    /// Handle of the pending request it produced
    pub handle: CancelHandle,
}

#[derive(Clone, Debug)]
struct Scripted {
    result: Result<HttpResponse, TransportError>,
    latency: Duration,
}

#[derive(Debug)]
struct MockState {
    script: VecDeque<Scripted>,
    fallback: Scripted,
    requests: Vec<RecordedRequest>,
}

/// Scripted [`Transport`] for tests.
///
/// Responses are served in the order they were scripted; once the script is
/// exhausted every request gets the fallback (`200` with `null` data unless
/// changed). Latency is simulated with `tokio::time::sleep`, so it plays well
/// with paused time.
///
/// # Example
///
/// ```
/// use crud_saga_core::transport::{RequestOptions, Transport};
/// use crud_saga_testing::MockTransport;
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let transport = MockTransport::new().with_response(json!([{"id": 1}]));
/// let response = transport.get("/todos", RequestOptions::default()).await.unwrap();
///
/// assert_eq!(response.data, json!([{"id": 1}]));
/// assert_eq!(transport.paths(), vec!["/todos"]);
/// # });
/// ```
#[derive(Clone, Debug)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Transport answering `200 null` to everything.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                script: VecDeque::new(),
                fallback: Scripted {
                    result: Ok(HttpResponse::new(200, Value::Null)),
                    latency: Duration::ZERO,
                },
                requests: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Script a raw result.
    #[must_use]
    pub fn with_result(
        self,
        result: Result<HttpResponse, TransportError>,
        latency: Duration,
    ) -> Self {
        self.lock().script.push_back(Scripted { result, latency });
        self
    }

    /// Script a `200` response carrying `data`.
    #[must_use]
    pub fn with_response(self, data: Value) -> Self {
        self.with_result(Ok(HttpResponse::new(200, data)), Duration::ZERO)
    }

    /// Script a `200` response delivered after `latency`.
    #[must_use]
    pub fn with_delayed_response(self, data: Value, latency: Duration) -> Self {
        self.with_result(Ok(HttpResponse::new(200, data)), latency)
    }

    /// Script a non-2xx response.
    #[must_use]
    pub fn with_status(self, status: u16, data: Value) -> Self {
        self.with_result(
            Err(TransportError::Status {
                response: HttpResponse::new(status, data),
            }),
            Duration::ZERO,
        )
    }

    /// Script a failure without a response.
    #[must_use]
    pub fn with_error(self, error: TransportError) -> Self {
        self.with_result(Err(error), Duration::ZERO)
    }

    /// Change what is served once the script runs out.
    #[must_use]
    pub fn with_fallback(self, result: Result<HttpResponse, TransportError>, latency: Duration) -> Self {
        self.lock().fallback = Scripted { result, latency };
        self
    }

    /// This transport as a shared trait object.
    #[must_use]
    pub fn shared(&self) -> Arc<dyn Transport> {
        Arc::new(self.clone())
    }

    /// Every request issued so far.
    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.lock().requests.clone()
    }

    /// Number of requests issued so far.
    #[must_use]
    pub fn request_count(&self) -> usize {
        self.lock().requests.len()
    }

    /// Paths of every request issued so far.
    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        self.lock()
            .requests
            .iter()
            .map(|r| r.descriptor.path().to_string())
            .collect()
    }
}

impl Transport for MockTransport {
    fn request(&self, descriptor: RequestDescriptor) -> PendingRequest {
        let handle = CancelHandle::new();
        let Scripted { result, latency } = {
            let mut state = self.lock();
            state.requests.push(RecordedRequest {
                descriptor: descriptor.clone(),
                handle: handle.clone(),
            });
            state
                .script
                .pop_front()
                .unwrap_or_else(|| state.fallback.clone())
        };

        tracing::debug!(method = %descriptor.method(), path = descriptor.path(), "Mock request");

        PendingRequest::new(handle, async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            result
        })
    }
}
