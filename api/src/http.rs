//! reqwest-backed cancellable transport.

use crate::config::TransportConfig;
use crud_saga_core::error::SagaError;
use crud_saga_core::transport::{
    CancelHandle, HttpResponse, Method, PendingRequest, RequestDescriptor, Transport,
    TransportError,
};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, RequestBuilder, Url};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

/// Cancellable HTTP transport.
///
/// Owns its configuration: base address, timeout and default headers. Header
/// changes apply to every request issued afterwards through this instance.
pub struct HttpApi {
    client: Client,
    base_url: String,
    timeout: Duration,
    headers: RwLock<HeaderMap>,
}

impl HttpApi {
    /// Build a transport from `config`.
    ///
    /// # Errors
    ///
    /// - [`SagaError::InvalidArgument`] if the base URL or a header is malformed
    /// - [`SagaError::Client`] if the HTTP client cannot be built
    pub fn new(config: TransportConfig) -> Result<Self, SagaError> {
        Url::parse(&config.base_url)
            .map_err(|e| SagaError::invalid(format!("invalid base url {:?}: {e}", config.base_url)))?;

        let client = Client::builder()
            .build()
            .map_err(|e| SagaError::Client(e.to_string()))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        for (name, value) in &config.headers {
            let (name, value) = parse_header(name, value)?;
            headers.insert(name, value);
        }

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout: config.timeout,
            headers: RwLock::new(headers),
        })
    }

    /// Base address requests are issued against.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Default per-request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Snapshot of the default headers.
    #[must_use]
    pub fn headers(&self) -> BTreeMap<String, String> {
        header_map(&self.read_headers())
    }

    /// Set a default header, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError::InvalidArgument`] if the name or value is not a valid header.
    pub fn add_header(&self, name: &str, value: &str) -> Result<(), SagaError> {
        let (name, value) = parse_header(name, value)?;
        tracing::debug!(header = %name, "Adding default header");
        self.write_headers().insert(name, value);
        Ok(())
    }

    /// Remove a default header. Removing an absent header is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError::InvalidArgument`] if the name is not a valid header.
    pub fn remove_header(&self, name: &str) -> Result<(), SagaError> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| SagaError::invalid(format!("invalid header name {name:?}: {e}")))?;
        self.write_headers().remove(&name);
        Ok(())
    }

    /// Set the `Authorization` header to `value`, as given.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError::InvalidArgument`] if `value` is not a valid header value.
    pub fn add_authorization(&self, value: &str) -> Result<(), SagaError> {
        let mut value = HeaderValue::from_str(value)
            .map_err(|e| SagaError::invalid(format!("invalid authorization value: {e}")))?;
        value.set_sensitive(true);
        self.write_headers().insert(AUTHORIZATION, value);
        Ok(())
    }

    /// Remove the `Authorization` header.
    pub fn remove_authorization(&self) {
        self.write_headers().remove(AUTHORIZATION);
    }

    fn read_headers(&self) -> RwLockReadGuard<'_, HeaderMap> {
        self.headers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_headers(&self) -> RwLockWriteGuard<'_, HeaderMap> {
        self.headers.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}/{path}", self.base_url)
        }
    }

    fn prepare(&self, descriptor: &RequestDescriptor, timeout: Duration) -> Result<RequestBuilder, TransportError> {
        let options = descriptor.options();

        let mut headers = self.read_headers().clone();
        for (name, value) in &options.headers {
            let (name, value) = parse_header(name, value)
                .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
            headers.insert(name, value);
        }

        let mut builder = self
            .client
            .request(method(descriptor.method()), self.url(descriptor.path()))
            .headers(headers)
            .timeout(timeout);

        if !options.query.is_empty() {
            builder = builder.query(&options.query);
        }

        match descriptor.body() {
            Some(Value::Null) | None => {},
            Some(body) => {
                let bytes = serde_json::to_vec(body)
                    .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
                builder = builder.body(bytes);
            },
        }

        Ok(builder)
    }
}

impl Transport for HttpApi {
    fn request(&self, descriptor: RequestDescriptor) -> PendingRequest {
        let timeout = descriptor.options().timeout.unwrap_or(self.timeout);
        let builder = match self.prepare(&descriptor, timeout) {
            Ok(builder) => builder,
            Err(e) => return PendingRequest::failed(e),
        };

        tracing::debug!(
            method = %descriptor.method(),
            path = descriptor.path(),
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            "Issuing request"
        );

        PendingRequest::new(CancelHandle::new(), async move {
            let response = builder.send().await.map_err(|e| classify(&e, timeout))?;
            read_response(response, timeout).await
        })
    }
}

impl std::fmt::Debug for HttpApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpApi")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

const fn method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
    }
}

fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue), SagaError> {
    let header = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| SagaError::invalid(format!("invalid header name {name:?}: {e}")))?;
    let value = HeaderValue::from_str(value)
        .map_err(|e| SagaError::invalid(format!("invalid value for header {name:?}: {e}")))?;
    Ok((header, value))
}

fn header_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| Some((name.to_string(), value.to_str().ok()?.to_string())))
        .collect()
}

fn classify(error: &reqwest::Error, timeout: Duration) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout(timeout)
    } else {
        TransportError::Network(error.to_string())
    }
}

async fn read_response(
    response: reqwest::Response,
    timeout: Duration,
) -> Result<HttpResponse, TransportError> {
    let status = response.status().as_u16();
    let headers = header_map(response.headers());
    let text = response.text().await.map_err(|e| classify(&e, timeout))?;

    let data = if text.is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&text).unwrap_or(Value::String(text))
    };

    let response = HttpResponse {
        status,
        headers,
        data,
    };

    if response.is_success() {
        Ok(response)
    } else {
        Err(TransportError::Status { response })
    }
}
