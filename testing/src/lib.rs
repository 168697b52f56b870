//! # Crud Saga Testing
//!
//! Testing utilities for CRUD resource sagas.
//!
//! This crate provides:
//! - [`MockTransport`]: scripted [`Transport`](crud_saga_core::Transport)
//!   that records every request and its cancel handle
//! - [`RecordingContext`]: a [`TaskContext`](crud_saga_core::TaskContext)
//!   that records dispatched actions with virtual timestamps
//! - [`ReducerTest`]: Given-When-Then harness for reducers
//! - proptest strategies for resource names, ids and status codes
//!
//! ## Example
//!
//! ```ignore
//! use crud_saga_testing::{MockTransport, RecordingContext};
//!
//! #[tokio::test]
//! async fn test_read_all() {
//!     let transport = MockTransport::new().with_response(json!([{"id": 1}]));
//!     let ctx = RecordingContext::new(json!({}));
//!
//!     let call = TaskApi::new(transport.shared()).get("/todos", triple)?;
//!     call.run(ctx.as_ref()).await;
//!
//!     assert_eq!(ctx.dispatched_kinds(), vec!["todos/readAllSuccess"]);
//! }
//! ```

pub mod context;
pub mod mocks;

pub use context::{RecordingContext, Recorded};
pub use mocks::{MockTransport, RecordedRequest};
pub use reducer_test::ReducerTest;

/// Install a tracing subscriber for tests.
///
/// Honors `RUST_LOG`, defaults to `warn`. Safe to call from every test.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Property-based testing strategies using proptest.
pub mod properties {
    use proptest::prelude::*;

    /// Valid resource names: non-empty, path-safe.
    pub fn resource_name() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_-]{0,15}"
    }

    /// Names that must be rejected: empty or whitespace only.
    pub fn blank_name() -> impl Strategy<Value = String> {
        " {0,4}"
    }

    /// Item identifiers, as found in trigger payloads.
    pub fn item_id() -> impl Strategy<Value = serde_json::Value> {
        prop_oneof![
            (1u64..1_000_000).prop_map(serde_json::Value::from),
            "[a-z0-9]{1,12}".prop_map(serde_json::Value::from),
        ]
    }

    /// Non-2xx HTTP status codes.
    pub fn failure_status() -> impl Strategy<Value = u16> {
        prop_oneof![300u16..400, 400u16..500, 500u16..600]
    }
}
