//! Task call adapter behavior against a scripted transport.

#![allow(clippy::unwrap_used)]

use crud_saga_api::{NotificationTriple, TaskApi};
use crud_saga_core::action::ActionCreator;
use crud_saga_core::outcome::{Outcome, Settlement};
use crud_saga_core::transport::{Method, RequestOptions, TransportError};
use crud_saga_testing::properties::failure_status;
use crud_saga_testing::reducer_test::assertions::{assert_kinds, assert_no_kind};
use crud_saga_testing::{MockTransport, RecordingContext, init_tracing};
use proptest::prelude::*;
use serde_json::{Value, json};
use std::time::Duration;

fn success() -> ActionCreator {
    ActionCreator::of_kind("todos/readAllSuccess")
}

fn failure() -> ActionCreator {
    ActionCreator::of_kind("todos/readAllFail")
}

fn done() -> ActionCreator {
    ActionCreator::of_kind("todos/readAllDone")
}

fn actions(ctx: &RecordingContext) -> Vec<crud_saga_core::Action> {
    ctx.dispatched().into_iter().map(|r| r.action).collect()
}

fn method_name() -> impl Strategy<Value = &'static str> {
    prop_oneof![Just("get"), Just("post"), Just("put"), Just("patch"), Just("delete")]
}

proptest! {
    #[test]
    fn missing_success_or_failure_is_rejected_before_any_request(
        method in method_name(),
        path in "/[a-z]{1,10}(/[0-9]{1,4})?",
        drop_success in any::<bool>(),
    ) {
        let transport = MockTransport::new();
        let api = TaskApi::new(transport.shared());

        let mut notify = NotificationTriple::new(success(), failure()).with_done(done());
        if drop_success {
            notify.success = None;
        } else {
            notify.failure = None;
        }

        let err = api.call(method, &path, Value::Null, notify).unwrap_err();
        prop_assert!(err.is_invalid_argument());
        prop_assert_eq!(transport.request_count(), 0);
    }

    #[test]
    fn get_never_carries_a_body_and_other_methods_always_do(
        method in method_name(),
        body in prop_oneof![Just(Value::Null), Just(json!({"title": "x"})), Just(json!([1, 2]))],
    ) {
        let api = TaskApi::new(MockTransport::new().shared());
        let payload = if method == "get" { Value::Null } else { body.clone() };

        let call = api
            .call(method, "/todos", payload, NotificationTriple::new(success(), failure()))
            .unwrap();

        if call.descriptor().method() == Method::Get {
            prop_assert_eq!(call.descriptor().body(), None);
        } else {
            prop_assert_eq!(call.descriptor().body(), Some(&body));
        }
    }
}

#[tokio::test]
async fn test_success_emits_success_then_done() {
    init_tracing();
    let transport = MockTransport::new().with_response(json!([{"id": 1}, {"id": 2}]));
    let api = TaskApi::new(transport.shared());
    let ctx = RecordingContext::new(json!({}));

    let settlement = api
        .get(
            "/todos",
            RequestOptions::default(),
            NotificationTriple::new(success(), failure()).with_done(done()),
        )
        .unwrap()
        .run(ctx.as_ref())
        .await;

    let dispatched = actions(&ctx);
    assert_kinds(&dispatched, &["todos/readAllSuccess", "todos/readAllDone"]);
    assert_eq!(dispatched[0].payload, json!([{"id": 1}, {"id": 2}]));
    assert_eq!(dispatched[1].payload, json!({"data": [{"id": 1}, {"id": 2}]}));
    assert_eq!(
        settlement,
        Settlement::Completed(Outcome::Success {
            data: json!([{"id": 1}, {"id": 2}])
        })
    );
}

#[tokio::test]
async fn test_success_without_done_emits_only_success() {
    let api = TaskApi::new(MockTransport::new().with_response(json!({"id": 3})).shared());
    let ctx = RecordingContext::new(json!({}));

    api.post("/todos", json!({"title": "a"}), NotificationTriple::new(success(), failure()))
        .unwrap()
        .run(ctx.as_ref())
        .await;

    assert_kinds(&actions(&ctx), &["todos/readAllSuccess"]);
}

#[tokio::test]
async fn test_failure_with_response_emits_fail_status_done() {
    let transport = MockTransport::new().with_status(404, json!({"message": "not found"}));
    let api = TaskApi::new(transport.shared());
    let ctx = RecordingContext::new(json!({}));

    let settlement = api
        .get(
            "/todos",
            RequestOptions::default(),
            NotificationTriple::new(success(), failure()).with_done(done()),
        )
        .unwrap()
        .run(ctx.as_ref())
        .await;

    let dispatched = actions(&ctx);
    assert_kinds(
        &dispatched,
        &["todos/readAllFail", "sagaApi/404", "todos/readAllDone"],
    );
    assert_eq!(dispatched[0].payload["response"]["status"], 404);
    assert_eq!(dispatched[1].payload["status"], 404);
    assert_eq!(dispatched[1].payload["data"], json!({"message": "not found"}));
    assert_eq!(dispatched[2].payload["error"], dispatched[0].payload);
    assert_no_kind(&dispatched, "todos/readAllSuccess");
    assert!(settlement.outcome().is_some_and(Outcome::is_failure));
}

#[tokio::test]
async fn test_failure_without_response_skips_status_notification() {
    let transport =
        MockTransport::new().with_error(TransportError::Network("connection refused".into()));
    let api = TaskApi::new(transport.shared());
    let ctx = RecordingContext::new(json!({}));

    api.get(
        "/todos",
        RequestOptions::default(),
        NotificationTriple::new(success(), failure()).with_done(done()),
    )
    .unwrap()
    .run(ctx.as_ref())
    .await;

    let dispatched = actions(&ctx);
    assert_kinds(&dispatched, &["todos/readAllFail", "todos/readAllDone"]);
    assert!(dispatched[0].payload.get("response").is_none());
}

#[tokio::test]
async fn test_timeout_is_an_ordinary_failure() {
    let transport =
        MockTransport::new().with_error(TransportError::Timeout(Duration::from_millis(5000)));
    let api = TaskApi::new(transport.shared());
    let ctx = RecordingContext::new(json!({}));

    let settlement = api
        .delete("/todos/1", NotificationTriple::new(success(), failure()))
        .unwrap()
        .run(ctx.as_ref())
        .await;

    assert!(!settlement.is_aborted());
    let dispatched = actions(&ctx);
    assert_kinds(&dispatched, &["todos/readAllFail"]);
    assert_eq!(dispatched[0].payload["kind"], "timeout");
}

#[tokio::test(start_paused = true)]
async fn test_cancel_twice_aborts_silently() {
    let transport =
        MockTransport::new().with_delayed_response(json!([]), Duration::from_secs(10));
    let api = TaskApi::new(transport.shared());
    let ctx = RecordingContext::new(json!({}));

    let issued = api
        .get(
            "/todos",
            RequestOptions::default(),
            NotificationTriple::new(success(), failure()).with_done(done()),
        )
        .unwrap()
        .issue();

    let handle = issued.cancel_handle();
    handle.cancel("request was cancelled by user");
    handle.cancel("request was cancelled by user");

    let settlement = issued.settle(ctx.as_ref()).await;

    assert!(settlement.is_aborted());
    assert!(ctx.dispatched().is_empty());
    assert_eq!(transport.request_count(), 1);
}

#[tokio::test]
async fn test_cancel_after_settle_is_noop() {
    let transport = MockTransport::new().with_response(json!([]));
    let api = TaskApi::new(transport.shared());
    let ctx = RecordingContext::new(json!({}));

    let issued = api
        .get("/todos", RequestOptions::default(), NotificationTriple::new(success(), failure()))
        .unwrap()
        .issue();
    let handle = issued.cancel_handle();

    let settlement = issued.settle(ctx.as_ref()).await;
    handle.cancel("late");
    handle.cancel("later");

    assert!(!settlement.is_aborted());
    assert_kinds(&actions(&ctx), &["todos/readAllSuccess"]);
}

#[tokio::test(start_paused = true)]
async fn test_dropping_the_task_cancels_its_request() {
    let transport =
        MockTransport::new().with_delayed_response(json!([]), Duration::from_secs(10));
    let api = TaskApi::new(transport.shared());
    let ctx = RecordingContext::new(json!({}));

    let task_ctx = ctx.clone();
    let task = tokio::spawn(async move {
        api.get("/todos", RequestOptions::default(), NotificationTriple::new(success(), failure()))
            .unwrap()
            .run(task_ctx.as_ref())
            .await
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());

    let requests = transport.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].handle.is_cancelled());

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert!(ctx.dispatched().is_empty());
}

proptest! {
    #[test]
    fn any_failure_status_is_forwarded_as_status_notification(status in failure_status()) {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let dispatched = runtime.block_on(async {
            let api = TaskApi::new(MockTransport::new().with_status(status, json!(null)).shared());
            let ctx = RecordingContext::new(json!({}));
            api.get("/todos", RequestOptions::default(), NotificationTriple::new(success(), failure()))
                .unwrap()
                .run(ctx.as_ref())
                .await;
            actions(&ctx)
        });

        prop_assert_eq!(dispatched.len(), 2);
        prop_assert_eq!(dispatched[1].kind.clone(), format!("sagaApi/{status}"));
    }
}
