//! `HttpApi` against a local mock server.

#![allow(clippy::unwrap_used)]

use crud_saga_api::{HttpApi, NotificationTriple, TaskApi, TransportConfig, create_apis};
use crud_saga_core::action::ActionCreator;
use crud_saga_core::transport::{RequestOptions, Transport, TransportError};
use crud_saga_testing::reducer_test::assertions::assert_kinds;
use crud_saga_testing::{RecordingContext, init_tracing};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn api(server: &MockServer) -> HttpApi {
    HttpApi::new(TransportConfig::default().with_base_url(server.uri())).unwrap()
}

#[tokio::test]
async fn test_get_parses_json_response() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/todos"))
        .and(header("content-type", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 1}])))
        .expect(1)
        .mount(&server)
        .await;

    let response = api(&server).await.get("/todos", RequestOptions::default()).await.unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.data, json!([{"id": 1}]));
}

#[tokio::test]
async fn test_request_options_add_query_and_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/todos"))
        .and(query_param("done", "true"))
        .and(header("x-request-id", "r-1"))
        .and(header("x-tenant", "acme"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let api = HttpApi::new(
        TransportConfig::default()
            .with_base_url(server.uri())
            .with_header("X-Tenant", "acme"),
    )
    .unwrap();

    let options = RequestOptions::default()
        .with_query("done", "true")
        .with_header("X-Request-Id", "r-1");
    api.get("/todos", options).await.unwrap();
}

#[tokio::test]
async fn test_post_sends_json_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/todos"))
        .and(body_json(json!({"title": "write tests"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 9, "title": "write tests"})))
        .expect(1)
        .mount(&server)
        .await;

    let response = api(&server)
        .await
        .post("/todos", json!({"title": "write tests"}), RequestOptions::default())
        .await
        .unwrap();

    assert_eq!(response.status, 201);
    assert_eq!(response.data["id"], 9);
}

#[tokio::test]
async fn test_empty_and_non_json_bodies() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/todos/1"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&server)
        .await;

    let api = api(&server).await;
    let deleted = api.delete("/todos/1", Value::Null, RequestOptions::default()).await.unwrap();
    assert_eq!(deleted.status, 204);
    assert_eq!(deleted.data, Value::Null);

    let health = api.get("/health", RequestOptions::default()).await.unwrap();
    assert_eq!(health.data, json!("ok"));
}

#[tokio::test]
async fn test_non_2xx_is_status_error_with_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/todos/404"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "not found"})))
        .mount(&server)
        .await;

    let err = api(&server)
        .await
        .get("/todos/404", RequestOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(404));
    assert_eq!(err.to_string(), "Request failed with status code 404");
    assert_eq!(err.response().unwrap().data, json!({"message": "not found"}));
}

#[tokio::test]
async fn test_slow_response_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let err = api(&server)
        .await
        .get("/slow", RequestOptions::default().with_timeout(Duration::from_millis(50)))
        .await
        .unwrap_err();

    assert!(matches!(err, TransportError::Timeout(_)), "{err:?}");
}

#[tokio::test]
async fn test_cancel_settles_pending_request_immediately() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let api = api(&server).await;
    let pending = api.get("/slow", RequestOptions::default());
    let handle = pending.cancel_handle();

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.cancel("request was cancelled by user");
    });

    let err = tokio::time::timeout(Duration::from_secs(1), pending)
        .await
        .unwrap()
        .unwrap_err();
    canceller.await.unwrap();

    assert_eq!(
        err,
        TransportError::Cancelled {
            reason: "request was cancelled by user".to_string()
        }
    );
}

#[tokio::test]
async fn test_authorization_applies_to_later_requests() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/me"))
        .and(header("authorization", "Bearer t0k3n"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "me"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/me"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let apis = create_apis(TransportConfig::default().with_base_url(server.uri())).unwrap();

    let anonymous = apis.http.get("/me", RequestOptions::default()).await.unwrap_err();
    assert_eq!(anonymous.status(), Some(401));

    apis.http.add_authorization("Bearer t0k3n").unwrap();
    let me = apis.http.get("/me", RequestOptions::default()).await.unwrap();
    assert_eq!(me.data["name"], "me");

    apis.http.remove_authorization();
    let again = apis.http.get("/me", RequestOptions::default()).await.unwrap_err();
    assert_eq!(again.status(), Some(401));
}

#[tokio::test]
async fn test_task_api_reports_server_failure() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/todos/3"))
        .and(body_json(json!({"title": "x"})))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({"title": "too short"})))
        .mount(&server)
        .await;

    let http: Arc<dyn Transport> = Arc::new(api(&server).await);
    let tasks = TaskApi::new(http);
    let ctx = RecordingContext::new(json!({}));

    tasks
        .put(
            "/todos/3",
            json!({"title": "x"}),
            NotificationTriple::new(
                ActionCreator::of_kind("todos/updateSuccess"),
                ActionCreator::of_kind("todos/updateFail"),
            )
            .with_done(ActionCreator::of_kind("todos/updateDone")),
        )
        .unwrap()
        .run(ctx.as_ref())
        .await;

    let dispatched: Vec<_> = ctx.dispatched().into_iter().map(|r| r.action).collect();
    assert_kinds(&dispatched, &["todos/updateFail", "sagaApi/422", "todos/updateDone"]);
    assert_eq!(dispatched[1].payload["data"], json!({"title": "too short"}));
}

#[tokio::test]
async fn test_unreachable_server_is_network_error() {
    let api = HttpApi::new(TransportConfig::default().with_base_url("http://127.0.0.1:9")).unwrap();

    let err = api.get("/todos", RequestOptions::default()).await.unwrap_err();

    assert!(matches!(err, TransportError::Network(_)), "{err:?}");
    assert!(err.response().is_none());
}
