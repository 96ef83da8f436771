//! End-to-end pipeline tests over the full application with in-memory
//! stores: submit → dispatch → deliver → quality gate → events → webhook
//! fan-out.

use std::time::Duration;

use axum::http::StatusCode;
use axum_test::TestServer;
use serde_json::{json, Value};
use uuid::Uuid;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use dectl::test_utils::{create_test_app, create_test_app_with, test_config_with_parked_provider};
use dectl::webhooks::signing;

async fn server() -> TestServer {
    TestServer::new(create_test_app().await.router()).unwrap()
}

/// Poll until `check` passes or a couple of seconds elapse.
async fn eventually<F: Fn(&Value) -> bool>(server: &TestServer, path: &str, check: F) -> Value {
    for _ in 0..100 {
        let response = server.get(path).await;
        if response.status_code() == StatusCode::OK {
            let body: Value = response.json();
            if check(&body) {
                return body;
            }
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("condition never became true for {}", path);
}

#[tokio::test]
async fn text_request_happy_path_with_signed_fanout() {
    let hook = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&hook)
        .await;

    let server = server().await;

    // Subscribe to completions with a shared secret
    let response = server
        .post("/subscriptions")
        .json(&json!({
            "url": hook.uri(),
            "secret": "s3cr3t",
            "actions": ["request.completed"],
        }))
        .await;
    response.assert_status(StatusCode::CREATED);

    // Submit a pinned text request
    let response = server
        .post("/intake")
        .json(&json!({
            "query": "Write a haiku",
            "app_id": "A",
            "task_type": "text",
        }))
        .await;
    response.assert_status(StatusCode::ACCEPTED);
    let submitted: Value = response.json();
    assert_eq!(submitted["state"], "queued");
    assert_eq!(submitted["queue_position"], 1);
    assert_eq!(submitted["provider"], "openai");
    assert_eq!(submitted["task_type"], "text");
    let request_id = submitted["request_id"].as_str().unwrap().to_string();

    // The backend answers with a three-line haiku
    let response = server
        .post("/deliver")
        .json(&json!({
            "request_id": request_id,
            "success": true,
            "content_type": "text",
            "content": "An old silent pond\nA frog jumps into the pond\nSplash! Silence again.",
        }))
        .await;
    response.assert_status_ok();
    let delivered: Value = response.json();
    assert_eq!(delivered["state"], "delivered");
    assert!(delivered["quality_score"].as_f64().unwrap() > 0.5);
    let deliverable_id = delivered["deliverable_id"].as_str().unwrap().to_string();

    // Lifecycle closed
    let status = server
        .get(&format!("/status?request_id={}", request_id))
        .await;
    status.assert_status_ok();
    let status: Value = status.json();
    assert_eq!(status["state"], "completed");

    // The deliverable is retrievable with its content
    let response = server.get(&format!("/deliverable?id={}", deliverable_id)).await;
    response.assert_status_ok();
    let deliverable: Value = response.json();
    assert_eq!(
        deliverable["content"],
        json!("An old silent pond\nA frog jumps into the pond\nSplash! Silence again.")
    );

    // The full event trail exists
    let events = eventually(
        &server,
        &format!("/events?kind=request&id={}", request_id),
        |body| {
            let actions: Vec<&str> = body
                .as_array()
                .unwrap()
                .iter()
                .map(|event| event["action"].as_str().unwrap())
                .collect();
            ["request.created", "request.queued", "request.processing", "request.completed"]
                .iter()
                .all(|action| actions.contains(action))
        },
    )
    .await;
    assert!(!events.as_array().unwrap().is_empty());

    eventually(
        &server,
        &format!("/events?kind=deliverable&id={}", deliverable_id),
        |body| {
            let actions: Vec<&str> = body
                .as_array()
                .unwrap()
                .iter()
                .map(|event| event["action"].as_str().unwrap())
                .collect();
            actions.contains(&"deliverable.created") && actions.contains(&"deliverable.delivered")
        },
    )
    .await;

    // Exactly one signed webhook arrives for request.completed
    for _ in 0..100 {
        if !hook.received_requests().await.unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    let received = hook.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);

    let request = &received[0];
    assert_eq!(
        request.headers.get("X-DE-Event").unwrap().to_str().unwrap(),
        "request.completed"
    );
    assert!(request.headers.get("X-DE-Delivery").is_some());
    let signature = request
        .headers
        .get("X-DE-Signature")
        .unwrap()
        .to_str()
        .unwrap();
    assert_eq!(signature, signing::sign("s3cr3t", &request.body));

    let payload: Value = serde_json::from_slice(&request.body).unwrap();
    assert_eq!(payload["action"], "request.completed");
    assert_eq!(payload["eventable_type"], "request");
    assert_eq!(payload["eventable_id"], json!(request_id));

    // The global feed shows the journey
    let feed = eventually(&server, "/feed?limit=50", |body| {
        body.as_array()
            .unwrap()
            .iter()
            .any(|item| item["title"] == "Request completed")
    })
    .await;
    assert!(feed.as_array().unwrap().len() >= 2);
}

#[tokio::test]
async fn cancel_while_queued_then_cancel_is_idempotent() {
    let app = create_test_app_with(test_config_with_parked_provider("openai")).await;
    let server = TestServer::new(app.router()).unwrap();

    let response = server
        .post("/intake")
        .json(&json!({"query": "Write a poem", "task_type": "text"}))
        .await;
    response.assert_status(StatusCode::ACCEPTED);
    let submitted: Value = response.json();
    let request_id = submitted["request_id"].as_str().unwrap().to_string();
    assert_eq!(submitted["state"], "queued");

    let response = server.post("/cancel").json(&json!({"request_id": request_id})).await;
    response.assert_status_ok();
    let cancelled: Value = response.json();
    assert_eq!(cancelled["state"], "cancelled");

    // Idempotent
    let response = server.post("/cancel").json(&json!({"request_id": request_id})).await;
    response.assert_status_ok();

    // A cancelled request refuses deliveries
    let response = server
        .post("/deliver")
        .json(&json!({
            "request_id": request_id,
            "success": true,
            "content_type": "text",
            "content": "too late",
        }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["error_code"], "INVALID_STATUS");
}

#[tokio::test]
async fn error_envelope_and_request_id_header() {
    let server = server().await;

    // Unknown id: NOT_FOUND envelope with X-Request-ID
    let response = server.get(&format!("/status?request_id={}", Uuid::new_v4())).await;
    response.assert_status(StatusCode::NOT_FOUND);
    assert!(response.maybe_header("x-request-id").is_some());
    let body: Value = response.json();
    assert_eq!(body["error_code"], "NOT_FOUND");
    assert!(body["request_id"].is_string());
    assert!(body["error"].is_string());

    // Missing parameter
    let response = server.get("/status").await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["error_code"], "MISSING_PARAM");

    // Empty query
    let response = server.post("/intake").json(&json!({"query": "  "})).await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["error_code"], "MISSING_QUERY");

    // Unknown route
    let response = server.get("/nope").await;
    response.assert_status(StatusCode::NOT_FOUND);
    let body: Value = response.json();
    assert_eq!(body["error_code"], "ROUTE_NOT_FOUND");

    // Malformed JSON body
    let response = server
        .post("/intake")
        .add_header("content-type", "application/json")
        .text("{not json")
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["error_code"], "INVALID_JSON");
}

#[tokio::test]
async fn resubmitting_an_active_request_is_idempotent() {
    // A parked provider keeps the request queued across both submissions
    let app = create_test_app_with(test_config_with_parked_provider("openai")).await;
    let server = TestServer::new(app.router()).unwrap();

    let request_id = Uuid::new_v4();
    let submit = |attempt: u32| {
        json!({
            "query": "Write a haiku",
            "task_type": "text",
            "request_id": request_id,
            "metadata": {"attempt": attempt},
        })
    };

    let first = server.post("/intake").json(&submit(1)).await;
    first.assert_status(StatusCode::ACCEPTED);
    let first: Value = first.json();
    assert_eq!(first["state"], "queued");
    assert_eq!(first["queue_position"], 1);

    // Same id again while still queued: accepted, metadata updated,
    // no duplicate queue insertion
    let second = server.post("/intake").json(&submit(2)).await;
    second.assert_status(StatusCode::ACCEPTED);
    let second: Value = second.json();
    assert_eq!(second["state"], "queued");
    assert_eq!(second["queue_position"], 1);

    // Wait for the asynchronous lifecycle events to land, then give any
    // stray duplicates time to appear before counting
    eventually(
        &server,
        &format!("/events?kind=request&id={}", request_id),
        |body| {
            let actions: Vec<&str> = body
                .as_array()
                .unwrap()
                .iter()
                .map(|event| event["action"].as_str().unwrap())
                .collect();
            actions.contains(&"request.created") && actions.contains(&"request.queued")
        },
    )
    .await;
    tokio::time::sleep(Duration::from_millis(150)).await;

    let response = server
        .get(&format!("/events?kind=request&id={}", request_id))
        .await;
    response.assert_status_ok();
    let events: Value = response.json();
    let events = events.as_array().unwrap();
    let created = events.iter().filter(|event| event["action"] == "request.created").count();
    let queued = events.iter().filter(|event| event["action"] == "request.queued").count();
    assert_eq!(created, 1);
    assert_eq!(queued, 1);
    assert_eq!(events.len(), 2);

    // The feed did not grow either: one item per templated event
    let response = server.get("/feed?limit=100").await;
    response.assert_status_ok();
    let feed: Value = response.json();
    let link = format!("/requests/{}", request_id);
    let items = feed
        .as_array()
        .unwrap()
        .iter()
        .filter(|item| item["link"] == json!(link))
        .count();
    assert_eq!(items, 2);
}

#[tokio::test]
async fn resubmitting_a_terminal_request_conflicts() {
    let server = server().await;

    let request_id = Uuid::new_v4();
    let submit = json!({
        "query": "Write a haiku",
        "task_type": "text",
        "request_id": request_id,
    });

    server.post("/intake").json(&submit).await.assert_status(StatusCode::ACCEPTED);

    server
        .post("/deliver")
        .json(&json!({
            "request_id": request_id,
            "success": true,
            "content_type": "text",
            "content": "An old silent pond\nA frog jumps in\nSplash.",
        }))
        .await
        .assert_status_ok();

    // Active resubmission was fine; terminal resubmission conflicts
    let response = server.post("/intake").json(&submit).await;
    response.assert_status(StatusCode::CONFLICT);
    let body: Value = response.json();
    assert_eq!(body["error_code"], "CONFLICT");
}

#[tokio::test]
async fn provider_webhook_closes_the_lifecycle() {
    let server = server().await;

    let response = server
        .post("/intake")
        .json(&json!({"query": "Write a haiku", "task_type": "text"}))
        .await;
    let submitted: Value = response.json();
    let request_id = submitted["request_id"].as_str().unwrap().to_string();

    // Provider-native payload arrives on /webhook
    let response = server
        .post("/webhook?provider=openai")
        .json(&json!({
            "metadata": {"request_id": request_id},
            "choices": [{"message": {"content": "An old silent pond\nA frog jumps into the pond\nSplash! Silence again."}}],
        }))
        .await;
    response.assert_status_ok();
    let delivered: Value = response.json();
    assert_eq!(delivered["state"], "delivered");

    let status = server.get(&format!("/status?request_id={}", request_id)).await;
    let status: Value = status.json();
    assert_eq!(status["state"], "completed");

    // A payload with no recoverable correlator is a 400
    let response = server
        .post("/webhook?provider=openai")
        .json(&json!({"choices": []}))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["error_code"], "MISSING_FIELD");
}
