//! HTTP API tests against the router, without a listening socket

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use common::{citing_generator, config, service_with, CREDIT_POLICY};
use grounded_rag::server::{build_router, state::AppState};
use serde_json::{json, Value};
use tower::ServiceExt;

fn app() -> Router {
    build_router(AppState::from_service(service_with(config(), citing_generator())), false)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1_000_000)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

async fn ingest_credit_policy(app: &Router) {
    let (status, body) = send(
        app,
        "POST",
        "/api/ingest",
        Some(json!({
            "documents": [{"source_path": "credito.txt", "content": CREDIT_POLICY}]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["documents"][0]["status"], "indexed");
}

#[tokio::test]
async fn test_health_and_ready() {
    let app = app();
    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, _) = send(&app, "GET", "/ready", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_ask_on_empty_index_is_conflict() {
    let app = app();
    let (status, body) = send(
        &app,
        "POST",
        "/api/ask",
        Some(json!({"question": "política de crédito"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["type"], "empty_index");
}

#[tokio::test]
async fn test_empty_question_is_bad_request() {
    let app = app();
    ingest_credit_policy(&app).await;
    let (status, body) = send(&app, "POST", "/api/ask", Some(json!({"question": "  "}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["type"], "invalid_input");
}

#[tokio::test]
async fn test_ask_evaluate_feedback_flow() {
    let app = app();
    ingest_credit_policy(&app).await;

    let (status, answer) = send(
        &app,
        "POST",
        "/api/ask",
        Some(json!({"question": "Quando o limite de crédito é revisado?", "max_documents": 3})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(answer["outcome"], "answered");
    assert_eq!(answer["grounded"], true);
    let id = answer["interaction_id"].as_str().unwrap().to_string();

    let (status, interaction) = send(&app, "GET", &format!("/api/interactions/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(interaction["question"], "Quando o limite de crédito é revisado?");

    let (status, record) = send(
        &app,
        "POST",
        &format!("/api/evaluations/{}", id),
        Some(json!({"ground_truth": "O limite de crédito é revisado anualmente."})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(record["faithfulness"]["value"], 1.0);
    assert_eq!(record["context_recall"]["status"], "score");

    let (status, stored) = send(&app, "GET", &format!("/api/evaluations/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stored["interaction_id"], id.as_str());

    let (status, state) =
        send(&app, "GET", &format!("/api/evaluations/{}/status", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(state["status"], "completed");

    let (status, _) = send(
        &app,
        "POST",
        &format!("/api/interactions/{}/feedback", id),
        Some(json!({"rating": 5, "comment": "clara"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = send(
        &app,
        "POST",
        &format!("/api/interactions/{}/feedback", id),
        Some(json!({"rating": 9})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, report) = send(&app, "GET", "/api/quality?days=7", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["evaluated_interactions"], 1);
    assert_eq!(report["feedback"]["count"], 1);

    let (status, body) = send(&app, "GET", &format!("/api/quality?days={}", i64::MAX), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["type"], "invalid_input");
}

#[tokio::test]
async fn test_unknown_ids_are_not_found() {
    let app = app();
    let id = uuid::Uuid::new_v4();
    for (method, uri) in [
        ("GET", format!("/api/interactions/{}", id)),
        ("GET", format!("/api/evaluations/{}", id)),
        ("GET", format!("/api/evaluations/{}/status", id)),
        ("DELETE", format!("/api/documents/{}", id)),
    ] {
        let (status, body) = send(&app, method, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{} {}", method, uri);
        assert_eq!(body["error"]["type"], "not_found");
    }
}

#[tokio::test]
async fn test_search_stats_and_delete() {
    let app = app();
    ingest_credit_policy(&app).await;

    let (status, search) = send(
        &app,
        "POST",
        "/api/search",
        Some(json!({"query": "atraso noventa dias", "top_k": 2})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(search["hits"][0]["rank"], 1);
    let document_id = search["hits"][0]["source"]["document_id"]
        .as_str()
        .unwrap()
        .to_string();

    let (status, stats) = send(&app, "GET", "/api/index/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["store"]["documents"], 1);
    assert!(stats["index"]["count"].as_u64().unwrap() >= 1);

    let (status, deleted) =
        send(&app, "DELETE", &format!("/api/documents/{}", document_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(deleted["chunks_deleted"].as_u64().unwrap() >= 1);

    let (_, stats) = send(&app, "GET", "/api/index/stats", None).await;
    assert_eq!(stats["index"]["count"], 0);
}

#[tokio::test]
async fn test_deferred_request_without_worker_fails_cleanly() {
    let app = app();
    ingest_credit_policy(&app).await;
    let (_, answer) = send(&app, "POST", "/api/ask", Some(json!({"question": "limite de crédito?"}))).await;
    let id = answer["interaction_id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/evaluations/{}", id),
        Some(json!({"deferred": true})),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["type"], "internal_error");
}

#[tokio::test]
async fn test_batch_endpoint() {
    let app = app();
    ingest_credit_policy(&app).await;
    send(&app, "POST", "/api/ask", Some(json!({"question": "limite de crédito?"}))).await;

    let (status, report) = send(&app, "POST", "/api/evaluations", Some(json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["records"].as_array().unwrap().len(), 1);
    assert_eq!(report["summary"]["evaluated_interactions"], 1);

    let (status, body) = send(
        &app,
        "POST",
        "/api/evaluations/dataset",
        Some(json!({"samples": []})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["type"], "invalid_input");
}
