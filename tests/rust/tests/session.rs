//! Session bridging integration tests
//!
//! Exercises the decision table through the HTTP surface: session header
//! binding, default-session fallback for clients that drop the header,
//! lazy stateless creation, and termination semantics.

use axum::http::StatusCode;
use pretty_assertions::assert_eq;
use serde_json::json;
use tower::ServiceExt;

use tests::{body_json, open_gateway};

const SESSION_HEADER: &str = "mcp-session-id";

fn rpc(body: serde_json::Value, session_id: Option<&str>) -> axum::http::Request<axum::body::Body> {
    let mut builder = axum::http::Request::builder()
        .method("POST")
        .uri("/mcp")
        .header("host", "localhost:3100")
        .header("content-type", "application/json");
    if let Some(id) = session_id {
        builder = builder.header(SESSION_HEADER, id);
    }
    builder
        .body(axum::body::Body::from(body.to_string()))
        .unwrap()
}

fn initialize() -> serde_json::Value {
    json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}})
}

fn ping(id: u32) -> serde_json::Value {
    json!({"jsonrpc": "2.0", "id": id, "method": "ping"})
}

#[tokio::test]
async fn initialize_binds_a_session_and_the_header_sticks() {
    let app = open_gateway();

    let response = app.clone().oneshot(rpc(initialize(), None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let session_id = response.headers()[SESSION_HEADER].to_str().unwrap().to_string();
    assert!(!session_id.is_empty());

    // Explicitly bound follow-up.
    let response = app
        .clone()
        .oneshot(rpc(ping(2), Some(&session_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[SESSION_HEADER].to_str().unwrap(),
        session_id
    );
}

#[tokio::test]
async fn dropped_header_falls_back_to_the_default_session() {
    let app = open_gateway();

    let response = app.clone().oneshot(rpc(initialize(), None)).await.unwrap();
    let session_id = response.headers()[SESSION_HEADER].to_str().unwrap().to_string();

    // The client forgot the header; the request still reaches the same
    // session instead of erroring.
    let response = app.clone().oneshot(rpc(ping(2), None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[SESSION_HEADER].to_str().unwrap(),
        session_id
    );
}

#[tokio::test]
async fn unknown_session_id_self_heals_onto_the_default() {
    let app = open_gateway();

    let response = app.clone().oneshot(rpc(initialize(), None)).await.unwrap();
    let session_id = response.headers()[SESSION_HEADER].to_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(rpc(ping(2), Some("long-gone-session")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[SESSION_HEADER].to_str().unwrap(),
        session_id
    );
}

#[tokio::test]
async fn non_initialize_without_any_session_creates_one_lazily() {
    let app = open_gateway();

    let response = app.clone().oneshot(rpc(ping(1), None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    // The engine answered; the request was not rejected for lacking an
    // initialization handshake.
    assert_eq!(body["result"], json!({}));
}

#[tokio::test]
async fn notifications_are_accepted_without_a_body() {
    let app = open_gateway();
    let response = app
        .oneshot(rpc(
            json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn delete_terminates_and_never_fabricates() {
    let app = open_gateway();

    // DELETE with no session at all: 200, nothing created.
    let request = axum::http::Request::builder()
        .method("DELETE")
        .uri("/mcp")
        .header("host", "localhost:3100")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["terminated"].is_null());

    // Establish then terminate by id.
    let response = app.clone().oneshot(rpc(initialize(), None)).await.unwrap();
    let session_id = response.headers()[SESSION_HEADER].to_str().unwrap().to_string();

    let request = axum::http::Request::builder()
        .method("DELETE")
        .uri("/mcp")
        .header("host", "localhost:3100")
        .header(SESSION_HEADER, &session_id)
        .body(axum::body::Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["terminated"], session_id.as_str());

    // The terminated session is gone; the next request builds a new one.
    let response = app.oneshot(rpc(ping(3), Some(&session_id))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_ne!(
        response.headers()[SESSION_HEADER].to_str().unwrap(),
        session_id
    );
}

#[tokio::test]
async fn event_stream_requires_a_session_and_sse_accept() {
    let app = open_gateway();

    // No Accept header.
    let request = axum::http::Request::builder()
        .method("GET")
        .uri("/mcp")
        .header("host", "localhost:3100")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);

    // Correct Accept but no session established.
    let request = axum::http::Request::builder()
        .method("GET")
        .uri("/mcp")
        .header("host", "localhost:3100")
        .header("accept", "text/event-stream")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn root_path_serves_the_same_transport() {
    let app = open_gateway();
    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/")
        .header("host", "localhost:3100")
        .header("content-type", "application/json")
        .body(axum::body::Body::from(initialize().to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key(SESSION_HEADER));
}
