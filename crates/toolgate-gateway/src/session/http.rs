//! Streamable HTTP endpoint
//!
//! POST carries JSON-RPC messages in, GET opens a server-sent-event stream
//! for server-initiated messages, DELETE terminates the session. Session
//! binding is by the `mcp-session-id` header, with default-session
//! fallback handled by the router.

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures::stream::Stream;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::protocol::{
    self, error_response, INTERNAL_ERROR, INVALID_REQUEST, MCP_SESSION_ID_HEADER, PARSE_ERROR,
};
use super::router::{RouterError, SessionRouter};

/// Routes for the transport endpoint. Mounted at `/` and `/mcp` by the
/// gateway server.
pub fn routes(router: Arc<SessionRouter>) -> Router {
    Router::new()
        .route("/", get(handle_get).post(handle_post).delete(handle_delete))
        .with_state(router)
}

fn session_id_from(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(MCP_SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

fn last_event_id_from(headers: &HeaderMap) -> Option<u64> {
    headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

fn json_rpc_response(status: StatusCode, session_id: &str, body: serde_json::Value) -> Response {
    let mut response = (status, axum::Json(body)).into_response();
    if let Ok(value) = HeaderValue::from_str(session_id) {
        response
            .headers_mut()
            .insert(MCP_SESSION_ID_HEADER, value);
    }
    response
}

/// POST: dispatch one JSON-RPC message (or a batch) to the routed session.
async fn handle_post(
    State(router): State<Arc<SessionRouter>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let message: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            debug!("[Transport] Unparseable request body: {}", e);
            return (
                StatusCode::BAD_REQUEST,
                axum::Json(error_response(None, PARSE_ERROR, "Parse error")),
            )
                .into_response();
        }
    };

    let session_id = session_id_from(&headers);
    let is_init = match &message {
        serde_json::Value::Array(batch) => batch.iter().any(protocol::is_initialize),
        single => protocol::is_initialize(single),
    };

    let outcome = match router.resolve(session_id, is_init).await {
        Ok(outcome) => outcome,
        Err(RouterError::Capacity) => {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                axum::Json(error_response(None, INTERNAL_ERROR, "Session limit reached")),
            )
                .into_response();
        }
        Err(e) => {
            warn!("[Transport] Session resolution failed: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                axum::Json(error_response(None, INTERNAL_ERROR, "Failed to establish session")),
            )
                .into_response();
        }
    };
    let session = outcome.session;

    debug!(
        "[Transport] {} -> session {} ({:?})",
        protocol::method_name(&message).unwrap_or("<batch>"),
        session.id,
        outcome.route,
    );

    match message {
        serde_json::Value::Array(batch) => {
            if batch.is_empty() {
                return json_rpc_response(
                    StatusCode::BAD_REQUEST,
                    &session.id,
                    error_response(None, INVALID_REQUEST, "Empty batch"),
                );
            }
            let mut responses = Vec::new();
            for item in batch {
                let id = protocol::request_id(&item);
                match session.dispatch(item).await {
                    Ok(Some(response)) => responses.push(response),
                    Ok(None) => {}
                    Err(e) => {
                        warn!("[Transport] Engine error: {}", e);
                        responses.push(error_response(id, INTERNAL_ERROR, "Internal error"));
                    }
                }
            }
            if responses.is_empty() {
                accepted(&session.id)
            } else {
                json_rpc_response(StatusCode::OK, &session.id, serde_json::Value::Array(responses))
            }
        }
        single => {
            let is_notification = protocol::is_notification(&single);
            let id = protocol::request_id(&single);
            match session.dispatch(single).await {
                Ok(Some(response)) => json_rpc_response(StatusCode::OK, &session.id, response),
                Ok(None) if is_notification => accepted(&session.id),
                Ok(None) => json_rpc_response(
                    StatusCode::OK,
                    &session.id,
                    error_response(id, INTERNAL_ERROR, "Engine produced no response"),
                ),
                Err(e) => {
                    warn!("[Transport] Engine error: {}", e);
                    json_rpc_response(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        &session.id,
                        error_response(id, INTERNAL_ERROR, "Internal error"),
                    )
                }
            }
        }
    }
}

fn accepted(session_id: &str) -> Response {
    let mut response = StatusCode::ACCEPTED.into_response();
    if let Ok(value) = HeaderValue::from_str(session_id) {
        response.headers_mut().insert(MCP_SESSION_ID_HEADER, value);
    }
    response
}

/// GET: open a server-sent-event stream on the routed session, replaying
/// buffered events after `Last-Event-ID` on reconnect.
async fn handle_get(
    State(router): State<Arc<SessionRouter>>,
    headers: HeaderMap,
) -> Response {
    let accepts_sse = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("text/event-stream") || v.contains("*/*"))
        .unwrap_or(false);
    if !accepts_sse {
        return (
            StatusCode::NOT_ACCEPTABLE,
            axum::Json(error_response(
                None,
                INVALID_REQUEST,
                "Accept must include text/event-stream",
            )),
        )
            .into_response();
    }

    let session_id = session_id_from(&headers);
    let Some(session) = router.resolve_existing(session_id).await else {
        return (
            StatusCode::NOT_FOUND,
            axum::Json(error_response(None, INVALID_REQUEST, "No session established")),
        )
            .into_response();
    };

    let last_event_id = last_event_id_from(&headers);
    let (replay, rx) = session.subscribe(last_event_id).await;
    debug!(
        "[Transport] SSE subscriber on session {} (replaying {} events)",
        session.id,
        replay.len()
    );

    let stream = event_stream(replay, rx);
    let mut response = Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
        .into_response();
    if let Ok(value) = HeaderValue::from_str(&session.id) {
        response.headers_mut().insert(MCP_SESSION_ID_HEADER, value);
    }
    response
}

fn event_stream(
    replay: Vec<super::router::SessionEvent>,
    mut rx: broadcast::Receiver<super::router::SessionEvent>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        for event in replay {
            yield Ok(Event::default().id(event.id.to_string()).data(event.data));
        }
        loop {
            match rx.recv().await {
                Ok(event) => {
                    yield Ok(Event::default().id(event.id.to_string()).data(event.data));
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("[Transport] SSE subscriber lagged, skipped {} events", skipped);
                }
                // Session terminated; end the stream.
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

/// DELETE: terminate the routed session. Succeeds whether or not a
/// session existed; termination never creates one.
async fn handle_delete(
    State(router): State<Arc<SessionRouter>>,
    headers: HeaderMap,
) -> Response {
    let session_id = session_id_from(&headers);
    match router.terminate(session_id).await {
        Some(id) => {
            debug!("[Transport] DELETE terminated session {}", id);
            (StatusCode::OK, axum::Json(serde_json::json!({ "terminated": id }))).into_response()
        }
        None => (StatusCode::OK, axum::Json(serde_json::json!({ "terminated": null })))
            .into_response(),
    }
}
