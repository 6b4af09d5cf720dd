//! Request/response logging middleware
//!
//! One entry line and one exit line per request, correlated by trace id.
//! For tool-endpoint POSTs the JSON-RPC method is pulled out of the body
//! so the log shows what the request actually did. Bodies of credential
//! endpoints are never logged.

use axum::{
    body::{to_bytes, Body},
    extract::Request,
    middleware::Next,
    response::Response,
};
use tracing::{debug, Instrument};

use crate::logging::{RequestSpan, TraceContext};

/// Bodies larger than this are not buffered for method extraction.
const MAX_INSPECT_SIZE: usize = 1024 * 1024;

fn is_tool_endpoint(path: &str) -> bool {
    path == "/" || path == "/mcp"
}

fn declared_length(request: &Request) -> Option<usize> {
    request
        .headers()
        .get(axum::http::header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    // Buffer tool-endpoint POST bodies to extract the JSON-RPC method.
    // Only bodies whose declared length fits the inspection cap are
    // buffered; oversized or length-less bodies stream through untouched.
    let inspect = method == "POST"
        && is_tool_endpoint(&path)
        && declared_length(&request).map_or(false, |n| n <= MAX_INSPECT_SIZE);
    let (request, rpc_method) = if inspect {
        let (parts, body) = request.into_parts();
        match to_bytes(body, MAX_INSPECT_SIZE).await {
            Ok(bytes) => {
                let rpc_method = serde_json::from_slice::<serde_json::Value>(&bytes)
                    .ok()
                    .and_then(|v| {
                        v.get("method")
                            .and_then(|m| m.as_str())
                            .map(str::to_string)
                    });
                (Request::from_parts(parts, Body::from(bytes)), rpc_method)
            }
            Err(e) => {
                debug!("[Gateway] Failed to buffer request body: {}", e);
                (Request::from_parts(parts, Body::empty()), None)
            }
        }
    } else {
        (request, None)
    };

    let ctx = TraceContext::new(&method, &path).with_rpc_method(rpc_method);
    let span = RequestSpan::enter(&ctx);

    async move {
        RequestSpan::log_entry(&ctx);

        let mut request = request;
        request.extensions_mut().insert(ctx.clone());

        let response = next.run(request).await;
        RequestSpan::log_exit(&ctx, response.status().as_u16());
        response
    }
    .instrument(span)
    .await
}
