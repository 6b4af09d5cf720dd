//! Bearer authentication middleware
//!
//! Extracts the bearer token, validates it (JWT or opaque), and injects
//! the caller's [`Identity`] into request extensions. Challenges carry a
//! `WWW-Authenticate` header naming this gateway as the authorization
//! server; clients bootstrap their entire OAuth flow from that header, so
//! its shape is load-bearing.

pub mod jwks;
pub mod validator;

pub use jwks::JwksCache;
pub use validator::{ParsedToken, TokenValidator};

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{debug, warn};

use toolgate_core::{GatewayError, Identity};

use crate::server::origin::request_origin;

/// Shared authentication state for the middleware.
#[derive(Clone)]
pub struct AuthState {
    pub validator: Arc<TokenValidator>,
}

impl AuthState {
    pub fn new(validator: Arc<TokenValidator>) -> Self {
        Self { validator }
    }
}

/// 401 challenge pointing the client at this gateway's discovery metadata.
fn unauthorized(origin: &str, error: &GatewayError) -> Response {
    let challenge = format!("Bearer realm=\"{origin}\", as_uri=\"{origin}\"");
    let mut response =
        (StatusCode::UNAUTHORIZED, axum::Json(error.to_body())).into_response();
    if let Ok(value) = HeaderValue::from_str(&challenge) {
        response
            .headers_mut()
            .insert(header::WWW_AUTHENTICATE, value);
    }
    response
}

/// Middleware protecting the tool endpoint.
pub async fn require_auth(
    State(auth): State<AuthState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    // CORS preflight never carries credentials.
    if request.method() == axum::http::Method::OPTIONS {
        return next.run(request).await;
    }

    if !auth.validator.enabled() {
        request.extensions_mut().insert(Identity::anonymous());
        return next.run(request).await;
    }

    let origin = request_origin(request.headers());

    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")));

    // A missing or non-Bearer header is a malformed request, though the
    // status stays 401 so the challenge header can drive discovery.
    let Some(token) = token else {
        debug!("[Auth] Missing bearer token, challenging");
        return unauthorized(
            &origin,
            &GatewayError::InvalidRequest("missing or malformed authorization header".to_string()),
        );
    };

    match auth.validator.authenticate(token).await {
        Ok(identity) => {
            debug!("[Auth] Authenticated subject {}", identity.subject);
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Err(e @ GatewayError::UpstreamUnavailable(_)) => {
            warn!("[Auth] Validation unavailable: {}", e);
            (StatusCode::BAD_GATEWAY, axum::Json(e.to_body())).into_response()
        }
        Err(e) => {
            debug!("[Auth] Rejected token: {}", e);
            unauthorized(&origin, &e)
        }
    }
}
