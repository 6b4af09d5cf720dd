//! OAuth surface handlers
//!
//! Discovery documents, registration, authorization redirect, and the
//! token relay. Discovery always names the gateway's own origin as the
//! issuer and authorization server, while key material stays delegated to
//! the upstream provider. Clients therefore talk to the gateway for
//! everything and the gateway decides what is intercepted (registration)
//! and what passes through (authorize, token).

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::{debug, info, warn};

use toolgate_core::GatewayError;

use super::origin::request_origin;
use super::ProxyState;
use crate::provision::RegisterRequest;

fn error_reply(error: GatewayError) -> Response {
    let status =
        StatusCode::from_u16(error.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(error.to_body())).into_response()
}

impl ProxyState {
    /// Origin the gateway advertises: a configured public URL wins, else
    /// the origin the caller addressed.
    fn advertised_origin(&self, headers: &HeaderMap) -> String {
        self.server
            .public_url
            .clone()
            .unwrap_or_else(|| request_origin(headers))
    }
}

fn jwks_uri(state: &ProxyState, origin: &str) -> String {
    match state.auth.issuer_base() {
        Some(issuer) => format!("{}/.well-known/jwks.json", issuer),
        // No upstream: point at ourselves so the document stays well-formed.
        None => format!("{}/.well-known/jwks.json", origin),
    }
}

/// GET /.well-known/oauth-authorization-server (RFC 8414)
pub async fn oauth_authorization_server(
    State(state): State<ProxyState>,
    headers: HeaderMap,
) -> Json<serde_json::Value> {
    let origin = state.advertised_origin(&headers);
    debug!("[OAuth] Serving authorization server metadata for {}", origin);

    Json(json!({
        "issuer": origin,
        "authorization_endpoint": format!("{}/authorize", origin),
        "token_endpoint": format!("{}/oauth/token", origin),
        "registration_endpoint": format!("{}/register", origin),
        "jwks_uri": jwks_uri(&state, &origin),
        "response_types_supported": ["code"],
        "grant_types_supported": ["authorization_code", "refresh_token"],
        "code_challenge_methods_supported": ["S256"],
        "token_endpoint_auth_methods_supported": ["none"],
        "scopes_supported": ["openid", "profile", "email", "offline_access"],
    }))
}

/// GET /.well-known/openid-configuration
pub async fn openid_configuration(
    State(state): State<ProxyState>,
    headers: HeaderMap,
) -> Json<serde_json::Value> {
    let origin = state.advertised_origin(&headers);

    let userinfo = match state.auth.issuer_base() {
        Some(issuer) => format!("{}/userinfo", issuer),
        None => format!("{}/userinfo", origin),
    };

    Json(json!({
        "issuer": origin,
        "authorization_endpoint": format!("{}/authorize", origin),
        "token_endpoint": format!("{}/oauth/token", origin),
        "registration_endpoint": format!("{}/oidc/register", origin),
        "userinfo_endpoint": userinfo,
        "jwks_uri": jwks_uri(&state, &origin),
        "response_types_supported": ["code"],
        "grant_types_supported": ["authorization_code", "refresh_token"],
        "subject_types_supported": ["public"],
        "id_token_signing_alg_values_supported": ["RS256"],
        "code_challenge_methods_supported": ["S256"],
        "token_endpoint_auth_methods_supported": ["none"],
        "scopes_supported": ["openid", "profile", "email", "offline_access"],
    }))
}

/// GET /.well-known/oauth-protected-resource (RFC 9728)
pub async fn protected_resource(
    State(state): State<ProxyState>,
    headers: HeaderMap,
) -> Json<serde_json::Value> {
    let origin = state.advertised_origin(&headers);

    Json(json!({
        "resource": origin,
        "authorization_servers": [origin],
        "bearer_methods_supported": ["header"],
        "scopes_supported": ["openid", "profile", "email", "offline_access"],
    }))
}

/// POST /register and /oidc/register: dynamic client registration,
/// provisioned through the upstream management API.
pub async fn register(State(state): State<ProxyState>, body: Bytes) -> Response {
    let request: RegisterRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            return error_reply(GatewayError::InvalidRequest(format!(
                "malformed registration request: {}",
                e
            )))
        }
    };

    let Some(provisioning) = state.provisioning.as_ref() else {
        return error_reply(GatewayError::RegistrationFailed(
            "registration requires an upstream issuer".to_string(),
        ));
    };

    match provisioning.register(request).await {
        Ok(response) => {
            info!("[OAuth] Registered client {}", response.client_id);
            (StatusCode::CREATED, Json(response)).into_response()
        }
        Err(e) => {
            warn!("[OAuth] Registration failed: {}", e);
            error_reply(e)
        }
    }
}

fn query_param(query: &str, name: &str) -> Option<String> {
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

/// GET /authorize: denylist gate, then a verbatim redirect to the
/// upstream authorization endpoint. Nothing about the query is rewritten;
/// the client id handed out at registration is the upstream one.
pub async fn authorize(
    State(state): State<ProxyState>,
    request: axum::extract::Request,
) -> Response {
    let query = request.uri().query().unwrap_or("");

    let Some(issuer) = state.auth.issuer_base() else {
        return error_reply(GatewayError::InvalidRequest(
            "authorization requires an upstream issuer".to_string(),
        ));
    };

    if let Some(client_id) = query_param(query, "client_id") {
        if state
            .auth
            .denylisted_client_ids
            .iter()
            .any(|d| d == &client_id)
        {
            warn!("[OAuth] Rejected denylisted client {}", client_id);
            return error_reply(GatewayError::InvalidClient(format!(
                "client {} is no longer valid, re-register",
                client_id
            )));
        }
    }

    let location = if query.is_empty() {
        format!("{}/authorize", issuer)
    } else {
        format!("{}/authorize?{}", issuer, query)
    };
    debug!("[OAuth] Redirecting authorization to upstream");

    // 302 Found, as OAuth clients expect from an authorization endpoint.
    match HeaderValue::from_str(&location) {
        Ok(value) => {
            let mut response = StatusCode::FOUND.into_response();
            response.headers_mut().insert(header::LOCATION, value);
            response
        }
        Err(_) => error_reply(GatewayError::InvalidRequest(
            "unrepresentable redirect target".to_string(),
        )),
    }
}

/// POST /oauth/token: relay the exchange to the upstream token endpoint,
/// passing body and status through verbatim.
pub async fn token(
    State(state): State<ProxyState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(issuer) = state.auth.issuer_base() else {
        return error_reply(GatewayError::InvalidRequest(
            "token exchange requires an upstream issuer".to_string(),
        ));
    };

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/x-www-form-urlencoded")
        .to_string();

    let upstream = state
        .http
        .post(format!("{}/oauth/token", issuer))
        .header(header::CONTENT_TYPE, content_type)
        .body(body)
        .timeout(std::time::Duration::from_secs(10))
        .send()
        .await;

    let upstream = match upstream {
        Ok(r) => r,
        Err(e) => {
            warn!("[OAuth] Token relay failed: {}", e);
            return error_reply(GatewayError::UpstreamUnavailable(format!(
                "token endpoint unreachable: {}",
                e
            )));
        }
    };

    let status =
        StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let content_type = upstream
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/json")
        .to_string();
    let body = match upstream.bytes().await {
        Ok(b) => b,
        Err(e) => {
            return error_reply(GatewayError::UpstreamUnavailable(format!(
                "token response unreadable: {}",
                e
            )))
        }
    };

    debug!("[OAuth] Token relay returned {}", status);
    let mut response = (status, body).into_response();
    if let Ok(value) = HeaderValue::from_str(&content_type) {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    response
}

/// GET /health
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
