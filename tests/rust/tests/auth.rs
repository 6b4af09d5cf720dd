//! Bearer authentication integration tests
//!
//! Challenge shape, opaque token introspection against a mock issuer,
//! and the positive validation cache.

use axum::http::StatusCode;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use tower::ServiceExt;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tests::{body_json, gateway_with_mock, open_gateway, MockManagementApi, TEST_HOST};

fn init_request(token: Option<&str>) -> axum::http::Request<axum::body::Body> {
    let mut builder = axum::http::Request::builder()
        .method("POST")
        .uri("/mcp")
        .header("host", TEST_HOST)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder
        .body(axum::body::Body::from(
            json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}).to_string(),
        ))
        .unwrap()
}

#[tokio::test]
async fn missing_token_produces_the_discovery_challenge() {
    let api = Arc::new(MockManagementApi::standard_tenant());
    let app = gateway_with_mock(api, "https://tenant.example.auth");

    let response = app.oneshot(init_request(None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Clients parse this header to find the authorization server, so the
    // format is exact.
    let challenge = response.headers()["www-authenticate"].to_str().unwrap();
    assert_eq!(
        challenge,
        format!("Bearer realm=\"https://{TEST_HOST}\", as_uri=\"https://{TEST_HOST}\"")
    );

    let body = body_json(response).await;
    assert_eq!(body["error"], "invalid_request");
}

#[tokio::test]
async fn non_bearer_scheme_is_invalid_request() {
    let api = Arc::new(MockManagementApi::standard_tenant());
    let app = gateway_with_mock(api, "https://tenant.example.auth");

    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/mcp")
        .header("host", TEST_HOST)
        .header("content-type", "application/json")
        .header("authorization", "Token abc")
        .body(axum::body::Body::from(
            json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}).to_string(),
        ))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().contains_key("www-authenticate"));
    let body = body_json(response).await;
    assert_eq!(body["error"], "invalid_request");
}

#[tokio::test]
async fn opaque_token_is_introspected_via_userinfo() {
    let issuer = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .and(header("authorization", "Bearer v2_opaque_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sub": "auth0|user_1",
            "email": "user@example.com",
        })))
        .mount(&issuer)
        .await;

    let api = Arc::new(MockManagementApi::standard_tenant());
    let app = gateway_with_mock(api, &issuer.uri());

    let response = app.oneshot(init_request(Some("v2_opaque_token"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["result"]["serverInfo"]["name"], "toolgate");
}

#[tokio::test]
async fn rejected_opaque_token_yields_invalid_token() {
    let issuer = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&issuer)
        .await;

    let api = Arc::new(MockManagementApi::standard_tenant());
    let app = gateway_with_mock(api, &issuer.uri());

    let response = app.oneshot(init_request(Some("bad_token"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"], "invalid_token");
}

#[tokio::test]
async fn positive_validation_is_cached() {
    let issuer = MockServer::start().await;
    // Exactly one introspection for two requests with the same token.
    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sub": "auth0|cached_user",
        })))
        .expect(1)
        .mount(&issuer)
        .await;

    let api = Arc::new(MockManagementApi::standard_tenant());
    let app = gateway_with_mock(api, &issuer.uri());

    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(init_request(Some("v2_cached_token")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}

#[tokio::test]
async fn provider_supplied_expiry_caps_the_validation_cache() {
    let issuer = MockServer::start().await;
    // The token expires in one second, well under the default cache
    // lifetime, so the second request must introspect again.
    let exp = chrono::Utc::now().timestamp() + 1;
    Mock::given(method("GET"))
        .and(path("/userinfo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sub": "auth0|short_lived",
            "exp": exp,
        })))
        .expect(2)
        .mount(&issuer)
        .await;

    let api = Arc::new(MockManagementApi::standard_tenant());
    let app = gateway_with_mock(api, &issuer.uri());

    let response = app
        .clone()
        .oneshot(init_request(Some("v2_short_lived")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    tokio::time::sleep(std::time::Duration::from_millis(1200)).await;

    let response = app
        .oneshot(init_request(Some("v2_short_lived")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn malformed_jwt_is_rejected_without_any_network_call() {
    let issuer = MockServer::start().await;
    // No mocks mounted: any request to the issuer would 404 and the
    // validator would surface upstream_unavailable instead of 401.
    let api = Arc::new(MockManagementApi::standard_tenant());
    let app = gateway_with_mock(api, &issuer.uri());

    // Three non-empty segments, so JWT-shaped, but the header segment is
    // not decodable.
    let response = app.oneshot(init_request(Some("!!!.yyy.zzz"))).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"], "invalid_token");
}

#[tokio::test]
async fn disabled_auth_serves_anonymously() {
    let app = open_gateway();
    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/mcp")
        .header("host", "localhost:3100")
        .header("content-type", "application/json")
        .body(axum::body::Body::from(
            json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}).to_string(),
        ))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
