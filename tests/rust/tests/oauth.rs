//! OAuth surface integration tests
//!
//! Discovery, dynamic client registration against a mock tenant, the
//! authorization redirect, and the token relay.

use axum::http::StatusCode;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use tower::ServiceExt;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tests::{body_json, gateway_with_mock, get, json_post, FailPoint, MockManagementApi, TEST_HOST};

const ISSUER: &str = "https://tenant.example.auth";

fn register_body() -> serde_json::Value {
    json!({
        "client_name": "Example Agent",
        "redirect_uris": ["https://agent.example.com/oauth/callback"],
    })
}

#[tokio::test]
async fn discovery_documents_advertise_the_request_origin() {
    let api = Arc::new(MockManagementApi::standard_tenant());
    let app = gateway_with_mock(api, ISSUER);

    let response = app
        .clone()
        .oneshot(get("/.well-known/oauth-authorization-server"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;

    let origin = format!("https://{}", TEST_HOST);
    assert_eq!(body["issuer"], origin);
    assert_eq!(body["authorization_endpoint"], format!("{origin}/authorize"));
    assert_eq!(body["token_endpoint"], format!("{origin}/oauth/token"));
    assert_eq!(body["registration_endpoint"], format!("{origin}/register"));
    // Key material is delegated to the upstream issuer.
    assert_eq!(body["jwks_uri"], format!("{ISSUER}/.well-known/jwks.json"));

    let response = app
        .clone()
        .oneshot(get("/.well-known/openid-configuration"))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["issuer"], origin);
    assert_eq!(body["registration_endpoint"], format!("{origin}/oidc/register"));
    assert_eq!(body["userinfo_endpoint"], format!("{ISSUER}/userinfo"));

    let response = app
        .oneshot(get("/.well-known/oauth-protected-resource"))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["resource"], origin);
    assert_eq!(body["authorization_servers"], json!([origin]));
}

#[tokio::test]
async fn discovery_follows_forwarded_headers() {
    let api = Arc::new(MockManagementApi::standard_tenant());
    let app = gateway_with_mock(api, ISSUER);

    let request = axum::http::Request::builder()
        .uri("/.well-known/oauth-authorization-server")
        .header("host", "internal-lb:8080")
        .header("x-forwarded-host", "public.gateway.example")
        .header("x-forwarded-proto", "https")
        .body(axum::body::Body::empty())
        .unwrap();
    let body = body_json(app.oneshot(request).await.unwrap()).await;
    assert_eq!(body["issuer"], "https://public.gateway.example");
}

#[tokio::test]
async fn registration_provisions_a_first_party_spa_client() {
    let api = Arc::new(MockManagementApi::standard_tenant());
    let app = gateway_with_mock(api.clone(), ISSUER);

    let response = app
        .oneshot(json_post("/register", &register_body()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;

    assert_eq!(body["client_id"], "upstream_client_0");
    assert_eq!(body["client_name"], "Example Agent");
    assert_eq!(body["token_endpoint_auth_method"], "none");
    assert_eq!(body["response_types"], json!(["code"]));
    assert_eq!(
        body["grant_types"],
        json!(["authorization_code", "refresh_token"])
    );
    // Public client: no secret, and the expiry field says so explicitly.
    assert!(body.get("client_secret").is_none());
    assert_eq!(body["client_secret_expires_at"], 0);

    let created = api.created.lock().unwrap();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].app_type, "spa");
    assert_eq!(created[0].token_endpoint_auth_method, "none");
    assert!(created[0].is_first_party);

    // Only the required database connection is enabled, not google-oauth2.
    let enabled = api.enabled.lock().unwrap();
    assert_eq!(enabled.len(), 1);
    assert_eq!(enabled[0].0, "Username-Password-Authentication");
    assert_eq!(enabled[0].1, "upstream_client_0");
}

#[tokio::test]
async fn repeated_registration_never_reuses_a_client() {
    let api = Arc::new(MockManagementApi::standard_tenant());
    let app = gateway_with_mock(api.clone(), ISSUER);

    let first = body_json(
        app.clone()
            .oneshot(json_post("/register", &register_body()))
            .await
            .unwrap(),
    )
    .await;
    let second = body_json(
        app.oneshot(json_post("/register", &register_body()))
            .await
            .unwrap(),
    )
    .await;

    assert_ne!(first["client_id"], second["client_id"]);
    assert_eq!(api.created_count(), 2);
}

#[tokio::test]
async fn registration_without_redirect_uris_is_invalid_request() {
    let api = Arc::new(MockManagementApi::standard_tenant());
    let app = gateway_with_mock(api.clone(), ISSUER);

    let response = app
        .oneshot(json_post("/register", &json!({"client_name": "No URIs"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], "invalid_request");
    // Nothing was written upstream.
    assert_eq!(api.created_count(), 0);
}

#[tokio::test]
async fn failed_connection_enable_rolls_back_the_created_client() {
    let api = Arc::new(MockManagementApi::standard_tenant().failing_at(FailPoint::EnableClient));
    let app = gateway_with_mock(api.clone(), ISSUER);

    let response = app
        .oneshot(json_post("/register", &register_body()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = body_json(response).await;
    assert_eq!(body["error"], "upstream_unavailable");

    // The half-provisioned client was cleaned up.
    assert_eq!(api.deleted_ids(), vec!["upstream_client_0"]);
}

#[tokio::test]
async fn missing_required_connection_fails_registration() {
    let api = Arc::new(MockManagementApi::with_connections(&["google-oauth2"]));
    let app = gateway_with_mock(api.clone(), ISSUER);

    let response = app
        .oneshot(json_post("/register", &register_body()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await;
    assert_eq!(body["error"], "registration_failed");
    assert_eq!(api.deleted_ids().len(), 1);
}

#[tokio::test]
async fn oidc_register_alias_serves_the_same_flow() {
    let api = Arc::new(MockManagementApi::standard_tenant());
    let app = gateway_with_mock(api, ISSUER);

    let response = app
        .oneshot(json_post("/oidc/register", &register_body()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn authorize_redirects_to_upstream_with_query_intact() {
    let api = Arc::new(MockManagementApi::standard_tenant());
    let app = gateway_with_mock(api, ISSUER);

    let query = "client_id=upstream_client_0&response_type=code&redirect_uri=https%3A%2F%2Fagent.example.com%2Fcb&code_challenge=abc123&code_challenge_method=S256&state=xyz";
    let response = app
        .oneshot(get(&format!("/authorize?{query}")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        response.headers()["location"].to_str().unwrap(),
        format!("{ISSUER}/authorize?{query}")
    );
}

#[tokio::test]
async fn authorize_rejects_denylisted_client_ids() {
    let api = Arc::new(MockManagementApi::standard_tenant());
    let app = gateway_with_mock(api, ISSUER);

    let response = app
        .oneshot(get("/authorize?client_id=stale_client&response_type=code"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], "invalid_client");
}

#[tokio::test]
async fn token_endpoint_relays_the_exchange_verbatim() {
    let issuer = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "at_123",
            "token_type": "Bearer",
            "expires_in": 86400,
        })))
        .expect(1)
        .mount(&issuer)
        .await;

    let api = Arc::new(MockManagementApi::standard_tenant());
    let app = gateway_with_mock(api, &issuer.uri());

    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/oauth/token")
        .header("host", TEST_HOST)
        .header("content-type", "application/x-www-form-urlencoded")
        .body(axum::body::Body::from(
            "grant_type=authorization_code&code=abc&code_verifier=v&client_id=upstream_client_0",
        ))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["access_token"], "at_123");
}

#[tokio::test]
async fn token_endpoint_relays_upstream_errors_verbatim() {
    let issuer = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "the code has expired",
        })))
        .mount(&issuer)
        .await;

    let api = Arc::new(MockManagementApi::standard_tenant());
    let app = gateway_with_mock(api, &issuer.uri());

    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/oauth/token")
        .header("host", TEST_HOST)
        .header("content-type", "application/x-www-form-urlencoded")
        .body(axum::body::Body::from("grant_type=authorization_code&code=expired"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    // Status and body pass through untouched.
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], "invalid_grant");
    assert_eq!(body["error_description"], "the code has expired");
}
