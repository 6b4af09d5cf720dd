//! Shared test utilities and fixtures for Toolgate integration tests.

use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use std::sync::Arc;

use toolgate_core::{AuthConfig, Config, ServerConfig};
use toolgate_gateway::{GatewayConfig, GatewayServer, ManagementApi, PingEngineFactory};

pub mod mocks;
pub use mocks::{FailPoint, MockManagementApi};

/// Host header used by tests unless they override it.
pub const TEST_HOST: &str = "gateway.test.example";

/// Config with authentication pointed at `issuer`, or disabled when `None`.
pub fn test_config(issuer: Option<&str>) -> Config {
    Config {
        server: ServerConfig::default(),
        auth: AuthConfig {
            issuer: issuer.map(String::from),
            audiences: vec![format!("https://{}", TEST_HOST)],
            admin_client_id: "admin_client".to_string(),
            admin_client_secret: "admin_secret".to_string(),
            required_connections: vec!["Username-Password-Authentication".to_string()],
            denylisted_client_ids: vec!["stale_client".to_string()],
        },
    }
}

/// Gateway router wired to a mock management tenant.
pub fn gateway_with_mock(api: Arc<dyn ManagementApi>, issuer: &str) -> Router {
    GatewayServer::with_management_api(
        GatewayConfig::new(test_config(Some(issuer))),
        Arc::new(PingEngineFactory),
        api,
    )
    .build_router()
}

/// Gateway router with authentication disabled entirely.
pub fn open_gateway() -> Router {
    GatewayServer::new(
        GatewayConfig::new(test_config(None)),
        Arc::new(PingEngineFactory),
    )
    .build_router()
}

/// JSON POST request builder with the standard test host.
pub fn json_post(uri: &str, body: &serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("host", TEST_HOST)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// GET request builder with the standard test host.
pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("host", TEST_HOST)
        .body(Body::empty())
        .unwrap()
}

/// Collect a response body as JSON.
pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes)
        .unwrap_or_else(|e| panic!("non-JSON body ({}): {:?}", e, bytes))
}
