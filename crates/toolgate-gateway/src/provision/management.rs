//! Upstream provider management API client
//!
//! Registration is proxied into the provider's management API (Auth0
//! Management API v2 shape): create a first-party SPA client, then enable
//! it on the required connections. Admin access uses a client-credentials
//! token that is cached until shortly before expiry.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use toolgate_core::GatewayError;

/// Network timeout for each management call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Renew the admin token this long before it actually expires.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Client creation payload sent to the management API.
#[derive(Debug, Clone, Serialize)]
pub struct CreateClientRequest {
    pub name: String,
    pub app_type: String,
    pub token_endpoint_auth_method: String,
    pub callbacks: Vec<String>,
    pub grant_types: Vec<String>,
    pub is_first_party: bool,
    pub oidc_conformant: bool,
}

impl CreateClientRequest {
    /// A public single-page-app client: no secret, authorization code
    /// plus refresh token grants.
    pub fn spa(name: String, callbacks: Vec<String>) -> Self {
        Self {
            name,
            app_type: "spa".to_string(),
            token_endpoint_auth_method: "none".to_string(),
            callbacks,
            grant_types: vec![
                "authorization_code".to_string(),
                "refresh_token".to_string(),
            ],
            is_first_party: true,
            oidc_conformant: true,
        }
    }
}

/// A client record as returned by the management API.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamClient {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    pub name: String,
    #[serde(default)]
    pub app_type: Option<String>,
    #[serde(default)]
    pub token_endpoint_auth_method: Option<String>,
    #[serde(default)]
    pub callbacks: Option<Vec<String>>,
    #[serde(default)]
    pub grant_types: Option<Vec<String>>,
}

/// A connection record, with the clients currently enabled on it.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConnection {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub enabled_clients: Vec<String>,
}

/// The subset of the provider's management API the gateway needs.
///
/// Behind a trait so provisioning logic tests against a mock instead of a
/// live tenant.
#[async_trait]
pub trait ManagementApi: Send + Sync {
    async fn create_client(
        &self,
        request: &CreateClientRequest,
    ) -> Result<UpstreamClient, GatewayError>;

    async fn get_client(&self, client_id: &str) -> Result<UpstreamClient, GatewayError>;

    async fn delete_client(&self, client_id: &str) -> Result<(), GatewayError>;

    async fn list_connections(&self) -> Result<Vec<UpstreamConnection>, GatewayError>;

    /// Enable a client on a connection, preserving the clients already
    /// enabled there.
    async fn enable_client(
        &self,
        connection: &UpstreamConnection,
        client_id: &str,
    ) -> Result<(), GatewayError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

/// Live management API client.
pub struct UpstreamManagementClient {
    issuer_base: String,
    admin_client_id: String,
    admin_client_secret: String,
    http: reqwest::Client,
    token: Mutex<Option<CachedToken>>,
}

impl UpstreamManagementClient {
    pub fn new(
        issuer_base: String,
        admin_client_id: String,
        admin_client_secret: String,
        http: reqwest::Client,
    ) -> Self {
        Self {
            issuer_base,
            admin_client_id,
            admin_client_secret,
            http,
            token: Mutex::new(None),
        }
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api/v2/{}", self.issuer_base, path)
    }

    /// Get-or-create the admin token. The mutex spans the whole exchange
    /// so concurrent registrations share one token request.
    async fn admin_token(&self) -> Result<String, GatewayError> {
        let mut guard = self.token.lock().await;
        if let Some(cached) = guard.as_ref() {
            if Instant::now() < cached.expires_at {
                return Ok(cached.access_token.clone());
            }
        }

        debug!("[Provision] Requesting admin token");
        let response = self
            .http
            .post(format!("{}/oauth/token", self.issuer_base))
            .timeout(REQUEST_TIMEOUT)
            .json(&serde_json::json!({
                "grant_type": "client_credentials",
                "client_id": self.admin_client_id,
                "client_secret": self.admin_client_secret,
                "audience": format!("{}/api/v2/", self.issuer_base),
            }))
            .send()
            .await
            .map_err(|e| upstream_err("admin token request", e))?;

        if !response.status().is_success() {
            warn!("[Provision] Admin token request returned {}", response.status());
            return Err(GatewayError::UpstreamUnavailable(format!(
                "admin token request returned {}",
                response.status()
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| upstream_err("admin token response", e))?;

        let lifetime = Duration::from_secs(token.expires_in)
            .saturating_sub(TOKEN_EXPIRY_MARGIN);
        *guard = Some(CachedToken {
            access_token: token.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        info!("[Provision] Admin token acquired (ttl {}s)", token.expires_in);

        Ok(token.access_token)
    }

    async fn check(
        response: reqwest::Response,
        what: &str,
    ) -> Result<reqwest::Response, GatewayError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        warn!("[Provision] {} returned {}: {}", what, status, body);
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            Err(GatewayError::UpstreamUnavailable(format!(
                "{} returned {}",
                what, status
            )))
        } else {
            Err(GatewayError::RegistrationFailed(format!(
                "{} returned {}",
                what, status
            )))
        }
    }
}

fn upstream_err(what: &str, e: reqwest::Error) -> GatewayError {
    warn!("[Provision] {} failed: {}", what, e);
    GatewayError::UpstreamUnavailable(format!("{} failed: {}", what, e))
}

#[async_trait]
impl ManagementApi for UpstreamManagementClient {
    async fn create_client(
        &self,
        request: &CreateClientRequest,
    ) -> Result<UpstreamClient, GatewayError> {
        let token = self.admin_token().await?;
        let response = self
            .http
            .post(self.api_url("clients"))
            .timeout(REQUEST_TIMEOUT)
            .bearer_auth(token)
            .json(request)
            .send()
            .await
            .map_err(|e| upstream_err("client creation", e))?;
        let response = Self::check(response, "client creation").await?;
        let client: UpstreamClient = response
            .json()
            .await
            .map_err(|e| upstream_err("client creation response", e))?;
        info!(
            "[Provision] Created upstream client {} ({})",
            client.client_id, client.name
        );
        Ok(client)
    }

    async fn get_client(&self, client_id: &str) -> Result<UpstreamClient, GatewayError> {
        let token = self.admin_token().await?;
        let response = self
            .http
            .get(self.api_url(&format!("clients/{}", client_id)))
            .timeout(REQUEST_TIMEOUT)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| upstream_err("client lookup", e))?;
        let response = Self::check(response, "client lookup").await?;
        response
            .json()
            .await
            .map_err(|e| upstream_err("client lookup response", e))
    }

    async fn delete_client(&self, client_id: &str) -> Result<(), GatewayError> {
        let token = self.admin_token().await?;
        let response = self
            .http
            .delete(self.api_url(&format!("clients/{}", client_id)))
            .timeout(REQUEST_TIMEOUT)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| upstream_err("client deletion", e))?;
        Self::check(response, "client deletion").await?;
        info!("[Provision] Deleted upstream client {}", client_id);
        Ok(())
    }

    async fn list_connections(&self) -> Result<Vec<UpstreamConnection>, GatewayError> {
        let token = self.admin_token().await?;
        let response = self
            .http
            .get(self.api_url("connections"))
            .timeout(REQUEST_TIMEOUT)
            .bearer_auth(token)
            .query(&[("fields", "id,name,enabled_clients")])
            .send()
            .await
            .map_err(|e| upstream_err("connection listing", e))?;
        let response = Self::check(response, "connection listing").await?;
        response
            .json()
            .await
            .map_err(|e| upstream_err("connection listing response", e))
    }

    async fn enable_client(
        &self,
        connection: &UpstreamConnection,
        client_id: &str,
    ) -> Result<(), GatewayError> {
        let mut enabled = connection.enabled_clients.clone();
        if !enabled.iter().any(|c| c == client_id) {
            enabled.push(client_id.to_string());
        }

        let token = self.admin_token().await?;
        let response = self
            .http
            .patch(self.api_url(&format!("connections/{}", connection.id)))
            .timeout(REQUEST_TIMEOUT)
            .bearer_auth(token)
            .json(&serde_json::json!({ "enabled_clients": enabled }))
            .send()
            .await
            .map_err(|e| upstream_err("connection update", e))?;
        Self::check(response, "connection update").await?;
        info!(
            "[Provision] Enabled client {} on connection {}",
            client_id, connection.name
        );
        Ok(())
    }
}
