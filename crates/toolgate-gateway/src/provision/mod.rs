//! Dynamic client registration, re-implemented against the management API
//!
//! The upstream provider's native dynamic registration creates third-party
//! clients that trigger consent walls and cannot use database connections.
//! The gateway therefore intercepts registration and provisions a
//! first-party SPA client through the management API instead, then answers
//! with a standard registration response so callers never notice.
//!
//! Every registration creates a fresh upstream client. Reusing an existing
//! client by name would let one caller hijack another's redirect URIs.

pub mod management;
pub mod saga;

pub use management::{
    CreateClientRequest, ManagementApi, UpstreamClient, UpstreamConnection,
    UpstreamManagementClient,
};
pub use saga::{ProvisioningSaga, UndoAction};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use toolgate_core::{ClientMapping, ClientStore, GatewayError};

/// Inbound registration request (RFC 7591 subset).
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    #[serde(default)]
    pub client_name: Option<String>,
    #[serde(default)]
    pub grant_types: Option<Vec<String>>,
    #[serde(default)]
    pub token_endpoint_auth_method: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// Registration response (RFC 7591 shape). `client_secret` is always
/// absent: provisioned clients are public.
#[derive(Debug, Clone, Serialize)]
pub struct RegisterResponse {
    pub client_id: String,
    pub client_name: String,
    pub redirect_uris: Vec<String>,
    pub grant_types: Vec<String>,
    pub response_types: Vec<String>,
    pub token_endpoint_auth_method: String,
    pub client_id_issued_at: i64,
    pub client_secret_expires_at: i64,
}

/// Orchestrates provisioning against the upstream tenant.
pub struct ProvisioningProxy {
    api: Arc<dyn ManagementApi>,
    store: Arc<dyn ClientStore>,
    required_connections: Vec<String>,
}

impl ProvisioningProxy {
    pub fn new(
        api: Arc<dyn ManagementApi>,
        store: Arc<dyn ClientStore>,
        required_connections: Vec<String>,
    ) -> Self {
        Self {
            api,
            store,
            required_connections,
        }
    }

    fn validate(request: &RegisterRequest) -> Result<(), GatewayError> {
        if request.redirect_uris.is_empty() {
            return Err(GatewayError::InvalidRequest(
                "redirect_uris is required and must be non-empty".to_string(),
            ));
        }
        for uri in &request.redirect_uris {
            // Native-app custom schemes are accepted; only unparseable or
            // fragment-bearing URIs are rejected.
            let parsed = url::Url::parse(uri).map_err(|_| {
                GatewayError::InvalidRequest(format!("invalid redirect_uri: {}", uri))
            })?;
            if parsed.fragment().is_some() {
                return Err(GatewayError::InvalidRequest(format!(
                    "redirect_uri must not contain a fragment: {}",
                    uri
                )));
            }
        }
        if let Some(method) = request.token_endpoint_auth_method.as_deref() {
            if method != "none" {
                return Err(GatewayError::InvalidRequest(format!(
                    "unsupported token_endpoint_auth_method: {} (only \"none\" is available)",
                    method
                )));
            }
        }
        Ok(())
    }

    /// Register a client: create it upstream, enable the required
    /// connections, persist the mapping. Any failure after the upstream
    /// create rolls the create back.
    pub async fn register(
        &self,
        request: RegisterRequest,
    ) -> Result<RegisterResponse, GatewayError> {
        Self::validate(&request)?;

        let client_name = request
            .client_name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| format!("Toolgate Client {}", &uuid::Uuid::new_v4().to_string()[..8]));

        info!(
            "[Provision] Registering client {:?} ({} redirect uri(s))",
            client_name,
            request.redirect_uris.len()
        );

        let mut saga = ProvisioningSaga::new(self.api.clone());

        let create = CreateClientRequest::spa(client_name.clone(), request.redirect_uris.clone());
        let client = self.api.create_client(&create).await?;
        saga.record(UndoAction::DeleteUpstreamClient {
            client_id: client.client_id.clone(),
        });

        if let Err(e) = self.enable_required_connections(&client.client_id).await {
            saga.rollback().await;
            return Err(e);
        }

        self.assert_no_drift(&client).await;

        self.store
            .insert(ClientMapping {
                local_client_id: client.client_id.clone(),
                upstream_client_id: client.client_id.clone(),
                upstream_client_secret: client.client_secret.clone(),
                redirect_uris: request.redirect_uris.clone(),
                created_at: Utc::now(),
            })
            .await;

        saga.commit();
        info!("[Provision] Registration complete: {}", client.client_id);

        Ok(RegisterResponse {
            client_id: client.client_id,
            client_name,
            redirect_uris: request.redirect_uris,
            grant_types: vec![
                "authorization_code".to_string(),
                "refresh_token".to_string(),
            ],
            response_types: vec!["code".to_string()],
            token_endpoint_auth_method: "none".to_string(),
            client_id_issued_at: Utc::now().timestamp(),
            client_secret_expires_at: 0,
        })
    }

    async fn enable_required_connections(&self, client_id: &str) -> Result<(), GatewayError> {
        let connections = self.api.list_connections().await?;

        for name in &self.required_connections {
            let Some(connection) = connections.iter().find(|c| &c.name == name) else {
                return Err(GatewayError::RegistrationFailed(format!(
                    "required connection {:?} does not exist upstream",
                    name
                )));
            };
            self.api.enable_client(connection, client_id).await?;
        }
        Ok(())
    }

    /// Re-read the created client and log any divergence from what was
    /// requested. Log-only: drift is an upstream tenant-rule artifact,
    /// not a registration failure.
    async fn assert_no_drift(&self, created: &UpstreamClient) {
        let fetched = match self.api.get_client(&created.client_id).await {
            Ok(c) => c,
            Err(e) => {
                warn!(
                    "[Provision] Drift check skipped for {}: {}",
                    created.client_id, e
                );
                return;
            }
        };
        if fetched.app_type.as_deref() != Some("spa") {
            warn!(
                "[Provision] Drift on {}: app_type is {:?}, expected \"spa\"",
                created.client_id, fetched.app_type
            );
        }
        if fetched.token_endpoint_auth_method.as_deref() != Some("none") {
            warn!(
                "[Provision] Drift on {}: token_endpoint_auth_method is {:?}, expected \"none\"",
                created.client_id, fetched.token_endpoint_auth_method
            );
        }
    }
}
