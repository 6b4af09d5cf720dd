//! Client registry
//!
//! Persists the mapping between a locally-issued client identity and the
//! upstream client created on its behalf. Mappings are immutable once
//! inserted and looked up by either key.
//!
//! The in-memory implementation is a single-instance simplification: a
//! deployment with more than one process serving traffic needs a store
//! backed by shared storage behind the same trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::info;

/// Mapping between a local client id and the upstream client provisioned
/// for it. Immutable after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientMapping {
    /// Client id handed to the caller (also the upstream id; see provision).
    pub local_client_id: String,
    /// Client id of the record created in the upstream provider.
    pub upstream_client_id: String,
    /// Secret, when the upstream issued one. SPA clients have none.
    pub upstream_client_secret: Option<String>,
    /// Redirect URIs registered for this client.
    pub redirect_uris: Vec<String>,
    /// When provisioning completed.
    pub created_at: DateTime<Utc>,
}

/// Store interface for client mappings.
///
/// `insert` is atomic; `get`/`get_by_upstream` are the forward and reverse
/// lookups. No eviction: the registry is bounded by the number of distinct
/// registrations, not request volume.
#[async_trait]
pub trait ClientStore: Send + Sync {
    async fn get(&self, local_client_id: &str) -> Option<ClientMapping>;
    async fn get_by_upstream(&self, upstream_client_id: &str) -> Option<ClientMapping>;
    async fn insert(&self, mapping: ClientMapping);
    async fn list(&self) -> Vec<ClientMapping>;
    async fn len(&self) -> usize;
}

/// In-process map implementation.
#[derive(Default)]
pub struct InMemoryClientStore {
    forward: DashMap<String, ClientMapping>,
    reverse: DashMap<String, String>,
}

impl InMemoryClientStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClientStore for InMemoryClientStore {
    async fn get(&self, local_client_id: &str) -> Option<ClientMapping> {
        self.forward.get(local_client_id).map(|m| m.clone())
    }

    async fn get_by_upstream(&self, upstream_client_id: &str) -> Option<ClientMapping> {
        let local = self.reverse.get(upstream_client_id)?.clone();
        self.forward.get(&local).map(|m| m.clone())
    }

    async fn insert(&self, mapping: ClientMapping) {
        info!(
            "[Registry] Stored mapping: {} -> {}",
            mapping.local_client_id, mapping.upstream_client_id
        );
        self.reverse.insert(
            mapping.upstream_client_id.clone(),
            mapping.local_client_id.clone(),
        );
        self.forward
            .insert(mapping.local_client_id.clone(), mapping);
    }

    async fn list(&self) -> Vec<ClientMapping> {
        self.forward.iter().map(|m| m.value().clone()).collect()
    }

    async fn len(&self) -> usize {
        self.forward.len()
    }
}
