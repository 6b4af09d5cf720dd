//! Mock upstream management API
//!
//! In-memory stand-in for the provider's management API so provisioning
//! flows run without a live tenant. Records every call and supports
//! injected failures at each step.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use toolgate_core::GatewayError;
use toolgate_gateway::provision::management::CreateClientRequest;
use toolgate_gateway::{ManagementApi, UpstreamClient, UpstreamConnection};

/// Which management call should fail, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    None,
    CreateClient,
    ListConnections,
    EnableClient,
}

pub struct MockManagementApi {
    connections: Vec<UpstreamConnection>,
    fail_point: FailPoint,
    counter: AtomicUsize,
    pub created: Mutex<Vec<CreateClientRequest>>,
    pub deleted: Mutex<Vec<String>>,
    pub enabled: Mutex<Vec<(String, String)>>,
}

impl MockManagementApi {
    /// A tenant with the standard database connection plus a social one.
    pub fn standard_tenant() -> Self {
        Self::with_connections(&["Username-Password-Authentication", "google-oauth2"])
    }

    pub fn with_connections(names: &[&str]) -> Self {
        Self {
            connections: names
                .iter()
                .enumerate()
                .map(|(i, name)| UpstreamConnection {
                    id: format!("con_{:03}", i),
                    name: name.to_string(),
                    enabled_clients: vec!["preexisting_client".to_string()],
                })
                .collect(),
            fail_point: FailPoint::None,
            counter: AtomicUsize::new(0),
            created: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            enabled: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_at(mut self, point: FailPoint) -> Self {
        self.fail_point = point;
        self
    }

    pub fn created_count(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    pub fn deleted_ids(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ManagementApi for MockManagementApi {
    async fn create_client(
        &self,
        request: &CreateClientRequest,
    ) -> Result<UpstreamClient, GatewayError> {
        if self.fail_point == FailPoint::CreateClient {
            return Err(GatewayError::UpstreamUnavailable(
                "client creation failed".to_string(),
            ));
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        self.created.lock().unwrap().push(request.clone());
        Ok(UpstreamClient {
            client_id: format!("upstream_client_{}", n),
            client_secret: None,
            name: request.name.clone(),
            app_type: Some(request.app_type.clone()),
            token_endpoint_auth_method: Some(request.token_endpoint_auth_method.clone()),
            callbacks: Some(request.callbacks.clone()),
            grant_types: Some(request.grant_types.clone()),
        })
    }

    async fn get_client(&self, client_id: &str) -> Result<UpstreamClient, GatewayError> {
        Ok(UpstreamClient {
            client_id: client_id.to_string(),
            client_secret: None,
            name: "mock".to_string(),
            app_type: Some("spa".to_string()),
            token_endpoint_auth_method: Some("none".to_string()),
            callbacks: None,
            grant_types: None,
        })
    }

    async fn delete_client(&self, client_id: &str) -> Result<(), GatewayError> {
        self.deleted.lock().unwrap().push(client_id.to_string());
        Ok(())
    }

    async fn list_connections(&self) -> Result<Vec<UpstreamConnection>, GatewayError> {
        if self.fail_point == FailPoint::ListConnections {
            return Err(GatewayError::UpstreamUnavailable(
                "connection listing failed".to_string(),
            ));
        }
        Ok(self.connections.clone())
    }

    async fn enable_client(
        &self,
        connection: &UpstreamConnection,
        client_id: &str,
    ) -> Result<(), GatewayError> {
        if self.fail_point == FailPoint::EnableClient {
            return Err(GatewayError::UpstreamUnavailable(
                "connection update failed".to_string(),
            ));
        }
        self.enabled
            .lock()
            .unwrap()
            .push((connection.name.clone(), client_id.to_string()));
        Ok(())
    }
}
