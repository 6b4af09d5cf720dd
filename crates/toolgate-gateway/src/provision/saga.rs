//! Provisioning rollback
//!
//! Registration is a multi-step write against the upstream tenant. If a
//! later step fails the earlier writes must not leak: each completed step
//! records an undo action, and on failure the recorded actions run in
//! reverse order. Undo failures are logged and swallowed; the original
//! error is what the caller sees, and a leftover client is preferable to
//! masking it.

use std::sync::Arc;
use tracing::{info, warn};

use super::management::ManagementApi;

/// A compensating action recorded during provisioning.
pub enum UndoAction {
    /// Remove a client that was created upstream.
    DeleteUpstreamClient { client_id: String },
}

/// Collects undo actions as provisioning steps complete.
pub struct ProvisioningSaga {
    api: Arc<dyn ManagementApi>,
    undo_stack: Vec<UndoAction>,
}

impl ProvisioningSaga {
    pub fn new(api: Arc<dyn ManagementApi>) -> Self {
        Self {
            api,
            undo_stack: Vec::new(),
        }
    }

    /// Record a compensating action for a completed step.
    pub fn record(&mut self, action: UndoAction) {
        self.undo_stack.push(action);
    }

    /// Mark the saga complete; recorded actions are discarded.
    pub fn commit(mut self) {
        self.undo_stack.clear();
    }

    /// Run recorded undo actions in reverse order.
    pub async fn rollback(mut self) {
        if self.undo_stack.is_empty() {
            return;
        }
        info!(
            "[Provision] Rolling back {} provisioning step(s)",
            self.undo_stack.len()
        );
        while let Some(action) = self.undo_stack.pop() {
            match action {
                UndoAction::DeleteUpstreamClient { client_id } => {
                    if let Err(e) = self.api.delete_client(&client_id).await {
                        warn!(
                            "[Provision] Rollback failed to delete client {}: {} (orphan left upstream)",
                            client_id, e
                        );
                    }
                }
            }
        }
    }
}
