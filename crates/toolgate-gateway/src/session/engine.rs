//! Protocol engine seam
//!
//! The tool catalog and business-API client live behind these traits. The
//! router only ever sees a `ProtocolEngine`: it hands it inbound JSON-RPC
//! messages, forwards its notifications onto the session's event stream,
//! and shuts it down on termination.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;

/// A single logical protocol conversation.
///
/// Implementations are not required to tolerate concurrent `handle` calls;
/// the router serializes requests per session.
#[async_trait]
pub trait ProtocolEngine: Send + Sync {
    /// Process one inbound message. Requests yield `Some(response)`,
    /// notifications yield `None`.
    async fn handle(&self, message: Value) -> anyhow::Result<Option<Value>>;

    /// Server-initiated notifications, serialized JSON per message.
    fn notifications(&self) -> broadcast::Receiver<String>;

    /// Release engine resources. Called once, on session termination.
    async fn shutdown(&self) {}
}

/// Produces a fresh engine per logical session.
pub trait EngineFactory: Send + Sync {
    fn create(&self) -> anyhow::Result<Arc<dyn ProtocolEngine>>;
}

impl<F> EngineFactory for F
where
    F: Fn() -> anyhow::Result<Arc<dyn ProtocolEngine>> + Send + Sync,
{
    fn create(&self) -> anyhow::Result<Arc<dyn ProtocolEngine>> {
        self()
    }
}

/// Built-in engine answering only `initialize` and `ping`.
///
/// Used by the binary for smoke testing and by the transport tests; the
/// real tool engine is wired in by the embedding application.
pub struct PingEngine {
    notifications_tx: broadcast::Sender<String>,
}

impl PingEngine {
    pub fn new() -> Self {
        let (notifications_tx, _) = broadcast::channel(64);
        Self { notifications_tx }
    }

    /// Sender half, so tests can inject server-initiated notifications.
    pub fn notification_sender(&self) -> broadcast::Sender<String> {
        self.notifications_tx.clone()
    }
}

impl Default for PingEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProtocolEngine for PingEngine {
    async fn handle(&self, message: Value) -> anyhow::Result<Option<Value>> {
        let method = message.get("method").and_then(|m| m.as_str());
        let id = message.get("id").cloned();

        // Notifications get no response
        let Some(id) = id else {
            return Ok(None);
        };

        let result = match method {
            Some("initialize") => serde_json::json!({
                "protocolVersion": "2025-03-26",
                "capabilities": { "tools": {} },
                "serverInfo": {
                    "name": "toolgate",
                    "version": env!("CARGO_PKG_VERSION"),
                }
            }),
            Some("ping") => serde_json::json!({}),
            Some(other) => {
                return Ok(Some(serde_json::json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": { "code": -32601, "message": format!("Method not found: {other}") }
                })))
            }
            None => {
                return Ok(Some(serde_json::json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": { "code": super::protocol::INVALID_REQUEST, "message": "Missing method" }
                })))
            }
        };

        Ok(Some(serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": result,
        })))
    }

    fn notifications(&self) -> broadcast::Receiver<String> {
        self.notifications_tx.subscribe()
    }
}

/// Factory for [`PingEngine`].
#[derive(Default)]
pub struct PingEngineFactory;

impl EngineFactory for PingEngineFactory {
    fn create(&self) -> anyhow::Result<Arc<dyn ProtocolEngine>> {
        Ok(Arc::new(PingEngine::new()))
    }
}
