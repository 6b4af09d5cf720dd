//! Toolgate Gateway
//!
//! OAuth bridging proxy and session router that exposes a tool API behind
//! OAuth-protected HTTP:
//! - Discovery documents published under the gateway's own identity
//! - Dynamic client registration proxied into the upstream provider's
//!   management API (SPA client type, required connections enabled)
//! - Dual-mode bearer token validation (signed JWT via JWKS, opaque via
//!   userinfo introspection) with a short positive cache
//! - Authorization/token passthrough to the upstream provider
//! - Stateful MCP sessions bridged onto stateless HTTP, with an implicit
//!   default session for clients that drop the session header

pub mod auth;
pub mod logging;
pub mod provision;
pub mod server;
pub mod session;

pub use auth::{AuthState, TokenValidator};
pub use provision::{
    ManagementApi, ProvisioningProxy, RegisterRequest, RegisterResponse, UpstreamClient,
    UpstreamConnection, UpstreamManagementClient,
};
pub use server::{GatewayConfig, GatewayServer, ProxyState};
pub use session::{
    EngineFactory, PingEngine, PingEngineFactory, ProtocolEngine, SessionRoute, SessionRouter,
};
