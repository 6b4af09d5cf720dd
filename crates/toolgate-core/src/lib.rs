//! Toolgate core types
//!
//! Shared building blocks for the gateway: configuration loaded from the
//! environment, the error taxonomy surfaced on the wire, the verified
//! identity attached to authenticated requests, and the client registry
//! that maps locally-issued client ids to upstream provider clients.

pub mod config;
pub mod error;
pub mod identity;
pub mod registry;

pub use config::{AuthConfig, Config, ServerConfig};
pub use error::GatewayError;
pub use identity::Identity;
pub use registry::{ClientMapping, ClientStore, InMemoryClientStore};
