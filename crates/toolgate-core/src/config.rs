//! Gateway configuration
//!
//! All deployment-specific settings come from the environment (a local
//! `.env` file is honored via dotenvy). The authentication subsystem is
//! controlled by `TOOLGATE_UPSTREAM_ISSUER`: when it is unset the gateway
//! runs with authentication disabled and every request is treated as
//! anonymous. That is an explicit opt-out for local development, never
//! the default of a deployed instance.

use tracing::{info, warn};

/// Default port the gateway listens on.
pub const DEFAULT_PORT: u16 = 3100;

/// Connections that must be enabled on every provisioned upstream client.
/// At minimum the provider's database connection, otherwise the client
/// cannot authenticate anyone.
pub const DEFAULT_REQUIRED_CONNECTIONS: &str = "Username-Password-Authentication";

/// Authentication subsystem configuration.
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    /// Upstream provider issuer URL (no trailing slash). `None` disables
    /// the entire authentication subsystem.
    pub issuer: Option<String>,
    /// Acceptable audience values. A token is valid if its `aud` claim
    /// matches any member (multiple deployment origins share one provider).
    pub audiences: Vec<String>,
    /// Administrative client credentials for the provider's management API.
    pub admin_client_id: String,
    pub admin_client_secret: String,
    /// Connection names that must be enabled on every provisioned client.
    pub required_connections: Vec<String>,
    /// Known-stale client ids rejected at the authorization endpoint.
    pub denylisted_client_ids: Vec<String>,
}

impl AuthConfig {
    /// Whether token validation is active.
    pub fn enabled(&self) -> bool {
        self.issuer.is_some()
    }

    /// The issuer with any trailing slash removed.
    pub fn issuer_base(&self) -> Option<&str> {
        self.issuer.as_deref().map(|s| s.trim_end_matches('/'))
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Externally visible URL override. When unset the origin is computed
    /// per request from forwarded/host headers.
    pub public_url: Option<String>,
    /// Enable CORS for browser-based callers.
    pub enable_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            public_url: None,
            enable_cors: true,
        }
    }
}

/// Complete gateway configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
}

/// Error raised when the environment is inconsistent.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: String, reason: String },
    #[error("{var} is required when TOOLGATE_UPSTREAM_ISSUER is set")]
    MissingAdminCredential { var: String },
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_list(name: &str) -> Vec<String> {
    env_var(name)
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// Reads a `.env` file first if one is present (ignored when absent).
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let issuer = env_var("TOOLGATE_UPSTREAM_ISSUER").map(|s| s.trim_end_matches('/').to_string());

        if let Some(ref issuer) = issuer {
            url::Url::parse(issuer).map_err(|e| ConfigError::Invalid {
                var: "TOOLGATE_UPSTREAM_ISSUER".to_string(),
                reason: e.to_string(),
            })?;
        }

        let admin_client_id = env_var("TOOLGATE_ADMIN_CLIENT_ID").unwrap_or_default();
        let admin_client_secret = env_var("TOOLGATE_ADMIN_CLIENT_SECRET").unwrap_or_default();

        // Registration proxies into the provider's management API, so the
        // admin credentials are mandatory whenever auth is on.
        if issuer.is_some() {
            if admin_client_id.is_empty() {
                return Err(ConfigError::MissingAdminCredential {
                    var: "TOOLGATE_ADMIN_CLIENT_ID".to_string(),
                });
            }
            if admin_client_secret.is_empty() {
                return Err(ConfigError::MissingAdminCredential {
                    var: "TOOLGATE_ADMIN_CLIENT_SECRET".to_string(),
                });
            }
        }

        let mut required_connections = env_list("TOOLGATE_REQUIRED_CONNECTIONS");
        if required_connections.is_empty() {
            required_connections = vec![DEFAULT_REQUIRED_CONNECTIONS.to_string()];
        }

        let port = match env_var("TOOLGATE_PORT") {
            Some(v) => v.parse::<u16>().map_err(|e| ConfigError::Invalid {
                var: "TOOLGATE_PORT".to_string(),
                reason: e.to_string(),
            })?,
            None => DEFAULT_PORT,
        };

        let config = Self {
            server: ServerConfig {
                host: env_var("TOOLGATE_HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
                port,
                public_url: env_var("TOOLGATE_PUBLIC_URL")
                    .map(|s| s.trim_end_matches('/').to_string()),
                enable_cors: env_var("TOOLGATE_DISABLE_CORS").is_none(),
            },
            auth: AuthConfig {
                issuer,
                audiences: env_list("TOOLGATE_AUDIENCES"),
                admin_client_id,
                admin_client_secret,
                required_connections,
                denylisted_client_ids: env_list("TOOLGATE_CLIENT_DENYLIST"),
            },
        };

        if config.auth.enabled() {
            info!(
                "[Config] Authentication enabled (issuer: {}, {} audience(s))",
                config.auth.issuer.as_deref().unwrap_or(""),
                config.auth.audiences.len()
            );
            if config.auth.audiences.is_empty() {
                warn!("[Config] TOOLGATE_AUDIENCES is empty - JWT audience checks are skipped");
            }
        } else {
            warn!("[Config] Authentication DISABLED - all requests treated as anonymous");
        }

        Ok(config)
    }
}
