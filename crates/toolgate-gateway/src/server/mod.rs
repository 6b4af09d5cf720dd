//! Gateway HTTP server
//!
//! Assembles the OAuth surface, the protected tool endpoint, and the
//! middleware stack (request logging, rate limiting, CORS) into one axum
//! router and runs it with graceful shutdown.

pub mod handlers;
pub mod logging_middleware;
pub mod origin;
pub mod rate_limit;

use axum::{
    http::{HeaderName, Method},
    middleware,
    routing::{get, post},
    Extension, Router,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use toolgate_core::{AuthConfig, ClientStore, Config, InMemoryClientStore, ServerConfig};

use crate::auth::{require_auth, AuthState, TokenValidator};
use crate::provision::{ManagementApi, ProvisioningProxy, UpstreamManagementClient};
use crate::session::{self, EngineFactory, SessionRouter, MCP_SESSION_ID_HEADER};

/// Shared state for the OAuth surface handlers.
#[derive(Clone)]
pub struct ProxyState {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    /// Absent when no upstream issuer is configured; registration then
    /// fails closed.
    pub provisioning: Option<Arc<ProvisioningProxy>>,
    pub store: Arc<dyn ClientStore>,
    pub http: reqwest::Client,
}

/// Server-level tunables beyond the core config.
#[derive(Clone)]
pub struct GatewayConfig {
    pub config: Config,
    pub session_ttl: Duration,
    pub max_sessions: usize,
}

impl GatewayConfig {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            session_ttl: Duration::from_secs(session::router::DEFAULT_SESSION_TTL_SECS),
            max_sessions: session::router::DEFAULT_MAX_SESSIONS,
        }
    }
}

/// The assembled gateway.
pub struct GatewayServer {
    state: ProxyState,
    auth_state: AuthState,
    sessions: Arc<SessionRouter>,
    rate_limiter: rate_limit::RateLimiter,
}

impl GatewayServer {
    pub fn new(config: GatewayConfig, engine_factory: Arc<dyn EngineFactory>) -> Self {
        let http = reqwest::Client::new();
        let store: Arc<dyn ClientStore> = Arc::new(InMemoryClientStore::new());

        let management: Option<Arc<dyn ManagementApi>> =
            config.config.auth.issuer_base().map(|issuer| {
                Arc::new(UpstreamManagementClient::new(
                    issuer.to_string(),
                    config.config.auth.admin_client_id.clone(),
                    config.config.auth.admin_client_secret.clone(),
                    http.clone(),
                )) as Arc<dyn ManagementApi>
            });

        Self::assemble(config, engine_factory, management, store, http)
    }

    /// Build with a caller-supplied management API. Used by tests to run
    /// the full surface against a mock tenant.
    pub fn with_management_api(
        config: GatewayConfig,
        engine_factory: Arc<dyn EngineFactory>,
        management: Arc<dyn ManagementApi>,
    ) -> Self {
        let http = reqwest::Client::new();
        let store: Arc<dyn ClientStore> = Arc::new(InMemoryClientStore::new());
        Self::assemble(config, engine_factory, Some(management), store, http)
    }

    fn assemble(
        config: GatewayConfig,
        engine_factory: Arc<dyn EngineFactory>,
        management: Option<Arc<dyn ManagementApi>>,
        store: Arc<dyn ClientStore>,
        http: reqwest::Client,
    ) -> Self {
        let auth = config.config.auth.clone();

        let provisioning = management.map(|api| {
            Arc::new(ProvisioningProxy::new(
                api,
                store.clone(),
                auth.required_connections.clone(),
            ))
        });

        let validator = Arc::new(TokenValidator::new(auth.clone(), http.clone()));
        let sessions = Arc::new(
            SessionRouter::new(engine_factory)
                .with_ttl(config.session_ttl)
                .with_max_sessions(config.max_sessions),
        );

        Self {
            state: ProxyState {
                server: config.config.server.clone(),
                auth,
                provisioning,
                store,
                http,
            },
            auth_state: AuthState::new(validator),
            sessions,
            rate_limiter: rate_limit::default_oauth_rate_limiter(),
        }
    }

    /// Session router handle, for embedding applications.
    pub fn sessions(&self) -> Arc<SessionRouter> {
        self.sessions.clone()
    }

    /// Build the complete router.
    pub fn build_router(&self) -> Router {
        let oauth = Router::new()
            .route(
                "/.well-known/oauth-authorization-server",
                get(handlers::oauth_authorization_server),
            )
            .route(
                "/.well-known/openid-configuration",
                get(handlers::openid_configuration),
            )
            .route(
                "/.well-known/oauth-protected-resource",
                get(handlers::protected_resource),
            )
            .route("/register", post(handlers::register))
            .route("/oidc/register", post(handlers::register))
            .route("/authorize", get(handlers::authorize))
            .route("/oauth/token", post(handlers::token))
            .route("/health", get(handlers::health))
            .with_state(self.state.clone());

        // The tool endpoint answers at both / and /mcp; both are bearer
        // protected.
        let protected = Router::new()
            .merge(session::http::routes(self.sessions.clone()))
            .nest("/mcp", session::http::routes(self.sessions.clone()))
            .layer(middleware::from_fn_with_state(
                self.auth_state.clone(),
                require_auth,
            ));

        let mut app = Router::new()
            .merge(oauth)
            .merge(protected)
            .layer(middleware::from_fn(rate_limit::rate_limit_middleware))
            .layer(Extension(self.rate_limiter.clone()))
            .layer(middleware::from_fn(logging_middleware::logging_middleware));

        if self.state.server.enable_cors {
            app = app.layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
                    .allow_headers(Any)
                    .expose_headers([
                        HeaderName::from_static(MCP_SESSION_ID_HEADER),
                        HeaderName::from_static("www-authenticate"),
                    ]),
            );
        }

        app
    }

    /// Bind and serve until the token is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let addr = format!("{}:{}", self.state.server.host, self.state.server.port);
        let cleanup = self.sessions.spawn_cleanup();
        let app = self.build_router();

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!("[Gateway] Listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                info!("[Gateway] Shutdown requested");
            })
            .await?;

        cleanup.cancel();
        info!("[Gateway] Stopped");
        Ok(())
    }
}
