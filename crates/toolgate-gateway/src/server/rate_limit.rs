//! Per-source rate limiting for the OAuth surface
//!
//! Fixed-window counters in a DashMap keyed by (source, path prefix).
//! Registration writes to the upstream tenant, so it gets the tightest
//! budget; authorize and token are looser. The source is the forwarded
//! client address when a proxy supplies one, else the whole instance
//! shares one bucket.

use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

use toolgate_core::GatewayError;

/// Budget for one route prefix.
#[derive(Clone)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window: Duration,
}

/// Shared limiter state.
#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<DashMap<(String, String), (Instant, u32)>>,
    rules: Arc<Vec<(String, RateLimitConfig)>>,
}

impl RateLimiter {
    pub fn new(rules: Vec<(String, RateLimitConfig)>) -> Self {
        Self {
            buckets: Arc::new(DashMap::new()),
            rules: Arc::new(rules),
        }
    }

    /// Returns `true` when the request is allowed.
    pub fn check(&self, source: &str, path: &str) -> bool {
        for (prefix, config) in self.rules.iter() {
            if path.starts_with(prefix) {
                let key = (source.to_string(), prefix.clone());
                let mut entry = self
                    .buckets
                    .entry(key)
                    .or_insert_with(|| (Instant::now(), 0));
                let (window_start, count) = entry.value_mut();

                if window_start.elapsed() >= config.window {
                    *window_start = Instant::now();
                    *count = 1;
                    return true;
                }

                if *count >= config.max_requests {
                    return false;
                }

                *count += 1;
                return true;
            }
        }
        true
    }
}

fn request_source(request: &Request) -> String {
    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "direct".to_string())
}

/// Axum middleware enforcing the limiter found in request extensions.
pub async fn rate_limit_middleware(request: Request, next: Next) -> Response {
    let limiter = request.extensions().get::<RateLimiter>().cloned();

    if let Some(limiter) = limiter {
        let path = request.uri().path().to_string();
        let source = request_source(&request);
        if !limiter.check(&source, &path) {
            warn!("[Gateway] Rate limit hit: {} {}", source, path);
            let error =
                GatewayError::InvalidRequest("rate limit exceeded, retry later".to_string());
            return (StatusCode::TOO_MANY_REQUESTS, axum::Json(error.to_body()))
                .into_response();
        }
    }

    next.run(request).await
}

/// Default budgets for the OAuth endpoints.
pub fn default_oauth_rate_limiter() -> RateLimiter {
    RateLimiter::new(vec![
        (
            "/register".to_string(),
            RateLimitConfig {
                max_requests: 10,
                window: Duration::from_secs(60),
            },
        ),
        (
            "/oidc/register".to_string(),
            RateLimitConfig {
                max_requests: 10,
                window: Duration::from_secs(60),
            },
        ),
        (
            "/authorize".to_string(),
            RateLimitConfig {
                max_requests: 30,
                window: Duration::from_secs(60),
            },
        ),
        (
            "/oauth/token".to_string(),
            RateLimitConfig {
                max_requests: 60,
                window: Duration::from_secs(60),
            },
        ),
    ])
}
