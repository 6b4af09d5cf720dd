//! Dual-mode bearer token validation
//!
//! The upstream issuer hands out signed JWT access tokens when an audience
//! is requested and opaque tokens otherwise. Both arrive at the gateway,
//! so both must validate: JWTs locally against the issuer's JWKS, opaque
//! tokens by introspecting them against the issuer's userinfo endpoint.
//! Positive results are cached briefly to keep per-request latency flat.

use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use jsonwebtoken::{decode, decode_header, Validation};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use toolgate_core::{AuthConfig, GatewayError, Identity};

use super::jwks::JwksCache;

/// Upper bound on positive cache entries.
const CACHE_TTL: Duration = Duration::from_secs(300);

/// A bearer token classified by shape. Signed JWTs are exactly three
/// non-empty base64url segments; everything else is treated as opaque.
#[derive(Debug, PartialEq, Eq)]
pub enum ParsedToken<'a> {
    Jwt(&'a str),
    Opaque(&'a str),
}

impl<'a> ParsedToken<'a> {
    pub fn classify(raw: &'a str) -> Self {
        let segments: Vec<&str> = raw.split('.').collect();
        if segments.len() == 3 && segments.iter().all(|s| !s.is_empty()) {
            ParsedToken::Jwt(raw)
        } else {
            ParsedToken::Opaque(raw)
        }
    }
}

#[derive(Debug, Deserialize)]
struct JwtClaims {
    sub: String,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    email: Option<String>,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct UserinfoResponse {
    sub: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    /// Some providers include the token expiry alongside the profile.
    #[serde(default)]
    exp: Option<i64>,
}

struct CachedIdentity {
    identity: Identity,
    cached_at: Instant,
    ttl: Duration,
}

impl CachedIdentity {
    fn fresh(&self) -> bool {
        self.cached_at.elapsed() < self.ttl
    }
}

/// Validates bearer tokens against the configured upstream issuer.
///
/// When no issuer is configured the gateway runs open and every caller
/// gets the anonymous identity.
pub struct TokenValidator {
    config: AuthConfig,
    jwks: Option<JwksCache>,
    http: reqwest::Client,
    cache: DashMap<String, CachedIdentity>,
}

impl TokenValidator {
    pub fn new(config: AuthConfig, http: reqwest::Client) -> Self {
        let jwks = config.issuer_base().map(|issuer| {
            JwksCache::new(format!("{}/.well-known/jwks.json", issuer), http.clone())
        });
        Self {
            config,
            jwks,
            http,
            cache: DashMap::new(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled()
    }

    /// Validate a raw bearer token and produce the caller's identity.
    pub async fn authenticate(&self, token: &str) -> Result<Identity, GatewayError> {
        if !self.config.enabled() {
            return Ok(Identity::anonymous());
        }

        if let Some(cached) = self.cache.get(token) {
            if cached.fresh() {
                return Ok(cached.identity.clone());
            }
            drop(cached);
            self.cache.remove(token);
        }

        let identity = match ParsedToken::classify(token) {
            ParsedToken::Jwt(raw) => self.validate_jwt(raw).await?,
            ParsedToken::Opaque(raw) => self.introspect_opaque(raw).await?,
        };

        // Cache no longer than the token itself lives. A known expiry in
        // the past leaves nothing to cache.
        let ttl = match identity.expires_at {
            Some(exp) => (exp - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO)
                .min(CACHE_TTL),
            None => CACHE_TTL,
        };
        if !ttl.is_zero() {
            self.cache.insert(
                token.to_string(),
                CachedIdentity {
                    identity: identity.clone(),
                    cached_at: Instant::now(),
                    ttl,
                },
            );
        }

        Ok(identity)
    }

    async fn validate_jwt(&self, raw: &str) -> Result<Identity, GatewayError> {
        let jwks = self
            .jwks
            .as_ref()
            .ok_or_else(|| GatewayError::InvalidToken("no issuer configured".to_string()))?;

        let header = decode_header(raw)
            .map_err(|e| GatewayError::InvalidToken(format!("malformed token header: {}", e)))?;
        let kid = header
            .kid
            .ok_or_else(|| GatewayError::InvalidToken("token header missing kid".to_string()))?;

        let (key, algorithm) = jwks.decoding_key(&kid).await?;

        let mut validation = Validation::new(algorithm);
        if let Some(issuer) = self.config.issuer_base() {
            // Issuers advertise themselves with a trailing slash.
            validation.set_issuer(&[format!("{}/", issuer), issuer.to_string()]);
        }
        if self.config.audiences.is_empty() {
            validation.validate_aud = false;
        } else {
            validation.set_audience(&self.config.audiences);
        }

        let data = decode::<JwtClaims>(raw, &key, &validation).map_err(|e| {
            debug!("[Auth] JWT validation failed: {}", e);
            GatewayError::InvalidToken(format!("token validation failed: {}", e))
        })?;

        let claims = data.claims;
        let expires_at: Option<DateTime<Utc>> = Utc.timestamp_opt(claims.exp, 0).single();
        debug!("[Auth] Validated JWT for subject {}", claims.sub);

        Ok(Identity {
            subject: claims.sub,
            scope: claims.scope,
            email: claims.email,
            expires_at,
        })
    }

    /// Opaque tokens cannot be verified locally; ask the issuer who they
    /// belong to. A 2xx userinfo response is the proof of validity.
    async fn introspect_opaque(&self, raw: &str) -> Result<Identity, GatewayError> {
        let issuer = self
            .config
            .issuer_base()
            .ok_or_else(|| GatewayError::InvalidToken("no issuer configured".to_string()))?;

        let response = self
            .http
            .get(format!("{}/userinfo", issuer))
            .bearer_auth(raw)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| {
                warn!("[Auth] Userinfo request failed: {}", e);
                GatewayError::UpstreamUnavailable(format!("userinfo request failed: {}", e))
            })?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED
            || response.status() == reqwest::StatusCode::FORBIDDEN
        {
            return Err(GatewayError::InvalidToken(
                "token rejected by issuer".to_string(),
            ));
        }
        if !response.status().is_success() {
            return Err(GatewayError::UpstreamUnavailable(format!(
                "userinfo returned {}",
                response.status()
            )));
        }

        let info: UserinfoResponse = response.json().await.map_err(|e| {
            GatewayError::UpstreamUnavailable(format!("invalid userinfo response: {}", e))
        })?;

        let expires_at = info.exp.and_then(|exp| Utc.timestamp_opt(exp, 0).single());
        debug!("[Auth] Introspected opaque token for subject {}", info.sub);
        Ok(Identity {
            subject: info.sub,
            scope: info.scope,
            email: info.email,
            expires_at,
        })
    }
}
