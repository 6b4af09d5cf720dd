//! JWKS fetching and caching
//!
//! Pulls the upstream issuer's key set once and serves decoding keys from
//! memory. A signing-key rotation shows up as an unknown `kid`; the cache
//! then refetches, rate-limited to one network trip per minute so a flood
//! of bad tokens cannot hammer the issuer.

use jsonwebtoken::jwk::{AlgorithmParameters, Jwk, JwkSet};
use jsonwebtoken::{Algorithm, DecodingKey};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use toolgate_core::GatewayError;

/// Minimum spacing between JWKS refetches.
const MIN_REFETCH_INTERVAL: Duration = Duration::from_secs(60);

struct CachedKeys {
    set: JwkSet,
    fetched_at: Instant,
}

/// Cache over the upstream issuer's JSON Web Key Set.
pub struct JwksCache {
    jwks_uri: String,
    http: reqwest::Client,
    keys: RwLock<Option<CachedKeys>>,
}

impl JwksCache {
    pub fn new(jwks_uri: String, http: reqwest::Client) -> Self {
        Self {
            jwks_uri,
            http,
            keys: RwLock::new(None),
        }
    }

    /// The JWKS endpoint this cache reads from.
    pub fn jwks_uri(&self) -> &str {
        &self.jwks_uri
    }

    /// Resolve the decoding key for `kid`, refetching once if the kid is
    /// unknown and the rate limit allows.
    pub async fn decoding_key(&self, kid: &str) -> Result<(DecodingKey, Algorithm), GatewayError> {
        if let Some(found) = self.lookup(kid).await? {
            return Ok(found);
        }

        // Unknown kid usually means key rotation upstream.
        if self.refetch_allowed().await {
            debug!("[Auth] Unknown kid {}, refetching JWKS", kid);
            self.fetch().await?;
            if let Some(found) = self.lookup(kid).await? {
                return Ok(found);
            }
        }

        warn!("[Auth] No JWKS key for kid {}", kid);
        Err(GatewayError::InvalidToken(
            "token signed with unknown key".to_string(),
        ))
    }

    async fn lookup(&self, kid: &str) -> Result<Option<(DecodingKey, Algorithm)>, GatewayError> {
        let guard = self.keys.read().await;
        let Some(cached) = guard.as_ref() else {
            drop(guard);
            self.fetch().await?;
            return self.lookup_no_fetch(kid).await;
        };
        Ok(Self::find_key(&cached.set, kid)?)
    }

    async fn lookup_no_fetch(
        &self,
        kid: &str,
    ) -> Result<Option<(DecodingKey, Algorithm)>, GatewayError> {
        let guard = self.keys.read().await;
        match guard.as_ref() {
            Some(cached) => Ok(Self::find_key(&cached.set, kid)?),
            None => Ok(None),
        }
    }

    fn find_key(set: &JwkSet, kid: &str) -> Result<Option<(DecodingKey, Algorithm)>, GatewayError> {
        let Some(jwk) = set.find(kid) else {
            return Ok(None);
        };
        Ok(Some(Self::to_decoding_key(jwk)?))
    }

    fn to_decoding_key(jwk: &Jwk) -> Result<(DecodingKey, Algorithm), GatewayError> {
        let key = DecodingKey::from_jwk(jwk)
            .map_err(|e| GatewayError::InvalidToken(format!("unusable JWKS key: {}", e)))?;
        let algorithm = match jwk.common.key_algorithm.and_then(key_algorithm_to_validation) {
            Some(alg) => alg,
            // Auth0-style issuers omit alg on some keys; infer from type.
            None => match &jwk.algorithm {
                AlgorithmParameters::RSA(_) => Algorithm::RS256,
                AlgorithmParameters::EllipticCurve(_) => Algorithm::ES256,
                _ => {
                    return Err(GatewayError::InvalidToken(
                        "unsupported JWKS key type".to_string(),
                    ))
                }
            },
        };
        Ok((key, algorithm))
    }

    async fn refetch_allowed(&self) -> bool {
        let guard = self.keys.read().await;
        match guard.as_ref() {
            Some(cached) => cached.fetched_at.elapsed() >= MIN_REFETCH_INTERVAL,
            None => true,
        }
    }

    async fn fetch(&self) -> Result<(), GatewayError> {
        let response = self
            .http
            .get(&self.jwks_uri)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| {
                warn!("[Auth] JWKS fetch failed: {}", e);
                GatewayError::UpstreamUnavailable(format!("JWKS fetch failed: {}", e))
            })?;

        if !response.status().is_success() {
            warn!("[Auth] JWKS fetch returned {}", response.status());
            return Err(GatewayError::UpstreamUnavailable(format!(
                "JWKS fetch returned {}",
                response.status()
            )));
        }

        let set: JwkSet = response.json().await.map_err(|e| {
            GatewayError::UpstreamUnavailable(format!("invalid JWKS document: {}", e))
        })?;

        info!("[Auth] Fetched JWKS ({} keys)", set.keys.len());
        let mut guard = self.keys.write().await;
        *guard = Some(CachedKeys {
            set,
            fetched_at: Instant::now(),
        });
        Ok(())
    }
}

fn key_algorithm_to_validation(alg: jsonwebtoken::jwk::KeyAlgorithm) -> Option<Algorithm> {
    use jsonwebtoken::jwk::KeyAlgorithm as K;
    match alg {
        K::RS256 => Some(Algorithm::RS256),
        K::RS384 => Some(Algorithm::RS384),
        K::RS512 => Some(Algorithm::RS512),
        K::ES256 => Some(Algorithm::ES256),
        K::ES384 => Some(Algorithm::ES384),
        K::PS256 => Some(Algorithm::PS256),
        K::PS384 => Some(Algorithm::PS384),
        K::PS512 => Some(Algorithm::PS512),
        _ => None,
    }
}
