//! Verified caller identity
//!
//! Produced by the token validator and injected into request extensions;
//! downstream handlers only ever see this resolved form, never the raw
//! bearer token.

use chrono::{DateTime, Utc};

/// Identity and scope context resolved from a bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Subject claim (or provider user id for opaque tokens).
    pub subject: String,
    /// Space-separated scope string, when the token carried one.
    pub scope: Option<String>,
    /// Email, when the provider supplied one.
    pub email: Option<String>,
    /// Token expiry, when known. Opaque tokens usually have none.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Identity {
    /// The identity used when the authentication subsystem is disabled.
    pub fn anonymous() -> Self {
        Self {
            subject: "anonymous".to_string(),
            scope: None,
            email: None,
            expires_at: None,
        }
    }

    /// Whether this is the disabled-auth placeholder identity.
    pub fn is_anonymous(&self) -> bool {
        self.subject == "anonymous" && self.scope.is_none()
    }

    /// Check for a scope value in the space-separated scope string.
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scope
            .as_deref()
            .map(|s| s.split_whitespace().any(|v| v == scope))
            .unwrap_or(false)
    }
}
