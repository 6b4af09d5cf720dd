//! Gateway error taxonomy
//!
//! Every failure surfaced to a caller maps onto one of five machine-readable
//! error codes. Handlers serialize these as `{error, error_description}`
//! with the documented HTTP status.

use serde::Serialize;

/// Errors surfaced to callers of the gateway.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    /// Malformed caller input (missing header, bad scheme, invalid body).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Signature/audience/issuer/expiry failure or failed introspection.
    #[error("invalid token: {0}")]
    InvalidToken(String),

    /// Denylisted or unknown client id.
    #[error("invalid client: {0}")]
    InvalidClient(String),

    /// Provisioning could not complete safely (rolled back).
    #[error("registration failed: {0}")]
    RegistrationFailed(String),

    /// Timeout or 5xx from the upstream provider.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),
}

impl GatewayError {
    /// The wire-level `error` code.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidToken(_) => "invalid_token",
            Self::InvalidClient(_) => "invalid_client",
            Self::RegistrationFailed(_) => "registration_failed",
            Self::UpstreamUnavailable(_) => "upstream_unavailable",
        }
    }

    /// The HTTP status this error is documented to produce.
    pub fn status(&self) -> u16 {
        match self {
            Self::InvalidRequest(_) => 400,
            Self::InvalidToken(_) => 401,
            Self::InvalidClient(_) => 400,
            Self::RegistrationFailed(_) => 500,
            Self::UpstreamUnavailable(_) => 502,
        }
    }

    /// The human-readable description carried alongside the code.
    pub fn description(&self) -> &str {
        match self {
            Self::InvalidRequest(d)
            | Self::InvalidToken(d)
            | Self::InvalidClient(d)
            | Self::RegistrationFailed(d)
            | Self::UpstreamUnavailable(d) => d,
        }
    }

    /// Wire representation: `{error, error_description}`.
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            error: self.error_code().to_string(),
            error_description: Some(self.description().to_string()),
        }
    }
}

/// OAuth-style JSON error body.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}
