//! Error taxonomy for OIDC token verification.
//!
//! Every variant maps to exactly one "kind" in the design's error taxonomy;
//! callers should match on variant, not on the `Display` message, to decide
//! how to react (reject, retry, prompt re-auth, or fail fast at startup).

use thiserror::Error;

/// Result type alias used throughout this crate.
pub type Result<T> = std::result::Result<T, AuthError>;

/// Classified errors raised by discovery, key material management, and
/// token verification.
#[derive(Error, Debug)]
pub enum AuthError {
    /// Empty token, empty URI, or another caller-supplied argument that
    /// should never be empty. Not recoverable — a programmer error.
    #[error("bad input: {0}")]
    BadInput(String),

    /// The `Authorization` header was absent or not a `Bearer` value.
    #[error("bearer token missing")]
    TokenMissing,

    /// The token string is not a well-formed JWT compact serialization.
    #[error("token malformed: {0}")]
    TokenMalformed(String),

    /// Signature invalid, claim-to-provider binding failed, `kid` unknown,
    /// or a required claim is missing. Reject the request; do not retry.
    #[error("token invalid: {0}")]
    TokenInvalid(String),

    /// `exp` is in the past. Distinct from `TokenInvalid` so callers can
    /// prompt re-authentication instead of rejecting outright.
    #[error("token expired: exp={exp} now={now} iss={iss:?} aud={aud:?}")]
    TokenExpired {
        /// Human-readable expiration time, formatted in the verifier's
        /// configured timezone.
        exp: String,
        /// Human-readable current time, in the same timezone.
        now: String,
        /// The token's `iss` claim, if present.
        iss: Option<String>,
        /// The token's `aud` (or `client_id` fallback) claim, if present.
        aud: Option<String>,
        /// The original compact token string.
        token: String,
    },

    /// A `kid` was present in the token header but no `ClientKeySet` carries
    /// it. The caller may call `refresh()` and retry once.
    #[error("no key material for kid {0}")]
    KeyNotFound(String),

    /// The upstream discovery document fetch returned a non-2xx status.
    #[error("discovery fetch failed for {uri}: {status}")]
    DiscoveryFailed {
        /// The well-known URI that was fetched.
        uri: String,
        /// The HTTP status code returned.
        status: u16,
    },

    /// Connection refused, DNS failure, or timeout while reaching an
    /// upstream discovery or JWKS endpoint. Transient.
    #[error("unreachable: {0}")]
    Unreachable(String),

    /// The configured provider list was empty at startup. Fatal.
    #[error("configuration error: {0}")]
    ConfigError(String),
}

impl AuthError {
    /// True for errors that are worth retrying without any change in input
    /// (network blips, upstream hiccups).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unreachable(_) | Self::DiscoveryFailed { .. })
    }

    /// True for the one error kind that should abort process startup rather
    /// than be handled per-request.
    #[must_use]
    pub fn is_fatal_config(&self) -> bool {
        matches!(self, Self::ConfigError(_))
    }

    /// True when a caller may reasonably call `refresh()` and retry the
    /// verification once before giving up.
    #[must_use]
    pub fn is_retryable_after_refresh(&self) -> bool {
        matches!(self, Self::KeyNotFound(_))
    }

    /// True for errors whose root cause is the token itself rather than the
    /// network or configuration — useful for deciding whether to log at
    /// `debug` (expected, client-caused) vs `warn` (operational).
    #[must_use]
    pub fn is_client_fault(&self) -> bool {
        matches!(
            self,
            Self::TokenMissing
                | Self::TokenMalformed(_)
                | Self::TokenInvalid(_)
                | Self::TokenExpired { .. }
        )
    }

    pub(crate) fn from_reqwest(uri: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            Self::Unreachable(format!("{uri}: {err}"))
        } else if let Some(status) = err.status() {
            Self::DiscoveryFailed {
                uri: uri.to_string(),
                status: status.as_u16(),
            }
        } else {
            Self::Unreachable(format!("{uri}: {err}"))
        }
    }
}
