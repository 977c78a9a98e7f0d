//! End-to-end bearer token verification (C4).
//!
//! [`TokenVerifier`] is stateless apart from its references to the
//! configured providers and the shared [`KeyMaterialManager`]. Its three
//! public operations — [`extract_token`](TokenVerifier::extract_token),
//! [`decode`](TokenVerifier::decode), and [`verify`](TokenVerifier::verify)
//! — map directly onto the three public operations the design calls for.

use std::sync::Arc;

use base64::Engine;
use chrono::{TimeZone, Utc};
use chrono_tz::Tz;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, jwk::JwkSet};

use crate::config::AuthConfig;
use crate::error::{AuthError, Result};
use crate::keys::KeyMaterialManager;

/// A successfully verified bearer token: the raw compact string plus its
/// verified claims.
#[derive(Debug, Clone)]
pub struct DecodedToken {
    /// The original compact-JWT string.
    pub token: String,
    /// The verified claims, as a JSON object.
    pub claims: serde_json::Value,
}

/// Verifies bearer tokens against a set of configured providers, using a
/// shared [`KeyMaterialManager`] for key lookup.
pub struct TokenVerifier {
    configs: Vec<Arc<AuthConfig>>,
    keys: Arc<KeyMaterialManager>,
    /// Timezone used only to format the human-readable `exp`/`now` strings
    /// carried on [`AuthError::TokenExpired`]. The underlying comparison is
    /// UTC Unix-timestamp arithmetic and is unaffected by this setting.
    timezone: Tz,
}

impl TokenVerifier {
    /// Construct a verifier over `configs`, backed by `keys`. Expiration
    /// diagnostics are formatted in `America/New_York`, matching the
    /// source library's hard-coded default.
    #[must_use]
    pub fn new(configs: Vec<Arc<AuthConfig>>, keys: Arc<KeyMaterialManager>) -> Self {
        Self::with_timezone(configs, keys, chrono_tz::America::New_York)
    }

    /// Construct a verifier with an explicit diagnostics timezone.
    #[must_use]
    pub fn with_timezone(
        configs: Vec<Arc<AuthConfig>>,
        keys: Arc<KeyMaterialManager>,
        timezone: Tz,
    ) -> Self {
        Self {
            configs,
            keys,
            timezone,
        }
    }

    /// Extract the bearer token from an `Authorization` header value.
    ///
    /// Accepts exactly the shape `Bearer <token>` (case-insensitive
    /// scheme, any run of whitespace as separator). Any other shape,
    /// including a missing header, returns `None`. Pure function, no I/O.
    #[must_use]
    pub fn extract_token(authorization_header: Option<&str>) -> Option<String> {
        let header = authorization_header?;
        let mut parts = header.split_whitespace();
        let scheme = parts.next()?;
        let token = parts.next()?;
        if parts.next().is_some() {
            return None;
        }
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }
        Some(token.to_string())
    }

    /// Parse a compact JWT, optionally verifying its signature.
    ///
    /// Returns `Ok(None)` if `token` does not have exactly two `.`
    /// separators (not a JWT at all — the caller may choose to ignore
    /// this rather than treat it as an error).
    ///
    /// When `verify_signature` is `false`, this is a pure function of
    /// `token`: it base64url-decodes the payload and parses it as JSON
    /// without contacting any key material.
    ///
    /// # Errors
    ///
    /// - [`AuthError::TokenMalformed`] if `verify_signature` is `false` and
    ///   the payload segment is not valid base64url JSON.
    /// - [`AuthError::KeyNotFound`] if `verify_signature` is `true` and no
    ///   `ClientKeySet` carries the token's `kid`.
    /// - [`AuthError::TokenInvalid`] for any other verification failure.
    pub async fn decode(
        &self,
        token: &str,
        verify_signature: bool,
    ) -> Result<Option<serde_json::Value>> {
        if token.matches('.').count() != 2 {
            return Ok(None);
        }

        if !verify_signature {
            return decode_unverified_claims(token).map(Some);
        }

        self.keys.ensure_initialized().await?;

        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| AuthError::TokenMalformed(e.to_string()))?;
        let kid = header
            .kid
            .clone()
            .ok_or_else(|| AuthError::TokenInvalid("JOSE header missing kid".to_string()))?;

        let set = self
            .keys
            .client_key_set_for_kid(&kid)
            .ok_or_else(|| AuthError::KeyNotFound(kid.clone()))?;

        let decoding_key = find_decoding_key(&set.jwks, &kid)
            .ok_or_else(|| AuthError::KeyNotFound(kid.clone()))?;

        let mut validation = Validation::new(header.alg);
        validation.algorithms = allowed_algorithms(&set.auth_config);
        validation.validate_aud = false;
        validation.validate_nbf = true;
        validation.leeway = 60;

        let claims: serde_json::Value =
            jsonwebtoken::decode(token, &decoding_key, &validation)
                .map(|data| data.claims)
                .map_err(|e| self.classify_jwt_error(token, e))?;

        Ok(Some(claims))
    }

    /// Full-contract verification: decode, verify signature, bind claims
    /// to a configured provider, and validate standard JWT claims.
    ///
    /// # Errors
    ///
    /// See the crate-level error taxonomy in [`AuthError`]; every branch of
    /// the design's verification algorithm maps to exactly one variant.
    pub async fn verify(&self, token: &str) -> Result<DecodedToken> {
        if token.is_empty() {
            return Err(AuthError::BadInput("token is empty".to_string()));
        }

        self.keys.ensure_initialized().await?;

        let header = jsonwebtoken::decode_header(token)
            .map_err(|_| AuthError::TokenInvalid("malformed JOSE header".to_string()))?;
        let kid = header
            .kid
            .clone()
            .ok_or_else(|| AuthError::TokenInvalid("JOSE header missing kid".to_string()))?;

        let set = self.keys.client_key_set_for_kid(&kid).ok_or_else(|| {
            AuthError::TokenInvalid(format!("no matching JWKS for kid {kid}"))
        })?;

        let decoding_key = find_decoding_key(&set.jwks, &kid).ok_or_else(|| {
            AuthError::TokenInvalid(format!("unable to build a decoding key for kid {kid}"))
        })?;

        let mut validation = Validation::new(header.alg);
        validation.algorithms = allowed_algorithms(&set.auth_config);
        validation.validate_aud = false;
        validation.validate_nbf = true;
        validation.leeway = 60;

        let claims: serde_json::Value = match jsonwebtoken::decode(token, &decoding_key, &validation) {
            Ok(data) => data.claims,
            Err(err) => return Err(self.classify_jwt_error(token, err)),
        };

        let iss = claims
            .get("iss")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let aud = extract_audience(&claims);

        let Some(aud) = aud else {
            return Err(AuthError::TokenInvalid(
                "token is missing 'aud' and 'client_id' claims".to_string(),
            ));
        };

        let matched = self.configs.iter().find(|config| {
            if config.audience != aud {
                return false;
            }
            match &config.issuer {
                Some(expected) => iss.as_deref() == Some(expected.as_str()),
                None => true,
            }
        });

        if matched.is_none() {
            return Err(AuthError::TokenInvalid(format!(
                "token issuer {iss:?} and audience '{aud}' do not match any configured auth provider"
            )));
        }

        Ok(DecodedToken {
            token: token.to_string(),
            claims,
        })
    }

    fn classify_jwt_error(&self, token: &str, err: jsonwebtoken::errors::Error) -> AuthError {
        use jsonwebtoken::errors::ErrorKind;

        if matches!(err.kind(), ErrorKind::ExpiredSignature) {
            let claims = decode_unverified_claims(token).ok();
            let exp = claims
                .as_ref()
                .and_then(|c| c.get("exp"))
                .and_then(serde_json::Value::as_i64);
            let iss = claims
                .as_ref()
                .and_then(|c| c.get("iss"))
                .and_then(|v| v.as_str())
                .map(str::to_string);
            let aud = claims.as_ref().and_then(extract_audience);

            AuthError::TokenExpired {
                exp: self.format_timestamp(exp),
                now: self.format_timestamp(Some(Utc::now().timestamp())),
                iss,
                aud,
                token: token.to_string(),
            }
        } else {
            AuthError::TokenInvalid(err.to_string())
        }
    }

    fn format_timestamp(&self, ts: Option<i64>) -> String {
        match ts.and_then(|s| Utc.timestamp_opt(s, 0).single()) {
            Some(utc) => utc
                .with_timezone(&self.timezone)
                .format("%Y-%m-%d %I:%M:%S %p %Z")
                .to_string(),
            None => "unknown".to_string(),
        }
    }
}

fn extract_audience(claims: &serde_json::Value) -> Option<String> {
    match claims.get("aud") {
        Some(serde_json::Value::String(s)) => Some(s.clone()),
        Some(serde_json::Value::Array(items)) => {
            items.iter().find_map(|v| v.as_str().map(str::to_string))
        }
        _ => claims
            .get("client_id")
            .and_then(|v| v.as_str())
            .map(str::to_string),
    }
}

fn decode_unverified_claims(token: &str) -> Result<serde_json::Value> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(AuthError::TokenMalformed(
            "expected three dot-separated segments".to_string(),
        ));
    }

    let payload = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(parts[1])
        .map_err(|e| AuthError::TokenMalformed(format!("payload is not valid base64url: {e}")))?;

    serde_json::from_slice(&payload)
        .map_err(|e| AuthError::TokenMalformed(format!("payload is not valid JSON: {e}")))
}

fn find_decoding_key(jwks: &JwkSet, kid: &str) -> Option<DecodingKey> {
    jwks.keys
        .iter()
        .find(|jwk| jwk.common.key_id.as_deref() == Some(kid))
        .and_then(|jwk| DecodingKey::from_jwk(jwk).ok())
}

fn allowed_algorithms(config: &AuthConfig) -> Vec<Algorithm> {
    config
        .signing_algorithms
        .iter()
        .filter_map(|name| alg_from_str(name))
        .collect()
}

fn alg_from_str(name: &str) -> Option<Algorithm> {
    match name {
        "HS256" => Some(Algorithm::HS256),
        "HS384" => Some(Algorithm::HS384),
        "HS512" => Some(Algorithm::HS512),
        "RS256" => Some(Algorithm::RS256),
        "RS384" => Some(Algorithm::RS384),
        "RS512" => Some(Algorithm::RS512),
        "ES256" => Some(Algorithm::ES256),
        "ES384" => Some(Algorithm::ES384),
        "PS256" => Some(Algorithm::PS256),
        "PS384" => Some(Algorithm::PS384),
        "PS512" => Some(Algorithm::PS512),
        "EdDSA" => Some(Algorithm::EdDSA),
        _ => None,
    }
}
