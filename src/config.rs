//! Configuration input for the auth core.
//!
//! The core never reads configuration itself — it consumes an ordered list
//! of [`AuthConfig`] records produced by a [`ConfigProvider`]. How that list
//! is sourced (environment, file, secrets manager) is the caller's choice;
//! this module ships [`StaticConfigProvider`] for callers who already have
//! the list, and [`EnvConfigProvider`] for the common case of configuring
//! providers via environment variables.

use std::collections::HashSet;

use crate::error::{AuthError, Result};

/// Immutable configuration for a single upstream identity provider.
///
/// One `AuthConfig` exists per provider for the lifetime of the process;
/// nothing here is ever mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthConfig {
    /// Opaque identifier, unique across the configured providers. Used only
    /// for observability and for naming synthesized HMAC key IDs; never
    /// compared against token claims.
    pub provider_id: String,
    /// Expected `aud` claim (or `client_id`, for AWS Cognito-style access
    /// tokens that omit `aud`).
    pub audience: String,
    /// When set, the token's `iss` claim must equal this value for the
    /// provider to match.
    pub issuer: Option<String>,
    /// The OIDC discovery document URI. When absent, this provider has no
    /// discovered key material — it must rely entirely on `hmac_secret`.
    pub well_known_uri: Option<String>,
    /// Signing algorithms this provider's tokens may use, e.g. `{RS256}` or
    /// `{RS256, HS256}`.
    pub signing_algorithms: HashSet<String>,
    /// Shared secret for HS256 verification. When set and `HS256` is in
    /// `signing_algorithms`, a symmetric JWK is synthesized for this
    /// provider.
    pub hmac_secret: Option<String>,
    /// `kid` to assign the synthesized HMAC JWK. Defaults to
    /// `"<provider_id>-hs256"` when absent.
    pub hmac_key_id: Option<String>,
}

impl AuthConfig {
    /// True when `alg` is among this provider's allowed signing algorithms.
    #[must_use]
    pub fn allows_algorithm(&self, alg: &str) -> bool {
        self.signing_algorithms.iter().any(|a| a == alg)
    }

    #[must_use]
    pub(crate) fn resolved_hmac_kid(&self) -> String {
        self.hmac_key_id
            .clone()
            .unwrap_or_else(|| format!("{}-hs256", self.provider_id))
    }
}

/// Exposes the immutable list of configured identity providers.
///
/// The order of the returned sequence is significant only for
/// observability; correctness (provider exclusivity, audience/issuer
/// binding) must never depend on it.
pub trait ConfigProvider: Send + Sync {
    /// Return the configured providers. Never empty — an empty result is a
    /// startup error raised by whatever constructs this provider.
    fn list_auth_configs(&self) -> &[AuthConfig];
}

/// A `ConfigProvider` backed by an in-memory `Vec`, for tests and for
/// callers who assemble their provider list through their own application
/// config layer.
#[derive(Debug, Clone)]
pub struct StaticConfigProvider {
    configs: Vec<AuthConfig>,
}

impl StaticConfigProvider {
    /// Construct from an already-assembled list of providers.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::ConfigError`] if `configs` is empty or contains
    /// a duplicate `provider_id`.
    pub fn new(configs: Vec<AuthConfig>) -> Result<Self> {
        if configs.is_empty() {
            return Err(AuthError::ConfigError(
                "no auth providers configured".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for config in &configs {
            if !seen.insert(config.provider_id.clone()) {
                return Err(AuthError::ConfigError(format!(
                    "duplicate provider_id: {}",
                    config.provider_id
                )));
            }
        }
        Ok(Self { configs })
    }
}

impl ConfigProvider for StaticConfigProvider {
    fn list_auth_configs(&self) -> &[AuthConfig] {
        &self.configs
    }
}

/// A `ConfigProvider` that reads a semicolon-delimited list of provider
/// blocks from an environment variable.
///
/// Each block is a comma-separated `key=value` list, e.g.:
///
/// ```text
/// OIDC_AUTH_PROVIDERS="provider_id=google,audience=my-client,issuer=https://accounts.google.com,well_known_uri=https://accounts.google.com/.well-known/openid-configuration,signing_algorithms=RS256;provider_id=internal,audience=svc-a,signing_algorithms=HS256|RS256,hmac_secret=topsecret"
/// ```
///
/// `signing_algorithms` uses `|` to separate multiple algorithms (e.g.
/// `RS256|HS256`) since `,` already separates fields within a block.
///
/// Unknown keys within a block are ignored (forward compatibility); missing
/// required keys (`provider_id`, `audience`) fail the whole load.
pub struct EnvConfigProvider {
    configs: Vec<AuthConfig>,
}

impl EnvConfigProvider {
    /// Load from the given environment variable name.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::ConfigError`] if the variable is unset, empty,
    /// malformed, or resolves to zero providers.
    pub fn from_env_var(var_name: &str) -> Result<Self> {
        let raw = std::env::var(var_name).map_err(|_| {
            AuthError::ConfigError(format!("environment variable {var_name} is not set"))
        })?;
        Self::parse(&raw)
    }

    fn parse(raw: &str) -> Result<Self> {
        let mut configs = Vec::new();
        for block in raw.split(';').map(str::trim).filter(|b| !b.is_empty()) {
            configs.push(parse_block(block)?);
        }
        if configs.is_empty() {
            return Err(AuthError::ConfigError(
                "no auth providers configured".to_string(),
            ));
        }
        // Reuse StaticConfigProvider's validation (non-empty, unique ids).
        let validated = StaticConfigProvider::new(configs)?;
        Ok(Self {
            configs: validated.configs,
        })
    }
}

impl ConfigProvider for EnvConfigProvider {
    fn list_auth_configs(&self) -> &[AuthConfig] {
        &self.configs
    }
}

fn parse_block(block: &str) -> Result<AuthConfig> {
    let mut provider_id = None;
    let mut audience = None;
    let mut issuer = None;
    let mut well_known_uri = None;
    let mut signing_algorithms = HashSet::new();
    let mut hmac_secret = None;
    let mut hmac_key_id = None;

    for pair in block.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let Some((key, value)) = pair.split_once('=') else {
            return Err(AuthError::ConfigError(format!(
                "malformed provider field (expected key=value): {pair}"
            )));
        };
        let value = value.trim();
        match key.trim() {
            "provider_id" => provider_id = Some(value.to_string()),
            "audience" => audience = Some(value.to_string()),
            "issuer" => issuer = Some(value.to_string()),
            "well_known_uri" => well_known_uri = Some(value.to_string()),
            "signing_algorithms" => {
                signing_algorithms = value.split('|').map(str::to_string).collect();
            }
            "hmac_secret" => hmac_secret = Some(value.to_string()),
            "hmac_key_id" => hmac_key_id = Some(value.to_string()),
            _ => {}
        }
    }

    let provider_id = provider_id.ok_or_else(|| {
        AuthError::ConfigError(format!("provider block missing provider_id: {block}"))
    })?;
    let audience = audience.ok_or_else(|| {
        AuthError::ConfigError(format!("provider block missing audience: {block}"))
    })?;

    Ok(AuthConfig {
        provider_id,
        audience,
        issuer,
        well_known_uri,
        signing_algorithms,
        hmac_secret,
        hmac_key_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample(provider_id: &str) -> AuthConfig {
        AuthConfig {
            provider_id: provider_id.to_string(),
            audience: "client1".to_string(),
            issuer: Some("https://issuer1".to_string()),
            well_known_uri: Some("https://issuer1/.well-known/openid-configuration".to_string()),
            signing_algorithms: ["RS256".to_string()].into_iter().collect(),
            hmac_secret: None,
            hmac_key_id: None,
        }
    }

    #[test]
    fn static_provider_rejects_empty_list() {
        // GIVEN/WHEN: constructing from an empty Vec
        let result = StaticConfigProvider::new(Vec::new());

        // THEN: ConfigError
        assert!(matches!(result, Err(AuthError::ConfigError(_))));
    }

    #[test]
    fn static_provider_rejects_duplicate_provider_id() {
        // GIVEN: two configs sharing a provider_id
        let configs = vec![sample("dup"), sample("dup")];

        // WHEN/THEN: rejected
        let result = StaticConfigProvider::new(configs);
        assert!(matches!(result, Err(AuthError::ConfigError(_))));
    }

    #[test]
    fn static_provider_accepts_distinct_ids() {
        // GIVEN: two configs with distinct ids
        let configs = vec![sample("p1"), sample("p2")];

        // WHEN
        let provider = StaticConfigProvider::new(configs).unwrap();

        // THEN
        assert_eq!(provider.list_auth_configs().len(), 2);
    }

    #[test]
    fn allows_algorithm_checks_membership() {
        // GIVEN: a provider allowing RS256 only
        let config = sample("p1");

        // THEN
        assert!(config.allows_algorithm("RS256"));
        assert!(!config.allows_algorithm("HS256"));
    }

    #[test]
    fn resolved_hmac_kid_defaults_from_provider_id() {
        // GIVEN: a provider with no explicit hmac_key_id
        let mut config = sample("internal");
        config.hmac_key_id = None;

        // THEN: default shape is "<provider_id>-hs256"
        assert_eq!(config.resolved_hmac_kid(), "internal-hs256");

        // GIVEN: an explicit hmac_key_id
        config.hmac_key_id = Some("custom-kid".to_string());
        assert_eq!(config.resolved_hmac_kid(), "custom-kid");
    }

    #[test]
    fn env_config_provider_parses_multiple_blocks() {
        // GIVEN: a semicolon-delimited env var value with two providers
        let raw = "provider_id=google,audience=client1,issuer=https://accounts.google.com,well_known_uri=https://accounts.google.com/.well-known/openid-configuration,signing_algorithms=RS256;\
                    provider_id=internal,audience=svc-a,signing_algorithms=HS256,hmac_secret=topsecret";

        // WHEN
        let provider = EnvConfigProvider::parse(raw).unwrap();

        // THEN
        let configs = provider.list_auth_configs();
        assert_eq!(configs.len(), 2);
        assert_eq!(configs[0].provider_id, "google");
        assert_eq!(configs[1].hmac_secret.as_deref(), Some("topsecret"));
        assert!(configs[1].allows_algorithm("HS256"));
    }

    #[test]
    fn env_config_provider_parses_pipe_separated_algorithms() {
        // GIVEN: a provider block listing two signing algorithms
        let raw = "provider_id=internal,audience=svc-a,signing_algorithms=RS256|HS256,hmac_secret=topsecret";

        // WHEN
        let provider = EnvConfigProvider::parse(raw).unwrap();

        // THEN: both algorithms are recognized, not folded into one bogus entry
        let configs = provider.list_auth_configs();
        assert_eq!(configs.len(), 1);
        assert!(configs[0].allows_algorithm("RS256"));
        assert!(configs[0].allows_algorithm("HS256"));
        assert_eq!(configs[0].signing_algorithms.len(), 2);
    }

    #[test]
    fn env_config_provider_rejects_missing_required_field() {
        // GIVEN: a block missing audience
        let raw = "provider_id=google,signing_algorithms=RS256";

        // WHEN/THEN: rejected
        let result = EnvConfigProvider::parse(raw);
        assert!(matches!(result, Err(AuthError::ConfigError(_))));
    }

    #[test]
    fn env_config_provider_rejects_empty_input() {
        // GIVEN/WHEN/THEN: blank input yields ConfigError, not a panic
        let result = EnvConfigProvider::parse("   ");
        assert!(matches!(result, Err(AuthError::ConfigError(_))));
    }
}
