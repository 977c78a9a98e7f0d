//! Minimal CLI harness for exercising `TokenVerifier` against a real or
//! mock identity provider.
//!
//! Usage:
//!
//! ```text
//! OIDC_AUTH_PROVIDERS="provider_id=google,audience=my-client,issuer=https://accounts.google.com,well_known_uri=https://accounts.google.com/.well-known/openid-configuration,signing_algorithms=RS256" \
//!     verify-demo "Bearer eyJhbGciOi..."
//! ```

use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info};

use oidc_auth_core::config::{ConfigProvider, EnvConfigProvider};
use oidc_auth_core::discovery::DiscoveryCache;
use oidc_auth_core::keys::KeyMaterialManager;
use oidc_auth_core::verifier::TokenVerifier;
use oidc_auth_core::setup_tracing;

const PROVIDERS_ENV_VAR: &str = "OIDC_AUTH_PROVIDERS";

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = setup_tracing("info", None) {
        eprintln!("failed to set up tracing: {e}");
        return ExitCode::FAILURE;
    }

    let Some(authorization_header) = std::env::args().nth(1) else {
        eprintln!("usage: verify-demo '<Authorization header value>'");
        return ExitCode::FAILURE;
    };

    let provider = match EnvConfigProvider::from_env_var(PROVIDERS_ENV_VAR) {
        Ok(p) => p,
        Err(e) => {
            error!("failed to load {PROVIDERS_ENV_VAR}: {e}");
            return ExitCode::FAILURE;
        }
    };

    let configs: Vec<Arc<_>> = provider
        .list_auth_configs()
        .iter()
        .cloned()
        .map(Arc::new)
        .collect();

    info!(providers = configs.len(), "loaded auth configuration");

    let discovery = Arc::new(DiscoveryCache::new());
    let keys = Arc::new(KeyMaterialManager::new(configs.clone(), discovery));
    let verifier = TokenVerifier::new(configs, keys);

    let Some(token) = TokenVerifier::extract_token(Some(&authorization_header)) else {
        eprintln!("Authorization header is not a well-formed 'Bearer <token>' value");
        return ExitCode::FAILURE;
    };

    match verifier.verify(&token).await {
        Ok(decoded) => {
            println!("{}", serde_json::to_string_pretty(&decoded.claims).unwrap());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("verification failed: {e}");
            ExitCode::FAILURE
        }
    }
}
