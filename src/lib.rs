//! OIDC multi-provider bearer token verification core.
//!
//! Three pieces compose to verify a request's bearer token against any
//! number of independently configured identity providers:
//!
//! - [`config`]: the `AuthConfig` record and the `ConfigProvider` trait
//!   that supplies a list of them.
//! - [`discovery`] + [`keys`]: fetch and cache each provider's OIDC
//!   discovery document and JWKS, collapsing concurrent fetches for the
//!   same URI or the same process-wide initialization into one.
//! - [`verifier`]: extracts a bearer token from an `Authorization` header,
//!   decodes it, verifies its signature against the right provider's key
//!   material, and binds its claims back to exactly one configured
//!   provider.
//!
//! A typical caller wires these together once at startup:
//!
//! ```no_run
//! use std::sync::Arc;
//! use oidc_auth_core::config::EnvConfigProvider;
//! use oidc_auth_core::config::ConfigProvider;
//! use oidc_auth_core::discovery::DiscoveryCache;
//! use oidc_auth_core::keys::KeyMaterialManager;
//! use oidc_auth_core::verifier::TokenVerifier;
//!
//! # async fn run() -> oidc_auth_core::Result<()> {
//! let provider = EnvConfigProvider::from_env_var("OIDC_AUTH_PROVIDERS")?;
//! let configs: Vec<_> = provider.list_auth_configs().iter().cloned().map(Arc::new).collect();
//! let discovery = Arc::new(DiscoveryCache::new());
//! let keys = Arc::new(KeyMaterialManager::new(configs.clone(), discovery));
//! let verifier = TokenVerifier::new(configs, keys);
//!
//! let token = TokenVerifier::extract_token(Some("Bearer eyJhbGciOi..."));
//! if let Some(token) = token {
//!     let decoded = verifier.verify(&token).await?;
//!     println!("{:?}", decoded.claims);
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod discovery;
pub mod error;
pub mod keys;
pub mod verifier;

pub use error::{AuthError, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install a `tracing` subscriber at the given default level.
///
/// Respects `RUST_LOG` if set; `level` is only the fallback. Pass
/// `Some("json")` for structured output suitable for log aggregation,
/// anything else (including `None`) for human-readable output.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
