//! Key material orchestration across all configured providers (C3).
//!
//! [`KeyMaterialManager`] is the one piece of process-wide mutable state in
//! this crate: it owns the `kid -> ClientKeySet` index built by fetching
//! every provider's discovery document and JWKS exactly once, no matter how
//! many callers race to trigger that first fetch.
//!
//! Initialization uses event-based coordination (a state mutex plus a
//! [`tokio::sync::Notify`]) rather than the plain boolean flag the library
//! this crate is extracted from actually used in both of its internal
//! variants — see `DESIGN.md` for why a real event is required to avoid a
//! lock-order inversion with the discovery cache's per-URI locks.

use std::collections::HashSet;
use std::sync::Arc;

use jsonwebtoken::jwk::{
    AlgorithmParameters, CommonParameters, Jwk, JwkSet, OctetKeyParameters, OctetKeyType,
    PublicKeyUse,
};
use parking_lot::RwLock;
use tokio::sync::{Mutex, Notify};
use tracing::{info, warn};

use crate::config::AuthConfig;
use crate::discovery::{DiscoveryCache, DiscoveryDocument};
use crate::error::{AuthError, Result};

/// The per-provider bundle of configuration, discovery document, and key
/// material, built once during initialization.
pub struct ClientKeySet {
    /// The provider this key set belongs to.
    pub auth_config: Arc<AuthConfig>,
    /// The provider's discovery document, or `None` for HMAC-only
    /// providers that have no `well_known_uri`.
    pub discovery_document: Option<DiscoveryDocument>,
    /// The provider's resolved key set (discovered JWKS plus any
    /// synthesized HMAC key).
    pub jwks: JwkSet,
    /// The `kid`s this set owns, after cross-provider exclusivity (I1) has
    /// been enforced. A `kid` dropped due to collision with an
    /// earlier-registered provider is absent here even though the raw key
    /// material may still be present in `jwks`.
    pub kids: HashSet<String>,
}

#[derive(Default)]
struct State {
    loaded: bool,
    initializing: bool,
}

/// Orchestrates discovery + JWKS retrieval across all providers and serves
/// O(1) `kid -> ClientKeySet` lookups.
pub struct KeyMaterialManager {
    configs: Vec<Arc<AuthConfig>>,
    discovery: Arc<DiscoveryCache>,
    http: reqwest::Client,
    state: Mutex<State>,
    notify: Notify,
    refresh_lock: Mutex<()>,
    client_key_sets: RwLock<Vec<Arc<ClientKeySet>>>,
    kid_index: RwLock<std::collections::HashMap<String, Arc<ClientKeySet>>>,
}

impl KeyMaterialManager {
    /// Construct a manager over the given providers, sharing the given
    /// discovery cache. Performs no I/O until [`ensure_initialized`] (or a
    /// call that implies it) runs.
    ///
    /// [`ensure_initialized`]: KeyMaterialManager::ensure_initialized
    #[must_use]
    pub fn new(configs: Vec<Arc<AuthConfig>>, discovery: Arc<DiscoveryCache>) -> Self {
        Self::with_client(configs, discovery, reqwest::Client::new())
    }

    /// Construct with a caller-supplied HTTP client, for tests pointed at a
    /// mock JWKS endpoint.
    #[must_use]
    pub fn with_client(
        configs: Vec<Arc<AuthConfig>>,
        discovery: Arc<DiscoveryCache>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            configs,
            discovery,
            http,
            state: Mutex::new(State::default()),
            notify: Notify::new(),
            refresh_lock: Mutex::new(()),
            client_key_sets: RwLock::new(Vec::new()),
            kid_index: RwLock::new(std::collections::HashMap::new()),
        }
    }

    /// Idempotent. The first caller performs the full discovery+JWKS load
    /// for every provider; concurrent callers wait on the same completion
    /// event; callers after success return immediately without I/O.
    pub async fn ensure_initialized(&self) -> Result<()> {
        loop {
            let mut state = self.state.lock().await;
            if state.loaded {
                return Ok(());
            }
            if state.initializing {
                // Build the `Notified` future before releasing the lock so
                // a `notify_waiters()` that races with our drop can never
                // be missed.
                let notified = self.notify.notified();
                drop(state);
                notified.await;
                continue;
            }
            state.initializing = true;
            drop(state);

            let result = self.do_initialize().await;

            let mut state = self.state.lock().await;
            state.initializing = false;
            state.loaded = result.is_ok();
            drop(state);
            self.notify.notify_waiters();
            return result;
        }
    }

    /// Pure lookup after initialization. Returns `None` if `kid` is unknown
    /// or if the manager has not been initialized.
    #[must_use]
    pub fn client_key_set_for_kid(&self, kid: &str) -> Option<Arc<ClientKeySet>> {
        self.kid_index.read().get(kid).cloned()
    }

    /// Number of `ClientKeySet`s currently installed.
    #[must_use]
    pub fn client_key_set_count(&self) -> usize {
        self.client_key_sets.read().len()
    }

    /// Clear the discovery cache and all installed key material, then
    /// re-run initialization. Serialized with respect to other `refresh`
    /// calls and to any in-progress `ensure_initialized`.
    pub async fn refresh(&self) -> Result<()> {
        let _refresh_guard = self.refresh_lock.lock().await;

        loop {
            let mut state = self.state.lock().await;
            if state.initializing {
                let notified = self.notify.notified();
                drop(state);
                notified.await;
                continue;
            }
            state.loaded = false;
            break;
        }

        info!("refreshing OIDC key material");
        self.discovery.clear().await;
        self.client_key_sets.write().clear();
        self.kid_index.write().clear();

        self.ensure_initialized().await
    }

    async fn do_initialize(&self) -> Result<()> {
        struct Raw {
            config: Arc<AuthConfig>,
            document: Option<DiscoveryDocument>,
            jwks: JwkSet,
        }

        let mut raws = Vec::new();

        for config in &self.configs {
            if let Some(uri) = &config.well_known_uri {
                let document = self.discovery.get(uri).await?;
                let jwks = self.fetch_jwks(&document.jwks_uri).await?;
                raws.push(Raw {
                    config: Arc::clone(config),
                    document: Some(document),
                    jwks,
                });
            }
        }

        for config in &self.configs {
            if config.allows_algorithm("HS256") {
                if let Some(secret) = &config.hmac_secret {
                    raws.push(Raw {
                        config: Arc::clone(config),
                        document: None,
                        jwks: JwkSet {
                            keys: vec![synthesize_hmac_jwk(config, secret)],
                        },
                    });
                }
            }
        }

        let mut owned_kids: HashSet<String> = HashSet::new();
        let mut new_index = std::collections::HashMap::new();
        let mut new_list = Vec::new();

        for raw in raws {
            let mut seen_in_provider = HashSet::new();
            let mut kids = HashSet::new();

            for jwk in &raw.jwks.keys {
                let Some(kid) = jwk.common.key_id.clone() else {
                    continue;
                };
                // I1, within-provider half: de-duplicate before considering
                // cross-provider ownership.
                if !seen_in_provider.insert(kid.clone()) {
                    continue;
                }
                if owned_kids.contains(&kid) {
                    warn!(
                        kid = %kid,
                        provider = %raw.config.provider_id,
                        "kid already claimed by another provider; dropping duplicate"
                    );
                    continue;
                }
                owned_kids.insert(kid.clone());
                kids.insert(kid);
            }

            let client_key_set = Arc::new(ClientKeySet {
                auth_config: raw.config,
                discovery_document: raw.document,
                jwks: raw.jwks,
                kids: kids.clone(),
            });

            for kid in kids {
                new_index.insert(kid, Arc::clone(&client_key_set));
            }
            new_list.push(client_key_set);
        }

        *self.client_key_sets.write() = new_list;
        *self.kid_index.write() = new_index;
        Ok(())
    }

    async fn fetch_jwks(&self, jwks_uri: &str) -> Result<JwkSet> {
        let response = self
            .http
            .get(jwks_uri)
            .send()
            .await
            .map_err(|e| AuthError::from_reqwest(jwks_uri, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::DiscoveryFailed {
                uri: jwks_uri.to_string(),
                status: status.as_u16(),
            });
        }

        response
            .json::<JwkSet>()
            .await
            .map_err(|e| AuthError::from_reqwest(jwks_uri, e))
    }
}

fn synthesize_hmac_jwk(config: &AuthConfig, secret: &str) -> Jwk {
    use base64::Engine;
    let encoded = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(secret.as_bytes());

    Jwk {
        common: CommonParameters {
            public_key_use: Some(PublicKeyUse::Signature),
            key_operations: None,
            key_algorithm: None,
            key_id: Some(config.resolved_hmac_kid()),
            x509_url: None,
            x509_chain: None,
            x509_sha1_fingerprint: None,
            x509_sha256_fingerprint: None,
        },
        algorithm: AlgorithmParameters::OctetKey(OctetKeyParameters {
            key_type: OctetKeyType::Octet,
            value: encoded,
        }),
    }
}
