//! Per-URI singleflight cache for OIDC discovery documents (C2).
//!
//! Fetches each well-known URI's discovery document exactly once under
//! concurrent load. The algorithm is two-level locking: a short global
//! mutex guards creation of per-URI locks, and the actual HTTP GET happens
//! while holding only the per-URI lock — never the global one — so unrelated
//! URIs never block on each other's network round trip.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{AuthError, Result};

/// The raw decoded JSON of an OIDC well-known discovery document.
///
/// Only `jwks_uri` and `issuer` are semantically required by this crate;
/// every other field is opaque passthrough, preserved for callers that want
/// it (e.g. `authorization_endpoint`) but never interpreted here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryDocument {
    /// The provider's issuer URL, as asserted by the discovery document
    /// itself (independent of any configured `AuthConfig::issuer`).
    pub issuer: String,
    /// The URI from which this provider's JWKS can be fetched.
    pub jwks_uri: String,
    /// All other fields from the discovery document, preserved verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Per-URI singleflight cache for discovery documents.
///
/// Entries live until [`DiscoveryCache::clear`] is called or the process
/// exits — there is no TTL and no respect for HTTP caching headers; refresh
/// is always explicit, per the design's non-goals.
pub struct DiscoveryCache {
    http: reqwest::Client,
    cache: Mutex<HashMap<String, DiscoveryDocument>>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl DiscoveryCache {
    /// Construct a cache using a `reqwest::Client` with a 10-second request
    /// timeout.
    #[must_use]
    pub fn new() -> Self {
        Self::with_client(
            reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
        )
    }

    /// Construct a cache using a caller-supplied HTTP client (for tests that
    /// need a client pointed at a mock server, or production code that wants
    /// a shared connection pool).
    #[must_use]
    pub fn with_client(http: reqwest::Client) -> Self {
        Self {
            http,
            cache: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached discovery document for `uri`, fetching it via HTTP
    /// GET on first request.
    ///
    /// # Errors
    ///
    /// - [`AuthError::BadInput`] if `uri` is empty.
    /// - [`AuthError::DiscoveryFailed`] on a non-2xx HTTP response or
    ///   malformed JSON.
    /// - [`AuthError::Unreachable`] on connection failure or timeout.
    pub async fn get(&self, uri: &str) -> Result<DiscoveryDocument> {
        if uri.is_empty() {
            return Err(AuthError::BadInput("well_known_uri is empty".to_string()));
        }

        // Fast path: no lock taken at all.
        if let Some(doc) = self.cache.lock().await.get(uri) {
            return Ok(doc.clone());
        }

        // Acquire the per-URI lock, creating it under the short global lock.
        let uri_lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(
                locks
                    .entry(uri.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };

        let _guard = uri_lock.lock().await;

        // Double-check: another caller may have filled the cache while we
        // waited for the per-URI lock.
        if let Some(doc) = self.cache.lock().await.get(uri) {
            return Ok(doc.clone());
        }

        debug!(uri, "fetching OIDC discovery document");
        let doc = self.fetch(uri).await?;
        self.cache.lock().await.insert(uri.to_string(), doc.clone());
        Ok(doc)
    }

    async fn fetch(&self, uri: &str) -> Result<DiscoveryDocument> {
        let response = self
            .http
            .get(uri)
            .send()
            .await
            .map_err(|e| AuthError::from_reqwest(uri, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::DiscoveryFailed {
                uri: uri.to_string(),
                status: status.as_u16(),
            });
        }

        response
            .json::<DiscoveryDocument>()
            .await
            .map_err(|e| AuthError::from_reqwest(uri, e))
    }

    /// Remove all cached entries. Used by `KeyMaterialManager::refresh` and
    /// by tests.
    pub async fn clear(&self) {
        self.cache.lock().await.clear();
        self.locks.lock().await.clear();
    }

    /// Number of cached discovery documents.
    pub async fn size(&self) -> usize {
        self.cache.lock().await.len()
    }
}

impl Default for DiscoveryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn rejects_empty_uri() {
        // GIVEN: a fresh cache
        let cache = DiscoveryCache::new();

        // WHEN: fetching an empty URI
        let result = cache.get("").await;

        // THEN: BadInput, no network call attempted
        assert!(matches!(result, Err(AuthError::BadInput(_))));
    }

    #[tokio::test]
    async fn caches_after_first_fetch() {
        // GIVEN: a mock server serving a discovery document
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "issuer": "https://issuer1",
                "jwks_uri": format!("{}/jwks", server.uri()),
            })))
            .expect(1)
            .mount(&server)
            .await;

        let cache = DiscoveryCache::new();
        let uri = format!("{}/.well-known/openid-configuration", server.uri());

        // WHEN: fetched twice
        let first = cache.get(&uri).await.unwrap();
        let second = cache.get(&uri).await.unwrap();

        // THEN: both calls see the same document; the mock's `expect(1)`
        // (checked on drop) proves only one HTTP GET was made
        assert_eq!(first.issuer, "https://issuer1");
        assert_eq!(second.issuer, first.issuer);
        assert_eq!(cache.size().await, 1);
    }

    #[tokio::test]
    async fn concurrent_fetches_for_same_uri_collapse_to_one_http_call() {
        // GIVEN: a mock server with a call counter
        let server = MockServer::start().await;
        let calls = Arc::new(AtomicUsize::new(0));
        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "issuer": "https://issuer1",
                "jwks_uri": format!("{}/jwks", server.uri()),
            })))
            .mount(&server)
            .await;

        let cache = Arc::new(DiscoveryCache::new());
        let uri = format!("{}/.well-known/openid-configuration", server.uri());

        // WHEN: 20 concurrent callers race to fetch the same URI
        let mut handles = Vec::new();
        for _ in 0..20 {
            let cache = Arc::clone(&cache);
            let uri = uri.clone();
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                let result = cache.get(&uri).await;
                calls.fetch_add(1, Ordering::SeqCst);
                result
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        // THEN: every caller got a result and the cache holds exactly one entry
        assert_eq!(calls.load(Ordering::SeqCst), 20);
        assert_eq!(cache.size().await, 1);
    }

    #[tokio::test]
    async fn non_2xx_response_is_discovery_failed_and_not_cached() {
        // GIVEN: a mock server returning 500
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let cache = DiscoveryCache::new();
        let uri = format!("{}/.well-known/openid-configuration", server.uri());

        // WHEN
        let result = cache.get(&uri).await;

        // THEN: classified as DiscoveryFailed, nothing cached
        assert!(matches!(result, Err(AuthError::DiscoveryFailed { status: 500, .. })));
        assert_eq!(cache.size().await, 0);
    }

    #[tokio::test]
    async fn clear_empties_the_cache() {
        // GIVEN: a cache with one cached entry
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "issuer": "https://issuer1",
                "jwks_uri": format!("{}/jwks", server.uri()),
            })))
            .mount(&server)
            .await;
        let cache = DiscoveryCache::new();
        let uri = format!("{}/.well-known/openid-configuration", server.uri());
        cache.get(&uri).await.unwrap();
        assert_eq!(cache.size().await, 1);

        // WHEN
        cache.clear().await;

        // THEN
        assert_eq!(cache.size().await, 0);
    }
}
