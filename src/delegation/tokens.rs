//! Bearer-token cache for cooperating clusters
//!
//! Delegating a job to an `oscar` replica needs the remote service's
//! invocation token. Tokens are resolved with the cluster's basic-auth
//! credentials and cached per `(endpoint, service)` pair. The cache is
//! bounded by a hard entry cap enforced with whole-cache eviction; there is
//! no per-entry TTL, a stale token surfaces as a 401 and is refreshed once.
//!
//! One async mutex covers read, fetch-on-miss, refresh, and the eviction
//! check, so concurrent delegations never race a fetch against an eviction.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::probe::build_http_client;
use super::service::{Cluster, Service};
use super::REMOTE_TIMEOUT;

/// Hard cap on cached tokens; exceeding it clears the whole cache
pub const MAX_CACHED_TOKENS: usize = 500;

/// Errors resolving a service token
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("Server error {status}: {message}")]
    ServerError { status: u16, message: String },

    #[error("Service '{0}' has no invocation token")]
    MissingToken(String),
}

/// Bounded cache of per-(cluster, service) bearer tokens
pub struct TokenCache {
    entries: Mutex<HashMap<(String, String), String>>,
    timeout: Duration,
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            timeout: REMOTE_TIMEOUT,
        }
    }

    /// Override the token-fetch timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Cache read only; never touches the network
    pub async fn get(&self, endpoint: &str, service_name: &str) -> Option<String> {
        let entries = self.entries.lock().await;
        entries
            .get(&(endpoint.to_string(), service_name.to_string()))
            .cloned()
    }

    /// Cached token, fetched on miss
    pub async fn get_or_fetch(
        &self,
        cluster: &Cluster,
        service_name: &str,
    ) -> Result<String, TokenError> {
        let mut entries = self.entries.lock().await;
        let key = (cluster.endpoint.clone(), service_name.to_string());

        if let Some(token) = entries.get(&key) {
            return Ok(token.clone());
        }

        let token = self.fetch(cluster, service_name).await?;
        Self::insert(&mut entries, key, token.clone());
        Ok(token)
    }

    /// Unconditionally re-fetch a token, replacing any cached value
    ///
    /// Used after a delegated job is rejected with 401.
    pub async fn refresh(
        &self,
        cluster: &Cluster,
        service_name: &str,
    ) -> Result<String, TokenError> {
        let mut entries = self.entries.lock().await;
        let key = (cluster.endpoint.clone(), service_name.to_string());

        let token = self.fetch(cluster, service_name).await?;
        Self::insert(&mut entries, key, token.clone());
        Ok(token)
    }

    /// Number of cached tokens
    pub async fn entry_count(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Resolve a token by reading the remote service definition
    async fn fetch(&self, cluster: &Cluster, service_name: &str) -> Result<String, TokenError> {
        let client = build_http_client(cluster.ssl_verify, self.timeout);
        let url = format!("{}/system/services/{}", cluster.endpoint, service_name);

        debug!("Fetching token for '{}' from {}", service_name, cluster.endpoint);

        let response = client
            .get(&url)
            .basic_auth(&cluster.auth_user, Some(&cluster.auth_password))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(TokenError::ServerError { status, message });
        }

        let definition: Service = response.json().await?;
        if definition.token.is_empty() {
            return Err(TokenError::MissingToken(service_name.to_string()));
        }

        Ok(definition.token)
    }

    /// Write through the eviction check
    ///
    /// Bulk eviction, not LRU: once the cap is exceeded the whole cache is
    /// cleared before the new entry lands.
    fn insert(entries: &mut HashMap<(String, String), String>, key: (String, String), token: String) {
        if entries.len() > MAX_CACHED_TOKENS {
            warn!(
                "Token cache exceeded {} entries, evicting all",
                MAX_CACHED_TOKENS
            );
            entries.clear();
        }
        entries.insert(key, token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_on_empty_cache() {
        let cache = TokenCache::new();
        assert!(cache.get("https://edge-1", "mark-faces").await.is_none());
    }

    #[tokio::test]
    async fn test_bulk_eviction_past_cap() {
        let cache = TokenCache::new();

        {
            let mut entries = cache.entries.lock().await;
            for i in 0..=MAX_CACHED_TOKENS {
                TokenCache::insert(
                    &mut entries,
                    (format!("https://cluster-{}", i), "svc".to_string()),
                    "tok".to_string(),
                );
            }
            // Cap exceeded only once the 501st entry is in place
            assert_eq!(entries.len(), MAX_CACHED_TOKENS + 1);

            TokenCache::insert(
                &mut entries,
                ("https://one-more".to_string(), "svc".to_string()),
                "tok".to_string(),
            );
            assert_eq!(entries.len(), 1, "write past the cap must clear the cache first");
        }

        assert!(cache.get("https://one-more", "svc").await.is_some());
    }

    #[tokio::test]
    async fn test_fetch_failure_leaves_cache_empty() {
        let cache = TokenCache::new().with_timeout(Duration::from_millis(200));
        let cluster = Cluster::new("http://127.0.0.1:1", "user", "pass");

        let result = cache.get_or_fetch(&cluster, "mark-faces").await;
        assert!(result.is_err());
        assert_eq!(cache.entry_count().await, 0);
    }
}
