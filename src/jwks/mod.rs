// src/jwks/mod.rs

pub mod model;
pub mod store;

use crate::error::NilaGatewayError;
use crate::http::fetch;
use jsonwebtoken::jwk::{Jwk, PublicKeyUse};
use jsonwebtoken::DecodingKey;
use model::{JsonWebKeySet, PersistedKeySet};
use moka::future::Cache;
use moka::Expiry;
use reqwest::header::HeaderMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use store::KeySetStore;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

/// An immutable set of signing keys, indexed by key id.
///
/// A refresh never mutates a `KeySet`; it builds a new one and swaps it into
/// the cache.
pub struct KeySet {
    keys: HashMap<String, DecodingKey>,
    document: serde_json::Value,
    fetched_at: SystemTime,
    ttl: Duration,
}

impl KeySet {
    /// Parses a JWKS document.
    ///
    /// Keys without a `kid`, encryption keys and key types `jsonwebtoken`
    /// cannot verify with are skipped. The document itself must be a JSON
    /// object with a `keys` array.
    pub fn parse(body: &[u8], fetched_at: SystemTime, ttl: Duration) -> Result<Self, NilaGatewayError> {
        let document: serde_json::Value =
            serde_json::from_slice(body).map_err(|e| NilaGatewayError::KeySetMalformed(e.to_string()))?;
        Self::from_document(document, fetched_at, ttl)
    }

    fn from_document(document: serde_json::Value, fetched_at: SystemTime, ttl: Duration) -> Result<Self, NilaGatewayError> {
        let set: JsonWebKeySet = serde_json::from_value(document.clone())
            .map_err(|e| NilaGatewayError::KeySetMalformed(e.to_string()))?;

        let mut keys = HashMap::with_capacity(set.keys.len());
        for raw in set.keys {
            let jwk: Jwk = match serde_json::from_value(raw) {
                Ok(jwk) => jwk,
                Err(e) => {
                    warn!("Skipping unsupported JWK: {}", e);
                    continue;
                }
            };
            if matches!(jwk.common.public_key_use, Some(PublicKeyUse::Encryption)) {
                continue;
            }
            let Some(kid) = jwk.common.key_id.clone() else {
                warn!("Skipping JWK without 'kid'");
                continue;
            };
            match DecodingKey::from_jwk(&jwk) {
                Ok(key) => {
                    keys.insert(kid, key);
                }
                Err(e) => warn!("Skipping JWK '{}': {}", kid, e),
            }
        }

        Ok(Self {
            keys,
            document,
            fetched_at,
            ttl,
        })
    }

    /// Returns the verification key with the given key id.
    pub fn get(&self, kid: &str) -> Option<&DecodingKey> {
        self.keys.get(kid)
    }

    pub fn contains(&self, kid: &str) -> bool {
        self.keys.contains_key(kid)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Time left until the set should be refetched.
    pub fn remaining_ttl(&self) -> Duration {
        let age = self.fetched_at.elapsed().unwrap_or_default();
        self.ttl.saturating_sub(age)
    }

    fn to_persisted(&self) -> PersistedKeySet {
        PersistedKeySet {
            fetched_at: self.fetched_at.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs(),
            ttl_secs: self.ttl.as_secs(),
            jwks: self.document.clone(),
        }
    }

    fn from_persisted(entry: PersistedKeySet) -> Result<Self, NilaGatewayError> {
        let fetched_at = UNIX_EPOCH + Duration::from_secs(entry.fetched_at);
        Self::from_document(entry.jwks, fetched_at, Duration::from_secs(entry.ttl_secs))
    }
}

/// Expires each cached key set after its own remaining TTL.
struct KeySetExpiry;

impl Expiry<String, Arc<KeySet>> for KeySetExpiry {
    fn expire_after_create(&self, _key: &String, value: &Arc<KeySet>, _created_at: Instant) -> Option<Duration> {
        Some(value.remaining_ttl())
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Arc<KeySet>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.remaining_ttl())
    }
}

/// Fetches and caches the identity provider's signing keys.
///
/// Cold fetches are coalesced per URI, and a refresh after an unknown key id
/// is performed by one caller while the others reuse its result.
#[derive(Clone)]
pub struct KeySetCache {
    // The cache is internally ref-counted to allow for cheap cloning.
    inner: Arc<Inner>,
}

struct Inner {
    http_client: reqwest::Client,
    default_ttl: Duration,
    cache: Cache<String, Arc<KeySet>>,
    store: Option<Arc<dyn KeySetStore>>,
    // Last forced refresh per URI; also serializes refreshers.
    forced_refreshes: Mutex<HashMap<String, Instant>>,
}

/// Minimum time between two unknown-kid refreshes of the same URI.
pub const MIN_FORCED_REFRESH_INTERVAL: Duration = Duration::from_secs(10);

impl KeySetCache {
    /// Creates a new `KeySetCache`.
    ///
    /// `default_ttl` applies when a JWKS response carries no `Cache-Control: max-age`.
    pub fn new(http_client: reqwest::Client, default_ttl: Duration, store: Option<Arc<dyn KeySetStore>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                http_client,
                default_ttl,
                cache: Cache::builder().max_capacity(16).expire_after(KeySetExpiry).build(),
                store,
                forced_refreshes: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Returns the current key set for `uri`, loading it on a cache miss.
    #[instrument(skip(self, uri, cancel), fields(uri = %uri), err(level = "debug"))]
    pub async fn get(&self, uri: &Url, cancel: &CancellationToken) -> Result<Arc<KeySet>, NilaGatewayError> {
        if let Some(keys) = self.inner.cache.get(uri.as_str()).await {
            return Ok(keys);
        }

        // The shared load outlives any one request; a cancelled caller only stops waiting for it.
        let inner = self.inner.clone();
        let key = uri.to_string();
        let uri = uri.clone();
        let load = self
            .inner
            .cache
            .try_get_with(key, async move { inner.load(&uri, &CancellationToken::new()).await });

        tokio::select! {
            _ = cancel.cancelled() => Err(NilaGatewayError::Cancelled),
            result = load => result.map_err(|e: Arc<NilaGatewayError>| (*e).clone()),
        }
    }

    /// Refetches the key set for `uri` from the provider, replacing `stale`.
    ///
    /// If another caller already replaced `stale` while this one waited, the
    /// newer set is returned without another fetch. Within
    /// `MIN_FORCED_REFRESH_INTERVAL` of the previous forced refresh `stale` is
    /// returned as is, so made-up key ids cannot flood the provider.
    #[instrument(skip(self, uri, stale, cancel), fields(uri = %uri), err(level = "debug"))]
    pub async fn refresh(
        &self,
        uri: &Url,
        stale: &Arc<KeySet>,
        cancel: &CancellationToken,
    ) -> Result<Arc<KeySet>, NilaGatewayError> {
        let mut forced_refreshes = tokio::select! {
            _ = cancel.cancelled() => return Err(NilaGatewayError::Cancelled),
            guard = self.inner.forced_refreshes.lock() => guard,
        };

        if let Some(current) = self.inner.cache.get(uri.as_str()).await {
            if !Arc::ptr_eq(&current, stale) {
                debug!("JWKS already refreshed by a concurrent request");
                return Ok(current);
            }
        }

        if let Some(last) = forced_refreshes.get(uri.as_str()) {
            if last.elapsed() < MIN_FORCED_REFRESH_INTERVAL {
                debug!("JWKS was refreshed {:?} ago, keeping the current set", last.elapsed());
                return Ok(stale.clone());
            }
        }

        let fresh = self.inner.fetch_and_persist(uri, cancel).await?;
        forced_refreshes.insert(uri.to_string(), Instant::now());
        self.inner.cache.insert(uri.to_string(), fresh.clone()).await;
        Ok(fresh)
    }

    /// Spawns a task that refetches the key set before it expires.
    ///
    /// The task refreshes at 80% of the TTL and backs off exponentially on
    /// failure. It stops once `shutdown` is cancelled.
    pub fn spawn_refresh_task(&self, uri: Url, shutdown: CancellationToken) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => debug!("JWKS background refresh stopped"),
                _ = cache.key_refresh_loop(&uri, &shutdown) => {}
            }
        })
    }

    async fn key_refresh_loop(&self, uri: &Url, shutdown: &CancellationToken) {
        let base_retry_delay = Duration::from_secs(5);
        let max_retry_delay = Duration::from_secs(300);
        let mut current_retry_delay = base_retry_delay;

        loop {
            let ttl = match self.inner.fetch_and_persist(uri, shutdown).await {
                Ok(keys) => {
                    current_retry_delay = base_retry_delay;
                    let ttl = keys.remaining_ttl();
                    self.inner.cache.insert(uri.to_string(), keys).await;
                    ttl
                }
                Err(e) => {
                    error!("Failed to refresh JWKS in background: {}. Retrying in {:?}.", e, current_retry_delay);
                    tokio::time::sleep(current_retry_delay).await;
                    current_retry_delay = (current_retry_delay * 2).min(max_retry_delay);
                    continue;
                }
            };

            let refresh_interval = Duration::from_secs_f64(ttl.as_secs_f64() * 0.8).max(Duration::from_secs(1));
            debug!("JWKS background refresh scheduled in {:?}", refresh_interval);
            tokio::time::sleep(refresh_interval).await;
        }
    }
}

impl Inner {
    /// Cold load: a still-fresh persisted copy if available, otherwise the network.
    async fn load(&self, uri: &Url, cancel: &CancellationToken) -> Result<Arc<KeySet>, NilaGatewayError> {
        if let Some(store) = &self.store {
            match store.get(uri.as_str()).await {
                Ok(Some(entry)) => match KeySet::from_persisted(entry) {
                    Ok(keys) if !keys.remaining_ttl().is_zero() => {
                        info!("Restored {} keys for {} from the persisted copy", keys.len(), uri);
                        return Ok(Arc::new(keys));
                    }
                    Ok(_) => debug!("Persisted JWKS for {} has expired", uri),
                    Err(e) => warn!("Ignoring unreadable persisted JWKS for {}: {}", uri, e),
                },
                Ok(None) => {}
                Err(e) => warn!("Key set store lookup failed: {}", e),
            }
        }
        self.fetch_and_persist(uri, cancel).await
    }

    /// Fetches the JWKS from the provider and writes it to the store.
    #[instrument(skip(self, uri, cancel), fields(uri = %uri), err(level = "debug"))]
    async fn fetch_and_persist(&self, uri: &Url, cancel: &CancellationToken) -> Result<Arc<KeySet>, NilaGatewayError> {
        let (headers, body) = fetch(self.http_client.get(uri.clone()), cancel)
            .await
            .map_err(|e| e.into_gateway_error(NilaGatewayError::KeySetUnreachable))?;

        let ttl = parse_cache_control(&headers).unwrap_or(self.default_ttl);
        let keys = KeySet::parse(&body, SystemTime::now(), ttl)?;
        info!("Successfully fetched {} keys. Caching with TTL: {:?}", keys.len(), ttl);

        if let Some(store) = &self.store {
            if let Err(e) = store.set(uri.as_str(), &keys.to_persisted()).await {
                warn!("Failed to persist JWKS for {}: {}", uri, e);
            }
        }
        Ok(Arc::new(keys))
    }
}

/// Parses the `Cache-Control` header to determine the TTL.
fn parse_cache_control(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::CACHE_CONTROL)?
        .to_str()
        .ok()?
        .split(',')
        .find_map(|part| {
            part.trim()
                .strip_prefix("max-age=")?
                .parse::<u64>()
                .ok()
                .map(Duration::from_secs)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn max_age_overrides_ttl() {
        let mut headers = HeaderMap::new();
        headers.insert(reqwest::header::CACHE_CONTROL, HeaderValue::from_static("public, max-age=600"));
        assert_eq!(parse_cache_control(&headers), Some(Duration::from_secs(600)));
        assert_eq!(parse_cache_control(&HeaderMap::new()), None);
    }

    #[test]
    fn unusable_keys_are_skipped() {
        let body = br#"{"keys": [
            {"kty": "oct", "k": "c2VjcmV0"},
            {"kty": "RSA", "kid": "enc", "use": "enc", "n": "AQAB", "e": "AQAB"},
            {"kty": "unknown", "kid": "odd"}
        ]}"#;
        let keys = KeySet::parse(body, SystemTime::now(), Duration::from_secs(60)).unwrap();
        assert!(keys.is_empty());
    }

    #[test]
    fn document_without_keys_is_malformed() {
        let result = KeySet::parse(br#"{"issuer": "x"}"#, SystemTime::now(), Duration::from_secs(60));
        assert!(matches!(result, Err(NilaGatewayError::KeySetMalformed(_))));
        let result = KeySet::parse(b"not json", SystemTime::now(), Duration::from_secs(60));
        assert!(matches!(result, Err(NilaGatewayError::KeySetMalformed(_))));
    }

    #[test]
    fn persisted_copy_keeps_its_age() {
        let fetched_at = SystemTime::now() - Duration::from_secs(100);
        let keys = KeySet::parse(br#"{"keys": []}"#, fetched_at, Duration::from_secs(60)).unwrap();
        let restored = KeySet::from_persisted(keys.to_persisted()).unwrap();
        assert!(restored.remaining_ttl().is_zero());
    }
}
