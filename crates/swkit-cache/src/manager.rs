//! The cache store manager: the only writer of cache storage.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::try_join_all;
use swkit_net::{cache_key, Fetcher, Request, Response};
use tokio::sync::RwLock;
use tracing::{debug, info};
use url::Url;

use crate::storage::{CacheEntry, CacheStorage};
use crate::version::CacheVersion;
use crate::CacheError;

/// Counters for cache traffic through one manager.
#[derive(Debug, Default)]
pub struct CacheStats {
    reads: AtomicU64,
    hits: AtomicU64,
    writes: AtomicU64,
}

impl CacheStats {
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.reads().saturating_sub(self.hits())
    }

    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

/// Owns one cache version inside shared [`CacheStorage`].
#[derive(Debug, Clone)]
pub struct CacheStoreManager {
    version: CacheVersion,
    storage: Arc<RwLock<CacheStorage>>,
    stats: Arc<CacheStats>,
}

impl CacheStoreManager {
    pub fn new(version: CacheVersion, storage: Arc<RwLock<CacheStorage>>) -> Self {
        Self {
            version,
            storage,
            stats: Arc::new(CacheStats::default()),
        }
    }

    pub fn version(&self) -> &CacheVersion {
        &self.version
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Fetch every manifest URL and store them in the current version's
    /// cache.
    ///
    /// Nothing is written unless every fetch succeeds with a 2xx status and
    /// the whole batch fits in storage.
    pub async fn precache(&self, fetcher: &dyn Fetcher, manifest: &[Url]) -> Result<(), CacheError> {
        let cache_name = self.version.cache_name();
        info!(cache = %cache_name, entries = manifest.len(), "Precaching manifest");

        let fetches = manifest.iter().map(|url| async move {
            let request = Request::get(url.clone());
            let response = fetcher
                .fetch(&request)
                .await
                .map_err(|source| CacheError::Fetch {
                    url: url.to_string(),
                    source,
                })?;

            if !response.ok() {
                return Err(CacheError::BadStatus {
                    url: url.to_string(),
                    status: response.status.as_u16(),
                });
            }

            let key = request.cache_key();
            let entry = CacheEntry::from_response(&key, &request.method, &response);
            Ok::<_, CacheError>((key, entry))
        });

        let staged = try_join_all(fetches).await?;
        let count = staged.len() as u64;

        self.storage.write().await.put_all(&cache_name, staged)?;
        self.stats.writes.fetch_add(count, Ordering::Relaxed);

        info!(cache = %cache_name, "Precache complete");
        Ok(())
    }

    /// Delete every other version of this cache. Returns the deleted names.
    pub async fn activate_latest(&self) -> Vec<String> {
        let mut storage = self.storage.write().await;
        let stale: Vec<String> = storage
            .keys()
            .into_iter()
            .filter(|name| self.version.is_stale(name))
            .collect();

        for name in &stale {
            storage.delete(name);
            info!(cache = %name, current = %self.version, "Deleted stale cache");
        }
        stale
    }

    /// Store `response` under `request`'s key if its status is 2xx.
    ///
    /// Returns `Ok(false)` when the response was not cacheable.
    pub async fn put(&self, request: &Request, response: &Response) -> Result<bool, CacheError> {
        if !response.ok() {
            debug!(url = %request.url, status = %response.status, "Not caching non-success response");
            return Ok(false);
        }

        let key = request.cache_key();
        let entry = CacheEntry::from_response(&key, &request.method, response);
        self.storage
            .write()
            .await
            .put(&self.version.cache_name(), &key, entry)?;
        self.stats.writes.fetch_add(1, Ordering::Relaxed);
        Ok(true)
    }

    /// Exact-key lookup in the current version's cache.
    pub async fn match_request(&self, request: &Request) -> Option<Response> {
        self.match_key(&request.cache_key()).await
    }

    /// Exact-key lookup by URL.
    pub async fn match_url(&self, url: &Url) -> Option<Response> {
        self.match_key(&cache_key(url)).await
    }

    async fn match_key(&self, key: &str) -> Option<Response> {
        self.stats.reads.fetch_add(1, Ordering::Relaxed);

        let storage = self.storage.read().await;
        let found = storage
            .get(&self.version.cache_name())
            .and_then(|cache| cache.match_request(key))
            .map(CacheEntry::to_response);

        if found.is_some() {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
        }
        debug!(key = %key, hit = found.is_some(), "Cache lookup");
        found
    }
}
