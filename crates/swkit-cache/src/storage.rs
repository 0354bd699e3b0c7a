//! Named caches of request/response snapshots.

use bytes::Bytes;
use hashbrown::HashMap;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde::{Deserialize, Serialize};
use swkit_net::Response;
use tracing::trace;

use crate::CacheError;

// ==================== Cache Entry ====================

/// A cached request/response pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request key (URL without fragment).
    pub url: String,

    /// Request method.
    pub method: String,

    /// Response status.
    pub status: u16,

    /// Response headers in order; repeated names keep every value.
    pub headers: Vec<(String, String)>,

    /// Response body.
    pub body: Bytes,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Snapshot a response under `key`.
    pub fn from_response(key: &str, method: &Method, response: &Response) -> Self {
        let headers = response
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        Self {
            url: key.to_string(),
            method: method.as_str().to_string(),
            status: response.status.as_u16(),
            headers,
            body: response.body.clone(),
            cached_at: now_millis(),
        }
    }

    /// Rebuild a response from the snapshot.
    pub fn to_response(&self) -> Response {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            if let (Ok(n), Ok(v)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.append(n, v);
            }
        }

        Response {
            url: url::Url::parse(&self.url).ok(),
            status: StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK),
            headers,
            body: self.body.clone(),
        }
    }

    /// Bytes counted against the storage quota.
    pub fn size(&self) -> u64 {
        self.body.len() as u64
    }
}

// ==================== Cache ====================

/// A cache instance.
#[derive(Debug, Default)]
pub struct Cache {
    /// Cache name.
    pub name: String,

    /// Cached entries.
    entries: HashMap<String, CacheEntry>,
}

impl Cache {
    /// Create a new cache.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    /// Exact-key lookup.
    pub fn match_request(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    /// Add or replace an entry.
    pub fn put(&mut self, key: &str, entry: CacheEntry) {
        self.entries.insert(key.to_string(), entry);
    }

    /// Delete entry.
    pub fn delete(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Get all keys.
    pub fn keys(&self) -> Vec<&str> {
        self.entries.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total body bytes held by this cache.
    pub fn size(&self) -> u64 {
        self.entries.values().map(CacheEntry::size).sum()
    }
}

// ==================== Cache Storage ====================

/// All caches on the origin, optionally bounded by a byte quota.
#[derive(Debug, Default)]
pub struct CacheStorage {
    caches: HashMap<String, Cache>,
    quota_bytes: Option<u64>,
}

impl CacheStorage {
    /// Create new unbounded cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create cache storage bounded to `quota_bytes` of body data.
    pub fn with_quota(quota_bytes: u64) -> Self {
        Self {
            caches: HashMap::new(),
            quota_bytes: Some(quota_bytes),
        }
    }

    /// Open a cache (creates if doesn't exist).
    pub fn open(&mut self, name: &str) -> &mut Cache {
        self.caches
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name))
    }

    /// Get an existing cache.
    pub fn get(&self, name: &str) -> Option<&Cache> {
        self.caches.get(name)
    }

    /// Check if cache exists.
    pub fn has(&self, name: &str) -> bool {
        self.caches.contains_key(name)
    }

    /// Delete a cache.
    pub fn delete(&mut self, name: &str) -> bool {
        self.caches.remove(name).is_some()
    }

    /// Get all cache names, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut names: Vec<String> = self.caches.keys().cloned().collect();
        names.sort();
        names
    }

    /// Body bytes stored across every cache.
    pub fn usage(&self) -> u64 {
        self.caches.values().map(Cache::size).sum()
    }

    /// Store one entry, enforcing the quota.
    pub fn put(&mut self, cache_name: &str, key: &str, entry: CacheEntry) -> Result<(), CacheError> {
        self.put_all(cache_name, vec![(key.to_string(), entry)])
    }

    /// Store a batch of entries; either all are stored or none are.
    pub fn put_all(
        &mut self,
        cache_name: &str,
        entries: Vec<(String, CacheEntry)>,
    ) -> Result<(), CacheError> {
        if let Some(quota) = self.quota_bytes {
            let replaced: u64 = self
                .get(cache_name)
                .map(|cache| {
                    entries
                        .iter()
                        .filter_map(|(key, _)| cache.match_request(key))
                        .map(CacheEntry::size)
                        .sum()
                })
                .unwrap_or(0);
            let needed: u64 = entries.iter().map(|(_, e)| e.size()).sum();
            let available = quota.saturating_sub(self.usage().saturating_sub(replaced));

            if needed > available {
                return Err(CacheError::QuotaExceeded { needed, available });
            }
        }

        let cache = self.open(cache_name);
        for (key, entry) in entries {
            trace!(cache = %cache_name, key = %key, "Storing cache entry");
            cache.put(&key, entry);
        }
        Ok(())
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(url: &str, body: &'static str) -> CacheEntry {
        let response = Response::new(StatusCode::OK, body).with_header(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("text/html"),
        );
        CacheEntry::from_response(url, &Method::GET, &response)
    }

    #[test]
    fn test_cache() {
        let mut cache = Cache::new("dashboard@1");
        cache.put("https://example.com/style.css", entry("https://example.com/style.css", "a{}"));

        assert!(cache.match_request("https://example.com/style.css").is_some());
        assert!(cache.match_request("https://example.com/other.css").is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_delete() {
        let mut cache = Cache::new("dashboard@1");
        cache.put("https://example.com/", entry("https://example.com/", "shell"));
        assert!(cache.delete("https://example.com/"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_entry_round_trips_response() {
        let snapshot = entry("https://example.com/", "<html></html>");
        let response = snapshot.to_response();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.content_type(), Some("text/html"));
        assert_eq!(response.text().unwrap(), "<html></html>");
    }

    #[test]
    fn test_entry_keeps_repeated_headers() {
        let mut response = Response::new(StatusCode::OK, "shell");
        for link in ["</app.css>; rel=preload", "</app.js>; rel=preload"] {
            response
                .headers
                .append(http::header::LINK, HeaderValue::from_static(link));
        }

        let snapshot = CacheEntry::from_response("https://example.com/", &Method::GET, &response);
        let json = serde_json::to_string(&snapshot).unwrap();
        let restored: CacheEntry = serde_json::from_str(&json).unwrap();
        let replayed = restored.to_response();

        let links: Vec<_> = replayed
            .headers
            .get_all(http::header::LINK)
            .iter()
            .map(|v| v.to_str().unwrap())
            .collect();
        assert_eq!(links, ["</app.css>; rel=preload", "</app.js>; rel=preload"]);
    }

    #[test]
    fn test_entry_serializes() {
        let snapshot = entry("https://example.com/", "shell");
        let json = serde_json::to_string(&snapshot).unwrap();
        let back: CacheEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back.url, "https://example.com/");
        assert_eq!(back.body, snapshot.body);
    }

    #[test]
    fn test_cache_storage() {
        let mut storage = CacheStorage::new();

        assert!(!storage.has("dashboard@1"));
        storage.open("dashboard@1");
        storage.open("dashboard@0");
        assert_eq!(storage.keys(), vec!["dashboard@0", "dashboard@1"]);

        assert!(storage.delete("dashboard@1"));
        assert!(!storage.has("dashboard@1"));
    }

    #[test]
    fn test_quota_rejects_oversized_write() {
        let mut storage = CacheStorage::with_quota(8);
        storage
            .put("c@1", "https://example.com/a", entry("https://example.com/a", "12345"))
            .unwrap();

        let err = storage
            .put("c@1", "https://example.com/b", entry("https://example.com/b", "12345"))
            .unwrap_err();
        assert!(matches!(err, CacheError::QuotaExceeded { needed: 5, available: 3 }));
        assert_eq!(storage.usage(), 5);
    }

    #[test]
    fn test_quota_counts_replaced_entry() {
        let mut storage = CacheStorage::with_quota(8);
        storage
            .put("c@1", "https://example.com/a", entry("https://example.com/a", "1234567"))
            .unwrap();
        // Overwriting the same key frees the old body first
        storage
            .put("c@1", "https://example.com/a", entry("https://example.com/a", "7654321"))
            .unwrap();
        assert_eq!(storage.usage(), 7);
    }

    #[test]
    fn test_put_all_is_all_or_nothing() {
        let mut storage = CacheStorage::with_quota(6);
        let batch = vec![
            ("https://example.com/a".to_string(), entry("https://example.com/a", "1234")),
            ("https://example.com/b".to_string(), entry("https://example.com/b", "1234")),
        ];
        assert!(storage.put_all("c@1", batch).is_err());
        assert!(!storage.has("c@1"));
    }
}
