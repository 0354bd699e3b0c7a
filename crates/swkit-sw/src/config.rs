//! Coordinator configuration

use std::path::Path;

use serde::{Deserialize, Serialize};
use swkit_cache::CacheVersion;
use swkit_net::{RequestFilter, UrlPattern};
use tracing::debug;
use url::Url;

use crate::ServiceWorkerError;

/// Everything a coordinator version needs to know about its app.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Origin the app is served from
    pub origin: Url,

    /// Cache namespace; versions are stored as `cache_name@cache_version`
    pub cache_name: String,

    /// Version of this coordinator build
    pub cache_version: String,

    /// App-shell paths stored on install
    pub precache: Vec<String>,

    /// Page served to navigations when offline
    pub offline_page: String,

    /// Root document, the last navigation fallback
    pub app_root: String,

    /// URLs containing this marker are never intercepted
    pub api_marker: String,

    /// Additional substrings that bypass interception
    pub bypass_patterns: Vec<String>,

    /// Optional byte quota for cache storage
    pub quota_bytes: Option<u64>,

    /// Push notification defaults
    pub notifications: NotificationDefaults,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationDefaults {
    pub default_title: String,
    pub default_body: String,
    pub icon: String,
    pub badge: String,
    pub tag: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            origin: Url::parse("http://localhost:3000/").expect("static origin is valid"),
            cache_name: "dashboard".to_string(),
            cache_version: "v1".to_string(),
            precache: vec![
                "/".to_string(),
                "/offline".to_string(),
                "/manifest.json".to_string(),
                "/icon.svg".to_string(),
            ],
            offline_page: "/offline".to_string(),
            app_root: "/".to_string(),
            api_marker: "/api/".to_string(),
            bypass_patterns: Vec::new(),
            quota_bytes: None,
            notifications: NotificationDefaults::default(),
        }
    }
}

impl Default for NotificationDefaults {
    fn default() -> Self {
        Self {
            default_title: "Dashboard".to_string(),
            default_body: "New notification...".to_string(),
            icon: "/icon.svg".to_string(),
            badge: "/icon.svg".to_string(),
            tag: "app-notification".to_string(),
        }
    }
}

impl CoordinatorConfig {
    /// Load and validate a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ServiceWorkerError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        debug!(path = %path.display(), "Loaded coordinator config");
        Self::from_json(&raw)
    }

    /// Parse and validate a JSON config.
    pub fn from_json(raw: &str) -> Result<Self, ServiceWorkerError> {
        let config: Self =
            serde_json::from_str(raw).map_err(|e| ServiceWorkerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants the coordinator relies on.
    pub fn validate(&self) -> Result<(), ServiceWorkerError> {
        if self.cache_name.is_empty() || self.cache_version.is_empty() {
            return Err(ServiceWorkerError::Config(
                "cache_name and cache_version must not be empty".to_string(),
            ));
        }
        if self.cache_name.contains('@') {
            return Err(ServiceWorkerError::Config(format!(
                "cache_name must not contain '@': {}",
                self.cache_name
            )));
        }
        if !matches!(self.origin.scheme(), "http" | "https") {
            return Err(ServiceWorkerError::Config(format!(
                "origin must be http(s): {}",
                self.origin
            )));
        }
        if !self.precache.contains(&self.offline_page) {
            return Err(ServiceWorkerError::Config(format!(
                "offline page {} is not in the precache manifest",
                self.offline_page
            )));
        }
        if self.api_marker.is_empty() {
            return Err(ServiceWorkerError::Config(
                "api_marker must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn cache_version(&self) -> CacheVersion {
        CacheVersion::new(&self.cache_name, &self.cache_version)
    }

    /// Resolve an app path against the origin.
    pub fn resolve(&self, path: &str) -> Result<Url, ServiceWorkerError> {
        self.origin
            .join(path)
            .map_err(|e| ServiceWorkerError::Config(format!("bad path {path}: {e}")))
    }

    pub fn precache_urls(&self) -> Result<Vec<Url>, ServiceWorkerError> {
        self.precache.iter().map(|p| self.resolve(p)).collect()
    }

    pub fn request_filter(&self) -> RequestFilter {
        let mut filter = RequestFilter::new(&self.api_marker);
        for pattern in &self.bypass_patterns {
            filter.bypass(UrlPattern::contains(pattern));
        }
        filter
    }
}
