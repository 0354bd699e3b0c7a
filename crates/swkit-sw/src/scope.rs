//! State shared by every coordinator version on one origin.

use std::sync::Arc;

use swkit_cache::CacheStorage;
use tokio::sync::RwLock;

use crate::clients::Clients;
use crate::notification::NotificationCenter;

/// Origin-wide resources: cache storage, open pages, shown notifications.
///
/// Cloning shares the same underlying state.
#[derive(Debug, Clone, Default)]
pub struct GlobalScope {
    pub caches: Arc<RwLock<CacheStorage>>,
    pub clients: Arc<RwLock<Clients>>,
    pub notifications: Arc<RwLock<NotificationCenter>>,
}

impl GlobalScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scope whose cache storage is bounded to `quota_bytes`.
    pub fn with_quota(quota_bytes: Option<u64>) -> Self {
        let storage = match quota_bytes {
            Some(quota) => CacheStorage::with_quota(quota),
            None => CacheStorage::new(),
        };
        Self {
            caches: Arc::new(RwLock::new(storage)),
            ..Self::default()
        }
    }
}
