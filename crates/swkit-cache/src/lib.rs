//! # SwKit Cache
//!
//! Versioned cache storage for the SwKit coordinator.
//!
//! ## Architecture
//!
//! ```text
//! CacheStoreManager (one per coordinator version)
//!     │
//!     ├── CacheVersion ("dashboard@3", prefix "dashboard@")
//!     │
//!     └── CacheStorage (shared by every version on the origin)
//!             └── Cache
//!                     └── request key → CacheEntry
//! ```
//!
//! Only the manager mutates storage. Writes are last-write-wins, and there is
//! no eviction other than deleting whole superseded versions.

use swkit_common::SwKitError;
use swkit_net::NetError;
use thiserror::Error;

pub mod manager;
pub mod storage;
pub mod version;

pub use manager::{CacheStats, CacheStoreManager};
pub use storage::{Cache, CacheEntry, CacheStorage};
pub use version::CacheVersion;

/// Errors that can occur in cache operations.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Fetch failed for {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: NetError,
    },

    #[error("Bad status {status} for {url}")]
    BadStatus { url: String, status: u16 },

    #[error("Quota exceeded: need {needed} bytes, {available} available")]
    QuotaExceeded { needed: u64, available: u64 },
}

impl From<CacheError> for SwKitError {
    fn from(err: CacheError) -> Self {
        SwKitError::cache_with_source("cache operation failed", err)
    }
}
