//! Cache version naming.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A versioned cache name, rendered as `name@version`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheVersion {
    pub name: String,
    pub version: String,
}

impl CacheVersion {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    /// Prefix shared by every version of this cache.
    pub fn prefix(&self) -> String {
        format!("{}@", self.name)
    }

    /// Full cache name for this version.
    pub fn cache_name(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }

    /// Whether `cache_name` belongs to this cache's namespace.
    pub fn owns(&self, cache_name: &str) -> bool {
        cache_name.starts_with(&self.prefix())
    }

    /// Whether `cache_name` is an older (or otherwise different) version of
    /// this cache.
    pub fn is_stale(&self, cache_name: &str) -> bool {
        self.owns(cache_name) && cache_name != self.cache_name()
    }
}

impl fmt::Display for CacheVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}
