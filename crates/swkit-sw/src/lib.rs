//! # SwKit Service Worker
//!
//! The offline-capable fetch/cache coordinator for the dashboard PWA, plus
//! the page-side container that registers it and drives version updates.
//!
//! ## Features
//!
//! - **Precache**: fixed app-shell manifest stored atomically on install
//! - **Lifecycle**: installing → waiting → activating → active, with an
//!   explicit skip-waiting message
//! - **Fetch policy**: network-first, falling back to cache, the offline page,
//!   and finally a synthetic `503 Offline`
//! - **Notifications**: push payload decoding and click-to-window routing
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorkerContainer (page side, plays the platform)
//!     │
//!     └── ServiceWorkerRegistration
//!             ├── installing ─┐
//!             ├── waiting  ───┼── Coordinator (ServiceWorkerHandler)
//!             └── active   ───┘       ├── LifecycleController
//!                                     ├── FetchInterceptor
//!                                     └── CacheStoreManager
//!
//! GlobalScope (shared by every version on the origin)
//!     ├── CacheStorage
//!     ├── Clients
//!     └── NotificationCenter
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

use swkit_cache::CacheError;
use swkit_common::SwKitError;
use thiserror::Error;

pub mod clients;
pub mod config;
pub mod container;
pub mod coordinator;
pub mod events;
pub mod intercept;
pub mod lifecycle;
pub mod message;
pub mod notification;
pub mod scope;

pub use clients::{Client, ClientMatchOptions, ClientType, Clients};
pub use config::{CoordinatorConfig, NotificationDefaults};
pub use container::{ServiceWorkerContainer, ServiceWorkerEvent, ServiceWorkerRegistration};
pub use coordinator::Coordinator;
pub use events::{
    FetchDisposition, FetchEvent, MessageEvent, NotificationClickEvent, PendingWork, PushEvent,
    ServiceWorkerHandler, SyncEvent,
};
pub use intercept::{offline_response, FetchInterceptor};
pub use lifecycle::{LifecycleController, LifecycleState};
pub use message::ClientMessage;
pub use notification::{Notification, NotificationCenter, NotificationOptions, PushPayload};
pub use scope::GlobalScope;

// ==================== Errors ====================

/// Errors that can occur in service worker operations.
#[derive(Error, Debug)]
pub enum ServiceWorkerError {
    #[error("Install failed: {0}")]
    InstallFailed(#[from] CacheError),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Client error: {0}")]
    Client(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ServiceWorkerError> for SwKitError {
    fn from(err: ServiceWorkerError) -> Self {
        match err {
            ServiceWorkerError::Config(message) => SwKitError::config(message),
            ServiceWorkerError::NotFound(what) => SwKitError::NotFound(what),
            ServiceWorkerError::Io(e) => SwKitError::Io(e),
            ServiceWorkerError::Client(message) => SwKitError::InvalidArgument(message),
            other => SwKitError::lifecycle_with_source("service worker", other),
        }
    }
}

// ==================== Types ====================

/// Unique identifier for a coordinator version instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ServiceWorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sw-{}", self.0)
    }
}

pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
