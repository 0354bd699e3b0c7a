//! Events delivered to a coordinator, and the handler interface.

use std::future::Future;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value as JsonValue;
use swkit_net::{BypassReason, Request, Response};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::notification::Notification;
use crate::ServiceWorkerError;

// ==================== Pending Work ====================

/// Work an event handler started but did not wait for.
///
/// Clones share the same set, so the host can keep one and settle it after
/// the handler has already returned its result.
#[derive(Debug, Clone, Default)]
pub struct PendingWork {
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl PendingWork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `work` in the background and track it.
    ///
    /// Tasks that already finished are dropped from the set here, so a host
    /// that never settles does not accumulate handles.
    pub fn wait_until<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(work);
        let mut handles = self.lock();
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    /// Number of tracked tasks still running.
    pub fn len(&self) -> usize {
        self.lock().iter().filter(|h| !h.is_finished()).count()
    }

    /// Number of handles currently held, finished or not.
    #[cfg(test)]
    pub(crate) fn tracked(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait for every tracked task, including ones added while waiting.
    pub async fn settle(&self) {
        loop {
            let handles: Vec<_> = std::mem::take(&mut *self.lock());
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                if let Err(e) = handle.await {
                    warn!(error = %e, "Pending work panicked or was cancelled");
                }
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.handles.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ==================== Events ====================

/// A request from a controlled page.
#[derive(Debug, Clone)]
pub struct FetchEvent {
    pub request: Request,

    /// Page that issued the request, if any.
    pub client_id: Option<String>,

    pending: PendingWork,
}

impl FetchEvent {
    pub fn new(request: Request) -> Self {
        Self {
            request,
            client_id: None,
            pending: PendingWork::new(),
        }
    }

    pub fn with_client(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Track background work in `pending` instead of a private set.
    pub fn with_pending(mut self, pending: PendingWork) -> Self {
        self.pending = pending;
        self
    }

    pub fn pending(&self) -> &PendingWork {
        &self.pending
    }

    pub fn wait_until<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.pending.wait_until(work);
    }
}

/// What the coordinator did with a fetch.
#[derive(Debug, Clone)]
pub enum FetchDisposition {
    /// Not intercepted; the host sends the request to the network itself.
    Passthrough(BypassReason),
    /// Intercepted and answered.
    Respond(Response),
}

/// A message posted by a page.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub data: JsonValue,
    pub source: Option<String>,
}

impl MessageEvent {
    pub fn new(data: JsonValue) -> Self {
        Self { data, source: None }
    }
}

/// A push message.
#[derive(Debug, Clone, Default)]
pub struct PushEvent {
    pub data: Option<Bytes>,
}

impl PushEvent {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: Some(data.into()),
        }
    }

    /// A push with no payload.
    pub fn empty() -> Self {
        Self::default()
    }
}

/// The user clicked a notification (or one of its actions).
#[derive(Debug, Clone)]
pub struct NotificationClickEvent {
    pub notification: Notification,
    pub action: Option<String>,
}

/// Background sync or periodic sync.
#[derive(Debug, Clone)]
pub struct SyncEvent {
    pub tag: String,
}

impl SyncEvent {
    pub fn new(tag: impl Into<String>) -> Self {
        Self { tag: tag.into() }
    }
}

// ==================== Handler ====================

/// One method per event kind the platform can deliver to a coordinator.
#[async_trait]
pub trait ServiceWorkerHandler: Send + Sync {
    /// Install this version. An error leaves the previous version in charge.
    async fn on_install(&self) -> Result<(), ServiceWorkerError>;

    /// Activate this version: drop superseded caches, then claim pages.
    async fn on_activate(&self) -> Result<(), ServiceWorkerError>;

    /// Handle a fetch from a controlled page.
    async fn on_fetch(&self, event: &FetchEvent) -> FetchDisposition;

    async fn on_message(&self, event: &MessageEvent) -> Result<(), ServiceWorkerError>;

    async fn on_push(&self, event: &PushEvent) -> Result<(), ServiceWorkerError>;

    async fn on_notification_click(
        &self,
        event: &NotificationClickEvent,
    ) -> Result<(), ServiceWorkerError>;

    async fn on_sync(&self, event: &SyncEvent) -> Result<(), ServiceWorkerError>;

    async fn on_periodic_sync(&self, event: &SyncEvent) -> Result<(), ServiceWorkerError>;
}
