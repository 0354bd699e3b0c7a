//! The coordinator: one version of the app's service worker.

use std::sync::Arc;

use async_trait::async_trait;
use swkit_cache::CacheStoreManager;
use swkit_net::Fetcher;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

use crate::clients::{ClientMatchOptions, ClientType};
use crate::config::CoordinatorConfig;
use crate::events::{
    FetchDisposition, FetchEvent, MessageEvent, NotificationClickEvent, PushEvent,
    ServiceWorkerHandler, SyncEvent,
};
use crate::intercept::FetchInterceptor;
use crate::lifecycle::{LifecycleController, LifecycleState};
use crate::message::ClientMessage;
use crate::notification::PushPayload;
use crate::scope::GlobalScope;
use crate::{now_millis, ServiceWorkerError, ServiceWorkerId};

/// One coordinator version, built from an explicit config.
pub struct Coordinator {
    id: ServiceWorkerId,
    config: CoordinatorConfig,
    scope: GlobalScope,
    fetcher: Arc<dyn Fetcher>,
    cache: CacheStoreManager,
    interceptor: FetchInterceptor,
    lifecycle: RwLock<LifecycleController>,
    precache: Vec<Url>,
}

impl Coordinator {
    pub fn new(
        config: CoordinatorConfig,
        scope: GlobalScope,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self, ServiceWorkerError> {
        config.validate()?;

        let precache = config.precache_urls()?;
        let cache = CacheStoreManager::new(config.cache_version(), Arc::clone(&scope.caches));
        let interceptor = FetchInterceptor::new(
            config.request_filter(),
            cache.clone(),
            Arc::clone(&fetcher),
            config.resolve(&config.offline_page)?,
            config.resolve(&config.app_root)?,
        );

        Ok(Self {
            id: ServiceWorkerId::new(),
            config,
            scope,
            fetcher,
            cache,
            interceptor,
            lifecycle: RwLock::new(LifecycleController::new()),
            precache,
        })
    }

    pub fn id(&self) -> ServiceWorkerId {
        self.id
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn cache(&self) -> &CacheStoreManager {
        &self.cache
    }

    pub async fn state(&self) -> LifecycleState {
        self.lifecycle.read().await.state()
    }

    /// The previous version let go of its pages; begin activating.
    pub async fn release(&self) -> Result<(), ServiceWorkerError> {
        self.lifecycle.write().await.release()
    }

    /// Mark this version as replaced.
    pub async fn retire(&self) {
        self.lifecycle.write().await.retire();
        info!(worker = %self.id, "Coordinator retired");
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("id", &self.id)
            .field("cache", &self.cache.version().cache_name())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ServiceWorkerHandler for Coordinator {
    async fn on_install(&self) -> Result<(), ServiceWorkerError> {
        if self.state().await != LifecycleState::Installing {
            return Err(ServiceWorkerError::InvalidState(
                "install already ran".to_string(),
            ));
        }

        info!(worker = %self.id, cache = %self.cache.version(), "Installing");
        match self.cache.precache(self.fetcher.as_ref(), &self.precache).await {
            Ok(()) => {
                let next = self.lifecycle.write().await.install_succeeded()?;
                info!(worker = %self.id, state = ?next, "Installed");
                Ok(())
            }
            Err(e) => {
                warn!(worker = %self.id, error = %e, "Install failed");
                self.lifecycle.write().await.install_failed()?;
                Err(ServiceWorkerError::InstallFailed(e))
            }
        }
    }

    async fn on_activate(&self) -> Result<(), ServiceWorkerError> {
        if self.state().await != LifecycleState::Activating {
            return Err(ServiceWorkerError::InvalidState(format!(
                "activate requires Activating, current state is {:?}",
                self.state().await
            )));
        }

        let deleted = self.cache.activate_latest().await;
        let claimed = self.scope.clients.write().await.claim(self.id);
        self.lifecycle.write().await.activation_complete()?;

        info!(
            worker = %self.id,
            deleted_caches = deleted.len(),
            claimed_clients = claimed.len(),
            "Activated"
        );
        Ok(())
    }

    async fn on_fetch(&self, event: &FetchEvent) -> FetchDisposition {
        self.interceptor.handle(event).await
    }

    async fn on_message(&self, event: &MessageEvent) -> Result<(), ServiceWorkerError> {
        match ClientMessage::decode(&event.data) {
            Some(ClientMessage::SkipWaiting) => {
                let moved = self.lifecycle.write().await.skip_waiting();
                info!(worker = %self.id, activating = moved, "Skip waiting requested");
            }
            None => {
                debug!(worker = %self.id, data = %event.data, "Ignoring unrecognized message");
            }
        }
        Ok(())
    }

    async fn on_push(&self, event: &PushEvent) -> Result<(), ServiceWorkerError> {
        let payload = PushPayload::decode(event.data.as_deref());
        let (title, options) = payload.into_notification(&self.config.notifications, now_millis());

        let shown = self.scope.notifications.write().await.show(title, options);
        debug!(worker = %self.id, notification = shown.id, tag = %shown.options.tag, "Showed notification");
        Ok(())
    }

    async fn on_notification_click(
        &self,
        event: &NotificationClickEvent,
    ) -> Result<(), ServiceWorkerError> {
        self.scope
            .notifications
            .write()
            .await
            .close(event.notification.id);

        let target = event.notification.target_url(&self.config.origin);
        let options = ClientMatchOptions {
            include_uncontrolled: true,
            client_type: ClientType::Window,
        };

        let mut clients = self.scope.clients.write().await;
        let existing = clients
            .match_all(self.id, &options)
            .into_iter()
            .find(|c| c.url.path() == target.path())
            .map(|c| c.id.clone());

        match existing {
            Some(id) => {
                clients.focus(&id)?;
                debug!(client = %id, url = %target, "Focused existing window");
            }
            None => {
                let client = clients.open_window(target);
                debug!(client = %client.id, url = %client.url, "Opened new window");
            }
        }
        Ok(())
    }

    async fn on_sync(&self, event: &SyncEvent) -> Result<(), ServiceWorkerError> {
        info!(worker = %self.id, tag = %event.tag, "Background sync acknowledged");
        Ok(())
    }

    async fn on_periodic_sync(&self, event: &SyncEvent) -> Result<(), ServiceWorkerError> {
        info!(worker = %self.id, tag = %event.tag, "Periodic sync acknowledged");
        Ok(())
    }
}
