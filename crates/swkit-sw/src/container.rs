//! Page-side container (`navigator.serviceWorker`).
//!
//! Plays the platform's part: registers coordinator versions, decides when a
//! waiting version may activate, routes page traffic to the active version,
//! and reports lifecycle changes to the page.

use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value as JsonValue;
use swkit_net::{Fetcher, NetError, Request, Response};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::CoordinatorConfig;
use crate::coordinator::Coordinator;
use crate::events::{
    FetchDisposition, FetchEvent, MessageEvent, NotificationClickEvent, PendingWork, PushEvent,
    ServiceWorkerHandler, SyncEvent,
};
use crate::lifecycle::LifecycleState;
use crate::message::ClientMessage;
use crate::scope::GlobalScope;
use crate::{ServiceWorkerError, ServiceWorkerId};

// ==================== Registration ====================

/// Coordinator versions registered for the origin.
#[derive(Debug, Default)]
pub struct ServiceWorkerRegistration {
    /// Installing worker.
    pub installing: Option<Arc<Coordinator>>,

    /// Waiting worker (installed but not active).
    pub waiting: Option<Arc<Coordinator>>,

    /// Active worker.
    pub active: Option<Arc<Coordinator>>,
}

// ==================== Events ====================

/// Notifications for the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceWorkerEvent {
    /// A new version started installing.
    UpdateFound { worker_id: ServiceWorkerId },
    /// A version changed lifecycle state.
    StateChange {
        worker_id: ServiceWorkerId,
        new_state: LifecycleState,
    },
    /// A page is now controlled by a different version.
    ControllerChange {
        client_id: String,
        worker_id: ServiceWorkerId,
    },
}

// ==================== Container ====================

pub struct ServiceWorkerContainer {
    scope: GlobalScope,
    fetcher: Arc<dyn Fetcher>,
    registration: RwLock<ServiceWorkerRegistration>,
    pending: PendingWork,
    event_tx: mpsc::UnboundedSender<ServiceWorkerEvent>,
}

impl ServiceWorkerContainer {
    /// Create a new container.
    pub fn new(
        scope: GlobalScope,
        fetcher: Arc<dyn Fetcher>,
    ) -> (Self, mpsc::UnboundedReceiver<ServiceWorkerEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        (
            Self {
                scope,
                fetcher,
                registration: RwLock::new(ServiceWorkerRegistration::default()),
                pending: PendingWork::new(),
                event_tx,
            },
            event_rx,
        )
    }

    pub fn scope(&self) -> &GlobalScope {
        &self.scope
    }

    /// Register and install a coordinator version.
    ///
    /// The first version activates right away, as does an update while the
    /// active version controls no pages. Otherwise the update waits until the
    /// active version is released or a skip-waiting message arrives. On
    /// install failure the previously active version stays in charge.
    pub async fn register(
        &self,
        config: CoordinatorConfig,
    ) -> Result<ServiceWorkerId, ServiceWorkerError> {
        let worker = Arc::new(Coordinator::new(
            config,
            self.scope.clone(),
            Arc::clone(&self.fetcher),
        )?);
        let id = worker.id();

        self.registration.write().await.installing = Some(Arc::clone(&worker));
        self.emit(ServiceWorkerEvent::UpdateFound { worker_id: id });
        self.emit_state(id, LifecycleState::Installing);

        let installed = worker.on_install().await;
        let mut registration = self.registration.write().await;
        registration.installing = None;

        if let Err(e) = installed {
            self.emit_state(id, LifecycleState::Redundant);
            return Err(e);
        }

        // A newer version supersedes one that is still waiting
        if let Some(previous) = registration.waiting.replace(Arc::clone(&worker)) {
            previous.retire().await;
            self.emit_state(previous.id(), LifecycleState::Redundant);
        }
        let state = worker.state().await;
        if state == LifecycleState::Waiting {
            self.emit_state(id, state);
        }

        drop(registration);

        if state == LifecycleState::Activating || self.active_is_idle().await {
            self.promote_waiting().await?;
        } else {
            info!(worker = %id, "Update installed, waiting for release");
        }
        Ok(id)
    }

    /// Whether an installed update is waiting to activate.
    pub async fn update_available(&self) -> bool {
        self.registration.read().await.waiting.is_some()
    }

    /// Ask the waiting version to activate now.
    pub async fn apply_update(&self) -> Result<(), ServiceWorkerError> {
        if !self.update_available().await {
            return Err(ServiceWorkerError::InvalidState(
                "no update is waiting".to_string(),
            ));
        }
        self.post_message(ClientMessage::SkipWaiting.to_value(), None)
            .await
    }

    /// Post a message to the waiting version, or the active one if nothing
    /// is waiting.
    pub async fn post_message(
        &self,
        data: JsonValue,
        source: Option<String>,
    ) -> Result<(), ServiceWorkerError> {
        let (target, is_waiting) = {
            let registration = self.registration.read().await;
            match (&registration.waiting, &registration.active) {
                (Some(waiting), _) => (Arc::clone(waiting), true),
                (None, Some(active)) => (Arc::clone(active), false),
                (None, None) => {
                    return Err(ServiceWorkerError::NotFound(
                        "no service worker to receive message".to_string(),
                    ))
                }
            }
        };

        target.on_message(&MessageEvent { data, source }).await?;

        if is_waiting && target.state().await == LifecycleState::Activating {
            self.promote_waiting().await?;
        }
        Ok(())
    }

    /// A page opened. It is controlled by the active version, if any.
    pub async fn open_client(&self, url: Url) -> String {
        let controller = self.active_id().await;
        let mut clients = self.scope.clients.write().await;
        let mut client = crate::clients::Client::window(url);
        client.controller = controller;
        let id = client.id.clone();
        clients.add(client);
        id
    }

    /// A page closed. Closing the last page the active version controls
    /// releases it so a waiting update can take over.
    pub async fn close_client(&self, client_id: &str) -> Result<(), ServiceWorkerError> {
        self.scope
            .clients
            .write()
            .await
            .remove(client_id)
            .ok_or_else(|| ServiceWorkerError::NotFound(format!("client {client_id}")))?;

        if self.update_available().await && self.active_is_idle().await {
            debug!("Last controlled page closed, releasing active version");
            self.promote_waiting().await?;
        }
        Ok(())
    }

    /// Fetch on behalf of a page.
    ///
    /// A page's requests go through the coordinator that controls it.
    /// Uncontrolled or unknown pages, and requests the coordinator passes
    /// through, go straight to the network. Without a page the active
    /// coordinator handles the request.
    pub async fn fetch(
        &self,
        request: Request,
        client_id: Option<&str>,
    ) -> Result<Response, NetError> {
        let controller = match client_id {
            Some(id) => self.controller_of(id).await,
            None => self.active().await,
        };
        let Some(active) = controller else {
            debug!(url = %request.url, client = ?client_id, "Uncontrolled fetch");
            return self.fetcher.fetch(&request).await;
        };

        let mut event = FetchEvent::new(request).with_pending(self.pending.clone());
        if let Some(id) = client_id {
            event = event.with_client(id);
        }

        match active.on_fetch(&event).await {
            FetchDisposition::Respond(response) => Ok(response),
            FetchDisposition::Passthrough(_) => self.fetcher.fetch(&event.request).await,
        }
    }

    /// Deliver a push message to the active version.
    pub async fn push(&self, data: Option<Bytes>) -> Result<(), ServiceWorkerError> {
        self.require_active()
            .await?
            .on_push(&PushEvent { data })
            .await
    }

    /// Deliver a click on a shown notification.
    pub async fn click_notification(
        &self,
        notification_id: u64,
        action: Option<String>,
    ) -> Result<(), ServiceWorkerError> {
        let notification = self
            .scope
            .notifications
            .read()
            .await
            .get(notification_id)
            .cloned()
            .ok_or_else(|| ServiceWorkerError::NotFound(format!("notification {notification_id}")))?;

        self.require_active()
            .await?
            .on_notification_click(&NotificationClickEvent {
                notification,
                action,
            })
            .await
    }

    pub async fn sync(&self, tag: &str) -> Result<(), ServiceWorkerError> {
        self.require_active()
            .await?
            .on_sync(&SyncEvent::new(tag))
            .await
    }

    pub async fn periodic_sync(&self, tag: &str) -> Result<(), ServiceWorkerError> {
        self.require_active()
            .await?
            .on_periodic_sync(&SyncEvent::new(tag))
            .await
    }

    /// Wait for background work (cache writes) started by fetches.
    pub async fn settle(&self) {
        self.pending.settle().await;
    }

    pub async fn active(&self) -> Option<Arc<Coordinator>> {
        self.registration.read().await.active.clone()
    }

    pub async fn waiting(&self) -> Option<Arc<Coordinator>> {
        self.registration.read().await.waiting.clone()
    }

    pub async fn active_id(&self) -> Option<ServiceWorkerId> {
        self.active().await.map(|w| w.id())
    }

    /// The active coordinator if it controls `client_id`.
    async fn controller_of(&self, client_id: &str) -> Option<Arc<Coordinator>> {
        let controller = self.scope.clients.read().await.get(client_id)?.controller?;
        self.active().await.filter(|active| active.id() == controller)
    }

    /// True when there is no active version or it controls no pages.
    async fn active_is_idle(&self) -> bool {
        match self.active_id().await {
            Some(id) => self.scope.clients.read().await.controlled_by(id) == 0,
            None => true,
        }
    }

    async fn require_active(&self) -> Result<Arc<Coordinator>, ServiceWorkerError> {
        self.active()
            .await
            .ok_or_else(|| ServiceWorkerError::NotFound("no active service worker".to_string()))
    }

    /// Activate the waiting version and retire the active one.
    async fn promote_waiting(&self) -> Result<(), ServiceWorkerError> {
        let mut registration = self.registration.write().await;
        let Some(worker) = registration.waiting.take() else {
            return Ok(());
        };
        let id = worker.id();

        worker.release().await?;
        self.emit_state(id, LifecycleState::Activating);

        if let Some(old) = registration.active.take() {
            old.retire().await;
            self.emit_state(old.id(), LifecycleState::Redundant);
        }

        let before: Vec<(String, Option<ServiceWorkerId>)> = {
            let clients = self.scope.clients.read().await;
            let options = crate::clients::ClientMatchOptions {
                include_uncontrolled: true,
                client_type: crate::clients::ClientType::All,
            };
            clients
                .match_all(id, &options)
                .into_iter()
                .map(|c| (c.id.clone(), c.controller))
                .collect()
        };

        if let Err(e) = worker.on_activate().await {
            warn!(worker = %id, error = %e, "Activation failed");
            return Err(e);
        }
        registration.active = Some(Arc::clone(&worker));
        drop(registration);
        self.emit_state(id, LifecycleState::Active);

        for (client_id, previous) in before {
            if previous != Some(id) {
                self.emit(ServiceWorkerEvent::ControllerChange {
                    client_id,
                    worker_id: id,
                });
            }
        }
        Ok(())
    }

    fn emit_state(&self, worker_id: ServiceWorkerId, new_state: LifecycleState) {
        self.emit(ServiceWorkerEvent::StateChange {
            worker_id,
            new_state,
        });
    }

    fn emit(&self, event: ServiceWorkerEvent) {
        if self.event_tx.send(event).is_err() {
            debug!("No page listening for service worker events");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;
    use serde_json::json;
    use swkit_net::mock::MockFetcher;

    const ORIGIN: &str = "https://app.example.com/";

    fn config(version: &str) -> CoordinatorConfig {
        CoordinatorConfig {
            origin: Url::parse(ORIGIN).unwrap(),
            cache_version: version.to_string(),
            ..Default::default()
        }
    }

    fn origin_fetcher() -> Arc<MockFetcher> {
        let fetcher = Arc::new(MockFetcher::new());
        for path in ["", "offline", "manifest.json", "icon.svg"] {
            fetcher.route(&format!("{ORIGIN}{path}"), StatusCode::OK, format!("/{path}"));
        }
        fetcher
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServiceWorkerEvent>) -> Vec<ServiceWorkerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_first_registration_activates() {
        let fetcher = origin_fetcher();
        let (container, mut rx) = ServiceWorkerContainer::new(GlobalScope::new(), fetcher);

        let id = container.register(config("v1")).await.unwrap();
        assert_eq!(container.active_id().await, Some(id));
        assert!(!container.update_available().await);

        let events = drain(&mut rx);
        assert_eq!(events[0], ServiceWorkerEvent::UpdateFound { worker_id: id });
        assert!(events.contains(&ServiceWorkerEvent::StateChange {
            worker_id: id,
            new_state: LifecycleState::Active,
        }));
    }

    #[tokio::test]
    async fn test_update_waits_while_pages_are_open() {
        let fetcher = origin_fetcher();
        let (container, _rx) = ServiceWorkerContainer::new(GlobalScope::new(), fetcher);
        let v1 = container.register(config("v1")).await.unwrap();
        container.open_client(Url::parse(ORIGIN).unwrap()).await;

        let v2 = container.register(config("v2")).await.unwrap();

        assert_eq!(container.active_id().await, Some(v1));
        assert!(container.update_available().await);
        let waiting = container.waiting().await.unwrap();
        assert_eq!(waiting.id(), v2);
        assert_eq!(waiting.state().await, LifecycleState::Waiting);
    }

    #[tokio::test]
    async fn test_apply_update_skips_waiting() {
        let fetcher = origin_fetcher();
        let (container, mut rx) = ServiceWorkerContainer::new(GlobalScope::new(), fetcher);
        container.register(config("v1")).await.unwrap();
        let page = container.open_client(Url::parse(ORIGIN).unwrap()).await;
        let v2 = container.register(config("v2")).await.unwrap();
        drain(&mut rx);

        container.apply_update().await.unwrap();

        assert_eq!(container.active_id().await, Some(v2));
        assert!(!container.update_available().await);
        let events = drain(&mut rx);
        assert!(events.contains(&ServiceWorkerEvent::ControllerChange {
            client_id: page,
            worker_id: v2,
        }));

        let caches = container.scope().caches.read().await;
        assert_eq!(caches.keys(), vec!["dashboard@v2"]);
    }

    #[tokio::test]
    async fn test_closing_last_page_releases_update() {
        let fetcher = origin_fetcher();
        let (container, _rx) = ServiceWorkerContainer::new(GlobalScope::new(), fetcher);
        let v1 = container.register(config("v1")).await.unwrap();
        let a = container.open_client(Url::parse(ORIGIN).unwrap()).await;
        let b = container.open_client(Url::parse(ORIGIN).unwrap()).await;
        let v2 = container.register(config("v2")).await.unwrap();

        container.close_client(&a).await.unwrap();
        assert_eq!(container.active_id().await, Some(v1));

        container.close_client(&b).await.unwrap();
        assert_eq!(container.active_id().await, Some(v2));
    }

    #[tokio::test]
    async fn test_failed_update_keeps_previous_version() {
        let fetcher = origin_fetcher();
        let (container, _rx) =
            ServiceWorkerContainer::new(GlobalScope::new(), fetcher.clone());
        let v1 = container.register(config("v1")).await.unwrap();

        let broken = CoordinatorConfig {
            precache: vec!["/".to_string(), "/offline".to_string(), "/missing.css".to_string()],
            ..config("v2")
        };
        assert!(container.register(broken).await.is_err());

        assert_eq!(container.active_id().await, Some(v1));
        assert!(!container.update_available().await);
        let caches = container.scope().caches.read().await;
        assert_eq!(caches.keys(), vec!["dashboard@v1"]);
    }

    #[tokio::test]
    async fn test_fetch_routes_through_active_version() {
        let fetcher = origin_fetcher();
        fetcher.route(&format!("{ORIGIN}api/projects"), StatusCode::OK, "[]");
        let (container, _rx) =
            ServiceWorkerContainer::new(GlobalScope::new(), fetcher.clone());

        // Uncontrolled: straight to the network
        let request = Request::parse(&format!("{ORIGIN}api/projects")).unwrap();
        assert_eq!(container.fetch(request.clone(), None).await.unwrap().text().unwrap(), "[]");

        container.register(config("v1")).await.unwrap();
        let page = container.open_client(Url::parse(ORIGIN).unwrap()).await;

        // Bypassed API request still reaches the network
        let response = container.fetch(request.clone(), Some(&page)).await.unwrap();
        assert_eq!(response.text().unwrap(), "[]");

        // Offline API request fails instead of being served from cache
        fetcher.set_offline(true);
        assert!(container.fetch(request, Some(&page)).await.is_err());

        // Offline navigation gets the offline page
        let nav = Request::navigate(Url::parse(&format!("{ORIGIN}projects")).unwrap());
        let response = container.fetch(nav, Some(&page)).await.unwrap();
        assert_eq!(response.text().unwrap(), "/offline");
        container.settle().await;
    }

    #[tokio::test]
    async fn test_post_message_without_worker() {
        let (container, _rx) =
            ServiceWorkerContainer::new(GlobalScope::new(), origin_fetcher());
        assert!(matches!(
            container.post_message(json!({ "type": "SKIP_WAITING" }), None).await,
            Err(ServiceWorkerError::NotFound(_))
        ));
        assert!(container.apply_update().await.is_err());
    }

    #[tokio::test]
    async fn test_push_and_click_through_container() {
        let (container, _rx) =
            ServiceWorkerContainer::new(GlobalScope::new(), origin_fetcher());
        assert!(container.push(None).await.is_err());

        container.register(config("v1")).await.unwrap();
        container
            .push(Some(Bytes::from_static(br#"{"title":"Deploy","url":"/deployments"}"#)))
            .await
            .unwrap();

        let id = container.scope().notifications.read().await.get_notifications(None)[0].id;
        container.click_notification(id, None).await.unwrap();

        assert_eq!(container.scope().clients.read().await.len(), 1);
        assert!(container.click_notification(id, None).await.is_err());
        container.sync("outbox").await.unwrap();
        container.periodic_sync("refresh").await.unwrap();
    }

    fn uncontrolled_page(path: &str) -> crate::clients::Client {
        crate::clients::Client::window(Url::parse(ORIGIN).unwrap().join(path).unwrap())
    }

    #[tokio::test]
    async fn test_update_activates_when_no_page_is_controlled() {
        let (container, _rx) =
            ServiceWorkerContainer::new(GlobalScope::new(), origin_fetcher());
        container.register(config("v1")).await.unwrap();

        let v2 = container.register(config("v2")).await.unwrap();

        assert_eq!(container.active_id().await, Some(v2));
        assert!(!container.update_available().await);

        let page = container.open_client(Url::parse(ORIGIN).unwrap()).await;
        let clients = container.scope().clients.read().await;
        assert_eq!(clients.get(&page).unwrap().controller, Some(v2));
    }

    #[tokio::test]
    async fn test_uncontrolled_pages_do_not_hold_back_update() {
        let (container, _rx) =
            ServiceWorkerContainer::new(GlobalScope::new(), origin_fetcher());
        container.register(config("v1")).await.unwrap();
        let controlled = container.open_client(Url::parse(ORIGIN).unwrap()).await;
        container
            .scope()
            .clients
            .write()
            .await
            .add(uncontrolled_page("/settings"));

        let v2 = container.register(config("v2")).await.unwrap();
        assert!(container.update_available().await);

        container.close_client(&controlled).await.unwrap();
        assert_eq!(container.active_id().await, Some(v2));
        assert_eq!(container.scope().clients.read().await.len(), 1);
    }

    #[tokio::test]
    async fn test_uncontrolled_page_fetches_from_network() {
        let fetcher = origin_fetcher();
        let (container, _rx) =
            ServiceWorkerContainer::new(GlobalScope::new(), fetcher.clone());
        container.register(config("v1")).await.unwrap();
        let controlled = container.open_client(Url::parse(ORIGIN).unwrap()).await;
        let stray = uncontrolled_page("/");
        let stray_id = stray.id.clone();
        container.scope().clients.write().await.add(stray);
        fetcher.set_offline(true);

        let nav = || Request::navigate(Url::parse(&format!("{ORIGIN}projects")).unwrap());

        let response = container.fetch(nav(), Some(&controlled)).await.unwrap();
        assert_eq!(response.text().unwrap(), "/offline");

        assert!(matches!(
            container.fetch(nav(), Some(&stray_id)).await,
            Err(NetError::Offline)
        ));
        assert!(container.fetch(nav(), Some("client-gone")).await.is_err());
    }

    #[tokio::test]
    async fn test_repeated_fetches_do_not_accumulate_pending_work() {
        let fetcher = origin_fetcher();
        fetcher.route(&format!("{ORIGIN}app.js"), StatusCode::OK, "console.log(1)");
        let (container, _rx) =
            ServiceWorkerContainer::new(GlobalScope::new(), fetcher.clone());
        container.register(config("v1")).await.unwrap();
        let page = container.open_client(Url::parse(ORIGIN).unwrap()).await;

        for _ in 0..300 {
            let request = Request::parse(&format!("{ORIGIN}app.js")).unwrap();
            container.fetch(request, Some(&page)).await.unwrap();
            tokio::task::yield_now().await;
        }

        assert!(container.pending.tracked() <= 2);
        container.settle().await;
        assert!(container.pending.is_empty());
    }
}
