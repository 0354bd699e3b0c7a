//! Clients API: the pages (windows) a coordinator can see and control.

use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use tracing::debug;
use url::Url;

use crate::{ServiceWorkerError, ServiceWorkerId};

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
    SharedWorker,
    All,
}

/// Visibility state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisibilityState {
    Hidden,
    Visible,
}

/// A client (open page).
#[derive(Debug, Clone)]
pub struct Client {
    pub id: String,

    /// Current location.
    pub url: Url,

    pub client_type: ClientType,

    pub visibility_state: VisibilityState,

    pub focused: bool,

    /// Coordinator version controlling this page, if any.
    pub controller: Option<ServiceWorkerId>,
}

impl Client {
    /// A new visible, unfocused window at `url`.
    pub fn window(url: Url) -> Self {
        Self {
            id: next_client_id(),
            url,
            client_type: ClientType::Window,
            visibility_state: VisibilityState::Visible,
            focused: false,
            controller: None,
        }
    }
}

/// Options for [`Clients::match_all`].
#[derive(Debug, Clone, Default)]
pub struct ClientMatchOptions {
    /// Also return pages not controlled by the asking coordinator.
    pub include_uncontrolled: bool,
    pub client_type: ClientType,
}

/// All pages on the origin.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<String, Client>,
}

impl Clients {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&Client> {
        self.clients.get(id)
    }

    /// Clients visible to coordinator `asker`, sorted by id.
    pub fn match_all(&self, asker: ServiceWorkerId, options: &ClientMatchOptions) -> Vec<&Client> {
        let mut matched: Vec<&Client> = self
            .clients
            .values()
            .filter(|c| options.include_uncontrolled || c.controller == Some(asker))
            .filter(|c| match options.client_type {
                ClientType::All => true,
                t => c.client_type == t,
            })
            .collect();
        matched.sort_by(|a, b| a.id.cmp(&b.id));
        matched
    }

    /// Open a focused window at `url`.
    pub fn open_window(&mut self, url: Url) -> Client {
        let mut client = Client::window(url);
        client.focused = true;
        for other in self.clients.values_mut() {
            other.focused = false;
        }
        debug!(client = %client.id, url = %client.url, "Opened window");
        self.clients.insert(client.id.clone(), client.clone());
        client
    }

    /// Focus a window client, unfocusing every other one.
    pub fn focus(&mut self, id: &str) -> Result<&Client, ServiceWorkerError> {
        let client_type = self
            .clients
            .get(id)
            .map(|c| c.client_type)
            .ok_or_else(|| ServiceWorkerError::NotFound(format!("client {id}")))?;
        if client_type != ClientType::Window {
            return Err(ServiceWorkerError::Client(
                "Can only focus window clients".to_string(),
            ));
        }

        for (cid, client) in self.clients.iter_mut() {
            client.focused = cid == id;
        }
        debug!(client = %id, "Focused window");
        self.clients
            .get(id)
            .ok_or_else(|| ServiceWorkerError::NotFound(format!("client {id}")))
    }

    /// Make `controller` control every client. Returns the ids whose
    /// controller changed, sorted.
    pub fn claim(&mut self, controller: ServiceWorkerId) -> Vec<String> {
        let mut changed: Vec<String> = self
            .clients
            .values_mut()
            .filter(|c| c.controller != Some(controller))
            .map(|c| {
                c.controller = Some(controller);
                c.id.clone()
            })
            .collect();
        changed.sort();
        changed
    }

    pub fn add(&mut self, client: Client) {
        self.clients.insert(client.id.clone(), client);
    }

    pub fn remove(&mut self, id: &str) -> Option<Client> {
        self.clients.remove(id)
    }

    /// Number of clients controlled by `controller`.
    pub fn controlled_by(&self, controller: ServiceWorkerId) -> usize {
        self.clients
            .values()
            .filter(|c| c.controller == Some(controller))
            .count()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

fn next_client_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!("client-{:06}", COUNTER.fetch_add(1, Ordering::Relaxed))
}
