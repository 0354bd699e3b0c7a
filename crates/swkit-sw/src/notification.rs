//! Push payload decoding and shown notifications.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::config::NotificationDefaults;

/// Decoded push message. Every field is optional on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushPayload {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub badge: Option<String>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub actions: Vec<NotificationAction>,
}

impl PushPayload {
    /// Decode a push body as JSON, degrading to a plain-text body.
    pub fn decode(data: Option<&[u8]>) -> Self {
        let Some(data) = data else {
            return Self::default();
        };

        match serde_json::from_slice::<PushPayload>(data) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Push payload is not JSON, using raw text");
                Self {
                    body: Some(String::from_utf8_lossy(data).into_owned()),
                    ..Self::default()
                }
            }
        }
    }

    /// Fill missing fields from `defaults`.
    pub fn into_notification(
        self,
        defaults: &NotificationDefaults,
        timestamp: u64,
    ) -> (String, NotificationOptions) {
        let title = self.title.unwrap_or_else(|| defaults.default_title.clone());
        let options = NotificationOptions {
            body: self.body.unwrap_or_else(|| defaults.default_body.clone()),
            icon: self.icon.unwrap_or_else(|| defaults.icon.clone()),
            badge: self.badge.unwrap_or_else(|| defaults.badge.clone()),
            tag: self.tag.unwrap_or_else(|| defaults.tag.clone()),
            renotify: true,
            data: NotificationData {
                url: self.url.unwrap_or_else(|| "/".to_string()),
                timestamp,
            },
            actions: self.actions,
        };
        (title, options)
    }
}

/// A button on a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

/// Data stored on a notification for the click handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationData {
    pub url: String,
    /// Milliseconds since epoch when the push arrived.
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationOptions {
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub tag: String,
    /// Alert again when replacing a notification with the same tag.
    pub renotify: bool,
    pub data: NotificationData,
    pub actions: Vec<NotificationAction>,
}

/// A shown notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub id: u64,
    pub title: String,
    pub options: NotificationOptions,
}

impl Notification {
    /// Where a click on this notification should lead.
    pub fn target_url(&self, origin: &Url) -> Url {
        let path = if self.options.data.url.is_empty() {
            "/"
        } else {
            self.options.data.url.as_str()
        };
        origin.join(path).unwrap_or_else(|e| {
            warn!(url = %path, error = %e, "Bad notification url, using origin");
            origin.clone()
        })
    }
}

/// Notifications currently on screen.
#[derive(Debug, Default)]
pub struct NotificationCenter {
    shown: Vec<Notification>,
}

impl NotificationCenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Show a notification, replacing any with the same tag.
    pub fn show(&mut self, title: String, options: NotificationOptions) -> Notification {
        static COUNTER: AtomicU64 = AtomicU64::new(1);

        let replaced = self.shown.len();
        self.shown.retain(|n| n.options.tag != options.tag);
        if self.shown.len() != replaced {
            debug!(tag = %options.tag, "Replacing notification with same tag");
        }

        let notification = Notification {
            id: COUNTER.fetch_add(1, Ordering::Relaxed),
            title,
            options,
        };
        self.shown.push(notification.clone());
        notification
    }

    pub fn get(&self, id: u64) -> Option<&Notification> {
        self.shown.iter().find(|n| n.id == id)
    }

    /// Shown notifications, optionally filtered by tag.
    pub fn get_notifications(&self, tag: Option<&str>) -> Vec<&Notification> {
        self.shown
            .iter()
            .filter(|n| tag.map_or(true, |t| n.options.tag == t))
            .collect()
    }

    pub fn close(&mut self, id: u64) -> bool {
        let before = self.shown.len();
        self.shown.retain(|n| n.id != id);
        self.shown.len() != before
    }

    pub fn len(&self) -> usize {
        self.shown.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shown.is_empty()
    }
}
