//! User-visible notifications
//!
//! Only wallet errors and user-initiated transaction outcomes end up here.
//! Background synchronization failures are logged and never notified.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Success,
    Error,
    Info,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub title: String,
    pub description: Option<String>,
    pub txid: Option<String>,
}

impl Notification {
    pub fn success(title: impl Into<String>) -> Self {
        Self {
            kind: NotificationKind::Success,
            title: title.into(),
            description: None,
            txid: None,
        }
    }

    pub fn error(title: impl Into<String>) -> Self {
        Self {
            kind: NotificationKind::Error,
            ..Self::success(title)
        }
    }

    pub fn info(title: impl Into<String>) -> Self {
        Self {
            kind: NotificationKind::Info,
            ..Self::success(title)
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_txid(mut self, txid: Option<String>) -> Self {
        self.txid = txid;
        self
    }
}

/// Fan-out of notifications to whatever presentation layer listens
#[derive(Debug, Clone)]
pub struct Notifier {
    sender: broadcast::Sender<Notification>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(64)
    }
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    pub fn notify(&self, notification: Notification) {
        match notification.kind {
            NotificationKind::Error => error!(
                "{}: {}",
                notification.title,
                notification.description.as_deref().unwrap_or("")
            ),
            _ => info!("{}", notification.title),
        }
        // No listeners is fine: the log line above is the record
        let _ = self.sender.send(notification);
    }
}
