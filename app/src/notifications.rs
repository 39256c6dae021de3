use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;
use uuid::Uuid;

/// How long a notification stays visible unless configured otherwise.
pub const DEFAULT_DISPLAY_DURATION: Duration = Duration::from_millis(3000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    pub id: Uuid,
    pub message: String,
    pub severity: Severity,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug)]
struct Entry {
    event: NotificationEvent,
    expires_at: Instant,
}

#[derive(Debug)]
struct QueueInner {
    entries: Mutex<Vec<Entry>>,
    display: Duration,
    publisher: watch::Sender<Vec<NotificationEvent>>,
}

impl QueueInner {
    fn publish(&self, entries: &[Entry]) {
        self.publisher
            .send_replace(entries.iter().map(|entry| entry.event.clone()).collect());
    }

    /// Drop expired entries; returns true when something was removed.
    fn prune(&self, entries: &mut Vec<Entry>) -> bool {
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|entry| entry.expires_at > now);
        before != entries.len()
    }

    fn remove(&self, id: Uuid) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|entry| entry.event.id != id);
        let removed = before != entries.len();
        if removed {
            self.publish(&entries);
        }
        removed
    }
}

/// Transient user feedback. Each event expires on its own timer.
#[derive(Debug, Clone)]
pub struct NotificationQueue {
    inner: Arc<QueueInner>,
}

impl NotificationQueue {
    pub fn new(display: Duration) -> Self {
        let (publisher, _) = watch::channel(Vec::new());
        Self {
            inner: Arc::new(QueueInner {
                entries: Mutex::new(Vec::new()),
                display,
                publisher,
            }),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_DISPLAY_DURATION)
    }

    pub fn display_duration(&self) -> Duration {
        self.inner.display
    }

    /// Queue a message and schedule its removal.
    pub fn emit(&self, message: impl Into<String>, severity: Severity) -> Uuid {
        let event = NotificationEvent {
            id: Uuid::new_v4(),
            message: message.into(),
            severity,
            created_at: Utc::now(),
        };
        let id = event.id;
        let expires_at = Instant::now() + self.inner.display;

        match severity {
            Severity::Error | Severity::Warning => {
                log::warn!("Notification [{:?}]: {}", severity, event.message)
            }
            Severity::Info | Severity::Success => {
                log::info!("Notification [{:?}]: {}", severity, event.message)
            }
        }

        {
            let mut entries = self.inner.entries.lock();
            self.inner.prune(&mut entries);
            entries.push(Entry { event, expires_at });
            self.inner.publish(&entries);
        }

        self.schedule_expiry(id, expires_at);
        id
    }

    pub fn info(&self, message: impl Into<String>) -> Uuid {
        self.emit(message, Severity::Info)
    }

    pub fn success(&self, message: impl Into<String>) -> Uuid {
        self.emit(message, Severity::Success)
    }

    pub fn warning(&self, message: impl Into<String>) -> Uuid {
        self.emit(message, Severity::Warning)
    }

    pub fn error(&self, message: impl Into<String>) -> Uuid {
        self.emit(message, Severity::Error)
    }

    /// Remove a notification before it expires. Unknown or expired ids are ignored.
    pub fn dismiss(&self, id: Uuid) -> bool {
        self.inner.remove(id)
    }

    /// Live notifications, oldest first.
    pub fn active(&self) -> Vec<NotificationEvent> {
        let mut entries = self.inner.entries.lock();
        if self.inner.prune(&mut entries) {
            self.inner.publish(&entries);
        }
        entries.iter().map(|entry| entry.event.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.active().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<NotificationEvent>> {
        self.inner.publisher.subscribe()
    }

    fn schedule_expiry(&self, id: Uuid, expires_at: Instant) {
        // Without a runtime, expiry is still enforced when the queue is read.
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let inner: Weak<QueueInner> = Arc::downgrade(&self.inner);
        handle.spawn(async move {
            tokio::time::sleep_until(expires_at).await;
            if let Some(inner) = inner.upgrade() {
                inner.remove(id);
            }
        });
    }
}

impl Default for NotificationQueue {
    fn default() -> Self {
        Self::with_defaults()
    }
}
