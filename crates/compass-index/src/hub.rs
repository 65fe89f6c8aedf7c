//! In-memory publish/subscribe registry for build progress.
//!
//! Each subscriber owns a bounded queue. Publishing never waits: a full queue
//! loses the event for that subscriber only.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use compass_store::ProjectId;
use serde::Serialize;
use tokio::sync::mpsc;

/// Default per-subscriber queue capacity.
pub const DEFAULT_CAPACITY: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Start,
    Error,
    Complete,
}

impl EventKind {
    /// Wire name used as the SSE event name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "embedding_start",
            Self::Error => "embedding_error",
            Self::Complete => "embedding_complete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub topic: ProjectId,
    pub kind: EventKind,
    pub payload: serde_json::Value,
}

impl ProgressEvent {
    #[must_use]
    pub fn new(topic: ProjectId, kind: EventKind, payload: serde_json::Value) -> Self {
        Self {
            topic,
            kind,
            payload,
        }
    }
}

type Registry = HashMap<ProjectId, HashMap<u64, mpsc::Sender<ProgressEvent>>>;

#[derive(Debug)]
struct HubInner {
    topics: RwLock<Registry>,
    next_id: AtomicU64,
    capacity: usize,
}

impl HubInner {
    fn remove(&self, topic: ProjectId, id: u64) {
        let mut topics = self.topics.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(handles) = topics.get_mut(&topic) {
            handles.remove(&id);
            if handles.is_empty() {
                topics.remove(&topic);
            }
        }
    }
}

/// Cloneable handle to a shared subscriber registry.
#[derive(Debug, Clone)]
pub struct EventHub {
    inner: Arc<HubInner>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventHub {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                topics: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(0),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Register a new bounded queue under `topic`.
    #[must_use]
    pub fn subscribe(&self, topic: ProjectId) -> Subscription {
        let (tx, rx) = mpsc::channel(self.inner.capacity);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .topics
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(topic)
            .or_default()
            .insert(id, tx);
        tracing::debug!(project = %topic, subscriber = id, "subscribed");
        Subscription {
            topic,
            id,
            rx,
            hub: Arc::downgrade(&self.inner),
        }
    }

    /// Remove and close a subscription.
    pub fn unsubscribe(&self, subscription: Subscription) {
        drop(subscription);
    }

    /// Offer `event` to every subscriber of its topic without waiting.
    ///
    /// Returns the number of subscribers that accepted the event.
    pub fn publish(&self, event: &ProgressEvent) -> usize {
        let topics = self
            .inner
            .topics
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(handles) = topics.get(&event.topic) else {
            return 0;
        };

        let mut delivered = 0;
        for (id, tx) in handles {
            match tx.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::debug!(project = %event.topic, subscriber = id, "queue full, event dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        delivered
    }

    #[must_use]
    pub fn subscriber_count(&self, topic: ProjectId) -> usize {
        self.inner
            .topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&topic)
            .map_or(0, HashMap::len)
    }

    #[must_use]
    pub fn topic_count(&self) -> usize {
        self.inner
            .topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Receiving end of one subscriber queue. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    topic: ProjectId,
    id: u64,
    rx: mpsc::Receiver<ProgressEvent>,
    hub: Weak<HubInner>,
}

impl Subscription {
    #[must_use]
    pub fn topic(&self) -> ProjectId {
        self.topic
    }

    /// Wait for the next event. `None` once the hub is gone.
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ProgressEvent> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.remove(self.topic, self.id);
            tracing::debug!(project = %self.topic, subscriber = self.id, "unsubscribed");
        }
    }
}
