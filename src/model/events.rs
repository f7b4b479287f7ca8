//! In-process publish/subscribe for pushing election changes to clients.
//!
//! Delivery is best-effort: every subscriber owns a small bounded queue, and
//! a notification that does not fit is dropped for that subscriber only.
//! Clients treat notifications as hints and re-fetch the real state.

use std::{
    collections::HashMap,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    task::{Context, Poll},
};

use rocket::{
    futures::Stream,
    tokio::sync::mpsc::{self, error::TrySendError},
};
use serde::{Deserialize, Serialize};

use super::election::ElectionId;

/// How many undelivered notifications a subscriber may have outstanding.
pub const QUEUE_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Elections starting and stopping.
    ElectionLifecycle,
    /// Votes being cast in the active election.
    VoteReceived,
}

/// The payload pushed to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum Notification {
    #[serde(rename_all = "camelCase")]
    ElectionStarted { election_id: ElectionId },
    #[serde(rename_all = "camelCase")]
    ElectionStopped { election_id: ElectionId },
    #[serde(rename_all = "camelCase")]
    VoteReceived { election_id: ElectionId },
}

impl Notification {
    /// The topic this notification belongs on.
    pub fn topic(&self) -> Topic {
        match self {
            Self::ElectionStarted { .. } | Self::ElectionStopped { .. } => Topic::ElectionLifecycle,
            Self::VoteReceived { .. } => Topic::VoteReceived,
        }
    }
}

type Subscribers = HashMap<u64, mpsc::Sender<Notification>>;

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    topics: Mutex<HashMap<Topic, Subscribers>>,
}

impl Registry {
    fn topics(&self) -> MutexGuard<'_, HashMap<Topic, Subscribers>> {
        // Nothing panics while holding the lock, but a poisoned map is still usable.
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, topic: Topic, id: u64) {
        let mut topics = self.topics();
        if let Some(subscribers) = topics.get_mut(&topic) {
            subscribers.remove(&id);
            if subscribers.is_empty() {
                topics.remove(&topic);
            }
        }
    }
}

/// A cheaply cloneable handle on the shared subscriber registry.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Registry>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a notification to every current subscriber of `topic` without
    /// waiting for any of them. Returns how many subscribers accepted it.
    pub fn publish(&self, topic: Topic, notification: Notification) -> usize {
        let mut topics = self.registry.topics();
        let subscribers = match topics.get_mut(&topic) {
            Some(subscribers) => subscribers,
            None => return 0,
        };

        let mut delivered = 0;
        subscribers.retain(|id, sender| match sender.try_send(notification.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                debug!("Subscriber {id} on {topic:?} is full, dropping {notification:?}");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
        if subscribers.is_empty() {
            topics.remove(&topic);
        }
        delivered
    }

    /// Publish a notification on its own topic.
    pub fn notify(&self, notification: Notification) -> usize {
        self.publish(notification.topic(), notification)
    }

    /// Start receiving notifications for `topic`. The subscription lasts until
    /// the returned handle is dropped.
    pub fn subscribe(&self, topic: Topic) -> Subscription {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(QUEUE_LEN);
        self.registry
            .topics()
            .entry(topic)
            .or_default()
            .insert(id, sender);

        Subscription {
            id,
            topic,
            receiver,
            registry: self.registry.clone(),
        }
    }

    /// The number of live subscriptions to `topic`.
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.registry
            .topics()
            .get(&topic)
            .map_or(0, |subscribers| subscribers.len())
    }
}

/// The receiving end of a subscription, usable either through [`recv`] or as
/// a [`Stream`].
///
/// [`recv`]: Subscription::recv
pub struct Subscription {
    id: u64,
    topic: Topic,
    receiver: mpsc::Receiver<Notification>,
    registry: Arc<Registry>,
}

impl Subscription {
    /// Wait for the next notification.
    pub async fn recv(&mut self) -> Option<Notification> {
        self.receiver.recv().await
    }
}

impl Stream for Subscription {
    type Item = Notification;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.remove(self.topic, self.id);
    }
}
