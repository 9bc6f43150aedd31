//! Tracking and fan-out of WebSocket subscriptions.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::broadcast;

use opnet_rpc_decl::{SubscriptionEvent, SubscriptionTopic};

const FEED_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct SubscriptionInfo {
    pub id: u64,
    pub topic: SubscriptionTopic,
    pub created_at: DateTime<Utc>,
}

/// Fan-out hub: the fabric pump publishes node events, every active
/// subscription filters its own topic off one broadcast feed.
#[derive(Debug)]
pub struct SubscriptionManager {
    next_id: AtomicU64,
    active: DashMap<u64, SubscriptionInfo>,
    sender: broadcast::Sender<(SubscriptionTopic, SubscriptionEvent)>,
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            next_id: AtomicU64::new(0),
            active: DashMap::new(),
            sender,
        }
    }
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, topic: SubscriptionTopic, event: SubscriptionEvent) {
        // Send errors only mean nobody is subscribed right now.
        let _ = self.sender.send((topic, event));
    }

    pub fn feed(&self) -> broadcast::Receiver<(SubscriptionTopic, SubscriptionEvent)> {
        self.sender.subscribe()
    }

    pub fn track(&self, topic: SubscriptionTopic) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.active.insert(
            id,
            SubscriptionInfo {
                id,
                topic,
                created_at: Utc::now(),
            },
        );
        id
    }

    pub fn untrack(&self, id: u64) {
        self.active.remove(&id);
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}
