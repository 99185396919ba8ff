//! Per-connection state: subscriptions, the bounded outbound queue, and the
//! overflow counter.

use std::{
    collections::{HashSet, VecDeque},
    sync::atomic::{AtomicU64, Ordering},
};

use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;

use crate::events::{ChannelKey, ChannelKind, Event};

pub struct ClientHandle {
    id: u64,
    /// Set iff the connection authenticated on upgrade.
    user_id: Option<String>,
    subscriptions: RwLock<HashSet<ChannelKey>>,
    queue: Mutex<VecDeque<Event>>,
    notify: Notify,
    overflow: AtomicU64,
    capacity: usize,
}

impl ClientHandle {
    pub(super) fn new(id: u64, user_id: Option<String>, capacity: usize) -> Self {
        Self {
            id,
            user_id,
            subscriptions: RwLock::new(HashSet::new()),
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            notify: Notify::new(),
            overflow: AtomicU64::new(0),
            capacity,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_id.is_some()
    }

    /// Idempotent; returns whether the subscription was newly added.
    pub fn subscribe(&self, key: ChannelKey) -> bool {
        self.subscriptions.write().insert(key)
    }

    /// Idempotent.
    pub fn unsubscribe(&self, key: &ChannelKey) {
        self.subscriptions.write().remove(key);
    }

    /// Whether this client should receive the event: the subscription must
    /// match, and user events only reach the event's target user.
    pub fn wants(&self, event: &Event) -> bool {
        if event.channel == ChannelKind::User
            && (self.user_id.is_none() || self.user_id.as_deref() != event.user_id.as_deref())
        {
            return false;
        }
        self.subscriptions.read().contains(&event.key())
    }

    /// Bounded-latest enqueue: a full queue evicts its oldest message on the
    /// same channel, or the oldest overall when none matches, and counts the
    /// overflow.
    pub fn push(&self, event: Event) {
        let mut queue = self.queue.lock();
        if queue.len() >= self.capacity {
            let key = event.key();
            let victim = queue
                .iter()
                .position(|pending| pending.key() == key)
                .unwrap_or(0);
            queue.remove(victim);
            self.overflow.fetch_add(1, Ordering::Relaxed);
        }
        queue.push_back(event);
        drop(queue);
        self.notify.notify_one();
    }

    /// Takes everything currently queued, preserving order.
    pub fn drain(&self) -> Vec<Event> {
        self.queue.lock().drain(..).collect()
    }

    /// Waits until at least one message is (or becomes) available.
    pub async fn wait(&self) {
        self.notify.notified().await;
    }

    pub fn overflow_count(&self) -> u64 {
        self.overflow.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn event(kind: ChannelKind, symbol: Option<&str>, seq: i64) -> Event {
        Event {
            channel: kind,
            symbol: symbol.map(str::to_string),
            user_id: None,
            data: json!({ "seq": seq }),
        }
    }

    #[test]
    fn subscribe_is_idempotent() {
        let client = ClientHandle::new(1, None, 8);
        let key = ChannelKey {
            kind: ChannelKind::Trade,
            symbol: None,
        };
        assert!(client.subscribe(key.clone()));
        assert!(!client.subscribe(key.clone()));
        client.unsubscribe(&key);
        client.unsubscribe(&key);
        assert!(client.subscribe(key));
    }

    #[test]
    fn overflow_drops_oldest_of_same_channel() {
        let client = ClientHandle::new(1, None, 2);
        client.push(event(ChannelKind::Pool, Some("A"), 1));
        client.push(event(ChannelKind::Orderbook, Some("B"), 2));
        // Queue full; the new pool event evicts the pending pool event, not
        // the orderbook one.
        client.push(event(ChannelKind::Pool, Some("A"), 3));

        let drained = client.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].channel, ChannelKind::Orderbook);
        assert_eq!(drained[1].data["seq"], 3);
        assert_eq!(client.overflow_count(), 1);
    }

    #[test]
    fn overflow_falls_back_to_oldest_overall() {
        let client = ClientHandle::new(1, None, 2);
        client.push(event(ChannelKind::Pool, Some("A"), 1));
        client.push(event(ChannelKind::Pool, Some("B"), 2));
        client.push(event(ChannelKind::Orderbook, Some("C"), 3));

        let drained = client.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].data["seq"], 2);
        assert_eq!(drained[1].data["seq"], 3);
    }

    #[test]
    fn delivery_preserves_push_order() {
        let client = ClientHandle::new(1, None, 16);
        for seq in 0..5 {
            client.push(event(ChannelKind::Trade, None, seq));
        }
        let seqs: Vec<i64> = client
            .drain()
            .iter()
            .map(|e| e.data["seq"].as_i64().unwrap())
            .collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn push_wakes_a_waiting_writer() {
        let client = std::sync::Arc::new(ClientHandle::new(1, None, 8));
        let waiter = client.clone();
        let task = tokio::spawn(async move {
            waiter.wait().await;
            waiter.drain().len()
        });
        // Give the writer a chance to park first.
        tokio::task::yield_now().await;
        client.push(event(ChannelKind::Trade, None, 1));
        assert_eq!(task.await.unwrap(), 1);
    }
}
