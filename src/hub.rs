//! WebSocket hub.
//!
//! Consumes the bus and fans events out to subscribed clients. Each client
//! owns a bounded outbound queue with bounded-latest overflow: a full queue
//! drops its oldest pending message on the same channel (oldest overall as a
//! fallback) before accepting the new one, so slow consumers lose stale
//! updates instead of stalling producers. One writer task per connection
//! drains the queue to the socket in order.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use crate::events::{ChannelKind, Event};

pub mod client;

pub use client::ClientHandle;

#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Per-client outbound queue capacity.
    pub queue_capacity: usize,
    /// Per-write socket deadline.
    pub write_timeout: std::time::Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            write_timeout: std::time::Duration::from_secs(10),
        }
    }
}

pub struct Hub {
    clients: DashMap<u64, Arc<ClientHandle>>,
    next_id: AtomicU64,
    cfg: HubConfig,
}

impl Hub {
    pub fn new(cfg: HubConfig) -> Arc<Self> {
        Arc::new(Self {
            clients: DashMap::new(),
            next_id: AtomicU64::new(1),
            cfg,
        })
    }

    pub fn config(&self) -> &HubConfig {
        &self.cfg
    }

    /// Registers a connection; `user_id` is set iff the upgrade carried a
    /// valid token.
    pub fn register(&self, user_id: Option<String>) -> Arc<ClientHandle> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let client = Arc::new(ClientHandle::new(id, user_id, self.cfg.queue_capacity));
        self.clients.insert(id, client.clone());
        tracing::debug!(client_id = id, clients = self.clients.len(), "Client registered");
        client
    }

    pub fn unregister(&self, client_id: u64) {
        self.clients.remove(&client_id);
        tracing::debug!(client_id, clients = self.clients.len(), "Client unregistered");
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Drains the bus until shutdown, pushing each event to its subscribers.
    pub async fn run(
        self: Arc<Self>,
        rx: async_channel::Receiver<Event>,
        cancel: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                event = rx.recv() => match event {
                    Ok(event) => event,
                    Err(_) => break,
                },
                _ = cancel.cancelled() => break,
            };
            self.dispatch(&event);
        }
        tracing::info!("Hub stopped");
    }

    fn dispatch(&self, event: &Event) {
        if event.channel == ChannelKind::Alert {
            // Operational channel: surfaced in logs, never fanned out.
            tracing::error!(
                symbol = event.symbol.as_deref().unwrap_or(""),
                data = %event.data,
                "Operational alert"
            );
            return;
        }
        for entry in self.clients.iter() {
            let client = entry.value();
            if client.wants(event) {
                client.push(event.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::events::{ChannelKey, ChannelKind};

    fn pool_event(symbol: &str, seq: i64) -> Event {
        Event {
            channel: ChannelKind::Pool,
            symbol: Some(symbol.to_string()),
            user_id: None,
            data: json!({ "seq": seq }),
        }
    }

    fn user_event(user: &str) -> Event {
        Event {
            channel: ChannelKind::User,
            symbol: None,
            user_id: Some(user.to_string()),
            data: json!({}),
        }
    }

    fn subscribe_pool(client: &ClientHandle, symbol: &str) {
        client.subscribe(ChannelKey {
            kind: ChannelKind::Pool,
            symbol: Some(symbol.to_string()),
        });
    }

    /// Two subscribers to the same pool channel both receive the event, in
    /// commit order.
    #[tokio::test]
    async fn fan_out_reaches_all_subscribers_in_order() {
        let hub = Hub::new(HubConfig::default());
        let a = hub.register(None);
        let b = hub.register(None);
        subscribe_pool(&a, "AMM/USDT-USDT:SPOT");
        subscribe_pool(&b, "AMM/USDT-USDT:SPOT");

        hub.dispatch(&pool_event("AMM/USDT-USDT:SPOT", 1));
        hub.dispatch(&pool_event("AMM/USDT-USDT:SPOT", 2));

        for client in [&a, &b] {
            let drained = client.drain();
            assert_eq!(drained.len(), 2);
            assert_eq!(drained[0].data["seq"], 1);
            assert_eq!(drained[1].data["seq"], 2);
        }
    }

    #[tokio::test]
    async fn unsubscribed_clients_receive_nothing() {
        let hub = Hub::new(HubConfig::default());
        let a = hub.register(None);
        subscribe_pool(&a, "AMM/USDT-USDT:SPOT");

        hub.dispatch(&pool_event("ORDER/USDT-USDT:SPOT", 1));
        assert!(a.drain().is_empty());
    }

    /// User events are scoped to the connected user.
    #[tokio::test]
    async fn user_events_are_scoped() {
        let hub = Hub::new(HubConfig::default());
        let mine = hub.register(Some("100001".to_string()));
        let other = hub.register(Some("100002".to_string()));
        let anon = hub.register(None);
        for client in [&mine, &other, &anon] {
            client.subscribe(ChannelKey {
                kind: ChannelKind::User,
                symbol: None,
            });
        }

        hub.dispatch(&user_event("100001"));
        assert_eq!(mine.drain().len(), 1);
        assert!(other.drain().is_empty());
        assert!(anon.drain().is_empty());
    }

    #[tokio::test]
    async fn alerts_never_reach_clients() {
        let hub = Hub::new(HubConfig::default());
        let a = hub.register(None);
        a.subscribe(ChannelKey {
            kind: ChannelKind::Trade,
            symbol: None,
        });
        hub.dispatch(&Event::alert("AMM/USDT-USDT:SPOT", "reserves went negative"));
        assert!(a.drain().is_empty());
    }
}
