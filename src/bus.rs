//! Event bus between the router and the hub.
//!
//! A bounded multi-producer channel. Publication is non-blocking for the
//! producer: when the pipe is saturated the event is dropped and counted,
//! and per-subscriber backpressure is handled downstream by the hub.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use crate::events::Event;

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: async_channel::Sender<Event>,
    dropped: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new(capacity: usize) -> (Self, async_channel::Receiver<Event>) {
        let (tx, rx) = async_channel::bounded(capacity);
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// Enqueues without blocking. A saturated pipe drops the event.
    pub fn publish(&self, event: Event) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(async_channel::TrySendError::Full(event)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    channel = %event.channel,
                    symbol = event.symbol.as_deref().unwrap_or(""),
                    "Event bus saturated, dropping event"
                );
            }
            Err(async_channel::TrySendError::Closed(event)) => {
                tracing::debug!(channel = %event.channel, "Event bus closed, dropping event");
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ChannelKind, Event};

    fn make_event() -> Event {
        Event {
            channel: ChannelKind::Trade,
            symbol: Some("AMM/USDT-USDT:SPOT".to_string()),
            user_id: None,
            data: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn publish_never_blocks_when_full() {
        let (bus, rx) = EventBus::new(2);
        bus.publish(make_event());
        bus.publish(make_event());
        // Third publish hits a full pipe and returns immediately.
        bus.publish(make_event());
        assert_eq!(bus.dropped(), 1);
        assert_eq!(rx.len(), 2);
    }

    #[tokio::test]
    async fn events_arrive_in_publish_order() {
        let (bus, rx) = EventBus::new(8);
        for i in 0..3 {
            let mut event = make_event();
            event.data = serde_json::json!({ "seq": i });
            bus.publish(event);
        }
        for i in 0..3 {
            let event = rx.recv().await.unwrap();
            assert_eq!(event.data["seq"], i);
        }
    }
}
