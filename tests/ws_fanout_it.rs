//! Bus → hub fan-out: committed events reach every subscriber of the
//! channel, in commit order, with bounded-latest backpressure per client.

use std::time::Duration;

use rust_decimal_macros::dec;
use tokio_util::sync::CancellationToken;

use vega_exchange::{
    bus::EventBus,
    events::{ChannelKey, ChannelKind, Event, PoolEventData},
    hub::{Hub, HubConfig},
};

const SYMBOL: &str = "AMM/USDT-USDT:SPOT";

fn pool_event(seq: u32) -> Event {
    let mut event = Event::pool(
        SYMBOL,
        &PoolEventData {
            pool_id: "0xfeedfacefeedfacefeedfacefeedfacefeedface".to_string(),
            symbol: SYMBOL.to_string(),
            reserve_base: dec!(100) - rust_decimal::Decimal::from(seq),
            reserve_quote: dec!(1000),
            price: Some(dec!(10)),
            total_lp_shares: dec!(316),
            trade: None,
        },
    );
    event.data["seq"] = serde_json::json!(seq);
    event
}

async fn drain_until(
    client: &vega_exchange::hub::ClientHandle,
    expected: usize,
) -> Vec<Event> {
    let mut collected = Vec::new();
    for _ in 0..200 {
        collected.extend(client.drain());
        if collected.len() >= expected {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    collected
}

/// Two clients subscribed to the same pool channel both observe the commit
/// sequence, in order.
#[tokio::test]
async fn both_subscribers_see_commit_order() {
    let (bus, rx) = EventBus::new(64);
    let hub = Hub::new(HubConfig::default());
    let cancel = CancellationToken::new();
    let runner = tokio::spawn(hub.clone().run(rx, cancel.clone()));

    let key = ChannelKey {
        kind: ChannelKind::Pool,
        symbol: Some(SYMBOL.to_string()),
    };
    let a = hub.register(None);
    let b = hub.register(None);
    a.subscribe(key.clone());
    b.subscribe(key);

    for seq in 1..=4 {
        bus.publish(pool_event(seq));
    }

    for client in [&a, &b] {
        let events = drain_until(client.as_ref(), 4).await;
        assert_eq!(events.len(), 4);
        let seqs: Vec<u64> = events
            .iter()
            .map(|e| e.data["seq"].as_u64().unwrap())
            .collect();
        assert_eq!(seqs, vec![1, 2, 3, 4]);
        assert!(events.iter().all(|e| e.symbol.as_deref() == Some(SYMBOL)));
    }

    cancel.cancel();
    let _ = runner.await;
}

/// A slow client's queue keeps the newest events and counts the overflow;
/// other clients are unaffected.
#[tokio::test]
async fn saturated_client_drops_oldest_same_channel() {
    let (bus, rx) = EventBus::new(64);
    let hub = Hub::new(HubConfig {
        queue_capacity: 4,
        write_timeout: Duration::from_secs(10),
    });
    let cancel = CancellationToken::new();
    let runner = tokio::spawn(hub.clone().run(rx, cancel.clone()));

    let slow = hub.register(None);
    slow.subscribe(ChannelKey {
        kind: ChannelKind::Pool,
        symbol: Some(SYMBOL.to_string()),
    });

    for seq in 1..=10 {
        bus.publish(pool_event(seq));
    }
    // Let the hub drain the pipe into the client queue.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let events = slow.drain();
    assert_eq!(events.len(), 4);
    let seqs: Vec<u64> = events
        .iter()
        .map(|e| e.data["seq"].as_u64().unwrap())
        .collect();
    // Bounded-latest: only the tail of the sequence survives, still in order.
    assert_eq!(seqs, vec![7, 8, 9, 10]);
    assert_eq!(slow.overflow_count(), 6);

    cancel.cancel();
    let _ = runner.await;
}

/// Publication never blocks the producer, even with no subscribers at all.
#[tokio::test]
async fn publish_is_non_blocking_without_consumers() {
    let (bus, _rx) = EventBus::new(2);
    for seq in 0..10 {
        bus.publish(pool_event(seq));
    }
    assert_eq!(bus.dropped(), 8);
}
