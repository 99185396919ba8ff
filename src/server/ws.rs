//! WebSocket endpoint.
//!
//! Upgrade at `/ws?token=…`; the token is optional and only gates the user
//! channel. Client frames are `{action: "subscribe"|"unsubscribe", channel,
//! symbol?}`; server frames are `{channel, symbol?, data}`. A successful
//! (re)subscribe is treated as a full refresh: a synthesized snapshot event
//! is queued before any live updates.
//!
//! Client reconnect contract: exponential backoff starting at 1 s, capped at
//! 30 s, re-sending all subscriptions after reconnect.

use std::{str::FromStr, sync::Arc};

use axum::{
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;

use crate::{
    domain::symbol,
    engine::binding::EngineHandle,
    engine::router::DEFAULT_DEPTH_LEVELS,
    events::{ChannelKey, ChannelKind, Event, OrderbookEventData, PoolEventData, UserEventData},
    hub::ClientHandle,
    server::AppState,
    store,
};

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClientFrame {
    action: String,
    channel: String,
    symbol: Option<String>,
}

pub async fn upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    // Token validated on upgrade; a bad token still gets a connection, just
    // an unauthenticated one.
    let user_id = match &query.token {
        Some(token) => store::users::by_token(state.store.pool(), token)
            .await
            .ok()
            .flatten()
            .map(|u| u.id),
        None => None,
    };
    ws.on_upgrade(move |socket| handle_socket(state, socket, user_id))
}

async fn handle_socket(state: AppState, socket: WebSocket, user_id: Option<String>) {
    let client = state.hub.register(user_id);
    let (mut sink, mut stream) = socket.split();

    // Single writer per connection: frames reach the socket in queue order,
    // each under the per-write deadline.
    let writer = {
        let client = client.clone();
        let write_timeout = state.hub.config().write_timeout;
        tokio::spawn(async move {
            loop {
                let events = client.drain();
                if events.is_empty() {
                    client.wait().await;
                    continue;
                }
                for event in events {
                    let Ok(text) = serde_json::to_string(&event) else {
                        continue;
                    };
                    match tokio::time::timeout(write_timeout, sink.send(Message::Text(text))).await
                    {
                        Ok(Ok(())) => {}
                        // Write deadline exceeded or socket gone: close.
                        _ => return,
                    }
                }
            }
        })
    };

    while let Some(Ok(message)) = stream.next().await {
        match message {
            Message::Text(text) => {
                if let Ok(frame) = serde_json::from_str::<ClientFrame>(&text) {
                    handle_frame(&state, &client, frame).await;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    writer.abort();
    state.hub.unregister(client.id());
    tracing::debug!(client_id = client.id(), "Connection closed");
}

async fn handle_frame(state: &AppState, client: &Arc<ClientHandle>, frame: ClientFrame) {
    let Ok(kind) = ChannelKind::from_str(&frame.channel.to_lowercase()) else {
        push_error(client, &frame.channel, "unknown channel");
        return;
    };
    if !kind.subscribable() {
        push_error(client, &frame.channel, "channel not subscribable");
        return;
    }
    if kind == ChannelKind::User && !client.is_authenticated() {
        push_error(client, &frame.channel, "user channel requires authentication");
        return;
    }

    let symbol = match (&frame.symbol, kind.takes_symbol()) {
        (Some(raw), true) => match symbol::canonicalize(raw) {
            Ok(canonical) => Some(canonical),
            Err(_) => {
                push_error(client, &frame.channel, "invalid symbol");
                return;
            }
        },
        (None, true) => {
            push_error(client, &frame.channel, "channel requires a symbol");
            return;
        }
        _ => None,
    };
    let key = ChannelKey { kind, symbol };

    match frame.action.as_str() {
        "subscribe" => {
            // Idempotent; every subscribe re-sends the snapshot as a full
            // refresh.
            client.subscribe(key.clone());
            send_snapshot(state, client, &key).await;
        }
        "unsubscribe" => client.unsubscribe(&key),
        other => push_error(client, &frame.channel, &format!("unknown action '{other}'")),
    }
}

/// Queues a synthesized current-state event ahead of live updates.
async fn send_snapshot(state: &AppState, client: &Arc<ClientHandle>, key: &ChannelKey) {
    match key.kind {
        ChannelKind::Pool | ChannelKind::Orderbook => {
            let Some(symbol) = &key.symbol else { return };
            let Ok(binding) = state.router.cache().resolve(symbol).await else {
                return;
            };
            match (&binding.engine, key.kind) {
                (EngineHandle::Amm(engine), ChannelKind::Pool) => {
                    let pool = engine.snapshot();
                    client.push(Event::pool(
                        symbol,
                        &PoolEventData {
                            pool_id: pool.pool_id.clone(),
                            symbol: symbol.clone(),
                            reserve_base: pool.reserve_base,
                            reserve_quote: pool.reserve_quote,
                            price: pool.spot_price(),
                            total_lp_shares: pool.total_lp_shares,
                            trade: None,
                        },
                    ));
                }
                (EngineHandle::Clob(engine), ChannelKind::Orderbook) => {
                    client.push(Event::orderbook(
                        symbol,
                        &OrderbookEventData {
                            symbol: symbol.clone(),
                            depth: engine.depth(DEFAULT_DEPTH_LEVELS),
                        },
                    ));
                }
                _ => {}
            }
        }
        ChannelKind::User => {
            let Some(user_id) = client.user_id() else { return };
            if let Ok(balances) = state.router.user_balances(user_id).await {
                client.push(Event::user(
                    user_id,
                    &UserEventData {
                        balances,
                        pool_user: None,
                    },
                ));
            }
        }
        ChannelKind::Trade | ChannelKind::Alert => {}
    }
}

fn push_error(client: &Arc<ClientHandle>, channel: &str, message: &str) {
    client.push(Event {
        channel: ChannelKind::Alert,
        symbol: None,
        user_id: None,
        data: json!({ "error": message, "channel": channel }),
    });
}
