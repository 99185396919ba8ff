//! Typed events flowing from committed engine operations to the hub.
//!
//! An event is `{channel, symbol?, data}` on the wire. User events carry an
//! internal target id the hub uses for scoping; it never reaches the socket.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_with::{TimestampMilliSeconds, serde_as};
use strum::{Display, EnumString, IntoStaticStr};

use crate::{
    domain::{EngineKind, Side, balance::Balance},
    engine::book::DepthSnapshot,
};

#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    IntoStaticStr,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Pool,
    Orderbook,
    User,
    Trade,
    Alert,
}

impl ChannelKind {
    /// Whether clients may subscribe over the WebSocket. The alert channel
    /// is operational-only.
    pub fn subscribable(self) -> bool {
        !matches!(self, ChannelKind::Alert)
    }

    /// Whether a subscription to this channel names a symbol.
    pub fn takes_symbol(self) -> bool {
        matches!(self, ChannelKind::Pool | ChannelKind::Orderbook)
    }
}

/// A client subscription: channel kind plus symbol for per-symbol channels.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelKey {
    pub kind: ChannelKind,
    pub symbol: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub channel: ChannelKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    /// Scoping target for user events; not serialized.
    #[serde(skip)]
    pub user_id: Option<String>,
    pub data: serde_json::Value,
}

impl Event {
    pub fn pool(symbol: &str, data: &PoolEventData) -> Self {
        Self {
            channel: ChannelKind::Pool,
            symbol: Some(symbol.to_string()),
            user_id: None,
            data: serde_json::to_value(data).unwrap_or_default(),
        }
    }

    pub fn orderbook(symbol: &str, data: &OrderbookEventData) -> Self {
        Self {
            channel: ChannelKind::Orderbook,
            symbol: Some(symbol.to_string()),
            user_id: None,
            data: serde_json::to_value(data).unwrap_or_default(),
        }
    }

    pub fn user(user_id: &str, data: &UserEventData) -> Self {
        Self {
            channel: ChannelKind::User,
            symbol: None,
            user_id: Some(user_id.to_string()),
            data: serde_json::to_value(data).unwrap_or_default(),
        }
    }

    pub fn trade(tick: &TradeTick) -> Self {
        Self {
            channel: ChannelKind::Trade,
            symbol: Some(tick.symbol.clone()),
            user_id: None,
            data: serde_json::to_value(tick).unwrap_or_default(),
        }
    }

    pub fn alert(symbol: &str, message: &str) -> Self {
        Self {
            channel: ChannelKind::Alert,
            symbol: Some(symbol.to_string()),
            user_id: None,
            data: serde_json::json!({ "symbol": symbol, "message": message }),
        }
    }

    /// The subscription key this event is delivered under.
    pub fn key(&self) -> ChannelKey {
        ChannelKey {
            kind: self.channel,
            symbol: if self.channel.takes_symbol() {
                self.symbol.clone()
            } else {
                None
            },
        }
    }
}

/// Public per-trade tick; no user identities. Timestamps go out as epoch
/// milliseconds, matching the trade/order id space.
#[serde_as]
#[derive(Debug, Clone, Serialize)]
pub struct TradeTick {
    pub symbol: String,
    pub engine: EngineKind,
    pub side: Side,
    pub price: Decimal,
    pub quantity: Decimal,
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolEventData {
    pub pool_id: String,
    pub symbol: String,
    pub reserve_base: Decimal,
    pub reserve_quote: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
    pub total_lp_shares: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trade: Option<TradeTick>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderbookEventData {
    pub symbol: String,
    #[serde(flatten)]
    pub depth: DepthSnapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct BalanceView {
    pub currency: String,
    pub available: Decimal,
    pub locked: Decimal,
    pub balance: Decimal,
}

impl From<&Balance> for BalanceView {
    fn from(b: &Balance) -> Self {
        Self {
            currency: b.currency.clone(),
            available: b.available,
            locked: b.locked,
            balance: b.balance(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LpPositionView {
    pub pool_id: String,
    pub symbol: String,
    pub lp_shares: Decimal,
    pub share_of_pool: Decimal,
    pub value_base: Decimal,
    pub value_quote: Decimal,
    pub initial_base: Decimal,
    pub initial_quote: Decimal,
}

/// Balance refresh for the acting user, with the pool position section when
/// the operation touched one.
#[derive(Debug, Clone, Serialize)]
pub struct UserEventData {
    pub balances: Vec<BalanceView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_user: Option<LpPositionView>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_target_never_serializes() {
        let event = Event::user(
            "100001",
            &UserEventData {
                balances: vec![],
                pool_user: None,
            },
        );
        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("user_id").is_none());
        assert_eq!(json["channel"], "user");
    }

    #[test]
    fn per_symbol_channels_key_on_symbol() {
        let tick = TradeTick {
            symbol: "AMM/USDT-USDT:SPOT".to_string(),
            engine: EngineKind::Amm,
            side: Side::Buy,
            price: Decimal::TEN,
            quantity: Decimal::ONE,
            created_at: Utc::now(),
        };
        let pool_key = Event::pool(
            "AMM/USDT-USDT:SPOT",
            &PoolEventData {
                pool_id: "0x00".to_string(),
                symbol: "AMM/USDT-USDT:SPOT".to_string(),
                reserve_base: Decimal::ONE,
                reserve_quote: Decimal::TEN,
                price: Some(Decimal::TEN),
                total_lp_shares: Decimal::ONE,
                trade: None,
            },
        )
        .key();
        assert_eq!(pool_key.kind, ChannelKind::Pool);
        assert_eq!(pool_key.symbol.as_deref(), Some("AMM/USDT-USDT:SPOT"));

        // The firehose aggregates across symbols: key has no symbol even
        // though events carry one.
        let trade_key = Event::trade(&tick).key();
        assert_eq!(trade_key.kind, ChannelKind::Trade);
        assert!(trade_key.symbol.is_none());
    }
}
