//! Trade rows. Append-only: a trade is written once at commit and never
//! mutated afterwards.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::domain::{EngineKind, Side};

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
pub enum TradeStatus {
    Filled,
}

impl TradeStatus {
    pub fn code(self) -> i16 {
        match self {
            TradeStatus::Filled => 0,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            0 => Some(TradeStatus::Filled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: i64,
    pub symbol_id: i64,
    /// The taker.
    pub user_id: String,
    pub side: Side,
    pub engine: EngineKind,
    pub price: Decimal,
    /// Base quantity of the trade.
    pub quantity: Decimal,
    /// `price * quantity`, truncated at the symbol's quantity precision.
    pub quote_amount: Decimal,
    pub fee_amount: Decimal,
    pub fee_asset: String,
    pub status: TradeStatus,
    /// The maker's user id for CLOB trades; absent for AMM swaps.
    pub counterparty: Option<String>,
    /// Engine-specific opaque payload (e.g. post-swap reserves, maker order id).
    pub engine_data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
