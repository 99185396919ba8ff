//! AMM pool state, LP positions, and liquidity event history rows.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::error::{ExchangeResult, FatalError};

/// The authoritative constant-product pool row, also held in memory as the
/// engine's atomic snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolState {
    pub pool_id: String,
    pub symbol_id: i64,
    pub reserve_base: Decimal,
    pub reserve_quote: Decimal,
    /// `reserve_base * reserve_quote`, recomputed and stored on every mutation.
    pub k: Decimal,
    /// Fee on the input leg, in `[0, 1)`.
    pub fee_rate: Decimal,
    pub total_lp_shares: Decimal,
    pub volume_base: Decimal,
    pub volume_quote: Decimal,
    pub fees_cumulative: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PoolState {
    pub fn is_empty(&self) -> bool {
        self.reserve_base.is_zero() || self.reserve_quote.is_zero()
    }

    /// Instantaneous quote-per-base price.
    pub fn spot_price(&self) -> Option<Decimal> {
        if self.reserve_base.is_zero() {
            None
        } else {
            Some(self.reserve_quote / self.reserve_base)
        }
    }

    /// Cheap post-mutation sanity check. A negative reserve or share count
    /// means engine math went wrong, never user input.
    pub fn assert_invariants(&self) -> ExchangeResult<()> {
        if self.reserve_base < Decimal::ZERO || self.reserve_quote < Decimal::ZERO {
            return Err(FatalError::InvariantViolation(format!(
                "pool {}: negative reserves ({}, {})",
                self.pool_id, self.reserve_base, self.reserve_quote
            ))
            .into());
        }
        if self.total_lp_shares < Decimal::ZERO {
            return Err(FatalError::InvariantViolation(format!(
                "pool {}: negative total_lp_shares {}",
                self.pool_id, self.total_lp_shares
            ))
            .into());
        }
        Ok(())
    }
}

/// A user's fungible claim on a pool's reserves.
///
/// `initial_base` / `initial_quote` accumulate the amounts deposited and are
/// informational only (impermanent-loss comparison); `lp_shares` is the
/// authoritative claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LpPosition {
    pub pool_id: String,
    pub user_id: String,
    pub lp_shares: Decimal,
    pub initial_base: Decimal,
    pub initial_quote: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

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
pub enum LiquidityEventKind {
    Add,
    Remove,
}

impl LiquidityEventKind {
    pub fn code(self) -> i16 {
        match self {
            LiquidityEventKind::Add => 0,
            LiquidityEventKind::Remove => 1,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            0 => Some(LiquidityEventKind::Add),
            1 => Some(LiquidityEventKind::Remove),
            _ => None,
        }
    }
}

/// Append-only record of one add/remove liquidity operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidityEvent {
    pub id: i64,
    pub pool_id: String,
    pub user_id: String,
    pub kind: LiquidityEventKind,
    pub base_amount: Decimal,
    pub quote_amount: Decimal,
    pub lp_shares: Decimal,
    pub created_at: DateTime<Utc>,
}
