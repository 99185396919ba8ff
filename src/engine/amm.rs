//! Constant-product AMM engine.
//!
//! Swap math follows x·y = k with the fee charged on the input leg: the fee
//! is captured in the pool's cumulative fee counter and only the effective
//! input (`input · (1 − f)`) enters the reserve. Outputs are truncated at the
//! store scale, so the recomputed `k` never shrinks across a swap.
//!
//! All planning functions are pure: they read a [`PoolState`] snapshot and
//! return either a quote or a next-state value. The router applies the next
//! state to the engine only after the surrounding transaction commits.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::{Decimal, MathematicalOps};
use serde::Serialize;

use crate::{
    domain::{Side, pool::PoolState},
    error::{ExchangeResult, FatalError, StateError},
    num,
};

/// Permanent share floor locked into a pool on first deposit.
pub const MIN_LP_SHARES: Decimal = Decimal::from_parts(1, 0, 0, false, 9); // 1e-9

/// What the caller fixes when asking for a swap quote.
///
/// Which of the two is the input leg depends on the side: a buy pays quote,
/// a sell pays base. Fixing the opposite leg quotes in inverse mode (the
/// required input for a desired output).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapTarget {
    ExactBase(Decimal),
    ExactQuote(Decimal),
}

/// A fully-resolved swap intent. Pure data; applying it to the pool and the
/// ledger is the router's job.
#[derive(Debug, Clone, Serialize)]
pub struct SwapQuote {
    pub side: Side,
    /// Gross input debited from the caller, in the input asset.
    pub amount_in: Decimal,
    /// `amount_in * fee_rate`, in the input asset.
    pub fee_amount: Decimal,
    /// `amount_in - fee_amount`; the portion that enters the reserve.
    pub amount_in_effective: Decimal,
    /// Net output credited to the caller, in the output asset.
    pub amount_out: Decimal,
    /// Quote per base at execution.
    pub execution_price: Decimal,
    /// Quote per base before the swap.
    pub spot_price: Decimal,
    /// `|execution_price - spot_price| / spot_price`.
    pub price_impact: Decimal,
    pub new_reserve_base: Decimal,
    pub new_reserve_quote: Decimal,
}

impl SwapQuote {
    /// Base leg of the swap (the trade row's `quantity`).
    pub fn base_amount(&self) -> Decimal {
        match self.side {
            Side::Buy => self.amount_out,
            Side::Sell => self.amount_in,
        }
    }

    /// Quote leg of the swap (the trade row's `quote_amount`).
    pub fn quote_amount(&self) -> Decimal {
        match self.side {
            Side::Buy => self.amount_in,
            Side::Sell => self.amount_out,
        }
    }

    /// Asset the fee was charged in (always the input asset).
    pub fn fee_is_quote(&self) -> bool {
        self.side == Side::Buy
    }
}

/// Computes a swap quote against a pool snapshot. Pure; no mutation.
///
/// Fails with `InsufficientLiquidity` when either reserve is zero or the
/// requested output meets or exceeds the opposite reserve.
pub fn quote_swap(pool: &PoolState, side: Side, target: SwapTarget) -> ExchangeResult<SwapQuote> {
    if pool.is_empty() {
        return Err(StateError::InsufficientLiquidity.into());
    }

    let rb = pool.reserve_base;
    let rq = pool.reserve_quote;
    let fee = pool.fee_rate;
    let keep = Decimal::ONE - fee;
    let spot = rq / rb;

    let (amount_in, amount_in_effective, amount_out) = match (side, target) {
        // Forward: caller fixes the input leg.
        (Side::Buy, SwapTarget::ExactQuote(quote_in)) => {
            let quote_in = num::require_positive("quote_amount", quote_in)?;
            let effective = quote_in * keep;
            let base_out = num::to_store_scale(rb * effective / (rq + effective));
            (quote_in, effective, base_out)
        }
        (Side::Sell, SwapTarget::ExactBase(base_in)) => {
            let base_in = num::require_positive("quantity", base_in)?;
            let effective = base_in * keep;
            let quote_out = num::to_store_scale(rq * effective / (rb + effective));
            (base_in, effective, quote_out)
        }
        // Inverse: caller fixes the output leg; solve for the required input
        // and gross up for the fee.
        (Side::Buy, SwapTarget::ExactBase(base_out)) => {
            let base_out = num::require_positive("quantity", base_out)?;
            if base_out >= rb {
                return Err(StateError::InsufficientLiquidity.into());
            }
            let effective = rq * base_out / (rb - base_out);
            let quote_in = effective / keep;
            (quote_in, effective, base_out)
        }
        (Side::Sell, SwapTarget::ExactQuote(quote_out)) => {
            let quote_out = num::require_positive("quote_amount", quote_out)?;
            if quote_out >= rq {
                return Err(StateError::InsufficientLiquidity.into());
            }
            let effective = rb * quote_out / (rq - quote_out);
            let base_in = effective / keep;
            (base_in, effective, quote_out)
        }
    };

    if amount_out <= Decimal::ZERO {
        return Err(StateError::InsufficientLiquidity.into());
    }

    let (base_leg, quote_leg, new_rb, new_rq) = match side {
        Side::Buy => (
            amount_out,
            amount_in,
            rb - amount_out,
            rq + amount_in_effective,
        ),
        Side::Sell => (
            amount_in,
            amount_out,
            rb + amount_in_effective,
            rq - amount_out,
        ),
    };
    if new_rb <= Decimal::ZERO || new_rq <= Decimal::ZERO {
        return Err(StateError::InsufficientLiquidity.into());
    }

    let execution_price = quote_leg / base_leg;
    let price_impact = (execution_price - spot).abs() / spot;

    Ok(SwapQuote {
        side,
        amount_in,
        fee_amount: amount_in * fee,
        amount_in_effective,
        amount_out,
        execution_price,
        spot_price: spot,
        price_impact,
        new_reserve_base: new_rb,
        new_reserve_quote: new_rq,
    })
}

/// Enforces the caller's slippage bound against a computed quote.
pub fn check_slippage(quote: &SwapQuote, min_amount_out: Option<Decimal>) -> ExchangeResult<()> {
    if let Some(min_out) = min_amount_out
        && quote.amount_out < min_out
    {
        return Err(StateError::SlippageExceeded {
            output: quote.amount_out,
            min_output: min_out,
        }
        .into());
    }
    Ok(())
}

/// Next pool state after applying a swap quote. Pure.
pub fn apply_swap(pool: &PoolState, quote: &SwapQuote, at: DateTime<Utc>) -> ExchangeResult<PoolState> {
    let mut next = pool.clone();
    next.reserve_base = quote.new_reserve_base;
    next.reserve_quote = quote.new_reserve_quote;
    next.k = next.reserve_base * next.reserve_quote;
    next.volume_base += quote.base_amount();
    next.volume_quote += quote.quote_amount();
    next.fees_cumulative += quote.fee_amount;
    next.updated_at = at;
    next.assert_invariants()?;

    // Constant-product with output truncation: effective k may only grow.
    if next.k < pool.k {
        return Err(FatalError::InvariantViolation(format!(
            "pool {}: k shrank from {} to {}",
            pool.pool_id, pool.k, next.k
        ))
        .into());
    }
    Ok(next)
}

// ================================================================================================
// Liquidity
// ================================================================================================

/// Resolved add-liquidity intent: accepted amounts, refunds, and shares.
#[derive(Debug, Clone, Serialize)]
pub struct LiquidityPlan {
    /// Base actually taken from the provider.
    pub base_in: Decimal,
    /// Quote actually taken from the provider.
    pub quote_in: Decimal,
    /// One-sided excess over the pool ratio, left untouched in the
    /// provider's balance.
    pub refund_base: Decimal,
    pub refund_quote: Decimal,
    /// Shares credited to the provider.
    pub shares_minted: Decimal,
    /// Permanent floor locked into the pool (first deposit only).
    pub shares_locked: Decimal,
}

/// Required counterpart for a one-sided liquidity quote at the current ratio.
pub fn quote_counterpart(
    pool: &PoolState,
    base_amount: Option<Decimal>,
    quote_amount: Option<Decimal>,
) -> ExchangeResult<(Decimal, Decimal)> {
    if pool.is_empty() {
        // First deposit accepts any positive pair; there is no ratio yet.
        return Err(StateError::InsufficientLiquidity.into());
    }
    match (base_amount, quote_amount) {
        (Some(base), None) => {
            let base = num::require_positive("base_amount", base)?;
            Ok((base, base * pool.reserve_quote / pool.reserve_base))
        }
        (None, Some(quote)) => {
            let quote = num::require_positive("quote_amount", quote)?;
            Ok((quote * pool.reserve_base / pool.reserve_quote, quote))
        }
        _ => Err(crate::error::ValidationError::MissingParameter("base_amount or quote_amount").into()),
    }
}

/// Plans an add-liquidity operation. Pure.
///
/// Empty pool: any positive pair is accepted; `sqrt(base · quote)` shares are
/// minted with [`MIN_LP_SHARES`] permanently locked. Non-empty pool: shares
/// are proportional to the limiting side and the other side's excess is
/// refunded.
pub fn plan_add_liquidity(
    pool: &PoolState,
    base_amount: Decimal,
    quote_amount: Decimal,
) -> ExchangeResult<LiquidityPlan> {
    let base_amount = num::require_positive("base_amount", base_amount)?;
    let quote_amount = num::require_positive("quote_amount", quote_amount)?;

    if pool.total_lp_shares.is_zero() {
        let total = (base_amount * quote_amount)
            .sqrt()
            .ok_or(StateError::InsufficientLiquidity)?;
        if total <= MIN_LP_SHARES {
            return Err(StateError::InsufficientLiquidity.into());
        }
        return Ok(LiquidityPlan {
            base_in: base_amount,
            quote_in: quote_amount,
            refund_base: Decimal::ZERO,
            refund_quote: Decimal::ZERO,
            shares_minted: total - MIN_LP_SHARES,
            shares_locked: MIN_LP_SHARES,
        });
    }

    let base_ratio = base_amount / pool.reserve_base;
    let quote_ratio = quote_amount / pool.reserve_quote;
    let (base_in, quote_in) = if base_ratio <= quote_ratio {
        (base_amount, base_amount * pool.reserve_quote / pool.reserve_base)
    } else {
        (quote_amount * pool.reserve_base / pool.reserve_quote, quote_amount)
    };

    let shares = base_ratio.min(quote_ratio) * pool.total_lp_shares;
    if shares <= Decimal::ZERO {
        return Err(StateError::InsufficientLiquidity.into());
    }

    Ok(LiquidityPlan {
        base_in,
        quote_in,
        refund_base: base_amount - base_in,
        refund_quote: quote_amount - quote_in,
        shares_minted: shares,
        shares_locked: Decimal::ZERO,
    })
}

/// Next pool state after an accepted liquidity deposit. Pure.
pub fn apply_add_liquidity(
    pool: &PoolState,
    plan: &LiquidityPlan,
    at: DateTime<Utc>,
) -> ExchangeResult<PoolState> {
    let mut next = pool.clone();
    next.reserve_base += plan.base_in;
    next.reserve_quote += plan.quote_in;
    next.k = next.reserve_base * next.reserve_quote;
    next.total_lp_shares += plan.shares_minted + plan.shares_locked;
    next.updated_at = at;
    next.assert_invariants()?;
    Ok(next)
}

/// Resolved remove-liquidity intent.
#[derive(Debug, Clone, Serialize)]
pub struct BurnPlan {
    pub shares_burned: Decimal,
    pub base_out: Decimal,
    pub quote_out: Decimal,
}

/// Plans a pro-rata withdrawal of `shares` against the pool. Pure.
pub fn plan_remove_liquidity(
    pool: &PoolState,
    held_shares: Decimal,
    shares: Decimal,
) -> ExchangeResult<BurnPlan> {
    let shares = num::require_positive("lp_shares", shares)?;
    if shares > held_shares {
        return Err(StateError::InsufficientLpShares {
            held: held_shares,
            requested: shares,
        }
        .into());
    }
    if pool.total_lp_shares.is_zero() {
        return Err(StateError::InsufficientLiquidity.into());
    }

    let fraction = shares / pool.total_lp_shares;
    Ok(BurnPlan {
        shares_burned: shares,
        base_out: num::to_store_scale(fraction * pool.reserve_base),
        quote_out: num::to_store_scale(fraction * pool.reserve_quote),
    })
}

/// Next pool state after a burn. Pure.
pub fn apply_remove_liquidity(
    pool: &PoolState,
    plan: &BurnPlan,
    at: DateTime<Utc>,
) -> ExchangeResult<PoolState> {
    let mut next = pool.clone();
    next.reserve_base -= plan.base_out;
    next.reserve_quote -= plan.quote_out;
    next.k = next.reserve_base * next.reserve_quote;
    next.total_lp_shares -= plan.shares_burned;
    next.updated_at = at;
    next.assert_invariants()?;
    Ok(next)
}

// ================================================================================================
// Engine handle
// ================================================================================================

/// Singleton per-symbol AMM handle: the pool snapshot behind a read lock.
///
/// Mutations happen under the router's symbol mutex; `install` swaps in the
/// committed next state, so read-only quotes never observe a half-applied
/// pool.
#[derive(Debug)]
pub struct AmmEngine {
    state: RwLock<PoolState>,
}

impl AmmEngine {
    pub fn new(state: PoolState) -> Self {
        Self {
            state: RwLock::new(state),
        }
    }

    pub fn snapshot(&self) -> PoolState {
        self.state.read().clone()
    }

    /// Installs the committed next state.
    pub fn install(&self, next: PoolState) {
        *self.state.write() = next;
    }
}
