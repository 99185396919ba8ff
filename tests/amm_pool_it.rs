//! AMM engine flows: first deposit, swaps with fee capture, slippage aborts,
//! and mint/burn round trips, all against pool snapshots.

use chrono::Utc;
use rust_decimal::{Decimal, MathematicalOps};
use rust_decimal_macros::dec;

use vega_exchange::{
    domain::{Side, pool::PoolState},
    engine::amm::{
        MIN_LP_SHARES, SwapTarget, apply_add_liquidity, apply_remove_liquidity, apply_swap,
        check_slippage, plan_add_liquidity, plan_remove_liquidity, quote_swap,
    },
    error::ExchangeError,
};

fn empty_pool() -> PoolState {
    let now = Utc::now();
    PoolState {
        pool_id: "0xfeedfacefeedfacefeedfacefeedfacefeedface".to_string(),
        symbol_id: 1,
        reserve_base: Decimal::ZERO,
        reserve_quote: Decimal::ZERO,
        k: Decimal::ZERO,
        fee_rate: dec!(0.003),
        total_lp_shares: Decimal::ZERO,
        volume_base: Decimal::ZERO,
        volume_quote: Decimal::ZERO,
        fees_cumulative: Decimal::ZERO,
        created_at: now,
        updated_at: now,
    }
}

/// Empty AMM/USDT pool seeded with base=100, quote=1000.
fn seeded_pool() -> PoolState {
    let pool = empty_pool();
    let plan = plan_add_liquidity(&pool, dec!(100), dec!(1000)).unwrap();
    apply_add_liquidity(&pool, &plan, Utc::now()).unwrap()
}

#[test]
fn first_deposit_seeds_price_and_shares() {
    let pool = empty_pool();
    let plan = plan_add_liquidity(&pool, dec!(100), dec!(1000)).unwrap();

    // sqrt(100 * 1000) minus the permanent floor.
    let expected = dec!(100000).sqrt().unwrap() - MIN_LP_SHARES;
    assert_eq!(plan.shares_minted, expected);

    let pool = apply_add_liquidity(&pool, &plan, Utc::now()).unwrap();
    assert_eq!(pool.reserve_base, dec!(100));
    assert_eq!(pool.reserve_quote, dec!(1000));
    assert_eq!(pool.k, dec!(100000));
    assert_eq!(pool.spot_price().unwrap(), dec!(10));
}

#[test]
fn buy_swap_moves_reserves_and_captures_fee() {
    let pool = seeded_pool();
    let user_quote_before = dec!(200);

    let quote = quote_swap(&pool, Side::Buy, SwapTarget::ExactQuote(dec!(100))).unwrap();
    let pool = apply_swap(&pool, &quote, Utc::now()).unwrap();

    // Effective input 99.7; base out = 100 * 99.7 / 1099.7.
    assert_eq!(quote.amount_in_effective, dec!(99.7));
    assert_eq!(quote.amount_out.round_dp(9), dec!(9.066108939));

    // Ledger deltas the router applies: gross input out, net output in.
    let user_quote_after = user_quote_before - quote.amount_in;
    assert_eq!(user_quote_after, dec!(100));

    assert_eq!(pool.reserve_quote, dec!(1099.7));
    assert_eq!(pool.reserve_base, dec!(100) - quote.amount_out);
    assert_eq!(pool.fees_cumulative, dec!(0.3));
}

#[test]
fn slippage_abort_leaves_pool_untouched() {
    let pool = seeded_pool();
    let before = pool.clone();

    let quote = quote_swap(&pool, Side::Buy, SwapTarget::ExactQuote(dec!(100))).unwrap();
    let err = check_slippage(&quote, Some(dec!(9.1))).unwrap_err();
    assert!(matches!(err, ExchangeError::State(_)));

    // Nothing was applied.
    assert_eq!(pool.reserve_base, before.reserve_base);
    assert_eq!(pool.reserve_quote, before.reserve_quote);
    assert_eq!(pool.fees_cumulative, before.fees_cumulative);
}

/// Reserves stay positive and k never shrinks across an alternating swap
/// sequence; cumulative fees only grow.
#[test]
fn k_monotone_over_long_sequences() {
    let mut pool = seeded_pool();
    let mut last_fees = Decimal::ZERO;

    for round in 1..=50u32 {
        let (side, target) = if round % 2 == 0 {
            (Side::Buy, SwapTarget::ExactQuote(Decimal::from(round)))
        } else {
            (
                Side::Sell,
                SwapTarget::ExactBase(Decimal::from(round) / dec!(17)),
            )
        };
        let k_before = pool.k;
        let quote = quote_swap(&pool, side, target).unwrap();
        pool = apply_swap(&pool, &quote, Utc::now()).unwrap();

        assert!(pool.reserve_base > Decimal::ZERO);
        assert!(pool.reserve_quote > Decimal::ZERO);
        assert!(pool.k >= k_before);
        assert!(pool.fees_cumulative > last_fees);
        last_fees = pool.fees_cumulative;
    }
}

#[test]
fn quotes_are_stable_on_one_snapshot() {
    let pool = seeded_pool();
    let first = quote_swap(&pool, Side::Sell, SwapTarget::ExactBase(dec!(3.21))).unwrap();
    let second = quote_swap(&pool, Side::Sell, SwapTarget::ExactBase(dec!(3.21))).unwrap();
    assert_eq!(first.amount_out, second.amount_out);
    assert_eq!(first.price_impact, second.price_impact);
}

#[test]
fn mint_then_burn_returns_deposit_within_floor_dust() {
    let pool = empty_pool();
    let plan = plan_add_liquidity(&pool, dec!(250), dec!(4000)).unwrap();
    let pool = apply_add_liquidity(&pool, &plan, Utc::now()).unwrap();

    let burn = plan_remove_liquidity(&pool, plan.shares_minted, plan.shares_minted).unwrap();
    let pool = apply_remove_liquidity(&pool, &burn, Utc::now()).unwrap();

    let dust = dec!(0.000001);
    assert!(dec!(250) - burn.base_out < dust);
    assert!(dec!(4000) - burn.quote_out < dust);
    assert_eq!(pool.total_lp_shares, MIN_LP_SHARES);
}

#[test]
fn disproportionate_deposit_mints_on_limiting_side() {
    let pool = seeded_pool();
    let total_before = pool.total_lp_shares;

    // Base side limits: 1% of reserves.
    let plan = plan_add_liquidity(&pool, dec!(1), dec!(999)).unwrap();
    assert_eq!(plan.base_in, dec!(1));
    assert_eq!(plan.quote_in, dec!(10));
    assert_eq!(plan.refund_quote, dec!(989));
    assert_eq!(plan.shares_minted, dec!(0.01) * total_before);

    let pool = apply_add_liquidity(&pool, &plan, Utc::now()).unwrap();
    // Ratio is preserved, so the spot price is unchanged.
    assert_eq!(pool.spot_price().unwrap(), dec!(10));
}

#[test]
fn inverse_quotes_cover_fee_gross_up() {
    let pool = seeded_pool();
    let quote = quote_swap(&pool, Side::Buy, SwapTarget::ExactBase(dec!(5))).unwrap();

    // Paying the quoted gross input through the forward path must yield at
    // least the requested output.
    let forward = quote_swap(&pool, Side::Buy, SwapTarget::ExactQuote(quote.amount_in)).unwrap();
    assert!(forward.amount_out >= dec!(5) - dec!(0.000000000001));
}
