//! AMM pool, LP position, and liquidity event persistence.

use sqlx::{Row, postgres::PgRow};

use crate::{
    domain::pool::{LiquidityEvent, LiquidityEventKind, LpPosition, PoolState},
    error::{ExchangeResult, TransientError},
    store::StoreTx,
};

fn pool_from_row(row: &PgRow) -> ExchangeResult<PoolState> {
    Ok(PoolState {
        pool_id: row.try_get("pool_id")?,
        symbol_id: row.try_get("symbol_id")?,
        reserve_base: row.try_get("reserve_base")?,
        reserve_quote: row.try_get("reserve_quote")?,
        k: row.try_get("k")?,
        fee_rate: row.try_get("fee_rate")?,
        total_lp_shares: row.try_get("total_lp_shares")?,
        volume_base: row.try_get("volume_base")?,
        volume_quote: row.try_get("volume_quote")?,
        fees_cumulative: row.try_get("fees_cumulative")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn position_from_row(row: &PgRow) -> ExchangeResult<LpPosition> {
    Ok(LpPosition {
        pool_id: row.try_get("pool_id")?,
        user_id: row.try_get("user_id")?,
        lp_shares: row.try_get("lp_shares")?,
        initial_base: row.try_get("initial_base")?,
        initial_quote: row.try_get("initial_quote")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub async fn load_by_symbol(
    pool: &sqlx::PgPool,
    symbol_id: i64,
) -> ExchangeResult<Option<PoolState>> {
    let row = sqlx::query("SELECT * FROM amm_pools WHERE symbol_id = $1")
        .bind(symbol_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(pool_from_row).transpose()
}

/// Writes the full pool row; insert-or-replace keyed by `pool_id`.
pub async fn upsert(tx: &mut StoreTx, state: &PoolState) -> ExchangeResult<()> {
    sqlx::query(
        "INSERT INTO amm_pools (pool_id, symbol_id, reserve_base, reserve_quote, k, \
             fee_rate, total_lp_shares, volume_base, volume_quote, fees_cumulative, \
             created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
         ON CONFLICT (pool_id) DO UPDATE SET \
             reserve_base = EXCLUDED.reserve_base, \
             reserve_quote = EXCLUDED.reserve_quote, \
             k = EXCLUDED.k, \
             total_lp_shares = EXCLUDED.total_lp_shares, \
             volume_base = EXCLUDED.volume_base, \
             volume_quote = EXCLUDED.volume_quote, \
             fees_cumulative = EXCLUDED.fees_cumulative, \
             updated_at = EXCLUDED.updated_at",
    )
    .bind(&state.pool_id)
    .bind(state.symbol_id)
    .bind(state.reserve_base)
    .bind(state.reserve_quote)
    .bind(state.k)
    .bind(state.fee_rate)
    .bind(state.total_lp_shares)
    .bind(state.volume_base)
    .bind(state.volume_quote)
    .bind(state.fees_cumulative)
    .bind(state.created_at)
    .bind(state.updated_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub async fn load_position(
    pool: &sqlx::PgPool,
    pool_id: &str,
    user_id: &str,
) -> ExchangeResult<Option<LpPosition>> {
    let row = sqlx::query("SELECT * FROM lp_positions WHERE pool_id = $1 AND user_id = $2")
        .bind(pool_id)
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(position_from_row).transpose()
}

/// Row-locked read inside a mutation; missing position reads as `None`.
pub async fn load_position_for_update(
    tx: &mut StoreTx,
    pool_id: &str,
    user_id: &str,
) -> ExchangeResult<Option<LpPosition>> {
    let row = sqlx::query(
        "SELECT * FROM lp_positions WHERE pool_id = $1 AND user_id = $2 FOR UPDATE",
    )
    .bind(pool_id)
    .bind(user_id)
    .fetch_optional(&mut **tx)
    .await?;
    row.as_ref().map(position_from_row).transpose()
}

pub async fn upsert_position(tx: &mut StoreTx, position: &LpPosition) -> ExchangeResult<()> {
    sqlx::query(
        "INSERT INTO lp_positions (pool_id, user_id, lp_shares, initial_base, \
             initial_quote, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         ON CONFLICT (pool_id, user_id) DO UPDATE SET \
             lp_shares = EXCLUDED.lp_shares, \
             initial_base = EXCLUDED.initial_base, \
             initial_quote = EXCLUDED.initial_quote, \
             updated_at = EXCLUDED.updated_at",
    )
    .bind(&position.pool_id)
    .bind(&position.user_id)
    .bind(position.lp_shares)
    .bind(position.initial_base)
    .bind(position.initial_quote)
    .bind(position.created_at)
    .bind(position.updated_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Prunes an emptied position row.
pub async fn delete_position(
    tx: &mut StoreTx,
    pool_id: &str,
    user_id: &str,
) -> ExchangeResult<()> {
    sqlx::query("DELETE FROM lp_positions WHERE pool_id = $1 AND user_id = $2")
        .bind(pool_id)
        .bind(user_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Appends a liquidity event and returns its generated id.
pub async fn insert_event(tx: &mut StoreTx, event: &LiquidityEvent) -> ExchangeResult<i64> {
    let row = sqlx::query(
        "INSERT INTO liquidity_events (pool_id, user_id, kind, base_amount, \
             quote_amount, lp_shares, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING id",
    )
    .bind(&event.pool_id)
    .bind(&event.user_id)
    .bind(event.kind.code())
    .bind(event.base_amount)
    .bind(event.quote_amount)
    .bind(event.lp_shares)
    .bind(event.created_at)
    .fetch_one(&mut **tx)
    .await?;
    Ok(row.try_get("id")?)
}

pub async fn list_events(
    pool: &sqlx::PgPool,
    pool_id: &str,
    user_id: &str,
    limit: i64,
) -> ExchangeResult<Vec<LiquidityEvent>> {
    let rows = sqlx::query(
        "SELECT * FROM liquidity_events \
         WHERE pool_id = $1 AND user_id = $2 ORDER BY created_at DESC LIMIT $3",
    )
    .bind(pool_id)
    .bind(user_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let kind: i16 = row.try_get("kind")?;
            Ok(LiquidityEvent {
                id: row.try_get("id")?,
                pool_id: row.try_get("pool_id")?,
                user_id: row.try_get("user_id")?,
                kind: LiquidityEventKind::from_code(kind)
                    .ok_or_else(|| TransientError::Storage(format!("bad event kind {kind}")))?,
                base_amount: row.try_get("base_amount")?,
                quote_amount: row.try_get("quote_amount")?,
                lp_shares: row.try_get("lp_shares")?,
                created_at: row.try_get("created_at")?,
            })
        })
        .collect()
}
