//! Trade row persistence. Append-only.

use sqlx::{Row, postgres::PgRow};

use crate::{
    domain::{
        EngineKind, Side,
        trade::{Trade, TradeStatus},
    },
    error::{ExchangeResult, TransientError},
    store::StoreTx,
};

fn from_row(row: &PgRow) -> ExchangeResult<Trade> {
    let side: i16 = row.try_get("side")?;
    let engine: i16 = row.try_get("engine")?;
    let status: i16 = row.try_get("status")?;

    Ok(Trade {
        id: row.try_get("id")?,
        symbol_id: row.try_get("symbol_id")?,
        user_id: row.try_get("user_id")?,
        side: Side::from_code(side)
            .map_err(|_| TransientError::Storage(format!("bad side code {side}")))?,
        engine: EngineKind::from_code(engine)
            .ok_or_else(|| TransientError::Storage(format!("bad engine code {engine}")))?,
        price: row.try_get("price")?,
        quantity: row.try_get("quantity")?,
        quote_amount: row.try_get("quote_amount")?,
        fee_amount: row.try_get("fee_amount")?,
        fee_asset: row.try_get("fee_asset")?,
        status: TradeStatus::from_code(status)
            .ok_or_else(|| TransientError::Storage(format!("bad status code {status}")))?,
        counterparty: row.try_get("counterparty")?,
        engine_data: row.try_get("engine_data")?,
        created_at: row.try_get("created_at")?,
    })
}

pub async fn insert(tx: &mut StoreTx, trade: &Trade) -> ExchangeResult<()> {
    sqlx::query(
        "INSERT INTO trades (id, symbol_id, user_id, side, engine, price, quantity, \
             quote_amount, fee_amount, fee_asset, status, counterparty, engine_data, \
             created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
    )
    .bind(trade.id)
    .bind(trade.symbol_id)
    .bind(&trade.user_id)
    .bind(trade.side.code())
    .bind(trade.engine.code())
    .bind(trade.price)
    .bind(trade.quantity)
    .bind(trade.quote_amount)
    .bind(trade.fee_amount)
    .bind(&trade.fee_asset)
    .bind(trade.status.code())
    .bind(trade.counterparty.as_deref())
    .bind(&trade.engine_data)
    .bind(trade.created_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// The taker's trade history, newest first, optionally narrowed by symbol
/// and engine kind.
pub async fn list_for_user(
    pool: &sqlx::PgPool,
    user_id: &str,
    symbol_id: Option<i64>,
    engine: Option<EngineKind>,
    limit: i64,
) -> ExchangeResult<Vec<Trade>> {
    let rows = sqlx::query(
        "SELECT * FROM trades WHERE user_id = $1 \
             AND ($2::BIGINT IS NULL OR symbol_id = $2) \
             AND ($3::SMALLINT IS NULL OR engine = $3) \
         ORDER BY created_at DESC LIMIT $4",
    )
    .bind(user_id)
    .bind(symbol_id)
    .bind(engine.map(|e| e.code()))
    .bind(limit)
    .fetch_all(pool)
    .await?;
    rows.iter().map(from_row).collect()
}
