//! Symbol table reads and writes.

use sqlx::{Row, postgres::PgRow};

use crate::{
    domain::{EngineKind, MarketClass, symbol::SymbolConfig},
    error::{ExchangeResult, TransientError, ValidationError},
    store::StoreTx,
};

fn from_row(row: &PgRow) -> ExchangeResult<SymbolConfig> {
    let market: i16 = row.try_get("market")?;
    let engine: i16 = row.try_get("engine")?;
    let price_precision: i16 = row.try_get("price_precision")?;
    let qty_precision: i16 = row.try_get("qty_precision")?;

    Ok(SymbolConfig {
        id: row.try_get("id")?,
        symbol: row.try_get("symbol")?,
        base: row.try_get("base")?,
        quote: row.try_get("quote")?,
        settle: row.try_get("settle")?,
        market: MarketClass::from_code(market)
            .ok_or_else(|| TransientError::Storage(format!("bad market code {market}")))?,
        engine: EngineKind::from_code(engine)
            .ok_or_else(|| TransientError::Storage(format!("bad engine code {engine}")))?,
        price_precision: price_precision as u32,
        qty_precision: qty_precision as u32,
        min_trade_amount: row.try_get("min_trade_amount")?,
        max_trade_amount: row.try_get("max_trade_amount")?,
        fee_rate: row.try_get("fee_rate")?,
        engine_params: row.try_get("engine_params")?,
        active: row.try_get("active")?,
        settle_at: row.try_get("settle_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

const COLS: &str = "id, symbol, base, quote, settle, market, engine, price_precision, \
                    qty_precision, min_trade_amount, max_trade_amount, fee_rate, \
                    engine_params, active, settle_at, created_at, updated_at";

pub async fn by_symbol(
    pool: &sqlx::PgPool,
    symbol: &str,
) -> ExchangeResult<Option<SymbolConfig>> {
    let row = sqlx::query(&format!("SELECT {COLS} FROM symbols WHERE symbol = $1"))
        .bind(symbol)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(from_row).transpose()
}

pub async fn by_id(pool: &sqlx::PgPool, id: i64) -> ExchangeResult<Option<SymbolConfig>> {
    let row = sqlx::query(&format!("SELECT {COLS} FROM symbols WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(from_row).transpose()
}

pub async fn list_active(pool: &sqlx::PgPool) -> ExchangeResult<Vec<SymbolConfig>> {
    let rows = sqlx::query(&format!(
        "SELECT {COLS} FROM symbols WHERE active ORDER BY id"
    ))
    .fetch_all(pool)
    .await?;
    rows.iter().map(from_row).collect()
}

/// Inserts a new symbol and returns its generated id.
///
/// The `(market, base, quote, settle, settle_at)` tuple is unique; a
/// collision surfaces as `SymbolExists`.
pub async fn insert(tx: &mut StoreTx, cfg: &SymbolConfig) -> ExchangeResult<i64> {
    let result = sqlx::query(
        "INSERT INTO symbols (symbol, base, quote, settle, market, engine, \
             price_precision, qty_precision, min_trade_amount, max_trade_amount, \
             fee_rate, engine_params, active, settle_at, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $15) \
         RETURNING id",
    )
    .bind(&cfg.symbol)
    .bind(&cfg.base)
    .bind(&cfg.quote)
    .bind(&cfg.settle)
    .bind(cfg.market.code())
    .bind(cfg.engine.code())
    .bind(cfg.price_precision as i16)
    .bind(cfg.qty_precision as i16)
    .bind(cfg.min_trade_amount)
    .bind(cfg.max_trade_amount)
    .bind(cfg.fee_rate)
    .bind(&cfg.engine_params)
    .bind(cfg.active)
    .bind(cfg.settle_at)
    .bind(cfg.created_at)
    .fetch_one(&mut **tx)
    .await;

    match result {
        Ok(row) => Ok(row.try_get("id")?),
        Err(sqlx::Error::Database(db)) if db.code().as_deref() == Some("23505") => {
            Err(ValidationError::SymbolExists(cfg.symbol.clone()).into())
        }
        Err(e) => Err(e.into()),
    }
}
