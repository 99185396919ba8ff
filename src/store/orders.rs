//! Order row persistence. The in-memory book is authoritative for matching;
//! these writes keep the store in lockstep so books can rehydrate on start.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{Row, postgres::PgRow};

use crate::{
    domain::{
        Side,
        order::{Order, OrderStatus, OrderType},
    },
    error::{ExchangeResult, TransientError},
    store::StoreTx,
};

fn from_row(row: &PgRow) -> ExchangeResult<Order> {
    let side: i16 = row.try_get("side")?;
    let order_type: i16 = row.try_get("order_type")?;
    let status: i16 = row.try_get("status")?;

    Ok(Order {
        id: row.try_get("id")?,
        symbol_id: row.try_get("symbol_id")?,
        user_id: row.try_get("user_id")?,
        side: Side::from_code(side)
            .map_err(|_| TransientError::Storage(format!("bad side code {side}")))?,
        order_type: OrderType::from_code(order_type)
            .map_err(|_| TransientError::Storage(format!("bad order type {order_type}")))?,
        price: row.try_get("price")?,
        quantity: row.try_get("quantity")?,
        filled: row.try_get("filled")?,
        status: OrderStatus::from_code(status)
            .ok_or_else(|| TransientError::Storage(format!("bad status code {status}")))?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        filled_at: row.try_get("filled_at")?,
        cancelled_at: row.try_get("cancelled_at")?,
    })
}

pub async fn insert(tx: &mut StoreTx, order: &Order) -> ExchangeResult<()> {
    sqlx::query(
        "INSERT INTO orders (id, symbol_id, user_id, side, order_type, price, quantity, \
             filled, status, created_at, updated_at, filled_at, cancelled_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
    )
    .bind(order.id)
    .bind(order.symbol_id)
    .bind(&order.user_id)
    .bind(order.side.code())
    .bind(order.order_type.code())
    .bind(order.price)
    .bind(order.quantity)
    .bind(order.filled)
    .bind(order.status.code())
    .bind(order.created_at)
    .bind(order.updated_at)
    .bind(order.filled_at)
    .bind(order.cancelled_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Applies one fill to a maker row: bumps `filled` and moves the status.
pub async fn apply_fill(
    tx: &mut StoreTx,
    order_id: i64,
    quantity: Decimal,
    status: OrderStatus,
    at: DateTime<Utc>,
) -> ExchangeResult<()> {
    let filled_at = (status == OrderStatus::Filled).then_some(at);
    sqlx::query(
        "UPDATE orders SET filled = filled + $2, status = $3, updated_at = $4, \
             filled_at = COALESCE($5, filled_at) \
         WHERE id = $1",
    )
    .bind(order_id)
    .bind(quantity)
    .bind(status.code())
    .bind(at)
    .bind(filled_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub async fn mark_cancelled(
    tx: &mut StoreTx,
    order_id: i64,
    at: DateTime<Utc>,
) -> ExchangeResult<()> {
    sqlx::query(
        "UPDATE orders SET status = $2, cancelled_at = $3, updated_at = $3 WHERE id = $1",
    )
    .bind(order_id)
    .bind(OrderStatus::Cancelled.code())
    .bind(at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Row-locked load for the cancel path.
pub async fn load_for_update(tx: &mut StoreTx, order_id: i64) -> ExchangeResult<Option<Order>> {
    let row = sqlx::query("SELECT * FROM orders WHERE id = $1 FOR UPDATE")
        .bind(order_id)
        .fetch_optional(&mut **tx)
        .await?;
    row.as_ref().map(from_row).transpose()
}

/// Open and partial orders for a symbol in arrival order; the rehydration
/// source for a CLOB book.
pub async fn open_for_symbol(pool: &sqlx::PgPool, symbol_id: i64) -> ExchangeResult<Vec<Order>> {
    let rows = sqlx::query(
        "SELECT * FROM orders WHERE symbol_id = $1 AND status IN ($2, $3) \
         ORDER BY created_at, id",
    )
    .bind(symbol_id)
    .bind(OrderStatus::Open.code())
    .bind(OrderStatus::Partial.code())
    .fetch_all(pool)
    .await?;
    rows.iter().map(from_row).collect()
}
