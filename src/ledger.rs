//! Balance ledger.
//!
//! Every operation runs inside the caller's open transaction so ledger
//! movements and engine state commit together. Rows are serialized with
//! `SELECT … FOR UPDATE`; `available` and `locked` are primary, `balance`
//! is rewritten as their sum on every mutation.

use rust_decimal::Decimal;
use sqlx::Row;

use crate::{
    domain::AccountType,
    error::{ExchangeResult, StateError},
    num,
    store::StoreTx,
};

/// A deferred ledger movement. Matching plans describe their balance effects
/// as an op list which the router executes inside the transaction, keeping
/// engine planning pure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerOp {
    Credit {
        user_id: String,
        currency: String,
        amount: Decimal,
    },
    Debit {
        user_id: String,
        currency: String,
        amount: Decimal,
    },
    Lock {
        user_id: String,
        currency: String,
        amount: Decimal,
    },
    Unlock {
        user_id: String,
        currency: String,
        amount: Decimal,
    },
    Settle {
        user_id: String,
        currency: String,
        amount: Decimal,
    },
}

/// Executes a sequence of ledger ops in order. Ops with zero amount are
/// skipped so plans can emit them unconditionally.
pub async fn execute(tx: &mut StoreTx, ops: &[LedgerOp]) -> ExchangeResult<()> {
    for op in ops {
        match op {
            LedgerOp::Credit {
                user_id,
                currency,
                amount,
            } if !amount.is_zero() => credit(tx, user_id, currency, *amount).await?,
            LedgerOp::Debit {
                user_id,
                currency,
                amount,
            } if !amount.is_zero() => debit(tx, user_id, currency, *amount).await?,
            LedgerOp::Lock {
                user_id,
                currency,
                amount,
            } if !amount.is_zero() => lock(tx, user_id, currency, *amount).await?,
            LedgerOp::Unlock {
                user_id,
                currency,
                amount,
            } if !amount.is_zero() => unlock(tx, user_id, currency, *amount).await?,
            LedgerOp::Settle {
                user_id,
                currency,
                amount,
            } if !amount.is_zero() => settle(tx, user_id, currency, *amount).await?,
            _ => {}
        }
    }
    Ok(())
}

/// `(available, locked)` for the row, zero if absent. No row lock.
pub async fn get_balance(
    tx: &mut StoreTx,
    user_id: &str,
    currency: &str,
) -> ExchangeResult<(Decimal, Decimal)> {
    let row = sqlx::query(
        "SELECT available, locked FROM balances \
         WHERE account_type = $1 AND user_id = $2 AND currency = $3",
    )
    .bind(AccountType::Spot.code())
    .bind(user_id)
    .bind(currency)
    .fetch_optional(&mut **tx)
    .await?;

    match row {
        Some(row) => Ok((row.try_get("available")?, row.try_get("locked")?)),
        None => Ok((Decimal::ZERO, Decimal::ZERO)),
    }
}

/// `available += amount`, creating the row if missing. `amount > 0`.
pub async fn credit(
    tx: &mut StoreTx,
    user_id: &str,
    currency: &str,
    amount: Decimal,
) -> ExchangeResult<()> {
    let amount = num::require_positive("amount", amount)?;
    sqlx::query(
        "INSERT INTO balances (account_type, user_id, currency, available, locked, balance) \
         VALUES ($1, $2, $3, $4, 0, $4) \
         ON CONFLICT (account_type, user_id, currency) DO UPDATE SET \
             available = balances.available + EXCLUDED.available, \
             balance = balances.available + EXCLUDED.available + balances.locked",
    )
    .bind(AccountType::Spot.code())
    .bind(user_id)
    .bind(currency)
    .bind(amount)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// `available -= amount`; fails with `InsufficientFunds` if short.
pub async fn debit(
    tx: &mut StoreTx,
    user_id: &str,
    currency: &str,
    amount: Decimal,
) -> ExchangeResult<()> {
    let amount = num::require_positive("amount", amount)?;
    let (available, _) = select_for_update(tx, user_id, currency).await?;
    if available < amount {
        return Err(StateError::InsufficientFunds {
            currency: currency.to_string(),
            available,
            required: amount,
        }
        .into());
    }
    apply_delta(tx, user_id, currency, -amount, Decimal::ZERO).await
}

/// Moves `amount` from `available` to `locked`.
pub async fn lock(
    tx: &mut StoreTx,
    user_id: &str,
    currency: &str,
    amount: Decimal,
) -> ExchangeResult<()> {
    let amount = num::require_positive("amount", amount)?;
    let (available, _) = select_for_update(tx, user_id, currency).await?;
    if available < amount {
        return Err(StateError::InsufficientFunds {
            currency: currency.to_string(),
            available,
            required: amount,
        }
        .into());
    }
    apply_delta(tx, user_id, currency, -amount, amount).await
}

/// Moves `amount` from `locked` back to `available`.
pub async fn unlock(
    tx: &mut StoreTx,
    user_id: &str,
    currency: &str,
    amount: Decimal,
) -> ExchangeResult<()> {
    let amount = num::require_positive("amount", amount)?;
    let (_, locked) = select_for_update(tx, user_id, currency).await?;
    if locked < amount {
        return Err(StateError::InsufficientFunds {
            currency: currency.to_string(),
            available: locked,
            required: amount,
        }
        .into());
    }
    apply_delta(tx, user_id, currency, amount, -amount).await
}

/// Removes `amount` from `locked` with no credit anywhere; the counterparty
/// leg is a separate `credit`.
pub async fn settle(
    tx: &mut StoreTx,
    user_id: &str,
    currency: &str,
    amount: Decimal,
) -> ExchangeResult<()> {
    let amount = num::require_positive("amount", amount)?;
    let (_, locked) = select_for_update(tx, user_id, currency).await?;
    if locked < amount {
        return Err(StateError::InsufficientFunds {
            currency: currency.to_string(),
            available: locked,
            required: amount,
        }
        .into());
    }
    apply_delta(tx, user_id, currency, Decimal::ZERO, -amount).await
}

/// Atomic debit + credit between two users.
pub async fn transfer(
    tx: &mut StoreTx,
    from_user: &str,
    to_user: &str,
    currency: &str,
    amount: Decimal,
) -> ExchangeResult<()> {
    debit(tx, from_user, currency, amount).await?;
    credit(tx, to_user, currency, amount).await
}

/// Row-locked read; missing rows read as zero without locking anything.
async fn select_for_update(
    tx: &mut StoreTx,
    user_id: &str,
    currency: &str,
) -> ExchangeResult<(Decimal, Decimal)> {
    let row = sqlx::query(
        "SELECT available, locked FROM balances \
         WHERE account_type = $1 AND user_id = $2 AND currency = $3 FOR UPDATE",
    )
    .bind(AccountType::Spot.code())
    .bind(user_id)
    .bind(currency)
    .fetch_optional(&mut **tx)
    .await?;

    match row {
        Some(row) => Ok((row.try_get("available")?, row.try_get("locked")?)),
        None => Ok((Decimal::ZERO, Decimal::ZERO)),
    }
}

async fn apply_delta(
    tx: &mut StoreTx,
    user_id: &str,
    currency: &str,
    available_delta: Decimal,
    locked_delta: Decimal,
) -> ExchangeResult<()> {
    sqlx::query(
        "UPDATE balances SET \
             available = available + $4, \
             locked = locked + $5, \
             balance = available + $4 + locked + $5 \
         WHERE account_type = $1 AND user_id = $2 AND currency = $3",
    )
    .bind(AccountType::Spot.code())
    .bind(user_id)
    .bind(currency)
    .bind(available_delta)
    .bind(locked_delta)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
