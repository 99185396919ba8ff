//! User and access-token reads, plus balance snapshots for the user API.
//!
//! Token verification against the external IdP happens upstream; this layer
//! only resolves an already-issued bearer token to a user id.

use sqlx::{Row, postgres::PgRow};

use crate::{
    domain::{AccountType, balance::Balance, user::User},
    error::{ExchangeResult, TransientError},
};

fn user_from_row(row: &PgRow) -> ExchangeResult<User> {
    Ok(User {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        external_id: row.try_get("external_id")?,
        active: row.try_get("active")?,
        admin: row.try_get("admin")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Resolves a bearer token to its active user. Expired tokens and
/// deactivated users resolve to `None`.
pub async fn by_token(pool: &sqlx::PgPool, token: &str) -> ExchangeResult<Option<User>> {
    let row = sqlx::query(
        "SELECT u.* FROM users u \
         JOIN access_tokens t ON t.user_id = u.id \
         WHERE t.token = $1 AND u.active \
             AND (t.expires_at IS NULL OR t.expires_at > now())",
    )
    .bind(token)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(user_from_row).transpose()
}

pub async fn by_id(pool: &sqlx::PgPool, id: &str) -> ExchangeResult<Option<User>> {
    let row = sqlx::query("SELECT * FROM users WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(user_from_row).transpose()
}

/// All non-empty balance rows for a user.
pub async fn balances(pool: &sqlx::PgPool, user_id: &str) -> ExchangeResult<Vec<Balance>> {
    let rows = sqlx::query(
        "SELECT account_type, user_id, currency, available, locked FROM balances \
         WHERE user_id = $1 ORDER BY currency",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let account: i16 = row.try_get("account_type")?;
            Ok(Balance {
                account_type: AccountType::from_code(account)
                    .ok_or_else(|| TransientError::Storage(format!("bad account type {account}")))?,
                user_id: row.try_get("user_id")?,
                currency: row.try_get("currency")?,
                available: row.try_get("available")?,
                locked: row.try_get("locked")?,
            })
        })
        .collect()
}
