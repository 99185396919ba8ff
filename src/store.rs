//! Persistence gateway.
//!
//! One primitive: [`Store::with_tx`] opens a transaction, runs the caller's
//! closure against the handle, commits on `Ok` and rolls back on `Err`. No
//! partially-applied state is ever visible to other requests. Typed reads
//! and writes for each table live in the submodules; closures must move
//! owned data (the transaction handle is the only borrow).

use futures::future::BoxFuture;
use sqlx::{
    Postgres, Transaction,
    postgres::{PgPool, PgPoolOptions},
};

use crate::error::ExchangeResult;

pub mod orders;
pub mod pools;
pub mod symbols;
pub mod trades;
pub mod users;

pub type StoreTx = Transaction<'static, Postgres>;

#[derive(Debug, Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    #[tracing::instrument(skip(url))]
    pub async fn connect(url: &str, max_connections: u32) -> ExchangeResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        tracing::info!(max_connections, "Connected to store");
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> ExchangeResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| crate::error::TransientError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Pool handle without an eager connection; connections open on first
    /// use. Lets the HTTP surface be assembled before the database is up.
    pub fn connect_lazy(url: &str) -> ExchangeResult<Self> {
        let pool = PgPoolOptions::new().connect_lazy(url)?;
        Ok(Self { pool })
    }

    /// Read-only access outside any transaction.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs `f` inside one transaction; commit on `Ok`, rollback on `Err`.
    pub async fn with_tx<T, F>(&self, f: F) -> ExchangeResult<T>
    where
        F: for<'t> FnOnce(&'t mut StoreTx) -> BoxFuture<'t, ExchangeResult<T>>,
    {
        let mut tx = self.pool.begin().await?;
        match f(&mut tx).await {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(err) => {
                // Rollback failure is secondary; the original error wins.
                if let Err(rb) = tx.rollback().await {
                    tracing::warn!(error = %rb, "Rollback failed after aborted operation");
                }
                Err(err)
            }
        }
    }
}
