//! Symbol → engine binding cache.
//!
//! Bindings are process-lifetime singletons: the first request for a symbol
//! loads its config, builds the engine handle (loading the pool row or
//! rehydrating the book), and caches it keyed by symbol string and id.
//! Admin create/update invalidates the entry. Each binding carries the mutex
//! that serializes every mutation on its symbol.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;

use crate::{
    domain::{EngineKind, symbol::SymbolConfig, pool::PoolState, symbol},
    engine::{amm::AmmEngine, clob::ClobEngine},
    error::{ExchangeResult, IntegrityError, TransientError, ValidationError},
    id,
    store::{self, Store},
};

#[derive(Debug, Clone)]
pub enum EngineHandle {
    Amm(Arc<AmmEngine>),
    Clob(Arc<ClobEngine>),
}

#[derive(Debug)]
pub struct SymbolBinding {
    pub cfg: SymbolConfig,
    pub engine: EngineHandle,
    /// Serializes every mutating engine call on this symbol.
    pub lock: tokio::sync::Mutex<()>,
    quarantined: AtomicBool,
}

impl SymbolBinding {
    pub fn amm(&self) -> ExchangeResult<&Arc<AmmEngine>> {
        match &self.engine {
            EngineHandle::Amm(engine) => Ok(engine),
            EngineHandle::Clob(_) => Err(IntegrityError::SymbolBindingMismatch {
                symbol: self.cfg.symbol.clone(),
                bound: EngineKind::Clob.as_str(),
                requested: EngineKind::Amm.as_str(),
            }
            .into()),
        }
    }

    pub fn clob(&self) -> ExchangeResult<&Arc<ClobEngine>> {
        match &self.engine {
            EngineHandle::Clob(engine) => Ok(engine),
            EngineHandle::Amm(_) => Err(IntegrityError::SymbolBindingMismatch {
                symbol: self.cfg.symbol.clone(),
                bound: EngineKind::Amm.as_str(),
                requested: EngineKind::Clob.as_str(),
            }
            .into()),
        }
    }

    /// Marks the symbol's in-memory state as unsafe; every subsequent
    /// operation fails until an admin invalidates the binding.
    pub fn quarantine(&self) {
        self.quarantined.store(true, Ordering::SeqCst);
    }

    pub fn check_quarantine(&self) -> ExchangeResult<()> {
        if self.quarantined.load(Ordering::SeqCst) {
            return Err(IntegrityError::SymbolQuarantined(self.cfg.symbol.clone()).into());
        }
        Ok(())
    }
}

pub struct BindingCache {
    store: Store,
    by_symbol: DashMap<String, Arc<SymbolBinding>>,
    by_id: DashMap<i64, Arc<SymbolBinding>>,
    /// Serializes binding construction so handles stay singletons.
    load_lock: tokio::sync::Mutex<()>,
}

impl BindingCache {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            by_symbol: DashMap::new(),
            by_id: DashMap::new(),
            load_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Resolves any accepted symbol shape to its binding, loading lazily on
    /// first use.
    pub async fn resolve(&self, input: &str) -> ExchangeResult<Arc<SymbolBinding>> {
        let canonical = symbol::canonicalize(input)?;
        if let Some(binding) = self.by_symbol.get(&canonical) {
            return Ok(binding.clone());
        }

        let _guard = self.load_lock.lock().await;
        // Raced loaders resolve to the first-built singleton.
        if let Some(binding) = self.by_symbol.get(&canonical) {
            return Ok(binding.clone());
        }

        let binding = self.load(&canonical).await?;
        self.by_symbol.insert(canonical, binding.clone());
        self.by_id.insert(binding.cfg.id, binding.clone());
        Ok(binding)
    }

    pub fn get_by_id(&self, symbol_id: i64) -> Option<Arc<SymbolBinding>> {
        self.by_id.get(&symbol_id).map(|b| b.clone())
    }

    /// Drops a cached binding (admin create/update, quarantine recovery).
    pub fn invalidate(&self, canonical: &str) {
        if let Some((_, binding)) = self.by_symbol.remove(canonical) {
            self.by_id.remove(&binding.cfg.id);
            tracing::info!(symbol = %canonical, "Binding invalidated");
        }
    }

    #[tracing::instrument(skip(self))]
    async fn load(&self, canonical: &str) -> ExchangeResult<Arc<SymbolBinding>> {
        let cfg = store::symbols::by_symbol(self.store.pool(), canonical)
            .await?
            .ok_or_else(|| ValidationError::UnknownSymbol(canonical.to_string()))?;
        if !cfg.active {
            return Err(IntegrityError::EngineDisabled(canonical.to_string()).into());
        }

        let engine = match cfg.engine {
            EngineKind::Amm => {
                let state = match store::pools::load_by_symbol(self.store.pool(), cfg.id).await? {
                    Some(state) => state,
                    None => self.create_empty_pool(&cfg).await?,
                };
                EngineHandle::Amm(Arc::new(AmmEngine::new(state)))
            }
            EngineKind::Clob => {
                let open = store::orders::open_for_symbol(self.store.pool(), cfg.id).await?;
                tracing::info!(symbol = %canonical, open_orders = open.len(), "Rehydrating book");
                EngineHandle::Clob(Arc::new(ClobEngine::rehydrate(open)?))
            }
        };

        tracing::info!(symbol = %canonical, engine = %cfg.engine, "Binding loaded");
        Ok(Arc::new(SymbolBinding {
            cfg,
            engine,
            lock: tokio::sync::Mutex::new(()),
            quarantined: AtomicBool::new(false),
        }))
    }

    /// Backfills the pool row for an AMM symbol seeded without one.
    async fn create_empty_pool(&self, cfg: &SymbolConfig) -> ExchangeResult<PoolState> {
        let pool_id = self.mint_pool_id().await?;
        let now = Utc::now();
        let state = PoolState {
            pool_id,
            symbol_id: cfg.id,
            reserve_base: Decimal::ZERO,
            reserve_quote: Decimal::ZERO,
            k: Decimal::ZERO,
            fee_rate: cfg.fee_rate,
            total_lp_shares: Decimal::ZERO,
            volume_base: Decimal::ZERO,
            volume_quote: Decimal::ZERO,
            fees_cumulative: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        };

        let to_insert = state.clone();
        self.store
            .with_tx(move |tx| {
                Box::pin(async move { store::pools::upsert(tx, &to_insert).await })
            })
            .await?;
        Ok(state)
    }

    /// Mints a pool id, retrying on the (cosmically unlikely) collision.
    pub async fn mint_pool_id(&self) -> ExchangeResult<String> {
        for _ in 0..id::MAX_ID_RETRIES {
            let candidate = id::random_pool_id();
            let exists = sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM amm_pools WHERE pool_id = $1",
            )
            .bind(&candidate)
            .fetch_one(self.store.pool())
            .await?;
            if exists == 0 {
                return Ok(candidate);
            }
        }
        Err(TransientError::IdCollisionExhausted(id::MAX_ID_RETRIES).into())
    }
}
