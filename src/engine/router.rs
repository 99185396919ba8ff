//! Engine router.
//!
//! Cross-cutting flow for every trade-path request: resolve the symbol
//! binding, acquire the symbol mutex (honoring the request deadline), run
//! the bound engine's planning, execute ledger movements and writes in one
//! transaction, install the committed state into the engine handle, and
//! publish events — all before the mutex is released, so per-symbol event
//! order matches commit order.
//!
//! A fatal error (broken invariant) quarantines the symbol's binding and
//! raises an operational alert; the symbol stays down until an admin
//! invalidates the binding.

use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;

use crate::{
    bus::EventBus,
    domain::{
        EngineKind, MarketClass, Side,
        order::{Order, OrderStatus},
        pool::{LiquidityEvent, LiquidityEventKind, LpPosition, PoolState},
        symbol::{self, SymbolConfig},
        trade::{Trade, TradeStatus},
    },
    engine::{
        amm::{self, AmmEngine, SwapQuote, SwapTarget},
        binding::{BindingCache, SymbolBinding},
        book::DepthSnapshot,
        clob::{self, ClobEngine, PlacePlan, PlaceRequest},
    },
    error::{
        ExchangeResult, IntegrityError, StateError, TransientError, ValidationError,
    },
    events::{
        BalanceView, Event, LpPositionView, OrderbookEventData, PoolEventData, TradeTick,
        UserEventData,
    },
    id::MillisIdSource,
    ledger, num,
    store::{self, Store},
};

/// Uniform trade-path result, regardless of engine kind.
#[derive(Debug, Clone, Serialize)]
pub struct TradeResult {
    pub symbol: String,
    pub engine: EngineKind,
    pub side: Side,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<i64>,
    pub trade_ids: Vec<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
    pub quantity: Decimal,
    pub quote_amount: Decimal,
    pub fee_amount: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fee_asset: Option<String>,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SwapQuoteView {
    pub symbol: String,
    pub side: Side,
    pub amount_in: Decimal,
    pub amount_out: Decimal,
    pub fee_amount: Decimal,
    pub execution_price: Decimal,
    pub spot_price: Decimal,
    pub price_impact: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct LiquidityResult {
    pub symbol: String,
    pub pool_id: String,
    pub base_amount: Decimal,
    pub quote_amount: Decimal,
    pub refund_base: Decimal,
    pub refund_quote: Decimal,
    pub lp_shares: Decimal,
    pub total_lp_shares: Decimal,
    pub reserve_base: Decimal,
    pub reserve_quote: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClobQuoteView {
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    pub achievable: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vwap: Option<Decimal>,
}

/// A trade row joined with its symbol string for user-facing history.
#[derive(Debug, Clone, Serialize)]
pub struct TradeView {
    pub symbol: String,
    #[serde(flatten)]
    pub trade: Trade,
}

/// Single-symbol market view with an engine-appropriate price hint.
#[derive(Debug, Clone, Serialize)]
pub struct MarketView {
    #[serde(flatten)]
    pub config: SymbolConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_bid: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub best_ask: Option<Decimal>,
}

/// Admin input for symbol creation.
#[derive(Debug, Clone)]
pub struct NewSymbol {
    pub base: String,
    pub quote: String,
    pub settle: String,
    pub market: MarketClass,
    pub engine: EngineKind,
    pub price_precision: u32,
    pub qty_precision: u32,
    pub min_trade_amount: Decimal,
    pub max_trade_amount: Decimal,
    pub fee_rate: Decimal,
    pub engine_params: serde_json::Value,
    pub settle_at: Option<DateTime<Utc>>,
}

pub struct EngineRouter {
    store: Store,
    cache: BindingCache,
    bus: EventBus,
    order_ids: MillisIdSource,
    trade_ids: MillisIdSource,
    lock_timeout: Duration,
}

impl EngineRouter {
    pub fn new(store: Store, bus: EventBus, lock_timeout: Duration) -> Self {
        Self {
            cache: BindingCache::new(store.clone()),
            store,
            bus,
            order_ids: MillisIdSource::new(),
            trade_ids: MillisIdSource::new(),
            lock_timeout,
        }
    }

    pub fn cache(&self) -> &BindingCache {
        &self.cache
    }

    // ============================================================================================
    // AMM operations
    // ============================================================================================

    #[tracing::instrument(skip(self), fields(user = %user_id, symbol = %symbol_input))]
    pub async fn swap(
        &self,
        user_id: &str,
        symbol_input: &str,
        side: Side,
        amount_in: Decimal,
        min_amount_out: Option<Decimal>,
        deadline: Option<Duration>,
    ) -> ExchangeResult<TradeResult> {
        let binding = self.cache.resolve(symbol_input).await?;
        binding.check_quarantine()?;
        binding.cfg.require_engine(EngineKind::Amm)?;
        let engine = binding.amm()?.clone();

        let _guard = self.lock_binding(&binding, deadline).await?;
        let result = self
            .swap_locked(&binding, &engine, user_id, side, amount_in, min_amount_out)
            .await;
        self.guard_fatal(&binding, result)
    }

    async fn swap_locked(
        &self,
        binding: &SymbolBinding,
        engine: &Arc<AmmEngine>,
        user_id: &str,
        side: Side,
        amount_in: Decimal,
        min_amount_out: Option<Decimal>,
    ) -> ExchangeResult<TradeResult> {
        let cfg = &binding.cfg;
        let now = Utc::now();
        let amount_in = num::require_positive("amount_in", amount_in)?;
        let min_amount_out = min_amount_out
            .map(|bound| num::require_non_negative("min_amount_out", bound))
            .transpose()?;

        let pool = engine.snapshot();
        let target = match side {
            Side::Buy => SwapTarget::ExactQuote(amount_in),
            Side::Sell => SwapTarget::ExactBase(amount_in),
        };
        let quote = amm::quote_swap(&pool, side, target)?;
        amm::check_slippage(&quote, min_amount_out)?;
        let next = amm::apply_swap(&pool, &quote, now)?;

        let in_currency = match side {
            Side::Buy => cfg.quote.clone(),
            Side::Sell => cfg.base.clone(),
        };
        let out_currency = match side {
            Side::Buy => cfg.base.clone(),
            Side::Sell => cfg.quote.clone(),
        };

        let trade = Trade {
            id: self.trade_ids.next(),
            symbol_id: cfg.id,
            user_id: user_id.to_string(),
            side,
            engine: EngineKind::Amm,
            price: quote.execution_price,
            quantity: quote.base_amount(),
            quote_amount: num::trunc(quote.quote_amount(), cfg.qty_precision),
            fee_amount: num::trunc(quote.fee_amount, cfg.price_precision),
            fee_asset: in_currency.clone(),
            status: TradeStatus::Filled,
            counterparty: None,
            engine_data: json!({
                "pool_id": next.pool_id,
                "reserve_base": next.reserve_base,
                "reserve_quote": next.reserve_quote,
            }),
            created_at: now,
        };

        let balances = {
            let user = user_id.to_string();
            let (in_ccy, out_ccy) = (in_currency.clone(), out_currency.clone());
            let (base_ccy, quote_ccy) = (cfg.base.clone(), cfg.quote.clone());
            let (amount_gross, amount_out) = (quote.amount_in, quote.amount_out);
            let (next_row, trade_row) = (next.clone(), trade.clone());
            self.store
                .with_tx(move |tx| {
                    Box::pin(async move {
                        ledger::debit(tx, &user, &in_ccy, amount_gross).await?;
                        ledger::credit(tx, &user, &out_ccy, amount_out).await?;
                        store::pools::upsert(tx, &next_row).await?;
                        store::trades::insert(tx, &trade_row).await?;
                        balance_views(tx, &user, &base_ccy, &quote_ccy).await
                    })
                })
                .await?
        };

        engine.install(next.clone());

        let tick = TradeTick {
            symbol: cfg.symbol.clone(),
            engine: EngineKind::Amm,
            side,
            price: num::round_display(trade.price, cfg.price_precision),
            quantity: trade.quantity,
            created_at: now,
        };
        self.bus.publish(Event::pool(
            &cfg.symbol,
            &PoolEventData {
                pool_id: next.pool_id.clone(),
                symbol: cfg.symbol.clone(),
                reserve_base: next.reserve_base,
                reserve_quote: next.reserve_quote,
                price: next.spot_price(),
                total_lp_shares: next.total_lp_shares,
                trade: Some(tick.clone()),
            },
        ));
        self.bus.publish(Event::user(
            user_id,
            &UserEventData {
                balances,
                pool_user: None,
            },
        ));
        self.bus.publish(Event::trade(&tick));

        tracing::info!(
            trade_id = trade.id,
            amount_in = %quote.amount_in,
            amount_out = %quote.amount_out,
            "Swap committed"
        );

        Ok(TradeResult {
            symbol: cfg.symbol.clone(),
            engine: EngineKind::Amm,
            side,
            order_id: None,
            trade_ids: vec![trade.id],
            price: Some(num::round_display(trade.price, cfg.price_precision)),
            quantity: trade.quantity,
            quote_amount: trade.quote_amount,
            fee_amount: trade.fee_amount,
            fee_asset: Some(trade.fee_asset),
            status: OrderStatus::Filled,
            created_at: now,
        })
    }

    /// Read-only swap quote from the pool snapshot; no mutex.
    pub async fn quote_swap(
        &self,
        symbol_input: &str,
        side: Side,
        quantity: Option<Decimal>,
        quote_amount: Option<Decimal>,
    ) -> ExchangeResult<SwapQuoteView> {
        let binding = self.cache.resolve(symbol_input).await?;
        binding.cfg.require_engine(EngineKind::Amm)?;
        let pool = binding.amm()?.snapshot();

        let target = match (quantity, quote_amount) {
            (Some(base), None) => SwapTarget::ExactBase(base),
            (None, Some(quote)) => SwapTarget::ExactQuote(quote),
            _ => {
                return Err(
                    ValidationError::MissingParameter("quantity or quote_amount").into(),
                );
            }
        };
        let quote = amm::quote_swap(&pool, side, target)?;
        Ok(swap_quote_view(&binding.cfg, &quote))
    }

    /// Required counterpart for a one-sided liquidity deposit.
    pub async fn quote_liquidity(
        &self,
        symbol_input: &str,
        base_amount: Option<Decimal>,
        quote_amount: Option<Decimal>,
    ) -> ExchangeResult<(Decimal, Decimal)> {
        let binding = self.cache.resolve(symbol_input).await?;
        binding.cfg.require_engine(EngineKind::Amm)?;
        let pool = binding.amm()?.snapshot();
        amm::quote_counterpart(&pool, base_amount, quote_amount)
    }

    #[tracing::instrument(skip(self), fields(user = %user_id, symbol = %symbol_input))]
    pub async fn add_liquidity(
        &self,
        user_id: &str,
        symbol_input: &str,
        base_amount: Decimal,
        quote_amount: Decimal,
        deadline: Option<Duration>,
    ) -> ExchangeResult<LiquidityResult> {
        let binding = self.cache.resolve(symbol_input).await?;
        binding.check_quarantine()?;
        binding.cfg.require_engine(EngineKind::Amm)?;
        let engine = binding.amm()?.clone();

        let _guard = self.lock_binding(&binding, deadline).await?;
        let result = self
            .add_liquidity_locked(&binding, &engine, user_id, base_amount, quote_amount)
            .await;
        self.guard_fatal(&binding, result)
    }

    async fn add_liquidity_locked(
        &self,
        binding: &SymbolBinding,
        engine: &Arc<AmmEngine>,
        user_id: &str,
        base_amount: Decimal,
        quote_amount: Decimal,
    ) -> ExchangeResult<LiquidityResult> {
        let cfg = &binding.cfg;
        let now = Utc::now();
        let pool = engine.snapshot();

        let plan = amm::plan_add_liquidity(&pool, base_amount, quote_amount)?;
        let next = amm::apply_add_liquidity(&pool, &plan, now)?;

        let (position, balances) = {
            let user = user_id.to_string();
            let (base_ccy, quote_ccy) = (cfg.base.clone(), cfg.quote.clone());
            let (plan_tx, next_row) = (plan.clone(), next.clone());
            let pool_id = pool.pool_id.clone();
            self.store
                .with_tx(move |tx| {
                    Box::pin(async move {
                        ledger::debit(tx, &user, &base_ccy, plan_tx.base_in).await?;
                        ledger::debit(tx, &user, &quote_ccy, plan_tx.quote_in).await?;

                        let mut position = store::pools::load_position_for_update(
                            tx, &pool_id, &user,
                        )
                        .await?
                        .unwrap_or(LpPosition {
                            pool_id: pool_id.clone(),
                            user_id: user.clone(),
                            lp_shares: Decimal::ZERO,
                            initial_base: Decimal::ZERO,
                            initial_quote: Decimal::ZERO,
                            created_at: now,
                            updated_at: now,
                        });
                        position.lp_shares += plan_tx.shares_minted;
                        position.initial_base += plan_tx.base_in;
                        position.initial_quote += plan_tx.quote_in;
                        position.updated_at = now;
                        store::pools::upsert_position(tx, &position).await?;

                        store::pools::upsert(tx, &next_row).await?;
                        store::pools::insert_event(
                            tx,
                            &LiquidityEvent {
                                id: 0,
                                pool_id,
                                user_id: user.clone(),
                                kind: LiquidityEventKind::Add,
                                base_amount: plan_tx.base_in,
                                quote_amount: plan_tx.quote_in,
                                lp_shares: plan_tx.shares_minted,
                                created_at: now,
                            },
                        )
                        .await?;

                        let views = balance_views(tx, &user, &base_ccy, &quote_ccy).await?;
                        Ok((position, views))
                    })
                })
                .await?
        };

        engine.install(next.clone());
        self.publish_pool_and_user(cfg, &next, user_id, balances, Some(&position));

        tracing::info!(
            shares = %plan.shares_minted,
            base = %plan.base_in,
            quote = %plan.quote_in,
            "Liquidity added"
        );

        Ok(LiquidityResult {
            symbol: cfg.symbol.clone(),
            pool_id: next.pool_id.clone(),
            base_amount: plan.base_in,
            quote_amount: plan.quote_in,
            refund_base: plan.refund_base,
            refund_quote: plan.refund_quote,
            lp_shares: plan.shares_minted,
            total_lp_shares: next.total_lp_shares,
            reserve_base: next.reserve_base,
            reserve_quote: next.reserve_quote,
        })
    }

    #[tracing::instrument(skip(self), fields(user = %user_id, symbol = %symbol_input))]
    pub async fn remove_liquidity(
        &self,
        user_id: &str,
        symbol_input: &str,
        lp_shares: Decimal,
        deadline: Option<Duration>,
    ) -> ExchangeResult<LiquidityResult> {
        let binding = self.cache.resolve(symbol_input).await?;
        binding.check_quarantine()?;
        binding.cfg.require_engine(EngineKind::Amm)?;
        let engine = binding.amm()?.clone();

        let _guard = self.lock_binding(&binding, deadline).await?;
        let result = self
            .remove_liquidity_locked(&binding, &engine, user_id, lp_shares)
            .await;
        self.guard_fatal(&binding, result)
    }

    async fn remove_liquidity_locked(
        &self,
        binding: &SymbolBinding,
        engine: &Arc<AmmEngine>,
        user_id: &str,
        lp_shares: Decimal,
    ) -> ExchangeResult<LiquidityResult> {
        let cfg = &binding.cfg;
        let now = Utc::now();
        let pool = engine.snapshot();

        let (plan, next, position, balances) = {
            let user = user_id.to_string();
            let (base_ccy, quote_ccy) = (cfg.base.clone(), cfg.quote.clone());
            let pool_tx = pool.clone();
            self.store
                .with_tx(move |tx| {
                    Box::pin(async move {
                        let position = store::pools::load_position_for_update(
                            tx,
                            &pool_tx.pool_id,
                            &user,
                        )
                        .await?
                        .ok_or(StateError::InsufficientLpShares {
                            held: Decimal::ZERO,
                            requested: lp_shares,
                        })?;

                        let plan =
                            amm::plan_remove_liquidity(&pool_tx, position.lp_shares, lp_shares)?;
                        let next = amm::apply_remove_liquidity(&pool_tx, &plan, now)?;

                        ledger::credit(tx, &user, &base_ccy, plan.base_out).await?;
                        ledger::credit(tx, &user, &quote_ccy, plan.quote_out).await?;

                        let mut position = position;
                        position.lp_shares -= plan.shares_burned;
                        position.updated_at = now;
                        if position.lp_shares.is_zero() {
                            store::pools::delete_position(tx, &pool_tx.pool_id, &user).await?;
                        } else {
                            store::pools::upsert_position(tx, &position).await?;
                        }

                        store::pools::upsert(tx, &next).await?;
                        store::pools::insert_event(
                            tx,
                            &LiquidityEvent {
                                id: 0,
                                pool_id: pool_tx.pool_id.clone(),
                                user_id: user.clone(),
                                kind: LiquidityEventKind::Remove,
                                base_amount: plan.base_out,
                                quote_amount: plan.quote_out,
                                lp_shares: plan.shares_burned,
                                created_at: now,
                            },
                        )
                        .await?;

                        let views = balance_views(tx, &user, &base_ccy, &quote_ccy).await?;
                        Ok((plan, next, position, views))
                    })
                })
                .await?
        };

        engine.install(next.clone());
        let position_ref = (!position.lp_shares.is_zero()).then_some(&position);
        self.publish_pool_and_user(cfg, &next, user_id, balances, position_ref);

        tracing::info!(
            shares = %plan.shares_burned,
            base_out = %plan.base_out,
            quote_out = %plan.quote_out,
            "Liquidity removed"
        );

        Ok(LiquidityResult {
            symbol: cfg.symbol.clone(),
            pool_id: next.pool_id.clone(),
            base_amount: plan.base_out,
            quote_amount: plan.quote_out,
            refund_base: Decimal::ZERO,
            refund_quote: Decimal::ZERO,
            lp_shares: plan.shares_burned,
            total_lp_shares: next.total_lp_shares,
            reserve_base: next.reserve_base,
            reserve_quote: next.reserve_quote,
        })
    }

    /// The caller's LP position valued at current reserves.
    pub async fn lp_position(
        &self,
        user_id: &str,
        symbol_input: &str,
    ) -> ExchangeResult<Option<LpPositionView>> {
        let binding = self.cache.resolve(symbol_input).await?;
        binding.cfg.require_engine(EngineKind::Amm)?;
        let pool = binding.amm()?.snapshot();

        let position =
            store::pools::load_position(self.store.pool(), &pool.pool_id, user_id).await?;
        Ok(position.map(|p| lp_position_view(&binding.cfg, &pool, &p)))
    }

    pub async fn lp_history(
        &self,
        user_id: &str,
        symbol_input: &str,
        limit: i64,
    ) -> ExchangeResult<Vec<LiquidityEvent>> {
        let binding = self.cache.resolve(symbol_input).await?;
        binding.cfg.require_engine(EngineKind::Amm)?;
        let pool = binding.amm()?.snapshot();
        store::pools::list_events(self.store.pool(), &pool.pool_id, user_id, limit).await
    }

    // ============================================================================================
    // CLOB operations
    // ============================================================================================

    #[tracing::instrument(skip(self, req), fields(user = %req.user_id, symbol = %symbol_input))]
    pub async fn place_order(
        &self,
        symbol_input: &str,
        req: PlaceRequest,
        deadline: Option<Duration>,
    ) -> ExchangeResult<TradeResult> {
        let binding = self.cache.resolve(symbol_input).await?;
        binding.check_quarantine()?;
        binding.cfg.require_engine(EngineKind::Clob)?;
        if binding.cfg.market != MarketClass::Spot {
            // Only spot matching is live.
            return Err(IntegrityError::EngineDisabled(binding.cfg.symbol.clone()).into());
        }
        let engine = binding.clob()?.clone();

        let _guard = self.lock_binding(&binding, deadline).await?;
        let result = self.place_order_locked(&binding, &engine, req).await;
        self.guard_fatal(&binding, result)
    }

    async fn place_order_locked(
        &self,
        binding: &SymbolBinding,
        engine: &Arc<ClobEngine>,
        req: PlaceRequest,
    ) -> ExchangeResult<TradeResult> {
        let cfg = &binding.cfg;
        let now = Utc::now();
        let order_id = self.order_ids.next();

        let plan = engine.with_book(|book| {
            clob::plan_place(cfg, book, &req, order_id, &mut || self.trade_ids.next(), now)
        })?;

        let (plan, balances) = {
            let user = req.user_id.clone();
            let (base_ccy, quote_ccy) = (cfg.base.clone(), cfg.quote.clone());
            self.store
                .with_tx(move |tx| {
                    Box::pin(async move {
                        ledger::execute(tx, &plan.ledger_ops).await?;
                        store::orders::insert(tx, &plan.taker).await?;
                        for update in &plan.maker_updates {
                            store::orders::apply_fill(
                                tx,
                                update.order_id,
                                update.quantity,
                                update.status,
                                now,
                            )
                            .await?;
                        }
                        for trade in &plan.trades {
                            store::trades::insert(tx, trade).await?;
                        }
                        let views = balance_views(tx, &user, &base_ccy, &quote_ccy).await?;
                        Ok((plan, views))
                    })
                })
                .await?
        };

        engine.apply_place(req.side, &plan)?;
        self.publish_book_events(cfg, engine, &req.user_id, balances, &plan, now);

        tracing::info!(
            order_id,
            filled = %plan.taker.filled,
            status = %plan.taker.status,
            trades = plan.trades.len(),
            "Order placed"
        );

        Ok(trade_result_from_place(cfg, &plan, now))
    }

    #[tracing::instrument(skip(self), fields(user = %user_id, symbol = %symbol_input))]
    pub async fn cancel_order(
        &self,
        user_id: &str,
        symbol_input: &str,
        order_id: i64,
        deadline: Option<Duration>,
    ) -> ExchangeResult<Order> {
        let binding = self.cache.resolve(symbol_input).await?;
        binding.check_quarantine()?;
        binding.cfg.require_engine(EngineKind::Clob)?;
        let engine = binding.clob()?.clone();

        let _guard = self.lock_binding(&binding, deadline).await?;
        let result = self
            .cancel_order_locked(&binding, &engine, user_id, order_id)
            .await;
        self.guard_fatal(&binding, result)
    }

    async fn cancel_order_locked(
        &self,
        binding: &SymbolBinding,
        engine: &Arc<ClobEngine>,
        user_id: &str,
        order_id: i64,
    ) -> ExchangeResult<Order> {
        let cfg = binding.cfg.clone();
        let now = Utc::now();

        let (order, balances) = {
            let user = user_id.to_string();
            self.store
                .with_tx(move |tx| {
                    Box::pin(async move {
                        let order = store::orders::load_for_update(tx, order_id)
                            .await?
                            .filter(|o| o.symbol_id == cfg.id)
                            .ok_or(StateError::OrderNotFound(order_id))?;

                        let plan = clob::plan_cancel(&cfg, &order, &user, now)?;
                        ledger::execute(tx, &plan.ledger_ops).await?;
                        store::orders::mark_cancelled(tx, order_id, now).await?;

                        let views = balance_views(tx, &user, &cfg.base, &cfg.quote).await?;
                        Ok((plan.order, views))
                    })
                })
                .await?
        };

        engine.apply_cancel(order_id);

        let cfg = &binding.cfg;
        self.bus.publish(Event::orderbook(
            &cfg.symbol,
            &OrderbookEventData {
                symbol: cfg.symbol.clone(),
                depth: engine.depth(DEFAULT_DEPTH_LEVELS),
            },
        ));
        self.bus.publish(Event::user(
            user_id,
            &UserEventData {
                balances,
                pool_user: None,
            },
        ));

        tracing::info!(order_id, "Order cancelled");
        Ok(order)
    }

    /// Read-only aggregated depth; no mutex.
    pub async fn depth(
        &self,
        symbol_input: &str,
        levels: usize,
    ) -> ExchangeResult<(String, DepthSnapshot)> {
        let binding = self.cache.resolve(symbol_input).await?;
        binding.cfg.require_engine(EngineKind::Clob)?;
        Ok((binding.cfg.symbol.clone(), binding.clob()?.depth(levels)))
    }

    /// Read-only achievable-fill quote against the live ladders; no mutex.
    pub async fn quote_clob(
        &self,
        symbol_input: &str,
        side: Side,
        quantity: Decimal,
    ) -> ExchangeResult<ClobQuoteView> {
        let binding = self.cache.resolve(symbol_input).await?;
        binding.cfg.require_engine(EngineKind::Clob)?;
        let quantity = num::require_positive("quantity", quantity)?;
        let plan = binding.clob()?.quote(side, quantity);
        Ok(ClobQuoteView {
            symbol: binding.cfg.symbol.clone(),
            side,
            quantity,
            achievable: plan.taker_filled,
            vwap: plan.vwap(),
        })
    }

    // ============================================================================================
    // Metadata and user reads
    // ============================================================================================

    pub async fn list_markets(&self) -> ExchangeResult<Vec<SymbolConfig>> {
        store::symbols::list_active(self.store.pool()).await
    }

    pub async fn market(&self, symbol_input: &str) -> ExchangeResult<MarketView> {
        let binding = self.cache.resolve(symbol_input).await?;
        let view = match &binding.engine {
            crate::engine::binding::EngineHandle::Amm(engine) => {
                let pool = engine.snapshot();
                MarketView {
                    config: binding.cfg.clone(),
                    price: pool.spot_price(),
                    best_bid: None,
                    best_ask: None,
                }
            }
            crate::engine::binding::EngineHandle::Clob(engine) => MarketView {
                config: binding.cfg.clone(),
                price: None,
                best_bid: engine.best_bid(),
                best_ask: engine.best_ask(),
            },
        };
        Ok(view)
    }

    pub async fn user_trades(
        &self,
        user_id: &str,
        symbol_input: Option<&str>,
        engine: Option<EngineKind>,
        limit: i64,
    ) -> ExchangeResult<Vec<TradeView>> {
        let symbol_id = match symbol_input {
            Some(input) => {
                let canonical = symbol::canonicalize(input)?;
                let cfg = store::symbols::by_symbol(self.store.pool(), &canonical)
                    .await?
                    .ok_or(ValidationError::UnknownSymbol(canonical))?;
                Some(cfg.id)
            }
            None => None,
        };
        let trades =
            store::trades::list_for_user(self.store.pool(), user_id, symbol_id, engine, limit)
                .await?;

        // Join in the symbol strings, preferring live bindings over a store
        // round trip.
        let mut symbols: HashMap<i64, String> = HashMap::new();
        let mut views = Vec::with_capacity(trades.len());
        for trade in trades {
            let symbol = match symbols.get(&trade.symbol_id) {
                Some(symbol) => symbol.clone(),
                None => {
                    let symbol = match self.cache.get_by_id(trade.symbol_id) {
                        Some(binding) => binding.cfg.symbol.clone(),
                        None => store::symbols::by_id(self.store.pool(), trade.symbol_id)
                            .await?
                            .map(|cfg| cfg.symbol)
                            .ok_or_else(|| {
                                TransientError::Storage(format!(
                                    "trade {} references missing symbol {}",
                                    trade.id, trade.symbol_id
                                ))
                            })?,
                    };
                    symbols.insert(trade.symbol_id, symbol.clone());
                    symbol
                }
            };
            views.push(TradeView { symbol, trade });
        }
        Ok(views)
    }

    pub async fn user_balances(&self, user_id: &str) -> ExchangeResult<Vec<BalanceView>> {
        let rows = store::users::balances(self.store.pool(), user_id).await?;
        Ok(rows.iter().map(BalanceView::from).collect())
    }

    /// Moves available funds between two simulated accounts: an atomic
    /// debit + credit in one transaction. Both parties get a balance push.
    #[tracing::instrument(skip(self), fields(user = %user_id, to = %to_user))]
    pub async fn transfer(
        &self,
        user_id: &str,
        to_user: &str,
        currency: &str,
        amount: Decimal,
    ) -> ExchangeResult<Vec<BalanceView>> {
        let amount = num::require_positive("amount", amount)?;
        let currency = currency.to_ascii_uppercase();
        let recipient = store::users::by_id(self.store.pool(), to_user)
            .await?
            .filter(|u| u.active)
            .ok_or_else(|| ValidationError::UnknownUser(to_user.to_string()))?;

        let (from_view, to_view) = {
            let from = user_id.to_string();
            let to = recipient.id.clone();
            let ccy = currency.clone();
            self.store
                .with_tx(move |tx| {
                    Box::pin(async move {
                        ledger::transfer(tx, &from, &to, &ccy, amount).await?;
                        let (from_avail, from_locked) =
                            ledger::get_balance(tx, &from, &ccy).await?;
                        let (to_avail, to_locked) = ledger::get_balance(tx, &to, &ccy).await?;
                        Ok((
                            BalanceView {
                                currency: ccy.clone(),
                                available: from_avail,
                                locked: from_locked,
                                balance: from_avail + from_locked,
                            },
                            BalanceView {
                                currency: ccy,
                                available: to_avail,
                                locked: to_locked,
                                balance: to_avail + to_locked,
                            },
                        ))
                    })
                })
                .await?
        };

        self.bus.publish(Event::user(
            user_id,
            &UserEventData {
                balances: vec![from_view.clone()],
                pool_user: None,
            },
        ));
        self.bus.publish(Event::user(
            &recipient.id,
            &UserEventData {
                balances: vec![to_view],
                pool_user: None,
            },
        ));

        tracing::info!(%currency, %amount, "Transfer committed");
        Ok(vec![from_view])
    }

    /// Admin symbol creation. Creates the pool row for AMM symbols and
    /// invalidates any stale binding.
    #[tracing::instrument(skip(self, new))]
    pub async fn create_symbol(&self, new: NewSymbol) -> ExchangeResult<SymbolConfig> {
        let now = Utc::now();
        let canonical = symbol::canonical_symbol(&new.base, &new.quote, &new.settle, new.market);
        let mut cfg = SymbolConfig {
            id: 0,
            symbol: canonical.clone(),
            base: new.base.to_ascii_uppercase(),
            quote: new.quote.to_ascii_uppercase(),
            settle: new.settle.to_ascii_uppercase(),
            market: new.market,
            engine: new.engine,
            price_precision: new.price_precision,
            qty_precision: new.qty_precision,
            min_trade_amount: new.min_trade_amount,
            max_trade_amount: new.max_trade_amount,
            fee_rate: new.fee_rate,
            engine_params: new.engine_params,
            active: true,
            settle_at: new.settle_at,
            created_at: now,
            updated_at: now,
        };
        if cfg.fee_rate < Decimal::ZERO || cfg.fee_rate >= Decimal::ONE {
            return Err(ValidationError::MalformedAmount {
                field: "fee_rate",
                value: cfg.fee_rate.to_string(),
            }
            .into());
        }

        let pool_id = match new.engine {
            EngineKind::Amm => Some(self.cache.mint_pool_id().await?),
            EngineKind::Clob => None,
        };

        let id = {
            let cfg_tx = cfg.clone();
            self.store
                .with_tx(move |tx| {
                    Box::pin(async move {
                        let id = store::symbols::insert(tx, &cfg_tx).await?;
                        if let Some(pool_id) = pool_id {
                            store::pools::upsert(
                                tx,
                                &PoolState {
                                    pool_id,
                                    symbol_id: id,
                                    reserve_base: Decimal::ZERO,
                                    reserve_quote: Decimal::ZERO,
                                    k: Decimal::ZERO,
                                    fee_rate: cfg_tx.fee_rate,
                                    total_lp_shares: Decimal::ZERO,
                                    volume_base: Decimal::ZERO,
                                    volume_quote: Decimal::ZERO,
                                    fees_cumulative: Decimal::ZERO,
                                    created_at: now,
                                    updated_at: now,
                                },
                            )
                            .await?;
                        }
                        Ok(id)
                    })
                })
                .await?
        };

        cfg.id = id;
        self.cache.invalidate(&canonical);
        tracing::info!(symbol = %canonical, id, engine = %cfg.engine, "Symbol created");
        Ok(cfg)
    }

    // ============================================================================================
    // Internals
    // ============================================================================================

    async fn lock_binding<'a>(
        &self,
        binding: &'a SymbolBinding,
        deadline: Option<Duration>,
    ) -> ExchangeResult<tokio::sync::MutexGuard<'a, ()>> {
        let wait = deadline.unwrap_or(self.lock_timeout);
        tokio::time::timeout(wait, binding.lock.lock())
            .await
            .map_err(|_| TransientError::DeadlineExceeded("awaiting symbol lock").into())
    }

    /// Quarantines the binding on a fatal error and raises an alert.
    fn guard_fatal<T>(
        &self,
        binding: &SymbolBinding,
        result: ExchangeResult<T>,
    ) -> ExchangeResult<T> {
        if let Err(e) = &result
            && e.is_fatal()
        {
            tracing::error!(
                symbol = %binding.cfg.symbol,
                error = %e,
                "Invariant violation; quarantining symbol"
            );
            binding.quarantine();
            self.bus
                .publish(Event::alert(&binding.cfg.symbol, &e.to_string()));
        }
        result
    }

    fn publish_pool_and_user(
        &self,
        cfg: &SymbolConfig,
        next: &PoolState,
        user_id: &str,
        balances: Vec<BalanceView>,
        position: Option<&LpPosition>,
    ) {
        self.bus.publish(Event::pool(
            &cfg.symbol,
            &PoolEventData {
                pool_id: next.pool_id.clone(),
                symbol: cfg.symbol.clone(),
                reserve_base: next.reserve_base,
                reserve_quote: next.reserve_quote,
                price: next.spot_price(),
                total_lp_shares: next.total_lp_shares,
                trade: None,
            },
        ));
        self.bus.publish(Event::user(
            user_id,
            &UserEventData {
                balances,
                pool_user: position.map(|p| lp_position_view(cfg, next, p)),
            },
        ));
    }

    fn publish_book_events(
        &self,
        cfg: &SymbolConfig,
        engine: &Arc<ClobEngine>,
        user_id: &str,
        balances: Vec<BalanceView>,
        plan: &PlacePlan,
        now: DateTime<Utc>,
    ) {
        self.bus.publish(Event::orderbook(
            &cfg.symbol,
            &OrderbookEventData {
                symbol: cfg.symbol.clone(),
                depth: engine.depth(DEFAULT_DEPTH_LEVELS),
            },
        ));
        self.bus.publish(Event::user(
            user_id,
            &UserEventData {
                balances,
                pool_user: None,
            },
        ));
        for trade in &plan.trades {
            self.bus.publish(Event::trade(&TradeTick {
                symbol: cfg.symbol.clone(),
                engine: EngineKind::Clob,
                side: trade.side,
                price: trade.price,
                quantity: trade.quantity,
                created_at: now,
            }));
        }
    }
}

pub const DEFAULT_DEPTH_LEVELS: usize = 20;

async fn balance_views(
    tx: &mut store::StoreTx,
    user_id: &str,
    base: &str,
    quote: &str,
) -> ExchangeResult<Vec<BalanceView>> {
    let mut views = Vec::with_capacity(2);
    for currency in [base, quote] {
        let (available, locked) = ledger::get_balance(tx, user_id, currency).await?;
        views.push(BalanceView {
            currency: currency.to_string(),
            available,
            locked,
            balance: available + locked,
        });
    }
    Ok(views)
}

fn swap_quote_view(cfg: &SymbolConfig, quote: &SwapQuote) -> SwapQuoteView {
    SwapQuoteView {
        symbol: cfg.symbol.clone(),
        side: quote.side,
        amount_in: quote.amount_in,
        amount_out: quote.amount_out,
        fee_amount: quote.fee_amount,
        execution_price: num::round_display(quote.execution_price, cfg.price_precision),
        spot_price: num::round_display(quote.spot_price, cfg.price_precision),
        price_impact: quote.price_impact,
    }
}

fn lp_position_view(cfg: &SymbolConfig, pool: &PoolState, position: &LpPosition) -> LpPositionView {
    let share = if pool.total_lp_shares.is_zero() {
        Decimal::ZERO
    } else {
        position.lp_shares / pool.total_lp_shares
    };
    LpPositionView {
        pool_id: pool.pool_id.clone(),
        symbol: cfg.symbol.clone(),
        lp_shares: position.lp_shares,
        share_of_pool: share,
        value_base: num::to_store_scale(share * pool.reserve_base),
        value_quote: num::to_store_scale(share * pool.reserve_quote),
        initial_base: position.initial_base,
        initial_quote: position.initial_quote,
    }
}

fn trade_result_from_place(cfg: &SymbolConfig, plan: &PlacePlan, now: DateTime<Utc>) -> TradeResult {
    let quote_amount: Decimal = plan.trades.iter().map(|t| t.quote_amount).sum();
    let fee_amount: Decimal = plan.trades.iter().map(|t| t.fee_amount).sum();
    let vwap = plan.match_plan.vwap();
    TradeResult {
        symbol: cfg.symbol.clone(),
        engine: EngineKind::Clob,
        side: plan.taker.side,
        order_id: Some(plan.taker.id),
        trade_ids: plan.trades.iter().map(|t| t.id).collect(),
        price: vwap.map(|p| num::round_display(p, cfg.price_precision)),
        quantity: plan.taker.filled,
        quote_amount,
        fee_amount,
        fee_asset: plan.trades.first().map(|t| t.fee_asset.clone()),
        status: plan.taker.status,
        created_at: now,
    }
}
