//! Central limit order book engine.
//!
//! Planning is pure: [`plan_place`] and [`plan_cancel`] read a book snapshot
//! and produce the complete outcome — the taker's final row, maker row
//! updates, trade rows, and the ledger op sequence — without touching the
//! book. The router persists the plan inside a transaction and applies it to
//! the ladders only after commit.
//!
//! Fund locking rules:
//! - limit buy locks `price · quantity` quote; limit sell locks `quantity` base,
//! - market buy locks the best-path quote estimate; market sell locks base,
//! - fees come out of the received leg of each side, so no extra lock is needed.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde_json::json;

use crate::{
    domain::{
        Side,
        order::{Order, OrderStatus, OrderType},
        symbol::SymbolConfig,
        trade::{Trade, TradeStatus},
        EngineKind,
    },
    engine::book::{Book, DepthSnapshot, MatchPlan, RestingOrder},
    error::{ExchangeResult, FatalError, StateError, ValidationError},
    ledger::LedgerOp,
    num,
};

#[derive(Debug, Clone)]
pub struct PlaceRequest {
    pub user_id: String,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
}

/// One maker row mutation produced by a match.
#[derive(Debug, Clone)]
pub struct MakerUpdate {
    pub order_id: i64,
    pub quantity: Decimal,
    pub status: OrderStatus,
}

/// The complete, not-yet-applied outcome of placing an order.
#[derive(Debug)]
pub struct PlacePlan {
    /// Final state of the taker's order row.
    pub taker: Order,
    pub maker_updates: Vec<MakerUpdate>,
    pub trades: Vec<Trade>,
    pub ledger_ops: Vec<LedgerOp>,
    /// Unfilled limit remainder to rest on the book after commit.
    pub rest: Option<RestingOrder>,
    /// Ladder mutations to apply after commit.
    pub match_plan: MatchPlan,
}

/// The complete, not-yet-applied outcome of a cancel.
#[derive(Debug)]
pub struct CancelPlan {
    pub order: Order,
    pub ledger_ops: Vec<LedgerOp>,
}

/// Fee on the received leg, truncated at the symbol's price precision.
fn fee_on(cfg: &SymbolConfig, received: Decimal) -> Decimal {
    num::trunc(cfg.fee_rate * received, cfg.price_precision)
}

/// Plans an order placement against a book snapshot. Pure.
pub fn plan_place(
    cfg: &SymbolConfig,
    book: &Book,
    req: &PlaceRequest,
    order_id: i64,
    next_trade_id: &mut dyn FnMut() -> i64,
    now: DateTime<Utc>,
) -> ExchangeResult<PlacePlan> {
    cfg.validate_quantity(req.quantity)?;
    let limit = match req.order_type {
        OrderType::Limit => {
            let price = req.price.ok_or(ValidationError::MissingLimitPrice)?;
            if price <= Decimal::ZERO {
                return Err(ValidationError::MissingLimitPrice.into());
            }
            Some(price)
        }
        OrderType::Market => None,
    };

    let mut taker = match limit {
        Some(price) => Order::new_limit(
            order_id,
            cfg.id,
            req.user_id.clone(),
            req.side,
            price,
            req.quantity,
            now,
        ),
        None => Order::new_market(
            order_id,
            cfg.id,
            req.user_id.clone(),
            req.side,
            req.quantity,
            now,
        ),
    };

    let mut plan = book.plan_match(req.side, limit, req.quantity);
    drop_zero_effective_fills(cfg, &mut plan);

    let mut ops = Vec::new();

    // Lock the taker's spending leg up front; the lock itself is the funds
    // precondition and aborts the transaction when short.
    let lock_amount = match (req.side, limit) {
        (Side::Buy, Some(price)) => price * req.quantity,
        (Side::Buy, None) => plan.quote_total,
        (Side::Sell, _) => req.quantity,
    };
    let lock_currency = match req.side {
        Side::Buy => cfg.quote.clone(),
        Side::Sell => cfg.base.clone(),
    };
    if !lock_amount.is_zero() {
        ops.push(LedgerOp::Lock {
            user_id: req.user_id.clone(),
            currency: lock_currency.clone(),
            amount: lock_amount,
        });
    }

    let mut maker_updates = Vec::with_capacity(plan.fills.len());
    let mut trades = Vec::with_capacity(plan.fills.len());

    for fill in &plan.fills {
        let quote_leg = fill.price * fill.quantity;
        taker.record_fill(fill.quantity, now)?;

        let maker_status = if fill.maker_remaining_after.is_zero() {
            OrderStatus::Filled
        } else {
            OrderStatus::Partial
        };
        maker_updates.push(MakerUpdate {
            order_id: fill.maker_order_id,
            quantity: fill.quantity,
            status: maker_status,
        });

        let (taker_fee, fee_asset) = match req.side {
            Side::Buy => {
                // Taker's locked quote settles at the maker's price; any
                // price improvement over the limit unlocks immediately.
                ops.push(LedgerOp::Settle {
                    user_id: req.user_id.clone(),
                    currency: cfg.quote.clone(),
                    amount: quote_leg,
                });
                if let Some(limit) = limit {
                    let improvement = (limit - fill.price) * fill.quantity;
                    if improvement > Decimal::ZERO {
                        ops.push(LedgerOp::Unlock {
                            user_id: req.user_id.clone(),
                            currency: cfg.quote.clone(),
                            amount: improvement,
                        });
                    }
                }
                let maker_fee = fee_on(cfg, quote_leg);
                ops.push(LedgerOp::Settle {
                    user_id: fill.maker_user_id.clone(),
                    currency: cfg.base.clone(),
                    amount: fill.quantity,
                });
                ops.push(LedgerOp::Credit {
                    user_id: fill.maker_user_id.clone(),
                    currency: cfg.quote.clone(),
                    amount: quote_leg - maker_fee,
                });
                let taker_fee = fee_on(cfg, fill.quantity);
                ops.push(LedgerOp::Credit {
                    user_id: req.user_id.clone(),
                    currency: cfg.base.clone(),
                    amount: fill.quantity - taker_fee,
                });
                (taker_fee, cfg.base.clone())
            }
            Side::Sell => {
                ops.push(LedgerOp::Settle {
                    user_id: req.user_id.clone(),
                    currency: cfg.base.clone(),
                    amount: fill.quantity,
                });
                // The maker locked quote at its own limit price, which is
                // also the execution price.
                let maker_fee = fee_on(cfg, fill.quantity);
                ops.push(LedgerOp::Settle {
                    user_id: fill.maker_user_id.clone(),
                    currency: cfg.quote.clone(),
                    amount: quote_leg,
                });
                ops.push(LedgerOp::Credit {
                    user_id: fill.maker_user_id.clone(),
                    currency: cfg.base.clone(),
                    amount: fill.quantity - maker_fee,
                });
                let taker_fee = fee_on(cfg, quote_leg);
                ops.push(LedgerOp::Credit {
                    user_id: req.user_id.clone(),
                    currency: cfg.quote.clone(),
                    amount: quote_leg - taker_fee,
                });
                (taker_fee, cfg.quote.clone())
            }
        };

        trades.push(Trade {
            id: next_trade_id(),
            symbol_id: cfg.id,
            user_id: req.user_id.clone(),
            side: req.side,
            engine: EngineKind::Clob,
            price: fill.price,
            quantity: fill.quantity,
            quote_amount: num::trunc(quote_leg, cfg.qty_precision),
            fee_amount: taker_fee,
            fee_asset,
            status: TradeStatus::Filled,
            counterparty: Some(fill.maker_user_id.clone()),
            engine_data: json!({
                "maker_order_id": fill.maker_order_id,
                "taker_order_id": order_id,
            }),
            created_at: now,
        });
    }

    // Terminal handling of the incoming order.
    let mut rest = None;
    match req.order_type {
        OrderType::Limit => {
            if let Some(price) = limit
                && !taker.remaining().is_zero()
            {
                // Remainder rests; its locked funds stay locked.
                rest = Some(RestingOrder {
                    id: taker.id,
                    user_id: taker.user_id.clone(),
                    price,
                    quantity: taker.quantity,
                    remaining: taker.remaining(),
                });
            }
        }
        OrderType::Market => {
            let remaining = taker.remaining();
            if !remaining.is_zero() {
                // Cancel the remainder and release anything over-locked.
                if req.side == Side::Sell {
                    ops.push(LedgerOp::Unlock {
                        user_id: req.user_id.clone(),
                        currency: cfg.base.clone(),
                        amount: remaining,
                    });
                }
                if taker.filled.is_zero() {
                    taker.cancel(now)?;
                } else {
                    // Partially matched market orders report as filled.
                    taker.status = OrderStatus::Filled;
                    taker.filled_at = Some(now);
                }
            }
        }
    }

    Ok(PlacePlan {
        taker,
        maker_updates,
        trades,
        ledger_ops: ops,
        rest,
        match_plan: plan,
    })
}

/// Plans a cancel against the order's persisted row. Pure.
///
/// Only the owner may cancel; foreign orders read as not found. Unlocks
/// exactly `remaining · price` quote for buys and `remaining` base for sells.
pub fn plan_cancel(
    cfg: &SymbolConfig,
    order: &Order,
    user_id: &str,
    now: DateTime<Utc>,
) -> ExchangeResult<CancelPlan> {
    if order.user_id != user_id {
        return Err(StateError::OrderNotFound(order.id).into());
    }

    let mut cancelled = order.clone();
    cancelled.cancel(now)?;

    let remaining = order.remaining();
    let op = match order.side {
        Side::Buy => {
            let price = order.price.ok_or_else(|| {
                FatalError::InvariantViolation(format!("resting buy {} without price", order.id))
            })?;
            LedgerOp::Unlock {
                user_id: order.user_id.clone(),
                currency: cfg.quote.clone(),
                amount: price * remaining,
            }
        }
        Side::Sell => LedgerOp::Unlock {
            user_id: order.user_id.clone(),
            currency: cfg.base.clone(),
            amount: remaining,
        },
    };

    Ok(CancelPlan {
        order: cancelled,
        ledger_ops: vec![op],
    })
}

/// Drops the tail of a match plan once a fill's `quote_amount` would truncate
/// to zero; such a match is never produced.
fn drop_zero_effective_fills(cfg: &SymbolConfig, plan: &mut MatchPlan) {
    let cut = plan
        .fills
        .iter()
        .position(|f| {
            f.quantity.is_zero() || num::trunc(f.price * f.quantity, cfg.qty_precision).is_zero()
        })
        .unwrap_or(plan.fills.len());
    if cut == plan.fills.len() {
        return;
    }
    for dropped in plan.fills.drain(cut..) {
        plan.taker_filled -= dropped.quantity;
        plan.taker_remaining += dropped.quantity;
        plan.quote_total -= dropped.price * dropped.quantity;
    }
}

// ================================================================================================
// Engine handle
// ================================================================================================

/// Singleton per-symbol CLOB handle. The book is authoritative in memory;
/// the router plans under a read guard, persists, then applies under a write
/// guard — all inside the symbol mutex.
#[derive(Debug)]
pub struct ClobEngine {
    book: RwLock<Book>,
}

impl ClobEngine {
    /// Rehydrates the book from persisted open/partial orders, oldest first.
    pub fn rehydrate(open_orders: Vec<Order>) -> ExchangeResult<Self> {
        let mut book = Book::new();
        for order in open_orders {
            let price = order.price.ok_or_else(|| {
                FatalError::InvariantViolation(format!("open order {} without price", order.id))
            })?;
            book.insert(
                order.side,
                RestingOrder {
                    id: order.id,
                    user_id: order.user_id.clone(),
                    price,
                    quantity: order.quantity,
                    remaining: order.remaining(),
                },
            )?;
        }
        Ok(Self {
            book: RwLock::new(book),
        })
    }

    pub fn with_book<T>(&self, f: impl FnOnce(&Book) -> T) -> T {
        f(&self.book.read())
    }

    pub fn depth(&self, levels: usize) -> DepthSnapshot {
        self.book.read().depth(levels)
    }

    pub fn best_bid(&self) -> Option<Decimal> {
        self.book.read().best_bid()
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.book.read().best_ask()
    }

    /// Achievable fill and VWAP for a hypothetical taker. Read-only.
    pub fn quote(&self, side: Side, quantity: Decimal) -> MatchPlan {
        self.book.read().plan_match(side, None, quantity)
    }

    /// Applies a committed placement to the ladders.
    pub fn apply_place(&self, taker_side: Side, plan: &PlacePlan) -> ExchangeResult<()> {
        let mut book = self.book.write();
        book.apply_plan(taker_side, &plan.match_plan)?;
        if let Some(rest) = &plan.rest {
            book.insert(taker_side, rest.clone())?;
        }
        Ok(())
    }

    /// Removes a committed cancel's order from the ladders.
    pub fn apply_cancel(&self, order_id: i64) {
        self.book.write().remove(order_id);
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn make_cfg() -> SymbolConfig {
        let now = Utc::now();
        SymbolConfig {
            id: 7,
            symbol: "ORDER/USDT-USDT:SPOT".to_string(),
            base: "ORDER".to_string(),
            quote: "USDT".to_string(),
            settle: "USDT".to_string(),
            market: crate::domain::MarketClass::Spot,
            engine: EngineKind::Clob,
            price_precision: 8,
            qty_precision: 8,
            min_trade_amount: dec!(0.0001),
            max_trade_amount: dec!(1000000),
            fee_rate: dec!(0.003),
            engine_params: serde_json::Value::Object(Default::default()),
            active: true,
            settle_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn seeded_book() -> Book {
        // Resting asks at 10: qty 5 (t=1), qty 3 (t=2).
        let mut book = Book::new();
        book.insert(
            Side::Sell,
            RestingOrder {
                id: 1,
                user_id: "200001".to_string(),
                price: dec!(10),
                quantity: dec!(5),
                remaining: dec!(5),
            },
        )
        .unwrap();
        book.insert(
            Side::Sell,
            RestingOrder {
                id: 2,
                user_id: "200002".to_string(),
                price: dec!(10),
                quantity: dec!(3),
                remaining: dec!(3),
            },
        )
        .unwrap();
        book
    }

    fn trade_ids() -> impl FnMut() -> i64 {
        let mut next = 1700000000000i64;
        move || {
            next += 1;
            next
        }
    }

    fn buy_limit(quantity: Decimal, price: Decimal) -> PlaceRequest {
        PlaceRequest {
            user_id: "100001".to_string(),
            side: Side::Buy,
            order_type: OrderType::Limit,
            quantity,
            price: Some(price),
        }
    }

    /// Taker buy limit 10 x 6 against asks (5 @ t1, 3 @ t2): 5 from t1
    /// (filled), 1 from t2 (partial, remaining 2); taker filled; two trades
    /// in arrival order, both at 10.
    #[test]
    fn partial_match_fills_in_arrival_order() {
        let cfg = make_cfg();
        let book = seeded_book();
        let mut ids = trade_ids();
        let plan = plan_place(
            &cfg,
            &book,
            &buy_limit(dec!(6), dec!(10)),
            1700000000500,
            &mut ids,
            Utc::now(),
        )
        .unwrap();

        assert_eq!(plan.taker.status, OrderStatus::Filled);
        assert_eq!(plan.taker.filled, dec!(6));
        assert!(plan.rest.is_none());

        assert_eq!(plan.maker_updates.len(), 2);
        assert_eq!(plan.maker_updates[0].order_id, 1);
        assert_eq!(plan.maker_updates[0].status, OrderStatus::Filled);
        assert_eq!(plan.maker_updates[1].order_id, 2);
        assert_eq!(plan.maker_updates[1].status, OrderStatus::Partial);
        assert_eq!(plan.maker_updates[1].quantity, dec!(1));

        assert_eq!(plan.trades.len(), 2);
        assert!(plan.trades.iter().all(|t| t.price == dec!(10)));
        assert_eq!(plan.trades[0].counterparty.as_deref(), Some("200001"));
        assert_eq!(plan.trades[1].counterparty.as_deref(), Some("200002"));
        assert!(plan.trades[0].id < plan.trades[1].id);

        // Every trade id sums back to the taker's filled quantity.
        let traded: Decimal = plan.trades.iter().map(|t| t.quantity).sum();
        assert_eq!(traded, plan.taker.filled);
    }

    /// Taker qty 4: only the older maker is touched.
    #[test]
    fn time_priority_at_equal_price() {
        let cfg = make_cfg();
        let book = seeded_book();
        let mut ids = trade_ids();
        let plan = plan_place(
            &cfg,
            &book,
            &buy_limit(dec!(4), dec!(10)),
            1700000000500,
            &mut ids,
            Utc::now(),
        )
        .unwrap();

        assert_eq!(plan.maker_updates.len(), 1);
        assert_eq!(plan.maker_updates[0].order_id, 1);
        assert_eq!(plan.maker_updates[0].status, OrderStatus::Partial);
        assert_eq!(plan.trades.len(), 1);
        assert_eq!(plan.trades[0].quantity, dec!(4));
    }

    /// Buy limit 9 x 10 with an empty book: locks 90 quote and rests.
    #[test]
    fn unmatched_limit_locks_and_rests() {
        let cfg = make_cfg();
        let book = Book::new();
        let mut ids = trade_ids();
        let plan = plan_place(
            &cfg,
            &book,
            &buy_limit(dec!(10), dec!(9)),
            1700000000500,
            &mut ids,
            Utc::now(),
        )
        .unwrap();

        assert_eq!(plan.taker.status, OrderStatus::Open);
        assert_eq!(
            plan.ledger_ops,
            vec![LedgerOp::Lock {
                user_id: "100001".to_string(),
                currency: "USDT".to_string(),
                amount: dec!(90),
            }]
        );
        let rest = plan.rest.as_ref().unwrap();
        assert_eq!(rest.remaining, dec!(10));
        assert_eq!(rest.price, dec!(9));
    }

    /// Cancelling a resting buy unlocks exactly `remaining · price`.
    #[test]
    fn cancel_unlocks_remaining_quote() {
        let cfg = make_cfg();
        let order = Order::new_limit(
            1700000000500,
            cfg.id,
            "100001".to_string(),
            Side::Buy,
            dec!(9),
            dec!(10),
            Utc::now(),
        );

        let plan = plan_cancel(&cfg, &order, "100001", Utc::now()).unwrap();
        assert_eq!(plan.order.status, OrderStatus::Cancelled);
        assert!(plan.order.cancelled_at.is_some());
        assert_eq!(
            plan.ledger_ops,
            vec![LedgerOp::Unlock {
                user_id: "100001".to_string(),
                currency: "USDT".to_string(),
                amount: dec!(90),
            }]
        );
    }

    #[test]
    fn cancel_is_owner_only_and_not_idempotent_on_terminal() {
        let cfg = make_cfg();
        let mut order = Order::new_limit(
            1700000000500,
            cfg.id,
            "100001".to_string(),
            Side::Buy,
            dec!(9),
            dec!(10),
            Utc::now(),
        );

        // Foreign user reads as not-found.
        let err = plan_cancel(&cfg, &order, "999999", Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            crate::error::ExchangeError::State(StateError::OrderNotFound(_))
        ));

        // Terminal orders are not cancellable a second time.
        order.cancel(Utc::now()).unwrap();
        let err = plan_cancel(&cfg, &order, "100001", Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            crate::error::ExchangeError::State(StateError::OrderNotCancellable(_))
        ));
    }

    /// Fees are charged on the received leg of both sides.
    #[test]
    fn fees_come_out_of_received_legs() {
        let cfg = make_cfg();
        let book = seeded_book();
        let mut ids = trade_ids();
        let plan = plan_place(
            &cfg,
            &book,
            &buy_limit(dec!(5), dec!(10)),
            1700000000500,
            &mut ids,
            Utc::now(),
        )
        .unwrap();

        // Taker receives 5 base minus 0.3% = 4.985; maker receives 50 quote
        // minus 0.3% = 49.85.
        let taker_base_credit = plan.ledger_ops.iter().find_map(|op| match op {
            LedgerOp::Credit {
                user_id, currency, amount,
            } if user_id == "100001" && currency == "ORDER" => Some(*amount),
            _ => None,
        });
        assert_eq!(taker_base_credit, Some(dec!(4.985)));

        let maker_quote_credit = plan.ledger_ops.iter().find_map(|op| match op {
            LedgerOp::Credit {
                user_id, currency, amount,
            } if user_id == "200001" && currency == "USDT" => Some(*amount),
            _ => None,
        });
        assert_eq!(maker_quote_credit, Some(dec!(49.85)));

        assert_eq!(plan.trades[0].fee_amount, dec!(0.015));
        assert_eq!(plan.trades[0].fee_asset, "ORDER");
    }

    /// A buy limit above the best ask settles at the maker's price and
    /// unlocks the improvement.
    #[test]
    fn price_improvement_unlocks_excess_quote() {
        let cfg = make_cfg();
        let book = seeded_book();
        let mut ids = trade_ids();
        let plan = plan_place(
            &cfg,
            &book,
            &buy_limit(dec!(5), dec!(11)),
            1700000000500,
            &mut ids,
            Utc::now(),
        )
        .unwrap();

        // Locked 55, settled 50, unlocked 5 improvement.
        assert!(plan.ledger_ops.contains(&LedgerOp::Lock {
            user_id: "100001".to_string(),
            currency: "USDT".to_string(),
            amount: dec!(55),
        }));
        assert!(plan.ledger_ops.contains(&LedgerOp::Settle {
            user_id: "100001".to_string(),
            currency: "USDT".to_string(),
            amount: dec!(50),
        }));
        assert!(plan.ledger_ops.contains(&LedgerOp::Unlock {
            user_id: "100001".to_string(),
            currency: "USDT".to_string(),
            amount: dec!(5),
        }));
        assert_eq!(plan.trades[0].price, dec!(10));
    }

    /// Market sell with a thin book fills what it can, unlocks the rest, and
    /// reports filled.
    #[test]
    fn market_remainder_is_cancelled_and_unlocked() {
        let cfg = make_cfg();
        let mut book = Book::new();
        book.insert(
            Side::Buy,
            RestingOrder {
                id: 3,
                user_id: "200003".to_string(),
                price: dec!(9),
                quantity: dec!(2),
                remaining: dec!(2),
            },
        )
        .unwrap();

        let req = PlaceRequest {
            user_id: "100001".to_string(),
            side: Side::Sell,
            order_type: OrderType::Market,
            quantity: dec!(5),
            price: None,
        };
        let mut ids = trade_ids();
        let plan = plan_place(&cfg, &book, &req, 1700000000500, &mut ids, Utc::now()).unwrap();

        assert_eq!(plan.taker.filled, dec!(2));
        assert_eq!(plan.taker.status, OrderStatus::Filled);
        assert!(plan.rest.is_none());
        assert!(plan.ledger_ops.contains(&LedgerOp::Unlock {
            user_id: "100001".to_string(),
            currency: "ORDER".to_string(),
            amount: dec!(3),
        }));
    }

    #[test]
    fn market_with_no_liquidity_is_cancelled() {
        let cfg = make_cfg();
        let book = Book::new();
        let req = PlaceRequest {
            user_id: "100001".to_string(),
            side: Side::Buy,
            order_type: OrderType::Market,
            quantity: dec!(5),
            price: None,
        };
        let mut ids = trade_ids();
        let plan = plan_place(&cfg, &book, &req, 1700000000500, &mut ids, Utc::now()).unwrap();

        assert_eq!(plan.taker.status, OrderStatus::Cancelled);
        assert!(plan.trades.is_empty());
        // Nothing to lock against an empty book.
        assert!(plan.ledger_ops.is_empty());
    }

    #[test]
    fn quantity_bounds_are_enforced() {
        let cfg = make_cfg();
        let book = Book::new();
        let mut ids = trade_ids();
        let err = plan_place(
            &cfg,
            &book,
            &buy_limit(dec!(0.00000001), dec!(10)),
            1700000000500,
            &mut ids,
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            crate::error::ExchangeError::Validation(ValidationError::QuantityOutOfBounds { .. })
        ));
    }

    #[test]
    fn rehydrated_engine_matches_like_a_live_book() {
        let cfg = make_cfg();
        let now = Utc::now();
        let mut resting = Order::new_limit(
            1,
            cfg.id,
            "200001".to_string(),
            Side::Sell,
            dec!(10),
            dec!(5),
            now,
        );
        resting.record_fill(dec!(1), now).unwrap();

        let engine = ClobEngine::rehydrate(vec![resting]).unwrap();
        let quote = engine.quote(Side::Buy, dec!(10));
        assert_eq!(quote.taker_filled, dec!(4));
        assert_eq!(quote.vwap().unwrap(), dec!(10));

        let depth = engine.depth(20);
        assert_eq!(depth.asks[0].quantity, dec!(4));
        assert!(depth.bids.is_empty());
    }
}
