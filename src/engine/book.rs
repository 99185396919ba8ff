//! In-memory price-time order book.
//!
//! Two price-ordered ladders of resting orders with FIFO queues at each
//! price, plus incrementally-maintained aggregated depth. The book is
//! authoritative for matching; every mutation is mirrored to the store
//! within the same critical section (see the router).
//!
//! Matching is split into a read-only planning pass ([`Book::plan_match`])
//! and an apply pass ([`Book::apply_plan`]). The router plans against the
//! live book, persists the outcome, and applies the plan only after the
//! transaction commits, so a storage failure leaves the ladders untouched.

use std::collections::{BTreeMap, HashMap, VecDeque};

use rust_decimal::Decimal;
use serde::Serialize;

use crate::{
    domain::Side,
    error::{ExchangeResult, FatalError, StateError},
};

/// The slice of an order the ladders need for matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestingOrder {
    pub id: i64,
    pub user_id: String,
    pub price: Decimal,
    pub quantity: Decimal,
    pub remaining: Decimal,
}

/// One planned maker fill, in match order.
#[derive(Debug, Clone)]
pub struct PlannedFill {
    pub maker_order_id: i64,
    pub maker_user_id: String,
    pub price: Decimal,
    pub quantity: Decimal,
    pub maker_remaining_after: Decimal,
}

/// Outcome of a read-only matching pass.
#[derive(Debug, Clone, Default)]
pub struct MatchPlan {
    pub fills: Vec<PlannedFill>,
    pub taker_filled: Decimal,
    pub taker_remaining: Decimal,
    /// Σ price · quantity over the fills, full precision.
    pub quote_total: Decimal,
}

impl MatchPlan {
    /// Volume-weighted average price of the planned fills.
    pub fn vwap(&self) -> Option<Decimal> {
        if self.taker_filled.is_zero() {
            None
        } else {
            Some(self.quote_total / self.taker_filled)
        }
    }
}

/// Aggregated top-of-book view, best price first on both sides.
#[derive(Debug, Clone, Serialize)]
pub struct DepthSnapshot {
    pub bids: Vec<DepthLevel>,
    pub asks: Vec<DepthLevel>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DepthLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

#[derive(Debug, Default)]
pub struct Book {
    bids: BTreeMap<Decimal, VecDeque<RestingOrder>>,
    asks: BTreeMap<Decimal, VecDeque<RestingOrder>>,
    depth_bids: BTreeMap<Decimal, Decimal>,
    depth_asks: BTreeMap<Decimal, Decimal>,
    /// order id → (side, price) for O(log n) cancel.
    locations: HashMap<i64, (Side, Decimal)>,
}

impl Book {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.last_key_value().map(|(p, _)| *p)
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first_key_value().map(|(p, _)| *p)
    }

    pub fn contains(&self, order_id: i64) -> bool {
        self.locations.contains_key(&order_id)
    }

    /// Rests an order at its price's FIFO tail.
    pub fn insert(&mut self, side: Side, order: RestingOrder) -> ExchangeResult<()> {
        if self.locations.contains_key(&order.id) {
            return Err(StateError::DuplicateOrder(order.id).into());
        }
        self.locations.insert(order.id, (side, order.price));

        let (ladder, depth) = self.side_mut(side);
        *depth.entry(order.price).or_default() += order.remaining;
        ladder.entry(order.price).or_default().push_back(order);
        Ok(())
    }

    /// Removes a resting order (cancel path).
    pub fn remove(&mut self, order_id: i64) -> Option<RestingOrder> {
        let (side, price) = self.locations.remove(&order_id)?;
        let (ladder, depth) = self.side_mut(side);

        let queue = ladder.get_mut(&price)?;
        let idx = queue.iter().position(|o| o.id == order_id)?;
        let order = queue.remove(idx)?;
        if queue.is_empty() {
            ladder.remove(&price);
        }

        match depth.get_mut(&price) {
            Some(level) => {
                *level -= order.remaining;
                if level.is_zero() {
                    depth.remove(&price);
                }
            }
            None => {}
        }
        Some(order)
    }

    /// Walks the opposite ladder for a taker of `side` without mutating.
    ///
    /// `limit` of `None` matches at any price (market semantics). Equal
    /// prices are served strictly in arrival order.
    pub fn plan_match(
        &self,
        side: Side,
        limit: Option<Decimal>,
        quantity: Decimal,
    ) -> MatchPlan {
        let mut plan = MatchPlan {
            taker_remaining: quantity,
            ..MatchPlan::default()
        };

        // Opposite ladder, best price first.
        let levels: Box<dyn Iterator<Item = (&Decimal, &VecDeque<RestingOrder>)>> = match side {
            Side::Buy => Box::new(self.asks.iter()),
            Side::Sell => Box::new(self.bids.iter().rev()),
        };

        'outer: for (&price, queue) in levels {
            let crossed = match (side, limit) {
                (_, None) => true,
                (Side::Buy, Some(limit)) => price <= limit,
                (Side::Sell, Some(limit)) => price >= limit,
            };
            if !crossed {
                break;
            }

            for maker in queue {
                if plan.taker_remaining.is_zero() {
                    break 'outer;
                }
                let fill = plan.taker_remaining.min(maker.remaining);
                if fill.is_zero() {
                    continue;
                }
                plan.taker_remaining -= fill;
                plan.taker_filled += fill;
                plan.quote_total += price * fill;
                plan.fills.push(PlannedFill {
                    maker_order_id: maker.id,
                    maker_user_id: maker.user_id.clone(),
                    price,
                    quantity: fill,
                    maker_remaining_after: maker.remaining - fill,
                });
            }
        }
        plan
    }

    /// Applies a committed match plan to the ladders.
    ///
    /// Fills must target the FIFO heads they were planned against; anything
    /// else means the book changed under the symbol lock, which cannot
    /// happen — treated as an invariant violation.
    pub fn apply_plan(&mut self, taker_side: Side, plan: &MatchPlan) -> ExchangeResult<()> {
        let maker_side = taker_side.opposite();
        for fill in &plan.fills {
            let exhausted = {
                let (ladder, depth) = self.side_mut(maker_side);
                let queue = ladder.get_mut(&fill.price).ok_or_else(|| {
                    FatalError::InvariantViolation(format!(
                        "match applied against missing level {}",
                        fill.price
                    ))
                })?;
                let head = queue.front_mut().ok_or_else(|| {
                    FatalError::InvariantViolation(format!("empty level {} in match", fill.price))
                })?;
                if head.id != fill.maker_order_id {
                    return Err(FatalError::InvariantViolation(format!(
                        "head order {} does not match planned maker {}",
                        head.id, fill.maker_order_id
                    ))
                    .into());
                }

                head.remaining -= fill.quantity;
                let exhausted = head.remaining.is_zero().then_some(head.id);
                if exhausted.is_some() {
                    queue.pop_front();
                }
                if queue.is_empty() {
                    ladder.remove(&fill.price);
                }

                if let Some(level) = depth.get_mut(&fill.price) {
                    *level -= fill.quantity;
                    if level.is_zero() {
                        depth.remove(&fill.price);
                    }
                }
                exhausted
            };
            if let Some(id) = exhausted {
                self.locations.remove(&id);
            }
        }
        Ok(())
    }

    /// Top-N aggregated levels per side, best first.
    pub fn depth(&self, levels: usize) -> DepthSnapshot {
        let to_level = |(price, quantity): (&Decimal, &Decimal)| DepthLevel {
            price: *price,
            quantity: *quantity,
        };
        DepthSnapshot {
            bids: self.depth_bids.iter().rev().take(levels).map(to_level).collect(),
            asks: self.depth_asks.iter().take(levels).map(to_level).collect(),
        }
    }

    fn side_mut(
        &mut self,
        side: Side,
    ) -> (
        &mut BTreeMap<Decimal, VecDeque<RestingOrder>>,
        &mut BTreeMap<Decimal, Decimal>,
    ) {
        match side {
            Side::Buy => (&mut self.bids, &mut self.depth_bids),
            Side::Sell => (&mut self.asks, &mut self.depth_asks),
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn resting(id: i64, price: Decimal, remaining: Decimal) -> RestingOrder {
        RestingOrder {
            id,
            user_id: format!("u{id}"),
            price,
            quantity: remaining,
            remaining,
        }
    }

    /// Two resting asks at 10 (qty 5 then qty 3); buy limit 10 for 6 fills
    /// 5 from the first and 1 from the second, in arrival order.
    #[test]
    fn partial_match_respects_fifo() {
        let mut book = Book::new();
        book.insert(Side::Sell, resting(1, dec!(10), dec!(5))).unwrap();
        book.insert(Side::Sell, resting(2, dec!(10), dec!(3))).unwrap();

        let plan = book.plan_match(Side::Buy, Some(dec!(10)), dec!(6));
        assert_eq!(plan.fills.len(), 2);
        assert_eq!(plan.fills[0].maker_order_id, 1);
        assert_eq!(plan.fills[0].quantity, dec!(5));
        assert_eq!(plan.fills[0].maker_remaining_after, Decimal::ZERO);
        assert_eq!(plan.fills[1].maker_order_id, 2);
        assert_eq!(plan.fills[1].quantity, dec!(1));
        assert_eq!(plan.fills[1].maker_remaining_after, dec!(2));
        assert_eq!(plan.taker_filled, dec!(6));
        assert_eq!(plan.taker_remaining, Decimal::ZERO);
        assert_eq!(plan.fills.iter().map(|f| f.price).collect::<Vec<_>>(), vec![dec!(10); 2]);

        book.apply_plan(Side::Buy, &plan).unwrap();
        assert!(!book.contains(1));
        assert!(book.contains(2));
        assert_eq!(book.depth(10).asks, vec![DepthLevel { price: dec!(10), quantity: dec!(2) }]);
    }

    /// Same book, taker qty 4: only the older maker is touched.
    #[test]
    fn time_priority_leaves_younger_order_untouched() {
        let mut book = Book::new();
        book.insert(Side::Sell, resting(1, dec!(10), dec!(5))).unwrap();
        book.insert(Side::Sell, resting(2, dec!(10), dec!(3))).unwrap();

        let plan = book.plan_match(Side::Buy, Some(dec!(10)), dec!(4));
        assert_eq!(plan.fills.len(), 1);
        assert_eq!(plan.fills[0].maker_order_id, 1);
        assert_eq!(plan.fills[0].quantity, dec!(4));
        assert_eq!(plan.fills[0].maker_remaining_after, dec!(1));

        book.apply_plan(Side::Buy, &plan).unwrap();
        assert!(book.contains(1));
        assert!(book.contains(2));
        assert_eq!(book.depth(10).asks[0].quantity, dec!(4));
    }

    #[test]
    fn limit_never_crosses_past_its_price() {
        let mut book = Book::new();
        book.insert(Side::Sell, resting(1, dec!(10), dec!(1))).unwrap();
        book.insert(Side::Sell, resting(2, dec!(11), dec!(1))).unwrap();

        let plan = book.plan_match(Side::Buy, Some(dec!(10)), dec!(5));
        assert_eq!(plan.taker_filled, dec!(1));
        assert_eq!(plan.taker_remaining, dec!(4));
    }

    #[test]
    fn market_taker_walks_all_levels() {
        let mut book = Book::new();
        book.insert(Side::Buy, resting(1, dec!(9), dec!(2))).unwrap();
        book.insert(Side::Buy, resting(2, dec!(10), dec!(2))).unwrap();
        assert_eq!(book.best_bid(), Some(dec!(10)));
        assert_eq!(book.best_ask(), None);

        // Market sell walks bids best-first: 10 before 9.
        let plan = book.plan_match(Side::Sell, None, dec!(3));
        assert_eq!(plan.fills[0].price, dec!(10));
        assert_eq!(plan.fills[1].price, dec!(9));
        assert_eq!(plan.taker_filled, dec!(3));
        assert_eq!(plan.vwap().unwrap(), (dec!(20) + dec!(9)) / dec!(3));
    }

    #[test]
    fn planning_does_not_mutate() {
        let mut book = Book::new();
        book.insert(Side::Sell, resting(1, dec!(10), dec!(5))).unwrap();

        let before = book.depth(10);
        let _ = book.plan_match(Side::Buy, None, dec!(5));
        let after = book.depth(10);
        assert_eq!(before.asks, after.asks);
        assert!(book.contains(1));
    }

    #[test]
    fn remove_updates_depth_and_levels() {
        let mut book = Book::new();
        book.insert(Side::Buy, resting(1, dec!(9), dec!(10))).unwrap();
        book.insert(Side::Buy, resting(2, dec!(9), dec!(4))).unwrap();

        let removed = book.remove(1).unwrap();
        assert_eq!(removed.remaining, dec!(10));
        assert_eq!(book.depth(10).bids[0].quantity, dec!(4));

        book.remove(2).unwrap();
        assert!(book.depth(10).bids.is_empty());
        assert!(book.is_empty());
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let mut book = Book::new();
        book.insert(Side::Buy, resting(1, dec!(9), dec!(1))).unwrap();
        let err = book.insert(Side::Buy, resting(1, dec!(9), dec!(1))).unwrap_err();
        assert!(matches!(
            err,
            crate::error::ExchangeError::State(StateError::DuplicateOrder(1))
        ));
    }

    #[test]
    fn depth_is_aggregated_and_bounded() {
        let mut book = Book::new();
        for (id, price) in [(1, dec!(10)), (2, dec!(10)), (3, dec!(11)), (4, dec!(12))] {
            book.insert(Side::Sell, resting(id, price, dec!(1))).unwrap();
        }
        assert_eq!(book.best_ask(), Some(dec!(10)));
        let depth = book.depth(2);
        assert_eq!(depth.asks.len(), 2);
        assert_eq!(depth.asks[0], DepthLevel { price: dec!(10), quantity: dec!(2) });
        assert_eq!(depth.asks[1], DepthLevel { price: dec!(11), quantity: dec!(1) });
    }

    /// Both orders' filled + remaining stays equal to quantity across a match.
    #[test]
    fn fill_conservation_across_plan_and_apply() {
        let mut book = Book::new();
        book.insert(Side::Sell, resting(1, dec!(10), dec!(5))).unwrap();

        let plan = book.plan_match(Side::Buy, Some(dec!(10)), dec!(2));
        // Σ filled across both sides = 2 · trade quantity.
        let filled_both: Decimal = plan.fills.iter().map(|f| f.quantity).sum::<Decimal>()
            + plan.taker_filled;
        assert_eq!(filled_both, dec!(4));

        book.apply_plan(Side::Buy, &plan).unwrap();
        let plan2 = book.plan_match(Side::Buy, Some(dec!(10)), dec!(3));
        assert_eq!(plan2.fills[0].maker_remaining_after, Decimal::ZERO);
        assert_eq!(plan2.taker_filled, dec!(3));
    }
}
