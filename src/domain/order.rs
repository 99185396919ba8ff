//! CLOB order rows and the order lifecycle state machine.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::{
    domain::Side,
    error::{ExchangeResult, FatalError, StateError, ValidationError},
};

#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    IntoStaticStr,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
}

impl OrderType {
    pub fn code(self) -> i16 {
        match self {
            OrderType::Market => 0,
            OrderType::Limit => 1,
        }
    }

    pub fn from_code(code: i16) -> ExchangeResult<Self> {
        match code {
            0 => Ok(OrderType::Market),
            1 => Ok(OrderType::Limit),
            other => Err(ValidationError::InvalidOrderType(other).into()),
        }
    }
}

/// Order lifecycle:
///
/// ```text
///        place                match        match (remaining = 0)
///   ∅ ─────────▶ open ────▶ partial ────▶ filled
///                   └──────────(match, remaining = 0)──────▶ filled
///   open | partial ────▶ cancelled
/// ```
///
/// Terminal orders (`filled`, `cancelled`) are never re-mutated.
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    IntoStaticStr,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Open,
    Partial,
    Filled,
    Cancelled,
}

impl OrderStatus {
    pub fn code(self) -> i16 {
        match self {
            OrderStatus::Open => 0,
            OrderStatus::Partial => 1,
            OrderStatus::Filled => 2,
            OrderStatus::Cancelled => 3,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            0 => Some(OrderStatus::Open),
            1 => Some(OrderStatus::Partial),
            2 => Some(OrderStatus::Filled),
            3 => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Filled | OrderStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub symbol_id: i64,
    pub user_id: String,
    pub side: Side,
    pub order_type: OrderType,
    /// Null for market orders.
    pub price: Option<Decimal>,
    pub quantity: Decimal,
    pub filled: Decimal,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub filled_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn new_limit(
        id: i64,
        symbol_id: i64,
        user_id: String,
        side: Side,
        price: Decimal,
        quantity: Decimal,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            symbol_id,
            user_id,
            side,
            order_type: OrderType::Limit,
            price: Some(price),
            quantity,
            filled: Decimal::ZERO,
            status: OrderStatus::Open,
            created_at: at,
            updated_at: at,
            filled_at: None,
            cancelled_at: None,
        }
    }

    pub fn new_market(
        id: i64,
        symbol_id: i64,
        user_id: String,
        side: Side,
        quantity: Decimal,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            symbol_id,
            user_id,
            side,
            order_type: OrderType::Market,
            price: None,
            quantity,
            filled: Decimal::ZERO,
            status: OrderStatus::Open,
            created_at: at,
            updated_at: at,
            filled_at: None,
            cancelled_at: None,
        }
    }

    pub fn remaining(&self) -> Decimal {
        self.quantity - self.filled
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Applies a match of `quantity` against this order.
    ///
    /// Transitions `open → partial → filled`; a fill that would push `filled`
    /// past `quantity`, or a fill against a terminal order, is an invariant
    /// violation.
    pub fn record_fill(&mut self, quantity: Decimal, at: DateTime<Utc>) -> ExchangeResult<()> {
        if self.is_terminal() {
            return Err(FatalError::InvariantViolation(format!(
                "fill against terminal order {}",
                self.id
            ))
            .into());
        }
        if quantity <= Decimal::ZERO || quantity > self.remaining() {
            return Err(FatalError::InvariantViolation(format!(
                "order {}: fill {} exceeds remaining {}",
                self.id,
                quantity,
                self.remaining()
            ))
            .into());
        }

        self.filled += quantity;
        self.updated_at = at;
        if self.remaining().is_zero() {
            self.status = OrderStatus::Filled;
            self.filled_at = Some(at);
        } else {
            self.status = OrderStatus::Partial;
        }
        Ok(())
    }

    /// Cancels the order. Valid only from `open` or `partial`; a cancel on a
    /// terminal order fails with `OrderNotCancellable`.
    pub fn cancel(&mut self, at: DateTime<Utc>) -> ExchangeResult<()> {
        if self.is_terminal() {
            return Err(StateError::OrderNotCancellable(self.id).into());
        }
        self.status = OrderStatus::Cancelled;
        self.cancelled_at = Some(at);
        self.updated_at = at;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn make_order(quantity: Decimal) -> Order {
        Order::new_limit(
            1700000000000,
            1,
            "100001".to_string(),
            Side::Buy,
            dec!(10),
            quantity,
            Utc::now(),
        )
    }

    #[test]
    fn partial_then_full_fill_transitions() {
        let mut order = make_order(dec!(6));
        order.record_fill(dec!(5), Utc::now()).unwrap();
        assert_eq!(order.status, OrderStatus::Partial);
        assert_eq!(order.remaining(), dec!(1));

        order.record_fill(dec!(1), Utc::now()).unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert!(order.filled_at.is_some());
        assert_eq!(order.filled + order.remaining(), order.quantity);
    }

    #[test]
    fn overfill_is_invariant_violation() {
        let mut order = make_order(dec!(2));
        let err = order.record_fill(dec!(3), Utc::now()).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn fill_against_terminal_order_is_invariant_violation() {
        let mut order = make_order(dec!(1));
        order.record_fill(dec!(1), Utc::now()).unwrap();
        assert!(order.record_fill(dec!(1), Utc::now()).unwrap_err().is_fatal());
    }

    #[test]
    fn cancel_is_rejected_on_terminal_orders() {
        let mut order = make_order(dec!(1));
        order.cancel(Utc::now()).unwrap();
        assert_eq!(order.status, OrderStatus::Cancelled);

        // Second cancel is a state error, not a silent success.
        match order.cancel(Utc::now()).unwrap_err() {
            crate::error::ExchangeError::State(StateError::OrderNotCancellable(id)) => {
                assert_eq!(id, order.id)
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
