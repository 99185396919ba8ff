//! Per-(account, user, currency) balance rows.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::AccountType;

/// `available` and `locked` are primary and non-negative; `balance` is the
/// derived sum and is rewritten on every mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Balance {
    pub account_type: AccountType,
    pub user_id: String,
    pub currency: String,
    pub available: Decimal,
    pub locked: Decimal,
}

impl Balance {
    pub fn zero(user_id: &str, currency: &str) -> Self {
        Self {
            account_type: AccountType::Spot,
            user_id: user_id.to_string(),
            currency: currency.to_string(),
            available: Decimal::ZERO,
            locked: Decimal::ZERO,
        }
    }

    pub fn balance(&self) -> Decimal {
        self.available + self.locked
    }
}
