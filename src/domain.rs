// ================================================================================================
// Domain enums shared across engines, ledger, and persistence
// ================================================================================================
//
// Persisted enums carry stable small-integer codes; the canonical mapping is
// documented in `migrations/0001_init.sql` and must never be reordered.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::error::{ExchangeResult, ValidationError};

pub mod balance;
pub mod order;
pub mod pool;
pub mod symbol;
pub mod trade;
pub mod user;

/// Taker-perspective trade direction. `Buy` pays quote and receives base.
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    IntoStaticStr,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn code(self) -> i16 {
        match self {
            Side::Buy => 0,
            Side::Sell => 1,
        }
    }

    pub fn from_code(code: i16) -> ExchangeResult<Self> {
        match code {
            0 => Ok(Side::Buy),
            1 => Ok(Side::Sell),
            other => Err(ValidationError::InvalidSide(other).into()),
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}

/// The matching engine a symbol is bound to. Immutable after symbol creation.
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
pub enum EngineKind {
    Amm,
    Clob,
}

impl EngineKind {
    pub fn code(self) -> i16 {
        match self {
            EngineKind::Amm => 0,
            EngineKind::Clob => 1,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            0 => Some(EngineKind::Amm),
            1 => Some(EngineKind::Clob),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}

/// Market class of a symbol. Only spot matching is live; other classes exist
/// in the schema and reject placement with `EngineDisabled`.
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
    EnumIter,
    IntoStaticStr,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MarketClass {
    Spot,
    Perp,
    Option,
    Future,
}

impl MarketClass {
    pub fn code(self) -> i16 {
        match self {
            MarketClass::Spot => 0,
            MarketClass::Perp => 1,
            MarketClass::Option => 2,
            MarketClass::Future => 3,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            0 => Some(MarketClass::Spot),
            1 => Some(MarketClass::Perp),
            2 => Some(MarketClass::Option),
            3 => Some(MarketClass::Future),
            _ => None,
        }
    }

    /// Uppercase token used in the canonical symbol string.
    pub fn symbol_token(&self) -> &'static str {
        match self {
            MarketClass::Spot => "SPOT",
            MarketClass::Perp => "PERP",
            MarketClass::Option => "OPTION",
            MarketClass::Future => "FUTURE",
        }
    }

    pub fn from_symbol_token(token: &str) -> Option<Self> {
        match token.to_ascii_uppercase().as_str() {
            "SPOT" => Some(MarketClass::Spot),
            "PERP" => Some(MarketClass::Perp),
            "OPTION" => Some(MarketClass::Option),
            "FUTURE" => Some(MarketClass::Future),
            _ => None,
        }
    }
}

/// Ledger account namespace. A single spot namespace today; the column exists
/// so margin or settlement accounts can be added without a schema change.
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
pub enum AccountType {
    Spot,
}

impl AccountType {
    pub fn code(self) -> i16 {
        match self {
            AccountType::Spot => 0,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            0 => Some(AccountType::Spot),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_codes_round_trip() {
        assert_eq!(Side::from_code(Side::Buy.code()).unwrap(), Side::Buy);
        assert_eq!(Side::from_code(Side::Sell.code()).unwrap(), Side::Sell);
        assert!(Side::from_code(2).is_err());
    }

    #[test]
    fn side_opposite_is_involutive() {
        assert_eq!(Side::Buy.opposite(), Side::Sell);
        assert_eq!(Side::Sell.opposite().opposite(), Side::Sell);
    }

    #[test]
    fn market_class_tokens_parse_case_insensitively() {
        assert_eq!(
            MarketClass::from_symbol_token("spot"),
            Some(MarketClass::Spot)
        );
        assert_eq!(
            MarketClass::from_symbol_token("FUTURE"),
            Some(MarketClass::Future)
        );
        assert_eq!(MarketClass::from_symbol_token("swap"), None);
    }
}
