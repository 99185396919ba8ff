//! Symbol configuration and symbol-string handling.
//!
//! The canonical symbol string is `BASE/QUOTE-SETTLE:MARKET`
//! (e.g. `AMM/USDT-USDT:SPOT`). URL paths additionally accept the
//! slash-separated `BASE/QUOTE/SETTLE/MARKET` and dashed
//! `BASE-QUOTE-SETTLE-MARKET` shapes; all three canonicalize to the same
//! string before symbol resolution.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    domain::{EngineKind, MarketClass},
    error::{ExchangeResult, IntegrityError, ValidationError},
};

/// One row of the symbol table; the authoritative source for engine bindings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolConfig {
    pub id: i64,
    pub symbol: String,
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
    /// Opaque engine parameters. Interpreted only by the bound engine.
    pub engine_params: serde_json::Value,
    pub active: bool,
    /// Settlement timestamp; part of the symbol uniqueness tuple. Null for
    /// perpetual and spot symbols.
    pub settle_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SymbolConfig {
    /// Base-quantity bounds check shared by both engines.
    pub fn validate_quantity(&self, quantity: Decimal) -> ExchangeResult<()> {
        if quantity < self.min_trade_amount || quantity > self.max_trade_amount {
            return Err(ValidationError::QuantityOutOfBounds {
                quantity,
                min: self.min_trade_amount,
                max: self.max_trade_amount,
            }
            .into());
        }
        Ok(())
    }

    /// Fails with `SymbolBindingMismatch` unless the symbol is bound to `requested`.
    pub fn require_engine(&self, requested: EngineKind) -> ExchangeResult<()> {
        if self.engine != requested {
            return Err(IntegrityError::SymbolBindingMismatch {
                symbol: self.symbol.clone(),
                bound: self.engine.as_str(),
                requested: requested.as_str(),
            }
            .into());
        }
        Ok(())
    }
}

/// Builds the canonical symbol string from its parts.
pub fn canonical_symbol(base: &str, quote: &str, settle: &str, market: MarketClass) -> String {
    format!(
        "{}/{}-{}:{}",
        base.to_ascii_uppercase(),
        quote.to_ascii_uppercase(),
        settle.to_ascii_uppercase(),
        market.symbol_token()
    )
}

/// Parsed parts of a symbol string or path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolParts {
    pub base: String,
    pub quote: String,
    pub settle: String,
    pub market: MarketClass,
}

impl SymbolParts {
    pub fn canonical(&self) -> String {
        canonical_symbol(&self.base, &self.quote, &self.settle, self.market)
    }
}

/// Parses any accepted symbol shape into its parts.
///
/// Accepted shapes:
/// - canonical `BASE/QUOTE-SETTLE:MARKET`
/// - URL path  `BASE/QUOTE/SETTLE/MARKET`
/// - dashed    `BASE-QUOTE-SETTLE-MARKET`
pub fn parse_symbol(input: &str) -> ExchangeResult<SymbolParts> {
    let bad = || ValidationError::InvalidSymbolPath(input.to_string());

    let tokens: Vec<&str> = if input.contains(':') {
        // Canonical: BASE/QUOTE-SETTLE:MARKET
        let (pair, market) = input.rsplit_once(':').ok_or_else(bad)?;
        let (base, rest) = pair.split_once('/').ok_or_else(bad)?;
        let (quote, settle) = rest.split_once('-').ok_or_else(bad)?;
        vec![base, quote, settle, market]
    } else if input.contains('/') {
        input.split('/').collect()
    } else {
        input.split('-').collect()
    };

    let [base, quote, settle, market] = tokens.as_slice() else {
        return Err(bad().into());
    };
    if base.is_empty() || quote.is_empty() || settle.is_empty() {
        return Err(bad().into());
    }
    let market = MarketClass::from_symbol_token(market).ok_or_else(bad)?;

    Ok(SymbolParts {
        base: base.to_ascii_uppercase(),
        quote: quote.to_ascii_uppercase(),
        settle: settle.to_ascii_uppercase(),
        market,
    })
}

/// Canonicalizes any accepted symbol shape.
pub fn canonicalize(input: &str) -> ExchangeResult<String> {
    parse_symbol(input).map(|parts| parts.canonical())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_form_parses_to_itself() {
        let parts = parse_symbol("AMM/USDT-USDT:SPOT").unwrap();
        assert_eq!(parts.base, "AMM");
        assert_eq!(parts.quote, "USDT");
        assert_eq!(parts.settle, "USDT");
        assert_eq!(parts.market, MarketClass::Spot);
        assert_eq!(parts.canonical(), "AMM/USDT-USDT:SPOT");
    }

    #[test]
    fn slash_path_canonicalizes() {
        assert_eq!(
            canonicalize("btc/usdt/usdt/spot").unwrap(),
            "BTC/USDT-USDT:SPOT"
        );
    }

    #[test]
    fn dashed_path_canonicalizes() {
        assert_eq!(
            canonicalize("ORDER-USDT-USDT-SPOT").unwrap(),
            "ORDER/USDT-USDT:SPOT"
        );
    }

    #[test]
    fn rejects_malformed_paths() {
        assert!(canonicalize("BTCUSDT").is_err());
        assert!(canonicalize("BTC/USDT/SPOT").is_err());
        assert!(canonicalize("BTC/USDT-USDT:SWAP").is_err());
        assert!(canonicalize("/USDT-USDT:SPOT").is_err());
    }
}
