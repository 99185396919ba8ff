use rust_decimal::Decimal;
use thiserror::Error;

pub type ExchangeResult<T> = Result<T, ExchangeError>;

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    #[error(transparent)]
    Transient(#[from] TransientError),

    #[error(transparent)]
    Fatal(#[from] FatalError),
}

impl ExchangeError {
    /// True for errors the caller may retry unchanged.
    pub fn is_transient(&self) -> bool {
        matches!(self, ExchangeError::Transient(_))
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, ExchangeError::Fatal(_))
    }
}

/// Malformed or out-of-range request input. Rejected before any state is touched.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Malformed amount for '{field}': {value}")]
    MalformedAmount { field: &'static str, value: String },

    #[error("Unknown symbol: '{0}'")]
    UnknownSymbol(String),

    #[error("Invalid symbol path: '{0}'")]
    InvalidSymbolPath(String),

    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Quantity {quantity} outside bounds [{min}, {max}]")]
    QuantityOutOfBounds {
        quantity: Decimal,
        min: Decimal,
        max: Decimal,
    },

    #[error("Limit orders require a positive price")]
    MissingLimitPrice,

    #[error("Invalid side code: {0}")]
    InvalidSide(i16),

    #[error("Invalid order type code: {0}")]
    InvalidOrderType(i16),

    #[error("Symbol already exists: '{0}'")]
    SymbolExists(String),

    #[error("Unknown user: '{0}'")]
    UnknownUser(String),

    #[error("Invalid or expired access token")]
    InvalidToken,

    #[error("Admin privileges required")]
    AdminRequired,
}

/// Request was well-formed but the current engine or ledger state forbids it.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Insufficient funds: {currency} available {available}, required {required}")]
    InsufficientFunds {
        currency: String,
        available: Decimal,
        required: Decimal,
    },

    #[error("Insufficient liquidity for requested output")]
    InsufficientLiquidity,

    #[error("Slippage exceeded: output {output} below minimum {min_output}")]
    SlippageExceeded {
        output: Decimal,
        min_output: Decimal,
    },

    #[error("Order not found: {0}")]
    OrderNotFound(i64),

    #[error("Order {0} is terminal and cannot be cancelled")]
    OrderNotCancellable(i64),

    #[error("Duplicate order: {0}")]
    DuplicateOrder(i64),

    #[error("Liquidity position too small: holding {held} LP shares, burning {requested}")]
    InsufficientLpShares { held: Decimal, requested: Decimal },
}

/// Request targets an engine the symbol is not bound to, or a disabled binding.
#[derive(Debug, Error)]
pub enum IntegrityError {
    #[error("Symbol '{symbol}' is bound to {bound} engine, not {requested}")]
    SymbolBindingMismatch {
        symbol: String,
        bound: &'static str,
        requested: &'static str,
    },

    #[error("Engine disabled for symbol '{0}'")]
    EngineDisabled(String),

    #[error("Symbol '{0}' is quarantined pending admin intervention")]
    SymbolQuarantined(String),
}

/// Infrastructure failures. Engine state is untouched; safe to retry.
#[derive(Debug, Error)]
pub enum TransientError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Deadline exceeded while {0}")]
    DeadlineExceeded(&'static str),

    #[error("Concurrent transaction aborted, retry")]
    ConcurrencyAborted,

    #[error("ID minting exhausted after {0} retries")]
    IdCollisionExhausted(usize),
}

/// A broken internal invariant. The offending symbol is quarantined.
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

impl From<sqlx::Error> for ExchangeError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            // 40001 serialization_failure, 40P01 deadlock_detected
            sqlx::Error::Database(db) if matches!(db.code().as_deref(), Some("40001" | "40P01")) => {
                TransientError::ConcurrencyAborted.into()
            }
            _ => TransientError::Storage(e.to_string()).into(),
        }
    }
}
