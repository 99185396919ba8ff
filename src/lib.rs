// === Public Modules (The Canonical Paths) ===
pub mod bus;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod events;
pub mod hub;
pub mod id;
pub mod ledger;
pub mod num;
pub mod server;
pub mod store;

// === Facades (Re-exporting internals) ===
pub use crate::engine::router::{EngineRouter, TradeResult};
pub use crate::error::{ExchangeError, ExchangeResult};
