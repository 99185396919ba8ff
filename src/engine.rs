// === Matching engines and dispatch ===
//
// Each symbol is bound to exactly one engine at creation time. The router
// resolves the binding, serializes mutations through the symbol's mutex, and
// wraps every mutation in one persistence transaction so ledger movements and
// engine state commit together.

pub mod amm;
pub mod binding;
pub mod book;
pub mod clob;
pub mod router;
