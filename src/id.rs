//! ID minting.
//!
//! Two id spaces, matching the persisted layout:
//! - pool ids: `0x` + 40 random hex characters,
//! - order and trade ids: the 13-digit millisecond timestamp, bumped by one
//!   on collision so ids stay unique and monotonic within the process.
//!
//! User ids (6 random digits) are minted by the external registration
//! collaborator that owns the users table.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use rand::Rng;

/// Minting attempts before giving up with `IdCollisionExhausted`.
pub const MAX_ID_RETRIES: usize = 16;

const POOL_ID_HEX_LEN: usize = 10 * 4;
const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

/// A candidate pool id: `0x` followed by 40 hex characters.
pub fn random_pool_id() -> String {
    let mut rng = rand::rng();
    let mut id = String::with_capacity(2 + POOL_ID_HEX_LEN);
    id.push_str("0x");
    for _ in 0..POOL_ID_HEX_LEN {
        let nibble: usize = rng.random_range(0..16);
        id.push(HEX_DIGITS[nibble] as char);
    }
    id
}

/// Millisecond-timestamp id source for orders and trades.
///
/// Two mints within the same millisecond (or a clock step backwards) resolve
/// by incrementing past the last issued id, so ids are strictly increasing
/// for the lifetime of the process.
#[derive(Debug, Default)]
pub struct MillisIdSource {
    last: AtomicI64,
}

impl MillisIdSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(prev + 1);
            match self.last.compare_exchange_weak(
                prev,
                candidate,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return candidate,
                Err(observed) => prev = observed,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn pool_ids_are_prefixed_hex() {
        let id = random_pool_id();
        assert_eq!(id.len(), 42);
        assert!(id.starts_with("0x"));
        assert!(id[2..].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn millis_ids_are_strictly_increasing() {
        let source = MillisIdSource::new();
        let mut seen = HashSet::new();
        let mut last = 0;
        for _ in 0..10_000 {
            let id = source.next();
            assert!(id > last, "{id} not greater than {last}");
            assert!(seen.insert(id));
            last = id;
        }
    }

    #[test]
    fn millis_ids_have_thirteen_digits() {
        let source = MillisIdSource::new();
        let id = source.next();
        assert_eq!(id.to_string().len(), 13);
    }
}
