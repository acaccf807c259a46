// =============================================================================
// Blacklist — time-bounded veto of a symbol after a stop-loss exit
// =============================================================================
//
// Shared across engines. Reads are lock-free via a snapshot clone; writes
// take a short critical section, matching the teacher's preference for
// `parking_lot::RwLock` over heavier synchronization for short sections (see
// `risk.rs`, `app_state.rs`).

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlacklistEntry {
    pub symbol: String,
    pub entered_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub reason: String,
}

pub struct Blacklist {
    entries: RwLock<HashMap<String, BlacklistEntry>>,
}

impl Blacklist {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Blacklist `symbol` for `duration_minutes` starting at `now`.
    pub fn add(&self, symbol: &str, now: DateTime<Utc>, duration_minutes: i64, reason: impl Into<String>) {
        let reason = reason.into();
        let expires_at = now + chrono::Duration::minutes(duration_minutes);
        info!(symbol, %expires_at, %reason, "symbol blacklisted");
        self.entries.write().insert(
            symbol.to_string(),
            BlacklistEntry {
                symbol: symbol.to_string(),
                entered_at: now,
                expires_at,
                reason,
            },
        );
    }

    /// Returns `true` if `symbol` is currently blacklisted as of `now`.
    /// Entries past expiry are treated as absent but are not evicted here —
    /// callers invoke `prune` periodically so repeated `is_blacklisted`
    /// checks stay lock-free reads.
    pub fn is_blacklisted(&self, symbol: &str, now: DateTime<Utc>) -> bool {
        self.entries
            .read()
            .get(symbol)
            .map(|e| now < e.expires_at)
            .unwrap_or(false)
    }

    /// Evict expired entries. Call periodically from a housekeeping tick.
    pub fn prune(&self, now: DateTime<Utc>) {
        self.entries.write().retain(|_, e| now < e.expires_at);
    }

    pub fn snapshot(&self) -> Vec<BlacklistEntry> {
        self.entries.read().values().cloned().collect()
    }
}

impl Default for Blacklist {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blacklisted_within_window_rejected_then_accepted_after_expiry() {
        // P10: A symbol blacklisted at t with duration d is rejected for
        // [t, t+d) and accepted at t+d.
        let bl = Blacklist::new();
        let t0 = Utc::now();
        bl.add("BTCUSDT", t0, 60, "stop loss");

        assert!(bl.is_blacklisted("BTCUSDT", t0));
        assert!(bl.is_blacklisted("BTCUSDT", t0 + chrono::Duration::minutes(59)));
        assert!(!bl.is_blacklisted("BTCUSDT", t0 + chrono::Duration::minutes(60)));
    }

    #[test]
    fn unknown_symbol_is_not_blacklisted() {
        let bl = Blacklist::new();
        assert!(!bl.is_blacklisted("ETHUSDT", Utc::now()));
    }

    #[test]
    fn prune_evicts_expired_entries() {
        let bl = Blacklist::new();
        let t0 = Utc::now();
        bl.add("BTCUSDT", t0, 10, "stop loss");
        bl.prune(t0 + chrono::Duration::minutes(11));
        assert!(bl.snapshot().is_empty());
    }
}
