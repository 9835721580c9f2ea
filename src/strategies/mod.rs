//! Trading strategies
//!
//! Each strategy is independently stateful and consumes the read-only
//! position snapshot handed to it by the orchestrator. Strategies never
//! refresh positions themselves, and each carries its own in-flight
//! guard as a second line of defense against re-entrancy should it ever
//! be invoked from more than one scheduling path.

pub mod auto_redeem;
pub mod endgame_sweep;
pub mod hedging;
pub mod profit_taking;
pub mod stop_loss;

pub use auto_redeem::AutoRedeemStrategy;
pub use endgame_sweep::EndgameSweepStrategy;
pub use hedging::HedgingStrategy;
pub use profit_taking::ProfitTakingStrategy;
pub use stop_loss::StopLossStrategy;

use crate::types::{Position, PositionKey};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::time::{Duration, Instant};
use tracing::warn;

/// One strategy invocation per orchestrator cycle
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Get strategy name for logging and timing capture
    fn name(&self) -> &'static str;

    /// Run one cycle against the shared snapshot. Errors are logged by
    /// the orchestrator and never abort the remaining strategies.
    async fn run_cycle(&self, snapshot: &[Position]) -> Result<()>;
}

/// RAII guard around a strategy's in-flight flag
pub(crate) struct InFlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> InFlightGuard<'a> {
    /// Acquire the flag, or None if the strategy is already running
    pub fn try_acquire(name: &str, flag: &'a AtomicBool) -> Option<Self> {
        if flag.swap(true, Ordering::AcqRel) {
            warn!("[{}] Re-entrant invocation blocked", name);
            return None;
        }
        Some(Self { flag })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Per-key attempt bookkeeping shared by the simpler strategies
#[derive(Debug, Clone)]
pub struct AttemptEntry {
    pub last_attempt: Instant,
    pub failures: u32,
}

/// Cooldown map keyed by position. Entries for keys that left the
/// snapshot are pruned every cycle so memory stays bounded.
#[derive(Debug, Default)]
pub struct CooldownMap {
    entries: HashMap<PositionKey, AttemptEntry>,
}

impl CooldownMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when the key has no entry or its cooldown has elapsed
    pub fn ready(&self, key: &PositionKey, cooldown: Duration) -> bool {
        match self.entries.get(key) {
            Some(entry) => entry.last_attempt.elapsed() >= cooldown,
            None => true,
        }
    }

    pub fn record_attempt(&mut self, key: PositionKey, failed: bool) {
        let entry = self.entries.entry(key).or_insert(AttemptEntry {
            last_attempt: Instant::now(),
            failures: 0,
        });
        entry.last_attempt = Instant::now();
        if failed {
            entry.failures += 1;
        }
    }

    pub fn failures(&self, key: &PositionKey) -> u32 {
        self.entries.get(key).map(|e| e.failures).unwrap_or(0)
    }

    pub fn forget(&mut self, key: &PositionKey) {
        self.entries.remove(key);
    }

    /// Drop entries whose key is no longer present in the snapshot
    pub fn prune(&mut self, snapshot: &[Position]) {
        let live: HashSet<PositionKey> = snapshot.iter().map(Position::key).collect();
        self.entries.retain(|key, _| live.contains(key));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Side;
    use rust_decimal_macros::dec;

    fn position(market: &str, token: &str) -> Position {
        Position {
            market_id: market.to_string(),
            condition_id: "0xc".to_string(),
            token_id: token.to_string(),
            question: "q".to_string(),
            side: Side::Yes,
            size: dec!(1),
            entry_price: dec!(0.5),
            current_price: dec!(0.5),
            redeemable: false,
            neg_risk: false,
            opposite_token_id: None,
            opened_at: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_gates_until_elapsed() {
        let mut map = CooldownMap::new();
        let key = position("m", "t").key();
        let cooldown = Duration::from_secs(60);

        assert!(map.ready(&key, cooldown));
        map.record_attempt(key.clone(), true);
        assert!(!map.ready(&key, cooldown));
        assert_eq!(map.failures(&key), 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(map.ready(&key, cooldown));
    }

    #[tokio::test(start_paused = true)]
    async fn prune_drops_keys_missing_from_snapshot() {
        let mut map = CooldownMap::new();
        let kept = position("m1", "t1");
        let gone = position("m2", "t2");
        map.record_attempt(kept.key(), false);
        map.record_attempt(gone.key(), true);

        map.prune(std::slice::from_ref(&kept));
        assert_eq!(map.len(), 1);
        assert_eq!(map.failures(&gone.key()), 0);
        assert!(!map.ready(&kept.key(), Duration::from_secs(60)));
    }

    #[test]
    fn in_flight_guard_blocks_second_acquire_and_releases_on_drop() {
        let flag = AtomicBool::new(false);
        let guard = InFlightGuard::try_acquire("Test", &flag);
        assert!(guard.is_some());
        assert!(InFlightGuard::try_acquire("Test", &flag).is_none());
        drop(guard);
        assert!(InFlightGuard::try_acquire("Test", &flag).is_some());
    }
}
