//! Cycle orchestrator
//!
//! Owns the trading loop. Each tick runs at most one cycle: if the
//! previous cycle is still in flight the tick is counted and skipped
//! rather than queued, so a hung strategy can never stack cycles behind
//! itself. Within a cycle the position snapshot is refreshed exactly
//! once and the strategies run strictly sequentially in a fixed order.

use crate::services::positions::PositionTracker;
use crate::strategies::Strategy;
use anyhow::Result;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// A strategy slower than this gets flagged in the cycle summary
const SLOW_STRATEGY_MS: u128 = 2_000;

/// Scheduling counters, readable at any time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleCounters {
    pub ticks_fired: u64,
    pub cycles_run: u64,
    pub ticks_skipped_due_to_inflight: u64,
}

pub struct Orchestrator {
    tracker: Arc<PositionTracker>,
    strategies: Vec<Arc<dyn Strategy>>,
    cycle_interval: Duration,
    cycle_in_flight: AtomicBool,
    ticks_fired: AtomicU64,
    cycles_run: AtomicU64,
    ticks_skipped_due_to_inflight: AtomicU64,
    /// Last set of slow strategy names already reported
    reported_slow: Mutex<BTreeSet<&'static str>>,
}

/// Releases the cycle flag when a cycle ends, even on panic unwind
struct CycleGuard<'a>(&'a AtomicBool);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Orchestrator {
    pub fn new(
        tracker: Arc<PositionTracker>,
        strategies: Vec<Arc<dyn Strategy>>,
        cycle_interval: Duration,
    ) -> Self {
        Self {
            tracker,
            strategies,
            cycle_interval,
            cycle_in_flight: AtomicBool::new(false),
            ticks_fired: AtomicU64::new(0),
            cycles_run: AtomicU64::new(0),
            ticks_skipped_due_to_inflight: AtomicU64::new(0),
            reported_slow: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn counters(&self) -> CycleCounters {
        CycleCounters {
            ticks_fired: self.ticks_fired.load(Ordering::Acquire),
            cycles_run: self.cycles_run.load(Ordering::Acquire),
            ticks_skipped_due_to_inflight: self
                .ticks_skipped_due_to_inflight
                .load(Ordering::Acquire),
        }
    }

    /// Run one cycle, unless one is already in flight. Safe to call from
    /// any path; an in-flight cycle makes this a counted no-op.
    pub async fn tick(&self) {
        self.ticks_fired.fetch_add(1, Ordering::AcqRel);

        if self.cycle_in_flight.swap(true, Ordering::AcqRel) {
            self.ticks_skipped_due_to_inflight
                .fetch_add(1, Ordering::AcqRel);
            debug!("[Orchestrator] Tick skipped, cycle still in flight");
            return;
        }
        let _guard = CycleGuard(&self.cycle_in_flight);

        let cycle = self.cycles_run.fetch_add(1, Ordering::AcqRel) + 1;
        let started = Instant::now();

        // One refresh per cycle; a failure leaves the stale snapshot in
        // place and the cycle proceeds against it
        if let Err(e) = self.tracker.refresh().await {
            warn!("[Orchestrator] Position refresh failed: {}", e);
        }
        let snapshot = self.tracker.positions();

        let mut slow: BTreeSet<&'static str> = BTreeSet::new();
        for strategy in &self.strategies {
            let strategy_started = Instant::now();
            if let Err(e) = strategy.run_cycle(&snapshot).await {
                error!("[Orchestrator] {} failed: {}", strategy.name(), e);
            }
            let elapsed = strategy_started.elapsed();
            if elapsed.as_millis() > SLOW_STRATEGY_MS {
                slow.insert(strategy.name());
            }
            debug!(
                "[Orchestrator] {} took {}ms",
                strategy.name(),
                elapsed.as_millis()
            );
        }

        self.report_slow(slow);
        debug!(
            "[Orchestrator] Cycle {} done in {}ms ({} positions)",
            cycle,
            started.elapsed().as_millis(),
            snapshot.len()
        );
    }

    /// Log slow strategies only when the set of slow names changes,
    /// so a persistently slow strategy does not flood every cycle
    fn report_slow(&self, slow: BTreeSet<&'static str>) {
        let mut reported = self
            .reported_slow
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if slow == *reported {
            return;
        }
        if !slow.is_empty() {
            let names: Vec<&str> = slow.iter().copied().collect();
            warn!("[Orchestrator] Slow strategies: {}", names.join(", "));
        } else if !reported.is_empty() {
            info!("[Orchestrator] Slow strategies recovered");
        }
        *reported = slow;
    }

    /// The main trading loop. Ticks at the configured interval forever.
    pub async fn run(&self) -> Result<()> {
        info!(
            "[Orchestrator] Starting cycle loop ({} strategies, every {}s)",
            self.strategies.len(),
            self.cycle_interval.as_secs()
        );
        let mut interval = tokio::time::interval(self.cycle_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            self.tick().await;
        }
    }
}
