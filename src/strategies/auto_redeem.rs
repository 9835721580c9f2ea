//! Auto-redeem strategy
//!
//! Redeems resolved positions on-chain. Redemption can fail transiently
//! (relay congestion, RPC hiccups), so each tracked position moves
//! through a failure/cooldown state machine: a short cooldown after each
//! failure, then a long hold once the failure cap is reached. While held,
//! a one-shot fallback sell is tried if the position still looks sellable.
//! After a long enough idle window the entry resets to eligible, discarding
//! the failure count so transient conditions get a fresh bounded set of
//! chances.

use super::{InFlightGuard, Strategy};
use crate::config::AutoRedeemConfig;
use crate::services::clob::{OrderGateway, OrderRequest};
use crate::services::redeem::{RedeemRequest, Redeemer};
use crate::types::{OrderSide, Position, PositionKey, Side};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
struct RedeemState {
    failures: u32,
    last_attempt: Instant,
    fallback_sell_attempted: bool,
    /// Redemption succeeded; ignore the position until it leaves the snapshot
    redeemed: bool,
}

/// What the state machine decided for one position this cycle
#[derive(Debug, PartialEq, Eq)]
enum Action {
    Redeem,
    FallbackSell,
    Skip,
}

pub struct AutoRedeemStrategy {
    config: AutoRedeemConfig,
    redeemer: Arc<dyn Redeemer>,
    orders: Arc<dyn OrderGateway>,
    state: Mutex<HashMap<PositionKey, RedeemState>>,
    in_flight: AtomicBool,
}

impl AutoRedeemStrategy {
    pub fn new(
        config: AutoRedeemConfig,
        redeemer: Arc<dyn Redeemer>,
        orders: Arc<dyn OrderGateway>,
    ) -> Self {
        Self {
            config,
            redeemer,
            orders,
            state: Mutex::new(HashMap::new()),
            in_flight: AtomicBool::new(false),
        }
    }

    fn decide(&self, state: &mut HashMap<PositionKey, RedeemState>, position: &Position) -> Action {
        let key = position.key();
        let retry_cooldown = Duration::from_secs(self.config.retry_cooldown_seconds);
        let reset_after = Duration::from_secs(self.config.reset_after_seconds);

        match state.get(&key) {
            None => Action::Redeem,
            Some(s) if s.redeemed => Action::Skip,
            Some(s) if s.failures >= self.config.max_failures => {
                if s.last_attempt.elapsed() >= reset_after {
                    // Long idle window passed: forget the history entirely
                    debug!("[AutoRedeem] {} reset to eligible after hold", key);
                    state.remove(&key);
                    return Action::Redeem;
                }
                if !s.fallback_sell_attempted
                    && position.current_price >= self.config.fallback_sell_min_price
                {
                    return Action::FallbackSell;
                }
                Action::Skip
            }
            Some(s) => {
                if s.last_attempt.elapsed() >= retry_cooldown {
                    Action::Redeem
                } else {
                    Action::Skip
                }
            }
        }
    }

    async fn attempt_redeem(&self, position: &Position) -> Result<String> {
        let request = RedeemRequest {
            condition_id: position.condition_id.clone(),
            neg_risk: position.neg_risk,
            size: position.size,
            side_index: match position.side {
                Side::Yes => 0,
                Side::No => 1,
            },
        };
        self.redeemer.redeem(&request).await
    }

    async fn attempt_fallback_sell(&self, position: &Position) -> Result<()> {
        info!(
            "[AutoRedeem] Falling back to selling {} ({} shares @ {})",
            position.key(),
            position.size,
            position.current_price
        );
        self.orders
            .submit_order(&OrderRequest {
                token_id: position.token_id.clone(),
                side: OrderSide::Sell,
                price: position.current_price,
                size: position.size,
            })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Strategy for AutoRedeemStrategy {
    fn name(&self) -> &'static str {
        "AutoRedeem"
    }

    async fn run_cycle(&self, snapshot: &[Position]) -> Result<()> {
        let Some(_guard) = InFlightGuard::try_acquire(self.name(), &self.in_flight) else {
            return Ok(());
        };

        let mut state = self.state.lock().await;

        // Bounded memory: drop state for positions no longer held
        let live: HashSet<PositionKey> = snapshot.iter().map(Position::key).collect();
        state.retain(|key, _| live.contains(key));

        for position in snapshot.iter().filter(|p| p.redeemable) {
            let key = position.key();
            match self.decide(&mut state, position) {
                Action::Skip => continue,
                Action::Redeem => match self.attempt_redeem(position).await {
                    Ok(tx_id) => {
                        info!("[AutoRedeem] Redeemed {} (tx {})", key, tx_id);
                        state.insert(
                            key,
                            RedeemState {
                                failures: 0,
                                last_attempt: Instant::now(),
                                fallback_sell_attempted: false,
                                redeemed: true,
                            },
                        );
                    }
                    Err(e) => {
                        let entry = state.entry(key.clone()).or_insert(RedeemState {
                            failures: 0,
                            last_attempt: Instant::now(),
                            fallback_sell_attempted: false,
                            redeemed: false,
                        });
                        entry.failures += 1;
                        entry.last_attempt = Instant::now();
                        warn!(
                            "[AutoRedeem] Redemption failed for {} ({}/{} failures): {}",
                            key, entry.failures, self.config.max_failures, e
                        );
                    }
                },
                Action::FallbackSell => {
                    let result = self.attempt_fallback_sell(position).await;
                    if let Some(entry) = state.get_mut(&key) {
                        // One shot per hold regardless of outcome
                        entry.fallback_sell_attempted = true;
                        entry.last_attempt = Instant::now();
                    }
                    if let Err(e) = result {
                        warn!("[AutoRedeem] Fallback sell failed for {}: {}", key, e);
                    }
                }
            }
        }

        Ok(())
    }
}
