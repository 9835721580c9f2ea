//! Endgame sweep strategy
//!
//! Near resolution, heavy favorites trade just under 1.00 and the last
//! few cents are close to free money if the favorite holds. This
//! strategy tops up held favorites inside the sweep price band until the
//! per-market exposure cap is reached, with a per-market cooldown
//! between buys.

use super::{CooldownMap, InFlightGuard, Strategy};
use crate::config::EndgameSweepConfig;
use crate::services::clob::{OrderGateway, OrderRequest};
use crate::types::{OrderSide, Position};
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Duration;
use tracing::{debug, info, warn};

pub struct EndgameSweepStrategy {
    config: EndgameSweepConfig,
    orders: Arc<dyn OrderGateway>,
    attempts: Mutex<CooldownMap>,
    in_flight: AtomicBool,
}

impl EndgameSweepStrategy {
    pub fn new(config: EndgameSweepConfig, orders: Arc<dyn OrderGateway>) -> Self {
        Self {
            config,
            orders,
            attempts: Mutex::new(CooldownMap::new()),
            in_flight: AtomicBool::new(false),
        }
    }

    fn in_sweep_band(&self, price: Decimal) -> bool {
        price >= self.config.min_price && price <= self.config.max_price
    }
}

/// USDC value currently at risk per market
fn exposure_by_market(snapshot: &[Position]) -> HashMap<&str, Decimal> {
    let mut exposure: HashMap<&str, Decimal> = HashMap::new();
    for position in snapshot {
        *exposure.entry(position.market_id.as_str()).or_default() +=
            position.size * position.current_price;
    }
    exposure
}

#[async_trait]
impl Strategy for EndgameSweepStrategy {
    fn name(&self) -> &'static str {
        "EndgameSweep"
    }

    async fn run_cycle(&self, snapshot: &[Position]) -> Result<()> {
        let Some(_guard) = InFlightGuard::try_acquire(self.name(), &self.in_flight) else {
            return Ok(());
        };

        let mut attempts = self.attempts.lock().await;
        attempts.prune(snapshot);

        let cooldown = Duration::from_secs(self.config.cooldown_seconds);
        let exposure = exposure_by_market(snapshot);

        for position in snapshot {
            if position.redeemable || !self.in_sweep_band(position.current_price) {
                continue;
            }
            let key = position.key();
            if !attempts.ready(&key, cooldown) {
                continue;
            }

            let held = exposure
                .get(position.market_id.as_str())
                .copied()
                .unwrap_or_default();
            let headroom = self.config.max_exposure_per_market - held;
            if headroom <= Decimal::ZERO {
                debug!(
                    "[EndgameSweep] {} at exposure cap ({} held), skipping",
                    key, held
                );
                continue;
            }

            let buy_size = headroom / position.current_price;
            info!(
                "[EndgameSweep] Sweeping {} @ {} for {} more shares ({} headroom)",
                key, position.current_price, buy_size, headroom
            );

            let result = self
                .orders
                .submit_order(&OrderRequest {
                    token_id: position.token_id.clone(),
                    side: OrderSide::Buy,
                    price: position.current_price,
                    size: buy_size,
                })
                .await;

            match result {
                Ok(_) => attempts.record_attempt(key, false),
                Err(e) => {
                    attempts.record_attempt(key.clone(), true);
                    warn!("[EndgameSweep] Sweep buy failed for {}: {}", key, e);
                }
            }
        }

        Ok(())
    }
}
