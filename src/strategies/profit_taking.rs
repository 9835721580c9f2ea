//! Profit-taking strategy
//!
//! Scalps positions whose gain has crossed the take-profit threshold.
//! Sells the whole position at the current price; a per-key cooldown
//! spaces out repeat attempts in case the sell does not fill.

use super::{CooldownMap, InFlightGuard, Strategy};
use crate::config::ProfitTakingConfig;
use crate::services::clob::{OrderGateway, OrderRequest};
use crate::types::{OrderSide, Position};
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Duration;
use tracing::{info, warn};

pub struct ProfitTakingStrategy {
    config: ProfitTakingConfig,
    orders: Arc<dyn OrderGateway>,
    attempts: Mutex<CooldownMap>,
    in_flight: AtomicBool,
}

impl ProfitTakingStrategy {
    pub fn new(config: ProfitTakingConfig, orders: Arc<dyn OrderGateway>) -> Self {
        Self {
            config,
            orders,
            attempts: Mutex::new(CooldownMap::new()),
            in_flight: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Strategy for ProfitTakingStrategy {
    fn name(&self) -> &'static str {
        "ProfitTaking"
    }

    async fn run_cycle(&self, snapshot: &[Position]) -> Result<()> {
        let Some(_guard) = InFlightGuard::try_acquire(self.name(), &self.in_flight) else {
            return Ok(());
        };

        let mut attempts = self.attempts.lock().await;
        attempts.prune(snapshot);

        let cooldown = Duration::from_secs(self.config.cooldown_seconds);

        for position in snapshot {
            if position.redeemable {
                continue;
            }
            if position.pnl_pct() < self.config.trigger_gain {
                continue;
            }
            let key = position.key();
            if !attempts.ready(&key, cooldown) {
                continue;
            }

            info!(
                "[ProfitTaking] {} up {:.1}%, selling {} shares @ {}",
                key,
                position.pnl_pct() * Decimal::from(100),
                position.size,
                position.current_price
            );

            let result = self
                .orders
                .submit_order(&OrderRequest {
                    token_id: position.token_id.clone(),
                    side: OrderSide::Sell,
                    price: position.current_price,
                    size: position.size,
                })
                .await;

            match result {
                Ok(_) => attempts.record_attempt(key, false),
                Err(e) => {
                    attempts.record_attempt(key.clone(), true);
                    warn!("[ProfitTaking] Sell failed for {}: {}", key, e);
                }
            }
        }

        Ok(())
    }
}
