//! Hedging strategy
//!
//! When an open position draws down past the trigger, buys the opposite
//! outcome of the same market so further moves against the position are
//! partially offset. One hedge per market per cooldown window; positions
//! whose opposite token is unknown are skipped.

use super::{CooldownMap, InFlightGuard, Strategy};
use crate::config::HedgingConfig;
use crate::services::clob::{OrderGateway, OrderRequest};
use crate::types::{OrderSide, Position};
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Duration;
use tracing::{debug, info, warn};

pub struct HedgingStrategy {
    config: HedgingConfig,
    orders: Arc<dyn OrderGateway>,
    attempts: Mutex<CooldownMap>,
    in_flight: AtomicBool,
}

impl HedgingStrategy {
    pub fn new(config: HedgingConfig, orders: Arc<dyn OrderGateway>) -> Self {
        Self {
            config,
            orders,
            attempts: Mutex::new(CooldownMap::new()),
            in_flight: AtomicBool::new(false),
        }
    }

    fn drawdown_triggered(&self, position: &Position) -> bool {
        position.pnl_pct() <= -self.config.trigger_drawdown
    }

    /// Price of the opposite outcome in a binary market
    fn opposite_price(position: &Position) -> Decimal {
        (Decimal::ONE - position.current_price).max(Decimal::ZERO)
    }
}

#[async_trait]
impl Strategy for HedgingStrategy {
    fn name(&self) -> &'static str {
        "Hedging"
    }

    async fn run_cycle(&self, snapshot: &[Position]) -> Result<()> {
        let Some(_guard) = InFlightGuard::try_acquire(self.name(), &self.in_flight) else {
            return Ok(());
        };

        let mut attempts = self.attempts.lock().await;
        attempts.prune(snapshot);

        let cooldown = Duration::from_secs(self.config.cooldown_seconds);

        for position in snapshot {
            if position.redeemable || !self.drawdown_triggered(position) {
                continue;
            }
            let key = position.key();
            if !attempts.ready(&key, cooldown) {
                continue;
            }
            let Some(opposite_token) = position.opposite_token_id.as_deref() else {
                debug!("[Hedging] {} has no opposite token, skipping", key);
                continue;
            };

            let hedge_size = position.size * self.config.hedge_ratio;
            let hedge_price = Self::opposite_price(position);
            if hedge_size.is_zero() || hedge_price.is_zero() {
                continue;
            }

            info!(
                "[Hedging] {} down {:.1}%, buying {} opposite shares @ {}",
                key,
                position.pnl_pct() * Decimal::from(100),
                hedge_size,
                hedge_price
            );

            let result = self
                .orders
                .submit_order(&OrderRequest {
                    token_id: opposite_token.to_string(),
                    side: OrderSide::Buy,
                    price: hedge_price,
                    size: hedge_size,
                })
                .await;

            match result {
                Ok(receipt) => {
                    attempts.record_attempt(key, false);
                    debug!(
                        "[Hedging] Hedge order accepted ({})",
                        receipt.order_id.as_deref().unwrap_or("no id")
                    );
                }
                Err(e) => {
                    attempts.record_attempt(key.clone(), true);
                    warn!("[Hedging] Hedge order failed for {}: {}", key, e);
                }
            }
        }

        Ok(())
    }
}
