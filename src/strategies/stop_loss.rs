//! Stop-loss strategy
//!
//! Sells the whole position once the loss crosses the configured
//! threshold. A pending-sell map keeps one submission outstanding per
//! position; if the position is still in the snapshot after the timeout
//! the sell is assumed dead (unfilled or lost) and is submitted again.

use super::{InFlightGuard, Strategy};
use crate::config::StopLossConfig;
use crate::services::clob::{OrderGateway, OrderRequest};
use crate::types::{OrderSide, Position, PositionKey};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};
use tracing::{info, warn};

pub struct StopLossStrategy {
    config: StopLossConfig,
    orders: Arc<dyn OrderGateway>,
    pending_sells: Mutex<HashMap<PositionKey, Instant>>,
    in_flight: AtomicBool,
}

impl StopLossStrategy {
    pub fn new(config: StopLossConfig, orders: Arc<dyn OrderGateway>) -> Self {
        Self {
            config,
            orders,
            pending_sells: Mutex::new(HashMap::new()),
            in_flight: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Strategy for StopLossStrategy {
    fn name(&self) -> &'static str {
        "StopLoss"
    }

    async fn run_cycle(&self, snapshot: &[Position]) -> Result<()> {
        let Some(_guard) = InFlightGuard::try_acquire(self.name(), &self.in_flight) else {
            return Ok(());
        };

        let mut pending = self.pending_sells.lock().await;

        let live: HashSet<PositionKey> = snapshot.iter().map(Position::key).collect();
        pending.retain(|key, _| live.contains(key));

        let timeout = Duration::from_secs(self.config.pending_sell_timeout_seconds);

        for position in snapshot {
            if position.redeemable {
                continue;
            }
            if position.pnl_pct() > -self.config.trigger_loss {
                continue;
            }
            let key = position.key();
            if let Some(submitted_at) = pending.get(&key) {
                if submitted_at.elapsed() < timeout {
                    continue;
                }
                warn!("[StopLoss] Pending sell for {} timed out, resubmitting", key);
            }

            info!(
                "[StopLoss] {} at {} vs entry {}, selling {} shares",
                key, position.current_price, position.entry_price, position.size
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
                Ok(_) => {
                    pending.insert(key, Instant::now());
                }
                Err(e) => {
                    // No pending entry: try again next cycle
                    warn!("[StopLoss] Sell failed for {}: {}", key, e);
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::clob::OrderReceipt;
    use crate::types::Side;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScriptedGateway {
        fail_first: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl OrderGateway for ScriptedGateway {
        async fn submit_order(&self, request: &OrderRequest) -> Result<OrderReceipt> {
            assert_eq!(request.side, OrderSide::Sell);
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                anyhow::bail!("order rejected")
            }
            Ok(OrderReceipt {
                order_id: Some(format!("o{}", n)),
                status: Some("matched".to_string()),
            })
        }
    }

    fn losing_position(entry: Decimal, current: Decimal) -> Position {
        Position {
            market_id: "m1".to_string(),
            condition_id: "0xc".to_string(),
            token_id: "t1".to_string(),
            question: "q".to_string(),
            side: Side::Yes,
            size: dec!(40),
            entry_price: entry,
            current_price: current,
            redeemable: false,
            neg_risk: false,
            opposite_token_id: None,
            opened_at: None,
        }
    }

    fn strategy(fail_first: u32) -> (StopLossStrategy, Arc<ScriptedGateway>) {
        let gateway = Arc::new(ScriptedGateway {
            fail_first,
            calls: AtomicU32::new(0),
        });
        let config = StopLossConfig {
            trigger_loss: dec!(0.30),
            pending_sell_timeout_seconds: 180,
        };
        (StopLossStrategy::new(config, gateway.clone()), gateway)
    }

    #[tokio::test(start_paused = true)]
    async fn loss_past_threshold_sells_once() {
        let (strategy, gateway) = strategy(0);
        // 0.50 -> 0.30 is a 40% loss
        let snapshot = vec![losing_position(dec!(0.50), dec!(0.30))];

        strategy.run_cycle(&snapshot).await.unwrap();
        strategy.run_cycle(&snapshot).await.unwrap();
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn loss_below_threshold_is_ignored() {
        let (strategy, gateway) = strategy(0);
        // 20% loss, trigger is 30%
        strategy
            .run_cycle(&[losing_position(dec!(0.50), dec!(0.40))])
            .await
            .unwrap();
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_pending_sell_is_resubmitted() {
        let (strategy, gateway) = strategy(0);
        let snapshot = vec![losing_position(dec!(0.50), dec!(0.30))];

        strategy.run_cycle(&snapshot).await.unwrap();
        tokio::time::advance(Duration::from_secs(181)).await;
        strategy.run_cycle(&snapshot).await.unwrap();
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_sell_retries_next_cycle() {
        let (strategy, gateway) = strategy(1);
        let snapshot = vec![losing_position(dec!(0.50), dec!(0.30))];

        strategy.run_cycle(&snapshot).await.unwrap();
        // No pending entry after the failure, so the next cycle retries
        strategy.run_cycle(&snapshot).await.unwrap();
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn pending_entry_dropped_when_position_exits_snapshot() {
        let (strategy, _) = strategy(0);
        let snapshot = vec![losing_position(dec!(0.50), dec!(0.30))];

        strategy.run_cycle(&snapshot).await.unwrap();
        assert_eq!(strategy.pending_sells.lock().await.len(), 1);

        strategy.run_cycle(&[]).await.unwrap();
        assert!(strategy.pending_sells.lock().await.is_empty());
    }
}
