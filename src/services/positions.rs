//! Position tracker
//!
//! Caches the wallet's open positions from the data API. Refreshes are
//! single-flight: callers arriving while a refresh is underway wait for
//! that refresh instead of issuing a second fetch, and the snapshot is
//! read synchronously and shared read-only by all strategies in a cycle.

use crate::types::{Position, Side};
use anyhow::{Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Where position snapshots come from; mocked in tests
#[async_trait]
pub trait PositionSource: Send + Sync {
    async fn fetch_positions(&self) -> Result<Vec<Position>>;
}

/// One row of the data API's positions response
#[derive(Debug, Deserialize)]
struct DataApiPosition {
    #[serde(alias = "conditionId")]
    condition_id: String,
    #[serde(alias = "asset")]
    token_id: String,
    #[serde(alias = "market", default)]
    market_id: Option<String>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    outcome: String,
    size: Decimal,
    #[serde(alias = "avgPrice")]
    avg_price: Decimal,
    #[serde(alias = "curPrice")]
    cur_price: Decimal,
    #[serde(default)]
    redeemable: bool,
    #[serde(alias = "negativeRisk", default)]
    negative_risk: bool,
    #[serde(alias = "oppositeAsset", default)]
    opposite_asset: Option<String>,
}

impl DataApiPosition {
    fn into_position(self) -> Position {
        Position {
            market_id: self.market_id.unwrap_or_else(|| self.condition_id.clone()),
            condition_id: self.condition_id,
            token_id: self.token_id,
            question: self.title,
            side: if self.outcome.eq_ignore_ascii_case("no") {
                Side::No
            } else {
                Side::Yes
            },
            size: self.size,
            entry_price: self.avg_price,
            current_price: self.cur_price,
            redeemable: self.redeemable,
            neg_risk: self.negative_risk,
            opposite_token_id: self.opposite_asset,
            opened_at: None,
        }
    }
}

/// Data-API-backed position source
pub struct DataApiSource {
    http: reqwest::Client,
    host: String,
    user_address: String,
}

impl DataApiSource {
    pub fn new(host: &str, user_address: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            host: host.trim_end_matches('/').to_string(),
            user_address: user_address.to_string(),
        }
    }
}

#[async_trait]
impl PositionSource for DataApiSource {
    async fn fetch_positions(&self) -> Result<Vec<Position>> {
        let url = format!("{}/positions?user={}", self.host, self.user_address);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .context("Position fetch failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Data API error {}: {}", status, body);
        }

        let rows: Vec<DataApiPosition> = response
            .json()
            .await
            .context("Malformed positions response")?;

        Ok(rows.into_iter().map(DataApiPosition::into_position).collect())
    }
}

/// Cached, single-flight-refreshed view of open positions
pub struct PositionTracker {
    source: Arc<dyn PositionSource>,
    snapshot: RwLock<Arc<Vec<Position>>>,
    refresh_lock: Mutex<()>,
    generation: AtomicU64,
}

impl PositionTracker {
    pub fn new(source: Arc<dyn PositionSource>) -> Self {
        Self {
            source,
            snapshot: RwLock::new(Arc::new(Vec::new())),
            refresh_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    /// Current snapshot, cheap to clone and read-only
    pub fn positions(&self) -> Arc<Vec<Position>> {
        self.snapshot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Refresh the snapshot. Callers that arrive while another refresh is
    /// in flight coalesce onto its result instead of fetching again.
    pub async fn refresh(&self) -> Result<()> {
        let entry_generation = self.generation.load(Ordering::Acquire);
        let _guard = self.refresh_lock.lock().await;

        if self.generation.load(Ordering::Acquire) != entry_generation {
            debug!("[Positions] Coalesced onto a concurrent refresh");
            return Ok(());
        }

        match self.source.fetch_positions().await {
            Ok(positions) => {
                debug!("[Positions] Snapshot refreshed: {} open", positions.len());
                *self
                    .snapshot
                    .write()
                    .unwrap_or_else(|poisoned| poisoned.into_inner()) = Arc::new(positions);
                self.generation.fetch_add(1, Ordering::Release);
                Ok(())
            }
            Err(e) => {
                // Keep serving the stale snapshot rather than emptying it
                warn!("[Positions] Refresh failed, keeping stale snapshot: {}", e);
                Err(e)
            }
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    struct CountingSource {
        fetches: AtomicU32,
        delay: Duration,
    }

    #[async_trait]
    impl PositionSource for CountingSource {
        async fn fetch_positions(&self) -> Result<Vec<Position>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(vec![Position {
                market_id: "m1".to_string(),
                condition_id: "0xc".to_string(),
                token_id: "t1".to_string(),
                question: "q".to_string(),
                side: Side::Yes,
                size: dec!(10),
                entry_price: dec!(0.5),
                current_price: dec!(0.6),
                redeemable: false,
                neg_risk: false,
                opposite_token_id: None,
                opened_at: None,
            }])
        }
    }

    #[tokio::test]
    async fn refresh_updates_snapshot_and_generation() {
        let tracker = PositionTracker::new(Arc::new(CountingSource {
            fetches: AtomicU32::new(0),
            delay: Duration::ZERO,
        }));

        assert!(tracker.positions().is_empty());
        tracker.refresh().await.unwrap();
        assert_eq!(tracker.positions().len(), 1);
        assert_eq!(tracker.generation(), 1);
    }

    #[tokio::test]
    async fn concurrent_refreshes_coalesce_to_one_fetch() {
        let source = Arc::new(CountingSource {
            fetches: AtomicU32::new(0),
            delay: Duration::from_millis(50),
        });
        let tracker = Arc::new(PositionTracker::new(source.clone()));

        let a = tokio::spawn({
            let t = tracker.clone();
            async move { t.refresh().await }
        });
        // Give the first refresh time to take the lock
        tokio::time::sleep(Duration::from_millis(10)).await;
        let b = tokio::spawn({
            let t = tracker.clone();
            async move { t.refresh().await }
        });

        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.generation(), 1);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_stale_snapshot() {
        struct FlakySource {
            calls: AtomicU32,
        }

        #[async_trait]
        impl PositionSource for FlakySource {
            async fn fetch_positions(&self) -> Result<Vec<Position>> {
                if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Ok(vec![])
                } else {
                    anyhow::bail!("API down")
                }
            }
        }

        let tracker = PositionTracker::new(Arc::new(FlakySource {
            calls: AtomicU32::new(0),
        }));
        tracker.refresh().await.unwrap();
        let before = tracker.generation();
        assert!(tracker.refresh().await.is_err());
        assert_eq!(tracker.generation(), before);
    }

    #[test]
    fn data_api_row_maps_to_position() {
        let json = r#"{
            "conditionId": "0xabc",
            "asset": "99887766",
            "title": "Will X happen?",
            "outcome": "No",
            "size": "25",
            "avgPrice": "0.4",
            "curPrice": "0.3",
            "redeemable": true,
            "negativeRisk": false,
            "oppositeAsset": "11223344"
        }"#;
        let row: DataApiPosition = serde_json::from_str(json).unwrap();
        let pos = row.into_position();
        assert_eq!(pos.market_id, "0xabc"); // falls back to condition id
        assert_eq!(pos.side, Side::No);
        assert!(pos.redeemable);
        assert_eq!(pos.entry_price, dec!(0.4));
        assert_eq!(pos.opposite_token_id.as_deref(), Some("11223344"));
    }
}
