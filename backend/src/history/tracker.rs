use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::address::Address;
use crate::batcher::{PendingWrite, PersistenceBatcher};
use crate::metrics::counters::Counters;
use crate::pool::model::PriceUpdate;

/// 24h at one-minute resolution.
pub const DEFAULT_HISTORY_CAPACITY: usize = 1_440;

/// Max distance between a window's target time and the snapshot used for it.
pub const WINDOW_MATCH_TOLERANCE_MS: u64 = 2 * 60 * 1_000;

const MINUTE_MS: u64 = 60 * 1_000;
const HOUR_MS: u64 = 60 * MINUTE_MS;
const DAY_MS: u64 = 24 * HOUR_MS;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    /// ms since epoch
    pub timestamp: u64,
    pub price_per_token_sol: f64,
    pub price_per_token_usd: f64,
    pub market_cap_usd: f64,
    pub liquidity_usd: f64,
    pub sol_reserves: u64,
    pub token_reserves: u64,
    pub slot: u64,
}

impl From<&PriceUpdate> for PriceSnapshot {
    fn from(update: &PriceUpdate) -> Self {
        Self {
            timestamp: update.ts_ms,
            price_per_token_sol: update.metrics.price_per_token_sol,
            price_per_token_usd: update.metrics.price_per_token_usd,
            market_cap_usd: update.metrics.market_cap_usd,
            liquidity_usd: update.metrics.liquidity_usd,
            sol_reserves: update.reserves.virtual_sol_reserves,
            token_reserves: update.reserves.virtual_token_reserves,
            slot: update.slot,
        }
    }
}

/// Percentage changes per window; `None` when no snapshot lies close
/// enough to the window start.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceChanges {
    pub change_1m: Option<f64>,
    pub change_5m: Option<f64>,
    pub change_15m: Option<f64>,
    pub change_1h: Option<f64>,
    pub change_24h: Option<f64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct HighLow {
    pub high: f64,
    pub low: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriceMetrics {
    pub mint_address: Address,
    pub current_price_sol: f64,
    pub current_price_usd: f64,
    pub market_cap_usd: f64,
    pub liquidity_usd: f64,
    pub changes: PriceChanges,
    pub high_24h: Option<f64>,
    pub low_24h: Option<f64>,
    pub sample_count: usize,
    pub last_update: u64,
}

/// Bounded per-mint price history, newest first.
pub struct PriceHistoryTracker {
    history: HashMap<Address, VecDeque<PriceSnapshot>>,
    capacity: usize,
    batcher: PersistenceBatcher<PriceSnapshot>,
    counters: Counters,
}

impl PriceHistoryTracker {
    pub fn new(
        capacity: usize,
        batcher: PersistenceBatcher<PriceSnapshot>,
        counters: Counters,
    ) -> Self {
        Self {
            history: HashMap::new(),
            capacity: capacity.max(1),
            batcher,
            counters,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn pending_writes(&self) -> usize {
        self.batcher.pending_len()
    }

    #[instrument(skip(self, update), target = "history", fields(mint = %update.mint_address, slot = update.slot))]
    pub fn record(&mut self, update: &PriceUpdate) {
        let snapshot = PriceSnapshot::from(update);

        let series = self.history.entry(update.mint_address).or_default();
        series.push_front(snapshot.clone());
        series.truncate(self.capacity);
        debug!(len = series.len(), "snapshot recorded");

        let write = PendingWrite {
            mint_address: update.mint_address,
            slot: update.slot,
            observed_at_ms: update.ts_ms,
            payload: snapshot,
        };
        if let Err(e) = self.batcher.enqueue(write) {
            Counters::incr(&self.counters.dropped_writes);
            warn!(error = %e, "price snapshot not queued");
        }
    }

    /// Newest-first history, at most `limit` entries when given.
    pub fn history(&self, mint: &Address, limit: Option<usize>) -> Vec<PriceSnapshot> {
        let Some(series) = self.history.get(mint) else {
            return Vec::new();
        };
        let take = limit.unwrap_or(series.len());
        series.iter().take(take).cloned().collect()
    }

    pub fn latest(&self, mint: &Address) -> Option<&PriceSnapshot> {
        self.history.get(mint).and_then(|s| s.front())
    }

    pub fn price_changes(&self, mint: &Address, now_ms: u64) -> PriceChanges {
        let Some(series) = self.history.get(mint) else {
            return PriceChanges::default();
        };
        let Some(current) = series.front() else {
            return PriceChanges::default();
        };

        let change = |window: u64| window_change(series, current, now_ms, window);
        PriceChanges {
            change_1m: change(MINUTE_MS),
            change_5m: change(5 * MINUTE_MS),
            change_15m: change(15 * MINUTE_MS),
            change_1h: change(HOUR_MS),
            change_24h: change(DAY_MS),
        }
    }

    /// Extrema of the USD price over the last 24h.
    pub fn high_low_24h(&self, mint: &Address, now_ms: u64) -> Option<HighLow> {
        let series = self.history.get(mint)?;
        let since = now_ms.saturating_sub(DAY_MS);

        series
            .iter()
            .take_while(|s| s.timestamp >= since)
            .map(|s| s.price_per_token_usd)
            .filter(|p| p.is_finite() && *p > 0.0)
            .fold(None, |acc: Option<HighLow>, p| {
                Some(match acc {
                    None => HighLow { high: p, low: p },
                    Some(hl) => HighLow {
                        high: hl.high.max(p),
                        low: hl.low.min(p),
                    },
                })
            })
    }

    pub fn price_metrics(&self, mint: &Address, now_ms: u64) -> Option<PriceMetrics> {
        let series = self.history.get(mint)?;
        let current = series.front()?;
        let high_low = self.high_low_24h(mint, now_ms);

        Some(PriceMetrics {
            mint_address: *mint,
            current_price_sol: current.price_per_token_sol,
            current_price_usd: current.price_per_token_usd,
            market_cap_usd: current.market_cap_usd,
            liquidity_usd: current.liquidity_usd,
            changes: self.price_changes(mint, now_ms),
            high_24h: high_low.map(|hl| hl.high),
            low_24h: high_low.map(|hl| hl.low),
            sample_count: series.len(),
            last_update: current.timestamp,
        })
    }

    pub async fn shutdown(&self, flush: bool) -> usize {
        self.batcher.shutdown(flush).await
    }
}

/// Change of the USD price from the snapshot closest to `now - window`
/// to `current`.
fn window_change(
    series: &VecDeque<PriceSnapshot>,
    current: &PriceSnapshot,
    now_ms: u64,
    window: u64,
) -> Option<f64> {
    let target = now_ms.checked_sub(window)?;

    let past = series
        .iter()
        .skip(1)
        .min_by_key(|s| s.timestamp.abs_diff(target))?;
    if past.timestamp.abs_diff(target) > WINDOW_MATCH_TOLERANCE_MS {
        return None;
    }

    let from = past.price_per_token_usd;
    let to = current.price_per_token_usd;
    if !(from > 0.0 && to > 0.0) {
        return None;
    }
    Some((to - from) / from * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batcher::BatchSink;
    use crate::pool::model::{PoolMetrics, PoolReserves};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Default)]
    struct MockSink {
        writes: Mutex<Vec<PendingWrite<PriceSnapshot>>>,
    }

    #[async_trait]
    impl BatchSink<PriceSnapshot> for MockSink {
        async fn write_batch(&self, batch: Vec<PendingWrite<PriceSnapshot>>) -> anyhow::Result<()> {
            self.writes.lock().extend(batch);
            Ok(())
        }
    }

    const MINT: Address = Address([7; 32]);

    fn tracker(capacity: usize, sink: Arc<MockSink>) -> PriceHistoryTracker {
        let counters = Counters::default();
        let batcher =
            PersistenceBatcher::new("price_history", Duration::from_secs(5), sink, counters.clone());
        PriceHistoryTracker::new(capacity, batcher, counters)
    }

    fn update(ts_ms: u64, slot: u64, price_usd: f64) -> PriceUpdate {
        PriceUpdate {
            mint_address: MINT,
            pool_address: Address([8; 32]),
            reserves: PoolReserves {
                virtual_sol_reserves: 1_000,
                virtual_token_reserves: 2_000,
                ..PoolReserves::new(MINT, Address([8; 32]))
            },
            metrics: PoolMetrics {
                price_per_token_sol: price_usd / 100.0,
                price_per_token_usd: price_usd,
                ..PoolMetrics::default()
            },
            slot,
            ts_ms,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn history_is_bounded_and_newest_first() {
        let mut t = tracker(DEFAULT_HISTORY_CAPACITY, Arc::new(MockSink::default()));

        for i in 0..1_500u64 {
            t.record(&update(i * 1_000, i, 1.0 + i as f64));
        }

        let all = t.history(&MINT, None);
        assert_eq!(all.len(), 1_440);
        assert_eq!(all[0].slot, 1_499);
        assert_eq!(all[1_439].slot, 60);

        let top = t.history(&MINT, Some(3));
        assert_eq!(top.iter().map(|s| s.slot).collect::<Vec<_>>(), vec![1_499, 1_498, 1_497]);
        assert!(t.history(&Address([1; 32]), None).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn windowed_changes_use_closest_snapshot_within_tolerance() {
        let mut t = tracker(DEFAULT_HISTORY_CAPACITY, Arc::new(MockSink::default()));
        let now = 2 * DAY_MS;

        // one hour ago (+30s), five minutes ago, now
        t.record(&update(now - HOUR_MS + 30_000, 1, 2.0));
        t.record(&update(now - 5 * MINUTE_MS, 2, 4.0));
        t.record(&update(now, 3, 5.0));

        let changes = t.price_changes(&MINT, now);
        assert_eq!(changes.change_1h, Some(150.0));
        assert_eq!(changes.change_5m, Some(25.0));
        // 1m target is 4 min away from the nearest older sample
        assert_eq!(changes.change_1m, None);
        // 15m target: nearest is 10 min away
        assert_eq!(changes.change_15m, None);
        assert_eq!(changes.change_24h, None);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_prices_omit_the_change() {
        let mut t = tracker(DEFAULT_HISTORY_CAPACITY, Arc::new(MockSink::default()));
        let now = DAY_MS;

        t.record(&update(now - MINUTE_MS, 1, 0.0));
        t.record(&update(now, 2, 3.0));

        assert_eq!(t.price_changes(&MINT, now).change_1m, None);
    }

    #[tokio::test(start_paused = true)]
    async fn high_low_covers_last_day_only() {
        let mut t = tracker(DEFAULT_HISTORY_CAPACITY, Arc::new(MockSink::default()));
        let now = 3 * DAY_MS;

        t.record(&update(now - DAY_MS - 1, 1, 100.0));
        t.record(&update(now - HOUR_MS, 2, 2.0));
        t.record(&update(now - MINUTE_MS, 3, 8.0));
        t.record(&update(now, 4, 5.0));

        assert_eq!(
            t.high_low_24h(&MINT, now),
            Some(HighLow { high: 8.0, low: 2.0 })
        );
        assert_eq!(t.high_low_24h(&Address([1; 32]), now), None);
    }

    #[tokio::test(start_paused = true)]
    async fn price_metrics_summarise_latest() {
        let mut t = tracker(DEFAULT_HISTORY_CAPACITY, Arc::new(MockSink::default()));
        let now = DAY_MS;

        t.record(&update(now - MINUTE_MS, 1, 2.0));
        t.record(&update(now, 2, 3.0));

        let m = t.price_metrics(&MINT, now).unwrap();
        assert_eq!(m.current_price_usd, 3.0);
        assert_eq!(m.sample_count, 2);
        assert_eq!(m.last_update, now);
        assert_eq!(m.changes.change_1m, Some(50.0));
        assert_eq!(m.high_24h, Some(3.0));
        assert_eq!(m.low_24h, Some(2.0));
        assert!(t.price_metrics(&Address([1; 32]), now).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn only_latest_snapshot_per_mint_is_persisted() {
        let sink = Arc::new(MockSink::default());
        let mut t = tracker(DEFAULT_HISTORY_CAPACITY, sink.clone());

        t.record(&update(1_000, 1, 1.0));
        t.record(&update(2_000, 2, 2.0));
        assert_eq!(t.pending_writes(), 1);

        tokio::time::sleep(Duration::from_millis(5_001)).await;
        tokio::task::yield_now().await;

        let writes = sink.writes.lock();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].payload.slot, 2);
    }
}
