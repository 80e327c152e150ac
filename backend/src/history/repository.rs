use anyhow::Result;
use async_trait::async_trait;

use crate::address::Address;
use crate::batcher::BatchSink;
use crate::history::tracker::PriceSnapshot;

/// Source tag written with every snapshot flushed from the tracker.
pub const SNAPSHOT_SOURCE: &str = "amm_reserves";

/// A persisted price snapshot with its flush metadata.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredPriceSnapshot {
    pub mint_address: Address,
    pub source: String,
    pub snapshot: PriceSnapshot,
    /// Flush time minus snapshot time.
    pub latency_ms: u64,
}

#[async_trait]
pub trait PriceSnapshotRepository: BatchSink<PriceSnapshot> {
    /// Newest first.
    async fn fetch_recent(&self, mint: &Address, limit: usize) -> Result<Vec<StoredPriceSnapshot>>;
}
