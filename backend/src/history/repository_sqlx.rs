use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{AnyPool, Row};
use tracing::{debug, instrument, warn};

use crate::address::Address;
use crate::batcher::{BatchSink, PendingWrite};
use crate::db::{i64_to_u64, u64_to_i64};
use crate::history::repository::{PriceSnapshotRepository, SNAPSHOT_SOURCE, StoredPriceSnapshot};
use crate::history::tracker::PriceSnapshot;
use crate::logger::warn_if_slow;
use crate::time::now_ms;

/// SQLx-backed price history persistence.
pub struct SqlxPriceSnapshotRepository {
    pool: AnyPool,
}

impl SqlxPriceSnapshotRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }

    async fn insert_all(&self, batch: &[PendingWrite<PriceSnapshot>], flushed_ms: u64) -> Result<()> {
        let rows: Vec<SnapshotRow> = batch
            .iter()
            .filter_map(|write| match SnapshotRow::from_write(write, flushed_ms) {
                Ok(row) => Some(row),
                Err(e) => {
                    warn!(
                        mint = %write.mint_address,
                        slot = write.slot,
                        error = %e,
                        "skipping price snapshot outside column range"
                    );
                    None
                }
            })
            .collect();
        let skipped = batch.len() - rows.len();
        if rows.is_empty() {
            return Ok(());
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin price snapshot transaction")?;

        for row in &rows {
            let s = row.snapshot;

            sqlx::query(
                r#"
INSERT INTO price_snapshots (
  mint, source, price_sol, price_usd, market_cap_usd, liquidity_usd,
  sol_reserves, token_reserves, latency_ms, slot, snapshot_ms
) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?);
"#,
            )
            .bind(row.mint.clone())
            .bind(SNAPSHOT_SOURCE)
            .bind(s.price_per_token_sol)
            .bind(s.price_per_token_usd)
            .bind(s.market_cap_usd)
            .bind(s.liquidity_usd)
            .bind(row.sol_reserves)
            .bind(row.token_reserves)
            .bind(row.latency_ms)
            .bind(row.slot)
            .bind(row.snapshot_ms)
            .execute(&mut *tx)
            .await
            .context("insert price_snapshots")?;
        }

        tx.commit().await.context("commit price snapshot transaction")?;
        debug!(rows = rows.len(), skipped, "price snapshot batch committed");
        Ok(())
    }
}

/// A snapshot with its integer columns converted for storage.
struct SnapshotRow<'a> {
    mint: String,
    snapshot: &'a PriceSnapshot,
    sol_reserves: i64,
    token_reserves: i64,
    latency_ms: i64,
    slot: i64,
    snapshot_ms: i64,
}

impl<'a> SnapshotRow<'a> {
    fn from_write(write: &'a PendingWrite<PriceSnapshot>, flushed_ms: u64) -> Result<Self> {
        let s = &write.payload;

        Ok(Self {
            mint: write.mint_address.to_string(),
            snapshot: s,
            sol_reserves: u64_to_i64(s.sol_reserves)?,
            token_reserves: u64_to_i64(s.token_reserves)?,
            latency_ms: u64_to_i64(flushed_ms.saturating_sub(s.timestamp))?,
            slot: u64_to_i64(s.slot)?,
            snapshot_ms: u64_to_i64(s.timestamp)?,
        })
    }
}

#[async_trait]
impl BatchSink<PriceSnapshot> for SqlxPriceSnapshotRepository {
    #[instrument(skip(self, batch), target = "history", fields(size = batch.len()))]
    async fn write_batch(&self, batch: Vec<PendingWrite<PriceSnapshot>>) -> Result<()> {
        warn_if_slow(
            "db_write_price_snapshot_batch",
            Duration::from_millis(250),
            self.insert_all(&batch, now_ms()),
        )
        .await
    }
}

#[async_trait]
impl PriceSnapshotRepository for SqlxPriceSnapshotRepository {
    async fn fetch_recent(&self, mint: &Address, limit: usize) -> Result<Vec<StoredPriceSnapshot>> {
        let rows = sqlx::query(
            r#"
SELECT
  mint, source, price_sol, price_usd, market_cap_usd, liquidity_usd,
  sol_reserves, token_reserves, latency_ms, slot, snapshot_ms
FROM price_snapshots
WHERE mint = ?
ORDER BY snapshot_ms DESC, slot DESC
LIMIT ?;
"#,
        )
        .bind(mint.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for r in rows {
            match row_to_snapshot(&r) {
                Ok(s) => out.push(s),
                Err(e) => {
                    warn!(error = %e, "skipping malformed price snapshot row");
                }
            }
        }

        Ok(out)
    }
}

fn row_to_snapshot(r: &sqlx::any::AnyRow) -> Result<StoredPriceSnapshot> {
    let mint: String = r.get("mint");

    Ok(StoredPriceSnapshot {
        mint_address: mint.parse().context("invalid mint")?,
        source: r.get::<String, _>("source"),
        snapshot: PriceSnapshot {
            timestamp: i64_to_u64(r.get("snapshot_ms"))?,
            price_per_token_sol: r.get::<f64, _>("price_sol"),
            price_per_token_usd: r.get::<f64, _>("price_usd"),
            market_cap_usd: r.get::<f64, _>("market_cap_usd"),
            liquidity_usd: r.get::<f64, _>("liquidity_usd"),
            sol_reserves: i64_to_u64(r.get("sol_reserves"))?,
            token_reserves: i64_to_u64(r.get("token_reserves"))?,
            slot: i64_to_u64(r.get("slot"))?,
        },
        latency_ms: i64_to_u64(r.get("latency_ms"))?,
    })
}
