use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{AnyPool, Row};
use tracing::{debug, instrument, warn};

use crate::address::Address;
use crate::batcher::{BatchSink, PendingWrite};
use crate::db::{i64_to_u64, opt_u64_to_i64, u64_to_i64};
use crate::logger::warn_if_slow;
use crate::pool::model::{PoolMetrics, PoolStateRecord};
use crate::pool::repository::{PoolStateRepository, TokenPriceRow};

/// SQLx-backed pool state persistence.
/// Responsible only for persistence and row mapping.
pub struct SqlxPoolStateRepository {
    pool: AnyPool,
}

impl SqlxPoolStateRepository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }

    async fn write_all(&self, batch: &[PendingWrite<PoolStateRecord>]) -> Result<()> {
        let rows: Vec<SnapshotRow> = batch
            .iter()
            .filter_map(|write| match SnapshotRow::from_write(write) {
                Ok(row) => Some(row),
                Err(e) => {
                    warn!(
                        mint = %write.mint_address,
                        slot = write.slot,
                        error = %e,
                        "skipping pool state row outside column range"
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
            .context("begin pool state transaction")?;

        let mut upserts = 0usize;
        for row in &rows {
            sqlx::query(
                r#"
INSERT INTO pool_state_snapshots (
  mint, pool, kind,
  virtual_sol_reserves, virtual_token_reserves,
  real_sol_reserves, real_token_reserves,
  lp_supply, is_active, slot, observed_ms
) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?);
"#,
            )
            .bind(row.mint.clone())
            .bind(row.pool.clone())
            .bind(row.kind)
            .bind(row.virtual_sol_reserves)
            .bind(row.virtual_token_reserves)
            .bind(row.real_sol_reserves)
            .bind(row.real_token_reserves)
            .bind(row.lp_supply)
            .bind(row.is_active)
            .bind(row.slot)
            .bind(row.observed_ms)
            .execute(&mut *tx)
            .await
            .context("insert pool_state_snapshots")?;

            // unpriced pools have nothing to aggregate yet
            let Some(metrics) = &row.priced else {
                continue;
            };

            sqlx::query(
                r#"
INSERT INTO token_prices (
  mint, pool, price_sol, price_usd, market_cap_usd,
  liquidity_sol, liquidity_usd, volume_24h_usd,
  virtual_sol_reserves, virtual_token_reserves, slot, updated_ms
) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
ON CONFLICT(mint) DO UPDATE SET
  pool = excluded.pool,
  price_sol = excluded.price_sol,
  price_usd = excluded.price_usd,
  market_cap_usd = excluded.market_cap_usd,
  liquidity_sol = excluded.liquidity_sol,
  liquidity_usd = excluded.liquidity_usd,
  volume_24h_usd = excluded.volume_24h_usd,
  virtual_sol_reserves = excluded.virtual_sol_reserves,
  virtual_token_reserves = excluded.virtual_token_reserves,
  slot = excluded.slot,
  updated_ms = excluded.updated_ms
WHERE excluded.slot >= token_prices.slot;
"#,
            )
            .bind(row.mint.clone())
            .bind(row.pool.clone())
            .bind(metrics.price_per_token_sol)
            .bind(metrics.price_per_token_usd)
            .bind(metrics.market_cap_usd)
            .bind(metrics.liquidity_sol)
            .bind(metrics.liquidity_usd)
            .bind(metrics.volume_24h)
            .bind(row.virtual_sol_reserves)
            .bind(row.virtual_token_reserves)
            .bind(row.slot)
            .bind(row.observed_ms)
            .execute(&mut *tx)
            .await
            .context("upsert token_prices")?;
            upserts += 1;
        }

        tx.commit().await.context("commit pool state transaction")?;
        debug!(rows = rows.len(), upserts, skipped, "pool state batch committed");
        Ok(())
    }
}

/// One pending write with every integer already converted for storage.
struct SnapshotRow {
    mint: String,
    pool: String,
    kind: &'static str,
    virtual_sol_reserves: i64,
    virtual_token_reserves: i64,
    real_sol_reserves: Option<i64>,
    real_token_reserves: Option<i64>,
    lp_supply: i64,
    is_active: i64,
    slot: i64,
    observed_ms: i64,
    /// Metrics for the aggregate row; `None` while the pool has no liquidity.
    priced: Option<PoolMetrics>,
}

impl SnapshotRow {
    fn from_write(write: &PendingWrite<PoolStateRecord>) -> Result<Self> {
        let record = &write.payload;
        let reserves = &record.reserves;

        Ok(Self {
            mint: write.mint_address.to_string(),
            pool: record.pool_address.to_string(),
            kind: record.kind.as_str(),
            virtual_sol_reserves: u64_to_i64(reserves.virtual_sol_reserves)?,
            virtual_token_reserves: u64_to_i64(reserves.virtual_token_reserves)?,
            real_sol_reserves: opt_u64_to_i64(reserves.real_sol_reserves)?,
            real_token_reserves: opt_u64_to_i64(reserves.real_token_reserves)?,
            lp_supply: u64_to_i64(reserves.lp_supply)?,
            is_active: if record.is_active { 1 } else { 0 },
            slot: u64_to_i64(write.slot)?,
            observed_ms: u64_to_i64(write.observed_at_ms)?,
            priced: reserves
                .has_liquidity()
                .then(|| record.metrics.clone()),
        })
    }
}

#[async_trait]
impl BatchSink<PoolStateRecord> for SqlxPoolStateRepository {
    #[instrument(skip(self, batch), target = "store", fields(size = batch.len()))]
    async fn write_batch(&self, batch: Vec<PendingWrite<PoolStateRecord>>) -> Result<()> {
        warn_if_slow(
            "db_write_pool_state_batch",
            Duration::from_millis(250),
            self.write_all(&batch),
        )
        .await
    }
}

#[async_trait]
impl PoolStateRepository for SqlxPoolStateRepository {
    async fn fetch_token_price(&self, mint: &Address) -> Result<Option<TokenPriceRow>> {
        let row = sqlx::query(
            r#"
SELECT
  mint, pool, price_sol, price_usd, market_cap_usd,
  liquidity_sol, liquidity_usd, volume_24h_usd,
  virtual_sol_reserves, virtual_token_reserves, slot, updated_ms
FROM token_prices
WHERE mint = ?;
"#,
        )
        .bind(mint.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(row_to_token_price(&r)?)),
            None => Ok(None),
        }
    }

    async fn count_snapshots(&self, mint: &Address) -> Result<u64> {
        let row = sqlx::query(r#"SELECT COUNT(*) AS n FROM pool_state_snapshots WHERE mint = ?;"#)
            .bind(mint.to_string())
            .fetch_one(&self.pool)
            .await?;

        i64_to_u64(row.get::<i64, _>("n"))
    }
}

/* =========================
Row mapping
========================= */

fn row_to_token_price(r: &sqlx::any::AnyRow) -> Result<TokenPriceRow> {
    let mint: String = r.get("mint");
    let pool: String = r.get("pool");

    Ok(TokenPriceRow {
        mint_address: mint.parse().context("invalid mint")?,
        pool_address: pool.parse().context("invalid pool")?,
        price_per_token_sol: r.get::<f64, _>("price_sol"),
        price_per_token_usd: r.get::<f64, _>("price_usd"),
        market_cap_usd: r.get::<f64, _>("market_cap_usd"),
        liquidity_sol: r.get::<f64, _>("liquidity_sol"),
        liquidity_usd: r.get::<f64, _>("liquidity_usd"),
        volume_24h_usd: r.get::<Option<f64>, _>("volume_24h_usd"),
        virtual_sol_reserves: i64_to_u64(r.get("virtual_sol_reserves"))?,
        virtual_token_reserves: i64_to_u64(r.get("virtual_token_reserves"))?,
        slot: i64_to_u64(r.get("slot"))?,
        updated_ms: i64_to_u64(r.get("updated_ms"))?,
    })
}
