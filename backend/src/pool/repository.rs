use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::batcher::BatchSink;
use crate::pool::model::PoolStateRecord;

/// Latest-known pricing row per token, as upserted on every flush.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TokenPriceRow {
    pub mint_address: Address,
    pub pool_address: Address,
    pub price_per_token_sol: f64,
    pub price_per_token_usd: f64,
    pub market_cap_usd: f64,
    pub liquidity_sol: f64,
    pub liquidity_usd: f64,
    pub volume_24h_usd: Option<f64>,
    pub virtual_sol_reserves: u64,
    pub virtual_token_reserves: u64,
    pub slot: u64,
    pub updated_ms: u64,
}

/// Durable pool state: append-only snapshots plus the per-token aggregate.
/// Writes arrive through [`BatchSink::write_batch`].
#[async_trait]
pub trait PoolStateRepository: BatchSink<PoolStateRecord> {
    async fn fetch_token_price(&self, mint: &Address) -> Result<Option<TokenPriceRow>>;

    async fn count_snapshots(&self, mint: &Address) -> Result<u64>;
}
