use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::decoder::PoolAccount;

/// Reserve snapshot of one pool, in smallest units.
///
/// `virtual_*` feed the pricing curve; `real_*` are the literal token-account
/// balances when known.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolReserves {
    pub mint_address: Address,
    pub pool_address: Address,
    pub virtual_sol_reserves: u64,
    pub virtual_token_reserves: u64,
    pub real_sol_reserves: Option<u64>,
    pub real_token_reserves: Option<u64>,
    pub lp_supply: u64,
    pub last_update_slot: u64,
    /// ms since epoch
    pub last_update_time: u64,
}

impl PoolReserves {
    pub fn new(mint_address: Address, pool_address: Address) -> Self {
        Self {
            mint_address,
            pool_address,
            ..Self::default()
        }
    }

    pub fn has_liquidity(&self) -> bool {
        self.virtual_sol_reserves > 0 && self.virtual_token_reserves > 0
    }
}

/// Metrics derived from `PoolReserves`. Never set independently.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolMetrics {
    pub price_per_token_sol: f64,
    pub price_per_token_usd: f64,
    pub market_cap_usd: f64,
    pub liquidity_sol: f64,
    pub liquidity_usd: f64,
    /// Rolling 24h volume in USD (SOL leg of observed trades).
    pub volume_24h: Option<f64>,
    /// Percentage change over 24h; filled from price history on reads.
    pub price_change_24h: Option<f64>,
}

/// Authoritative state of one pool, keyed by its tradable mint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PoolState {
    pub account: PoolAccount,
    pub reserves: PoolReserves,
    pub metrics: PoolMetrics,
    pub is_active: bool,
    /// ms since epoch of the last accepted reserves update.
    pub last_trade_at: Option<u64>,
}

impl PoolState {
    pub fn mint(&self) -> Address {
        self.reserves.mint_address
    }

    pub fn pool_address(&self) -> Address {
        self.account.pool_address
    }

    /// `reserves-pending` until the first reserves update arrives.
    pub fn is_priced(&self) -> bool {
        self.reserves.last_update_slot > 0 && self.reserves.has_liquidity()
    }
}

/// Emitted after every metrics refresh.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriceUpdate {
    pub mint_address: Address,
    pub pool_address: Address,
    pub reserves: PoolReserves,
    pub metrics: PoolMetrics,
    pub slot: u64,
    pub ts_ms: u64,
}

/// Which part of the pool state a pending write came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteKind {
    Account,
    Reserves,
}

impl WriteKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteKind::Account => "account",
            WriteKind::Reserves => "reserves",
        }
    }
}

/// Payload persisted by the pool-state batcher.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PoolStateRecord {
    pub pool_address: Address,
    pub kind: WriteKind,
    pub reserves: PoolReserves,
    pub metrics: PoolMetrics,
    pub is_active: bool,
}
