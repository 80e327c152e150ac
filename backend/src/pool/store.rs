use std::collections::HashMap;

use tracing::{debug, info, instrument, warn};

use crate::address::Address;
use crate::batcher::{PendingWrite, PersistenceBatcher};
use crate::decoder::PoolAccount;
use crate::events::ReservesUpdate;
use crate::metrics::counters::Counters;
use crate::pool::model::{
    PoolMetrics, PoolReserves, PoolState, PoolStateRecord, PriceUpdate, WriteKind,
};
use crate::pool::volume::RollingVolume;
use crate::price_feed::SolPriceCache;
use crate::pricing::engine::PriceEngine;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccountOutcome {
    Created,
    Updated,
    RejectedStale { current_slot: u64 },
}

#[derive(Clone, Debug, PartialEq)]
pub enum ReservesOutcome {
    Applied(PriceUpdate),
    /// No account update has been seen for the mint yet.
    UnknownMint,
    RejectedStale { current_slot: u64 },
}

/// Authoritative in-memory pool state, keyed by tradable mint.
///
/// All mutation is synchronous; persistence goes through the batcher and
/// never blocks the caller.
pub struct PoolStateStore {
    pools: HashMap<Address, PoolState>,
    /// pool address -> mint
    by_pool: HashMap<Address, Address>,
    volumes: HashMap<Address, RollingVolume>,
    engine: PriceEngine,
    sol_price: SolPriceCache,
    batcher: PersistenceBatcher<PoolStateRecord>,
    counters: Counters,
}

impl PoolStateStore {
    pub fn new(
        engine: PriceEngine,
        sol_price: SolPriceCache,
        batcher: PersistenceBatcher<PoolStateRecord>,
        counters: Counters,
    ) -> Self {
        Self {
            pools: HashMap::new(),
            by_pool: HashMap::new(),
            volumes: HashMap::new(),
            engine,
            sol_price,
            batcher,
            counters,
        }
    }

    pub fn engine(&self) -> &PriceEngine {
        &self.engine
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    pub fn pending_writes(&self) -> usize {
        self.batcher.pending_len()
    }

    /// Creates or merges the pool for the account's tradable mint. Prices are
    /// left untouched until reserves arrive.
    #[instrument(
        skip(self, account),
        target = "store",
        fields(mint = %account.token_mint(), pool = %account.pool_address, slot = account.slot)
    )]
    pub fn apply_account_update(&mut self, account: PoolAccount, now_ms: u64) -> AccountOutcome {
        let mint = account.token_mint();
        let pool_address = account.pool_address;

        let outcome = match self.pools.get_mut(&mint) {
            Some(state) => {
                if account.slot < state.account.slot {
                    Counters::incr(&self.counters.stale_rejected);
                    debug!(current_slot = state.account.slot, "stale account snapshot rejected");
                    return AccountOutcome::RejectedStale {
                        current_slot: state.account.slot,
                    };
                }

                if state.account.pool_address != pool_address {
                    warn!(previous = %state.account.pool_address, "pool address changed for mint");
                    self.by_pool.remove(&state.account.pool_address);
                }

                state.reserves.pool_address = pool_address;
                state.reserves.lp_supply = account.lp_supply;
                state.account = account;
                AccountOutcome::Updated
            }
            None => {
                let mut reserves = PoolReserves::new(mint, pool_address);
                reserves.lp_supply = account.lp_supply;

                self.pools.insert(
                    mint,
                    PoolState {
                        account,
                        reserves,
                        metrics: PoolMetrics::default(),
                        is_active: true,
                        last_trade_at: None,
                    },
                );
                Counters::incr(&self.counters.pools_created);
                info!("pool discovered");
                AccountOutcome::Created
            }
        };

        self.by_pool.insert(pool_address, mint);
        self.enqueue(mint, WriteKind::Account, now_ms);
        outcome
    }

    /// Applies trade-derived reserves and refreshes metrics. Updates older
    /// than the stored reserves slot are rejected; equal slots are accepted,
    /// but an exact redelivery adds no volume.
    #[instrument(
        skip(self, update),
        target = "store",
        fields(mint = %update.mint_address, slot = update.slot)
    )]
    pub fn apply_reserves_update(&mut self, update: &ReservesUpdate, now_ms: u64) -> ReservesOutcome {
        let mint = update.mint_address;
        let Some(state) = self.pools.get_mut(&mint) else {
            Counters::incr(&self.counters.reserves_unknown_mint);
            warn!(
                pool = %update.pool_address,
                "reserves update for unknown mint ignored; no account update seen yet"
            );
            return ReservesOutcome::UnknownMint;
        };

        if update.slot < state.reserves.last_update_slot {
            Counters::incr(&self.counters.stale_rejected);
            debug!(
                current_slot = state.reserves.last_update_slot,
                "stale reserves update rejected"
            );
            return ReservesOutcome::RejectedStale {
                current_slot: state.reserves.last_update_slot,
            };
        }

        let (sol_reserves, token_reserves) =
            update.reserves.sol_and_token(state.account.sol_is_base());

        // same slot, same reserves: a redelivery, not a trade
        let redelivered = update.slot == state.reserves.last_update_slot
            && sol_reserves == state.reserves.virtual_sol_reserves
            && token_reserves == state.reserves.virtual_token_reserves;

        let volume = self.volumes.entry(mint).or_default();
        if state.last_trade_at.is_some() && !redelivered {
            let delta = state.reserves.virtual_sol_reserves.abs_diff(sol_reserves);
            volume.push(now_ms, self.engine.sol_amount(delta as f64));
        } else {
            volume.push(now_ms, 0.0);
        }

        let reserves = &mut state.reserves;
        reserves.virtual_sol_reserves = sol_reserves;
        reserves.virtual_token_reserves = token_reserves;
        if update.real_sol_reserves.is_some() {
            reserves.real_sol_reserves = update.real_sol_reserves;
        }
        if update.real_token_reserves.is_some() {
            reserves.real_token_reserves = update.real_token_reserves;
        }
        reserves.last_update_slot = update.slot;
        reserves.last_update_time = now_ms;

        state.metrics =
            self.engine
                .compute_metrics(&state.reserves, self.sol_price.get(), Some(volume.total()));
        state.last_trade_at = Some(now_ms);
        Counters::incr(&self.counters.reserves_applied);

        let price_update = PriceUpdate {
            mint_address: mint,
            pool_address: state.account.pool_address,
            reserves: state.reserves.clone(),
            metrics: state.metrics.clone(),
            slot: update.slot,
            ts_ms: now_ms,
        };

        debug!(
            price_sol = price_update.metrics.price_per_token_sol,
            price_usd = price_update.metrics.price_per_token_usd,
            "metrics refreshed"
        );

        self.enqueue(mint, WriteKind::Reserves, now_ms);
        ReservesOutcome::Applied(price_update)
    }

    fn enqueue(&self, mint: Address, kind: WriteKind, now_ms: u64) {
        let Some(state) = self.pools.get(&mint) else {
            return;
        };

        let slot = match kind {
            WriteKind::Account => state.account.slot.max(state.reserves.last_update_slot),
            WriteKind::Reserves => state.reserves.last_update_slot,
        };

        let write = PendingWrite {
            mint_address: mint,
            slot,
            observed_at_ms: now_ms,
            payload: PoolStateRecord {
                pool_address: state.account.pool_address,
                kind,
                reserves: state.reserves.clone(),
                metrics: state.metrics.clone(),
                is_active: state.is_active,
            },
        };

        if let Err(e) = self.batcher.enqueue(write) {
            Counters::incr(&self.counters.dropped_writes);
            warn!(error = %e, mint = %mint, "pool state write not queued");
        }
    }

    pub fn get_by_mint(&self, mint: &Address) -> Option<&PoolState> {
        self.pools.get(mint)
    }

    pub fn get_by_pool_address(&self, pool_address: &Address) -> Option<&PoolState> {
        self.by_pool
            .get(pool_address)
            .and_then(|mint| self.pools.get(mint))
    }

    /// All pools, ordered by mint.
    pub fn list_all(&self) -> Vec<&PoolState> {
        let mut pools: Vec<_> = self.pools.values().collect();
        pools.sort_by_key(|p| p.mint());
        pools
    }

    /// Rolling 24h volume in SOL, if the mint has seen trades.
    pub fn volume_24h_sol(&self, mint: &Address) -> Option<f64> {
        self.volumes.get(mint).map(|v| v.total())
    }

    pub async fn shutdown(&self, flush: bool) -> usize {
        self.batcher.shutdown(flush).await
    }
}
