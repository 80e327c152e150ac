//! Engine facade: owns the pool-state store and the price-history tracker,
//! routes inbound events to them and answers queries.
//!
//! Every mutation runs synchronously inside `handle_*`; the only async work
//! is the batchers' flushing, which never touches live state.

use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, instrument, warn};

use crate::address::Address;
use crate::batcher::{BatchSink, PersistenceBatcher};
use crate::config::AppConfig;
use crate::decoder;
use crate::events::{AccountUpdate, InboundEvent, ReservesUpdate};
use crate::history::tracker::{PriceHistoryTracker, PriceMetrics, PriceSnapshot};
use crate::metrics::counters::Counters;
use crate::pool::model::{PoolReserves, PoolState, PoolStateRecord, PriceUpdate};
use crate::pool::store::{AccountOutcome, PoolStateStore, ReservesOutcome};
use crate::price_feed::SolPriceCache;
use crate::pricing::depth::{DepthAnalysis, DepthAnalyzer, MaxTradeSize};
use crate::pricing::engine::{PriceEngine, TradeDirection, TradeSimulation};
use crate::time::now_ms;

/// Durable destinations for the two batchers.
#[derive(Clone)]
pub struct EngineSinks {
    pub pool_state: Arc<dyn BatchSink<PoolStateRecord>>,
    pub price_history: Arc<dyn BatchSink<PriceSnapshot>>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum EventOutcome {
    Account(AccountOutcome),
    Reserves(ReservesOutcome),
    SolPrice { accepted: bool },
    /// Not a pool account, or not decodable.
    Discarded,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub pool_state_written: usize,
    pub price_history_written: usize,
}

pub struct PoolEngine {
    pool_program_id: Address,
    subscriber_capacity: usize,
    store: PoolStateStore,
    tracker: PriceHistoryTracker,
    depth: DepthAnalyzer,
    sol_price: SolPriceCache,
    subscribers: Vec<mpsc::Sender<PriceUpdate>>,
    counters: Counters,
    clock: fn() -> u64,
}

impl PoolEngine {
    pub fn new(config: &AppConfig, sinks: EngineSinks, counters: Counters) -> Self {
        let engine = PriceEngine::new(config.pricing);
        let sol_price = SolPriceCache::new(config.sol_price_usd);

        let store = PoolStateStore::new(
            engine,
            sol_price.clone(),
            PersistenceBatcher::new(
                "pool_state",
                config.pool_flush_delay,
                sinks.pool_state,
                counters.clone(),
            ),
            counters.clone(),
        );

        let tracker = PriceHistoryTracker::new(
            config.history_capacity,
            PersistenceBatcher::new(
                "price_history",
                config.history_flush_delay,
                sinks.price_history,
                counters.clone(),
            ),
            counters.clone(),
        );

        Self {
            pool_program_id: config.pool_program_id,
            subscriber_capacity: config.subscriber_capacity,
            store,
            tracker,
            depth: DepthAnalyzer::new(engine),
            sol_price,
            subscribers: Vec::new(),
            counters,
            clock: now_ms,
        }
    }

    /// Replaces the wall clock (ms since epoch).
    pub fn with_clock(mut self, clock: fn() -> u64) -> Self {
        self.clock = clock;
        self
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn sol_price(&self) -> Option<f64> {
        self.sol_price.get()
    }

    pub fn handle_event(&mut self, event: InboundEvent) -> EventOutcome {
        match event {
            InboundEvent::Account(update) => match self.handle_account_update(&update) {
                Some(outcome) => EventOutcome::Account(outcome),
                None => EventOutcome::Discarded,
            },
            InboundEvent::Reserves(update) => {
                EventOutcome::Reserves(self.handle_reserves_update(&update))
            }
            InboundEvent::SolPrice { price_usd } => EventOutcome::SolPrice {
                accepted: self.set_sol_price(price_usd),
            },
        }
    }

    /// Decodes pool-program accounts into the store. Anything else is
    /// discarded without side effects and returns `None`.
    #[instrument(skip(self, update), fields(pubkey = %update.pubkey, slot = update.slot))]
    pub fn handle_account_update(&mut self, update: &AccountUpdate) -> Option<AccountOutcome> {
        if update.owner != self.pool_program_id || !decoder::has_pool_discriminator(&update.raw_data)
        {
            Counters::incr(&self.counters.accounts_discarded);
            debug!(owner = %update.owner, "not a pool account; discarded");
            return None;
        }

        let Some(account) = decoder::decode(update.pubkey, &update.raw_data, update.slot) else {
            Counters::incr(&self.counters.accounts_discarded);
            debug!(len = update.raw_data.len(), "pool account not decodable; discarded");
            return None;
        };
        Counters::incr(&self.counters.accounts_decoded);

        Some(self.store.apply_account_update(account, (self.clock)()))
    }

    pub fn handle_reserves_update(&mut self, update: &ReservesUpdate) -> ReservesOutcome {
        let outcome = self.store.apply_reserves_update(update, (self.clock)());

        if let ReservesOutcome::Applied(price_update) = &outcome {
            self.tracker.record(price_update);
            self.publish(price_update);
        }
        outcome
    }

    /// Updates the cached SOL/USD price. Takes effect on the next reserves
    /// update of each pool.
    pub fn set_sol_price(&mut self, price_usd: f64) -> bool {
        self.sol_price.set(price_usd)
    }

    /// Bounded stream of every metrics refresh. A subscriber that falls
    /// behind misses updates; dropping the receiver unsubscribes.
    pub fn subscribe(&mut self) -> mpsc::Receiver<PriceUpdate> {
        let (tx, rx) = mpsc::channel(self.subscriber_capacity);
        self.subscribers.push(tx);
        debug!(subscribers = self.subscribers.len(), "price subscriber added");
        rx
    }

    fn publish(&mut self, update: &PriceUpdate) {
        let counters = &self.counters;
        self.subscribers.retain(|tx| match tx.try_send(update.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                Counters::incr(&counters.subscriber_drops);
                warn!(mint = %update.mint_address, "price subscriber full; update dropped");
                true
            }
            Err(TrySendError::Closed(_)) => {
                debug!("price subscriber closed; removed");
                false
            }
        });
    }

    /* =========================
    Queries
    ========================= */

    pub fn get_pool_state(&self, mint: &Address) -> Option<PoolState> {
        self.store.get_by_mint(mint).map(|s| self.view(s))
    }

    pub fn get_pool_state_by_address(&self, pool_address: &Address) -> Option<PoolState> {
        self.store
            .get_by_pool_address(pool_address)
            .map(|s| self.view(s))
    }

    /// All pools, ordered by mint.
    pub fn list_all_pools(&self) -> Vec<PoolState> {
        self.store.list_all().into_iter().map(|s| self.view(s)).collect()
    }

    /// Stored state with the tracker's 24h change merged in.
    fn view(&self, state: &PoolState) -> PoolState {
        let mut view = state.clone();
        view.metrics.price_change_24h = self
            .tracker
            .price_changes(&state.mint(), (self.clock)())
            .change_24h;
        view
    }

    pub fn get_price_metrics(&self, mint: &Address) -> Option<PriceMetrics> {
        self.tracker.price_metrics(mint, (self.clock)())
    }

    pub fn get_price_history(&self, mint: &Address, limit: Option<usize>) -> Vec<PriceSnapshot> {
        self.tracker.history(mint, limit)
    }

    pub fn calculate_liquidity_depth(&self, reserves: &PoolReserves) -> DepthAnalysis {
        self.depth.analyze(reserves, self.sol_price.get())
    }

    pub fn max_trade_size(&self, reserves: &PoolReserves, max_slippage: f64) -> MaxTradeSize {
        self.depth
            .max_trade_size(reserves, max_slippage, self.sol_price.get())
    }

    /// `amount` in smallest units of the input side.
    pub fn simulate_trade(
        &self,
        amount: f64,
        reserves: &PoolReserves,
        direction: TradeDirection,
    ) -> TradeSimulation {
        self.store.engine().simulate(reserves, amount, direction)
    }

    pub fn bonding_curve_progress(&self, mint: &Address) -> Option<f64> {
        self.store
            .get_by_mint(mint)
            .map(|s| self.store.engine().bonding_curve_progress(&s.reserves))
    }

    /// Stops both batchers and closes all subscriptions. With `flush`,
    /// pending writes are persisted first.
    #[instrument(skip(self))]
    pub async fn shutdown(&mut self, flush: bool) -> ShutdownReport {
        self.subscribers.clear();

        let report = ShutdownReport {
            pool_state_written: self.store.shutdown(flush).await,
            price_history_written: self.tracker.shutdown(flush).await,
        };
        info!(
            pools = self.store.len(),
            pool_state_written = report.pool_state_written,
            price_history_written = report.price_history_written,
            "engine shut down"
        );
        report
    }
}
