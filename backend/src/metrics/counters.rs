use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Minimal counters for operational visibility.
#[derive(Clone, Default)]
pub struct Counters {
    // account path
    pub accounts_decoded: Arc<AtomicU64>,
    pub accounts_discarded: Arc<AtomicU64>,
    pub pools_created: Arc<AtomicU64>,

    // reserves path
    pub reserves_applied: Arc<AtomicU64>,
    pub reserves_unknown_mint: Arc<AtomicU64>,

    // slot guard (accounts + reserves)
    pub stale_rejected: Arc<AtomicU64>,

    // persistence
    pub flushes: Arc<AtomicU64>,
    pub flush_failures: Arc<AtomicU64>,
    pub dropped_writes: Arc<AtomicU64>,

    // fan-out
    pub subscriber_drops: Arc<AtomicU64>,
}

impl Counters {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}
