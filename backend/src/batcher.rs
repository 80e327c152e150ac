//! Persistence Batcher
//!
//! Debounces and coalesces writes before they reach the durable store.
//!
//! - `enqueue` keeps one pending entry per mint: the highest slot wins.
//! - The first enqueue into an empty queue arms a single timer; when it
//!   fires, everything pending goes to the sink as one bulk write.
//! - An idle batcher holds no timer.
//! - A failed write is logged and dropped (at-most-once persistence).
//! - Writes are serialized by a flush lock; `flush_now` and `shutdown`
//!   wait for a timer write that is already in flight.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::address::Address;
use crate::error::EngineError;
use crate::metrics::counters::Counters;

/// One coalesced write, keyed by mint.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingWrite<P> {
    pub mint_address: Address,
    pub slot: u64,
    pub observed_at_ms: u64,
    pub payload: P,
}

/// Durable destination of a batcher.
#[async_trait]
pub trait BatchSink<P>: Send + Sync {
    async fn write_batch(&self, batch: Vec<PendingWrite<P>>) -> anyhow::Result<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// First pending entry for the mint in this window.
    Queued,
    /// Replaced a pending entry with an equal or lower slot.
    Coalesced,
    /// A pending entry already has a higher slot; the write was ignored.
    SkippedStale,
}

struct BatchState<P> {
    pending: HashMap<Address, PendingWrite<P>>,
    /// Armed timer and its id; a woken timer only flushes if it is still the armed one.
    timer: Option<(u64, JoinHandle<()>)>,
    next_timer_id: u64,
    closed: bool,
}

impl<P> BatchState<P> {
    fn drain(&mut self) -> Vec<PendingWrite<P>> {
        let mut batch: Vec<_> = self.pending.drain().map(|(_, w)| w).collect();
        batch.sort_by(|a, b| {
            a.slot
                .cmp(&b.slot)
                .then_with(|| a.mint_address.cmp(&b.mint_address))
        });
        batch
    }

    fn cancel_timer(&mut self) {
        if let Some((_, handle)) = self.timer.take() {
            handle.abort();
        }
    }
}

pub struct PersistenceBatcher<P> {
    name: &'static str,
    delay: Duration,
    sink: Arc<dyn BatchSink<P>>,
    state: Arc<Mutex<BatchState<P>>>,
    /// Held for the whole drain + write of every flush.
    flush_lock: Arc<tokio::sync::Mutex<()>>,
    counters: Counters,
}

impl<P: Send + 'static> PersistenceBatcher<P> {
    pub fn new(
        name: &'static str,
        delay: Duration,
        sink: Arc<dyn BatchSink<P>>,
        counters: Counters,
    ) -> Self {
        Self {
            name,
            delay,
            sink,
            state: Arc::new(Mutex::new(BatchState {
                pending: HashMap::new(),
                timer: None,
                next_timer_id: 0,
                closed: false,
            })),
            flush_lock: Arc::new(tokio::sync::Mutex::new(())),
            counters,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn is_armed(&self) -> bool {
        self.state.lock().timer.is_some()
    }

    /// Queues `write`, replacing any pending entry for the same mint whose
    /// slot is not higher.
    pub fn enqueue(&self, write: PendingWrite<P>) -> Result<EnqueueOutcome, EngineError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(EngineError::BatcherClosed(self.name));
        }

        let outcome = match state.pending.get(&write.mint_address) {
            Some(existing) if write.slot < existing.slot => {
                return Ok(EnqueueOutcome::SkippedStale);
            }
            Some(_) => EnqueueOutcome::Coalesced,
            None => EnqueueOutcome::Queued,
        };
        state.pending.insert(write.mint_address, write);

        if state.timer.is_none() {
            self.arm_timer(&mut state);
        }

        Ok(outcome)
    }

    fn arm_timer(&self, state: &mut BatchState<P>) {
        // Outside a runtime nothing is scheduled; pending writes wait for flush_now/shutdown.
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(batcher = self.name, "no tokio runtime; flush timer not armed");
            return;
        };

        let id = state.next_timer_id;
        state.next_timer_id += 1;

        let name = self.name;
        let delay = self.delay;
        let shared = Arc::clone(&self.state);
        let flush_lock = Arc::clone(&self.flush_lock);
        let sink = Arc::clone(&self.sink);
        let counters = self.counters.clone();

        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let _flushing = flush_lock.lock().await;

            let batch = {
                let mut state = shared.lock();
                if state.timer.as_ref().map(|(armed, _)| *armed) != Some(id) {
                    return;
                }
                state.timer = None;
                state.drain()
            };

            write_batch(name, sink.as_ref(), batch, &counters).await;
        });

        state.timer = Some((id, handle));
    }

    /// Cancels the timer and writes everything pending right away.
    /// Returns the number of entries handed to the sink.
    #[instrument(skip(self), fields(batcher = self.name))]
    pub async fn flush_now(&self) -> usize {
        let _flushing = self.flush_lock.lock().await;
        let batch = {
            let mut state = self.state.lock();
            state.cancel_timer();
            state.drain()
        };

        let size = batch.len();
        write_batch(self.name, self.sink.as_ref(), batch, &self.counters).await;
        size
    }

    /// Stops accepting writes and waits for any write in flight. With
    /// `flush`, pending entries are written first; otherwise they are
    /// discarded. Returns the number of entries in the final flush.
    #[instrument(skip(self), fields(batcher = self.name))]
    pub async fn shutdown(&self, flush: bool) -> usize {
        self.state.lock().closed = true;

        if flush {
            let written = self.flush_now().await;
            info!(written, "batcher shut down after final flush");
            return written;
        }

        let _flushing = self.flush_lock.lock().await;
        let dropped = {
            let mut state = self.state.lock();
            state.cancel_timer();
            state.drain().len()
        };

        if dropped > 0 {
            Counters::add(&self.counters.dropped_writes, dropped as u64);
            warn!(dropped, "batcher shut down without flushing; pending writes dropped");
        }
        0
    }
}

async fn write_batch<P>(
    name: &'static str,
    sink: &dyn BatchSink<P>,
    batch: Vec<PendingWrite<P>>,
    counters: &Counters,
) {
    if batch.is_empty() {
        return;
    }

    let size = batch.len();
    match sink.write_batch(batch).await {
        Ok(()) => {
            Counters::incr(&counters.flushes);
            debug!(batcher = name, size, "batch flushed");
        }
        Err(e) => {
            Counters::incr(&counters.flush_failures);
            Counters::add(&counters.dropped_writes, size as u64);
            error!(batcher = name, size, error = ?e, "batch flush failed; batch dropped");
        }
    }
}
