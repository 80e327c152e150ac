use std::sync::Arc;

use anyhow::Context;
use pool_engine::{
    config::AppConfig,
    db::Db,
    engine::{EngineSinks, EventOutcome, PoolEngine},
    events::InboundEvent,
    history::repository_sqlx::SqlxPriceSnapshotRepository,
    logger::init_tracing,
    metrics::counters::Counters,
    pool::model::PriceUpdate,
    pool::repository_sqlx::SqlxPoolStateRepository,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Connects, migrates, and wires both batchers to their SQL repositories.
async fn init_sinks(cfg: &AppConfig) -> anyhow::Result<EngineSinks> {
    let db = Db::connect(&cfg.database_url)
        .await
        .context("connect database")?;
    db.migrate().await.context("migrate schema")?;

    let pool = db.pool.as_ref().clone();
    Ok(EngineSinks {
        pool_state: Arc::new(SqlxPoolStateRepository::new(pool.clone())),
        price_history: Arc::new(SqlxPriceSnapshotRepository::new(pool)),
    })
}

/// Writes every price update to stdout as one JSON line.
fn start_update_emitter(mut rx: mpsc::Receiver<PriceUpdate>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();

        while let Some(update) = rx.recv().await {
            let mut line = match serde_json::to_vec(&update) {
                Ok(line) => line,
                Err(e) => {
                    tracing::error!(error = ?e, "failed to encode price update");
                    continue;
                }
            };
            line.push(b'\n');

            if let Err(e) = stdout.write_all(&line).await {
                tracing::error!(error = ?e, "stdout closed; stopping price update output");
                return;
            }
        }

        let _ = stdout.flush().await;
    })
}

fn handle_line(engine: &mut PoolEngine, line: &str) {
    if line.trim().is_empty() {
        return;
    }

    let event = match InboundEvent::from_json_line(line) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(error = %e, "skipping malformed input line");
            return;
        }
    };

    match engine.handle_event(event) {
        EventOutcome::Reserves(outcome) => tracing::trace!(?outcome, "reserves handled"),
        EventOutcome::Account(outcome) => tracing::trace!(?outcome, "account handled"),
        EventOutcome::SolPrice { accepted } => tracing::debug!(accepted, "sol price handled"),
        EventOutcome::Discarded => {}
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    sqlx::any::install_default_drivers();

    let cfg = AppConfig::from_env()?;
    init_tracing(cfg.json_logs);

    tracing::info!("Starting pool engine...");

    let sinks = init_sinks(&cfg).await?;
    let counters = Counters::default();
    let mut engine = PoolEngine::new(&cfg, sinks, counters.clone());

    let emitter = start_update_emitter(engine.subscribe());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            line = lines.next_line() => match line.context("read stdin")? {
                Some(line) => handle_line(&mut engine, &line),
                None => {
                    tracing::info!("input closed");
                    break;
                }
            },
            _ = &mut shutdown => {
                tracing::info!("Shutdown signal received");
                break;
            }
        }
    }

    let report = engine.shutdown(true).await;
    let _ = emitter.await;

    tracing::info!(
        pool_state_written = report.pool_state_written,
        price_history_written = report.price_history_written,
        accounts_decoded = Counters::get(&counters.accounts_decoded),
        reserves_applied = Counters::get(&counters.reserves_applied),
        stale_rejected = Counters::get(&counters.stale_rejected),
        flush_failures = Counters::get(&counters.flush_failures),
        dropped_writes = Counters::get(&counters.dropped_writes),
        "Pool engine stopped"
    );

    Ok(())
}
