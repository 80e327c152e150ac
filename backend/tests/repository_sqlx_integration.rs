use sqlx::any::AnyPoolOptions;
use sqlx::{AnyPool, Row};
use uuid::Uuid;

use pool_engine::address::Address;
use pool_engine::batcher::{BatchSink, PendingWrite};
use pool_engine::db::schema;
use pool_engine::history::repository::{PriceSnapshotRepository, SNAPSHOT_SOURCE};
use pool_engine::history::repository_sqlx::SqlxPriceSnapshotRepository;
use pool_engine::history::tracker::PriceSnapshot;
use pool_engine::pool::model::{PoolMetrics, PoolReserves, PoolStateRecord, WriteKind};
use pool_engine::pool::repository::PoolStateRepository;
use pool_engine::pool::repository_sqlx::SqlxPoolStateRepository;

/// Helper to setup an isolated, unique in-memory SQLite database.
/// Using a unique name in the connection string keeps parallel tests apart
/// while still allowing shared cache access.
async fn setup_db() -> AnyPool {
    sqlx::any::install_default_drivers();

    let db_name = Uuid::new_v4().to_string();
    let conn_str = format!("sqlite:file:{}?mode=memory&cache=shared", db_name);

    let pool = AnyPoolOptions::new()
        .max_connections(5)
        .connect(&conn_str)
        .await
        .unwrap();

    schema::migrate(&pool).await.unwrap();
    pool
}

const MINT: Address = Address([7; 32]);
const POOL: Address = Address([8; 32]);

fn pool_write(slot: u64, sol: u64, tokens: u64, price_usd: f64) -> PendingWrite<PoolStateRecord> {
    PendingWrite {
        mint_address: MINT,
        slot,
        observed_at_ms: 1_000 * slot,
        payload: PoolStateRecord {
            pool_address: POOL,
            kind: WriteKind::Reserves,
            reserves: PoolReserves {
                virtual_sol_reserves: sol,
                virtual_token_reserves: tokens,
                real_sol_reserves: Some(sol / 2),
                lp_supply: 10,
                last_update_slot: slot,
                ..PoolReserves::new(MINT, POOL)
            },
            metrics: PoolMetrics {
                price_per_token_sol: price_usd / 100.0,
                price_per_token_usd: price_usd,
                market_cap_usd: price_usd * 1e9,
                liquidity_sol: 2.0,
                liquidity_usd: 200.0,
                volume_24h: Some(12.5),
                price_change_24h: None,
            },
            is_active: true,
        },
    }
}

fn snapshot_write(mint: Address, slot: u64, timestamp: u64) -> PendingWrite<PriceSnapshot> {
    PendingWrite {
        mint_address: mint,
        slot,
        observed_at_ms: timestamp,
        payload: PriceSnapshot {
            timestamp,
            price_per_token_sol: 0.00002,
            price_per_token_usd: 0.003,
            market_cap_usd: 3_000_000.0,
            liquidity_usd: 3_000.0,
            sol_reserves: 10_000_000_000,
            token_reserves: 500_000_000_000,
            slot,
        },
    }
}

#[tokio::test]
async fn pool_state_batch_appends_snapshots_and_upserts_price() {
    let pool = setup_db().await;
    let repo = SqlxPoolStateRepository::new(pool.clone());

    repo.write_batch(vec![pool_write(10, 1_000, 2_000, 1.0)])
        .await
        .unwrap();
    repo.write_batch(vec![pool_write(11, 1_500, 1_800, 2.0)])
        .await
        .unwrap();

    assert_eq!(repo.count_snapshots(&MINT).await.unwrap(), 2);

    let row = repo.fetch_token_price(&MINT).await.unwrap().unwrap();
    assert_eq!(row.mint_address, MINT);
    assert_eq!(row.pool_address, POOL);
    assert_eq!(row.slot, 11);
    assert_eq!(row.price_per_token_usd, 2.0);
    assert_eq!(row.virtual_sol_reserves, 1_500);
    assert_eq!(row.volume_24h_usd, Some(12.5));

    let snap = sqlx::query(
        "SELECT kind, real_sol_reserves, real_token_reserves, is_active FROM pool_state_snapshots WHERE slot = 10",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(snap.get::<String, _>("kind"), "reserves");
    assert_eq!(snap.get::<Option<i64>, _>("real_sol_reserves"), Some(500));
    assert_eq!(snap.get::<Option<i64>, _>("real_token_reserves"), None);
    assert_eq!(snap.get::<i64, _>("is_active"), 1);
}

#[tokio::test]
async fn token_price_upsert_never_regresses_slot() {
    let pool = setup_db().await;
    let repo = SqlxPoolStateRepository::new(pool.clone());

    repo.write_batch(vec![pool_write(20, 1_000, 2_000, 5.0)])
        .await
        .unwrap();
    repo.write_batch(vec![pool_write(15, 9_000, 9_000, 1.0)])
        .await
        .unwrap();

    let row = repo.fetch_token_price(&MINT).await.unwrap().unwrap();
    assert_eq!(row.slot, 20);
    assert_eq!(row.price_per_token_usd, 5.0);
    // the append-only table still records both flushes
    assert_eq!(repo.count_snapshots(&MINT).await.unwrap(), 2);
}

#[tokio::test]
async fn unpriced_pool_is_snapshotted_but_not_aggregated() {
    let pool = setup_db().await;
    let repo = SqlxPoolStateRepository::new(pool.clone());

    let mut write = pool_write(3, 0, 0, 0.0);
    write.payload.kind = WriteKind::Account;
    repo.write_batch(vec![write]).await.unwrap();

    assert_eq!(repo.count_snapshots(&MINT).await.unwrap(), 1);
    assert!(repo.fetch_token_price(&MINT).await.unwrap().is_none());
}

#[tokio::test]
async fn out_of_range_row_is_skipped_and_batch_commits() {
    let pool = setup_db().await;
    let repo = SqlxPoolStateRepository::new(pool.clone());
    let other = Address([9; 32]);

    let ok = pool_write(1, 1_000, 1_000, 1.0);
    let mut overflow = pool_write(2, 1_000, 1_000, 1.0);
    overflow.mint_address = other;
    overflow.payload.reserves.virtual_token_reserves = u64::MAX;

    repo.write_batch(vec![ok, overflow]).await.unwrap();

    assert_eq!(repo.count_snapshots(&MINT).await.unwrap(), 1);
    assert_eq!(repo.fetch_token_price(&MINT).await.unwrap().unwrap().slot, 1);
    assert_eq!(repo.count_snapshots(&other).await.unwrap(), 0);
    assert!(repo.fetch_token_price(&other).await.unwrap().is_none());
}

#[tokio::test]
async fn out_of_range_snapshot_is_skipped() {
    let pool = setup_db().await;
    let repo = SqlxPriceSnapshotRepository::new(pool.clone());

    let mut overflow = snapshot_write(Address([1; 32]), 1, 1_000);
    overflow.payload.sol_reserves = u64::MAX;

    repo.write_batch(vec![overflow, snapshot_write(MINT, 2, 2_000)])
        .await
        .unwrap();

    let recent = repo.fetch_recent(&MINT, 10).await.unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].snapshot.slot, 2);
    assert!(repo.fetch_recent(&Address([1; 32]), 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn price_snapshots_round_trip_newest_first() {
    let pool = setup_db().await;
    let repo = SqlxPriceSnapshotRepository::new(pool.clone());

    repo.write_batch(vec![
        snapshot_write(MINT, 1, 1_000),
        snapshot_write(Address([1; 32]), 1, 1_000),
    ])
    .await
    .unwrap();
    repo.write_batch(vec![snapshot_write(MINT, 2, 2_000)])
        .await
        .unwrap();

    let recent = repo.fetch_recent(&MINT, 10).await.unwrap();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].snapshot.slot, 2);
    assert_eq!(recent[1].snapshot.slot, 1);
    assert_eq!(recent[0].source, SNAPSHOT_SOURCE);
    assert_eq!(recent[0].snapshot.token_reserves, 500_000_000_000);
    // snapshot timestamps are far in the past relative to the flush clock
    assert!(recent[0].latency_ms > 0);

    assert_eq!(repo.fetch_recent(&MINT, 1).await.unwrap().len(), 1);
}

#[tokio::test]
async fn malformed_snapshot_rows_are_skipped() {
    let pool = setup_db().await;
    let repo = SqlxPriceSnapshotRepository::new(pool.clone());

    repo.write_batch(vec![snapshot_write(MINT, 1, 1_000)])
        .await
        .unwrap();

    sqlx::query(
        r#"INSERT INTO price_snapshots VALUES (?, 'amm_reserves', 1.0, 1.0, 1.0, 1.0, 1, 1, 0, -5, 5000)"#,
    )
    .bind(MINT.to_string())
    .execute(&pool)
    .await
    .unwrap();

    let recent = repo.fetch_recent(&MINT, 10).await.unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].snapshot.slot, 1);
}
