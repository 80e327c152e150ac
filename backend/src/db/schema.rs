use sqlx::AnyPool;

pub async fn migrate(pool: &AnyPool) -> anyhow::Result<()> {
    // Pool state: append-only, one row per flush per mint
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS pool_state_snapshots (
  mint TEXT NOT NULL,
  pool TEXT NOT NULL,
  kind TEXT NOT NULL,
  virtual_sol_reserves BIGINT NOT NULL,
  virtual_token_reserves BIGINT NOT NULL,
  real_sol_reserves BIGINT,
  real_token_reserves BIGINT,
  lp_supply BIGINT NOT NULL,
  is_active INTEGER NOT NULL CHECK (is_active IN (0,1)),
  slot BIGINT NOT NULL,
  observed_ms BIGINT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    // Latest price per token
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS token_prices (
  mint TEXT PRIMARY KEY,
  pool TEXT NOT NULL,
  price_sol REAL NOT NULL,
  price_usd REAL NOT NULL,
  market_cap_usd REAL NOT NULL,
  liquidity_sol REAL NOT NULL,
  liquidity_usd REAL NOT NULL,
  volume_24h_usd REAL,
  virtual_sol_reserves BIGINT NOT NULL,
  virtual_token_reserves BIGINT NOT NULL,
  slot BIGINT NOT NULL,
  updated_ms BIGINT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    // Price history: append-only
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS price_snapshots (
  mint TEXT NOT NULL,
  source TEXT NOT NULL,
  price_sol REAL NOT NULL,
  price_usd REAL NOT NULL,
  market_cap_usd REAL NOT NULL,
  liquidity_usd REAL NOT NULL,
  sol_reserves BIGINT NOT NULL,
  token_reserves BIGINT NOT NULL,
  latency_ms BIGINT NOT NULL,
  slot BIGINT NOT NULL,
  snapshot_ms BIGINT NOT NULL
);
"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE INDEX IF NOT EXISTS idx_pool_state_snapshots_mint ON pool_state_snapshots(mint, slot);"#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"CREATE INDEX IF NOT EXISTS idx_price_snapshots_mint ON price_snapshots(mint, snapshot_ms);"#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
