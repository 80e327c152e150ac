use std::str::FromStr;
use std::time::Duration;

use crate::address::Address;
use crate::error::EngineError;
use crate::history::tracker::DEFAULT_HISTORY_CAPACITY;
use crate::pricing::engine::{
    DEFAULT_GRADUATION_THRESHOLD_SOL, DEFAULT_TOKEN_DECIMALS, DEFAULT_TOTAL_SUPPLY, PricingConfig,
    SupplyModel,
};

/// Program that owns pump-style AMM pool accounts.
pub const DEFAULT_POOL_PROGRAM_ID: &str = "pAMMBay6oceH9fJKBRHGP5D4bD4sWpmSwMn52FMfXEA";

#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Database connection string.
    pub database_url: String,

    /// Log as JSON (`APP_ENV=production`).
    pub json_logs: bool,

    // =========================
    // Ingestion
    // =========================
    /// Only accounts owned by this program are fed to the decoder.
    pub pool_program_id: Address,

    // =========================
    // Pricing
    // =========================
    /// Decimals, supply model, graduation threshold and trade fee.
    ///
    /// The supply model decides market cap: fixed total supply for
    /// bonding-curve tokens, or a circulating ratio for graduated pools.
    pub pricing: PricingConfig,

    /// Initial SOL/USD price, until a price event arrives.
    pub sol_price_usd: Option<f64>,

    // =========================
    // Persistence
    // =========================
    /// Debounce delay of the pool-state batcher.
    pub pool_flush_delay: Duration,

    /// Debounce delay of the price-history batcher.
    pub history_flush_delay: Duration,

    /// Snapshots retained per mint (24h at 1/min by default).
    pub history_capacity: usize,

    // =========================
    // Fan-out
    // =========================
    /// Channel depth per price-update subscriber. A full subscriber misses
    /// updates rather than blocking ingestion.
    pub subscriber_capacity: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://pool_engine_dev.db?mode=rwc".to_string(),
            json_logs: false,
            pool_program_id: Address::from_str(DEFAULT_POOL_PROGRAM_ID).unwrap_or_default(),
            pricing: PricingConfig::default(),
            sol_price_usd: None,
            pool_flush_delay: Duration::from_millis(1_000),
            history_flush_delay: Duration::from_millis(5_000),
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            subscriber_capacity: 1_024,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, EngineError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup; unset keys fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, EngineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let database_url = get("DATABASE_URL").unwrap_or(defaults.database_url);
        let json_logs = get("APP_ENV").is_some_and(|v| v == "production");

        let pool_program_id = match get("POOL_PROGRAM_ID") {
            Some(v) => v.trim().parse().map_err(|e| invalid("POOL_PROGRAM_ID", e))?,
            None => defaults.pool_program_id,
        };

        let token_decimals: u8 = parse(&get, "TOKEN_DECIMALS", DEFAULT_TOKEN_DECIMALS)?;
        if token_decimals > 18 {
            return Err(invalid("TOKEN_DECIMALS", "must be at most 18"));
        }

        let total_supply: f64 = parse(&get, "TOTAL_SUPPLY", DEFAULT_TOTAL_SUPPLY)?;
        if !(total_supply.is_finite() && total_supply > 0.0) {
            return Err(invalid("TOTAL_SUPPLY", "must be positive"));
        }

        let supply_model = match get("SUPPLY_MODEL").as_deref().map(str::trim) {
            None | Some("fixed") => SupplyModel::FixedTotal { total_supply },
            Some("circulating") => {
                let ratio: f64 = parse(&get, "CIRCULATING_RATIO", 0.10)?;
                if !(ratio > 0.0 && ratio <= 1.0) {
                    return Err(invalid("CIRCULATING_RATIO", "must be in (0, 1]"));
                }
                SupplyModel::CirculatingRatio {
                    total_supply,
                    ratio,
                }
            }
            Some(other) => {
                return Err(invalid(
                    "SUPPLY_MODEL",
                    format!("expected fixed or circulating, got {other}"),
                ));
            }
        };

        let graduation_threshold_sol: f64 = parse(
            &get,
            "GRADUATION_THRESHOLD_SOL",
            DEFAULT_GRADUATION_THRESHOLD_SOL,
        )?;
        if !(graduation_threshold_sol.is_finite() && graduation_threshold_sol > 0.0) {
            return Err(invalid("GRADUATION_THRESHOLD_SOL", "must be positive"));
        }

        let fee_bps: u32 = parse(&get, "TRADE_FEE_BPS", 25)?;
        if fee_bps >= 10_000 {
            return Err(invalid("TRADE_FEE_BPS", "must be below 10000"));
        }

        let sol_price_usd = match get("SOL_PRICE_USD") {
            Some(v) => {
                let price: f64 = v.trim().parse().map_err(|e| invalid("SOL_PRICE_USD", e))?;
                if !(price.is_finite() && price > 0.0) {
                    return Err(invalid("SOL_PRICE_USD", "must be positive"));
                }
                Some(price)
            }
            None => None,
        };

        let pool_flush_ms: u64 = parse(&get, "POOL_FLUSH_DELAY_MS", 1_000)?;
        let history_flush_ms: u64 = parse(&get, "HISTORY_FLUSH_DELAY_MS", 5_000)?;

        let history_capacity: usize = parse(&get, "HISTORY_CAPACITY", DEFAULT_HISTORY_CAPACITY)?;
        if history_capacity == 0 {
            return Err(invalid("HISTORY_CAPACITY", "must be at least 1"));
        }

        let subscriber_capacity: usize = parse(&get, "SUBSCRIBER_CAPACITY", 1_024)?;
        if subscriber_capacity == 0 {
            return Err(invalid("SUBSCRIBER_CAPACITY", "must be at least 1"));
        }

        Ok(Self {
            database_url,
            json_logs,
            pool_program_id,
            pricing: PricingConfig {
                token_decimals,
                supply_model,
                graduation_threshold_sol,
                fee_rate: fee_bps as f64 / 10_000.0,
            },
            sol_price_usd,
            pool_flush_delay: Duration::from_millis(pool_flush_ms),
            history_flush_delay: Duration::from_millis(history_flush_ms),
            history_capacity,
            subscriber_capacity,
        })
    }
}

fn parse<T, G>(get: &G, key: &'static str, default: T) -> Result<T, EngineError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(v) => v.trim().parse().map_err(|e| invalid(key, e)),
        None => Ok(default),
    }
}

fn invalid(key: &'static str, reason: impl std::fmt::Display) -> EngineError {
    EngineError::InvalidConfig {
        key,
        reason: reason.to_string(),
    }
}
