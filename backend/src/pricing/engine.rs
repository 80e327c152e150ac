//! Constant-product pricing over a reserves snapshot.
//!
//! Every function here is pure. Degenerate input (zero reserves, zero or
//! non-finite amounts, missing SOL/USD price) yields zero-valued results,
//! never NaN or a division by zero.

use serde::{Deserialize, Serialize};

use crate::pool::model::{PoolMetrics, PoolReserves};

pub const SOL_DECIMALS: u8 = 9;
pub const DEFAULT_TOKEN_DECIMALS: u8 = 6;
pub const DEFAULT_TOTAL_SUPPLY: f64 = 1_000_000_000.0;
pub const DEFAULT_GRADUATION_THRESHOLD_SOL: f64 = 85.0;
pub const DEFAULT_FEE_RATE: f64 = 0.0025;

/// Supply figure used to turn a token price into a market cap.
///
/// Pool families disagree on this, so it is injected rather than fixed.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum SupplyModel {
    /// Entire supply counts (e.g. 1B tokens).
    FixedTotal { total_supply: f64 },

    /// Only `ratio` of the total supply is considered liquid.
    CirculatingRatio { total_supply: f64, ratio: f64 },
}

impl SupplyModel {
    pub fn supply(&self) -> f64 {
        match *self {
            SupplyModel::FixedTotal { total_supply } => total_supply,
            SupplyModel::CirculatingRatio {
                total_supply,
                ratio,
            } => total_supply * ratio,
        }
    }

    pub fn market_cap(&self, price_usd: f64) -> f64 {
        if !price_usd.is_finite() || price_usd <= 0.0 {
            return 0.0;
        }
        price_usd * self.supply()
    }
}

impl Default for SupplyModel {
    fn default() -> Self {
        SupplyModel::FixedTotal {
            total_supply: DEFAULT_TOTAL_SUPPLY,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PricingConfig {
    pub token_decimals: u8,
    pub supply_model: SupplyModel,
    pub graduation_threshold_sol: f64,
    /// Fraction of the input skimmed as fee, e.g. 0.0025 for 25 bps.
    pub fee_rate: f64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            token_decimals: DEFAULT_TOKEN_DECIMALS,
            supply_model: SupplyModel::default(),
            graduation_threshold_sol: DEFAULT_GRADUATION_THRESHOLD_SOL,
            fee_rate: DEFAULT_FEE_RATE,
        }
    }
}

/// Buy = SOL in, tokens out. Sell = tokens in, SOL out.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeDirection {
    Buy,
    Sell,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SpotPrice {
    /// SOL per whole token.
    pub price_in_base: f64,
    /// USD per whole token; zero without a SOL/USD price.
    pub price_in_quote_currency: f64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Liquidity {
    pub sol: f64,
    pub usd: f64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceImpact {
    /// |new spot - old spot| / old spot
    pub price_impact: f64,
    /// SOL per whole token actually paid (buy) or received (sell).
    pub effective_price: f64,
    /// Output-side amount in smallest units (tokens for a buy, lamports for a sell).
    pub amount_out: f64,
    /// Mean of the pre- and post-trade spot prices.
    pub average_price: f64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeSimulation {
    pub input_amount: f64,
    pub output_amount: f64,
    /// Input units paid per output unit.
    pub execution_price: f64,
    /// Relative move of the pool's marginal price.
    pub price_impact: f64,
    /// Relative gap between execution price and the pre-trade spot price, fee included.
    pub slippage: f64,
    pub effective_fee: f64,
}

fn scale(decimals: u8) -> f64 {
    10f64.powi(decimals as i32)
}

fn usable_usd(sol_usd: Option<f64>) -> Option<f64> {
    sol_usd.filter(|p| p.is_finite() && *p > 0.0)
}

/// Fee-adjusted constant-product swap on raw reserves.
///
/// The fee is skimmed from the input before it hits the invariant and is not
/// added back to the reserves, so
/// `(input_reserve + input_after_fee) * (output_reserve - output_amount) == k`.
pub fn simulate_trade(
    input_amount: f64,
    input_reserve: f64,
    output_reserve: f64,
    fee_rate: f64,
) -> TradeSimulation {
    let valid = |v: f64| v.is_finite() && v > 0.0;
    if !valid(input_amount) || !valid(input_reserve) || !valid(output_reserve) {
        return TradeSimulation::default();
    }

    let fee_rate = if fee_rate.is_finite() {
        fee_rate.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let effective_fee = input_amount * fee_rate;
    let input_after_fee = input_amount - effective_fee;

    let new_input_reserve = input_reserve + input_after_fee;
    let output_amount = output_reserve * input_after_fee / new_input_reserve;
    if output_amount <= 0.0 {
        return TradeSimulation {
            input_amount,
            effective_fee,
            ..TradeSimulation::default()
        };
    }
    let new_output_reserve = output_reserve - output_amount;

    let spot = input_reserve / output_reserve;
    let new_spot = new_input_reserve / new_output_reserve;
    let execution_price = input_amount / output_amount;

    TradeSimulation {
        input_amount,
        output_amount,
        execution_price,
        price_impact: (new_spot - spot) / spot,
        slippage: (execution_price - spot) / spot,
        effective_fee,
    }
}

/// Share of the graduation threshold reached by the curve, in percent, clamped to [0, 100].
pub fn bonding_curve_progress(virtual_sol_reserves: u64, graduation_threshold_sol: f64) -> f64 {
    if !graduation_threshold_sol.is_finite() || graduation_threshold_sol <= 0.0 {
        return 0.0;
    }
    let sol = virtual_sol_reserves as f64 / scale(SOL_DECIMALS);
    (sol / graduation_threshold_sol * 100.0).clamp(0.0, 100.0)
}

/// Stateless pricing calculator configured for one pool family.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PriceEngine {
    config: PricingConfig,
}

impl PriceEngine {
    pub fn new(config: PricingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PricingConfig {
        &self.config
    }

    pub fn sol_amount(&self, lamports: f64) -> f64 {
        lamports / scale(SOL_DECIMALS)
    }

    pub fn token_amount(&self, raw: f64) -> f64 {
        raw / scale(self.config.token_decimals)
    }

    pub fn lamports(&self, sol: f64) -> f64 {
        sol * scale(SOL_DECIMALS)
    }

    pub fn raw_tokens(&self, tokens: f64) -> f64 {
        tokens * scale(self.config.token_decimals)
    }

    pub fn spot_price(&self, reserves: &PoolReserves, sol_usd: Option<f64>) -> SpotPrice {
        if !reserves.has_liquidity() {
            return SpotPrice::default();
        }

        let sol = self.sol_amount(reserves.virtual_sol_reserves as f64);
        let tokens = self.token_amount(reserves.virtual_token_reserves as f64);
        let price_in_base = sol / tokens;

        SpotPrice {
            price_in_base,
            price_in_quote_currency: usable_usd(sol_usd)
                .map(|usd| price_in_base * usd)
                .unwrap_or(0.0),
        }
    }

    pub fn market_cap(&self, price_usd: f64) -> f64 {
        self.config.supply_model.market_cap(price_usd)
    }

    /// Two-sided pool value: the SOL side doubled.
    pub fn liquidity(&self, reserves: &PoolReserves, sol_usd: Option<f64>) -> Liquidity {
        if !reserves.has_liquidity() {
            return Liquidity::default();
        }

        let sol = self.sol_amount(reserves.virtual_sol_reserves as f64) * 2.0;
        Liquidity {
            sol,
            usd: usable_usd(sol_usd).map(|usd| sol * usd).unwrap_or(0.0),
        }
    }

    /// Fee-free constant-product impact of trading `input_amount` smallest units.
    pub fn price_impact(
        &self,
        reserves: &PoolReserves,
        input_amount: u64,
        direction: TradeDirection,
    ) -> PriceImpact {
        if !reserves.has_liquidity() || input_amount == 0 {
            return PriceImpact::default();
        }

        let sol = reserves.virtual_sol_reserves as f64;
        let tokens = reserves.virtual_token_reserves as f64;
        let k = sol * tokens;
        let amount = input_amount as f64;

        let (new_sol, new_tokens) = match direction {
            TradeDirection::Buy => (sol + amount, k / (sol + amount)),
            TradeDirection::Sell => (k / (tokens + amount), tokens + amount),
        };

        let (sol_delta, token_delta, out) = match direction {
            TradeDirection::Buy => (amount, tokens - new_tokens, tokens - new_tokens),
            TradeDirection::Sell => (sol - new_sol, amount, sol - new_sol),
        };
        if out <= 0.0 {
            return PriceImpact::default();
        }

        let old_spot = self.sol_amount(sol) / self.token_amount(tokens);
        let new_spot = self.sol_amount(new_sol) / self.token_amount(new_tokens);

        PriceImpact {
            price_impact: (new_spot - old_spot).abs() / old_spot,
            effective_price: self.sol_amount(sol_delta) / self.token_amount(token_delta),
            amount_out: out,
            average_price: (old_spot + new_spot) / 2.0,
        }
    }

    /// Fee-bearing trade against the pool in `direction`; `amount` in smallest input units.
    pub fn simulate(
        &self,
        reserves: &PoolReserves,
        amount: f64,
        direction: TradeDirection,
    ) -> TradeSimulation {
        if !reserves.has_liquidity() {
            return TradeSimulation::default();
        }

        let sol = reserves.virtual_sol_reserves as f64;
        let tokens = reserves.virtual_token_reserves as f64;
        match direction {
            TradeDirection::Buy => simulate_trade(amount, sol, tokens, self.config.fee_rate),
            TradeDirection::Sell => simulate_trade(amount, tokens, sol, self.config.fee_rate),
        }
    }

    pub fn bonding_curve_progress(&self, reserves: &PoolReserves) -> f64 {
        bonding_curve_progress(
            reserves.virtual_sol_reserves,
            self.config.graduation_threshold_sol,
        )
    }

    /// Full metrics refresh. `volume_24h_sol` comes from the caller's rolling window.
    pub fn compute_metrics(
        &self,
        reserves: &PoolReserves,
        sol_usd: Option<f64>,
        volume_24h_sol: Option<f64>,
    ) -> PoolMetrics {
        let spot = self.spot_price(reserves, sol_usd);
        let liquidity = self.liquidity(reserves, sol_usd);
        let usd = usable_usd(sol_usd);

        PoolMetrics {
            price_per_token_sol: spot.price_in_base,
            price_per_token_usd: spot.price_in_quote_currency,
            market_cap_usd: self.market_cap(spot.price_in_quote_currency),
            liquidity_sol: liquidity.sol,
            liquidity_usd: liquidity.usd,
            volume_24h: volume_24h_sol.zip(usd).map(|(v, p)| v * p),
            price_change_24h: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use proptest::prelude::*;

    fn reserves(sol: u64, tokens: u64) -> PoolReserves {
        PoolReserves {
            virtual_sol_reserves: sol,
            virtual_token_reserves: tokens,
            ..PoolReserves::new(Address([1; 32]), Address([2; 32]))
        }
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1e-12)
    }

    #[test]
    fn spot_price_scenario() {
        let engine = PriceEngine::default();
        let r = reserves(10_000_000_000, 500_000_000_000);

        let metrics = engine.compute_metrics(&r, Some(150.0), None);
        assert!(close(metrics.price_per_token_sol, 0.00002));
        assert!(close(metrics.price_per_token_usd, 0.003));
        assert!(close(metrics.liquidity_sol, 20.0));
        assert!(close(metrics.liquidity_usd, 3_000.0));
        // fixed 1B supply
        assert!(close(metrics.market_cap_usd, 3_000_000.0));
    }

    #[test]
    fn market_cap_follows_supply_model() {
        let fixed = SupplyModel::FixedTotal {
            total_supply: 1_000_000_000.0,
        };
        let circulating = SupplyModel::CirculatingRatio {
            total_supply: 1_000_000_000.0,
            ratio: 0.10,
        };

        assert!(close(fixed.market_cap(0.003), 3_000_000.0));
        assert!(close(circulating.market_cap(0.003), 300_000.0));
        assert_eq!(circulating.market_cap(f64::NAN), 0.0);
    }

    #[test]
    fn missing_usd_price_zeroes_usd_fields() {
        let engine = PriceEngine::default();
        let r = reserves(10_000_000_000, 500_000_000_000);

        for usd in [None, Some(0.0), Some(f64::NAN), Some(-3.0)] {
            let m = engine.compute_metrics(&r, usd, Some(12.0));
            assert!(close(m.price_per_token_sol, 0.00002));
            assert_eq!(m.price_per_token_usd, 0.0);
            assert_eq!(m.market_cap_usd, 0.0);
            assert_eq!(m.liquidity_usd, 0.0);
            assert_eq!(m.volume_24h, None);
        }
    }

    #[test]
    fn zero_reserves_yield_zero_metrics() {
        let engine = PriceEngine::default();

        for r in [reserves(0, 0), reserves(10, 0), reserves(0, 10)] {
            let m = engine.compute_metrics(&r, Some(150.0), None);
            assert_eq!(m, PoolMetrics::default());
            assert_eq!(
                engine.price_impact(&r, 1_000, TradeDirection::Buy),
                PriceImpact::default()
            );
            assert_eq!(
                engine.simulate(&r, 1_000.0, TradeDirection::Sell),
                TradeSimulation::default()
            );
        }
    }

    #[test]
    fn bonding_curve_progress_scenario() {
        assert!(close(bonding_curve_progress(42_500_000_000, 85.0), 50.0));
        assert_eq!(bonding_curve_progress(500_000_000_000, 85.0), 100.0);
        assert_eq!(bonding_curve_progress(1, 0.0), 0.0);
    }

    #[test]
    fn price_impact_buy_and_sell() {
        let engine = PriceEngine::default();
        let r = reserves(100_000_000_000, 5_000_000_000_000);

        // 1 SOL into 100 SOL of reserves
        let buy = engine.price_impact(&r, 1_000_000_000, TradeDirection::Buy);
        let expected_out = 5_000_000_000_000.0 - (100e9 * 5e12) / 101e9;
        assert!(close(buy.amount_out, expected_out));
        // spot moves by (101/100)^2 - 1
        assert!(close(buy.price_impact, 1.01f64.powi(2) - 1.0));
        assert!(buy.effective_price > engine.spot_price(&r, None).price_in_base);

        // 50,000 tokens into 5,000,000: lamports out, fee-free
        let sell = engine.price_impact(&r, 50_000_000_000, TradeDirection::Sell);
        let expected_lamports = 100e9 - (100e9 * 5e12) / 5.05e12;
        assert!(close(sell.amount_out, expected_lamports));
        assert!(sell.effective_price < engine.spot_price(&r, None).price_in_base);
        assert!(sell.price_impact > 0.0);
    }

    #[test]
    fn simulate_trade_deducts_fee_before_curve() {
        let sim = simulate_trade(1_000.0, 100_000.0, 100_000.0, 0.01);
        assert!(close(sim.effective_fee, 10.0));
        assert!(close(sim.output_amount, 100_000.0 * 990.0 / 100_990.0));
        assert!(sim.slippage > sim.price_impact / 2.0);
        assert!(sim.execution_price > 1.0);

        assert_eq!(simulate_trade(0.0, 1.0, 1.0, 0.0), TradeSimulation::default());
        assert_eq!(simulate_trade(f64::NAN, 1.0, 1.0, 0.0), TradeSimulation::default());
    }

    proptest! {
        #[test]
        fn spot_price_is_scale_invariant(
            sol in 1u64..1_000_000_000_000,
            tokens in 1u64..1_000_000_000_000,
            c in 1u64..1_000,
        ) {
            let engine = PriceEngine::default();
            let a = engine.spot_price(&reserves(sol, tokens), Some(150.0));
            let b = engine.spot_price(&reserves(sol * c, tokens * c), Some(150.0));

            prop_assert!(close(a.price_in_base, b.price_in_base));
            prop_assert!(close(a.price_in_quote_currency, b.price_in_quote_currency));
        }

        #[test]
        fn simulate_trade_conserves_product(
            input in 1.0f64..1e12,
            input_reserve in 1e9f64..1e15,
            output_reserve in 1e9f64..1e15,
            fee_rate in 0.0f64..0.1,
        ) {
            let sim = simulate_trade(input, input_reserve, output_reserve, fee_rate);
            let input_after_fee = input * (1.0 - fee_rate);

            let k = input_reserve * output_reserve;
            let after = (input_reserve + input_after_fee) * (output_reserve - sim.output_amount);
            prop_assert!((after - k).abs() <= k * 1e-6);
            prop_assert!(sim.output_amount < output_reserve);
        }
    }
}
