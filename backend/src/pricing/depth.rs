//! Liquidity Depth
//!
//! Answers "how much can trade before the price moves by X%?" for a
//! constant-product pool, plus a few derived execution-quality figures.
//!
//! ## Depth levels
//!
//! ```text
//! p  = sol / tokens           (spot, SOL per token)
//! p' = p * (1 ± impact)       (+ for buys, - for sells)
//! tokens' = sqrt(k / p'),  sol' = sqrt(k * p')
//! buy depth  = sol' - sol     (SOL required to push the price up)
//! sell depth = sol - sol'     (SOL received while pushing it down)
//! ```
//!
//! USD figures use the externally supplied SOL price; without one they are zero.

use serde::{Deserialize, Serialize};

use super::engine::{PriceEngine, TradeDirection, simulate_trade};
use crate::pool::model::PoolReserves;

/// Impact thresholds reported by [`DepthAnalyzer::analyze`], ascending.
pub const DEPTH_IMPACT_LEVELS: [f64; 5] = [0.01, 0.02, 0.05, 0.10, 0.20];

/// Small / medium / large trade sizes for the slippage profile.
pub const SLIPPAGE_PROFILE_USD: [f64; 3] = [100.0, 1_000.0, 10_000.0];

/// SOL size of the probe trades used for the synthetic spread.
pub const SPREAD_PROBE_SOL: f64 = 0.001;

const MAX_SEARCH_ITERATIONS: usize = 64;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DepthLevel {
    pub price_impact_fraction: f64,
    pub buy_depth_sol: f64,
    pub sell_depth_sol: f64,
    pub buy_depth_usd: f64,
    pub sell_depth_usd: f64,
    /// Whole tokens bought while reaching the level.
    pub buy_token_amount: f64,
    /// Whole tokens sold while reaching the level.
    pub sell_token_amount: f64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SlippagePoint {
    pub trade_size_usd: f64,
    pub input_sol: f64,
    pub tokens_out: f64,
    pub price_impact: f64,
    pub slippage: f64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SpreadEstimate {
    /// SOL per token paid by a minimal buy.
    pub ask: f64,
    /// SOL per token received by a minimal sell.
    pub bid: f64,
    pub mid: f64,
    pub spread_bps: f64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MaxTradeSize {
    pub input_sol: f64,
    pub input_usd: f64,
    pub tokens_out: f64,
    pub slippage: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DepthAnalysis {
    pub spot_price_sol: f64,
    pub sol_price_usd: f64,
    pub liquidity_usd: f64,
    pub levels: Vec<DepthLevel>,
    pub slippage_profile: Vec<SlippagePoint>,
    pub spread: Option<SpreadEstimate>,
}

impl DepthAnalysis {
    /// Analysis of a pool without liquidity.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

/// Depth and trade-size calculator on top of [`PriceEngine`].
#[derive(Clone, Copy, Debug, Default)]
pub struct DepthAnalyzer {
    engine: PriceEngine,
}

impl DepthAnalyzer {
    pub fn new(engine: PriceEngine) -> Self {
        Self { engine }
    }

    pub fn analyze(&self, reserves: &PoolReserves, sol_usd: Option<f64>) -> DepthAnalysis {
        if !reserves.has_liquidity() {
            return DepthAnalysis::empty();
        }

        let usd = sol_usd.filter(|p| p.is_finite() && *p > 0.0).unwrap_or(0.0);
        let sol = self.engine.sol_amount(reserves.virtual_sol_reserves as f64);
        let tokens = self
            .engine
            .token_amount(reserves.virtual_token_reserves as f64);

        let levels = DEPTH_IMPACT_LEVELS
            .iter()
            .map(|&impact| depth_level(sol, tokens, impact, usd))
            .collect();

        DepthAnalysis {
            spot_price_sol: sol / tokens,
            sol_price_usd: usd,
            liquidity_usd: sol * 2.0 * usd,
            levels,
            slippage_profile: self.slippage_profile(reserves, usd),
            spread: self.spread(reserves),
        }
    }

    /// Buy-side slippage at fixed USD sizes. Empty without a SOL price.
    pub fn slippage_profile(&self, reserves: &PoolReserves, sol_usd: f64) -> Vec<SlippagePoint> {
        if sol_usd <= 0.0 || !reserves.has_liquidity() {
            return Vec::new();
        }

        SLIPPAGE_PROFILE_USD
            .iter()
            .map(|&size_usd| {
                let input_sol = size_usd / sol_usd;
                let sim = self.engine.simulate(
                    reserves,
                    self.engine.lamports(input_sol),
                    TradeDirection::Buy,
                );
                SlippagePoint {
                    trade_size_usd: size_usd,
                    input_sol,
                    tokens_out: self.engine.token_amount(sim.output_amount),
                    price_impact: sim.price_impact,
                    slippage: sim.slippage,
                }
            })
            .collect()
    }

    /// Synthetic bid/ask from a minimal buy and an equally sized sell.
    pub fn spread(&self, reserves: &PoolReserves) -> Option<SpreadEstimate> {
        if !reserves.has_liquidity() {
            return None;
        }

        let probe_lamports = self.engine.lamports(SPREAD_PROBE_SOL);
        let buy = self
            .engine
            .simulate(reserves, probe_lamports, TradeDirection::Buy);
        if buy.output_amount <= 0.0 {
            return None;
        }
        let ask = SPREAD_PROBE_SOL / self.engine.token_amount(buy.output_amount);

        // Sell the token equivalent of the probe at spot.
        let probe_tokens = reserves.virtual_token_reserves as f64 * probe_lamports
            / reserves.virtual_sol_reserves as f64;
        let sell = self
            .engine
            .simulate(reserves, probe_tokens, TradeDirection::Sell);
        if sell.output_amount <= 0.0 {
            return None;
        }
        let bid = self.engine.sol_amount(sell.output_amount) / self.engine.token_amount(probe_tokens);

        let mid = (ask + bid) / 2.0;
        Some(SpreadEstimate {
            ask,
            bid,
            mid,
            spread_bps: (ask - bid) / mid * 10_000.0,
        })
    }

    /// Largest SOL buy whose slippage stays within `max_slippage`, found by bisection.
    pub fn max_trade_size(
        &self,
        reserves: &PoolReserves,
        max_slippage: f64,
        sol_usd: Option<f64>,
    ) -> MaxTradeSize {
        if !reserves.has_liquidity() || !max_slippage.is_finite() || max_slippage <= 0.0 {
            return MaxTradeSize::default();
        }

        let slippage_at =
            |lamports: f64| self.engine.simulate(reserves, lamports, TradeDirection::Buy);

        // Slippage grows without bound in the trade size; widen until the bound is crossed.
        let mut lo = 0.0;
        let mut hi = reserves.virtual_sol_reserves as f64;
        while slippage_at(hi).slippage <= max_slippage && hi < f64::MAX / 4.0 {
            lo = hi;
            hi *= 2.0;
        }

        for _ in 0..MAX_SEARCH_ITERATIONS {
            let mid = (lo + hi) / 2.0;
            if slippage_at(mid).slippage <= max_slippage {
                lo = mid;
            } else {
                hi = mid;
            }
        }

        if lo <= 0.0 {
            return MaxTradeSize::default();
        }

        let sim = slippage_at(lo);
        let input_sol = self.engine.sol_amount(lo);
        MaxTradeSize {
            input_sol,
            input_usd: sol_usd
                .filter(|p| p.is_finite() && *p > 0.0)
                .map(|p| input_sol * p)
                .unwrap_or(0.0),
            tokens_out: self.engine.token_amount(sim.output_amount),
            slippage: sim.slippage,
        }
    }
}

fn depth_level(sol: f64, tokens: f64, impact: f64, sol_usd: f64) -> DepthLevel {
    let k = sol * tokens;
    let price = sol / tokens;

    let buy_price = price * (1.0 + impact);
    let buy_tokens = (k / buy_price).sqrt();
    let buy_sol = (k * buy_price).sqrt();

    let sell_price = price * (1.0 - impact);
    let (sell_tokens, sell_sol) = if sell_price > 0.0 {
        ((k / sell_price).sqrt(), (k * sell_price).sqrt())
    } else {
        (f64::INFINITY, 0.0)
    };

    let buy_depth_sol = (buy_sol - sol).max(0.0);
    let sell_depth_sol = (sol - sell_sol).max(0.0);

    DepthLevel {
        price_impact_fraction: impact,
        buy_depth_sol,
        sell_depth_sol,
        buy_depth_usd: buy_depth_sol * sol_usd,
        sell_depth_usd: sell_depth_sol * sol_usd,
        buy_token_amount: (tokens - buy_tokens).max(0.0),
        sell_token_amount: (sell_tokens - tokens).max(0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use crate::pricing::engine::PricingConfig;
    use proptest::prelude::*;

    const SOL: u64 = 1_000_000_000;
    const TOKEN: u64 = 1_000_000;

    fn reserves(sol: u64, tokens: u64) -> PoolReserves {
        PoolReserves {
            virtual_sol_reserves: sol,
            virtual_token_reserves: tokens,
            ..PoolReserves::new(Address([3; 32]), Address([4; 32]))
        }
    }

    fn analyzer() -> DepthAnalyzer {
        DepthAnalyzer::new(PriceEngine::new(PricingConfig::default()))
    }

    #[test]
    fn one_and_two_percent_levels_scenario() {
        let r = reserves(100 * SOL, 5_000_000 * TOKEN);
        let analysis = analyzer().analyze(&r, Some(150.0));

        let one = analysis.levels[0];
        let two = analysis.levels[1];
        assert_eq!(one.price_impact_fraction, 0.01);
        assert!(one.buy_depth_usd > 0.0);
        assert!(one.sell_depth_usd > 0.0);
        assert!(two.buy_depth_usd > one.buy_depth_usd);
        assert!(two.sell_depth_usd > one.sell_depth_usd);

        // sqrt(1.01) - 1 of 100 SOL
        let expected_buy_sol = 100.0 * (1.01f64.sqrt() - 1.0);
        assert!((one.buy_depth_sol - expected_buy_sol).abs() < 1e-9);
        assert!((one.buy_depth_usd - expected_buy_sol * 150.0).abs() < 1e-6);
    }

    #[test]
    fn zero_reserves_give_empty_analysis() {
        let a = analyzer();
        let analysis = a.analyze(&reserves(0, 5_000_000 * TOKEN), Some(150.0));

        assert!(analysis.is_empty());
        assert!(analysis.slippage_profile.is_empty());
        assert!(analysis.spread.is_none());
        assert_eq!(
            a.max_trade_size(&reserves(0, 0), 0.05, Some(150.0)),
            MaxTradeSize::default()
        );
    }

    #[test]
    fn missing_sol_price_keeps_sol_depth_only() {
        let analysis = analyzer().analyze(&reserves(100 * SOL, 5_000_000 * TOKEN), None);

        assert_eq!(analysis.levels.len(), DEPTH_IMPACT_LEVELS.len());
        assert!(analysis.levels.iter().all(|l| l.buy_depth_usd == 0.0));
        assert!(analysis.levels.iter().all(|l| l.buy_depth_sol > 0.0));
        assert!(analysis.slippage_profile.is_empty());
        assert_eq!(analysis.liquidity_usd, 0.0);
    }

    #[test]
    fn slippage_profile_grows_with_size() {
        let r = reserves(100 * SOL, 5_000_000 * TOKEN);
        let profile = analyzer().slippage_profile(&r, 150.0);

        assert_eq!(profile.len(), 3);
        assert!(profile[0].slippage < profile[1].slippage);
        assert!(profile[1].slippage < profile[2].slippage);
        assert!((profile[2].input_sol - 10_000.0 / 150.0).abs() < 1e-9);
    }

    #[test]
    fn spread_reflects_fees_on_both_sides() {
        let r = reserves(100 * SOL, 5_000_000 * TOKEN);
        let spread = analyzer().spread(&r).unwrap();

        assert!(spread.ask > spread.bid);
        // two 25 bps fees plus a negligible probe impact
        assert!(spread.spread_bps > 49.0 && spread.spread_bps < 52.0);
    }

    #[test]
    fn max_trade_size_respects_bound() {
        let a = analyzer();
        let r = reserves(100 * SOL, 5_000_000 * TOKEN);

        let best = a.max_trade_size(&r, 0.05, Some(150.0));
        assert!(best.input_sol > 0.0);
        assert!(best.slippage <= 0.05);
        assert!(best.slippage > 0.049);
        assert!((best.input_usd - best.input_sol * 150.0).abs() < 1e-9);

        let tighter = a.max_trade_size(&r, 0.01, Some(150.0));
        assert!(tighter.input_sol < best.input_sol);

        // the fee alone exceeds the bound
        assert_eq!(a.max_trade_size(&r, 0.001, None).input_sol, 0.0);
    }

    proptest! {
        #[test]
        fn depth_is_monotonic_across_levels(
            sol in 1_000u64..1_000_000_000_000_000,
            tokens in 1_000u64..1_000_000_000_000_000,
            usd in 0.01f64..10_000.0,
        ) {
            let analysis = analyzer().analyze(&reserves(sol, tokens), Some(usd));

            for pair in analysis.levels.windows(2) {
                prop_assert!(pair[1].buy_depth_usd >= pair[0].buy_depth_usd);
                prop_assert!(pair[1].sell_depth_usd >= pair[0].sell_depth_usd);
            }
        }
    }
}
