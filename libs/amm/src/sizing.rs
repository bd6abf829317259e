//! Optimal trade sizing for arbitrage cycles.
//!
//! Finds the input that maximizes profit after gas, bounded by a maximum
//! fraction of pool depth and a slippage ceiling. CPMM-to-CPMM pairs use the
//! closed-form optimum; any other pool combination is sized by bounded
//! binary search over a caller-supplied quote function.

use anyhow::Result;
use ethers::types::{I256, U256};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::constant_product::{CpmmMath, CpmmReserves};

/// Sizing bounds and cost inputs.
#[derive(Debug, Clone)]
pub struct SizingConfig {
    /// Maximum position as a fraction of pool depth (0.1 = 10%).
    pub max_position_pct: Decimal,
    /// Reject sizes whose cumulative slippage exceeds this many bps.
    pub slippage_ceiling_bps: u32,
    /// Gas cost charged against the candidate, in wei of the input token.
    pub gas_cost_wei: U256,
    /// Discard candidates below this profit after gas, in wei.
    pub min_profit_wei: U256,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            max_position_pct: dec!(0.1),
            slippage_ceiling_bps: 50,
            gas_cost_wei: U256::zero(),
            min_profit_wei: U256::zero(),
        }
    }
}

/// A sized trade candidate.
#[derive(Debug, Clone)]
pub struct SizedTrade {
    pub amount_in: U256,
    pub expected_out: U256,
    pub profit_after_gas: I256,
    pub slippage_bps: u32,
    pub is_profitable: bool,
}

impl SizedTrade {
    fn no_opportunity() -> Self {
        Self {
            amount_in: U256::zero(),
            expected_out: U256::zero(),
            profit_after_gas: I256::zero(),
            slippage_bps: 0,
            is_profitable: false,
        }
    }
}

/// Sizes arbitrage trades against configured bounds.
pub struct OptimalSizer {
    config: SizingConfig,
}

impl OptimalSizer {
    pub fn new(config: SizingConfig) -> Self {
        Self { config }
    }

    /// Size a two-pool CPMM arbitrage: buy from `pool_a`, sell to `pool_b`.
    pub fn size_cpmm_pair(
        &self,
        pool_a: &CpmmReserves,
        pool_b: &CpmmReserves,
    ) -> Result<SizedTrade> {
        let theoretical = CpmmMath::optimal_arbitrage_input(pool_a, pool_b)?;
        if theoretical.is_zero() {
            return Ok(SizedTrade::no_opportunity());
        }

        let cap_a = apply_pct(pool_a.reserve_in, self.config.max_position_pct);
        let cap_b = apply_pct(pool_b.reserve_out, self.config.max_position_pct);
        let amount_in = theoretical.min(cap_a).min(cap_b);
        if amount_in.is_zero() {
            return Ok(SizedTrade::no_opportunity());
        }

        let mid = CpmmMath::quote_out(
            amount_in,
            pool_a.reserve_in,
            pool_a.reserve_out,
            pool_a.fee_bps,
        )?;
        let out = CpmmMath::quote_out(mid, pool_b.reserve_in, pool_b.reserve_out, pool_b.fee_bps)?;

        let slip_a =
            CpmmMath::slippage_bps(amount_in, pool_a.reserve_in, pool_a.reserve_out, pool_a.fee_bps)?;
        let slip_b =
            CpmmMath::slippage_bps(mid, pool_b.reserve_in, pool_b.reserve_out, pool_b.fee_bps)?;
        let slippage_bps = decimal_to_bps(slip_a + slip_b);

        if slippage_bps > self.config.slippage_ceiling_bps {
            return Ok(SizedTrade::no_opportunity());
        }

        Ok(self.finish(amount_in, out, slippage_bps))
    }

    /// Size a cycle through an arbitrary quote function by bounded binary
    /// search on the profit curve (unimodal for AMM compositions).
    pub fn size_by_search<F>(&self, depth_bound: U256, quote: F) -> Result<SizedTrade>
    where
        F: Fn(U256) -> Result<U256>,
    {
        let max_in = apply_pct(depth_bound, self.config.max_position_pct);
        if max_in.is_zero() {
            return Ok(SizedTrade::no_opportunity());
        }

        let mut low = max_in / U256::from(1000u64);
        if low.is_zero() {
            low = U256::one();
        }
        let mut high = max_in;
        let mut best = SizedTrade::no_opportunity();

        for _ in 0..24 {
            if high <= low {
                break;
            }
            let step = (high - low) / U256::from(3u8);
            let m1 = low + step;
            let m2 = high - step;

            let p1 = self.profit_at(m1, &quote)?;
            let p2 = self.profit_at(m2, &quote)?;

            if p1 >= p2 {
                high = m2;
            } else {
                low = m1;
            }

            let (cand, profit) = if p1 >= p2 { (m1, p1) } else { (m2, p2) };
            if profit > best.profit_after_gas || !best.is_profitable {
                let out = quote(cand)?;
                best = self.finish(cand, out, 0);
            }
        }

        Ok(best)
    }

    fn profit_at<F>(&self, amount_in: U256, quote: &F) -> Result<I256>
    where
        F: Fn(U256) -> Result<U256>,
    {
        let out = match quote(amount_in) {
            Ok(out) => out,
            Err(_) => return Ok(I256::MIN), // quote failure prices the size out
        };
        let gross = I256::try_from(out).unwrap_or(I256::MAX)
            - I256::try_from(amount_in).unwrap_or(I256::MAX);
        Ok(gross - I256::try_from(self.config.gas_cost_wei).unwrap_or(I256::MAX))
    }

    fn finish(&self, amount_in: U256, out: U256, slippage_bps: u32) -> SizedTrade {
        let gross = I256::try_from(out).unwrap_or(I256::MAX)
            - I256::try_from(amount_in).unwrap_or(I256::MAX);
        let profit_after_gas =
            gross - I256::try_from(self.config.gas_cost_wei).unwrap_or(I256::MAX);
        let min_profit = I256::try_from(self.config.min_profit_wei).unwrap_or(I256::MAX);

        SizedTrade {
            amount_in,
            expected_out: out,
            profit_after_gas,
            slippage_bps,
            is_profitable: profit_after_gas > I256::zero() && profit_after_gas >= min_profit,
        }
    }
}

fn apply_pct(value: U256, pct: Decimal) -> U256 {
    // Scale the fraction to parts-per-million to stay in integer math.
    let ppm = (pct * dec!(1000000)).trunc();
    let ppm = rust_decimal::prelude::ToPrimitive::to_u64(&ppm).unwrap_or(0);
    value.saturating_mul(U256::from(ppm)) / U256::from(1_000_000u64)
}

fn decimal_to_bps(value: Decimal) -> u32 {
    rust_decimal::prelude::ToPrimitive::to_u32(&value.round()).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn divergent_pools() -> (CpmmReserves, CpmmReserves) {
        (
            CpmmReserves {
                reserve_in: U256::from(10_000u64) * U256::exp10(18),
                reserve_out: U256::from(20_000u64) * U256::exp10(18),
                fee_bps: 30,
            },
            CpmmReserves {
                reserve_in: U256::from(19_000u64) * U256::exp10(18),
                reserve_out: U256::from(10_500u64) * U256::exp10(18),
                fee_bps: 30,
            },
        )
    }

    #[test]
    fn sizes_profitable_cpmm_pair() {
        let (a, b) = divergent_pools();
        let sizer = OptimalSizer::new(SizingConfig {
            slippage_ceiling_bps: 10_000,
            ..SizingConfig::default()
        });
        let trade = sizer.size_cpmm_pair(&a, &b).unwrap();

        assert!(trade.is_profitable);
        assert!(trade.amount_in > U256::zero());
        assert!(trade.expected_out > trade.amount_in);
    }

    #[test]
    fn balanced_pools_size_to_zero() {
        let pool = CpmmReserves {
            reserve_in: U256::exp10(22),
            reserve_out: U256::exp10(22),
            fee_bps: 30,
        };
        let sizer = OptimalSizer::new(SizingConfig::default());
        let trade = sizer.size_cpmm_pair(&pool, &pool).unwrap();
        assert!(!trade.is_profitable);
        assert!(trade.amount_in.is_zero());
    }

    #[test]
    fn slippage_ceiling_prices_out_thin_pools() {
        let thin_a = CpmmReserves {
            reserve_in: U256::exp10(18),
            reserve_out: U256::exp10(18) * 2,
            fee_bps: 30,
        };
        let thin_b = CpmmReserves {
            reserve_in: U256::exp10(18) * 2,
            reserve_out: U256::exp10(18),
            fee_bps: 30,
        };
        let sizer = OptimalSizer::new(SizingConfig {
            slippage_ceiling_bps: 1,
            ..SizingConfig::default()
        });
        let trade = sizer.size_cpmm_pair(&thin_a, &thin_b).unwrap();
        assert!(!trade.is_profitable);
    }

    #[test]
    fn gas_cost_counts_against_profit() {
        let (a, b) = divergent_pools();
        let sizer = OptimalSizer::new(SizingConfig {
            slippage_ceiling_bps: 10_000,
            gas_cost_wei: U256::exp10(24), // absurd gas swallows the edge
            ..SizingConfig::default()
        });
        let trade = sizer.size_cpmm_pair(&a, &b).unwrap();
        assert!(!trade.is_profitable);
        assert!(trade.profit_after_gas < I256::zero());
    }

    #[test]
    fn search_finds_profit_on_synthetic_curve() {
        // Synthetic cycle: profit peaks somewhere inside (0, depth/10].
        let depth = U256::exp10(21);
        let sizer = OptimalSizer::new(SizingConfig::default());
        let trade = sizer
            .size_by_search(depth, |amount| {
                let a = CpmmReserves {
                    reserve_in: U256::from(10_000u64) * U256::exp10(18),
                    reserve_out: U256::from(20_200u64) * U256::exp10(18),
                    fee_bps: 30,
                };
                let b = CpmmReserves {
                    reserve_in: U256::from(20_000u64) * U256::exp10(18),
                    reserve_out: U256::from(10_000u64) * U256::exp10(18),
                    fee_bps: 30,
                };
                let mid = CpmmMath::quote_out(amount, a.reserve_in, a.reserve_out, a.fee_bps)?;
                CpmmMath::quote_out(mid, b.reserve_in, b.reserve_out, b.fee_bps)
            })
            .unwrap();

        assert!(trade.is_profitable, "search should find the profitable size");
        assert!(trade.expected_out > trade.amount_in);
    }
}
