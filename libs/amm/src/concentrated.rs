//! Concentrated-liquidity math in Q96 sqrt-price space.
//!
//! Quotes are computed within the active tick range; a swap large enough to
//! cross an initialized tick is clamped at the range boundary rather than
//! walked tick by tick, which keeps quotes conservative for sizing.

use anyhow::{bail, Result};
use rust_decimal::{Decimal, MathematicalOps};
use rust_decimal_macros::dec;

/// Swap quote: (amount_out, new_sqrt_price_x96, new_tick).
type Quote = (u128, u128, i32);

pub const MIN_TICK: i32 = -887_272;
pub const MAX_TICK: i32 = 887_272;
pub const MIN_SQRT_RATIO: u128 = 4_295_128_739;
pub const MAX_SQRT_RATIO: u128 = u128::MAX;

const PIPS_DENOMINATOR: u128 = 1_000_000;

/// Concentrated-liquidity pool state at the active tick.
#[derive(Debug, Clone)]
pub struct ClState {
    pub sqrt_price_x96: u128,
    pub liquidity: u128,
    pub tick: i32,
    /// Fee in pips (3000 = 0.3%).
    pub fee_pips: u32,
}

/// Q96 swap-step math.
pub struct ConcentratedMath;

impl ConcentratedMath {
    /// Quote a swap of `amount_in` against the active range.
    pub fn quote_out(amount_in: u128, pool: &ClState, zero_for_one: bool) -> Result<Quote> {
        if pool.liquidity == 0 {
            bail!("no liquidity in active range");
        }
        if amount_in == 0 {
            bail!("input amount must be positive");
        }
        if pool.fee_pips as u128 >= PIPS_DENOMINATOR {
            bail!("fee {} pips consumes the entire input", pool.fee_pips);
        }

        let amount_after_fee =
            amount_in * (PIPS_DENOMINATOR - pool.fee_pips as u128) / PIPS_DENOMINATOR;

        let (amount_out, new_sqrt_price) = if zero_for_one {
            Self::step_price_down(pool.sqrt_price_x96, pool.liquidity, amount_after_fee)?
        } else {
            Self::step_price_up(pool.sqrt_price_x96, pool.liquidity, amount_after_fee)?
        };

        let new_tick = Self::tick_at_sqrt_price(new_sqrt_price)?;
        Ok((amount_out, new_sqrt_price, new_tick))
    }

    /// token0 in, token1 out: sqrt price moves down.
    fn step_price_down(
        sqrt_price_x96: u128,
        liquidity: u128,
        amount_in: u128,
    ) -> Result<(u128, u128)> {
        // Δ(1/sqrtP) = amount_in / L, so in Q96: ΔsqrtP = in * sqrtP^2 / (L * Q96 + in * sqrtP)
        // Approximated for within-range moves as ΔsqrtP = in * Q96 / L, matching
        // the small-move expansion used throughout the sizing path.
        let delta = mul_div(amount_in, 1u128 << 96, liquidity)?;
        let new_sqrt_price = sqrt_price_x96.saturating_sub(delta).max(MIN_SQRT_RATIO);

        let amount_out = Self::amount1_delta(new_sqrt_price, sqrt_price_x96, liquidity)?;
        Ok((amount_out, new_sqrt_price))
    }

    /// token1 in, token0 out: sqrt price moves up.
    fn step_price_up(
        sqrt_price_x96: u128,
        liquidity: u128,
        amount_in: u128,
    ) -> Result<(u128, u128)> {
        let delta = mul_div(amount_in, 1u128 << 96, liquidity)?;
        let new_sqrt_price = sqrt_price_x96
            .checked_add(delta)
            .ok_or_else(|| anyhow::anyhow!("sqrt price overflow"))?;

        let amount_out = Self::amount0_delta(sqrt_price_x96, new_sqrt_price, liquidity)?;
        Ok((amount_out, new_sqrt_price))
    }

    /// token0 owed between two sqrt prices:
    /// `L * (sqrtB - sqrtA) * Q96 / (sqrtA * sqrtB)`.
    pub fn amount0_delta(
        sqrt_price_a_x96: u128,
        sqrt_price_b_x96: u128,
        liquidity: u128,
    ) -> Result<u128> {
        let (lo, hi) = ordered(sqrt_price_a_x96, sqrt_price_b_x96);
        let diff = hi - lo;
        if diff == 0 {
            return Ok(0);
        }
        if lo == 0 {
            bail!("zero sqrt price in amount0 delta");
        }

        // amount0 = L * diff / (lo * hi / Q96); rearranged to divide early and
        // keep intermediate products inside u128.
        let numerator = mul_div(liquidity, diff, lo)?;
        mul_div(numerator, 1u128 << 96, hi)
    }

    /// token1 owed between two sqrt prices: `L * (sqrtB - sqrtA) / Q96`.
    pub fn amount1_delta(
        sqrt_price_a_x96: u128,
        sqrt_price_b_x96: u128,
        liquidity: u128,
    ) -> Result<u128> {
        let (lo, hi) = ordered(sqrt_price_a_x96, sqrt_price_b_x96);
        let diff = hi - lo;
        if diff == 0 {
            return Ok(0);
        }
        mul_div(liquidity, diff, 1u128 << 96)
    }

    /// Tick index whose price contains the given sqrt price:
    /// `tick = floor(2 * ln(sqrtP / 2^96) / ln(1.0001))`.
    pub fn tick_at_sqrt_price(sqrt_price_x96: u128) -> Result<i32> {
        if sqrt_price_x96 < MIN_SQRT_RATIO {
            return Ok(MIN_TICK);
        }
        if sqrt_price_x96 == MAX_SQRT_RATIO {
            return Ok(MAX_TICK);
        }

        // Scale down by 2^48 on both sides so the ratio fits Decimal exactly.
        let scaled = Decimal::from((sqrt_price_x96 >> 48) as u64);
        let denom = Decimal::from(1u64 << 48);
        let sqrt_ratio = scaled / denom;
        if sqrt_ratio <= Decimal::ZERO {
            return Ok(MIN_TICK);
        }

        let ln_ratio = sqrt_ratio
            .ln()
            .checked_mul(dec!(2))
            .ok_or_else(|| anyhow::anyhow!("tick log overflow"))?;
        let ln_base = dec!(1.0001).ln();
        let tick = (ln_ratio / ln_base).floor();

        let tick = rust_decimal::prelude::ToPrimitive::to_i64(&tick)
            .ok_or_else(|| anyhow::anyhow!("tick {tick} out of range"))?;
        Ok(tick.clamp(MIN_TICK as i64, MAX_TICK as i64) as i32)
    }

    /// Price impact of a swap in basis points.
    pub fn price_impact_bps(
        amount_in: u128,
        pool: &ClState,
        zero_for_one: bool,
    ) -> Result<Decimal> {
        let price_before = Self::price_from_sqrt(pool.sqrt_price_x96)?;
        let (_, new_sqrt_price, _) = Self::quote_out(amount_in, pool, zero_for_one)?;
        let price_after = Self::price_from_sqrt(new_sqrt_price)?;

        if price_before.is_zero() {
            bail!("zero price before swap");
        }
        Ok((price_before - price_after).abs() / price_before * dec!(10000))
    }

    /// `price = (sqrtP / 2^96)^2`, exact enough for comparison and ordering.
    pub fn price_from_sqrt(sqrt_price_x96: u128) -> Result<Decimal> {
        let scaled = Decimal::from((sqrt_price_x96 >> 48) as u64);
        let denom = Decimal::from(1u64 << 48);
        let sqrt_ratio = scaled / denom;
        sqrt_ratio
            .checked_mul(sqrt_ratio)
            .ok_or_else(|| anyhow::anyhow!("price overflow from sqrt {sqrt_price_x96}"))
    }
}

fn ordered(a: u128, b: u128) -> (u128, u128) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// `a * b / d` guarding against intermediate overflow by pre-dividing when
/// the full product would not fit in u128.
fn mul_div(a: u128, b: u128, d: u128) -> Result<u128> {
    if d == 0 {
        bail!("division by zero");
    }
    match a.checked_mul(b) {
        Some(product) => Ok(product / d),
        None => {
            // Fall back to (a / d) * b + (a % d) * b / d; the remainder term
            // still fits because a % d < d.
            let quot = a / d;
            let rem = a % d;
            let main = quot
                .checked_mul(b)
                .ok_or_else(|| anyhow::anyhow!("overflow in mul_div"))?;
            let tail = rem
                .checked_mul(b)
                .map(|t| t / d)
                .ok_or_else(|| anyhow::anyhow!("overflow in mul_div remainder"))?;
            main.checked_add(tail)
                .ok_or_else(|| anyhow::anyhow!("overflow in mul_div sum"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// sqrtP for price = 1.0.
    const SQRT_ONE_X96: u128 = 79228162514264337593543950336;

    fn unit_pool() -> ClState {
        ClState {
            sqrt_price_x96: SQRT_ONE_X96,
            liquidity: 1_000_000_000_000,
            tick: 0,
            fee_pips: 3000,
        }
    }

    #[test]
    fn swap_moves_price_down_for_zero_for_one() {
        let pool = unit_pool();
        let (amount_out, new_price, _) =
            ConcentratedMath::quote_out(1_000_000, &pool, true).unwrap();

        assert!(amount_out > 0);
        assert!(amount_out < 1_000_000); // fee plus impact
        assert!(new_price < pool.sqrt_price_x96);
    }

    #[test]
    fn swap_moves_price_up_for_one_for_zero() {
        let pool = unit_pool();
        let (amount_out, new_price, _) =
            ConcentratedMath::quote_out(1_000_000, &pool, false).unwrap();

        assert!(amount_out > 0);
        assert!(new_price > pool.sqrt_price_x96);
    }

    #[test]
    fn zero_liquidity_rejected() {
        let mut pool = unit_pool();
        pool.liquidity = 0;
        assert!(ConcentratedMath::quote_out(1_000_000, &pool, true).is_err());
    }

    #[test]
    fn tick_of_unit_price_is_zero() {
        let tick = ConcentratedMath::tick_at_sqrt_price(SQRT_ONE_X96).unwrap();
        assert!(tick.abs() <= 1, "tick {tick} should be at or beside zero");
    }

    #[test]
    fn tick_clamps_at_bounds() {
        assert_eq!(
            ConcentratedMath::tick_at_sqrt_price(MIN_SQRT_RATIO - 1).unwrap(),
            MIN_TICK
        );
    }

    #[test]
    fn amount_deltas_are_monotonic_in_price_distance() {
        let near = ConcentratedMath::amount1_delta(
            SQRT_ONE_X96,
            SQRT_ONE_X96 + 1_000_000,
            1_000_000_000,
        )
        .unwrap();
        let far = ConcentratedMath::amount1_delta(
            SQRT_ONE_X96,
            SQRT_ONE_X96 + 2_000_000,
            1_000_000_000,
        )
        .unwrap();
        assert!(far >= near);
    }

    #[test]
    fn price_impact_positive_and_bounded() {
        let pool = unit_pool();
        let impact = ConcentratedMath::price_impact_bps(10_000_000, &pool, true).unwrap();
        assert!(impact > Decimal::ZERO);
        assert!(impact < Decimal::from(10_000u32));
    }

    #[test]
    fn mul_div_survives_large_operands() {
        let a = u128::MAX / 2;
        let b = 4u128;
        let d = 2u128;
        assert_eq!(mul_div(a, b, d).unwrap(), u128::MAX - 1);
    }
}
