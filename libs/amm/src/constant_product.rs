//! Constant-product (x*y=k) math with integer-wei precision.
//!
//! Mirrors the on-chain router formulas exactly, including the rounding
//! direction: outputs round down, required inputs round up.

use anyhow::{bail, Result};
use ethers::types::{U256, U512};
use rust_decimal::Decimal;

use arb_types::BPS_DENOMINATOR;

/// Reserves and fee for one side of a CPMM trade.
#[derive(Debug, Clone)]
pub struct CpmmReserves {
    pub reserve_in: U256,
    pub reserve_out: U256,
    pub fee_bps: u32,
}

/// Constant-product pricing functions.
pub struct CpmmMath;

impl CpmmMath {
    /// Exact swap output: `in * (10000 - fee) * r_out / (r_in * 10000 + in * (10000 - fee))`.
    pub fn quote_out(
        amount_in: U256,
        reserve_in: U256,
        reserve_out: U256,
        fee_bps: u32,
    ) -> Result<U256> {
        if amount_in.is_zero() {
            bail!("input amount must be positive");
        }
        if reserve_in.is_zero() || reserve_out.is_zero() {
            bail!("reserves must be positive");
        }
        if fee_bps >= BPS_DENOMINATOR {
            bail!("fee {fee_bps} bps consumes the entire input");
        }

        let fee_keep = U256::from(BPS_DENOMINATOR - fee_bps);
        let amount_with_fee = U512::from(amount_in) * U512::from(fee_keep);
        let numerator = amount_with_fee * U512::from(reserve_out);
        let denominator =
            U512::from(reserve_in) * U512::from(BPS_DENOMINATOR) + amount_with_fee;

        let out = numerator / denominator;
        Ok(u512_to_u256(out)?)
    }

    /// Required input for a desired output, rounded up.
    pub fn quote_in(
        amount_out: U256,
        reserve_in: U256,
        reserve_out: U256,
        fee_bps: u32,
    ) -> Result<U256> {
        if amount_out.is_zero() {
            bail!("output amount must be positive");
        }
        if amount_out >= reserve_out {
            bail!("insufficient liquidity: output exceeds reserves");
        }
        if fee_bps >= BPS_DENOMINATOR {
            bail!("fee {fee_bps} bps consumes the entire input");
        }

        let fee_keep = U256::from(BPS_DENOMINATOR - fee_bps);
        let numerator =
            U512::from(reserve_in) * U512::from(amount_out) * U512::from(BPS_DENOMINATOR);
        let denominator = U512::from(reserve_out - amount_out) * U512::from(fee_keep);

        // +1 rounds up so the quoted input is always sufficient.
        let input = numerator / denominator + U512::one();
        Ok(u512_to_u256(input)?)
    }

    /// Marginal price change caused by the trade's own size, in basis points.
    pub fn price_impact_bps(
        amount_in: U256,
        reserve_in: U256,
        reserve_out: U256,
    ) -> Result<Decimal> {
        if amount_in.is_zero() || reserve_in.is_zero() || reserve_out.is_zero() {
            bail!("invalid inputs for price impact calculation");
        }

        // Fee-free output isolates the impact of size alone.
        let out = Self::quote_out(amount_in, reserve_in, reserve_out, 0)?;

        let price_before = ratio(reserve_out, reserve_in)?;
        let price_after = ratio(reserve_out - out, reserve_in + amount_in)?;
        let impact = (price_before - price_after).abs() / price_before
            * Decimal::from(BPS_DENOMINATOR);
        Ok(impact)
    }

    /// Divergence between the spot rate and the executed rate, in basis points.
    pub fn slippage_bps(
        amount_in: U256,
        reserve_in: U256,
        reserve_out: U256,
        fee_bps: u32,
    ) -> Result<Decimal> {
        let actual_out = Self::quote_out(amount_in, reserve_in, reserve_out, fee_bps)?;

        let spot = ratio(reserve_out, reserve_in)?;
        let ideal_out = decimal_from_wei(amount_in)? * spot;
        if ideal_out <= Decimal::ZERO {
            bail!("zero ideal output in slippage calculation");
        }
        let slip = (ideal_out - decimal_from_wei(actual_out)?) / ideal_out
            * Decimal::from(BPS_DENOMINATOR);
        Ok(slip)
    }

    /// Closed-form profit-maximizing input for buying from pool A and selling
    /// to pool B.
    ///
    /// With fee-keep fractions `g = 10000 - fee_bps` and `D = 10000`, the
    /// composite output is `A*x / (B + C*x)` where
    /// `A = gA*gB*rAout*rBout`, `B = D^2*rAin*rBin`,
    /// `C = gA*(D*rBin + gB*rAout)`; maximizing `A*x/(B+C*x) - x` gives
    /// `x* = (sqrt(A*B) - B) / C`.
    pub fn optimal_arbitrage_input(pool_a: &CpmmReserves, pool_b: &CpmmReserves) -> Result<U256> {
        if pool_a.reserve_in.is_zero()
            || pool_a.reserve_out.is_zero()
            || pool_b.reserve_in.is_zero()
            || pool_b.reserve_out.is_zero()
        {
            return Ok(U256::zero());
        }

        let d = U512::from(BPS_DENOMINATOR);
        let ga = U512::from(BPS_DENOMINATOR - pool_a.fee_bps);
        let gb = U512::from(BPS_DENOMINATOR - pool_b.fee_bps);

        let a = ga * gb * U512::from(pool_a.reserve_out) * U512::from(pool_b.reserve_out);
        let b = d * d * U512::from(pool_a.reserve_in) * U512::from(pool_b.reserve_in);
        let c = ga * (d * U512::from(pool_b.reserve_in) + gb * U512::from(pool_a.reserve_out));

        let root = integer_sqrt(a.checked_mul(b).ok_or_else(|| {
            anyhow::anyhow!("overflow computing optimal arbitrage input")
        })?);
        if root <= b {
            return Ok(U256::zero()); // no profitable arbitrage at these prices
        }

        let optimal = (root - b) / c;

        // Cap at 10% of the shallower side to stay inside model validity.
        let cap = pool_a.reserve_in.min(pool_b.reserve_out) / U256::from(10u8);
        Ok(u512_to_u256(optimal)?.min(cap))
    }
}

/// Integer square root by Newton's method on U512.
fn integer_sqrt(value: U512) -> U512 {
    if value.is_zero() {
        return U512::zero();
    }
    let mut x = value;
    let mut y = (x + U512::one()) >> 1;
    while y < x {
        x = y;
        y = (x + value / x) >> 1;
    }
    x
}

fn u512_to_u256(value: U512) -> Result<U256> {
    value
        .try_into()
        .map_err(|_| anyhow::anyhow!("value exceeds U256 range"))
}

pub(crate) fn decimal_from_wei(value: U256) -> Result<Decimal> {
    let v: u128 = value
        .try_into()
        .map_err(|_| anyhow::anyhow!("wei amount {value} exceeds u128"))?;
    if v > i128::MAX as u128 {
        bail!("wei amount {value} exceeds decimal range");
    }
    Decimal::try_from_i128_with_scale(v as i128, 0)
        .map_err(|e| anyhow::anyhow!("decimal conversion of {value}: {e}"))
}

/// Decimal ratio of two wei quantities.
fn ratio(num: U256, den: U256) -> Result<Decimal> {
    let num = decimal_from_wei(num)?;
    let den = decimal_from_wei(den)?;
    if den.is_zero() {
        bail!("division by zero in ratio");
    }
    Ok(num / den)
}
