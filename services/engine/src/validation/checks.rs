//! The seven validators of the standard chain.

use async_trait::async_trait;
use ethers::types::U256;
use rust_decimal::{Decimal, MathematicalOps};
use rust_decimal_macros::dec;

use arb_amm::{ConcentratedMath, CpmmMath};
use arb_types::{MarketCondition, Opportunity, PoolKind, TradeStep};

use super::{ValidationContext, Validator, Verdict};

/// Square-root scaling factor for the depth-based slippage estimate.
const SLIPPAGE_BASE_FACTOR: Decimal = dec!(0.01);

fn wei_to_decimal(value: U256) -> Option<Decimal> {
    let v: u128 = value.try_into().ok()?;
    if v > i128::MAX as u128 {
        return None;
    }
    Decimal::try_from_i128_with_scale(v as i128, 0).ok()
}

/// Depth of the pool on the input side of a step, in wei of `token_in`.
fn step_depth(step: &TradeStep) -> Option<U256> {
    match &step.pool.kind {
        PoolKind::ConstantProduct { .. } | PoolKind::Stable { .. } => {
            step.pool.reserve_of(&step.token_in)
        }
        // Liquidity is the closest depth proxy the snapshot carries.
        PoolKind::ConcentratedLiquidity { liquidity, .. } => Some(U256::from(*liquidity)),
    }
}

/// Input amount arriving at step `i` of the route.
fn step_input(opportunity: &Opportunity, i: usize) -> U256 {
    if i == 0 {
        opportunity.input_wei
    } else {
        opportunity.route.steps[i - 1].expected_out_wei
    }
}

/// 1. Estimated slippage from trade size against pool depth, sqrt-scaled.
pub struct SlippageValidator;

#[async_trait]
impl Validator for SlippageValidator {
    fn name(&self) -> &'static str {
        "slippage"
    }

    async fn validate(
        &self,
        opportunity: &Opportunity,
        _market: &MarketCondition,
        ctx: &ValidationContext,
    ) -> Verdict {
        let mut estimated = Decimal::ZERO;

        for (i, step) in opportunity.route.steps.iter().enumerate() {
            let Some(depth) = step_depth(step) else {
                return Verdict::fail(format!(
                    "Excessive slippage: no depth for pool {:?}",
                    step.pool.pool_address
                ));
            };
            let (Some(amount), Some(depth)) =
                (wei_to_decimal(step_input(opportunity, i)), wei_to_decimal(depth))
            else {
                return Verdict::fail("Excessive slippage: amount out of range".to_string());
            };
            if depth.is_zero() {
                return Verdict::fail(format!(
                    "Excessive slippage: empty pool {:?}",
                    step.pool.pool_address
                ));
            }

            let fraction = amount / depth;
            let root = fraction.sqrt().unwrap_or(Decimal::MAX);
            estimated += root * SLIPPAGE_BASE_FACTOR;
        }

        let max = ctx.config.max_slippage;
        if estimated > max {
            return Verdict::fail(format!("Excessive slippage: {estimated:.4} > {max}"));
        }
        Verdict::pass_with_confidence(Decimal::ONE - (estimated / max) * dec!(0.2))
    }
}

/// 2. Per-step pool liquidity in USD against the configured floor.
pub struct LiquidityValidator;

#[async_trait]
impl Validator for LiquidityValidator {
    fn name(&self) -> &'static str {
        "liquidity"
    }

    async fn validate(
        &self,
        opportunity: &Opportunity,
        market: &MarketCondition,
        ctx: &ValidationContext,
    ) -> Verdict {
        let floor = ctx.config.min_liquidity_usd;
        let mut weakest = Decimal::ONE;

        for step in &opportunity.route.steps {
            let usd = step_depth(step)
                .and_then(wei_to_decimal)
                .zip(market.price_of(step.token_in.address))
                .map(|(depth_wei, price)| {
                    let scale = Decimal::from(10u64.pow(step.token_in.decimals as u32));
                    depth_wei / scale * price
                });

            match usd {
                Some(usd) if usd < floor => {
                    return Verdict::fail(format!(
                        "Insufficient liquidity: ${usd:.0} < ${floor} on {}",
                        step.pool.venue
                    ));
                }
                Some(usd) => {
                    // Thin-but-passing pools drag confidence down.
                    let margin = (usd / (floor * dec!(10))).min(Decimal::ONE);
                    weakest = weakest.min(dec!(0.8) + margin * dec!(0.2));
                }
                None => {
                    // No USD price for this token: fall back to the normalized
                    // liquidity level when the feed carries one.
                    match market.liquidity_level(step.pool.pool_address) {
                        Some(level) if level < dec!(0.1) => {
                            return Verdict::fail(format!(
                                "Insufficient liquidity: level {level} on {}",
                                step.pool.venue
                            ));
                        }
                        Some(_) => weakest = weakest.min(dec!(0.9)),
                        None => weakest = weakest.min(dec!(0.75)),
                    }
                }
            }
        }

        Verdict::pass_with_confidence(weakest)
    }
}

/// 3. Price impact of the route's own size.
pub struct PriceImpactValidator;

#[async_trait]
impl Validator for PriceImpactValidator {
    fn name(&self) -> &'static str {
        "price_impact"
    }

    async fn validate(
        &self,
        opportunity: &Opportunity,
        _market: &MarketCondition,
        ctx: &ValidationContext,
    ) -> Verdict {
        let mut total_bps = Decimal::ZERO;

        for (i, step) in opportunity.route.steps.iter().enumerate() {
            let amount = step_input(opportunity, i);
            let impact_bps = match &step.pool.kind {
                PoolKind::ConstantProduct { .. } => {
                    let Some(reserve_in) = step.pool.reserve_of(&step.token_in) else {
                        return Verdict::fail("Excessive price impact: missing reserves");
                    };
                    let Some(reserve_out) = step.pool.reserve_of(&step.token_out) else {
                        return Verdict::fail("Excessive price impact: missing reserves");
                    };
                    match CpmmMath::price_impact_bps(amount, reserve_in, reserve_out) {
                        Ok(bps) => bps,
                        Err(e) => {
                            return Verdict::fail(format!("Excessive price impact: {e}"));
                        }
                    }
                }
                PoolKind::ConcentratedLiquidity {
                    sqrt_price_x96,
                    tick,
                    liquidity,
                    fee_tier,
                    ..
                } => {
                    let state = arb_amm::ClState {
                        sqrt_price_x96: match (*sqrt_price_x96).try_into() {
                            Ok(v) => v,
                            Err(_) => {
                                return Verdict::fail(
                                    "Excessive price impact: sqrt price out of range",
                                )
                            }
                        },
                        liquidity: *liquidity,
                        tick: *tick,
                        fee_pips: *fee_tier,
                    };
                    let zero_for_one = step.pool.token_index(&step.token_in) == Some(0);
                    let amount: u128 = match amount.try_into() {
                        Ok(v) => v,
                        Err(_) => {
                            return Verdict::fail(
                                "Excessive price impact: amount out of range",
                            )
                        }
                    };
                    match ConcentratedMath::price_impact_bps(amount, &state, zero_for_one) {
                        Ok(bps) => bps,
                        Err(e) => {
                            return Verdict::fail(format!("Excessive price impact: {e}"));
                        }
                    }
                }
                PoolKind::Stable { .. } => {
                    // Amplified curves are nearly flat at validated sizes; the
                    // slippage check already bounds depth usage.
                    Decimal::ZERO
                }
            };
            total_bps += impact_bps;
        }

        let max = ctx.config.max_price_impact * dec!(10000);
        if total_bps > max {
            return Verdict::fail(format!(
                "Excessive price impact: {total_bps:.1} bps > {max} bps"
            ));
        }
        Verdict::pass()
    }
}

/// 4. Projected gas cost, buffered, against its share of expected profit.
pub struct GasEconomicsValidator;

#[async_trait]
impl Validator for GasEconomicsValidator {
    fn name(&self) -> &'static str {
        "gas_economics"
    }

    async fn validate(
        &self,
        opportunity: &Opportunity,
        _market: &MarketCondition,
        ctx: &ValidationContext,
    ) -> Verdict {
        let buffer_bps = ((Decimal::ONE + ctx.config.gas_price_buffer) * dec!(10000)).trunc();
        let buffer_bps =
            rust_decimal::prelude::ToPrimitive::to_u64(&buffer_bps).unwrap_or(12_000);

        let buffered_gas_price = opportunity
            .gas_price_wei
            .saturating_mul(U256::from(buffer_bps))
            / U256::from(10_000u64);
        let gas_cost = U256::from(opportunity.gas_estimate)
            .saturating_mul(buffered_gas_price.saturating_add(opportunity.priority_fee_wei));

        if opportunity.expected_profit_wei.is_zero() {
            return Verdict::fail("Excessive gas costs: zero expected profit".to_string());
        }
        let percentage = gas_cost.saturating_mul(U256::from(100u64)) / opportunity.expected_profit_wei;
        let max = ctx.config.max_gas_percentage;
        let pct_decimal = wei_to_decimal(percentage).unwrap_or(Decimal::MAX);

        if pct_decimal > max {
            return Verdict::fail(format!(
                "Excessive gas costs: {pct_decimal:.2}% > {max}% of profit"
            ));
        }
        Verdict::pass_with_confidence(Decimal::ONE - (pct_decimal / dec!(100)) * dec!(0.3))
    }
}

/// 5. Token safety: every route token off the blacklist.
pub struct TokenSafetyValidator;

#[async_trait]
impl Validator for TokenSafetyValidator {
    fn name(&self) -> &'static str {
        "token_safety"
    }

    async fn validate(
        &self,
        opportunity: &Opportunity,
        _market: &MarketCondition,
        ctx: &ValidationContext,
    ) -> Verdict {
        for step in &opportunity.route.steps {
            for token in [&step.token_in, &step.token_out] {
                if ctx.blacklist.contains(&token.address) {
                    return Verdict::fail(format!("Blacklisted token: {token}"));
                }
            }
        }
        Verdict::pass()
    }
}

/// 6. Price freshness and manipulation-risk metadata.
pub struct PriceConsistencyValidator;

/// Metadata key carrying a detector's manipulation-risk score in [0, 1].
pub const MANIPULATION_RISK_KEY: &str = "manipulation_risk";
const MAX_MANIPULATION_RISK: Decimal = dec!(0.5);

#[async_trait]
impl Validator for PriceConsistencyValidator {
    fn name(&self) -> &'static str {
        "price_consistency"
    }

    async fn validate(
        &self,
        opportunity: &Opportunity,
        _market: &MarketCondition,
        ctx: &ValidationContext,
    ) -> Verdict {
        let age = opportunity.age(chrono::Utc::now());
        let max_age = ctx.config.max_price_age_seconds as i64;
        if age.num_seconds() > max_age {
            return Verdict::fail(format!(
                "Stale price data: {}s old > {max_age}s",
                age.num_seconds()
            ));
        }

        if let Some(risk) = opportunity.metadata.get(MANIPULATION_RISK_KEY) {
            match risk.parse::<Decimal>() {
                Ok(risk) if risk > MAX_MANIPULATION_RISK => {
                    return Verdict::fail(format!(
                        "Price manipulation risk: {risk} > {MAX_MANIPULATION_RISK}"
                    ));
                }
                Ok(risk) => {
                    return Verdict::pass_with_confidence(Decimal::ONE - risk);
                }
                Err(_) => {
                    return Verdict::fail(format!("Price manipulation risk: unparseable '{risk}'"));
                }
            }
        }

        Verdict::pass()
    }
}

/// 7. Dry-run the route against current pool snapshots; reject when projected
/// profit after fees and worst-case slippage is not positive.
pub struct SimulationValidator;

#[async_trait]
impl Validator for SimulationValidator {
    fn name(&self) -> &'static str {
        "simulation"
    }

    async fn validate(
        &self,
        opportunity: &Opportunity,
        _market: &MarketCondition,
        _ctx: &ValidationContext,
    ) -> Verdict {
        // Re-quote the whole route from the embedded pool snapshots; the
        // quote already carries fees and the trade's own price impact.
        let mut amount = opportunity.input_wei;
        for step in &opportunity.route.steps {
            amount = match arb_amm::quote_pool(&step.pool, &step.token_in, amount) {
                Ok(out) => out,
                Err(e) => {
                    return Verdict::fail(format!("Simulation error: {e}"));
                }
            };
        }

        if amount <= opportunity.input_wei {
            return Verdict::fail(
                "Simulated profit is not positive after slippage/fees".to_string(),
            );
        }
        Verdict::pass()
    }
}
