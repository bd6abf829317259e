//! Cross-venue detector: the same pair priced differently on two venues.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use ethers::types::{Address, U256};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, trace};
use uuid::Uuid;

use arb_amm::{CpmmReserves, OptimalSizer, SizingConfig};
use arb_types::{
    Opportunity, PoolInfo, PoolKind, Route, StrategyKind, Token, TradeStep, VenueId,
};

use super::{DetectionContext, OpportunityDetector, TtlCache};

const DETECTOR_ID: &str = "cross_venue";
/// Two swap legs plus approval overhead.
const TWO_LEG_GAS: u64 = 250_000;

/// Pools grouped by canonical (low address, high address) pair.
type PairIndex = HashMap<(Address, Address), Vec<PoolInfo>>;

/// Tuning for the cross-venue detector.
#[derive(Debug, Clone)]
pub struct CrossVenueConfig {
    /// Ignore edges thinner than this, in basis points of input.
    pub min_edge_bps: u32,
    /// Position bound as a fraction of pool depth.
    pub max_position_pct: Decimal,
    /// Per-step slippage bound recorded on emitted routes.
    pub max_slippage: Decimal,
    /// TTL for the pair-enumeration cache.
    pub pair_cache_ttl: Duration,
}

impl Default for CrossVenueConfig {
    fn default() -> Self {
        Self {
            min_edge_bps: 5,
            max_position_pct: dec!(0.1),
            max_slippage: dec!(0.005),
            pair_cache_ttl: Duration::from_secs(5),
        }
    }
}

/// Detects two-leg arbitrage across venues.
pub struct CrossVenueDetector {
    config: CrossVenueConfig,
    pair_cache: TtlCache<u64, Arc<PairIndex>>,
}

impl CrossVenueDetector {
    pub fn new(config: CrossVenueConfig) -> Self {
        let ttl = config.pair_cache_ttl;
        Self {
            config,
            pair_cache: TtlCache::new(ttl),
        }
    }

    /// Group two-token pools by canonical pair, restricted by venue filter.
    fn pair_index(&self, ctx: &DetectionContext) -> Arc<PairIndex> {
        let mut hasher = DefaultHasher::new();
        if let Some(venues) = &ctx.filters.venues {
            for v in venues {
                v.hash(&mut hasher);
            }
        }
        ctx.pools.len().hash(&mut hasher);
        let key = hasher.finish();

        if let Some(hit) = self.pair_cache.get(&key) {
            return hit;
        }

        let mut index: PairIndex = HashMap::new();
        for pool in ctx.pools.iter() {
            if pool.tokens.len() != 2 || !pool.kind.has_liquidity() {
                continue;
            }
            if let Some(venues) = &ctx.filters.venues {
                if !venues.contains(&pool.venue) {
                    continue;
                }
            }
            let (a, b) = (pool.tokens[0].address, pool.tokens[1].address);
            let pair = if a < b { (a, b) } else { (b, a) };
            index.entry(pair).or_default().push(pool.clone());
        }

        let index = Arc::new(index);
        self.pair_cache.insert(key, index.clone());
        index
    }

    /// Evaluate buying `token_in` exposure on `buy_pool` and unwinding it on
    /// `sell_pool`.
    fn evaluate_direction(
        &self,
        buy_pool: &PoolInfo,
        sell_pool: &PoolInfo,
        token_in: &Token,
        ctx: &DetectionContext,
    ) -> Option<Opportunity> {
        let token_mid = buy_pool.counterpart(token_in)?.clone();

        let (amount_in, mid_out, final_out) = match (&buy_pool.kind, &sell_pool.kind) {
            (PoolKind::ConstantProduct { .. }, PoolKind::ConstantProduct { .. }) => {
                let leg_a = CpmmReserves {
                    reserve_in: buy_pool.reserve_of(token_in)?,
                    reserve_out: buy_pool.reserve_of(&token_mid)?,
                    fee_bps: buy_pool.fee_bps,
                };
                let leg_b = CpmmReserves {
                    reserve_in: sell_pool.reserve_of(&token_mid)?,
                    reserve_out: sell_pool.reserve_of(token_in)?,
                    fee_bps: sell_pool.fee_bps,
                };
                let sizer = OptimalSizer::new(SizingConfig {
                    max_position_pct: self.config.max_position_pct,
                    slippage_ceiling_bps: 10_000, // validators own the slippage bound
                    ..SizingConfig::default()
                });
                let sized = sizer.size_cpmm_pair(&leg_a, &leg_b).ok()?;
                if !sized.is_profitable {
                    return None;
                }
                let mid = arb_amm::quote_pool(buy_pool, token_in, sized.amount_in).ok()?;
                (sized.amount_in, mid, sized.expected_out)
            }
            _ => {
                // Mixed protocols: size to one canonical unit of the input.
                let amount_in = token_in.one_unit_wei();
                let mid = arb_amm::quote_pool(buy_pool, token_in, amount_in).ok()?;
                let out = arb_amm::quote_pool(sell_pool, &token_mid, mid).ok()?;
                (amount_in, mid, out)
            }
        };

        if final_out <= amount_in {
            return None;
        }
        let profit = final_out - amount_in;
        let edge_bps = profit.saturating_mul(U256::from(10_000u64)) / amount_in;
        if edge_bps < U256::from(self.config.min_edge_bps) {
            trace!(
                "edge {edge_bps} bps below floor on {} / {}",
                buy_pool.venue,
                sell_pool.venue
            );
            return None;
        }

        let route = Route::new(vec![
            self.step(buy_pool, token_in.clone(), token_mid.clone(), mid_out),
            self.step(sell_pool, token_mid, token_in.clone(), final_out),
        ]);
        route.validate_cyclic().ok()?;

        let confidence = (dec!(0.85) - ctx.market.volatility_index * dec!(0.2))
            .clamp(Decimal::ZERO, Decimal::ONE);

        let mut metadata = BTreeMap::new();
        metadata.insert("buy_venue".to_string(), buy_pool.venue.to_string());
        metadata.insert("sell_venue".to_string(), sell_pool.venue.to_string());
        metadata.insert("edge_bps".to_string(), edge_bps.to_string());

        Some(Opportunity {
            id: Uuid::new_v4(),
            strategy: StrategyKind::CrossVenue,
            detector_id: DETECTOR_ID.to_string(),
            route,
            input_wei: amount_in,
            expected_output_wei: final_out,
            expected_profit_wei: profit,
            gas_estimate: TWO_LEG_GAS,
            gas_price_wei: ctx.market.gas_price_wei,
            priority_fee_wei: ctx.market.priority_fee_wei,
            confidence,
            flash_loan_required: false,
            discovered_at: Utc::now(),
            metadata,
        })
    }

    fn step(
        &self,
        pool: &PoolInfo,
        token_in: Token,
        token_out: Token,
        expected_out: U256,
    ) -> TradeStep {
        TradeStep {
            pool: pool.clone(),
            token_in,
            token_out,
            expected_out_wei: expected_out,
            min_out_wei: apply_slippage_floor(expected_out, self.config.max_slippage),
            max_slippage: self.config.max_slippage,
        }
    }
}

/// `expected * (1 - slippage)`, in integer bps.
pub(crate) fn apply_slippage_floor(expected: U256, slippage: Decimal) -> U256 {
    let keep_bps = ((Decimal::ONE - slippage) * dec!(10000)).trunc();
    let keep_bps = rust_decimal::prelude::ToPrimitive::to_u64(&keep_bps).unwrap_or(10_000);
    expected.saturating_mul(U256::from(keep_bps)) / U256::from(10_000u64)
}

#[async_trait]
impl OpportunityDetector for CrossVenueDetector {
    fn id(&self) -> &str {
        DETECTOR_ID
    }

    async fn detect(&self, ctx: &DetectionContext) -> anyhow::Result<Vec<Opportunity>> {
        let index = self.pair_index(ctx);
        let mut found = Vec::new();

        for pools in index.values() {
            // Need the pair on at least two venues.
            let venues: Vec<&VenueId> = pools.iter().map(|p| &p.venue).collect();
            if !venues.iter().any(|v| **v != *venues[0]) {
                continue;
            }

            for (i, pool_a) in pools.iter().enumerate() {
                for pool_b in pools.iter().skip(i + 1) {
                    if pool_a.venue == pool_b.venue {
                        continue;
                    }
                    for token_in in &pool_a.tokens {
                        if !pool_b.contains_token(token_in) {
                            continue;
                        }
                        if let Some(opp) =
                            self.evaluate_direction(pool_a, pool_b, token_in, ctx)
                        {
                            found.push(opp);
                        }
                        if let Some(opp) =
                            self.evaluate_direction(pool_b, pool_a, token_in, ctx)
                        {
                            found.push(opp);
                        }
                    }
                }
            }
        }

        debug!("cross-venue sweep found {} candidates", found.len());
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::DiscoveryFilters;
    use arb_types::MarketCondition;

    fn token(byte: u8) -> Token {
        Token::new(Address::repeat_byte(byte), None, 18).unwrap()
    }

    fn cpmm(venue: &str, seed: u8, t0: &Token, t1: &Token, r0: u64, r1: u64) -> PoolInfo {
        PoolInfo {
            pool_address: Address::repeat_byte(seed),
            venue: VenueId::from(venue),
            tokens: vec![t0.clone(), t1.clone()],
            fee_bps: 30,
            kind: PoolKind::ConstantProduct {
                reserve0: U256::from(r0) * U256::exp10(18),
                reserve1: U256::from(r1) * U256::exp10(18),
            },
        }
    }

    fn ctx(pools: Vec<PoolInfo>) -> DetectionContext {
        DetectionContext {
            pools: Arc::new(pools),
            market: Arc::new(MarketCondition::empty(Utc::now())),
            filters: DiscoveryFilters::default(),
        }
    }

    #[tokio::test]
    async fn finds_gap_between_venues() {
        let (weth, usdc) = (token(1), token(2));
        // Venue X prices WETH at 2000, venue Y at ~2050.
        let pools = vec![
            cpmm("venue-x", 0x10, &weth, &usdc, 1_000, 2_000_000),
            cpmm("venue-y", 0x20, &weth, &usdc, 1_000, 2_050_000),
        ];

        let detector = CrossVenueDetector::new(CrossVenueConfig::default());
        let found = detector.detect(&ctx(pools)).await.unwrap();

        assert!(!found.is_empty(), "price gap should produce candidates");
        let best = &found[0];
        assert_eq!(best.strategy, StrategyKind::CrossVenue);
        assert!(best.expected_profit_wei > U256::zero());
        best.route.validate_cyclic().unwrap();
        assert_eq!(best.route.len(), 2);
        assert_ne!(
            best.route.steps[0].pool.venue,
            best.route.steps[1].pool.venue
        );
    }

    #[tokio::test]
    async fn identical_prices_produce_nothing() {
        let (weth, usdc) = (token(1), token(2));
        let pools = vec![
            cpmm("venue-x", 0x10, &weth, &usdc, 1_000, 2_000_000),
            cpmm("venue-y", 0x20, &weth, &usdc, 1_000, 2_000_000),
        ];
        let detector = CrossVenueDetector::new(CrossVenueConfig::default());
        let found = detector.detect(&ctx(pools)).await.unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn single_venue_pair_is_skipped() {
        let (weth, usdc) = (token(1), token(2));
        let pools = vec![
            cpmm("venue-x", 0x10, &weth, &usdc, 1_000, 2_000_000),
            cpmm("venue-x", 0x11, &weth, &usdc, 1_000, 2_100_000),
        ];
        let detector = CrossVenueDetector::new(CrossVenueConfig::default());
        let found = detector.detect(&ctx(pools)).await.unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn slippage_floor_math() {
        let floor = apply_slippage_floor(U256::from(10_000u64), dec!(0.005));
        assert_eq!(floor, U256::from(9_950u64));
    }
}
