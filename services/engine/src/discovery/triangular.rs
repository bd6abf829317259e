//! Triangular detector: three-leg cycles within a single venue.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use ethers::types::{Address, U256};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, trace};
use uuid::Uuid;

use arb_types::{Opportunity, PoolInfo, Route, StrategyKind, Token, TradeStep, VenueId};

use super::cross_venue::apply_slippage_floor;
use super::graph::TokenGraph;
use super::{DetectionContext, OpportunityDetector, TtlCache};

const DETECTOR_ID: &str = "triangular";
/// Three swap legs in one transaction.
const THREE_LEG_GAS: u64 = 350_000;

/// Tuning for the triangular detector.
#[derive(Debug, Clone)]
pub struct TriangularConfig {
    /// Required cycle edge over break-even, in basis points.
    pub min_profit_bps: u32,
    /// Base tokens considered when the caller supplies none.
    pub base_token_count: usize,
    /// Per-step slippage bound recorded on emitted routes.
    pub max_slippage: Decimal,
    /// TTL for per-venue graphs and unit-rate quotes.
    pub cache_ttl: Duration,
}

impl Default for TriangularConfig {
    fn default() -> Self {
        Self {
            min_profit_bps: 10,
            base_token_count: 5,
            max_slippage: dec!(0.005),
            cache_ttl: Duration::from_secs(5),
        }
    }
}

/// Detects three-leg cycles per venue via DFS over the token graph.
pub struct TriangularDetector {
    config: TriangularConfig,
    graph_cache: TtlCache<(VenueId, usize), Arc<TokenGraph>>,
    /// Unit-rate quotes for the cheap prefilter, keyed by
    /// (venue, token_in, token_out).
    quote_cache: TtlCache<(VenueId, Address, Address), U256>,
}

impl TriangularDetector {
    pub fn new(config: TriangularConfig) -> Self {
        let ttl = config.cache_ttl;
        Self {
            config,
            graph_cache: TtlCache::new(ttl),
            quote_cache: TtlCache::new(ttl),
        }
    }

    fn graph_for(&self, ctx: &DetectionContext, venue: &VenueId) -> Arc<TokenGraph> {
        let key = (venue.clone(), ctx.pools.len());
        if let Some(hit) = self.graph_cache.get(&key) {
            return hit;
        }
        let graph = Arc::new(TokenGraph::build(&ctx.pools, venue));
        self.graph_cache.insert(key, graph.clone());
        graph
    }

    /// Cached quote of one whole input unit through the pool; used only to
    /// prefilter cycles before exact quoting.
    fn unit_rate(&self, pool: &PoolInfo, token_in: &Token, token_out: &Token) -> Option<U256> {
        let key = (pool.venue.clone(), token_in.address, token_out.address);
        if let Some(hit) = self.quote_cache.get(&key) {
            return Some(hit);
        }
        let out = arb_amm::quote_pool(pool, token_in, token_in.one_unit_wei()).ok()?;
        self.quote_cache.insert(key, out);
        Some(out)
    }

    /// Exact three-leg quote for the canonical sample input.
    fn quote_cycle(
        &self,
        legs: &[(PoolInfo, Token, Token); 3],
        input: U256,
    ) -> Option<(U256, U256, U256)> {
        let out1 = arb_amm::quote_pool(&legs[0].0, &legs[0].1, input).ok()?;
        let out2 = arb_amm::quote_pool(&legs[1].0, &legs[1].1, out1).ok()?;
        let out3 = arb_amm::quote_pool(&legs[2].0, &legs[2].1, out2).ok()?;
        Some((out1, out2, out3))
    }

    fn base_tokens(&self, ctx: &DetectionContext, graph: &TokenGraph) -> Vec<Token> {
        if !ctx.filters.base_tokens.is_empty() {
            return ctx.filters.base_tokens.clone();
        }
        graph.top_tokens_by_degree(self.config.base_token_count)
    }

    fn emit(
        &self,
        legs: [(PoolInfo, Token, Token); 3],
        input: U256,
        outs: (U256, U256, U256),
        ctx: &DetectionContext,
    ) -> Option<Opportunity> {
        let (out1, out2, out3) = outs;
        let profit = out3.checked_sub(input)?;

        let steps: Vec<TradeStep> = legs
            .iter()
            .zip([out1, out2, out3])
            .map(|((pool, token_in, token_out), expected)| TradeStep {
                pool: pool.clone(),
                token_in: token_in.clone(),
                token_out: token_out.clone(),
                expected_out_wei: expected,
                min_out_wei: apply_slippage_floor(expected, self.config.max_slippage),
                max_slippage: self.config.max_slippage,
            })
            .collect();

        let route = Route::new(steps);
        route.validate_cyclic().ok()?;

        let confidence = (dec!(0.8) - ctx.market.volatility_index * dec!(0.2))
            .clamp(Decimal::ZERO, Decimal::ONE);

        let mut metadata = BTreeMap::new();
        metadata.insert("venue".to_string(), legs[0].0.venue.to_string());
        metadata.insert(
            "cycle".to_string(),
            format!("{}>{}>{}", legs[0].1, legs[1].1, legs[2].1),
        );

        Some(Opportunity {
            id: Uuid::new_v4(),
            strategy: StrategyKind::Triangular,
            detector_id: DETECTOR_ID.to_string(),
            route,
            input_wei: input,
            expected_output_wei: out3,
            expected_profit_wei: profit,
            gas_estimate: THREE_LEG_GAS,
            gas_price_wei: ctx.market.gas_price_wei,
            priority_fee_wei: ctx.market.priority_fee_wei,
            confidence,
            flash_loan_required: false,
            discovered_at: Utc::now(),
            metadata,
        })
    }
}

#[async_trait]
impl OpportunityDetector for TriangularDetector {
    fn id(&self) -> &str {
        DETECTOR_ID
    }

    async fn detect(&self, ctx: &DetectionContext) -> anyhow::Result<Vec<Opportunity>> {
        let mut venues: Vec<VenueId> = ctx.pools.iter().map(|p| p.venue.clone()).collect();
        venues.sort();
        venues.dedup();
        if let Some(filter) = &ctx.filters.venues {
            venues.retain(|v| filter.contains(v));
        }

        let min_ratio_num = U256::from(10_000u64 + self.config.min_profit_bps as u64);
        let mut found = Vec::new();

        for venue in &venues {
            let graph = self.graph_for(ctx, venue);
            for base in self.base_tokens(ctx, &graph) {
                let input = base.one_unit_wei();
                for cycle in graph.three_leg_cycles(&base) {
                    let pools: Vec<&PoolInfo> =
                        cycle.iter().filter_map(|i| graph.pool(*i)).collect();
                    if pools.len() != 3 {
                        continue;
                    }

                    // Resolve the token sequence base -> t1 -> t2 -> base.
                    let t1 = match pools[0].counterpart(&base) {
                        Some(t) => t.clone(),
                        None => continue,
                    };
                    let t2 = match pools[1].counterpart(&t1) {
                        Some(t) => t.clone(),
                        None => continue,
                    };
                    let legs = [
                        (pools[0].clone(), base.clone(), t1.clone()),
                        (pools[1].clone(), t1, t2.clone()),
                        (pools[2].clone(), t2, base.clone()),
                    ];

                    // Cheap unit-rate prefilter before exact quoting.
                    let prefilter: Option<U256> = self
                        .unit_rate(&legs[0].0, &legs[0].1, &legs[0].2)
                        .and_then(|_| self.unit_rate(&legs[1].0, &legs[1].1, &legs[1].2))
                        .and_then(|_| self.unit_rate(&legs[2].0, &legs[2].1, &legs[2].2));
                    if prefilter.is_none() {
                        trace!("cycle on {venue} failed unit quoting, skipped");
                        continue;
                    }

                    let Some(outs) = self.quote_cycle(&legs, input) else {
                        continue;
                    };
                    // Ratio check: out/in > 1 + min_profit_bps.
                    if outs.2.saturating_mul(U256::from(10_000u64))
                        <= input.saturating_mul(min_ratio_num)
                    {
                        continue;
                    }

                    if let Some(opp) = self.emit(legs, input, outs, ctx) {
                        found.push(opp);
                    }
                }
            }
        }

        debug!("triangular sweep found {} candidates", found.len());
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::DiscoveryFilters;
    use arb_types::{MarketCondition, PoolKind};

    fn token(byte: u8) -> Token {
        Token::new(Address::repeat_byte(byte), None, 18).unwrap()
    }

    fn cpmm(seed: u8, t0: &Token, t1: &Token, r0: u64, r1: u64) -> PoolInfo {
        PoolInfo {
            pool_address: Address::repeat_byte(seed),
            venue: VenueId::from("venue"),
            tokens: vec![t0.clone(), t1.clone()],
            fee_bps: 30,
            kind: PoolKind::ConstantProduct {
                reserve0: U256::from(r0) * U256::exp10(18),
                reserve1: U256::from(r1) * U256::exp10(18),
            },
        }
    }

    fn ctx(pools: Vec<PoolInfo>, base: Token) -> DetectionContext {
        DetectionContext {
            pools: Arc::new(pools),
            market: Arc::new(MarketCondition::empty(Utc::now())),
            filters: DiscoveryFilters {
                base_tokens: vec![base],
                venues: None,
            },
        }
    }

    /// A 1% edge on the closing leg (reserves 1000:1010 ratio) against two
    /// flat legs, 0.3% fee everywhere, base A, input one whole token. Deep
    /// reserves keep the input's own impact negligible so the cycle nets
    /// positive after the three fees.
    #[tokio::test]
    async fn profitable_triangle_is_found() {
        let (a, b, c) = (token(1), token(2), token(3));
        let pools = vec![
            cpmm(0x10, &a, &b, 1_000_000, 1_000_000),
            cpmm(0x20, &b, &c, 1_000_000, 1_000_000),
            cpmm(0x30, &c, &a, 1_000_000, 1_010_000),
        ];

        let detector = TriangularDetector::new(TriangularConfig {
            min_profit_bps: 1,
            ..TriangularConfig::default()
        });
        let found = detector.detect(&ctx(pools, a.clone())).await.unwrap();

        assert!(!found.is_empty(), "1% edge should survive 0.9% fees");
        let opp = &found[0];
        assert_eq!(opp.strategy, StrategyKind::Triangular);
        assert!(opp.expected_profit_wei > U256::zero());
        assert_eq!(opp.route.len(), 3);
        opp.route.validate_cyclic().unwrap();
        assert_eq!(opp.route.input_token().unwrap(), &a);
    }

    #[tokio::test]
    async fn balanced_triangle_yields_nothing() {
        let (a, b, c) = (token(1), token(2), token(3));
        let pools = vec![
            cpmm(0x10, &a, &b, 1_000, 1_000),
            cpmm(0x20, &b, &c, 1_000, 1_000),
            cpmm(0x30, &c, &a, 1_000, 1_000),
        ];
        let detector = TriangularDetector::new(TriangularConfig::default());
        let found = detector.detect(&ctx(pools, a)).await.unwrap();
        assert!(found.is_empty(), "fees must eat a flat cycle");
    }

    #[tokio::test]
    async fn min_profit_floor_prices_out_thin_edges() {
        let (a, b, c) = (token(1), token(2), token(3));
        let pools = vec![
            cpmm(0x10, &a, &b, 1_000_000, 1_000_000),
            cpmm(0x20, &b, &c, 1_000_000, 1_000_000),
            cpmm(0x30, &c, &a, 1_000_000, 1_010_000),
        ];
        // The ~0.1% net edge dies against a 5% floor.
        let detector = TriangularDetector::new(TriangularConfig {
            min_profit_bps: 500,
            ..TriangularConfig::default()
        });
        let found = detector.detect(&ctx(pools, a)).await.unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn discovery_is_idempotent_on_frozen_snapshot() {
        let (a, b, c) = (token(1), token(2), token(3));
        let pools = vec![
            cpmm(0x10, &a, &b, 1_000_000, 1_000_000),
            cpmm(0x20, &b, &c, 1_000_000, 1_000_000),
            cpmm(0x30, &c, &a, 1_000_000, 1_010_000),
        ];
        let detector = TriangularDetector::new(TriangularConfig {
            min_profit_bps: 1,
            ..TriangularConfig::default()
        });
        let ctx = ctx(pools, a);

        let first = detector.detect(&ctx).await.unwrap();
        let second = detector.detect(&ctx).await.unwrap();

        assert_eq!(first.len(), second.len());
        for (x, y) in first.iter().zip(second.iter()) {
            // Equal modulo id and timestamp.
            assert_eq!(x.route, y.route);
            assert_eq!(x.expected_profit_wei, y.expected_profit_wei);
            assert_eq!(x.input_wei, y.input_wei);
        }
    }
}
