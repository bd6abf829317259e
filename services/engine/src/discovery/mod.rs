//! # Opportunity Discovery - Concurrent Detector Fan-Out
//!
//! ## Purpose
//!
//! Runs the registered detector set in parallel over a shared pool snapshot,
//! merges their results deterministically, and enforces the caller's profit
//! floor. Detector failures are isolated: a failing detector contributes
//! nothing and the run continues. A wall-clock budget cancels stragglers so
//! one slow venue cannot stall the discovery loop.
//!
//! ## Integration Points
//!
//! - **Input Sources**: pool snapshots through [`PoolSource`] (TTL-cached),
//!   market snapshot from the market data feed
//! - **Output Destinations**: validation pipeline via the discovery loop
//! - **Ordering**: merged results sort by
//!   `(expected_profit_wei desc, detector_id asc, opportunity_id asc)` so a
//!   frozen market snapshot yields a stable opportunity order
//!
//! ## Architecture Role
//!
//! ```text
//! PoolSource → [snapshot cache] → Detector fan-out (semaphore) → merge/sort
//!                                     ↓            ↓
//!                              CrossVenueDetector  TriangularDetector
//! ```

pub mod cache;
pub mod cross_venue;
pub mod graph;
pub mod triangular;

pub use cache::TtlCache;
pub use cross_venue::CrossVenueDetector;
pub use graph::TokenGraph;
pub use triangular::TriangularDetector;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ethers::types::U256;
use parking_lot::RwLock;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use arb_config::DiscoveryConfig;
use arb_types::{MarketCondition, Opportunity, PoolInfo, Token};

/// Caller-supplied narrowing of a discovery run.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryFilters {
    /// Base tokens for cycle enumeration; empty means detector defaults.
    pub base_tokens: Vec<Token>,
    /// Restrict to these venues when set.
    pub venues: Option<Vec<arb_types::VenueId>>,
}

/// Everything a detector sees for one run.
pub struct DetectionContext {
    pub pools: Arc<Vec<PoolInfo>>,
    pub market: Arc<MarketCondition>,
    pub filters: DiscoveryFilters,
}

/// A registered opportunity detector.
#[async_trait]
pub trait OpportunityDetector: Send + Sync {
    fn id(&self) -> &str;
    async fn detect(&self, ctx: &DetectionContext) -> anyhow::Result<Vec<Opportunity>>;
}

/// Source of pool snapshots for discovery.
#[async_trait]
pub trait PoolSource: Send + Sync {
    async fn pools(&self) -> anyhow::Result<Vec<PoolInfo>>;
}

/// Pool source over an in-memory list; the integration seam for adapters
/// that stream pool state from chain events.
pub struct InMemoryPoolSource {
    pools: RwLock<Vec<PoolInfo>>,
}

impl InMemoryPoolSource {
    pub fn new(pools: Vec<PoolInfo>) -> Self {
        Self {
            pools: RwLock::new(pools),
        }
    }

    pub fn replace(&self, pools: Vec<PoolInfo>) {
        *self.pools.write() = pools;
    }
}

#[async_trait]
impl PoolSource for InMemoryPoolSource {
    async fn pools(&self) -> anyhow::Result<Vec<PoolInfo>> {
        Ok(self.pools.read().clone())
    }
}

/// Runs detectors concurrently and merges their output.
pub struct DiscoveryManager {
    detectors: Vec<Arc<dyn OpportunityDetector>>,
    pool_source: Arc<dyn PoolSource>,
    pool_cache: TtlCache<&'static str, Arc<Vec<PoolInfo>>>,
    semaphore: Arc<Semaphore>,
    config: DiscoveryConfig,
}

impl DiscoveryManager {
    pub fn new(pool_source: Arc<dyn PoolSource>, config: DiscoveryConfig) -> Self {
        // A single permit serializes detector runs when parallelism is off.
        let permits = if config.parallel_detection {
            config.max_concurrent_detectors.max(1)
        } else {
            1
        };
        Self {
            detectors: Vec::new(),
            pool_source,
            pool_cache: TtlCache::new(Duration::from_secs(config.pool_cache_ttl_seconds)),
            semaphore: Arc::new(Semaphore::new(permits)),
            config,
        }
    }

    pub fn register(&mut self, detector: Arc<dyn OpportunityDetector>) {
        info!("registered detector {}", detector.id());
        self.detectors.push(detector);
    }

    pub fn detector_count(&self) -> usize {
        self.detectors.len()
    }

    /// Run every detector and return up to `max_results` opportunities whose
    /// profit after gas clears `min_profit_wei`, ordered by expected profit
    /// descending.
    pub async fn discover(
        &self,
        max_results: usize,
        min_profit_wei: U256,
        market: Arc<MarketCondition>,
        filters: Option<DiscoveryFilters>,
    ) -> Vec<Opportunity> {
        if self.detectors.is_empty() {
            return Vec::new();
        }

        let pools = match self.pool_snapshot().await {
            Ok(pools) => pools,
            Err(e) => {
                warn!("pool snapshot unavailable, skipping discovery run: {e:#}");
                return Vec::new();
            }
        };

        let ctx = Arc::new(DetectionContext {
            pools,
            market,
            filters: filters.unwrap_or_default(),
        });

        let deadline =
            tokio::time::Instant::now() + Duration::from_secs(self.config.run_timeout_seconds);
        let mut join_set = JoinSet::new();

        for detector in &self.detectors {
            let detector = detector.clone();
            let ctx = ctx.clone();
            let semaphore = self.semaphore.clone();

            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let id = detector.id().to_string();
                match detector.detect(&ctx).await {
                    Ok(found) => {
                        debug!("detector {id} produced {} candidates", found.len());
                        found
                    }
                    Err(e) => {
                        // Isolated failure: this detector contributes nothing.
                        warn!("detector {id} failed: {e:#}");
                        Vec::new()
                    }
                }
            });
        }

        let mut merged: Vec<Opportunity> = Vec::new();
        loop {
            let next = tokio::time::timeout_at(deadline, join_set.join_next()).await;
            match next {
                Ok(Some(Ok(found))) => merged.extend(found),
                Ok(Some(Err(e))) => warn!("detector task panicked: {e}"),
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        "discovery window of {}s elapsed, cancelling {} straggler(s)",
                        self.config.run_timeout_seconds,
                        join_set.len()
                    );
                    join_set.abort_all();
                    break;
                }
            }
        }

        Self::merge(merged, max_results, min_profit_wei)
    }

    /// Deterministic merge: profit desc, then detector id, then opportunity id.
    fn merge(
        mut opportunities: Vec<Opportunity>,
        max_results: usize,
        min_profit_wei: U256,
    ) -> Vec<Opportunity> {
        opportunities.retain(|opp| {
            !opp.expected_profit_wei.is_zero()
                && opp.expected_profit_after_gas()
                    >= ethers::types::I256::try_from(min_profit_wei)
                        .unwrap_or(ethers::types::I256::MAX)
        });
        opportunities.sort_by(|a, b| {
            b.expected_profit_wei
                .cmp(&a.expected_profit_wei)
                .then_with(|| a.detector_id.cmp(&b.detector_id))
                .then_with(|| a.id.cmp(&b.id))
        });
        opportunities.truncate(max_results);
        opportunities
    }

    async fn pool_snapshot(&self) -> anyhow::Result<Arc<Vec<PoolInfo>>> {
        if let Some(hit) = self.pool_cache.get(&"pools") {
            return Ok(hit);
        }
        let pools = Arc::new(self.pool_source.pools().await?);
        self.pool_cache.insert("pools", pools.clone());
        Ok(pools)
    }
}
