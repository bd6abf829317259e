//! # Arbitrage System - Top-Level Composition
//!
//! ## Purpose
//!
//! Owns the supervised discovery loop and wires the pipeline end to end:
//! discover on every tick or market update, validate, optionally execute
//! when auto-execution is on and confidence clears the configured floor,
//! and hand terminal results to analytics, the bounded caches, and any
//! registered sinks. Every iteration failure is caught, logged, and followed
//! by a back-off sleep; the loop never dies to a per-opportunity error.
//!
//! ## State
//!
//! Stateless across restarts except the bounded opportunity and execution
//! caches, which hold immutable snapshots keyed by id and evict oldest-first
//! on insertion once full.
//!
//! ## Cancellation
//!
//! `stop()` signals the loop, awaits it (swallowing join errors), stops the
//! market data feed, and drops the caches. Idempotent.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use ethers::types::U256;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use arb_config::EngineConfig;
use arb_types::{ExecutionResult, Opportunity};

use crate::analytics::{Analytics, StatsSnapshot};
use crate::discovery::DiscoveryManager;
use crate::execution::Executor;
use crate::market_data::MarketDataFeed;
use crate::strategy::StrategySelector;
use crate::tracker::TransactionTracker;
use crate::validation::ValidationPipeline;

/// Back-off after a failed loop iteration.
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// External persistence hooks; the core never persists anything itself.
pub type OpportunitySink = Arc<dyn Fn(&Opportunity) + Send + Sync>;
pub type ExecutionSink = Arc<dyn Fn(&ExecutionResult) + Send + Sync>;

/// Insertion-ordered bounded cache; evicts oldest entries once full.
struct BoundedCache<V> {
    capacity: usize,
    order: VecDeque<Uuid>,
    entries: HashMap<Uuid, V>,
}

impl<V: Clone> BoundedCache<V> {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            entries: HashMap::new(),
        }
    }

    fn insert(&mut self, id: Uuid, value: V) {
        if self.entries.insert(id, value).is_none() {
            self.order.push_back(id);
        }
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.entries.remove(&evicted);
            }
        }
    }

    fn get(&self, id: &Uuid) -> Option<V> {
        self.entries.get(id).cloned()
    }

    fn recent(&self, count: usize) -> Vec<V> {
        self.order
            .iter()
            .rev()
            .take(count)
            .filter_map(|id| self.entries.get(id).cloned())
            .collect()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn clear(&mut self) {
        self.order.clear();
        self.entries.clear();
    }
}

/// The composed pipeline.
pub struct ArbitrageSystem {
    market: Arc<MarketDataFeed>,
    discovery: Arc<DiscoveryManager>,
    validation: Arc<ValidationPipeline>,
    selector: Arc<StrategySelector>,
    executor: Arc<Executor>,
    tracker: Arc<TransactionTracker>,
    analytics: Arc<Analytics>,
    config: EngineConfig,

    opportunities: Arc<Mutex<BoundedCache<Opportunity>>>,
    executions: Arc<Mutex<BoundedCache<ExecutionResult>>>,
    opportunity_sinks: Vec<OpportunitySink>,
    execution_sinks: Vec<ExecutionSink>,

    shutdown: Mutex<Option<watch::Sender<bool>>>,
    loop_task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ArbitrageSystem {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        market: Arc<MarketDataFeed>,
        discovery: Arc<DiscoveryManager>,
        validation: Arc<ValidationPipeline>,
        selector: Arc<StrategySelector>,
        executor: Arc<Executor>,
        tracker: Arc<TransactionTracker>,
        config: EngineConfig,
    ) -> Self {
        let opportunity_capacity = config.discovery.max_opportunities.max(1000);
        Self {
            market,
            discovery,
            validation,
            selector,
            executor,
            tracker,
            analytics: Arc::new(Analytics::new()),
            opportunities: Arc::new(Mutex::new(BoundedCache::new(opportunity_capacity))),
            executions: Arc::new(Mutex::new(BoundedCache::new(1000))),
            opportunity_sinks: Vec::new(),
            execution_sinks: Vec::new(),
            config,
            shutdown: Mutex::new(None),
            loop_task: tokio::sync::Mutex::new(None),
        }
    }

    /// Register an external opportunity sink (persistence is external).
    pub fn add_opportunity_sink(&mut self, sink: OpportunitySink) {
        self.opportunity_sinks.push(sink);
    }

    pub fn add_execution_sink(&mut self, sink: ExecutionSink) {
        self.execution_sinks.push(sink);
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.analytics.snapshot()
    }

    pub fn tracker(&self) -> Arc<TransactionTracker> {
        self.tracker.clone()
    }

    pub fn cached_opportunity(&self, id: &Uuid) -> Option<Opportunity> {
        self.opportunities.lock().get(id)
    }

    pub fn recent_opportunities(&self, count: usize) -> Vec<Opportunity> {
        self.opportunities.lock().recent(count)
    }

    pub fn execution_history(&self, count: usize) -> Vec<ExecutionResult> {
        self.executions.lock().recent(count)
    }

    pub fn cancel_execution(&self, id: Uuid) {
        self.executor.cancel(id);
    }

    /// One pipeline iteration: discover, validate, optionally execute.
    /// Returns the validated opportunities of this pass.
    pub async fn run_once(&self) -> Vec<Opportunity> {
        let market = self.market.current();
        let discovered = self
            .discovery
            .discover(
                self.config.discovery.max_opportunities,
                U256::from(self.config.discovery.min_profit_wei),
                market.clone(),
                None,
            )
            .await;

        let expected_total = discovered
            .iter()
            .fold(U256::zero(), |acc, o| acc.saturating_add(o.expected_profit_wei));
        self.analytics.record_discovered(discovered.len(), expected_total);
        debug!("discovery pass produced {} candidates", discovered.len());

        let mut validated = Vec::new();
        for opportunity in discovered {
            let opportunity = self.validation.validate(opportunity, &market).await;

            self.opportunities
                .lock()
                .insert(opportunity.id, opportunity.clone());
            for sink in &self.opportunity_sinks {
                sink(&opportunity);
            }

            if opportunity.is_rejected() {
                self.analytics.record_rejected();
                debug!(
                    "opportunity {} rejected: {}",
                    opportunity.id,
                    opportunity.rejection_reason().unwrap_or("unspecified")
                );
                continue;
            }
            self.analytics.record_validated();

            if self.config.execution.auto_execute
                && opportunity.confidence >= self.config.execution.min_confidence_score
            {
                self.execute_one(&opportunity).await;
            }

            validated.push(opportunity);
        }

        validated
    }

    /// Select a strategy and run one execution attempt; the result always
    /// lands in history and sinks, terminal or not.
    async fn execute_one(&self, opportunity: &Opportunity) {
        let market = self.market.current();
        let selected = match self.selector.select(opportunity).await {
            Ok(selected) => selected,
            Err(e) => {
                warn!("strategy selection failed for {}: {e}", opportunity.id);
                return;
            }
        };

        info!(
            "executing {} via {} (confidence {})",
            opportunity.id,
            selected.plan.id(),
            opportunity.confidence
        );
        let result = self.executor.execute(opportunity, &selected, &market).await;

        self.analytics.record_execution(&result);
        self.executions.lock().insert(result.id, result.clone());
        for sink in &self.execution_sinks {
            sink(&result);
        }
    }

    /// Start the supervised discovery loop; idempotent.
    pub async fn start(self: &Arc<Self>) {
        let mut task = self.loop_task.lock().await;
        if task.is_some() {
            debug!("arbitrage system already running");
            return;
        }

        self.market
            .start(Duration::from_secs(
                self.config.market_data.refresh_interval_seconds,
            ))
            .await;

        let (tx, mut rx) = watch::channel(false);
        *self.shutdown.lock() = Some(tx);

        let system = self.clone();
        let interval = Duration::from_secs(self.config.discovery.discovery_interval_seconds);
        let handle = tokio::spawn(async move {
            let mut market_updates = system.market.subscribe();
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    update = market_updates.recv() => {
                        match update {
                            Ok(_) => debug!("market update triggered discovery pass"),
                            Err(_) => { /* lagged or closed; the ticker still drives */ }
                        }
                    }
                    _ = rx.changed() => {
                        if *rx.borrow() {
                            info!("discovery loop stopping");
                            break;
                        }
                    }
                }

                // The loop survives anything an iteration throws at it.
                let iteration = std::panic::AssertUnwindSafe(system.run_once());
                match futures::FutureExt::catch_unwind(iteration).await {
                    Ok(validated) => {
                        if !validated.is_empty() {
                            info!("{} opportunities validated this pass", validated.len());
                        }
                    }
                    Err(_) => {
                        error!("discovery iteration panicked; backing off");
                        tokio::time::sleep(ERROR_BACKOFF).await;
                    }
                }
            }
        });
        *task = Some(handle);
        info!("✅ Arbitrage system started");
    }

    /// Stop the loop, the market feed, and drop caches; idempotent.
    pub async fn stop(&self) {
        if let Some(tx) = self.shutdown.lock().take() {
            let _ = tx.send(true);
        }
        if let Some(handle) = self.loop_task.lock().await.take() {
            // Swallow join errors: a panicked loop must not poison shutdown.
            let _ = handle.await;
        }
        self.market.stop().await;
        self.opportunities.lock().clear();
        self.executions.lock().clear();
        info!("✅ Arbitrage system stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_cache_evicts_oldest_on_insert() {
        let mut cache: BoundedCache<u32> = BoundedCache::new(2);
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        cache.insert(a, 1);
        cache.insert(b, 2);
        cache.insert(c, 3);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&a), None);
        assert_eq!(cache.get(&b), Some(2));
        assert_eq!(cache.get(&c), Some(3));
    }

    #[test]
    fn bounded_cache_recent_is_newest_first() {
        let mut cache: BoundedCache<u32> = BoundedCache::new(10);
        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        for (i, id) in ids.iter().enumerate() {
            cache.insert(*id, i as u32);
        }
        assert_eq!(cache.recent(2), vec![2, 1]);
    }

    #[test]
    fn reinsert_does_not_duplicate_order() {
        let mut cache: BoundedCache<u32> = BoundedCache::new(2);
        let a = Uuid::new_v4();
        cache.insert(a, 1);
        cache.insert(a, 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&a), Some(2));
    }
}
