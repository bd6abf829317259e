//! # Market Data Feed - Shared Snapshot Fabric
//!
//! ## Purpose
//!
//! Polls upstream pricing and gas sources on a fixed cadence, builds an
//! immutable [`MarketCondition`] per tick, atomically swaps it into the
//! shared snapshot slot, and fans the new snapshot out to every subscriber.
//! Refreshes never overlap: the loop awaits each upstream call in turn, so a
//! slow source delays the next tick instead of stacking requests. A failed
//! refresh logs and leaves the previous snapshot valid.
//!
//! ## Integration Points
//!
//! - **Input Sources**: gas fields via [`ChainClient`], USD prices and
//!   normalized liquidity via a [`PriceSource`]
//! - **Output Destinations**: discovery, validation, strategy, and execution
//!   all read `current()`; the discovery loop subscribes for event-driven
//!   re-runs
//! - **Cancellation**: `stop()` signals the refresh task through a watch
//!   channel, awaits completion, and drops subscriptions

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use ethers::types::Address;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use arb_types::MarketCondition;

use crate::chain::ChainClient;

const SUBSCRIBER_CHANNEL_CAPACITY: usize = 64;

/// One pull from the upstream pricing source.
#[derive(Debug, Clone, Default)]
pub struct PriceSnapshot {
    pub prices: BTreeMap<Address, Decimal>,
    pub liquidity_levels: BTreeMap<Address, Decimal>,
    pub volatility_index: Decimal,
    pub eth_price_usd: Option<Decimal>,
}

/// Upstream source of USD prices and pool liquidity levels.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn fetch(&self) -> anyhow::Result<PriceSnapshot>;
}

/// Fixed price source for tests and offline runs.
pub struct StaticPriceSource {
    snapshot: RwLock<PriceSnapshot>,
}

impl StaticPriceSource {
    pub fn new(snapshot: PriceSnapshot) -> Self {
        Self {
            snapshot: RwLock::new(snapshot),
        }
    }

    pub fn update(&self, snapshot: PriceSnapshot) {
        *self.snapshot.write() = snapshot;
    }
}

#[async_trait]
impl PriceSource for StaticPriceSource {
    async fn fetch(&self) -> anyhow::Result<PriceSnapshot> {
        Ok(self.snapshot.read().clone())
    }
}

/// Shared market snapshot with background refresh.
pub struct MarketDataFeed {
    chain: Arc<dyn ChainClient>,
    price_source: Arc<dyn PriceSource>,
    snapshot: Arc<RwLock<Arc<MarketCondition>>>,
    updates: broadcast::Sender<Arc<MarketCondition>>,
    shutdown: RwLock<Option<watch::Sender<bool>>>,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl MarketDataFeed {
    pub fn new(chain: Arc<dyn ChainClient>, price_source: Arc<dyn PriceSource>) -> Self {
        let (updates, _) = broadcast::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        Self {
            chain,
            price_source,
            snapshot: Arc::new(RwLock::new(Arc::new(MarketCondition::empty(Utc::now())))),
            updates,
            shutdown: RwLock::new(None),
            task: tokio::sync::Mutex::new(None),
        }
    }

    /// Current snapshot; cheap clone of the Arc.
    pub fn current(&self) -> Arc<MarketCondition> {
        self.snapshot.read().clone()
    }

    /// Receive every future snapshot, FIFO per subscriber.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<MarketCondition>> {
        self.updates.subscribe()
    }

    /// Run one refresh immediately, outside the background loop.
    pub async fn refresh_once(&self) -> anyhow::Result<Arc<MarketCondition>> {
        let condition = Self::build_snapshot(&*self.chain, &*self.price_source).await?;
        let condition = Arc::new(condition);
        *self.snapshot.write() = condition.clone();
        let _ = self.updates.send(condition.clone());
        Ok(condition)
    }

    /// Start the background refresh loop; idempotent.
    pub async fn start(&self, refresh_interval: std::time::Duration) {
        let mut task = self.task.lock().await;
        if task.is_some() {
            debug!("market data feed already running");
            return;
        }

        let (tx, mut rx) = watch::channel(false);
        *self.shutdown.write() = Some(tx);

        let chain = self.chain.clone();
        let price_source = self.price_source.clone();
        let snapshot = self.snapshot.clone();
        let updates = self.updates.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(refresh_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match Self::build_snapshot(&*chain, &*price_source).await {
                            Ok(condition) => {
                                let condition = Arc::new(condition);
                                *snapshot.write() = condition.clone();
                                let _ = updates.send(condition);
                            }
                            Err(e) => {
                                // Previous snapshot stays valid.
                                warn!("market data refresh failed: {e:#}");
                            }
                        }
                    }
                    _ = rx.changed() => {
                        if *rx.borrow() {
                            debug!("market data refresh loop stopping");
                            break;
                        }
                    }
                }
            }
        });

        *task = Some(handle);
        info!("📡 Market data feed started, interval {refresh_interval:?}");
    }

    /// Stop the refresh loop and await it; idempotent.
    pub async fn stop(&self) {
        if let Some(tx) = self.shutdown.write().take() {
            let _ = tx.send(true);
        }
        if let Some(handle) = self.task.lock().await.take() {
            let _ = handle.await;
        }
        info!("market data feed stopped");
    }

    async fn build_snapshot(
        chain: &dyn ChainClient,
        price_source: &dyn PriceSource,
    ) -> anyhow::Result<MarketCondition> {
        let gas_price_wei = chain.gas_price().await?;
        let base_fee_wei = chain.base_fee().await?;
        let priority_fee_wei = chain.priority_fee().await?;
        let prices = price_source.fetch().await?;

        // Congestion proxy: how far the market clears above the base fee.
        let network_congestion = if base_fee_wei.is_zero() {
            Decimal::ZERO
        } else {
            let over = gas_price_wei.saturating_sub(base_fee_wei);
            let step = (base_fee_wei / 100).max(ethers::types::U256::one());
            let pct = (over / step).min(ethers::types::U256::from(100u8)).as_u64();
            Decimal::from(pct) / Decimal::from(100u32)
        };

        Ok(MarketCondition {
            timestamp: Utc::now(),
            prices: prices.prices,
            liquidity_levels: prices.liquidity_levels,
            gas_price_wei,
            priority_fee_wei,
            base_fee_wei,
            network_congestion,
            volatility_index: prices.volatility_index.clamp(Decimal::ZERO, Decimal::ONE),
            eth_price_usd: prices.eth_price_usd,
        })
    }
}
