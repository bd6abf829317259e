//! Market condition snapshots shared across the pipeline.

use chrono::{DateTime, Utc};
use ethers::types::{Address, U256};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Immutable snapshot of the market, produced by one refresh tick.
///
/// Prices are USD per whole token unit; liquidity levels are normalized pool
/// depth in [0, 1] relative to each pool's recent maximum.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketCondition {
    pub timestamp: DateTime<Utc>,
    pub prices: BTreeMap<Address, Decimal>,
    pub liquidity_levels: BTreeMap<Address, Decimal>,
    pub gas_price_wei: U256,
    pub priority_fee_wei: U256,
    pub base_fee_wei: U256,
    /// Network congestion in [0, 1].
    pub network_congestion: Decimal,
    /// Short-horizon volatility in [0, 1].
    pub volatility_index: Decimal,
    pub eth_price_usd: Option<Decimal>,
}

impl MarketCondition {
    /// An empty snapshot for startup, before the first refresh lands.
    pub fn empty(now: DateTime<Utc>) -> Self {
        Self {
            timestamp: now,
            prices: BTreeMap::new(),
            liquidity_levels: BTreeMap::new(),
            gas_price_wei: U256::zero(),
            priority_fee_wei: U256::zero(),
            base_fee_wei: U256::zero(),
            network_congestion: Decimal::ZERO,
            volatility_index: Decimal::ZERO,
            eth_price_usd: None,
        }
    }

    pub fn price_of(&self, token: Address) -> Option<Decimal> {
        self.prices.get(&token).copied()
    }

    pub fn liquidity_level(&self, pool: Address) -> Option<Decimal> {
        self.liquidity_levels.get(&pool).copied()
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.timestamp
    }
}
