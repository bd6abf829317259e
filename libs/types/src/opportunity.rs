//! Discovered arbitrage opportunities.

use chrono::{DateTime, Utc};
use ethers::types::{I256, U256};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::route::Route;

/// Metadata key set by validators when an opportunity is rejected.
pub const REJECTION_REASON_KEY: &str = "rejection_reason";
/// Metadata key holding the terminal validation state (`PASSED` / `REJECTED`).
pub const VALIDATION_STATUS_KEY: &str = "validation_status";

/// The shape of an arbitrage strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    CrossVenue,
    Triangular,
    MultiPath,
    FlashLoan,
    Custom,
}

impl StrategyKind {
    /// Map the legacy string spellings used at external boundaries.
    pub fn from_legacy(s: &str) -> Option<Self> {
        match s {
            "cross_dex" | "cross_venue" => Some(Self::CrossVenue),
            "triangular" => Some(Self::Triangular),
            "multi_path" => Some(Self::MultiPath),
            "flash_loan" => Some(Self::FlashLoan),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CrossVenue => "cross_venue",
            Self::Triangular => "triangular",
            Self::MultiPath => "multi_path",
            Self::FlashLoan => "flash_loan",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A candidate trade cycle with its projected economics.
///
/// Created by exactly one detector, annotated (metadata only) by validators,
/// then either discarded, cached, or consumed by one execution attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: Uuid,
    pub strategy: StrategyKind,
    /// Detector that produced this opportunity; part of the deterministic
    /// discovery sort key.
    pub detector_id: String,
    pub route: Route,
    pub input_wei: U256,
    pub expected_output_wei: U256,
    pub expected_profit_wei: U256,
    pub gas_estimate: u64,
    pub gas_price_wei: U256,
    pub priority_fee_wei: U256,
    /// Advisory confidence in [0, 1]; binding constraints are validator checks.
    pub confidence: Decimal,
    pub flash_loan_required: bool,
    pub discovered_at: DateTime<Utc>,
    pub metadata: BTreeMap<String, String>,
}

impl Opportunity {
    /// Projected total gas cost in wei: `gas * (gas_price + priority_fee)`.
    pub fn gas_cost_wei(&self) -> U256 {
        U256::from(self.gas_estimate)
            .saturating_mul(self.gas_price_wei.saturating_add(self.priority_fee_wei))
    }

    /// Expected profit after gas, signed: gas may exceed the raw edge.
    pub fn expected_profit_after_gas(&self) -> I256 {
        let profit = I256::try_from(self.expected_profit_wei).unwrap_or(I256::MAX);
        let gas = I256::try_from(self.gas_cost_wei()).unwrap_or(I256::MAX);
        profit.saturating_sub(gas)
    }

    pub fn is_profitable_after_gas(&self) -> bool {
        self.expected_profit_after_gas() > I256::zero()
    }

    /// Profit relative to input, in basis points; zero for zero input.
    pub fn profit_margin_bps(&self) -> u32 {
        if self.input_wei.is_zero() {
            return 0;
        }
        let scaled = self
            .expected_profit_wei
            .saturating_mul(U256::from(crate::BPS_DENOMINATOR));
        (scaled / self.input_wei).try_into().unwrap_or(u32::MAX)
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.discovered_at
    }

    pub fn is_rejected(&self) -> bool {
        self.metadata
            .get(VALIDATION_STATUS_KEY)
            .map(|s| s == "REJECTED")
            .unwrap_or(false)
    }

    pub fn rejection_reason(&self) -> Option<&str> {
        self.metadata.get(REJECTION_REASON_KEY).map(String::as_str)
    }

    /// Record a validator rejection; first reason wins.
    pub fn reject(&mut self, reason: impl Into<String>) {
        self.metadata
            .insert(VALIDATION_STATUS_KEY.into(), "REJECTED".into());
        self.metadata
            .entry(REJECTION_REASON_KEY.into())
            .or_insert_with(|| reason.into());
    }
}

impl fmt::Display for Opportunity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} route={} profit={} wei",
            self.strategy, self.id, self.route, self.expected_profit_wei
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{PoolInfo, PoolKind};
    use crate::route::TradeStep;
    use crate::token::{Token, VenueId};
    use ethers::types::Address;
    use rust_decimal_macros::dec;

    fn sample_route() -> Route {
        let a = Token::new(Address::repeat_byte(1), None, 18).unwrap();
        let b = Token::new(Address::repeat_byte(2), None, 18).unwrap();
        let pool = PoolInfo {
            pool_address: Address::repeat_byte(3),
            venue: VenueId::from("v"),
            tokens: vec![a.clone(), b.clone()],
            fee_bps: 30,
            kind: PoolKind::ConstantProduct {
                reserve0: U256::from(1000u64),
                reserve1: U256::from(1000u64),
            },
        };
        Route::new(vec![TradeStep {
            pool,
            token_in: a,
            token_out: b,
            expected_out_wei: U256::from(100u64),
            min_out_wei: U256::from(99u64),
            max_slippage: dec!(0.005),
        }])
    }

    fn sample(profit: u64, gas: u64, gas_price: u64) -> Opportunity {
        Opportunity {
            id: Uuid::new_v4(),
            strategy: StrategyKind::CrossVenue,
            detector_id: "cross_venue".into(),
            route: sample_route(),
            input_wei: U256::exp10(18),
            expected_output_wei: U256::exp10(18) + U256::from(profit),
            expected_profit_wei: U256::from(profit),
            gas_estimate: gas,
            gas_price_wei: U256::from(gas_price),
            priority_fee_wei: U256::zero(),
            confidence: dec!(0.9),
            flash_loan_required: false,
            discovered_at: Utc::now(),
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn profit_after_gas_goes_negative() {
        // 1e14 profit against 3e14 projected gas cost.
        let opp = sample(100_000_000_000_000, 200_000, 1_500_000_000);
        assert!(opp.expected_profit_after_gas() < I256::zero());
        assert!(!opp.is_profitable_after_gas());
    }

    #[test]
    fn profit_after_gas_positive_case() {
        let opp = sample(1_000_000_000_000_000, 100_000, 1_000_000_000);
        assert_eq!(
            opp.expected_profit_after_gas(),
            I256::from(1_000_000_000_000_000i64 - 100_000i64 * 1_000_000_000i64)
        );
    }

    #[test]
    fn first_rejection_reason_wins() {
        let mut opp = sample(1, 1, 1);
        opp.reject("Excessive slippage: 2% > 0.5%");
        opp.reject("later reason");
        assert!(opp.is_rejected());
        assert_eq!(
            opp.rejection_reason(),
            Some("Excessive slippage: 2% > 0.5%")
        );
    }

    #[test]
    fn legacy_strategy_strings_map() {
        assert_eq!(
            StrategyKind::from_legacy("cross_dex"),
            Some(StrategyKind::CrossVenue)
        );
        assert_eq!(
            StrategyKind::from_legacy("flash_loan"),
            Some(StrategyKind::FlashLoan)
        );
        assert_eq!(StrategyKind::from_legacy("orderbook"), None);
    }

    #[test]
    fn margin_is_in_basis_points() {
        let mut opp = sample(0, 1, 1);
        opp.input_wei = U256::from(10_000u64);
        opp.expected_profit_wei = U256::from(25u64);
        assert_eq!(opp.profit_margin_bps(), 25);
    }
}
