//! Error taxonomy shared across the engine.
//!
//! Kinds, not component-private types: detectors and validators translate
//! their internal failures into per-opportunity rejections; execution
//! translates transport failures into `SubmissionFailed`; only configuration
//! and key-material errors propagate to the supervisor.

use ethers::types::H256;
use thiserror::Error;

/// The engine-wide error taxonomy.
#[derive(Debug, Error)]
pub enum ArbError {
    /// Invalid or missing configuration; fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// Insufficient pool depth or flash loan capacity.
    #[error("no liquidity: {0}")]
    NoLiquidity(String),

    /// Price or quote age exceeded its bound.
    #[error("stale data: {0}")]
    StaleData(String),

    /// Projected or simulated profit at or below threshold.
    #[error("unprofitable: {0}")]
    Unprofitable(String),

    /// Relay or chain simulation reported a revert.
    #[error("simulation failed: {0}")]
    SimulationFailed(String),

    /// Transport or relay refused the bundle or transaction.
    #[error("submission failed: {0}")]
    SubmissionFailed(String),

    /// Transaction mined with status 0.
    #[error("reverted: tx {tx_hash:?} used {gas_used} gas")]
    Reverted { tx_hash: H256, gas_used: u64 },

    /// Inclusion or receipt window exceeded.
    #[error("timeout: {0}")]
    Timeout(String),

    /// A previously seen block number regressed.
    #[error("chain reorg detected at block {observed}, previously saw {seen}")]
    ChainReorg { seen: u64, observed: u64 },

    /// Operator or supervisory cancellation; terminal, non-fatal.
    #[error("cancelled")]
    Cancelled,

    /// Signer unavailable, RPC persistently unreachable, or similar;
    /// propagates to the supervisor.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl ArbError {
    /// Whether the error rejects a single opportunity rather than an
    /// execution or the whole system.
    pub fn is_opportunity_reject(&self) -> bool {
        matches!(
            self,
            Self::NoLiquidity(_)
                | Self::StaleData(_)
                | Self::Unprofitable(_)
                | Self::SimulationFailed(_)
        )
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Fatal(_))
    }
}

/// Why a validator rejected an opportunity; carried in opportunity metadata
/// as a human-readable string and in results as a typed reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectionReason {
    ExcessiveSlippage,
    InsufficientLiquidity,
    ExcessivePriceImpact,
    ExcessiveGasCosts,
    UnsafeToken,
    StalePrice,
    ManipulationRisk,
    SimulationUnprofitable,
    ValidatorTimeout,
    Other(String),
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ExcessiveSlippage => f.write_str("Excessive slippage"),
            Self::InsufficientLiquidity => f.write_str("Insufficient liquidity"),
            Self::ExcessivePriceImpact => f.write_str("Excessive price impact"),
            Self::ExcessiveGasCosts => f.write_str("Excessive gas costs"),
            Self::UnsafeToken => f.write_str("Blacklisted token"),
            Self::StalePrice => f.write_str("Stale price data"),
            Self::ManipulationRisk => f.write_str("Price manipulation risk"),
            Self::SimulationUnprofitable => {
                f.write_str("Simulated profit is not positive after slippage/fees")
            }
            Self::ValidatorTimeout => f.write_str("Validation timed out"),
            Self::Other(s) => f.write_str(s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(ArbError::Unprofitable("x".into()).is_opportunity_reject());
        assert!(ArbError::StaleData("x".into()).is_opportunity_reject());
        assert!(!ArbError::SubmissionFailed("x".into()).is_opportunity_reject());
        assert!(ArbError::Config("x".into()).is_fatal());
        assert!(!ArbError::Cancelled.is_fatal());
    }

    #[test]
    fn rejection_reason_strings_match_metadata_conventions() {
        assert_eq!(
            RejectionReason::ExcessiveGasCosts.to_string(),
            "Excessive gas costs"
        );
        assert_eq!(
            RejectionReason::SimulationUnprofitable.to_string(),
            "Simulated profit is not positive after slippage/fees"
        );
    }
}
