//! Strategy selection: mapping a validated opportunity to an execution plan.
//!
//! Precedence, first match wins:
//!
//! | Condition | Plan |
//! |---|---|
//! | Route length <= 1 | direct swap |
//! | Two legs across venues, capital available | cross-venue direct |
//! | Capital short of input, flash loan viable | flash loan |
//! | More than two legs with explicit split allocations | multi path |
//! | `custom_strategy_params` metadata present | custom |

use std::sync::Arc;

use ethers::types::U256;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::debug;

use arb_config::ExecutionConfig;
use arb_types::Opportunity;

use crate::chain::{ChainClient, ChainError};
use crate::flash_loan::ProviderRegistry;

/// Metadata key holding caller-supplied parameters for a custom strategy.
pub const CUSTOM_PARAMS_KEY: &str = "custom_strategy_params";
/// Metadata key holding comma-separated wei allocations for multi-path
/// splitting. Allocation is an input of the strategy, never derived here.
pub const MULTI_PATH_ALLOCATIONS_KEY: &str = "multi_path_allocations";

/// Enumerated execution knobs attached to a selected strategy.
#[derive(Debug, Clone)]
pub struct ExecutionStrategy {
    pub use_flashbots: bool,
    pub priority_fee_wei: Option<U256>,
    pub slippage_override: Option<Decimal>,
    /// Bundle target offset from the current block, in [1, 8].
    pub blocks_into_future: u64,
    pub wait_for_receipt: bool,
    pub deadline_unix: Option<u64>,
    pub min_profit_threshold_wei: U256,
}

impl Default for ExecutionStrategy {
    fn default() -> Self {
        Self {
            use_flashbots: false,
            priority_fee_wei: None,
            slippage_override: None,
            blocks_into_future: 2,
            wait_for_receipt: false,
            deadline_unix: None,
            min_profit_threshold_wei: U256::zero(),
        }
    }
}

/// The shape of the execution the planner chose.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionPlan {
    /// Single swap, wallet capital.
    DirectSwap,
    /// Two legs across venues, wallet capital.
    CrossVenueDirect,
    /// Flash-loan entry, swaps inside the callback, repayment at settlement.
    FlashLoan { provider: String },
    /// Capital split across parallel cycles; allocations are required input.
    MultiPath { allocations: Vec<U256> },
    /// Caller-defined behavior keyed by opaque parameters.
    Custom { params: String },
}

impl ExecutionPlan {
    pub fn id(&self) -> &'static str {
        match self {
            Self::DirectSwap => "direct_swap",
            Self::CrossVenueDirect => "cross_venue_direct",
            Self::FlashLoan { .. } => "flash_loan",
            Self::MultiPath { .. } => "multi_path",
            Self::Custom { .. } => "custom",
        }
    }
}

/// A plan plus its knobs, ready for the executor.
#[derive(Debug, Clone)]
pub struct SelectedStrategy {
    pub plan: ExecutionPlan,
    pub strategy: ExecutionStrategy,
}

#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("multi-path route has no allocations; splitting is a required input")]
    MissingAllocations,

    #[error("allocations {allocated} wei do not cover route input {required} wei")]
    AllocationMismatch { allocated: U256, required: U256 },

    #[error("no viable strategy: {0}")]
    NoViableStrategy(String),

    #[error(transparent)]
    Chain(#[from] ChainError),
}

/// Chooses an execution plan for validated opportunities.
pub struct StrategySelector {
    chain: Arc<dyn ChainClient>,
    providers: Arc<ProviderRegistry>,
    wallet_address: ethers::types::Address,
    config: ExecutionConfig,
}

impl StrategySelector {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        providers: Arc<ProviderRegistry>,
        wallet_address: ethers::types::Address,
        config: ExecutionConfig,
    ) -> Self {
        Self {
            chain,
            providers,
            wallet_address,
            config,
        }
    }

    fn base_strategy(&self) -> ExecutionStrategy {
        ExecutionStrategy {
            use_flashbots: self.config.enable_flashbots,
            blocks_into_future: self.config.blocks_into_future,
            wait_for_receipt: self.config.wait_for_receipt,
            ..ExecutionStrategy::default()
        }
    }

    /// Apply the precedence table.
    pub async fn select(&self, opportunity: &Opportunity) -> Result<SelectedStrategy, StrategyError> {
        let strategy = self.base_strategy();
        let route_len = opportunity.route.len();

        if route_len <= 1 {
            return Ok(SelectedStrategy {
                plan: ExecutionPlan::DirectSwap,
                strategy,
            });
        }

        let input_token = opportunity
            .route
            .input_token()
            .expect("validated route has steps");
        let balance = self
            .chain
            .erc20_balance(input_token.address, self.wallet_address)
            .await?;
        let capital_available = balance >= opportunity.input_wei;

        let distinct_venues = opportunity.route.venues().len();
        if route_len == 2 && distinct_venues >= 2 && capital_available {
            return Ok(SelectedStrategy {
                plan: ExecutionPlan::CrossVenueDirect,
                strategy,
            });
        }

        if (!capital_available || opportunity.flash_loan_required)
            && self
                .providers
                .any_viable(input_token.address, opportunity.input_wei)
                .await
        {
            // Pick now so execution can assemble the entry leg directly.
            let request = arb_types::FlashLoanRequest {
                token_amounts: vec![arb_types::TokenAmount::new(
                    input_token.clone(),
                    opportunity.input_wei,
                )],
                receiver: self.wallet_address,
                callback_data: ethers::types::Bytes::new(),
                deadline_unix: 0,
                max_fee_wei: None,
                slippage_tolerance: Decimal::ZERO,
            };
            let provider = self
                .providers
                .select(&request)
                .await
                .map_err(|e| StrategyError::NoViableStrategy(e.to_string()))?;
            debug!(
                "opportunity {} routed through flash loan provider {}",
                opportunity.id,
                provider.name()
            );
            return Ok(SelectedStrategy {
                plan: ExecutionPlan::FlashLoan {
                    provider: provider.name().to_string(),
                },
                strategy,
            });
        }

        if route_len > 2 {
            if let Some(raw) = opportunity.metadata.get(MULTI_PATH_ALLOCATIONS_KEY) {
                let allocations = parse_allocations(raw)?;
                let total = allocations
                    .iter()
                    .fold(U256::zero(), |acc, a| acc.saturating_add(*a));
                if total < opportunity.input_wei {
                    return Err(StrategyError::AllocationMismatch {
                        allocated: total,
                        required: opportunity.input_wei,
                    });
                }
                return Ok(SelectedStrategy {
                    plan: ExecutionPlan::MultiPath { allocations },
                    strategy,
                });
            }
        }

        if let Some(params) = opportunity.metadata.get(CUSTOM_PARAMS_KEY) {
            return Ok(SelectedStrategy {
                plan: ExecutionPlan::Custom {
                    params: params.clone(),
                },
                strategy,
            });
        }

        if capital_available {
            // Multi-leg cycle funded from the wallet: run it as a direct
            // sequential bundle.
            return Ok(SelectedStrategy {
                plan: ExecutionPlan::CrossVenueDirect,
                strategy,
            });
        }

        Err(StrategyError::NoViableStrategy(format!(
            "insufficient balance {balance} for input {} and no flash loan source",
            opportunity.input_wei
        )))
    }
}

fn parse_allocations(raw: &str) -> Result<Vec<U256>, StrategyError> {
    let parts: Result<Vec<U256>, _> = raw
        .split(',')
        .map(|s| U256::from_dec_str(s.trim()))
        .collect();
    match parts {
        Ok(list) if !list.is_empty() => Ok(list),
        _ => Err(StrategyError::MissingAllocations),
    }
}
