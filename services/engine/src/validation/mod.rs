//! # Opportunity Validation - Deterministic Filter Chain
//!
//! ## Purpose
//!
//! Applies the fixed validator chain to every discovered opportunity:
//! slippage, liquidity, price impact, gas economics, token safety, price
//! freshness, then simulation. The chain short-circuits on the first failure,
//! records the rejection reason in opportunity metadata, and clamps advisory
//! confidence to the weakest validator's score. A per-opportunity timeout
//! turns a hung validator into a deterministic rejection instead of an
//! unbounded wait.
//!
//! ## Integration Points
//!
//! - **Input Sources**: opportunities from discovery, market snapshot from
//!   the feed, pool state embedded in routes
//! - **Output Destinations**: strategy selection consumes validated
//!   opportunities; rejected ones carry `rejection_reason` metadata
//! - **Idempotence**: re-validating an already-validated opportunity is a
//!   no-op; metadata and status are stable

pub mod checks;

pub use checks::{
    GasEconomicsValidator, LiquidityValidator, PriceConsistencyValidator, PriceImpactValidator,
    SimulationValidator, SlippageValidator, TokenSafetyValidator,
};

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ethers::types::Address;
use rust_decimal::Decimal;
use tracing::{debug, warn};

use arb_config::ValidationConfig;
use arb_types::opportunity::{REJECTION_REASON_KEY, VALIDATION_STATUS_KEY};
use arb_types::{MarketCondition, Opportunity, RejectionReason};

/// Outcome of one validator.
#[derive(Debug, Clone)]
pub struct Verdict {
    pub passed: bool,
    /// Validator's confidence contribution in [0, 1]; the pipeline clamps the
    /// opportunity to the minimum across the chain.
    pub confidence: Decimal,
    pub reason: Option<String>,
}

impl Verdict {
    pub fn pass() -> Self {
        Self {
            passed: true,
            confidence: Decimal::ONE,
            reason: None,
        }
    }

    pub fn pass_with_confidence(confidence: Decimal) -> Self {
        Self {
            passed: true,
            confidence,
            reason: None,
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            confidence: Decimal::ZERO,
            reason: Some(reason.into()),
        }
    }
}

/// Shared state the validators read.
pub struct ValidationContext {
    pub config: ValidationConfig,
    pub blacklist: HashSet<Address>,
}

impl ValidationContext {
    pub fn new(config: ValidationConfig) -> Self {
        let blacklist = config.token_blacklist.iter().copied().collect();
        Self { config, blacklist }
    }
}

/// One check in the chain.
#[async_trait]
pub trait Validator: Send + Sync {
    fn name(&self) -> &'static str;
    async fn validate(
        &self,
        opportunity: &Opportunity,
        market: &MarketCondition,
        ctx: &ValidationContext,
    ) -> Verdict;
}

/// Runs the fixed validator chain with short-circuit and timeout.
pub struct ValidationPipeline {
    validators: Vec<Arc<dyn Validator>>,
    ctx: ValidationContext,
    timeout: Duration,
}

impl ValidationPipeline {
    /// The canonical chain in its fixed order.
    pub fn standard(config: ValidationConfig) -> Self {
        let timeout = Duration::from_secs(config.validation_timeout_seconds);
        let enable_simulation = config.enable_simulation;
        let mut validators: Vec<Arc<dyn Validator>> = vec![
            Arc::new(SlippageValidator),
            Arc::new(LiquidityValidator),
            Arc::new(PriceImpactValidator),
            Arc::new(GasEconomicsValidator),
            Arc::new(TokenSafetyValidator),
            Arc::new(PriceConsistencyValidator),
        ];
        if enable_simulation {
            validators.push(Arc::new(SimulationValidator));
        }
        Self {
            validators,
            ctx: ValidationContext::new(config),
            timeout,
        }
    }

    /// For tests: a custom chain.
    pub fn with_validators(config: ValidationConfig, validators: Vec<Arc<dyn Validator>>) -> Self {
        let timeout = Duration::from_secs(config.validation_timeout_seconds);
        Self {
            validators,
            ctx: ValidationContext::new(config),
            timeout,
        }
    }

    /// Run the chain. Annotates metadata; the first failure sets the terminal
    /// rejection. Idempotent on already-validated opportunities.
    pub async fn validate(
        &self,
        mut opportunity: Opportunity,
        market: &MarketCondition,
    ) -> Opportunity {
        if opportunity.is_rejected() {
            return opportunity;
        }
        if opportunity
            .metadata
            .get(VALIDATION_STATUS_KEY)
            .map(|s| s == "PASSED")
            .unwrap_or(false)
        {
            return opportunity;
        }

        let run = self.run_chain(&mut opportunity, market);
        match tokio::time::timeout(self.timeout, run).await {
            Ok(()) => opportunity,
            Err(_) => {
                warn!(
                    "validation of {} exceeded {:?}, rejecting",
                    opportunity.id, self.timeout
                );
                opportunity.reject(RejectionReason::ValidatorTimeout.to_string());
                opportunity
            }
        }
    }

    async fn run_chain(&self, opportunity: &mut Opportunity, market: &MarketCondition) {
        let mut min_confidence = opportunity.confidence;

        for validator in &self.validators {
            let verdict = validator.validate(opportunity, market, &self.ctx).await;
            if !verdict.passed {
                let reason = verdict
                    .reason
                    .unwrap_or_else(|| format!("{} check failed", validator.name()));
                debug!("{} rejected {}: {}", validator.name(), opportunity.id, reason);
                opportunity.reject(reason);
                return;
            }
            min_confidence = min_confidence.min(verdict.confidence);
            opportunity
                .metadata
                .insert(format!("validated_{}", validator.name()), "true".to_string());
        }

        let confidence = min_confidence.clamp(Decimal::ZERO, Decimal::ONE);
        if confidence < self.ctx.config.min_confidence_threshold {
            opportunity.reject(format!(
                "Low confidence: {confidence} < {}",
                self.ctx.config.min_confidence_threshold
            ));
            return;
        }

        opportunity.confidence = confidence;
        opportunity
            .metadata
            .insert(VALIDATION_STATUS_KEY.to_string(), "PASSED".to_string());
        // A clean pass never carries a stale reason.
        opportunity.metadata.remove(REJECTION_REASON_KEY);
    }
}
