//! Trade routes: ordered swap steps through pool snapshots.

use ethers::types::U256;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ArbError;
use crate::pool::PoolInfo;
use crate::token::Token;

/// One swap through one pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeStep {
    pub pool: PoolInfo,
    pub token_in: Token,
    pub token_out: Token,
    pub expected_out_wei: U256,
    pub min_out_wei: U256,
    /// Maximum acceptable slippage for this step, as a ratio (0.005 = 0.5%).
    pub max_slippage: Decimal,
}

impl fmt::Display for TradeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} via {} ({})",
            self.token_in, self.token_out, self.pool.venue, self.pool.kind.name()
        )
    }
}

/// An ordered sequence of trade steps.
///
/// Invariants checked by [`Route::validate`]:
/// - each step's `token_out` equals the next step's `token_in`
/// - every step's pool contains both of that step's tokens
/// - a cyclic route starts and ends on the same token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub steps: Vec<TradeStep>,
}

impl Route {
    pub fn new(steps: Vec<TradeStep>) -> Self {
        Self { steps }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn input_token(&self) -> Option<&Token> {
        self.steps.first().map(|s| &s.token_in)
    }

    pub fn output_token(&self) -> Option<&Token> {
        self.steps.last().map(|s| &s.token_out)
    }

    /// A route is cyclic when it returns to its input token.
    pub fn is_cyclic(&self) -> bool {
        match (self.input_token(), self.output_token()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// Distinct venues traversed, in first-seen order.
    pub fn venues(&self) -> Vec<&crate::token::VenueId> {
        let mut seen = Vec::new();
        for step in &self.steps {
            if !seen.contains(&&step.pool.venue) {
                seen.push(&step.pool.venue);
            }
        }
        seen
    }

    /// Check the structural route invariants.
    pub fn validate(&self) -> Result<(), ArbError> {
        if self.steps.is_empty() {
            return Err(ArbError::Config("route has no steps".into()));
        }
        for (i, step) in self.steps.iter().enumerate() {
            if !step.pool.contains_token(&step.token_in) {
                return Err(ArbError::Config(format!(
                    "step {i}: pool {:?} does not hold input token {}",
                    step.pool.pool_address, step.token_in
                )));
            }
            if !step.pool.contains_token(&step.token_out) {
                return Err(ArbError::Config(format!(
                    "step {i}: pool {:?} does not hold output token {}",
                    step.pool.pool_address, step.token_out
                )));
            }
            if step.token_in == step.token_out {
                return Err(ArbError::Config(format!(
                    "step {i}: input and output token are both {}",
                    step.token_in
                )));
            }
            if let Some(next) = self.steps.get(i + 1) {
                if step.token_out != next.token_in {
                    return Err(ArbError::Config(format!(
                        "step {i} outputs {} but step {} consumes {}",
                        step.token_out,
                        i + 1,
                        next.token_in
                    )));
                }
            }
        }
        Ok(())
    }

    /// As `validate`, additionally requiring the route to close its cycle.
    pub fn validate_cyclic(&self) -> Result<(), ArbError> {
        self.validate()?;
        if !self.is_cyclic() {
            return Err(ArbError::Config(format!(
                "route does not return to its input token ({} -> {})",
                self.input_token().map(|t| t.to_string()).unwrap_or_default(),
                self.output_token().map(|t| t.to_string()).unwrap_or_default(),
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(first) = self.steps.first() {
            write!(f, "{}", first.token_in)?;
        }
        for step in &self.steps {
            write!(f, " -> {}", step.token_out)?;
        }
        Ok(())
    }
}
