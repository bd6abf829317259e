//! Execution results and transaction records.
//!
//! One status enum serves every component. Earlier iterations of this system
//! grew overlapping spellings (`SUCCESS` vs `SUCCEEDED`, a sometimes-terminal
//! `SUBMITTED`); those map through [`ExecutionStatus::from_legacy`] at the
//! boundary and nowhere else.

use chrono::{DateTime, Utc};
use ethers::types::{Address, Bytes, H256, I256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lifecycle status of one execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Executing,
    Submitted,
    Included,
    Succeeded,
    Failed,
    Reverted,
    TimedOut,
    Cancelled,
    Skipped,
}

impl ExecutionStatus {
    /// Whether this status ends the lifecycle; `Submitted` and `Included` are
    /// always intermediate.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded
                | Self::Failed
                | Self::Reverted
                | Self::TimedOut
                | Self::Cancelled
                | Self::Skipped
        )
    }

    /// Map legacy spellings from external records.
    pub fn from_legacy(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Some(Self::Pending),
            "EXECUTING" | "IN_PROGRESS" => Some(Self::Executing),
            "SUBMITTED" => Some(Self::Submitted),
            "INCLUDED" => Some(Self::Included),
            "SUCCESS" | "SUCCEEDED" => Some(Self::Succeeded),
            "FAILED" | "FAILURE" => Some(Self::Failed),
            "REVERTED" => Some(Self::Reverted),
            "TIMEOUT" | "TIMED_OUT" => Some(Self::TimedOut),
            "CANCELLED" | "CANCELED" => Some(Self::Cancelled),
            "SKIPPED" => Some(Self::Skipped),
            _ => None,
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Executing => "executing",
            Self::Submitted => "submitted",
            Self::Included => "included",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Reverted => "reverted",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
            Self::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Status of one on-chain transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    Submitted,
    Confirmed,
    Failed,
    Timeout,
    /// Set when a reorg invalidates a previously seen receipt; the tracker
    /// re-polls from this state.
    Unknown,
}

/// Record of one transaction inside an execution attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionInfo {
    pub tx_hash: Option<H256>,
    pub bundle_hash: Option<H256>,
    pub from: Address,
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
    pub gas_limit: u64,
    pub gas_price: Option<U256>,
    pub max_fee_per_gas: Option<U256>,
    pub priority_fee: Option<U256>,
    pub nonce: Option<u64>,
    pub status: TxStatus,
    pub gas_used: Option<u64>,
    pub effective_gas_price: Option<U256>,
    pub block_number: Option<u64>,
    pub error: Option<String>,
}

impl TransactionInfo {
    /// Actual gas spend in wei, available once a receipt landed.
    pub fn gas_cost_wei(&self) -> Option<U256> {
        Some(U256::from(self.gas_used?).saturating_mul(self.effective_gas_price?))
    }

    pub fn is_complete(&self) -> bool {
        matches!(
            self.status,
            TxStatus::Confirmed | TxStatus::Failed | TxStatus::Timeout
        )
    }
}

/// Outcome of one execution attempt; frozen once status is terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub id: Uuid,
    pub opportunity_id: Uuid,
    pub strategy_id: String,
    pub status: ExecutionStatus,
    pub transactions: Vec<TransactionInfo>,
    /// Parsed from receipt logs, never copied from the expectation.
    pub actual_output_wei: Option<U256>,
    pub actual_profit_wei: Option<U256>,
    pub gas_used: Option<u64>,
    pub flash_loan_fee_wei: U256,
    pub start_ts: DateTime<Utc>,
    pub end_ts: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn started(opportunity_id: Uuid, strategy_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            opportunity_id,
            strategy_id: strategy_id.into(),
            status: ExecutionStatus::Pending,
            transactions: Vec::new(),
            actual_output_wei: None,
            actual_profit_wei: None,
            gas_used: None,
            flash_loan_fee_wei: U256::zero(),
            start_ts: now,
            end_ts: None,
            error: None,
        }
    }

    /// Total gas spend across all transactions, in wei.
    pub fn total_gas_cost_wei(&self) -> U256 {
        self.transactions
            .iter()
            .filter_map(TransactionInfo::gas_cost_wei)
            .fold(U256::zero(), |acc, c| acc.saturating_add(c))
    }

    /// Net profit: actual profit minus gas spend minus flash loan fee.
    ///
    /// `None` until an actual profit was derived from receipts.
    pub fn net_profit_wei(&self) -> Option<I256> {
        let gross = I256::try_from(self.actual_profit_wei?).ok()?;
        let gas = I256::try_from(self.total_gas_cost_wei()).ok()?;
        let fee = I256::try_from(self.flash_loan_fee_wei).ok()?;
        Some(gross.saturating_sub(gas).saturating_sub(fee))
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        self.end_ts.map(|end| end - self.start_ts)
    }

    pub fn is_complete(&self) -> bool {
        self.status.is_terminal()
    }

    /// Transition into a terminal state, recording the end timestamp once.
    pub fn finish(
        &mut self,
        status: ExecutionStatus,
        error: Option<String>,
        now: DateTime<Utc>,
    ) {
        debug_assert!(status.is_terminal());
        self.status = status;
        if self.end_ts.is_none() {
            self.end_ts = Some(now);
        }
        if self.error.is_none() {
            self.error = error;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(ExecutionStatus::Succeeded.is_terminal());
        assert!(ExecutionStatus::Skipped.is_terminal());
        assert!(!ExecutionStatus::Submitted.is_terminal());
        assert!(!ExecutionStatus::Included.is_terminal());
    }

    #[test]
    fn legacy_status_strings_unify() {
        assert_eq!(
            ExecutionStatus::from_legacy("SUCCESS"),
            Some(ExecutionStatus::Succeeded)
        );
        assert_eq!(
            ExecutionStatus::from_legacy("succeeded"),
            Some(ExecutionStatus::Succeeded)
        );
        assert_eq!(
            ExecutionStatus::from_legacy("CANCELED"),
            Some(ExecutionStatus::Cancelled)
        );
        assert_eq!(ExecutionStatus::from_legacy("???"), None);
    }

    #[test]
    fn net_profit_subtracts_gas_and_fee() {
        let mut result = ExecutionResult::started(Uuid::new_v4(), "flash_loan", Utc::now());
        result.actual_profit_wei = Some(U256::from(1_000_000u64));
        result.flash_loan_fee_wei = U256::from(90_000u64);
        result.transactions.push(TransactionInfo {
            tx_hash: Some(H256::repeat_byte(1)),
            bundle_hash: None,
            from: Address::zero(),
            to: Address::zero(),
            data: Bytes::new(),
            value: U256::zero(),
            gas_limit: 21_000,
            gas_price: None,
            max_fee_per_gas: None,
            priority_fee: None,
            nonce: Some(0),
            status: TxStatus::Confirmed,
            gas_used: Some(100),
            effective_gas_price: Some(U256::from(2_000u64)),
            block_number: Some(1),
            error: None,
        });

        // 1_000_000 - 200_000 gas - 90_000 fee
        assert_eq!(result.net_profit_wei(), Some(I256::from(710_000)));
    }

    #[test]
    fn reverted_run_with_gas_cost_has_negative_net() {
        let mut result = ExecutionResult::started(Uuid::new_v4(), "standard", Utc::now());
        result.actual_profit_wei = Some(U256::zero());
        result.transactions.push(TransactionInfo {
            tx_hash: Some(H256::repeat_byte(2)),
            bundle_hash: None,
            from: Address::zero(),
            to: Address::zero(),
            data: Bytes::new(),
            value: U256::zero(),
            gas_limit: 300_000,
            gas_price: None,
            max_fee_per_gas: None,
            priority_fee: None,
            nonce: Some(1),
            status: TxStatus::Failed,
            gas_used: Some(250_000),
            effective_gas_price: Some(U256::from(30_000_000_000u64)),
            block_number: Some(10),
            error: Some("execution reverted".into()),
        });
        result.finish(ExecutionStatus::Reverted, None, Utc::now());

        assert!(result.net_profit_wei().unwrap() < I256::zero());
        assert!(result.is_complete());
    }

    #[test]
    fn finish_freezes_end_timestamp() {
        let mut result = ExecutionResult::started(Uuid::new_v4(), "standard", Utc::now());
        let first_end = Utc::now();
        result.finish(ExecutionStatus::Failed, Some("boom".into()), first_end);
        result.finish(ExecutionStatus::Succeeded, None, Utc::now());
        assert_eq!(result.end_ts, Some(first_end));
        assert_eq!(result.error.as_deref(), Some("boom"));
    }
}
