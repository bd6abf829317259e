//! Flash loan request and settlement records.

use chrono::{DateTime, Utc};
use ethers::types::{Address, Bytes, H256, U256};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::token::TokenAmount;

/// A request to borrow one or more tokens for the duration of a single
/// transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlashLoanRequest {
    pub token_amounts: Vec<TokenAmount>,
    /// Contract receiving the loan and the provider callback.
    pub receiver: Address,
    /// Opaque bytes forwarded to the borrower callback.
    pub callback_data: Bytes,
    pub deadline_unix: u64,
    /// Reject the loan when the quoted fee would exceed this bound.
    pub max_fee_wei: Option<U256>,
    /// Slippage tolerance the borrower applies inside the callback, as a
    /// ratio (0.005 = 0.5%).
    pub slippage_tolerance: Decimal,
}

impl FlashLoanRequest {
    pub fn is_multi_token(&self) -> bool {
        self.token_amounts.len() > 1
    }

    pub fn total_requested(&self) -> usize {
        self.token_amounts.len()
    }
}

/// Outcome of a flash loan execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlashLoanResult {
    pub provider: String,
    pub success: bool,
    pub tx_hash: Option<H256>,
    pub borrowed: Vec<TokenAmount>,
    /// Fee actually charged, summed over tokens, in wei of each borrowed token
    /// (single-token loans carry the only meaningful entry).
    pub fees_wei: Vec<U256>,
    pub gas_used: Option<u64>,
    pub completed_at: DateTime<Utc>,
    pub error: Option<String>,
}

impl FlashLoanResult {
    pub fn total_fee_wei(&self) -> U256 {
        self.fees_wei
            .iter()
            .fold(U256::zero(), |acc, f| acc.saturating_add(*f))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::Token;
    use rust_decimal_macros::dec;

    #[test]
    fn multi_token_detection() {
        let weth = Token::new(Address::repeat_byte(1), Some("WETH".into()), 18).unwrap();
        let dai = Token::new(Address::repeat_byte(2), Some("DAI".into()), 18).unwrap();
        let single = FlashLoanRequest {
            token_amounts: vec![TokenAmount::new(weth.clone(), U256::exp10(19))],
            receiver: Address::repeat_byte(9),
            callback_data: Bytes::new(),
            deadline_unix: 1_900_000_000,
            max_fee_wei: None,
            slippage_tolerance: dec!(0.005),
        };
        assert!(!single.is_multi_token());

        let multi = FlashLoanRequest {
            token_amounts: vec![
                TokenAmount::new(weth, U256::exp10(19)),
                TokenAmount::new(dai, U256::exp10(22)),
            ],
            ..single
        };
        assert!(multi.is_multi_token());
        assert_eq!(multi.total_requested(), 2);
    }

    #[test]
    fn fee_sums_across_tokens() {
        let result = FlashLoanResult {
            provider: "lending-pool".into(),
            success: true,
            tx_hash: None,
            borrowed: vec![],
            fees_wei: vec![U256::from(900u64), U256::from(100u64)],
            gas_used: Some(400_000),
            completed_at: Utc::now(),
            error: None,
        };
        assert_eq!(result.total_fee_wei(), U256::from(1000u64));
    }
}
