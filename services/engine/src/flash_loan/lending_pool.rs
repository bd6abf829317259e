//! Lending-pool provider: deep liquidity at a 9 bps premium.
//!
//! Pool-shaped loans settle through
//! `executeOperation(assets[], amounts[], premiums[], initiator, params)`,
//! which returns true iff the borrower authorizes repayment of amount plus
//! premium per asset.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use ethers::abi::{self, Token as AbiToken};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, Eip1559TransactionRequest, U256};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, warn};

use arb_types::{FlashLoanRequest, FlashLoanResult};

use crate::chain::{ChainClient, SignerWallet};

use super::{FlashLoanCallback, FlashLoanError, FlashLoanProvider};

const PROVIDER_NAME: &str = "lending-pool";
/// Standard pool premium: 0.09%.
const DEFAULT_FEE_RATE: Decimal = dec!(0.0009);
/// Premium expressed in hundredths of a bp for integer math.
const FEE_NUMERATOR: u64 = 9;
const FEE_DENOMINATOR: u64 = 10_000;

const BASE_GAS: u64 = 250_000;
const PER_TOKEN_GAS: u64 = 80_000;

/// Fee-bearing lending pool flash loan source.
pub struct LendingPoolProvider {
    chain: Arc<dyn ChainClient>,
    wallet: SignerWallet,
    pool: Address,
    supported: Vec<Address>,
}

impl std::fmt::Debug for LendingPoolProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LendingPoolProvider")
            .field("pool", &self.pool)
            .field("supported", &self.supported)
            .finish()
    }
}

impl LendingPoolProvider {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        wallet: SignerWallet,
        pool: Address,
        supported: Vec<Address>,
    ) -> Self {
        Self {
            chain,
            wallet,
            pool,
            supported,
        }
    }

    /// Premium owed for one borrowed amount: `amount * 9 / 10000`.
    pub fn premium_wei(amount: U256) -> U256 {
        amount.saturating_mul(U256::from(FEE_NUMERATOR)) / U256::from(FEE_DENOMINATOR)
    }

    fn provider_err(&self, message: impl Into<String>) -> FlashLoanError {
        FlashLoanError::Provider {
            provider: PROVIDER_NAME.to_string(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl FlashLoanProvider for LendingPoolProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn supported_tokens(&self) -> Vec<Address> {
        self.supported.clone()
    }

    async fn fee_rate(&self, _token: Address, _amount: U256) -> Result<Decimal, FlashLoanError> {
        Ok(DEFAULT_FEE_RATE)
    }

    async fn check_liquidity(
        &self,
        token: Address,
        amount: U256,
    ) -> Result<bool, FlashLoanError> {
        let available = self.max_available(token).await?;
        Ok(available >= amount)
    }

    async fn max_available(&self, token: Address) -> Result<U256, FlashLoanError> {
        if !self.supported.contains(&token) {
            return Err(FlashLoanError::UnsupportedToken(
                token,
                PROVIDER_NAME.to_string(),
            ));
        }
        self.chain
            .erc20_balance(token, self.pool)
            .await
            .map_err(|e| self.provider_err(e.to_string()))
    }

    async fn estimate_gas(&self, request: &FlashLoanRequest) -> Result<u64, FlashLoanError> {
        Ok(BASE_GAS + PER_TOKEN_GAS * request.token_amounts.len() as u64)
    }

    /// `flashLoan(address receiver, address[] assets, uint256[] amounts,
    /// uint256[] modes, address onBehalfOf, bytes params, uint16 referral)`
    /// with all modes zero (no debt left open).
    fn loan_calldata(&self, request: &FlashLoanRequest) -> Bytes {
        let selector = ethers::utils::id(
            "flashLoan(address,address[],uint256[],uint256[],address,bytes,uint16)",
        );
        let assets: Vec<AbiToken> = request
            .token_amounts
            .iter()
            .map(|a| AbiToken::Address(a.token.address))
            .collect();
        let amounts: Vec<AbiToken> = request
            .token_amounts
            .iter()
            .map(|a| AbiToken::Uint(a.amount_wei))
            .collect();
        let modes: Vec<AbiToken> = request
            .token_amounts
            .iter()
            .map(|_| AbiToken::Uint(U256::zero()))
            .collect();

        let mut data = selector.to_vec();
        data.extend(abi::encode(&[
            AbiToken::Address(request.receiver),
            AbiToken::Array(assets),
            AbiToken::Array(amounts),
            AbiToken::Array(modes),
            AbiToken::Address(request.receiver),
            AbiToken::Bytes(request.callback_data.to_vec()),
            AbiToken::Uint(U256::zero()),
        ]));
        Bytes::from(data)
    }

    fn entry_address(&self) -> Address {
        self.pool
    }

    async fn execute(
        &self,
        request: &FlashLoanRequest,
        callback: Arc<dyn FlashLoanCallback>,
    ) -> Result<FlashLoanResult, FlashLoanError> {
        let tokens: Vec<Address> = request
            .token_amounts
            .iter()
            .map(|a| a.token.address)
            .collect();
        let amounts: Vec<U256> = request
            .token_amounts
            .iter()
            .map(|a| a.amount_wei)
            .collect();
        let premiums: Vec<U256> = amounts.iter().map(|a| Self::premium_wei(*a)).collect();

        for (token, amount) in tokens.iter().zip(&amounts) {
            if !self.check_liquidity(*token, *amount).await? {
                return Err(FlashLoanError::NoFlashLoanLiquidity);
            }
        }

        if let Some(cap) = request.max_fee_wei {
            let total: U256 = premiums
                .iter()
                .fold(U256::zero(), |acc, p| acc.saturating_add(*p));
            if total > cap {
                return Err(FlashLoanError::FeeExceedsCap { quoted: total, cap });
            }
        }

        let gas = self.estimate_gas(request).await?;
        let nonce = self
            .chain
            .nonce(self.wallet.address())
            .await
            .map_err(|e| self.provider_err(e.to_string()))?;
        let tx: TypedTransaction = Eip1559TransactionRequest::new()
            .to(self.pool)
            .data(self.loan_calldata(request))
            .gas(gas)
            .nonce(nonce)
            .into();
        let raw = self
            .wallet
            .sign_transaction(&tx)
            .await
            .map_err(|e| self.provider_err(e.to_string()))?;
        let tx_hash = self
            .chain
            .send_raw_transaction(raw)
            .await
            .map_err(|e| self.provider_err(e.to_string()))?;
        debug!("lending pool flash loan submitted: {tx_hash:?}");

        let outcome = callback
            .on_flash_loan(
                self.pool,
                &tokens,
                &amounts,
                &premiums,
                &request.callback_data,
            )
            .await;

        let settled = match outcome {
            Ok(final_balances) => {
                let repayable = final_balances.len() == amounts.len()
                    && final_balances
                        .iter()
                        .zip(amounts.iter().zip(&premiums))
                        .all(|(bal, (amt, fee))| *bal >= amt.saturating_add(*fee));
                FlashLoanResult {
                    provider: PROVIDER_NAME.to_string(),
                    success: repayable,
                    tx_hash: Some(tx_hash),
                    borrowed: request.token_amounts.clone(),
                    fees_wei: premiums,
                    gas_used: Some(gas),
                    completed_at: Utc::now(),
                    error: (!repayable)
                        .then(|| "borrower balance below amount + premium".to_string()),
                }
            }
            Err(e) => {
                warn!("lending pool callback failed: {e:#}");
                FlashLoanResult {
                    provider: PROVIDER_NAME.to_string(),
                    success: false,
                    tx_hash: Some(tx_hash),
                    borrowed: request.token_amounts.clone(),
                    fees_wei: premiums,
                    gas_used: Some(gas),
                    completed_at: Utc::now(),
                    error: Some(format!("callback failed: {e}")),
                }
            }
        };

        if settled.success {
            callback.on_flash_loan_completed(&settled).await;
        } else {
            callback.on_flash_loan_failed(&settled).await;
        }
        Ok(settled)
    }
}
