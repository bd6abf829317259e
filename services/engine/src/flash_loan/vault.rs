//! Zero-fee vault provider.
//!
//! Vault-shaped loans charge no fee and settle through
//! `receiveFlashLoan(tokens[], amounts[], feeAmounts[], userData)`; the
//! borrower must repay by the end of the callback or the vault reverts.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use ethers::abi::{self, Token as AbiToken};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, Eip1559TransactionRequest, U256};
use rust_decimal::Decimal;
use tracing::{debug, warn};

use arb_types::{FlashLoanRequest, FlashLoanResult};

use crate::chain::{ChainClient, SignerWallet};

use super::{FlashLoanCallback, FlashLoanError, FlashLoanProvider};

const PROVIDER_NAME: &str = "zero-fee";
/// Base gas for the vault entry plus per-token overhead.
const BASE_GAS: u64 = 180_000;
const PER_TOKEN_GAS: u64 = 60_000;

/// Zero-fee vault flash loan source.
pub struct VaultProvider {
    chain: Arc<dyn ChainClient>,
    wallet: SignerWallet,
    vault: Address,
    supported: Vec<Address>,
}

impl std::fmt::Debug for VaultProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultProvider")
            .field("vault", &self.vault)
            .field("supported", &self.supported)
            .finish()
    }
}

impl VaultProvider {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        wallet: SignerWallet,
        vault: Address,
        supported: Vec<Address>,
    ) -> Self {
        Self {
            chain,
            wallet,
            vault,
            supported,
        }
    }

    fn provider_err(&self, message: impl Into<String>) -> FlashLoanError {
        FlashLoanError::Provider {
            provider: PROVIDER_NAME.to_string(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl FlashLoanProvider for VaultProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn supported_tokens(&self) -> Vec<Address> {
        self.supported.clone()
    }

    async fn fee_rate(&self, _token: Address, _amount: U256) -> Result<Decimal, FlashLoanError> {
        Ok(Decimal::ZERO)
    }

    async fn check_liquidity(
        &self,
        token: Address,
        amount: U256,
    ) -> Result<bool, FlashLoanError> {
        let available = self.max_available(token).await?;
        // Exactly-equal liquidity is sufficient.
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
            .erc20_balance(token, self.vault)
            .await
            .map_err(|e| self.provider_err(e.to_string()))
    }

    async fn estimate_gas(&self, request: &FlashLoanRequest) -> Result<u64, FlashLoanError> {
        Ok(BASE_GAS + PER_TOKEN_GAS * request.token_amounts.len() as u64)
    }

    /// `flashLoan(address recipient, address[] tokens, uint256[] amounts, bytes userData)`
    fn loan_calldata(&self, request: &FlashLoanRequest) -> Bytes {
        let selector = ethers::utils::id("flashLoan(address,address[],uint256[],bytes)");
        let tokens: Vec<AbiToken> = request
            .token_amounts
            .iter()
            .map(|a| AbiToken::Address(a.token.address))
            .collect();
        let amounts: Vec<AbiToken> = request
            .token_amounts
            .iter()
            .map(|a| AbiToken::Uint(a.amount_wei))
            .collect();

        let mut data = selector.to_vec();
        data.extend(abi::encode(&[
            AbiToken::Address(request.receiver),
            AbiToken::Array(tokens),
            AbiToken::Array(amounts),
            AbiToken::Bytes(request.callback_data.to_vec()),
        ]));
        Bytes::from(data)
    }

    fn entry_address(&self) -> Address {
        self.vault
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
        let fees: Vec<U256> = vec![U256::zero(); tokens.len()];

        for (token, amount) in tokens.iter().zip(&amounts) {
            if !self.check_liquidity(*token, *amount).await? {
                return Err(FlashLoanError::NoFlashLoanLiquidity);
            }
        }

        // Submit the vault entry transaction.
        let gas = self.estimate_gas(request).await?;
        let nonce = self
            .chain
            .nonce(self.wallet.address())
            .await
            .map_err(|e| self.provider_err(e.to_string()))?;
        let tx: TypedTransaction = Eip1559TransactionRequest::new()
            .to(self.vault)
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
        debug!("vault flash loan submitted: {tx_hash:?}");

        // Borrower leg: must end holding amount + fee of each token.
        let outcome = callback
            .on_flash_loan(self.vault, &tokens, &amounts, &fees, &request.callback_data)
            .await;

        let settled = match outcome {
            Ok(final_balances) => {
                let repayable = final_balances.len() == amounts.len()
                    && final_balances
                        .iter()
                        .zip(amounts.iter().zip(&fees))
                        .all(|(bal, (amt, fee))| *bal >= amt.saturating_add(*fee));
                FlashLoanResult {
                    provider: PROVIDER_NAME.to_string(),
                    success: repayable,
                    tx_hash: Some(tx_hash),
                    borrowed: request.token_amounts.clone(),
                    fees_wei: fees,
                    gas_used: Some(gas),
                    completed_at: Utc::now(),
                    error: (!repayable)
                        .then(|| "borrower balance below amount + fee at settlement".to_string()),
                }
            }
            Err(e) => {
                warn!("vault flash loan callback failed: {e:#}");
                FlashLoanResult {
                    provider: PROVIDER_NAME.to_string(),
                    success: false,
                    tx_hash: Some(tx_hash),
                    borrowed: request.token_amounts.clone(),
                    fees_wei: fees,
                    gas_used: Some(gas),
                    completed_at: Utc::now(),
                    error: Some(format!("callback failed: {e}")),
                }
            }
        };

        // Exactly one settlement hook fires.
        if settled.success {
            callback.on_flash_loan_completed(&settled).await;
        } else {
            callback.on_flash_loan_failed(&settled).await;
        }
        Ok(settled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::mock::MockChainClient;
    use crate::test_support::token;
    use arb_types::TokenAmount;
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;

    const TEST_KEY: &str = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

    struct RecordingCallback {
        final_balances: Vec<U256>,
        fail_loan: bool,
        completed: Mutex<u32>,
        failed: Mutex<u32>,
    }

    #[async_trait]
    impl FlashLoanCallback for RecordingCallback {
        async fn on_flash_loan(
            &self,
            _sender: Address,
            _tokens: &[Address],
            _amounts: &[U256],
            _fees: &[U256],
            _user_data: &Bytes,
        ) -> anyhow::Result<Vec<U256>> {
            if self.fail_loan {
                anyhow::bail!("scripted borrower failure");
            }
            Ok(self.final_balances.clone())
        }

        async fn on_flash_loan_completed(&self, _result: &FlashLoanResult) {
            *self.completed.lock() += 1;
        }

        async fn on_flash_loan_failed(&self, _result: &FlashLoanResult) {
            *self.failed.lock() += 1;
        }
    }

    fn setup(liquidity: U256) -> (VaultProvider, Arc<MockChainClient>) {
        let chain = Arc::new(MockChainClient::new());
        let weth = token(1, 18).address;
        let vault = Address::repeat_byte(0xb0);
        chain.set_erc20_balance(weth, vault, liquidity);
        let provider = VaultProvider::new(
            chain.clone(),
            SignerWallet::from_key(TEST_KEY, 1).unwrap(),
            vault,
            vec![weth],
        );
        (provider, chain)
    }

    fn request(amount: U256) -> FlashLoanRequest {
        FlashLoanRequest {
            token_amounts: vec![TokenAmount::new(token(1, 18), amount)],
            receiver: Address::repeat_byte(0xee),
            callback_data: Bytes::from(vec![1, 2, 3]),
            deadline_unix: 1_900_000_000,
            max_fee_wei: None,
            slippage_tolerance: dec!(0.005),
        }
    }

    #[tokio::test]
    async fn successful_loan_fires_completed_once() {
        let (provider, _) = setup(U256::exp10(22));
        let amount = U256::exp10(19);
        let callback = Arc::new(RecordingCallback {
            final_balances: vec![amount + U256::exp10(17)], // profit on top
            fail_loan: false,
            completed: Mutex::new(0),
            failed: Mutex::new(0),
        });

        let result = provider.execute(&request(amount), callback.clone()).await.unwrap();
        assert!(result.success);
        assert_eq!(result.total_fee_wei(), U256::zero());
        assert_eq!(*callback.completed.lock(), 1);
        assert_eq!(*callback.failed.lock(), 0);
    }

    #[tokio::test]
    async fn short_repayment_fires_failed_once() {
        let (provider, _) = setup(U256::exp10(22));
        let amount = U256::exp10(19);
        let callback = Arc::new(RecordingCallback {
            final_balances: vec![amount - U256::one()], // one wei short
            fail_loan: false,
            completed: Mutex::new(0),
            failed: Mutex::new(0),
        });

        let result = provider.execute(&request(amount), callback.clone()).await.unwrap();
        assert!(!result.success);
        assert_eq!(*callback.completed.lock(), 0);
        assert_eq!(*callback.failed.lock(), 1);
    }

    #[tokio::test]
    async fn borrower_error_fires_failed() {
        let (provider, _) = setup(U256::exp10(22));
        let callback = Arc::new(RecordingCallback {
            final_balances: vec![],
            fail_loan: true,
            completed: Mutex::new(0),
            failed: Mutex::new(0),
        });

        let result = provider
            .execute(&request(U256::exp10(19)), callback.clone())
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(*callback.failed.lock(), 1);
    }

    #[tokio::test]
    async fn insufficient_vault_liquidity_refuses_upfront() {
        let (provider, _) = setup(U256::exp10(18));
        let callback = Arc::new(RecordingCallback {
            final_balances: vec![],
            fail_loan: false,
            completed: Mutex::new(0),
            failed: Mutex::new(0),
        });
        let err = provider
            .execute(&request(U256::exp10(19)), callback)
            .await
            .unwrap_err();
        assert!(matches!(err, FlashLoanError::NoFlashLoanLiquidity));
    }

    #[test]
    fn calldata_embeds_receiver_and_amounts() {
        let (provider, _) = setup(U256::exp10(22));
        let req = request(U256::exp10(19));
        let data = provider.loan_calldata(&req);
        // Selector plus ABI payload, receiver address present in the words.
        assert!(data.len() > 4 + 32 * 4);
        assert_eq!(
            &data[..4],
            ethers::utils::id("flashLoan(address,address[],uint256[],bytes)").as_slice()
        );
    }
}
