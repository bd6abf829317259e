//! # Flash Loan Providers - Fee-Minimizing Source Selection
//!
//! ## Purpose
//!
//! Uncollateralized working capital for cycles larger than the wallet:
//! providers quote fees and liquidity, the registry picks the cheapest viable
//! source, and execution wires the borrower callback so settlement invokes
//! completion or failure exactly once. The canonical pair is a zero-fee
//! vault and a 9 bps lending pool; the registry supports any number of
//! providers in preference order.
//!
//! ## Selection policy
//!
//! Single token: first preferred provider whose liquidity check passes.
//! Multi token: the loan never fragments across providers; the provider must
//! support every requested token, zero-fee preferred. Quoted fee rates carry
//! a +0.01% buffer against on-chain fee changes between quote and execution.

pub mod lending_pool;
pub mod vault;

pub use lending_pool::LendingPoolProvider;
pub use vault::VaultProvider;

use std::sync::Arc;

use async_trait::async_trait;
use ethers::types::{Address, Bytes, U256};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use thiserror::Error;
use tracing::{debug, info};

use arb_types::{FlashLoanRequest, FlashLoanResult};

/// Safety margin added to quoted fee rates (+0.01%).
pub const FEE_RATE_BUFFER: Decimal = dec!(0.0001);

/// Flash loan failures.
#[derive(Debug, Error)]
pub enum FlashLoanError {
    #[error("token {0:?} not supported by provider {1}")]
    UnsupportedToken(Address, String),

    #[error("no flash loan liquidity for the requested amounts")]
    NoFlashLoanLiquidity,

    #[error("quoted fee {quoted} wei exceeds cap {cap} wei")]
    FeeExceedsCap { quoted: U256, cap: U256 },

    #[error("provider {provider} failed: {message}")]
    Provider { provider: String, message: String },
}

/// Borrower-side callback contract. Settlement calls exactly one of the
/// completion hooks per loan.
#[async_trait]
pub trait FlashLoanCallback: Send + Sync {
    /// Perform the arbitrage steps while holding the borrowed funds. The
    /// borrower must end the call holding at least amount + fee per token.
    async fn on_flash_loan(
        &self,
        sender: Address,
        tokens: &[Address],
        amounts: &[U256],
        fees: &[U256],
        user_data: &Bytes,
    ) -> anyhow::Result<Vec<U256>>;

    async fn on_flash_loan_completed(&self, result: &FlashLoanResult);

    async fn on_flash_loan_failed(&self, result: &FlashLoanResult);
}

/// A flash loan source.
#[async_trait]
pub trait FlashLoanProvider: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;
    fn supported_tokens(&self) -> Vec<Address>;

    /// Fee as a ratio of the borrowed amount (0.0009 = 9 bps), unbuffered.
    async fn fee_rate(&self, token: Address, amount: U256) -> Result<Decimal, FlashLoanError>;

    async fn check_liquidity(&self, token: Address, amount: U256)
        -> Result<bool, FlashLoanError>;

    async fn max_available(&self, token: Address) -> Result<U256, FlashLoanError>;

    async fn estimate_gas(&self, request: &FlashLoanRequest) -> Result<u64, FlashLoanError>;

    /// Entry-point calldata for embedding the loan in a bundle.
    fn loan_calldata(&self, request: &FlashLoanRequest) -> Bytes;

    /// Loan entry contract address.
    fn entry_address(&self) -> Address;

    /// Execute the loan directly (non-bundle path): submit the entry
    /// transaction, drive the callback, settle exactly once.
    async fn execute(
        &self,
        request: &FlashLoanRequest,
        callback: Arc<dyn FlashLoanCallback>,
    ) -> Result<FlashLoanResult, FlashLoanError>;
}

/// Providers in preference order with the selection policy.
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn FlashLoanProvider>>,
}

impl ProviderRegistry {
    /// Order follows `preferred` names; unknown names are ignored, providers
    /// not named go last in registration order.
    pub fn new(providers: Vec<Arc<dyn FlashLoanProvider>>, preferred: &[String]) -> Self {
        let mut ordered: Vec<Arc<dyn FlashLoanProvider>> = Vec::new();
        for name in preferred {
            if let Some(p) = providers.iter().find(|p| p.name() == name) {
                ordered.push(p.clone());
            }
        }
        for p in &providers {
            if !ordered.iter().any(|o| o.name() == p.name()) {
                ordered.push(p.clone());
            }
        }
        info!(
            "flash loan registry: {:?}",
            ordered.iter().map(|p| p.name().to_string()).collect::<Vec<_>>()
        );
        Self { providers: ordered }
    }

    pub fn provider(&self, name: &str) -> Option<Arc<dyn FlashLoanProvider>> {
        self.providers.iter().find(|p| p.name() == name).cloned()
    }

    /// Buffered fee quote for one token on one provider.
    pub async fn quoted_fee_wei(
        &self,
        provider: &dyn FlashLoanProvider,
        token: Address,
        amount: U256,
    ) -> Result<U256, FlashLoanError> {
        let rate = provider.fee_rate(token, amount).await? + FEE_RATE_BUFFER;
        // rate in bps-of-bps precision: scale through 10^8 to stay integral.
        let scaled = (rate * dec!(100000000)).trunc();
        let scaled = rust_decimal::prelude::ToPrimitive::to_u64(&scaled).unwrap_or(u64::MAX);
        Ok(amount.saturating_mul(U256::from(scaled)) / U256::from(100_000_000u64))
    }

    /// Pick a provider for the request per the selection policy.
    pub async fn select(
        &self,
        request: &FlashLoanRequest,
    ) -> Result<Arc<dyn FlashLoanProvider>, FlashLoanError> {
        if request.is_multi_token() {
            return self.select_multi(request).await;
        }

        let amount = &request.token_amounts[0];
        let token = amount.token.address;

        for provider in &self.providers {
            if !provider.supported_tokens().contains(&token) {
                debug!("{} does not support {token:?}", provider.name());
                continue;
            }
            match provider.check_liquidity(token, amount.amount_wei).await {
                Ok(true) => {
                    if let Some(cap) = request.max_fee_wei {
                        let quoted = self
                            .quoted_fee_wei(provider.as_ref(), token, amount.amount_wei)
                            .await?;
                        if quoted > cap {
                            return Err(FlashLoanError::FeeExceedsCap { quoted, cap });
                        }
                    }
                    debug!("selected flash loan provider {}", provider.name());
                    return Ok(provider.clone());
                }
                Ok(false) => {
                    debug!("{} lacks liquidity for {amount}", provider.name());
                }
                Err(e) => {
                    debug!("{} liquidity probe failed: {e}", provider.name());
                }
            }
        }

        Err(FlashLoanError::NoFlashLoanLiquidity)
    }

    /// Multi-token loans never fragment: one provider must cover every token.
    async fn select_multi(
        &self,
        request: &FlashLoanRequest,
    ) -> Result<Arc<dyn FlashLoanProvider>, FlashLoanError> {
        'providers: for provider in &self.providers {
            let supported = provider.supported_tokens();
            for amount in &request.token_amounts {
                if !supported.contains(&amount.token.address) {
                    continue 'providers;
                }
                match provider
                    .check_liquidity(amount.token.address, amount.amount_wei)
                    .await
                {
                    Ok(true) => {}
                    _ => continue 'providers,
                }
            }
            debug!("selected multi-token provider {}", provider.name());
            return Ok(provider.clone());
        }
        Err(FlashLoanError::NoFlashLoanLiquidity)
    }

    /// Whether any provider could fund this single-token amount.
    pub async fn any_viable(&self, token: Address, amount: U256) -> bool {
        for provider in &self.providers {
            if provider.supported_tokens().contains(&token)
                && provider.check_liquidity(token, amount).await.unwrap_or(false)
            {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::mock::MockChainClient;
    use crate::chain::SignerWallet;
    use crate::test_support::token;
    use arb_types::TokenAmount;
    use rust_decimal_macros::dec;

    const TEST_KEY: &str = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

    fn registry(
        vault_liquidity: U256,
        pool_liquidity: U256,
    ) -> (ProviderRegistry, Arc<MockChainClient>) {
        let chain = Arc::new(MockChainClient::new());
        let wallet = SignerWallet::from_key(TEST_KEY, 1).unwrap();
        let weth = token(1, 18).address;

        let vault_addr = Address::repeat_byte(0xb0);
        let pool_addr = Address::repeat_byte(0xa0);
        chain.set_erc20_balance(weth, vault_addr, vault_liquidity);
        chain.set_erc20_balance(weth, pool_addr, pool_liquidity);

        let vault = Arc::new(VaultProvider::new(
            chain.clone(),
            wallet.clone(),
            vault_addr,
            vec![weth],
        ));
        let pool = Arc::new(LendingPoolProvider::new(
            chain.clone(),
            wallet,
            pool_addr,
            vec![weth],
        ));

        let registry = ProviderRegistry::new(
            vec![pool, vault],
            &["zero-fee".to_string(), "lending-pool".to_string()],
        );
        (registry, chain)
    }

    fn request(amount_tokens: u64) -> FlashLoanRequest {
        FlashLoanRequest {
            token_amounts: vec![TokenAmount::new(
                token(1, 18),
                U256::from(amount_tokens) * U256::exp10(18),
            )],
            receiver: Address::repeat_byte(0xee),
            callback_data: Bytes::new(),
            deadline_unix: 1_900_000_000,
            max_fee_wei: None,
            slippage_tolerance: dec!(0.005),
        }
    }

    #[tokio::test]
    async fn prefers_zero_fee_when_both_liquid() {
        let (registry, _) = registry(U256::exp10(22), U256::exp10(22));
        let selected = registry.select(&request(10)).await.unwrap();
        assert_eq!(selected.name(), "zero-fee");
    }

    #[tokio::test]
    async fn falls_back_to_lending_pool() {
        // Vault holds 1 token, request 10.
        let (registry, _) = registry(U256::exp10(18), U256::exp10(22));
        let selected = registry.select(&request(10)).await.unwrap();
        assert_eq!(selected.name(), "lending-pool");
    }

    #[tokio::test]
    async fn no_liquidity_anywhere_fails() {
        let (registry, _) = registry(U256::exp10(18), U256::exp10(18));
        let err = registry.select(&request(10)).await.unwrap_err();
        assert!(matches!(err, FlashLoanError::NoFlashLoanLiquidity));
    }

    #[tokio::test]
    async fn liquidity_exactly_equal_passes() {
        let exact = U256::from(10u64) * U256::exp10(18);
        let (registry, _) = registry(exact, U256::zero());
        let selected = registry.select(&request(10)).await.unwrap();
        assert_eq!(selected.name(), "zero-fee");
    }

    #[tokio::test]
    async fn lending_pool_fee_carries_buffer() {
        let (registry, _) = registry(U256::zero(), U256::exp10(22));
        let provider = registry.provider("lending-pool").unwrap();
        let amount = U256::from(10u64) * U256::exp10(18);
        let fee = registry
            .quoted_fee_wei(provider.as_ref(), token(1, 18).address, amount)
            .await
            .unwrap();
        // 0.0009 + 0.0001 buffer = 0.001 of 10 tokens.
        assert_eq!(fee, U256::exp10(16));
    }

    #[tokio::test]
    async fn multi_token_requires_single_provider_coverage() {
        let chain = Arc::new(MockChainClient::new());
        let wallet = SignerWallet::from_key(TEST_KEY, 1).unwrap();
        let (weth, dai) = (token(1, 18), token(2, 18));
        let vault_addr = Address::repeat_byte(0xb0);
        let pool_addr = Address::repeat_byte(0xa0);

        // Vault supports only WETH; pool supports both.
        chain.set_erc20_balance(weth.address, vault_addr, U256::exp10(24));
        chain.set_erc20_balance(weth.address, pool_addr, U256::exp10(24));
        chain.set_erc20_balance(dai.address, pool_addr, U256::exp10(24));

        let vault = Arc::new(VaultProvider::new(
            chain.clone(),
            wallet.clone(),
            vault_addr,
            vec![weth.address],
        ));
        let pool = Arc::new(LendingPoolProvider::new(
            chain,
            wallet,
            pool_addr,
            vec![weth.address, dai.address],
        ));
        let registry = ProviderRegistry::new(
            vec![vault, pool],
            &["zero-fee".to_string(), "lending-pool".to_string()],
        );

        let request = FlashLoanRequest {
            token_amounts: vec![
                TokenAmount::new(weth, U256::exp10(18)),
                TokenAmount::new(dai, U256::exp10(18)),
            ],
            receiver: Address::repeat_byte(0xee),
            callback_data: Bytes::new(),
            deadline_unix: 1_900_000_000,
            max_fee_wei: None,
            slippage_tolerance: dec!(0.005),
        };
        let selected = registry.select(&request).await.unwrap();
        assert_eq!(selected.name(), "lending-pool");
    }
}
