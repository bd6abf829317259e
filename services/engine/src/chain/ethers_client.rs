//! Live chain client over an ethers HTTP provider.

use std::time::Duration;

use async_trait::async_trait;
use ethers::abi::{self, Token as AbiToken};
use ethers::prelude::*;
use ethers::providers::Http;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionReceipt, H256, U256};
use url::Url;

use super::{ChainClient, ChainError};

/// balanceOf(address) selector.
const BALANCE_OF_SELECTOR: [u8; 4] = [0x70, 0xa0, 0x82, 0x31];

/// Chain client backed by a pooled HTTP provider.
pub struct EthersChainClient {
    provider: Provider<Http>,
    timeout: Duration,
}

impl EthersChainClient {
    /// Build a client with a connection-pooled transport; the provider is
    /// shared and supports concurrent requests.
    pub fn new(rpc_url: &str, timeout_seconds: u64) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(5)
            .timeout(Duration::from_secs(timeout_seconds))
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true)
            .build()?;

        let url: Url = rpc_url.parse()?;
        let transport = Http::new_with_client(url, client);
        Ok(Self {
            provider: Provider::<Http>::new(transport),
            timeout: Duration::from_secs(timeout_seconds),
        })
    }

    async fn bounded<F, T>(&self, fut: F) -> Result<T, ChainError>
    where
        F: std::future::Future<Output = Result<T, ProviderError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(ChainError::Transport(e.to_string())),
            Err(_) => Err(ChainError::Timeout {
                seconds: self.timeout.as_secs(),
            }),
        }
    }
}

#[async_trait]
impl ChainClient for EthersChainClient {
    async fn block_number(&self) -> Result<u64, ChainError> {
        let number = self.bounded(self.provider.get_block_number()).await?;
        Ok(number.as_u64())
    }

    async fn chain_id(&self) -> Result<u64, ChainError> {
        let id = self.bounded(self.provider.get_chainid()).await?;
        Ok(id.as_u64())
    }

    async fn gas_price(&self) -> Result<U256, ChainError> {
        self.bounded(self.provider.get_gas_price()).await
    }

    async fn base_fee(&self) -> Result<U256, ChainError> {
        let block = self
            .bounded(self.provider.get_block(BlockNumber::Latest))
            .await?
            .ok_or_else(|| ChainError::InvalidResponse("no latest block".into()))?;
        Ok(block.base_fee_per_gas.unwrap_or_default())
    }

    async fn priority_fee(&self) -> Result<U256, ChainError> {
        // eth_maxPriorityFeePerGas where available, else the legacy spread.
        match self
            .bounded(self.provider.request("eth_maxPriorityFeePerGas", ()))
            .await
        {
            Ok(fee) => Ok(fee),
            Err(_) => {
                let gas_price = self.gas_price().await?;
                let base = self.base_fee().await?;
                Ok(gas_price.saturating_sub(base))
            }
        }
    }

    async fn estimate_gas(&self, tx: &TypedTransaction) -> Result<u64, ChainError> {
        let estimate = self.bounded(self.provider.estimate_gas(tx, None)).await?;
        Ok(estimate.as_u64())
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256, ChainError> {
        let pending = self
            .bounded(self.provider.send_raw_transaction(raw))
            .await?;
        Ok(pending.tx_hash())
    }

    async fn transaction_receipt(
        &self,
        hash: H256,
    ) -> Result<Option<TransactionReceipt>, ChainError> {
        self.bounded(self.provider.get_transaction_receipt(hash))
            .await
    }

    async fn call(&self, tx: &TypedTransaction) -> Result<Bytes, ChainError> {
        self.bounded(self.provider.call(tx, None)).await
    }

    async fn get_balance(&self, address: Address) -> Result<U256, ChainError> {
        self.bounded(self.provider.get_balance(address, None)).await
    }

    async fn erc20_balance(&self, token: Address, holder: Address) -> Result<U256, ChainError> {
        let mut data = BALANCE_OF_SELECTOR.to_vec();
        data.extend(abi::encode(&[AbiToken::Address(holder)]));

        let tx = TypedTransaction::Eip1559(
            Eip1559TransactionRequest::new()
                .to(token)
                .data(Bytes::from(data)),
        );
        let raw = self.call(&tx).await?;
        if raw.len() < 32 {
            return Err(ChainError::InvalidResponse(format!(
                "balanceOf returned {} bytes",
                raw.len()
            )));
        }
        Ok(U256::from_big_endian(&raw[..32]))
    }

    async fn nonce(&self, address: Address) -> Result<u64, ChainError> {
        let nonce = self
            .bounded(self.provider.get_transaction_count(address, None))
            .await?;
        Ok(nonce.as_u64())
    }
}
