//! Chain access seam: the RPC surface the engine consumes.
//!
//! The engine never talks to a provider type directly; everything goes
//! through [`ChainClient`] so execution and tracking run identically against
//! a live endpoint or the in-process mock used by the simulation harness.

mod ethers_client;
pub mod mock;
mod wallet;

pub use ethers_client::EthersChainClient;
pub use wallet::SignerWallet;

use async_trait::async_trait;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionReceipt, H256, U256};
use thiserror::Error;

/// Errors surfaced by chain access.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("rpc transport failed: {0}")]
    Transport(String),

    #[error("rpc call timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("transaction {0:?} not found")]
    NotFound(H256),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// The RPC contract consumed by the engine; connection pooling and retries
/// live behind this seam.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn block_number(&self) -> Result<u64, ChainError>;
    async fn chain_id(&self) -> Result<u64, ChainError>;

    async fn gas_price(&self) -> Result<U256, ChainError>;
    async fn base_fee(&self) -> Result<U256, ChainError>;
    async fn priority_fee(&self) -> Result<U256, ChainError>;

    async fn estimate_gas(&self, tx: &TypedTransaction) -> Result<u64, ChainError>;
    async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256, ChainError>;
    async fn transaction_receipt(
        &self,
        hash: H256,
    ) -> Result<Option<TransactionReceipt>, ChainError>;

    /// eth_call against latest state.
    async fn call(&self, tx: &TypedTransaction) -> Result<Bytes, ChainError>;

    async fn get_balance(&self, address: Address) -> Result<U256, ChainError>;
    async fn erc20_balance(&self, token: Address, holder: Address) -> Result<U256, ChainError>;
    async fn nonce(&self, address: Address) -> Result<u64, ChainError>;
}
