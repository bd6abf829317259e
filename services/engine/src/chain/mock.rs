//! Scripted chain client for the simulation harness and tests.
//!
//! Every response is table-driven; receipt scripts pop in order so a test can
//! model "pending, pending, mined" without touching a network.

use std::collections::HashMap;
use std::collections::VecDeque;

use async_trait::async_trait;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionReceipt, H256, U256, U64};
use parking_lot::Mutex;

use super::{ChainClient, ChainError};

#[derive(Default)]
struct MockState {
    block_number: u64,
    chain_id: u64,
    gas_price: U256,
    base_fee: U256,
    priority_fee: U256,
    balances: HashMap<Address, U256>,
    erc20_balances: HashMap<(Address, Address), U256>,
    nonces: HashMap<Address, u64>,
    /// Per-hash receipt scripts; `None` entries model "still pending".
    receipts: HashMap<H256, VecDeque<Option<TransactionReceipt>>>,
    call_results: Vec<Bytes>,
    estimate_gas: u64,
    sent_raw: Vec<Bytes>,
    fail_transport: bool,
}

/// In-process chain client with scripted responses.
pub struct MockChainClient {
    state: Mutex<MockState>,
}

impl Default for MockChainClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChainClient {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                block_number: 100,
                chain_id: 1,
                gas_price: U256::from(30_000_000_000u64),
                base_fee: U256::from(25_000_000_000u64),
                priority_fee: U256::from(1_000_000_000u64),
                estimate_gas: 200_000,
                ..MockState::default()
            }),
        }
    }

    pub fn set_block_number(&self, number: u64) {
        self.state.lock().block_number = number;
    }

    pub fn advance_blocks(&self, count: u64) {
        self.state.lock().block_number += count;
    }

    pub fn set_gas(&self, gas_price: U256, base_fee: U256, priority_fee: U256) {
        let mut state = self.state.lock();
        state.gas_price = gas_price;
        state.base_fee = base_fee;
        state.priority_fee = priority_fee;
    }

    pub fn set_balance(&self, address: Address, balance: U256) {
        self.state.lock().balances.insert(address, balance);
    }

    pub fn set_erc20_balance(&self, token: Address, holder: Address, balance: U256) {
        self.state
            .lock()
            .erc20_balances
            .insert((token, holder), balance);
    }

    /// Script the receipt sequence returned for `hash`, in poll order.
    pub fn script_receipts(&self, hash: H256, sequence: Vec<Option<TransactionReceipt>>) {
        self.state.lock().receipts.insert(hash, sequence.into());
    }

    pub fn push_call_result(&self, result: Bytes) {
        self.state.lock().call_results.push(result);
    }

    pub fn set_estimate_gas(&self, gas: u64) {
        self.state.lock().estimate_gas = gas;
    }

    /// Make every subsequent call fail at the transport layer.
    pub fn fail_transport(&self, fail: bool) {
        self.state.lock().fail_transport = fail;
    }

    /// Raw transactions submitted so far, in order.
    pub fn sent_transactions(&self) -> Vec<Bytes> {
        self.state.lock().sent_raw.clone()
    }

    fn guard(&self) -> Result<(), ChainError> {
        if self.state.lock().fail_transport {
            return Err(ChainError::Transport("scripted transport failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn block_number(&self) -> Result<u64, ChainError> {
        self.guard()?;
        Ok(self.state.lock().block_number)
    }

    async fn chain_id(&self) -> Result<u64, ChainError> {
        self.guard()?;
        Ok(self.state.lock().chain_id)
    }

    async fn gas_price(&self) -> Result<U256, ChainError> {
        self.guard()?;
        Ok(self.state.lock().gas_price)
    }

    async fn base_fee(&self) -> Result<U256, ChainError> {
        self.guard()?;
        Ok(self.state.lock().base_fee)
    }

    async fn priority_fee(&self) -> Result<U256, ChainError> {
        self.guard()?;
        Ok(self.state.lock().priority_fee)
    }

    async fn estimate_gas(&self, _tx: &TypedTransaction) -> Result<u64, ChainError> {
        self.guard()?;
        Ok(self.state.lock().estimate_gas)
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256, ChainError> {
        self.guard()?;
        let hash = H256::from(ethers::utils::keccak256(&raw));
        self.state.lock().sent_raw.push(raw);
        Ok(hash)
    }

    async fn transaction_receipt(
        &self,
        hash: H256,
    ) -> Result<Option<TransactionReceipt>, ChainError> {
        self.guard()?;
        let mut state = self.state.lock();
        match state.receipts.get_mut(&hash) {
            Some(queue) => match queue.pop_front() {
                // Hold the final script entry so late polls keep seeing it.
                Some(entry) => {
                    if queue.is_empty() {
                        queue.push_back(entry.clone());
                    }
                    Ok(entry)
                }
                None => Ok(None),
            },
            None => Ok(None),
        }
    }

    async fn call(&self, _tx: &TypedTransaction) -> Result<Bytes, ChainError> {
        self.guard()?;
        let mut state = self.state.lock();
        if state.call_results.is_empty() {
            return Ok(Bytes::new());
        }
        Ok(state.call_results.remove(0))
    }

    async fn get_balance(&self, address: Address) -> Result<U256, ChainError> {
        self.guard()?;
        Ok(self
            .state
            .lock()
            .balances
            .get(&address)
            .copied()
            .unwrap_or_default())
    }

    async fn erc20_balance(&self, token: Address, holder: Address) -> Result<U256, ChainError> {
        self.guard()?;
        Ok(self
            .state
            .lock()
            .erc20_balances
            .get(&(token, holder))
            .copied()
            .unwrap_or_default())
    }

    async fn nonce(&self, address: Address) -> Result<u64, ChainError> {
        self.guard()?;
        Ok(self
            .state
            .lock()
            .nonces
            .get(&address)
            .copied()
            .unwrap_or_default())
    }
}

/// Build a minimal mined receipt for scripting.
pub fn receipt(tx_hash: H256, block: u64, status: u64, gas_used: u64) -> TransactionReceipt {
    TransactionReceipt {
        transaction_hash: tx_hash,
        block_number: Some(U64::from(block)),
        status: Some(U64::from(status)),
        gas_used: Some(U256::from(gas_used)),
        effective_gas_price: Some(U256::from(30_000_000_000u64)),
        ..TransactionReceipt::default()
    }
}
