//! # Execution - Bundle Assembly, Submission, and Settlement
//!
//! ## Purpose
//!
//! Turns a validated opportunity plus its selected strategy into signed
//! transactions, simulates the bundle against the private relay, submits it,
//! and settles the result from receipts. The concurrency gate admits at most
//! `max_concurrent_executions` attempts with a debounce between them; every
//! admitted attempt produces a terminal [`ExecutionResult`], never a silent
//! drop. The layer does not retry; the caller re-discovers on the next
//! market tick.
//!
//! ## Pipeline
//!
//! ```text
//! gate -> balance check -> assembly -> gas policy -> sign
//!      -> [bundle: simulate -> submit -> poll stats -> receipt]
//!      -> [public: send    -> poll receipt]
//!      -> settle (parse logs, recompute net profit)
//! ```
//!
//! ## Cancellation
//!
//! `cancel(id)` marks the attempt; a relay-accepted bundle cannot be
//! recalled, but polling stops, the slot frees, and the result reports
//! `Cancelled`.

pub mod bundle;
pub mod calldata;

pub use bundle::{BundleRelay, BundleStats, FlashbotsBundle, FlashbotsClient, SimulationResult};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, Eip1559TransactionRequest, TransactionReceipt, H256, U256};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use uuid::Uuid;

use arb_config::ExecutionConfig;
use arb_types::{
    ExecutionResult, ExecutionStatus, Opportunity, MarketCondition, Token, TransactionInfo,
    TxStatus, VenueId,
};

use crate::chain::{ChainClient, SignerWallet};
use crate::flash_loan::ProviderRegistry;
use crate::strategy::{ExecutionPlan, SelectedStrategy};

/// ERC-20 `Transfer(address,address,uint256)` topic.
fn transfer_topic() -> H256 {
    H256::from(ethers::utils::keccak256(
        "Transfer(address,address,uint256)".as_bytes(),
    ))
}

/// Executes selected opportunities against the chain or the private relay.
pub struct Executor {
    chain: Arc<dyn ChainClient>,
    wallet: SignerWallet,
    relay: Option<Arc<dyn BundleRelay>>,
    providers: Arc<ProviderRegistry>,
    /// Router address per venue; falls back to the pool address itself.
    routers: HashMap<VenueId, Address>,
    config: ExecutionConfig,
    gate: Arc<Semaphore>,
    last_started: Mutex<Option<Instant>>,
    cancelled: Mutex<HashSet<Uuid>>,
    receipt_poll_interval: Duration,
}

impl Executor {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        wallet: SignerWallet,
        relay: Option<Arc<dyn BundleRelay>>,
        providers: Arc<ProviderRegistry>,
        routers: HashMap<VenueId, Address>,
        config: ExecutionConfig,
    ) -> Self {
        let permits = config.max_concurrent_executions.max(1);
        Self {
            chain,
            wallet,
            relay,
            providers,
            routers,
            config,
            gate: Arc::new(Semaphore::new(permits)),
            last_started: Mutex::new(None),
            cancelled: Mutex::new(HashSet::new()),
            receipt_poll_interval: Duration::from_secs(2),
        }
    }

    /// Shorten receipt polling; the simulation harness uses milliseconds.
    pub fn with_receipt_poll_interval(mut self, interval: Duration) -> Self {
        self.receipt_poll_interval = interval;
        self
    }

    /// Permits currently free; the gate invariant is
    /// `in_flight <= max_concurrent_executions`.
    pub fn available_slots(&self) -> usize {
        self.gate.available_permits()
    }

    /// Best-effort cancel: polling stops and the slot frees, but a bundle
    /// already accepted by the relay cannot be recalled.
    pub fn cancel(&self, execution_id: Uuid) {
        self.cancelled.lock().insert(execution_id);
        info!("execution {execution_id} marked cancelled");
    }

    fn is_cancelled(&self, execution_id: &Uuid) -> bool {
        self.cancelled.lock().contains(execution_id)
    }

    /// Execute one opportunity. Always returns a terminal result.
    pub async fn execute(
        &self,
        opportunity: &Opportunity,
        selected: &SelectedStrategy,
        market: &MarketCondition,
    ) -> ExecutionResult {
        let mut result =
            ExecutionResult::started(opportunity.id, selected.plan.id(), Utc::now());

        // Stage 1: concurrency gate and debounce.
        let permit = match self.gate.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                result.finish(
                    ExecutionStatus::Skipped,
                    Some("MaxConcurrent: execution slots exhausted".to_string()),
                    Utc::now(),
                );
                return result;
            }
        };
        {
            let mut last = self.last_started.lock();
            let min_gap = Duration::from_secs(self.config.min_time_between_executions_seconds);
            if let Some(previous) = *last {
                if !min_gap.is_zero() && previous.elapsed() < min_gap {
                    result.finish(
                        ExecutionStatus::Skipped,
                        Some("Debounced: too soon after previous execution".to_string()),
                        Utc::now(),
                    );
                    return result;
                }
            }
            *last = Some(Instant::now());
        }
        let _permit = permit; // held for the rest of the attempt

        result.status = ExecutionStatus::Executing;
        let outcome = self.run_pipeline(opportunity, selected, market, &mut result).await;
        if let Err(message) = outcome {
            if !result.status.is_terminal() {
                result.finish(ExecutionStatus::Failed, Some(message), Utc::now());
            }
        }
        self.cancelled.lock().remove(&result.id);
        result
    }

    async fn run_pipeline(
        &self,
        opportunity: &Opportunity,
        selected: &SelectedStrategy,
        market: &MarketCondition,
        result: &mut ExecutionResult,
    ) -> Result<(), String> {
        let flash_loan = matches!(selected.plan, ExecutionPlan::FlashLoan { .. });

        // Stage 2: balance check on non-flash-loan paths.
        let input_token = opportunity
            .route
            .input_token()
            .ok_or_else(|| "route has no steps".to_string())?
            .clone();
        if !flash_loan {
            let balance = self
                .chain
                .erc20_balance(input_token.address, self.wallet.address())
                .await
                .map_err(|e| format!("balance check failed: {e}"))?;
            if balance < opportunity.input_wei {
                result.finish(
                    ExecutionStatus::Failed,
                    Some(format!(
                        "insufficient balance: {balance} < {} required",
                        opportunity.input_wei
                    )),
                    Utc::now(),
                );
                return Ok(());
            }
        }

        // Stage 3 + 4: transaction assembly with gas policy.
        let mut txs = self
            .assemble(opportunity, selected, market, &input_token, flash_loan)
            .await?;

        if self.is_cancelled(&result.id) {
            result.finish(ExecutionStatus::Cancelled, None, Utc::now());
            return Ok(());
        }

        // Stages 5-8: bundle path or public fallback.
        if selected.strategy.use_flashbots && self.relay.is_some() {
            self.bundle_path(opportunity, selected, &mut txs, result).await
        } else {
            self.public_path(opportunity, selected, &mut txs, result).await
        }
    }

    /// Build the transaction list: swaps, or loan entry + swaps + repayment.
    async fn assemble(
        &self,
        opportunity: &Opportunity,
        selected: &SelectedStrategy,
        market: &MarketCondition,
        input_token: &Token,
        flash_loan: bool,
    ) -> Result<Vec<TransactionInfo>, String> {
        let deadline = Utc::now().timestamp() as u64 + self.config.swap_deadline_seconds;
        let deadline = selected.strategy.deadline_unix.unwrap_or(deadline);
        let recipient = self.wallet.address();

        let base_fee = market.base_fee_wei;
        // max_fee = base_fee * 1.1, priority fee from market or override.
        let max_fee = base_fee.saturating_mul(U256::from(110u64)) / U256::from(100u64);
        let priority_fee = selected
            .strategy
            .priority_fee_wei
            .unwrap_or(market.priority_fee_wei);

        let mut txs: Vec<TransactionInfo> = Vec::new();

        // Flash-loan entry leg.
        let loan = if flash_loan {
            let ExecutionPlan::FlashLoan { provider } = &selected.plan else {
                unreachable!("flash_loan flag follows the plan variant");
            };
            let provider = self
                .providers
                .provider(provider)
                .ok_or_else(|| format!("unknown flash loan provider {provider}"))?;
            let request = arb_types::FlashLoanRequest {
                token_amounts: vec![arb_types::TokenAmount::new(
                    input_token.clone(),
                    opportunity.input_wei,
                )],
                receiver: recipient,
                callback_data: Bytes::new(),
                deadline_unix: deadline,
                max_fee_wei: None,
                slippage_tolerance: selected
                    .strategy
                    .slippage_override
                    .unwrap_or(Decimal::ZERO),
            };
            let fee = self
                .providers
                .quoted_fee_wei(provider.as_ref(), input_token.address, opportunity.input_wei)
                .await
                .map_err(|e| format!("flash loan fee quote failed: {e}"))?;
            txs.push(TransactionInfo {
                tx_hash: None,
                bundle_hash: None,
                from: recipient,
                to: provider.entry_address(),
                data: provider.loan_calldata(&request),
                value: U256::zero(),
                gas_limit: 0,
                gas_price: None,
                max_fee_per_gas: Some(max_fee),
                priority_fee: Some(priority_fee),
                nonce: None,
                status: TxStatus::Submitted,
                gas_used: None,
                effective_gas_price: None,
                block_number: None,
                error: None,
            });
            Some((provider, fee))
        } else {
            None
        };

        // Swap legs.
        let mut amount_in = opportunity.input_wei;
        for step in &opportunity.route.steps {
            let slippage = selected
                .strategy
                .slippage_override
                .unwrap_or(step.max_slippage);
            let min_out =
                crate::discovery::cross_venue::apply_slippage_floor(step.expected_out_wei, slippage);
            let to = self
                .routers
                .get(&step.pool.venue)
                .copied()
                .unwrap_or(step.pool.pool_address);

            txs.push(TransactionInfo {
                tx_hash: None,
                bundle_hash: None,
                from: recipient,
                to,
                data: calldata::step_calldata(step, amount_in, min_out, recipient, deadline),
                value: U256::zero(),
                gas_limit: 0,
                gas_price: None,
                max_fee_per_gas: Some(max_fee),
                priority_fee: Some(priority_fee),
                nonce: None,
                status: TxStatus::Submitted,
                gas_used: None,
                effective_gas_price: None,
                block_number: None,
                error: None,
            });
            amount_in = step.expected_out_wei;
        }

        // Repayment leg closes the loan.
        if let Some((provider, fee)) = loan {
            let repay = opportunity.input_wei.saturating_add(fee);
            let selector = ethers::utils::id("transfer(address,uint256)");
            let mut data = selector.to_vec();
            data.extend(ethers::abi::encode(&[
                ethers::abi::Token::Address(provider.entry_address()),
                ethers::abi::Token::Uint(repay),
            ]));
            txs.push(TransactionInfo {
                tx_hash: None,
                bundle_hash: None,
                from: recipient,
                to: input_token.address,
                data: Bytes::from(data),
                value: U256::zero(),
                gas_limit: 0,
                gas_price: None,
                max_fee_per_gas: Some(max_fee),
                priority_fee: Some(priority_fee),
                nonce: None,
                status: TxStatus::Submitted,
                gas_used: None,
                effective_gas_price: None,
                block_number: None,
                error: None,
            });
        }

        // Gas limits: estimate where unknown, then buffer.
        let buffer_bps = ((Decimal::ONE + self.config.gas_limit_buffer)
            * rust_decimal_macros::dec!(10000))
        .trunc();
        let buffer_bps =
            rust_decimal::prelude::ToPrimitive::to_u64(&buffer_bps).unwrap_or(12_000);
        let mut nonce = self
            .chain
            .nonce(recipient)
            .await
            .map_err(|e| format!("nonce fetch failed: {e}"))?;

        for tx in &mut txs {
            let request: TypedTransaction = Eip1559TransactionRequest::new()
                .from(tx.from)
                .to(tx.to)
                .data(tx.data.clone())
                .into();
            let estimated = self
                .chain
                .estimate_gas(&request)
                .await
                .map_err(|e| format!("gas estimation failed: {e}"))?;
            tx.gas_limit = estimated.saturating_mul(buffer_bps) / 10_000;
            tx.nonce = Some(nonce);
            nonce += 1;
        }

        Ok(txs)
    }

    async fn sign_all(&self, txs: &[TransactionInfo]) -> Result<Vec<Bytes>, String> {
        let chain_id = self
            .chain
            .chain_id()
            .await
            .map_err(|e| format!("chain id fetch failed: {e}"))?;
        let mut signed = Vec::with_capacity(txs.len());
        for tx in txs {
            let request: TypedTransaction = Eip1559TransactionRequest::new()
                .from(tx.from)
                .to(tx.to)
                .data(tx.data.clone())
                .value(tx.value)
                .gas(tx.gas_limit)
                .max_fee_per_gas(tx.max_fee_per_gas.unwrap_or_default())
                .max_priority_fee_per_gas(tx.priority_fee.unwrap_or_default())
                .nonce(tx.nonce.unwrap_or_default())
                .chain_id(chain_id)
                .into();
            signed.push(
                self.wallet
                    .sign_transaction(&request)
                    .await
                    .map_err(|e| format!("signing failed: {e}"))?,
            );
        }
        Ok(signed)
    }

    /// MEV-protected path: simulate, submit, poll inclusion.
    async fn bundle_path(
        &self,
        opportunity: &Opportunity,
        selected: &SelectedStrategy,
        txs: &mut Vec<TransactionInfo>,
        result: &mut ExecutionResult,
    ) -> Result<(), String> {
        let relay = self.relay.as_ref().expect("bundle path requires a relay");
        let signed = self.sign_all(txs).await?;

        let current_block = self
            .chain
            .block_number()
            .await
            .map_err(|e| format!("block number fetch failed: {e}"))?;
        let target_block = current_block + selected.strategy.blocks_into_future;
        let bundle = FlashbotsBundle::new(signed, target_block);

        // Stage 5: relay simulation gates submission.
        let simulation = relay
            .simulate_bundle(&bundle, current_block)
            .await
            .map_err(|e| format!("bundle simulation failed: {e}"))?;
        if !simulation.success {
            result.finish(
                ExecutionStatus::Failed,
                Some(format!(
                    "SimulationFailed: {}",
                    simulation.error.unwrap_or_else(|| "revert".to_string())
                )),
                Utc::now(),
            );
            return Ok(());
        }
        let profit = simulation.profit_wei.unwrap_or_default();
        if profit < selected.strategy.min_profit_threshold_wei {
            result.finish(
                ExecutionStatus::Failed,
                Some(format!(
                    "Unprofitable: simulated profit {profit} below threshold {}",
                    selected.strategy.min_profit_threshold_wei
                )),
                Utc::now(),
            );
            return Ok(());
        }

        // Stage 6: submission.
        let bundle_hash = relay
            .submit_bundle(&bundle)
            .await
            .map_err(|e| format!("SubmissionFailed: {e}"))?;
        for tx in txs.iter_mut() {
            tx.bundle_hash = Some(bundle_hash);
        }
        result.transactions = txs.clone();
        result.status = ExecutionStatus::Submitted;
        info!(
            "bundle {bundle_hash:?} submitted for opportunity {} targeting block {target_block}",
            opportunity.id
        );

        if !selected.strategy.wait_for_receipt {
            return Ok(());
        }

        // Stage 6b: poll inclusion up to max_wait_blocks past the target.
        let give_up_block = target_block + self.config.max_wait_blocks;
        loop {
            if self.is_cancelled(&result.id) {
                result.finish(ExecutionStatus::Cancelled, None, Utc::now());
                return Ok(());
            }
            let stats = relay
                .bundle_stats(bundle_hash, target_block)
                .await
                .map_err(|e| format!("bundle stats failed: {e}"))?;
            if stats.is_included {
                result.status = ExecutionStatus::Included;
                let tx_hash = stats
                    .transaction_hash
                    .ok_or_else(|| "included bundle reported no transaction hash".to_string())?;
                if let Some(first) = result.transactions.first_mut() {
                    first.tx_hash = Some(tx_hash);
                }
                let receipt = self.await_receipt(tx_hash, &result.id).await?;
                return self.settle(opportunity, receipt, result);
            }

            let block = self
                .chain
                .block_number()
                .await
                .map_err(|e| format!("block number fetch failed: {e}"))?;
            if block > give_up_block {
                result.finish(
                    ExecutionStatus::TimedOut,
                    Some(format!(
                        "bundle not included by block {give_up_block} (target {target_block})"
                    )),
                    Utc::now(),
                );
                return Ok(());
            }
            tokio::time::sleep(self.receipt_poll_interval).await;
        }
    }

    /// Public mempool fallback: sequential raw submissions.
    async fn public_path(
        &self,
        opportunity: &Opportunity,
        selected: &SelectedStrategy,
        txs: &mut Vec<TransactionInfo>,
        result: &mut ExecutionResult,
    ) -> Result<(), String> {
        let signed = self.sign_all(txs).await?;

        let mut last_hash = None;
        for (tx, raw) in txs.iter_mut().zip(signed) {
            let hash = self
                .chain
                .send_raw_transaction(raw)
                .await
                .map_err(|e| format!("SubmissionFailed: {e}"))?;
            tx.tx_hash = Some(hash);
            last_hash = Some(hash);
        }
        result.transactions = txs.clone();
        result.status = ExecutionStatus::Submitted;
        debug!(
            "public path submitted {} transaction(s) for opportunity {}",
            result.transactions.len(),
            opportunity.id
        );

        if !selected.strategy.wait_for_receipt {
            return Ok(());
        }
        let hash = last_hash.ok_or_else(|| "no transactions submitted".to_string())?;
        let receipt = self.await_receipt(hash, &result.id).await?;
        self.settle(opportunity, receipt, result)
    }

    /// Bounded receipt poll; cancellation aware.
    async fn await_receipt(
        &self,
        hash: H256,
        execution_id: &Uuid,
    ) -> Result<TransactionReceipt, String> {
        let deadline =
            Instant::now() + Duration::from_secs(self.config.execution_timeout_seconds);
        loop {
            if self.is_cancelled(execution_id) {
                return Err("cancelled while awaiting receipt".to_string());
            }
            match self.chain.transaction_receipt(hash).await {
                Ok(Some(receipt)) => return Ok(receipt),
                Ok(None) => {}
                Err(e) => warn!("receipt poll failed for {hash:?}: {e}"),
            }
            if Instant::now() > deadline {
                return Err(format!(
                    "Timeout: no receipt for {hash:?} within {}s",
                    self.config.execution_timeout_seconds
                ));
            }
            tokio::time::sleep(self.receipt_poll_interval).await;
        }
    }

    /// Stage 8: settle from the receipt; actual output comes from parsed
    /// transfer logs, never from the expectation.
    fn settle(
        &self,
        opportunity: &Opportunity,
        receipt: TransactionReceipt,
        result: &mut ExecutionResult,
    ) -> Result<(), String> {
        let mined_status = receipt.status.map(|s| s.as_u64()).unwrap_or(0);
        let gas_used = receipt.gas_used.map(|g| g.as_u64());
        let effective_price = receipt.effective_gas_price;
        let block_number = receipt.block_number.map(|b| b.as_u64());

        if let Some(tx) = result
            .transactions
            .iter_mut()
            .find(|tx| tx.tx_hash == Some(receipt.transaction_hash))
        {
            tx.status = if mined_status == 1 {
                TxStatus::Confirmed
            } else {
                TxStatus::Failed
            };
            tx.gas_used = gas_used;
            tx.effective_gas_price = effective_price;
            tx.block_number = block_number;
        }
        result.gas_used = gas_used;

        if mined_status != 1 {
            result.finish(
                ExecutionStatus::Reverted,
                Some("transaction mined with status 0".to_string()),
                Utc::now(),
            );
            return Ok(());
        }

        let output_token = opportunity
            .route
            .output_token()
            .ok_or_else(|| "route has no output token".to_string())?;
        let actual_output =
            parse_output_transfer(&receipt, output_token.address, self.wallet.address());

        match actual_output {
            Some(output) => {
                result.actual_output_wei = Some(output);
                result.actual_profit_wei = Some(output.saturating_sub(opportunity.input_wei));
            }
            None => {
                // No decodable transfer: leave actuals unknown rather than
                // echoing the expectation.
                warn!(
                    "no transfer log decoded for execution {}; actual output unknown",
                    result.id
                );
            }
        }

        result.finish(ExecutionStatus::Succeeded, None, Utc::now());
        Ok(())
    }
}

/// Last ERC-20 `Transfer` of `token` into `recipient` within the receipt.
fn parse_output_transfer(
    receipt: &TransactionReceipt,
    token: Address,
    recipient: Address,
) -> Option<U256> {
    let topic = transfer_topic();
    receipt
        .logs
        .iter()
        .filter(|log| log.address == token)
        .filter(|log| log.topics.first() == Some(&topic))
        .filter(|log| {
            log.topics
                .get(2)
                .map(|to| Address::from_slice(&to.as_bytes()[12..]) == recipient)
                .unwrap_or(false)
        })
        .filter_map(|log| {
            (log.data.len() >= 32).then(|| U256::from_big_endian(&log.data[..32]))
        })
        .last()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::mock::{receipt, MockChainClient};
    use crate::execution::bundle::mock::MockRelay;
    use crate::flash_loan::{LendingPoolProvider, VaultProvider};
    use crate::strategy::{ExecutionPlan, ExecutionStrategy, SelectedStrategy};
    use crate::test_support::{token, two_leg_opportunity};
    use ethers::types::Log;

    const TEST_KEY: &str = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

    struct Harness {
        executor: Executor,
        chain: Arc<MockChainClient>,
        relay: Arc<MockRelay>,
        wallet_address: Address,
    }

    fn harness(config: ExecutionConfig) -> Harness {
        let chain = Arc::new(MockChainClient::new());
        let relay = Arc::new(MockRelay::new());
        let wallet = SignerWallet::from_key(TEST_KEY, 1).unwrap();
        let wallet_address = wallet.address();

        let input = token(1, 18).address;
        chain.set_erc20_balance(input, wallet_address, U256::exp10(24));

        let vault_addr = Address::repeat_byte(0xb0);
        chain.set_erc20_balance(input, vault_addr, U256::exp10(24));
        let providers = Arc::new(ProviderRegistry::new(
            vec![
                Arc::new(VaultProvider::new(
                    chain.clone(),
                    wallet.clone(),
                    vault_addr,
                    vec![input],
                )),
                Arc::new(LendingPoolProvider::new(
                    chain.clone(),
                    wallet.clone(),
                    Address::repeat_byte(0xa0),
                    vec![input],
                )),
            ],
            &["zero-fee".to_string(), "lending-pool".to_string()],
        ));

        let executor = Executor::new(
            chain.clone(),
            wallet,
            Some(relay.clone()),
            providers,
            HashMap::new(),
            config,
        )
        .with_receipt_poll_interval(Duration::from_millis(5));

        Harness {
            executor,
            chain,
            relay,
            wallet_address,
        }
    }

    fn strategy(use_flashbots: bool, wait: bool) -> SelectedStrategy {
        SelectedStrategy {
            plan: ExecutionPlan::CrossVenueDirect,
            strategy: ExecutionStrategy {
                use_flashbots,
                wait_for_receipt: wait,
                ..ExecutionStrategy::default()
            },
        }
    }

    fn market() -> MarketCondition {
        let mut market = MarketCondition::empty(Utc::now());
        market.base_fee_wei = U256::from(25_000_000_000u64);
        market.priority_fee_wei = U256::from(1_000_000_000u64);
        market.gas_price_wei = U256::from(30_000_000_000u64);
        market
    }

    fn transfer_log(token: Address, to: Address, amount: U256) -> Log {
        let mut data = [0u8; 32];
        amount.to_big_endian(&mut data);
        Log {
            address: token,
            topics: vec![
                transfer_topic(),
                H256::from(Address::repeat_byte(0x55)),
                H256::from(to),
            ],
            data: Bytes::from(data.to_vec()),
            ..Log::default()
        }
    }

    #[tokio::test]
    async fn fire_and_forget_public_path_submits() {
        let h = harness(ExecutionConfig::default());
        let opp = two_leg_opportunity(U256::exp10(18), 1_000_000);
        let result = h.executor.execute(&opp, &strategy(false, false), &market()).await;

        assert_eq!(result.status, ExecutionStatus::Submitted);
        assert_eq!(result.transactions.len(), 2);
        assert_eq!(h.chain.sent_transactions().len(), 2);
        assert!(result.transactions.iter().all(|tx| tx.tx_hash.is_some()));
        // Gate slot released.
        assert_eq!(h.executor.available_slots(), 1);
    }

    #[tokio::test]
    async fn successful_receipt_settles_with_parsed_output() {
        let h = harness(ExecutionConfig {
            execution_timeout_seconds: 2,
            ..ExecutionConfig::default()
        });
        let opp = two_leg_opportunity(U256::exp10(18), 1_000_000);
        let out_token = opp.route.output_token().unwrap().address;
        let actual_out = U256::exp10(18) + U256::exp10(16); // 1% realized

        // Precompute the hash the mock assigns to the last submitted tx: we
        // run once to learn it, then script the receipt for a second run.
        let probe = h.executor.execute(&opp, &strategy(false, false), &market()).await;
        let last_hash = probe.transactions.last().unwrap().tx_hash.unwrap();

        let mut mined = receipt(last_hash, 105, 1, 180_000);
        mined.logs = vec![transfer_log(out_token, h.wallet_address, actual_out)];
        h.chain.script_receipts(last_hash, vec![None, Some(mined)]);

        let result = h.executor.execute(&opp, &strategy(false, true), &market()).await;
        assert_eq!(result.status, ExecutionStatus::Succeeded);
        assert_eq!(result.actual_output_wei, Some(actual_out));
        assert_eq!(
            result.actual_profit_wei,
            Some(actual_out - U256::exp10(18))
        );
        assert!(result.end_ts.is_some());
    }

    #[tokio::test]
    async fn reverted_receipt_records_gas_and_status() {
        let h = harness(ExecutionConfig {
            execution_timeout_seconds: 2,
            ..ExecutionConfig::default()
        });
        let opp = two_leg_opportunity(U256::exp10(18), 1_000_000);

        let probe = h.executor.execute(&opp, &strategy(false, false), &market()).await;
        let last_hash = probe.transactions.last().unwrap().tx_hash.unwrap();
        h.chain
            .script_receipts(last_hash, vec![Some(receipt(last_hash, 103, 0, 250_000))]);

        let result = h.executor.execute(&opp, &strategy(false, true), &market()).await;
        assert_eq!(result.status, ExecutionStatus::Reverted);
        assert_eq!(result.gas_used, Some(250_000));
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn bundle_simulation_failure_rejects() {
        let h = harness(ExecutionConfig::default());
        h.relay
            .script_simulation(MockRelay::failing_simulation("execution reverted"));

        let opp = two_leg_opportunity(U256::exp10(18), 1_000_000);
        let result = h.executor.execute(&opp, &strategy(true, false), &market()).await;

        assert_eq!(result.status, ExecutionStatus::Failed);
        assert!(result.error.unwrap().starts_with("SimulationFailed"));
        assert!(h.relay.submitted_bundles().is_empty());
    }

    #[tokio::test]
    async fn bundle_below_profit_threshold_rejects() {
        let h = harness(ExecutionConfig::default());
        h.relay
            .script_simulation(MockRelay::passing_simulation(210_000, U256::from(1u64)));

        let opp = two_leg_opportunity(U256::exp10(18), 1_000_000);
        let mut selected = strategy(true, false);
        selected.strategy.min_profit_threshold_wei = U256::exp10(16);
        let result = h.executor.execute(&opp, &selected, &market()).await;

        assert_eq!(result.status, ExecutionStatus::Failed);
        assert!(result.error.unwrap().starts_with("Unprofitable"));
    }

    #[tokio::test]
    async fn bundle_not_included_times_out() {
        let h = harness(ExecutionConfig {
            max_wait_blocks: 3,
            ..ExecutionConfig::default()
        });
        h.relay
            .script_simulation(MockRelay::passing_simulation(210_000, U256::exp10(17)));
        // Stats never report inclusion.
        h.relay.script_stats(vec![BundleStats::default()]);

        let opp = two_leg_opportunity(U256::exp10(18), 1_000_000);
        let selected = strategy(true, true);

        // Advance the chain past the give-up block while polling runs.
        let chain = h.chain.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            chain.advance_blocks(20);
        });

        let result = h.executor.execute(&opp, &selected, &market()).await;
        assert_eq!(result.status, ExecutionStatus::TimedOut);
    }

    #[tokio::test]
    async fn included_bundle_resolves_tx_and_settles() {
        let h = harness(ExecutionConfig {
            execution_timeout_seconds: 2,
            ..ExecutionConfig::default()
        });
        h.relay
            .script_simulation(MockRelay::passing_simulation(210_000, U256::exp10(17)));

        let opp = two_leg_opportunity(U256::exp10(18), 1_000_000);
        let out_token = opp.route.output_token().unwrap().address;
        let included_hash = H256::repeat_byte(0x42);
        h.relay.script_stats(vec![
            BundleStats::default(),
            BundleStats {
                is_included: true,
                block_number: Some(102),
                transaction_hash: Some(included_hash),
                ..BundleStats::default()
            },
        ]);
        let mut mined = receipt(included_hash, 102, 1, 210_000);
        mined.logs = vec![transfer_log(
            out_token,
            h.wallet_address,
            U256::exp10(18) + U256::exp10(16),
        )];
        h.chain.script_receipts(included_hash, vec![Some(mined)]);

        let result = h.executor.execute(&opp, &strategy(true, true), &market()).await;
        assert_eq!(result.status, ExecutionStatus::Succeeded);
        assert_eq!(result.transactions[0].tx_hash, Some(included_hash));
        assert!(result.actual_output_wei.is_some());
    }

    #[tokio::test]
    async fn gate_skips_when_slots_exhausted() {
        let h = harness(ExecutionConfig {
            max_concurrent_executions: 1,
            execution_timeout_seconds: 30,
            ..ExecutionConfig::default()
        });
        let opp = two_leg_opportunity(U256::exp10(18), 1_000_000);

        // First execution holds the only slot while waiting on a receipt
        // that never arrives quickly.
        let probe = h.executor.execute(&opp, &strategy(false, false), &market()).await;
        let last_hash = probe.transactions.last().unwrap().tx_hash.unwrap();
        h.chain.script_receipts(last_hash, vec![None]);

        let executor = Arc::new(h.executor);
        let slow = {
            let executor = executor.clone();
            let opp = opp.clone();
            tokio::spawn(async move {
                executor.execute(&opp, &strategy(false, true), &market()).await
            })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;

        let second = executor.execute(&opp, &strategy(false, false), &market()).await;
        assert_eq!(second.status, ExecutionStatus::Skipped);
        assert!(second.error.unwrap().starts_with("MaxConcurrent"));

        slow.abort();
    }

    #[tokio::test]
    async fn debounce_skips_rapid_reexecution() {
        let h = harness(ExecutionConfig {
            min_time_between_executions_seconds: 60,
            ..ExecutionConfig::default()
        });
        let opp = two_leg_opportunity(U256::exp10(18), 1_000_000);

        let first = h.executor.execute(&opp, &strategy(false, false), &market()).await;
        assert_eq!(first.status, ExecutionStatus::Submitted);

        let second = h.executor.execute(&opp, &strategy(false, false), &market()).await;
        assert_eq!(second.status, ExecutionStatus::Skipped);
        assert!(second.error.unwrap().starts_with("Debounced"));
    }

    #[tokio::test]
    async fn insufficient_balance_fails_non_flash_path() {
        let h = harness(ExecutionConfig::default());
        let opp = two_leg_opportunity(U256::exp10(18), 1_000_000);
        h.chain.set_erc20_balance(
            opp.route.input_token().unwrap().address,
            h.wallet_address,
            U256::zero(),
        );

        let result = h.executor.execute(&opp, &strategy(false, false), &market()).await;
        assert_eq!(result.status, ExecutionStatus::Failed);
        assert!(result.error.unwrap().starts_with("insufficient balance"));
    }

    #[tokio::test]
    async fn flash_loan_plan_assembles_entry_swaps_repayment() {
        let h = harness(ExecutionConfig::default());
        let mut opp = two_leg_opportunity(U256::exp10(18), 1_000_000);
        opp.flash_loan_required = true;
        // Wallet holds nothing: only the loan makes this executable.
        h.chain.set_erc20_balance(
            opp.route.input_token().unwrap().address,
            h.wallet_address,
            U256::zero(),
        );

        let selected = SelectedStrategy {
            plan: ExecutionPlan::FlashLoan {
                provider: "zero-fee".to_string(),
            },
            strategy: ExecutionStrategy::default(),
        };
        let result = h.executor.execute(&opp, &selected, &market()).await;

        assert_eq!(result.status, ExecutionStatus::Submitted);
        // Entry + 2 swaps + repayment.
        assert_eq!(result.transactions.len(), 4);
        let entry = &result.transactions[0];
        assert_eq!(
            &entry.data[..4],
            ethers::utils::id("flashLoan(address,address[],uint256[],bytes)").as_slice()
        );
        let repay = result.transactions.last().unwrap();
        assert_eq!(
            &repay.data[..4],
            ethers::utils::id("transfer(address,uint256)").as_slice()
        );
        // Repayment goes to the input token contract.
        assert_eq!(repay.to, opp.route.input_token().unwrap().address);
    }

    #[tokio::test]
    async fn cancel_before_submission_reports_cancelled() {
        let h = harness(ExecutionConfig::default());
        let opp = two_leg_opportunity(U256::exp10(18), 1_000_000);

        // Cancellation is keyed by execution id, which is allocated inside
        // execute(); exercise the cancellation check through await_receipt.
        let id = Uuid::new_v4();
        h.executor.cancel(id);
        let err = h
            .executor
            .await_receipt(H256::repeat_byte(9), &id)
            .await
            .unwrap_err();
        assert!(err.contains("cancelled"));
        let _ = opp;
    }

    #[test]
    fn transfer_parsing_takes_last_matching_log() {
        let token_addr = Address::repeat_byte(1);
        let me = Address::repeat_byte(2);
        let mut mined = receipt(H256::repeat_byte(3), 100, 1, 100_000);
        mined.logs = vec![
            transfer_log(token_addr, me, U256::from(5u64)),
            transfer_log(Address::repeat_byte(9), me, U256::from(7u64)), // other token
            transfer_log(token_addr, Address::repeat_byte(8), U256::from(8u64)), // other recipient
            transfer_log(token_addr, me, U256::from(11u64)),
        ];
        assert_eq!(
            parse_output_transfer(&mined, token_addr, me),
            Some(U256::from(11u64))
        );
    }
}
