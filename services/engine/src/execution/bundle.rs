//! Private-relay bundle protocol: simulation, submission, and stats.
//!
//! Requests are JSON-RPC bodies POSTed with the
//! `X-Flashbots-Signature: {signer}:{sig}` header, where `sig` is the
//! signature of `keccak(json_body)` under a dedicated authentication key
//! that is distinct from the trading wallet key.

use async_trait::async_trait;
use ethers::types::{Bytes, H256, U256};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};

use crate::chain::SignerWallet;

/// An ordered, atomic group of signed transactions targeted at one block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlashbotsBundle {
    pub signed_txs: Vec<Bytes>,
    pub target_block: u64,
    pub min_timestamp: Option<u64>,
    pub max_timestamp: Option<u64>,
    /// Hashes allowed to revert without invalidating the bundle.
    pub reverting_tx_hashes: Vec<H256>,
}

impl FlashbotsBundle {
    pub fn new(signed_txs: Vec<Bytes>, target_block: u64) -> Self {
        Self {
            signed_txs,
            target_block,
            min_timestamp: None,
            max_timestamp: None,
            reverting_tx_hashes: Vec::new(),
        }
    }
}

/// Relay simulation verdict.
#[derive(Debug, Clone)]
pub struct SimulationResult {
    pub success: bool,
    pub error: Option<String>,
    pub gas_used: u64,
    pub effective_gas_price: U256,
    pub eth_sent_to_coinbase: U256,
    /// Simulated profit to the searcher in wei, when the relay reports it.
    pub profit_wei: Option<U256>,
}

/// Relay inclusion stats for a submitted bundle.
#[derive(Debug, Clone, Default)]
pub struct BundleStats {
    pub bundle_hash: H256,
    pub is_included: bool,
    pub block_number: Option<u64>,
    pub transaction_hash: Option<H256>,
    pub gas_used: Option<u64>,
    pub gas_price: Option<U256>,
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("relay transport failed: {0}")]
    Transport(String),

    #[error("relay rejected request: {0}")]
    Rejected(String),

    #[error("invalid relay response: {0}")]
    InvalidResponse(String),
}

/// The private relay surface execution and tracking consume.
#[async_trait]
pub trait BundleRelay: Send + Sync {
    async fn simulate_bundle(
        &self,
        bundle: &FlashbotsBundle,
        state_block: u64,
    ) -> Result<SimulationResult, RelayError>;

    /// Returns the relay's bundle hash.
    async fn submit_bundle(&self, bundle: &FlashbotsBundle) -> Result<H256, RelayError>;

    async fn bundle_stats(
        &self,
        bundle_hash: H256,
        target_block: u64,
    ) -> Result<BundleStats, RelayError>;
}

/// HTTP client for a Flashbots-protocol relay.
pub struct FlashbotsClient {
    relay_url: String,
    http: reqwest::Client,
    /// Dedicated request-signing identity, never the trading key.
    auth: SignerWallet,
}

impl FlashbotsClient {
    pub fn new(relay_url: String, auth: SignerWallet) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .tcp_nodelay(true)
            .build()?;
        Ok(Self {
            relay_url,
            http,
            auth,
        })
    }

    fn hex_txs(bundle: &FlashbotsBundle) -> Vec<String> {
        bundle
            .signed_txs
            .iter()
            .map(|tx| format!("0x{}", hex::encode(tx)))
            .collect()
    }

    /// POST a signed JSON-RPC request and return the `result` member.
    async fn request(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, RelayError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        })
        .to_string();

        let digest = H256::from(ethers::utils::keccak256(body.as_bytes()));
        let signature = self
            .auth
            .sign_hash(digest)
            .map_err(|e| RelayError::Transport(format!("request signing failed: {e}")))?;
        let header = format!("{:?}:0x{}", self.auth.address(), signature);

        let response = self
            .http
            .post(&self.relay_url)
            .header("Content-Type", "application/json")
            .header("X-Flashbots-Signature", header)
            .body(body)
            .send()
            .await
            .map_err(|e| RelayError::Transport(e.to_string()))?;

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RelayError::InvalidResponse(e.to_string()))?;

        if let Some(error) = payload.get("error") {
            return Err(RelayError::Rejected(error.to_string()));
        }
        payload
            .get("result")
            .cloned()
            .ok_or_else(|| RelayError::InvalidResponse("missing result".to_string()))
    }
}

#[async_trait]
impl BundleRelay for FlashbotsClient {
    async fn simulate_bundle(
        &self,
        bundle: &FlashbotsBundle,
        state_block: u64,
    ) -> Result<SimulationResult, RelayError> {
        let params = json!([{
            "txs": Self::hex_txs(bundle),
            "blockNumber": format!("0x{:x}", bundle.target_block),
            "stateBlockNumber": format!("0x{:x}", state_block),
            "timestamp": bundle.min_timestamp.unwrap_or(0),
        }]);

        let result = self.request("eth_callBundle", params).await?;
        debug!("bundle simulation response: {result}");

        let first_error = result
            .get("results")
            .and_then(|r| r.as_array())
            .and_then(|txs| {
                txs.iter()
                    .find_map(|tx| tx.get("error").map(|e| e.to_string()))
            });

        let gas_used = result
            .get("totalGasUsed")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        let coinbase_diff = result
            .get("coinbaseDiff")
            .and_then(|v| v.as_str())
            .and_then(|s| U256::from_dec_str(s).ok())
            .unwrap_or_default();
        let eth_to_coinbase = result
            .get("ethSentToCoinbase")
            .and_then(|v| v.as_str())
            .and_then(|s| U256::from_dec_str(s).ok())
            .unwrap_or_default();

        Ok(SimulationResult {
            success: first_error.is_none(),
            error: first_error,
            gas_used,
            effective_gas_price: if gas_used > 0 {
                coinbase_diff / U256::from(gas_used)
            } else {
                U256::zero()
            },
            eth_sent_to_coinbase: eth_to_coinbase,
            profit_wei: Some(coinbase_diff.saturating_sub(eth_to_coinbase)),
        })
    }

    async fn submit_bundle(&self, bundle: &FlashbotsBundle) -> Result<H256, RelayError> {
        let params = json!([{
            "txs": Self::hex_txs(bundle),
            "blockNumber": format!("0x{:x}", bundle.target_block),
            "minTimestamp": bundle.min_timestamp,
            "maxTimestamp": bundle.max_timestamp,
            "revertingTxHashes": bundle
                .reverting_tx_hashes
                .iter()
                .map(|h| format!("{h:?}"))
                .collect::<Vec<_>>(),
        }]);

        let result = self.request("eth_sendBundle", params).await?;
        let hash = result
            .get("bundleHash")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<H256>().ok())
            .ok_or_else(|| RelayError::InvalidResponse("missing bundleHash".to_string()))?;
        debug!("bundle submitted: {hash:?} targeting block {}", bundle.target_block);
        Ok(hash)
    }

    async fn bundle_stats(
        &self,
        bundle_hash: H256,
        target_block: u64,
    ) -> Result<BundleStats, RelayError> {
        let params = json!([{
            "bundleHash": format!("{bundle_hash:?}"),
            "blockNumber": format!("0x{target_block:x}"),
        }]);

        let result = self.request("flashbots_getBundleStats", params).await?;
        let is_included = result
            .get("isIncluded")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if !is_included {
            warn!("bundle {bundle_hash:?} not yet included at block {target_block}");
        }

        Ok(BundleStats {
            bundle_hash,
            is_included,
            block_number: result.get("blockNumber").and_then(|v| v.as_u64()),
            transaction_hash: result
                .get("transactionHash")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse::<H256>().ok()),
            gas_used: result.get("gasUsed").and_then(|v| v.as_u64()),
            gas_price: result
                .get("gasPrice")
                .and_then(|v| v.as_str())
                .and_then(|s| U256::from_dec_str(s).ok()),
        })
    }
}

/// Scripted relay for tests.
pub mod mock {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct MockRelayState {
        simulation: Option<SimulationResult>,
        submit_error: Option<String>,
        stats: VecDeque<BundleStats>,
        submitted: Vec<FlashbotsBundle>,
    }

    /// In-process relay with scripted responses.
    #[derive(Default)]
    pub struct MockRelay {
        state: Mutex<MockRelayState>,
    }

    impl MockRelay {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn script_simulation(&self, result: SimulationResult) {
            self.state.lock().simulation = Some(result);
        }

        pub fn script_submit_error(&self, message: &str) {
            self.state.lock().submit_error = Some(message.to_string());
        }

        /// Stats responses in poll order; the final entry repeats.
        pub fn script_stats(&self, sequence: Vec<BundleStats>) {
            self.state.lock().stats = sequence.into();
        }

        pub fn submitted_bundles(&self) -> Vec<FlashbotsBundle> {
            self.state.lock().submitted.clone()
        }

        pub fn passing_simulation(gas_used: u64, profit_wei: U256) -> SimulationResult {
            SimulationResult {
                success: true,
                error: None,
                gas_used,
                effective_gas_price: U256::from(30_000_000_000u64),
                eth_sent_to_coinbase: U256::zero(),
                profit_wei: Some(profit_wei),
            }
        }

        pub fn failing_simulation(error: &str) -> SimulationResult {
            SimulationResult {
                success: false,
                error: Some(error.to_string()),
                gas_used: 0,
                effective_gas_price: U256::zero(),
                eth_sent_to_coinbase: U256::zero(),
                profit_wei: None,
            }
        }
    }

    #[async_trait]
    impl BundleRelay for MockRelay {
        async fn simulate_bundle(
            &self,
            _bundle: &FlashbotsBundle,
            _state_block: u64,
        ) -> Result<SimulationResult, RelayError> {
            self.state
                .lock()
                .simulation
                .clone()
                .ok_or_else(|| RelayError::Transport("no scripted simulation".to_string()))
        }

        async fn submit_bundle(&self, bundle: &FlashbotsBundle) -> Result<H256, RelayError> {
            let mut state = self.state.lock();
            if let Some(message) = &state.submit_error {
                return Err(RelayError::Rejected(message.clone()));
            }
            state.submitted.push(bundle.clone());
            let seed = state.submitted.len() as u8;
            Ok(H256::repeat_byte(seed))
        }

        async fn bundle_stats(
            &self,
            bundle_hash: H256,
            _target_block: u64,
        ) -> Result<BundleStats, RelayError> {
            let mut state = self.state.lock();
            match state.stats.pop_front() {
                Some(stats) => {
                    if state.stats.is_empty() {
                        state.stats.push_back(stats.clone());
                    }
                    Ok(BundleStats {
                        bundle_hash,
                        ..stats
                    })
                }
                None => Ok(BundleStats {
                    bundle_hash,
                    ..BundleStats::default()
                }),
            }
        }
    }
}
