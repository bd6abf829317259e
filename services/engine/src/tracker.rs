//! # Transaction Tracker - Receipt Polling and Reorg Handling
//!
//! ## Purpose
//!
//! Monitors submitted transactions and bundles until a terminal outcome:
//! polls receipts on a fixed cadence up to an attempt cap, waits for the
//! configured confirmation depth, downgrades to `Unknown` and re-polls when
//! a reorganization invalidates a previously seen receipt, and resolves
//! bundle inclusion through relay stats into the same receipt flow.
//!
//! ## Concurrency
//!
//! Each tracked hash runs as an independent poll; the monitored-transaction
//! map sits behind its own lock and is never held across an await.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ethers::types::{TransactionReceipt, H256};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use arb_config::TrackerConfig;
use arb_types::TxStatus;

use crate::chain::{ChainClient, ChainError};
use crate::execution::bundle::{BundleRelay, RelayError};

/// Terminal outcome of tracking one transaction or bundle.
#[derive(Debug)]
pub enum TrackOutcome {
    /// Mined with status 1 and the confirmation depth reached.
    Confirmed(TransactionReceipt),
    /// Mined with status 0; the caller records the gas burn.
    Reverted(TransactionReceipt),
    /// Attempt or block window exhausted.
    TimedOut,
    /// Cancelled by the caller.
    Cancelled,
}

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error("no relay configured for bundle tracking")]
    NoRelay,
}

#[derive(Debug, Clone)]
struct MonitoredTx {
    status: TxStatus,
    /// Block of the last seen receipt, for reorg detection.
    seen_block: Option<u64>,
    attempts: u32,
}

/// Polls receipts and relay stats until terminal outcomes.
pub struct TransactionTracker {
    chain: Arc<dyn ChainClient>,
    relay: Option<Arc<dyn BundleRelay>>,
    config: TrackerConfig,
    monitored: Mutex<HashMap<H256, MonitoredTx>>,
    cancelled: Mutex<std::collections::HashSet<H256>>,
    poll_interval: Duration,
}

impl TransactionTracker {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        relay: Option<Arc<dyn BundleRelay>>,
        config: TrackerConfig,
    ) -> Self {
        let poll_interval = Duration::from_secs(config.poll_interval_seconds);
        Self {
            chain,
            relay,
            config,
            monitored: Mutex::new(HashMap::new()),
            cancelled: Mutex::new(std::collections::HashSet::new()),
            poll_interval,
        }
    }

    /// Shorten polling; the simulation harness uses milliseconds.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn monitored_count(&self) -> usize {
        self.monitored.lock().len()
    }

    pub fn status_of(&self, hash: &H256) -> Option<TxStatus> {
        self.monitored.lock().get(hash).map(|m| m.status)
    }

    /// Stop polling a hash; the in-flight poll resolves `Cancelled`.
    pub fn cancel(&self, hash: H256) {
        self.cancelled.lock().insert(hash);
    }

    /// Poll a transaction until confirmed, reverted, or out of attempts.
    pub async fn track_transaction(&self, hash: H256) -> Result<TrackOutcome, TrackerError> {
        self.monitored.lock().insert(
            hash,
            MonitoredTx {
                status: TxStatus::Submitted,
                seen_block: None,
                attempts: 0,
            },
        );

        let mut last_chain_block: Option<u64> = None;

        loop {
            if self.cancelled.lock().remove(&hash) {
                self.monitored.lock().remove(&hash);
                return Ok(TrackOutcome::Cancelled);
            }

            let attempts = {
                let mut monitored = self.monitored.lock();
                let entry = monitored.get_mut(&hash).expect("tracked entry exists");
                entry.attempts += 1;
                entry.attempts
            };
            if attempts > self.config.max_attempts {
                self.set_status(hash, TxStatus::Timeout);
                info!("tracking {hash:?} timed out after {} attempts", attempts - 1);
                return Ok(TrackOutcome::TimedOut);
            }

            // Block-number regression means the head we polled against is gone.
            let chain_block = self.chain.block_number().await?;
            if let Some(previous) = last_chain_block {
                if chain_block < previous {
                    warn!(
                        "chain head regressed {previous} -> {chain_block}; marking {hash:?} unknown"
                    );
                    self.set_status(hash, TxStatus::Unknown);
                }
            }
            last_chain_block = Some(chain_block);

            match self.chain.transaction_receipt(hash).await {
                Ok(Some(receipt)) => {
                    let receipt_block = receipt.block_number.map(|b| b.as_u64());
                    {
                        let mut monitored = self.monitored.lock();
                        if let Some(entry) = monitored.get_mut(&hash) {
                            entry.seen_block = receipt_block;
                        }
                    }

                    // Hold for the confirmation depth before going terminal.
                    if let Some(mined_at) = receipt_block {
                        if chain_block < mined_at + self.config.confirmation_blocks {
                            debug!(
                                "receipt for {hash:?} at block {mined_at}, waiting for depth {}",
                                self.config.confirmation_blocks
                            );
                            tokio::time::sleep(self.poll_interval).await;
                            continue;
                        }
                    }

                    let succeeded = receipt.status.map(|s| s.as_u64()) == Some(1);
                    self.set_status(
                        hash,
                        if succeeded {
                            TxStatus::Confirmed
                        } else {
                            TxStatus::Failed
                        },
                    );
                    return Ok(if succeeded {
                        TrackOutcome::Confirmed(receipt)
                    } else {
                        TrackOutcome::Reverted(receipt)
                    });
                }
                Ok(None) => {
                    // A receipt we saw earlier has vanished: reorg. Downgrade
                    // and keep polling.
                    let seen = self.monitored.lock().get(&hash).and_then(|m| m.seen_block);
                    if let Some(block) = seen {
                        warn!(
                            "receipt for {hash:?} (block {block}) vanished, reorg suspected"
                        );
                        self.set_status(hash, TxStatus::Unknown);
                        let mut monitored = self.monitored.lock();
                        if let Some(entry) = monitored.get_mut(&hash) {
                            entry.seen_block = None;
                        }
                    }
                }
                Err(e) => {
                    warn!("receipt poll for {hash:?} failed: {e}");
                }
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Poll bundle stats until inclusion, then run the receipt flow on the
    /// resolved transaction hash.
    pub async fn track_bundle(
        &self,
        bundle_hash: H256,
        target_block: u64,
    ) -> Result<TrackOutcome, TrackerError> {
        let relay = self.relay.as_ref().ok_or(TrackerError::NoRelay)?;
        let give_up_block = target_block + self.config.max_wait_blocks;

        loop {
            if self.cancelled.lock().remove(&bundle_hash) {
                return Ok(TrackOutcome::Cancelled);
            }

            let stats = relay.bundle_stats(bundle_hash, target_block).await?;
            if stats.is_included {
                let Some(tx_hash) = stats.transaction_hash else {
                    warn!("bundle {bundle_hash:?} included without transaction hash");
                    return Ok(TrackOutcome::TimedOut);
                };
                debug!("bundle {bundle_hash:?} included as {tx_hash:?}");
                return self.track_transaction(tx_hash).await;
            }

            let block = self.chain.block_number().await?;
            if block > give_up_block {
                info!(
                    "bundle {bundle_hash:?} not included by block {give_up_block} (target {target_block})"
                );
                return Ok(TrackOutcome::TimedOut);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    fn set_status(&self, hash: H256, status: TxStatus) {
        let mut monitored = self.monitored.lock();
        if let Some(entry) = monitored.get_mut(&hash) {
            entry.status = status;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::mock::{receipt, MockChainClient};
    use crate::execution::bundle::mock::MockRelay;
    use crate::execution::bundle::BundleStats;

    fn tracker(chain: Arc<MockChainClient>, relay: Option<Arc<MockRelay>>) -> TransactionTracker {
        let relay = relay.map(|r| r as Arc<dyn BundleRelay>);
        TransactionTracker::new(
            chain,
            relay,
            TrackerConfig {
                max_attempts: 10,
                confirmation_blocks: 1,
                max_wait_blocks: 3,
                ..TrackerConfig::default()
            },
        )
        .with_poll_interval(Duration::from_millis(5))
    }

    #[tokio::test]
    async fn confirms_after_confirmation_depth() {
        let chain = Arc::new(MockChainClient::new());
        chain.set_block_number(106);
        let hash = H256::repeat_byte(1);
        chain.script_receipts(hash, vec![None, Some(receipt(hash, 105, 1, 180_000))]);

        let tracker = tracker(chain, None);
        match tracker.track_transaction(hash).await.unwrap() {
            TrackOutcome::Confirmed(r) => {
                assert_eq!(r.block_number.unwrap().as_u64(), 105);
            }
            other => panic!("expected confirmation, got {other:?}"),
        }
        assert_eq!(tracker.status_of(&hash), Some(TxStatus::Confirmed));
    }

    /// Mined with status 0 records the revert and its gas burn.
    #[tokio::test]
    async fn reverted_receipt_reports_reverted() {
        let chain = Arc::new(MockChainClient::new());
        chain.set_block_number(110);
        let hash = H256::repeat_byte(2);
        chain.script_receipts(hash, vec![Some(receipt(hash, 103, 0, 250_000))]);

        let tracker = tracker(chain, None);
        match tracker.track_transaction(hash).await.unwrap() {
            TrackOutcome::Reverted(r) => {
                assert_eq!(r.gas_used.unwrap().as_u64(), 250_000);
                assert!(r.effective_gas_price.is_some());
            }
            other => panic!("expected revert, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn exhausted_attempts_time_out() {
        let chain = Arc::new(MockChainClient::new());
        let hash = H256::repeat_byte(3);
        // No receipt ever.
        let tracker = tracker(chain, None);
        match tracker.track_transaction(hash).await.unwrap() {
            TrackOutcome::TimedOut => {}
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(tracker.status_of(&hash), Some(TxStatus::Timeout));
    }

    #[tokio::test]
    async fn vanished_receipt_downgrades_to_unknown_then_reconfirms() {
        let chain = Arc::new(MockChainClient::new());
        chain.set_block_number(110);
        let hash = H256::repeat_byte(4);
        // Seen at 105, vanishes (reorg), reappears at 107.
        chain.script_receipts(
            hash,
            vec![
                Some(receipt(hash, 105, 1, 180_000)),
                None,
                Some(receipt(hash, 107, 1, 180_000)),
            ],
        );
        // Deep confirmation requirement keeps the poll alive through the
        // vanish-and-reappear sequence; the attempt cap then expires it.
        let tracker = TransactionTracker::new(
            chain,
            None,
            TrackerConfig {
                max_attempts: 10,
                confirmation_blocks: 30,
                ..TrackerConfig::default()
            },
        )
        .with_poll_interval(Duration::from_millis(5));

        let outcome = tracker.track_transaction(hash).await.unwrap();
        match outcome {
            TrackOutcome::TimedOut => {}
            other => panic!("expected timeout under deep confirmation, got {other:?}"),
        }
        assert_eq!(tracker.status_of(&hash), Some(TxStatus::Timeout));
    }

    #[tokio::test]
    async fn reorg_between_sightings_is_tolerated() {
        let chain = Arc::new(MockChainClient::new());
        // Head sits below the confirmation depth of the first sighting, so
        // the vanish is observed before anything confirms.
        chain.set_block_number(105);
        let hash = H256::repeat_byte(5);
        chain.script_receipts(
            hash,
            vec![
                Some(receipt(hash, 105, 1, 180_000)),
                None, // vanished
                Some(receipt(hash, 107, 1, 180_000)),
            ],
        );
        let tracker = Arc::new(tracker(chain.clone(), None));

        let handle = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.track_transaction(hash).await })
        };
        tokio::time::sleep(Duration::from_millis(25)).await;
        chain.set_block_number(120);

        match handle.await.unwrap().unwrap() {
            TrackOutcome::Confirmed(r) => {
                // The post-reorg placement wins.
                assert_eq!(r.block_number.unwrap().as_u64(), 107);
            }
            other => panic!("expected reconfirmation, got {other:?}"),
        }
    }

    /// A bundle targeting N+2 still absent at N+5 gives up.
    #[tokio::test]
    async fn unincluded_bundle_times_out() {
        let chain = Arc::new(MockChainClient::new());
        chain.set_block_number(100);
        let relay = Arc::new(MockRelay::new());
        relay.script_stats(vec![BundleStats::default()]);

        let tracker = tracker(chain.clone(), Some(relay));
        let handle = {
            tokio::spawn(async move {
                tracker.track_bundle(H256::repeat_byte(6), 102).await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        chain.set_block_number(106); // past target + max_wait_blocks

        match handle.await.unwrap().unwrap() {
            TrackOutcome::TimedOut => {}
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn included_bundle_flows_into_receipt_tracking() {
        let chain = Arc::new(MockChainClient::new());
        chain.set_block_number(110);
        let relay = Arc::new(MockRelay::new());
        let tx_hash = H256::repeat_byte(7);
        relay.script_stats(vec![
            BundleStats::default(),
            BundleStats {
                is_included: true,
                block_number: Some(103),
                transaction_hash: Some(tx_hash),
                ..BundleStats::default()
            },
        ]);
        chain.script_receipts(tx_hash, vec![Some(receipt(tx_hash, 103, 1, 200_000))]);

        let tracker = tracker(chain, Some(relay));
        match tracker.track_bundle(H256::repeat_byte(8), 102).await.unwrap() {
            TrackOutcome::Confirmed(r) => {
                assert_eq!(r.transaction_hash, tx_hash);
            }
            other => panic!("expected confirmation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancel_stops_polling() {
        let chain = Arc::new(MockChainClient::new());
        let hash = H256::repeat_byte(9);
        let tracker = Arc::new(tracker(chain, None));

        let handle = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.track_transaction(hash).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        tracker.cancel(hash);

        match handle.await.unwrap().unwrap() {
            TrackOutcome::Cancelled => {}
            other => panic!("expected cancellation, got {other:?}"),
        }
    }
}
