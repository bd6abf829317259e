//! Running counters over the pipeline's output.
//!
//! Purely observational: nothing in the pipeline branches on these numbers.
//! Snapshots are immutable copies safe to hand to external surfaces.

use ethers::types::{I256, U256};
use parking_lot::Mutex;

use arb_types::{ExecutionResult, ExecutionStatus};

#[derive(Debug, Clone, Default)]
struct Counters {
    opportunities_discovered: u64,
    opportunities_validated: u64,
    opportunities_rejected: u64,
    executions_attempted: u64,
    executions_succeeded: u64,
    executions_failed: u64,
    executions_skipped: u64,
    cumulative_expected_profit_wei: U256,
    cumulative_net_profit_wei: I256,
    total_execution_ms: u128,
    execution_duration_samples: u64,
}

/// Immutable view of the counters.
#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    pub opportunities_discovered: u64,
    pub opportunities_validated: u64,
    pub opportunities_rejected: u64,
    pub executions_attempted: u64,
    pub executions_succeeded: u64,
    pub executions_failed: u64,
    pub executions_skipped: u64,
    pub cumulative_expected_profit_wei: U256,
    pub cumulative_net_profit_wei: I256,
    pub average_execution_ms: Option<u128>,
}

/// Thread-safe pipeline counters.
#[derive(Default)]
pub struct Analytics {
    counters: Mutex<Counters>,
}

impl Analytics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_discovered(&self, count: usize, expected_profit_total: U256) {
        let mut c = self.counters.lock();
        c.opportunities_discovered += count as u64;
        c.cumulative_expected_profit_wei = c
            .cumulative_expected_profit_wei
            .saturating_add(expected_profit_total);
    }

    pub fn record_validated(&self) {
        self.counters.lock().opportunities_validated += 1;
    }

    pub fn record_rejected(&self) {
        self.counters.lock().opportunities_rejected += 1;
    }

    pub fn record_execution(&self, result: &ExecutionResult) {
        let mut c = self.counters.lock();
        c.executions_attempted += 1;
        match result.status {
            ExecutionStatus::Succeeded => c.executions_succeeded += 1,
            ExecutionStatus::Skipped => c.executions_skipped += 1,
            ExecutionStatus::Failed
            | ExecutionStatus::Reverted
            | ExecutionStatus::TimedOut
            | ExecutionStatus::Cancelled => c.executions_failed += 1,
            _ => {}
        }
        if let Some(net) = result.net_profit_wei() {
            c.cumulative_net_profit_wei = c.cumulative_net_profit_wei.saturating_add(net);
        }
        if let Some(duration) = result.duration() {
            c.total_execution_ms += duration.num_milliseconds().max(0) as u128;
            c.execution_duration_samples += 1;
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let c = self.counters.lock().clone();
        StatsSnapshot {
            opportunities_discovered: c.opportunities_discovered,
            opportunities_validated: c.opportunities_validated,
            opportunities_rejected: c.opportunities_rejected,
            executions_attempted: c.executions_attempted,
            executions_succeeded: c.executions_succeeded,
            executions_failed: c.executions_failed,
            executions_skipped: c.executions_skipped,
            cumulative_expected_profit_wei: c.cumulative_expected_profit_wei,
            cumulative_net_profit_wei: c.cumulative_net_profit_wei,
            average_execution_ms: (c.execution_duration_samples > 0)
                .then(|| c.total_execution_ms / c.execution_duration_samples as u128),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn execution_outcomes_bucket_correctly() {
        let analytics = Analytics::new();

        let mut ok = ExecutionResult::started(Uuid::new_v4(), "standard", Utc::now());
        ok.finish(ExecutionStatus::Succeeded, None, Utc::now());
        analytics.record_execution(&ok);

        let mut skipped = ExecutionResult::started(Uuid::new_v4(), "standard", Utc::now());
        skipped.finish(ExecutionStatus::Skipped, None, Utc::now());
        analytics.record_execution(&skipped);

        let mut reverted = ExecutionResult::started(Uuid::new_v4(), "standard", Utc::now());
        reverted.finish(ExecutionStatus::Reverted, None, Utc::now());
        analytics.record_execution(&reverted);

        let snapshot = analytics.snapshot();
        assert_eq!(snapshot.executions_attempted, 3);
        assert_eq!(snapshot.executions_succeeded, 1);
        assert_eq!(snapshot.executions_skipped, 1);
        assert_eq!(snapshot.executions_failed, 1);
        assert!(snapshot.average_execution_ms.is_some());
    }

    #[test]
    fn discovery_accumulates_expected_profit() {
        let analytics = Analytics::new();
        analytics.record_discovered(3, U256::from(500u64));
        analytics.record_discovered(2, U256::from(250u64));

        let snapshot = analytics.snapshot();
        assert_eq!(snapshot.opportunities_discovered, 5);
        assert_eq!(
            snapshot.cumulative_expected_profit_wei,
            U256::from(750u64)
        );
    }
}
