//! # Arbitrage Domain Types - Unified Type System
//!
//! ## Purpose
//!
//! Single source of truth for every value that crosses a component boundary in
//! the arbitrage engine: tokens and wei-denominated amounts, pool snapshots
//! with protocol-specific state, trade routes, discovered opportunities,
//! market condition snapshots, execution results, and the unified status and
//! error taxonomies. Components depend on this crate instead of redefining
//! overlapping structs, so a status produced by the executor means exactly the
//! same thing when the tracker or the analytics layer reads it.
//!
//! ## Integration Points
//!
//! - **Producers**: discovery detectors (Opportunity), market data feed
//!   (MarketCondition), executor (ExecutionResult, TransactionInfo)
//! - **Consumers**: validation pipeline, strategy selection, flash loan
//!   providers, tracker, top-level system caches and sinks
//! - **Precision**: monetary quantities are integer wei (`U256`); USD prices
//!   and dimensionless ratios are `rust_decimal::Decimal`; floats never carry
//!   money
//! - **Serialization**: serde on every snapshot type for config files, sinks,
//!   and relay JSON bodies
//!
//! ## Architecture Role
//!
//! ```text
//! Detectors → [Opportunity] → Validators → Strategy → [ExecutionPlan inputs]
//!     ↓             ↓              ↓           ↓               ↓
//! Route/TradeStep  metadata    rejection    StrategyKind   Executor
//! PoolInfo/Kind    confidence  reasons      selection      ExecutionResult
//! ```

pub mod error;
pub mod execution;
pub mod flash_loan;
pub mod market;
pub mod opportunity;
pub mod pool;
pub mod route;
pub mod token;

pub use error::{ArbError, RejectionReason};
pub use execution::{
    ExecutionResult, ExecutionStatus, TransactionInfo, TxStatus,
};
pub use flash_loan::{FlashLoanRequest, FlashLoanResult};
pub use market::MarketCondition;
pub use opportunity::{Opportunity, StrategyKind};
pub use pool::{PoolInfo, PoolKind};
pub use route::{Route, TradeStep};
pub use token::{Token, TokenAmount, VenueId};

/// Basis points denominator shared across fee and threshold math.
pub const BPS_DENOMINATOR: u32 = 10_000;
