//! AMM math with exact integer-wei calculations.
//!
//! Amounts stay in integer wei end to end; `Decimal` appears only for
//! dimensionless ratios (impact, slippage) and USD figures. Pricing
//! dispatches on [`arb_types::PoolKind`] so callers never branch on pool
//! protocol themselves.

pub mod concentrated;
pub mod constant_product;
pub mod sizing;
pub mod stable;

pub use concentrated::{ClState, ConcentratedMath};
pub use constant_product::{CpmmMath, CpmmReserves};
pub use sizing::{OptimalSizer, SizedTrade, SizingConfig};
pub use stable::StableMath;

use anyhow::{bail, Result};
use ethers::types::U256;

use arb_types::{PoolInfo, PoolKind, Token};

/// Quote the output of swapping `amount_in` of `token_in` through `pool`,
/// dispatching on the pool's protocol.
pub fn quote_pool(pool: &PoolInfo, token_in: &Token, amount_in: U256) -> Result<U256> {
    let idx_in = match pool.token_index(token_in) {
        Some(i) => i,
        None => bail!(
            "pool {:?} does not hold token {}",
            pool.pool_address,
            token_in
        ),
    };

    match &pool.kind {
        PoolKind::ConstantProduct { reserve0, reserve1 } => {
            let (reserve_in, reserve_out) = if idx_in == 0 {
                (*reserve0, *reserve1)
            } else {
                (*reserve1, *reserve0)
            };
            CpmmMath::quote_out(amount_in, reserve_in, reserve_out, pool.fee_bps)
        }
        PoolKind::ConcentratedLiquidity {
            sqrt_price_x96,
            tick,
            liquidity,
            fee_tier,
            ..
        } => {
            let state = ClState {
                sqrt_price_x96: u256_to_u128(*sqrt_price_x96)?,
                liquidity: *liquidity,
                tick: *tick,
                fee_pips: *fee_tier,
            };
            let amount_in = u256_to_u128(amount_in)?;
            let (amount_out, _, _) =
                ConcentratedMath::quote_out(amount_in, &state, idx_in == 0)?;
            Ok(U256::from(amount_out))
        }
        PoolKind::Stable {
            reserves,
            amplification,
        } => {
            let idx_out = if idx_in == 0 { 1 } else { 0 };
            StableMath::quote_out(
                amount_in,
                reserves,
                idx_in,
                idx_out,
                *amplification,
                pool.fee_bps,
            )
        }
    }
}

fn u256_to_u128(value: U256) -> Result<u128> {
    value
        .try_into()
        .map_err(|_| anyhow::anyhow!("value {value} exceeds u128"))
}
