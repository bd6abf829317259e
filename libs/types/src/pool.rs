//! Pool snapshots with protocol-specific state.
//!
//! `PoolKind` is a sum type so pricing math dispatches by variant instead of
//! sniffing untyped fields. A `PoolInfo` is an immutable snapshot; caches own
//! snapshots and components never mutate cached entries.

use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::token::{Token, VenueId};

/// Protocol-specific pool state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoolKind {
    /// x*y=k pool with two reserves in token order.
    ConstantProduct { reserve0: U256, reserve1: U256 },
    /// Concentrated-liquidity pool; price is sqrt(price) * 2^96.
    ConcentratedLiquidity {
        sqrt_price_x96: U256,
        tick: i32,
        liquidity: u128,
        tick_spacing: i32,
        fee_tier: u32,
    },
    /// Stable-swap pool with an amplification coefficient.
    Stable {
        reserves: Vec<U256>,
        amplification: u64,
    },
}

impl PoolKind {
    pub fn name(&self) -> &'static str {
        match self {
            PoolKind::ConstantProduct { .. } => "constant-product",
            PoolKind::ConcentratedLiquidity { .. } => "concentrated-liquidity",
            PoolKind::Stable { .. } => "stable",
        }
    }

    /// Whether the pool currently holds any tradeable depth.
    pub fn has_liquidity(&self) -> bool {
        match self {
            PoolKind::ConstantProduct { reserve0, reserve1 } => {
                !reserve0.is_zero() && !reserve1.is_zero()
            }
            PoolKind::ConcentratedLiquidity { liquidity, .. } => *liquidity > 0,
            PoolKind::Stable { reserves, .. } => reserves.iter().all(|r| !r.is_zero()),
        }
    }
}

/// Immutable snapshot of one pool on one venue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolInfo {
    pub pool_address: Address,
    pub venue: VenueId,
    pub tokens: Vec<Token>,
    pub fee_bps: u32,
    pub kind: PoolKind,
}

impl PoolInfo {
    pub fn contains_token(&self, token: &Token) -> bool {
        self.tokens.iter().any(|t| t == token)
    }

    /// Position of a token within the pool's token list.
    pub fn token_index(&self, token: &Token) -> Option<usize> {
        self.tokens.iter().position(|t| t == token)
    }

    /// The other token of a two-token pool.
    pub fn counterpart(&self, token: &Token) -> Option<&Token> {
        if self.tokens.len() != 2 {
            return None;
        }
        match self.token_index(token)? {
            0 => self.tokens.get(1),
            _ => self.tokens.get(0),
        }
    }

    /// Reserve of `token` for reserve-carrying pool kinds.
    pub fn reserve_of(&self, token: &Token) -> Option<U256> {
        let idx = self.token_index(token)?;
        match &self.kind {
            PoolKind::ConstantProduct { reserve0, reserve1 } => match idx {
                0 => Some(*reserve0),
                1 => Some(*reserve1),
                _ => None,
            },
            PoolKind::Stable { reserves, .. } => reserves.get(idx).copied(),
            PoolKind::ConcentratedLiquidity { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(byte: u8, decimals: u8) -> Token {
        Token::new(Address::repeat_byte(byte), None, decimals).unwrap()
    }

    fn cpmm_pool(r0: u64, r1: u64) -> PoolInfo {
        PoolInfo {
            pool_address: Address::repeat_byte(0xaa),
            venue: VenueId::from("uniswap-v2"),
            tokens: vec![token(1, 18), token(2, 6)],
            fee_bps: 30,
            kind: PoolKind::ConstantProduct {
                reserve0: U256::from(r0),
                reserve1: U256::from(r1),
            },
        }
    }

    #[test]
    fn reserve_lookup_follows_token_order() {
        let pool = cpmm_pool(1000, 2000);
        assert_eq!(pool.reserve_of(&token(1, 18)), Some(U256::from(1000)));
        assert_eq!(pool.reserve_of(&token(2, 6)), Some(U256::from(2000)));
        assert_eq!(pool.reserve_of(&token(9, 18)), None);
    }

    #[test]
    fn counterpart_resolves_for_two_token_pools() {
        let pool = cpmm_pool(1, 1);
        assert_eq!(pool.counterpart(&token(1, 18)), Some(&token(2, 6)));
        assert_eq!(pool.counterpart(&token(2, 6)), Some(&token(1, 18)));
    }

    #[test]
    fn empty_pool_has_no_liquidity() {
        let pool = cpmm_pool(0, 2000);
        assert!(!pool.kind.has_liquidity());
        assert!(cpmm_pool(1, 1).kind.has_liquidity());
    }
}
