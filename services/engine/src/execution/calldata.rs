//! Router calldata assembly for the known DEX router shapes.
//!
//! Covers the V2 router (`swapExactTokensForTokens`), the V3 single-hop
//! (`exactInputSingle` struct call), and the V3 multi-hop (`exactInput` with
//! the packed `token(20) | fee(3) | token(20) ...` path encoding).

use ethers::abi::{self, Token as AbiToken};
use ethers::types::{Address, Bytes, U256};

use arb_types::{PoolKind, Route, TradeStep};

/// `swapExactTokensForTokens(uint256,uint256,address[],address,uint256)`
pub fn v2_swap_exact_tokens(
    amount_in: U256,
    min_out: U256,
    path: &[Address],
    recipient: Address,
    deadline_unix: u64,
) -> Bytes {
    let selector =
        ethers::utils::id("swapExactTokensForTokens(uint256,uint256,address[],address,uint256)");
    let path_tokens: Vec<AbiToken> = path.iter().map(|a| AbiToken::Address(*a)).collect();

    let mut data = selector.to_vec();
    data.extend(abi::encode(&[
        AbiToken::Uint(amount_in),
        AbiToken::Uint(min_out),
        AbiToken::Array(path_tokens),
        AbiToken::Address(recipient),
        AbiToken::Uint(U256::from(deadline_unix)),
    ]));
    Bytes::from(data)
}

/// `exactInputSingle((address,address,uint24,address,uint256,uint256,uint256,uint160))`
#[allow(clippy::too_many_arguments)]
pub fn v3_exact_input_single(
    token_in: Address,
    token_out: Address,
    fee_tier: u32,
    recipient: Address,
    deadline_unix: u64,
    amount_in: U256,
    min_out: U256,
) -> Bytes {
    let selector = ethers::utils::id(
        "exactInputSingle((address,address,uint24,address,uint256,uint256,uint256,uint160))",
    );
    let params = AbiToken::Tuple(vec![
        AbiToken::Address(token_in),
        AbiToken::Address(token_out),
        AbiToken::Uint(U256::from(fee_tier)),
        AbiToken::Address(recipient),
        AbiToken::Uint(U256::from(deadline_unix)),
        AbiToken::Uint(amount_in),
        AbiToken::Uint(min_out),
        AbiToken::Uint(U256::zero()), // no sqrt price limit
    ]);

    let mut data = selector.to_vec();
    data.extend(abi::encode(&[params]));
    Bytes::from(data)
}

/// Packed multi-hop path: `token_in | fee | token | fee | ... | token_out`.
pub fn v3_packed_path(hops: &[(Address, u32)], token_out: Address) -> Bytes {
    let mut path = Vec::with_capacity(hops.len() * 23 + 20);
    for (token, fee) in hops {
        path.extend_from_slice(token.as_bytes());
        path.extend_from_slice(&fee.to_be_bytes()[1..]); // uint24
    }
    path.extend_from_slice(token_out.as_bytes());
    Bytes::from(path)
}

/// `exactInput((bytes,address,uint256,uint256,uint256))`
pub fn v3_exact_input(
    path: Bytes,
    recipient: Address,
    deadline_unix: u64,
    amount_in: U256,
    min_out: U256,
) -> Bytes {
    let selector = ethers::utils::id("exactInput((bytes,address,uint256,uint256,uint256))");
    let params = AbiToken::Tuple(vec![
        AbiToken::Bytes(path.to_vec()),
        AbiToken::Address(recipient),
        AbiToken::Uint(U256::from(deadline_unix)),
        AbiToken::Uint(amount_in),
        AbiToken::Uint(min_out),
    ]);

    let mut data = selector.to_vec();
    data.extend(abi::encode(&[params]));
    Bytes::from(data)
}

/// Build the swap calldata for one route step against its venue's router.
pub fn step_calldata(
    step: &TradeStep,
    amount_in: U256,
    min_out: U256,
    recipient: Address,
    deadline_unix: u64,
) -> Bytes {
    match &step.pool.kind {
        PoolKind::ConstantProduct { .. } | PoolKind::Stable { .. } => v2_swap_exact_tokens(
            amount_in,
            min_out,
            &[step.token_in.address, step.token_out.address],
            recipient,
            deadline_unix,
        ),
        PoolKind::ConcentratedLiquidity { fee_tier, .. } => v3_exact_input_single(
            step.token_in.address,
            step.token_out.address,
            *fee_tier,
            recipient,
            deadline_unix,
            amount_in,
            min_out,
        ),
    }
}

/// Packed path for a whole route when every hop is concentrated-liquidity.
pub fn route_packed_path(route: &Route) -> Option<Bytes> {
    let mut hops = Vec::new();
    for step in &route.steps {
        match &step.pool.kind {
            PoolKind::ConcentratedLiquidity { fee_tier, .. } => {
                hops.push((step.token_in.address, *fee_tier));
            }
            _ => return None,
        }
    }
    let out = route.output_token()?.address;
    Some(v3_packed_path(&hops, out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::token;

    #[test]
    fn v2_calldata_starts_with_selector() {
        let data = v2_swap_exact_tokens(
            U256::exp10(18),
            U256::exp10(18) * 995 / 1000,
            &[Address::repeat_byte(1), Address::repeat_byte(2)],
            Address::repeat_byte(9),
            1_900_000_000,
        );
        assert_eq!(
            &data[..4],
            ethers::utils::id(
                "swapExactTokensForTokens(uint256,uint256,address[],address,uint256)"
            )
            .as_slice()
        );
        // Dynamic array head + 5 words minimum.
        assert!(data.len() > 4 + 32 * 5);
    }

    #[test]
    fn packed_path_layout_is_20_3_20() {
        let path = v3_packed_path(
            &[
                (Address::repeat_byte(1), 3000),
                (Address::repeat_byte(2), 500),
            ],
            Address::repeat_byte(3),
        );
        assert_eq!(path.len(), 20 + 3 + 20 + 3 + 20);
        assert_eq!(&path[..20], Address::repeat_byte(1).as_bytes());
        // 3000 = 0x000bb8 big-endian in the fee slot.
        assert_eq!(&path[20..23], &[0x00, 0x0b, 0xb8]);
        assert_eq!(&path[23..43], Address::repeat_byte(2).as_bytes());
        assert_eq!(&path[43..46], &[0x00, 0x01, 0xf4]);
        assert_eq!(&path[46..], Address::repeat_byte(3).as_bytes());
    }

    #[test]
    fn step_calldata_dispatches_on_pool_kind() {
        let a = token(1, 18);
        let b = token(2, 18);
        let step = crate::test_support::two_leg_opportunity(U256::exp10(18), 1_000)
            .route
            .steps[0]
            .clone();

        let data = step_calldata(
            &step,
            U256::exp10(18),
            U256::exp10(17),
            Address::repeat_byte(9),
            1_900_000_000,
        );
        // CPMM step goes through the V2 router shape.
        assert_eq!(
            &data[..4],
            ethers::utils::id(
                "swapExactTokensForTokens(uint256,uint256,address[],address,uint256)"
            )
            .as_slice()
        );

        let cl_data = v3_exact_input_single(
            a.address,
            b.address,
            3000,
            Address::repeat_byte(9),
            1_900_000_000,
            U256::exp10(18),
            U256::exp10(17),
        );
        assert_eq!(
            &cl_data[..4],
            ethers::utils::id(
                "exactInputSingle((address,address,uint24,address,uint256,uint256,uint256,uint160))"
            )
            .as_slice()
        );
    }
}
