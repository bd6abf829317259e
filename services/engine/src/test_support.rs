//! Shared fixtures for the simulation harness and the test suites.

use std::collections::BTreeMap;

use chrono::Utc;
use ethers::types::{Address, U256};
use rust_decimal_macros::dec;
use uuid::Uuid;

use arb_types::{
    Opportunity, PoolInfo, PoolKind, Route, StrategyKind, Token, TradeStep, VenueId,
};

pub fn token(byte: u8, decimals: u8) -> Token {
    Token::new(Address::repeat_byte(byte), None, decimals).unwrap()
}

/// A two-token constant-product pool with whole-token reserves.
pub fn cpmm_pool(
    address: Address,
    venue: &str,
    t0: &Token,
    t1: &Token,
    r0_tokens: u64,
    r1_tokens: u64,
) -> PoolInfo {
    PoolInfo {
        pool_address: address,
        venue: VenueId::from(venue),
        tokens: vec![t0.clone(), t1.clone()],
        fee_bps: 30,
        kind: PoolKind::ConstantProduct {
            reserve0: U256::from(r0_tokens) * U256::exp10(18),
            reserve1: U256::from(r1_tokens) * U256::exp10(18),
        },
    }
}

/// Single-step opportunity with explicit profit and gas economics.
pub fn sample_opportunity(profit_wei: u64, gas: u64, gas_price: u64) -> Opportunity {
    let a = token(1, 18);
    let b = token(2, 18);
    let pool = cpmm_pool(Address::repeat_byte(0x0a), "venue-x", &a, &b, 1_000_000, 1_000_000);

    let route = Route::new(vec![TradeStep {
        pool,
        token_in: a,
        token_out: b,
        expected_out_wei: U256::exp10(18),
        min_out_wei: U256::exp10(18) * 995 / 1000,
        max_slippage: dec!(0.005),
    }]);

    Opportunity {
        id: Uuid::new_v4(),
        strategy: StrategyKind::CrossVenue,
        detector_id: "cross_venue".to_string(),
        route,
        input_wei: U256::exp10(18),
        expected_output_wei: U256::exp10(18) + U256::from(profit_wei),
        expected_profit_wei: U256::from(profit_wei),
        gas_estimate: gas,
        gas_price_wei: U256::from(gas_price),
        priority_fee_wei: U256::zero(),
        confidence: dec!(0.9),
        flash_loan_required: false,
        discovered_at: Utc::now(),
        metadata: BTreeMap::new(),
    }
}

/// Cyclic two-leg opportunity A->B on venue-x, B->A on venue-y, with a 2%
/// edge on the closing pool and exact quotes along the route.
pub fn two_leg_opportunity(input_wei: U256, reserve_tokens: u64) -> Opportunity {
    let a = token(1, 18);
    let b = token(2, 18);
    let pool_x = cpmm_pool(
        Address::repeat_byte(0x0a),
        "venue-x",
        &a,
        &b,
        reserve_tokens,
        reserve_tokens,
    );
    let pool_y = cpmm_pool(
        Address::repeat_byte(0x0b),
        "venue-y",
        &b,
        &a,
        reserve_tokens,
        reserve_tokens + reserve_tokens / 50,
    );

    let mid = arb_amm::quote_pool(&pool_x, &a, input_wei).unwrap();
    let out = arb_amm::quote_pool(&pool_y, &b, mid).unwrap();

    let route = Route::new(vec![
        TradeStep {
            pool: pool_x,
            token_in: a.clone(),
            token_out: b.clone(),
            expected_out_wei: mid,
            min_out_wei: mid * 995 / 1000,
            max_slippage: dec!(0.005),
        },
        TradeStep {
            pool: pool_y,
            token_in: b,
            token_out: a,
            expected_out_wei: out,
            min_out_wei: out * 995 / 1000,
            max_slippage: dec!(0.005),
        },
    ]);

    Opportunity {
        id: Uuid::new_v4(),
        strategy: StrategyKind::CrossVenue,
        detector_id: "cross_venue".to_string(),
        route,
        input_wei,
        expected_output_wei: out,
        expected_profit_wei: out.saturating_sub(input_wei),
        gas_estimate: 250_000,
        gas_price_wei: U256::from(1_000_000_000u64),
        priority_fee_wei: U256::zero(),
        confidence: dec!(0.9),
        flash_loan_required: false,
        discovered_at: Utc::now(),
        metadata: BTreeMap::new(),
    }
}
