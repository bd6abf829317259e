//! Tokens, venues, and wei-denominated amounts.
//!
//! The token address is the canonical identifier; symbols are advisory and
//! never participate in equality. All human-unit conversions go through
//! `decimals` and are lossless for `decimals <= 18`.

use ethers::types::{Address, U256};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ArbError;

/// Identifier of a trading venue (an AMM deployment).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VenueId(pub String);

impl VenueId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VenueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VenueId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// An ERC-20 token. Equality and hashing go through the address only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub address: Address,
    pub symbol: Option<String>,
    pub decimals: u8,
}

impl Token {
    /// Build a token, rejecting out-of-range decimals.
    pub fn new(address: Address, symbol: Option<String>, decimals: u8) -> Result<Self, ArbError> {
        if decimals == 0 || decimals > 18 {
            return Err(ArbError::Config(format!(
                "token {address:?} has invalid decimals {decimals}, expected 1..=18"
            )));
        }
        Ok(Self {
            address,
            symbol,
            decimals,
        })
    }

    /// One whole unit of this token in wei (10^decimals).
    pub fn one_unit_wei(&self) -> U256 {
        U256::exp10(self.decimals as usize)
    }
}

impl PartialEq for Token {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for Token {}

impl std::hash::Hash for Token {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.symbol {
            Some(sym) => write!(f, "{sym}"),
            None => write!(f, "{:?}", self.address),
        }
    }
}

/// A quantity of a specific token, always carried in wei.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenAmount {
    pub token: Token,
    pub amount_wei: U256,
}

impl TokenAmount {
    pub fn new(token: Token, amount_wei: U256) -> Self {
        Self { token, amount_wei }
    }

    /// Convert human units (e.g. `1.5` WETH) to a wei amount.
    ///
    /// Lossless for any `Decimal` whose fractional scale does not exceed the
    /// token's decimals; excess fractional digits are an error rather than a
    /// silent truncation.
    pub fn from_units(token: Token, units: Decimal) -> Result<Self, ArbError> {
        if units.is_sign_negative() {
            return Err(ArbError::Config(format!(
                "negative amount {units} for token {token}"
            )));
        }
        let scaled = units
            .checked_mul(Decimal::from(10u64.pow(token.decimals as u32)))
            .ok_or_else(|| ArbError::Config(format!("amount {units} overflows wei scale")))?;
        if scaled.fract() != Decimal::ZERO {
            return Err(ArbError::Config(format!(
                "amount {units} has more fractional digits than {} decimals",
                token.decimals
            )));
        }
        let wei: u128 = rust_decimal::prelude::ToPrimitive::to_u128(&scaled)
            .ok_or_else(|| ArbError::Config(format!("amount {units} does not fit in u128 wei")))?;
        Ok(Self {
            token,
            amount_wei: U256::from(wei),
        })
    }

    /// Convert back to human units through the token's decimals.
    ///
    /// Fails only when the wei amount exceeds 2^128, which no deployed ERC-20
    /// supply reaches.
    pub fn to_units(&self) -> Result<Decimal, ArbError> {
        let wei: u128 = self
            .amount_wei
            .try_into()
            .map_err(|_| ArbError::Config(format!("wei amount {} exceeds u128", self.amount_wei)))?;
        let units = Decimal::try_from_i128_with_scale(wei as i128, self.token.decimals as u32)
            .map_err(|e| ArbError::Config(format!("scale error converting {wei}: {e}")))?;
        Ok(units.normalize())
    }

    pub fn is_zero(&self) -> bool {
        self.amount_wei.is_zero()
    }
}

impl fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_units() {
            Ok(units) => write!(f, "{units} {}", self.token),
            Err(_) => write!(f, "{} wei {}", self.amount_wei, self.token),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn weth() -> Token {
        Token::new(Address::repeat_byte(0x11), Some("WETH".into()), 18).unwrap()
    }

    fn usdc() -> Token {
        Token::new(Address::repeat_byte(0x22), Some("USDC".into()), 6).unwrap()
    }

    #[test]
    fn rejects_invalid_decimals() {
        assert!(Token::new(Address::zero(), None, 0).is_err());
        assert!(Token::new(Address::zero(), None, 19).is_err());
        assert!(Token::new(Address::zero(), None, 18).is_ok());
    }

    #[test]
    fn unit_conversion_round_trips() {
        let amount = TokenAmount::from_units(weth(), dec!(1.5)).unwrap();
        assert_eq!(amount.amount_wei, U256::from(1_500_000_000_000_000_000u128));
        assert_eq!(amount.to_units().unwrap(), dec!(1.5));

        let amount = TokenAmount::from_units(usdc(), dec!(2500.25)).unwrap();
        assert_eq!(amount.amount_wei, U256::from(2_500_250_000u64));
        assert_eq!(amount.to_units().unwrap(), dec!(2500.25));
    }

    #[test]
    fn rejects_excess_precision() {
        // 7 fractional digits against a 6-decimal token would truncate.
        assert!(TokenAmount::from_units(usdc(), dec!(0.1234567)).is_err());
    }

    #[test]
    fn token_equality_ignores_symbol() {
        let a = Token::new(Address::repeat_byte(0x11), Some("WETH".into()), 18).unwrap();
        let b = Token::new(Address::repeat_byte(0x11), None, 18).unwrap();
        assert_eq!(a, b);
    }
}
