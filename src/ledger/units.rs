//! Fixed-point conversions between on-chain integers and `Decimal`.

use ethers::types::{I256, U256};
use ethers::utils::{format_units, parse_units};
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::types::{BotError, BotResult};

/// Decimals of the native coin.
pub const NATIVE_DECIMALS: u32 = 18;

/// Decimals used by the round contract's lock/close prices.
pub const PRICE_DECIMALS: u32 = 8;

/// Convert a wei amount to native coin.
pub fn wei_to_decimal(wei: U256) -> BotResult<Decimal> {
    let formatted = format_units(wei, NATIVE_DECIMALS)
        .map_err(|e| BotError::Conversion(format!("format wei {wei}: {e}")))?;
    Decimal::from_str(&formatted)
        .map_err(|e| BotError::Conversion(format!("parse amount {formatted}: {e}")))
}

/// Convert a native coin amount to wei. Digits past 18 places are dropped.
pub fn decimal_to_wei(amount: Decimal) -> BotResult<U256> {
    if amount.is_sign_negative() {
        return Err(BotError::Conversion(format!("negative amount {amount}")));
    }
    let text = amount.round_dp(NATIVE_DECIMALS).normalize().to_string();
    let parsed = parse_units(&text, NATIVE_DECIMALS)
        .map_err(|e| BotError::Conversion(format!("parse units {text}: {e}")))?;
    Ok(parsed.into())
}

/// Convert a gwei gas price to wei.
pub fn gwei_to_wei(gwei: Decimal) -> BotResult<U256> {
    let text = gwei.round_dp(9).normalize().to_string();
    let parsed = parse_units(&text, "gwei")
        .map_err(|e| BotError::Conversion(format!("parse gwei {text}: {e}")))?;
    Ok(parsed.into())
}

/// Convert a signed fixed-point integer (oracle answers, round prices).
pub fn scaled_to_decimal(value: I256, decimals: u32) -> BotResult<Decimal> {
    let raw: i128 = value
        .to_string()
        .parse()
        .map_err(|e| BotError::Conversion(format!("price {value} out of range: {e}")))?;
    if decimals > 28 {
        return Err(BotError::Conversion(format!("unsupported scale {decimals}")));
    }
    Ok(Decimal::from_i128_with_scale(raw, decimals))
}

/// Narrow a `U256` that is known to be small (epochs, block numbers).
pub fn u256_to_u64(value: U256, what: &str) -> BotResult<u64> {
    if value > U256::from(u64::MAX) {
        return Err(BotError::Conversion(format!("{what} {value} exceeds u64")));
    }
    Ok(value.as_u64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_wei_round_trip_one_coin() {
        let wei = U256::exp10(18);
        assert_eq!(wei_to_decimal(wei).unwrap(), dec!(1));
        assert_eq!(decimal_to_wei(dec!(1)).unwrap(), wei);
    }

    #[test]
    fn test_fractional_stake_to_wei() {
        let wei = decimal_to_wei(dec!(0.125)).unwrap();
        assert_eq!(wei, U256::from(125_000_000_000_000_000u64));
    }

    #[test]
    fn test_negative_amount_rejected() {
        assert!(decimal_to_wei(dec!(-0.1)).is_err());
    }

    #[test]
    fn test_gwei_to_wei() {
        assert_eq!(gwei_to_wei(dec!(5)).unwrap(), U256::from(5_000_000_000u64));
    }

    #[test]
    fn test_scaled_price() {
        let raw = I256::from(31_012_345_678i64);
        assert_eq!(scaled_to_decimal(raw, PRICE_DECIMALS).unwrap(), dec!(310.12345678));
        let negative = I256::from(-150_000_000i64);
        assert_eq!(scaled_to_decimal(negative, PRICE_DECIMALS).unwrap(), dec!(-1.5));
    }

    #[test]
    fn test_u256_narrowing() {
        assert_eq!(u256_to_u64(U256::from(42u64), "epoch").unwrap(), 42);
        assert!(u256_to_u64(U256::MAX, "epoch").is_err());
    }
}
