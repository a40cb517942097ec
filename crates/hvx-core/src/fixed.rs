//! Fixed-point integer <-> `Decimal` conversion.
//!
//! Contract values arrive as `uint256`/`int256` scaled by `10^decimals`.
//! `Decimal` carries at most 28 fractional digits and a 96-bit mantissa, so
//! decoding drops trailing digits until both limits hold. Encoding truncates
//! toward zero; it never rounds a margin or size up.

use crate::error::{CoreError, Result};
use alloy::primitives::{Sign, I256, U256};
use rust_decimal::{Decimal, RoundingStrategy};

/// Largest scale a `Decimal` can carry.
const MAX_DECIMAL_SCALE: u32 = 28;

/// Largest mantissa a `Decimal` can carry (2^96 - 1).
const MAX_DECIMAL_MANTISSA: u128 = 79_228_162_514_264_337_593_543_950_335;

/// `10^exp` as a `U256`.
pub fn pow10(exp: u32) -> Result<U256> {
    U256::from(10u8)
        .checked_pow(U256::from(exp))
        .ok_or_else(|| CoreError::Overflow(format!("10^{exp}")))
}

/// Decode an unsigned fixed-point integer.
pub fn u256_to_decimal(raw: U256, decimals: u8) -> Result<Decimal> {
    let ten = U256::from(10u8);
    let max_mantissa = U256::from(MAX_DECIMAL_MANTISSA);

    let mut mantissa = raw;
    let mut scale = u32::from(decimals);
    while scale > MAX_DECIMAL_SCALE || mantissa > max_mantissa {
        if scale == 0 {
            return Err(CoreError::Overflow(format!(
                "{raw} exceeds decimal range at {decimals} decimals"
            )));
        }
        mantissa /= ten;
        scale -= 1;
    }

    let mantissa = u128::try_from(mantissa).map_err(|e| CoreError::Overflow(e.to_string()))?;
    // mantissa <= 2^96 - 1 so the i128 cast is lossless
    Ok(Decimal::try_from_i128_with_scale(mantissa as i128, scale)?)
}

/// Decode a signed fixed-point integer.
pub fn i256_to_decimal(raw: I256, decimals: u8) -> Result<Decimal> {
    let magnitude = u256_to_decimal(raw.unsigned_abs(), decimals)?;
    Ok(if raw.is_negative() {
        -magnitude
    } else {
        magnitude
    })
}

/// Encode a non-negative decimal, truncating digits beyond `decimals`.
pub fn decimal_to_u256(value: Decimal, decimals: u8) -> Result<U256> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(CoreError::NegativeValue(value.to_string()));
    }
    encode_magnitude(value, decimals)
}

/// Encode a signed decimal, truncating digits beyond `decimals`.
pub fn decimal_to_i256(value: Decimal, decimals: u8) -> Result<I256> {
    let sign = if value.is_sign_negative() && !value.is_zero() {
        Sign::Negative
    } else {
        Sign::Positive
    };
    let magnitude = encode_magnitude(value.abs(), decimals)?;
    I256::checked_from_sign_and_abs(sign, magnitude)
        .ok_or_else(|| CoreError::Overflow(format!("{value} does not fit int256")))
}

fn encode_magnitude(value: Decimal, decimals: u8) -> Result<U256> {
    let decimals = u32::from(decimals);
    let truncated = value
        .abs()
        .round_dp_with_strategy(decimals.min(MAX_DECIMAL_SCALE), RoundingStrategy::ToZero);

    let mantissa = U256::from(truncated.mantissa().unsigned_abs());
    let shift = pow10(decimals - truncated.scale())?;
    mantissa
        .checked_mul(shift)
        .ok_or_else(|| CoreError::Overflow(format!("{value} at {decimals} decimals")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn wad(units: u64) -> U256 {
        U256::from(units) * pow10(18).unwrap()
    }

    #[test]
    fn test_decode_wad() {
        assert_eq!(u256_to_decimal(wad(500_000), 18).unwrap(), dec!(500000));
        assert_eq!(
            u256_to_decimal(U256::from(200_000_000_000_000_000u64), 18).unwrap(),
            dec!(0.2)
        );
    }

    #[test]
    fn test_decode_six_decimals() {
        assert_eq!(
            u256_to_decimal(U256::from(1_500_000u64), 6).unwrap(),
            dec!(1.5)
        );
    }

    #[test]
    fn test_decode_large_reserve_drops_trailing_digits() {
        // 10^12 whole units at 18 decimals exceeds the 96-bit mantissa
        let raw = wad(1_000_000_000_000);
        let value = u256_to_decimal(raw, 18).unwrap();
        assert_eq!(value, dec!(1000000000000));
    }

    #[test]
    fn test_decode_negative() {
        let raw = I256::checked_from_sign_and_abs(Sign::Negative, wad(10)).unwrap();
        assert_eq!(i256_to_decimal(raw, 18).unwrap(), dec!(-10));
    }

    #[test]
    fn test_encode_truncates_toward_zero() {
        let raw = decimal_to_u256(dec!(1.2345678), 6).unwrap();
        assert_eq!(raw, U256::from(1_234_567u64));

        let raw = decimal_to_i256(dec!(-0.0000019), 6).unwrap();
        assert_eq!(raw, I256::checked_from_sign_and_abs(Sign::Negative, U256::from(1u8)).unwrap());
    }

    #[test]
    fn test_encode_rejects_negative_unsigned() {
        assert!(matches!(
            decimal_to_u256(dec!(-1), 18),
            Err(CoreError::NegativeValue(_))
        ));
    }

    #[test]
    fn test_encode_signed_short_size() {
        let raw = decimal_to_i256(dec!(-100), 18).unwrap();
        assert!(raw.is_negative());
        assert_eq!(raw.unsigned_abs(), wad(100));
    }
}
