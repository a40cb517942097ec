//! Pure valuation math.
//!
//! Mark price is computed on the raw reserve integers and only then decoded,
//! so no precision is lost before the division.

use crate::convention::DecimalConvention;
use crate::error::{CoreError, Result};
use crate::fixed::{pow10, u256_to_decimal};
use crate::{Price, Size};
use alloy::primitives::U256;
use rust_decimal::Decimal;

/// `quote / base`, scaled to `price_decimals`.
///
/// Base reserve is in size units and quote reserve in collateral units, so
/// the numerator is shifted by `price + size - collateral` decimals.
///
/// # Errors
/// `DivisionByZero` when `base_reserve` is zero.
pub fn mark_price(
    base_reserve: U256,
    quote_reserve: U256,
    convention: &DecimalConvention,
) -> Result<Price> {
    if base_reserve.is_zero() {
        return Err(CoreError::DivisionByZero("base reserve is zero"));
    }

    let shift = i32::from(convention.price_decimals) + i32::from(convention.size_decimals)
        - i32::from(convention.collateral_decimals);

    let (numerator, denominator) = if shift >= 0 {
        let factor = pow10(shift.unsigned_abs())?;
        let numerator = quote_reserve
            .checked_mul(factor)
            .ok_or_else(|| CoreError::Overflow(format!("quote reserve {quote_reserve}")))?;
        (numerator, base_reserve)
    } else {
        let factor = pow10(shift.unsigned_abs())?;
        let denominator = base_reserve
            .checked_mul(factor)
            .ok_or_else(|| CoreError::Overflow(format!("base reserve {base_reserve}")))?;
        (quote_reserve, denominator)
    };

    let raw = numerator / denominator;
    Ok(Price::new(u256_to_decimal(raw, convention.price_decimals)?))
}

/// `notional / margin`; zero when there is no margin.
///
/// # Errors
/// `Overflow` when dust margin pushes the ratio past `Decimal::MAX`.
pub fn leverage(notional: Decimal, margin: Decimal) -> Result<Decimal> {
    if margin.is_zero() {
        return Ok(Decimal::ZERO);
    }
    notional
        .checked_div(margin)
        .ok_or_else(|| CoreError::Overflow(format!("leverage {notional} / {margin}")))
}

/// Notional value of `size` at `mark`.
///
/// # Errors
/// `Overflow` when the product does not fit a `Decimal`.
pub fn notional(size: Size, mark: Price) -> Result<Decimal> {
    size.notional(mark)
        .ok_or_else(|| CoreError::Overflow(format!("notional {size} * {mark}")))
}

/// Relative disagreement between a local figure and the contract's, as a fraction.
///
/// Used to flag decimal-scale mismatches between client and deployment.
/// `None` when the gap is not representable.
pub fn relative_gap(local: Decimal, reported: Decimal) -> Option<Decimal> {
    if local.is_zero() && reported.is_zero() {
        return Some(Decimal::ZERO);
    }
    let reference = local.abs().max(reported.abs());
    local.checked_sub(reported)?.abs().checked_div(reference)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::decimal_to_u256;
    use rust_decimal_macros::dec;

    fn wad(value: Decimal) -> U256 {
        decimal_to_u256(value, 18).unwrap()
    }

    #[test]
    fn test_mark_price_from_reserves() {
        let mark = mark_price(
            wad(dec!(500000)),
            wad(dec!(100000)),
            &DecimalConvention::WAD_V2,
        )
        .unwrap();
        assert_eq!(mark, Price::new(dec!(0.2)));
    }

    #[test]
    fn test_mark_price_with_six_decimal_collateral() {
        let base = wad(dec!(500000));
        let quote = decimal_to_u256(dec!(100000), 6).unwrap();
        let mark = mark_price(base, quote, &DecimalConvention::USDC6_V1).unwrap();
        assert_eq!(mark, Price::new(dec!(0.2)));
    }

    #[test]
    fn test_mark_price_zero_base_is_rejected() {
        let err = mark_price(U256::ZERO, wad(dec!(1)), &DecimalConvention::WAD_V2).unwrap_err();
        assert!(matches!(err, CoreError::DivisionByZero(_)));
    }

    #[test]
    fn test_mark_price_times_base_recovers_quote() {
        let convention = DecimalConvention::WAD_V2;
        let pairs = [
            (dec!(500000), dec!(100000)),
            (dec!(333333.333333), dec!(71234.5)),
            (dec!(1), dec!(0.000001)),
            (dec!(987654321.123), dec!(12345678.9)),
        ];

        for (base, quote) in pairs {
            let mark = mark_price(wad(base), wad(quote), &convention).unwrap();
            // integer division floors at 1e-18 of price; error bounded by base * 1e-18
            let tolerance = base * dec!(0.000000000000000001) + dec!(0.000000000000000001);
            let gap = (mark.inner() * base - quote).abs();
            assert!(gap <= tolerance, "base={base} quote={quote} gap={gap}");
        }
    }

    #[test]
    fn test_position_figures() {
        let size = Size::new(dec!(100));
        let mark = Price::new(dec!(0.2));

        let notional = notional(size, mark).unwrap();
        assert_eq!(notional, dec!(20));
        assert_eq!(leverage(notional, dec!(50)).unwrap(), dec!(0.4));
        assert_eq!(leverage(notional, Decimal::ZERO).unwrap(), Decimal::ZERO);
    }

    #[test]
    fn test_leverage_times_margin_equals_notional() {
        for (notional, margin) in [(dec!(20), dec!(50)), (dec!(1000), dec!(3)), (dec!(7.5), dec!(0.9))] {
            let lev = leverage(notional, margin).unwrap();
            let gap = (lev * margin - notional).abs();
            assert!(gap <= dec!(0.0000000001), "notional={notional} margin={margin}");
        }
    }

    #[test]
    fn test_dust_margin_leverage_overflows_without_panic() {
        // 1e12 size at 0.2 backed by one wei of collateral
        let notional = notional(Size::new(dec!(1000000000000)), Price::new(dec!(0.2))).unwrap();
        let err = leverage(notional, dec!(0.000000000000000001)).unwrap_err();
        assert!(matches!(err, CoreError::Overflow(_)));
    }

    #[test]
    fn test_relative_gap() {
        assert_eq!(relative_gap(dec!(0.4), dec!(0.4)), Some(Decimal::ZERO));
        assert_eq!(relative_gap(dec!(100), dec!(99)), Some(dec!(0.01)));
        assert_eq!(relative_gap(Decimal::ZERO, Decimal::ZERO), Some(Decimal::ZERO));
        assert_eq!(relative_gap(Decimal::MAX, Decimal::MIN), None);
    }
}
