//! Trade-form sizing helpers.
//!
//! Client-side estimates for filling in a trade before asking the contract
//! for a preview. The contract's own figures win once a position exists.
//! Every helper returns `None` rather than a figure that does not fit a
//! `Decimal`.

use hvx_core::{Direction, Price, RiskParams, Size};
use rust_decimal::Decimal;
use serde::Serialize;

/// Leverage of `size` at `mark` backed by `margin`. `None` without margin.
pub fn leverage_for(size: Size, margin: Decimal, mark: Price) -> Option<Decimal> {
    if margin <= Decimal::ZERO {
        return None;
    }
    size.notional(mark)?.checked_div(margin)
}

/// Absolute size that `margin` buys at `leverage` and `mark`. `None` without a price.
pub fn size_for_leverage(margin: Decimal, leverage: Decimal, mark: Price) -> Option<Size> {
    if !mark.is_positive() {
        return None;
    }
    let size = margin.checked_mul(leverage)?.checked_div(mark.inner())?;
    Some(Size::new(size.abs()))
}

/// Price at which a fresh position at `leverage` hits maintenance margin.
///
/// Long: `entry * (1 - 1/lev + mmr)`; short: `entry * (1 + 1/lev - mmr)`.
/// Floored at zero. `None` for non-positive leverage.
pub fn estimated_liquidation_price(
    entry: Price,
    leverage: Decimal,
    maintenance_margin_ratio: Decimal,
    direction: Direction,
) -> Option<Price> {
    if leverage <= Decimal::ZERO {
        return None;
    }
    let cushion = Decimal::ONE.checked_div(leverage)?;
    let factor = match direction {
        Direction::Long => Decimal::ONE
            .checked_sub(cushion)?
            .checked_add(maintenance_margin_ratio)?,
        Direction::Short => Decimal::ONE
            .checked_add(cushion)?
            .checked_sub(maintenance_margin_ratio)?,
    };
    Some(Price::new(entry.inner().checked_mul(factor)?).floor_at_zero())
}

#[inline]
pub fn estimated_trading_fee(notional: Decimal, fee_rate: Decimal) -> Option<Decimal> {
    notional.abs().checked_mul(fee_rate)
}

/// Client-side figures shown next to a contract quote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TradeEstimate {
    pub entry_price: Price,
    pub notional: Option<Decimal>,
    pub margin: Decimal,
    pub leverage: Option<Decimal>,
    pub liquidation_price: Option<Price>,
    pub trading_fee: Option<Decimal>,
    /// Above the market's maximum leverage.
    pub exceeds_max_leverage: bool,
}

/// Estimate a fresh position of `size` entered at `entry` with `margin`.
pub fn estimate_trade(
    direction: Direction,
    size: Size,
    margin: Decimal,
    entry: Price,
    risk: &RiskParams,
) -> TradeEstimate {
    let notional = size.notional(entry);
    let leverage = leverage_for(size, margin, entry);
    let liquidation_price = leverage.and_then(|lev| {
        estimated_liquidation_price(entry, lev, risk.maintenance_margin_ratio, direction)
    });

    TradeEstimate {
        entry_price: entry,
        notional,
        margin,
        leverage,
        liquidation_price,
        trading_fee: notional.and_then(|n| estimated_trading_fee(n, risk.trading_fee_rate)),
        exceeds_max_leverage: leverage.is_some_and(|lev| lev > risk.max_leverage),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn risk() -> RiskParams {
        RiskParams {
            max_leverage: dec!(10),
            maintenance_margin_ratio: dec!(0.05),
            liquidation_fee_rate: dec!(0.025),
            trading_fee_rate: dec!(0.003),
        }
    }

    #[test]
    fn test_leverage_for() {
        let leverage = leverage_for(Size::new(dec!(-100)), dec!(50), Price::new(dec!(0.2)));
        assert_eq!(leverage, Some(dec!(0.4)));
        assert_eq!(
            leverage_for(Size::new(dec!(100)), Decimal::ZERO, Price::new(dec!(0.2))),
            None
        );
    }

    #[test]
    fn test_leverage_for_dust_margin_is_none() {
        let leverage = leverage_for(
            Size::new(dec!(1000000000000)),
            dec!(0.000000000000000001),
            Price::new(dec!(0.2)),
        );
        assert_eq!(leverage, None);
    }

    #[test]
    fn test_size_for_leverage_inverts_leverage_for() {
        let mark = Price::new(dec!(0.25));
        let size = size_for_leverage(dec!(40), dec!(5), mark).unwrap();
        assert_eq!(size, Size::new(dec!(800)));
        assert_eq!(leverage_for(size, dec!(40), mark), Some(dec!(5)));
        assert_eq!(size_for_leverage(dec!(40), dec!(5), Price::ZERO), None);
    }

    #[test]
    fn test_liquidation_price_long_and_short() {
        let entry = Price::new(dec!(100));
        let long = estimated_liquidation_price(entry, dec!(5), dec!(0.05), Direction::Long);
        let short = estimated_liquidation_price(entry, dec!(5), dec!(0.05), Direction::Short);

        assert_eq!(long, Some(Price::new(dec!(85))));
        assert_eq!(short, Some(Price::new(dec!(115))));
    }

    #[test]
    fn test_liquidation_price_floors_at_zero() {
        let entry = Price::new(dec!(100));
        let price = estimated_liquidation_price(entry, dec!(0.5), dec!(0.05), Direction::Long);
        assert_eq!(price, Some(Price::ZERO));
        assert_eq!(
            estimated_liquidation_price(entry, Decimal::ZERO, dec!(0.05), Direction::Long),
            None
        );
    }

    #[test]
    fn test_trading_fee() {
        assert_eq!(estimated_trading_fee(dec!(-200), dec!(0.003)), Some(dec!(0.600)));
    }

    #[test]
    fn test_estimate_trade() {
        let estimate = estimate_trade(
            Direction::Short,
            Size::new(dec!(1000)),
            dec!(40),
            Price::new(dec!(0.2)),
            &risk(),
        );

        assert_eq!(estimate.notional, Some(dec!(200)));
        assert_eq!(estimate.leverage, Some(dec!(5)));
        // 0.2 * (1 + 0.2 - 0.05)
        assert_eq!(estimate.liquidation_price, Some(Price::new(dec!(0.23))));
        assert_eq!(estimate.trading_fee, Some(dec!(0.6)));
        assert!(!estimate.exceeds_max_leverage);
    }

    #[test]
    fn test_estimate_flags_excess_leverage() {
        let estimate = estimate_trade(
            Direction::Long,
            Size::new(dec!(1000)),
            dec!(10),
            Price::new(dec!(0.2)),
            &risk(),
        );
        assert_eq!(estimate.leverage, Some(dec!(20)));
        assert!(estimate.exceeds_max_leverage);
    }
}
