//! Pre-trade validation.
//!
//! # Check Order (Strict, first failure wins)
//!
//! 1. `size_delta != 0`, `margin_delta > 0`  → InvalidInput
//! 2. `wallet_balance >= margin_delta`       → InsufficientBalance
//! 3. preview; `price_impact <= limit`        → ExcessivePriceImpact
//! 4. `margin_delta >= required_margin`      → InsufficientMargin
//!
//! Checks 1 and 2 are local; 3 and 4 need the contract's quote. Nothing here
//! sends a transaction, and the caller is expected to have asserted the
//! network before asking for a quote.

use crate::error::{TradeError, TradeResult};
use hvx_chain::ReadOnlyMarket;
use hvx_core::fixed::{decimal_to_i256, u256_to_decimal};
use hvx_core::{DecimalConvention, Price, Size, TradePreview};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::debug;

/// Checks that need no chain access.
pub fn check_inputs(size_delta: Size, margin_delta: Decimal) -> TradeResult<()> {
    if size_delta.is_zero() {
        return Err(TradeError::InvalidInput("size delta must be nonzero".to_string()));
    }
    if margin_delta <= Decimal::ZERO {
        return Err(TradeError::InvalidInput(format!(
            "margin must be positive, got {margin_delta}"
        )));
    }
    Ok(())
}

pub fn check_balance(margin_delta: Decimal, wallet_balance: Decimal) -> TradeResult<()> {
    if wallet_balance < margin_delta {
        return Err(TradeError::InsufficientBalance {
            required: margin_delta,
            available: wallet_balance,
        });
    }
    Ok(())
}

/// Checks against the contract's quote. A price impact equal to the limit is accepted.
pub fn check_preview(
    preview: &TradePreview,
    margin_delta: Decimal,
    max_price_impact: Decimal,
) -> TradeResult<()> {
    if preview.price_impact > max_price_impact {
        return Err(TradeError::ExcessivePriceImpact {
            impact: preview.price_impact,
            limit: max_price_impact,
        });
    }
    if margin_delta < preview.required_margin {
        return Err(TradeError::InsufficientMargin {
            required: preview.required_margin,
            provided: margin_delta,
        });
    }
    Ok(())
}

/// Quotes and validates prospective trades.
pub struct TradeValidator {
    reader: Arc<dyn ReadOnlyMarket>,
    convention: DecimalConvention,
    max_price_impact: Decimal,
}

impl TradeValidator {
    pub fn new(
        reader: Arc<dyn ReadOnlyMarket>,
        convention: DecimalConvention,
        max_price_impact: Decimal,
    ) -> Self {
        Self {
            reader,
            convention,
            max_price_impact,
        }
    }

    #[inline]
    pub fn max_price_impact(&self) -> Decimal {
        self.max_price_impact
    }

    /// Contract quote for `size_delta`: preview and required margin, read together.
    pub async fn preview(&self, size_delta: Size) -> TradeResult<TradePreview> {
        let c = &self.convention;
        let raw_size = decimal_to_i256(size_delta.inner(), c.size_decimals)?;

        let (raw, required) = tokio::try_join!(
            self.reader.trade_preview(raw_size),
            self.reader.required_margin(raw_size),
        )?;

        Ok(TradePreview {
            size_delta,
            average_price: Price::new(u256_to_decimal(raw.average_price, c.price_decimals)?),
            price_impact: u256_to_decimal(raw.price_impact, c.ratio_decimals)?,
            trading_fee_cost: u256_to_decimal(raw.trading_fee_cost, c.collateral_decimals)?,
            required_margin: u256_to_decimal(required, c.collateral_decimals)?,
        })
    }

    /// Run every check in order and return the quote the trade was accepted on.
    pub async fn validate(
        &self,
        size_delta: Size,
        margin_delta: Decimal,
        wallet_balance: Decimal,
    ) -> TradeResult<TradePreview> {
        check_inputs(size_delta, margin_delta)?;
        check_balance(margin_delta, wallet_balance)?;

        let preview = self.preview(size_delta).await?;
        check_preview(&preview, margin_delta, self.max_price_impact)?;

        debug!(
            size_delta = %size_delta,
            margin = %margin_delta,
            impact = %preview.price_impact,
            required_margin = %preview.required_margin,
            "Trade validated"
        );
        Ok(preview)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::U256;
    use hvx_chain::mock::scaled;
    use hvx_chain::{MockChain, RawTradePreview};
    use hvx_core::ErrorCategory;
    use rust_decimal_macros::dec;

    fn quote(impact: Decimal, required: Decimal) -> TradePreview {
        TradePreview {
            size_delta: Size::new(dec!(100)),
            average_price: Price::new(dec!(0.2)),
            price_impact: impact,
            trading_fee_cost: dec!(0.06),
            required_margin: required,
        }
    }

    fn validator(chain: Arc<MockChain>) -> TradeValidator {
        TradeValidator::new(chain, DecimalConvention::WAD_V2, dec!(0.10))
    }

    #[test]
    fn test_impact_boundary_is_inclusive() {
        assert!(check_preview(&quote(dec!(0.10), dec!(2)), dec!(50), dec!(0.10)).is_ok());

        let err = check_preview(&quote(dec!(0.1000001), dec!(2)), dec!(50), dec!(0.10))
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::ExcessivePriceImpact);
    }

    #[test]
    fn test_impact_checked_before_margin() {
        let err = check_preview(&quote(dec!(0.12), dec!(100)), dec!(50), dec!(0.10)).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::ExcessivePriceImpact);
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(check_inputs(Size::ZERO, dec!(10)).is_err());
        assert!(check_inputs(Size::new(dec!(1)), Decimal::ZERO).is_err());
        assert!(check_inputs(Size::new(dec!(-1)), dec!(-5)).is_err());
        assert!(check_inputs(Size::new(dec!(-1)), dec!(5)).is_ok());
    }

    #[tokio::test]
    async fn test_preview_decodes_quote() {
        let chain = Arc::new(MockChain::new(998));
        chain.set_trade_preview(RawTradePreview {
            average_price: scaled(21, 16),
            price_impact: scaled(8, 16),
            trading_fee_cost: scaled(6, 16),
        });
        chain.set_required_margin(scaled(2, 18));

        let preview = validator(chain).preview(Size::new(dec!(100))).await.unwrap();
        assert_eq!(preview.average_price, Price::new(dec!(0.21)));
        assert_eq!(preview.price_impact, dec!(0.08));
        assert_eq!(preview.trading_fee_cost, dec!(0.06));
        assert_eq!(preview.required_margin, dec!(2));
    }

    #[tokio::test]
    async fn test_excessive_impact_rejected() {
        let chain = Arc::new(MockChain::new(998));
        chain.set_trade_preview(RawTradePreview {
            average_price: scaled(2, 17),
            price_impact: scaled(12, 16),
            trading_fee_cost: U256::ZERO,
        });

        let err = validator(chain)
            .validate(Size::new(dec!(100)), dec!(50), dec!(1000))
            .await
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::ExcessivePriceImpact);
    }

    #[tokio::test]
    async fn test_moderate_impact_with_enough_margin_accepted() {
        let chain = Arc::new(MockChain::new(998));
        chain.set_trade_preview(RawTradePreview {
            average_price: scaled(2, 17),
            price_impact: scaled(8, 16),
            trading_fee_cost: U256::ZERO,
        });
        chain.set_required_margin(scaled(2, 18));

        let preview = validator(chain)
            .validate(Size::new(dec!(100)), dec!(50), dec!(1000))
            .await
            .unwrap();
        assert_eq!(preview.price_impact, dec!(0.08));
    }

    #[tokio::test]
    async fn test_balance_checked_before_any_read() {
        let chain = Arc::new(MockChain::new(998));
        let err = validator(chain.clone())
            .validate(Size::new(dec!(100)), dec!(50), dec!(10))
            .await
            .unwrap_err();

        assert_eq!(err.category(), ErrorCategory::InsufficientBalance);
        assert_eq!(chain.read_count("trade_preview"), 0);
    }

    #[tokio::test]
    async fn test_margin_below_requirement_rejected() {
        let chain = Arc::new(MockChain::new(998));
        chain.set_required_margin(scaled(60, 18));

        let err = validator(chain)
            .validate(Size::new(dec!(100)), dec!(50), dec!(1000))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TradeError::InsufficientMargin { required, provided }
                if required == dec!(60) && provided == dec!(50)
        ));
    }
}
