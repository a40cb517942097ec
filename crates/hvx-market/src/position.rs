//! Position and account valuation.

use crate::error::{MarketError, MarketResult};
use alloy::primitives::{Address, U256};
use hvx_chain::{ChainGuard, RawPosition, ReadOnlyMarket};
use hvx_core::fixed::{i256_to_decimal, u256_to_decimal};
use hvx_core::{valuation, AccountView, DecimalConvention, PositionView, Price, Size};
use hvx_telemetry::Metrics;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, warn};

/// Relative disagreement with the contract's figures tolerated before a scale mismatch is reported.
pub const DEFAULT_SCALE_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Value a raw position.
///
/// Returns `None` for a zero size. `liquidation_price` of zero means the
/// contract has none to report.
pub fn value_position(
    raw: &RawPosition,
    liquidation_price: Option<U256>,
    convention: &DecimalConvention,
    tolerance: Decimal,
) -> MarketResult<Option<PositionView>> {
    let size = Size::new(i256_to_decimal(raw.size, convention.size_decimals)?);
    if size.is_zero() {
        return Ok(None);
    }

    let collateral = |v: U256| u256_to_decimal(v, convention.collateral_decimals);
    let price = |v: U256| -> MarketResult<Price> {
        Ok(Price::new(u256_to_decimal(v, convention.price_decimals)?))
    };

    let margin = collateral(raw.margin)?;
    let mark = price(raw.mark_price)?;
    let notional_value = valuation::notional(size, mark)?;
    let contract_leverage = u256_to_decimal(raw.leverage, convention.leverage_decimals)?;
    let contract_notional = collateral(raw.notional_value)?;
    let leverage = match valuation::leverage(notional_value, margin) {
        Ok(leverage) => leverage,
        Err(e) => {
            warn!(
                %margin,
                %notional_value,
                error = %e,
                "Local leverage out of range, using contract figure"
            );
            contract_leverage
        }
    };

    check_scale("leverage", leverage, contract_leverage, tolerance);
    check_scale("notional_value", notional_value, contract_notional, tolerance);

    let liquidation_price = match liquidation_price {
        Some(raw) if !raw.is_zero() => Some(price(raw)?),
        _ => None,
    };

    Ok(Some(PositionView {
        size,
        is_long: size.is_long(),
        margin,
        entry_price: price(raw.entry_price)?,
        unrealized_pnl: i256_to_decimal(raw.unrealized_pnl, convention.collateral_decimals)?,
        notional_value,
        leverage,
        contract_leverage,
        margin_ratio: u256_to_decimal(raw.margin_ratio, convention.ratio_decimals)?,
        is_liquidatable: raw.is_liquidatable,
        mark_price_at_read: mark,
        liquidation_price,
    }))
}

fn check_scale(field: &'static str, local: Decimal, reported: Decimal, tolerance: Decimal) {
    let gap = valuation::relative_gap(local, reported).unwrap_or(Decimal::MAX);
    if gap > tolerance {
        warn!(
            field,
            %local,
            %reported,
            %gap,
            "Local figure disagrees with contract, check the decimal convention"
        );
        Metrics::decimal_scale_mismatch(field);
    }
}

/// Produces position and account views for any address.
pub struct PositionValuationService {
    reader: Arc<dyn ReadOnlyMarket>,
    guard: ChainGuard,
    convention: DecimalConvention,
    tolerance: Decimal,
}

impl PositionValuationService {
    pub fn new(
        reader: Arc<dyn ReadOnlyMarket>,
        guard: ChainGuard,
        convention: DecimalConvention,
    ) -> Self {
        Self {
            reader,
            guard,
            convention,
            tolerance: DEFAULT_SCALE_TOLERANCE,
        }
    }

    #[must_use]
    pub fn with_tolerance(mut self, tolerance: Decimal) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Current position of `trader`, or `None`.
    pub async fn get_position(&self, trader: Address) -> MarketResult<Option<PositionView>> {
        self.guard.assert_network(self.reader.as_ref()).await?;

        let raw = self
            .reader
            .position_details(trader)
            .await
            .map_err(MarketError::ReadBatch)?;
        self.value(trader, &raw).await
    }

    /// Balance, allowance and position of `trader` in one batch.
    pub async fn get_account(&self, trader: Address) -> MarketResult<AccountView> {
        self.guard.assert_network(self.reader.as_ref()).await?;

        let r = self.reader.as_ref();
        let (raw, balance, allowance) = tokio::try_join!(
            r.position_details(trader),
            r.collateral_balance(trader),
            r.collateral_allowance(trader),
        )
        .map_err(|e| {
            Metrics::read_failure("account", e.category().as_str());
            MarketError::ReadBatch(e)
        })?;

        let decimals = self.convention.collateral_decimals;
        let view = AccountView {
            address: trader,
            collateral_balance: u256_to_decimal(balance, decimals)?,
            allowance: u256_to_decimal(allowance, decimals)?,
            position: self.value(trader, &raw).await?,
        };

        debug!(
            %trader,
            balance = %view.collateral_balance,
            has_position = view.position.is_some(),
            "Account read"
        );
        Ok(view)
    }

    async fn value(&self, trader: Address, raw: &RawPosition) -> MarketResult<Option<PositionView>> {
        if !raw.is_open() {
            return Ok(None);
        }

        // Auxiliary read; a failure leaves the field empty.
        let liquidation_price = match self.reader.liquidation_price(trader).await {
            Ok(price) => Some(price),
            Err(e) => {
                warn!(%trader, error = %e, "Liquidation price read failed");
                None
            }
        };

        value_position(raw, liquidation_price, &self.convention, self.tolerance)
    }
}
