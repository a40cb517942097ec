//! Trade error types.

use alloy::primitives::{Address, U256};
use hvx_chain::ChainError;
use hvx_core::{CoreError, ErrorCategory};
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TradeError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Insufficient balance: need {required}, wallet holds {available}")]
    InsufficientBalance { required: Decimal, available: Decimal },

    #[error("Price impact {impact} exceeds limit {limit}")]
    ExcessivePriceImpact { impact: Decimal, limit: Decimal },

    #[error("Insufficient margin: {provided} provided, {required} required")]
    InsufficientMargin { required: Decimal, provided: Decimal },

    #[error("No open position for {0}")]
    NoPosition(Address),

    #[error("Closing would leave base reserve at {remaining}")]
    InvalidReserveState { remaining: Decimal },

    #[error("Insufficient gas funds: need {required} wei, have {available} wei")]
    InsufficientGasFunds { required: U256, available: U256 },

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error("Value conversion error: {0}")]
    Conversion(#[from] CoreError),
}

impl TradeError {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidInput(_) | Self::Conversion(_) => ErrorCategory::InvalidInput,
            Self::InsufficientBalance { .. } => ErrorCategory::InsufficientBalance,
            Self::ExcessivePriceImpact { .. } => ErrorCategory::ExcessivePriceImpact,
            Self::InsufficientMargin { .. } => ErrorCategory::InsufficientMargin,
            Self::NoPosition(_) => ErrorCategory::NoPosition,
            Self::InvalidReserveState { .. } => ErrorCategory::InvalidReserveState,
            Self::InsufficientGasFunds { .. } => ErrorCategory::InsufficientGasFunds,
            Self::Chain(e) => e.category(),
        }
    }
}

pub type TradeResult<T> = Result<T, TradeError>;

#[cfg(test)]
mod tests {
    use super::*;
    use hvx_chain::DecodedRevert;
    use rust_decimal_macros::dec;

    #[test]
    fn test_local_rejections_are_pre_submission() {
        let err = TradeError::ExcessivePriceImpact {
            impact: dec!(0.12),
            limit: dec!(0.10),
        };
        assert_eq!(err.category(), ErrorCategory::ExcessivePriceImpact);
        assert!(err.category().is_pre_submission());
        assert!(TradeError::NoPosition(Address::ZERO)
            .category()
            .is_pre_submission());
    }

    #[test]
    fn test_decoded_revert_keeps_its_category() {
        let err = TradeError::from(ChainError::Revert(DecodedRevert {
            category: ErrorCategory::InsufficientMargin,
            selector: Some([0x69, 0x79, 0xbd, 0x5a]),
            reason: "insufficient balance or margin".to_string(),
        }));
        assert_eq!(err.category(), ErrorCategory::InsufficientMargin);
    }
}
