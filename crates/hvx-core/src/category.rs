//! Error taxonomy shared by every crate.
//!
//! Each crate keeps its own `thiserror` enum; all of them map onto one
//! `ErrorCategory` so consumers (CLI output, metrics labels, sync status)
//! see a single vocabulary.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Category of a surfaced failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Connected chain id differs from the configured one. Blocking.
    WrongNetwork,
    /// At least one read of a batch failed.
    ReadBatchFailure,
    /// External index price feed failed (non-fatal, fallback used).
    FeedUnavailable,
    InvalidInput,
    InsufficientBalance,
    InsufficientMargin,
    ExcessivePriceImpact,
    NoPosition,
    InvalidReserveState,
    /// Revert that did not map to a more specific category.
    ContractCallException,
    UserRejected,
    InsufficientGasFunds,
    RateLimited,
    Timeout,
}

impl ErrorCategory {
    /// Stable label for logs and metrics.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WrongNetwork => "wrong_network",
            Self::ReadBatchFailure => "read_batch_failure",
            Self::FeedUnavailable => "feed_unavailable",
            Self::InvalidInput => "invalid_input",
            Self::InsufficientBalance => "insufficient_balance",
            Self::InsufficientMargin => "insufficient_margin",
            Self::ExcessivePriceImpact => "excessive_price_impact",
            Self::NoPosition => "no_position",
            Self::InvalidReserveState => "invalid_reserve_state",
            Self::ContractCallException => "contract_call_exception",
            Self::UserRejected => "user_rejected",
            Self::InsufficientGasFunds => "insufficient_gas_funds",
            Self::RateLimited => "rate_limited",
            Self::Timeout => "timeout",
        }
    }

    /// Failures detected locally before any transaction is sent.
    #[must_use]
    pub fn is_pre_submission(&self) -> bool {
        matches!(
            self,
            Self::InvalidInput
                | Self::InsufficientBalance
                | Self::InsufficientMargin
                | Self::ExcessivePriceImpact
                | Self::NoPosition
                | Self::InvalidReserveState
        )
    }

    /// Transient failures that reads may retry with backoff.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ReadBatchFailure | Self::FeedUnavailable | Self::RateLimited | Self::Timeout
        )
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrong_network_is_not_transient() {
        assert!(!ErrorCategory::WrongNetwork.is_transient());
        assert!(!ErrorCategory::WrongNetwork.is_pre_submission());
    }

    #[test]
    fn test_validation_categories_are_pre_submission() {
        for category in [
            ErrorCategory::InvalidInput,
            ErrorCategory::InsufficientBalance,
            ErrorCategory::ExcessivePriceImpact,
            ErrorCategory::InsufficientMargin,
            ErrorCategory::NoPosition,
            ErrorCategory::InvalidReserveState,
        ] {
            assert!(category.is_pre_submission(), "{category}");
        }
        assert!(!ErrorCategory::UserRejected.is_pre_submission());
    }

    #[test]
    fn test_serde_label_matches_as_str() {
        let json = serde_json::to_string(&ErrorCategory::ExcessivePriceImpact).unwrap();
        assert_eq!(json, "\"excessive_price_impact\"");
    }
}
