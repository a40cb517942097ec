//! Market read error types.

use hvx_chain::ChainError;
use hvx_core::{CoreError, ErrorCategory};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MarketError {
    /// Chain guard rejected the connected network.
    #[error("Network check failed: {0}")]
    Network(ChainError),

    /// At least one contract read of the batch failed.
    #[error("Read batch failed: {0}")]
    ReadBatch(ChainError),

    #[error("Valuation error: {0}")]
    Valuation(#[from] CoreError),

    /// External index feed failed. Never fails a snapshot on its own.
    #[error("Index feed unavailable: {0}")]
    Feed(String),
}

impl MarketError {
    /// Read failures that warrant another attempt.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(e) => e.is_retryable(),
            Self::ReadBatch(e) => e.is_retryable(),
            Self::Valuation(_) => false,
            Self::Feed(_) => true,
        }
    }

    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Network(e) => e.category(),
            Self::ReadBatch(e) => match e.category() {
                ErrorCategory::RateLimited => ErrorCategory::RateLimited,
                ErrorCategory::Timeout => ErrorCategory::Timeout,
                _ => ErrorCategory::ReadBatchFailure,
            },
            Self::Valuation(_) => ErrorCategory::ReadBatchFailure,
            Self::Feed(_) => ErrorCategory::FeedUnavailable,
        }
    }
}

impl From<ChainError> for MarketError {
    fn from(e: ChainError) -> Self {
        match e {
            ChainError::WrongNetwork { .. } => Self::Network(e),
            other => Self::ReadBatch(other),
        }
    }
}

pub type MarketResult<T> = Result<T, MarketError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrong_network_is_not_retried() {
        let err = MarketError::from(ChainError::WrongNetwork {
            actual: 1,
            expected: 998,
        });
        assert!(!err.is_retryable());
        assert_eq!(err.category(), ErrorCategory::WrongNetwork);
    }

    #[test]
    fn test_transport_failure_is_read_batch() {
        let err = MarketError::from(ChainError::Transport("reset".into()));
        assert!(err.is_retryable());
        assert_eq!(err.category(), ErrorCategory::ReadBatchFailure);

        let limited = MarketError::from(ChainError::RateLimited("429".into()));
        assert_eq!(limited.category(), ErrorCategory::RateLimited);
    }
}
