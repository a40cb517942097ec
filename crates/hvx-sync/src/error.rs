//! Synchronization error types.

use hvx_core::ErrorCategory;
use hvx_market::MarketError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Market(#[from] MarketError),

    /// The fetch finished after its binding was replaced; the result was dropped.
    #[error("Result of generation {generation} discarded, current is {current}")]
    Superseded { generation: u64, current: u64 },

    #[error("Synchronization cancelled")]
    Cancelled,
}

impl SyncError {
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Market(e) => e.is_retryable(),
            Self::Superseded { .. } | Self::Cancelled => false,
        }
    }

    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Market(e) => e.category(),
            Self::Superseded { .. } | Self::Cancelled => ErrorCategory::ReadBatchFailure,
        }
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
