//! Chain access error types.

use crate::keys::KeyError;
use crate::revert::DecodedRevert;
use hvx_core::{CoreError, ErrorCategory};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("Wrong network: expected chain {expected}, connected to {actual}")]
    WrongNetwork { actual: u64, expected: u64 },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Contract reverted: {0}")]
    Revert(DecodedRevert),

    #[error("User rejected the request")]
    UserRejected,

    #[error("Insufficient funds for gas: {0}")]
    InsufficientGasFunds(String),

    #[error("Chain {0} is not known to the wallet")]
    UnknownChain(u64),

    #[error("No trading signer configured")]
    NoSigner,

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    #[error("Value conversion error: {0}")]
    Core(#[from] CoreError),
}

impl ChainError {
    /// Transient failures worth retrying for reads.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::RateLimited(_) | Self::Timeout(_)
        )
    }

    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::WrongNetwork { .. } | Self::UnknownChain(_) => ErrorCategory::WrongNetwork,
            Self::Transport(_) | Self::Decode(_) | Self::Core(_) => {
                ErrorCategory::ReadBatchFailure
            }
            Self::RateLimited(_) => ErrorCategory::RateLimited,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Revert(revert) => revert.category,
            Self::UserRejected => ErrorCategory::UserRejected,
            Self::InsufficientGasFunds(_) => ErrorCategory::InsufficientGasFunds,
            Self::NoSigner | Self::Key(_) => ErrorCategory::InvalidInput,
        }
    }
}

pub type ChainResult<T> = Result<T, ChainError>;
