//! Application error types.

use hvx_core::ErrorCategory;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Chain error: {0}")]
    Chain(#[from] hvx_chain::ChainError),

    #[error("Key error: {0}")]
    Key(#[from] hvx_chain::KeyError),

    #[error("Market error: {0}")]
    Market(#[from] hvx_market::MarketError),

    #[error("Sync error: {0}")]
    Sync(#[from] hvx_sync::SyncError),

    #[error("Trade error: {0}")]
    Trade(#[from] hvx_trade::TradeError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] hvx_telemetry::TelemetryError),

    #[error("Value conversion error: {0}")]
    Core(#[from] hvx_core::CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// Category surfaced to the user, when the failure has one.
    #[must_use]
    pub fn category(&self) -> Option<ErrorCategory> {
        match self {
            Self::Chain(e) => Some(e.category()),
            Self::Market(e) => Some(e.category()),
            Self::Sync(e) => Some(e.category()),
            Self::Trade(e) => Some(e.category()),
            Self::Core(_) => Some(ErrorCategory::InvalidInput),
            Self::Config(_) | Self::Key(_) | Self::Telemetry(_) | Self::Io(_) => None,
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use hvx_chain::ChainError;

    #[test]
    fn test_category_passes_through() {
        let err = AppError::from(ChainError::WrongNetwork {
            actual: 1,
            expected: 998,
        });
        assert_eq!(err.category(), Some(ErrorCategory::WrongNetwork));
        assert_eq!(AppError::Config("bad".into()).category(), None);
    }
}
