//! Error types for hvx-core.

use thiserror::Error;

/// Core error types.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    #[error("Fixed-point overflow: {0}")]
    Overflow(String),

    #[error("Division by zero: {0}")]
    DivisionByZero(&'static str),

    #[error("Negative value not allowed: {0}")]
    NegativeValue(String),

    #[error("Decimal parse error: {0}")]
    DecimalParse(#[from] rust_decimal::Error),

    #[error("Unknown decimal convention: {0}")]
    UnknownConvention(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
