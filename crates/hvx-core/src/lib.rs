//! Core domain types for the HyperVIX client.
//!
//! This crate provides the types shared by every other crate:
//! - `Price`, `Size`: Precision-safe numeric types
//! - `DecimalConvention`: Fixed-point scales of a contract deployment
//! - `MarketSnapshot`, `PositionView`, `AccountView`, `TradePreview`: Derived trading state
//! - `valuation`: Integer mark price and the derived position figures
//! - `ErrorCategory`: Error taxonomy surfaced to consumers

pub mod category;
pub mod convention;
pub mod decimal;
pub mod error;
pub mod fixed;
pub mod types;
pub mod valuation;

pub use category::ErrorCategory;
pub use convention::DecimalConvention;
pub use decimal::{Price, Size};
pub use error::{CoreError, Result};
pub use types::{
    AccountView, Direction, IndexSource, Liquidity, MarketSnapshot, OpenInterest, PortfolioStats,
    PositionView, RiskParams, TradePreview,
};
