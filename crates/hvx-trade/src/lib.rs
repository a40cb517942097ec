//! Trade validation and execution for the HyperVIX client.
//!
//! - `TradeValidator`: Contract quote plus the ordered pre-trade checks
//! - `MutationExecutor`: Approve-then-act write flow with gas pre-checks
//! - `sizing`: Trade-form estimates (leverage, size, liquidation price, fee)

pub mod config;
pub mod error;
pub mod executor;
pub mod sizing;
pub mod validator;

pub use config::TradeConfig;
pub use error::{TradeError, TradeResult};
pub use executor::{MutationExecutor, MutationKind, MutationState};
pub use sizing::{
    estimate_trade, estimated_liquidation_price, estimated_trading_fee, leverage_for,
    size_for_leverage, TradeEstimate,
};
pub use validator::{check_balance, check_inputs, check_preview, TradeValidator};
