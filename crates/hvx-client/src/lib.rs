//! HyperVIX command-line client.
//!
//! Wires the crates together around one gateway binding:
//! - Market snapshot and account reads through the shared cache
//! - Background sync (interval polling plus contract events)
//! - Position mutations with pre-trade validation
//! - Wallet network switching

pub mod app;
pub mod config;
pub mod error;

pub use app::{Application, PreviewSummary};
pub use config::AppConfig;
pub use error::{AppError, AppResult};
