//! Application configuration.

use crate::error::{AppError, AppResult};
use alloy::primitives::Address;
use hvx_chain::{ContractAddresses, KeySource, NetworkConfig, DEFAULT_KEY_ENV};
use hvx_core::DecimalConvention;
use hvx_market::{
    FundingModel, HistoryConfig, DEFAULT_FALLBACK_INDEX, DEFAULT_FEED_TIMEOUT, DEFAULT_INFO_URL,
    DEFAULT_SCALE_TOLERANCE,
};
use hvx_sync::{RetryPolicy, SyncConfig};
use hvx_trade::TradeConfig;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "HVX_CONFIG";

/// Config file used when neither `--config` nor `HVX_CONFIG` is given.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

fn default_convention() -> String {
    "wad-v2".to_string()
}

fn default_scale_tolerance() -> Decimal {
    DEFAULT_SCALE_TOLERANCE
}

fn default_info_url() -> String {
    DEFAULT_INFO_URL.to_string()
}

fn default_feed_timeout_secs() -> u64 {
    DEFAULT_FEED_TIMEOUT.as_secs()
}

fn default_fallback_index() -> Decimal {
    DEFAULT_FALLBACK_INDEX
}

fn default_key_env() -> String {
    DEFAULT_KEY_ENV.to_string()
}

/// Fixed-point convention of the deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecimalsConfig {
    /// Named convention (`wad-v2`, `usdc6-v1`).
    #[serde(default = "default_convention")]
    pub convention: String,

    /// Relative gap between local and contract figures reported as a scale mismatch.
    #[serde(default = "default_scale_tolerance")]
    pub scale_tolerance: Decimal,
}

impl Default for DecimalsConfig {
    fn default() -> Self {
        Self {
            convention: default_convention(),
            scale_tolerance: default_scale_tolerance(),
        }
    }
}

/// External index price feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedConfig {
    #[serde(default = "default_info_url")]
    pub info_url: String,
    #[serde(default = "default_feed_timeout_secs")]
    pub timeout_secs: u64,
    /// Index price used when the feed fails.
    #[serde(default = "default_fallback_index")]
    pub fallback_index: Decimal,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            info_url: default_info_url(),
            timeout_secs: default_feed_timeout_secs(),
            fallback_index: default_fallback_index(),
        }
    }
}

impl FeedConfig {
    #[inline]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

/// Signing key and wallet settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Environment variable holding the trading key.
    #[serde(default = "default_key_env")]
    pub key_env: String,

    /// Key file. Takes precedence over `key_env` when set.
    #[serde(default)]
    pub key_file: Option<PathBuf>,

    /// Expected signer address; loading fails on mismatch.
    #[serde(default)]
    pub expected_address: Option<Address>,

    /// Address shown in read-only mode.
    #[serde(default)]
    pub watch_address: Option<Address>,

    /// Wallet endpoint for network switching. Falls back to the network RPC.
    #[serde(default)]
    pub wallet_rpc_url: Option<String>,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            key_env: default_key_env(),
            key_file: None,
            expected_address: None,
            watch_address: None,
            wallet_rpc_url: None,
        }
    }
}

impl AccountConfig {
    pub fn key_source(&self) -> KeySource {
        match &self.key_file {
            Some(path) => KeySource::File { path: path.clone() },
            None => KeySource::EnvVar {
                var_name: self.key_env.clone(),
            },
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub contracts: ContractAddresses,
    #[serde(default)]
    pub decimals: DecimalsConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    /// Backoff for reads and event resubscription.
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub trade: TradeConfig,
    #[serde(default)]
    pub funding: FundingModel,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub account: AccountConfig,
}

impl AppConfig {
    /// Load configuration.
    ///
    /// Path resolution: `path` > `HVX_CONFIG` > `config/default.toml`.
    /// A missing file falls back to the built-in testnet defaults; an
    /// explicitly requested file must exist.
    pub fn load(path: Option<String>) -> AppResult<Self> {
        let explicit = path.or_else(|| std::env::var(CONFIG_ENV).ok());
        let config_path = explicit
            .clone()
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

        if Path::new(&config_path).exists() {
            Self::from_file(&config_path)
        } else if explicit.is_some() {
            Err(AppError::Config(format!(
                "Config file not found: {config_path}"
            )))
        } else {
            tracing::warn!(path = %config_path, "Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Load from a specific file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would only fail later.
    pub fn validate(&self) -> AppResult<()> {
        self.convention()?;
        if self.decimals.scale_tolerance < Decimal::ZERO {
            return Err(AppError::Config(
                "decimals.scale_tolerance must not be negative".to_string(),
            ));
        }
        if self.feed.fallback_index <= Decimal::ZERO {
            return Err(AppError::Config(
                "feed.fallback_index must be positive".to_string(),
            ));
        }
        if self.trade.max_price_impact <= Decimal::ZERO {
            return Err(AppError::Config(
                "trade.max_price_impact must be positive".to_string(),
            ));
        }
        if self.history.chart_bucket_secs <= 0 {
            return Err(AppError::Config(
                "history.chart_bucket_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn convention(&self) -> AppResult<DecimalConvention> {
        Ok(DecimalConvention::from_name(&self.decimals.convention)?)
    }

    /// Wallet endpoint for network switching.
    pub fn wallet_rpc_url(&self) -> &str {
        self.account
            .wallet_rpc_url
            .as_deref()
            .unwrap_or(&self.network.rpc_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_defaults_target_testnet() {
        let config = AppConfig::default();
        assert_eq!(config.network.chain_id, 998);
        assert_eq!(config.contracts, ContractAddresses::TESTNET);
        assert_eq!(config.convention().unwrap(), DecimalConvention::WAD_V2);
        assert_eq!(config.feed.fallback_index, dec!(3000));
        assert_eq!(config.wallet_rpc_url(), config.network.rpc_url);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [decimals]
            convention = "usdc6-v1"

            [trade]
            max_price_impact = "0.05"

            [funding]
            model = "premium"
            "#,
        )
        .unwrap();

        assert_eq!(config.convention().unwrap().collateral_decimals, 6);
        assert_eq!(config.decimals.scale_tolerance, dec!(0.01));
        assert_eq!(config.trade.max_price_impact, dec!(0.05));
        assert_eq!(config.trade.approval_multiplier, 2);
        assert_eq!(config.sync, SyncConfig::default());
        assert!(matches!(
            config.funding,
            FundingModel::Premium { damping, .. } if damping == Decimal::ONE
        ));
    }

    #[test]
    fn test_unknown_convention_rejected() {
        let config: AppConfig = toml::from_str(
            r#"
            [decimals]
            convention = "wad-v9"
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_negative_scale_tolerance_rejected() {
        let config: AppConfig = toml::from_str(
            r#"
            [decimals]
            scale_tolerance = "-0.5"
            "#,
        )
        .unwrap();
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }

    #[test]
    fn test_key_file_takes_precedence() {
        let mut account = AccountConfig::default();
        assert_eq!(
            account.key_source(),
            KeySource::EnvVar {
                var_name: DEFAULT_KEY_ENV.to_string()
            }
        );

        account.key_file = Some(PathBuf::from("/tmp/hvx.key"));
        assert!(matches!(account.key_source(), KeySource::File { .. }));
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let result = AppConfig::load(Some("/nonexistent/hvx.toml".to_string()));
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[test]
    fn test_bundled_config_parses() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../../config/default.toml");
        let config = AppConfig::from_file(path).unwrap();
        assert_eq!(config.network, NetworkConfig::hyperliquid_testnet());
        assert_eq!(config.contracts, ContractAddresses::TESTNET);
    }
}
