//! Synchronization configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_market_poll_secs() -> u64 {
    30
}

fn default_account_poll_secs() -> u64 {
    60
}

fn default_market_ttl_secs() -> u64 {
    10
}

fn default_account_ttl_secs() -> u64 {
    10
}

/// Polling intervals and cache freshness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Market snapshot poll interval.
    #[serde(default = "default_market_poll_secs")]
    pub market_poll_secs: u64,

    /// Active account poll interval.
    #[serde(default = "default_account_poll_secs")]
    pub account_poll_secs: u64,

    /// Age under which a cached snapshot is served without refetching.
    #[serde(default = "default_market_ttl_secs")]
    pub market_ttl_secs: u64,

    #[serde(default = "default_account_ttl_secs")]
    pub account_ttl_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            market_poll_secs: default_market_poll_secs(),
            account_poll_secs: default_account_poll_secs(),
            market_ttl_secs: default_market_ttl_secs(),
            account_ttl_secs: default_account_ttl_secs(),
        }
    }
}

impl SyncConfig {
    #[inline]
    pub fn market_poll_interval(&self) -> Duration {
        Duration::from_secs(self.market_poll_secs.max(1))
    }

    #[inline]
    pub fn account_poll_interval(&self) -> Duration {
        Duration::from_secs(self.account_poll_secs.max(1))
    }

    #[inline]
    pub fn market_ttl(&self) -> Duration {
        Duration::from_secs(self.market_ttl_secs)
    }

    #[inline]
    pub fn account_ttl(&self) -> Duration {
        Duration::from_secs(self.account_ttl_secs)
    }
}
