//! Trade policy configuration.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

fn default_max_price_impact() -> Decimal {
    Decimal::new(10, 2) // 0.10
}

fn default_approval_multiplier() -> u64 {
    2
}

fn default_gas_margin_pct() -> u64 {
    20
}

/// Pre-trade policy limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeConfig {
    /// Largest accepted price impact, inclusive (0.10 = 10%).
    #[serde(default = "default_max_price_impact")]
    pub max_price_impact: Decimal,

    /// Approval size as a multiple of the margin, so follow-up trades skip the approval step.
    #[serde(default = "default_approval_multiplier")]
    pub approval_multiplier: u64,

    /// Percentage added on top of the gas estimate.
    #[serde(default = "default_gas_margin_pct")]
    pub gas_margin_pct: u64,
}

impl Default for TradeConfig {
    fn default() -> Self {
        Self {
            max_price_impact: default_max_price_impact(),
            approval_multiplier: default_approval_multiplier(),
            gas_margin_pct: default_gas_margin_pct(),
        }
    }
}

impl TradeConfig {
    /// `estimate` plus the configured margin, saturating.
    #[inline]
    pub fn gas_limit(&self, estimate: u64) -> u64 {
        let padded = u128::from(estimate) * u128::from(100 + self.gas_margin_pct) / 100;
        u64::try_from(padded).unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_defaults() {
        let config = TradeConfig::default();
        assert_eq!(config.max_price_impact, dec!(0.10));
        assert_eq!(config.approval_multiplier, 2);
        assert_eq!(config.gas_limit(250_000), 300_000);
    }

    #[test]
    fn test_gas_limit_saturates() {
        let config = TradeConfig {
            gas_margin_pct: 50,
            ..TradeConfig::default()
        };
        assert_eq!(config.gas_limit(u64::MAX), u64::MAX);
    }
}
