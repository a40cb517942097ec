//! Fixed-point scales of a contract deployment.
//!
//! The perpetual has been deployed with more than one collateral scale
//! (6-decimal mock USDC in the first release, 18-decimal accounting in the
//! current one). Scales are never guessed from value magnitudes: the active
//! convention is selected by name from configuration.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};

/// Decimal places used by each family of contract values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecimalConvention {
    /// Margin, balances, allowance, quote reserve, PnL, notional, fees paid.
    pub collateral_decimals: u8,
    /// Position size, base reserve, open interest.
    pub size_decimals: u8,
    /// Mark, entry, average-fill and liquidation prices.
    pub price_decimals: u8,
    /// Fee rates, maintenance margin, margin ratio, price impact, funding rates.
    pub ratio_decimals: u8,
    /// Contract-reported leverage and `maxLeverage`.
    pub leverage_decimals: u8,
    /// Annualized volatility from the oracle.
    pub volatility_decimals: u8,
}

impl DecimalConvention {
    /// Current deployment: every value in 18-decimal WAD.
    pub const WAD_V2: Self = Self {
        collateral_decimals: 18,
        size_decimals: 18,
        price_decimals: 18,
        ratio_decimals: 18,
        leverage_decimals: 18,
        volatility_decimals: 18,
    };

    /// First deployment: 6-decimal collateral token, everything else WAD.
    pub const USDC6_V1: Self = Self {
        collateral_decimals: 6,
        ..Self::WAD_V2
    };

    /// Look up a named convention (`wad-v2`, `usdc6-v1`).
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "wad-v2" => Ok(Self::WAD_V2),
            "usdc6-v1" => Ok(Self::USDC6_V1),
            other => Err(CoreError::UnknownConvention(other.to_string())),
        }
    }
}

impl Default for DecimalConvention {
    fn default() -> Self {
        Self::WAD_V2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_conventions() {
        assert_eq!(
            DecimalConvention::from_name("wad-v2").unwrap(),
            DecimalConvention::WAD_V2
        );
        let legacy = DecimalConvention::from_name("usdc6-v1").unwrap();
        assert_eq!(legacy.collateral_decimals, 6);
        assert_eq!(legacy.size_decimals, 18);
    }

    #[test]
    fn test_unknown_convention_is_rejected() {
        assert!(matches!(
            DecimalConvention::from_name("auto"),
            Err(CoreError::UnknownConvention(_))
        ));
    }
}
