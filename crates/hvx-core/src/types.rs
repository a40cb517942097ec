//! Derived trading state.
//!
//! Every value here is produced wholesale from one batch of contract reads
//! and replaced wholesale on the next refresh. None of it is patched in place.

use crate::{Price, Size};
use alloy::primitives::Address;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// Signed size delta for an absolute `size` in this direction.
    #[inline]
    pub fn signed(&self, size: Size) -> Size {
        match self {
            Self::Long => size.abs(),
            Self::Short => -size.abs(),
        }
    }

    #[inline]
    pub fn of(size: Size) -> Option<Self> {
        if size.is_long() {
            Some(Self::Long)
        } else if size.is_short() {
            Some(Self::Short)
        } else {
            None
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Long => write!(f, "long"),
            Self::Short => write!(f, "short"),
        }
    }
}

/// Where the index price of a snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexSource {
    /// Fetched from the external feed during this refresh.
    Live,
    /// Feed failed or returned garbage; the configured default was used.
    Fallback,
}

/// Current vAMM reserves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Liquidity {
    pub base: Size,
    pub quote: Decimal,
}

/// Aggregate outstanding position size by side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenInterest {
    pub longs: Size,
    pub shorts: Size,
    /// `|longs - shorts|`
    pub net: Size,
    /// `longs + shorts`
    pub total: Size,
}

impl OpenInterest {
    pub fn from_sides(longs: Size, shorts: Size) -> Self {
        Self {
            longs,
            shorts,
            net: (longs - shorts).abs(),
            total: longs + shorts,
        }
    }

    /// `(longs - shorts) / (longs + shorts)`, zero when there is no open interest.
    pub fn imbalance_ratio(&self) -> Decimal {
        if self.total.is_zero() {
            return Decimal::ZERO;
        }
        (self.longs - self.shorts).inner() / self.total.inner()
    }
}

/// Read-mostly risk parameters of the perpetual.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskParams {
    pub max_leverage: Decimal,
    pub maintenance_margin_ratio: Decimal,
    pub liquidation_fee_rate: Decimal,
    pub trading_fee_rate: Decimal,
}

/// One consistent view of the market.
///
/// Capture time lives on the cache entry rather than here, so two snapshots
/// of unchanged chain state compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    /// Annualized volatility as a fraction (0.65 = 65%).
    pub volatility: Decimal,
    pub mark_price: Price,
    pub index_price: Price,
    pub index_source: IndexSource,
    pub cumulative_funding_rate: Decimal,
    pub last_funding_time: DateTime<Utc>,
    pub funding_interval_secs: u64,
    pub next_funding_time: DateTime<Utc>,
    /// Last oracle update.
    pub last_update: DateTime<Utc>,
    pub liquidity: Liquidity,
    pub open_interest: OpenInterest,
    pub risk_params: RiskParams,
}

/// A trader's open position, valued at read time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionView {
    pub size: Size,
    pub is_long: bool,
    pub margin: Decimal,
    pub entry_price: Price,
    pub unrealized_pnl: Decimal,
    /// `|size| * mark_price_at_read`
    pub notional_value: Decimal,
    /// `notional_value / margin`, recomputed locally. The contract figure when out of range.
    pub leverage: Decimal,
    /// Leverage as reported by the contract, kept for scale diagnostics.
    pub contract_leverage: Decimal,
    pub margin_ratio: Decimal,
    /// Contract predicate; never recomputed client-side.
    pub is_liquidatable: bool,
    pub mark_price_at_read: Price,
    pub liquidation_price: Option<Price>,
}

impl PositionView {
    #[inline]
    pub fn direction(&self) -> Direction {
        if self.is_long {
            Direction::Long
        } else {
            Direction::Short
        }
    }
}

/// Per-address state held by the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountView {
    pub address: Address,
    pub collateral_balance: Decimal,
    /// Collateral the perpetual may pull from `address`.
    pub allowance: Decimal,
    /// `None` when the trader has no open position.
    pub position: Option<PositionView>,
}

impl AccountView {
    /// Portfolio totals derived from this view.
    pub fn portfolio(&self) -> PortfolioStats {
        let (locked_margin, unrealized_pnl) = self
            .position
            .as_ref()
            .map_or((Decimal::ZERO, Decimal::ZERO), |p| (p.margin, p.unrealized_pnl));

        PortfolioStats {
            total_value: self
                .collateral_balance
                .saturating_add(locked_margin)
                .saturating_add(unrealized_pnl),
            available_balance: self.collateral_balance,
            locked_margin,
            unrealized_pnl,
        }
    }
}

/// Wallet and position totals for one account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioStats {
    /// Balance plus locked margin plus unrealized PnL.
    pub total_value: Decimal,
    /// Wallet collateral not posted as margin.
    pub available_balance: Decimal,
    pub locked_margin: Decimal,
    pub unrealized_pnl: Decimal,
}

/// Contract quote for a prospective trade. Never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradePreview {
    pub size_delta: Size,
    pub average_price: Price,
    /// Fraction (0.10 = 10%).
    pub price_impact: Decimal,
    pub trading_fee_cost: Decimal,
    pub required_margin: Decimal,
}

/// Convert a contract timestamp (unix seconds) to UTC, clamping out-of-range values to the epoch.
pub fn unix_to_utc(secs: u64) -> DateTime<Utc> {
    i64::try_from(secs)
        .ok()
        .and_then(|s| DateTime::from_timestamp(s, 0))
        .unwrap_or_default()
}
