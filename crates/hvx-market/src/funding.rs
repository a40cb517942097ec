//! Predicted funding rate.
//!
//! Advisory only: the contract settles funding on its own schedule and the
//! settled rate may differ from anything predicted here.

use chrono::{DateTime, Utc};
use hvx_core::MarketSnapshot;
use hvx_telemetry::Metrics;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

fn default_imbalance_k() -> Decimal {
    Decimal::new(1, 4)
}

fn default_fair_value_factor() -> Decimal {
    Decimal::new(20, 2)
}

fn default_damping() -> Decimal {
    Decimal::ONE
}

/// Funding prediction model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum FundingModel {
    /// `(longs - shorts) / (longs + shorts) * k`
    Imbalance {
        #[serde(default = "default_imbalance_k")]
        k: Decimal,
    },
    /// `(mark - volatility * fair_value_factor) / mark * damping`
    Premium {
        #[serde(default = "default_fair_value_factor")]
        fair_value_factor: Decimal,
        #[serde(default = "default_damping")]
        damping: Decimal,
    },
}

impl Default for FundingModel {
    fn default() -> Self {
        Self::Imbalance {
            k: default_imbalance_k(),
        }
    }
}

/// Funding summary for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FundingInfo {
    pub cumulative_rate: Decimal,
    pub predicted_rate: Decimal,
    pub imbalance_ratio: Decimal,
    pub last_funding_time: DateTime<Utc>,
    pub next_funding_time: DateTime<Utc>,
    pub funding_interval_secs: u64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FundingRateEstimator {
    model: FundingModel,
}

impl FundingRateEstimator {
    pub fn new(model: FundingModel) -> Self {
        Self { model }
    }

    #[inline]
    pub fn model(&self) -> FundingModel {
        self.model
    }

    /// Predicted rate for the next settlement.
    ///
    /// Zero when the model has no input or the result does not fit a `Decimal`.
    pub fn predict_funding_rate(&self, snapshot: &MarketSnapshot) -> Decimal {
        let rate = match self.model {
            FundingModel::Imbalance { k } => {
                if snapshot.open_interest.total.is_zero() {
                    return Decimal::ZERO;
                }
                snapshot.open_interest.imbalance_ratio().checked_mul(k)
            }
            FundingModel::Premium {
                fair_value_factor,
                damping,
            } => {
                let mark = snapshot.mark_price.inner();
                if mark.is_zero() {
                    return Decimal::ZERO;
                }
                snapshot
                    .volatility
                    .checked_mul(fair_value_factor)
                    .and_then(|fair| mark.checked_sub(fair))
                    .and_then(|premium| premium.checked_div(mark))
                    .and_then(|premium| premium.checked_mul(damping))
            }
        };

        let Some(rate) = rate else {
            warn!(model = ?self.model, "Predicted funding rate out of range");
            return Decimal::ZERO;
        };
        Metrics::predicted_funding_rate(rate.to_f64().unwrap_or_default());
        rate
    }

    pub fn funding_info(&self, snapshot: &MarketSnapshot) -> FundingInfo {
        FundingInfo {
            cumulative_rate: snapshot.cumulative_funding_rate,
            predicted_rate: self.predict_funding_rate(snapshot),
            imbalance_ratio: snapshot.open_interest.imbalance_ratio(),
            last_funding_time: snapshot.last_funding_time,
            next_funding_time: snapshot.next_funding_time,
            funding_interval_secs: snapshot.funding_interval_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{build_snapshot, RawMarket};
    use hvx_chain::mock::scaled;
    use hvx_core::{DecimalConvention, IndexSource, Price};
    use rust_decimal_macros::dec;

    fn snapshot(longs: u64, shorts: u64, volatility_pct: u64) -> MarketSnapshot {
        let raw = RawMarket {
            volatility: scaled(volatility_pct, 16),
            base_reserve: scaled(500_000, 18),
            quote_reserve: scaled(100_000, 18),
            total_long_size: scaled(longs, 18),
            total_short_size: scaled(shorts, 18),
            last_funding_time: 7_200,
            funding_interval: 3_600,
            ..RawMarket::default()
        };
        build_snapshot(
            &raw,
            Price::new(dec!(3000)),
            IndexSource::Live,
            &DecimalConvention::WAD_V2,
        )
        .unwrap()
    }

    #[test]
    fn test_imbalance_model() {
        let estimator = FundingRateEstimator::default();
        // (30 - 10) / 40 * 0.0001
        assert_eq!(
            estimator.predict_funding_rate(&snapshot(30, 10, 50)),
            dec!(0.00005)
        );
        assert_eq!(
            estimator.predict_funding_rate(&snapshot(10, 30, 50)),
            dec!(-0.00005)
        );
    }

    #[test]
    fn test_no_open_interest_is_zero() {
        let estimator = FundingRateEstimator::default();
        assert_eq!(estimator.predict_funding_rate(&snapshot(0, 0, 50)), Decimal::ZERO);
    }

    #[test]
    fn test_premium_model() {
        let estimator = FundingRateEstimator::new(FundingModel::Premium {
            fair_value_factor: dec!(0.20),
            damping: Decimal::ONE,
        });
        // mark 0.2, fair 0.5 * 0.2 = 0.1 => (0.2 - 0.1) / 0.2
        assert_eq!(estimator.predict_funding_rate(&snapshot(0, 0, 50)), dec!(0.5));
    }

    #[test]
    fn test_premium_out_of_range_is_zero() {
        let estimator = FundingRateEstimator::new(FundingModel::Premium {
            fair_value_factor: Decimal::MAX,
            damping: Decimal::ONE,
        });
        // volatility 2.0 * MAX does not fit
        assert_eq!(estimator.predict_funding_rate(&snapshot(0, 0, 200)), Decimal::ZERO);
    }

    #[test]
    fn test_funding_info() {
        let info = FundingRateEstimator::default().funding_info(&snapshot(30, 10, 50));
        assert_eq!(info.imbalance_ratio, dec!(0.5));
        assert_eq!(info.next_funding_time.timestamp(), 10_800);
        assert_eq!(info.funding_interval_secs, 3_600);
    }

    #[test]
    fn test_model_from_config() {
        let model: FundingModel = serde_json::from_str(r#"{"model":"premium"}"#).unwrap();
        assert_eq!(
            model,
            FundingModel::Premium {
                fair_value_factor: dec!(0.20),
                damping: Decimal::ONE
            }
        );

        let model: FundingModel =
            serde_json::from_str(r#"{"model":"imbalance","k":"0.0002"}"#).unwrap();
        assert_eq!(model, FundingModel::Imbalance { k: dec!(0.0002) });
    }
}
