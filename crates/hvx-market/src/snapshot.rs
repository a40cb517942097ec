//! Market snapshot assembly.
//!
//! One refresh is one concurrent fan-out of thirteen contract reads plus the
//! index feed. Any contract read failing aborts the snapshot; the feed never
//! does.

use crate::error::{MarketError, MarketResult};
use crate::index_feed::{resolve_index_price, IndexPriceFeed};
use alloy::primitives::{I256, U256};
use hvx_chain::{ChainGuard, ReadOnlyMarket};
use hvx_core::fixed::{i256_to_decimal, u256_to_decimal};
use hvx_core::types::unix_to_utc;
use hvx_core::{
    valuation, DecimalConvention, IndexSource, Liquidity, MarketSnapshot, OpenInterest, Price,
    RiskParams, Size,
};
use hvx_telemetry::Metrics;
use rust_decimal::prelude::ToPrimitive;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Raw contract values of one refresh, still fixed-point.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawMarket {
    pub volatility: U256,
    pub base_reserve: U256,
    pub quote_reserve: U256,
    pub oracle_last_update: u64,
    pub cumulative_funding_rate: I256,
    pub last_funding_time: u64,
    pub funding_interval: u64,
    pub total_long_size: U256,
    pub total_short_size: U256,
    pub max_leverage: U256,
    pub maintenance_margin_ratio: U256,
    pub liquidation_fee: U256,
    pub trading_fee: U256,
}

/// Decode and derive a snapshot from raw reads.
///
/// # Errors
/// `DivisionByZero` when the base reserve is zero, `Overflow` when a value
/// does not fit the convention.
pub fn build_snapshot(
    raw: &RawMarket,
    index_price: Price,
    index_source: IndexSource,
    convention: &DecimalConvention,
) -> MarketResult<MarketSnapshot> {
    let mark_price = valuation::mark_price(raw.base_reserve, raw.quote_reserve, convention)?;

    let size = |v: U256| -> MarketResult<Size> {
        Ok(Size::new(u256_to_decimal(v, convention.size_decimals)?))
    };
    let ratio = |v: U256| u256_to_decimal(v, convention.ratio_decimals);

    let last_funding_time = unix_to_utc(raw.last_funding_time);
    let next_funding_time =
        unix_to_utc(raw.last_funding_time.saturating_add(raw.funding_interval));

    Ok(MarketSnapshot {
        volatility: u256_to_decimal(raw.volatility, convention.volatility_decimals)?,
        mark_price,
        index_price,
        index_source,
        cumulative_funding_rate: i256_to_decimal(
            raw.cumulative_funding_rate,
            convention.ratio_decimals,
        )?,
        last_funding_time,
        funding_interval_secs: raw.funding_interval,
        next_funding_time,
        last_update: unix_to_utc(raw.oracle_last_update),
        liquidity: Liquidity {
            base: size(raw.base_reserve)?,
            quote: u256_to_decimal(raw.quote_reserve, convention.collateral_decimals)?,
        },
        open_interest: OpenInterest::from_sides(
            size(raw.total_long_size)?,
            size(raw.total_short_size)?,
        ),
        risk_params: RiskParams {
            max_leverage: u256_to_decimal(raw.max_leverage, convention.leverage_decimals)?,
            maintenance_margin_ratio: ratio(raw.maintenance_margin_ratio)?,
            liquidation_fee_rate: ratio(raw.liquidation_fee)?,
            trading_fee_rate: ratio(raw.trading_fee)?,
        },
    })
}

/// Produces `MarketSnapshot`s from the chain and the index feed.
pub struct MarketSnapshotService {
    reader: Arc<dyn ReadOnlyMarket>,
    guard: ChainGuard,
    feed: Arc<dyn IndexPriceFeed>,
    convention: DecimalConvention,
    fallback_index: Price,
}

impl MarketSnapshotService {
    pub fn new(
        reader: Arc<dyn ReadOnlyMarket>,
        guard: ChainGuard,
        feed: Arc<dyn IndexPriceFeed>,
        convention: DecimalConvention,
        fallback_index: Price,
    ) -> Self {
        Self {
            reader,
            guard,
            feed,
            convention,
            fallback_index,
        }
    }

    #[inline]
    pub fn convention(&self) -> &DecimalConvention {
        &self.convention
    }

    /// Read the whole market once.
    pub async fn get_snapshot(&self) -> MarketResult<MarketSnapshot> {
        let started = Instant::now();
        self.guard.assert_network(self.reader.as_ref()).await?;

        let (reads, (index_price, index_source)) = tokio::join!(
            self.read_raw(),
            resolve_index_price(self.feed.as_ref(), self.fallback_index)
        );
        let raw = reads.inspect_err(|e| {
            warn!(error = %e, "Market read batch failed");
            Metrics::read_failure("market", e.category().as_str());
        })?;

        let snapshot = build_snapshot(&raw, index_price, index_source, &self.convention)?;

        Metrics::market(
            snapshot.mark_price.inner().to_f64().unwrap_or_default(),
            snapshot.index_price.inner().to_f64().unwrap_or_default(),
            snapshot.volatility.to_f64().unwrap_or_default(),
        );
        debug!(
            mark = %snapshot.mark_price,
            index = %snapshot.index_price,
            volatility = %snapshot.volatility,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Market snapshot built"
        );
        Ok(snapshot)
    }

    async fn read_raw(&self) -> MarketResult<RawMarket> {
        let r = self.reader.as_ref();
        let (
            volatility,
            base_reserve,
            quote_reserve,
            oracle_last_update,
            cumulative_funding_rate,
            last_funding_time,
            funding_interval,
            total_long_size,
            total_short_size,
            max_leverage,
            maintenance_margin_ratio,
            liquidation_fee,
            trading_fee,
        ) = tokio::try_join!(
            r.annualized_volatility(),
            r.base_reserve(),
            r.quote_reserve(),
            r.oracle_last_update(),
            r.cumulative_funding_rate(),
            r.last_funding_time(),
            r.funding_interval(),
            r.total_long_size(),
            r.total_short_size(),
            r.max_leverage(),
            r.maintenance_margin_ratio(),
            r.liquidation_fee(),
            r.trading_fee(),
        )
        .map_err(MarketError::ReadBatch)?;

        Ok(RawMarket {
            volatility,
            base_reserve,
            quote_reserve,
            oracle_last_update,
            cumulative_funding_rate,
            last_funding_time,
            funding_interval,
            total_long_size,
            total_short_size,
            max_leverage,
            maintenance_margin_ratio,
            liquidation_fee,
            trading_fee,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index_feed::{FixedIndexFeed, DEFAULT_FALLBACK_INDEX};
    use hvx_chain::mock::scaled;
    use hvx_chain::{ChainError, MockChain};
    use hvx_core::{CoreError, ErrorCategory};
    use rust_decimal_macros::dec;

    fn service(chain: Arc<MockChain>, feed: FixedIndexFeed) -> MarketSnapshotService {
        MarketSnapshotService::new(
            chain,
            ChainGuard::new(998),
            Arc::new(feed),
            DecimalConvention::WAD_V2,
            Price::new(DEFAULT_FALLBACK_INDEX),
        )
    }

    #[test]
    fn test_build_snapshot_derives_fields() {
        let raw = RawMarket {
            volatility: scaled(65, 16),
            base_reserve: scaled(500_000, 18),
            quote_reserve: scaled(100_000, 18),
            last_funding_time: 1_000,
            funding_interval: 3_600,
            total_long_size: scaled(30, 18),
            total_short_size: scaled(10, 18),
            max_leverage: scaled(10, 18),
            ..RawMarket::default()
        };

        let snapshot = build_snapshot(
            &raw,
            Price::new(dec!(3000)),
            IndexSource::Live,
            &DecimalConvention::WAD_V2,
        )
        .unwrap();

        assert_eq!(snapshot.mark_price, Price::new(dec!(0.2)));
        assert_eq!(snapshot.volatility, dec!(0.65));
        assert_eq!(snapshot.next_funding_time.timestamp(), 4_600);
        assert_eq!(snapshot.open_interest.net, Size::new(dec!(20)));
        assert_eq!(snapshot.open_interest.total, Size::new(dec!(40)));
        assert_eq!(snapshot.risk_params.max_leverage, dec!(10));
        assert_eq!(snapshot.liquidity.quote, dec!(100000));
    }

    #[test]
    fn test_build_snapshot_with_six_decimal_collateral() {
        let raw = RawMarket {
            base_reserve: scaled(500_000, 18),
            quote_reserve: scaled(100_000, 6),
            ..RawMarket::default()
        };
        let snapshot = build_snapshot(
            &raw,
            Price::new(dec!(3000)),
            IndexSource::Live,
            &DecimalConvention::USDC6_V1,
        )
        .unwrap();

        assert_eq!(snapshot.mark_price, Price::new(dec!(0.2)));
        assert_eq!(snapshot.liquidity.quote, dec!(100000));
    }

    #[test]
    fn test_empty_base_reserve_is_division_by_zero() {
        let raw = RawMarket::default();
        let err = build_snapshot(
            &raw,
            Price::ONE,
            IndexSource::Live,
            &DecimalConvention::WAD_V2,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            MarketError::Valuation(CoreError::DivisionByZero(_))
        ));
    }

    #[tokio::test]
    async fn test_snapshot_from_chain() {
        let chain = Arc::new(MockChain::new(998));
        chain.set_reserves(scaled(500_000, 18), scaled(100_000, 18));
        chain.set_open_interest(scaled(30, 18), scaled(10, 18));

        let snapshot = service(chain, FixedIndexFeed::new(Price::new(dec!(3150))))
            .get_snapshot()
            .await
            .unwrap();

        assert_eq!(snapshot.mark_price, Price::new(dec!(0.2)));
        assert_eq!(snapshot.index_price, Price::new(dec!(3150)));
        assert_eq!(snapshot.index_source, IndexSource::Live);
        assert_eq!(snapshot.volatility, dec!(0.2));
    }

    #[tokio::test]
    async fn test_unchanged_chain_gives_equal_snapshots() {
        let chain = Arc::new(MockChain::new(998));
        let service = service(chain, FixedIndexFeed::new(Price::new(dec!(3000))));

        let first = service.get_snapshot().await.unwrap();
        let second = service.get_snapshot().await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_feed_failure_uses_fallback() {
        let chain = Arc::new(MockChain::new(998));
        chain.set_reserves(scaled(500_000, 18), scaled(100_000, 18));

        let snapshot = service(chain, FixedIndexFeed::failing())
            .get_snapshot()
            .await
            .unwrap();

        assert_eq!(snapshot.index_price, Price::new(dec!(3000)));
        assert_eq!(snapshot.index_source, IndexSource::Fallback);
        assert_eq!(snapshot.mark_price, Price::new(dec!(0.2)));
        assert_eq!(snapshot.risk_params.max_leverage, dec!(10));
    }

    #[tokio::test]
    async fn test_one_failed_read_aborts_snapshot() {
        let chain = Arc::new(MockChain::new(998));
        chain.fail_reads("trading_fee");

        let err = service(chain, FixedIndexFeed::new(Price::ONE))
            .get_snapshot()
            .await
            .unwrap_err();

        assert!(matches!(err, MarketError::ReadBatch(ChainError::Transport(_))));
        assert_eq!(err.category(), ErrorCategory::ReadBatchFailure);
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_wrong_network_reads_nothing() {
        let chain = Arc::new(MockChain::new(1));
        let err = service(chain.clone(), FixedIndexFeed::new(Price::ONE))
            .get_snapshot()
            .await
            .unwrap_err();

        assert_eq!(err.category(), ErrorCategory::WrongNetwork);
        assert_eq!(chain.read_count("base_reserve"), 0);
    }
}
