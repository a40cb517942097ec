//! Trade history and settled funding from contract logs.
//!
//! The testnet RPC caps log queries at roughly a thousand blocks, so every
//! scan walks the chain in fixed windows. A failing window is skipped; the
//! scan keeps whatever the other windows returned.

use crate::error::{MarketError, MarketResult};
use alloy::primitives::Address;
use chrono::{DateTime, Utc};
use hvx_chain::{ChainEvent, LoggedEvent, ReadOnlyMarket};
use hvx_core::fixed::{i256_to_decimal, u256_to_decimal};
use hvx_core::types::unix_to_utc;
use hvx_core::{DecimalConvention, Price};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

fn default_max_blocks() -> u64 {
    5_000
}

fn default_chunk_size() -> u64 {
    1_000
}

fn default_max_trades() -> usize {
    100
}

fn default_funding_window() -> u64 {
    999
}

fn default_funding_max_windows() -> u32 {
    10
}

fn default_chart_bucket_secs() -> i64 {
    300
}

/// Log scan limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// How far back trades are scanned.
    #[serde(default = "default_max_blocks")]
    pub max_blocks: u64,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
    #[serde(default = "default_max_trades")]
    pub max_trades: usize,
    /// Window of the backwards funding search.
    #[serde(default = "default_funding_window")]
    pub funding_window: u64,
    #[serde(default = "default_funding_max_windows")]
    pub funding_max_windows: u32,
    #[serde(default = "default_chart_bucket_secs")]
    pub chart_bucket_secs: i64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_blocks: default_max_blocks(),
            chunk_size: default_chunk_size(),
            max_trades: default_max_trades(),
            funding_window: default_funding_window(),
            funding_max_windows: default_funding_max_windows(),
            chart_bucket_secs: default_chart_bucket_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

/// One `PositionOpened` fill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TradePoint {
    pub timestamp: DateTime<Utc>,
    pub block_number: Option<u64>,
    pub trader: Address,
    pub side: TradeSide,
    /// Absolute size.
    pub size: Decimal,
    pub price: Price,
}

/// Aggregated fills of one chart bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChartPoint {
    pub bucket_start: DateTime<Utc>,
    /// Price of the last fill in the bucket.
    pub price: Price,
    pub volume: Decimal,
}

/// Decode a `PositionOpened` log into a trade. Other events yield `None`.
pub fn trade_from_log(
    log: &LoggedEvent,
    convention: &DecimalConvention,
) -> MarketResult<Option<TradePoint>> {
    let ChainEvent::PositionOpened {
        trader,
        size_delta,
        average_price,
        timestamp,
        ..
    } = &log.event
    else {
        return Ok(None);
    };

    let size = i256_to_decimal(*size_delta, convention.size_decimals)?;
    Ok(Some(TradePoint {
        timestamp: unix_to_utc(*timestamp),
        block_number: log.block_number,
        trader: *trader,
        side: if size > Decimal::ZERO {
            TradeSide::Buy
        } else {
            TradeSide::Sell
        },
        size: size.abs(),
        price: Price::new(u256_to_decimal(*average_price, convention.price_decimals)?),
    }))
}

/// Bucket trades (sorted by time) into fixed intervals starting at the first trade.
///
/// Buckets starting after `now` are dropped; empty buckets are skipped.
pub fn chart(trades: &[TradePoint], bucket_secs: i64, now: DateTime<Utc>) -> Vec<ChartPoint> {
    let Some(first) = trades.first() else {
        return Vec::new();
    };
    if bucket_secs <= 0 {
        return Vec::new();
    }

    let start = first.timestamp.timestamp();
    let mut buckets: BTreeMap<i64, (Price, Decimal)> = BTreeMap::new();

    for trade in trades {
        let offset = trade.timestamp.timestamp() - start;
        let bucket = start + offset.div_euclid(bucket_secs) * bucket_secs;
        if bucket > now.timestamp() {
            continue;
        }
        let entry = buckets.entry(bucket).or_insert((trade.price, Decimal::ZERO));
        entry.0 = trade.price;
        entry.1 += trade.size;
    }

    buckets
        .into_iter()
        .map(|(bucket, (price, volume))| ChartPoint {
            bucket_start: unix_to_utc(u64::try_from(bucket).unwrap_or_default()),
            price,
            volume,
        })
        .collect()
}

/// Scans contract logs for recent trades and the last settled funding rate.
pub struct TradeHistoryService {
    reader: Arc<dyn ReadOnlyMarket>,
    convention: DecimalConvention,
    config: HistoryConfig,
}

impl TradeHistoryService {
    pub fn new(
        reader: Arc<dyn ReadOnlyMarket>,
        convention: DecimalConvention,
        config: HistoryConfig,
    ) -> Self {
        Self {
            reader,
            convention,
            config,
        }
    }

    #[inline]
    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    /// Most recent fills, oldest first.
    pub async fn recent_trades(&self) -> MarketResult<Vec<TradePoint>> {
        let current = self
            .reader
            .block_number()
            .await
            .map_err(MarketError::ReadBatch)?;
        let chunk = self.config.chunk_size.max(1);
        let mut from = current.saturating_sub(self.config.max_blocks);

        let mut trades = Vec::new();
        while from < current {
            let to = from.saturating_add(chunk - 1).min(current);
            match self.reader.position_opened_logs(from, to).await {
                Ok(logs) => {
                    for log in &logs {
                        if let Some(trade) = trade_from_log(log, &self.convention)? {
                            trades.push(trade);
                        }
                    }
                }
                Err(e) => warn!(from, to, error = %e, "Skipping trade log window"),
            }
            from = to + 1;
        }

        trades.sort_by_key(|t| (t.timestamp, t.block_number));
        let excess = trades.len().saturating_sub(self.config.max_trades);
        trades.drain(..excess);

        debug!(count = trades.len(), current, "Trade history scanned");
        Ok(trades)
    }

    /// Rate of the most recent `FundingSettled`, searching backwards.
    pub async fn last_settled_funding_rate(&self) -> MarketResult<Option<Decimal>> {
        let current = self
            .reader
            .block_number()
            .await
            .map_err(MarketError::ReadBatch)?;
        let window = self.config.funding_window.max(1);

        for i in 0..u64::from(self.config.funding_max_windows) {
            let to = current - window * i;
            let Some(from) = to.checked_sub(window) else {
                break;
            };

            let logs = match self.reader.funding_settled_logs(from, to).await {
                Ok(logs) => logs,
                Err(e) => {
                    warn!(from, to, error = %e, "Skipping funding log window");
                    continue;
                }
            };

            if let Some(ChainEvent::FundingSettled { funding_rate, .. }) =
                logs.last().map(|log| &log.event)
            {
                let rate = i256_to_decimal(*funding_rate, self.convention.ratio_decimals)?;
                debug!(%rate, from, to, "Found settled funding rate");
                return Ok(Some(rate));
            }
        }
        Ok(None)
    }
}
