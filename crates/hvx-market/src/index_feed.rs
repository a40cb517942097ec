//! Off-chain index price of the underlying.
//!
//! The index is advisory: a failing feed never fails a snapshot. The caller
//! substitutes the configured fallback and tags the snapshot with
//! `IndexSource::Fallback`.

use crate::error::{MarketError, MarketResult};
use hvx_chain::BoxFuture;
use hvx_core::{IndexSource, Price};
use hvx_telemetry::Metrics;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

/// Default info endpoint.
pub const DEFAULT_INFO_URL: &str = "https://api.hyperliquid.xyz/info";

/// Default request timeout.
pub const DEFAULT_FEED_TIMEOUT: Duration = Duration::from_secs(5);

/// Index price used when the feed fails.
pub const DEFAULT_FALLBACK_INDEX: Decimal = Decimal::from_parts(3000, 0, 0, false, 0);

/// Symbols tried in order.
const INDEX_SYMBOLS: [&str; 2] = ["ETH", "UETH"];

/// Source of the index price.
pub trait IndexPriceFeed: Send + Sync {
    fn fetch_index_price(&self) -> BoxFuture<'_, MarketResult<Price>>;
}

#[derive(Debug, Serialize)]
struct InfoRequest {
    #[serde(rename = "type")]
    request_type: &'static str,
}

/// `allMids` feed of the Hyperliquid info API.
pub struct HyperliquidMidsFeed {
    client: Client,
    info_url: String,
}

impl HyperliquidMidsFeed {
    pub fn new(info_url: impl Into<String>, timeout: Duration) -> MarketResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MarketError::Feed(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            info_url: info_url.into(),
        })
    }

    async fn fetch(&self) -> MarketResult<Price> {
        let response = self
            .client
            .post(&self.info_url)
            .json(&InfoRequest {
                request_type: "allMids",
            })
            .send()
            .await
            .map_err(|e| MarketError::Feed(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(MarketError::Feed(format!("HTTP {status}")));
        }

        let mids: HashMap<String, serde_json::Value> = response
            .json()
            .await
            .map_err(|e| MarketError::Feed(format!("Failed to parse response: {e}")))?;

        let price = parse_index_price(&mids)?;
        debug!(%price, "Fetched index price");
        Ok(price)
    }
}

impl IndexPriceFeed for HyperliquidMidsFeed {
    fn fetch_index_price(&self) -> BoxFuture<'_, MarketResult<Price>> {
        Box::pin(self.fetch())
    }
}

/// Pick the underlying's mid out of an `allMids` response.
pub fn parse_index_price(mids: &HashMap<String, serde_json::Value>) -> MarketResult<Price> {
    let raw = INDEX_SYMBOLS
        .iter()
        .find_map(|symbol| mids.get(*symbol))
        .ok_or_else(|| MarketError::Feed("No ETH mid in response".to_string()))?;

    let text = raw
        .as_str()
        .ok_or_else(|| MarketError::Feed(format!("Mid is not a string: {raw}")))?;
    let value = Decimal::from_str(text)
        .map_err(|e| MarketError::Feed(format!("Malformed mid {text:?}: {e}")))?;

    if value <= Decimal::ZERO {
        return Err(MarketError::Feed(format!("Non-positive mid: {value}")));
    }
    Ok(Price::new(value))
}

/// Fetch the index, substituting `fallback` on any failure.
pub async fn resolve_index_price(feed: &dyn IndexPriceFeed, fallback: Price) -> (Price, IndexSource) {
    match feed.fetch_index_price().await {
        Ok(price) => (price, IndexSource::Live),
        Err(e) => {
            warn!(error = %e, %fallback, "Index feed failed, using fallback");
            Metrics::index_feed_fallback(e.category().as_str());
            (fallback, IndexSource::Fallback)
        }
    }
}

/// Feed with a fixed answer, for tests and offline runs.
#[derive(Debug, Clone)]
pub struct FixedIndexFeed {
    price: Option<Price>,
}

impl FixedIndexFeed {
    pub fn new(price: Price) -> Self {
        Self { price: Some(price) }
    }

    /// Feed that always fails.
    pub fn failing() -> Self {
        Self { price: None }
    }
}

impl IndexPriceFeed for FixedIndexFeed {
    fn fetch_index_price(&self) -> BoxFuture<'_, MarketResult<Price>> {
        let result = self
            .price
            .ok_or_else(|| MarketError::Feed("feed disabled".to_string()));
        Box::pin(async move { result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn mids(pairs: &[(&str, serde_json::Value)]) -> HashMap<String, serde_json::Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_eth_mid_is_used() {
        let response = mids(&[
            ("BTC", serde_json::json!("65000.5")),
            ("ETH", serde_json::json!("3150.25")),
        ]);
        assert_eq!(
            parse_index_price(&response).unwrap(),
            Price::new(dec!(3150.25))
        );
    }

    #[test]
    fn test_ueth_is_second_choice() {
        let response = mids(&[("UETH", serde_json::json!("3100"))]);
        assert_eq!(parse_index_price(&response).unwrap(), Price::new(dec!(3100)));
    }

    #[test]
    fn test_malformed_mids_are_rejected() {
        assert!(parse_index_price(&mids(&[])).is_err());
        assert!(parse_index_price(&mids(&[("ETH", serde_json::json!("abc"))])).is_err());
        assert!(parse_index_price(&mids(&[("ETH", serde_json::json!("0"))])).is_err());
        assert!(parse_index_price(&mids(&[("ETH", serde_json::json!(3000))])).is_err());
    }

    #[test]
    fn test_default_fallback() {
        assert_eq!(DEFAULT_FALLBACK_INDEX, dec!(3000));
    }

    #[tokio::test]
    async fn test_failing_feed_falls_back() {
        let fallback = Price::new(DEFAULT_FALLBACK_INDEX);
        let (price, source) = resolve_index_price(&FixedIndexFeed::failing(), fallback).await;
        assert_eq!(price, fallback);
        assert_eq!(source, IndexSource::Fallback);

        let live = FixedIndexFeed::new(Price::new(dec!(3200)));
        let (price, source) = resolve_index_price(&live, fallback).await;
        assert_eq!(price, Price::new(dec!(3200)));
        assert_eq!(source, IndexSource::Live);
    }
}
