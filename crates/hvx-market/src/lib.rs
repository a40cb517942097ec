//! Market reads and valuation for the HyperVIX client.
//!
//! - `MarketSnapshotService`: One consistent market snapshot per refresh
//! - `PositionValuationService`: Position and account views per address
//! - `FundingRateEstimator`: Predicted funding rate
//! - `TradeHistoryService`: Recent fills and the last settled funding rate
//! - `IndexPriceFeed`: Off-chain index price with fallback

pub mod error;
pub mod funding;
pub mod history;
pub mod index_feed;
pub mod position;
pub mod snapshot;

pub use error::{MarketError, MarketResult};
pub use funding::{FundingInfo, FundingModel, FundingRateEstimator};
pub use history::{chart, ChartPoint, HistoryConfig, TradeHistoryService, TradePoint, TradeSide};
pub use index_feed::{
    FixedIndexFeed, HyperliquidMidsFeed, IndexPriceFeed, DEFAULT_FALLBACK_INDEX,
    DEFAULT_FEED_TIMEOUT, DEFAULT_INFO_URL,
};
pub use position::{value_position, PositionValuationService, DEFAULT_SCALE_TOLERANCE};
pub use snapshot::{build_snapshot, MarketSnapshotService, RawMarket};
