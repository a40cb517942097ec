//! Read-through access to the cache.
//!
//! A read is served from the cache while the entry is fresh. Otherwise it
//! takes the scope's fetch gate, re-checks the cache (a concurrent caller
//! may have refreshed it meanwhile) and fetches with retry. Overlapping
//! callers therefore share one in-flight fetch per scope. A fetch that
//! overlaps an invalidation is stored invalidated, so a caller queued behind
//! it refetches instead of accepting the overtaken result.

use crate::cache::{FetchTicket, SnapshotCache};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::invalidation::RefreshScope;
use crate::retry::RetryPolicy;
use alloy::primitives::Address;
use dashmap::DashMap;
use hvx_core::{AccountView, MarketSnapshot, PositionView};
use hvx_market::{MarketSnapshotService, PositionValuationService};
use hvx_telemetry::Metrics;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex as TokioMutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Cache-backed reader bound to one gateway generation.
pub struct CachedReader {
    cache: Arc<SnapshotCache>,
    market: Arc<MarketSnapshotService>,
    positions: Arc<PositionValuationService>,
    generation: u64,
    retry: RetryPolicy,
    market_ttl: Duration,
    account_ttl: Duration,
    market_gate: TokioMutex<()>,
    account_gates: DashMap<Address, Arc<TokioMutex<()>>>,
    cancel: CancellationToken,
}

impl CachedReader {
    pub fn new(
        cache: Arc<SnapshotCache>,
        market: Arc<MarketSnapshotService>,
        positions: Arc<PositionValuationService>,
        generation: u64,
        retry: RetryPolicy,
        config: &SyncConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            cache,
            market,
            positions,
            generation,
            retry,
            market_ttl: config.market_ttl(),
            account_ttl: config.account_ttl(),
            market_gate: TokioMutex::new(()),
            account_gates: DashMap::new(),
            cancel,
        }
    }

    #[inline]
    pub fn cache(&self) -> &Arc<SnapshotCache> {
        &self.cache
    }

    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    // =========================================================================
    // Market
    // =========================================================================

    /// Market snapshot, refetched only when the cached one is stale or invalidated.
    pub async fn snapshot(&self) -> SyncResult<Arc<MarketSnapshot>> {
        if let Some(entry) = self.cache.market() {
            if entry.is_fresh(self.market_ttl) {
                return Ok(entry.value);
            }
        }

        let _gate = self.market_gate.lock().await;
        if let Some(entry) = self.cache.market() {
            if entry.is_fresh(self.market_ttl) {
                return Ok(entry.value);
            }
        }
        self.fetch_market().await
    }

    /// Refetch the snapshot unless another caller already did since this call started.
    pub async fn refresh_market(&self) -> SyncResult<Arc<MarketSnapshot>> {
        let requested = Instant::now();
        let _gate = self.market_gate.lock().await;
        if let Some(entry) = self.cache.market() {
            if entry.refreshed_since(requested) {
                return Ok(entry.value);
            }
        }
        self.fetch_market().await
    }

    async fn fetch_market(&self) -> SyncResult<Arc<MarketSnapshot>> {
        let ticket = self.ticket(self.cache.market_ticket())?;
        let started = Instant::now();
        let result = self
            .retry
            .run("market", &self.cancel, || self.market.get_snapshot())
            .await;
        Metrics::refresh_latency("market", started.elapsed().as_secs_f64() * 1_000.0);

        match result {
            Ok(snapshot) => {
                let value = Arc::new(snapshot.clone());
                if !self.cache.store_market(snapshot, ticket) {
                    Metrics::refresh("market", "superseded");
                    return Err(self.superseded());
                }
                Metrics::refresh("market", "ok");
                Ok(value)
            }
            Err(e) => Err(self.fail(RefreshScope::Market, e)),
        }
    }

    // =========================================================================
    // Accounts
    // =========================================================================

    /// Account view of `address`, refetched only when stale or invalidated.
    pub async fn account(&self, address: Address) -> SyncResult<Arc<AccountView>> {
        if let Some(entry) = self.cache.account(&address) {
            if entry.is_fresh(self.account_ttl) {
                return Ok(entry.value);
            }
        }

        let gate = self.account_gate(address);
        let _gate = gate.lock().await;
        if let Some(entry) = self.cache.account(&address) {
            if entry.is_fresh(self.account_ttl) {
                return Ok(entry.value);
            }
        }
        self.fetch_account(address).await
    }

    /// Refetch the account view unless another caller already did since this call started.
    pub async fn refresh_account(&self, address: Address) -> SyncResult<Arc<AccountView>> {
        let requested = Instant::now();
        let gate = self.account_gate(address);
        let _gate = gate.lock().await;
        if let Some(entry) = self.cache.account(&address) {
            if entry.refreshed_since(requested) {
                return Ok(entry.value);
            }
        }
        self.fetch_account(address).await
    }

    /// Position of `address`, through the account view.
    pub async fn position(&self, address: Address) -> SyncResult<Option<PositionView>> {
        Ok(self.account(address).await?.position.clone())
    }

    fn account_gate(&self, address: Address) -> Arc<TokioMutex<()>> {
        Arc::clone(self.account_gates.entry(address).or_default().value())
    }

    async fn fetch_account(&self, address: Address) -> SyncResult<Arc<AccountView>> {
        let ticket = self.ticket(self.cache.account_ticket(&address))?;
        let started = Instant::now();
        let result = self
            .retry
            .run("account", &self.cancel, || self.positions.get_account(address))
            .await;
        Metrics::refresh_latency("account", started.elapsed().as_secs_f64() * 1_000.0);

        match result {
            Ok(view) => {
                let value = Arc::new(view.clone());
                if !self.cache.store_account(view, ticket) {
                    Metrics::refresh("account", "superseded");
                    return Err(self.superseded());
                }
                Metrics::refresh("account", "ok");
                debug!(%address, "Account refreshed");
                Ok(value)
            }
            Err(e) => Err(self.fail(RefreshScope::Account(address), e)),
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Tickets from a newer binding belong to another reader.
    fn ticket(&self, ticket: FetchTicket) -> SyncResult<FetchTicket> {
        if ticket.generation != self.generation {
            return Err(self.superseded());
        }
        Ok(ticket)
    }

    fn superseded(&self) -> SyncError {
        SyncError::Superseded {
            generation: self.generation,
            current: self.cache.generation(),
        }
    }

    fn fail(&self, scope: RefreshScope, err: SyncError) -> SyncError {
        if matches!(err, SyncError::Cancelled) {
            return err;
        }
        warn!(%scope, error = %err, category = %err.category(), "Refresh failed, keeping last value");
        Metrics::refresh(scope.label(), "error");
        self.cache
            .record_failure(scope, err.category(), err.to_string());
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::I256;
    use hvx_chain::mock::scaled;
    use hvx_chain::{ChainGuard, MockChain, RawPosition};
    use hvx_core::{DecimalConvention, ErrorCategory, Price};
    use hvx_market::FixedIndexFeed;
    use rust_decimal_macros::dec;

    fn reader(chain: Arc<MockChain>, cache: Arc<SnapshotCache>, generation: u64) -> CachedReader {
        let market = Arc::new(MarketSnapshotService::new(
            chain.clone(),
            ChainGuard::new(998),
            Arc::new(FixedIndexFeed::new(Price::new(dec!(3000)))),
            DecimalConvention::WAD_V2,
            Price::new(dec!(3000)),
        ));
        let positions = Arc::new(PositionValuationService::new(
            chain,
            ChainGuard::new(998),
            DecimalConvention::WAD_V2,
        ));
        CachedReader::new(
            cache,
            market,
            positions,
            generation,
            RetryPolicy::none(),
            &SyncConfig::default(),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_fresh_snapshot_is_served_from_cache() {
        let chain = Arc::new(MockChain::new(998));
        let reader = reader(chain.clone(), Arc::new(SnapshotCache::new()), 1);

        let first = reader.snapshot().await.unwrap();
        let second = reader.snapshot().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(chain.read_count("base_reserve"), 1);
    }

    #[tokio::test]
    async fn test_invalidated_snapshot_is_refetched() {
        let chain = Arc::new(MockChain::new(998));
        let cache = Arc::new(SnapshotCache::new());
        let reader = reader(chain.clone(), cache.clone(), 1);

        reader.snapshot().await.unwrap();
        chain.set_reserves(scaled(400_000, 18), scaled(100_000, 18));
        cache.invalidate(RefreshScope::Market);

        let snapshot = reader.snapshot().await.unwrap();
        assert_eq!(snapshot.mark_price, Price::new(dec!(0.25)));
        assert_eq!(chain.read_count("base_reserve"), 2);
    }

    #[tokio::test]
    async fn test_concurrent_readers_share_one_fetch() {
        let chain = Arc::new(MockChain::new(998));
        chain.set_read_delay(Some(Duration::from_millis(20)));
        let reader = reader(chain.clone(), Arc::new(SnapshotCache::new()), 1);

        let (a, b) = tokio::join!(reader.snapshot(), reader.snapshot());
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(chain.read_count("base_reserve"), 1);
    }

    #[tokio::test]
    async fn test_failure_keeps_last_value_and_flags_stale() {
        let chain = Arc::new(MockChain::new(998));
        let cache = Arc::new(SnapshotCache::new());
        let reader = reader(chain.clone(), cache.clone(), 1);

        reader.snapshot().await.unwrap();
        chain.fail_reads("quote_reserve");

        let err = reader.refresh_market().await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::ReadBatchFailure);

        let status = cache.market_status();
        assert!(status.stale);
        assert_eq!(status.last_category, Some(ErrorCategory::ReadBatchFailure));
        assert!(cache.market().is_some());
    }

    #[tokio::test]
    async fn test_superseded_fetch_is_discarded() {
        let chain = Arc::new(MockChain::new(998));
        let cache = Arc::new(SnapshotCache::new());
        let stale_reader = reader(chain, cache.clone(), 1);
        cache.bind(2);

        let err = stale_reader.snapshot().await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::Superseded {
                generation: 1,
                current: 2
            }
        ));
        assert!(cache.market().is_none());
    }

    #[tokio::test]
    async fn test_position_through_account_view() {
        let chain = Arc::new(MockChain::new(998));
        let trader = Address::repeat_byte(0x07);
        chain.set_position(
            trader,
            RawPosition {
                size: I256::try_from(scaled(100, 18)).unwrap(),
                margin: scaled(50, 18),
                mark_price: scaled(2, 17),
                leverage: scaled(4, 17),
                notional_value: scaled(20, 18),
                ..RawPosition::default()
            },
        );
        let cache = Arc::new(SnapshotCache::new());
        let reader = reader(chain.clone(), cache.clone(), 1);

        let position = reader.position(trader).await.unwrap().unwrap();
        assert_eq!(position.leverage, dec!(0.4));

        // closed on chain, but the cached view is still fresh
        chain.set_position(trader, RawPosition::default());
        assert!(reader.position(trader).await.unwrap().is_some());

        cache.invalidate(RefreshScope::Account(trader));
        assert!(reader.position(trader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_queued_reader_refetches_after_overtaken_fetch() {
        let chain = Arc::new(MockChain::new(998));
        let trader = Address::repeat_byte(0x08);
        chain.set_position(
            trader,
            RawPosition {
                size: I256::try_from(scaled(100, 18)).unwrap(),
                margin: scaled(50, 18),
                ..RawPosition::default()
            },
        );
        chain.set_read_delay(Some(Duration::from_millis(50)));
        let cache = Arc::new(SnapshotCache::new());
        let reader = reader(chain.clone(), cache.clone(), 1);

        // chain id check takes one delay, the position batch is read after it
        let closer = async {
            tokio::time::sleep(Duration::from_millis(75)).await;
            chain.set_position(trader, RawPosition::default());
            cache.invalidate(RefreshScope::Account(trader));
            // queued behind the in-flight fetch
            reader.position(trader).await
        };
        let (first, queued) = tokio::join!(reader.position(trader), closer);

        assert!(first.unwrap().is_some());
        assert!(queued.unwrap().is_none());
        assert!(!cache.account(&trader).unwrap().is_invalidated());
    }
}
