//! Polling scheduler.
//!
//! Runs the event bus next to a poll loop. The loop refreshes the market and
//! the active account on their intervals and serves queued refresh requests
//! as they arrive, coalescing whatever piled up while a refresh was running.

use crate::bus::EventReconciliationBus;
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::invalidation::{RefreshRequest, RefreshScope};
use crate::reader::CachedReader;
use alloy::primitives::Address;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Keeps the cache warm for one binding generation.
pub struct SyncScheduler {
    reader: Arc<CachedReader>,
    bus: Arc<EventReconciliationBus>,
    requests: mpsc::UnboundedReceiver<RefreshRequest>,
    config: SyncConfig,
    active: Option<Address>,
}

impl SyncScheduler {
    pub fn new(
        reader: Arc<CachedReader>,
        bus: Arc<EventReconciliationBus>,
        requests: mpsc::UnboundedReceiver<RefreshRequest>,
        config: SyncConfig,
        active: Option<Address>,
    ) -> Self {
        Self {
            reader,
            bus,
            requests,
            config,
            active,
        }
    }

    /// Run until `cancel` fires or the binding is superseded.
    pub async fn run(mut self, cancel: CancellationToken) {
        let scope = cancel.child_token();
        let bus = Arc::clone(&self.bus);
        tokio::join!(bus.run(scope.clone()), self.poll(scope));
        info!(generation = self.reader.generation(), "Sync scheduler stopped");
    }

    async fn poll(&mut self, cancel: CancellationToken) {
        let mut market_tick = interval(self.config.market_poll_interval());
        market_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut account_tick = interval(self.config.account_poll_interval());
        account_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // First ticks complete immediately.
        market_tick.tick().await;
        account_tick.tick().await;
        if !self.refresh(RefreshScope::All).await {
            cancel.cancel();
            return;
        }

        loop {
            let proceed = tokio::select! {
                _ = market_tick.tick() => self.refresh(RefreshScope::Market).await,
                _ = account_tick.tick() => match self.active {
                    Some(address) => self.refresh(RefreshScope::Account(address)).await,
                    None => true,
                },
                Some(request) = self.requests.recv() => self.serve(request).await,
                () = cancel.cancelled() => return,
            };

            if !proceed {
                // Superseded: a newer scheduler owns the cache now.
                cancel.cancel();
                return;
            }
        }
    }

    /// Serve `first` and every request already queued behind it, once each.
    async fn serve(&mut self, first: RefreshRequest) -> bool {
        let mut scopes = BTreeSet::new();
        let mut all = first.scope == RefreshScope::All;
        insert_scope(&mut scopes, first.scope);
        while let Ok(request) = self.requests.try_recv() {
            all |= request.scope == RefreshScope::All;
            insert_scope(&mut scopes, request.scope);
        }

        if all {
            return self.refresh(RefreshScope::All).await;
        }
        debug!(count = scopes.len(), "Serving refresh requests");
        for key in scopes {
            let scope = match key {
                None => RefreshScope::Market,
                Some(address) => RefreshScope::Account(address),
            };
            if !self.refresh(scope).await {
                return false;
            }
        }
        true
    }

    /// Refresh `scope`. Returns `false` once the binding is superseded.
    async fn refresh(&self, scope: RefreshScope) -> bool {
        match scope {
            RefreshScope::All => self.refresh_everything().await,
            single => self.refresh_one(single).await,
        }
    }

    async fn refresh_everything(&self) -> bool {
        let mut accounts: BTreeSet<Address> =
            self.reader.cache().cached_accounts().into_iter().collect();
        accounts.extend(self.active);

        if !self.refresh_one(RefreshScope::Market).await {
            return false;
        }
        for address in accounts {
            if !self.refresh_one(RefreshScope::Account(address)).await {
                return false;
            }
        }
        if self.reader.cache().market_status().stale {
            warn!("Market still stale after full refresh");
        }
        true
    }

    async fn refresh_one(&self, scope: RefreshScope) -> bool {
        let outcome = match scope {
            RefreshScope::Account(address) => {
                self.reader.refresh_account(address).await.map(|_| ())
            }
            RefreshScope::Market | RefreshScope::All => {
                self.reader.refresh_market().await.map(|_| ())
            }
        };

        match outcome {
            Ok(()) => true,
            Err(SyncError::Superseded { generation, current }) => {
                info!(generation, current, "Binding superseded, stopping poll loop");
                false
            }
            // Failures are already recorded on the cache.
            Err(e) => {
                debug!(%scope, error = %e, "Scheduled refresh failed");
                true
            }
        }
    }
}

/// `None` keys the market so it sorts ahead of accounts.
fn insert_scope(scopes: &mut BTreeSet<Option<Address>>, scope: RefreshScope) {
    match scope {
        RefreshScope::Market => {
            scopes.insert(None);
        }
        RefreshScope::Account(address) => {
            scopes.insert(Some(address));
        }
        RefreshScope::All => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SnapshotCache;
    use crate::invalidation::{InvalidationTrigger, Invalidator};
    use crate::retry::RetryPolicy;
    use hvx_chain::mock::scaled;
    use hvx_chain::{ChainGuard, MockChain, MOCK_ACCOUNT};
    use hvx_core::{DecimalConvention, Price};
    use hvx_market::{FixedIndexFeed, MarketSnapshotService, PositionValuationService};
    use rust_decimal_macros::dec;
    use std::time::Duration;

    struct Harness {
        chain: Arc<MockChain>,
        cache: Arc<SnapshotCache>,
        invalidator: Invalidator,
        scheduler: SyncScheduler,
    }

    fn harness(generation: u64) -> Harness {
        let chain = Arc::new(MockChain::new(998));
        let cache = Arc::new(SnapshotCache::new());
        let market = Arc::new(MarketSnapshotService::new(
            chain.clone(),
            ChainGuard::new(998),
            Arc::new(FixedIndexFeed::new(Price::new(dec!(3000)))),
            DecimalConvention::WAD_V2,
            Price::new(dec!(3000)),
        ));
        let positions = Arc::new(PositionValuationService::new(
            chain.clone(),
            ChainGuard::new(998),
            DecimalConvention::WAD_V2,
        ));
        let config = SyncConfig::default();
        let reader = Arc::new(CachedReader::new(
            cache.clone(),
            market,
            positions,
            generation,
            RetryPolicy::none(),
            &config,
            CancellationToken::new(),
        ));
        let (invalidator, requests) = Invalidator::new(cache.clone());
        let bus = Arc::new(EventReconciliationBus::new(
            chain.clone(),
            invalidator.clone(),
            RetryPolicy::none(),
        ));
        let scheduler = SyncScheduler::new(reader, bus, requests, config, Some(MOCK_ACCOUNT));
        Harness {
            chain,
            cache,
            invalidator,
            scheduler,
        }
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_initial_refresh_warms_cache() {
        let h = harness(1);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(h.scheduler.run(cancel.clone()));

        let cache = h.cache.clone();
        eventually(|| cache.market().is_some() && cache.account(&MOCK_ACCOUNT).is_some()).await;

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_invalidation_triggers_refresh_before_poll() {
        let h = harness(1);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(h.scheduler.run(cancel.clone()));

        let cache = h.cache.clone();
        eventually(|| cache.market().is_some()).await;

        h.chain.set_reserves(scaled(400, 18), scaled(100, 18));
        h.invalidator
            .invalidate(RefreshScope::Market, InvalidationTrigger::Manual);

        eventually(|| {
            cache
                .market()
                .is_some_and(|e| e.value.mark_price == Price::new(dec!(0.25)))
        })
        .await;

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_superseded_scheduler_stops() {
        let h = harness(1);
        h.cache.bind(2);

        tokio::time::timeout(
            Duration::from_secs(1),
            h.scheduler.run(CancellationToken::new()),
        )
        .await
        .unwrap();
        assert!(h.cache.market().is_none());
    }

    #[test]
    fn test_requests_coalesce_market_first() {
        let mut scopes = BTreeSet::new();
        let a = Address::repeat_byte(0x0a);
        insert_scope(&mut scopes, RefreshScope::Account(a));
        insert_scope(&mut scopes, RefreshScope::Market);
        insert_scope(&mut scopes, RefreshScope::Account(a));

        assert_eq!(scopes.into_iter().collect::<Vec<_>>(), vec![None, Some(a)]);
    }
}
