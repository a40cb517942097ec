//! Snapshot cache.
//!
//! Holds the latest `MarketSnapshot` and one `AccountView` per address.
//! Entries are replaced whole, never patched. Every store carries the
//! binding generation its fetch started under; a store from a superseded
//! generation is dropped.
//!
//! Invalidation marks an entry without removing it: the old value stays
//! readable (with its age) while the refetch runs, and a failed refetch
//! leaves it visible with the sync status flagged stale.
//!
//! Each scope also counts its invalidations. A fetch takes a `FetchTicket`
//! before it reads the chain; if the scope was invalidated while the fetch
//! was in flight, its result is stored already invalidated.

use crate::invalidation::RefreshScope;
use alloy::primitives::Address;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use hvx_core::{AccountView, ErrorCategory, MarketSnapshot};
use hvx_telemetry::Metrics;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, info};

const UPDATE_CHANNEL_CAPACITY: usize = 64;

/// A cached value with its capture metadata.
#[derive(Debug)]
pub struct CacheEntry<T> {
    pub value: Arc<T>,
    /// Wall-clock capture time.
    pub fetched_at: DateTime<Utc>,
    pub generation: u64,
    refreshed_at: Instant,
    invalidated: bool,
}

impl<T> Clone for CacheEntry<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            fetched_at: self.fetched_at,
            generation: self.generation,
            refreshed_at: self.refreshed_at,
            invalidated: self.invalidated,
        }
    }
}

impl<T> CacheEntry<T> {
    fn new(value: T, generation: u64, invalidated: bool) -> Self {
        Self {
            value: Arc::new(value),
            fetched_at: Utc::now(),
            generation,
            refreshed_at: Instant::now(),
            invalidated,
        }
    }

    #[inline]
    pub fn age(&self) -> Duration {
        self.refreshed_at.elapsed()
    }

    #[inline]
    pub fn is_invalidated(&self) -> bool {
        self.invalidated
    }

    /// Valid and younger than `ttl`.
    #[inline]
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        !self.invalidated && self.age() < ttl
    }

    /// Stored after `instant` and not invalidated since.
    #[inline]
    pub fn refreshed_since(&self, instant: Instant) -> bool {
        !self.invalidated && self.refreshed_at >= instant
    }
}

/// Cache state observed when a fetch started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket {
    pub generation: u64,
    epoch: u64,
    all_epoch: u64,
}

/// Health of one scope's synchronization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStatus {
    /// The last refresh failed; the cached value (if any) is out of date.
    pub stale: bool,
    pub last_error: Option<String>,
    pub last_category: Option<ErrorCategory>,
    pub last_success: Option<DateTime<Utc>>,
}

/// Change notification for subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheUpdate {
    Market,
    Account(Address),
    Invalidated(RefreshScope),
    Failed {
        scope: RefreshScope,
        category: ErrorCategory,
    },
    /// Everything was cleared for a new binding.
    Rebound { generation: u64 },
}

/// Constructor-injected cache shared by readers, the scheduler and the executor.
///
/// Lock order: `generation`, `all_epoch`, `account_epochs`, `accounts`.
pub struct SnapshotCache {
    generation: RwLock<u64>,
    market: RwLock<Option<CacheEntry<MarketSnapshot>>>,
    /// Bumped under the `market` write lock.
    market_epoch: AtomicU64,
    market_status: RwLock<SyncStatus>,
    /// Bumped by `RefreshScope::All` for every account at once.
    all_epoch: RwLock<u64>,
    account_epochs: DashMap<Address, u64>,
    accounts: DashMap<Address, CacheEntry<AccountView>>,
    account_status: DashMap<Address, SyncStatus>,
    updates: broadcast::Sender<CacheUpdate>,
}

impl Default for SnapshotCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotCache {
    /// Empty cache at generation 1.
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            generation: RwLock::new(1),
            market: RwLock::new(None),
            market_epoch: AtomicU64::new(0),
            market_status: RwLock::new(SyncStatus::default()),
            all_epoch: RwLock::new(0),
            account_epochs: DashMap::new(),
            accounts: DashMap::new(),
            account_status: DashMap::new(),
            updates,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheUpdate> {
        self.updates.subscribe()
    }

    #[inline]
    pub fn generation(&self) -> u64 {
        *self.generation.read()
    }

    /// Switch to a new binding generation and drop everything cached.
    ///
    /// Older or equal generations are ignored.
    pub fn bind(&self, generation: u64) {
        let mut current = self.generation.write();
        if generation <= *current {
            return;
        }
        *current = generation;
        *self.market.write() = None;
        *self.market_status.write() = SyncStatus::default();
        self.account_epochs.clear();
        self.accounts.clear();
        self.account_status.clear();
        drop(current);

        info!(generation, "Cache rebound");
        self.notify(CacheUpdate::Rebound { generation });
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub fn market(&self) -> Option<CacheEntry<MarketSnapshot>> {
        self.market.read().clone()
    }

    pub fn account(&self, address: &Address) -> Option<CacheEntry<AccountView>> {
        self.accounts.get(address).map(|e| e.value().clone())
    }

    /// Addresses with a cached account view.
    pub fn cached_accounts(&self) -> Vec<Address> {
        self.accounts.iter().map(|e| *e.key()).collect()
    }

    pub fn market_status(&self) -> SyncStatus {
        self.market_status.read().clone()
    }

    pub fn account_status(&self, address: &Address) -> SyncStatus {
        self.account_status
            .get(address)
            .map(|s| s.value().clone())
            .unwrap_or_default()
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Ticket for a market fetch about to start.
    pub fn market_ticket(&self) -> FetchTicket {
        FetchTicket {
            generation: self.generation(),
            epoch: self.market_epoch.load(Ordering::Acquire),
            all_epoch: 0,
        }
    }

    /// Ticket for an account fetch about to start.
    pub fn account_ticket(&self, address: &Address) -> FetchTicket {
        let all_epoch = *self.all_epoch.read();
        FetchTicket {
            generation: self.generation(),
            epoch: self.account_epochs.get(address).map_or(0, |e| *e.value()),
            all_epoch,
        }
    }

    /// Store a snapshot fetched under `ticket`. Returns `false` if it was dropped.
    ///
    /// A snapshot whose fetch overlapped an invalidation is kept but stays
    /// invalidated, so the next read refetches.
    pub fn store_market(&self, snapshot: MarketSnapshot, ticket: FetchTicket) -> bool {
        let current = self.generation.read();
        if ticket.generation != *current {
            debug!(
                generation = ticket.generation,
                current = *current,
                "Dropping superseded market snapshot"
            );
            return false;
        }

        let fetched_at = {
            let mut market = self.market.write();
            let overtaken = self.market_epoch.load(Ordering::Acquire) != ticket.epoch;
            if overtaken {
                debug!("Market invalidated during fetch, storing as invalidated");
            }
            let entry = CacheEntry::new(snapshot, ticket.generation, overtaken);
            let fetched_at = entry.fetched_at;
            *market = Some(entry);
            fetched_at
        };
        {
            let mut status = self.market_status.write();
            *status = SyncStatus {
                last_success: Some(fetched_at),
                ..SyncStatus::default()
            };
        }
        drop(current);

        Metrics::cache_stale("market", false);
        self.notify(CacheUpdate::Market);
        true
    }

    /// Store an account view fetched under `ticket`. Returns `false` if it was dropped.
    ///
    /// Same overlap rule as [`Self::store_market`].
    pub fn store_account(&self, view: AccountView, ticket: FetchTicket) -> bool {
        let current = self.generation.read();
        if ticket.generation != *current {
            debug!(
                generation = ticket.generation,
                current = *current,
                "Dropping superseded account view"
            );
            return false;
        }

        let address = view.address;
        let all_epoch = self.all_epoch.read();
        let epoch = self.account_epochs.entry(address).or_insert(0);
        let overtaken = *epoch != ticket.epoch || *all_epoch != ticket.all_epoch;
        if overtaken {
            debug!(%address, "Account invalidated during fetch, storing as invalidated");
        }

        let entry = CacheEntry::new(view, ticket.generation, overtaken);
        self.account_status.insert(
            address,
            SyncStatus {
                last_success: Some(entry.fetched_at),
                ..SyncStatus::default()
            },
        );
        self.accounts.insert(address, entry);
        drop(epoch);
        drop(all_epoch);
        drop(current);

        Metrics::cache_stale("account", false);
        self.notify(CacheUpdate::Account(address));
        true
    }

    /// Mark entries invalid; values stay readable until replaced.
    ///
    /// Fetches already in flight for the scope store their result invalidated.
    pub fn invalidate(&self, scope: RefreshScope) {
        match scope {
            RefreshScope::Market => self.invalidate_market(),
            RefreshScope::Account(address) => self.invalidate_account(&address),
            RefreshScope::All => {
                self.invalidate_market();
                let mut all_epoch = self.all_epoch.write();
                *all_epoch += 1;
                for mut entry in self.accounts.iter_mut() {
                    entry.value_mut().invalidated = true;
                }
            }
        }
        self.notify(CacheUpdate::Invalidated(scope));
    }

    fn invalidate_market(&self) {
        let mut market = self.market.write();
        self.market_epoch.fetch_add(1, Ordering::AcqRel);
        if let Some(entry) = market.as_mut() {
            entry.invalidated = true;
        }
    }

    fn invalidate_account(&self, address: &Address) {
        let mut epoch = self.account_epochs.entry(*address).or_insert(0);
        *epoch += 1;
        if let Some(mut entry) = self.accounts.get_mut(address) {
            entry.invalidated = true;
        }
    }

    /// Record a failed refresh. The cached value, if any, is kept.
    pub fn record_failure(&self, scope: RefreshScope, category: ErrorCategory, message: String) {
        let update = |status: &mut SyncStatus| {
            status.stale = true;
            status.last_error = Some(message.clone());
            status.last_category = Some(category);
        };

        match scope {
            RefreshScope::Market => update(&mut *self.market_status.write()),
            RefreshScope::Account(address) => {
                update(&mut *self.account_status.entry(address).or_default());
            }
            RefreshScope::All => {
                update(&mut *self.market_status.write());
                for mut status in self.account_status.iter_mut() {
                    update(status.value_mut());
                }
            }
        }

        Metrics::cache_stale(scope.label(), true);
        self.notify(CacheUpdate::Failed { scope, category });
    }

    fn notify(&self, update: CacheUpdate) {
        // No subscribers is fine.
        let _ = self.updates.send(update);
    }
}
