//! Cache synchronization for the HyperVIX client.
//!
//! - `SnapshotCache`: Latest market snapshot and account views, generation-tagged
//! - `CachedReader`: Read-through access with single-flight refetch
//! - `Invalidator`: The one path by which mutations and events mark entries stale
//! - `EventReconciliationBus`: Contract events to invalidations
//! - `SyncScheduler`: Interval polling plus queued refreshes

pub mod bus;
pub mod cache;
pub mod config;
pub mod error;
pub mod invalidation;
pub mod reader;
pub mod retry;
pub mod scheduler;

pub use bus::{reconcile, EventReconciliationBus};
pub use cache::{CacheEntry, CacheUpdate, FetchTicket, SnapshotCache, SyncStatus};
pub use config::SyncConfig;
pub use error::{SyncError, SyncResult};
pub use invalidation::{InvalidationTrigger, Invalidator, RefreshRequest, RefreshScope};
pub use reader::CachedReader;
pub use retry::RetryPolicy;
pub use scheduler::SyncScheduler;
