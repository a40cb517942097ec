//! The single invalidation entry point.
//!
//! Mutations and chain events both end up in [`Invalidator::invalidate`]:
//! the cache entry is marked invalid at once (so the next read refetches)
//! and a refresh request is queued for the scheduler.

use crate::cache::SnapshotCache;
use alloy::primitives::Address;
use hvx_telemetry::Metrics;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// What to refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefreshScope {
    Market,
    Account(Address),
    /// Market and every cached account.
    All,
}

impl RefreshScope {
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Market => "market",
            Self::Account(_) => "account",
            Self::All => "all",
        }
    }
}

impl fmt::Display for RefreshScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Account(address) => write!(f, "account:{address}"),
            other => write!(f, "{}", other.label()),
        }
    }
}

/// Why an entry was invalidated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationTrigger {
    Mutation,
    ChainEvent,
    Manual,
}

impl InvalidationTrigger {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mutation => "mutation",
            Self::ChainEvent => "chain_event",
            Self::Manual => "manual",
        }
    }
}

/// Queued refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshRequest {
    pub scope: RefreshScope,
    pub trigger: InvalidationTrigger,
}

/// Cloneable handle shared by the executor and the event bus.
#[derive(Clone)]
pub struct Invalidator {
    cache: Arc<SnapshotCache>,
    tx: mpsc::UnboundedSender<RefreshRequest>,
}

impl Invalidator {
    /// Invalidator and the receiving end for the scheduler.
    pub fn new(cache: Arc<SnapshotCache>) -> (Self, mpsc::UnboundedReceiver<RefreshRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { cache, tx }, rx)
    }

    pub fn invalidate(&self, scope: RefreshScope, trigger: InvalidationTrigger) {
        self.cache.invalidate(scope);
        Metrics::cache_invalidated(scope.label(), trigger.as_str());
        debug!(%scope, trigger = trigger.as_str(), "Invalidated");

        // No scheduler running (one-shot commands): the mark above is enough.
        let _ = self.tx.send(RefreshRequest { scope, trigger });
    }

    pub fn invalidate_all(&self, scopes: &[RefreshScope], trigger: InvalidationTrigger) {
        for scope in scopes {
            self.invalidate(*scope, trigger);
        }
    }
}

impl fmt::Debug for Invalidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invalidator")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalidation_is_queued() {
        let cache = Arc::new(SnapshotCache::new());
        let (invalidator, mut rx) = Invalidator::new(cache);
        let account = Address::repeat_byte(0x11);

        invalidator.invalidate_all(
            &[RefreshScope::Market, RefreshScope::Account(account)],
            InvalidationTrigger::Mutation,
        );

        assert_eq!(rx.try_recv().unwrap().scope, RefreshScope::Market);
        let second = rx.try_recv().unwrap();
        assert_eq!(second.scope, RefreshScope::Account(account));
        assert_eq!(second.trigger, InvalidationTrigger::Mutation);
    }

    #[test]
    fn test_invalidate_without_scheduler() {
        let cache = Arc::new(SnapshotCache::new());
        let (invalidator, rx) = Invalidator::new(cache);
        drop(rx);
        invalidator.invalidate(RefreshScope::All, InvalidationTrigger::Manual);
    }

    #[test]
    fn test_scope_display() {
        assert_eq!(RefreshScope::Market.to_string(), "market");
        assert!(RefreshScope::Account(Address::ZERO)
            .to_string()
            .starts_with("account:0x"));
    }
}
