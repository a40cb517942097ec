//! Event reconciliation bus.
//!
//! Subscribes to the contract events and turns each one into invalidations.
//! A dropped or failed subscription is re-established with backoff; since
//! events may have been missed in the gap, every resubscription also
//! invalidates everything.

use crate::invalidation::{InvalidationTrigger, Invalidator, RefreshScope};
use crate::retry::RetryPolicy;
use futures_util::StreamExt;
use hvx_chain::{ChainError, ChainEvent, EventSource, EventStream};
use hvx_telemetry::Metrics;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Scopes an event makes stale.
///
/// Trades move the reserves and open interest, so the market and every
/// touched account go stale. Funding settlement moves every open position's
/// margin. An oracle update only changes the market.
pub fn reconcile(event: &ChainEvent) -> Vec<RefreshScope> {
    match event {
        ChainEvent::PositionOpened { .. }
        | ChainEvent::PositionClosed { .. }
        | ChainEvent::Liquidated { .. } => std::iter::once(RefreshScope::Market)
            .chain(event.accounts().into_iter().map(RefreshScope::Account))
            .collect(),
        ChainEvent::FundingSettled { .. } => vec![RefreshScope::All],
        ChainEvent::VolatilityUpdated { .. } => vec![RefreshScope::Market],
    }
}

enum StreamEnd {
    Cancelled,
    Closed,
    Failed(ChainError),
}

/// Routes chain events into the invalidator.
pub struct EventReconciliationBus {
    source: Arc<dyn EventSource>,
    invalidator: Invalidator,
    backoff: RetryPolicy,
    events: broadcast::Sender<ChainEvent>,
}

impl EventReconciliationBus {
    pub fn new(source: Arc<dyn EventSource>, invalidator: Invalidator, backoff: RetryPolicy) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            source,
            invalidator,
            backoff,
            events,
        }
    }

    /// Every event the bus handles, for display.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ChainEvent> {
        self.events.subscribe()
    }

    /// Subscribe and reconcile until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut attempt = 0u32;
        loop {
            let subscribed = tokio::select! {
                result = self.source.subscribe() => result,
                () = cancel.cancelled() => return,
            };

            match subscribed {
                Ok(stream) => {
                    if attempt > 0 {
                        self.invalidator
                            .invalidate(RefreshScope::All, InvalidationTrigger::ChainEvent);
                    }
                    info!("Subscribed to contract events");
                    attempt = 0;

                    match self.drain(stream, &cancel).await {
                        StreamEnd::Cancelled => return,
                        StreamEnd::Closed => warn!("Event stream ended, resubscribing"),
                        StreamEnd::Failed(e) => {
                            warn!(error = %e, "Event stream failed, resubscribing");
                        }
                    }
                }
                Err(e) => warn!(error = %e, attempt, "Event subscription failed"),
            }

            attempt = attempt.saturating_add(1);
            let delay = self.backoff.delay_for(attempt);
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = cancel.cancelled() => {
                    info!("Shutdown requested during resubscribe backoff");
                    return;
                }
            }
        }
    }

    async fn drain(&self, mut stream: EventStream, cancel: &CancellationToken) -> StreamEnd {
        loop {
            tokio::select! {
                item = stream.next() => match item {
                    Some(Ok(event)) => self.handle(event),
                    Some(Err(e)) => return StreamEnd::Failed(e),
                    None => return StreamEnd::Closed,
                },
                () = cancel.cancelled() => return StreamEnd::Cancelled,
            }
        }
    }

    fn handle(&self, event: ChainEvent) {
        Metrics::chain_event(event.name());
        let scopes = reconcile(&event);
        debug!(event = event.name(), scopes = scopes.len(), "Reconciling");
        self.invalidator
            .invalidate_all(&scopes, InvalidationTrigger::ChainEvent);
        // No display listeners is fine.
        let _ = self.events.send(event);
    }
}
