//! Prometheus metrics for the HyperVIX client.
//!
//! Covers:
//! - Snapshot/account refresh outcomes and latency
//! - Cache invalidations by scope and trigger
//! - Index feed fallbacks
//! - Mutation outcomes
//! - Reconciled chain events
//! - Decimal-scale mismatches between local and contract figures
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. A registration failure
//! means duplicate metric names, a startup-time programming error. These
//! panics only occur during static initialization, never at runtime.

use crate::error::{TelemetryError, TelemetryResult};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram_vec, CounterVec,
    Encoder, Gauge, GaugeVec, HistogramVec, TextEncoder,
};

/// Refresh attempts by scope and outcome.
/// Labels: scope (market/account), outcome (ok/error/superseded)
pub static REFRESH_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "hvx_refresh_total",
        "Snapshot and account refreshes by outcome",
        &["scope", "outcome"]
    )
    .unwrap()
});

/// Refresh latency in milliseconds, including retries.
pub static REFRESH_LATENCY_MS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "hvx_refresh_latency_ms",
        "Refresh latency in milliseconds",
        &["scope"],
        vec![10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 30000.0]
    )
    .unwrap()
});

/// Failed read batches by error category.
pub static READ_FAILURES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "hvx_read_failures_total",
        "Failed read batches by error category",
        &["scope", "category"]
    )
    .unwrap()
});

/// Whether the cached value for a scope is stale after exhausted retries (1 = stale).
pub static CACHE_STALE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "hvx_cache_stale",
        "Cached value is stale after failed refresh (1=stale)",
        &["scope"]
    )
    .unwrap()
});

/// Cache invalidations.
/// Labels: scope (market/account/all), trigger (mutation/chain_event/manual)
pub static CACHE_INVALIDATIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "hvx_cache_invalidations_total",
        "Cache invalidations by scope and trigger",
        &["scope", "trigger"]
    )
    .unwrap()
});

/// Index feed fallbacks by reason.
pub static INDEX_FEED_FALLBACK_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "hvx_index_feed_fallback_total",
        "Index price fallbacks by reason",
        &["reason"]
    )
    .unwrap()
});

/// Mutations by kind and outcome.
pub static MUTATIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "hvx_mutations_total",
        "Mutations by kind and outcome",
        &["kind", "outcome"]
    )
    .unwrap()
});

/// Chain events received by the reconciliation bus.
pub static CHAIN_EVENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "hvx_chain_events_total",
        "Chain events received",
        &["event"]
    )
    .unwrap()
});

/// Local recomputation disagreed with the contract beyond tolerance.
pub static DECIMAL_SCALE_MISMATCH_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "hvx_decimal_scale_mismatch_total",
        "Local vs contract figure mismatches",
        &["field"]
    )
    .unwrap()
});

/// Latest mark price.
pub static MARK_PRICE: Lazy<Gauge> =
    Lazy::new(|| register_gauge!("hvx_mark_price", "Latest vAMM mark price").unwrap());

/// Latest index price (live or fallback).
pub static INDEX_PRICE: Lazy<Gauge> =
    Lazy::new(|| register_gauge!("hvx_index_price", "Latest index price").unwrap());

/// Latest annualized volatility.
pub static VOLATILITY: Lazy<Gauge> =
    Lazy::new(|| register_gauge!("hvx_volatility", "Latest annualized volatility").unwrap());

/// Latest predicted funding rate.
pub static PREDICTED_FUNDING_RATE: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "hvx_predicted_funding_rate",
        "Latest predicted funding rate"
    )
    .unwrap()
});

/// Metrics helper.
pub struct Metrics;

impl Metrics {
    /// Record a refresh outcome.
    pub fn refresh(scope: &str, outcome: &str) {
        REFRESH_TOTAL.with_label_values(&[scope, outcome]).inc();
    }

    /// Record refresh latency.
    pub fn refresh_latency(scope: &str, latency_ms: f64) {
        REFRESH_LATENCY_MS
            .with_label_values(&[scope])
            .observe(latency_ms);
    }

    /// Record a failed read batch.
    pub fn read_failure(scope: &str, category: &str) {
        READ_FAILURES_TOTAL
            .with_label_values(&[scope, category])
            .inc();
    }

    /// Mark a scope stale or fresh.
    pub fn cache_stale(scope: &str, stale: bool) {
        CACHE_STALE
            .with_label_values(&[scope])
            .set(if stale { 1.0 } else { 0.0 });
    }

    /// Record a cache invalidation.
    pub fn cache_invalidated(scope: &str, trigger: &str) {
        CACHE_INVALIDATIONS_TOTAL
            .with_label_values(&[scope, trigger])
            .inc();
    }

    /// Record an index feed fallback.
    pub fn index_feed_fallback(reason: &str) {
        INDEX_FEED_FALLBACK_TOTAL.with_label_values(&[reason]).inc();
    }

    /// Record a mutation outcome.
    pub fn mutation(kind: &str, outcome: &str) {
        MUTATIONS_TOTAL.with_label_values(&[kind, outcome]).inc();
    }

    /// Record a received chain event.
    pub fn chain_event(event: &str) {
        CHAIN_EVENTS_TOTAL.with_label_values(&[event]).inc();
    }

    /// Record a decimal-scale mismatch.
    pub fn decimal_scale_mismatch(field: &str) {
        DECIMAL_SCALE_MISMATCH_TOTAL
            .with_label_values(&[field])
            .inc();
    }

    /// Publish headline market figures.
    pub fn market(mark_price: f64, index_price: f64, volatility: f64) {
        MARK_PRICE.set(mark_price);
        INDEX_PRICE.set(index_price);
        VOLATILITY.set(volatility);
    }

    /// Publish the predicted funding rate.
    pub fn predicted_funding_rate(rate: f64) {
        PREDICTED_FUNDING_RATE.set(rate);
    }

    /// Render every registered metric in the Prometheus text format.
    pub fn render() -> TelemetryResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&prometheus::gather(), &mut buffer)
            .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| TelemetryError::Metrics(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_recorded_metrics() {
        Metrics::refresh("market", "ok");
        Metrics::cache_invalidated("account", "mutation");

        let text = Metrics::render().unwrap();
        assert!(text.contains("hvx_refresh_total"));
        assert!(text.contains("hvx_cache_invalidations_total"));
    }
}
