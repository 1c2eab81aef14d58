//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring the engine.
//!
//! # Metrics
//!
//! - `wallet_ledger_operations_total{operation, outcome}` - Engine calls by result
//! - `wallet_ledger_operation_duration_seconds{operation}` - Engine call latency
//! - `wallet_ledger_cache_hits_total` / `wallet_ledger_cache_misses_total` - Read path
//! - `wallet_ledger_cache_errors_total{command}` - Swallowed cache faults
//!
//! Each collector owns its registry, so several engines can live in one process.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Engine calls by operation and outcome
    pub operations_total: IntCounterVec,

    /// Engine call latency by operation
    pub operation_duration: HistogramVec,

    /// Cache reads served from cache
    pub cache_hits: IntCounter,

    /// Cache reads that fell through to storage
    pub cache_misses: IntCounter,

    /// Cache faults swallowed by the read or invalidation path
    pub cache_errors: IntCounterVec,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let operations_total = IntCounterVec::new(
            Opts::new(
                "wallet_ledger_operations_total",
                "Engine operations by outcome",
            ),
            &["operation", "outcome"],
        )?;
        registry.register(Box::new(operations_total.clone()))?;

        let operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "wallet_ledger_operation_duration_seconds",
                "Engine operation latency",
            )
            .buckets(vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 5.0]),
            &["operation"],
        )?;
        registry.register(Box::new(operation_duration.clone()))?;

        let cache_hits = IntCounter::new("wallet_ledger_cache_hits_total", "Total cache hits")?;
        registry.register(Box::new(cache_hits.clone()))?;

        let cache_misses =
            IntCounter::new("wallet_ledger_cache_misses_total", "Total cache misses")?;
        registry.register(Box::new(cache_misses.clone()))?;

        let cache_errors = IntCounterVec::new(
            Opts::new(
                "wallet_ledger_cache_errors_total",
                "Cache faults that were logged and ignored",
            ),
            &["command"],
        )?;
        registry.register(Box::new(cache_errors.clone()))?;

        Ok(Self {
            operations_total,
            operation_duration,
            cache_hits,
            cache_misses,
            cache_errors,
            registry,
        })
    }

    /// Record one finished engine call
    pub fn record_operation(&self, operation: &str, outcome: &str, duration_seconds: f64) {
        self.operations_total
            .with_label_values(&[operation, outcome])
            .inc();
        self.operation_duration
            .with_label_values(&[operation])
            .observe(duration_seconds);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.inc();
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.inc();
    }

    pub fn record_cache_error(&self, command: &str) {
        self.cache_errors.with_label_values(&[command]).inc();
    }

    /// Count of calls for an operation/outcome pair
    pub fn operation_count(&self, operation: &str, outcome: &str) -> u64 {
        self.operations_total
            .with_label_values(&[operation, outcome])
            .get()
    }

    /// Render in the Prometheus text exposition format
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if encoder.encode(&self.registry.gather(), &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("Failed to create metrics")
    }
}
