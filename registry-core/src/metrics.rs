//! Metrics collection for observability
//!
//! Prometheus metrics for the registry state machine.
//!
//! # Metrics
//!
//! - `registry_txs_delivered_total` - Transactions applied successfully
//! - `registry_txs_failed_total{kind}` - Rejected transactions by error kind
//! - `registry_records_expired_total` - Records marked deleted by the sweep
//! - `registry_records_renewed_total` - Records renewed by the sweep
//! - `registry_auctions_completed_total` - Auctions settled
//! - `registry_block_height` - Last committed height
//! - `registry_deliver_duration_seconds` - Histogram of deliver-tx latencies

use crate::error::ErrorKind;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Transactions applied
    pub txs_delivered: IntCounter,

    /// Transactions rejected, by error kind
    pub txs_failed: IntCounterVec,

    /// Records expired by the sweep
    pub records_expired: IntCounter,

    /// Records renewed by the sweep
    pub records_renewed: IntCounter,

    /// Auctions settled
    pub auctions_completed: IntCounter,

    /// Last committed height
    pub block_height: IntGauge,

    /// Deliver-tx duration histogram
    pub deliver_duration: Histogram,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("txs_delivered", &self.txs_delivered.get())
            .field("block_height", &self.block_height.get())
            .finish()
    }
}

impl Metrics {
    /// Create a collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let txs_delivered = IntCounter::new(
            "registry_txs_delivered_total",
            "Transactions applied successfully",
        )?;
        registry.register(Box::new(txs_delivered.clone()))?;

        let txs_failed = IntCounterVec::new(
            Opts::new("registry_txs_failed_total", "Rejected transactions by error kind"),
            &["kind"],
        )?;
        registry.register(Box::new(txs_failed.clone()))?;

        let records_expired = IntCounter::new(
            "registry_records_expired_total",
            "Records marked deleted by the expiry sweep",
        )?;
        registry.register(Box::new(records_expired.clone()))?;

        let records_renewed = IntCounter::new(
            "registry_records_renewed_total",
            "Records renewed by the expiry sweep",
        )?;
        registry.register(Box::new(records_renewed.clone()))?;

        let auctions_completed =
            IntCounter::new("registry_auctions_completed_total", "Auctions settled")?;
        registry.register(Box::new(auctions_completed.clone()))?;

        let block_height = IntGauge::new("registry_block_height", "Last committed height")?;
        registry.register(Box::new(block_height.clone()))?;

        let deliver_duration = Histogram::with_opts(
            HistogramOpts::new(
                "registry_deliver_duration_seconds",
                "Histogram of deliver-tx latencies",
            )
            .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.010, 0.050, 0.100, 0.500]),
        )?;
        registry.register(Box::new(deliver_duration.clone()))?;

        Ok(Self {
            txs_delivered,
            txs_failed,
            records_expired,
            records_renewed,
            auctions_completed,
            block_height,
            deliver_duration,
            registry,
        })
    }

    /// Record a delivered transaction
    pub fn record_delivered(&self, duration_seconds: f64) {
        self.txs_delivered.inc();
        self.deliver_duration.observe(duration_seconds);
    }

    /// Record a rejected transaction
    pub fn record_failed(&self, kind: ErrorKind, duration_seconds: f64) {
        self.txs_failed.with_label_values(&[kind.as_str()]).inc();
        self.deliver_duration.observe(duration_seconds);
    }

    /// Record an expiry sweep
    pub fn record_sweep(&self, renewed: usize, expired: usize) {
        self.records_renewed.inc_by(renewed as u64);
        self.records_expired.inc_by(expired as u64);
    }

    /// Record settled auctions
    pub fn record_auctions_completed(&self, count: usize) {
        self.auctions_completed.inc_by(count as u64);
    }

    /// Record a commit
    pub fn record_commit(&self, height: u64) {
        self.block_height.set(height as i64);
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
