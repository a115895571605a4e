//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring the ledger.
//!
//! # Metrics
//!
//! - `ledger_transactions_total{outcome}` - Submissions by outcome
//! - `ledger_commit_failures_total` - Rolled back commit units
//! - `ledger_commit_races_total` - Header uniqueness violations resolved by re-read
//! - `ledger_commit_duration_seconds` - Histogram of commit latencies
//! - `ledger_search_queries_total{namespace}` - Search queries executed
//! - `ledger_search_errors_total{namespace}` - Search queries rejected or failed

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Metrics collector
///
/// Each collector owns its registry, so several ledgers can live in one
/// process (tests, embedded use) without name clashes.
#[derive(Clone)]
pub struct Metrics {
    /// Submissions by outcome (`created`, `duplicate`, `conflict`, `rejected`)
    pub transactions_total: IntCounterVec,

    /// Commit units rolled back
    pub commit_failures: IntCounter,

    /// Uniqueness violations on the header insert
    pub commit_races: IntCounter,

    /// Commit duration histogram
    pub commit_duration: Histogram,

    /// Search queries by namespace
    pub search_queries: IntCounterVec,

    /// Failed search queries by namespace
    pub search_errors: IntCounterVec,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let transactions_total = IntCounterVec::new(
            Opts::new("ledger_transactions_total", "Transaction submissions by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(transactions_total.clone()))?;

        let commit_failures = IntCounter::new(
            "ledger_commit_failures_total",
            "Total number of rolled back commit units",
        )?;
        registry.register(Box::new(commit_failures.clone()))?;

        let commit_races = IntCounter::new(
            "ledger_commit_races_total",
            "Concurrent commits of the same transaction ID resolved by re-read",
        )?;
        registry.register(Box::new(commit_races.clone()))?;

        let commit_duration = Histogram::with_opts(
            HistogramOpts::new(
                "ledger_commit_duration_seconds",
                "Histogram of commit latencies",
            )
            .buckets(vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0]),
        )?;
        registry.register(Box::new(commit_duration.clone()))?;

        let search_queries = IntCounterVec::new(
            Opts::new("ledger_search_queries_total", "Search queries by namespace"),
            &["namespace"],
        )?;
        registry.register(Box::new(search_queries.clone()))?;

        let search_errors = IntCounterVec::new(
            Opts::new("ledger_search_errors_total", "Failed search queries by namespace"),
            &["namespace"],
        )?;
        registry.register(Box::new(search_errors.clone()))?;

        Ok(Self {
            transactions_total,
            commit_failures,
            commit_races,
            commit_duration,
            search_queries,
            search_errors,
            registry,
        })
    }

    /// Record the outcome of a submission
    pub fn record_outcome(&self, outcome: &str) {
        self.transactions_total.with_label_values(&[outcome]).inc();
    }

    /// Record a rolled back commit
    pub fn record_commit_failure(&self) {
        self.commit_failures.inc();
    }

    /// Record a lost race on the header insert
    pub fn record_commit_race(&self) {
        self.commit_races.inc();
    }

    /// Record commit duration
    pub fn record_commit_duration(&self, duration_seconds: f64) {
        self.commit_duration.observe(duration_seconds);
    }

    /// Record an executed search
    pub fn record_search(&self, namespace: &str) {
        self.search_queries.with_label_values(&[namespace]).inc();
    }

    /// Record a failed search
    pub fn record_search_error(&self, namespace: &str) {
        self.search_errors.with_label_values(&[namespace]).inc();
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render every metric in the Prometheus text exposition format
    pub fn render(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("commit_failures", &self.commit_failures.get())
            .field("commit_races", &self.commit_races.get())
            .finish_non_exhaustive()
    }
}
