//! Prometheus metrics for the ingestion pipeline.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

/// Metrics collector for the ingestion service.
///
/// Every instance owns its own [`Registry`], so several collectors can live in
/// one process (one per pipeline, or one per test).
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    blocks_published: IntCounter,
    blocks_skipped: IntCounterVec,
    blocks_dropped: IntCounter,
    transactions_enriched: IntCounter,
    rpc_errors: IntCounter,
    rpc_latency: HistogramVec,
    deliveries: IntCounterVec,
    last_seen_block: IntGauge,
}

impl Metrics {
    /// Create a new metrics instance with a fresh registry.
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let blocks_published = IntCounter::new(
            "eth_ingestion_blocks_published_total",
            "Total number of blocks handed to the bus",
        )?;
        registry.register(Box::new(blocks_published.clone()))?;

        let blocks_skipped = IntCounterVec::new(
            Opts::new(
                "eth_ingestion_blocks_skipped_total",
                "Total number of blocks abandoned before publish, by reason",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(blocks_skipped.clone()))?;

        let blocks_dropped = IntCounter::new(
            "eth_ingestion_blocks_dropped_total",
            "Total number of blocks dropped because the bus was overloaded",
        )?;
        registry.register(Box::new(blocks_dropped.clone()))?;

        let transactions_enriched = IntCounter::new(
            "eth_ingestion_transactions_enriched_total",
            "Total number of transactions enriched with receipts",
        )?;
        registry.register(Box::new(transactions_enriched.clone()))?;

        let rpc_errors = IntCounter::new(
            "eth_ingestion_rpc_errors_total",
            "Total number of failed RPC attempts",
        )?;
        registry.register(Box::new(rpc_errors.clone()))?;

        let rpc_latency = HistogramVec::new(
            HistogramOpts::new(
                "eth_ingestion_rpc_latency_seconds",
                "RPC call latency in seconds",
            ),
            &["operation"],
        )?;
        registry.register(Box::new(rpc_latency.clone()))?;

        let deliveries = IntCounterVec::new(
            Opts::new(
                "eth_ingestion_deliveries_total",
                "Delivery confirmations reported by the bus, by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(deliveries.clone()))?;

        let last_seen_block = IntGauge::new(
            "eth_ingestion_last_seen_block",
            "Number of the most recent block handed to the bus",
        )?;
        registry.register(Box::new(last_seen_block.clone()))?;

        Ok(Self {
            registry,
            blocks_published,
            blocks_skipped,
            blocks_dropped,
            transactions_enriched,
            rpc_errors,
            rpc_latency,
            deliveries,
            last_seen_block,
        })
    }

    /// Increment the blocks published counter.
    pub fn inc_blocks_published(&self) {
        self.blocks_published.inc();
    }

    /// Increment the skipped blocks counter for `reason`.
    pub fn inc_blocks_skipped(&self, reason: &str) {
        self.blocks_skipped.with_label_values(&[reason]).inc();
    }

    /// Increment the dropped blocks counter.
    pub fn inc_blocks_dropped(&self) {
        self.blocks_dropped.inc();
    }

    /// Increment the enriched transactions counter.
    pub fn inc_transactions_enriched(&self, count: u64) {
        self.transactions_enriched.inc_by(count);
    }

    /// Increment the RPC errors counter.
    pub fn inc_rpc_errors(&self) {
        self.rpc_errors.inc();
    }

    /// Record RPC latency.
    pub fn observe_rpc_latency(&self, operation: &str, duration_secs: f64) {
        self.rpc_latency.with_label_values(&[operation]).observe(duration_secs);
    }

    /// Count a delivery confirmation.
    pub fn inc_deliveries(&self, delivered: bool) {
        let outcome = if delivered { "delivered" } else { "failed" };
        self.deliveries.with_label_values(&[outcome]).inc();
    }

    /// Record the last block number handed to the bus.
    pub fn set_last_seen_block(&self, number: u64) {
        self.last_seen_block.set(i64::try_from(number).unwrap_or(i64::MAX));
    }

    /// Get Prometheus metrics as a string.
    pub fn gather(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
