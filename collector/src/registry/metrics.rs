use commonware_runtime::Metrics as RuntimeMetrics;
use prometheus_client::metrics::{counter::Counter, gauge::Gauge};

/// Metrics for the [`Tracker`](super::Tracker)
#[derive(Clone, Default)]
pub struct Metrics {
    /// Number of ready entries not yet claimed
    pub pending: Gauge,
    /// Number of completed results claimed
    pub claimed: Counter,
    /// Number of ready entries swept before anyone claimed them
    pub expired: Counter,
    /// Number of notifications dropped because they could not be decoded
    pub malformed: Counter,
}

impl Metrics {
    /// Create and return a new set of metrics, registered with the given context.
    pub fn init<E: RuntimeMetrics>(context: &E) -> Self {
        let metrics = Self::default();
        context.register(
            "pending",
            "Number of ready entries not yet claimed",
            metrics.pending.clone(),
        );
        context.register(
            "claimed",
            "Number of completed results claimed",
            metrics.claimed.clone(),
        );
        context.register(
            "expired",
            "Number of ready entries swept before anyone claimed them",
            metrics.expired.clone(),
        );
        context.register(
            "malformed",
            "Number of notifications dropped because they could not be decoded",
            metrics.malformed.clone(),
        );
        metrics
    }
}
