use commonware_runtime::Metrics as RuntimeMetrics;
use prometheus_client::metrics::counter::Counter;

/// Metrics for the [`Collector`](super::Collector)
#[derive(Clone, Default)]
pub struct Metrics {
    /// Number of partial results appended to the store
    pub partials: Counter,
    /// Number of computations completed
    pub completed: Counter,
    /// Number of partial results discarded after completion
    pub surplus: Counter,
    /// Number of ready notifications published again after a failed publish
    pub republished: Counter,
    /// Number of messages rejected during extraction
    pub rejected: Counter,
}

impl Metrics {
    /// Create and return a new set of metrics, registered with the given context.
    pub fn init<E: RuntimeMetrics>(context: &E) -> Self {
        let metrics = Self::default();
        context.register(
            "partials",
            "Number of partial results appended to the store",
            metrics.partials.clone(),
        );
        context.register(
            "completed",
            "Number of computations completed",
            metrics.completed.clone(),
        );
        context.register(
            "surplus",
            "Number of partial results discarded after completion",
            metrics.surplus.clone(),
        );
        context.register(
            "republished",
            "Number of ready notifications published again after a failed publish",
            metrics.republished.clone(),
        );
        context.register(
            "rejected",
            "Number of messages rejected during extraction",
            metrics.rejected.clone(),
        );
        metrics
    }
}
