use super::{metrics::Metrics, Config, Extractor, Progress};
use crate::{retry, wire, Append, Error, Publisher, Store};
use commonware_runtime::{Clock, Metrics as RuntimeMetrics};
use futures::future::pending;
use tracing::{debug, warn};

/// Consumes partial results and signals completion.
///
/// Clones share metrics and collaborators, so the transport can hand one clone to each of its
/// consumer tasks.
#[derive(Clone)]
pub struct Collector<E, S, P, X>
where
    E: Clock + RuntimeMetrics,
    S: Store,
    P: Publisher,
    X: Extractor,
{
    context: E,
    store: S,
    publisher: P,
    extractor: X,
    expected: usize,
    retry: retry::Config,

    metrics: Metrics,
}

impl<E, S, P, X> Collector<E, S, P, X>
where
    E: Clock + RuntimeMetrics,
    S: Store,
    P: Publisher,
    X: Extractor,
{
    /// Create a new [Collector].
    ///
    /// # Panics
    ///
    /// Panics if `cfg.expected` is zero.
    pub fn new(context: E, store: S, publisher: P, cfg: Config<X>) -> Self {
        assert!(cfg.expected > 0, "expected count must be positive");
        let metrics = Metrics::init(&context);
        Self {
            context,
            store,
            publisher,
            extractor: cfg.extractor,
            expected: cfg.expected,
            retry: cfg.retry,
            metrics,
        }
    }

    /// Collect one partial result.
    ///
    /// Returns [Progress::Completed] to exactly one caller per correlation id: the one whose
    /// append brought the store to the expected count. That caller publishes the ready
    /// notification before returning. If publishing fails, the error is returned and the next
    /// delivery for the id publishes instead, without storing another partial result.
    pub async fn on_partial_result(&self, message: X::Message) -> Result<Progress, Error> {
        // Parse
        let parsed = self.extractor.correlation_id(&message).and_then(|id| {
            self.extractor
                .payload(&message)
                .map(|partial| (id, partial))
        });
        let (id, partial) = match parsed {
            Ok(parsed) => parsed,
            Err(err) => {
                self.metrics.rejected.inc();
                warn!(?err, "rejecting malformed partial result");
                return Err(Error::Extraction(Box::new(err)));
            }
        };

        // Store before signaling
        let append = self
            .store
            .append(id, partial, self.expected)
            .await
            .map_err(Error::store)?;
        match append {
            Append::Stored(count) if count < self.expected => {
                self.metrics.partials.inc();
                debug!(?id, count, expected = self.expected, "collected partial result");
                return Ok(Progress::Pending(count));
            }
            Append::Stored(_) => {
                self.metrics.partials.inc();
            }
            Append::Sealed { signaled: true } => {
                self.metrics.surplus.inc();
                debug!(?id, "discarding partial result for completed computation");
                return Ok(Progress::Surplus);
            }
            Append::Sealed { signaled: false } => {
                self.metrics.republished.inc();
                warn!(?id, "completed computation was never signaled, publishing again");
            }
        }

        // Signal completion
        let notification = wire::encode(&id);
        let publisher = &self.publisher;
        retry::execute(
            &self.context,
            &self.retry,
            &mut pending::<()>(),
            P::is_fatal,
            || {
                let mut publisher = publisher.clone();
                let notification = notification.clone();
                async move { publisher.publish(notification).await }
            },
        )
        .await
        .inspect_err(|err| warn!(?id, ?err, "failed to publish ready notification"))?;
        self.store.signaled(&id).await.map_err(Error::store)?;
        self.metrics.completed.inc();
        debug!(?id, "computation completed");
        Ok(Progress::Completed)
    }
}
