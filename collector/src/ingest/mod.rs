//! Turn inbound partial-result messages into store updates and a single ready notification.
//!
//! # Overview
//!
//! The transport invokes [Collector::on_partial_result] from its own consumer tasks, possibly
//! many at once for the same [CorrelationId]. Each call extracts the id and payload with the
//! configured [Extractor], appends the payload to the [crate::Store], and inspects the outcome
//! the store reports for that append:
//!
//! - below the expected count, the computation is still [Progress::Pending];
//! - exactly the expected count, this caller [Progress::Completed] it and publishes the ready
//!   notification (retrying transient failures);
//! - the id was already sealed, so the contribution is [Progress::Surplus] and nothing is stored
//!   or published.
//!
//! Because the append happens before the publish, anyone observing the notification can drain
//! exactly the expected partial results.
//!
//! A failed publish is returned to the transport, which redelivers the message. The store keeps
//! the id sealed but unsignaled, so the redelivery publishes the notification without appending
//! a second copy.
//!
//! Extraction failures are permanent and returned as [crate::Error::Extraction] so the transport
//! can apply its own dead-letter policy. They are never retried here.

use crate::CorrelationId;
use bytes::{Buf, Bytes, BytesMut};
use std::{error::Error as StdError, fmt::Debug};
use thiserror::Error;

mod collector;
pub use collector::Collector;
mod metrics;

/// Configuration for the [Collector].
#[derive(Clone)]
pub struct Config<X: Extractor> {
    /// Pulls the correlation id and payload out of inbound messages.
    pub extractor: X,

    /// Number of partial results that complete a computation.
    pub expected: usize,

    /// Retry policy for publishing ready notifications.
    pub retry: crate::retry::Config,
}

/// The state of a computation after a partial result was collected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Progress {
    /// Fewer than the expected number of partial results are held.
    Pending(usize),
    /// This partial result completed the computation and the ready notification was published.
    Completed,
    /// The computation was already completed and signaled. The partial result was discarded.
    Surplus,
}

/// Extracts the parts of an inbound message the [Collector] needs.
///
/// Message formats vary per computation kind, so the transport supplies one [Extractor] per
/// collector.
pub trait Extractor: Clone + Send + Sync + 'static {
    /// Inbound message type.
    type Message: Send;

    /// Error returned for messages that cannot be parsed.
    type Error: Debug + StdError + Send + Sync + 'static;

    /// Return the id of the computation `message` contributes to.
    fn correlation_id(&self, message: &Self::Message) -> Result<CorrelationId, Self::Error>;

    /// Return the opaque partial result carried by `message`.
    fn payload(&self, message: &Self::Message) -> Result<Bytes, Self::Error>;
}

/// Errors returned by [Prefixed].
#[derive(Error, Debug)]
pub enum PrefixError {
    #[error("message too short: {0} bytes")]
    TooShort(usize),
}

/// An [Extractor] for messages framed as a wire-encoded [CorrelationId] followed by the payload.
#[derive(Clone, Copy, Debug, Default)]
pub struct Prefixed;

impl Prefixed {
    /// Frame `payload` for `id`.
    pub fn frame(id: &CorrelationId, payload: &[u8]) -> Bytes {
        let mut buf = BytesMut::with_capacity(crate::wire::SIZE + payload.len());
        crate::wire::write(id, &mut buf);
        buf.extend_from_slice(payload);
        buf.freeze()
    }
}

impl Extractor for Prefixed {
    type Message = Bytes;
    type Error = PrefixError;

    fn correlation_id(&self, message: &Bytes) -> Result<CorrelationId, PrefixError> {
        if message.len() < crate::wire::SIZE {
            return Err(PrefixError::TooShort(message.len()));
        }
        let mut header = message.slice(..crate::wire::SIZE);
        Ok(CorrelationId::new(header.get_u64(), header.get_u64()))
    }

    fn payload(&self, message: &Bytes) -> Result<Bytes, PrefixError> {
        if message.len() < crate::wire::SIZE {
            return Err(PrefixError::TooShort(message.len()));
        }
        Ok(message.slice(crate::wire::SIZE..))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{memory, mocks, retry, Error, Store as _};
    use commonware_macros::test_traced;
    use commonware_runtime::{deterministic, Clock, Metrics, Runner};
    use std::time::Duration;

    fn config(expected: usize) -> Config<Prefixed> {
        Config {
            extractor: Prefixed,
            expected,
            retry: retry::Config {
                max_retries: 3,
                initial_delay: Duration::from_millis(1),
            },
        }
    }

    #[test]
    fn test_prefixed() {
        let id = CorrelationId::new(5, 6);
        let framed = Prefixed::frame(&id, b"payload");
        assert_eq!(Prefixed.correlation_id(&framed).unwrap(), id);
        assert_eq!(Prefixed.payload(&framed).unwrap(), Bytes::from_static(b"payload"));

        let empty = Prefixed::frame(&id, b"");
        assert_eq!(Prefixed.correlation_id(&empty).unwrap(), id);
        assert!(Prefixed.payload(&empty).unwrap().is_empty());

        let short = Bytes::from_static(b"short");
        assert!(matches!(
            Prefixed.correlation_id(&short),
            Err(PrefixError::TooShort(5))
        ));
    }

    #[test_traced]
    fn test_progress() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let store = memory::Store::default();
            let publisher = mocks::Publisher::default();
            let collector = Collector::new(
                context.with_label("collector"),
                store.clone(),
                publisher.clone(),
                config(2),
            );

            let id = CorrelationId::new(1, 1);
            let first = collector.on_partial_result(Prefixed::frame(&id, b"1")).await;
            assert_eq!(first.unwrap(), Progress::Pending(1));
            assert!(publisher.published().is_empty());

            let second = collector.on_partial_result(Prefixed::frame(&id, b"2")).await;
            assert_eq!(second.unwrap(), Progress::Completed);
            assert_eq!(publisher.published(), vec![crate::wire::encode(&id)]);

            // A late duplicate is neither stored nor published
            let third = collector.on_partial_result(Prefixed::frame(&id, b"3")).await;
            assert_eq!(third.unwrap(), Progress::Surplus);
            assert_eq!(publisher.published().len(), 1);
            assert_eq!(store.count(&id).await.unwrap(), 2);
        });
    }

    #[test_traced]
    fn test_independent_ids() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let store = memory::Store::default();
            let publisher = mocks::Publisher::default();
            let collector =
                Collector::new(context.clone(), store, publisher.clone(), config(1));

            let a = CorrelationId::new(0, 1);
            let b = CorrelationId::new(0, 2);
            collector
                .on_partial_result(Prefixed::frame(&a, b"a"))
                .await
                .unwrap();
            collector
                .on_partial_result(Prefixed::frame(&b, b"b"))
                .await
                .unwrap();
            assert_eq!(
                publisher.published(),
                vec![crate::wire::encode(&a), crate::wire::encode(&b)]
            );
        });
    }

    #[test_traced]
    fn test_malformed_message_rejected() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let store = memory::Store::default();
            let publisher = mocks::Publisher::default();
            let collector =
                Collector::new(context.clone(), store.clone(), publisher.clone(), config(1));

            let result = collector
                .on_partial_result(Bytes::from_static(b"garbage"))
                .await;
            assert!(matches!(result, Err(Error::Extraction(_))));
            assert!(store.is_empty());
            assert!(publisher.published().is_empty());
        });
    }

    #[test_traced]
    fn test_publish_retried() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let store = memory::Store::default();
            let publisher = mocks::Publisher::failing(2);
            let collector =
                Collector::new(context.clone(), store, publisher.clone(), config(1));

            let id = CorrelationId::new(4, 4);
            let start = context.current();
            let progress = collector
                .on_partial_result(Prefixed::frame(&id, b"x"))
                .await
                .unwrap();
            assert_eq!(progress, Progress::Completed);
            assert_eq!(publisher.attempts(), 3);
            assert_eq!(publisher.published(), vec![crate::wire::encode(&id)]);
            assert!(context.current().duration_since(start).unwrap() >= Duration::from_millis(3));
        });
    }

    #[test_traced]
    fn test_publish_out_of_retries() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let store = memory::Store::default();
            let publisher = mocks::Publisher::failing(usize::MAX);
            let collector =
                Collector::new(context.clone(), store.clone(), publisher.clone(), config(1));

            let id = CorrelationId::new(4, 5);
            let result = collector
                .on_partial_result(Prefixed::frame(&id, b"x"))
                .await;
            assert!(matches!(
                result,
                Err(Error::OutOfRetries { attempts: 4, .. })
            ));
            assert_eq!(publisher.attempts(), 4);

            // The partial result is still durable for a poller reading the store directly
            assert_eq!(store.count(&id).await.unwrap(), 1);
        });
    }

    #[test_traced]
    fn test_publish_fatal() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let store = memory::Store::default();
            let publisher = mocks::Publisher::fatal();
            let collector =
                Collector::new(context.clone(), store, publisher.clone(), config(1));

            let id = CorrelationId::new(4, 6);
            let result = collector
                .on_partial_result(Prefixed::frame(&id, b"x"))
                .await;
            assert!(matches!(result, Err(Error::Fatal(_))));
            assert_eq!(publisher.attempts(), 1);
        });
    }

    #[test_traced]
    fn test_redelivery_after_failed_publish() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let store = memory::Store::default();
            let cfg = config(1);
            let publisher = mocks::Publisher::failing(cfg.retry.max_retries + 1);
            let collector =
                Collector::new(context.clone(), store.clone(), publisher.clone(), cfg);

            let id = CorrelationId::new(4, 8);
            let first = collector
                .on_partial_result(Prefixed::frame(&id, b"x"))
                .await;
            assert!(matches!(first, Err(Error::OutOfRetries { .. })));
            assert!(publisher.published().is_empty());

            // The transport redelivers: publish without storing a second copy
            let second = collector
                .on_partial_result(Prefixed::frame(&id, b"x"))
                .await
                .unwrap();
            assert_eq!(second, Progress::Completed);
            assert_eq!(publisher.published(), vec![crate::wire::encode(&id)]);
            assert_eq!(store.count(&id).await.unwrap(), 1);

            // Once signaled, further deliveries are discarded
            let third = collector
                .on_partial_result(Prefixed::frame(&id, b"x"))
                .await
                .unwrap();
            assert_eq!(third, Progress::Surplus);
            assert_eq!(publisher.published().len(), 1);
            assert_eq!(store.drain(&id).await.unwrap(), vec![Bytes::from_static(b"x")]);
        });
    }

    #[test_traced]
    fn test_late_partial_after_drain() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let store = memory::Store::default();
            let publisher = mocks::Publisher::default();
            let collector =
                Collector::new(context.clone(), store.clone(), publisher.clone(), config(2));

            let id = CorrelationId::new(4, 9);
            for payload in [&b"a"[..], &b"b"[..]] {
                collector
                    .on_partial_result(Prefixed::frame(&id, payload))
                    .await
                    .unwrap();
            }
            assert_eq!(store.drain(&id).await.unwrap().len(), 2);

            // A straggler neither restarts the count nor signals twice
            for payload in [&b"a"[..], &b"c"[..]] {
                let progress = collector
                    .on_partial_result(Prefixed::frame(&id, payload))
                    .await
                    .unwrap();
                assert_eq!(progress, Progress::Surplus);
            }
            assert_eq!(publisher.published(), vec![crate::wire::encode(&id)]);
            assert!(store.is_empty());
        });
    }

    #[test_traced]
    fn test_store_failure() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let publisher = mocks::Publisher::default();
            let collector = Collector::new(
                context.clone(),
                mocks::Failing,
                publisher.clone(),
                config(1),
            );

            let id = CorrelationId::new(4, 7);
            let result = collector
                .on_partial_result(Prefixed::frame(&id, b"x"))
                .await;
            assert!(matches!(result, Err(Error::Store(_))));
            assert!(publisher.published().is_empty());
        });
    }
}
