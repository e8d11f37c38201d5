//! Wait for a completed result by polling.
//!
//! [Poller::wait] is the blocking alternative to reacting to ready notifications: it repeatedly
//! tries to claim the result from a [Source], pausing between attempts, until it succeeds, the
//! timeout elapses, or the caller cancels. Cancellation only takes effect while paused, so a
//! canceled wait never claims or deletes anything.

use crate::{registry::Tracker, CorrelationId, Error, Store};
use bytes::Bytes;
use commonware_macros::select;
use commonware_runtime::{Clock, Metrics};
use std::{future::Future, time::Duration};
use tracing::debug;

/// Something completed results can be claimed from.
pub trait Source: Clone + Send + Sync + 'static {
    /// Claim the completed result for `id`, if it is ready.
    ///
    /// At most one caller receives the partial results of a given id.
    fn claim(
        &self,
        id: &CorrelationId,
    ) -> impl Future<Output = Result<Option<Vec<Bytes>>, Error>> + Send;
}

impl<E: Clock + Metrics, S: Store> Source for Tracker<E, S> {
    async fn claim(&self, id: &CorrelationId) -> Result<Option<Vec<Bytes>>, Error> {
        Tracker::claim(self, id).await
    }
}

/// A [Source] that reads the [Store] directly, bypassing ready notifications.
///
/// Useful when the ready channel is unavailable: a lost notification never starves a poller
/// reading the store itself.
#[derive(Clone)]
pub struct Direct<S: Store> {
    store: S,
    expected: usize,
}

impl<S: Store> Direct<S> {
    /// Create a [Direct] source that considers `id` ready once `expected` partial results are held.
    pub fn new(store: S, expected: usize) -> Self {
        Self { store, expected }
    }
}

impl<S: Store> Source for Direct<S> {
    async fn claim(&self, id: &CorrelationId) -> Result<Option<Vec<Bytes>>, Error> {
        let count = self.store.count(id).await.map_err(Error::store)?;
        if count < self.expected {
            return Ok(None);
        }

        // A concurrent claimant may have drained first
        let partials = self.store.drain(id).await.map_err(Error::store)?;
        if partials.is_empty() {
            return Ok(None);
        }
        Ok(Some(partials))
    }
}

/// Polls a [Source] until a result is available.
#[derive(Clone)]
pub struct Poller<E: Clock, S: Source> {
    context: E,
    source: S,
}

impl<E: Clock, S: Source> Poller<E, S> {
    /// Create a new [Poller].
    pub fn new(context: E, source: S) -> Self {
        Self { context, source }
    }

    /// Wait for the completed result of `id`.
    ///
    /// Attempts a claim immediately and then after every `pause`, until the claim succeeds
    /// or `timeout` has elapsed. The final attempt happens at the deadline, so
    /// [Error::Timeout] is returned no earlier than `timeout` and no later than
    /// `timeout + pause`. If `cancel` resolves while waiting, returns [Error::Canceled].
    ///
    /// # Panics
    ///
    /// Panics if `pause` is zero.
    pub async fn wait<C: Future + Unpin>(
        &self,
        id: &CorrelationId,
        timeout: Duration,
        pause: Duration,
        cancel: &mut C,
    ) -> Result<Vec<Bytes>, Error> {
        assert!(!pause.is_zero(), "pause must be positive");
        let deadline = self.context.current() + timeout;
        let mut attempts = 0usize;
        loop {
            attempts += 1;
            if let Some(partials) = self.source.claim(id).await? {
                debug!(?id, attempts, "claimed result");
                return Ok(partials);
            }
            let now = self.context.current();
            if now >= deadline {
                debug!(?id, attempts, "timed out waiting for result");
                return Err(Error::Timeout);
            }

            let wake = (now + pause).min(deadline);
            select! {
                _ = cancel => {
                    debug!(?id, attempts, "canceled waiting for result");
                    return Err(Error::Canceled);
                },
                _ = self.context.sleep_until(wake) => {},
            };
        }
    }
}
