//! Assemble partial results from independent control components into completed answers.
//!
//! # Overview
//!
//! Control components each compute one share of a threshold computation and deliver it, tagged
//! with a [CorrelationId], over a message bus. This crate turns those asynchronously arriving
//! contributions into a single completed answer, handed out exactly once:
//!
//! - [ingest::Collector] appends each partial result to a [Store] and, when the last expected
//!   contribution lands, publishes a ready notification (see [wire]) through a [Publisher],
//!   hardened with [retry::execute].
//! - [registry::Registry] consumes ready notifications from a [Subscriber] and lets callers
//!   [claim](registry::Tracker::claim) a completed answer. Entries that nobody claims are swept
//!   after a TTL so memory stays bounded.
//! - [poller::Poller] is the pull-based alternative: it repeatedly tries to claim until the
//!   answer is available, a timeout elapses, or the caller cancels.
//!
//! # Completion
//!
//! [Store::append] returns the number of partial results held after the append, atomically, and
//! seals the id once the expected count is reached. Only the caller that observes exactly the
//! expected count publishes, so concurrent delivery of the final contributions yields a single
//! notification. Later deliveries for a sealed id are discarded, unless its notification was
//! never published, in which case the redelivery publishes it. The registry additionally ignores
//! duplicate notifications for ids it is tracking or has recently claimed.
//!
//! # Status
//!
//! `quorum-collector` is **ALPHA** software and is not yet recommended for production use.
//! Developers should expect breaking changes and occasional instability.

use bytes::Bytes;
use std::{error::Error as StdError, fmt::Debug, future::Future};
use thiserror::Error;

mod id;
pub use id::CorrelationId;
pub mod ingest;
pub mod memory;
pub mod poller;
pub mod registry;
pub mod retry;
pub mod wire;

#[cfg(any(test, feature = "mocks"))]
pub mod mocks;

/// Boxed error reported by a collaborator.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Errors that can occur while collecting and claiming partial results.
#[derive(Error, Debug)]
pub enum Error {
    #[error("malformed notification: {0} bytes")]
    MalformedNotification(usize),
    #[error("extraction failed: {0}")]
    Extraction(BoxError),
    #[error("store failed: {0}")]
    Store(BoxError),
    #[error("fatal failure: {0}")]
    Fatal(BoxError),
    #[error("out of retries after {attempts} attempts: {source}")]
    OutOfRetries { attempts: usize, source: BoxError },
    #[error("timeout")]
    Timeout,
    #[error("canceled")]
    Canceled,
    #[error("already started")]
    AlreadyStarted,
}

impl Error {
    pub(crate) fn store<E: StdError + Send + Sync + 'static>(err: E) -> Self {
        Self::Store(Box::new(err))
    }
}

/// Outcome of [Store::append].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Append {
    /// The partial result was stored and this many are now held for the id.
    Stored(usize),
    /// The id already holds every expected partial result. Nothing was stored.
    Sealed {
        /// Whether [Store::signaled] was recorded for the id.
        signaled: bool,
    },
}

/// Durable storage of partial results, keyed by [CorrelationId].
///
/// Partial results are returned in arrival order. Implementations must make [Store::append]
/// atomic with respect to the count it returns: for any id, exactly one caller observes each
/// count value.
///
/// The append that brings an id to its expected count seals it. A sealed id accepts no further
/// partial results, even after they were drained or deleted, until [Store::forget] is called.
pub trait Store: Clone + Send + Sync + 'static {
    /// Error that can occur when accessing the store.
    type Error: Debug + StdError + Send + Sync + 'static;

    /// Append `partial` to the results held for `id`, sealing `id` once `expected` are held.
    fn append(
        &self,
        id: CorrelationId,
        partial: Bytes,
        expected: usize,
    ) -> impl Future<Output = Result<Append, Self::Error>> + Send;

    /// Record that the ready notification for the sealed `id` was published.
    fn signaled(&self, id: &CorrelationId) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Return how many partial results are held for `id`.
    fn count(&self, id: &CorrelationId) -> impl Future<Output = Result<usize, Self::Error>> + Send;

    /// Remove and return all partial results held for `id`.
    fn drain(
        &self,
        id: &CorrelationId,
    ) -> impl Future<Output = Result<Vec<Bytes>, Self::Error>> + Send;

    /// Remove all partial results held for `id`.
    fn delete(&self, id: &CorrelationId) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Remove everything held for `id`, including its seal.
    fn forget(&self, id: &CorrelationId) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Sends ready notifications on the notification channel.
pub trait Publisher: Clone + Debug + Send + Sync + 'static {
    /// Error that can occur when publishing.
    type Error: Debug + StdError + Send + Sync + 'static;

    /// Publish an encoded notification.
    fn publish(
        &mut self,
        notification: Bytes,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Whether `error` can never succeed on retry.
    ///
    /// By default, every failure is considered transient.
    fn is_fatal(_error: &Self::Error) -> bool {
        false
    }
}

/// Receives ready notifications from the notification channel.
pub trait Subscriber: Debug + Send + 'static {
    /// Error that can occur when receiving.
    type Error: Debug + StdError + Send + Sync + 'static;

    /// Receive the next encoded notification.
    fn recv(&mut self) -> impl Future<Output = Result<Bytes, Self::Error>> + Send;

    /// Whether `error` means no further notifications can be received.
    ///
    /// By default, every failure is considered transient.
    fn is_fatal(_error: &Self::Error) -> bool {
        false
    }
}
