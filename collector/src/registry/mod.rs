//! Track completed computations until someone claims them.
//!
//! # Overview
//!
//! The [Registry] listens on the ready channel. Each decoded notification becomes a ready entry
//! stamped with its arrival time, held by the [Tracker] until a caller [claims](Tracker::claim)
//! it. Claiming removes the entry and drains the partial results from the [crate::Store] in one
//! step: of any number of concurrent claimants, exactly one receives the results.
//!
//! # Expiry
//!
//! Requesters may crash or give up, leaving completed results nobody will claim. While running,
//! the registry sweeps every TTL, deleting the store rows of entries older than the TTL. An entry
//! is only forgotten after its rows are deleted, so a store failure during the sweep is logged and
//! retried on the next cycle rather than leaking the rows.
//!
//! Claimed and expired ids are remembered for one more TTL, so late duplicate notifications are
//! ignored. After that, their seals are [forgotten](crate::Store::forget) in the store.

use std::time::Duration;

mod engine;
pub use engine::Registry;
mod metrics;
mod tracker;
pub use tracker::Tracker;

/// Configuration for the [Registry].
#[derive(Clone, Copy, Debug)]
pub struct Config {
    /// How long an unclaimed entry is retained. Also the sweep period.
    pub ttl: Duration,

    /// Retry policy for receiving ready notifications.
    pub retry: crate::retry::Config,
}
