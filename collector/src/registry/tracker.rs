use super::metrics::Metrics;
use crate::{wire, CorrelationId, Error, Store};
use bytes::Bytes;
use commonware_runtime::{Clock, Metrics as RuntimeMetrics};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, SystemTime},
};
use tracing::{debug, warn};

/// A completion that has been signaled but not yet claimed.
struct Entry {
    arrived: SystemTime,

    // Set while the sweep deletes the store rows, so the entry can neither be claimed nor
    // forgotten before the deletion succeeds.
    sweeping: bool,
}

#[derive(Default)]
struct State {
    entries: HashMap<CorrelationId, Entry>,

    // Ids claimed or expired, with when that happened. Their store seals are forgotten one TTL
    // later, and notifications for them are ignored until then.
    retired: HashMap<CorrelationId, SystemTime>,
}

/// Shared view of the ready entries held by a [super::Registry].
///
/// Clones operate on the same entries.
#[derive(Clone)]
pub struct Tracker<E: Clock + RuntimeMetrics, S: Store> {
    context: E,
    store: S,
    ttl: Duration,
    state: Arc<Mutex<State>>,

    metrics: Metrics,
}

impl<E: Clock + RuntimeMetrics, S: Store> Tracker<E, S> {
    pub(super) fn new(context: E, store: S, ttl: Duration) -> Self {
        let metrics = Metrics::init(&context);
        Self {
            context,
            store,
            ttl,
            state: Arc::default(),
            metrics,
        }
    }

    /// Record that `id` is ready to be claimed.
    ///
    /// The first notification wins: repeated notifications for an id that is already pending,
    /// or was claimed or expired within the last TTL, are ignored. Returns whether a new entry
    /// was recorded.
    pub fn notify_ready(&self, id: CorrelationId) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.entries.contains_key(&id) || state.retired.contains_key(&id) {
            debug!(?id, "ignoring duplicate ready notification");
            return false;
        }
        state.entries.insert(
            id,
            Entry {
                arrived: self.context.current(),
                sweeping: false,
            },
        );
        self.metrics.pending.set(state.entries.len() as i64);
        debug!(?id, "result ready");
        true
    }

    /// Decode a notification received from the ready channel and record it.
    pub fn on_notification(&self, notification: Bytes) -> Result<CorrelationId, Error> {
        let id = wire::decode(notification).inspect_err(|err| {
            self.metrics.malformed.inc();
            warn!(?err, "dropping malformed notification");
        })?;
        self.notify_ready(id);
        Ok(id)
    }

    /// Claim the completed result for `id`, if it is ready.
    ///
    /// At most one caller ever receives the partial results of a given id. On success the
    /// partial results are drained from the store and returned in arrival order.
    pub async fn claim(&self, id: &CorrelationId) -> Result<Option<Vec<Bytes>>, Error> {
        // Take ownership of the entry
        let arrived = {
            let mut state = self.state.lock().unwrap();
            match state.entries.get(id) {
                Some(entry) if !entry.sweeping => {
                    let arrived = entry.arrived;
                    state.entries.remove(id);
                    self.metrics.pending.set(state.entries.len() as i64);
                    arrived
                }
                _ => return Ok(None),
            }
        };

        // Drain, restoring the entry if the store is unavailable
        let result = self.store.drain(id).await;
        let mut state = self.state.lock().unwrap();
        let partials = match result {
            Ok(partials) => partials,
            Err(err) => {
                warn!(?id, ?err, "failed to drain claimed result");
                state.entries.entry(*id).or_insert(Entry {
                    arrived,
                    sweeping: false,
                });
                self.metrics.pending.set(state.entries.len() as i64);
                return Err(Error::store(err));
            }
        };
        state.retired.insert(*id, self.context.current());
        if partials.is_empty() {
            debug!(?id, "ready entry had no partial results");
            return Ok(None);
        }
        self.metrics.claimed.inc();
        debug!(?id, count = partials.len(), "claimed result");
        Ok(Some(partials))
    }

    /// Remove ready entries older than the TTL, deleting their partial results.
    ///
    /// An entry is only forgotten once its store rows are deleted. If deletion fails, the entry
    /// is kept and retried on the next sweep. Ids claimed or expired more than a TTL ago have
    /// their store seals forgotten. Returns the number of ready entries removed.
    pub async fn sweep(&self) -> usize {
        let now = self.context.current();
        let (expired, stale) = {
            let mut state = self.state.lock().unwrap();
            let expired: Vec<CorrelationId> = state
                .entries
                .iter_mut()
                .filter_map(|(id, entry)| {
                    if entry.sweeping || !self.older_than_ttl(now, entry.arrived) {
                        return None;
                    }
                    entry.sweeping = true;
                    Some(*id)
                })
                .collect();
            let stale: Vec<CorrelationId> = state
                .retired
                .iter()
                .filter(|(_, retired)| self.older_than_ttl(now, **retired))
                .map(|(id, _)| *id)
                .collect();
            (expired, stale)
        };

        let mut removed = 0;
        for id in expired {
            let result = self.store.delete(&id).await;
            let mut state = self.state.lock().unwrap();
            match result {
                Ok(()) => {
                    state.entries.remove(&id);
                    state.retired.insert(id, self.context.current());
                    removed += 1;
                    self.metrics.expired.inc();
                    debug!(?id, "expired unclaimed result");
                }
                Err(err) => {
                    if let Some(entry) = state.entries.get_mut(&id) {
                        entry.sweeping = false;
                    }
                    warn!(?id, ?err, "failed to delete expired result");
                }
            }
            self.metrics.pending.set(state.entries.len() as i64);
        }

        for id in stale {
            match self.store.forget(&id).await {
                Ok(()) => {
                    self.state.lock().unwrap().retired.remove(&id);
                    debug!(?id, "forgot retired result");
                }
                Err(err) => warn!(?id, ?err, "failed to forget retired result"),
            }
        }
        removed
    }

    fn older_than_ttl(&self, now: SystemTime, since: SystemTime) -> bool {
        now.duration_since(since).is_ok_and(|age| age > self.ttl)
    }

    /// When the ready notification for `id` arrived, if it is pending.
    pub fn arrived(&self, id: &CorrelationId) -> Option<SystemTime> {
        let state = self.state.lock().unwrap();
        state.entries.get(id).map(|entry| entry.arrived)
    }

    /// Number of ready entries not yet claimed or expired.
    pub fn pending(&self) -> usize {
        self.state.lock().unwrap().entries.len()
    }

    /// Number of claimed or expired ids whose store seals are not yet forgotten.
    pub fn retired(&self) -> usize {
        self.state.lock().unwrap().retired.len()
    }
}
