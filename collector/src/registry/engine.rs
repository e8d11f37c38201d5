use super::{Config, Tracker};
use crate::{retry, Error, Store, Subscriber};
use commonware_macros::select;
use commonware_runtime::{Clock, Handle, Metrics, Spawner};
use futures::{future::pending, lock::Mutex};
use std::{sync::Arc, time::Duration};
use tracing::{debug, error, warn};

/// Owns the ready entries and the background loop that feeds and sweeps them.
pub struct Registry<E: Clock + Spawner + Metrics, S: Store> {
    context: E,
    tracker: Tracker<E, S>,
    ttl: Duration,
    retry: retry::Config,

    handle: Option<Handle<()>>,
}

impl<E: Clock + Spawner + Metrics, S: Store> Registry<E, S> {
    /// Create a new, stopped [Registry].
    pub fn new(context: E, store: S, cfg: Config) -> Self {
        let tracker = Tracker::new(context.clone(), store, cfg.ttl);
        Self {
            context,
            tracker,
            ttl: cfg.ttl,
            retry: cfg.retry,
            handle: None,
        }
    }

    /// Returns a [Tracker] for notifying and claiming results.
    pub fn tracker(&self) -> Tracker<E, S> {
        self.tracker.clone()
    }

    /// Start consuming ready notifications from `subscriber` and sweeping expired entries every
    /// TTL.
    ///
    /// Transient receive failures are retried with backoff. If `subscriber` fails fatally, the
    /// loop keeps sweeping but no longer records notifications.
    ///
    /// Returns [Error::AlreadyStarted] if the registry is running.
    pub fn start<R: Subscriber>(&mut self, subscriber: R) -> Result<(), Error> {
        if self.handle.is_some() {
            return Err(Error::AlreadyStarted);
        }
        let tracker = self.tracker.clone();
        let (ttl, retry) = (self.ttl, self.retry);
        self.handle = Some(
            self.context
                .with_label("sweeper")
                .spawn(move |context| run(context, tracker, ttl, retry, subscriber)),
        );
        Ok(())
    }

    /// Stop the background loop, if running.
    ///
    /// Pending entries are kept and can still be claimed through the [Tracker].
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            debug!("registry stopped");
        }
    }

    /// Whether the background loop is running.
    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}

impl<E: Clock + Spawner + Metrics, S: Store> Drop for Registry<E, S> {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run<E, F, S, R>(
    context: E,
    tracker: Tracker<F, S>,
    ttl: Duration,
    retry: retry::Config,
    subscriber: R,
) where
    E: Clock,
    F: Clock + Metrics,
    S: Store,
    R: Subscriber,
{
    let subscriber = Arc::new(Mutex::new(subscriber));
    let mut never = pending::<()>();
    let mut next_sweep = context.current() + ttl;
    let mut subscribed = true;
    loop {
        if !subscribed {
            context.sleep_until(next_sweep).await;
            tracker.sweep().await;
            next_sweep = context.current() + ttl;
            continue;
        }

        select! {
            _ = context.sleep_until(next_sweep) => {
                tracker.sweep().await;
                next_sweep = context.current() + ttl;
            },
            notification = retry::execute(&context, &retry, &mut never, R::is_fatal, || {
                let subscriber = subscriber.clone();
                async move { subscriber.lock().await.recv().await }
            }) => {
                match notification {
                    Ok(notification) => {
                        // Malformed notifications are logged and dropped by the tracker
                        let _ = tracker.on_notification(notification);
                    }
                    Err(retry::Error::OutOfRetries { attempts, source }) => {
                        warn!(
                            attempts,
                            err = ?source,
                            "subscriber keeps failing, backing off again"
                        );
                    }
                    Err(err) => {
                        error!(?err, "subscriber failed, continuing to sweep");
                        subscribed = false;
                    }
                }
            },
        };
    }
}
