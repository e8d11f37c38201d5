//! Retry fallible operations with exponential backoff.
//!
//! [execute] carries no state between calls: every call site gets an independent retry budget,
//! so it can be used concurrently from anywhere.

use commonware_macros::select;
use commonware_runtime::Clock;
use std::{error::Error as StdError, fmt::Debug, future::Future, time::Duration};
use thiserror::Error;
use tracing::debug;

/// Configuration for [execute].
#[derive(Clone, Copy, Debug)]
pub struct Config {
    /// Number of attempts allowed after the first one fails.
    pub max_retries: usize,

    /// Delay before the first retry. Each subsequent delay doubles.
    pub initial_delay: Duration,
}

/// Reasons [execute] gives up.
#[derive(Error, Debug)]
pub enum Error<E> {
    #[error("fatal failure: {0}")]
    Fatal(E),
    #[error("out of retries after {attempts} attempts: {source}")]
    OutOfRetries { attempts: usize, source: E },
    #[error("canceled")]
    Canceled,
}

impl<E: StdError + Send + Sync + 'static> From<Error<E>> for crate::Error {
    fn from(err: Error<E>) -> Self {
        match err {
            Error::Fatal(err) => crate::Error::Fatal(Box::new(err)),
            Error::OutOfRetries { attempts, source } => crate::Error::OutOfRetries {
                attempts,
                source: Box::new(source),
            },
            Error::Canceled => crate::Error::Canceled,
        }
    }
}

/// Run `operation` until it succeeds, fails with an error `is_fatal` accepts, or exhausts
/// `config.max_retries`.
///
/// Between attempts, sleeps for the current delay (starting at `config.initial_delay` and
/// doubling after each retry). If `cancel` resolves during a sleep, returns [Error::Canceled]
/// without attempting again.
pub async fn execute<E, C, T, R, F, Fut, P>(
    context: &E,
    config: &Config,
    cancel: &mut C,
    is_fatal: P,
    mut operation: F,
) -> Result<T, Error<R>>
where
    E: Clock,
    C: Future + Unpin,
    R: Debug,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, R>>,
    P: Fn(&R) -> bool,
{
    let mut delay = config.initial_delay;
    let mut remaining = config.max_retries;
    let mut attempts = 0;
    loop {
        attempts += 1;
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        if is_fatal(&err) {
            debug!(?err, attempts, "fatal failure");
            return Err(Error::Fatal(err));
        }
        if remaining == 0 {
            debug!(?err, attempts, "out of retries");
            return Err(Error::OutOfRetries {
                attempts,
                source: err,
            });
        }
        remaining -= 1;
        debug!(?err, attempts, ?delay, "retrying after transient failure");

        select! {
            _ = cancel => {
                return Err(Error::Canceled);
            },
            _ = context.sleep(delay) => {},
        };
        delay = delay.saturating_mul(2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commonware_macros::test_traced;
    use commonware_runtime::{deterministic, Metrics, Runner, Spawner};
    use futures::{channel::oneshot, future::pending};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Error, Debug, PartialEq)]
    enum Failure {
        #[error("transient")]
        Transient,
        #[error("fatal")]
        Fatal,
    }

    const CONFIG: Config = Config {
        max_retries: 3,
        initial_delay: Duration::from_millis(1),
    };

    fn is_fatal(err: &Failure) -> bool {
        *err == Failure::Fatal
    }

    #[test_traced]
    fn test_succeeds_after_transient_failures() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let calls = AtomicUsize::new(0);
            let result = execute(&context, &CONFIG, &mut pending::<()>(), is_fatal, || {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if call < 2 {
                        Err(Failure::Transient)
                    } else {
                        Ok(call)
                    }
                }
            })
            .await;
            assert_eq!(result.unwrap(), 2);
            assert_eq!(calls.load(Ordering::SeqCst), 3);
        });
    }

    #[test_traced]
    fn test_out_of_retries() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let calls = AtomicUsize::new(0);
            let start = context.current();
            let result: Result<(), _> =
                execute(&context, &CONFIG, &mut pending::<()>(), is_fatal, || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(Failure::Transient) }
                })
                .await;
            match result {
                Err(Error::OutOfRetries { attempts, source }) => {
                    assert_eq!(attempts, CONFIG.max_retries + 1);
                    assert_eq!(source, Failure::Transient);
                }
                other => panic!("unexpected result: {other:?}"),
            }
            assert_eq!(calls.load(Ordering::SeqCst), CONFIG.max_retries + 1);

            // Delays double: 1ms + 2ms + 4ms
            let elapsed = context.current().duration_since(start).unwrap();
            assert!(elapsed >= Duration::from_millis(7));
            assert!(elapsed < Duration::from_millis(20));
        });
    }

    #[test_traced]
    fn test_fatal_is_not_retried() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let calls = AtomicUsize::new(0);
            let result: Result<(), _> =
                execute(&context, &CONFIG, &mut pending::<()>(), is_fatal, || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(Failure::Fatal) }
                })
                .await;
            assert!(matches!(result, Err(Error::Fatal(Failure::Fatal))));
            assert_eq!(calls.load(Ordering::SeqCst), 1);
        });
    }

    #[test_traced]
    fn test_fatal_after_transient() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let calls = AtomicUsize::new(0);
            let result: Result<(), _> =
                execute(&context, &CONFIG, &mut pending::<()>(), is_fatal, || {
                    let call = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if call == 0 {
                            Err(Failure::Transient)
                        } else {
                            Err(Failure::Fatal)
                        }
                    }
                })
                .await;
            assert!(matches!(result, Err(Error::Fatal(Failure::Fatal))));
            assert_eq!(calls.load(Ordering::SeqCst), 2);
        });
    }

    #[test_traced]
    fn test_canceled_during_backoff() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let (cancel, mut canceled) = oneshot::channel::<()>();
            context.with_label("canceler").spawn(|context| async move {
                context.sleep(Duration::from_millis(50)).await;
                let _ = cancel.send(());
            });

            let start = context.current();
            let calls = AtomicUsize::new(0);
            let config = Config {
                max_retries: 10,
                initial_delay: Duration::from_secs(1),
            };
            let result: Result<(), _> = execute(&context, &config, &mut canceled, is_fatal, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(Failure::Transient) }
            })
            .await;
            assert!(matches!(result, Err(Error::Canceled)));
            assert_eq!(calls.load(Ordering::SeqCst), 1);
            let elapsed = context.current().duration_since(start).unwrap();
            assert!(elapsed >= Duration::from_millis(50));
            assert!(elapsed < Duration::from_secs(1));
        });
    }

    #[test_traced]
    fn test_independent_budgets() {
        let executor = deterministic::Runner::default();
        executor.start(|context| async move {
            let mut handles = Vec::new();
            for i in 0..4 {
                handles.push(context.with_label(&format!("caller_{i}")).spawn(
                    |context| async move {
                        let calls = AtomicUsize::new(0);
                        let result: Result<(), _> =
                            execute(&context, &CONFIG, &mut pending::<()>(), is_fatal, || {
                                calls.fetch_add(1, Ordering::SeqCst);
                                async { Err(Failure::Transient) }
                            })
                            .await;
                        assert!(matches!(result, Err(Error::OutOfRetries { .. })));
                        calls.load(Ordering::SeqCst)
                    },
                ));
            }
            for handle in handles {
                assert_eq!(handle.await.unwrap(), CONFIG.max_retries + 1);
            }
        });
    }
}
