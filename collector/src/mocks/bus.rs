//! An in-process ready channel.

use bytes::Bytes;
use futures::{channel::mpsc, SinkExt, StreamExt};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors that can be returned by [Publisher].
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("transient failure")]
    Transient,
    #[error("fatal failure")]
    Fatal,
    #[error("channel closed")]
    Closed,
}

/// Errors that can be returned by [Subscriber].
#[derive(Debug, Error)]
pub enum SubscribeError {
    #[error("transient failure")]
    Transient,
    #[error("channel closed")]
    Closed,
}

#[derive(Debug, Default)]
struct State {
    attempts: usize,
    failures: usize,
    fatal: bool,
    published: Vec<Bytes>,
}

/// A [crate::Publisher] that records what it publishes and can be scripted to fail.
///
/// Clones share the same record.
#[derive(Clone, Debug, Default)]
pub struct Publisher {
    state: Arc<Mutex<State>>,
    sender: Option<mpsc::Sender<Bytes>>,
}

impl Publisher {
    /// Create a [Publisher] whose first `failures` attempts fail transiently.
    pub fn failing(failures: usize) -> Self {
        let publisher = Self::default();
        publisher.fail(failures);
        publisher
    }

    /// Create a [Publisher] that always fails fatally.
    pub fn fatal() -> Self {
        let publisher = Self::default();
        publisher.state.lock().unwrap().fatal = true;
        publisher
    }

    /// Make the next `failures` attempts fail transiently.
    pub fn fail(&self, failures: usize) {
        self.state.lock().unwrap().failures = failures;
    }

    /// Number of publish attempts, successful or not.
    pub fn attempts(&self) -> usize {
        self.state.lock().unwrap().attempts
    }

    /// Notifications published successfully, in order.
    pub fn published(&self) -> Vec<Bytes> {
        self.state.lock().unwrap().published.clone()
    }
}

impl crate::Publisher for Publisher {
    type Error = PublishError;

    async fn publish(&mut self, notification: Bytes) -> Result<(), PublishError> {
        {
            let mut state = self.state.lock().unwrap();
            state.attempts += 1;
            if state.fatal {
                return Err(PublishError::Fatal);
            }
            if state.failures > 0 {
                state.failures -= 1;
                return Err(PublishError::Transient);
            }
            state.published.push(notification.clone());
        }
        if let Some(sender) = &mut self.sender {
            sender
                .send(notification)
                .await
                .map_err(|_| PublishError::Closed)?;
        }
        Ok(())
    }

    fn is_fatal(error: &PublishError) -> bool {
        matches!(error, PublishError::Fatal | PublishError::Closed)
    }
}

/// A [crate::Subscriber] fed by a [Publisher].
#[derive(Debug)]
pub struct Subscriber {
    receiver: mpsc::Receiver<Bytes>,
    failures: usize,
}

impl Subscriber {
    /// Make the next `failures` receives fail transiently.
    pub fn with_failures(mut self, failures: usize) -> Self {
        self.failures = failures;
        self
    }
}

impl crate::Subscriber for Subscriber {
    type Error = SubscribeError;

    async fn recv(&mut self) -> Result<Bytes, SubscribeError> {
        if self.failures > 0 {
            self.failures -= 1;
            return Err(SubscribeError::Transient);
        }
        self.receiver.next().await.ok_or(SubscribeError::Closed)
    }

    fn is_fatal(error: &SubscribeError) -> bool {
        matches!(error, SubscribeError::Closed)
    }
}

/// Create a connected [Publisher] and [Subscriber] with room for `size` pending notifications.
pub fn channel(size: usize) -> (Publisher, Subscriber) {
    let (sender, receiver) = mpsc::channel(size);
    (
        Publisher {
            state: Arc::default(),
            sender: Some(sender),
        },
        Subscriber {
            receiver,
            failures: 0,
        },
    )
}
