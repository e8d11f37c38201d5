//! Stores that fail on demand.

use crate::{memory, Append, CorrelationId, Store};
use bytes::Bytes;
use futures::channel::oneshot;
use std::{
    convert::Infallible,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};
use thiserror::Error;

fn infallible<T>(result: Result<T, Infallible>) -> T {
    result.unwrap_or_else(|e| match e {})
}

/// Errors that can be returned by [Failing] and [Flaky].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable")]
    Unavailable,
}

/// A [Store] whose every operation fails.
#[derive(Clone, Copy, Debug, Default)]
pub struct Failing;

impl Store for Failing {
    type Error = StoreError;

    async fn append(
        &self,
        _id: CorrelationId,
        _partial: Bytes,
        _expected: usize,
    ) -> Result<Append, StoreError> {
        Err(StoreError::Unavailable)
    }

    async fn signaled(&self, _id: &CorrelationId) -> Result<(), StoreError> {
        Err(StoreError::Unavailable)
    }

    async fn count(&self, _id: &CorrelationId) -> Result<usize, StoreError> {
        Err(StoreError::Unavailable)
    }

    async fn drain(&self, _id: &CorrelationId) -> Result<Vec<Bytes>, StoreError> {
        Err(StoreError::Unavailable)
    }

    async fn delete(&self, _id: &CorrelationId) -> Result<(), StoreError> {
        Err(StoreError::Unavailable)
    }

    async fn forget(&self, _id: &CorrelationId) -> Result<(), StoreError> {
        Err(StoreError::Unavailable)
    }
}

/// A [memory::Store] whose next `drain` and `delete` calls can be made to fail.
#[derive(Clone, Default)]
pub struct Flaky {
    inner: memory::Store,
    drain_failures: Arc<AtomicUsize>,
    delete_failures: Arc<AtomicUsize>,
}

impl Flaky {
    /// Make the next `failures` calls to `drain` fail.
    pub fn fail_drains(&self, failures: usize) {
        self.drain_failures.store(failures, Ordering::SeqCst);
    }

    /// Make the next `failures` calls to `delete` fail.
    pub fn fail_deletes(&self, failures: usize) {
        self.delete_failures.store(failures, Ordering::SeqCst);
    }

    fn should_fail(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Store for Flaky {
    type Error = StoreError;

    async fn append(
        &self,
        id: CorrelationId,
        partial: Bytes,
        expected: usize,
    ) -> Result<Append, StoreError> {
        Ok(infallible(self.inner.append(id, partial, expected).await))
    }

    async fn signaled(&self, id: &CorrelationId) -> Result<(), StoreError> {
        infallible(self.inner.signaled(id).await);
        Ok(())
    }

    async fn count(&self, id: &CorrelationId) -> Result<usize, StoreError> {
        Ok(infallible(self.inner.count(id).await))
    }

    async fn drain(&self, id: &CorrelationId) -> Result<Vec<Bytes>, StoreError> {
        if Self::should_fail(&self.drain_failures) {
            return Err(StoreError::Unavailable);
        }
        Ok(infallible(self.inner.drain(id).await))
    }

    async fn delete(&self, id: &CorrelationId) -> Result<(), StoreError> {
        if Self::should_fail(&self.delete_failures) {
            return Err(StoreError::Unavailable);
        }
        infallible(self.inner.delete(id).await);
        Ok(())
    }

    async fn forget(&self, id: &CorrelationId) -> Result<(), StoreError> {
        infallible(self.inner.forget(id).await);
        Ok(())
    }
}

/// A [memory::Store] whose `delete` can be held open until released.
#[derive(Clone, Default)]
pub struct Gated {
    inner: memory::Store,
    gate: Arc<Mutex<Option<oneshot::Receiver<()>>>>,
}

impl Gated {
    /// Make the next `delete` wait until the returned sender fires or is dropped.
    pub fn hold_delete(&self) -> oneshot::Sender<()> {
        let (release, gate) = oneshot::channel();
        *self.gate.lock().unwrap() = Some(gate);
        release
    }
}

impl Store for Gated {
    type Error = Infallible;

    async fn append(
        &self,
        id: CorrelationId,
        partial: Bytes,
        expected: usize,
    ) -> Result<Append, Infallible> {
        self.inner.append(id, partial, expected).await
    }

    async fn signaled(&self, id: &CorrelationId) -> Result<(), Infallible> {
        self.inner.signaled(id).await
    }

    async fn count(&self, id: &CorrelationId) -> Result<usize, Infallible> {
        self.inner.count(id).await
    }

    async fn drain(&self, id: &CorrelationId) -> Result<Vec<Bytes>, Infallible> {
        self.inner.drain(id).await
    }

    async fn delete(&self, id: &CorrelationId) -> Result<(), Infallible> {
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        self.inner.delete(id).await
    }

    async fn forget(&self, id: &CorrelationId) -> Result<(), Infallible> {
        self.inner.forget(id).await
    }
}
