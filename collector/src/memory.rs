//! An in-memory [crate::Store].

use crate::{Append, CorrelationId};
use bytes::Bytes;
use std::{
    collections::HashMap,
    convert::Infallible,
    mem,
    sync::{Arc, Mutex},
};

#[derive(Default)]
struct Record {
    partials: Vec<Bytes>,
    sealed: bool,
    signaled: bool,
}

/// A [crate::Store] that keeps partial results in process memory.
///
/// Clones share the same underlying map. All operations take a single lock, so
/// [crate::Store::append] is atomic with the count it returns.
#[derive(Clone, Default)]
pub struct Store {
    records: Arc<Mutex<HashMap<CorrelationId, Record>>>,
}

impl Store {
    /// Number of correlation ids with at least one partial result.
    pub fn len(&self) -> usize {
        let records = self.records.lock().unwrap();
        records.values().filter(|r| !r.partials.is_empty()).count()
    }

    /// Whether no partial results are held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of sealed correlation ids not yet forgotten.
    pub fn sealed(&self) -> usize {
        let records = self.records.lock().unwrap();
        records.values().filter(|r| r.sealed).count()
    }

    fn clear(&self, id: &CorrelationId) -> Vec<Bytes> {
        let mut records = self.records.lock().unwrap();
        let Some(record) = records.get_mut(id) else {
            return Vec::new();
        };
        let partials = mem::take(&mut record.partials);
        if !record.sealed {
            records.remove(id);
        }
        partials
    }
}

impl crate::Store for Store {
    type Error = Infallible;

    async fn append(
        &self,
        id: CorrelationId,
        partial: Bytes,
        expected: usize,
    ) -> Result<Append, Self::Error> {
        let mut records = self.records.lock().unwrap();
        let record = records.entry(id).or_default();
        if record.sealed {
            return Ok(Append::Sealed {
                signaled: record.signaled,
            });
        }
        record.partials.push(partial);
        let count = record.partials.len();
        if count >= expected {
            record.sealed = true;
        }
        Ok(Append::Stored(count))
    }

    async fn signaled(&self, id: &CorrelationId) -> Result<(), Self::Error> {
        if let Some(record) = self.records.lock().unwrap().get_mut(id) {
            record.signaled = true;
        }
        Ok(())
    }

    async fn count(&self, id: &CorrelationId) -> Result<usize, Self::Error> {
        let records = self.records.lock().unwrap();
        Ok(records.get(id).map_or(0, |r| r.partials.len()))
    }

    async fn drain(&self, id: &CorrelationId) -> Result<Vec<Bytes>, Self::Error> {
        Ok(self.clear(id))
    }

    async fn delete(&self, id: &CorrelationId) -> Result<(), Self::Error> {
        self.clear(id);
        Ok(())
    }

    async fn forget(&self, id: &CorrelationId) -> Result<(), Self::Error> {
        self.records.lock().unwrap().remove(id);
        Ok(())
    }
}
