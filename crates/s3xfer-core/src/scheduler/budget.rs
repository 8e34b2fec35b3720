//! Client-wide admission gate for in-flight parts.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Counting gate bounding parts in flight across all meta-requests of a
/// client. Waiters are admitted in FIFO order.
#[derive(Debug)]
pub struct AdmissionGate {
    capacity: usize,
    semaphore: Arc<Semaphore>,
}

impl AdmissionGate {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            semaphore: Arc::new(Semaphore::new(capacity)),
        }
    }

    /// Wait for a free slot. None once the gate is closed.
    pub async fn admit(&self) -> Option<AdmissionPermit> {
        Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .ok()
            .map(|permit| AdmissionPermit { _permit: permit })
    }

    /// Take a slot only if one is free right now.
    #[cfg(test)]
    pub(crate) fn try_admit(&self) -> Option<AdmissionPermit> {
        Arc::clone(&self.semaphore)
            .try_acquire_owned()
            .ok()
            .map(|permit| AdmissionPermit { _permit: permit })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently held by admitted parts.
    pub fn in_use(&self) -> usize {
        self.capacity.saturating_sub(self.available())
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Refuse further admissions; pending waiters get None.
    pub fn close(&self) {
        self.semaphore.close();
    }
}

/// One admitted part. The slot returns to the gate when this is dropped.
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
}
