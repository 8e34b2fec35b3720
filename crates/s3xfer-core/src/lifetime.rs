//! Release tracking for clients and meta-requests.
//!
//! An owner's teardown runs when its release count reaches zero, not when
//! some particular handle is dropped: every holder of a resource keeps a
//! [`ReleaseGuard`], and the last guard dropped runs the owner's callback.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

type OnZero = Box<dyn FnOnce() + Send>;

struct TrackerInner {
    name: &'static str,
    count: AtomicUsize,
    on_zero: Mutex<Option<OnZero>>,
}

/// Counts outstanding holders of an owner's resources.
#[derive(Clone)]
pub(crate) struct ReleaseTracker {
    inner: Arc<TrackerInner>,
}

impl ReleaseTracker {
    /// New tracker with one holder, returned as the first guard.
    pub(crate) fn new(
        name: &'static str,
        on_zero: impl FnOnce() + Send + 'static,
    ) -> (Self, ReleaseGuard) {
        let inner = Arc::new(TrackerInner {
            name,
            count: AtomicUsize::new(1),
            on_zero: Mutex::new(Some(Box::new(on_zero))),
        });
        let guard = ReleaseGuard {
            inner: Arc::clone(&inner),
        };
        (Self { inner }, guard)
    }

    /// Register another holder. Fails once the count already reached zero;
    /// a released owner cannot be revived.
    pub(crate) fn acquire(&self) -> Option<ReleaseGuard> {
        let mut current = self.inner.count.load(Ordering::Acquire);
        loop {
            if current == 0 {
                return None;
            }
            match self.inner.count.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Some(ReleaseGuard {
                        inner: Arc::clone(&self.inner),
                    })
                }
                Err(actual) => current = actual,
            }
        }
    }

    pub(crate) fn count(&self) -> usize {
        self.inner.count.load(Ordering::Acquire)
    }
}

impl fmt::Debug for ReleaseTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReleaseTracker")
            .field("name", &self.inner.name)
            .field("count", &self.count())
            .finish()
    }
}

/// One holder's share. Dropping the last guard runs the release callback.
pub(crate) struct ReleaseGuard {
    inner: Arc<TrackerInner>,
}

impl fmt::Debug for ReleaseGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReleaseGuard")
            .field("name", &self.inner.name)
            .finish()
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        if self.inner.count.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        let on_zero = self
            .inner
            .on_zero
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(f) = on_zero {
            tracing::trace!(owner = self.inner.name, "last holder released");
            f();
        }
    }
}
