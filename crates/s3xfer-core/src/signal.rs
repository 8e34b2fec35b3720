//! One-shot signals: the completion future and the shutdown event.
//!
//! Both sit on a `tokio::sync::watch` slot that starts empty and is filled at
//! most once, so any number of handles can await or poll the same outcome.

use std::time::Duration;
use tokio::sync::watch;

use crate::error::TransferError;
use crate::meta_request::TransferResult;

/// Sending half of a one-shot signal. `fire` only takes effect the first time.
#[derive(Debug)]
pub(crate) struct Signal<T> {
    tx: watch::Sender<Option<T>>,
}

impl<T> Signal<T> {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Store `value` unless already fired. Returns true if this call fired.
    pub(crate) fn fire(&self, value: T) -> bool {
        let mut fired = false;
        self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(value);
            fired = true;
            true
        });
        fired
    }

    pub(crate) fn is_set(&self) -> bool {
        self.tx.borrow().is_some()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Option<T>> {
        self.tx.subscribe()
    }
}

pub(crate) type CompletionSignal = Signal<Result<TransferResult, TransferError>>;
pub(crate) type ShutdownSignal = Signal<()>;

impl CompletionSignal {
    pub(crate) fn future(&self) -> CompletionFuture {
        CompletionFuture {
            rx: self.subscribe(),
        }
    }
}

impl ShutdownSignal {
    pub(crate) fn event(&self) -> ShutdownEvent {
        ShutdownEvent {
            rx: self.subscribe(),
        }
    }
}

/// Resolves once with the meta-request's final result.
#[derive(Debug, Clone)]
pub struct CompletionFuture {
    rx: watch::Receiver<Option<Result<TransferResult, TransferError>>>,
}

impl CompletionFuture {
    /// Wait for the final result.
    pub async fn wait(&self) -> Result<TransferResult, TransferError> {
        let mut rx = self.rx.clone();
        let out = match rx.wait_for(Option::is_some).await {
            Ok(slot) => match slot.as_ref() {
                Some(result) => result.clone(),
                None => Err(unresolved()),
            },
            Err(_) => Err(unresolved()),
        };
        out
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`, returning None.
    pub async fn wait_timeout(
        &self,
        timeout: Duration,
    ) -> Option<Result<TransferResult, TransferError>> {
        tokio::time::timeout(timeout, self.wait()).await.ok()
    }

    /// The result if already resolved.
    pub fn try_result(&self) -> Option<Result<TransferResult, TransferError>> {
        self.rx.borrow().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.rx.borrow().is_some()
    }
}

fn unresolved() -> TransferError {
    TransferError::Internal("meta request dropped without resolving".into())
}

/// Fires once, after every resource tied to its owner was released.
#[derive(Debug, Clone)]
pub struct ShutdownEvent {
    rx: watch::Receiver<Option<()>>,
}

impl ShutdownEvent {
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        // A dropped sender without firing cannot happen while the owner is
        // tracked; treat it as released.
        let _ = rx.wait_for(Option::is_some).await;
    }

    /// Returns true if the event fired within `timeout`.
    pub async fn wait_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait()).await.is_ok() && self.is_set()
    }

    pub fn is_set(&self) -> bool {
        self.rx.borrow().is_some()
    }
}
