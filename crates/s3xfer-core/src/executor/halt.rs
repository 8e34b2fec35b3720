//! Halt token shared between a meta-request and its part tasks.

use std::sync::Arc;
use tokio::sync::watch;

/// Once set, no further exchange attempts start. Exchanges already on the
/// wire are left to finish.
#[derive(Debug, Clone)]
pub(crate) struct HaltToken {
    tx: Arc<watch::Sender<bool>>,
}

impl HaltToken {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Set the token. Returns true if it was not set before.
    pub(crate) fn halt(&self) -> bool {
        !self.tx.send_replace(true)
    }

    pub(crate) fn is_halted(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the token is set.
    pub(crate) async fn halted(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|halted| *halted).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn halt_wakes_waiters_once() {
        let token = HaltToken::new();
        assert!(!token.is_halted());
        let waiter = tokio::spawn({
            let token = token.clone();
            async move { token.halted().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(token.halt());
        assert!(!token.halt());
        tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
        // Already set: returns immediately.
        token.halted().await;
    }
}
