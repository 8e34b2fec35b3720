//! Meta-request lifecycle states.

use std::fmt;
use std::sync::{Mutex, PoisonError};

/// How a finished meta-request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failed,
}

/// Lifecycle of one meta-request.
///
/// `Initiated → (MultipartSetup) → PartsInFlight → (MultipartCompletion) →
/// Finished → Released`. Failure may jump to `Finished(Failed)` from any
/// earlier state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaRequestState {
    Initiated,
    /// Waiting on the initiate-multipart-upload exchange.
    MultipartSetup,
    PartsInFlight,
    /// Waiting on the complete- or abort-multipart-upload exchange.
    MultipartCompletion,
    Finished(Outcome),
    /// Handle dropped and every held resource released.
    Released,
}

impl MetaRequestState {
    pub fn is_finished(self) -> bool {
        matches!(self, MetaRequestState::Finished(_) | MetaRequestState::Released)
    }

    /// Whether `self → next` is a legal transition.
    pub fn can_advance_to(self, next: MetaRequestState) -> bool {
        use MetaRequestState::*;
        match (self, next) {
            (Initiated, MultipartSetup | PartsInFlight | Finished(_)) => true,
            (MultipartSetup, PartsInFlight | MultipartCompletion | Finished(_)) => true,
            (PartsInFlight, MultipartCompletion | Finished(_)) => true,
            (MultipartCompletion, Finished(_)) => true,
            (Finished(_), Released) => true,
            _ => false,
        }
    }
}

impl fmt::Display for MetaRequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetaRequestState::Initiated => write!(f, "initiated"),
            MetaRequestState::MultipartSetup => write!(f, "multipart_setup"),
            MetaRequestState::PartsInFlight => write!(f, "parts_in_flight"),
            MetaRequestState::MultipartCompletion => write!(f, "multipart_completion"),
            MetaRequestState::Finished(Outcome::Success) => write!(f, "finished_success"),
            MetaRequestState::Finished(Outcome::Failed) => write!(f, "finished_failed"),
            MetaRequestState::Released => write!(f, "released"),
        }
    }
}

/// Shared, validated state slot. Written by the driver, read by handles.
#[derive(Debug)]
pub(crate) struct StateCell {
    id: u64,
    state: Mutex<MetaRequestState>,
}

impl StateCell {
    pub(crate) fn new(id: u64) -> Self {
        Self {
            id,
            state: Mutex::new(MetaRequestState::Initiated),
        }
    }

    pub(crate) fn get(&self) -> MetaRequestState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move to `next` if legal. Same-state moves are no-ops.
    pub(crate) fn advance(&self, next: MetaRequestState) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let current = *state;
        if current == next {
            return true;
        }
        if !current.can_advance_to(next) {
            tracing::warn!(id = self.id, from = %current, to = %next, "illegal meta request transition");
            return false;
        }
        *state = next;
        tracing::debug!(id = self.id, from = %current, to = %next, "meta request state");
        true
    }

    /// Mark released. Released is terminal, so this ignores the transition table
    /// when the driver never reached `Finished`.
    pub(crate) fn release(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !state.is_finished() {
            tracing::warn!(id = self.id, from = %*state, "meta request released before finishing");
        }
        *state = MetaRequestState::Released;
    }
}
