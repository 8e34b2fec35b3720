//! Driver task: the single writer of a meta-request's state.

use bytes::Bytes;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};

use super::state::{MetaRequestState, Outcome, StateCell};
use super::{BodyCallback, HeadersCallback, MetaRequestKind, MetaRequestOptions, TransferResult};
use crate::body::BodySource;
use crate::error::TransferError;
use crate::executor::{ExchangeResources, HaltToken};
use crate::http::{Endpoint, Headers, ResponseHead};
use crate::lifetime::ReleaseGuard;
use crate::planner::PartRange;
use crate::scheduler::{AdmissionGate, AdmissionPermit, ProgressStats};
use crate::signal::CompletionSignal;

/// What a finished part task reports back.
#[derive(Debug)]
pub(super) struct PartDone {
    pub head: ResponseHead,
    pub bytes: u64,
    pub attempts: u32,
}

pub(super) type PartJoin = (u32, Result<PartDone, TransferError>);

pub(crate) struct Driver {
    pub(super) id: u64,
    pub(super) kind: MetaRequestKind,
    pub(super) resources: ExchangeResources,
    pub(super) gate: Arc<AdmissionGate>,
    pub(super) endpoint: Endpoint,
    pub(super) path: String,
    pub(super) headers: Headers,
    pub(super) body: Option<Arc<dyn BodySource>>,
    pub(super) part_size: u64,
    /// Parts a GET may run ahead of the delivery position.
    pub(super) window: usize,
    pub(super) state: Arc<StateCell>,
    pub(super) halt: HaltToken,
    on_headers: Option<HeadersCallback>,
    on_body: Option<BodyCallback>,
    progress: Option<mpsc::Sender<ProgressStats>>,
    first_error: Option<TransferError>,
    headers_sent: bool,
    started: Instant,
    pub(super) delivered: u64,
    bytes_done: u64,
    parts_done: usize,
    pub(super) part_count: usize,
    pub(super) total_bytes: u64,
}

/// Client-side settings a driver is created with.
pub(crate) struct DriverSetup {
    pub id: u64,
    pub resources: ExchangeResources,
    pub gate: Arc<AdmissionGate>,
    pub endpoint: Endpoint,
    pub part_size: u64,
    pub window: usize,
    pub state: Arc<StateCell>,
    pub halt: HaltToken,
}

impl Driver {
    pub(crate) fn new(setup: DriverSetup, options: MetaRequestOptions) -> Self {
        Self {
            id: setup.id,
            kind: options.kind,
            resources: setup.resources,
            gate: setup.gate,
            endpoint: setup.endpoint,
            path: options.path,
            headers: options.headers,
            body: options.body,
            part_size: options.part_size.unwrap_or(setup.part_size).max(1),
            window: setup.window,
            state: setup.state,
            halt: setup.halt,
            on_headers: options.on_headers,
            on_body: options.on_body,
            progress: options.progress,
            first_error: None,
            headers_sent: false,
            started: Instant::now(),
            delivered: 0,
            bytes_done: 0,
            parts_done: 0,
            part_count: 1,
            total_bytes: 0,
        }
    }

    /// Drive the transfer to completion, resolve the completion signal, then
    /// release this task's hold on the meta-request.
    pub(crate) async fn run(mut self, completion: Arc<CompletionSignal>, guard: ReleaseGuard) {
        tracing::debug!(id = self.id, kind = %self.kind, path = %self.path, part_size = self.part_size, "meta request started");
        let result = match self.kind {
            MetaRequestKind::GetObject => self.run_get().await,
            MetaRequestKind::PutObject => self.run_put().await,
        };
        let elapsed = self.started.elapsed().as_secs_f64();
        match &result {
            Ok(r) => {
                self.state.advance(MetaRequestState::Finished(Outcome::Success));
                tracing::info!(
                    id = self.id,
                    kind = %self.kind,
                    status = r.status,
                    total_bytes = r.total_bytes,
                    parts = r.part_count,
                    elapsed_secs = elapsed,
                    "meta request finished"
                );
            }
            Err(e) => {
                self.state.advance(MetaRequestState::Finished(Outcome::Failed));
                tracing::info!(id = self.id, kind = %self.kind, error = %e, elapsed_secs = elapsed, "meta request failed");
            }
        }
        completion.fire(result);
        // Callbacks and channels go before the guard so nothing the caller
        // handed in outlives the shutdown event.
        drop(self);
        drop(guard);
    }

    /// Record a fatal error. Only the first one is kept; it halts admission
    /// and retries for every part.
    pub(super) fn fail(&mut self, error: TransferError) {
        if self.first_error.is_some() {
            tracing::debug!(id = self.id, error = %error, "discarding error after failure");
            return;
        }
        if !error.is_cancelled() {
            tracing::warn!(id = self.id, error = %error, "meta request failing");
        }
        self.first_error = Some(error);
        self.halt.halt();
    }

    /// Turn an external cancellation request into the recorded outcome.
    pub(super) fn observe_cancel(&mut self) {
        if self.halt.is_halted() && self.first_error.is_none() {
            self.first_error = Some(TransferError::Cancelled);
        }
    }

    pub(super) fn has_failed(&self) -> bool {
        self.first_error.is_some()
    }

    pub(super) fn take_error(&mut self) -> TransferError {
        self.observe_cancel();
        self.first_error
            .take()
            .unwrap_or_else(|| TransferError::Internal("failure without a recorded error".into()))
    }

    /// Fail if a part task panicked.
    pub(super) fn on_join_error(&mut self, e: JoinError) {
        self.fail(TransferError::Internal(format!("part task failed: {e}")));
    }

    /// Invoke `on_headers`, at most once.
    pub(super) fn deliver_headers(&mut self, status: u16, headers: &Headers) {
        if self.headers_sent || self.has_failed() {
            return;
        }
        self.headers_sent = true;
        if let Some(cb) = self.on_headers.as_mut() {
            if let Err(e) = cb(status, headers) {
                self.fail(TransferError::Callback(format!("on_headers: {e:#}")));
            }
        }
    }

    /// Invoke `on_body`. Nothing is delivered after a failure.
    pub(super) fn deliver_body(&mut self, offset: u64, data: &Bytes) {
        if self.has_failed() {
            return;
        }
        self.delivered += data.len() as u64;
        if let Some(cb) = self.on_body.as_mut() {
            if let Err(e) = cb(&data[..], offset) {
                self.fail(TransferError::Callback(format!("on_body at offset {offset}: {e:#}")));
            }
        }
    }

    pub(super) fn part_succeeded(&mut self, seq: u32, done: &PartDone) {
        self.parts_done += 1;
        self.bytes_done += done.bytes;
        tracing::debug!(
            id = self.id,
            seq,
            bytes = done.bytes,
            attempts = done.attempts,
            "part finished"
        );
        if let Some(tx) = &self.progress {
            let _ = tx.try_send(ProgressStats {
                bytes_done: self.bytes_done,
                total_bytes: self.total_bytes,
                elapsed_secs: self.started.elapsed().as_secs_f64(),
                parts_done: self.parts_done,
                part_count: self.part_count,
            });
        }
    }

    /// Wait for an admission slot unless halted first.
    pub(super) async fn admit(&mut self) -> Option<AdmissionPermit> {
        let gate = Arc::clone(&self.gate);
        let halt = self.halt.clone();
        tokio::select! {
            permit = gate.admit() => {
                if permit.is_none() {
                    self.fail(TransferError::Internal("admission gate closed".into()));
                }
                permit
            }
            _ = halt.halted() => None,
        }
    }

    /// Successful result unless a failure or cancellation was recorded.
    pub(super) fn finish(
        &mut self,
        status: u16,
        headers: Headers,
        total_bytes: u64,
    ) -> Result<TransferResult, TransferError> {
        self.observe_cancel();
        if self.has_failed() {
            return Err(self.take_error());
        }
        Ok(TransferResult {
            status,
            headers,
            total_bytes,
            part_count: self.part_count,
        })
    }

    pub(super) fn log_admitted(&self, seq: u32, range: Option<PartRange>) {
        tracing::debug!(
            id = self.id,
            seq,
            start = range.map(|r| r.start),
            end = range.map(|r| r.end),
            in_flight = self.gate.in_use(),
            "part admitted"
        );
    }
}

/// Spawn a part future that holds its admission slot until it finishes.
pub(super) fn spawn_part<F>(parts: &mut JoinSet<PartJoin>, permit: AdmissionPermit, seq: u32, fut: F)
where
    F: std::future::Future<Output = Result<PartDone, TransferError>> + Send + 'static,
{
    parts.spawn(async move {
        let outcome = fut.await;
        drop(permit);
        (seq, outcome)
    });
}

/// Read `range` of `body` on the blocking pool.
pub(super) async fn read_body_range(
    body: Arc<dyn BodySource>,
    range: PartRange,
) -> Result<Bytes, TransferError> {
    tokio::task::spawn_blocking(move || body.read_range(range.start, range.len()))
        .await
        .map_err(|e| TransferError::Internal(format!("body read task: {e}")))?
        .map_err(|e| {
            TransferError::BodySource(format!("read bytes {}..{}: {}", range.start, range.end, e))
        })
}
