//! Meta-requests: one logical GET or PUT, split into parts as needed.
//!
//! A meta-request is driven by a single task (the driver) that owns all of
//! its mutable state: part admission, ordered body delivery, multipart
//! bookkeeping and the final result. Part tasks only report back to it.

mod delivery;
mod driver;
mod get;
mod put;
mod state;

pub use state::{MetaRequestState, Outcome};

pub(crate) use driver::{Driver, DriverSetup};
pub(crate) use state::StateCell;

use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::body::BodySource;
use crate::executor::HaltToken;
use crate::http::Headers;
use crate::lifetime::ReleaseGuard;
use crate::scheduler::ProgressStats;
use crate::signal::{CompletionFuture, ShutdownEvent};

/// Called once with the response status and headers.
pub type HeadersCallback = Box<dyn FnMut(u16, &Headers) -> anyhow::Result<()> + Send>;
/// Called per body chunk with the chunk's object offset, in ascending offset order.
pub type BodyCallback = Box<dyn FnMut(&[u8], u64) -> anyhow::Result<()> + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaRequestKind {
    GetObject,
    PutObject,
}

impl fmt::Display for MetaRequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetaRequestKind::GetObject => write!(f, "GET_OBJECT"),
            MetaRequestKind::PutObject => write!(f, "PUT_OBJECT"),
        }
    }
}

/// Final result of a successful meta-request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferResult {
    pub status: u16,
    /// Headers as delivered to `on_headers`.
    pub headers: Headers,
    /// Body bytes delivered (GET) or uploaded (PUT).
    pub total_bytes: u64,
    pub part_count: usize,
}

/// What to transfer and where results go.
pub struct MetaRequestOptions {
    pub(crate) kind: MetaRequestKind,
    pub(crate) path: String,
    pub(crate) headers: Headers,
    pub(crate) body: Option<Arc<dyn BodySource>>,
    pub(crate) part_size: Option<u64>,
    pub(crate) on_headers: Option<HeadersCallback>,
    pub(crate) on_body: Option<BodyCallback>,
    pub(crate) progress: Option<mpsc::Sender<ProgressStats>>,
}

impl MetaRequestOptions {
    /// GET `path`. `headers` must carry `Host`.
    pub fn get(path: impl Into<String>, headers: Headers) -> Self {
        Self::new(MetaRequestKind::GetObject, path.into(), headers, None)
    }

    /// PUT `body` to `path`. `headers` must carry `Host` and a
    /// `Content-Length` equal to the body length.
    pub fn put(path: impl Into<String>, headers: Headers, body: Arc<dyn BodySource>) -> Self {
        Self::new(MetaRequestKind::PutObject, path.into(), headers, Some(body))
    }

    fn new(
        kind: MetaRequestKind,
        path: String,
        headers: Headers,
        body: Option<Arc<dyn BodySource>>,
    ) -> Self {
        Self {
            kind,
            path,
            headers,
            body,
            part_size: None,
            on_headers: None,
            on_body: None,
            progress: None,
        }
    }

    /// Override the client's part size for this request.
    pub fn part_size(mut self, part_size: u64) -> Self {
        self.part_size = Some(part_size).filter(|p| *p > 0);
        self
    }

    pub fn on_headers(
        mut self,
        f: impl FnMut(u16, &Headers) -> anyhow::Result<()> + Send + 'static,
    ) -> Self {
        self.on_headers = Some(Box::new(f));
        self
    }

    pub fn on_body(mut self, f: impl FnMut(&[u8], u64) -> anyhow::Result<()> + Send + 'static) -> Self {
        self.on_body = Some(Box::new(f));
        self
    }

    /// Receive a snapshot after each part succeeds. Snapshots are dropped,
    /// not awaited, when the channel is full.
    pub fn progress(mut self, tx: mpsc::Sender<ProgressStats>) -> Self {
        self.progress = Some(tx);
        self
    }

    pub fn kind(&self) -> MetaRequestKind {
        self.kind
    }
}

impl fmt::Debug for MetaRequestOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetaRequestOptions")
            .field("kind", &self.kind)
            .field("path", &self.path)
            .field("headers", &self.headers)
            .field("body_len", &self.body.as_ref().map(|b| b.len()))
            .field("part_size", &self.part_size)
            .finish_non_exhaustive()
    }
}

/// Caller handle for a running meta-request.
///
/// Dropping it before completion requests cancellation; the shutdown event
/// fires only after the handle is gone and every part has drained.
pub struct MetaRequest {
    id: u64,
    kind: MetaRequestKind,
    completion: CompletionFuture,
    shutdown: ShutdownEvent,
    state: Arc<StateCell>,
    halt: HaltToken,
    _guard: ReleaseGuard,
}

impl MetaRequest {
    pub(crate) fn new(
        id: u64,
        kind: MetaRequestKind,
        completion: CompletionFuture,
        shutdown: ShutdownEvent,
        state: Arc<StateCell>,
        halt: HaltToken,
        guard: ReleaseGuard,
    ) -> Self {
        Self {
            id,
            kind,
            completion,
            shutdown,
            state,
            halt,
            _guard: guard,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> MetaRequestKind {
        self.kind
    }

    /// Resolves once with the final result or error.
    pub fn finished_future(&self) -> CompletionFuture {
        self.completion.clone()
    }

    /// Fires after the handle is dropped and all resources are released.
    pub fn shutdown_event(&self) -> ShutdownEvent {
        self.shutdown.clone()
    }

    pub fn state(&self) -> MetaRequestState {
        self.state.get()
    }

    /// Stop admitting parts; in-flight parts drain and the completion future
    /// resolves with `Cancelled` unless it already resolved.
    pub fn cancel(&self) {
        if self.halt.halt() {
            tracing::debug!(id = self.id, "meta request cancellation requested");
        }
    }
}

impl fmt::Debug for MetaRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetaRequest")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for MetaRequest {
    fn drop(&mut self) {
        if !self.completion.is_ready() {
            self.cancel();
        }
    }
}
