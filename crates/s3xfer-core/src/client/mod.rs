//! Client: shared configuration and resources, meta-request factory, and
//! process-wide shutdown.
//!
//! The client's shutdown event fires once the client handle is dropped and
//! every meta-request it created has been released, the admission gate and
//! credentials supplier are closed, and the connection provider reports
//! every connection it handed out as released.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;

use crate::config::ClientConfig;
use crate::connection::{ConnectionProvider, CurlConnectionProvider};
use crate::credentials::{CredentialsProvider, DefaultChainProvider, PayloadHashSigner, RequestSigner};
use crate::error::TransferError;
use crate::executor::{ExchangeResources, HaltToken};
use crate::http::Endpoint;
use crate::lifetime::{ReleaseGuard, ReleaseTracker};
use crate::meta_request::{Driver, DriverSetup, MetaRequest, MetaRequestKind, MetaRequestOptions, StateCell};
use crate::scheduler::AdmissionGate;
use crate::signal::{CompletionSignal, ShutdownEvent, ShutdownSignal};

/// External collaborators owned by a client.
#[derive(Clone)]
pub struct ClientResources {
    pub connections: Arc<dyn ConnectionProvider>,
    pub credentials: Arc<dyn CredentialsProvider>,
    pub signer: Arc<dyn RequestSigner>,
}

impl Default for ClientResources {
    /// curl connection pool, environment-then-anonymous credentials, and
    /// payload-hash signing.
    fn default() -> Self {
        Self {
            connections: Arc::new(CurlConnectionProvider::default()),
            credentials: Arc::new(DefaultChainProvider::new()),
            signer: Arc::new(PayloadHashSigner),
        }
    }
}

/// Top-level transfer client.
pub struct S3Client {
    config: ClientConfig,
    resources: ExchangeResources,
    gate: Arc<AdmissionGate>,
    runtime: Handle,
    tracker: ReleaseTracker,
    shutdown: ShutdownEvent,
    next_id: AtomicU64,
    _guard: ReleaseGuard,
}

impl S3Client {
    /// Client with the default resources. Must be called inside a tokio runtime.
    pub fn new(config: ClientConfig) -> Result<Self, TransferError> {
        Self::with_resources(config, ClientResources::default())
    }

    pub fn with_resources(
        config: ClientConfig,
        resources: ClientResources,
    ) -> Result<Self, TransferError> {
        let runtime = Handle::try_current()
            .map_err(|e| TransferError::Configuration(format!("no tokio runtime: {e}")))?;
        config
            .validate()
            .map_err(|e| TransferError::Configuration(e.to_string()))?;
        let gate = Arc::new(AdmissionGate::new(config.effective_concurrency()));
        let shutdown = Arc::new(ShutdownSignal::new());
        let shutdown_event = shutdown.event();

        let on_zero = {
            let gate = Arc::clone(&gate);
            let connections = Arc::clone(&resources.connections);
            let credentials = Arc::clone(&resources.credentials);
            let runtime = runtime.clone();
            move || {
                gate.close();
                credentials.close();
                let outstanding = connections.outstanding();
                if outstanding > 0 {
                    tracing::debug!(outstanding, "client draining, waiting for connections");
                }
                runtime.spawn(async move {
                    connections.close().await;
                    tracing::info!("client shut down");
                    shutdown.fire(());
                });
            }
        };
        let (tracker, guard) = ReleaseTracker::new("client", on_zero);

        tracing::debug!(
            region = %config.region,
            part_size = config.effective_part_size(),
            max_concurrency = gate.capacity(),
            secure = config.secure,
            "client created"
        );
        Ok(Self {
            resources: ExchangeResources {
                connections: resources.connections,
                credentials: resources.credentials,
                signer: resources.signer,
                region: config.region.clone(),
                retry: config.retry_policy(),
            },
            config,
            gate,
            runtime,
            tracker,
            shutdown: shutdown_event,
            next_id: AtomicU64::new(1),
            _guard: guard,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Fires after the client is dropped and its last meta-request released.
    pub fn shutdown_event(&self) -> ShutdownEvent {
        self.shutdown.clone()
    }

    /// Meta-requests created by this client that have not been released.
    pub fn live_meta_requests(&self) -> usize {
        self.tracker.count().saturating_sub(1)
    }

    /// Parts currently admitted across every meta-request.
    pub fn parts_in_flight(&self) -> usize {
        self.gate.in_use()
    }

    /// Validate `options` and start the transfer.
    ///
    /// Fails with [`TransferError::Configuration`] when the request lacks a
    /// `Host` header, or when a PUT lacks a body or a `Content-Length`
    /// matching it.
    pub fn create_meta_request(
        &self,
        options: MetaRequestOptions,
    ) -> Result<MetaRequest, TransferError> {
        validate(&options)?;
        let host = options
            .headers
            .get("host")
            .map(str::trim)
            .unwrap_or_default()
            .to_string();
        let client_guard = self
            .tracker
            .acquire()
            .ok_or_else(|| TransferError::Configuration("client is shutting down".into()))?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let kind = options.kind;
        let completion = Arc::new(CompletionSignal::new());
        let shutdown = Arc::new(ShutdownSignal::new());
        let state = Arc::new(StateCell::new(id));
        let halt = HaltToken::new();

        let on_zero = {
            let completion = Arc::clone(&completion);
            let shutdown = Arc::clone(&shutdown);
            let state = Arc::clone(&state);
            move || {
                // Keeps completion ahead of shutdown even if the driver task
                // was dropped before resolving.
                completion.fire(Err(TransferError::Cancelled));
                state.release();
                tracing::debug!(id, "meta request released");
                shutdown.fire(());
                drop(client_guard);
            }
        };
        let (tracker, handle_guard) = ReleaseTracker::new("meta_request", on_zero);
        let driver_guard = tracker
            .acquire()
            .ok_or_else(|| TransferError::Internal("fresh release tracker refused a holder".into()))?;

        let driver = Driver::new(
            DriverSetup {
                id,
                resources: self.resources.clone(),
                gate: Arc::clone(&self.gate),
                endpoint: Endpoint::new(host, self.config.secure),
                part_size: self.config.effective_part_size(),
                window: self.config.effective_buffered_parts(),
                state: Arc::clone(&state),
                halt: halt.clone(),
            },
            options,
        );
        let handle = MetaRequest::new(
            id,
            kind,
            completion.future(),
            shutdown.event(),
            state,
            halt,
            handle_guard,
        );
        self.runtime.spawn(driver.run(completion, driver_guard));
        Ok(handle)
    }
}

impl Drop for S3Client {
    fn drop(&mut self) {
        tracing::debug!(live = self.live_meta_requests(), "client draining");
    }
}

fn validate(options: &MetaRequestOptions) -> Result<(), TransferError> {
    let host = options.headers.get("host").map(str::trim).unwrap_or_default();
    if host.is_empty() {
        return Err(TransferError::Configuration("missing Host header".into()));
    }
    if options.path.is_empty() || !options.path.starts_with('/') {
        return Err(TransferError::Configuration(format!(
            "path must start with '/': {:?}",
            options.path
        )));
    }
    if options.kind == MetaRequestKind::PutObject {
        let body = options
            .body
            .as_ref()
            .ok_or_else(|| TransferError::Configuration("PUT requires a body".into()))?;
        let declared = match options.headers.get("content-length") {
            None => {
                return Err(TransferError::Configuration(
                    "PUT requires a Content-Length header".into(),
                ))
            }
            Some(v) => v.trim().parse::<u64>().map_err(|_| {
                TransferError::Configuration(format!("invalid Content-Length: {v:?}"))
            })?,
        };
        if declared != body.len() {
            return Err(TransferError::Configuration(format!(
                "Content-Length {} does not match body length {}",
                declared,
                body.len()
            )));
        }
    }
    Ok(())
}
