//! Part Executor: runs one HTTP exchange, with retries, on a pooled connection.
//!
//! Each attempt fetches credentials, signs a copy of the request, acquires a
//! connection, and streams the response into a [`ResponseSink`] while the
//! exchange runs. Retryable failures back off and reissue the same request
//! on a fresh connection until the attempt budget runs out.

mod halt;
mod sink;

pub(crate) use halt::HaltToken;
pub(crate) use sink::{is_unsized_partial, ResponseSink, StreamEvent};

use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::connection::{
    Connection, ConnectionProvider, ExchangeEvent, TransportError, TransportErrorKind,
};
use crate::credentials::{CredentialsProvider, RequestSigner};
use crate::error::TransferError;
use crate::http::{Endpoint, HttpRequest, ResponseHead};
use crate::retry::{classify, PartError, RetryDecision, RetryPolicy};
use crate::xml::parse_error_body;
use sink::Consumed;

/// Events buffered between a running exchange and its consumer.
const EXCHANGE_CHANNEL_DEPTH: usize = 16;

/// Client-owned collaborators every exchange needs.
#[derive(Clone)]
pub(crate) struct ExchangeResources {
    pub connections: Arc<dyn ConnectionProvider>,
    pub credentials: Arc<dyn CredentialsProvider>,
    pub signer: Arc<dyn RequestSigner>,
    pub region: String,
    pub retry: RetryPolicy,
}

/// Successful exchange.
#[derive(Debug)]
pub(crate) struct ExchangeOutcome {
    pub head: ResponseHead,
    /// Buffered body; empty for streamed parts.
    pub body: Bytes,
    /// Body bytes received by the final attempt.
    pub received: u64,
    pub attempts: u32,
}

/// A connection checked out of the provider. It goes back on drop, so an
/// attempt abandoned mid-exchange still releases it (as not reusable).
struct Lease<'a> {
    provider: &'a dyn ConnectionProvider,
    conn: Option<Box<dyn Connection>>,
    reusable: bool,
}

impl<'a> Lease<'a> {
    async fn acquire(
        provider: &'a dyn ConnectionProvider,
        endpoint: &Endpoint,
    ) -> Result<Lease<'a>, TransportError> {
        let conn = provider.acquire(endpoint).await?;
        Ok(Self {
            provider,
            conn: Some(conn),
            reusable: false,
        })
    }

    async fn exchange(
        &mut self,
        request: &HttpRequest,
        events: mpsc::Sender<ExchangeEvent>,
    ) -> Result<(), TransportError> {
        match self.conn.as_mut() {
            Some(conn) => conn.exchange(request, events).await,
            None => Err(TransportError::closed()),
        }
    }
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.provider.release(conn, self.reusable);
        }
    }
}

/// Run `request` against `endpoint` until it succeeds, fails fatally, or
/// `halt` is set before an attempt starts.
///
/// Retryable failures that exhaust the budget come back as
/// [`TransferError::FatalTransfer`]; everything else maps directly.
pub(crate) async fn execute(
    resources: &ExchangeResources,
    endpoint: &Endpoint,
    request: &HttpRequest,
    sink: &mut ResponseSink,
    halt: &HaltToken,
) -> Result<ExchangeOutcome, TransferError> {
    let mut attempt = 1u32;
    loop {
        if halt.is_halted() {
            return Err(TransferError::Cancelled);
        }
        tracing::trace!(method = %request.method, path = %request.path, attempt, "exchange attempt");

        let err = match run_attempt(resources, endpoint, request, sink).await {
            Ok((head, consumed)) => {
                return Ok(ExchangeOutcome {
                    head,
                    body: consumed.body.freeze(),
                    received: consumed.received,
                    attempts: attempt,
                })
            }
            Err(e) => e,
        };

        let kind = classify(&err);
        match resources.retry.decide(attempt, kind) {
            RetryDecision::NoRetry => {
                if kind.is_retryable() {
                    tracing::warn!(
                        method = %request.method,
                        path = %request.path,
                        attempts = attempt,
                        error = %err,
                        "retry budget exhausted"
                    );
                    return Err(TransferError::FatalTransfer {
                        attempts: attempt,
                        cause: Box::new(err.into()),
                    });
                }
                return Err(err.into());
            }
            RetryDecision::RetryAfter(delay) => {
                tracing::warn!(
                    method = %request.method,
                    path = %request.path,
                    attempt,
                    ?kind,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "exchange failed, retrying"
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = halt.halted() => return Err(TransferError::Cancelled),
                }
                attempt += 1;
            }
        }
    }
}

async fn run_attempt(
    resources: &ExchangeResources,
    endpoint: &Endpoint,
    request: &HttpRequest,
    sink: &mut ResponseSink,
) -> Result<(ResponseHead, Consumed), PartError> {
    let credentials = resources
        .credentials
        .get_credentials()
        .await
        .map_err(|e| PartError::Credentials(e.to_string()))?;
    let mut signed = request.clone();
    resources
        .signer
        .sign(&mut signed, &credentials, &resources.region)
        .map_err(|e| PartError::Credentials(e.to_string()))?;

    let mut lease = Lease::acquire(resources.connections.as_ref(), endpoint).await?;
    let (tx, rx) = mpsc::channel(EXCHANGE_CHANNEL_DEPTH);
    let (exchanged, consumed) = tokio::join!(lease.exchange(&signed, tx), consume(rx, sink));
    lease.reusable = exchanged.is_ok() && consumed.is_ok();
    drop(lease);

    // A consumer failure is the cause of any transport error it provoked.
    let consumed = consumed?;
    exchanged?;

    let head = consumed.head.clone().ok_or_else(|| {
        PartError::Transport(TransportError::new(
            TransportErrorKind::Reset,
            "exchange ended without a response",
        ))
    })?;
    if !sink.accepts(&head) {
        let s3 = parse_error_body(&consumed.body).unwrap_or_default();
        return Err(PartError::Http {
            status: head.status,
            code: s3.code,
            message: s3.message,
        });
    }
    if let Some(expected) = head.headers.content_length() {
        if !signed.method.eq_ignore_ascii_case("HEAD") && expected != consumed.received {
            return Err(PartError::PartialTransfer {
                expected,
                received: consumed.received,
            });
        }
    }
    Ok((head, consumed))
}

/// Drain exchange events into `sink`. Returning early drops the receiver,
/// which makes the connection abandon the exchange.
async fn consume(
    mut rx: mpsc::Receiver<ExchangeEvent>,
    sink: &mut ResponseSink,
) -> Result<Consumed, PartError> {
    let mut consumed = Consumed::default();
    while let Some(event) = rx.recv().await {
        match event {
            ExchangeEvent::Head(head) => {
                sink.on_head(&head)?;
                consumed.head = Some(head);
            }
            ExchangeEvent::Body(chunk) => sink.on_body(&mut consumed, chunk)?,
        }
    }
    Ok(consumed)
}
