//! Connection Resource Provider seam.
//!
//! The engine never opens sockets itself: it asks a [`ConnectionProvider`]
//! for a [`Connection`] to an [`Endpoint`], runs one exchange on it, and
//! hands it back. Response headers and body bytes stream back over a channel
//! as [`ExchangeEvent`]s while the exchange is still running.

pub mod curl;

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use tokio::sync::mpsc;

use crate::http::{Endpoint, HttpRequest, ResponseHead};

pub use self::curl::CurlConnectionProvider;

/// Event emitted by a running exchange. `Head` always precedes `Body`.
#[derive(Debug, Clone)]
pub enum ExchangeEvent {
    Head(ResponseHead),
    Body(Bytes),
}

/// Network-level failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Could not establish a connection (DNS, refused, TLS handshake).
    Connect,
    Timeout,
    /// Connection dropped mid-exchange (reset, short read, empty reply).
    Reset,
    /// Provider has been closed; no further connections are handed out.
    Closed,
    Other,
}

/// Connection-level error raised by a provider or an exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn closed() -> Self {
        Self::new(TransportErrorKind::Closed, "connection provider closed")
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for TransportError {}

/// One established connection able to carry sequential exchanges.
#[async_trait]
pub trait Connection: Send {
    /// Send `request` and stream the response into `events`.
    ///
    /// Returns once the response is complete. Dropping `events` when done
    /// is how the consumer learns the stream ended.
    async fn exchange(
        &mut self,
        request: &HttpRequest,
        events: mpsc::Sender<ExchangeEvent>,
    ) -> Result<(), TransportError>;

    /// Mark the connection unfit for reuse; the provider drops it on release.
    fn invalidate(&mut self) {}
}

/// Supplies connections on demand; owned by the client.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    async fn acquire(&self, endpoint: &Endpoint) -> Result<Box<dyn Connection>, TransportError>;

    /// Return a connection. `reusable` is false after a failed exchange;
    /// such connections must not be handed out again.
    fn release(&self, connection: Box<dyn Connection>, reusable: bool);

    /// Drop idle connections and refuse new acquisitions, then resolve once
    /// every handed-out connection was released. Called once by the client
    /// after its last meta-request released.
    async fn close(&self);

    /// Connections currently handed out and not yet released.
    fn outstanding(&self) -> usize;
}
