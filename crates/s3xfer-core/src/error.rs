//! Caller-visible error type for meta-requests.

use std::fmt;

/// Exchange of the multipart upload protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultipartPhase {
    Initiate,
    UploadPart,
    Complete,
    Abort,
}

impl fmt::Display for MultipartPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MultipartPhase::Initiate => write!(f, "initiate"),
            MultipartPhase::UploadPart => write!(f, "upload part"),
            MultipartPhase::Complete => write!(f, "complete"),
            MultipartPhase::Abort => write!(f, "abort"),
        }
    }
}

/// Final error of a meta-request, delivered through its completion future.
///
/// `Clone` so every waiter on the completion signal gets its own copy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransferError {
    /// Request rejected at creation (missing Content-Length, bad headers).
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Connection acquisition or mid-exchange network failure.
    #[error("connection error: {0}")]
    Connection(String),
    /// 5xx or throttling response.
    #[error("server error: HTTP {status}{}", describe(.code, .message))]
    Server {
        status: u16,
        code: Option<String>,
        message: Option<String>,
    },
    /// 4xx response. Never retried.
    #[error("client error: HTTP {status}{}", describe(.code, .message))]
    Client {
        status: u16,
        code: Option<String>,
        message: Option<String>,
    },
    /// Body shorter or longer than the response declared. Server-class fault.
    #[error("incomplete body: expected {expected} bytes, received {received}")]
    IncompleteBody { expected: u64, received: u64 },
    /// Initiate/complete/abort exchange failed or returned a malformed document.
    #[error("multipart {phase} failed: {reason}")]
    MultipartProtocol {
        phase: MultipartPhase,
        reason: String,
    },
    /// A retryable failure that outlived the attempt budget.
    #[error("transfer failed after {attempts} attempt(s): {cause}")]
    FatalTransfer {
        attempts: u32,
        cause: Box<TransferError>,
    },
    #[error("credentials: {0}")]
    Credentials(String),
    /// Reading the upload body failed.
    #[error("body source: {0}")]
    BodySource(String),
    /// A caller callback returned an error.
    #[error("callback failed: {0}")]
    Callback(String),
    /// Caller dropped or cancelled the meta-request before it finished.
    #[error("meta request cancelled")]
    Cancelled,
    #[error("internal error: {0}")]
    Internal(String),
}

fn describe(code: &Option<String>, message: &Option<String>) -> String {
    match (code, message) {
        (Some(c), Some(m)) => format!(" ({c}: {m})"),
        (Some(c), None) => format!(" ({c})"),
        (None, Some(m)) => format!(" ({m})"),
        (None, None) => String::new(),
    }
}

impl TransferError {
    /// HTTP status behind this error, looking through `FatalTransfer`.
    pub fn status(&self) -> Option<u16> {
        match self {
            TransferError::Server { status, .. } | TransferError::Client { status, .. } => {
                Some(*status)
            }
            TransferError::FatalTransfer { cause, .. } => cause.status(),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransferError::Cancelled)
    }

    /// Wrap an error in `MultipartProtocol` for the given phase.
    pub fn in_phase(self, phase: MultipartPhase) -> TransferError {
        match self {
            e @ TransferError::MultipartProtocol { .. } => e,
            e @ TransferError::Cancelled => e,
            other => TransferError::MultipartProtocol {
                phase,
                reason: other.to_string(),
            },
        }
    }
}
