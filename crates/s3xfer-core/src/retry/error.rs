//! Failure of a single exchange, before retry escalation.

use std::fmt;

use crate::connection::TransportError;
use crate::error::TransferError;

/// Error returned by one attempt of a part or control exchange.
///
/// Classified with [`super::classify`] to decide whether the executor
/// retries; converted into a [`TransferError`] once it becomes final.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartError {
    /// Connection acquisition or exchange failed.
    Transport(TransportError),
    /// Non-2xx response, with the S3 error document's code and message when
    /// the body carried one.
    Http {
        status: u16,
        code: Option<String>,
        message: Option<String>,
    },
    /// Body length differed from the declared Content-Length.
    PartialTransfer { expected: u64, received: u64 },
    Credentials(String),
    /// Reading the upload body failed.
    Body(String),
    /// Response that cannot be used as asked (wrong range, missing ETag).
    UnexpectedResponse { status: u16, reason: String },
    /// Meta-request halted before the exchange could (re)start.
    Halted,
}

impl PartError {
    pub fn status(&self) -> Option<u16> {
        match self {
            PartError::Http { status, .. } | PartError::UnexpectedResponse { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }
}

impl fmt::Display for PartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartError::Transport(e) => write!(f, "{}", e),
            PartError::Http { status, code, .. } => match code {
                Some(c) => write!(f, "HTTP {} ({})", status, c),
                None => write!(f, "HTTP {}", status),
            },
            PartError::PartialTransfer { expected, received } => {
                write!(f, "partial transfer: {} of {} bytes", received, expected)
            }
            PartError::Credentials(m) => write!(f, "credentials: {}", m),
            PartError::Body(m) => write!(f, "body source: {}", m),
            PartError::UnexpectedResponse { status, reason } => {
                write!(f, "unexpected HTTP {} response: {}", status, reason)
            }
            PartError::Halted => write!(f, "halted"),
        }
    }
}

impl std::error::Error for PartError {}

impl From<TransportError> for PartError {
    fn from(e: TransportError) -> Self {
        PartError::Transport(e)
    }
}

impl From<PartError> for TransferError {
    fn from(e: PartError) -> Self {
        match e {
            PartError::Transport(t) => TransferError::Connection(t.to_string()),
            PartError::Http {
                status,
                code,
                message,
            } => {
                if status >= 500 || status == 429 {
                    TransferError::Server {
                        status,
                        code,
                        message,
                    }
                } else {
                    TransferError::Client {
                        status,
                        code,
                        message,
                    }
                }
            }
            PartError::PartialTransfer { expected, received } => {
                TransferError::IncompleteBody { expected, received }
            }
            PartError::Credentials(m) => TransferError::Credentials(m),
            PartError::Body(m) => TransferError::BodySource(m),
            PartError::UnexpectedResponse { status, reason } => TransferError::Server {
                status,
                code: None,
                message: Some(reason),
            },
            PartError::Halted => TransferError::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::TransportErrorKind;

    #[test]
    fn http_status_picks_server_or_client_class() {
        let e: TransferError = PartError::Http {
            status: 503,
            code: Some("SlowDown".into()),
            message: None,
        }
        .into();
        assert!(matches!(e, TransferError::Server { status: 503, .. }));

        let e: TransferError = PartError::Http {
            status: 429,
            code: None,
            message: None,
        }
        .into();
        assert!(matches!(e, TransferError::Server { status: 429, .. }));

        let e: TransferError = PartError::Http {
            status: 403,
            code: Some("AccessDenied".into()),
            message: Some("Access Denied".into()),
        }
        .into();
        assert_eq!(e.status(), Some(403));
        assert!(matches!(e, TransferError::Client { .. }));
    }

    #[test]
    fn other_variants_map_one_to_one() {
        let t = TransportError::new(TransportErrorKind::Reset, "reset by peer");
        assert_eq!(
            TransferError::from(PartError::from(t)),
            TransferError::Connection("Reset: reset by peer".into())
        );
        assert_eq!(
            TransferError::from(PartError::PartialTransfer {
                expected: 10,
                received: 4
            }),
            TransferError::IncompleteBody {
                expected: 10,
                received: 4
            }
        );
        assert!(TransferError::from(PartError::Halted).is_cancelled());
    }
}
