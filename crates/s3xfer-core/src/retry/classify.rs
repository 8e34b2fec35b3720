//! Map exchange failures onto retry policy error kinds.

use super::error::PartError;
use super::policy::ErrorKind;
use crate::connection::{TransportError, TransportErrorKind};

/// Classify an HTTP status code for retry decisions.
pub fn classify_http_status(status: u16) -> ErrorKind {
    match status {
        429 | 503 => ErrorKind::Throttled,
        500..=599 => ErrorKind::Http5xx(status),
        _ => ErrorKind::Other,
    }
}

/// Classify a transport failure. A closed provider is final.
pub fn classify_transport(e: &TransportError) -> ErrorKind {
    match e.kind {
        TransportErrorKind::Timeout => ErrorKind::Timeout,
        TransportErrorKind::Connect | TransportErrorKind::Reset => ErrorKind::Connection,
        TransportErrorKind::Closed | TransportErrorKind::Other => ErrorKind::Other,
    }
}

/// Classify a part error. S3 error codes take precedence over the status.
pub fn classify(e: &PartError) -> ErrorKind {
    match e {
        PartError::Transport(t) => classify_transport(t),
        PartError::Http { status, code, .. } => match code.as_deref() {
            Some("SlowDown") => ErrorKind::Throttled,
            Some("RequestTimeout") => ErrorKind::Timeout,
            Some("InternalError") => ErrorKind::Http5xx(*status),
            _ => classify_http_status(*status),
        },
        PartError::PartialTransfer { .. } => ErrorKind::Connection,
        PartError::Credentials(_)
        | PartError::Body(_)
        | PartError::UnexpectedResponse { .. }
        | PartError::Halted => ErrorKind::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http(status: u16, code: Option<&str>) -> PartError {
        PartError::Http {
            status,
            code: code.map(String::from),
            message: None,
        }
    }

    #[test]
    fn http_429_and_503_throttled() {
        assert_eq!(classify_http_status(429), ErrorKind::Throttled);
        assert_eq!(classify_http_status(503), ErrorKind::Throttled);
    }

    #[test]
    fn http_5xx_retryable_4xx_not() {
        assert_eq!(classify_http_status(500), ErrorKind::Http5xx(500));
        assert_eq!(classify_http_status(502), ErrorKind::Http5xx(502));
        assert_eq!(classify_http_status(404), ErrorKind::Other);
        assert_eq!(classify_http_status(403), ErrorKind::Other);
    }

    #[test]
    fn s3_codes_override_status() {
        assert_eq!(classify(&http(503, Some("SlowDown"))), ErrorKind::Throttled);
        assert_eq!(classify(&http(400, Some("RequestTimeout"))), ErrorKind::Timeout);
        assert_eq!(classify(&http(400, Some("BadDigest"))), ErrorKind::Other);
        assert_eq!(classify(&http(500, None)), ErrorKind::Http5xx(500));
    }

    #[test]
    fn transport_and_body_failures() {
        let reset = TransportError::new(TransportErrorKind::Reset, "x");
        assert_eq!(classify(&PartError::Transport(reset)), ErrorKind::Connection);
        assert_eq!(
            classify(&PartError::Transport(TransportError::closed())),
            ErrorKind::Other
        );
        assert_eq!(
            classify(&PartError::PartialTransfer {
                expected: 5,
                received: 3
            }),
            ErrorKind::Connection
        );
        assert_eq!(
            classify(&PartError::UnexpectedResponse {
                status: 200,
                reason: "missing ETag".into()
            }),
            ErrorKind::Other
        );
    }
}
