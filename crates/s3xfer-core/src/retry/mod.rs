//! Retry and backoff policy for part and control exchanges.
//!
//! Failures are classified into an [`ErrorKind`] (timeout, throttling,
//! connection, 5xx) and the [`RetryPolicy`] turns attempt number plus kind
//! into a backoff decision. The executor owns the retry loop itself.

mod classify;
mod error;
mod policy;

pub use classify::{classify, classify_http_status, classify_transport};
pub use error::PartError;
pub use policy::{ErrorKind, RetryDecision, RetryPolicy};
