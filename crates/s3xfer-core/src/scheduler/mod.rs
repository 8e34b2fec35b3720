//! Part admission and progress reporting.
//!
//! Every meta-request of one client admits its parts through the same
//! [`AdmissionGate`], so the in-flight bound is per client, not per request.

mod budget;
mod progress;

pub use budget::{AdmissionGate, AdmissionPermit};
pub use progress::ProgressStats;
