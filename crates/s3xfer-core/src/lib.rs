pub mod body;
pub mod checksum;
pub mod client;
pub mod config;
pub mod connection;
pub mod credentials;
pub mod error;
pub mod http;
pub mod logging;
pub mod meta_request;
pub mod planner;
pub mod retry;
pub mod scheduler;
pub mod signal;
pub mod storage;
pub mod xml;

mod executor;
mod lifetime;

pub use client::{ClientResources, S3Client};
pub use error::{MultipartPhase, TransferError};
pub use meta_request::{MetaRequest, MetaRequestKind, MetaRequestOptions, TransferResult};
pub use signal::{CompletionFuture, ShutdownEvent};
