#![allow(dead_code)]

pub mod mock_s3;
pub mod s3_server;

use std::sync::{Arc, Mutex};

use s3xfer_core::config::{ClientConfig, RetryConfig};
use s3xfer_core::credentials::{AnonymousCredentialsProvider, PayloadHashSigner};
use s3xfer_core::http::Headers;
use s3xfer_core::ClientResources;

pub const HOST: &str = "bucket.s3.us-west-2.amazonaws.com";

/// Deterministic test payload.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Small parts, fast retries.
pub fn test_config(part_size: u64, max_concurrency: usize) -> ClientConfig {
    ClientConfig {
        region: "us-west-2".to_string(),
        part_size,
        max_concurrency,
        secure: false,
        retry: Some(RetryConfig {
            max_attempts: 4,
            base_delay_secs: 0.001,
            max_delay_secs: 1,
        }),
        ..ClientConfig::default()
    }
}

pub fn resources(s3: &Arc<mock_s3::MockS3>) -> ClientResources {
    ClientResources {
        connections: Arc::new(mock_s3::MockProvider(Arc::clone(s3))),
        credentials: Arc::new(AnonymousCredentialsProvider),
        signer: Arc::new(PayloadHashSigner),
    }
}

pub fn host_headers() -> Headers {
    [("Host", HOST)].into_iter().collect()
}

pub fn put_headers(len: usize) -> Headers {
    [("Host", HOST.to_string()), ("Content-Length", len.to_string())]
        .into_iter()
        .collect()
}

/// Body chunks delivered to `on_body`, in call order.
#[derive(Clone, Default)]
pub struct Collected(pub Arc<Mutex<Vec<(u64, Vec<u8>)>>>);

impl Collected {
    pub fn callback(&self) -> impl FnMut(&[u8], u64) -> anyhow::Result<()> + Send + 'static {
        let chunks = Arc::clone(&self.0);
        move |data, offset| {
            chunks.lock().unwrap().push((offset, data.to_vec()));
            Ok(())
        }
    }

    /// Concatenated bytes, asserting offsets are contiguous and ascending.
    pub fn contiguous(&self) -> Vec<u8> {
        let chunks = self.0.lock().unwrap();
        let mut out = Vec::new();
        for (offset, data) in chunks.iter() {
            assert_eq!(*offset, out.len() as u64, "body delivered out of order");
            out.extend_from_slice(data);
        }
        out
    }
}
