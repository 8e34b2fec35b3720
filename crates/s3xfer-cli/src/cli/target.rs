//! Where an object lives: the `Host` header and request path.

use s3xfer_core::config::ClientConfig;
use s3xfer_core::http::{virtual_host, Headers};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectTarget {
    pub host: String,
    pub path: String,
}

impl ObjectTarget {
    /// Virtual-hosted style by default; path-style when a custom host is given.
    pub fn resolve(bucket: &str, key: &str, cfg: &ClientConfig, host: Option<&str>) -> Self {
        let key = key.trim_start_matches('/');
        match host {
            Some(host) => Self {
                host: host.to_string(),
                path: format!("/{}/{}", bucket, key),
            },
            None => Self {
                host: virtual_host(bucket, &cfg.region),
                path: format!("/{}", key),
            },
        }
    }

    pub fn headers(&self) -> Headers {
        [("Host", self.host.as_str())].into_iter().collect()
    }

    /// Default local file name: the key's last path segment.
    pub fn file_name(&self) -> &str {
        self.path
            .rsplit('/')
            .find(|s| !s.is_empty())
            .unwrap_or("object.bin")
    }
}
