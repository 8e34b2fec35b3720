//! HTTP request/response types shared by the engine and connection providers.
//!
//! Header names are matched case-insensitively; insertion order is kept so
//! the headers a caller sees mirror what the server sent.

mod parse;

pub use parse::{parse_content_range, parse_response_lines, parse_status_line};

use bytes::Bytes;

/// Ordered, case-insensitive header list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// First value for `name`, if present.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Replace every value of `name` with a single `value`.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.entries.push((name, value.into()));
    }

    /// Add a value without touching existing ones.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Remove every value of `name`. Returns true if anything was removed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.entries.len() != before
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `Content-Length` parsed as u64. Unparseable values count as absent.
    pub fn content_length(&self) -> Option<u64> {
        self.get("content-length")
            .and_then(|v| v.trim().parse::<u64>().ok())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// One HTTP exchange as handed to a connection.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    /// Path plus optional query string, e.g. `/key.txt?uploads=`.
    pub path: String,
    pub headers: Headers,
    pub body: Option<Bytes>,
}

impl HttpRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>, headers: Headers) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            headers,
            body: None,
        }
    }

    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = Some(body);
        self
    }

    pub fn host(&self) -> Option<&str> {
        self.headers.get("host").map(str::trim).filter(|h| !h.is_empty())
    }
}

/// Status line and headers of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: u16,
    pub headers: Headers,
}

impl ResponseHead {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn content_range(&self) -> Option<ContentRange> {
        self.headers.get("content-range").and_then(parse_content_range)
    }
}

/// Parsed `Content-Range: bytes start-end/total` (or `bytes */total`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    /// Inclusive byte span, absent for the unsatisfied form `bytes */total`.
    pub span: Option<(u64, u64)>,
    /// Full object size, absent when the server sends `*`.
    pub total: Option<u64>,
}

/// Connection target derived from the request's `Host` header.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub secure: bool,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, secure: bool) -> Self {
        Self {
            host: host.into(),
            secure,
        }
    }

    /// Absolute URL for `path` on this endpoint.
    pub fn url_for(&self, path: &str) -> Result<url::Url, url::ParseError> {
        let scheme = if self.secure { "https" } else { "http" };
        let base = url::Url::parse(&format!("{}://{}", scheme, self.host))?;
        base.join(path)
    }
}

/// Virtual-hosted-style S3 endpoint: `<bucket>.s3.<region>.amazonaws.com`.
pub fn virtual_host(bucket: &str, region: &str) -> String {
    format!("{}.s3.{}.amazonaws.com", bucket, region)
}

/// Append `pairs` to `path` as form-encoded query parameters, keeping any
/// query the path already carries.
pub fn with_query(path: &str, pairs: &[(&str, &str)]) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (k, v) in pairs {
        serializer.append_pair(k, v);
    }
    let query = serializer.finish();
    if query.is_empty() {
        return path.to_string();
    }
    let sep = if path.contains('?') { '&' } else { '?' };
    format!("{}{}{}", path, sep, query)
}
