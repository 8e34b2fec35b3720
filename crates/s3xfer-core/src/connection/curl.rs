//! libcurl-backed connection provider.
//!
//! Each pooled connection is one `curl::easy::Easy` handle: libcurl keeps the
//! TCP/TLS connection alive inside the handle between exchanges, so pooling
//! handles per endpoint pools connections. Exchanges run on the blocking
//! thread pool; header and body callbacks forward events over the channel.

use async_trait::async_trait;
use bytes::Bytes;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::str;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use super::{Connection, ConnectionProvider, ExchangeEvent, TransportError, TransportErrorKind};
use crate::http::{parse_response_lines, Endpoint, HttpRequest};

/// Timeouts applied to every exchange.
#[derive(Debug, Clone, Copy)]
pub struct CurlOptions {
    pub connect_timeout: Duration,
    /// Abort when throughput stays below `low_speed_limit` bytes/s for `low_speed_time`.
    pub low_speed_limit: u32,
    pub low_speed_time: Duration,
    /// Idle handles kept per endpoint; extra released handles are dropped.
    pub max_idle_per_endpoint: usize,
}

impl Default for CurlOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            low_speed_limit: 1024,
            low_speed_time: Duration::from_secs(60),
            max_idle_per_endpoint: 64,
        }
    }
}

#[derive(Default)]
struct IdlePool {
    handles: Mutex<HashMap<Endpoint, Vec<curl::easy::Easy>>>,
    closed: AtomicBool,
}

impl IdlePool {
    fn take(&self, endpoint: &Endpoint) -> Option<curl::easy::Easy> {
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        handles.get_mut(endpoint).and_then(Vec::pop)
    }

    fn put(&self, endpoint: Endpoint, easy: curl::easy::Easy, max_idle: usize) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        let idle = handles.entry(endpoint).or_default();
        if idle.len() < max_idle {
            idle.push(easy);
        }
    }

    fn close(&self) -> usize {
        self.closed.store(true, Ordering::Release);
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        let dropped = handles.values().map(Vec::len).sum();
        handles.clear();
        dropped
    }
}

/// Connection provider handing out pooled curl handles.
pub struct CurlConnectionProvider {
    pool: Arc<IdlePool>,
    /// Handed-out connection count; `close` waits for it to reach zero.
    outstanding: watch::Sender<usize>,
    options: CurlOptions,
}

impl CurlConnectionProvider {
    pub fn new(options: CurlOptions) -> Self {
        let (outstanding, _rx) = watch::channel(0);
        Self {
            pool: Arc::new(IdlePool::default()),
            outstanding,
            options,
        }
    }

    /// Number of idle handles currently pooled (all endpoints).
    pub fn idle(&self) -> usize {
        let handles = self
            .pool
            .handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        handles.values().map(Vec::len).sum()
    }
}

impl Default for CurlConnectionProvider {
    fn default() -> Self {
        Self::new(CurlOptions::default())
    }
}

impl std::fmt::Debug for CurlConnectionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CurlConnectionProvider")
            .field("outstanding", &self.outstanding())
            .field("closed", &self.pool.closed.load(Ordering::Relaxed))
            .finish()
    }
}

#[async_trait]
impl ConnectionProvider for CurlConnectionProvider {
    async fn acquire(&self, endpoint: &Endpoint) -> Result<Box<dyn Connection>, TransportError> {
        if self.pool.closed.load(Ordering::Acquire) {
            return Err(TransportError::closed());
        }
        let easy = self
            .pool
            .take(endpoint)
            .unwrap_or_else(curl::easy::Easy::new);
        self.outstanding.send_modify(|n| *n += 1);
        Ok(Box::new(CurlConnection {
            easy: Some(easy),
            endpoint: endpoint.clone(),
            pool: Arc::clone(&self.pool),
            options: self.options,
            healthy: true,
        }))
    }

    fn release(&self, mut connection: Box<dyn Connection>, reusable: bool) {
        if !reusable {
            connection.invalidate();
        }
        drop(connection);
        self.outstanding.send_modify(|n| *n = n.saturating_sub(1));
    }

    async fn close(&self) {
        let dropped = self.pool.close();
        let mut rx = self.outstanding.subscribe();
        let held = *rx.borrow();
        if held > 0 {
            tracing::debug!(dropped, outstanding = held, "waiting for connections to be released");
        }
        // The sender lives in `self`, so this only ends at zero.
        let _ = rx.wait_for(|n| *n == 0).await;
        tracing::debug!(dropped, "curl connection pool closed");
    }

    fn outstanding(&self) -> usize {
        *self.outstanding.borrow()
    }
}

struct CurlConnection {
    easy: Option<curl::easy::Easy>,
    endpoint: Endpoint,
    pool: Arc<IdlePool>,
    options: CurlOptions,
    healthy: bool,
}

impl Drop for CurlConnection {
    fn drop(&mut self) {
        if !self.healthy {
            return;
        }
        if let Some(easy) = self.easy.take() {
            self.pool
                .put(self.endpoint.clone(), easy, self.options.max_idle_per_endpoint);
        }
    }
}

#[async_trait]
impl Connection for CurlConnection {
    async fn exchange(
        &mut self,
        request: &HttpRequest,
        events: mpsc::Sender<ExchangeEvent>,
    ) -> Result<(), TransportError> {
        let url = self
            .endpoint
            .url_for(&request.path)
            .map_err(|e| TransportError::new(TransportErrorKind::Other, format!("invalid url: {e}")))?
            .to_string();
        let Some(mut easy) = self.easy.take() else {
            self.healthy = false;
            return Err(TransportError::new(
                TransportErrorKind::Other,
                "connection lost its handle",
            ));
        };
        let request = request.clone();
        let options = self.options;

        let joined = tokio::task::spawn_blocking(move || {
            let res = perform(&mut easy, &url, &request, &events, options);
            (easy, res)
        })
        .await;

        match joined {
            Ok((easy, res)) => {
                self.easy = Some(easy);
                if res.is_err() {
                    self.healthy = false;
                }
                res
            }
            Err(e) => {
                self.healthy = false;
                Err(TransportError::new(
                    TransportErrorKind::Other,
                    format!("exchange thread: {e}"),
                ))
            }
        }
    }

    fn invalidate(&mut self) {
        self.healthy = false;
    }
}

fn perform(
    easy: &mut curl::easy::Easy,
    url: &str,
    request: &HttpRequest,
    events: &mpsc::Sender<ExchangeEvent>,
    options: CurlOptions,
) -> Result<(), TransportError> {
    easy.reset();
    easy.url(url).map_err(map_curl_error)?;
    easy.connect_timeout(options.connect_timeout)
        .map_err(map_curl_error)?;
    easy.low_speed_limit(options.low_speed_limit)
        .map_err(map_curl_error)?;
    easy.low_speed_time(options.low_speed_time)
        .map_err(map_curl_error)?;

    let body = request.body.clone().unwrap_or_default();
    let body_len = body.len() as u64;
    match request.method.to_ascii_uppercase().as_str() {
        "GET" => easy.get(true).map_err(map_curl_error)?,
        "HEAD" => easy.nobody(true).map_err(map_curl_error)?,
        "PUT" => {
            easy.upload(true).map_err(map_curl_error)?;
            easy.in_filesize(body_len).map_err(map_curl_error)?;
        }
        "POST" => {
            easy.post(true).map_err(map_curl_error)?;
            easy.post_field_size(body_len).map_err(map_curl_error)?;
        }
        other => {
            easy.custom_request(other).map_err(map_curl_error)?;
            if body_len > 0 {
                easy.upload(true).map_err(map_curl_error)?;
                easy.in_filesize(body_len).map_err(map_curl_error)?;
            }
        }
    }

    let mut list = curl::easy::List::new();
    for (k, v) in request.headers.iter() {
        // curl derives Content-Length from the body size set above.
        if k.eq_ignore_ascii_case("content-length") {
            continue;
        }
        list.append(&format!("{}: {}", k.trim(), v.trim()))
            .map_err(map_curl_error)?;
    }
    list.append("Expect:").map_err(map_curl_error)?;
    easy.http_headers(list).map_err(map_curl_error)?;

    let header_lines: RefCell<Vec<String>> = RefCell::new(Vec::new());
    let head_sent = Cell::new(false);
    let receiver_gone = Cell::new(false);
    let mut cursor = 0usize;

    let send_head = || -> bool {
        if head_sent.get() {
            return true;
        }
        head_sent.set(true);
        match parse_response_lines(&header_lines.borrow()) {
            Some(head) => events.blocking_send(ExchangeEvent::Head(head)).is_ok(),
            None => true,
        }
    };

    let performed = {
        let mut transfer = easy.transfer();
        transfer
            .header_function(|data| {
                if let Ok(s) = str::from_utf8(data) {
                    header_lines.borrow_mut().push(s.trim_end().to_string());
                }
                true
            })
            .map_err(map_curl_error)?;
        transfer
            .read_function(|buf| {
                let rest = &body[cursor..];
                let n = rest.len().min(buf.len());
                buf[..n].copy_from_slice(&rest[..n]);
                cursor += n;
                Ok(n)
            })
            .map_err(map_curl_error)?;
        transfer
            .write_function(|data| {
                if !send_head()
                    || events
                        .blocking_send(ExchangeEvent::Body(Bytes::copy_from_slice(data)))
                        .is_err()
                {
                    receiver_gone.set(true);
                    return Ok(0);
                }
                Ok(data.len())
            })
            .map_err(map_curl_error)?;
        transfer.perform()
    };

    if let Err(e) = performed {
        if receiver_gone.get() {
            return Err(TransportError::new(
                TransportErrorKind::Other,
                "response consumer went away",
            ));
        }
        return Err(map_curl_error(e));
    }

    if parse_response_lines(&header_lines.borrow()).is_none() {
        return Err(TransportError::new(
            TransportErrorKind::Reset,
            "response had no status line",
        ));
    }
    send_head();
    Ok(())
}

/// Map a curl error onto the transport categories used for retry decisions.
pub fn map_curl_error(e: curl::Error) -> TransportError {
    let kind = if e.is_operation_timedout() {
        TransportErrorKind::Timeout
    } else if e.is_couldnt_connect()
        || e.is_couldnt_resolve_host()
        || e.is_couldnt_resolve_proxy()
        || e.is_ssl_connect_error()
    {
        TransportErrorKind::Connect
    } else if e.is_read_error()
        || e.is_recv_error()
        || e.is_send_error()
        || e.is_got_nothing()
        || e.is_partial_file()
    {
        TransportErrorKind::Reset
    } else {
        TransportErrorKind::Other
    };
    TransportError::new(kind, e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn closed_provider_refuses_connections() {
        let provider = CurlConnectionProvider::default();
        let endpoint = Endpoint::new("127.0.0.1:1", false);
        let conn = provider.acquire(&endpoint).await.unwrap();
        assert_eq!(provider.outstanding(), 1);
        provider.release(conn, true);
        assert_eq!(provider.outstanding(), 0);
        assert_eq!(provider.idle(), 1);

        provider.close().await;
        assert_eq!(provider.idle(), 0);
        let err = match provider.acquire(&endpoint).await {
            Err(e) => e,
            Ok(_) => panic!("closed provider handed out a connection"),
        };
        assert_eq!(err.kind, TransportErrorKind::Closed);
    }

    #[tokio::test]
    async fn close_waits_for_outstanding_connections() {
        let provider = Arc::new(CurlConnectionProvider::default());
        let endpoint = Endpoint::new("127.0.0.1:1", false);
        let conn = provider.acquire(&endpoint).await.unwrap();

        let closing = tokio::spawn({
            let provider = Arc::clone(&provider);
            async move { provider.close().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!closing.is_finished());

        provider.release(conn, true);
        tokio::time::timeout(Duration::from_secs(5), closing)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(provider.outstanding(), 0);
        assert_eq!(provider.idle(), 0);
    }

    #[tokio::test]
    async fn invalidated_connections_are_not_pooled() {
        let provider = CurlConnectionProvider::default();
        let endpoint = Endpoint::new("127.0.0.1:1", false);
        let conn = provider.acquire(&endpoint).await.unwrap();
        provider.release(conn, false);
        assert_eq!(provider.idle(), 0);
    }

    #[tokio::test]
    async fn refused_connection_maps_to_connect_kind() {
        let provider = CurlConnectionProvider::default();
        // Port 1 on loopback is essentially never listening.
        let endpoint = Endpoint::new("127.0.0.1:1", false);
        let mut conn = provider.acquire(&endpoint).await.unwrap();
        let (tx, _rx) = mpsc::channel(4);
        let req = HttpRequest::new("GET", "/k", [("host", "127.0.0.1:1")].into_iter().collect());
        let err = conn.exchange(&req, tx).await.unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::Connect);
        provider.release(conn, false);
    }
}
