//! In-memory S3 behind the `ConnectionProvider` seam.
//!
//! Serves ranged GETs, single PUTs and the multipart upload protocol for any
//! number of keys. Faults can be injected per request kind; every request and
//! connection handoff is recorded so tests can assert on traffic.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

use s3xfer_core::connection::{
    Connection, ConnectionProvider, ExchangeEvent, TransportError, TransportErrorKind,
};
use s3xfer_core::http::{Endpoint, Headers, HttpRequest, ResponseHead};

/// Which requests a fault applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Ranged or plain GET whose range starts at this offset.
    GetAt(u64),
    AnyGet,
    Initiate,
    /// Upload of this 1-based part number.
    UploadPart(u32),
    Complete,
    Abort,
    SinglePut,
}

#[derive(Debug, Clone)]
pub enum Fault {
    /// Reply with this status and an S3 error document.
    Status(u16, &'static str),
    Transport(TransportErrorKind),
    /// Declare the full length but send only half the body.
    ShortBody,
    /// A 200 reply carrying an `<Error>` document.
    ErrorIn200(&'static str),
    /// Upload part reply without an ETag header.
    NoEtag,
}

struct FaultRule {
    target: Target,
    remaining: usize,
    fault: Fault,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub headers: Headers,
    pub body_len: usize,
}

#[derive(Default)]
struct Upload {
    key: String,
    parts: BTreeMap<u32, Vec<u8>>,
}

#[derive(Default)]
pub struct MockS3 {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    uploads: Mutex<HashMap<String, Upload>>,
    faults: Mutex<Vec<FaultRule>>,
    delays: Mutex<HashMap<u64, Duration>>,
    requests: Mutex<Vec<Recorded>>,
    completion_bodies: Mutex<Vec<String>>,
    /// Replies to GETs ignore Range and return the whole object.
    ignore_range: AtomicBool,
    omit_content_length: AtomicBool,
    /// Ranged replies report `Content-Range: bytes a-b/*`.
    hide_object_size: AtomicBool,
    next_upload: AtomicUsize,
    pub acquired: AtomicUsize,
    pub released: AtomicUsize,
    pub released_reusable: AtomicUsize,
    in_flight: AtomicUsize,
    pub peak_in_flight: AtomicUsize,
    pub closed: AtomicBool,
    released_notify: Notify,
}

impl MockS3 {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn put_object(&self, key: &str, data: Vec<u8>) {
        self.objects.lock().unwrap().insert(key.to_string(), data);
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    /// Fail the next `times` requests matching `target`.
    pub fn inject(&self, target: Target, times: usize, fault: Fault) {
        self.faults.lock().unwrap().push(FaultRule {
            target,
            remaining: times,
            fault,
        });
    }

    /// Hold the body of GET replies for the range starting at `start`; the
    /// head is sent right away.
    pub fn delay_get(&self, start: u64, delay: Duration) {
        self.delays.lock().unwrap().insert(start, delay);
    }

    pub fn ignore_range(&self) {
        self.ignore_range.store(true, Ordering::SeqCst);
    }

    /// Send responses without a `Content-Length` header.
    pub fn omit_content_length(&self) {
        self.omit_content_length.store(true, Ordering::SeqCst);
    }

    pub fn hide_object_size(&self) {
        self.hide_object_size.store(true, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count(&self, method: &str, path_contains: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.method == method && r.path.contains(path_contains))
            .count()
    }

    pub fn completion_bodies(&self) -> Vec<String> {
        self.completion_bodies.lock().unwrap().clone()
    }

    pub fn open_uploads(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }

    pub fn outstanding_connections(&self) -> usize {
        self.acquired.load(Ordering::SeqCst) - self.released.load(Ordering::SeqCst)
    }

    fn take_fault(&self, target: Target) -> Option<Fault> {
        let mut faults = self.faults.lock().unwrap();
        let rule = faults.iter_mut().find(|r| {
            r.remaining > 0
                && (r.target == target
                    || (r.target == Target::AnyGet && matches!(target, Target::GetAt(_))))
        })?;
        rule.remaining -= 1;
        Some(rule.fault.clone())
    }

    fn respond(&self, request: &HttpRequest) -> Result<Reply, TransportErrorKind> {
        let (key, query) = split_path(&request.path);
        let body = request.body.clone().unwrap_or_default();
        self.requests.lock().unwrap().push(Recorded {
            method: request.method.clone(),
            path: request.path.clone(),
            headers: request.headers.clone(),
            body_len: body.len(),
        });

        match (request.method.as_str(), query.get("uploads"), query.get("uploadId")) {
            ("GET", _, _) => self.get(&key, request.headers.get("range")),
            ("POST", Some(_), _) => self.initiate(&key),
            ("PUT", _, Some(upload_id)) => {
                let part_number = query
                    .get("partNumber")
                    .and_then(|p| p.parse::<u32>().ok())
                    .unwrap_or(0);
                self.upload_part(upload_id, part_number, body)
            }
            ("POST", _, Some(upload_id)) => self.complete(upload_id, body),
            ("DELETE", _, Some(upload_id)) => self.abort(upload_id),
            ("PUT", _, _) => self.single_put(&key, body),
            _ => Ok(Reply::error(405, "MethodNotAllowed")),
        }
    }

    fn get(&self, key: &str, range: Option<&str>) -> Result<Reply, TransportErrorKind> {
        let span = range.and_then(parse_range).filter(|_| !self.ignore_range.load(Ordering::SeqCst));
        let start = span.map_or(0, |(s, _)| s);
        let mut reply = self.get_unfaulted(key, span);
        if let Some(fault) = self.take_fault(Target::GetAt(start)) {
            reply = apply(fault, reply)?;
        }
        if let Some(delay) = self.delays.lock().unwrap().get(&start).copied() {
            reply.delay = delay;
        }
        Ok(reply)
    }

    fn get_unfaulted(&self, key: &str, span: Option<(u64, Option<u64>)>) -> Reply {
        let objects = self.objects.lock().unwrap();
        let Some(data) = objects.get(key) else {
            return Reply::error(404, "NoSuchKey");
        };
        let total = data.len() as u64;
        match span {
            None => Reply::ok(200, vec![], data.clone()),
            Some((start, _)) if start >= total => Reply {
                status: 416,
                headers: vec![("Content-Range", format!("bytes */{total}"))],
                ..Reply::error(416, "InvalidRange")
            },
            Some((start, end)) => {
                let last = end.unwrap_or(u64::MAX).min(total - 1);
                let slice = data[start as usize..=last as usize].to_vec();
                let size = if self.hide_object_size.load(Ordering::SeqCst) {
                    "*".to_string()
                } else {
                    total.to_string()
                };
                Reply::ok(
                    206,
                    vec![
                        ("Content-Range", format!("bytes {start}-{last}/{size}")),
                        ("ETag", "\"object-etag\"".to_string()),
                    ],
                    slice,
                )
            }
        }
    }

    fn initiate(&self, key: &str) -> Result<Reply, TransportErrorKind> {
        if let Some(fault) = self.take_fault(Target::Initiate) {
            return apply(fault, Reply::ok(200, vec![], Vec::new()));
        }
        let id = format!("upload-{}", self.next_upload.fetch_add(1, Ordering::SeqCst) + 1);
        self.uploads.lock().unwrap().insert(
            id.clone(),
            Upload {
                key: key.to_string(),
                ..Upload::default()
            },
        );
        let xml = format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
             <InitiateMultipartUploadResult xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\">\
             <Bucket>bucket</Bucket><Key>{}</Key><UploadId>{}</UploadId>\
             </InitiateMultipartUploadResult>",
            key.trim_start_matches('/'),
            id
        );
        Ok(Reply::ok(200, vec![], xml.into_bytes()))
    }

    fn upload_part(
        &self,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> Result<Reply, TransportErrorKind> {
        let etag = ("ETag", format!("\"etag-{part_number}\""));
        if let Some(fault) = self.take_fault(Target::UploadPart(part_number)) {
            if matches!(fault, Fault::NoEtag) {
                return Ok(Reply::ok(200, vec![], Vec::new()));
            }
            return apply(fault, Reply::ok(200, vec![etag], Vec::new()));
        }
        let mut uploads = self.uploads.lock().unwrap();
        let Some(upload) = uploads.get_mut(upload_id) else {
            return Ok(Reply::error(404, "NoSuchUpload"));
        };
        upload.parts.insert(part_number, body.to_vec());
        Ok(Reply::ok(200, vec![etag], Vec::new()))
    }

    fn complete(&self, upload_id: &str, body: Bytes) -> Result<Reply, TransportErrorKind> {
        self.completion_bodies
            .lock()
            .unwrap()
            .push(String::from_utf8_lossy(&body).into_owned());
        if let Some(fault) = self.take_fault(Target::Complete) {
            return apply(fault, Reply::ok(200, vec![], Vec::new()));
        }
        let Some(upload) = self.uploads.lock().unwrap().remove(upload_id) else {
            return Ok(Reply::error(404, "NoSuchUpload"));
        };
        let data: Vec<u8> = upload.parts.into_values().flatten().collect();
        self.put_object(&upload.key, data);
        let xml = format!(
            "<CompleteMultipartUploadResult xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\">\
             <Location>http://bucket/{0}</Location><Bucket>bucket</Bucket><Key>{0}</Key>\
             <ETag>\"combined-etag\"</ETag></CompleteMultipartUploadResult>",
            upload.key.trim_start_matches('/')
        );
        Ok(Reply::ok(
            200,
            vec![("ETag", "\"combined-etag\"".to_string())],
            xml.into_bytes(),
        ))
    }

    fn abort(&self, upload_id: &str) -> Result<Reply, TransportErrorKind> {
        if let Some(fault) = self.take_fault(Target::Abort) {
            return apply(fault, Reply::ok(204, vec![], Vec::new()));
        }
        self.uploads.lock().unwrap().remove(upload_id);
        Ok(Reply::ok(204, vec![], Vec::new()))
    }

    fn single_put(&self, key: &str, body: Bytes) -> Result<Reply, TransportErrorKind> {
        if let Some(fault) = self.take_fault(Target::SinglePut) {
            return apply(fault, Reply::ok(200, vec![], Vec::new()));
        }
        self.put_object(key, body.to_vec());
        Ok(Reply::ok(
            200,
            vec![("ETag", "\"single-etag\"".to_string())],
            Vec::new(),
        ))
    }
}

struct Reply {
    status: u16,
    headers: Vec<(&'static str, String)>,
    body: Vec<u8>,
    /// Content-Length to declare; defaults to the body length.
    declared: Option<usize>,
    delay: Duration,
}

impl Reply {
    fn ok(status: u16, headers: Vec<(&'static str, String)>, body: Vec<u8>) -> Self {
        Self {
            status,
            headers,
            body,
            declared: None,
            delay: Duration::ZERO,
        }
    }

    fn error(status: u16, code: &str) -> Self {
        let xml = format!("<Error><Code>{code}</Code><Message>mock {status}</Message></Error>");
        Self::ok(status, vec![], xml.into_bytes())
    }
}

fn apply(fault: Fault, reply: Reply) -> Result<Reply, TransportErrorKind> {
    match fault {
        Fault::Status(status, code) => Ok(Reply::error(status, code)),
        Fault::Transport(kind) => Err(kind),
        Fault::ShortBody => {
            let declared = reply.body.len();
            let mut short = reply;
            short.body.truncate(declared / 2);
            short.declared = Some(declared);
            Ok(short)
        }
        Fault::ErrorIn200(code) => {
            let xml = format!("<Error><Code>{code}</Code><Message>completion failed</Message></Error>");
            Ok(Reply::ok(200, vec![], xml.into_bytes()))
        }
        Fault::NoEtag => Ok(reply),
    }
}

/// `bytes=a-b` or `bytes=a-`.
fn parse_range(value: &str) -> Option<(u64, Option<u64>)> {
    let bounds = value.trim().strip_prefix("bytes=")?;
    let (a, b) = bounds.split_once('-')?;
    let start = a.parse().ok()?;
    let end = if b.is_empty() { None } else { Some(b.parse().ok()?) };
    Some((start, end))
}

fn split_path(path: &str) -> (String, HashMap<String, String>) {
    match path.split_once('?') {
        Some((key, query)) => (
            key.to_string(),
            url::form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .collect(),
        ),
        None => (path.to_string(), HashMap::new()),
    }
}

pub struct MockConnection {
    s3: Arc<MockS3>,
}

#[async_trait]
impl Connection for MockConnection {
    async fn exchange(
        &mut self,
        request: &HttpRequest,
        events: mpsc::Sender<ExchangeEvent>,
    ) -> Result<(), TransportError> {
        let now = self.s3.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.s3.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let result = self.stream_reply(request, events).await;
        self.s3.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

impl MockConnection {
    async fn stream_reply(
        &self,
        request: &HttpRequest,
        events: mpsc::Sender<ExchangeEvent>,
    ) -> Result<(), TransportError> {
        let reply = self
            .s3
            .respond(request)
            .map_err(|kind| TransportError::new(kind, "injected transport failure"))?;
        let mut headers: Headers = reply.headers.into_iter().collect();
        if !self.s3.omit_content_length.load(Ordering::SeqCst) {
            headers.insert(
                "Content-Length",
                reply.declared.unwrap_or(reply.body.len()).to_string(),
            );
        }
        let head = ResponseHead {
            status: reply.status,
            headers,
        };
        if events.send(ExchangeEvent::Head(head)).await.is_err() {
            return Err(TransportError::new(TransportErrorKind::Other, "consumer gone"));
        }
        if !reply.delay.is_zero() {
            tokio::time::sleep(reply.delay).await;
        }
        for chunk in reply.body.chunks(4096) {
            if events
                .send(ExchangeEvent::Body(Bytes::copy_from_slice(chunk)))
                .await
                .is_err()
            {
                return Err(TransportError::new(TransportErrorKind::Other, "consumer gone"));
            }
        }
        Ok(())
    }
}

/// Provider handed to the client; shares state with the test's `MockS3`.
pub struct MockProvider(pub Arc<MockS3>);

#[async_trait]
impl ConnectionProvider for MockProvider {
    async fn acquire(&self, _endpoint: &Endpoint) -> Result<Box<dyn Connection>, TransportError> {
        if self.0.closed.load(Ordering::SeqCst) {
            return Err(TransportError::closed());
        }
        self.0.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockConnection {
            s3: Arc::clone(&self.0),
        }))
    }

    fn release(&self, _connection: Box<dyn Connection>, reusable: bool) {
        self.0.released.fetch_add(1, Ordering::SeqCst);
        if reusable {
            self.0.released_reusable.fetch_add(1, Ordering::SeqCst);
        }
        self.0.released_notify.notify_waiters();
    }

    async fn close(&self) {
        self.0.closed.store(true, Ordering::SeqCst);
        loop {
            let released = self.0.released_notify.notified();
            if self.0.outstanding_connections() == 0 {
                return;
            }
            released.await;
        }
    }

    fn outstanding(&self) -> usize {
        self.0.outstanding_connections()
    }
}
