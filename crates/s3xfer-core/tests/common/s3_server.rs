//! Minimal HTTP/1.1 object server for end-to-end tests over real sockets.
//!
//! Serves ranged GETs of stored objects and accepts single PUTs. Every
//! response closes the connection.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

pub type Objects = Arc<Mutex<HashMap<String, Vec<u8>>>>;

/// Start the server in a background thread. Returns the `host:port` to put
/// in the `Host` header and the shared object store.
pub fn start() -> (String, Objects) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let objects: Objects = Arc::default();
    let store = Arc::clone(&objects);
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let store = Arc::clone(&store);
            thread::spawn(move || handle(stream, &store));
        }
    });
    (format!("127.0.0.1:{port}"), objects)
}

struct Request {
    method: String,
    path: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Request {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

fn read_request(stream: &mut TcpStream) -> Option<Request> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    let header_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let n = stream.read(&mut chunk).ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    };
    let head = std::str::from_utf8(&buf[..header_end]).ok()?;
    let mut lines = head.lines();
    let mut first = lines.next()?.split_whitespace();
    let method = first.next()?.to_string();
    let path = first.next()?.to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|l| l.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();
    let mut request = Request {
        method,
        path,
        headers,
        body: buf[header_end..].to_vec(),
    };
    let want = request
        .header("content-length")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);
    while request.body.len() < want {
        let n = stream.read(&mut chunk).ok()?;
        if n == 0 {
            break;
        }
        request.body.extend_from_slice(&chunk[..n]);
    }
    Some(request)
}

fn handle(mut stream: TcpStream, objects: &Objects) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(5)));
    let Some(request) = read_request(&mut stream) else {
        return;
    };
    let (status, headers, body) = match request.method.as_str() {
        "GET" => get(objects, &request),
        "PUT" => {
            objects
                .lock()
                .unwrap()
                .insert(request.path.clone(), request.body.clone());
            ("200 OK", vec![("ETag".to_string(), "\"put-etag\"".to_string())], Vec::new())
        }
        _ => ("405 Method Not Allowed", vec![], Vec::new()),
    };
    let mut response = format!(
        "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n",
        status,
        body.len()
    );
    for (k, v) in headers {
        response.push_str(&format!("{k}: {v}\r\n"));
    }
    response.push_str("\r\n");
    let _ = stream.write_all(response.as_bytes());
    let _ = stream.write_all(&body);
}

fn get(objects: &Objects, request: &Request) -> (&'static str, Vec<(String, String)>, Vec<u8>) {
    let objects = objects.lock().unwrap();
    let Some(data) = objects.get(&request.path) else {
        let xml = b"<Error><Code>NoSuchKey</Code><Message>not found</Message></Error>".to_vec();
        return ("404 Not Found", vec![], xml);
    };
    let total = data.len() as u64;
    let range = request
        .header("range")
        .and_then(|v| v.strip_prefix("bytes="))
        .and_then(|v| v.split_once('-'))
        .and_then(|(a, b)| Some((a.parse::<u64>().ok()?, b.parse::<u64>().ok())));
    match range {
        None => ("200 OK", vec![], data.clone()),
        Some((start, _)) if start >= total => (
            "416 Range Not Satisfiable",
            vec![("Content-Range".to_string(), format!("bytes */{total}"))],
            Vec::new(),
        ),
        Some((start, end)) => {
            let last = end.unwrap_or(u64::MAX).min(total - 1);
            (
                "206 Partial Content",
                vec![(
                    "Content-Range".to_string(),
                    format!("bytes {start}-{last}/{total}"),
                )],
                data[start as usize..=last as usize].to_vec(),
            )
        }
    }
}
