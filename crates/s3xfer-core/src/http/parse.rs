//! Parse raw response header lines into a ResponseHead.

use super::{ContentRange, Headers, ResponseHead};

/// Status code from a line like `HTTP/1.1 206 Partial Content`.
pub fn parse_status_line(line: &str) -> Option<u16> {
    let mut parts = line.split_whitespace();
    let version = parts.next()?;
    if !version.starts_with("HTTP/") {
        return None;
    }
    parts.next()?.parse::<u16>().ok()
}

/// Build a ResponseHead from collected header lines.
///
/// Interim blocks (`100 Continue`, redirects) are discarded: every status
/// line starts a fresh block and only the last one is kept.
pub fn parse_response_lines(lines: &[String]) -> Option<ResponseHead> {
    let mut status = None;
    let mut headers = Headers::new();

    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(code) = parse_status_line(line) {
            status = Some(code);
            headers = Headers::new();
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.append(name.trim(), value.trim());
        }
    }

    status.map(|status| ResponseHead { status, headers })
}

/// Parse a `Content-Range` value: `bytes 0-99/1000`, `bytes 0-99/*`, `bytes */1000`.
pub fn parse_content_range(value: &str) -> Option<ContentRange> {
    let rest = value.trim().strip_prefix("bytes")?.trim_start();
    let (span, total) = rest.split_once('/')?;
    let total = match total.trim() {
        "*" => None,
        t => Some(t.parse::<u64>().ok()?),
    };
    let span = match span.trim() {
        "*" => None,
        s => {
            let (a, b) = s.split_once('-')?;
            let start = a.trim().parse::<u64>().ok()?;
            let end = b.trim().parse::<u64>().ok()?;
            if end < start {
                return None;
            }
            Some((start, end))
        }
    };
    Some(ContentRange { span, total })
}
