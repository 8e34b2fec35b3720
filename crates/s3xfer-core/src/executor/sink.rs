//! Where a part's response body goes while the exchange runs.

use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;

use crate::http::ResponseHead;
use crate::planner::PartRange;
use crate::retry::PartError;

/// Event forwarded from a streaming part to its meta-request.
#[derive(Debug, Clone)]
pub(crate) enum StreamEvent {
    /// First successful response head of the part.
    Head { seq: u32, head: ResponseHead },
    /// Body bytes at absolute object `offset`.
    Body { seq: u32, offset: u64, data: Bytes },
}

/// Destination of a part's successful response body.
#[derive(Debug)]
pub(crate) enum ResponseSink {
    /// Forward head and body chunks to the meta-request as they arrive.
    Stream(StreamSink),
    /// Keep the body in memory (control exchanges, upload parts).
    Buffer,
}

impl ResponseSink {
    pub(crate) fn stream(
        seq: u32,
        start: u64,
        expect_span: Option<PartRange>,
        events: mpsc::UnboundedSender<StreamEvent>,
    ) -> Self {
        ResponseSink::Stream(StreamSink {
            seq,
            start,
            expect_span,
            first_part: false,
            withheld: false,
            events,
            head_sent: false,
            delivered: 0,
        })
    }

    /// Mark the first ranged part of a GET. It also accepts `416` with
    /// `Content-Range: bytes */0` (an empty object), and withholds a `206`
    /// whose `Content-Range` has no total so the object can be refetched whole.
    pub(crate) fn first_part(mut self) -> Self {
        if let ResponseSink::Stream(s) = &mut self {
            s.first_part = true;
        }
        self
    }

    /// Whether `head` counts as a successful response.
    pub(crate) fn accepts(&self, head: &ResponseHead) -> bool {
        match self {
            ResponseSink::Stream(s) => s.accepts(head),
            ResponseSink::Buffer => head.is_success(),
        }
    }
}

/// Streaming state kept across retry attempts of one part.
#[derive(Debug)]
pub(crate) struct StreamSink {
    seq: u32,
    /// Object offset of the first body byte.
    start: u64,
    /// Range the server must echo in `Content-Range`.
    expect_span: Option<PartRange>,
    first_part: bool,
    /// Current attempt's head and body are not forwarded.
    withheld: bool,
    events: mpsc::UnboundedSender<StreamEvent>,
    head_sent: bool,
    /// Body bytes already forwarded by earlier attempts.
    delivered: u64,
}

impl StreamSink {
    fn accepts(&self, head: &ResponseHead) -> bool {
        head.is_success()
            || (self.first_part
                && head.status == 416
                && head.content_range().and_then(|cr| cr.total) == Some(0))
    }

    fn on_head(&mut self, head: &ResponseHead) -> Result<(), PartError> {
        if let Some(range) = self.expect_span {
            let span = head.content_range().and_then(|cr| cr.span);
            if head.status != 206 || span != Some((range.start, range.end.saturating_sub(1))) {
                return Err(PartError::UnexpectedResponse {
                    status: head.status,
                    reason: format!(
                        "asked for {}, got Content-Range {:?}",
                        range.range_header_value(),
                        head.headers.get("content-range")
                    ),
                });
            }
        }
        self.withheld = self.first_part && is_unsized_partial(head);
        if self.withheld || self.head_sent {
            return Ok(());
        }
        self.head_sent = true;
        self.send(StreamEvent::Head {
            seq: self.seq,
            head: head.clone(),
        })
    }

    /// Forward a chunk that begins `seen` bytes into this attempt's body,
    /// dropping whatever an earlier attempt already forwarded.
    fn on_body(&mut self, seen: u64, chunk: Bytes) -> Result<(), PartError> {
        if self.withheld {
            return Ok(());
        }
        let end = seen + chunk.len() as u64;
        if end <= self.delivered {
            return Ok(());
        }
        let skip = self.delivered.saturating_sub(seen) as usize;
        let data = chunk.slice(skip..);
        let offset = self.start + seen + skip as u64;
        self.delivered = end;
        self.send(StreamEvent::Body {
            seq: self.seq,
            offset,
            data,
        })
    }

    fn send(&self, event: StreamEvent) -> Result<(), PartError> {
        self.events.send(event).map_err(|_| PartError::Halted)
    }
}

/// `206` without the object size: the parts after it cannot be planned.
pub(crate) fn is_unsized_partial(head: &ResponseHead) -> bool {
    head.status == 206 && head.content_range().and_then(|cr| cr.total).is_none()
}

/// Everything read from one exchange attempt.
#[derive(Debug, Default)]
pub(crate) struct Consumed {
    pub head: Option<ResponseHead>,
    /// Buffered body: always for `Buffer`, error bodies only for `Stream`.
    pub body: BytesMut,
    pub received: u64,
}

impl ResponseSink {
    pub(crate) fn on_head(&mut self, head: &ResponseHead) -> Result<(), PartError> {
        match self {
            ResponseSink::Stream(s) if s.accepts(head) => s.on_head(head),
            _ => Ok(()),
        }
    }

    pub(crate) fn on_body(
        &mut self,
        consumed: &mut Consumed,
        chunk: Bytes,
    ) -> Result<(), PartError> {
        let seen = consumed.received;
        consumed.received += chunk.len() as u64;
        let success = consumed.head.as_ref().is_some_and(ResponseHead::is_success);
        match self {
            ResponseSink::Stream(s) if success => s.on_body(seen, chunk),
            _ => {
                consumed.body.extend_from_slice(&chunk);
                Ok(())
            }
        }
    }
}
