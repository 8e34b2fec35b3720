//! GET flow: size the object with a first ranged part, then fan out the rest.
//!
//! Part 0 asks for the first `part_size` bytes. Its `Content-Range` reveals
//! the object size, which plans the remaining parts. The caller sees one
//! logical `200` response whatever the split.

use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use super::delivery::DeliveryQueue;
use super::driver::{spawn_part, Driver, PartDone, PartJoin};
use super::state::MetaRequestState;
use super::TransferResult;
use crate::error::TransferError;
use crate::executor::{self, is_unsized_partial, ResponseSink, StreamEvent};
use crate::http::{HttpRequest, Headers, ResponseHead};
use crate::planner::{plan_ranges, PartRange};
use crate::scheduler::AdmissionPermit;

/// Response shape decided from part 0's head.
#[derive(Debug)]
struct GetPlan {
    status: u16,
    headers: Headers,
    /// Object size the delivered body must match, when known.
    total: Option<u64>,
}

/// Headers the caller sees for a response assembled from ranged parts.
fn whole_object_headers(head: &ResponseHead, total: u64) -> Headers {
    let mut headers = head.headers.clone();
    headers.remove("content-range");
    headers.insert("Content-Length", total.to_string());
    headers
}

impl Driver {
    pub(super) async fn run_get(&mut self) -> Result<TransferResult, TransferError> {
        let passthrough = self.headers.contains("range");
        let first = (!passthrough).then(|| PartRange::new(0, self.part_size));
        let mut pending: VecDeque<(u32, Option<PartRange>)> = VecDeque::from([(0, first)]);
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let mut parts: JoinSet<PartJoin> = JoinSet::new();
        let mut delivery = DeliveryQueue::new();
        let mut plan: Option<GetPlan> = None;
        let gate = Arc::clone(&self.gate);
        let halt = self.halt.clone();
        let mut halt_seen = false;

        self.state.advance(MetaRequestState::PartsInFlight);
        loop {
            self.observe_cancel();
            let can_admit = !halt.is_halted()
                && pending
                    .front()
                    .is_some_and(|(seq, _)| delivery.within_window(*seq, self.window));
            if !can_admit && parts.is_empty() {
                break;
            }
            tokio::select! {
                biased;
                Some(event) = events_rx.recv() => {
                    self.on_stream_event(event, passthrough, &mut delivery, &mut plan, &mut pending);
                }
                Some(joined) = parts.join_next(), if !parts.is_empty() => {
                    // A part's events are all queued before its task returns.
                    while let Ok(event) = events_rx.try_recv() {
                        self.on_stream_event(event, passthrough, &mut delivery, &mut plan, &mut pending);
                    }
                    match joined {
                        Ok((0, Ok(done))) if plan.is_none() && first.is_some() && is_unsized_partial(&done.head) => {
                            // Size unknown: nothing was delivered, fetch the object in one part.
                            tracing::debug!(id = self.id, "ranged reply without object size, refetching whole object");
                            pending.push_front((0, None));
                        }
                        Ok((seq, Ok(done))) => {
                            for (offset, data) in delivery.finish(seq) {
                                self.deliver_body(offset, &data);
                            }
                            tracing::trace!(
                                id = self.id,
                                seq,
                                delivering = delivery.next_seq(),
                                held_bytes = delivery.held_bytes(),
                                "delivery position"
                            );
                            self.part_succeeded(seq, &done);
                        }
                        Ok((seq, Err(e))) => {
                            tracing::debug!(id = self.id, seq, error = %e, "part failed");
                            self.fail(e);
                        }
                        Err(e) => self.on_join_error(e),
                    }
                }
                _ = halt.halted(), if !halt_seen => halt_seen = true,
                permit = gate.admit(), if can_admit => match permit {
                    Some(permit) => {
                        if let Some((seq, range)) = pending.pop_front() {
                            self.spawn_get_part(&mut parts, permit, seq, range, &events_tx);
                        }
                    }
                    None => self.fail(TransferError::Internal("admission gate closed".into())),
                },
            }
        }

        if self.has_failed() || halt.is_halted() {
            return Err(self.take_error());
        }
        let plan = plan.ok_or_else(|| TransferError::Internal("GET finished without a response".into()))?;
        if let Some(total) = plan.total {
            if self.delivered != total {
                return Err(TransferError::IncompleteBody {
                    expected: total,
                    received: self.delivered,
                });
            }
        }
        let delivered = self.delivered;
        self.finish(plan.status, plan.headers, delivered)
    }

    fn spawn_get_part(
        &self,
        parts: &mut JoinSet<PartJoin>,
        permit: AdmissionPermit,
        seq: u32,
        range: Option<PartRange>,
        events: &mpsc::UnboundedSender<StreamEvent>,
    ) {
        let mut request = HttpRequest::new("GET", self.path.clone(), self.headers.clone());
        if let Some(r) = range {
            request.headers.insert("Range", r.range_header_value());
        }
        let start = range.map_or(0, |r| r.start);
        let mut sink = if seq == 0 {
            let sink = ResponseSink::stream(seq, start, None, events.clone());
            if range.is_some() {
                sink.first_part()
            } else {
                sink
            }
        } else {
            ResponseSink::stream(seq, start, range, events.clone())
        };
        self.log_admitted(seq, range);

        let resources = self.resources.clone();
        let endpoint = self.endpoint.clone();
        let halt = self.halt.clone();
        spawn_part(parts, permit, seq, async move {
            let out = executor::execute(&resources, &endpoint, &request, &mut sink, &halt).await?;
            Ok(PartDone {
                head: out.head,
                bytes: out.received,
                attempts: out.attempts,
            })
        });
    }

    fn on_stream_event(
        &mut self,
        event: StreamEvent,
        passthrough: bool,
        delivery: &mut DeliveryQueue,
        plan: &mut Option<GetPlan>,
        pending: &mut VecDeque<(u32, Option<PartRange>)>,
    ) {
        match event {
            StreamEvent::Head { seq: 0, head } if plan.is_none() => {
                let decided = self.plan_from_first_head(&head, passthrough, pending);
                self.deliver_headers(decided.status, &decided.headers);
                *plan = Some(decided);
            }
            StreamEvent::Head { .. } => {}
            StreamEvent::Body { seq, offset, data } => {
                if let Some((offset, data)) = delivery.push(seq, offset, data) {
                    self.deliver_body(offset, &data);
                }
            }
        }
    }

    /// Decide the response shape and queue the remaining parts.
    fn plan_from_first_head(
        &mut self,
        head: &ResponseHead,
        passthrough: bool,
        pending: &mut VecDeque<(u32, Option<PartRange>)>,
    ) -> GetPlan {
        if passthrough {
            return GetPlan {
                status: head.status,
                headers: head.headers.clone(),
                total: head.headers.content_length(),
            };
        }
        let total = head.content_range().and_then(|cr| cr.total);
        match (head.status, total) {
            (206, Some(total)) => {
                let ranges = plan_ranges(total, self.part_size);
                self.part_count = ranges.len();
                self.total_bytes = total;
                for (seq, range) in ranges.into_iter().enumerate().skip(1) {
                    pending.push_back((seq as u32, Some(range)));
                }
                tracing::debug!(id = self.id, total, parts = self.part_count, "GET planned");
                GetPlan {
                    status: 200,
                    headers: whole_object_headers(head, total),
                    total: Some(total),
                }
            }
            (416, Some(0)) => {
                tracing::debug!(id = self.id, "empty object");
                GetPlan {
                    status: 200,
                    headers: whole_object_headers(head, 0),
                    total: Some(0),
                }
            }
            _ => {
                // Whole object in one response (range ignored, or no size).
                let total = head.headers.content_length();
                self.total_bytes = total.unwrap_or(0);
                GetPlan {
                    status: head.status,
                    headers: head.headers.clone(),
                    total,
                }
            }
        }
    }
}
