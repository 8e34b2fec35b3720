//! PUT flow: a single exchange, or the multipart upload protocol.

use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::task::JoinSet;

use super::driver::{read_body_range, spawn_part, Driver, PartDone, PartJoin};
use super::state::MetaRequestState;
use super::TransferResult;
use crate::body::BodySource;
use crate::error::{MultipartPhase, TransferError};
use crate::executor::{self, HaltToken, ResponseSink};
use crate::http::{with_query, Headers, HttpRequest, ResponseHead};
use crate::planner::{fit_part_size, plan_ranges, PartRange, MAX_UPLOAD_PARTS};
use crate::scheduler::AdmissionPermit;
use crate::xml::{
    complete_upload_body, parse_complete_upload, parse_error_body, parse_initiate_upload, CompletedPart,
};

fn protocol_error(phase: MultipartPhase, reason: impl Into<String>) -> TransferError {
    TransferError::MultipartProtocol {
        phase,
        reason: reason.into(),
    }
}

/// Headers for the caller of a completed multipart upload. The completion
/// body is consumed here, so its length is not reported.
fn completion_headers(head: &ResponseHead) -> Headers {
    let mut headers = head.headers.clone();
    headers.remove("content-length");
    headers
}

impl Driver {
    pub(super) async fn run_put(&mut self) -> Result<TransferResult, TransferError> {
        let body = self
            .body
            .clone()
            .ok_or_else(|| TransferError::Configuration("PUT without a body".into()))?;
        let total = body.len();
        self.total_bytes = total;
        if total <= self.part_size {
            return self.put_single(body, total).await;
        }
        self.put_multipart(body, total).await
    }

    async fn put_single(
        &mut self,
        body: Arc<dyn BodySource>,
        total: u64,
    ) -> Result<TransferResult, TransferError> {
        self.state.advance(MetaRequestState::PartsInFlight);
        let Some(permit) = self.admit().await else {
            return Err(self.take_error());
        };
        self.log_admitted(0, Some(PartRange::new(0, total)));
        let data = read_body_range(body, PartRange::new(0, total)).await;
        let out = match data {
            Ok(data) => {
                let request =
                    HttpRequest::new("PUT", self.path.clone(), self.headers.clone()).with_body(data);
                executor::execute(
                    &self.resources,
                    &self.endpoint,
                    &request,
                    &mut ResponseSink::Buffer,
                    &self.halt,
                )
                .await
            }
            Err(e) => Err(e),
        };
        drop(permit);

        match out {
            Ok(out) => {
                let done = PartDone {
                    head: out.head,
                    bytes: total,
                    attempts: out.attempts,
                };
                self.part_succeeded(0, &done);
                self.deliver_headers(done.head.status, &done.head.headers);
                self.finish(done.head.status, done.head.headers, total)
            }
            Err(e) => {
                self.fail(e);
                Err(self.take_error())
            }
        }
    }

    async fn put_multipart(
        &mut self,
        body: Arc<dyn BodySource>,
        total: u64,
    ) -> Result<TransferResult, TransferError> {
        let part_size = fit_part_size(total, self.part_size, MAX_UPLOAD_PARTS);
        if part_size != self.part_size {
            tracing::debug!(id = self.id, requested = self.part_size, part_size, "part size grown to fit part ceiling");
        }
        let ranges = plan_ranges(total, part_size);
        self.part_count = ranges.len();

        self.state.advance(MetaRequestState::MultipartSetup);
        let upload_id = match self.initiate_upload().await {
            Ok(id) => id,
            Err(e) => {
                self.fail(e);
                return Err(self.take_error());
            }
        };
        tracing::debug!(id = self.id, upload_id = %upload_id, parts = ranges.len(), "multipart upload initiated");

        self.state.advance(MetaRequestState::PartsInFlight);
        let completed = self.upload_parts(&body, &upload_id, ranges).await;

        self.observe_cancel();
        self.state.advance(MetaRequestState::MultipartCompletion);
        if !self.has_failed() {
            match self.complete_upload(&upload_id, &completed).await {
                Ok(head) => {
                    let headers = completion_headers(&head);
                    self.deliver_headers(head.status, &headers);
                    return self.finish(head.status, headers, total);
                }
                Err(e) => self.fail(e.in_phase(MultipartPhase::Complete)),
            }
        }
        self.abort_upload(&upload_id).await;
        Err(self.take_error())
    }

    /// Host (and any caller extras) without body-describing headers.
    fn control_headers(&self) -> Headers {
        let mut headers = self.headers.clone();
        headers.remove("content-length");
        headers.remove("content-md5");
        headers
    }

    async fn initiate_upload(&mut self) -> Result<String, TransferError> {
        let request = HttpRequest::new(
            "POST",
            with_query(&self.path, &[("uploads", "")]),
            self.control_headers(),
        );
        let out = executor::execute(
            &self.resources,
            &self.endpoint,
            &request,
            &mut ResponseSink::Buffer,
            &self.halt,
        )
        .await
        .map_err(|e| e.in_phase(MultipartPhase::Initiate))?;
        parse_initiate_upload(&out.body)
            .map_err(|e| protocol_error(MultipartPhase::Initiate, e.to_string()))
    }

    /// Upload every part, stopping admission on the first failure. Returns
    /// the parts that succeeded.
    async fn upload_parts(
        &mut self,
        body: &Arc<dyn BodySource>,
        upload_id: &str,
        ranges: Vec<PartRange>,
    ) -> Vec<CompletedPart> {
        let mut pending: VecDeque<(u32, PartRange)> = ranges
            .into_iter()
            .enumerate()
            .map(|(seq, r)| (seq as u32, r))
            .collect();
        let mut completed = Vec::with_capacity(pending.len());
        let mut parts: JoinSet<PartJoin> = JoinSet::new();
        let gate = Arc::clone(&self.gate);
        let halt = self.halt.clone();
        let mut halt_seen = false;

        loop {
            self.observe_cancel();
            let can_admit = !halt.is_halted() && !pending.is_empty();
            if !can_admit && parts.is_empty() {
                break;
            }
            tokio::select! {
                biased;
                Some(joined) = parts.join_next(), if !parts.is_empty() => match joined {
                    Ok((seq, Ok(done))) => match done.head.headers.get("etag") {
                        Some(etag) => {
                            completed.push(CompletedPart {
                                part_number: seq + 1,
                                etag: etag.to_string(),
                            });
                            self.part_succeeded(seq, &done);
                        }
                        None => self.fail(protocol_error(
                            MultipartPhase::UploadPart,
                            format!("part {} response carried no ETag", seq + 1),
                        )),
                    },
                    Ok((seq, Err(e))) => {
                        tracing::debug!(id = self.id, part_number = seq + 1, error = %e, "upload part failed");
                        self.fail(e);
                    }
                    Err(e) => self.on_join_error(e),
                },
                _ = halt.halted(), if !halt_seen => halt_seen = true,
                permit = gate.admit(), if can_admit => match permit {
                    Some(permit) => {
                        if let Some((seq, range)) = pending.pop_front() {
                            self.spawn_upload_part(&mut parts, permit, body, upload_id, seq, range);
                        }
                    }
                    None => self.fail(TransferError::Internal("admission gate closed".into())),
                },
            }
        }
        completed
    }

    fn spawn_upload_part(
        &self,
        parts: &mut JoinSet<PartJoin>,
        permit: AdmissionPermit,
        body: &Arc<dyn BodySource>,
        upload_id: &str,
        seq: u32,
        range: PartRange,
    ) {
        let part_number = (seq + 1).to_string();
        let path = with_query(
            &self.path,
            &[("partNumber", part_number.as_str()), ("uploadId", upload_id)],
        );
        let mut headers = self.control_headers();
        headers.insert("Content-Length", range.len().to_string());
        self.log_admitted(seq, Some(range));

        let body = Arc::clone(body);
        let resources = self.resources.clone();
        let endpoint = self.endpoint.clone();
        let halt = self.halt.clone();
        spawn_part(parts, permit, seq, async move {
            let data = read_body_range(body, range).await?;
            let request = HttpRequest::new("PUT", path, headers).with_body(data);
            let out = executor::execute(&resources, &endpoint, &request, &mut ResponseSink::Buffer, &halt)
                .await?;
            Ok(PartDone {
                head: out.head,
                bytes: range.len(),
                attempts: out.attempts,
            })
        });
    }

    async fn complete_upload(
        &mut self,
        upload_id: &str,
        completed: &[CompletedPart],
    ) -> Result<ResponseHead, TransferError> {
        if completed.len() != self.part_count {
            return Err(protocol_error(
                MultipartPhase::Complete,
                format!("{} of {} parts uploaded", completed.len(), self.part_count),
            ));
        }
        let xml = complete_upload_body(completed)
            .map_err(|e| protocol_error(MultipartPhase::Complete, e.to_string()))?;
        let mut headers = self.control_headers();
        headers.insert("Content-Length", xml.len().to_string());
        headers.insert("Content-Type", "application/xml");
        let request = HttpRequest::new(
            "POST",
            with_query(&self.path, &[("uploadId", upload_id)]),
            headers,
        )
        .with_body(Bytes::from(xml));

        let out = executor::execute(
            &self.resources,
            &self.endpoint,
            &request,
            &mut ResponseSink::Buffer,
            &self.halt,
        )
        .await?;
        // S3 may report a failed completion inside a 200 response.
        if let Some(err) = parse_error_body(&out.body) {
            return Err(protocol_error(
                MultipartPhase::Complete,
                format!(
                    "{}: {}",
                    err.code.as_deref().unwrap_or("Error"),
                    err.message.as_deref().unwrap_or("no message")
                ),
            ));
        }
        let mut head = out.head;
        match parse_complete_upload(&out.body) {
            Ok(result) => {
                if let (false, Some(etag)) = (head.headers.contains("etag"), result.etag) {
                    head.headers.insert("ETag", etag);
                }
            }
            Err(e) => tracing::debug!(id = self.id, error = %e, "complete reply carried no result document"),
        }
        Ok(head)
    }

    /// Best-effort abort. Runs even when the meta-request is halted; its own
    /// failure is only logged.
    async fn abort_upload(&mut self, upload_id: &str) {
        let request = HttpRequest::new(
            "DELETE",
            with_query(&self.path, &[("uploadId", upload_id)]),
            self.control_headers(),
        );
        match executor::execute(
            &self.resources,
            &self.endpoint,
            &request,
            &mut ResponseSink::Buffer,
            &HaltToken::new(),
        )
        .await
        {
            Ok(out) => {
                tracing::debug!(id = self.id, upload_id, status = out.head.status, "multipart upload aborted")
            }
            Err(e) => tracing::warn!(
                id = self.id,
                upload_id,
                error = %e.in_phase(MultipartPhase::Abort),
                "abort multipart upload failed"
            ),
        }
    }
}
