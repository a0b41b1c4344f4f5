// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! One adapter per remote call of the batch and files APIs.

use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use runtara_batch_http::{CancellationToken, HeaderValue, HttpRequest, StatusCode, Transport};
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument};

use crate::error::{BatchError, Operation, Result};
use crate::types::{
    CHAT_COMPLETIONS_ENDPOINT, COMPLETION_WINDOW, CreateJobRequest, FileDeletion, FileList,
    FileObject, Job, JobList,
};

/// Page size of `GET /batches`.
pub const JOB_PAGE_SIZE: usize = 100;

/// Content type of the uploaded shard part.
pub const SHARD_CONTENT_TYPE: &str = "application/jsonl";

/// Purpose of every uploaded shard.
pub const SHARD_PURPOSE: &str = "batch";

/// Thin adapters over the transport chain.
#[derive(Clone)]
pub struct Endpoints {
    transport: Arc<dyn Transport>,
    base_url: String,
}

impl Endpoints {
    pub fn new(transport: Arc<dyn Transport>, base_url: impl Into<String>) -> Self {
        Self {
            transport,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn call(
        &self,
        operation: Operation,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<(StatusCode, Bytes)> {
        let response = self
            .transport
            .send(request, cancel)
            .await
            .map_err(|e| BatchError::transport(operation, e))?;
        Ok((response.status, response.body))
    }

    // ========================================================================
    // Jobs
    // ========================================================================

    /// Create a job over an uploaded shard.
    #[instrument(skip(self, cancel), fields(input_file_id = %input_file_id))]
    pub async fn submit_job(&self, input_file_id: &str, cancel: &CancellationToken) -> Result<Job> {
        let body = serde_json::to_vec(&CreateJobRequest {
            input_file_id,
            endpoint: CHAT_COMPLETIONS_ENDPOINT,
            completion_window: COMPLETION_WINDOW,
        })?;
        let request = HttpRequest::post(self.url("/batches"))
            .with_body(HeaderValue::from_static("application/json"), body);

        let (status, body) = self.call(Operation::SubmitJob, request, cancel).await?;
        let job: Job = decode(Operation::SubmitJob, status, &body)?;
        info!(job_id = %job.id, "Submitted batch job");
        Ok(job)
    }

    #[instrument(skip(self, cancel), fields(job_id = %job_id))]
    pub async fn fetch_job(&self, job_id: &str, cancel: &CancellationToken) -> Result<Job> {
        debug!("Fetching batch job");
        let request = HttpRequest::get(self.url(&format!("/batches/{}", job_id)));
        let (status, body) = self.call(Operation::FetchJob, request, cancel).await?;
        decode(Operation::FetchJob, status, &body)
    }

    /// Every job visible to the credential, following the cursor.
    #[instrument(skip(self, cancel))]
    pub async fn list_jobs(&self, cancel: &CancellationToken) -> Result<Vec<Job>> {
        let mut jobs = Vec::new();
        let mut after: Option<String> = None;

        loop {
            let mut url = self.url(&format!("/batches?limit={}", JOB_PAGE_SIZE));
            if let Some(cursor) = &after {
                url.push_str("&after=");
                url.push_str(cursor);
            }

            let (status, body) = self
                .call(Operation::ListJobs, HttpRequest::get(url), cancel)
                .await?;
            let page: JobList = decode(Operation::ListJobs, status, &body)?;
            debug!(page_len = page.data.len(), has_more = page.has_more, "Fetched job page");

            let cursor = page
                .last_id
                .clone()
                .or_else(|| page.data.last().map(|job| job.id.clone()));
            jobs.extend(page.data);

            match cursor {
                Some(cursor) if page.has_more => after = Some(cursor),
                _ => break,
            }
        }

        Ok(jobs)
    }

    /// Request cancellation. An already cancelled job is not an error.
    #[instrument(skip(self, cancel), fields(job_id = %job_id))]
    pub async fn cancel_job(&self, job_id: &str, cancel: &CancellationToken) -> Result<()> {
        let request = HttpRequest::post(self.url(&format!("/batches/{}/cancel", job_id)));
        let (status, body) = self.call(Operation::CancelJob, request, cancel).await?;

        match status {
            StatusCode::OK => {
                info!("Cancellation requested");
                Ok(())
            }
            StatusCode::CONFLICT => {
                debug!("Job already cancelled");
                Ok(())
            }
            _ => Err(api_error(Operation::CancelJob, status, &body)),
        }
    }

    // ========================================================================
    // Files
    // ========================================================================

    /// Upload shard content as a `batch` purpose file.
    #[instrument(skip(self, content, cancel), fields(filename = %filename, bytes = content.len()))]
    pub async fn upload_artifact(
        &self,
        filename: &str,
        content: Bytes,
        cancel: &CancellationToken,
    ) -> Result<FileObject> {
        let form = MultipartForm::new()
            .text("purpose", SHARD_PURPOSE)
            .file("file", filename, SHARD_CONTENT_TYPE, &content);
        let content_type = HeaderValue::from_str(&form.content_type()).map_err(|e| {
            BatchError::Serialization(format!("invalid multipart content type: {}", e))
        })?;
        let request = HttpRequest::post(self.url("/files")).with_body(content_type, form.finish());

        let (status, body) = self.call(Operation::UploadArtifact, request, cancel).await?;
        let file: FileObject = decode(Operation::UploadArtifact, status, &body)?;
        info!(file_id = %file.id, "Uploaded shard");
        Ok(file)
    }

    /// File metadata.
    #[instrument(skip(self, cancel), fields(file_id = %file_id))]
    pub async fn fetch_artifact(
        &self,
        file_id: &str,
        cancel: &CancellationToken,
    ) -> Result<FileObject> {
        let request = HttpRequest::get(self.url(&format!("/files/{}", file_id)));
        let (status, body) = self.call(Operation::FetchArtifact, request, cancel).await?;
        decode(Operation::FetchArtifact, status, &body)
    }

    #[instrument(skip(self, cancel))]
    pub async fn list_artifacts(&self, cancel: &CancellationToken) -> Result<Vec<FileObject>> {
        let request = HttpRequest::get(self.url("/files"));
        let (status, body) = self.call(Operation::ListArtifacts, request, cancel).await?;
        let list: FileList = decode(Operation::ListArtifacts, status, &body)?;
        Ok(list.data)
    }

    /// Raw file bytes.
    #[instrument(skip(self, cancel), fields(file_id = %file_id))]
    pub async fn fetch_artifact_content(
        &self,
        file_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Bytes> {
        debug!("Fetching file content");
        let request = HttpRequest::get(self.url(&format!("/files/{}/content", file_id)));
        let (status, body) = self
            .call(Operation::FetchArtifactContent, request, cancel)
            .await?;
        if status != StatusCode::OK {
            return Err(api_error(Operation::FetchArtifactContent, status, &body));
        }
        Ok(body)
    }

    /// Delete a file. A file that is already gone is not an error.
    #[instrument(skip(self, cancel), fields(file_id = %file_id))]
    pub async fn delete_artifact(&self, file_id: &str, cancel: &CancellationToken) -> Result<()> {
        let request = HttpRequest::delete(self.url(&format!("/files/{}", file_id)));
        let (status, body) = self.call(Operation::DeleteArtifact, request, cancel).await?;

        if status == StatusCode::NOT_FOUND {
            debug!("File already deleted");
            return Ok(());
        }

        let deletion: FileDeletion = decode(Operation::DeleteArtifact, status, &body)?;
        if !deletion.deleted {
            return Err(BatchError::Api {
                operation: Operation::DeleteArtifact,
                status: status.as_u16(),
                message: format!("file {} was not deleted", file_id),
            });
        }

        info!("Deleted file");
        Ok(())
    }
}

fn api_error(operation: Operation, status: StatusCode, body: &[u8]) -> BatchError {
    BatchError::Api {
        operation,
        status: status.as_u16(),
        message: String::from_utf8_lossy(body).trim().to_string(),
    }
}

fn decode<T: DeserializeOwned>(operation: Operation, status: StatusCode, body: &[u8]) -> Result<T> {
    if status != StatusCode::OK {
        return Err(api_error(operation, status, body));
    }
    serde_json::from_slice(body).map_err(|e| BatchError::Decode {
        operation,
        message: e.to_string(),
    })
}

/// `multipart/form-data` body, encoded up front so the request can be
/// re-sent after a throttling response.
struct MultipartForm {
    boundary: String,
    body: BytesMut,
}

impl MultipartForm {
    fn new() -> Self {
        Self {
            boundary: format!("runtara-batch-{}", uuid::Uuid::new_v4().simple()),
            body: BytesMut::new(),
        }
    }

    fn text(mut self, name: &str, value: &str) -> Self {
        self.part_header(&format!("form-data; name=\"{}\"", name), None);
        self.body.put_slice(value.as_bytes());
        self.body.put_slice(b"\r\n");
        self
    }

    fn file(mut self, name: &str, filename: &str, content_type: &str, content: &[u8]) -> Self {
        let disposition = format!(
            "form-data; name=\"{}\"; filename=\"{}\"",
            name,
            filename.replace('"', "%22")
        );
        self.part_header(&disposition, Some(content_type));
        self.body.put_slice(content);
        self.body.put_slice(b"\r\n");
        self
    }

    fn part_header(&mut self, disposition: &str, content_type: Option<&str>) {
        self.body.put_slice(b"--");
        self.body.put_slice(self.boundary.as_bytes());
        self.body.put_slice(b"\r\nContent-Disposition: ");
        self.body.put_slice(disposition.as_bytes());
        self.body.put_slice(b"\r\n");
        if let Some(content_type) = content_type {
            self.body.put_slice(b"Content-Type: ");
            self.body.put_slice(content_type.as_bytes());
            self.body.put_slice(b"\r\n");
        }
        self.body.put_slice(b"\r\n");
    }

    fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    fn finish(mut self) -> Bytes {
        self.body.put_slice(b"--");
        self.body.put_slice(self.boundary.as_bytes());
        self.body.put_slice(b"--\r\n");
        self.body.freeze()
    }
}
