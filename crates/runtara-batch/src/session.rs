// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Batch session: accumulate requests, submit one shard, resolve results.
//!
//! A session submits at most one shard. Its job and artifact caches live as
//! long as the session, so watching an in-progress job move forward needs a
//! fresh session (or a configured cache directory, which only ever holds
//! completed jobs and their immutable output).

use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use runtara_batch_http::CancellationToken;
use tracing::{debug, info, instrument};

use crate::cache::TieredCache;
use crate::endpoints::Endpoints;
use crate::error::{BatchError, Result};
use crate::schema::StructuredOutput;
use crate::shard::{ShardBuilder, ShardLimits};
use crate::types::{BatchOutputLine, Job, JobStatus, ResponseFormat, ShardRecord};

/// Per-request overrides of the session defaults.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub model: Option<String>,
    pub seed: Option<u64>,
    pub structured_output: Option<StructuredOutput>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Require the response to follow a schema.
    pub fn with_structured_output(mut self, output: StructuredOutput) -> Self {
        self.structured_output = Some(output);
        self
    }
}

struct Pending {
    shard: ShardBuilder,
    submitted: Option<String>,
}

/// One accumulation session.
pub struct BatchSession {
    endpoints: Endpoints,
    model: String,
    seed: Option<u64>,
    pending: Mutex<Pending>,
    jobs: TieredCache<Job>,
    artifacts: TieredCache<Bytes>,
}

impl BatchSession {
    pub(crate) fn new(
        endpoints: Endpoints,
        model: String,
        seed: Option<u64>,
        cache_dir: Option<PathBuf>,
        limits: ShardLimits,
    ) -> Self {
        Self {
            endpoints,
            model,
            seed,
            pending: Mutex::new(Pending {
                shard: ShardBuilder::with_limits(limits),
                submitted: None,
            }),
            jobs: TieredCache::new(cache_dir.clone()),
            artifacts: TieredCache::new(cache_dir),
        }
    }

    fn lock_pending(&self) -> MutexGuard<'_, Pending> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of accumulated requests.
    pub fn len(&self) -> usize {
        self.lock_pending().shard.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_pending().shard.is_empty()
    }

    /// Serialized size of the shard so far.
    pub fn byte_size(&self) -> usize {
        self.lock_pending().shard.byte_size()
    }

    /// Append a chat request and return its ordinal.
    ///
    /// Fails with [`BatchError::CapacityExceeded`] once the shard is full;
    /// the session is left unchanged and the caller should submit it.
    /// Fails with [`BatchError::AlreadySubmitted`] once the shard was
    /// submitted; further requests need a new session.
    pub fn add_request(
        &self,
        custom_id: impl Into<String>,
        system_prompt: impl Into<String>,
        user_prompt: impl Into<String>,
        options: RequestOptions,
    ) -> Result<usize> {
        let model = options
            .model
            .filter(|model| !model.trim().is_empty())
            .unwrap_or_else(|| self.model.clone());
        let response_format = options
            .structured_output
            .map(StructuredOutput::into_response_format)
            .unwrap_or_else(ResponseFormat::json_object);

        let record = ShardRecord::chat(
            custom_id,
            model,
            options.seed.or(self.seed),
            system_prompt,
            user_prompt,
            response_format,
        );

        let mut pending = self.lock_pending();
        if let Some(job_id) = &pending.submitted {
            return Err(BatchError::AlreadySubmitted {
                job_id: job_id.clone(),
            });
        }
        let ordinal = pending.shard.push(&record)?;
        drop(pending);
        debug!(ordinal, custom_id = %record.custom_id, "Added request to shard");
        Ok(ordinal)
    }

    /// Upload the shard and create a job over it.
    ///
    /// Returns an empty id when nothing was added. Later calls on the same
    /// session return the id of the job already created.
    #[instrument(skip(self, cancel), fields(records))]
    pub async fn submit(&self, prefix: &str, cancel: &CancellationToken) -> Result<String> {
        let content = {
            let pending = self.lock_pending();
            if let Some(job_id) = &pending.submitted {
                debug!(job_id = %job_id, "Shard already submitted");
                return Ok(job_id.clone());
            }
            if pending.shard.is_empty() {
                debug!("Nothing to submit");
                return Ok(String::new());
            }
            tracing::Span::current().record("records", pending.shard.len());
            Bytes::copy_from_slice(pending.shard.as_bytes())
        };

        let filename = artifact_name(prefix, Utc::now());
        let file = self
            .endpoints
            .upload_artifact(&filename, content, cancel)
            .await?;
        let job = self.endpoints.submit_job(&file.id, cancel).await?;
        info!(job_id = %job.id, file_id = %file.id, "Shard submitted");

        self.lock_pending().submitted = Some(job.id.clone());
        Ok(job.id)
    }

    /// Content of the first choice of the result at `ordinal`.
    ///
    /// [`BatchError::JobNotCompleted`] means the job is still running and
    /// the call should be repeated later.
    #[instrument(skip(self, cancel), fields(job_id = %job_id))]
    pub async fn resolve_result(
        &self,
        job_id: &str,
        ordinal: usize,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let job = self
            .jobs
            .get_or_fetch(job_id, || self.endpoints.fetch_job(job_id, cancel))
            .await?;

        match job.status {
            JobStatus::Completed => {}
            JobStatus::Failed => {
                return Err(BatchError::JobFailed {
                    job_id: job.id.clone(),
                    details: failure_details(&job),
                });
            }
            status => {
                return Err(BatchError::JobNotCompleted {
                    job_id: job.id.clone(),
                    status,
                });
            }
        }

        let file_id = job
            .output_file_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                BatchError::NotFound(format!("batch job {} has no output file", job.id))
            })?;

        let content = self
            .artifacts
            .get_or_fetch(file_id, || {
                self.endpoints.fetch_artifact_content(file_id, cancel)
            })
            .await?;

        extract_content(job_id, &content, ordinal)
    }
}

/// `<prefix>-<UTC timestamp>.jsonl`
pub(crate) fn artifact_name(prefix: &str, now: DateTime<Utc>) -> String {
    format!("{}-{}.jsonl", prefix, now.format("%Y-%m-%dT%H-%M-%S"))
}

fn failure_details(job: &Job) -> String {
    let details = job.error_details();
    if details.is_empty() {
        return "no error details reported".to_string();
    }
    details
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn extract_content(job_id: &str, content: &[u8], ordinal: usize) -> Result<String> {
    let parse_error = |reason: String| BatchError::LineParse {
        job_id: job_id.to_string(),
        ordinal,
        reason,
    };

    let content = content.strip_suffix(b"\n").unwrap_or(content);
    let lines: Vec<&[u8]> = if content.is_empty() {
        Vec::new()
    } else {
        content.split(|byte| *byte == b'\n').collect()
    };

    let line = lines.get(ordinal).ok_or_else(|| {
        BatchError::NotFound(format!(
            "ordinal {} is out of range for batch job {} ({} lines)",
            ordinal,
            job_id,
            lines.len()
        ))
    })?;

    let parsed: BatchOutputLine =
        serde_json::from_slice(line).map_err(|e| parse_error(e.to_string()))?;

    if parsed.response.status_code != 200 {
        return Err(parse_error(format!(
            "request {} answered with status {}",
            parsed.custom_id, parsed.response.status_code
        )));
    }

    let choice = parsed
        .response
        .body
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| parse_error(format!("request {} has no choices", parsed.custom_id)))?;

    Ok(choice.message.content.unwrap_or_default())
}
