// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for runtara-batch.

use std::fmt;

use runtara_batch_http::TransportError;
use thiserror::Error;

use crate::types::JobStatus;

/// Result type using BatchError.
pub type Result<T> = std::result::Result<T, BatchError>;

/// Remote operation an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    SubmitJob,
    FetchJob,
    ListJobs,
    CancelJob,
    UploadArtifact,
    FetchArtifact,
    FetchArtifactContent,
    ListArtifacts,
    DeleteArtifact,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::SubmitJob => "submit_job",
            Operation::FetchJob => "fetch_job",
            Operation::ListJobs => "list_jobs",
            Operation::CancelJob => "cancel_job",
            Operation::UploadArtifact => "upload_artifact",
            Operation::FetchArtifact => "fetch_artifact",
            Operation::FetchArtifactContent => "fetch_artifact_content",
            Operation::ListArtifacts => "list_artifacts",
            Operation::DeleteArtifact => "delete_artifact",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which shard ceiling a rejected request would have crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityLimit {
    Records,
    Bytes,
}

impl fmt::Display for CapacityLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapacityLimit::Records => f.write_str("record limit"),
            CapacityLimit::Bytes => f.write_str("byte limit"),
        }
    }
}

/// Errors that can occur when using the batch client.
#[derive(Debug, Error)]
pub enum BatchError {
    /// Configuration error (missing or invalid values).
    #[error("configuration error: {0}")]
    Config(String),

    /// Connection-level failure or cancellation.
    #[error("{operation} failed: {source}")]
    Transport {
        operation: Operation,
        #[source]
        source: TransportError,
    },

    /// The remote kept throttling until the retry ceiling was reached.
    #[error("{operation} gave up after {attempts} throttled attempts")]
    TooManyAttempts { operation: Operation, attempts: u32 },

    /// The remote answered with an unexpected status.
    #[error("{operation} failed with status {status}: {message}")]
    Api {
        operation: Operation,
        status: u16,
        message: String,
    },

    /// The remote answered with a body that could not be decoded.
    #[error("{operation} returned an undecodable body: {message}")]
    Decode {
        operation: Operation,
        message: String,
    },

    /// A request line could not be encoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The shard is full; submit it and start a new session.
    #[error("shard {limit} exceeded: {reason}")]
    CapacityExceeded { limit: CapacityLimit, reason: String },

    /// The session already submitted its shard; start a new session.
    #[error("shard already submitted as batch job {job_id}")]
    AlreadySubmitted { job_id: String },

    /// The remote job failed as a whole.
    #[error("batch job {job_id} failed: {details}")]
    JobFailed { job_id: String, details: String },

    /// The job has not reached its completed state yet; retry later.
    #[error("batch job {job_id} is not completed yet (status: {status})")]
    JobNotCompleted { job_id: String, status: JobStatus },

    /// A line of the output artifact could not be interpreted.
    #[error("failed to parse line {ordinal} of batch job {job_id}: {reason}")]
    LineParse {
        job_id: String,
        ordinal: usize,
        reason: String,
    },

    /// Invalid ordinal or missing remote resource.
    #[error("not found: {0}")]
    NotFound(String),
}

impl BatchError {
    /// Map a transport failure raised while performing `operation`.
    pub(crate) fn transport(operation: Operation, err: TransportError) -> Self {
        match err {
            TransportError::TooManyAttempts { attempts } => {
                BatchError::TooManyAttempts { operation, attempts }
            }
            source => BatchError::Transport { operation, source },
        }
    }

    /// Remote operation the error came from, if any.
    pub fn operation(&self) -> Option<Operation> {
        match self {
            BatchError::Transport { operation, .. }
            | BatchError::TooManyAttempts { operation, .. }
            | BatchError::Api { operation, .. }
            | BatchError::Decode { operation, .. } => Some(*operation),
            _ => None,
        }
    }

    /// Whether calling again later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BatchError::JobNotCompleted { .. } | BatchError::TooManyAttempts { .. }
        )
    }

    /// Failure while uploading the shard artifact.
    pub fn is_upload_error(&self) -> bool {
        self.operation() == Some(Operation::UploadArtifact)
    }

    /// Failure while creating the batch job.
    pub fn is_submission_error(&self) -> bool {
        self.operation() == Some(Operation::SubmitJob)
    }
}

impl From<serde_json::Error> for BatchError {
    fn from(err: serde_json::Error) -> Self {
        BatchError::Serialization(err.to_string())
    }
}
