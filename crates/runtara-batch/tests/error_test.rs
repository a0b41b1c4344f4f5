// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error type tests for runtara-batch.

use std::error::Error;

use runtara_batch::{BatchError, CapacityLimit, JobStatus, Operation};
use runtara_batch_http::TransportError;

#[test]
fn test_config_error_display() {
    let err = BatchError::Config("OPENAI_API_KEY is not set".to_string());
    assert!(err.to_string().contains("configuration error"));
    assert!(err.to_string().contains("OPENAI_API_KEY"));
    assert!(err.operation().is_none());
}

#[test]
fn test_transport_error_keeps_source() {
    let err = BatchError::Transport {
        operation: Operation::FetchJob,
        source: TransportError::Network("connection reset".to_string()),
    };
    let display = err.to_string();
    assert!(display.contains("fetch_job"));
    assert!(display.contains("connection reset"));
    assert!(err.source().is_some());
    assert_eq!(err.operation(), Some(Operation::FetchJob));
    assert!(!err.is_retryable());
}

#[test]
fn test_too_many_attempts_is_retryable() {
    let err = BatchError::TooManyAttempts {
        operation: Operation::ListJobs,
        attempts: 5,
    };
    assert!(err.to_string().contains("5 throttled attempts"));
    assert!(err.is_retryable());
}

#[test]
fn test_api_error_display() {
    let err = BatchError::Api {
        operation: Operation::CancelJob,
        status: 500,
        message: "Internal error".to_string(),
    };
    let display = err.to_string();
    assert!(display.contains("cancel_job"));
    assert!(display.contains("500"));
    assert!(display.contains("Internal error"));
}

#[test]
fn test_upload_and_submission_errors() {
    let upload = BatchError::Api {
        operation: Operation::UploadArtifact,
        status: 413,
        message: "too large".to_string(),
    };
    assert!(upload.is_upload_error());
    assert!(!upload.is_submission_error());

    let submission = BatchError::Decode {
        operation: Operation::SubmitJob,
        message: "missing field `id`".to_string(),
    };
    assert!(submission.is_submission_error());
    assert!(!submission.is_upload_error());
}

#[test]
fn test_job_not_completed_is_retryable() {
    let err = BatchError::JobNotCompleted {
        job_id: "batch_1".to_string(),
        status: JobStatus::InProgress,
    };
    assert!(err.to_string().contains("in_progress"));
    assert!(err.is_retryable());
}

#[test]
fn test_job_failed_is_not_retryable() {
    let err = BatchError::JobFailed {
        job_id: "batch_1".to_string(),
        details: "invalid_json: bad line".to_string(),
    };
    assert!(err.to_string().contains("batch_1"));
    assert!(err.to_string().contains("invalid_json"));
    assert!(!err.is_retryable());
}

#[test]
fn test_capacity_error_display() {
    let err = BatchError::CapacityExceeded {
        limit: CapacityLimit::Records,
        reason: "shard already holds 50000 records".to_string(),
    };
    assert!(err.to_string().contains("record limit"));
    assert!(err.to_string().contains("50000"));
}

#[test]
fn test_already_submitted_display() {
    let err = BatchError::AlreadySubmitted {
        job_id: "batch_9".to_string(),
    };
    assert!(err.to_string().contains("already submitted"));
    assert!(err.to_string().contains("batch_9"));
    assert!(!err.is_retryable());
    assert!(err.operation().is_none());
}

#[test]
fn test_line_parse_error_display() {
    let err = BatchError::LineParse {
        job_id: "batch_1".to_string(),
        ordinal: 7,
        reason: "request r-7 has no choices".to_string(),
    };
    let display = err.to_string();
    assert!(display.contains("line 7"));
    assert!(display.contains("batch_1"));
    assert!(display.contains("no choices"));
}

#[test]
fn test_from_serde_json_error() {
    let json_err = serde_json::from_str::<serde_json::Value>("{invalid}").unwrap_err();
    let err: BatchError = json_err.into();
    assert!(matches!(err, BatchError::Serialization(_)));
}
