// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runtara Batch
//!
//! Client for asynchronous batch inference APIs with an OpenAI-compatible
//! batch and files surface.
//!
//! # Architecture
//!
//! A [`BatchSession`] accumulates chat requests into one size-bounded shard
//! of line-delimited records:
//! - `add_request` appends a record and returns its ordinal
//! - `submit` uploads the shard and creates a remote job over it
//! - `resolve_result` fetches the job and its output (memory cache, then
//!   the optional cache directory, then the remote) and returns the content
//!   of the line at an ordinal
//!
//! Every remote call goes through the congestion-controlled transport chain
//! of `runtara-batch-http`, shared by all sessions of one [`BatchClient`].
//!
//! # Example
//!
//! ```no_run
//! use runtara_batch::{BatchClient, BatchConfig, BatchError, RequestOptions};
//! use runtara_batch_http::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = BatchClient::new(
//!     BatchConfig::new("sk-...").with_cache_dir("/var/cache/runtara-batch"),
//! )?;
//! let cancel = CancellationToken::new();
//!
//! let session = client.new_session();
//! let ordinal = session.add_request(
//!     "ticket-17",
//!     "Classify the ticket. Answer in JSON.",
//!     "The printer is on fire.",
//!     RequestOptions::new(),
//! )?;
//! let job_id = session.submit("tickets", &cancel).await?;
//!
//! // Later, possibly from another process
//! match client.new_session().resolve_result(&job_id, ordinal, &cancel).await {
//!     Ok(content) => println!("{}", content),
//!     Err(BatchError::JobNotCompleted { status, .. }) => println!("still {}", status),
//!     Err(e) => return Err(e.into()),
//! }
//! # Ok(())
//! # }
//! ```

mod cache;
mod client;
mod config;
mod endpoints;
mod error;
mod schema;
mod session;
mod shard;
mod types;

pub use cache::{Persist, TieredCache};
pub use client::BatchClient;
pub use config::{BatchConfig, DEFAULT_BASE_URL, DEFAULT_MODEL, DEFAULT_SEED};
pub use endpoints::{JOB_PAGE_SIZE, SHARD_CONTENT_TYPE, SHARD_PURPOSE};
pub use error::{BatchError, CapacityLimit, Operation, Result};
pub use schema::StructuredOutput;
pub use session::{BatchSession, RequestOptions};
pub use shard::{MAX_BYTES, MAX_RECORDS, ShardBuilder, ShardLimits};
pub use types::{
    BatchOutputLine, CHAT_COMPLETIONS_ENDPOINT, COMPLETION_WINDOW, ChatCompletion,
    ChatCompletionBody, ChatMessage, Choice, ChoiceMessage, FileDeletion, FileList, FileObject,
    FilePurpose, FileStatus, Job, JobErrorDetail, JobErrors, JobList, JobStatus,
    JsonSchemaFormat, LineResponse, RequestCounts, ResponseFormat, ShardRecord, Usage,
};
