// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! BatchClient: the transport chain plus the remote job and file calls.

use std::sync::Arc;

use bytes::Bytes;
use runtara_batch_http::{
    CancellationToken, CongestionController, CongestionSnapshot, HeaderInterceptor,
    ReqwestTransport, Transport,
};
use tracing::{debug, instrument};

use crate::config::BatchConfig;
use crate::endpoints::Endpoints;
use crate::error::{BatchError, Result};
use crate::session::BatchSession;
use crate::shard::ShardLimits;
use crate::types::{FileObject, Job, JobStatus};

/// Client for an asynchronous batch inference API.
///
/// All calls of one client share a single congestion controller: a
/// throttling response slows down every caller until the remote recovers.
/// Independent clients keep independent congestion state.
pub struct BatchClient {
    config: BatchConfig,
    congestion: Arc<CongestionController>,
    endpoints: Endpoints,
    limits: ShardLimits,
}

impl BatchClient {
    /// Create a client over a reqwest transport.
    pub fn new(config: BatchConfig) -> Result<Self> {
        let base = ReqwestTransport::new(config.request_timeout)
            .map_err(|e| BatchError::Config(format!("failed to build HTTP client: {}", e)))?;
        Self::with_transport(config, Arc::new(base))
    }

    /// Create a client from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(BatchConfig::from_env()?)
    }

    /// Create a client over a caller-supplied base transport.
    ///
    /// Authentication and content negotiation headers, and congestion
    /// control, are layered on top of `transport`.
    pub fn with_transport(config: BatchConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(BatchError::Config("api key must not be empty".to_string()));
        }

        let headers = HeaderInterceptor::new(transport)
            .with_header("Authorization", &format!("Bearer {}", config.api_key))
            .and_then(|headers| headers.with_header("Accept", "application/json"))
            .map_err(|e| BatchError::Config(format!("invalid request header: {}", e)))?;

        let congestion = Arc::new(CongestionController::new(
            Arc::new(headers),
            config.congestion.clone(),
        ));
        let endpoints = Endpoints::new(congestion.clone(), config.base_url.clone());

        Ok(Self {
            config,
            congestion,
            endpoints,
            limits: ShardLimits::default(),
        })
    }

    /// Override the shard ceilings of new sessions.
    pub fn with_shard_limits(mut self, limits: ShardLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Get the client configuration.
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Current congestion state.
    pub fn congestion(&self) -> CongestionSnapshot {
        self.congestion.snapshot()
    }

    /// Start an empty session with its own caches.
    pub fn new_session(&self) -> BatchSession {
        BatchSession::new(
            self.endpoints.clone(),
            self.config.model.clone(),
            self.config.seed,
            self.config.cache_dir.clone(),
            self.limits,
        )
    }

    /// Fetch a job, bypassing every cache.
    pub async fn retrieve_job(&self, job_id: &str, cancel: &CancellationToken) -> Result<Job> {
        self.endpoints.fetch_job(job_id, cancel).await
    }

    /// Every job whose status is in `statuses`; all jobs when it is empty.
    #[instrument(skip(self, cancel))]
    pub async fn list_jobs(
        &self,
        statuses: &[JobStatus],
        cancel: &CancellationToken,
    ) -> Result<Vec<Job>> {
        let mut jobs = self.endpoints.list_jobs(cancel).await?;
        if !statuses.is_empty() {
            jobs.retain(|job| statuses.contains(&job.status));
        }
        debug!(count = jobs.len(), "Listed jobs");
        Ok(jobs)
    }

    pub async fn cancel_job(&self, job_id: &str, cancel: &CancellationToken) -> Result<()> {
        self.endpoints.cancel_job(job_id, cancel).await
    }

    pub async fn list_artifacts(&self, cancel: &CancellationToken) -> Result<Vec<FileObject>> {
        self.endpoints.list_artifacts(cancel).await
    }

    /// File metadata.
    pub async fn retrieve_artifact(
        &self,
        file_id: &str,
        cancel: &CancellationToken,
    ) -> Result<FileObject> {
        self.endpoints.fetch_artifact(file_id, cancel).await
    }

    /// Raw file bytes, bypassing every cache.
    pub async fn retrieve_artifact_content(
        &self,
        file_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Bytes> {
        self.endpoints.fetch_artifact_content(file_id, cancel).await
    }

    pub async fn delete_artifact(&self, file_id: &str, cancel: &CancellationToken) -> Result<()> {
        self.endpoints.delete_artifact(file_id, cancel).await
    }
}
