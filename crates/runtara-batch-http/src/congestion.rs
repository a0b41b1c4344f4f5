// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Adaptive congestion control for rate-limited remotes.
//!
//! The controller has two operating modes:
//!
//! - **Concurrent**: requests are forwarded immediately, with no
//!   coordination between callers.
//! - **Serialized**: one request at a time holds the execution slot, sleeps
//!   for the current backoff and only then goes out.
//!
//! A `429 Too Many Requests` answer moves the controller into serialized
//! mode and grows the backoff; each run of `success_streak` consecutive
//! `200 OK` answers shrinks it again. Once the backoff would fall below the
//! minimum the controller returns to concurrent mode. State is shared by
//! every caller of one controller because the remote limits per credential,
//! not per request.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Result, TransportError};
use crate::message::{HttpRequest, HttpResponse};
use crate::transport::Transport;

const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;

/// Tuning knobs for [`CongestionController`].
#[derive(Debug, Clone, PartialEq)]
pub struct CongestionConfig {
    /// Floor of the backoff while serialized.
    pub min_backoff: Duration,
    /// Ceiling of the backoff.
    pub max_backoff: Duration,
    /// Growth factor on throttling, divisor on recovery.
    pub backoff_factor: f64,
    /// Consecutive successes needed before the backoff shrinks.
    pub success_streak: u32,
    /// Maximum attempts for a single request, 0 for unlimited.
    pub max_attempts: u32,
}

impl Default for CongestionConfig {
    fn default() -> Self {
        Self {
            min_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            success_streak: 10,
            max_attempts: 0,
        }
    }
}

impl CongestionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_backoff(mut self, backoff: Duration) -> Self {
        self.min_backoff = backoff;
        self
    }

    pub fn with_max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = backoff;
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn with_success_streak(mut self, streak: u32) -> Self {
        self.success_streak = streak;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }
}

/// Operating mode of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CongestionMode {
    /// No client-side throttling.
    Concurrent,
    /// One in-flight request, delayed by the backoff.
    Serialized,
}

/// How a response status affected the congestion state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The remote throttled; the request must be retried.
    Throttled,
    /// A plain success that counts towards recovery.
    Succeeded,
    /// Any other status; state is untouched.
    Ignored,
}

/// Point-in-time view of the congestion state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CongestionSnapshot {
    pub mode: CongestionMode,
    pub backoff: Duration,
    pub consecutive_successes: u32,
}

/// The mode/backoff/streak state machine, free of any I/O.
#[derive(Debug, Clone)]
pub struct CongestionState {
    min_backoff: Duration,
    max_backoff: Duration,
    factor: f64,
    success_streak: u32,
    mode: CongestionMode,
    backoff: Duration,
    consecutive_successes: u32,
}

impl CongestionState {
    pub fn new(config: &CongestionConfig) -> Self {
        let factor = if config.backoff_factor.is_finite() && config.backoff_factor > 1.0 {
            config.backoff_factor
        } else {
            warn!(
                factor = config.backoff_factor,
                "Backoff factor must be a finite number above 1, using default"
            );
            DEFAULT_BACKOFF_FACTOR
        };

        Self {
            min_backoff: config.min_backoff,
            max_backoff: config.max_backoff.max(config.min_backoff),
            factor,
            success_streak: config.success_streak.max(1),
            mode: CongestionMode::Concurrent,
            backoff: Duration::ZERO,
            consecutive_successes: 0,
        }
    }

    /// Feed one response status into the state machine.
    pub fn observe(&mut self, status: StatusCode) -> Verdict {
        match status {
            StatusCode::TOO_MANY_REQUESTS => {
                self.on_throttled();
                Verdict::Throttled
            }
            StatusCode::OK => {
                self.on_success();
                Verdict::Succeeded
            }
            _ => Verdict::Ignored,
        }
    }

    fn on_throttled(&mut self) {
        self.mode = CongestionMode::Serialized;
        self.consecutive_successes = 0;

        // Raise to the floor first, multiply second, clamp last.
        if self.backoff < self.min_backoff {
            self.backoff = self.min_backoff;
        }
        let grown = Duration::try_from_secs_f64(self.backoff.as_secs_f64() * self.factor)
            .unwrap_or(self.max_backoff);
        self.backoff = grown.min(self.max_backoff);
    }

    fn on_success(&mut self) {
        self.consecutive_successes = self.consecutive_successes.saturating_add(1);
        if self.consecutive_successes < self.success_streak {
            return;
        }
        self.consecutive_successes = 0;

        let decayed = Duration::try_from_secs_f64(self.backoff.as_secs_f64() / self.factor)
            .unwrap_or(Duration::ZERO);
        if decayed < self.min_backoff {
            self.backoff = self.min_backoff;
            self.mode = CongestionMode::Concurrent;
        } else {
            self.backoff = decayed;
        }
    }

    pub fn mode(&self) -> CongestionMode {
        self.mode
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    pub fn consecutive_successes(&self) -> u32 {
        self.consecutive_successes
    }

    pub fn snapshot(&self) -> CongestionSnapshot {
        CongestionSnapshot {
            mode: self.mode,
            backoff: self.backoff,
            consecutive_successes: self.consecutive_successes,
        }
    }
}

/// Phases of a single call through the controller.
enum Phase {
    Attempt,
    ThrottleWait,
    Success(HttpResponse),
    Exhausted,
}

/// Outermost transport link: retries throttled requests and switches the
/// whole client between concurrent and serialized dispatch.
pub struct CongestionController {
    inner: Arc<dyn Transport>,
    max_attempts: u32,
    /// Mirror of `state.mode` for the lock-free fast path.
    serialized: AtomicBool,
    state: Mutex<CongestionState>,
    /// Held across the backoff sleep and dispatch while serialized.
    slot: tokio::sync::Mutex<()>,
}

impl CongestionController {
    pub fn new(inner: Arc<dyn Transport>, config: CongestionConfig) -> Self {
        Self {
            inner,
            max_attempts: config.max_attempts,
            serialized: AtomicBool::new(false),
            state: Mutex::new(CongestionState::new(&config)),
            slot: tokio::sync::Mutex::new(()),
        }
    }

    /// Current mode, read without taking the state lock.
    pub fn mode(&self) -> CongestionMode {
        if self.serialized.load(Ordering::Acquire) {
            CongestionMode::Serialized
        } else {
            CongestionMode::Concurrent
        }
    }

    pub fn snapshot(&self) -> CongestionSnapshot {
        self.lock_state().snapshot()
    }

    fn lock_state(&self) -> MutexGuard<'_, CongestionState> {
        // The state is plain data; a panic elsewhere cannot leave it torn.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn dispatch(
        &self,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse> {
        if !self.serialized.load(Ordering::Acquire) {
            return self.inner.send(request, cancel).await;
        }

        let _slot = tokio::select! {
            biased;

            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            guard = self.slot.lock() => guard,
        };

        let backoff = self.lock_state().backoff();
        debug!(backoff_ms = backoff.as_millis() as u64, "Serialized dispatch");

        tokio::select! {
            biased;

            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            _ = tokio::time::sleep(backoff) => {}
        }

        self.inner.send(request, cancel).await
    }

    fn record(&self, status: StatusCode) -> Verdict {
        let mut state = self.lock_state();
        let before = state.mode();
        let verdict = state.observe(status);
        let after = state.mode();
        self.serialized
            .store(after == CongestionMode::Serialized, Ordering::Release);

        match (before, after) {
            (CongestionMode::Concurrent, CongestionMode::Serialized) => warn!(
                backoff_ms = state.backoff().as_millis() as u64,
                "Remote is throttling, switching to serialized dispatch"
            ),
            (CongestionMode::Serialized, CongestionMode::Concurrent) => {
                info!("Throttling subsided, switching back to concurrent dispatch")
            }
            _ => {}
        }

        verdict
    }
}

#[async_trait]
impl Transport for CongestionController {
    async fn send(
        &self,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse> {
        let mut attempts: u32 = 0;
        let mut phase = Phase::Attempt;

        loop {
            phase = match phase {
                Phase::Attempt => {
                    attempts += 1;
                    if self.max_attempts > 0 && attempts > self.max_attempts {
                        Phase::Exhausted
                    } else {
                        // Transport failures propagate without touching state.
                        let response = self.dispatch(request.clone(), cancel).await?;
                        match self.record(response.status) {
                            Verdict::Throttled => Phase::ThrottleWait,
                            Verdict::Succeeded | Verdict::Ignored => Phase::Success(response),
                        }
                    }
                }
                Phase::ThrottleWait => {
                    debug!(attempt = attempts, url = %request.url, "Request throttled, retrying");
                    Phase::Attempt
                }
                Phase::Success(response) => return Ok(response),
                Phase::Exhausted => {
                    warn!(
                        attempts = self.max_attempts,
                        url = %request.url,
                        "Giving up on throttled request"
                    );
                    return Err(TransportError::TooManyAttempts {
                        attempts: self.max_attempts,
                    });
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> CongestionState {
        CongestionState::new(&CongestionConfig::default())
    }

    #[test]
    fn test_initial_state() {
        let state = state();
        assert_eq!(state.mode(), CongestionMode::Concurrent);
        assert_eq!(state.backoff(), Duration::ZERO);
        assert_eq!(state.consecutive_successes(), 0);
    }

    #[test]
    fn test_first_throttle_jumps_past_minimum() {
        let mut state = state();
        assert_eq!(state.observe(StatusCode::TOO_MANY_REQUESTS), Verdict::Throttled);

        // 0 is raised to 1s, then doubled.
        assert_eq!(state.mode(), CongestionMode::Serialized);
        assert_eq!(state.backoff(), Duration::from_secs(2));
    }

    #[test]
    fn test_throttle_is_capped() {
        let mut state = state();
        let mut previous = Duration::ZERO;
        for _ in 0..20 {
            state.observe(StatusCode::TOO_MANY_REQUESTS);
            assert!(state.backoff() >= previous);
            assert!(state.backoff() <= Duration::from_secs(60));
            previous = state.backoff();
        }
        assert_eq!(state.backoff(), Duration::from_secs(60));
    }

    #[test]
    fn test_streak_below_threshold_keeps_backoff() {
        let mut state = state();
        state.observe(StatusCode::TOO_MANY_REQUESTS);
        for _ in 0..9 {
            assert_eq!(state.observe(StatusCode::OK), Verdict::Succeeded);
        }
        assert_eq!(state.consecutive_successes(), 9);
        assert_eq!(state.backoff(), Duration::from_secs(2));
        assert_eq!(state.mode(), CongestionMode::Serialized);
    }

    #[test]
    fn test_throttle_resets_streak() {
        let mut state = state();
        state.observe(StatusCode::TOO_MANY_REQUESTS);
        for _ in 0..9 {
            state.observe(StatusCode::OK);
        }
        state.observe(StatusCode::TOO_MANY_REQUESTS);

        assert_eq!(state.consecutive_successes(), 0);
        assert_eq!(state.backoff(), Duration::from_secs(4));
    }

    #[test]
    fn test_decay_then_recovery() {
        let mut state = state();
        state.observe(StatusCode::TOO_MANY_REQUESTS); // 2s

        for _ in 0..10 {
            state.observe(StatusCode::OK);
        }
        assert_eq!(state.backoff(), Duration::from_secs(1));
        assert_eq!(state.mode(), CongestionMode::Serialized);
        assert_eq!(state.consecutive_successes(), 0);

        for _ in 0..10 {
            state.observe(StatusCode::OK);
        }
        assert_eq!(state.backoff(), Duration::from_secs(1));
        assert_eq!(state.mode(), CongestionMode::Concurrent);
    }

    #[test]
    fn test_other_statuses_are_ignored() {
        let mut state = state();
        state.observe(StatusCode::TOO_MANY_REQUESTS);
        state.observe(StatusCode::OK);
        let before = state.snapshot();

        for status in [
            StatusCode::CREATED,
            StatusCode::BAD_REQUEST,
            StatusCode::NOT_FOUND,
            StatusCode::INTERNAL_SERVER_ERROR,
        ] {
            assert_eq!(state.observe(status), Verdict::Ignored);
        }
        assert_eq!(state.snapshot(), before);
    }

    #[test]
    fn test_invalid_factor_falls_back_to_default() {
        let config = CongestionConfig::default().with_backoff_factor(0.5);
        let mut state = CongestionState::new(&config);
        state.observe(StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(state.backoff(), Duration::from_secs(2));
    }

    #[test]
    fn test_config_builder() {
        let config = CongestionConfig::new()
            .with_min_backoff(Duration::from_millis(100))
            .with_max_backoff(Duration::from_secs(5))
            .with_backoff_factor(3.0)
            .with_success_streak(4)
            .with_max_attempts(7);

        assert_eq!(config.min_backoff, Duration::from_millis(100));
        assert_eq!(config.max_backoff, Duration::from_secs(5));
        assert_eq!(config.backoff_factor, 3.0);
        assert_eq!(config.success_streak, 4);
        assert_eq!(config.max_attempts, 7);
    }
}
