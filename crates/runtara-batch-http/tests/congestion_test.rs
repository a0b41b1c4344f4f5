// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Congestion controller tests against a scripted transport.
//!
//! These tests run on a paused tokio clock, so backoff sleeps complete
//! instantly while `tokio::time::Instant` still reports the virtual time
//! that elapsed.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use runtara_batch_http::{
    CancellationToken, CongestionConfig, CongestionController, CongestionMode, HttpRequest,
    HttpResponse, StatusCode, Transport, TransportError,
};

enum Outcome {
    Status(u16),
    NetworkFailure,
}

/// Answers from a script, then 200 once the script runs out.
#[derive(Default)]
struct ScriptedTransport {
    script: Mutex<VecDeque<Outcome>>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    latency: Duration,
}

impl ScriptedTransport {
    fn new(script: impl IntoIterator<Item = Outcome>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            ..Default::default()
        }
    }

    fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(
        &self,
        _request: HttpRequest,
        _cancel: &CancellationToken,
    ) -> runtara_batch_http::Result<HttpResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Outcome::Status(code)) => Ok(HttpResponse::new(
                StatusCode::from_u16(code).unwrap(),
                format!("status {code}"),
            )),
            Some(Outcome::NetworkFailure) => {
                Err(TransportError::Network("connection reset".to_string()))
            }
            None => Ok(HttpResponse::new(StatusCode::OK, "ok")),
        }
    }
}

fn request() -> HttpRequest {
    HttpRequest::get("http://remote.test/v1/batches")
}

fn controller(inner: Arc<ScriptedTransport>, config: CongestionConfig) -> CongestionController {
    CongestionController::new(inner, config)
}

/// Drive the controller into serialized mode with a 2s backoff.
async fn throttle_once(controller: &CongestionController, inner: &ScriptedTransport) {
    inner
        .script
        .lock()
        .unwrap()
        .push_back(Outcome::Status(429));
    controller
        .send(request(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(controller.mode(), CongestionMode::Serialized);
}

#[tokio::test(start_paused = true)]
async fn test_persistent_throttling_exhausts_attempts() {
    let inner = Arc::new(ScriptedTransport::new(
        (0..10).map(|_| Outcome::Status(429)),
    ));
    let controller = controller(
        inner.clone(),
        CongestionConfig::default().with_max_attempts(5),
    );

    let start = tokio::time::Instant::now();
    let result = controller.send(request(), &CancellationToken::new()).await;

    assert!(matches!(
        result,
        Err(TransportError::TooManyAttempts { attempts: 5 })
    ));
    assert_eq!(inner.calls(), 5);

    let snapshot = controller.snapshot();
    assert_eq!(snapshot.mode, CongestionMode::Serialized);
    assert_eq!(snapshot.backoff, Duration::from_secs(32));
    assert_eq!(snapshot.consecutive_successes, 0);

    // Attempts 2..=5 waited 2s, 4s, 8s and 16s.
    assert!(start.elapsed() >= Duration::from_secs(30));
}

#[tokio::test(start_paused = true)]
async fn test_backoff_never_exceeds_maximum() {
    let inner = Arc::new(ScriptedTransport::new(
        (0..12).map(|_| Outcome::Status(429)),
    ));
    let controller = controller(inner.clone(), CongestionConfig::default());

    let response = controller
        .send(request(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(inner.calls(), 13);
    assert!(controller.snapshot().backoff <= Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn test_throttled_request_is_retried_after_backoff() {
    let inner = Arc::new(ScriptedTransport::new([Outcome::Status(429)]));
    let controller = controller(inner.clone(), CongestionConfig::default());

    let start = tokio::time::Instant::now();
    let response = controller
        .send(request(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(inner.calls(), 2);
    assert!(start.elapsed() >= Duration::from_secs(2));
    assert_eq!(controller.snapshot().consecutive_successes, 1);
}

#[tokio::test(start_paused = true)]
async fn test_success_streak_restores_concurrent_mode() {
    let inner = Arc::new(ScriptedTransport::default());
    let controller = controller(inner.clone(), CongestionConfig::default());
    throttle_once(&controller, &inner).await;

    for _ in 0..19 {
        controller
            .send(request(), &CancellationToken::new())
            .await
            .unwrap();
    }
    // The retry of the throttled call already counted once.
    let snapshot = controller.snapshot();
    assert_eq!(snapshot.mode, CongestionMode::Concurrent);
    assert_eq!(snapshot.backoff, Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_throttle_after_nine_successes_still_grows_backoff() {
    let inner = Arc::new(ScriptedTransport::default());
    let controller = controller(inner.clone(), CongestionConfig::default());
    throttle_once(&controller, &inner).await;

    for _ in 0..8 {
        controller
            .send(request(), &CancellationToken::new())
            .await
            .unwrap();
    }
    assert_eq!(controller.snapshot().consecutive_successes, 9);

    throttle_once(&controller, &inner).await;

    let snapshot = controller.snapshot();
    assert_eq!(snapshot.backoff, Duration::from_secs(4));
    // Only the retry that followed the throttle has counted.
    assert_eq!(snapshot.consecutive_successes, 1);
}

#[tokio::test(start_paused = true)]
async fn test_other_statuses_pass_through_untouched() {
    let inner = Arc::new(ScriptedTransport::new([
        Outcome::Status(500),
        Outcome::Status(404),
    ]));
    let controller = controller(inner.clone(), CongestionConfig::default());
    let before = controller.snapshot();

    let first = controller
        .send(request(), &CancellationToken::new())
        .await
        .unwrap();
    let second = controller
        .send(request(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(first.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(second.status, StatusCode::NOT_FOUND);
    assert_eq!(inner.calls(), 2);
    assert_eq!(controller.snapshot(), before);
}

#[tokio::test(start_paused = true)]
async fn test_network_failure_propagates_without_state_change() {
    let inner = Arc::new(ScriptedTransport::default());
    let controller = controller(inner.clone(), CongestionConfig::default());
    throttle_once(&controller, &inner).await;
    let before = controller.snapshot();

    inner
        .script
        .lock()
        .unwrap()
        .push_back(Outcome::NetworkFailure);
    let result = controller.send(request(), &CancellationToken::new()).await;

    assert!(matches!(result, Err(TransportError::Network(_))));
    assert_eq!(controller.snapshot(), before);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_aborts_backoff_sleep() {
    let inner = Arc::new(ScriptedTransport::default());
    let controller = controller(inner.clone(), CongestionConfig::default());
    throttle_once(&controller, &inner).await;
    let calls_before = inner.calls();
    let state_before = controller.snapshot();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let start = tokio::time::Instant::now();
    let result = controller.send(request(), &cancel).await;

    assert!(matches!(result, Err(TransportError::Cancelled)));
    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(inner.calls(), calls_before);
    assert_eq!(controller.snapshot(), state_before);
}

#[tokio::test(start_paused = true)]
async fn test_serialized_mode_allows_one_request_in_flight() {
    let inner = Arc::new(ScriptedTransport::default().with_latency(Duration::from_millis(50)));
    let controller = controller(inner.clone(), CongestionConfig::default());
    throttle_once(&controller, &inner).await;
    inner.max_in_flight.store(0, Ordering::SeqCst);

    let cancel = CancellationToken::new();
    let (a, b, c) = tokio::join!(
        controller.send(request(), &cancel),
        controller.send(request(), &cancel),
        controller.send(request(), &cancel),
    );

    assert!(a.is_ok() && b.is_ok() && c.is_ok());
    assert_eq!(inner.max_in_flight(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_mode_does_not_coordinate() {
    let inner = Arc::new(ScriptedTransport::default().with_latency(Duration::from_millis(50)));
    let controller = controller(inner.clone(), CongestionConfig::default());

    let cancel = CancellationToken::new();
    let start = tokio::time::Instant::now();
    let (a, b, c) = tokio::join!(
        controller.send(request(), &cancel),
        controller.send(request(), &cancel),
        controller.send(request(), &cancel),
    );

    assert!(a.is_ok() && b.is_ok() && c.is_ok());
    assert_eq!(inner.max_in_flight(), 3);
    assert!(start.elapsed() < Duration::from_millis(100));
}

#[tokio::test(start_paused = true)]
async fn test_independent_controllers_do_not_share_state() {
    let inner = Arc::new(ScriptedTransport::default());
    let throttled = controller(inner.clone(), CongestionConfig::default());
    let untouched = controller(inner.clone(), CongestionConfig::default());

    throttle_once(&throttled, &inner).await;

    assert_eq!(throttled.mode(), CongestionMode::Serialized);
    assert_eq!(untouched.mode(), CongestionMode::Concurrent);
}
