// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runtara Batch HTTP
//!
//! Transport layer used by `runtara-batch` to talk to rate-limited inference
//! APIs. Requests travel through a chain of interceptors, each implementing
//! [`Transport`] and wrapping the next one:
//!
//! ```text
//! CongestionController -> HeaderInterceptor -> ReqwestTransport -> network
//! ```
//!
//! The [`CongestionController`] is the outermost link and the only stateful
//! one. While the remote answers normally requests are dispatched
//! concurrently. The first `429 Too Many Requests` switches the whole chain
//! into serialized mode, where one request at a time is sent after an
//! exponentially growing delay. A streak of successes decays the delay
//! until concurrent dispatch is restored.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use runtara_batch_http::{
//!     CongestionConfig, CongestionController, HeaderInterceptor, HttpRequest,
//!     ReqwestTransport, Transport,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let base = Arc::new(ReqwestTransport::new(Duration::from_secs(30))?);
//! let headers = Arc::new(
//!     HeaderInterceptor::new(base).with_header("accept", "application/json")?,
//! );
//! let transport = CongestionController::new(headers, CongestionConfig::default());
//!
//! let response = transport
//!     .send(
//!         HttpRequest::get("https://api.example.com/v1/models"),
//!         &CancellationToken::new(),
//!     )
//!     .await?;
//! println!("status: {}", response.status);
//! # Ok(())
//! # }
//! ```

mod congestion;
mod error;
mod message;
mod transport;

pub use congestion::{
    CongestionConfig, CongestionController, CongestionMode, CongestionSnapshot, CongestionState,
    Verdict,
};
pub use error::{Result, TransportError};
pub use message::{HttpRequest, HttpResponse};
pub use transport::{HeaderInterceptor, ReqwestTransport, Transport};

pub use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
pub use reqwest::{Method, StatusCode};
pub use tokio_util::sync::CancellationToken;
