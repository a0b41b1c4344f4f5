// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Transport trait and the stateless links of the interceptor chain.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::message::{HttpRequest, HttpResponse};

/// One link of the transport chain.
///
/// Interceptors implement this trait and forward to an inner
/// `Arc<dyn Transport>`; the innermost link talks to the network.
/// Implementations must return [`TransportError::Cancelled`] promptly once
/// `cancel` fires.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and return the buffered response.
    async fn send(&self, request: HttpRequest, cancel: &CancellationToken)
    -> Result<HttpResponse>;
}

/// Base transport backed by a `reqwest::Client`.
///
/// Gzip encoded responses are decoded transparently.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Create a transport whose calls time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .gzip(true)
            .build()
            .map_err(|e| TransportError::InvalidRequest(format!("failed to build client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(
        &self,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse> {
        let HttpRequest {
            method,
            url,
            headers,
            body,
        } = request;

        debug!(method = %method, url = %url, bytes = body.len(), "Dispatching request");

        let mut builder = self.client.request(method, &url).headers(headers);
        if !body.is_empty() {
            builder = builder.body(body);
        }

        let call = async {
            let response = builder.send().await?;
            let status = response.status();
            let headers = response.headers().clone();
            let body = response.bytes().await?;
            Ok(HttpResponse {
                status,
                headers,
                body,
            })
        };

        tokio::select! {
            biased;

            _ = cancel.cancelled() => Err(TransportError::Cancelled),
            result = call => result,
        }
    }
}

/// Adds a fixed set of headers to every request.
///
/// Headers already present on the request win.
pub struct HeaderInterceptor {
    inner: Arc<dyn Transport>,
    headers: HeaderMap,
}

impl HeaderInterceptor {
    pub fn new(inner: Arc<dyn Transport>) -> Self {
        Self {
            inner,
            headers: HeaderMap::new(),
        }
    }

    /// Add a header from string parts.
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| TransportError::InvalidRequest(format!("invalid header name: {e}")))?;
        let mut value = HeaderValue::from_str(value)
            .map_err(|e| TransportError::InvalidRequest(format!("invalid header value: {e}")))?;
        if name == reqwest::header::AUTHORIZATION {
            value.set_sensitive(true);
        }
        self.headers.insert(name, value);
        Ok(self)
    }
}

#[async_trait]
impl Transport for HeaderInterceptor {
    async fn send(
        &self,
        mut request: HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse> {
        for (name, value) in &self.headers {
            if !request.headers.contains_key(name) {
                request.headers.insert(name.clone(), value.clone());
            }
        }
        self.inner.send(request, cancel).await
    }
}
