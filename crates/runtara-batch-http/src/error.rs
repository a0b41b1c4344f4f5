// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for runtara-batch-http.

use thiserror::Error;

/// Result type using TransportError.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Errors produced by the transport chain.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection-level failure (DNS, TLS, reset, timeout, body read).
    #[error("network error: {0}")]
    Network(String),

    /// The caller's cancellation token fired before the call finished.
    #[error("request cancelled")]
    Cancelled,

    /// The remote kept throttling until the retry ceiling was reached.
    #[error("too many attempts ({attempts}) for a single request")]
    TooManyAttempts { attempts: u32 },

    /// The request could not be turned into a wire request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl TransportError {
    /// Whether this error came from the network rather than from local
    /// validation. Cancellation counts as a network failure.
    pub fn is_network(&self) -> bool {
        matches!(self, TransportError::Network(_) | TransportError::Cancelled)
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            TransportError::InvalidRequest(err.to_string())
        } else {
            TransportError::Network(err.to_string())
        }
    }
}
