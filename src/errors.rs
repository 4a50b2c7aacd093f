// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Classified error taxonomy shared by every component of the controller.
//!
//! Components never return a bare failure: each error carries a class that the
//! reconciler boundary uses to decide between retrying, recording a terminal
//! condition, or ignoring the failure.
//!
//! | Class | Retried | Surface |
//! |-------|---------|---------|
//! | [`ControllerError::Validation`] | no | terminal status condition |
//! | [`ControllerError::Transient`] | yes, with backoff | requeue |
//! | [`ControllerError::Auth`] | yes, with backoff | high-severity condition |
//! | [`ControllerError::NotFound`] | no | no-op for the affected item |
//! | [`ControllerError::PermissionDenied`] | no | per-backend condition |

use thiserror::Error;

/// Errors produced while reconciling Gateway API objects against a tunnel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControllerError {
    /// Malformed configuration or unresolvable static reference.
    #[error("invalid configuration: {0}")]
    Validation(String),

    /// Remote 5xx, timeout, rate limit, or cluster write conflict.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Remote rejected the credentials (HTTP 401/403).
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Referenced object disappeared between list and use.
    #[error("not found: {0}")]
    NotFound(String),

    /// Cross-namespace reference without a matching `ReferenceGrant`.
    #[error("reference not permitted: {0}")]
    PermissionDenied(String),
}

impl ControllerError {
    /// Classify an HTTP status code returned by a remote API.
    ///
    /// 401/403 are authentication failures, 404 is not-found, 408/409/429 and
    /// 5xx are transient, and every other 4xx is a validation failure.
    #[must_use]
    pub fn from_http_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => Self::Auth(message),
            404 => Self::NotFound(message),
            408 | 409 | 429 => Self::Transient(message),
            400..=499 => Self::Validation(message),
            _ => Self::Transient(message),
        }
    }

    /// Whether the scheduling layer should requeue the key with backoff.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Auth(_))
    }

    /// The message without the class prefix.
    #[must_use]
    pub fn detail(&self) -> &str {
        match self {
            Self::Validation(m)
            | Self::Transient(m)
            | Self::Auth(m)
            | Self::NotFound(m)
            | Self::PermissionDenied(m) => m,
        }
    }

    /// Stable label used for metrics and logs.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Transient(_) => "transient",
            Self::Auth(_) => "auth",
            Self::NotFound(_) => "not_found",
            Self::PermissionDenied(_) => "permission_denied",
        }
    }
}

impl From<kube::Error> for ControllerError {
    fn from(err: kube::Error) -> Self {
        match &err {
            kube::Error::Api(response) => Self::from_http_status(response.code, err.to_string()),
            // Connection and service failures are all worth another attempt
            _ => Self::Transient(err.to_string()),
        }
    }
}

impl From<reqwest::Error> for ControllerError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::from_http_status(status.as_u16(), err.to_string());
        }
        Self::Transient(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for ControllerError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::Transient("deadline exceeded".to_string())
    }
}

#[cfg(test)]
#[path = "errors_tests.rs"]
mod errors_tests;
