// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Retry logic with exponential backoff.
//!
//! Two layers use this module:
//!
//! - the sync engine retries transient remote failures in place with
//!   [`retry_transient`], bounded by a [`RetryPolicy`]
//! - the controller error policy requeues failing keys with a per-key
//!   [`RequeueBackoff`], so a key that keeps failing is retried less often
//!
//! Every attempt is bounded by a deadline; an elapsed deadline is a transient failure.

use crate::constants::{
    DEFAULT_SYNC_MAX_ATTEMPTS, ERROR_REQUEUE_INITIAL_SECS, ERROR_REQUEUE_MAX_SECS,
};
use crate::errors::ControllerError;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Initial retry interval (200ms)
const INITIAL_INTERVAL_MILLIS: u64 = 200;

/// Maximum interval between retries (10 seconds)
const MAX_INTERVAL_SECS: u64 = 10;

/// Backoff multiplier (exponential growth factor)
const BACKOFF_MULTIPLIER: f64 = 2.0;

/// Randomization factor to prevent thundering herd (±10%)
const RANDOMIZATION_FACTOR: f64 = 0.1;

/// Simple exponential backoff implementation.
///
/// Provides exponential backoff with randomization (jitter) to prevent thundering herd.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Current interval duration
    pub current_interval: Duration,
    /// Maximum interval duration
    pub max_interval: Duration,
    /// Maximum total elapsed time
    pub max_elapsed_time: Option<Duration>,
    /// Backoff multiplier (typically 2.0 for doubling)
    pub multiplier: f64,
    /// Randomization factor (e.g., 0.1 for ±10%)
    pub randomization_factor: f64,
    start_time: Instant,
}

impl ExponentialBackoff {
    /// Create a new exponential backoff with specified parameters.
    #[must_use]
    pub fn new(
        initial_interval: Duration,
        max_interval: Duration,
        max_elapsed_time: Option<Duration>,
        multiplier: f64,
        randomization_factor: f64,
    ) -> Self {
        Self {
            current_interval: initial_interval,
            max_interval,
            max_elapsed_time,
            multiplier,
            randomization_factor,
            start_time: Instant::now(),
        }
    }

    /// Get the next backoff interval, or None if max elapsed time exceeded.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        if let Some(max_elapsed) = self.max_elapsed_time {
            if self.start_time.elapsed() >= max_elapsed {
                return None;
            }
        }

        let interval = self.current_interval;
        let jittered = self.apply_jitter(interval);

        let next = interval.as_secs_f64() * self.multiplier;
        self.current_interval = Duration::from_secs_f64(next).min(self.max_interval);

        Some(jittered)
    }

    fn apply_jitter(&self, interval: Duration) -> Duration {
        if self.randomization_factor == 0.0 {
            return interval;
        }

        let secs = interval.as_secs_f64();
        let delta = secs * self.randomization_factor;
        // Uniform in [secs - delta, secs + delta]
        let jittered = secs - delta + rand::random::<f64>() * 2.0 * delta;

        Duration::from_secs_f64(jittered.max(0.0))
    }
}

/// Bound on in-place retries of transient remote failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
    pub randomization_factor: f64,
}

impl Default for RetryPolicy {
    /// Retries occur at approximately 200ms, 400ms, 800ms and 1.6s before giving up.
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_SYNC_MAX_ATTEMPTS,
            initial_interval: Duration::from_millis(INITIAL_INTERVAL_MILLIS),
            max_interval: Duration::from_secs(MAX_INTERVAL_SECS),
            multiplier: BACKOFF_MULTIPLIER,
            randomization_factor: RANDOMIZATION_FACTOR,
        }
    }
}

impl RetryPolicy {
    /// Policy with the given attempt bound and default intervals.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Policy without sleeping between attempts.
    #[must_use]
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_interval: Duration::ZERO,
            max_interval: Duration::ZERO,
            multiplier: 1.0,
            randomization_factor: 0.0,
        }
    }

    #[must_use]
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(
            self.initial_interval,
            self.max_interval,
            None,
            self.multiplier,
            self.randomization_factor,
        )
    }
}

/// Run `operation` under a deadline.
///
/// # Errors
///
/// Returns [`ControllerError::Transient`] when the deadline elapses, otherwise the
/// operation's own error.
pub async fn with_deadline<T, Fut>(deadline: Duration, operation: Fut) -> Result<T, ControllerError>
where
    Fut: Future<Output = Result<T, ControllerError>>,
{
    tokio::time::timeout(deadline, operation).await?
}

/// Retry an operation while it fails with [`ControllerError::Transient`].
///
/// Every other error class is returned immediately. Each attempt is bounded by
/// `deadline`. When the attempts are exhausted the last transient error is
/// returned, annotated with the attempt count.
///
/// # Errors
///
/// Returns the first non-transient error, or the last transient error once
/// `policy.max_attempts` attempts have failed.
pub async fn retry_transient<T, F, Fut>(
    policy: &RetryPolicy,
    operation_name: &str,
    deadline: Duration,
    mut operation: F,
) -> Result<T, ControllerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ControllerError>>,
{
    let mut backoff = policy.backoff();
    let start_time = Instant::now();
    let mut attempt = 0;

    loop {
        attempt += 1;

        match with_deadline(deadline, operation()).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(
                        operation = operation_name,
                        attempt = attempt,
                        elapsed = ?start_time.elapsed(),
                        "Call succeeded after retries"
                    );
                }
                return Ok(value);
            }
            Err(ControllerError::Transient(message)) if attempt < policy.max_attempts => {
                let duration = backoff.next_backoff().unwrap_or(policy.max_interval);
                warn!(
                    operation = operation_name,
                    attempt = attempt,
                    retry_after = ?duration,
                    error = %message,
                    "Transient failure, will retry"
                );
                tokio::time::sleep(duration).await;
            }
            Err(ControllerError::Transient(message)) => {
                error!(
                    operation = operation_name,
                    attempt = attempt,
                    elapsed = ?start_time.elapsed(),
                    error = %message,
                    "Retries exhausted, giving up"
                );
                return Err(ControllerError::Transient(format!(
                    "{operation_name} failed after {attempt} attempts: {message}"
                )));
            }
            Err(e) => {
                error!(
                    operation = operation_name,
                    error = %e,
                    class = e.category(),
                    "Non-retryable failure, failing immediately"
                );
                return Err(e);
            }
        }
    }
}

/// Per-key requeue delays for the controller error policy.
///
/// Each consecutive failure of a key doubles its delay, from
/// [`ERROR_REQUEUE_INITIAL_SECS`] up to [`ERROR_REQUEUE_MAX_SECS`]. A successful
/// reconcile resets the key.
#[derive(Debug)]
pub struct RequeueBackoff {
    initial: Duration,
    max: Duration,
    failures: Mutex<HashMap<String, u32>>,
}

impl Default for RequeueBackoff {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(ERROR_REQUEUE_INITIAL_SECS),
            Duration::from_secs(ERROR_REQUEUE_MAX_SECS),
        )
    }
}

impl RequeueBackoff {
    #[must_use]
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Record a failure of `key` and return how long to wait before the next attempt.
    pub fn next_delay(&self, key: &str) -> Duration {
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        let count = failures.entry(key.to_string()).or_insert(0);
        let exponent = (*count).min(16);
        *count = count.saturating_add(1);
        self.initial
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.max)
    }

    /// Forget the failure history of `key`.
    pub fn reset(&self, key: &str) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod retry_tests;
