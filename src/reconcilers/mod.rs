// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Kubernetes reconciliation controllers for Gateway API resources.
//!
//! # Reconciliation Architecture
//!
//! Two kube-runtime controllers run while this replica holds the leader lease:
//!
//! 1. **Gateways** - [`gateway::reconcile`] owns one tunnel endpoint: finalizer,
//!    cloudflared deployment and `Gateway` status
//! 2. **Tunnels** - [`routes::reconcile`] is keyed on `TunnelConfig` and performs
//!    a full resync of the tunnel's ingress document from every attached route
//!
//! Both read cluster state from the reflector stores in the shared
//! [`Context`](crate::context::Context) and only write status subresources and
//! the Gateway finalizer.
//!
//! # Error Policy
//!
//! Reconcilers return a classified [`ControllerError`]; [`requeue_for_error`]
//! turns the class into the next [`Action`]:
//!
//! - `Transient` - per-key exponential requeue
//! - `Auth` - requeue with backoff, at least [`AUTH_ERROR_REQUEUE_SECS`], logged at `error`
//! - `Validation`, `NotFound`, `PermissionDenied` - wait for the object to change
//!
//! The tunnel controller rechecks a missing credentials Secret (`NotFound`) on a
//! fixed delay, see [`routes::requeue_for_tunnel_error`].

pub mod finalizers;
pub mod gateway;
pub mod retry;
pub mod routes;
pub mod status;

use crate::constants::AUTH_ERROR_REQUEUE_SECS;
use crate::errors::ControllerError;
use crate::metrics;
use kube::runtime::controller::Action;
use retry::RequeueBackoff;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Next action after a failed reconcile of `key`.
pub fn requeue_for_error(
    resource_type: &str,
    key: &str,
    err: &ControllerError,
    backoff: &RequeueBackoff,
) -> Action {
    match err {
        ControllerError::Auth(_) => {
            let delay = backoff
                .next_delay(key)
                .max(Duration::from_secs(AUTH_ERROR_REQUEUE_SECS));
            error!(
                resource = resource_type,
                key = key,
                retry_after = ?delay,
                error = %err,
                "Cloudflare rejected the credentials"
            );
            metrics::record_reconciliation_requeue(resource_type, err.category());
            Action::requeue(delay)
        }
        _ if err.is_retryable() => {
            let delay = backoff.next_delay(key);
            warn!(
                "{} {} failed, retrying in {:?}: {}",
                resource_type, key, delay, err
            );
            metrics::record_reconciliation_requeue(resource_type, err.category());
            Action::requeue(delay)
        }
        _ => {
            debug!(
                "{} {} will not be retried until it changes: {}",
                resource_type, key, err
            );
            Action::await_change()
        }
    }
}

#[cfg(test)]
mod mod_tests;
