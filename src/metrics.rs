// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Prometheus metrics for the tunnel gateway controller.
//!
//! All metrics carry the namespace prefix `tunnel_firestoned_io_` (prometheus-safe
//! version of "tunnel.firestoned.io").
//!
//! # Metrics Categories
//!
//! - **Reconciliation Metrics** - reconcile outcomes and durations per resource type
//! - **Sync Metrics** - remote apply attempts, outcomes and document size per tunnel
//! - **Route Metrics** - backend reference resolution failures
//! - **Error Metrics** - errors by class
//! - **Leader Election Metrics** - leadership state changes
//!
//! # Example
//!
//! ```rust,no_run
//! use tunnelgate::metrics::record_reconciliation_success;
//!
//! record_reconciliation_success("Gateway", std::time::Duration::from_millis(40));
//! ```

use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::LazyLock;
use std::time::Duration;

// ============================================================================
// Metric Name Constants
// ============================================================================

/// Namespace prefix for all metrics (prometheus-safe)
const METRICS_NAMESPACE: &str = "tunnel_firestoned_io";

/// Sync outcome: the remote document was replaced
pub const SYNC_OUTCOME_APPLIED: &str = "applied";

/// Sync outcome: the remote document already matched
pub const SYNC_OUTCOME_UNCHANGED: &str = "unchanged";

/// Sync outcome: the apply failed
pub const SYNC_OUTCOME_ERROR: &str = "error";

// ============================================================================
// Global Metrics Registry
// ============================================================================

/// Global Prometheus metrics registry
///
/// All metrics are registered in this registry and exposed via `/metrics` endpoint.
pub static METRICS_REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// ============================================================================
// Reconciliation Metrics
// ============================================================================

/// Total number of reconciliations by resource type and status
///
/// Labels:
/// - `resource_type`: Kind of resource (e.g., `Gateway`, `TunnelConfig`)
/// - `status`: Outcome (`success`, `error`, `requeue`)
pub static RECONCILIATION_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_reconciliations_total"),
        "Total number of reconciliations by resource type and status",
    );
    let counter = CounterVec::new(opts, &["resource_type", "status"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Duration of reconciliations in seconds
///
/// Labels:
/// - `resource_type`: Kind of resource
pub static RECONCILIATION_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let opts = HistogramOpts::new(
        format!("{METRICS_NAMESPACE}_reconciliation_duration_seconds"),
        "Duration of reconciliations in seconds by resource type",
    )
    .buckets(vec![0.001, 0.01, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]);
    let histogram = HistogramVec::new(opts, &["resource_type"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(histogram.clone()))
        .unwrap();
    histogram
});

/// Total number of requeue operations
///
/// Labels:
/// - `resource_type`: Kind of resource
/// - `reason`: Error class that caused the requeue
pub static REQUEUE_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_requeues_total"),
        "Total number of requeue operations by resource type and reason",
    );
    let counter = CounterVec::new(opts, &["resource_type", "reason"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Sync Metrics
// ============================================================================

/// Duration of sync attempts against the remote tunnel configuration
///
/// Labels:
/// - `tunnel_id`: Tunnel UUID
/// - `outcome`: `applied`, `unchanged` or `error`
pub static SYNC_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let opts = HistogramOpts::new(
        format!("{METRICS_NAMESPACE}_sync_duration_seconds"),
        "Duration of tunnel configuration sync attempts by tunnel and outcome",
    )
    .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]);
    let histogram = HistogramVec::new(opts, &["tunnel_id", "outcome"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(histogram.clone()))
        .unwrap();
    histogram
});

/// Total number of sync attempts
///
/// Labels:
/// - `tunnel_id`: Tunnel UUID
/// - `outcome`: `applied`, `unchanged` or `error`
pub static SYNC_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_syncs_total"),
        "Total number of tunnel configuration sync attempts by tunnel and outcome",
    );
    let counter = CounterVec::new(opts, &["tunnel_id", "outcome"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Number of ingress rules in the last applied document, excluding the catch-all
///
/// Labels:
/// - `tunnel_id`: Tunnel UUID
pub static INGRESS_RULES: LazyLock<GaugeVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_ingress_rules"),
        "Number of ingress rules in the last applied document by tunnel",
    );
    let gauge = GaugeVec::new(opts, &["tunnel_id"]).unwrap();
    METRICS_REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

/// Total number of sync errors by classification
///
/// Labels:
/// - `error_class`: `transient`, `auth`, `validation`, `not_found`, `permission_denied`
pub static SYNC_ERRORS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_sync_errors_total"),
        "Total number of tunnel configuration sync errors by classification",
    );
    let counter = CounterVec::new(opts, &["error_class"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Route Metrics
// ============================================================================

/// Total number of backend references that could not be used
///
/// Labels:
/// - `route_kind`: `HTTPRoute` or `GRPCRoute`
/// - `reason`: `BackendNotFound`, `RefNotPermitted` or `InvalidKind`
pub static BACKEND_RESOLUTION_FAILURES_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_backend_resolution_failures_total"),
        "Total number of backend reference resolution failures by route kind and reason",
    );
    let counter = CounterVec::new(opts, &["route_kind", "reason"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Deployment Metrics
// ============================================================================

/// Total number of cloudflared deployment operations
///
/// Labels:
/// - `operation`: `installed`, `upgraded`, `unchanged`, `uninstalled`
pub static DEPLOYMENT_OPERATIONS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_deployment_operations_total"),
        "Total number of cloudflared deployment operations by type",
    );
    let counter = CounterVec::new(opts, &["operation"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Error Metrics
// ============================================================================

/// Total number of errors by resource type and error class
///
/// Labels:
/// - `resource_type`: Kind of resource
/// - `error_type`: Error class
pub static ERRORS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_errors_total"),
        "Total number of errors by resource type and error category",
    );
    let counter = CounterVec::new(opts, &["resource_type", "error_type"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Leader Election Metrics
// ============================================================================

/// Total number of leader election events
///
/// Labels:
/// - `status`: Event type (`acquired`, `lost`)
pub static LEADER_ELECTIONS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_leader_elections_total"),
        "Total number of leader election events by status",
    );
    let counter = CounterVec::new(opts, &["status"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Current leader election status
///
/// Labels:
/// - `pod_name`: Name of the pod
///
/// Value: 1 if leader, 0 if follower
pub static LEADER_STATUS: LazyLock<GaugeVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_leader_status"),
        "Current leader election status (1 = leader, 0 = follower)",
    );
    let gauge = GaugeVec::new(opts, &["pod_name"]).unwrap();
    METRICS_REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

// ============================================================================
// Helper Functions
// ============================================================================

/// Record a successful reconciliation
pub fn record_reconciliation_success(resource_type: &str, duration: Duration) {
    RECONCILIATION_TOTAL
        .with_label_values(&[resource_type, "success"])
        .inc();
    RECONCILIATION_DURATION_SECONDS
        .with_label_values(&[resource_type])
        .observe(duration.as_secs_f64());
}

/// Record a failed reconciliation
pub fn record_reconciliation_error(resource_type: &str, duration: Duration) {
    RECONCILIATION_TOTAL
        .with_label_values(&[resource_type, "error"])
        .inc();
    RECONCILIATION_DURATION_SECONDS
        .with_label_values(&[resource_type])
        .observe(duration.as_secs_f64());
}

/// Record a reconciliation requeue
///
/// # Arguments
/// * `resource_type` - The kind of resource reconciled
/// * `reason` - Error class that caused the requeue
pub fn record_reconciliation_requeue(resource_type: &str, reason: &str) {
    RECONCILIATION_TOTAL
        .with_label_values(&[resource_type, "requeue"])
        .inc();
    REQUEUE_TOTAL
        .with_label_values(&[resource_type, reason])
        .inc();
}

/// Record one sync attempt
///
/// # Arguments
/// * `tunnel_id` - Tunnel UUID
/// * `outcome` - One of [`SYNC_OUTCOME_APPLIED`], [`SYNC_OUTCOME_UNCHANGED`], [`SYNC_OUTCOME_ERROR`]
/// * `duration` - Wall time of the attempt, including internal retries
pub fn record_sync(tunnel_id: &str, outcome: &str, duration: Duration) {
    SYNC_TOTAL.with_label_values(&[tunnel_id, outcome]).inc();
    SYNC_DURATION_SECONDS
        .with_label_values(&[tunnel_id, outcome])
        .observe(duration.as_secs_f64());
}

/// Record the size of the document now live on the tunnel
pub fn record_ingress_rules(tunnel_id: &str, rules: usize) {
    #[allow(clippy::cast_precision_loss)]
    INGRESS_RULES
        .with_label_values(&[tunnel_id])
        .set(rules as f64);
}

/// Record a classified sync error
pub fn record_sync_error(error_class: &str) {
    SYNC_ERRORS_TOTAL.with_label_values(&[error_class]).inc();
}

/// Record a backend reference that was dropped
pub fn record_backend_resolution_failure(route_kind: &str, reason: &str) {
    BACKEND_RESOLUTION_FAILURES_TOTAL
        .with_label_values(&[route_kind, reason])
        .inc();
}

/// Record a cloudflared deployment operation
pub fn record_deployment_operation(operation: &str) {
    DEPLOYMENT_OPERATIONS_TOTAL
        .with_label_values(&[operation])
        .inc();
}

/// Record an error
///
/// # Arguments
/// * `resource_type` - The kind of resource where error occurred
/// * `error_type` - Error class (see `ControllerError::category`)
pub fn record_error(resource_type: &str, error_type: &str) {
    ERRORS_TOTAL
        .with_label_values(&[resource_type, error_type])
        .inc();
}

/// Record leader election acquired
pub fn record_leader_elected(pod_name: &str) {
    LEADER_ELECTIONS_TOTAL
        .with_label_values(&["acquired"])
        .inc();
    LEADER_STATUS.with_label_values(&[pod_name]).set(1.0);
}

/// Record leader election lost
pub fn record_leader_lost(pod_name: &str) {
    LEADER_ELECTIONS_TOTAL.with_label_values(&["lost"]).inc();
    LEADER_STATUS.with_label_values(&[pod_name]).set(0.0);
}

/// Gather and encode all metrics in Prometheus text format
///
/// # Errors
/// Returns error if encoding fails
pub fn gather_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = METRICS_REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(format!("UTF-8 error: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_reconciliation_success() {
        let resource_type = "TestResource";
        record_reconciliation_success(resource_type, Duration::from_millis(500));

        let counter = RECONCILIATION_TOTAL.with_label_values(&[resource_type, "success"]);
        assert!(counter.get() > 0.0);

        let histogram = RECONCILIATION_DURATION_SECONDS.with_label_values(&[resource_type]);
        assert!(histogram.get_sample_count() > 0);
    }

    #[test]
    fn test_record_sync_outcomes() {
        let tunnel = "metrics-test-tunnel";
        record_sync(tunnel, SYNC_OUTCOME_APPLIED, Duration::from_millis(20));
        record_sync(tunnel, SYNC_OUTCOME_UNCHANGED, Duration::from_millis(10));
        record_ingress_rules(tunnel, 7);

        assert!(SYNC_TOTAL.with_label_values(&[tunnel, SYNC_OUTCOME_APPLIED]).get() >= 1.0);
        assert!(SYNC_TOTAL.with_label_values(&[tunnel, SYNC_OUTCOME_UNCHANGED]).get() >= 1.0);
        #[allow(clippy::float_cmp)]
        {
            assert_eq!(INGRESS_RULES.with_label_values(&[tunnel]).get(), 7.0);
        }
    }

    #[test]
    fn test_gather_metrics() {
        record_reconciliation_success("GatherTest", Duration::from_millis(100));
        record_backend_resolution_failure("HTTPRoute", "BackendNotFound");

        let metrics_text = gather_metrics().expect("gathering metrics should succeed");
        assert!(metrics_text.contains("tunnel_firestoned_io"));
        assert!(metrics_text.contains("reconciliations_total"));
        assert!(metrics_text.contains("backend_resolution_failures_total"));
    }
}
