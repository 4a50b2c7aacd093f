// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global constants for the tunnelgate controller.
//!
//! This module contains all numeric and string constants used throughout the codebase.
//! Constants are organized by category for easy maintenance.

// ============================================================================
// API Constants
// ============================================================================

/// API group for the tunnelgate CRDs
pub const API_GROUP: &str = "tunnel.firestoned.io";

/// Kind name for `TunnelConfig` resource
pub const KIND_TUNNEL_CONFIG: &str = "TunnelConfig";

/// Gateway API group
pub const GATEWAY_API_GROUP: &str = "gateway.networking.k8s.io";

/// Kind name for Gateway API `Gateway`
pub const KIND_GATEWAY: &str = "Gateway";

/// Kind name for Gateway API `HTTPRoute`
pub const KIND_HTTP_ROUTE: &str = "HTTPRoute";

/// Kind name for Gateway API `GRPCRoute`
pub const KIND_GRPC_ROUTE: &str = "GRPCRoute";

/// Kind name for core `Service` (the only supported backend kind)
pub const KIND_SERVICE: &str = "Service";

/// Default controller name matched against `GatewayClass.spec.controllerName`
pub const DEFAULT_CONTROLLER_NAME: &str = "tunnel.firestoned.io/gateway-controller";

/// Finalizer guarding Gateways that own a managed cloudflared deployment
pub const GATEWAY_FINALIZER: &str = "tunnel.firestoned.io/cloudflared";

/// Field manager used for server-side apply and status patches
pub const FIELD_MANAGER: &str = "tunnelgate-controller";

// ============================================================================
// Cloudflare Constants
// ============================================================================

/// Cloudflare v4 API base URL
pub const CLOUDFLARE_API_BASE_URL: &str = "https://api.cloudflare.com/client/v4";

/// DNS suffix under which every tunnel is reachable
pub const TUNNEL_ADDRESS_SUFFIX: &str = "cfargotunnel.com";

/// Service of the mandatory trailing catch-all ingress rule
pub const CATCH_ALL_SERVICE: &str = "http_status:404";

/// Default secret key holding the Cloudflare API token
pub const DEFAULT_API_TOKEN_KEY: &str = "api-token";

/// Default secret key holding the tunnel run token
pub const DEFAULT_TUNNEL_TOKEN_KEY: &str = "tunnel-token";

/// In-cluster DNS suffix used to build backend targets
pub const CLUSTER_DNS_SUFFIX: &str = "svc.cluster.local";

// ============================================================================
// cloudflared Deployment Constants
// ============================================================================

/// Default namespace for managed cloudflared deployments
pub const DEFAULT_CLOUDFLARED_NAMESPACE: &str = "cloudflare-tunnel-system";

/// Default number of cloudflared replicas
pub const DEFAULT_CLOUDFLARED_REPLICAS: i32 = 1;

/// cloudflared image repository
pub const CLOUDFLARED_IMAGE: &str = "cloudflare/cloudflared";

/// Pinned cloudflared image tag; part of the release version used for drift detection
pub const CLOUDFLARED_VERSION: &str = "2025.4.0";

/// Container name of the cloudflared agent
pub const CONTAINER_NAME_CLOUDFLARED: &str = "cloudflared";

/// Container name of the AmneziaWG sidecar
pub const CONTAINER_NAME_AWG: &str = "amneziawg";

/// AmneziaWG sidecar image
pub const AWG_IMAGE: &str = "amneziavpn/amneziawg-go:latest";

/// Mount path of the AmneziaWG configuration secret
pub const AWG_CONFIG_MOUNT_PATH: &str = "/etc/amnezia/amneziawg";

/// Default interface name prefix for the AmneziaWG sidecar
pub const DEFAULT_AWG_INTERFACE_PREFIX: &str = "awg";

/// cloudflared metrics/readiness port
pub const CLOUDFLARED_METRICS_PORT: u16 = 2000;

// ============================================================================
// Controller Error Handling Constants
// ============================================================================

/// Requeue duration for healthy objects (5 minutes)
pub const RESYNC_REQUEUE_DURATION_SECS: u64 = 300;

/// Initial requeue delay after a transient reconcile failure
pub const ERROR_REQUEUE_INITIAL_SECS: u64 = 5;

/// Maximum requeue delay after repeated reconcile failures
pub const ERROR_REQUEUE_MAX_SECS: u64 = 300;

/// Requeue delay after an authentication failure (credentials may be rotating)
pub const AUTH_ERROR_REQUEUE_SECS: u64 = 60;

/// Recheck delay while a `TunnelConfig`'s credentials Secret or key is missing.
/// Secrets are not watched, so their creation does not trigger a reconcile.
pub const MISSING_CREDENTIALS_RECHECK_SECS: u64 = 120;

/// Maximum attempts for a status write that keeps hitting conflicts
pub const STATUS_CONFLICT_RETRIES: u32 = 5;

// ============================================================================
// Sync Engine Constants
// ============================================================================

/// Default number of attempts for one remote call before surfacing a transient error
pub const DEFAULT_SYNC_MAX_ATTEMPTS: u32 = 5;

/// Default deadline for every external call
pub const DEFAULT_API_TIMEOUT_SECS: u64 = 30;

/// Debounce window applied to bursty watch events
pub const EVENT_DEBOUNCE_MILLIS: u64 = 500;

// ============================================================================
// Leader Election Constants
// ============================================================================

/// Default leader election lease name
pub const DEFAULT_LEASE_NAME: &str = "tunnelgate-leader";

/// Default leader election lease duration (15 seconds)
pub const DEFAULT_LEASE_DURATION_SECS: u64 = 15;

/// Default leader election grace period (5 seconds)
pub const DEFAULT_LEASE_GRACE_SECS: u64 = 5;

// ============================================================================
// Runtime Constants
// ============================================================================

/// Number of worker threads for Tokio runtime
pub const TOKIO_WORKER_THREADS: usize = 4;

/// Default number of concurrent reconciles per controller
pub const DEFAULT_WORKERS: u16 = 4;

// ============================================================================
// Metrics Server Constants
// ============================================================================

/// Port for Prometheus metrics HTTP server
pub const METRICS_SERVER_PORT: u16 = 8080;

/// Path for Prometheus metrics endpoint
pub const METRICS_SERVER_PATH: &str = "/metrics";

/// Bind address for metrics HTTP server
pub const METRICS_SERVER_BIND_ADDRESS: &str = "0.0.0.0";
