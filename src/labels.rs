// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Common label and annotation constants used across all reconcilers.
//!
//! This module defines standard Kubernetes labels and tunnelgate-specific
//! labels/annotations to keep the resources created by the controller consistent.

// ============================================================================
// Kubernetes Standard Labels
// https://kubernetes.io/docs/concepts/overview/working-with-objects/common-labels/
// ============================================================================

/// Standard label for the component name within the architecture
pub const K8S_COMPONENT: &str = "app.kubernetes.io/component";

/// Standard label for the tool being used to manage the operation of an application
pub const K8S_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Standard label for the name of the application
pub const K8S_NAME: &str = "app.kubernetes.io/name";

/// Standard label for a unique name identifying the instance of an application
pub const K8S_INSTANCE: &str = "app.kubernetes.io/instance";

/// Standard label for the name of a higher-level application this one is part of
pub const K8S_PART_OF: &str = "app.kubernetes.io/part-of";

// ============================================================================
// Kubernetes Standard Label Values
// ============================================================================

/// Value for `app.kubernetes.io/part-of`
pub const PART_OF_TUNNELGATE: &str = "tunnelgate";

/// Component value for the tunnel agent
pub const COMPONENT_TUNNEL_AGENT: &str = "tunnel-agent";

/// Application name for cloudflared deployments
pub const APP_NAME_CLOUDFLARED: &str = "cloudflared";

/// Value for `app.kubernetes.io/managed-by`
pub const MANAGED_BY_TUNNELGATE: &str = "tunnelgate";

// ============================================================================
// tunnelgate-Specific Labels
// ============================================================================

/// Label carrying the namespace of the Gateway that owns a deployment
pub const GATEWAY_NAMESPACE_LABEL: &str = "tunnel.firestoned.io/gateway-namespace";

/// Label carrying the name of the Gateway that owns a deployment
pub const GATEWAY_NAME_LABEL: &str = "tunnel.firestoned.io/gateway-name";

// ============================================================================
// tunnelgate-Specific Annotations
// ============================================================================

/// Annotation recording the release version currently deployed
pub const RELEASE_VERSION_ANNOTATION: &str = "tunnel.firestoned.io/release-version";

/// Annotation recording the tunnel id served by a deployment
pub const TUNNEL_ID_ANNOTATION: &str = "tunnel.firestoned.io/tunnel-id";

/// Annotation on a Gateway recording the namespace its cloudflared release was installed into
pub const RELEASE_NAMESPACE_ANNOTATION: &str = "tunnel.firestoned.io/release-namespace";
