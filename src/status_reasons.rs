// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Status condition types and reasons published by the controller.
//!
//! The values follow the Gateway API conventions so generic tooling (kubectl,
//! dashboards, conformance checks) can read them.
//!
//! # Example Route Status
//!
//! ```yaml
//! status:
//!   parents:
//!     - parentRef:
//!         name: public
//!         namespace: web
//!       controllerName: tunnel.firestoned.io/gateway-controller
//!       conditions:
//!         - type: Accepted
//!           status: "True"
//!           reason: Accepted
//!         - type: ResolvedRefs
//!           status: "False"
//!           reason: BackendNotFound
//!           message: "Service web/api not found"
//! ```

// ============================================================================
// Condition Status Values
// ============================================================================

pub const CONDITION_STATUS_TRUE: &str = "True";
pub const CONDITION_STATUS_FALSE: &str = "False";
pub const CONDITION_STATUS_UNKNOWN: &str = "Unknown";

// ============================================================================
// Condition Types
// ============================================================================

/// The controller recognizes and owns the object (Gateway), or the route
/// contributed to the last sync (routes).
pub const CONDITION_TYPE_ACCEPTED: &str = "Accepted";

/// The tunnel is reachable at the published address (Gateway).
pub const CONDITION_TYPE_PROGRAMMED: &str = "Programmed";

/// Every backend of the route resolved and is permitted (routes).
pub const CONDITION_TYPE_RESOLVED_REFS: &str = "ResolvedRefs";

// ============================================================================
// Gateway Reasons
// ============================================================================

/// Gateway accepted by this controller.
pub const REASON_ACCEPTED: &str = "Accepted";

/// The referenced `TunnelConfig` or its deployment settings are invalid.
pub const REASON_INVALID_PARAMETERS: &str = "InvalidParameters";

/// Gateway programmed; the tunnel address is published.
pub const REASON_PROGRAMMED: &str = "Programmed";

/// Deployment of the tunnel agent has not completed yet.
pub const REASON_PENDING: &str = "Pending";

// ============================================================================
// Route Reasons
// ============================================================================

/// The last sync carrying the route failed, so it is not served.
pub const REASON_NO_MATCHING_PARENT: &str = "NoMatchingParent";

/// All backend references resolved.
pub const REASON_RESOLVED_REFS: &str = "ResolvedRefs";

/// A referenced Service does not exist or does not expose the port.
pub const REASON_BACKEND_NOT_FOUND: &str = "BackendNotFound";

/// A cross-namespace reference has no matching `ReferenceGrant`.
pub const REASON_REF_NOT_PERMITTED: &str = "RefNotPermitted";

/// A backend reference names a kind other than a core `Service`.
pub const REASON_INVALID_KIND: &str = "InvalidKind";
