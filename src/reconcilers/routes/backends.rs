// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Backend reference resolution for routes.
//!
//! Each `backendRef` is resolved on its own: an unusable reference is dropped
//! with a reason while its siblings still contribute.

use crate::constants::{GATEWAY_API_GROUP, KIND_SERVICE};
use crate::context::ClusterSnapshot;
use crate::errors::ControllerError;
use crate::gateway_api::BackendRef;
use crate::ingress::{BackendTarget, RouteKind};
use crate::status_reasons::{REASON_BACKEND_NOT_FOUND, REASON_INVALID_KIND, REASON_REF_NOT_PERMITTED};

/// Why a backend reference was dropped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendFailure {
    /// `ResolvedRefs` reason.
    pub reason: &'static str,
    /// `PermissionDenied` for a missing `ReferenceGrant`, `NotFound` for a
    /// missing Service or port, `Validation` for an unsupported kind.
    pub error: ControllerError,
}

impl BackendFailure {
    /// Human-readable part of the error, used in the `ResolvedRefs` message.
    #[must_use]
    pub fn message(&self) -> &str {
        self.error.detail()
    }
}

/// Outcome of resolving one backend reference.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    Target(BackendTarget),
    /// Weight zero: valid but receives no traffic.
    Disabled,
    Failed(BackendFailure),
}

fn failed(reason: &'static str, error: ControllerError) -> Resolution {
    Resolution::Failed(BackendFailure { reason, error })
}

/// Whether `backend` names a core `Service` (the default when unset).
#[must_use]
pub fn is_service_ref(backend: &BackendRef) -> bool {
    backend.group.as_deref().unwrap_or_default().is_empty()
        && backend.kind.as_deref().unwrap_or(KIND_SERVICE) == KIND_SERVICE
}

/// Whether a `ReferenceGrant` in `target_namespace` lets `kind` routes in
/// `route_namespace` reference the Service `service`.
#[must_use]
pub fn reference_permitted(
    snapshot: &ClusterSnapshot,
    kind: RouteKind,
    route_namespace: &str,
    target_namespace: &str,
    service: &str,
) -> bool {
    if route_namespace == target_namespace {
        return true;
    }
    snapshot.reference_grants_in(target_namespace).any(|grant| {
        let from_ok = grant.spec.from.iter().any(|from| {
            from.group == GATEWAY_API_GROUP
                && from.kind == kind.kind()
                && from.namespace == route_namespace
        });
        let to_ok = grant.spec.to.iter().any(|to| {
            to.group.is_empty()
                && to.kind == KIND_SERVICE
                && to.name.as_deref().is_none_or(|name| name == service)
        });
        from_ok && to_ok
    })
}

/// Resolve one backend reference of a `kind` route living in `route_namespace`.
#[must_use]
pub fn resolve_backend(
    snapshot: &ClusterSnapshot,
    kind: RouteKind,
    route_namespace: &str,
    backend: &BackendRef,
) -> Resolution {
    let namespace = backend.namespace.as_deref().unwrap_or(route_namespace);
    let qualified = format!("{namespace}/{}", backend.name);

    if !is_service_ref(backend) {
        return failed(
            REASON_INVALID_KIND,
            ControllerError::Validation(format!(
                "backendRef {qualified} has unsupported kind {}/{}",
                backend.group.as_deref().unwrap_or_default(),
                backend.kind.as_deref().unwrap_or_default()
            )),
        );
    }

    if !reference_permitted(snapshot, kind, route_namespace, namespace, &backend.name) {
        return failed(
            REASON_REF_NOT_PERMITTED,
            ControllerError::PermissionDenied(format!(
                "no ReferenceGrant in {namespace} allows {kind} references from {route_namespace} to Service {qualified}"
            )),
        );
    }

    let Some(service) = snapshot.service(namespace, &backend.name) else {
        return failed(
            REASON_BACKEND_NOT_FOUND,
            ControllerError::NotFound(format!("Service {qualified} not found")),
        );
    };

    let ports: Vec<i32> = service
        .spec
        .as_ref()
        .and_then(|spec| spec.ports.as_ref())
        .map(|ports| ports.iter().map(|p| p.port).collect())
        .unwrap_or_default();

    let port = match backend.port {
        Some(port) if ports.contains(&port) => port,
        Some(port) => {
            return failed(
                REASON_BACKEND_NOT_FOUND,
                ControllerError::NotFound(format!("Service {qualified} does not expose port {port}")),
            )
        }
        None if ports.len() == 1 => ports[0],
        None => {
            return failed(
                REASON_BACKEND_NOT_FOUND,
                ControllerError::NotFound(format!(
                    "backendRef {qualified} needs a port; the Service exposes {}",
                    ports.len()
                )),
            )
        }
    };

    if backend.weight == Some(0) {
        return Resolution::Disabled;
    }

    Resolution::Target(BackendTarget::new(backend.name.clone(), namespace, port))
}

#[cfg(test)]
#[path = "backends_tests.rs"]
mod backends_tests;
