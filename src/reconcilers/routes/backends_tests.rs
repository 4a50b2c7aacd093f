// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `backends.rs`

#[cfg(test)]
mod tests {
    use crate::errors::ControllerError;
    use crate::gateway_api::BackendRef;
    use crate::ingress::{BackendTarget, RouteKind};
    use crate::reconcilers::routes::backends::{
        reference_permitted, resolve_backend, BackendFailure, Resolution,
    };
    use crate::status_reasons::{
        REASON_BACKEND_NOT_FOUND, REASON_INVALID_KIND, REASON_REF_NOT_PERMITTED,
    };
    use crate::test_fixtures::{base_snapshot, reference_grant, service};
    use std::sync::Arc;

    fn backend(name: &str, namespace: Option<&str>, port: Option<i32>) -> BackendRef {
        BackendRef {
            group: None,
            kind: None,
            name: name.to_string(),
            namespace: namespace.map(String::from),
            port,
            weight: None,
        }
    }

    fn reason(resolution: &Resolution) -> Option<&'static str> {
        match resolution {
            Resolution::Failed(BackendFailure { reason, .. }) => Some(*reason),
            _ => None,
        }
    }

    #[test]
    fn test_same_namespace_service_resolves() {
        let mut snapshot = base_snapshot();
        snapshot.services = vec![Arc::new(service("web", "api", &[80, 443]))];

        let resolution =
            resolve_backend(&snapshot, RouteKind::Http, "web", &backend("api", None, Some(443)));
        assert_eq!(
            resolution,
            Resolution::Target(BackendTarget::new("api", "web", 443))
        );
    }

    #[test]
    fn test_missing_service_or_port() {
        let mut snapshot = base_snapshot();
        snapshot.services = vec![Arc::new(service("web", "api", &[80]))];

        let missing =
            resolve_backend(&snapshot, RouteKind::Http, "web", &backend("gone", None, Some(80)));
        assert_eq!(reason(&missing), Some(REASON_BACKEND_NOT_FOUND));

        let wrong_port =
            resolve_backend(&snapshot, RouteKind::Http, "web", &backend("api", None, Some(8080)));
        assert_eq!(reason(&wrong_port), Some(REASON_BACKEND_NOT_FOUND));
    }

    #[test]
    fn test_port_defaults_to_single_service_port() {
        let mut snapshot = base_snapshot();
        snapshot.services = vec![
            Arc::new(service("web", "single", &[9090])),
            Arc::new(service("web", "multi", &[80, 443])),
        ];

        assert_eq!(
            resolve_backend(&snapshot, RouteKind::Grpc, "web", &backend("single", None, None)),
            Resolution::Target(BackendTarget::new("single", "web", 9090))
        );
        let ambiguous =
            resolve_backend(&snapshot, RouteKind::Grpc, "web", &backend("multi", None, None));
        assert_eq!(reason(&ambiguous), Some(REASON_BACKEND_NOT_FOUND));
    }

    #[test]
    fn test_non_service_kind_is_invalid() {
        let snapshot = base_snapshot();
        let mut bucket = backend("bucket", None, Some(80));
        bucket.group = Some("storage.example.com".to_string());
        bucket.kind = Some("Bucket".to_string());

        let resolution = resolve_backend(&snapshot, RouteKind::Http, "web", &bucket);
        assert_eq!(reason(&resolution), Some(REASON_INVALID_KIND));
    }

    #[test]
    fn test_cross_namespace_requires_grant() {
        let mut snapshot = base_snapshot();
        snapshot.services = vec![Arc::new(service("backends", "api", &[80]))];
        let cross = backend("api", Some("backends"), Some(80));

        let denied = resolve_backend(&snapshot, RouteKind::Http, "web", &cross);
        assert_eq!(reason(&denied), Some(REASON_REF_NOT_PERMITTED));

        snapshot.reference_grants = vec![Arc::new(reference_grant("backends", "web", "HTTPRoute"))];
        let allowed = resolve_backend(&snapshot, RouteKind::Http, "web", &cross);
        assert_eq!(
            allowed,
            Resolution::Target(BackendTarget::new("api", "backends", 80))
        );
    }

    #[test]
    fn test_failures_are_classified() {
        let mut snapshot = base_snapshot();
        snapshot.services = vec![Arc::new(service("backends", "api", &[80]))];

        let Resolution::Failed(denied) = resolve_backend(
            &snapshot,
            RouteKind::Http,
            "web",
            &backend("api", Some("backends"), Some(80)),
        ) else {
            panic!("expected a failure");
        };
        assert!(matches!(denied.error, ControllerError::PermissionDenied(_)));
        assert_eq!(denied.error.category(), "permission_denied");
        assert!(!denied.error.is_retryable());
        assert!(denied.message().starts_with("no ReferenceGrant in backends"));

        let Resolution::Failed(missing) =
            resolve_backend(&snapshot, RouteKind::Http, "web", &backend("gone", None, Some(80)))
        else {
            panic!("expected a failure");
        };
        assert!(matches!(missing.error, ControllerError::NotFound(_)));
        assert_eq!(missing.message(), "Service web/gone not found");
    }

    #[test]
    fn test_grant_is_specific_to_route_kind_and_namespace() {
        let mut snapshot = base_snapshot();
        snapshot.reference_grants = vec![Arc::new(reference_grant("backends", "web", "HTTPRoute"))];

        assert!(reference_permitted(&snapshot, RouteKind::Http, "web", "backends", "api"));
        assert!(!reference_permitted(&snapshot, RouteKind::Grpc, "web", "backends", "api"));
        assert!(!reference_permitted(&snapshot, RouteKind::Http, "other", "backends", "api"));
        assert!(reference_permitted(&snapshot, RouteKind::Grpc, "web", "web", "api"));
    }

    #[test]
    fn test_grant_restricted_to_named_service() {
        let mut snapshot = base_snapshot();
        let mut grant = reference_grant("backends", "web", "HTTPRoute");
        grant.spec.to[0].name = Some("api".to_string());
        snapshot.reference_grants = vec![Arc::new(grant)];

        assert!(reference_permitted(&snapshot, RouteKind::Http, "web", "backends", "api"));
        assert!(!reference_permitted(&snapshot, RouteKind::Http, "web", "backends", "db"));
    }

    #[test]
    fn test_zero_weight_is_disabled() {
        let mut snapshot = base_snapshot();
        snapshot.services = vec![Arc::new(service("web", "api", &[80]))];
        let mut idle = backend("api", None, Some(80));
        idle.weight = Some(0);

        assert_eq!(
            resolve_backend(&snapshot, RouteKind::Http, "web", &idle),
            Resolution::Disabled
        );
    }
}
