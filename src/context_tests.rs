// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for context.rs

#[cfg(test)]
mod tests {
    use crate::constants::DEFAULT_CONTROLLER_NAME;
    use crate::test_fixtures::{
        base_snapshot, gateway, gateway_class, reference_grant, service, CLASS, TUNNEL_ID,
    };
    use std::sync::Arc;

    #[test]
    fn test_owned_gateway_resolves_tunnel_config() {
        let snapshot = base_snapshot();
        let gw = snapshot.gateway("web", "public").unwrap();

        let config = snapshot
            .owning_tunnel_config(gw, DEFAULT_CONTROLLER_NAME)
            .unwrap();
        assert_eq!(config.spec.tunnel_id, TUNNEL_ID);
    }

    #[test]
    fn test_foreign_controller_is_not_owned() {
        let snapshot = base_snapshot();
        let gw = snapshot.gateway("web", "public").unwrap();
        assert!(snapshot
            .owning_tunnel_config(gw, "example.net/other")
            .is_none());
    }

    #[test]
    fn test_missing_class_or_config_is_not_owned() {
        let mut snapshot = base_snapshot();
        let orphan = gateway("web", "orphan", "unknown-class", &[]);
        assert!(snapshot
            .owning_tunnel_config(&orphan, DEFAULT_CONTROLLER_NAME)
            .is_none());

        snapshot.gateway_classes = vec![Arc::new(gateway_class(
            CLASS,
            DEFAULT_CONTROLLER_NAME,
            "missing",
        ))];
        let gw = gateway("web", "public", CLASS, &[]);
        assert!(snapshot
            .owning_tunnel_config(&gw, DEFAULT_CONTROLLER_NAME)
            .is_none());
    }

    #[test]
    fn test_wrong_parameters_kind_is_not_owned() {
        let mut snapshot = base_snapshot();
        let mut class = gateway_class(CLASS, DEFAULT_CONTROLLER_NAME, "production");
        if let Some(params) = class.spec.parameters_ref.as_mut() {
            params.kind = "ConfigMap".to_string();
            params.group = String::new();
        }
        snapshot.gateway_classes = vec![Arc::new(class)];

        let gw = gateway("web", "public", CLASS, &[]);
        assert!(snapshot
            .owning_tunnel_config(&gw, DEFAULT_CONTROLLER_NAME)
            .is_none());
    }

    #[test]
    fn test_lookups_are_namespace_scoped() {
        let mut snapshot = base_snapshot();
        snapshot.services = vec![Arc::new(service("web", "api", &[80]))];
        snapshot.reference_grants = vec![Arc::new(reference_grant("backends", "web", "HTTPRoute"))];

        assert!(snapshot.service("web", "api").is_some());
        assert!(snapshot.service("other", "api").is_none());
        assert!(snapshot.gateway("other", "public").is_none());
        assert_eq!(snapshot.reference_grants_in("backends").count(), 1);
        assert_eq!(snapshot.reference_grants_in("web").count(), 0);
    }
}
