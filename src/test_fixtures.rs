// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Object builders shared by unit tests.

use crate::constants::DEFAULT_CONTROLLER_NAME;
use crate::context::ClusterSnapshot;
use crate::crd::TunnelConfig;
use crate::gateway_api::{GRPCRoute, Gateway, GatewayClass, HTTPRoute, ReferenceGrant};
use k8s_openapi::api::core::v1::Service;
use serde_json::{json, Value};
use std::sync::Arc;

pub const TUNNEL_ID: &str = "6ff42ae2-765d-4adf-8112-31c55c1551ef";
pub const OTHER_TUNNEL_ID: &str = "0b8e4a34-1f39-4c59-9f55-9d5c0a8f5f10";
pub const CLASS: &str = "cloudflare";

pub fn tunnel_config(name: &str, tunnel_id: &str) -> TunnelConfig {
    serde_json::from_value(json!({
        "apiVersion": "tunnel.firestoned.io/v1alpha1",
        "kind": "TunnelConfig",
        "metadata": {"name": name},
        "spec": {
            "tunnelID": tunnel_id,
            "cloudflareCredentialsSecretRef": {"name": "cloudflare", "namespace": "cloudflare-tunnel-system"},
            "tunnelTokenSecretRef": {"name": "tunnel"},
            "cloudflared": {"replicas": 2, "protocol": "quic"}
        }
    }))
    .unwrap()
}

pub fn gateway_class(name: &str, controller: &str, tunnel_config: &str) -> GatewayClass {
    serde_json::from_value(json!({
        "apiVersion": "gateway.networking.k8s.io/v1",
        "kind": "GatewayClass",
        "metadata": {"name": name},
        "spec": {
            "controllerName": controller,
            "parametersRef": {
                "group": "tunnel.firestoned.io",
                "kind": "TunnelConfig",
                "name": tunnel_config
            }
        }
    }))
    .unwrap()
}

pub fn gateway(namespace: &str, name: &str, class: &str, listener_hosts: &[&str]) -> Gateway {
    let listeners: Vec<Value> = listener_hosts
        .iter()
        .enumerate()
        .map(|(i, host)| {
            json!({"name": format!("l{i}"), "hostname": host, "port": 443, "protocol": "HTTPS"})
        })
        .collect();
    serde_json::from_value(json!({
        "apiVersion": "gateway.networking.k8s.io/v1",
        "kind": "Gateway",
        "metadata": {"name": name, "namespace": namespace, "generation": 1, "uid": format!("{namespace}-{name}")},
        "spec": {"gatewayClassName": class, "listeners": listeners}
    }))
    .unwrap()
}

pub fn service(namespace: &str, name: &str, ports: &[i32]) -> Service {
    let ports: Vec<Value> = ports.iter().map(|p| json!({"port": p})).collect();
    serde_json::from_value(json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": {"name": name, "namespace": namespace},
        "spec": {"ports": ports}
    }))
    .unwrap()
}

/// Grant `from_kind` objects in `from_namespace` access to Services in `namespace`.
pub fn reference_grant(namespace: &str, from_namespace: &str, from_kind: &str) -> ReferenceGrant {
    serde_json::from_value(json!({
        "apiVersion": "gateway.networking.k8s.io/v1beta1",
        "kind": "ReferenceGrant",
        "metadata": {"name": format!("from-{from_namespace}"), "namespace": namespace},
        "spec": {
            "from": [{"group": "gateway.networking.k8s.io", "kind": from_kind, "namespace": from_namespace}],
            "to": [{"group": "", "kind": "Service"}]
        }
    }))
    .unwrap()
}

/// An HTTPRoute built from a raw `spec`.
pub fn http_route(namespace: &str, name: &str, spec: Value) -> HTTPRoute {
    serde_json::from_value(json!({
        "apiVersion": "gateway.networking.k8s.io/v1",
        "kind": "HTTPRoute",
        "metadata": {"name": name, "namespace": namespace, "generation": 2},
        "spec": spec
    }))
    .unwrap()
}

/// A GRPCRoute built from a raw `spec`.
pub fn grpc_route(namespace: &str, name: &str, spec: Value) -> GRPCRoute {
    serde_json::from_value(json!({
        "apiVersion": "gateway.networking.k8s.io/v1",
        "kind": "GRPCRoute",
        "metadata": {"name": name, "namespace": namespace, "generation": 1},
        "spec": spec
    }))
    .unwrap()
}

/// One tunnel, one class and one Gateway `web/public` listening on `*.example.com`.
pub fn base_snapshot() -> ClusterSnapshot {
    ClusterSnapshot {
        gateway_classes: vec![Arc::new(gateway_class(CLASS, DEFAULT_CONTROLLER_NAME, "production"))],
        tunnel_configs: vec![Arc::new(tunnel_config("production", TUNNEL_ID))],
        gateways: vec![Arc::new(gateway("web", "public", CLASS, &["*.example.com"]))],
        ..ClusterSnapshot::default()
    }
}
