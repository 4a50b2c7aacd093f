// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Shared context for all controllers with reflector stores.
//!
//! Every controller receives an `Arc<Context>` holding:
//! - the Kubernetes client and controller settings
//! - reflector stores for every watched kind
//! - the per-tunnel [`SyncEngine`] and the deployment manager
//! - requeue backoff state for the error policies
//!
//! A fresh `Context` is built each time leadership is acquired, so no state
//! from a previous term leaks into the next one.

use crate::cloudflare::ClientCache;
use crate::config::ControllerConfig;
use crate::constants::{API_GROUP, KIND_TUNNEL_CONFIG};
use crate::crd::TunnelConfig;
use crate::deployment::DeploymentManager;
use crate::errors::ControllerError;
use crate::gateway_api::{GRPCRoute, Gateway, GatewayClass, HTTPRoute, ReferenceGrant};
use crate::reconcilers::retry::RequeueBackoff;
use crate::sync::SyncEngine;
use k8s_openapi::api::core::v1::Service;
use kube::runtime::reflector::Store;
use kube::{Client, ResourceExt};
use std::sync::Arc;

/// Shared context passed to all controllers.
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client for API operations
    pub client: Client,

    pub config: Arc<ControllerConfig>,

    /// Reflector stores for all watched kinds
    pub stores: Stores,

    /// Serialized, coalescing writer of tunnel documents
    pub sync: Arc<SyncEngine>,

    /// Installs and removes cloudflared for Gateways
    pub deployments: Arc<dyn DeploymentManager>,

    /// Shared HTTP connection pool for the Cloudflare API
    pub http: reqwest::Client,

    /// Cloudflare API clients keyed by `TunnelConfig`
    pub tunnel_clients: Arc<ClientCache>,

    pub gateway_backoff: Arc<RequeueBackoff>,
    pub route_backoff: Arc<RequeueBackoff>,
}

/// Collection of all reflector stores.
///
/// Each store is populated by a dedicated reflector task and provides
/// in-memory access to resources without API calls.
#[derive(Clone)]
pub struct Stores {
    // Cluster-scoped resources
    pub gateway_classes: Store<GatewayClass>,
    pub tunnel_configs: Store<TunnelConfig>,

    // Namespace-scoped resources
    pub gateways: Store<Gateway>,
    pub http_routes: Store<HTTPRoute>,
    pub grpc_routes: Store<GRPCRoute>,
    pub reference_grants: Store<ReferenceGrant>,
    pub services: Store<Service>,
}

impl Stores {
    /// Wait until every store has completed its initial list.
    ///
    /// Planning against a store that is still empty would produce an empty
    /// document and wipe the remote configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::Transient`] if a reflector was dropped.
    pub async fn wait_until_ready(&self) -> Result<(), ControllerError> {
        self.gateway_classes.wait_until_ready().await.map_err(dropped)?;
        self.tunnel_configs.wait_until_ready().await.map_err(dropped)?;
        self.gateways.wait_until_ready().await.map_err(dropped)?;
        self.http_routes.wait_until_ready().await.map_err(dropped)?;
        self.grpc_routes.wait_until_ready().await.map_err(dropped)?;
        self.reference_grants.wait_until_ready().await.map_err(dropped)?;
        self.services.wait_until_ready().await.map_err(dropped)?;
        Ok(())
    }

    /// Point-in-time copy of every store.
    #[must_use]
    pub fn snapshot(&self) -> ClusterSnapshot {
        ClusterSnapshot {
            gateway_classes: self.gateway_classes.state(),
            tunnel_configs: self.tunnel_configs.state(),
            gateways: self.gateways.state(),
            http_routes: self.http_routes.state(),
            grpc_routes: self.grpc_routes.state(),
            reference_grants: self.reference_grants.state(),
            services: self.services.state(),
        }
    }
}

fn dropped(e: impl std::fmt::Display) -> ControllerError {
    ControllerError::Transient(format!("reflector stopped: {e}"))
}

/// Immutable view of the cluster used for one planning pass.
#[derive(Clone, Debug, Default)]
pub struct ClusterSnapshot {
    pub gateway_classes: Vec<Arc<GatewayClass>>,
    pub tunnel_configs: Vec<Arc<TunnelConfig>>,
    pub gateways: Vec<Arc<Gateway>>,
    pub http_routes: Vec<Arc<HTTPRoute>>,
    pub grpc_routes: Vec<Arc<GRPCRoute>>,
    pub reference_grants: Vec<Arc<ReferenceGrant>>,
    pub services: Vec<Arc<Service>>,
}

impl ClusterSnapshot {
    #[must_use]
    pub fn gateway(&self, namespace: &str, name: &str) -> Option<&Arc<Gateway>> {
        self.gateways
            .iter()
            .find(|gw| gw.name_any() == name && gw.namespace().as_deref() == Some(namespace))
    }

    #[must_use]
    pub fn service(&self, namespace: &str, name: &str) -> Option<&Arc<Service>> {
        self.services
            .iter()
            .find(|svc| svc.name_any() == name && svc.namespace().as_deref() == Some(namespace))
    }

    #[must_use]
    pub fn tunnel_config(&self, name: &str) -> Option<&Arc<TunnelConfig>> {
        self.tunnel_configs.iter().find(|tc| tc.name_any() == name)
    }

    /// `ReferenceGrant`s living in `namespace`.
    pub fn reference_grants_in<'a>(
        &'a self,
        namespace: &'a str,
    ) -> impl Iterator<Item = &'a Arc<ReferenceGrant>> + 'a {
        self.reference_grants
            .iter()
            .filter(move |rg| rg.namespace().as_deref() == Some(namespace))
    }

    /// The `TunnelConfig` behind a Gateway, if this controller owns it.
    ///
    /// A Gateway is owned when its class names `controller_name` and the
    /// class `parametersRef` points at an existing `TunnelConfig`.
    #[must_use]
    pub fn owning_tunnel_config(
        &self,
        gateway: &Gateway,
        controller_name: &str,
    ) -> Option<&Arc<TunnelConfig>> {
        let class = self
            .gateway_classes
            .iter()
            .find(|gc| gc.name_any() == gateway.spec.gateway_class_name)?;
        if class.spec.controller_name != controller_name {
            return None;
        }
        let params = class.spec.parameters_ref.as_ref()?;
        if params.kind != KIND_TUNNEL_CONFIG || params.group != API_GROUP {
            return None;
        }
        self.tunnel_config(&params.name)
    }
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod context_tests;
