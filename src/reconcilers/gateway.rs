// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Gateway reconciliation.
//!
//! A Gateway is one logical tunnel endpoint. For every Gateway whose class
//! belongs to this controller the reconciler:
//!
//! 1. Uninstalls the cloudflared release and drops the finalizer when the
//!    Gateway is being deleted (in that order; the finalizer stays on failure)
//! 2. Ensures the finalizer and installs or upgrades cloudflared when the
//!    `TunnelConfig` asks for a managed deployment
//! 3. Publishes `Accepted` and `Programmed`, plus the tunnel hostname address
//!
//! Gateways of other controllers are skipped without writing anything.

use crate::constants::{
    DEFAULT_CLOUDFLARED_NAMESPACE, GATEWAY_FINALIZER, RESYNC_REQUEUE_DURATION_SECS,
    TUNNEL_ADDRESS_SUFFIX,
};
use crate::context::Context;
use crate::crd::TunnelConfig;
use crate::deployment::{DeploymentManager, DeploymentValues, ReleaseKey};
use crate::errors::ControllerError;
use crate::gateway_api::{Gateway, GatewayStatus, GatewayStatusAddress};
use crate::labels::RELEASE_NAMESPACE_ANNOTATION;
use crate::metrics;
use crate::reconcilers::finalizers::{self, has_finalizer};
use crate::reconcilers::retry::with_deadline;
use crate::reconcilers::status::{
    conditions_equal, create_condition, patch_status_with_retry, set_condition,
};
use crate::status_reasons::{
    CONDITION_STATUS_FALSE, CONDITION_STATUS_TRUE, CONDITION_TYPE_ACCEPTED,
    CONDITION_TYPE_PROGRAMMED, REASON_ACCEPTED, REASON_INVALID_PARAMETERS, REASON_PENDING,
    REASON_PROGRAMMED,
};
use async_trait::async_trait;
use kube::api::{Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Api, Client, ResourceExt};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const RESOURCE_TYPE: &str = "Gateway";

/// Address type published for the tunnel endpoint.
pub const ADDRESS_TYPE_HOSTNAME: &str = "Hostname";

/// Result of one Gateway reconcile.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GatewayOutcome {
    /// The Gateway belongs to another controller.
    NotOwned,
    /// Status published; `version` is the deployed release, if managed.
    Programmed { version: Option<String> },
    /// The Gateway is being deleted and its release has been removed.
    CleanedUp,
}

/// Writes the reconciler performs on the Gateway object itself.
#[async_trait]
pub trait GatewayWriter: Send + Sync {
    async fn ensure_finalizer(&self, gateway: &Gateway) -> Result<(), ControllerError>;

    async fn remove_finalizer(&self, gateway: &Gateway) -> Result<(), ControllerError>;

    /// Record the namespace the Gateway's release lives in.
    async fn record_release_namespace(
        &self,
        gateway: &Gateway,
        namespace: &str,
    ) -> Result<(), ControllerError>;

    /// Merge `status` into the Gateway's status subresource.
    async fn patch_status(
        &self,
        gateway: &Gateway,
        status: &GatewayStatus,
    ) -> Result<(), ControllerError>;
}

/// [`GatewayWriter`] backed by the Kubernetes API.
pub struct KubeGatewayWriter {
    client: Client,
    call_timeout: Duration,
}

impl KubeGatewayWriter {
    #[must_use]
    pub fn new(client: Client, call_timeout: Duration) -> Self {
        Self {
            client,
            call_timeout,
        }
    }
}

#[async_trait]
impl GatewayWriter for KubeGatewayWriter {
    async fn ensure_finalizer(&self, gateway: &Gateway) -> Result<(), ControllerError> {
        with_deadline(
            self.call_timeout,
            finalizers::ensure_finalizer(&self.client, gateway, GATEWAY_FINALIZER),
        )
        .await
    }

    async fn remove_finalizer(&self, gateway: &Gateway) -> Result<(), ControllerError> {
        with_deadline(
            self.call_timeout,
            finalizers::remove_finalizer(&self.client, gateway, GATEWAY_FINALIZER),
        )
        .await
    }

    async fn record_release_namespace(
        &self,
        gateway: &Gateway,
        namespace: &str,
    ) -> Result<(), ControllerError> {
        let api: Api<Gateway> =
            Api::namespaced(self.client.clone(), &gateway.namespace().unwrap_or_default());
        let patch = json!({
            "metadata": {
                "annotations": { RELEASE_NAMESPACE_ANNOTATION: namespace }
            }
        });
        with_deadline(self.call_timeout, async {
            api.patch(&gateway.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
                .await?;
            Ok(())
        })
        .await
    }

    async fn patch_status(
        &self,
        gateway: &Gateway,
        status: &GatewayStatus,
    ) -> Result<(), ControllerError> {
        let namespace = gateway.namespace().unwrap_or_default();
        let name = gateway.name_any();
        let api: Api<Gateway> = Api::namespaced(self.client.clone(), &namespace);

        let written = with_deadline(
            self.call_timeout,
            patch_status_with_retry(&api, &name, |current| {
                let existing = current.status.clone().unwrap_or_default();
                let mut conditions = existing.conditions.clone();
                for condition in &status.conditions {
                    set_condition(&mut conditions, condition.clone());
                }
                if conditions_equal(&conditions, &existing.conditions)
                    && existing.addresses == status.addresses
                {
                    return None;
                }
                Some(json!({
                    "addresses": status.addresses,
                    "conditions": conditions,
                }))
            }),
        )
        .await?;

        if written {
            debug!("Updated status of Gateway {}/{}", namespace, name);
        }
        Ok(())
    }
}

/// Hostname clients resolve to reach a tunnel.
#[must_use]
pub fn tunnel_address(tunnel_id: &str) -> String {
    format!("{}.{}", tunnel_id.to_ascii_lowercase(), TUNNEL_ADDRESS_SUFFIX)
}

/// Namespace recorded on the Gateway when its release was installed.
#[must_use]
pub fn recorded_release_namespace(gateway: &Gateway) -> Option<&str> {
    gateway
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(RELEASE_NAMESPACE_ANNOTATION))
        .map(String::as_str)
        .filter(|ns| !ns.is_empty())
}

/// Release currently deployed for a Gateway.
///
/// The recorded namespace wins over the `TunnelConfig`, which may have been
/// edited or deleted since the install. Without either, the default
/// deployment namespace is assumed.
#[must_use]
pub fn release_for(gateway: &Gateway, tunnel: Option<&TunnelConfig>) -> ReleaseKey {
    let namespace = recorded_release_namespace(gateway).unwrap_or_else(|| {
        tunnel.map_or(DEFAULT_CLOUDFLARED_NAMESPACE, |t| {
            t.spec.cloudflared.namespace.as_str()
        })
    });
    release_in(gateway, namespace)
}

fn release_in(gateway: &Gateway, namespace: &str) -> ReleaseKey {
    ReleaseKey::for_gateway(
        &gateway.namespace().unwrap_or_default(),
        &gateway.name_any(),
        namespace,
    )
}

/// Status describing the outcome of the deployment step; `error` is `None`
/// when it succeeded.
#[must_use]
pub fn gateway_status(
    gateway: &Gateway,
    tunnel_id: &str,
    error: Option<&ControllerError>,
) -> GatewayStatus {
    let generation = gateway.metadata.generation;
    let address = tunnel_address(tunnel_id);

    let (accepted, programmed, addresses) = match error {
        None => (
            create_condition(
                CONDITION_TYPE_ACCEPTED,
                CONDITION_STATUS_TRUE,
                REASON_ACCEPTED,
                &format!("Gateway is served by tunnel {tunnel_id}"),
                generation,
            ),
            create_condition(
                CONDITION_TYPE_PROGRAMMED,
                CONDITION_STATUS_TRUE,
                REASON_PROGRAMMED,
                &format!("Tunnel reachable at {address}"),
                generation,
            ),
            vec![GatewayStatusAddress {
                type_: ADDRESS_TYPE_HOSTNAME.to_string(),
                value: address,
            }],
        ),
        Some(ControllerError::Validation(message)) => (
            create_condition(
                CONDITION_TYPE_ACCEPTED,
                CONDITION_STATUS_FALSE,
                REASON_INVALID_PARAMETERS,
                message,
                generation,
            ),
            create_condition(
                CONDITION_TYPE_PROGRAMMED,
                CONDITION_STATUS_FALSE,
                REASON_PENDING,
                "Waiting for valid tunnel parameters",
                generation,
            ),
            Vec::new(),
        ),
        Some(e) => (
            create_condition(
                CONDITION_TYPE_ACCEPTED,
                CONDITION_STATUS_TRUE,
                REASON_ACCEPTED,
                &format!("Gateway is served by tunnel {tunnel_id}"),
                generation,
            ),
            create_condition(
                CONDITION_TYPE_PROGRAMMED,
                CONDITION_STATUS_FALSE,
                REASON_PENDING,
                &e.to_string(),
                generation,
            ),
            Vec::new(),
        ),
    };

    GatewayStatus {
        addresses,
        conditions: vec![accepted, programmed],
    }
}

/// Reconcile one Gateway.
///
/// `tunnel` is the `TunnelConfig` the Gateway's class points at, or `None` when
/// the Gateway is not owned by this controller.
///
/// # Errors
///
/// Returns the classified error of the failing step. Validation failures are
/// recorded in status before being returned.
pub async fn reconcile_gateway(
    gateway: &Gateway,
    tunnel: Option<&TunnelConfig>,
    deployments: &dyn DeploymentManager,
    writer: &dyn GatewayWriter,
) -> Result<GatewayOutcome, ControllerError> {
    let namespace = gateway.namespace().unwrap_or_default();
    let name = gateway.name_any();

    if gateway.metadata.deletion_timestamp.is_some() {
        if has_finalizer(gateway, GATEWAY_FINALIZER) {
            let release = release_for(gateway, tunnel);
            info!("Gateway {}/{} is being deleted, uninstalling {}", namespace, name, release);
            deployments.uninstall(&release).await?;
            writer.remove_finalizer(gateway).await?;
        }
        return Ok(GatewayOutcome::CleanedUp);
    }

    let Some(tunnel) = tunnel else {
        debug!("Gateway {}/{} is not handled by this controller", namespace, name);
        return Ok(GatewayOutcome::NotOwned);
    };

    let result = apply_deployment(gateway, tunnel, deployments, writer).await;

    if let Err(e) = &result {
        warn!("Gateway {}/{} not programmed: {}", namespace, name, e);
    }

    let status = gateway_status(gateway, &tunnel.spec.tunnel_id, result.as_ref().err());
    writer.patch_status(gateway, &status).await?;

    result.map(|version| GatewayOutcome::Programmed { version })
}

/// Bring the cloudflared release in line with the `TunnelConfig`.
///
/// The release namespace is recorded on the Gateway before the first install.
/// When `cloudflared.namespace` changes, the new release is installed first and
/// the old one removed before the record moves.
async fn apply_deployment(
    gateway: &Gateway,
    tunnel: &TunnelConfig,
    deployments: &dyn DeploymentManager,
    writer: &dyn GatewayWriter,
) -> Result<Option<String>, ControllerError> {
    tunnel.spec.validate()?;

    if tunnel.spec.cloudflared.enabled {
        let values = DeploymentValues::from_tunnel_config(
            &tunnel.spec,
            &gateway.namespace().unwrap_or_default(),
            &gateway.name_any(),
        )?;
        let desired = release_in(gateway, &tunnel.spec.cloudflared.namespace);
        let recorded = recorded_release_namespace(gateway);

        writer.ensure_finalizer(gateway).await?;
        if recorded.is_none() {
            writer
                .record_release_namespace(gateway, &desired.namespace)
                .await?;
        }
        let version = deployments.install_or_upgrade(&desired, &values).await?;

        if let Some(previous) = recorded.filter(|ns| *ns != desired.namespace) {
            let previous = release_in(gateway, previous);
            info!("Moving {} to {}", previous, desired);
            deployments.uninstall(&previous).await?;
            writer
                .record_release_namespace(gateway, &desired.namespace)
                .await?;
        }
        return Ok(Some(version));
    }

    let release = &release_for(gateway, Some(tunnel));
    if has_finalizer(gateway, GATEWAY_FINALIZER) {
        info!(
            "Managed deployment disabled for Gateway {}/{}, uninstalling {}",
            gateway.namespace().unwrap_or_default(),
            gateway.name_any(),
            release
        );
        deployments.uninstall(release).await?;
        writer.remove_finalizer(gateway).await?;
    }
    Ok(None)
}

/// kube-runtime entry point for the Gateway controller.
///
/// # Errors
///
/// Returns the classified error for the error policy.
pub async fn reconcile(gateway: Arc<Gateway>, ctx: Arc<Context>) -> Result<Action, ControllerError> {
    let start = Instant::now();
    let key = format!("{}/{}", gateway.namespace().unwrap_or_default(), gateway.name_any());

    ctx.stores.wait_until_ready().await?;
    let snapshot = ctx.stores.snapshot();
    let tunnel = snapshot
        .owning_tunnel_config(&gateway, &ctx.config.controller_name)
        .cloned();
    let writer = KubeGatewayWriter::new(ctx.client.clone(), ctx.config.api_timeout());

    let result =
        reconcile_gateway(&gateway, tunnel.as_deref(), ctx.deployments.as_ref(), &writer).await;

    match result {
        Ok(outcome) => {
            ctx.gateway_backoff.reset(&key);
            metrics::record_reconciliation_success(RESOURCE_TYPE, start.elapsed());
            match outcome {
                GatewayOutcome::Programmed { version } => {
                    debug!(gateway = %key, version = ?version, "Gateway programmed");
                    Ok(Action::requeue(Duration::from_secs(RESYNC_REQUEUE_DURATION_SECS)))
                }
                GatewayOutcome::NotOwned | GatewayOutcome::CleanedUp => Ok(Action::await_change()),
            }
        }
        Err(e) => {
            metrics::record_reconciliation_error(RESOURCE_TYPE, start.elapsed());
            metrics::record_error(RESOURCE_TYPE, e.category());
            Err(e)
        }
    }
}

/// Error policy for the Gateway controller.
#[allow(clippy::needless_pass_by_value)] // Signature required by kube::runtime::Controller
pub fn error_policy(gateway: Arc<Gateway>, err: &ControllerError, ctx: Arc<Context>) -> Action {
    let key = format!("{}/{}", gateway.namespace().unwrap_or_default(), gateway.name_any());
    super::requeue_for_error(RESOURCE_TYPE, &key, err, &ctx.gateway_backoff)
}

#[cfg(test)]
#[path = "gateway_tests.rs"]
mod gateway_tests;
