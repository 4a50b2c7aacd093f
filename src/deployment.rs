// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Lifecycle of the `cloudflared` agent serving a Gateway.
//!
//! The reconciler talks to a [`DeploymentManager`]; the Kubernetes-native
//! [`KubeDeploymentManager`] renders one `Deployment` per Gateway and applies it
//! with server-side apply.
//!
//! # Release versions
//!
//! A release version is `<cloudflared tag>-<checksum of the desired values>`. It is
//! stored in the [`RELEASE_VERSION_ANNOTATION`] of the deployed object, and an
//! upgrade is only issued when the desired version differs from it.

use crate::constants::{
    AWG_CONFIG_MOUNT_PATH, AWG_IMAGE, CLOUDFLARED_IMAGE, CLOUDFLARED_METRICS_PORT,
    CLOUDFLARED_VERSION, CONTAINER_NAME_AWG, CONTAINER_NAME_CLOUDFLARED,
    DEFAULT_AWG_INTERFACE_PREFIX, FIELD_MANAGER,
};
use crate::crd::{ResolvedSecretRef, TunnelConfigSpec, TunnelProtocol};
use crate::errors::ControllerError;
use crate::labels::{
    APP_NAME_CLOUDFLARED, COMPONENT_TUNNEL_AGENT, GATEWAY_NAMESPACE_LABEL, GATEWAY_NAME_LABEL,
    K8S_COMPONENT, K8S_INSTANCE, K8S_MANAGED_BY, K8S_NAME, K8S_PART_OF, MANAGED_BY_TUNNELGATE,
    PART_OF_TUNNELGATE, RELEASE_VERSION_ANNOTATION, TUNNEL_ID_ANNOTATION,
};
use crate::metrics::record_deployment_operation;
use crate::reconcilers::retry::with_deadline;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Capabilities, Container, ContainerPort, EnvVar, EnvVarSource, HTTPGetAction, PodSpec,
    PodTemplateSpec, Probe, SecretKeySelector, SecretVolumeSource, SecurityContext, Volume,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::{DeleteParams, Patch, PatchParams};
use kube::{Api, Client};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

/// Longest name usable as a label value.
const MAX_RELEASE_NAME_LEN: usize = 63;

/// Hex characters of the values checksum kept in the release version.
const VERSION_CHECKSUM_LEN: usize = 12;

/// Identity of one managed deployment.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ReleaseKey {
    pub namespace: String,
    pub name: String,
}

impl ReleaseKey {
    /// Release serving Gateway `gateway_namespace/gateway_name`, installed into `namespace`.
    ///
    /// Names longer than a label value allows are shortened with a hash suffix so
    /// distinct Gateways never collide.
    #[must_use]
    pub fn for_gateway(gateway_namespace: &str, gateway_name: &str, namespace: &str) -> Self {
        let full = format!("cloudflared-{gateway_namespace}-{gateway_name}");
        let name = if full.len() <= MAX_RELEASE_NAME_LEN {
            full
        } else {
            let digest = hex_digest(full.as_bytes());
            let keep = MAX_RELEASE_NAME_LEN - 9;
            let head: String = full.chars().take(keep).collect();
            format!("{}-{}", head.trim_end_matches('-'), &digest[..8])
        };
        Self {
            namespace: namespace.to_string(),
            name,
        }
    }
}

impl std::fmt::Display for ReleaseKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// AmneziaWG sidecar settings after defaults.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AwgValues {
    pub secret_name: String,
    pub interface_name: String,
}

/// Desired state of one cloudflared deployment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DeploymentValues {
    pub tunnel_id: String,
    pub gateway_namespace: String,
    pub gateway_name: String,
    pub replicas: i32,
    pub protocol: TunnelProtocol,
    pub token_secret: TokenSecret,
    pub awg: Option<AwgValues>,
}

/// Location of the tunnel run token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TokenSecret {
    pub name: String,
    pub key: String,
}

impl DeploymentValues {
    /// Derive the desired values for a Gateway served by `spec`.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::Validation`] when no tunnel token is referenced, or
    /// when the token secret lives outside the deployment namespace (pods can only
    /// read secrets from their own namespace).
    pub fn from_tunnel_config(
        spec: &TunnelConfigSpec,
        gateway_namespace: &str,
        gateway_name: &str,
    ) -> Result<Self, ControllerError> {
        let Some(token) = spec.tunnel_token_ref() else {
            return Err(ControllerError::Validation(
                "tunnelTokenSecretRef is required when cloudflared.enabled is true".to_string(),
            ));
        };
        let ResolvedSecretRef {
            namespace,
            name,
            key,
        } = token;
        if namespace != spec.cloudflared.namespace {
            return Err(ControllerError::Validation(format!(
                "tunnelTokenSecretRef namespace '{namespace}' must match cloudflared.namespace '{}'",
                spec.cloudflared.namespace
            )));
        }

        let awg = spec
            .cloudflared
            .awg
            .as_ref()
            .and_then(|awg| {
                awg.secret_name
                    .as_ref()
                    .filter(|s| !s.is_empty())
                    .map(|secret| (secret, awg))
            })
            .map(|(secret, awg)| AwgValues {
                secret_name: secret.clone(),
                interface_name: format!(
                    "{}0",
                    awg.interface_prefix
                        .as_deref()
                        .filter(|p| !p.is_empty())
                        .unwrap_or(DEFAULT_AWG_INTERFACE_PREFIX)
                ),
            });

        Ok(Self {
            tunnel_id: spec.tunnel_id.clone(),
            gateway_namespace: gateway_namespace.to_string(),
            gateway_name: gateway_name.to_string(),
            replicas: spec.cloudflared.replicas,
            protocol: spec.cloudflared.protocol,
            token_secret: TokenSecret { name, key },
            awg,
        })
    }

    /// Release version for these values.
    #[must_use]
    pub fn version(&self) -> String {
        // Serializing plain strings and integers cannot fail
        let rendered = serde_json::to_vec(self).unwrap_or_default();
        let digest = hex_digest(&rendered);
        format!("{CLOUDFLARED_VERSION}-{}", &digest[..VERSION_CHECKSUM_LEN])
    }
}

fn hex_digest(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Install, upgrade and remove the agent deployment of a Gateway.
#[async_trait]
pub trait DeploymentManager: Send + Sync {
    /// Bring the release to `values`, returning the deployed version.
    ///
    /// A no-op when the deployed version already matches.
    async fn install_or_upgrade(
        &self,
        release: &ReleaseKey,
        values: &DeploymentValues,
    ) -> Result<String, ControllerError>;

    /// Remove the release. Succeeds when it is already gone.
    async fn uninstall(&self, release: &ReleaseKey) -> Result<(), ControllerError>;
}

/// Builds standardized labels for a cloudflared release.
#[must_use]
pub fn build_labels(release: &ReleaseKey, values: &DeploymentValues) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(K8S_NAME.into(), APP_NAME_CLOUDFLARED.into());
    labels.insert(K8S_INSTANCE.into(), release.name.clone());
    labels.insert(K8S_COMPONENT.into(), COMPONENT_TUNNEL_AGENT.into());
    labels.insert(K8S_MANAGED_BY.into(), MANAGED_BY_TUNNELGATE.into());
    labels.insert(K8S_PART_OF.into(), PART_OF_TUNNELGATE.into());
    labels.insert(GATEWAY_NAMESPACE_LABEL.into(), values.gateway_namespace.clone());
    labels.insert(GATEWAY_NAME_LABEL.into(), values.gateway_name.clone());
    labels
}

/// Render the cloudflared `Deployment` for a release.
#[must_use]
pub fn build_deployment(release: &ReleaseKey, values: &DeploymentValues) -> Deployment {
    let labels = build_labels(release, values);
    let selector: BTreeMap<String, String> = labels
        .iter()
        .filter(|(k, _)| k.as_str() == K8S_NAME || k.as_str() == K8S_INSTANCE)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let mut annotations = BTreeMap::new();
    annotations.insert(RELEASE_VERSION_ANNOTATION.to_string(), values.version());
    annotations.insert(TUNNEL_ID_ANNOTATION.to_string(), values.tunnel_id.clone());

    Deployment {
        metadata: ObjectMeta {
            name: Some(release.name.clone()),
            namespace: Some(release.namespace.clone()),
            labels: Some(labels.clone()),
            annotations: Some(annotations),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(values.replicas),
            selector: LabelSelector {
                match_labels: Some(selector),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(build_pod_spec(values)),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn build_pod_spec(values: &DeploymentValues) -> PodSpec {
    let mut containers = vec![build_cloudflared_container(values)];
    let mut volumes = Vec::new();

    if let Some(awg) = &values.awg {
        containers.push(build_awg_container(awg));
        volumes.push(Volume {
            name: "awg-config".into(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(awg.secret_name.clone()),
                ..Default::default()
            }),
            ..Default::default()
        });
    }

    PodSpec {
        containers,
        volumes: (!volumes.is_empty()).then_some(volumes),
        ..Default::default()
    }
}

fn build_cloudflared_container(values: &DeploymentValues) -> Container {
    let mut args: Vec<String> = vec![
        "tunnel".into(),
        "--no-autoupdate".into(),
        "--metrics".into(),
        format!("0.0.0.0:{CLOUDFLARED_METRICS_PORT}"),
    ];
    if let Some(protocol) = values.protocol.as_arg() {
        args.push("--protocol".into());
        args.push(protocol.into());
    }
    args.push("run".into());

    Container {
        name: CONTAINER_NAME_CLOUDFLARED.into(),
        image: Some(format!("{CLOUDFLARED_IMAGE}:{CLOUDFLARED_VERSION}")),
        image_pull_policy: Some("IfNotPresent".into()),
        args: Some(args),
        env: Some(vec![EnvVar {
            name: "TUNNEL_TOKEN".into(),
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    name: values.token_secret.name.clone(),
                    key: values.token_secret.key.clone(),
                    optional: Some(false),
                }),
                ..Default::default()
            }),
            ..Default::default()
        }]),
        ports: Some(vec![ContainerPort {
            name: Some("metrics".into()),
            container_port: i32::from(CLOUDFLARED_METRICS_PORT),
            protocol: Some("TCP".into()),
            ..Default::default()
        }]),
        readiness_probe: Some(Probe {
            http_get: Some(HTTPGetAction {
                path: Some("/ready".into()),
                port: IntOrString::Int(i32::from(CLOUDFLARED_METRICS_PORT)),
                ..Default::default()
            }),
            period_seconds: Some(10),
            failure_threshold: Some(3),
            ..Default::default()
        }),
        security_context: Some(SecurityContext {
            run_as_non_root: Some(true),
            allow_privilege_escalation: Some(false),
            read_only_root_filesystem: Some(true),
            capabilities: Some(Capabilities {
                drop: Some(vec!["ALL".to_string()]),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn build_awg_container(awg: &AwgValues) -> Container {
    Container {
        name: CONTAINER_NAME_AWG.into(),
        image: Some(AWG_IMAGE.into()),
        image_pull_policy: Some("IfNotPresent".into()),
        env: Some(vec![
            EnvVar {
                name: "AWG_INTERFACE".into(),
                value: Some(awg.interface_name.clone()),
                ..Default::default()
            },
            EnvVar {
                name: "AWG_CONFIG".into(),
                value: Some(format!("{AWG_CONFIG_MOUNT_PATH}/{}.conf", awg.interface_name)),
                ..Default::default()
            },
        ]),
        volume_mounts: Some(vec![VolumeMount {
            name: "awg-config".into(),
            mount_path: AWG_CONFIG_MOUNT_PATH.into(),
            read_only: Some(true),
            ..Default::default()
        }]),
        security_context: Some(SecurityContext {
            capabilities: Some(Capabilities {
                add: Some(vec!["NET_ADMIN".to_string()]),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Version recorded on a deployed object, if any.
#[must_use]
pub fn deployed_version(deployment: &Deployment) -> Option<&str> {
    deployment
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(RELEASE_VERSION_ANNOTATION))
        .map(String::as_str)
}

/// [`DeploymentManager`] backed by `apps/v1` Deployments.
#[derive(Clone)]
pub struct KubeDeploymentManager {
    client: Client,
    call_timeout: Duration,
}

impl KubeDeploymentManager {
    #[must_use]
    pub fn new(client: Client, call_timeout: Duration) -> Self {
        Self {
            client,
            call_timeout,
        }
    }
}

#[async_trait]
impl DeploymentManager for KubeDeploymentManager {
    async fn install_or_upgrade(
        &self,
        release: &ReleaseKey,
        values: &DeploymentValues,
    ) -> Result<String, ControllerError> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), &release.namespace);
        let version = values.version();

        let current = with_deadline(self.call_timeout, async {
            api.get_opt(&release.name)
                .await
                .map_err(ControllerError::from)
        })
        .await?;

        let operation = match current.as_ref().map(deployed_version) {
            Some(Some(deployed)) if deployed == version => {
                debug!(release = %release, version = %version, "Release up to date");
                record_deployment_operation("unchanged");
                return Ok(version);
            }
            Some(_) => "upgraded",
            None => "installed",
        };

        let desired = build_deployment(release, values);
        with_deadline(self.call_timeout, async {
            api.patch(
                &release.name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&desired),
            )
            .await
            .map(|_| ())
            .map_err(ControllerError::from)
        })
        .await?;

        info!(release = %release, version = %version, operation, "cloudflared release applied");
        record_deployment_operation(operation);
        Ok(version)
    }

    async fn uninstall(&self, release: &ReleaseKey) -> Result<(), ControllerError> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), &release.namespace);
        let result = with_deadline(self.call_timeout, async {
            api.delete(&release.name, &DeleteParams::background())
                .await
                .map(|_| ())
                .map_err(ControllerError::from)
        })
        .await;

        match result {
            Ok(()) => {
                info!(release = %release, "cloudflared release uninstalled");
                record_deployment_operation("uninstalled");
                Ok(())
            }
            Err(ControllerError::NotFound(_)) => {
                debug!(release = %release, "cloudflared release already absent");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
#[path = "deployment_tests.rs"]
mod deployment_tests;
