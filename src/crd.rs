// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Custom Resource Definitions owned by tunnelgate.
//!
//! # Resource Types
//!
//! - [`TunnelConfig`] - cluster-scoped description of one Cloudflare tunnel: its id,
//!   credentials and the optional managed `cloudflared` deployment
//!
//! `GatewayClass.spec.parametersRef` points at a `TunnelConfig`; every Gateway of
//! that class is served by the referenced tunnel.
//!
//! # Example
//!
//! ```rust,no_run
//! use tunnelgate::crd::{CloudflaredSpec, SecretKeyReference, TunnelConfigSpec};
//!
//! let spec = TunnelConfigSpec {
//!     tunnel_id: "6ff42ae2-765d-4adf-8112-31c55c1551ef".to_string(),
//!     account_id: None,
//!     cloudflare_credentials_secret_ref: SecretKeyReference {
//!         name: "cloudflare".to_string(),
//!         namespace: None,
//!         key: None,
//!     },
//!     tunnel_token_secret_ref: None,
//!     cloudflared: CloudflaredSpec::default(),
//! };
//! ```

use crate::constants::{
    DEFAULT_API_TOKEN_KEY, DEFAULT_CLOUDFLARED_NAMESPACE, DEFAULT_CLOUDFLARED_REPLICAS,
    DEFAULT_TUNNEL_TOKEN_KEY,
};
use crate::errors::ControllerError;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Pattern every tunnel id must match.
pub const TUNNEL_ID_PATTERN: &str =
    r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$";

/// Condition represents an observation of a resource's current state.
///
/// The shape matches `metav1.Condition` so it can be written into Gateway API
/// status subresources as-is.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition, e.g. `Accepted`, `Programmed`, `ResolvedRefs`.
    pub r#type: String,

    /// Status of the condition: True, False, or Unknown.
    pub status: String,

    /// Brief CamelCase reason for the condition's last transition.
    #[serde(default)]
    pub reason: String,

    /// Human-readable message indicating details about the transition.
    #[serde(default)]
    pub message: String,

    /// Last time the condition transitioned from one status to another (RFC3339 format).
    #[serde(default)]
    pub last_transition_time: String,

    /// Generation of the object the condition was computed from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// Reference to a key inside a Kubernetes Secret.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeyReference {
    /// Secret name.
    pub name: String,

    /// Secret namespace. Defaults depend on the consumer of the reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Key inside the secret. Defaults depend on the consumer of the reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

/// A secret reference with every default applied.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResolvedSecretRef {
    pub namespace: String,
    pub name: String,
    pub key: String,
}

impl SecretKeyReference {
    /// Apply namespace and key defaults.
    #[must_use]
    pub fn resolve(&self, default_namespace: &str, default_key: &str) -> ResolvedSecretRef {
        ResolvedSecretRef {
            namespace: self
                .namespace
                .clone()
                .filter(|ns| !ns.is_empty())
                .unwrap_or_else(|| default_namespace.to_string()),
            name: self.name.clone(),
            key: self
                .key
                .clone()
                .filter(|k| !k.is_empty())
                .unwrap_or_else(|| default_key.to_string()),
        }
    }
}

/// Transport protocol cloudflared uses to reach the edge.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum TunnelProtocol {
    #[serde(rename = "auto")]
    Auto,
    #[serde(rename = "quic")]
    Quic,
    #[serde(rename = "http2")]
    Http2,
    /// Let cloudflared pick its own default.
    #[default]
    #[serde(rename = "")]
    Unset,
}

impl TunnelProtocol {
    /// Value for `--protocol`, or `None` when cloudflared should use its default.
    #[must_use]
    pub fn as_arg(self) -> Option<&'static str> {
        match self {
            Self::Auto => Some("auto"),
            Self::Quic => Some("quic"),
            Self::Http2 => Some("http2"),
            Self::Unset => None,
        }
    }
}

/// AmneziaWG overlay sidecar configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AwgSpec {
    /// Secret holding the AmneziaWG interface configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,

    /// Prefix of the interface name created inside the pod.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface_prefix: Option<String>,
}

/// Managed cloudflared deployment settings.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CloudflaredSpec {
    /// Whether the controller deploys cloudflared for Gateways of this tunnel.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Number of cloudflared replicas.
    #[serde(default = "default_replicas")]
    #[schemars(range(min = 1))]
    pub replicas: i32,

    /// Namespace the deployment is installed into.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Edge transport protocol.
    #[serde(default)]
    pub protocol: TunnelProtocol,

    /// Optional AmneziaWG sidecar.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub awg: Option<AwgSpec>,
}

fn default_enabled() -> bool {
    true
}

fn default_replicas() -> i32 {
    DEFAULT_CLOUDFLARED_REPLICAS
}

fn default_namespace() -> String {
    DEFAULT_CLOUDFLARED_NAMESPACE.to_string()
}

impl Default for CloudflaredSpec {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            replicas: default_replicas(),
            namespace: default_namespace(),
            protocol: TunnelProtocol::default(),
            awg: None,
        }
    }
}

/// `TunnelConfig` identifies one Cloudflare tunnel and how to run its agent.
///
/// # Example
///
/// ```yaml
/// apiVersion: tunnel.firestoned.io/v1alpha1
/// kind: TunnelConfig
/// metadata:
///   name: production
/// spec:
///   tunnelID: 6ff42ae2-765d-4adf-8112-31c55c1551ef
///   cloudflareCredentialsSecretRef:
///     name: cloudflare
///   tunnelTokenSecretRef:
///     name: cloudflare
///   cloudflared:
///     replicas: 2
///     protocol: quic
/// ```
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "tunnel.firestoned.io",
    version = "v1alpha1",
    kind = "TunnelConfig",
    shortname = "tunnelcfg",
    doc = "TunnelConfig identifies a Cloudflare tunnel, the credentials used to manage its ingress configuration and the optional cloudflared deployment serving it.",
    printcolumn = r#"{"name":"Tunnel","type":"string","jsonPath":".spec.tunnelID"}"#,
    printcolumn = r#"{"name":"Managed","type":"boolean","jsonPath":".spec.cloudflared.enabled"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TunnelConfigSpec {
    /// Cloudflare tunnel UUID.
    #[serde(rename = "tunnelID")]
    #[schemars(regex(pattern = r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$"))]
    pub tunnel_id: String,

    /// Cloudflare account id. Discovered from the API token when omitted.
    #[serde(rename = "accountID", default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,

    /// Secret holding the Cloudflare API token (default key `api-token`).
    pub cloudflare_credentials_secret_ref: SecretKeyReference,

    /// Secret holding the tunnel run token (default key `tunnel-token`).
    /// Required when `cloudflared.enabled` is true.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tunnel_token_secret_ref: Option<SecretKeyReference>,

    /// Managed cloudflared deployment.
    #[serde(default)]
    pub cloudflared: CloudflaredSpec,
}

impl TunnelConfigSpec {
    /// Check invariants the schema cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::Validation`] when the tunnel id is malformed or a
    /// managed deployment is requested without a tunnel token reference.
    pub fn validate(&self) -> Result<(), ControllerError> {
        if !is_tunnel_id(&self.tunnel_id) {
            return Err(ControllerError::Validation(format!(
                "tunnelID '{}' is not a UUID",
                self.tunnel_id
            )));
        }
        if self.cloudflared.enabled && self.tunnel_token_secret_ref.is_none() {
            return Err(ControllerError::Validation(
                "tunnelTokenSecretRef is required when cloudflared.enabled is true".to_string(),
            ));
        }
        if self.cloudflared.replicas < 1 {
            return Err(ControllerError::Validation(format!(
                "cloudflared.replicas must be at least 1, got {}",
                self.cloudflared.replicas
            )));
        }
        Ok(())
    }

    /// Resolved location of the Cloudflare API token.
    #[must_use]
    pub fn api_token_ref(&self, default_namespace: &str) -> ResolvedSecretRef {
        self.cloudflare_credentials_secret_ref
            .resolve(default_namespace, DEFAULT_API_TOKEN_KEY)
    }

    /// Resolved location of the tunnel run token; defaults to the deployment namespace.
    #[must_use]
    pub fn tunnel_token_ref(&self) -> Option<ResolvedSecretRef> {
        self.tunnel_token_secret_ref
            .as_ref()
            .map(|r| r.resolve(&self.cloudflared.namespace, DEFAULT_TUNNEL_TOKEN_KEY))
    }
}

/// Check a string against [`TUNNEL_ID_PATTERN`] without pulling in a regex engine.
#[must_use]
pub fn is_tunnel_id(value: &str) -> bool {
    const GROUPS: [usize; 5] = [8, 4, 4, 4, 12];
    let parts: Vec<&str> = value.split('-').collect();
    parts.len() == GROUPS.len()
        && parts
            .iter()
            .zip(GROUPS)
            .all(|(part, len)| part.len() == len && part.chars().all(|c| c.is_ascii_hexdigit()))
}

#[cfg(test)]
#[path = "crd_tests.rs"]
mod crd_tests;
