// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Controller settings, read from flags with environment fallbacks.

use crate::constants::{
    CLOUDFLARE_API_BASE_URL, DEFAULT_API_TIMEOUT_SECS, DEFAULT_CONTROLLER_NAME,
    DEFAULT_LEASE_DURATION_SECS, DEFAULT_LEASE_GRACE_SECS, DEFAULT_LEASE_NAME,
    DEFAULT_SYNC_MAX_ATTEMPTS, DEFAULT_WORKERS, METRICS_SERVER_BIND_ADDRESS, METRICS_SERVER_PORT,
};
use clap::Parser;
use std::time::Duration;

/// Gateway API controller for Cloudflare Tunnels.
#[derive(Parser, Clone, Debug)]
#[command(name = "tunnelgate", version, about)]
pub struct ControllerConfig {
    /// `controllerName` a GatewayClass must carry to be handled here.
    #[arg(long, env = "CONTROLLER_NAME", default_value = DEFAULT_CONTROLLER_NAME)]
    pub controller_name: String,

    /// Run controllers only while holding the leader lease.
    #[arg(
        long,
        env = "LEADER_ELECTION",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub leader_election: bool,

    #[arg(long, env = "LEASE_NAME", default_value = DEFAULT_LEASE_NAME)]
    pub lease_name: String,

    /// Namespace of the leader lease; defaults to the pod namespace.
    #[arg(long, env = "POD_NAMESPACE", default_value = "default")]
    pub lease_namespace: String,

    #[arg(long, env = "LEASE_DURATION_SECONDS", default_value_t = DEFAULT_LEASE_DURATION_SECS)]
    pub lease_duration_secs: u64,

    #[arg(long, env = "LEASE_GRACE_SECONDS", default_value_t = DEFAULT_LEASE_GRACE_SECS)]
    pub lease_grace_secs: u64,

    /// Holder identity for the lease; defaults to the pod name.
    #[arg(long, env = "POD_NAME")]
    pub identity: Option<String>,

    #[arg(long, env = "METRICS_BIND_ADDRESS", default_value = METRICS_SERVER_BIND_ADDRESS)]
    pub metrics_bind_address: String,

    #[arg(long, env = "METRICS_PORT", default_value_t = METRICS_SERVER_PORT)]
    pub metrics_port: u16,

    #[arg(long, env = "CLOUDFLARE_API_BASE_URL", default_value = CLOUDFLARE_API_BASE_URL)]
    pub cloudflare_api_base_url: String,

    /// Maximum number of objects reconciled concurrently per controller.
    #[arg(long, env = "WORKERS", default_value_t = DEFAULT_WORKERS)]
    pub workers: u16,

    /// Attempts per remote call before a transient failure is surfaced.
    #[arg(long, env = "SYNC_MAX_ATTEMPTS", default_value_t = DEFAULT_SYNC_MAX_ATTEMPTS)]
    pub sync_max_attempts: u32,

    /// Deadline for every external call.
    #[arg(long, env = "API_TIMEOUT_SECS", default_value_t = DEFAULT_API_TIMEOUT_SECS)]
    pub api_timeout_secs: u64,

    /// Namespace for credential secrets that do not name one.
    #[arg(long, env = "CREDENTIALS_NAMESPACE", default_value = "default")]
    pub credentials_namespace: String,
}

impl ControllerConfig {
    #[must_use]
    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }

    /// Lease holder identity: explicit flag, then hostname, then a random suffix.
    #[must_use]
    pub fn holder_identity(&self) -> String {
        self.identity
            .clone()
            .filter(|id| !id.is_empty())
            .or_else(|| std::env::var("HOSTNAME").ok().filter(|h| !h.is_empty()))
            .unwrap_or_else(|| format!("tunnelgate-{:08x}", rand::random::<u32>()))
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod config_tests;
