// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Cloudflare API client for tunnel ingress configuration.
//!
//! The controller only needs two remote operations per tunnel: fetch the whole
//! ingress list and replace the whole ingress list. Both are exposed through the
//! [`TunnelConfigApi`] trait so the sync engine can be exercised without a network.
//!
//! # Endpoints
//!
//! | Operation | Request |
//! |-----------|---------|
//! | Fetch | `GET /accounts/{account}/cfd_tunnel/{tunnel}/configurations` |
//! | Replace | `PUT /accounts/{account}/cfd_tunnel/{tunnel}/configurations` |
//! | Account discovery | `GET /accounts` |
//!
//! Every response uses the v4 envelope (`success`, `errors`, `result`). Failures
//! are classified into [`ControllerError`] from the HTTP status.

use crate::errors::ControllerError;
use crate::ingress::IngressEntry;
use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Remote operations on a tunnel's ingress configuration.
#[async_trait]
pub trait TunnelConfigApi: Send + Sync {
    /// Fetch the current ingress list. A tunnel that was never configured yields
    /// an empty list.
    async fn get_configuration(&self, tunnel_id: &str)
        -> Result<Vec<IngressEntry>, ControllerError>;

    /// Replace the whole ingress list.
    async fn put_configuration(
        &self,
        tunnel_id: &str,
        ingress: &[IngressEntry],
    ) -> Result<(), ControllerError>;
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
    result: Option<T>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct IngressConfig {
    #[serde(default)]
    ingress: Vec<IngressEntry>,
}

#[derive(Debug, Deserialize)]
struct ConfigurationResult {
    #[serde(default)]
    config: Option<IngressConfig>,
}

#[derive(Debug, Serialize)]
struct ConfigurationRequest<'a> {
    config: ConfigurationBody<'a>,
}

#[derive(Debug, Serialize)]
struct ConfigurationBody<'a> {
    ingress: &'a [IngressEntry],
}

#[derive(Debug, Deserialize)]
struct Account {
    id: String,
    #[serde(default)]
    name: String,
}

/// Render the envelope's error list, e.g. `[1003] invalid tunnel id`.
fn describe_errors(errors: &[ApiMessage]) -> String {
    if errors.is_empty() {
        return "no error detail returned".to_string();
    }
    errors
        .iter()
        .map(|e| format!("[{}] {}", e.code, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// `reqwest` implementation of [`TunnelConfigApi`] for one Cloudflare account.
#[derive(Clone)]
pub struct CloudflareClient {
    http: HttpClient,
    base_url: String,
    api_token: String,
    account_id: String,
}

impl std::fmt::Debug for CloudflareClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudflareClient")
            .field("base_url", &self.base_url)
            .field("account_id", &self.account_id)
            .finish_non_exhaustive()
    }
}

impl CloudflareClient {
    /// Build an HTTP client with a per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the TLS backend cannot be initialised.
    pub fn http_client(timeout: Duration) -> Result<HttpClient, ControllerError> {
        HttpClient::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ControllerError::Validation(format!("failed to build HTTP client: {e}")))
    }

    /// Create a client, discovering the account id from the token when `account_id` is `None`.
    ///
    /// # Errors
    ///
    /// Propagates classified API errors from account discovery, and returns a
    /// validation error when the token grants access to no account.
    pub async fn connect(
        http: HttpClient,
        base_url: &str,
        api_token: String,
        account_id: Option<String>,
    ) -> Result<Self, ControllerError> {
        let mut client = Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token,
            account_id: account_id.unwrap_or_default(),
        };
        if client.account_id.is_empty() {
            client.account_id = client.discover_account().await?;
        }
        Ok(client)
    }

    #[must_use]
    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    async fn discover_account(&self) -> Result<String, ControllerError> {
        let url = format!("{}/accounts", self.base_url);
        let accounts: Vec<Account> = self.send(self.http.get(&url), &url).await?.unwrap_or_default();

        let mut accounts = accounts.into_iter();
        let Some(first) = accounts.next() else {
            return Err(ControllerError::Validation(
                "Cloudflare API token has access to no account; set accountID explicitly"
                    .to_string(),
            ));
        };
        if accounts.next().is_some() {
            warn!(
                account_id = %first.id,
                account_name = %first.name,
                "API token can access several accounts, using the first; set accountID to choose"
            );
        }
        debug!(account_id = %first.id, "Discovered Cloudflare account");
        Ok(first.id)
    }

    fn configuration_url(&self, tunnel_id: &str) -> String {
        format!(
            "{}/accounts/{}/cfd_tunnel/{}/configurations",
            self.base_url, self.account_id, tunnel_id
        )
    }

    /// Send a request and unwrap the v4 envelope.
    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        url: &str,
    ) -> Result<Option<T>, ControllerError> {
        let response = request
            .header("Authorization", format!("Bearer {}", self.api_token))
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        let envelope: Option<Envelope<T>> = serde_json::from_str(&text).ok();

        if !status.is_success() {
            let detail = envelope
                .map(|e| describe_errors(&e.errors))
                .unwrap_or_else(|| text.chars().take(256).collect());
            error!(url = %url, status = %status, error = %detail, "Cloudflare API request failed");
            return Err(ControllerError::from_http_status(
                status.as_u16(),
                format!("Cloudflare API returned {status}: {detail}"),
            ));
        }

        let Some(envelope) = envelope else {
            return Err(ControllerError::Transient(format!(
                "unparseable Cloudflare API response from {url}"
            )));
        };
        if !envelope.success {
            return Err(ControllerError::Validation(format!(
                "Cloudflare API rejected the request: {}",
                describe_errors(&envelope.errors)
            )));
        }
        Ok(envelope.result)
    }
}

#[async_trait]
impl TunnelConfigApi for CloudflareClient {
    async fn get_configuration(
        &self,
        tunnel_id: &str,
    ) -> Result<Vec<IngressEntry>, ControllerError> {
        let url = self.configuration_url(tunnel_id);
        let result: Option<ConfigurationResult> = self.send(self.http.get(&url), &url).await?;
        Ok(result
            .and_then(|r| r.config)
            .map(|c| c.ingress)
            .unwrap_or_default())
    }

    async fn put_configuration(
        &self,
        tunnel_id: &str,
        ingress: &[IngressEntry],
    ) -> Result<(), ControllerError> {
        let url = self.configuration_url(tunnel_id);
        let body = ConfigurationRequest {
            config: ConfigurationBody { ingress },
        };
        let _: Option<serde_json::Value> = self.send(self.http.put(&url).json(&body), &url).await?;
        debug!(tunnel_id = %tunnel_id, rules = ingress.len(), "Replaced tunnel ingress configuration");
        Ok(())
    }
}

/// Connected clients, one per `TunnelConfig`.
///
/// An entry is reused while the token, account and base URL it was built from
/// are unchanged, so account discovery runs once per credential rotation.
#[derive(Default)]
pub struct ClientCache {
    clients: Mutex<HashMap<String, (String, Arc<CloudflareClient>)>>,
}

impl ClientCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached client for `key`, connecting a new one when the
    /// credentials changed.
    ///
    /// # Errors
    ///
    /// Propagates account discovery failures from [`CloudflareClient::connect`].
    pub async fn get_or_connect(
        &self,
        key: &str,
        http: &HttpClient,
        base_url: &str,
        api_token: String,
        account_id: Option<String>,
    ) -> Result<Arc<CloudflareClient>, ControllerError> {
        let fingerprint = fingerprint(base_url, &api_token, account_id.as_deref());
        if let Some(client) = self.cached(key, &fingerprint) {
            return Ok(client);
        }

        let client = Arc::new(
            CloudflareClient::connect(http.clone(), base_url, api_token, account_id).await?,
        );
        debug!(tunnel_config = %key, account_id = %client.account_id(), "Connected Cloudflare client");
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), (fingerprint, client.clone()));
        Ok(client)
    }

    fn cached(&self, key: &str, fingerprint: &str) -> Option<Arc<CloudflareClient>> {
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .filter(|(fp, _)| fp == fingerprint)
            .map(|(_, client)| client.clone())
    }

    /// Forget the client for a removed `TunnelConfig`.
    pub fn evict(&self, key: &str) {
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn fingerprint(base_url: &str, api_token: &str, account_id: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(base_url.as_bytes());
    hasher.update([0]);
    hasher.update(api_token.as_bytes());
    hasher.update([0]);
    hasher.update(account_id.unwrap_or_default().as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[cfg(test)]
#[path = "cloudflare_tests.rs"]
mod cloudflare_tests;
