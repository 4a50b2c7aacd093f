// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

#![allow(unexpected_cfgs)]

//! # Tunnelgate - Gateway API controller for Cloudflare Tunnels
//!
//! Tunnelgate watches Gateway API objects and publishes them through a
//! Cloudflare Tunnel: every `HTTPRoute` and `GRPCRoute` attached to a
//! `Gateway` of a Cloudflare `GatewayClass` becomes an ingress rule of the
//! tunnel's remote configuration, and each `Gateway` gets its own
//! `cloudflared` deployment.
//!
//! ## Modules
//!
//! - [`crd`] - the `TunnelConfig` custom resource referenced by `GatewayClass` parameters
//! - [`gateway_api`] - the subset of Gateway API types the controller reads
//! - [`ingress`] - builds ordered tunnel ingress rules from resolved routes
//! - [`sync`] - serialized, change-detecting writes of ingress documents
//! - [`cloudflare`] - the Cloudflare tunnel configuration API client
//! - [`deployment`] - installs and removes the per-Gateway `cloudflared` release
//! - [`reconcilers`] - the Gateway and tunnel reconcilers
//! - [`context`] - shared context and reflector stores
//!
//! ## Example
//!
//! ```rust
//! use tunnelgate::ingress::{
//!     build_document, BackendTarget, PathMatch, RouteContribution, RouteKind, RuleContribution,
//! };
//!
//! let route = RouteContribution {
//!     kind: RouteKind::Http,
//!     namespace: "web".to_string(),
//!     name: "storefront".to_string(),
//!     hostnames: vec!["shop.example.com".to_string()],
//!     rules: vec![RuleContribution {
//!         index: 0,
//!         matches: vec![PathMatch::Prefix("/api".to_string())],
//!         targets: vec![BackendTarget::new("api", "web", 8080)],
//!     }],
//! };
//!
//! let document = build_document(&[route]);
//! // One rule plus the trailing catch-all
//! assert_eq!(document.rule_count(), 1);
//! assert_eq!(document.ingress().len(), 2);
//! ```

pub mod cloudflare;
pub mod config;
pub mod constants;
pub mod context;
pub mod crd;
pub mod deployment;
pub mod errors;
pub mod gateway_api;
pub mod ingress;
pub mod labels;
pub mod metrics;
pub mod reconcilers;
pub mod status_reasons;
pub mod sync;

#[cfg(test)]
mod status_reasons_tests;
#[cfg(test)]
mod test_fixtures;
