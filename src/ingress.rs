// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Translation of route contributions into a tunnel ingress document.
//!
//! The builder is a pure function: it performs no I/O and the document it
//! produces depends only on the set of contributions, never on the order in
//! which they are supplied.
//!
//! # Ordering
//!
//! The edge evaluates ingress rules first-match-wins, so candidates are sorted
//! with a total order before the catch-all is appended:
//!
//! 1. hostname, ascending
//! 2. exact matches before prefix matches
//! 3. longer literal paths before shorter ones
//! 4. source route (`namespace/name`) ascending, then rule index ascending
//! 5. match index, target and path pattern, so no two distinct rules compare equal
//!
//! # Example
//!
//! ```rust
//! use tunnelgate::ingress::{build_document, BackendTarget, PathMatch, RouteContribution,
//!     RouteKind, RuleContribution};
//!
//! let route = RouteContribution {
//!     kind: RouteKind::Http,
//!     namespace: "web".to_string(),
//!     name: "frontend".to_string(),
//!     hostnames: vec!["app.example.com".to_string()],
//!     rules: vec![RuleContribution {
//!         index: 0,
//!         matches: vec![PathMatch::Prefix("/".to_string())],
//!         targets: vec![BackendTarget::new("frontend", "web", 8080)],
//!     }],
//! };
//!
//! let document = build_document(&[route]);
//! assert_eq!(document.rule_count(), 1);
//! assert_eq!(document.ingress()[0].service, "http://frontend.web.svc.cluster.local:8080");
//! ```

use crate::constants::{CATCH_ALL_SERVICE, CLUSTER_DNS_SUFFIX, KIND_GRPC_ROUTE, KIND_HTTP_ROUTE};
use crate::gateway_api::{
    GRPCMethodMatchType, GRPCRouteMatch, HTTPPathMatchType, HTTPRouteMatch,
};
use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};
use std::fmt;

/// Suffix appended to a prefix match's literal path.
pub const PREFIX_WILDCARD: &str = "*";

/// Kind of route a contribution came from. Selects the upstream scheme.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RouteKind {
    Http,
    Grpc,
}

impl RouteKind {
    /// Scheme cloudflared uses to reach the backend.
    #[must_use]
    pub fn scheme(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Grpc => "h2c",
        }
    }

    /// Kubernetes kind name.
    #[must_use]
    pub fn kind(self) -> &'static str {
        match self {
            Self::Http => KIND_HTTP_ROUTE,
            Self::Grpc => KIND_GRPC_ROUTE,
        }
    }
}

impl fmt::Display for RouteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

/// A path match the edge can evaluate.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PathMatch {
    Exact(String),
    Prefix(String),
}

impl PathMatch {
    /// Literal path without any wildcard.
    #[must_use]
    pub fn literal(&self) -> &str {
        match self {
            Self::Exact(path) | Self::Prefix(path) => path,
        }
    }

    #[must_use]
    pub fn is_exact(&self) -> bool {
        matches!(self, Self::Exact(_))
    }

    /// Pattern written into the ingress document.
    #[must_use]
    pub fn pattern(&self) -> String {
        match self {
            Self::Exact(path) => path.clone(),
            Self::Prefix(path) => format!("{path}{PREFIX_WILDCARD}"),
        }
    }

    /// Map an HTTPRoute match. A missing path means prefix `/`.
    ///
    /// Returns `None` for regular expression paths and for matches that also
    /// test headers, query parameters or the method, none of which the edge
    /// can express.
    #[must_use]
    pub fn from_http(m: &HTTPRouteMatch) -> Option<Self> {
        if m.has_non_path_conditions() {
            return None;
        }
        let Some(path) = &m.path else {
            return Some(Self::Prefix("/".to_string()));
        };
        match path.type_ {
            HTTPPathMatchType::Exact => Some(Self::Exact(path.value.clone())),
            HTTPPathMatchType::PathPrefix => Some(Self::Prefix(path.value.clone())),
            HTTPPathMatchType::RegularExpression => None,
        }
    }

    /// Map a GRPCRoute method match onto the `/service/method` request path.
    ///
    /// Service and method map to an exact path, service alone to a prefix, and
    /// no method match to prefix `/`. Method-only, regular expression and
    /// header matches have no path equivalent and return `None`.
    #[must_use]
    pub fn from_grpc(m: &GRPCRouteMatch) -> Option<Self> {
        if !m.headers.is_empty() {
            return None;
        }
        let Some(method) = &m.method else {
            return Some(Self::Prefix("/".to_string()));
        };
        if method.type_ == GRPCMethodMatchType::RegularExpression {
            return None;
        }
        match (method.service.as_deref(), method.method.as_deref()) {
            (Some(service), Some(name)) => Some(Self::Exact(format!("/{service}/{name}"))),
            (Some(service), None) => Some(Self::Prefix(format!("/{service}/"))),
            (None, None) => Some(Self::Prefix("/".to_string())),
            (None, Some(_)) => None,
        }
    }
}

/// Expand the matches of an HTTPRoute rule. An empty list means prefix `/`.
#[must_use]
pub fn http_rule_matches(matches: &[HTTPRouteMatch]) -> Vec<PathMatch> {
    if matches.is_empty() {
        return vec![PathMatch::Prefix("/".to_string())];
    }
    matches.iter().filter_map(PathMatch::from_http).collect()
}

/// Expand the matches of a GRPCRoute rule. An empty list means prefix `/`.
#[must_use]
pub fn grpc_rule_matches(matches: &[GRPCRouteMatch]) -> Vec<PathMatch> {
    if matches.is_empty() {
        return vec![PathMatch::Prefix("/".to_string())];
    }
    matches.iter().filter_map(PathMatch::from_grpc).collect()
}

/// A resolved in-cluster Service port.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BackendTarget {
    pub service: String,
    pub namespace: String,
    pub port: i32,
}

impl BackendTarget {
    pub fn new(service: impl Into<String>, namespace: impl Into<String>, port: i32) -> Self {
        Self {
            service: service.into(),
            namespace: namespace.into(),
            port,
        }
    }

    /// Upstream URL for this target, e.g. `h2c://api.grpc.svc.cluster.local:9090`.
    #[must_use]
    pub fn url(&self, kind: RouteKind) -> String {
        format!(
            "{}://{}.{}.{}:{}",
            kind.scheme(),
            self.service,
            self.namespace,
            CLUSTER_DNS_SUFFIX,
            self.port
        )
    }
}

/// The surviving matches and targets of one route rule.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuleContribution {
    /// Position of the rule in the route spec.
    pub index: usize,
    pub matches: Vec<PathMatch>,
    pub targets: Vec<BackendTarget>,
}

/// Everything one route contributes to a tunnel document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteContribution {
    pub kind: RouteKind,
    pub namespace: String,
    pub name: String,
    /// Effective hostnames, after listener inheritance.
    pub hostnames: Vec<String>,
    pub rules: Vec<RuleContribution>,
}

impl RouteContribution {
    /// `namespace/name`, the route's sort key.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// One candidate ingress rule, before serialization.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IngressRule {
    pub hostname: String,
    pub path_pattern: String,
    pub is_exact: bool,
    pub path_length: usize,
    pub target: String,
    pub source_route_name: String,
    pub source_rule_index: usize,
    pub source_match_index: usize,
}

impl IngressRule {
    fn sort_key(&self) -> impl Ord + '_ {
        (
            self.hostname.as_str(),
            !self.is_exact,
            Reverse(self.path_length),
            self.source_route_name.as_str(),
            self.source_rule_index,
            self.source_match_index,
            self.target.as_str(),
            self.path_pattern.as_str(),
        )
    }
}

impl Ord for IngressRule {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl PartialOrd for IngressRule {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// One entry of the remote ingress list, in the edge's wire shape.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub service: String,
}

impl IngressEntry {
    /// The terminal rule matching anything not matched above it.
    #[must_use]
    pub fn catch_all() -> Self {
        Self {
            hostname: None,
            path: None,
            service: CATCH_ALL_SERVICE.to_string(),
        }
    }

    fn normalized(&self) -> (Option<String>, Option<&str>, &str) {
        (
            self.hostname
                .as_deref()
                .map(str::trim)
                .filter(|h| !h.is_empty())
                .map(str::to_ascii_lowercase),
            self.path.as_deref().map(str::trim).filter(|p| !p.is_empty()),
            self.service.trim(),
        )
    }
}

impl From<&IngressRule> for IngressEntry {
    fn from(rule: &IngressRule) -> Self {
        Self {
            hostname: Some(rule.hostname.clone()),
            path: Some(rule.path_pattern.clone()),
            service: rule.target.clone(),
        }
    }
}

/// Ordered ingress rules plus exactly one trailing catch-all.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelDocument {
    ingress: Vec<IngressEntry>,
}

impl TunnelDocument {
    /// Serialize already-sorted rules and append the catch-all.
    #[must_use]
    pub fn from_rules(rules: &[IngressRule]) -> Self {
        let mut ingress: Vec<IngressEntry> = rules.iter().map(IngressEntry::from).collect();
        ingress.push(IngressEntry::catch_all());
        Self { ingress }
    }

    #[must_use]
    pub fn ingress(&self) -> &[IngressEntry] {
        &self.ingress
    }

    /// Number of rules excluding the catch-all.
    #[must_use]
    pub fn rule_count(&self) -> usize {
        self.ingress.len().saturating_sub(1)
    }

    /// Whether `remote` routes traffic exactly like this document.
    ///
    /// Fields the edge adds on its side and cosmetic differences (hostname case,
    /// surrounding whitespace, empty strings versus absent fields) are ignored.
    /// Rule order is significant.
    #[must_use]
    pub fn matches_remote(&self, remote: &[IngressEntry]) -> bool {
        self.ingress.len() == remote.len()
            && self
                .ingress
                .iter()
                .zip(remote)
                .all(|(ours, theirs)| ours.normalized() == theirs.normalized())
    }
}

/// Expand contributions into candidate rules, sorted by the document order.
#[must_use]
pub fn build_rules(routes: &[RouteContribution]) -> Vec<IngressRule> {
    let mut rules = Vec::new();
    for route in routes {
        let source = route.qualified_name();
        for hostname in &route.hostnames {
            let hostname = hostname.trim().to_ascii_lowercase();
            if hostname.is_empty() {
                continue;
            }
            for rule in &route.rules {
                for (match_index, path) in rule.matches.iter().enumerate() {
                    for target in &rule.targets {
                        rules.push(IngressRule {
                            hostname: hostname.clone(),
                            path_pattern: path.pattern(),
                            is_exact: path.is_exact(),
                            path_length: path.literal().chars().count(),
                            target: target.url(route.kind),
                            source_route_name: source.clone(),
                            source_rule_index: rule.index,
                            source_match_index: match_index,
                        });
                    }
                }
            }
        }
    }
    rules.sort();
    rules.dedup();
    rules
}

/// Build the tunnel document for a set of route contributions.
#[must_use]
pub fn build_document(routes: &[RouteContribution]) -> TunnelDocument {
    TunnelDocument::from_rules(&build_rules(routes))
}

#[cfg(test)]
#[path = "ingress_tests.rs"]
mod ingress_tests;
