// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Route reconciliation.
//!
//! Routes are never synced one by one. Every reconcile of a `TunnelConfig`
//! recomputes the whole document of its tunnel from the reflector stores:
//!
//! 1. [`plan_tunnel`] keeps the HTTPRoutes and GRPCRoutes attached to owned
//!    Gateways of the tunnel, resolves their backends and builds the document
//! 2. [`resync_tunnel`] applies the document through the [`SyncEngine`] and
//!    writes `Accepted` and `ResolvedRefs` on every route of the plan
//!
//! Several `TunnelConfig`s may point at the same tunnel; they all plan the
//! same document, and the sync engine turns the duplicates into no-ops.

pub mod backends;

use crate::cloudflare::TunnelConfigApi;
use crate::constants::{MISSING_CREDENTIALS_RECHECK_SECS, RESYNC_REQUEUE_DURATION_SECS};
use crate::context::{ClusterSnapshot, Context};
use crate::crd::{is_tunnel_id, ResolvedSecretRef, TunnelConfig};
use crate::errors::ControllerError;
use crate::gateway_api::{
    BackendRef, GRPCRoute, Gateway, HTTPRoute, ParentReference, RouteParentStatus, RouteStatus,
};
use crate::ingress::{
    build_document, grpc_rule_matches, http_rule_matches, PathMatch, RouteContribution,
    RouteKind, RuleContribution, TunnelDocument,
};
use crate::metrics;
use crate::reconcilers::retry::{with_deadline, RequeueBackoff};
use crate::reconcilers::status::{
    create_condition, merge_route_parents, patch_status_with_retry, route_parents_equal,
};
use crate::status_reasons::{
    CONDITION_STATUS_FALSE, CONDITION_STATUS_TRUE, CONDITION_TYPE_ACCEPTED,
    CONDITION_TYPE_RESOLVED_REFS, REASON_ACCEPTED, REASON_NO_MATCHING_PARENT,
    REASON_RESOLVED_REFS,
};
use crate::sync::{ApplyOutcome, SyncEngine};
use async_trait::async_trait;
use backends::{resolve_backend, BackendFailure, Resolution};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::runtime::controller::Action;
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const RESOURCE_TYPE: &str = "TunnelConfig";

/// Identity of one route object.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteRef {
    pub kind: RouteKind,
    pub namespace: String,
    pub name: String,
}

impl fmt::Display for RouteRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// What one route contributed to a tunnel plan.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoutePlan {
    pub route: RouteRef,
    pub generation: Option<i64>,
    /// Parent references that resolved to owned Gateways of the tunnel.
    pub parents: Vec<ParentReference>,
    /// Every parent reference listed in the route spec.
    pub spec_parents: Vec<ParentReference>,
    /// Backend references dropped during resolution.
    pub failures: Vec<BackendFailure>,
    /// Matches the edge cannot express (regular expressions, method-only gRPC).
    pub unsupported_matches: usize,
    /// Number of ingress rules this route produced before deduplication.
    pub rules: usize,
}

/// Desired state of one tunnel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TunnelPlan {
    pub tunnel_id: String,
    pub document: TunnelDocument,
    /// Routes of the plan, sorted by kind, namespace and name.
    pub routes: Vec<RoutePlan>,
}

struct RuleView<'a> {
    matches: Vec<PathMatch>,
    unsupported: usize,
    backends: &'a [BackendRef],
}

/// Kind-independent view of an HTTPRoute or GRPCRoute.
struct RouteView<'a> {
    kind: RouteKind,
    meta: &'a ObjectMeta,
    parent_refs: &'a [ParentReference],
    hostnames: &'a [String],
    rules: Vec<RuleView<'a>>,
}

impl<'a> RouteView<'a> {
    fn http(route: &'a HTTPRoute) -> Self {
        Self {
            kind: RouteKind::Http,
            meta: &route.metadata,
            parent_refs: &route.spec.parent_refs,
            hostnames: &route.spec.hostnames,
            rules: route
                .spec
                .rules
                .iter()
                .map(|rule| {
                    let matches = http_rule_matches(&rule.matches);
                    RuleView {
                        unsupported: rule.matches.len().saturating_sub(matches.len()),
                        matches,
                        backends: &rule.backend_refs,
                    }
                })
                .collect(),
        }
    }

    fn grpc(route: &'a GRPCRoute) -> Self {
        Self {
            kind: RouteKind::Grpc,
            meta: &route.metadata,
            parent_refs: &route.spec.parent_refs,
            hostnames: &route.spec.hostnames,
            rules: route
                .spec
                .rules
                .iter()
                .map(|rule| {
                    let matches = grpc_rule_matches(&rule.matches);
                    RuleView {
                        unsupported: rule.matches.len().saturating_sub(matches.len()),
                        matches,
                        backends: &rule.backend_refs,
                    }
                })
                .collect(),
        }
    }
}

/// The Gateway behind `parent` when it is owned by this controller and served
/// by `tunnel_id`. A `sectionName` must name an existing listener.
fn owned_parent<'a>(
    snapshot: &'a ClusterSnapshot,
    controller_name: &str,
    tunnel_id: &str,
    route_namespace: &str,
    parent: &ParentReference,
) -> Option<&'a Gateway> {
    if !parent.is_gateway() {
        return None;
    }
    let gateway = snapshot.gateway(parent.namespace_or(route_namespace), &parent.name)?;
    if gateway.metadata.deletion_timestamp.is_some() {
        return None;
    }
    if let Some(section) = &parent.section_name {
        if !gateway.spec.listeners.iter().any(|l| &l.name == section) {
            return None;
        }
    }
    let tunnel = snapshot.owning_tunnel_config(gateway, controller_name)?;
    tunnel
        .spec
        .tunnel_id
        .eq_ignore_ascii_case(tunnel_id)
        .then_some(gateway.as_ref())
}

/// Hostnames a route is served on: its own, or else the hostnames of the
/// listeners it attaches to.
fn effective_hostnames(own: &[String], parents: &[(&ParentReference, &Gateway)]) -> Vec<String> {
    if !own.is_empty() {
        return own.to_vec();
    }
    let mut hostnames: Vec<String> = parents
        .iter()
        .flat_map(|(parent, gateway)| {
            gateway.spec.listeners.iter().filter(move |listener| {
                parent
                    .section_name
                    .as_ref()
                    .is_none_or(|section| &listener.name == section)
            })
        })
        .filter_map(|listener| listener.hostname.clone())
        .collect();
    hostnames.sort();
    hostnames.dedup();
    hostnames
}

/// Compute the desired document of `tunnel_id` from a cluster snapshot.
///
/// Pure: the same snapshot always yields the same plan, whatever the order of
/// objects in the stores.
#[must_use]
pub fn plan_tunnel(snapshot: &ClusterSnapshot, controller_name: &str, tunnel_id: &str) -> TunnelPlan {
    let views = snapshot
        .http_routes
        .iter()
        .map(|route| RouteView::http(route))
        .chain(snapshot.grpc_routes.iter().map(|route| RouteView::grpc(route)));

    let mut contributions = Vec::new();
    let mut routes = Vec::new();

    for view in views {
        if view.meta.deletion_timestamp.is_some() {
            continue;
        }
        let namespace = view.meta.namespace.clone().unwrap_or_default();
        let name = view.meta.name.clone().unwrap_or_default();

        let parents: Vec<(&ParentReference, &Gateway)> = view
            .parent_refs
            .iter()
            .filter_map(|parent| {
                owned_parent(snapshot, controller_name, tunnel_id, &namespace, parent)
                    .map(|gateway| (parent, gateway))
            })
            .collect();
        if parents.is_empty() {
            continue;
        }

        let hostnames = effective_hostnames(view.hostnames, &parents);
        let mut failures = Vec::new();
        let mut unsupported_matches = 0;
        let mut rules = Vec::new();

        for (index, rule) in view.rules.iter().enumerate() {
            unsupported_matches += rule.unsupported;
            let mut targets = Vec::new();
            for backend in rule.backends {
                match resolve_backend(snapshot, view.kind, &namespace, backend) {
                    Resolution::Target(target) => targets.push(target),
                    Resolution::Disabled => {}
                    Resolution::Failed(failure) => failures.push(failure),
                }
            }
            if !rule.matches.is_empty() && !targets.is_empty() {
                rules.push(RuleContribution {
                    index,
                    matches: rule.matches.clone(),
                    targets,
                });
            }
        }

        let rule_count = hostnames.len()
            * rules
                .iter()
                .map(|r| r.matches.len() * r.targets.len())
                .sum::<usize>();

        routes.push(RoutePlan {
            route: RouteRef {
                kind: view.kind,
                namespace: namespace.clone(),
                name: name.clone(),
            },
            generation: view.meta.generation,
            parents: parents.iter().map(|(parent, _)| (*parent).clone()).collect(),
            spec_parents: view.parent_refs.to_vec(),
            failures,
            unsupported_matches,
            rules: rule_count,
        });
        contributions.push(RouteContribution {
            kind: view.kind,
            namespace,
            name,
            hostnames,
            rules,
        });
    }

    routes.sort_by(|a, b| a.route.cmp(&b.route));

    TunnelPlan {
        tunnel_id: tunnel_id.to_ascii_lowercase(),
        document: build_document(&contributions),
        routes,
    }
}

/// Per-parent status entries for one planned route.
///
/// `sync_error` is the failure of the apply that carried the route, if any.
#[must_use]
pub fn route_parent_statuses(
    plan: &RoutePlan,
    tunnel_id: &str,
    controller_name: &str,
    sync_error: Option<&ControllerError>,
) -> Vec<RouteParentStatus> {
    let generation = plan.generation;

    let mut accepted_message = match sync_error {
        None => format!("Route is served by tunnel {tunnel_id}"),
        Some(e) => format!("Sync of tunnel {tunnel_id} failed: {e}"),
    };
    if plan.unsupported_matches > 0 {
        accepted_message.push_str(&format!(
            "; {} unsupported matches ignored",
            plan.unsupported_matches
        ));
    }
    let accepted = match sync_error {
        None => create_condition(
            CONDITION_TYPE_ACCEPTED,
            CONDITION_STATUS_TRUE,
            REASON_ACCEPTED,
            &accepted_message,
            generation,
        ),
        Some(_) => create_condition(
            CONDITION_TYPE_ACCEPTED,
            CONDITION_STATUS_FALSE,
            REASON_NO_MATCHING_PARENT,
            &accepted_message,
            generation,
        ),
    };

    let resolved_refs = match plan.failures.first() {
        None => create_condition(
            CONDITION_TYPE_RESOLVED_REFS,
            CONDITION_STATUS_TRUE,
            REASON_RESOLVED_REFS,
            "All backend references resolved",
            generation,
        ),
        Some(first) => create_condition(
            CONDITION_TYPE_RESOLVED_REFS,
            CONDITION_STATUS_FALSE,
            first.reason,
            &plan
                .failures
                .iter()
                .map(BackendFailure::message)
                .collect::<Vec<_>>()
                .join("; "),
            generation,
        ),
    };

    plan.parents
        .iter()
        .map(|parent| RouteParentStatus {
            parent_ref: parent.clone(),
            controller_name: controller_name.to_string(),
            conditions: vec![accepted.clone(), resolved_refs.clone()],
        })
        .collect()
}

/// Writes route status entries of this controller.
#[async_trait]
pub trait RouteStatusWriter: Send + Sync {
    /// Replace this controller's entries for `parents` in the route's
    /// `status.parents`, dropping entries for parents no longer in `spec_parents`.
    async fn write_route_status(
        &self,
        route: &RouteRef,
        parents: Vec<RouteParentStatus>,
        spec_parents: &[ParentReference],
    ) -> Result<(), ControllerError>;
}

/// Access to the status shared by both route kinds.
trait HasRouteStatus {
    fn route_status(&self) -> Option<&RouteStatus>;
}

impl HasRouteStatus for HTTPRoute {
    fn route_status(&self) -> Option<&RouteStatus> {
        self.status.as_ref()
    }
}

impl HasRouteStatus for GRPCRoute {
    fn route_status(&self) -> Option<&RouteStatus> {
        self.status.as_ref()
    }
}

/// [`RouteStatusWriter`] backed by the Kubernetes API.
pub struct KubeRouteStatusWriter {
    client: Client,
    controller_name: String,
    call_timeout: Duration,
}

impl KubeRouteStatusWriter {
    #[must_use]
    pub fn new(client: Client, controller_name: &str, call_timeout: Duration) -> Self {
        Self {
            client,
            controller_name: controller_name.to_string(),
            call_timeout,
        }
    }

    async fn write<K>(
        &self,
        api: Api<K>,
        name: &str,
        parents: Vec<RouteParentStatus>,
        spec_parents: &[ParentReference],
    ) -> Result<bool, ControllerError>
    where
        K: Resource + HasRouteStatus + Clone + fmt::Debug + DeserializeOwned,
    {
        with_deadline(
            self.call_timeout,
            patch_status_with_retry(&api, name, |current: &K| {
                let existing = current
                    .route_status()
                    .map(|s| s.parents.as_slice())
                    .unwrap_or_default();
                let merged = merge_route_parents(
                    existing,
                    &self.controller_name,
                    parents.clone(),
                    spec_parents,
                );
                if route_parents_equal(existing, &merged) {
                    return None;
                }
                Some(json!({ "parents": merged }))
            }),
        )
        .await
    }
}

#[async_trait]
impl RouteStatusWriter for KubeRouteStatusWriter {
    async fn write_route_status(
        &self,
        route: &RouteRef,
        parents: Vec<RouteParentStatus>,
        spec_parents: &[ParentReference],
    ) -> Result<(), ControllerError> {
        let written = match route.kind {
            RouteKind::Http => {
                let api: Api<HTTPRoute> = Api::namespaced(self.client.clone(), &route.namespace);
                self.write(api, &route.name, parents, spec_parents).await?
            }
            RouteKind::Grpc => {
                let api: Api<GRPCRoute> = Api::namespaced(self.client.clone(), &route.namespace);
                self.write(api, &route.name, parents, spec_parents).await?
            }
        };
        if written {
            debug!("Updated status of {}", route);
        }
        Ok(())
    }
}

/// Apply a plan and publish route status.
///
/// `api` is the tunnel's edge client, or the error that prevented building it;
/// in that case every route is marked as not accepted. Status write failures
/// are logged and do not stop the remaining routes.
///
/// # Errors
///
/// Returns the classified error of the apply.
pub async fn resync_tunnel(
    plan: TunnelPlan,
    api: Result<Arc<dyn TunnelConfigApi>, ControllerError>,
    sync: &SyncEngine,
    controller_name: &str,
    writer: &dyn RouteStatusWriter,
) -> Result<ApplyOutcome, ControllerError> {
    let TunnelPlan {
        tunnel_id,
        document,
        routes,
    } = plan;

    for route in &routes {
        for failure in &route.failures {
            debug!(
                route = %route.route,
                category = failure.error.category(),
                "Dropped backend: {}",
                failure.error
            );
            metrics::record_backend_resolution_failure(route.route.kind.kind(), failure.reason);
        }
    }

    let result = match api {
        Ok(api) => sync.apply(&tunnel_id, document, api).await,
        Err(e) => {
            metrics::record_sync_error(e.category());
            Err(e)
        }
    };

    match &result {
        Ok(ApplyOutcome::Applied { rules }) => {
            info!(
                "Applied {} ingress rules from {} routes to tunnel {}",
                rules,
                routes.len(),
                tunnel_id
            );
        }
        Ok(ApplyOutcome::Unchanged) => debug!("Tunnel {} already up to date", tunnel_id),
        Err(e) => warn!("Sync of tunnel {} failed: {}", tunnel_id, e),
    }

    for route in &routes {
        let parents =
            route_parent_statuses(route, &tunnel_id, controller_name, result.as_ref().err());
        if let Err(e) = writer
            .write_route_status(&route.route, parents, &route.spec_parents)
            .await
        {
            warn!("Failed to update status of {}: {}", route.route, e);
        }
    }

    result
}

/// Read the API token out of the credentials Secret.
///
/// # Errors
///
/// `NotFound` when the Secret, the key or its value is missing.
pub fn api_token(
    secret: Option<&Secret>,
    secret_ref: &ResolvedSecretRef,
) -> Result<String, ControllerError> {
    let Some(secret) = secret else {
        return Err(ControllerError::NotFound(format!(
            "credentials Secret {}/{} not found",
            secret_ref.namespace, secret_ref.name
        )));
    };

    secret
        .data
        .as_ref()
        .and_then(|data| data.get(&secret_ref.key))
        .map(|bytes| String::from_utf8_lossy(&bytes.0).trim().to_string())
        .filter(|token| !token.is_empty())
        .ok_or_else(|| {
            ControllerError::NotFound(format!(
                "credentials Secret {}/{} has no key {}",
                secret_ref.namespace, secret_ref.name, secret_ref.key
            ))
        })
}

/// Build the edge client of a `TunnelConfig` from its credentials Secret.
async fn tunnel_api(
    ctx: &Context,
    tunnel: &TunnelConfig,
) -> Result<Arc<dyn TunnelConfigApi>, ControllerError> {
    let secret_ref = tunnel.spec.api_token_ref(&ctx.config.credentials_namespace);
    let secrets: Api<Secret> = Api::namespaced(ctx.client.clone(), &secret_ref.namespace);

    let secret = with_deadline(ctx.config.api_timeout(), async {
        secrets
            .get_opt(&secret_ref.name)
            .await
            .map_err(ControllerError::from)
    })
    .await?;
    let token = api_token(secret.as_ref(), &secret_ref)?;

    let client: Arc<dyn TunnelConfigApi> = ctx
        .tunnel_clients
        .get_or_connect(
            &tunnel.name_any(),
            &ctx.http,
            &ctx.config.cloudflare_api_base_url,
            token,
            tunnel.spec.account_id.clone(),
        )
        .await?;
    Ok(client)
}

/// kube-runtime entry point: full resync of the tunnel behind a `TunnelConfig`.
///
/// # Errors
///
/// Returns the classified error for the error policy.
pub async fn reconcile(tunnel: Arc<TunnelConfig>, ctx: Arc<Context>) -> Result<Action, ControllerError> {
    let start = Instant::now();
    let name = tunnel.name_any();

    if !is_tunnel_id(&tunnel.spec.tunnel_id) {
        return Err(ControllerError::Validation(format!(
            "TunnelConfig {} has malformed tunnelID '{}'",
            name, tunnel.spec.tunnel_id
        )));
    }

    ctx.stores.wait_until_ready().await?;
    let snapshot = ctx.stores.snapshot();
    let plan = plan_tunnel(&snapshot, &ctx.config.controller_name, &tunnel.spec.tunnel_id);
    debug!(
        tunnel_config = %name,
        tunnel_id = %plan.tunnel_id,
        routes = plan.routes.len(),
        rules = plan.document.rule_count(),
        "Planned tunnel document"
    );

    let api = tunnel_api(&ctx, &tunnel).await;
    let writer = KubeRouteStatusWriter::new(
        ctx.client.clone(),
        &ctx.config.controller_name,
        ctx.config.api_timeout(),
    );

    match resync_tunnel(plan, api, &ctx.sync, &ctx.config.controller_name, &writer).await {
        Ok(_) => {
            ctx.route_backoff.reset(&name);
            metrics::record_reconciliation_success(RESOURCE_TYPE, start.elapsed());
            Ok(Action::requeue(Duration::from_secs(RESYNC_REQUEUE_DURATION_SECS)))
        }
        Err(e) => {
            metrics::record_reconciliation_error(RESOURCE_TYPE, start.elapsed());
            metrics::record_error(RESOURCE_TYPE, e.category());
            if matches!(e, ControllerError::Auth(_)) {
                ctx.tunnel_clients.evict(&name);
            }
            Err(e)
        }
    }
}

/// Next action after a failed tunnel resync.
///
/// Missing credentials are rechecked on a fixed delay instead of waiting for
/// the `TunnelConfig` to change. Everything else follows the shared policy.
pub fn requeue_for_tunnel_error(name: &str, err: &ControllerError, backoff: &RequeueBackoff) -> Action {
    if let ControllerError::NotFound(_) = err {
        let delay = Duration::from_secs(MISSING_CREDENTIALS_RECHECK_SECS);
        warn!("TunnelConfig {} is missing credentials, rechecking in {:?}: {}", name, delay, err);
        metrics::record_reconciliation_requeue(RESOURCE_TYPE, err.category());
        return Action::requeue(delay);
    }
    super::requeue_for_error(RESOURCE_TYPE, name, err, backoff)
}

/// Error policy for the route controller.
#[allow(clippy::needless_pass_by_value)] // Signature required by kube::runtime::Controller
pub fn error_policy(tunnel: Arc<TunnelConfig>, err: &ControllerError, ctx: Arc<Context>) -> Action {
    requeue_for_tunnel_error(&tunnel.name_any(), err, &ctx.route_backoff)
}
