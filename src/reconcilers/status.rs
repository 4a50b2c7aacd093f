// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Status condition helpers for Gateway API resources.
//!
//! Conditions follow the `metav1.Condition` conventions:
//! - `type`: the aspect being reported (`Accepted`, `Programmed`, `ResolvedRefs`)
//! - `status`: "True", "False", or "Unknown"
//! - `reason`: a programmatic `CamelCase` identifier
//! - `message`: a human-readable explanation
//! - `lastTransitionTime`: RFC3339 timestamp of the last status flip
//!
//! Status writes go through [`patch_status_with_retry`], which pins the merge
//! patch to the observed `resourceVersion`, re-reads on conflict, and skips the
//! write entirely when nothing changed.
//!
//! # Example
//!
//! ```rust,no_run
//! use tunnelgate::reconcilers::status::{create_condition, set_condition};
//!
//! let mut conditions = Vec::new();
//! set_condition(
//!     &mut conditions,
//!     create_condition("Accepted", "True", "Accepted", "Route accepted", Some(1)),
//! );
//! assert_eq!(conditions.len(), 1);
//! ```

use crate::constants::STATUS_CONFLICT_RETRIES;
use crate::crd::Condition;
use crate::errors::ControllerError;
use crate::gateway_api::{ParentReference, RouteParentStatus};
use chrono::Utc;
use kube::api::{Patch, PatchParams};
use kube::{Api, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;

/// Create a new condition stamped with the current time.
#[must_use]
pub fn create_condition(
    condition_type: &str,
    status: &str,
    reason: &str,
    message: &str,
    observed_generation: Option<i64>,
) -> Condition {
    Condition {
        r#type: condition_type.to_string(),
        status: status.to_string(),
        reason: reason.to_string(),
        message: message.to_string(),
        last_transition_time: Utc::now().to_rfc3339(),
        observed_generation,
    }
}

/// Find a condition by type.
#[must_use]
pub fn find_condition<'a>(conditions: &'a [Condition], condition_type: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.r#type == condition_type)
}

/// Insert or replace the condition of the same type.
///
/// When the status did not flip, the existing `lastTransitionTime` is kept so
/// a reconcile that only refreshes the message does not look like a transition.
pub fn set_condition(conditions: &mut Vec<Condition>, mut condition: Condition) {
    preserve_transition_time(conditions, &mut condition);
    match conditions
        .iter_mut()
        .find(|c| c.r#type == condition.r#type)
    {
        Some(existing) => *existing = condition,
        None => conditions.push(condition),
    }
}

/// Copy `lastTransitionTime` from the previous condition of the same type when
/// its status is unchanged.
pub fn preserve_transition_time(previous: &[Condition], condition: &mut Condition) {
    if let Some(old) = find_condition(previous, &condition.r#type) {
        if old.status == condition.status && !old.last_transition_time.is_empty() {
            condition
                .last_transition_time
                .clone_from(&old.last_transition_time);
        }
    }
}

/// Compare two condition lists ignoring `lastTransitionTime`.
#[must_use]
pub fn conditions_equal(a: &[Condition], b: &[Condition]) -> bool {
    a.len() == b.len()
        && a.iter().zip(b).all(|(x, y)| {
            x.r#type == y.r#type
                && x.status == y.status
                && x.reason == y.reason
                && x.message == y.message
                && x.observed_generation == y.observed_generation
        })
}

/// Merge freshly computed parent entries for `controller_name` into an
/// existing `status.parents` list.
///
/// - entries of other controllers are kept untouched
/// - entries of this controller for a parent in `desired` are replaced in place,
///   keeping transition times of conditions whose status did not flip
/// - entries of this controller for parents no longer listed in `spec_parents`
///   are dropped
/// - remaining `desired` entries are appended
///
/// Entries of this controller for parents still in the spec but absent from
/// `desired` belong to another tunnel's resync and are kept.
#[must_use]
pub fn merge_route_parents(
    existing: &[RouteParentStatus],
    controller_name: &str,
    desired: Vec<RouteParentStatus>,
    spec_parents: &[ParentReference],
) -> Vec<RouteParentStatus> {
    let mut desired: Vec<Option<RouteParentStatus>> = desired.into_iter().map(Some).collect();
    let mut merged = Vec::with_capacity(existing.len() + desired.len());

    for entry in existing {
        if entry.controller_name != controller_name {
            merged.push(entry.clone());
            continue;
        }
        let replacement = desired
            .iter_mut()
            .find(|d| d.as_ref().is_some_and(|d| d.parent_ref == entry.parent_ref))
            .and_then(Option::take);
        match replacement {
            Some(mut fresh) => {
                for condition in &mut fresh.conditions {
                    preserve_transition_time(&entry.conditions, condition);
                }
                merged.push(fresh);
            }
            None if spec_parents.contains(&entry.parent_ref) => merged.push(entry.clone()),
            None => {}
        }
    }

    merged.extend(desired.into_iter().flatten());
    merged
}

/// Compare two parent lists ignoring `lastTransitionTime`.
#[must_use]
pub fn route_parents_equal(a: &[RouteParentStatus], b: &[RouteParentStatus]) -> bool {
    a.len() == b.len()
        && a.iter().zip(b).all(|(x, y)| {
            x.parent_ref == y.parent_ref
                && x.controller_name == y.controller_name
                && conditions_equal(&x.conditions, &y.conditions)
        })
}

/// Patch the status subresource of `name`, retrying on write conflicts.
///
/// `build` receives the freshly read object and returns the new `status`
/// value, or `None` when the current status is already correct. Returns
/// whether a write happened. An object that no longer exists is not an error.
///
/// # Errors
///
/// Returns a classified error when the read or the patch fails for a reason
/// other than a conflict, or [`ControllerError::Transient`] when conflicts
/// persist after [`STATUS_CONFLICT_RETRIES`] attempts.
pub async fn patch_status_with_retry<K, F>(
    api: &Api<K>,
    name: &str,
    mut build: F,
) -> Result<bool, ControllerError>
where
    K: Resource + Clone + std::fmt::Debug + DeserializeOwned,
    F: FnMut(&K) -> Option<Value>,
{
    for attempt in 1..=STATUS_CONFLICT_RETRIES {
        let Some(current) = api.get_opt(name).await? else {
            debug!("{} no longer exists, skipping status update", name);
            return Ok(false);
        };
        let Some(status) = build(&current) else {
            debug!("Status of {} unchanged, skipping update", name);
            return Ok(false);
        };

        let patch = json!({
            "metadata": { "resourceVersion": current.resource_version() },
            "status": status,
        });
        match api
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => return Ok(true),
            Err(kube::Error::Api(response)) if response.code == 409 => {
                debug!(
                    "Status conflict on {} (attempt {}/{}), re-reading",
                    name, attempt, STATUS_CONFLICT_RETRIES
                );
            }
            Err(e) => {
                return match ControllerError::from(e) {
                    ControllerError::NotFound(_) => Ok(false),
                    other => Err(other),
                }
            }
        }
    }

    Err(ControllerError::Transient(format!(
        "status of {name} kept conflicting after {STATUS_CONFLICT_RETRIES} attempts"
    )))
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod status_tests;
