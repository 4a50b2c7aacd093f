// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Generic finalizer management for namespaced resources.
//!
//! A finalizer is the deletion guard the controller places on an object while it
//! owns external state for it. The object cannot be removed until the controller
//! has cleaned up and dropped the finalizer.
//!
//! Both helpers are idempotent and write the whole `metadata.finalizers` list with
//! a merge patch pinned to the observed `resourceVersion`, so a concurrent edit of
//! the list surfaces as a conflict instead of being overwritten.
//!
//! # Example
//!
//! ```rust,no_run
//! use tunnelgate::gateway_api::Gateway;
//! use tunnelgate::reconcilers::finalizers::{ensure_finalizer, has_finalizer};
//! use kube::Client;
//!
//! const FINALIZER: &str = "tunnel.firestoned.io/cloudflared";
//!
//! async fn example(client: Client, gateway: Gateway) -> Result<(), tunnelgate::errors::ControllerError> {
//!     if !has_finalizer(&gateway, FINALIZER) {
//!         ensure_finalizer(&client, &gateway, FINALIZER).await?;
//!     }
//!     Ok(())
//! }
//! ```

use crate::errors::ControllerError;
use kube::api::{Patch, PatchParams};
use kube::core::NamespaceResourceScope;
use kube::{Api, Client, Resource, ResourceExt};
use serde_json::json;
use tracing::info;

/// Whether `resource` carries `finalizer`.
#[must_use]
pub fn has_finalizer<T: Resource>(resource: &T, finalizer: &str) -> bool {
    resource
        .meta()
        .finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|x| x == finalizer))
}

async fn patch_finalizers<T>(
    client: &Client,
    resource: &T,
    finalizers: Vec<String>,
) -> Result<(), ControllerError>
where
    T: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + std::fmt::Debug
        + serde::de::DeserializeOwned,
{
    let namespace = resource.namespace().unwrap_or_default();
    let name = resource.name_any();
    let api: Api<T> = Api::namespaced(client.clone(), &namespace);
    let patch = json!({
        "metadata": {
            "resourceVersion": resource.resource_version(),
            "finalizers": finalizers,
        }
    });
    api.patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

/// Add a finalizer to a resource if not already present.
///
/// # Errors
///
/// Returns a classified error if the patch fails; a concurrent modification is
/// [`ControllerError::Transient`].
pub async fn ensure_finalizer<T>(
    client: &Client,
    resource: &T,
    finalizer: &str,
) -> Result<(), ControllerError>
where
    T: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + std::fmt::Debug
        + serde::de::DeserializeOwned,
{
    if has_finalizer(resource, finalizer) {
        return Ok(());
    }

    let mut finalizers = resource.meta().finalizers.clone().unwrap_or_default();
    finalizers.push(finalizer.to_string());
    patch_finalizers(client, resource, finalizers).await?;

    info!(
        "Added finalizer {} to {}/{} {}",
        finalizer,
        resource.namespace().unwrap_or_default(),
        resource.name_any(),
        T::kind(&())
    );
    Ok(())
}

/// Remove a finalizer from a resource if present.
///
/// # Errors
///
/// Returns a classified error if the patch fails. A resource that is already
/// gone counts as success.
pub async fn remove_finalizer<T>(
    client: &Client,
    resource: &T,
    finalizer: &str,
) -> Result<(), ControllerError>
where
    T: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + std::fmt::Debug
        + serde::de::DeserializeOwned,
{
    if !has_finalizer(resource, finalizer) {
        return Ok(());
    }

    let mut finalizers = resource.meta().finalizers.clone().unwrap_or_default();
    finalizers.retain(|f| f != finalizer);
    match patch_finalizers(client, resource, finalizers).await {
        Ok(()) | Err(ControllerError::NotFound(_)) => {}
        Err(e) => return Err(e),
    }

    info!(
        "Removed finalizer {} from {}/{} {}",
        finalizer,
        resource.namespace().unwrap_or_default(),
        resource.name_any(),
        T::kind(&())
    );
    Ok(())
}

#[cfg(test)]
#[path = "finalizers_tests.rs"]
mod finalizers_tests;
