/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/controllers/reconciler.rs
*
* Create-or-replace for a named platform resource.
*
* Core Logic:
* - Absent: the desired object is created.
* - Present, `ReplaceStrategy::Update`: the desired object is written over the
*   live one, carrying the live resourceVersion.
* - Present, `ReplaceStrategy::Recreate`: the live object is deleted, its
*   deletion awaited, and the desired one created. Used for kinds whose update
*   is unreliable or forbidden (Service, Route, Pod).
* - A create that hits a name conflict on a `Recreate` kind is retried exactly
*   once as delete + wait + create. Any other platform error propagates
*   unchanged.
*
* At most one reconcile per name is expected at a time; callers own that
* guarantee.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::crds::{BuildConfig, DeploymentConfig, ImageStream, Route};
use crate::error::{Error, Result};
use crate::kube_client::{kind_of, PlatformClient, PlatformResource};
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::{Resource, ResourceExt};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceStrategy {
    Update,
    Recreate,
}

/// A kind the reconciler knows how to replace.
pub trait Reconciled: PlatformResource {
    const STRATEGY: ReplaceStrategy;
}

impl Reconciled for BuildConfig {
    const STRATEGY: ReplaceStrategy = ReplaceStrategy::Update;
}

impl Reconciled for ImageStream {
    const STRATEGY: ReplaceStrategy = ReplaceStrategy::Update;
}

impl Reconciled for DeploymentConfig {
    const STRATEGY: ReplaceStrategy = ReplaceStrategy::Update;
}

impl Reconciled for Service {
    const STRATEGY: ReplaceStrategy = ReplaceStrategy::Recreate;
}

impl Reconciled for Route {
    const STRATEGY: ReplaceStrategy = ReplaceStrategy::Recreate;
}

impl Reconciled for Pod {
    const STRATEGY: ReplaceStrategy = ReplaceStrategy::Recreate;
}

/// Brings the object named by `desired` to the desired state and returns the
/// object as applied by the platform.
pub async fn reconcile<P, K>(platform: &P, mut desired: K) -> Result<K>
where
    P: PlatformClient,
    K: Reconciled,
{
    let name = desired.name_any();
    let kind = kind_of::<K>();

    let Some(existing) = platform.get::<K>(&name).await? else {
        info!("Creating {} '{}'", kind, name);
        return create(platform, &name, &desired).await;
    };

    match K::STRATEGY {
        ReplaceStrategy::Update => {
            info!("Updating {} '{}' in place", kind, name);
            desired.meta_mut().resource_version = existing.resource_version();
            platform.replace(&name, &desired).await
        }
        ReplaceStrategy::Recreate => {
            info!("Recreating {} '{}'", kind, name);
            delete_and_wait(platform, &existing).await?;
            create(platform, &name, &desired).await
        }
    }
}

async fn create<P, K>(platform: &P, name: &str, desired: &K) -> Result<K>
where
    P: PlatformClient,
    K: Reconciled,
{
    match platform.create(desired).await {
        Err(e) if e.is_conflict() && K::STRATEGY == ReplaceStrategy::Recreate => {
            warn!(
                "{} '{}' appeared concurrently; deleting and creating it once more",
                kind_of::<K>(),
                name
            );
            if let Some(existing) = platform.get::<K>(name).await? {
                delete_and_wait(platform, &existing).await?;
            }
            platform.create(desired).await
        }
        other => other,
    }
}

/// Deletes `existing` and waits until the platform has removed it, so the
/// name is free again.
async fn delete_and_wait<P, K>(platform: &P, existing: &K) -> Result<()>
where
    P: PlatformClient,
    K: Reconciled,
{
    let name = existing.name_any();
    match platform.delete::<K>(&name).await {
        Err(Error::NotFound { .. }) => return Ok(()),
        other => other?,
    }
    match existing.uid() {
        Some(uid) => platform.await_deleted::<K>(&name, &uid).await,
        None => Ok(()),
    }
}
