/* Copyright (C) 2025 Pedro Henrique / phkaiser13
* File: src/kube_client.rs
*
* The seam between the deployer and the cluster. Everything above this module
* talks to a `PlatformClient`; `KubePlatform` is the implementation backed by a
* `kube::Client` scoped to one namespace.
*
* Architecture:
* - Operations are generic over any namespaced, typed resource, so the same
*   calls serve core kinds (Service, Pod) and the OpenShift kinds in `crds.rs`.
* - HTTP 404 and 409 are mapped to `Error::NotFound` and `Error::AlreadyExists`
*   so callers can branch on them; every other API failure is passed through
*   unchanged as `Error::KubeError`.
* - `delete` returns once deletion has started; `await_deleted` waits on the
*   object's uid with `kube::runtime::wait` for graceful deletions to finish.
* - `watch_by_label` is a label-scoped `kube::runtime::watcher` stream. Dropping
*   the stream closes the underlying connection.
* - Build submission goes through the BuildConfig `instantiate` and
*   `instantiatebinary` subresources; rollouts through the DeploymentConfig
*   `instantiate` subresource.
*
* SPDX-License-Identifier: Apache-2.0 */

use crate::crds::{Build, BuildConfig, DeploymentConfig};
use crate::error::{Error, Result};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use kube::{
    api::{Api, DeleteParams, ListParams, PostParams},
    runtime::{
        wait::{await_condition, conditions},
        watcher, WatchStreamExt,
    },
    Client, Resource,
};
use k8s_openapi::NamespaceResourceScope;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;
use std::fmt::Debug;
use tracing::debug;

/// Any namespaced, typed resource the deployer can manage.
pub trait PlatformResource:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> PlatformResource for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

pub fn kind_of<K: PlatformResource>() -> String {
    K::kind(&()).to_string()
}

#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// `Ok(None)` when no object with that name exists.
    async fn get<K: PlatformResource>(&self, name: &str) -> Result<Option<K>>;

    async fn create<K: PlatformResource>(&self, object: &K) -> Result<K>;

    /// In-place update; `object` must carry the current resourceVersion.
    async fn replace<K: PlatformResource>(&self, name: &str, object: &K) -> Result<K>;

    /// Starts deletion; the object may linger while it terminates.
    async fn delete<K: PlatformResource>(&self, name: &str) -> Result<()>;

    /// Resolves once the object with this name and `uid` is gone.
    async fn await_deleted<K: PlatformResource>(&self, name: &str, uid: &str) -> Result<()>;

    async fn list_by_label<K: PlatformResource>(&self, selector: &str) -> Result<Vec<K>>;

    /// Every object matching `selector` as it is added or modified, starting
    /// with the objects that already exist.
    async fn watch_by_label<K: PlatformResource>(
        &self,
        selector: &str,
    ) -> Result<BoxStream<'static, Result<K>>>;

    /// Starts a new Build from the named BuildConfig.
    async fn instantiate_build(&self, build_config: &str) -> Result<Build>;

    /// Starts a binary Build from the named BuildConfig, uploading `bytes` as
    /// the file `file_name`.
    async fn submit_binary_build(
        &self,
        build_config: &str,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<Build>;

    /// Rolls out the latest version of a DeploymentConfig.
    async fn rollout_latest(&self, deployment_config: &str) -> Result<DeploymentConfig>;
}

/// `PlatformClient` backed by the cluster API.
#[derive(Clone)]
pub struct KubePlatform {
    client: Client,
    namespace: String,
}

impl KubePlatform {
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn api<K: PlatformResource>(&self) -> Api<K> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

/// Maps 404/409 responses onto the error variants callers branch on.
fn map_api_error<K: PlatformResource>(name: &str, err: kube::Error) -> Error {
    match err {
        kube::Error::Api(ae) if ae.code == 404 => Error::NotFound {
            kind: kind_of::<K>(),
            name: name.to_string(),
        },
        kube::Error::Api(ae) if ae.code == 409 => Error::AlreadyExists {
            kind: kind_of::<K>(),
            name: name.to_string(),
        },
        other => Error::KubeError(other),
    }
}

#[async_trait]
impl PlatformClient for KubePlatform {
    async fn get<K: PlatformResource>(&self, name: &str) -> Result<Option<K>> {
        self.api::<K>()
            .get_opt(name)
            .await
            .map_err(|e| map_api_error::<K>(name, e))
    }

    async fn create<K: PlatformResource>(&self, object: &K) -> Result<K> {
        let name = object.meta().name.clone().unwrap_or_default();
        debug!("Creating {} '{}'", kind_of::<K>(), name);
        self.api::<K>()
            .create(&PostParams::default(), object)
            .await
            .map_err(|e| map_api_error::<K>(&name, e))
    }

    async fn replace<K: PlatformResource>(&self, name: &str, object: &K) -> Result<K> {
        debug!("Replacing {} '{}'", kind_of::<K>(), name);
        self.api::<K>()
            .replace(name, &PostParams::default(), object)
            .await
            .map_err(|e| map_api_error::<K>(name, e))
    }

    async fn delete<K: PlatformResource>(&self, name: &str) -> Result<()> {
        debug!("Deleting {} '{}'", kind_of::<K>(), name);
        self.api::<K>()
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| map_api_error::<K>(name, e))
    }

    async fn await_deleted<K: PlatformResource>(&self, name: &str, uid: &str) -> Result<()> {
        debug!("Waiting for {} '{}' to be deleted", kind_of::<K>(), name);
        await_condition(self.api::<K>(), name, conditions::is_deleted(uid)).await?;
        Ok(())
    }

    async fn list_by_label<K: PlatformResource>(&self, selector: &str) -> Result<Vec<K>> {
        let lp = ListParams::default().labels(selector);
        let list = self.api::<K>().list(&lp).await?;
        Ok(list.items)
    }

    async fn watch_by_label<K: PlatformResource>(
        &self,
        selector: &str,
    ) -> Result<BoxStream<'static, Result<K>>> {
        let config = watcher::Config::default().labels(selector);
        let stream = watcher(self.api::<K>(), config)
            .default_backoff()
            .applied_objects()
            .map(|event| event.map_err(Error::from))
            .boxed();
        Ok(stream)
    }

    async fn instantiate_build(&self, build_config: &str) -> Result<Build> {
        let request = json!({
            "kind": "BuildRequest",
            "apiVersion": "build.openshift.io/v1",
            "metadata": { "name": build_config },
        });
        self.api::<BuildConfig>()
            .create_subresource::<Build>(
                "instantiate",
                build_config,
                &PostParams::default(),
                serde_json::to_vec(&request)?,
            )
            .await
            .map_err(|e| map_api_error::<BuildConfig>(build_config, e))
    }

    async fn submit_binary_build(
        &self,
        build_config: &str,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<Build> {
        let url = instantiate_binary_path(&self.namespace, build_config, file_name);
        debug!(
            "Uploading {} bytes as '{}' to BuildConfig '{}'",
            bytes.len(),
            file_name,
            build_config
        );
        let request = http::Request::post(url)
            .header(http::header::CONTENT_TYPE, "application/octet-stream")
            .body(bytes)
            .map_err(kube::Error::HttpError)?;
        self.client
            .request::<Build>(request)
            .await
            .map_err(|e| map_api_error::<BuildConfig>(build_config, e))
    }

    async fn rollout_latest(&self, deployment_config: &str) -> Result<DeploymentConfig> {
        let request = json!({
            "kind": "DeploymentRequest",
            "apiVersion": "apps.openshift.io/v1",
            "name": deployment_config,
            "latest": true,
            "force": true,
        });
        self.api::<DeploymentConfig>()
            .create_subresource::<DeploymentConfig>(
                "instantiate",
                deployment_config,
                &PostParams::default(),
                serde_json::to_vec(&request)?,
            )
            .await
            .map_err(|e| map_api_error::<DeploymentConfig>(deployment_config, e))
    }
}

/// Path of the `instantiatebinary` subresource, with the uploaded file name as
/// the `asFile` query parameter.
fn instantiate_binary_path(namespace: &str, build_config: &str, file_name: &str) -> String {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("asFile", file_name)
        .finish();
    format!(
        "/apis/build.openshift.io/v1/namespaces/{}/buildconfigs/{}/instantiatebinary?{}",
        namespace, build_config, query
    )
}
