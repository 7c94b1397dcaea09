/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/controllers/fanout.rs
*
* Replicates a per-instance resource factory across the instances of an
* indexed request.
*
* An indexed request with count N becomes N bundles named `<appId>-<i>`, each
* with one replica and `INSTANCE_INDEX=<i>` in its environment. A request that
* is not indexed becomes a single bundle named `<appId>` scaled to N. The total
* number of replicas is N either way.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::controllers::utils::{BaseLabels, INSTANCE_INDEX_ENV};
use crate::error::{Error, Result};
use crate::request::AppId;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Everything a factory needs to know about the bundle it builds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub app_id: AppId,
    /// `Some` for the bundles of an indexed request.
    pub index: Option<u32>,
    pub labels: BTreeMap<String, String>,
    pub replicas: i32,
    pub environment: BTreeMap<String, String>,
}

/// Builds and applies the object of one bundle.
#[async_trait]
pub trait ObjectFactory: Send + Sync {
    type Object: Send + Sync;

    /// Creates (or reconciles) the object for `instance`.
    async fn add_object(&self, instance: &Instance) -> Result<Self::Object>;

    /// Follow-up action once every object has been added.
    async fn apply_object(&self, instance: &Instance, object: &Self::Object) -> Result<()>;
}

/// Shape of a request: which bundles to build.
#[derive(Debug, Clone)]
pub struct FanOut {
    pub app_id: AppId,
    pub labels: BaseLabels,
    pub environment: BTreeMap<String, String>,
    pub indexed: bool,
    pub count: u32,
}

impl FanOut {
    /// Fails when `count` does not fit a replica count.
    pub fn instances(&self) -> Result<Vec<Instance>> {
        let replicas = i32::try_from(self.count).map_err(|_| {
            Error::Config(format!(
                "Instance count {} of '{}' exceeds {}",
                self.count,
                self.app_id,
                i32::MAX
            ))
        })?;
        if !self.indexed {
            return Ok(vec![Instance {
                app_id: self.app_id.clone(),
                index: None,
                labels: self.labels.to_map(),
                replicas,
                environment: self.environment.clone(),
            }]);
        }
        Ok((0..self.count)
            .map(|i| {
                let app_id = self.app_id.instance(i);
                let index = instance_index(&app_id);
                let mut environment = self.environment.clone();
                environment.insert(INSTANCE_INDEX_ENV.to_string(), index.to_string());
                Instance {
                    labels: self.labels.for_instance(&app_id),
                    app_id,
                    index: Some(index),
                    replicas: 1,
                    environment,
                }
            })
            .collect())
    }
}

/// Index parsed from the `-<i>` suffix of an instance id; 0 when absent.
pub fn instance_index(app_id: &AppId) -> u32 {
    app_id
        .as_str()
        .rsplit_once('-')
        .and_then(|(_, suffix)| suffix.parse().ok())
        .unwrap_or(0)
}

/// Wraps a factory so that it is applied to every instance of a `FanOut`.
pub struct IndexedFactory<F> {
    inner: F,
}

impl<F: ObjectFactory> IndexedFactory<F> {
    pub fn new(inner: F) -> Self {
        Self { inner }
    }

    pub async fn add_objects(&self, fan_out: &FanOut) -> Result<Vec<(Instance, F::Object)>> {
        let mut objects = Vec::new();
        for instance in fan_out.instances()? {
            let object = self.inner.add_object(&instance).await?;
            objects.push((instance, object));
        }
        Ok(objects)
    }

    pub async fn apply_objects(&self, objects: &[(Instance, F::Object)]) -> Result<()> {
        for (instance, object) in objects {
            self.inner.apply_object(instance, object).await?;
        }
        Ok(())
    }
}
