/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/controllers/utils.rs
*
* Labels, selectors and metadata helpers shared by the controllers.
*
* Every object the deployer creates carries the logical app id, the
* per-instance deployment id and the managed-by marker. The base label set of
* a request is built once and never mutated; each resource bundle derives its
* own copy.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::request::{AppId, DeploymentRequest};
use kube::api::ObjectMeta;
use std::collections::BTreeMap;

pub const APP_ID_LABEL: &str = "ph.io/app-id";
pub const DEPLOYMENT_ID_LABEL: &str = "ph.io/deployment-id";
pub const GROUP_ID_LABEL: &str = "ph.io/group-id";
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY: &str = "ph-deployer";

/// Injected into every container of an indexed instance.
pub const INSTANCE_INDEX_ENV: &str = "INSTANCE_INDEX";
/// Build-strategy environment entry holding the artifact fingerprint.
pub const FINGERPRINT_ENV: &str = "PH_ARTIFACT_FINGERPRINT";

/// The immutable label record of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseLabels {
    labels: BTreeMap<String, String>,
}

impl BaseLabels {
    pub fn for_request(app_id: &AppId, request: &DeploymentRequest) -> Self {
        let mut labels = BTreeMap::new();
        labels.insert(APP_ID_LABEL.to_string(), app_id.to_string());
        labels.insert(DEPLOYMENT_ID_LABEL.to_string(), app_id.to_string());
        labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string());
        if let Some(group) = request.group() {
            labels.insert(GROUP_ID_LABEL.to_string(), sanitize_label_value(group));
        }
        Self { labels }
    }

    /// A copy of the base labels.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.labels.clone()
    }

    /// A copy whose deployment id names one instance.
    pub fn for_instance(&self, instance: &AppId) -> BTreeMap<String, String> {
        let mut labels = self.labels.clone();
        labels.insert(DEPLOYMENT_ID_LABEL.to_string(), instance.to_string());
        labels
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }
}

/// Selects everything belonging to one logical app, builds included.
pub fn app_selector(app_id: &AppId) -> String {
    format!("{}={}", APP_ID_LABEL, app_id)
}

/// Pod selector of one instance.
pub fn instance_selector(labels: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    labels
        .get(DEPLOYMENT_ID_LABEL)
        .map(|id| BTreeMap::from([(DEPLOYMENT_ID_LABEL.to_string(), id.clone())]))
        .unwrap_or_default()
}

pub fn object_meta(name: &str, labels: BTreeMap<String, String>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        labels: Some(labels),
        ..Default::default()
    }
}

fn sanitize_label_value(raw: &str) -> String {
    let mapped: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '-' })
        .collect();
    mapped
        .trim_matches(|c: char| !c.is_ascii_alphanumeric())
        .chars()
        .take(63)
        .collect()
}
