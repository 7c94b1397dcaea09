/* Copyright (C) 2025 Pedro Henrique / phkaiser13
* File: src/request.rs
*
* The deployment request accepted by the deployer, the identifier derived from
* it, and the property keys the deployer understands. A request is immutable
* once accepted; everything the pipeline needs is read from its property bag.
*
* SPDX-License-Identifier: Apache-2.0 */

use crate::artifact::ArtifactRef;
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::fmt;

/// Property keys recognized on a request. Anything outside `PREFIX` is an
/// application property and is forwarded to the container as an argument.
pub mod keys {
    pub const PREFIX: &str = "ph.deployer.";

    pub const GIT_URI: &str = "ph.deployer.openshift.build.git.uri";
    pub const GIT_REF: &str = "ph.deployer.openshift.build.git.ref";
    pub const GIT_DOCKERFILE_PATH: &str = "ph.deployer.openshift.build.git.dockerfile";
    pub const GIT_SECRET: &str = "ph.deployer.openshift.build.git.secret";
    pub const DOCKERFILE: &str = "ph.deployer.openshift.deployment.dockerfile";
    pub const FORCE_BUILD: &str = "ph.deployer.openshift.forceBuild";
    pub const IMAGE_TAG: &str = "ph.deployer.openshift.image.tag";
    pub const SERVICE_ACCOUNT: &str = "ph.deployer.openshift.deployment.service.account";
    pub const NODE_SELECTOR: &str = "ph.deployer.openshift.deployment.nodeSelector";
    pub const ENVIRONMENT_VARIABLES: &str = "ph.deployer.openshift.deployment.environmentVariables";
    pub const ROUTE_HOSTNAME: &str = "ph.deployer.openshift.deployment.route.host";
    pub const CREATE_NODE_PORT: &str = "ph.deployer.openshift.createNodePort";
    pub const INDEXED: &str = "ph.deployer.indexed";
    pub const COUNT: &str = "ph.deployer.count";
    pub const GROUP: &str = "ph.deployer.group";
}

const MAX_NAME_LENGTH: usize = 63;

/// A request to deploy (or launch) one logical application.
#[derive(Debug, Clone)]
pub struct DeploymentRequest {
    pub name: String,
    pub artifact: ArtifactRef,
    pub properties: BTreeMap<String, String>,
    pub args: Vec<String>,
}

impl DeploymentRequest {
    pub fn new(name: impl Into<String>, artifact: ArtifactRef) -> Self {
        Self {
            name: name.into(),
            artifact,
            properties: BTreeMap::new(),
            args: Vec::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Returns the trimmed value of a property, treating blank values as set.
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(|v| v.trim())
    }

    /// Returns a property only when it carries a non-blank value.
    pub fn non_empty_property(&self, key: &str) -> Option<&str> {
        self.property(key).filter(|v| !v.is_empty())
    }

    /// Parses an optional boolean property. Absence is `None`.
    pub fn bool_property(&self, key: &str) -> Result<Option<bool>> {
        match self.non_empty_property(key) {
            None => Ok(None),
            Some(v) => parse_bool(key, v).map(Some),
        }
    }

    pub fn is_indexed(&self) -> Result<bool> {
        Ok(self.bool_property(keys::INDEXED)?.unwrap_or(false))
    }

    /// The requested instance count; defaults to one.
    pub fn count(&self) -> Result<u32> {
        match self.non_empty_property(keys::COUNT) {
            None => Ok(1),
            Some(v) => v
                .parse::<u32>()
                .ok()
                .filter(|n| i32::try_from(*n).is_ok())
                .ok_or_else(|| {
                    Error::Config(format!(
                        "'{}' must be an integer between 0 and {}, got '{}'",
                        keys::COUNT,
                        i32::MAX,
                        v
                    ))
                }),
        }
    }

    pub fn group(&self) -> Option<&str> {
        self.non_empty_property(keys::GROUP)
    }

    /// Node selector in `key:value,key:value` form.
    pub fn node_selector(&self) -> Result<BTreeMap<String, String>> {
        parse_pairs(self.non_empty_property(keys::NODE_SELECTOR), ':', keys::NODE_SELECTOR)
    }

    /// Container environment in `KEY=value,KEY=value` form.
    pub fn environment_variables(&self) -> Result<BTreeMap<String, String>> {
        parse_pairs(
            self.non_empty_property(keys::ENVIRONMENT_VARIABLES),
            '=',
            keys::ENVIRONMENT_VARIABLES,
        )
    }

    /// Command-line arguments for the container: the request's own arguments
    /// followed by every application property as `--key=value`.
    pub fn container_args(&self) -> Vec<String> {
        let mut args = self.args.clone();
        args.extend(
            self.properties
                .iter()
                .filter(|(k, _)| !k.starts_with(keys::PREFIX))
                .map(|(k, v)| format!("--{}={}", k, v)),
        );
        args
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(Error::Config(format!("'{}' must be true or false, got '{}'", key, other))),
    }
}

fn parse_pairs(raw: Option<&str>, separator: char, key: &str) -> Result<BTreeMap<String, String>> {
    let mut pairs = BTreeMap::new();
    let Some(raw) = raw else {
        return Ok(pairs);
    };
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        match entry.split_once(separator) {
            Some((k, v)) if !k.trim().is_empty() => {
                pairs.insert(k.trim().to_string(), v.trim().to_string());
            }
            _ => {
                return Err(Error::Config(format!(
                    "Invalid entry '{}' in '{}': expected name{}value",
                    entry, key, separator
                )))
            }
        }
    }
    Ok(pairs)
}

/// Stable identifier of one logical deployment. Also the name of every
/// resource the deployer creates for it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AppId(String);

impl AppId {
    pub fn for_request(request: &DeploymentRequest) -> Self {
        Self::from_parts(&request.name, request.group())
    }

    /// The id a request with this name and group gets: `<group>-<name>`
    /// (or `<name>`), sanitized.
    pub fn from_parts(name: &str, group: Option<&str>) -> Self {
        let raw = match group.map(str::trim).filter(|g| !g.is_empty()) {
            Some(group) => format!("{}-{}", group, name),
            None => name.to_string(),
        };
        Self(sanitize(&raw))
    }

    /// Wraps an id that is already a valid resource name.
    pub fn from_name(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Identifier of one indexed replica: `<id>-<index>`. The base is
    /// shortened so the result stays within the label length.
    pub fn instance(&self, index: u32) -> AppId {
        let suffix = format!("-{}", index);
        let mut base: String = self.0.chars().take(MAX_NAME_LENGTH - suffix.len()).collect();
        while base.ends_with('-') {
            base.pop();
        }
        AppId(base + &suffix)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lowercases and replaces anything outside `[a-z0-9-]` so the result is a
/// valid DNS-1123 label.
fn sanitize(raw: &str) -> String {
    let mapped: String = raw
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect();
    let trimmed = mapped.trim_matches('-');
    let mut name: String = trimmed.chars().take(MAX_NAME_LENGTH).collect();
    while name.ends_with('-') {
        name.pop();
    }
    name
}
