/* Copyright (C) 2025 Pedro Henrique / phkaiser13
* File: src/config.rs
*
* Deployer-wide configuration. It is read from an optional YAML file (camelCase
* keys, every field defaulted) and then overridden from `PH_DEPLOYER_*`
* environment variables, so a container can be configured either way.
* Malformed values are reported as configuration errors before anything is
* sent to the cluster.
*
* SPDX-License-Identifier: Apache-2.0 */

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Bundled fallback used when the Dockerfile property is set but blank.
pub const DEFAULT_DOCKERFILE: &str = include_str!("../resources/Dockerfile");

pub const ENV_NAMESPACE: &str = "PH_DEPLOYER_NAMESPACE";
pub const ENV_FORCE_BUILD: &str = "PH_DEPLOYER_FORCE_BUILD";
pub const ENV_GIT_SOURCE_SECRET: &str = "PH_DEPLOYER_GIT_SOURCE_SECRET";
pub const ENV_MAVEN_LOCAL_REPOSITORY: &str = "PH_DEPLOYER_MAVEN_LOCAL_REPOSITORY";

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct DeployerConfig {
    /// Target namespace; the client's default namespace when absent.
    pub namespace: Option<String>,
    /// Always rebuild unless a request says otherwise.
    pub force_build: bool,
    pub default_image_tag: String,
    pub default_git_ref: String,
    /// Context directory of Git builds, relative to the repository root.
    pub default_context_dir: String,
    /// Secret used to clone Git sources when the request names none.
    pub git_source_secret: Option<String>,
    /// Builder image for binary (source-to-image) builds.
    pub binary_base_image: String,
    pub default_dockerfile: String,
    pub create_route: bool,
    pub route_domain: Option<String>,
    pub service_port: i32,
    pub maven_local_repository: Option<PathBuf>,
    pub telemetry: TelemetryConfig,
}

impl Default for DeployerConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            force_build: false,
            default_image_tag: "latest".to_string(),
            default_git_ref: "master".to_string(),
            default_context_dir: "src/main/docker".to_string(),
            git_source_secret: None,
            binary_base_image: "registry.access.redhat.com/ubi9/openjdk-17:latest".to_string(),
            default_dockerfile: DEFAULT_DOCKERFILE.to_string(),
            create_route: false,
            route_domain: None,
            service_port: 8080,
            maven_local_repository: None,
            telemetry: TelemetryConfig::default(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct TelemetryConfig {
    /// Filter used when `RUST_LOG` is not set.
    pub log_level: String,
    pub json: bool,
    /// Export spans to a local Jaeger agent.
    pub jaeger: bool,
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json: false,
            jaeger: false,
            service_name: "ph-deployer".to_string(),
        }
    }
}

impl DeployerConfig {
    /// Reads the optional YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    Error::Config(format!("Cannot read config file '{}': {}", path.display(), e))
                })?;
                Self::from_yaml(&raw)?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(ns) = lookup(ENV_NAMESPACE).filter(|v| !v.trim().is_empty()) {
            self.namespace = Some(ns.trim().to_string());
        }
        if let Some(raw) = lookup(ENV_FORCE_BUILD).filter(|v| !v.trim().is_empty()) {
            self.force_build = match raw.trim().to_ascii_lowercase().as_str() {
                "true" => true,
                "false" => false,
                other => {
                    return Err(Error::Config(format!(
                        "{} must be true or false, got '{}'",
                        ENV_FORCE_BUILD, other
                    )))
                }
            };
        }
        if let Some(secret) = lookup(ENV_GIT_SOURCE_SECRET).filter(|v| !v.trim().is_empty()) {
            self.git_source_secret = Some(secret.trim().to_string());
        }
        if let Some(repo) = lookup(ENV_MAVEN_LOCAL_REPOSITORY).filter(|v| !v.trim().is_empty()) {
            self.maven_local_repository = Some(PathBuf::from(repo.trim()));
        }
        self.validate()
    }

    fn validate(&self) -> Result<()> {
        if self.default_image_tag.trim().is_empty() {
            return Err(Error::Config("defaultImageTag must not be empty".to_string()));
        }
        if !(1..=65535).contains(&self.service_port) {
            return Err(Error::Config(format!(
                "servicePort must be between 1 and 65535, got {}",
                self.service_port
            )));
        }
        Ok(())
    }
}
